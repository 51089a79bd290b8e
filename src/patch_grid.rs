//! Builds the quad patches that are fed into the tessellation stage.
//!
//! Neighbouring patches do not share vertices. Instead every control point is computed from
//! the same closed-form expression of its integer grid coordinate, so shared edges end up
//! bit-identical without any deduplication.

use bevy::prelude::*;
use itertools::iproduct;

/// Number of control points of a single patch.
pub const PATCH_CONTROL_POINTS: usize = 4;

/// Side length of the debug test patch.
pub const TEST_PATCH_SIZE: f32 = 5.0;

/// A patch control point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct Vertex {
    /// Object space position.
    pub position: [f32; 3],
    /// Normalized texture coordinate into the heightmap.
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }
}

/// The four control points of a bilinear quad patch, ordered bottom-left, bottom-right,
/// top-left, top-right.
pub type Patch = [Vertex; PATCH_CONTROL_POINTS];

/// A contiguous list of patches, stored patch-major and then in control point order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchGrid {
    patches: Vec<Patch>,
}

impl PatchGrid {
    /// Covers a `footprint` sized area centered at the origin of the XZ plane with
    /// `resolution` × `resolution` patches.
    pub fn terrain(resolution: u32, footprint: Vec2) -> Self {
        let patches = iproduct!(0..resolution, 0..resolution)
            .map(|(y, x)| {
                [
                    grid_vertex(x, y, resolution, footprint),
                    grid_vertex(x + 1, y, resolution, footprint),
                    grid_vertex(x, y + 1, resolution, footprint),
                    grid_vertex(x + 1, y + 1, resolution, footprint),
                ]
            })
            .collect();

        Self { patches }
    }

    /// A single centered patch in the XY plane, facing +Z. Used to debug the pipeline.
    pub fn test_patch() -> Self {
        let half = TEST_PATCH_SIZE / 2.0;

        Self {
            patches: vec![[
                Vertex::new([-half, -half, 0.0], [0.0, 0.0]),
                Vertex::new([half, -half, 0.0], [1.0, 0.0]),
                Vertex::new([-half, half, 0.0], [0.0, 1.0]),
                Vertex::new([half, half, 0.0], [1.0, 1.0]),
            ]],
        }
    }

    /// The control points of all patches as one contiguous buffer.
    pub fn vertices(&self) -> &[Vertex] {
        self.patches.as_flattened()
    }

    pub fn vertex_count(&self) -> usize {
        PATCH_CONTROL_POINTS * self.patches.len()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }
}

/// The control point at integer grid coordinate (`i`, `j`).
#[inline]
fn grid_vertex(i: u32, j: u32, resolution: u32, footprint: Vec2) -> Vertex {
    let resolution = resolution as f32;
    let (i, j) = (i as f32, j as f32);
    let (width, height) = (footprint.x, footprint.y);

    Vertex::new(
        [
            -width / 2.0 + width * i / resolution,
            0.0,
            -height / 2.0 + height * j / resolution,
        ],
        [i / resolution, j / resolution],
    )
}
