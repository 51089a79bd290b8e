//! Distance based level of detail for the patch tessellation.
//!
//! # Overview
//! Every patch edge gets its own tessellation factor, derived from the distance between the
//! camera and the midpoint of that edge. Inside the [`LodSettings::min_range`] the edge is
//! subdivided [`LodSettings::max_tess_level`] times, beyond the [`LodSettings::max_range`] only
//! [`LodSettings::min_tess_level`] times, and the band in between interpolates linearly.
//!
//! Since wgpu does not expose hardware tessellation, the fixed-function quad tessellator is
//! emulated in [`tessellator`], and only the resulting domain points are written into a regular
//! triangle mesh in [`patch_mesh`]. Evaluating the bilinear patches, the heightmap displacement
//! and the debug shading happen in the terrain shaders.
//!
//! Neighbouring patches compute the factor of a shared edge from the same midpoint, so they
//! agree on it. T-junction cracks between patches of differing inner levels are accepted.

pub mod patch_mesh;
pub mod tessellator;

use crate::{
    error::{TerrainError, TerrainResult},
    patch_grid::Patch,
};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// The largest tessellation level the fixed-function tessellator supports.
pub const MAX_TESS_LEVEL: u32 = 64;

/// The live level of detail configuration.
#[derive(Resource, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodSettings {
    /// The tessellation level used at and beyond `max_range`.
    pub min_tess_level: u32,
    /// The tessellation level used up to `min_range`.
    pub max_tess_level: u32,
    /// The distance up to which the finest level is used.
    pub min_range: f32,
    /// The distance from which on the coarsest level is used.
    pub max_range: f32,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self {
            min_tess_level: 8,
            max_tess_level: 64,
            min_range: 50.0,
            max_range: 500.0,
        }
    }
}

impl LodSettings {
    pub fn validate(&self) -> TerrainResult<()> {
        if self.min_tess_level < 1 || self.max_tess_level > MAX_TESS_LEVEL {
            return Err(TerrainError::invalid_config(format!(
                "tessellation levels must lie in 1..={MAX_TESS_LEVEL}, got {}..={}",
                self.min_tess_level, self.max_tess_level
            )));
        }
        if self.min_tess_level > self.max_tess_level {
            return Err(TerrainError::invalid_config(format!(
                "min tessellation level {} exceeds max tessellation level {}",
                self.min_tess_level, self.max_tess_level
            )));
        }
        if !(self.min_range > 0.0 && self.min_range < self.max_range) {
            return Err(TerrainError::invalid_config(format!(
                "lod ranges must satisfy 0 < min < max, got {}..{}",
                self.min_range, self.max_range
            )));
        }

        Ok(())
    }

    /// The continuous tessellation factor for an edge at `distance` from the camera.
    pub fn factor(&self, distance: f32) -> f32 {
        let t = ((distance - self.min_range) / (self.max_range - self.min_range)).clamp(0.0, 1.0);

        let max = self.max_tess_level as f32;
        let min = self.min_tess_level as f32;

        max + (min - max) * t
    }

    /// The tessellation factor of the edge from `start` to `end` seen from `eye`.
    pub fn edge_factor(&self, start: Vec3, end: Vec3, eye: Vec3) -> f32 {
        self.factor(((start + end) * 0.5).distance(eye))
    }
}

/// Rounds a factor the way the tessellator's integer spacing does.
#[inline]
fn integer_spacing(factor: f32) -> u32 {
    (factor.ceil() as u32).clamp(1, MAX_TESS_LEVEL)
}

/// The integer tessellation levels of a single quad patch.
///
/// Outer levels follow the quad domain convention: `0` is the `u = 0` edge, `1` the `v = 0`
/// edge, `2` the `u = 1` edge and `3` the `v = 1` edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PatchFactors {
    pub outer: [u32; 4],
    pub inner: [u32; 2],
}

impl PatchFactors {
    /// The same level on every edge and in both interior directions.
    pub const fn uniform(level: u32) -> Self {
        Self {
            outer: [level; 4],
            inner: [level; 2],
        }
    }

    pub fn from_outer(outer: [u32; 4]) -> Self {
        Self {
            outer,
            inner: [outer[1].max(outer[3]), outer[0].max(outer[2])],
        }
    }

    /// Computes the levels of a patch with world space control `points`
    /// (bottom-left, bottom-right, top-left, top-right) seen from `eye`.
    pub fn compute(points: &[Vec3; 4], eye: Vec3, lod: &LodSettings) -> Self {
        let [bottom_left, bottom_right, top_left, top_right] = *points;

        Self::from_outer(
            [
                (bottom_left, top_left),
                (bottom_left, bottom_right),
                (bottom_right, top_right),
                (top_left, top_right),
            ]
            .map(|(start, end)| integer_spacing(lod.edge_factor(start, end, eye))),
        )
    }

    /// The densest level of the patch, used to colour the LOD debug view.
    pub fn max_level(&self) -> u32 {
        self.inner[0].max(self.inner[1])
    }
}

/// The control point positions of `patch` in world space.
pub fn world_points(patch: &Patch, transform: &GlobalTransform) -> [Vec3; 4] {
    patch.map(|vertex| transform.transform_point(Vec3::from(vertex.position)))
}
