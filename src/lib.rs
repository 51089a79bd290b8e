//! This crate renders a heightmap terrain whose tessellation density adapts continuously to the
//! distance from the viewer.
//!
//! # Background
//! The terrain is a regular grid of quad patches (see [`patch_grid`]), each described by just
//! its four corners. Every frame the level of detail of each patch edge is derived from the
//! distance between the camera and the midpoint of that edge: close edges are subdivided up to
//! 64 times, distant ones only a few times. Because both patches adjacent to an edge measure
//! the same midpoint, they agree on its subdivision.
//!
//! The subdivided patches are displaced by the heightmap in the vertex shader of the
//! [`TessellatedTerrainMaterial`](render::terrain_material::TessellatedTerrainMaterial). See the
//! [`tessellation`] module for how the fixed-function quad tessellator is emulated.
//!
//! A control panel (see [`debug`]) exposes the level of detail band, the height scale, a
//! wireframe view and a view shading every patch by its tessellation level.

pub mod camera;
pub mod debug;
pub mod error;
pub mod heightmap;
pub mod patch_grid;
pub mod plugin;
pub mod render;
pub mod shaders;
pub mod tessellation;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        camera::{CameraLens, TerrainCamera, UiFocus},
        debug::TerrainDebugPlugin,
        error::{FatalErrors, TerrainError, TerrainResult},
        heightmap::{Heightmap, HeightmapPlugin},
        patch_grid::PatchGrid,
        plugin::{TerrainConfig, TerrainPlugin, TerrainSet},
        render::{terrain_material::TessellatedTerrainMaterial, RenderMode, RenderSettings},
        tessellation::{LodSettings, PatchFactors},
    };
}
