use crate::{
    camera::{camera_input, init_terrain_camera, UiFocus},
    debug::TerrainDebugPlugin,
    error::{exit_on_fatal_error, FatalErrors, TerrainError, TerrainResult},
    heightmap::HeightmapPlugin,
    render::{
        apply_render_mode, disable_unsupported_wireframe,
        spawn::{load_heightmap, spawn_terrain, PendingHeightmap},
        sync_terrain_material, RenderMode, RenderSettings, TerrainRenderPlugin,
    },
    shaders::load_terrain_shaders,
    tessellation::{patch_mesh::update_tessellation, LodSettings},
};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fs, io::ErrorKind, path::Path};

/// The largest accepted number of patches along one side of the terrain.
pub const MAX_PATCH_RESOLUTION: u32 = 256;
pub const MIN_HEIGHT_SCALE: f32 = 0.1;
pub const MAX_HEIGHT_SCALE: f32 = 200.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: f32,
    pub height: f32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Tessellated Terrain".into(),
            width: 900.0,
            height: 700.0,
        }
    }
}

/// The startup configuration of the terrain viewer, usually read from a RON file.
#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Asset path of the heightmap image.
    pub heightmap: String,
    /// Number of patches along each side of the terrain.
    pub patch_resolution: u32,
    pub lod: LodSettings,
    pub height_scale: f32,
    pub render_mode: RenderMode,
    pub window: WindowConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            heightmap: "heightmaps/terrain.png".into(),
            patch_resolution: 20,
            lod: LodSettings::default(),
            height_scale: 64.0,
            render_mode: RenderMode::TestPatch,
            window: WindowConfig::default(),
        }
    }
}

impl TerrainConfig {
    pub fn validate(&self) -> TerrainResult<()> {
        self.lod.validate()?;

        if self.patch_resolution > MAX_PATCH_RESOLUTION {
            return Err(TerrainError::invalid_config(format!(
                "patch resolution {} exceeds {MAX_PATCH_RESOLUTION}",
                self.patch_resolution
            )));
        }
        if !(MIN_HEIGHT_SCALE..=MAX_HEIGHT_SCALE).contains(&self.height_scale) {
            return Err(TerrainError::invalid_config(format!(
                "height scale {} outside of {MIN_HEIGHT_SCALE}..={MAX_HEIGHT_SCALE}",
                self.height_scale
            )));
        }
        if !(self.window.width > 0.0 && self.window.height > 0.0) {
            return Err(TerrainError::invalid_config(format!(
                "window size {}x{} is empty",
                self.window.width, self.window.height
            )));
        }

        Ok(())
    }

    pub fn from_ron_str(source: &str) -> TerrainResult<Self> {
        let config: Self = ron::from_str(source).map_err(TerrainError::invalid_config)?;
        config.validate()?;

        Ok(config)
    }

    /// Reads the configuration at `path`, falling back to the defaults if there is no file.
    pub fn load_or_default(path: impl AsRef<Path>) -> TerrainResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(source) => Self::from_ron_str(&source),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(TerrainError::resource_load(path.display(), error)),
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            height_scale: self.height_scale,
            mode: self.render_mode,
            ..default()
        }
    }
}

/// The stages of a frame, in order.
#[derive(SystemSet, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerrainSet {
    /// The control panel and keyboard shortcuts edit the settings.
    Controls,
    /// The camera follows the pointer.
    Camera,
    /// The settings are pushed into the material and the visible mesh is chosen.
    Sync,
    /// The visible patch mesh is retessellated for the new camera position.
    Tessellate,
}

/// The plugin for the tessellated terrain viewer.
pub struct TerrainPlugin {
    pub config: TerrainConfig,
}

impl Plugin for TerrainPlugin {
    fn build(&self, app: &mut App) {
        load_terrain_shaders(app);

        app.add_plugins((HeightmapPlugin, TerrainRenderPlugin, TerrainDebugPlugin))
            .insert_resource(self.config.clone())
            .insert_resource(self.config.lod)
            .insert_resource(self.config.render_settings())
            .init_resource::<UiFocus>()
            .init_resource::<FatalErrors>()
            .configure_sets(
                Update,
                (
                    TerrainSet::Controls,
                    TerrainSet::Camera,
                    TerrainSet::Sync,
                    TerrainSet::Tessellate,
                )
                    .chain(),
            )
            .add_systems(Startup, load_heightmap)
            .add_systems(
                Update,
                (
                    spawn_terrain
                        .run_if(resource_exists::<PendingHeightmap>)
                        .before(TerrainSet::Camera),
                    (init_terrain_camera, camera_input)
                        .chain()
                        .in_set(TerrainSet::Camera),
                    (
                        disable_unsupported_wireframe,
                        apply_render_mode,
                        sync_terrain_material,
                    )
                        .chain()
                        .in_set(TerrainSet::Sync),
                    update_tessellation.in_set(TerrainSet::Tessellate),
                ),
            )
            .add_systems(Last, exit_on_fatal_error);

        if let Err(error) = self.config.validate() {
            app.world().resource::<FatalErrors>().report(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TerrainConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.patch_resolution, 20);
        assert_eq!(config.render_settings().height_scale, 64.0);
    }

    #[test]
    fn partial_ron_falls_back_to_defaults() {
        let config = TerrainConfig::from_ron_str(
            r#"(
                patch_resolution: 8,
                lod: (min_tess_level: 4, max_range: 900.0),
                render_mode: Terrain,
            )"#,
        )
        .unwrap();

        assert_eq!(config.patch_resolution, 8);
        assert_eq!(config.lod.min_tess_level, 4);
        assert_eq!(config.lod.max_tess_level, 64);
        assert_eq!(config.lod.max_range, 900.0);
        assert_eq!(config.render_mode, RenderMode::Terrain);
        assert_eq!(config.heightmap, "heightmaps/terrain.png");
    }

    #[test]
    fn invalid_values_are_rejected() {
        for source in [
            "(lod: (min_tess_level: 32, max_tess_level: 16))",
            "(lod: (min_range: 600.0))",
            "(patch_resolution: 1000)",
            "(height_scale: 0.0)",
            "(window: (width: 0.0))",
            "(patch_resolution: -3)",
            "not ron at all",
        ] {
            assert!(
                matches!(
                    TerrainConfig::from_ron_str(source),
                    Err(TerrainError::InvalidConfig { .. })
                ),
                "{source} was accepted"
            );
        }
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = TerrainConfig::load_or_default("does/not/exist/terrain.ron").unwrap();

        assert_eq!(config, TerrainConfig::default());
    }
}
