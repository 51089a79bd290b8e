//! Draws the tessellated patch meshes.
//!
//! Every frame the live [`RenderSettings`] and [`LodSettings`] are pushed into the
//! [`TessellatedTerrainMaterial`]s of both patch meshes, and exactly one of the two patch meshes (the test patch or
//! the terrain) is left visible. The camera matrices reach the shaders through bevy's view
//! uniforms.
//!
//! Shader and pipeline failures surface asynchronously in the render world. They are sent back
//! to the main world through the [`FatalErrors`] channel.

use crate::{
    error::{FatalErrors, TerrainError},
    tessellation::LodSettings,
};
use async_channel::Sender;
use bevy::{
    prelude::*,
    render::{
        render_resource::{
            CachedPipelineState, PipelineCache, PipelineCacheError, PipelineDescriptor,
        },
        renderer::RenderDevice,
        settings::WgpuFeatures,
        Render, RenderApp, RenderSet,
    },
};
use serde::{Deserialize, Serialize};

pub mod spawn;
pub mod terrain_material;

use terrain_material::{TessellatedTerrainMaterial, TERRAIN_PIPELINE_LABEL};

pub const CLEAR_COLOR: Color = Color::srgb(0.12, 0.63, 0.22);

/// Which of the two patch meshes is drawn. Also tags the entity drawn in that mode.
#[derive(Component, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderMode {
    /// A single patch in front of the camera, to inspect the tessellation in isolation.
    #[default]
    TestPatch,
    Terrain,
}

impl RenderMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::TestPatch => Self::Terrain,
            Self::Terrain => Self::TestPatch,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TestPatch => "test patch",
            Self::Terrain => "terrain",
        }
    }
}

#[derive(Resource, Clone, Copy, Debug, PartialEq)]
pub struct RenderSettings {
    pub wireframe: bool,
    /// Shade by tessellation level instead of by height.
    pub show_lod: bool,
    /// World units of displacement for a heightmap value of one.
    pub height_scale: f32,
    pub mode: RenderMode,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            wireframe: false,
            show_lod: false,
            height_scale: 64.0,
            mode: RenderMode::TestPatch,
        }
    }
}

/// Whether the render device can draw polygons as lines. Assumed until the device is known.
#[derive(Resource, Clone, Copy, Debug, PartialEq, Eq, Deref)]
pub struct WireframeSupport(pub bool);

impl Default for WireframeSupport {
    fn default() -> Self {
        Self(true)
    }
}

/// Switches the wireframe view back off on devices without line polygons.
pub fn disable_unsupported_wireframe(
    support: Res<WireframeSupport>,
    mut settings: ResMut<RenderSettings>,
) {
    if !**support && settings.wireframe {
        settings.wireframe = false;
        warn!("The render device cannot draw line polygons, the wireframe view stays off.");
    }
}

/// Shows the patch mesh of the current render mode and hides the other one.
pub fn apply_render_mode(
    settings: Res<RenderSettings>,
    mut patch_meshes: Query<(&RenderMode, &mut Visibility)>,
) {
    for (&mode, mut visibility) in &mut patch_meshes {
        visibility.set_if_neq(if mode == settings.mode {
            Visibility::Inherited
        } else {
            Visibility::Hidden
        });
    }
}

/// Pushes the live settings into the terrain materials.
pub fn sync_terrain_material(
    settings: Res<RenderSettings>,
    lod: Res<LodSettings>,
    handles: Option<Res<spawn::TerrainHandles>>,
    mut materials: ResMut<Assets<TessellatedTerrainMaterial>>,
) {
    let Some(handles) = handles else {
        return;
    };

    for handle in handles.materials() {
        let Some(material) = materials.get(handle) else {
            continue;
        };

        // Mutable access alone would re-prepare the material, so only take it on a real change.
        let mut updated = material.clone();
        if updated.sync(&settings, &lod) {
            if let Some(material) = materials.get_mut(handle) {
                *material = updated;
            }
        }
    }
}

/// Forwards render world errors to the main world.
#[derive(Resource)]
struct PipelineErrors(Sender<TerrainError>);

/// The fatal error for a terrain pipeline that failed with `error`, if it really failed.
fn shader_build_error(
    vertex_entry: &str,
    fragment_entry: Option<&str>,
    error: &PipelineCacheError,
) -> Option<TerrainError> {
    match error {
        // Still waiting for the shader assets, the cache retries these.
        PipelineCacheError::ShaderNotLoaded(_) | PipelineCacheError::ShaderImportNotYetAvailable => {
            None
        }
        error => Some(TerrainError::ShaderBuild {
            pipeline: format!(
                "{TERRAIN_PIPELINE_LABEL} ({vertex_entry}/{})",
                fragment_entry.unwrap_or("-")
            ),
            message: error.to_string(),
        }),
    }
}

/// Reports the first failure of the terrain pipeline as a fatal error.
fn report_pipeline_errors(
    pipeline_cache: Res<PipelineCache>,
    errors: Res<PipelineErrors>,
    mut reported: Local<bool>,
) {
    if *reported {
        return;
    }

    for pipeline in pipeline_cache.pipelines() {
        let PipelineDescriptor::RenderPipelineDescriptor(descriptor) = &pipeline.descriptor else {
            continue;
        };
        if descriptor.label.as_deref() != Some(TERRAIN_PIPELINE_LABEL) {
            continue;
        }
        let CachedPipelineState::Err(error) = &pipeline.state else {
            continue;
        };

        let fragment_entry = descriptor
            .fragment
            .as_ref()
            .map(|fragment| &*fragment.entry_point);

        if let Some(error) = shader_build_error(&descriptor.vertex.entry_point, fragment_entry, error)
        {
            let _ = errors.0.try_send(error);
            *reported = true;
            return;
        }
    }
}

/// Registers the terrain material and watches its pipeline in the render world.
pub struct TerrainRenderPlugin;

impl Plugin for TerrainRenderPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(MaterialPlugin::<TessellatedTerrainMaterial> {
            // The prepasses would draw the patches without their displacement.
            prepass_enabled: false,
            shadows_enabled: false,
            ..default()
        })
        .insert_resource(ClearColor(CLEAR_COLOR))
        .init_resource::<WireframeSupport>()
        .init_resource::<FatalErrors>();

        let errors = app.world().resource::<FatalErrors>().sender();

        if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app
                .insert_resource(PipelineErrors(errors))
                .add_systems(Render, report_pipeline_errors.in_set(RenderSet::Cleanup));
        }
    }

    fn finish(&self, app: &mut App) {
        let Some(device) = app.world().get_resource::<RenderDevice>() else {
            return;
        };

        let supported = device.features().contains(WgpuFeatures::POLYGON_MODE_LINE);
        if !supported {
            warn!(
                "The render device does not support line polygons, \
                 the wireframe view is disabled."
            );
        }

        app.insert_resource(WireframeSupport(supported));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_mode_shows_exactly_one_mesh() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .init_resource::<RenderSettings>()
            .add_systems(Update, apply_render_mode);

        let test_patch = app
            .world_mut()
            .spawn((RenderMode::TestPatch, Visibility::Hidden))
            .id();
        let terrain = app
            .world_mut()
            .spawn((RenderMode::Terrain, Visibility::Inherited))
            .id();

        let visibilities = |app: &App| {
            [test_patch, terrain].map(|entity| *app.world().get::<Visibility>(entity).unwrap())
        };

        app.update();
        assert_eq!(visibilities(&app), [Visibility::Inherited, Visibility::Hidden]);

        app.world_mut().resource_mut::<RenderSettings>().mode = RenderMode::Terrain;
        app.update();
        assert_eq!(visibilities(&app), [Visibility::Hidden, Visibility::Inherited]);
    }

    #[test]
    fn render_mode_toggles() {
        assert_eq!(RenderMode::TestPatch.toggled(), RenderMode::Terrain);
        assert_eq!(RenderMode::Terrain.toggled().toggled(), RenderMode::Terrain);
    }

    #[test]
    fn wireframe_stays_off_without_line_polygons() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .init_resource::<RenderSettings>()
            .insert_resource(WireframeSupport(false))
            .add_systems(Update, disable_unsupported_wireframe);

        app.world_mut().resource_mut::<RenderSettings>().wireframe = true;
        app.update();
        assert!(!app.world().resource::<RenderSettings>().wireframe);

        app.insert_resource(WireframeSupport(true));
        app.world_mut().resource_mut::<RenderSettings>().wireframe = true;
        app.update();
        assert!(app.world().resource::<RenderSettings>().wireframe);
    }

    #[test]
    fn pending_shaders_are_not_build_errors() {
        for error in [
            PipelineCacheError::ShaderNotLoaded(AssetId::default()),
            PipelineCacheError::ShaderImportNotYetAvailable,
        ] {
            assert_eq!(shader_build_error("vertex", Some("fragment"), &error), None);
        }
    }

    #[test]
    fn build_errors_keep_the_compiler_message() {
        let error = PipelineCacheError::CreateShaderModule("expected ';', found '}'".into());

        let Some(TerrainError::ShaderBuild { pipeline, message }) =
            shader_build_error("vertex", Some("fragment"), &error)
        else {
            panic!("a failed shader module is a build error");
        };

        assert_eq!(pipeline, "tessellated_terrain_pipeline (vertex/fragment)");
        assert_eq!(message, error.to_string());
        assert!(message.contains("expected ';', found '}'"));

        let Some(TerrainError::ShaderBuild { pipeline, .. }) =
            shader_build_error("vertex", None, &error)
        else {
            panic!("a failed shader module is a build error");
        };
        assert_eq!(pipeline, "tessellated_terrain_pipeline (vertex/-)");
    }
}
