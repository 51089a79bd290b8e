use bevy::{asset::embedded_asset, prelude::*};
use itertools::Itertools;

pub const DEFAULT_VERTEX_SHADER: &str = "embedded://tessellated_terrain/shaders/render/vertex.wgsl";
pub const DEFAULT_FRAGMENT_SHADER: &str =
    "embedded://tessellated_terrain/shaders/render/fragment.wgsl";

/// Keeps the shared shader modules alive, so that their imports can always be resolved.
#[derive(Default, Resource)]
pub(crate) struct InternalShaders(Vec<Handle<Shader>>);

impl InternalShaders {
    pub(crate) fn load(app: &mut App, shaders: &[&'static str]) {
        let mut shaders = shaders
            .iter()
            .map(|&shader| app.world_mut().resource_mut::<AssetServer>().load(shader))
            .collect_vec();

        let mut internal_shaders = app.world_mut().resource_mut::<InternalShaders>();
        internal_shaders.0.append(&mut shaders);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

pub(crate) fn load_terrain_shaders(app: &mut App) {
    embedded_asset!(app, "types.wgsl");
    embedded_asset!(app, "bindings.wgsl");
    embedded_asset!(app, "debug.wgsl");
    embedded_asset!(app, "render/vertex.wgsl");
    embedded_asset!(app, "render/fragment.wgsl");

    app.init_resource::<InternalShaders>();

    InternalShaders::load(
        app,
        &[
            "embedded://tessellated_terrain/shaders/types.wgsl",
            "embedded://tessellated_terrain/shaders/bindings.wgsl",
            "embedded://tessellated_terrain/shaders/debug.wgsl",
        ],
    );
}
