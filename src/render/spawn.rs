use crate::{
    camera::{CameraLens, TerrainCamera},
    error::{FatalErrors, TerrainError},
    heightmap::Heightmap,
    patch_grid::PatchGrid,
    plugin::TerrainConfig,
    render::{
        terrain_material::{Displacement, TessellatedTerrainMaterial},
        RenderMode, RenderSettings,
    },
    tessellation::{
        patch_mesh::{patch_buffer, PatchMesh},
        LodSettings,
    },
};
use bevy::{
    asset::{AssetLoadError, LoadState},
    prelude::*,
    render::{storage::ShaderStorageBuffer, view::NoFrustumCulling},
    window::PrimaryWindow,
};

/// Where the camera starts, looking down the negative z axis at the test patch.
pub const CAMERA_START: Vec3 = Vec3::new(0.0, 0.0, 50.0);

/// The heightmap requested at startup, until it has finished loading.
#[derive(Resource, Clone, Debug)]
pub struct PendingHeightmap {
    pub path: String,
    pub handle: Handle<Heightmap>,
}

/// The assets drawing one patch mesh.
#[derive(Clone, Debug)]
pub struct PatchMeshHandles {
    pub mesh: Handle<Mesh>,
    pub material: Handle<TessellatedTerrainMaterial>,
}

/// All long lived assets of the viewer.
#[derive(Resource, Clone, Debug)]
pub struct TerrainHandles {
    pub heightmap: Handle<Heightmap>,
    pub heightmap_image: Handle<Image>,
    pub test_patch: PatchMeshHandles,
    /// `None` if the terrain has no patches.
    pub terrain: Option<PatchMeshHandles>,
}

impl TerrainHandles {
    pub fn materials(&self) -> impl Iterator<Item = &Handle<TessellatedTerrainMaterial>> {
        std::iter::once(&self.test_patch)
            .chain(self.terrain.as_ref())
            .map(|handles| &handles.material)
    }
}

pub fn load_heightmap(
    mut commands: Commands,
    asset_server: Res<AssetServer>,
    config: Res<TerrainConfig>,
) {
    info!("Loading heightmap {}.", config.heightmap);

    commands.insert_resource(PendingHeightmap {
        path: config.heightmap.clone(),
        handle: asset_server.load(config.heightmap.clone()),
    });
}

/// Spawns the camera and both patch meshes once the heightmap is available.
#[allow(clippy::too_many_arguments)]
pub fn spawn_terrain(
    mut commands: Commands,
    pending: Res<PendingHeightmap>,
    asset_server: Res<AssetServer>,
    heightmaps: Res<Assets<Heightmap>>,
    errors: Res<FatalErrors>,
    config: Res<TerrainConfig>,
    settings: Res<RenderSettings>,
    lod: Res<LodSettings>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<TessellatedTerrainMaterial>>,
    mut buffers: ResMut<Assets<ShaderStorageBuffer>>,
) {
    if let Some(LoadState::Failed(error)) = asset_server.get_load_state(&pending.handle) {
        // Failures of the loader itself have already been reported with their precise type.
        if !matches!(error.as_ref(), AssetLoadError::AssetLoaderError(_)) {
            errors.report(TerrainError::resource_load(&pending.path, error));
        }

        commands.remove_resource::<PendingHeightmap>();
        return;
    }

    let Some(heightmap) = heightmaps.get(&pending.handle) else {
        return;
    };

    info!(
        "Loaded heightmap {}: {}x{} texels ({:?}).",
        pending.path, heightmap.width, heightmap.height, heightmap.format
    );

    let heightmap_image = images.add(heightmap.to_image());
    let mut spawn_patch_mesh = |name: &'static str,
                                mode: RenderMode,
                                grid: PatchGrid,
                                displacement: Displacement| {
        let handles = PatchMeshHandles {
            mesh: meshes.reserve_handle(),
            material: materials.add(TessellatedTerrainMaterial::new(
                heightmap_image.clone(),
                buffers.add(patch_buffer(&grid)),
                displacement,
                &settings,
                &lod,
            )),
        };

        commands.spawn((
            Name::new(name),
            mode,
            PatchMesh::new(grid),
            Mesh3d(handles.mesh.clone()),
            MeshMaterial3d(handles.material.clone()),
            Visibility::Hidden,
            NoFrustumCulling,
        ));

        handles
    };

    let test_patch = spawn_patch_mesh(
        "Test Patch",
        RenderMode::TestPatch,
        PatchGrid::test_patch(),
        Displacement::test_patch(heightmap.footprint()),
    );

    let grid = PatchGrid::terrain(config.patch_resolution, heightmap.footprint());
    info!(
        "Terrain grid: {} patches, {} control points processed.",
        grid.patch_count(),
        grid.vertex_count()
    );

    let terrain = if grid.is_empty() {
        warn!("The patch resolution is zero, there is no terrain to draw.");
        None
    } else {
        Some(spawn_patch_mesh(
            "Terrain",
            RenderMode::Terrain,
            grid,
            Displacement::TERRAIN,
        ))
    };

    let lens = match windows.get_single() {
        Ok(window) => CameraLens::from_viewport(window.width(), window.height()),
        Err(_) => CameraLens::from_viewport(config.window.width, config.window.height),
    };
    commands.spawn((Name::new("Terrain Camera"), TerrainCamera::new(CAMERA_START, lens)));

    commands.insert_resource(TerrainHandles {
        heightmap: pending.handle.clone(),
        heightmap_image,
        test_patch,
        terrain,
    });
    commands.remove_resource::<PendingHeightmap>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::MAX_HEIGHT_SCALE;

    fn app(config: TerrainConfig) -> App {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, AssetPlugin::default()))
            .init_asset::<Heightmap>()
            .init_asset::<Image>()
            .init_asset::<Mesh>()
            .init_asset::<TessellatedTerrainMaterial>()
            .init_asset::<ShaderStorageBuffer>()
            .init_resource::<FatalErrors>()
            .init_resource::<RenderSettings>()
            .init_resource::<LodSettings>()
            .insert_resource(config)
            .add_systems(
                Update,
                spawn_terrain.run_if(resource_exists::<PendingHeightmap>),
            );
        app
    }

    fn insert_heightmap(app: &mut App, width: u32, height: u32) {
        let handle = app.world_mut().resource_mut::<Assets<Heightmap>>().add(Heightmap {
            width,
            height,
            format: crate::heightmap::HeightmapFormat::Luma,
            data: vec![u8::MAX; (width * height) as usize],
        });

        app.insert_resource(PendingHeightmap {
            path: "heightmaps/flat.png".into(),
            handle,
        });
    }

    #[test]
    fn spawns_camera_and_both_patch_meshes() {
        let mut app = app(TerrainConfig::default());
        insert_heightmap(&mut app, 64, 32);

        app.update();

        let world = app.world_mut();
        assert!(!world.contains_resource::<PendingHeightmap>());
        assert!(world.resource::<TerrainHandles>().terrain.is_some());
        assert_eq!(world.resource::<TerrainHandles>().materials().count(), 2);

        assert_eq!(world.query::<&TerrainCamera>().iter(world).count(), 1);

        let mut patch_meshes = world.query::<(&RenderMode, &PatchMesh)>();
        let terrain = patch_meshes
            .iter(world)
            .find(|(mode, _)| **mode == RenderMode::Terrain)
            .map(|(_, patch_mesh)| patch_mesh.grid().clone())
            .unwrap();

        assert_eq!(patch_meshes.iter(world).count(), 2);
        assert_eq!(terrain.patch_count(), 400);
        // The footprint is one world unit per texel.
        assert_eq!(terrain.vertices()[0].position, [-32.0, 0.0, -16.0]);
    }

    #[test]
    fn zero_resolution_spawns_only_the_test_patch() {
        let mut app = app(TerrainConfig {
            patch_resolution: 0,
            ..default()
        });
        insert_heightmap(&mut app, 16, 16);

        app.update();

        let world = app.world_mut();
        assert!(world.resource::<TerrainHandles>().terrain.is_none());
        assert_eq!(world.query::<&PatchMesh>().iter(world).count(), 1);
    }

    #[test]
    fn waits_for_the_heightmap() {
        let mut app = app(TerrainConfig::default());
        let handle = app
            .world_mut()
            .resource_mut::<Assets<Heightmap>>()
            .reserve_handle();
        app.insert_resource(PendingHeightmap {
            path: "heightmaps/later.png".into(),
            handle,
        });

        app.update();

        assert!(app.world().contains_resource::<PendingHeightmap>());
        assert!(!app.world().contains_resource::<TerrainHandles>());
    }

    #[test]
    fn test_patch_stays_in_front_of_the_camera() {
        for (width, height) in [(512, 512), (64, 32), (8, 8)] {
            let mut app = app(TerrainConfig::default());
            app.insert_resource(RenderSettings {
                height_scale: MAX_HEIGHT_SCALE,
                ..default()
            });
            insert_heightmap(&mut app, width, height);

            app.update();

            let world = app.world();
            let handles = world.resource::<TerrainHandles>();
            let materials = world.resource::<Assets<TessellatedTerrainMaterial>>();
            let uniform = materials.get(&handles.test_patch.material).unwrap().uniform;

            // Every texel of the heightmap is at full height.
            let highest = uniform.normal * uniform.height_scale;
            let near = CameraLens::from_viewport(900.0, 700.0).near;
            assert!(highest.z < CAMERA_START.z - near, "{width}x{height}: {highest}");

            let terrain = materials
                .get(&handles.terrain.as_ref().unwrap().material)
                .unwrap()
                .uniform;
            assert_eq!(terrain.normal, Vec3::Y);
            assert_eq!(terrain.height_scale, MAX_HEIGHT_SCALE);
        }
    }
}
