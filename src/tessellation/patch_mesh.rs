//! The tessellated patches of an entity, stored as domain points in a regular bevy [`Mesh`].
//!
//! Vertices only carry their (u, v) domain coordinate, the index of their patch and its
//! tessellation level. The vertex shader reads the control points of that patch from a storage
//! buffer (see [`patch_buffer`]), evaluates the bilinear patch and displaces the result.
//!
//! Every patch owns a slot in the vertex and index buffers. When its factors change it is
//! rewritten in place if the new tessellation fits, padding unused indices with degenerate
//! triangles, and moved to the end of the buffers otherwise. Unchanged patches are never
//! touched, and the buffers are compacted once retired slots make up half of them.

use super::{
    tessellator::{tessellate, TessellatedPatch},
    world_points, LodSettings, PatchFactors,
};
use crate::{
    camera::TerrainCamera,
    patch_grid::{Patch, PatchGrid},
};
use bevy::{
    prelude::*,
    render::{
        mesh::{Indices, MeshVertexAttribute, PrimitiveTopology, VertexAttributeValues},
        render_asset::RenderAssetUsages,
        render_resource::{ShaderType, VertexFormat},
        storage::ShaderStorageBuffer,
    },
    utils::HashMap,
};
use itertools::Itertools;
use std::iter;

/// The position of a vertex in the unit square domain of its patch.
pub const ATTRIBUTE_DOMAIN: MeshVertexAttribute =
    MeshVertexAttribute::new("Vertex_Domain", 471_820_591, VertexFormat::Float32x2);

/// The index of the patch a vertex belongs to, into the patch storage buffer.
pub const ATTRIBUTE_PATCH_INDEX: MeshVertexAttribute =
    MeshVertexAttribute::new("Vertex_PatchIndex", 471_820_592, VertexFormat::Uint32);

/// The densest tessellation level of the patch a vertex belongs to.
pub const ATTRIBUTE_TESS_LEVEL: MeshVertexAttribute =
    MeshVertexAttribute::new("Vertex_TessLevel", 471_820_593, VertexFormat::Float32);

const MAX_CACHED_TESSELLATIONS: usize = 4096;

/// The control points of a patch, laid out for the vertex shader.
#[derive(Clone, Copy, Debug, Default, PartialEq, ShaderType)]
pub struct GpuPatch {
    /// Object space positions, `w` is unused.
    pub positions: [Vec4; 4],
    pub uvs: [Vec2; 4],
}

impl From<&Patch> for GpuPatch {
    fn from(patch: &Patch) -> Self {
        Self {
            positions: patch.map(|vertex| Vec3::from(vertex.position).extend(1.0)),
            uvs: patch.map(|vertex| Vec2::from(vertex.uv)),
        }
    }
}

/// The storage buffer holding the control points of every patch in `grid`.
pub fn patch_buffer(grid: &PatchGrid) -> ShaderStorageBuffer {
    let patches = grid.patches().iter().map(GpuPatch::from).collect_vec();

    ShaderStorageBuffer::from(patches)
}

/// The vertex and index data of a patch mesh, taken out of its [`Mesh`] while it is rewritten.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchBuffers {
    pub domains: Vec<[f32; 2]>,
    pub patch_indices: Vec<u32>,
    pub levels: Vec<f32>,
    pub indices: Vec<u32>,
}

impl PatchBuffers {
    /// Moves the buffers out of `mesh`. Missing attributes come back empty.
    pub fn take(mesh: &mut Mesh) -> Self {
        let domains = match mesh.remove_attribute(ATTRIBUTE_DOMAIN) {
            Some(VertexAttributeValues::Float32x2(domains)) => domains,
            _ => Vec::new(),
        };
        let patch_indices = match mesh.remove_attribute(ATTRIBUTE_PATCH_INDEX) {
            Some(VertexAttributeValues::Uint32(patch_indices)) => patch_indices,
            _ => Vec::new(),
        };
        let levels = match mesh.remove_attribute(ATTRIBUTE_TESS_LEVEL) {
            Some(VertexAttributeValues::Float32(levels)) => levels,
            _ => Vec::new(),
        };
        let indices = match mesh.remove_indices() {
            Some(Indices::U32(indices)) => indices,
            _ => Vec::new(),
        };

        Self {
            domains,
            patch_indices,
            levels,
            indices,
        }
    }

    /// Moves the buffers back into `mesh`.
    pub fn put(self, mesh: &mut Mesh) {
        mesh.insert_attribute(ATTRIBUTE_DOMAIN, self.domains);
        mesh.insert_attribute(ATTRIBUTE_PATCH_INDEX, self.patch_indices);
        mesh.insert_attribute(ATTRIBUTE_TESS_LEVEL, self.levels);
        mesh.insert_indices(Indices::U32(self.indices));
    }

    pub fn vertex_count(&self) -> usize {
        self.domains.len()
    }

    fn is_consistent(&self) -> bool {
        self.patch_indices.len() == self.domains.len() && self.levels.len() == self.domains.len()
    }

    fn clear(&mut self) {
        self.domains.clear();
        self.patch_indices.clear();
        self.levels.clear();
        self.indices.clear();
    }
}

/// The region of the buffers owned by one patch.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Slot {
    /// The factors the slot was last written with.
    factors: PatchFactors,
    first_vertex: u32,
    vertex_count: u32,
    vertex_capacity: u32,
    first_index: u32,
    index_capacity: u32,
}

impl Slot {
    fn within(&self, buffers: &PatchBuffers) -> bool {
        (self.first_vertex + self.vertex_capacity) as usize <= buffers.vertex_count()
            && (self.first_index + self.index_capacity) as usize <= buffers.indices.len()
    }

    fn fits(&self, tessellation: &TessellatedPatch) -> bool {
        tessellation.points.len() <= self.vertex_capacity as usize
            && tessellation.indices.len() <= self.index_capacity as usize
    }

    /// Turns all triangles of the slot into degenerate ones.
    fn retire(&self, buffers: &mut PatchBuffers) {
        let start = self.first_index as usize;
        buffers.indices[start..start + self.index_capacity as usize].fill(self.first_vertex);
    }
}

fn write_patch(
    buffers: &mut PatchBuffers,
    slot: Option<Slot>,
    patch_index: u32,
    factors: PatchFactors,
    tessellation: &TessellatedPatch,
) -> Slot {
    let level = factors.max_level() as f32;
    let vertex_count = tessellation.points.len();
    let domains = tessellation.points.iter().map(|point| point.to_array());

    match slot {
        Some(slot) if slot.fits(tessellation) => {
            let first_vertex = slot.first_vertex as usize;
            let vertices = first_vertex..first_vertex + vertex_count;

            for (target, domain) in buffers.domains[vertices.clone()].iter_mut().zip(domains) {
                *target = domain;
            }
            buffers.levels[vertices].fill(level);

            let first_index = slot.first_index as usize;
            let written = first_index + tessellation.indices.len();
            for (target, index) in buffers.indices[first_index..written]
                .iter_mut()
                .zip(&tessellation.indices)
            {
                *target = slot.first_vertex + index;
            }
            buffers.indices[written..first_index + slot.index_capacity as usize]
                .fill(slot.first_vertex);

            Slot {
                factors,
                vertex_count: vertex_count as u32,
                ..slot
            }
        }
        slot => {
            if let Some(slot) = slot {
                slot.retire(buffers);
            }

            let first_vertex = buffers.domains.len() as u32;
            let first_index = buffers.indices.len() as u32;

            buffers.domains.extend(domains);
            buffers
                .patch_indices
                .extend(iter::repeat(patch_index).take(vertex_count));
            buffers.levels.extend(iter::repeat(level).take(vertex_count));
            buffers
                .indices
                .extend(tessellation.indices.iter().map(|index| first_vertex + index));

            Slot {
                factors,
                first_vertex,
                vertex_count: vertex_count as u32,
                vertex_capacity: vertex_count as u32,
                first_index,
                index_capacity: tessellation.indices.len() as u32,
            }
        }
    }
}

/// The patches drawn by an entity, together with the factors its current mesh was built with.
#[derive(Component, Clone, Debug)]
pub struct PatchMesh {
    grid: PatchGrid,
    factors: Vec<PatchFactors>,
    scratch: Vec<PatchFactors>,
    slots: Vec<Slot>,
    tessellations: HashMap<PatchFactors, TessellatedPatch>,
}

impl PatchMesh {
    pub fn new(grid: PatchGrid) -> Self {
        Self {
            grid,
            factors: Vec::new(),
            scratch: Vec::new(),
            slots: Vec::new(),
            tessellations: HashMap::default(),
        }
    }

    /// A mesh without any patches yet, to be filled by [`PatchMesh::write_mesh`].
    pub fn empty_mesh() -> Mesh {
        Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default())
    }

    pub fn grid(&self) -> &PatchGrid {
        &self.grid
    }

    pub fn factors(&self) -> &[PatchFactors] {
        &self.factors
    }

    /// The number of vertices referenced by the current tessellation.
    pub fn live_vertex_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.vertex_count as usize).sum()
    }

    fn reserved_vertex_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.vertex_capacity as usize).sum()
    }

    /// Recomputes the factors of every patch. Returns whether any of them changed.
    pub fn refresh(&mut self, eye: Vec3, transform: &GlobalTransform, lod: &LodSettings) -> bool {
        self.scratch.clear();
        self.scratch.extend(
            self.grid
                .patches()
                .iter()
                .map(|patch| PatchFactors::compute(&world_points(patch, transform), eye, lod)),
        );

        if self.scratch == self.factors {
            return false;
        }

        std::mem::swap(&mut self.factors, &mut self.scratch);
        true
    }

    /// Brings the buffers of `mesh` up to date with the current factors.
    /// Returns the number of patches that were written.
    pub fn write_mesh(&mut self, mesh: &mut Mesh) -> usize {
        let mut buffers = PatchBuffers::take(mesh);

        // The mesh may have been replaced since the slots were assigned.
        if self.slots.len() > self.factors.len()
            || !buffers.is_consistent()
            || !self.slots.iter().all(|slot| slot.within(&buffers))
        {
            self.slots.clear();
        }
        if self.slots.is_empty() {
            buffers.clear();
        }

        let mut written = self.write_patches(&mut buffers);

        // Slack inside live slots is kept for regrowth, only retired slots count as stale.
        if buffers.vertex_count() > 2 * self.reserved_vertex_count() {
            buffers.clear();
            self.slots.clear();
            written = self.write_patches(&mut buffers);
        }

        buffers.put(mesh);
        written
    }

    fn write_patches(&mut self, buffers: &mut PatchBuffers) -> usize {
        let mut written = 0;

        for (index, &factors) in self.factors.iter().enumerate() {
            let slot = self.slots.get(index).copied();
            if slot.is_some_and(|slot| slot.factors == factors) {
                continue;
            }

            if self.tessellations.len() >= MAX_CACHED_TESSELLATIONS
                && !self.tessellations.contains_key(&factors)
            {
                self.tessellations.clear();
            }
            let tessellation = self
                .tessellations
                .entry(factors)
                .or_insert_with(|| tessellate(&factors));

            let slot = write_patch(buffers, slot, index as u32, factors, tessellation);
            match self.slots.get_mut(index) {
                Some(target) => *target = slot,
                None => self.slots.push(slot),
            }
            written += 1;
        }

        written
    }
}

/// Retessellates the visible patch meshes for the current camera position.
pub fn update_tessellation(
    lod: Res<LodSettings>,
    cameras: Query<&TerrainCamera>,
    mut patch_meshes: Query<(Entity, &mut PatchMesh, &Mesh3d, &GlobalTransform, &Visibility)>,
    mut meshes: ResMut<Assets<Mesh>>,
) {
    let Ok(camera) = cameras.get_single() else {
        return;
    };
    let eye = camera.eye();

    for (entity, mut patch_mesh, mesh, transform, visibility) in &mut patch_meshes {
        if *visibility == Visibility::Hidden {
            continue;
        }

        if !patch_mesh.refresh(eye, transform, &lod) {
            continue;
        }

        let written = match meshes.get_mut(&mesh.0) {
            Some(target) => patch_mesh.write_mesh(target),
            None => {
                let mut target = PatchMesh::empty_mesh();
                let written = patch_mesh.write_mesh(&mut target);
                meshes.insert(&mesh.0, target);
                written
            }
        };

        debug!(
            "Retessellated {written} of {} patches of {entity}, {} live vertices.",
            patch_mesh.grid().patch_count(),
            patch_mesh.live_vertex_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraInput, CameraLens};

    fn uniform_lod(level: u32) -> LodSettings {
        LodSettings {
            min_tess_level: level,
            max_tess_level: level,
            ..default()
        }
    }

    /// Counts the triangles that are not padding.
    fn live_triangles(buffers: &PatchBuffers) -> usize {
        buffers
            .indices
            .chunks_exact(3)
            .filter(|triangle| !(triangle[0] == triangle[1] && triangle[1] == triangle[2]))
            .count()
    }

    fn expected_triangles(patch_mesh: &PatchMesh) -> usize {
        patch_mesh
            .factors()
            .iter()
            .map(|factors| tessellate(factors).triangle_count())
            .sum()
    }

    /// Every live triangle references vertices of a single patch.
    fn assert_well_formed(buffers: &PatchBuffers) {
        for triangle in buffers.indices.chunks_exact(3) {
            assert!(triangle.iter().all(|&index| (index as usize) < buffers.vertex_count()));

            let patch = buffers.patch_indices[triangle[0] as usize];
            assert!(triangle
                .iter()
                .all(|&index| buffers.patch_indices[index as usize] == patch));
        }
    }

    fn written(patch_mesh: &mut PatchMesh, mesh: &mut Mesh) -> (usize, PatchBuffers) {
        let count = patch_mesh.write_mesh(mesh);
        let buffers = PatchBuffers::take(mesh);
        buffers.clone().put(mesh);
        (count, buffers)
    }

    #[test]
    fn gpu_patches_keep_the_control_points() {
        let grid = PatchGrid::terrain(1, Vec2::splat(10.0));
        let patch = GpuPatch::from(&grid.patches()[0]);

        assert_eq!(patch.positions[0], Vec4::new(-5.0, 0.0, -5.0, 1.0));
        assert_eq!(patch.positions[3], Vec4::new(5.0, 0.0, 5.0, 1.0));
        assert_eq!(patch.uvs, [Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::ONE]);
    }

    #[test]
    fn uniform_factors_fill_the_buffers() {
        let mut patch_mesh = PatchMesh::new(PatchGrid::terrain(3, Vec2::splat(90.0)));
        let mut mesh = PatchMesh::empty_mesh();

        assert!(patch_mesh.refresh(Vec3::ZERO, &GlobalTransform::IDENTITY, &uniform_lod(4)));
        let (count, buffers) = written(&mut patch_mesh, &mut mesh);

        assert_eq!(count, 9);
        assert_eq!(mesh.count_vertices(), 9 * 25);
        assert_eq!(mesh.indices().map(Indices::len), Some(9 * 2 * 16 * 3));
        assert_eq!(patch_mesh.live_vertex_count(), 9 * 25);

        assert!(buffers
            .domains
            .iter()
            .flatten()
            .all(|coordinate| (0.0..=1.0).contains(coordinate)));
        assert_eq!(
            buffers.patch_indices.iter().dedup().copied().collect_vec(),
            (0..9).collect_vec()
        );
        assert!(buffers.levels.iter().all(|&level| level == 4.0));
        assert_well_formed(&buffers);
    }

    #[test]
    fn mesh_is_only_rebuilt_when_factors_change() {
        let lod = LodSettings::default();
        let transform = GlobalTransform::IDENTITY;
        let mut patch_mesh = PatchMesh::new(PatchGrid::terrain(4, Vec2::splat(400.0)));

        let eye = Vec3::new(0.0, 30.0, 0.0);
        assert!(patch_mesh.refresh(eye, &transform, &lod));
        assert_eq!(patch_mesh.factors().len(), 16);

        assert!(!patch_mesh.refresh(eye, &transform, &lod));
        // Far too small a step to change any rounded factor.
        assert!(!patch_mesh.refresh(eye + Vec3::new(0.0, 1e-4, 0.0), &transform, &lod));

        assert!(patch_mesh.refresh(Vec3::new(0.0, 5000.0, 0.0), &transform, &lod));
        assert!(patch_mesh
            .factors()
            .iter()
            .all(|factors| *factors == PatchFactors::uniform(lod.min_tess_level)));
    }

    #[test]
    fn only_changed_patches_are_rewritten() {
        let lod = LodSettings {
            min_range: 150.0,
            max_range: 1000.0,
            ..default()
        };
        let transform = GlobalTransform::IDENTITY;
        let mut patch_mesh = PatchMesh::new(PatchGrid::terrain(4, Vec2::splat(400.0)));
        let mut mesh = PatchMesh::empty_mesh();

        patch_mesh.refresh(Vec3::new(-200.0, 30.0, -200.0), &transform, &lod);
        patch_mesh.write_mesh(&mut mesh);
        let before = patch_mesh.factors().to_vec();

        // The corner patch stays within the finest band, the far side of the grid does not.
        assert!(patch_mesh.refresh(Vec3::new(-100.0, 30.0, -200.0), &transform, &lod));
        let changed = before
            .iter()
            .zip(patch_mesh.factors())
            .filter(|(before, after)| before != after)
            .count();
        assert!(changed > 0 && changed < 16);
        assert_eq!(patch_mesh.factors()[0], before[0]);

        let (count, buffers) = written(&mut patch_mesh, &mut mesh);
        assert_eq!(count, changed);
        assert_eq!(live_triangles(&buffers), expected_triangles(&patch_mesh));
        assert_well_formed(&buffers);

        // Nothing changed, nothing is written.
        assert_eq!(patch_mesh.write_mesh(&mut mesh), 0);
    }

    #[test]
    fn shrinking_patches_keep_their_slots() {
        let transform = GlobalTransform::IDENTITY;
        let mut patch_mesh = PatchMesh::new(PatchGrid::terrain(2, Vec2::splat(100.0)));
        let mut mesh = PatchMesh::empty_mesh();

        patch_mesh.refresh(Vec3::ZERO, &transform, &uniform_lod(16));
        let (_, dense) = written(&mut patch_mesh, &mut mesh);

        patch_mesh.refresh(Vec3::ZERO, &transform, &uniform_lod(3));
        let (count, coarse) = written(&mut patch_mesh, &mut mesh);

        assert_eq!(count, 4);
        assert_eq!(coarse.vertex_count(), dense.vertex_count());
        assert_eq!(coarse.indices.len(), dense.indices.len());
        assert_eq!(live_triangles(&coarse), 4 * 2 * 9);
        assert_eq!(patch_mesh.live_vertex_count(), 4 * 16);
        assert_well_formed(&coarse);
    }

    #[test]
    fn stale_slots_are_compacted() {
        let transform = GlobalTransform::IDENTITY;
        let mut patch_mesh = PatchMesh::new(PatchGrid::terrain(2, Vec2::splat(100.0)));
        let mut mesh = PatchMesh::empty_mesh();

        for level in 1..=24 {
            patch_mesh.refresh(Vec3::ZERO, &transform, &uniform_lod(level));
            let (count, buffers) = written(&mut patch_mesh, &mut mesh);

            assert_eq!(count, 4);
            assert!(buffers.vertex_count() <= 2 * patch_mesh.live_vertex_count());
            assert_eq!(live_triangles(&buffers), expected_triangles(&patch_mesh));
            assert_well_formed(&buffers);
        }
    }

    #[test]
    fn factors_follow_the_entity_transform() {
        let lod = LodSettings::default();
        let mut patch_mesh = PatchMesh::new(PatchGrid::test_patch());

        let far_away = GlobalTransform::from_translation(Vec3::new(0.0, 0.0, -10_000.0));
        patch_mesh.refresh(Vec3::ZERO, &far_away, &lod);

        assert_eq!(patch_mesh.factors(), &[PatchFactors::uniform(lod.min_tess_level)]);
    }

    fn tessellation_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .init_resource::<Assets<Mesh>>()
            .init_resource::<LodSettings>()
            .add_systems(Update, update_tessellation);
        app
    }

    #[test]
    fn update_tessellation_skips_hidden_entities() {
        let mut app = tessellation_app();

        app.world_mut().spawn((
            TerrainCamera::new(
                Vec3::new(0.0, 0.0, 50.0),
                CameraLens::from_viewport(900.0, 700.0),
            ),
            Transform::default(),
        ));

        let (visible_mesh, hidden_mesh) = {
            let mut meshes = app.world_mut().resource_mut::<Assets<Mesh>>();
            (meshes.reserve_handle(), meshes.reserve_handle())
        };

        let visible = app
            .world_mut()
            .spawn((
                PatchMesh::new(PatchGrid::test_patch()),
                Mesh3d(visible_mesh.clone()),
                GlobalTransform::IDENTITY,
                Visibility::Inherited,
            ))
            .id();
        let hidden = app
            .world_mut()
            .spawn((
                PatchMesh::new(PatchGrid::terrain(2, Vec2::splat(64.0))),
                Mesh3d(hidden_mesh.clone()),
                GlobalTransform::IDENTITY,
                Visibility::Hidden,
            ))
            .id();

        app.update();

        let meshes = app.world().resource::<Assets<Mesh>>();
        assert_eq!(
            meshes.get(&visible_mesh).map(Mesh::count_vertices),
            Some(65 * 65)
        );
        assert!(!meshes.contains(&hidden_mesh));

        // The camera is 50 units in front of the test patch, inside the finest band.
        let world = app.world();
        assert_eq!(
            world.get::<PatchMesh>(visible).unwrap().factors(),
            &[PatchFactors::uniform(64)]
        );
        assert!(world.get::<PatchMesh>(hidden).unwrap().factors().is_empty());
    }

    #[test]
    fn update_tessellation_measures_from_the_view_matrix() {
        let mut app = tessellation_app();

        let mut camera = TerrainCamera::new(
            Vec3::new(0.0, 0.0, 50.0),
            CameraLens::from_viewport(900.0, 700.0),
        );
        camera.apply(&CameraInput {
            scroll: -60.0,
            ..default()
        });
        let eye = camera.eye();
        app.world_mut().spawn((camera, Transform::default()));

        let mesh = app.world_mut().resource_mut::<Assets<Mesh>>().add(PatchMesh::empty_mesh());
        let grid = PatchGrid::terrain(3, Vec2::splat(300.0));
        let entity = app
            .world_mut()
            .spawn((
                PatchMesh::new(grid.clone()),
                Mesh3d(mesh),
                GlobalTransform::IDENTITY,
                Visibility::Inherited,
            ))
            .id();

        app.update();

        let lod = LodSettings::default();
        let expected = grid
            .patches()
            .iter()
            .map(|patch| {
                PatchFactors::compute(&world_points(patch, &GlobalTransform::IDENTITY), eye, &lod)
            })
            .collect_vec();
        assert_eq!(
            app.world().get::<PatchMesh>(entity).unwrap().factors(),
            expected.as_slice()
        );
    }
}
