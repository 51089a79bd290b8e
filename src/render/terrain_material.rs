use crate::{
    patch_grid::TEST_PATCH_SIZE,
    plugin::MAX_HEIGHT_SCALE,
    render::RenderSettings,
    shaders::{DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER},
    tessellation::{
        patch_mesh::{ATTRIBUTE_DOMAIN, ATTRIBUTE_PATCH_INDEX, ATTRIBUTE_TESS_LEVEL},
        LodSettings,
    },
};
use bevy::{
    pbr::{MaterialPipeline, MaterialPipelineKey},
    prelude::*,
    render::{
        mesh::MeshVertexBufferLayoutRef,
        render_resource::{
            AsBindGroup, PolygonMode, RenderPipelineDescriptor, ShaderDefVal, ShaderRef,
            ShaderType, SpecializedMeshPipelineError,
        },
        storage::ShaderStorageBuffer,
    },
};

/// The label of the render pipeline drawing the terrain, used to attribute build failures.
pub const TERRAIN_PIPELINE_LABEL: &str = "tessellated_terrain_pipeline";

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct TerrainPipelineFlags: u32 {
        const NONE      = 0;
        const WIREFRAME = 1 << 0;
        const SHOW_LOD  = 1 << 1;
    }
}

impl TerrainPipelineFlags {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        let mut key = TerrainPipelineFlags::NONE;

        if settings.wireframe {
            key |= TerrainPipelineFlags::WIREFRAME;
        }
        if settings.show_lod {
            key |= TerrainPipelineFlags::SHOW_LOD;
        }

        key
    }

    pub fn polygon_mode(&self) -> PolygonMode {
        match self.contains(TerrainPipelineFlags::WIREFRAME) {
            true => PolygonMode::Line,
            false => PolygonMode::Fill,
        }
    }

    pub fn shader_defs(&self) -> Vec<ShaderDefVal> {
        let mut shader_defs = Vec::new();

        if self.contains(TerrainPipelineFlags::SHOW_LOD) {
            shader_defs.push("SHOW_LOD".into());
        }

        shader_defs
    }
}

/// How strongly and in which direction the heightmap displaces a patch mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Displacement {
    /// Object space displacement direction.
    pub normal: Vec3,
    /// Multiplies the live height scale.
    pub relief: f32,
}

impl Displacement {
    pub const TERRAIN: Self = Self {
        normal: Vec3::Y,
        relief: 1.0,
    };

    /// The test patch shows the whole heightmap of the given `footprint` on a much smaller quad,
    /// so its relief shrinks by the same ratio. It is never displaced by more than its own size.
    pub fn test_patch(footprint: Vec2) -> Self {
        Self {
            normal: Vec3::Z,
            relief: TEST_PATCH_SIZE / footprint.max_element().max(MAX_HEIGHT_SCALE),
        }
    }

    /// The offset of a texel with the full height value.
    pub fn max_offset(&self, height_scale: f32) -> Vec3 {
        self.normal * self.relief * height_scale
    }
}

/// The per draw parameters of the evaluation and fragment stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, ShaderType)]
pub struct TerrainUniform {
    pub normal: Vec3,
    pub height_scale: f32,
    pub min_tess_level: f32,
    pub max_tess_level: f32,
}

impl TerrainUniform {
    pub fn new(settings: &RenderSettings, lod: &LodSettings, displacement: &Displacement) -> Self {
        Self {
            normal: displacement.normal,
            height_scale: settings.height_scale * displacement.relief,
            min_tess_level: lod.min_tess_level as f32,
            max_tess_level: lod.max_tess_level as f32,
        }
    }
}

/// Displaces the tessellated patches by the heightmap and shades them by height or by
/// tessellation level.
#[derive(Asset, AsBindGroup, TypePath, Clone, Debug)]
#[bind_group_data(TerrainPipelineFlags)]
pub struct TessellatedTerrainMaterial {
    #[uniform(0)]
    pub uniform: TerrainUniform,
    #[texture(1)]
    #[sampler(2)]
    pub heightmap: Handle<Image>,
    /// The control points of every patch of the mesh drawn with this material.
    #[storage(3, read_only)]
    pub patches: Handle<ShaderStorageBuffer>,
    pub displacement: Displacement,
    pub flags: TerrainPipelineFlags,
}

impl From<&TessellatedTerrainMaterial> for TerrainPipelineFlags {
    fn from(material: &TessellatedTerrainMaterial) -> Self {
        material.flags
    }
}

impl TessellatedTerrainMaterial {
    pub fn new(
        heightmap: Handle<Image>,
        patches: Handle<ShaderStorageBuffer>,
        displacement: Displacement,
        settings: &RenderSettings,
        lod: &LodSettings,
    ) -> Self {
        Self {
            uniform: TerrainUniform::new(settings, lod, &displacement),
            heightmap,
            patches,
            displacement,
            flags: TerrainPipelineFlags::from_settings(settings),
        }
    }

    /// Copies the live settings into the material. Returns whether anything changed.
    pub fn sync(&mut self, settings: &RenderSettings, lod: &LodSettings) -> bool {
        let uniform = TerrainUniform::new(settings, lod, &self.displacement);
        let flags = TerrainPipelineFlags::from_settings(settings);

        let changed = self.uniform != uniform || self.flags != flags;
        self.uniform = uniform;
        self.flags = flags;

        changed
    }
}

impl Material for TessellatedTerrainMaterial {
    fn vertex_shader() -> ShaderRef {
        DEFAULT_VERTEX_SHADER.into()
    }

    fn fragment_shader() -> ShaderRef {
        DEFAULT_FRAGMENT_SHADER.into()
    }

    fn specialize(
        _pipeline: &MaterialPipeline<Self>,
        descriptor: &mut RenderPipelineDescriptor,
        layout: &MeshVertexBufferLayoutRef,
        key: MaterialPipelineKey<Self>,
    ) -> Result<(), SpecializedMeshPipelineError> {
        let flags = key.bind_group_data;

        descriptor.label = Some(TERRAIN_PIPELINE_LABEL.into());

        descriptor.vertex.buffers = vec![layout.0.get_layout(&[
            ATTRIBUTE_DOMAIN.at_shader_location(0),
            ATTRIBUTE_PATCH_INDEX.at_shader_location(1),
            ATTRIBUTE_TESS_LEVEL.at_shader_location(2),
        ])?];

        descriptor.primitive.cull_mode = None;
        descriptor.primitive.polygon_mode = flags.polygon_mode();

        let shader_defs = flags.shader_defs();
        descriptor.vertex.shader_defs.extend(shader_defs.iter().cloned());
        if let Some(fragment) = descriptor.fragment.as_mut() {
            fragment.shader_defs.extend(shader_defs);
        }

        Ok(())
    }
}
