//! The heightmap resource that displaces the tessellated terrain.
//!
//! Heightmaps are decoded on the CPU first, so that unsupported images are rejected before
//! anything is uploaded to the GPU. Only afterwards are they turned into a sampled [`Image`],
//! which the vertex shader reads with bilinear filtering and clamp-to-edge addressing.

use crate::error::{FatalErrors, TerrainError, TerrainResult};
use async_channel::Sender;
use bevy::{
    asset::{io::Reader, AssetLoader, LoadContext},
    image::{ImageAddressMode, ImageFilterMode, ImageSampler, ImageSamplerDescriptor},
    prelude::*,
    render::{
        render_asset::RenderAssetUsages,
        render_resource::{Extent3d, TextureDimension, TextureFormat},
    },
};
use image::DynamicImage;

/// The pixel layouts a heightmap may be stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeightmapFormat {
    /// One channel, uploaded as `R8Unorm`.
    Luma,
    /// Three channels, expanded with an opaque alpha channel and uploaded as `Rgba8Unorm`.
    Rgb,
    /// Four channels, uploaded as `Rgba8Unorm`.
    Rgba,
}

impl HeightmapFormat {
    pub fn from_channel_count(channels: u8) -> Option<Self> {
        match channels {
            1 => Some(Self::Luma),
            3 => Some(Self::Rgb),
            4 => Some(Self::Rgba),
            _ => None,
        }
    }

    pub fn texture_format(self) -> TextureFormat {
        match self {
            Self::Luma => TextureFormat::R8Unorm,
            Self::Rgb | Self::Rgba => TextureFormat::Rgba8Unorm,
        }
    }
}

/// A decoded heightmap. The first row of `data` is the bottom row of the source image.
#[derive(Asset, TypePath, Clone, Debug)]
pub struct Heightmap {
    pub width: u32,
    pub height: u32,
    pub format: HeightmapFormat,
    pub data: Vec<u8>,
}

impl Heightmap {
    /// Decodes an encoded image file. `path` is only used to name the resource in errors.
    pub fn decode(bytes: &[u8], path: &str) -> TerrainResult<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|error| TerrainError::resource_load(path, error))?;

        Self::from_dynamic_image(image, path)
    }

    pub fn from_dynamic_image(image: DynamicImage, path: &str) -> TerrainResult<Self> {
        let channels = image.color().channel_count();

        let Some(format) = HeightmapFormat::from_channel_count(channels) else {
            return Err(TerrainError::UnsupportedFormat {
                path: path.to_string(),
                channels,
            });
        };

        // Texture coordinate (0, 0) addresses the bottom-left texel.
        let image = image.flipv();
        let (width, height) = (image.width(), image.height());

        let data = match format {
            HeightmapFormat::Luma => image.into_luma8().into_raw(),
            HeightmapFormat::Rgb | HeightmapFormat::Rgba => image.into_rgba8().into_raw(),
        };

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// The world space extent of the terrain, one world unit per texel.
    pub fn footprint(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    /// Creates the texture sampled by the terrain shaders.
    pub fn to_image(&self) -> Image {
        let mut image = Image::new(
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            self.data.clone(),
            self.format.texture_format(),
            RenderAssetUsages::RENDER_WORLD,
        );

        image.sampler = ImageSampler::Descriptor(ImageSamplerDescriptor {
            label: Some("heightmap_sampler".into()),
            address_mode_u: ImageAddressMode::ClampToEdge,
            address_mode_v: ImageAddressMode::ClampToEdge,
            mag_filter: ImageFilterMode::Linear,
            min_filter: ImageFilterMode::Linear,
            ..default()
        });

        image
    }
}

/// Loads [`Heightmap`] assets from any image format enabled in the `image` crate.
///
/// The asset server only keeps the rendered message of a failed load, so the typed error is
/// also reported as fatal right here.
pub struct HeightmapLoader {
    errors: Sender<TerrainError>,
}

impl AssetLoader for HeightmapLoader {
    type Asset = Heightmap;
    type Settings = ();
    type Error = TerrainError;

    async fn load(
        &self,
        reader: &mut dyn Reader,
        _settings: &(),
        load_context: &mut LoadContext<'_>,
    ) -> Result<Self::Asset, Self::Error> {
        let path = load_context.path().display().to_string();

        let mut bytes = Vec::new();
        if let Err(error) = reader.read_to_end(&mut bytes).await {
            let error = TerrainError::resource_load(&path, error);
            let _ = self.errors.try_send(error.clone());
            return Err(error);
        }

        Heightmap::decode(&bytes, &path).inspect_err(|error| {
            let _ = self.errors.try_send(error.clone());
        })
    }

    fn extensions(&self) -> &[&str] {
        &["png", "jpg", "jpeg", "bmp", "tga"]
    }
}

pub struct HeightmapPlugin;

impl Plugin for HeightmapPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FatalErrors>();
        let errors = app.world().resource::<FatalErrors>().sender();

        app.init_asset::<Heightmap>()
            .register_asset_loader(HeightmapLoader { errors });
    }
}
