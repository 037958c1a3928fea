//! Render target images and the FBO layout built from the feature set
//!
//! The textures backing the off-screen targets are owned here and live in
//! the [`TextureManager`] so the back end samples them like any other
//! texture. They are created with the FBOs and released with them.

use crate::core::{RendererConfig, WindowConfig};
use crate::render::device::{GraphicsDevice, ImageFormat, TextureDesc};
use crate::render::resources::fbo::FboId;
use crate::render::resources::texture_manager::{TextureKey, TextureManager, TexturePriority};
use crate::render::RenderResult;

/// Screen pixels per first level depth tile
pub const TILE_SIZE_STEP1: u32 = 4;
/// Screen pixels per light tile
pub const TILE_SIZE: u32 = 16;
/// Layers of the light tile texture
pub const LIGHT_TILE_LAYERS: u32 = 4;
/// Bloom targets are this many times smaller than the window
pub const BLOOM_DOWNSCALE: u32 = 4;

/// Size of a tile grid covering `size` pixels
pub const fn tiles(size: u32, step: u32) -> u32 {
    (size + step - 1) / step
}

/// FBOs created for the current feature set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderTargets {
    /// Ping-pong main color targets
    pub main: [Option<FboId>; 2],
    /// First depth tile reduction
    pub depth_tile1: Option<FboId>,
    /// Second depth tile reduction
    pub depth_tile2: Option<FboId>,
    /// Light tile target
    pub light_tile: Option<FboId>,
    /// Portal render target for liquid surfaces
    pub portal: Option<FboId>,
    /// Bloom bright pass
    pub contrast: Option<FboId>,
    /// Bloom blur ping-pong
    pub bloom: [Option<FboId>; 2],
    /// Multisampled target
    pub msaa: Option<FboId>,
    /// Shadow maps
    pub shadow_maps: Vec<FboId>,
}

/// Textures backing the render targets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderTargetImages {
    /// Main color images
    pub current_render: [Option<TextureKey>; 2],
    /// Packed depth/stencil image shared by both main targets
    pub depth_render: Option<TextureKey>,
    /// First depth tile image
    pub depth_tile1: Option<TextureKey>,
    /// Second depth tile image
    pub depth_tile2: Option<TextureKey>,
    /// Light tile 3D image
    pub light_tile: Option<TextureKey>,
    /// Portal render image
    pub portal_render: Option<TextureKey>,
    /// Bloom bright pass image
    pub contrast_render: Option<TextureKey>,
    /// Bloom blur images
    pub bloom_render: [Option<TextureKey>; 2],
    /// Shadow map color images
    pub shadow_maps: Vec<TextureKey>,
}

/// Create a persistent, exact size render target texture
pub fn create_image(
    device: &mut dyn GraphicsDevice,
    textures: &mut TextureManager,
    desc: TextureDesc,
) -> RenderResult<TextureKey> {
    textures.create_texture(device, &desc.render_target(), TexturePriority::Persistent)
}

impl RenderTargetImages {
    /// Every image currently held
    pub fn all(&self) -> Vec<TextureKey> {
        self.current_render
            .iter()
            .chain([
                &self.depth_render,
                &self.depth_tile1,
                &self.depth_tile2,
                &self.light_tile,
                &self.portal_render,
                &self.contrast_render,
            ])
            .chain(self.bloom_render.iter())
            .flatten()
            .copied()
            .chain(self.shadow_maps.iter().copied())
            .collect()
    }

    /// Destroy every image
    pub fn release(&mut self, device: &mut dyn GraphicsDevice, textures: &mut TextureManager) {
        for key in self.all() {
            if let Err(err) = textures.destroy_texture(device, key) {
                log::warn!("Render target image already gone: {err}");
            }
        }
        *self = Self::default();
    }
}

/// Feature switches resolved against the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLayout {
    /// Window width
    pub width: u32,
    /// Window height
    pub height: u32,
    /// Color format of the main and portal targets
    pub color_format: ImageFormat,
    /// Tiled lighting targets
    pub realtime_lighting: bool,
    /// Portal target
    pub liquid_mapping: bool,
    /// Bloom chain
    pub bloom: bool,
    /// MSAA sample count, 0 for none
    pub msaa_samples: u32,
    /// Shadow map count
    pub shadow_maps: u32,
    /// Shadow map size
    pub shadow_map_size: u32,
}

impl TargetLayout {
    /// Resolve the configured features; float-only features are dropped without float targets
    pub fn resolve(config: &RendererConfig, window: &WindowConfig, float_targets: bool) -> Self {
        if !float_targets {
            if config.realtime_lighting {
                log::warn!("Float render targets unavailable, realtime lighting disabled");
            }
            if config.bloom {
                log::warn!("Float render targets unavailable, bloom disabled");
            }
            if config.shadow_maps > 0 {
                log::warn!("Float render targets unavailable, shadow maps disabled");
            }
        }
        Self {
            width: window.width,
            height: window.height,
            color_format: if float_targets { ImageFormat::Rgba16F } else { ImageFormat::Rgba8 },
            realtime_lighting: config.realtime_lighting && float_targets,
            liquid_mapping: config.liquid_mapping,
            bloom: config.bloom && float_targets,
            msaa_samples: config.msaa_samples,
            shadow_maps: if float_targets { config.shadow_maps } else { 0 },
            shadow_map_size: config.shadow_map_size,
        }
    }
}
