//! Framebuffer object registry
//!
//! Owns every off-screen render target the current feature set needs. FBOs
//! live in a flat table addressed by [`FboId`] and are only ever created in
//! bulk by [`FboRegistry::init_fbos`] and destroyed in bulk by
//! [`FboRegistry::shutdown_fbos`]; callers must have synchronized with the
//! render thread before either.
//!
//! ## Attachments
//!
//! Renderbuffer attachments are created lazily: the first call for a slot
//! allocates the renderbuffer and attaches it, later calls only respecify
//! its storage at the FBO's current size.

use crate::core::{RendererConfig, WindowConfig};
use crate::render::device::{
    AttachmentPoint, FormatClass, FramebufferStatus, GraphicsDevice, ImageFormat, NativeHandle, TextureDesc,
    TextureTarget, EXT_TEXTURE_FLOAT,
};
use crate::render::resources::render_targets::{
    create_image, tiles, RenderTargetImages, RenderTargets, TargetLayout, BLOOM_DOWNSCALE, LIGHT_TILE_LAYERS,
    TILE_SIZE, TILE_SIZE_STEP1,
};
use crate::render::resources::texture_manager::{TextureKey, TextureManager};
use crate::render::{RenderError, RenderResult};

/// FBO table size
pub const MAX_FBOS: usize = 64;
/// Longest FBO name plus terminator
pub const MAX_QPATH: usize = 64;
/// Color attachment slots per FBO
pub const MAX_COLOR_BUFFERS: usize = 16;

/// Index into the FBO table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FboId(pub usize);

/// A renderbuffer attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renderbuffer {
    /// Native renderbuffer
    pub handle: NativeHandle,
    /// Storage format
    pub format: ImageFormat,
    /// MSAA samples, 0 for none
    pub samples: u32,
}

/// Framebuffer object
#[derive(Debug, Clone)]
pub struct Fbo {
    name: String,
    framebuffer: NativeHandle,
    color_buffers: [Option<Renderbuffer>; MAX_COLOR_BUFFERS],
    depth_buffer: Option<Renderbuffer>,
    stencil_buffer: Option<Renderbuffer>,
    packed_depth_stencil_buffer: Option<Renderbuffer>,
    width: u32,
    height: u32,
}

impl Fbo {
    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native framebuffer
    pub const fn framebuffer(&self) -> NativeHandle {
        self.framebuffer
    }

    /// Current size
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Color renderbuffer at `index`
    pub fn color_buffer(&self, index: usize) -> Option<&Renderbuffer> {
        self.color_buffers.get(index).and_then(Option::as_ref)
    }

    /// Depth renderbuffer
    pub const fn depth_buffer(&self) -> Option<&Renderbuffer> {
        self.depth_buffer.as_ref()
    }

    /// Stencil renderbuffer
    pub const fn stencil_buffer(&self) -> Option<&Renderbuffer> {
        self.stencil_buffer.as_ref()
    }

    /// Packed depth/stencil renderbuffer
    pub const fn packed_depth_stencil_buffer(&self) -> Option<&Renderbuffer> {
        self.packed_depth_stencil_buffer.as_ref()
    }

    fn renderbuffers(&self) -> impl Iterator<Item = &Renderbuffer> {
        self.color_buffers
            .iter()
            .chain([&self.depth_buffer, &self.stencil_buffer, &self.packed_depth_stencil_buffer])
            .flatten()
    }

    fn slot_mut(&mut self, slot: BufferSlot) -> &mut Option<Renderbuffer> {
        match slot {
            BufferSlot::Color(index) => &mut self.color_buffers[index],
            BufferSlot::Depth => &mut self.depth_buffer,
            BufferSlot::Stencil => &mut self.stencil_buffer,
            BufferSlot::PackedDepthStencil => &mut self.packed_depth_stencil_buffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferSlot {
    Color(usize),
    Depth,
    Stencil,
    PackedDepthStencil,
}

impl BufferSlot {
    const fn class(self) -> FormatClass {
        match self {
            Self::Color(_) => FormatClass::Color,
            Self::Depth => FormatClass::Depth,
            Self::Stencil => FormatClass::Stencil,
            Self::PackedDepthStencil => FormatClass::DepthStencil,
        }
    }

    fn point(self) -> AttachmentPoint {
        match self {
            Self::Color(index) => AttachmentPoint::Color(u8::try_from(index).unwrap_or(u8::MAX)),
            Self::Depth => AttachmentPoint::Depth,
            Self::Stencil => AttachmentPoint::Stencil,
            Self::PackedDepthStencil => AttachmentPoint::DepthStencil,
        }
    }
}

/// The FBO table plus the feature-set targets built in it
#[derive(Debug)]
pub struct FboRegistry {
    fbos: Vec<Fbo>,
    current: Option<FboId>,
    max_renderbuffer_size: u32,
    max_color_attachments: usize,
    targets: RenderTargets,
    images: RenderTargetImages,
}

impl FboRegistry {
    /// Create an empty registry bounded by the device limits
    pub fn new(max_renderbuffer_size: u32, max_color_attachments: usize) -> Self {
        Self {
            fbos: Vec::with_capacity(MAX_FBOS),
            current: None,
            max_renderbuffer_size,
            max_color_attachments: max_color_attachments.min(MAX_COLOR_BUFFERS),
            targets: RenderTargets::default(),
            images: RenderTargetImages::default(),
        }
    }

    /// Number of live FBOs
    pub fn len(&self) -> usize {
        self.fbos.len()
    }

    /// Whether no FBOs exist
    pub fn is_empty(&self) -> bool {
        self.fbos.is_empty()
    }

    /// FBOs built for the feature set
    pub const fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    /// Textures backing the feature set FBOs
    pub const fn images(&self) -> &RenderTargetImages {
        &self.images
    }

    /// Currently bound FBO, `None` for the default framebuffer
    pub const fn current(&self) -> Option<FboId> {
        self.current
    }

    /// Look up an FBO
    pub fn fbo(&self, id: FboId) -> RenderResult<&Fbo> {
        self.fbos.get(id.0).ok_or(RenderError::UnknownFbo(id.0))
    }

    /// Native framebuffer of an FBO
    pub fn fbo_handle(&self, id: FboId) -> Option<NativeHandle> {
        self.fbos.get(id.0).map(Fbo::framebuffer)
    }

    /// Find an FBO by name
    pub fn find(&self, name: &str) -> Option<FboId> {
        self.fbos.iter().position(|fbo| fbo.name == name).map(FboId)
    }

    fn check_dimensions(&self, name: &str, width: u32, height: u32) -> RenderResult<()> {
        let max = self.max_renderbuffer_size;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::FboBadDimensions {
                name: name.to_string(),
                width,
                height,
            });
        }
        Ok(())
    }

    /// Create an FBO with no attachments
    pub fn create_fbo(
        &mut self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        width: u32,
        height: u32,
    ) -> RenderResult<FboId> {
        if name.len() >= MAX_QPATH {
            return Err(RenderError::FboNameTooLong(name.to_string()));
        }
        self.check_dimensions(name, width, height)?;
        if self.fbos.len() == MAX_FBOS {
            return Err(RenderError::FboLimitReached(MAX_FBOS));
        }

        let framebuffer = device.create_framebuffer();
        let id = FboId(self.fbos.len());
        self.fbos.push(Fbo {
            name: name.to_string(),
            framebuffer,
            color_buffers: [None; MAX_COLOR_BUFFERS],
            depth_buffer: None,
            stencil_buffer: None,
            packed_depth_stencil_buffer: None,
            width,
            height,
        });
        log::debug!("Created FBO '{name}' {width}x{height}");
        Ok(id)
    }

    /// Change the size used by subsequent attachment storage
    pub fn resize_fbo(&mut self, id: FboId, width: u32, height: u32) -> RenderResult<()> {
        let name = self.fbo(id)?.name.clone();
        self.check_dimensions(&name, width, height)?;
        let fbo = &mut self.fbos[id.0];
        fbo.width = width;
        fbo.height = height;
        Ok(())
    }

    fn create_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        slot: BufferSlot,
        format: ImageFormat,
        samples: u32,
    ) -> RenderResult<()> {
        let max_color = self.max_color_attachments;
        let fbo = self.fbos.get_mut(id.0).ok_or(RenderError::UnknownFbo(id.0))?;
        if format.class() != slot.class() {
            return Err(RenderError::InvalidAttachmentFormat {
                fbo: fbo.name.clone(),
                format,
                expected: slot.class(),
            });
        }
        if let BufferSlot::Color(index) = slot {
            if index >= max_color {
                return Err(RenderError::AttachmentIndexOutOfRange {
                    fbo: fbo.name.clone(),
                    index,
                    max: max_color,
                });
            }
        }

        let (framebuffer, width, height) = (fbo.framebuffer, fbo.width, fbo.height);
        let entry = fbo.slot_mut(slot);
        let absent = entry.is_none();
        let handle = match entry {
            Some(existing) => existing.handle,
            None => device.create_renderbuffer(),
        };
        *entry = Some(Renderbuffer { handle, format, samples });

        device.renderbuffer_storage(handle, format, samples, width, height);
        if absent {
            device.attach_renderbuffer(framebuffer, slot.point(), handle);
        }
        Ok(())
    }

    /// Create or resize the color renderbuffer at `index`
    pub fn create_color_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        format: ImageFormat,
        index: usize,
        samples: u32,
    ) -> RenderResult<()> {
        self.create_buffer(device, id, BufferSlot::Color(index), format, samples)
    }

    /// Create or resize the depth renderbuffer
    pub fn create_depth_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        format: ImageFormat,
        samples: u32,
    ) -> RenderResult<()> {
        self.create_buffer(device, id, BufferSlot::Depth, format, samples)
    }

    /// Create or resize the stencil renderbuffer
    pub fn create_stencil_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        format: ImageFormat,
        samples: u32,
    ) -> RenderResult<()> {
        self.create_buffer(device, id, BufferSlot::Stencil, format, samples)
    }

    /// Create or resize the packed depth/stencil renderbuffer
    pub fn create_packed_depth_stencil_buffer(
        &mut self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        format: ImageFormat,
        samples: u32,
    ) -> RenderResult<()> {
        self.create_buffer(device, id, BufferSlot::PackedDepthStencil, format, samples)
    }

    fn color_point(&self, id: FboId, index: usize) -> RenderResult<(NativeHandle, AttachmentPoint)> {
        let fbo = self.fbo(id)?;
        if index >= self.max_color_attachments {
            return Err(RenderError::AttachmentIndexOutOfRange {
                fbo: fbo.name.clone(),
                index,
                max: self.max_color_attachments,
            });
        }
        Ok((fbo.framebuffer, BufferSlot::Color(index).point()))
    }

    /// Attach a 2D or cube map face texture as color attachment `index`
    pub fn attach_texture_2d(
        &self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        target: TextureTarget,
        texture: NativeHandle,
        index: usize,
    ) -> RenderResult<()> {
        if target == TextureTarget::Texture3D {
            log::warn!("attach_texture_2d: invalid target {target:?}");
            return Ok(());
        }
        let (framebuffer, point) = self.color_point(id, index)?;
        device.attach_texture(framebuffer, point, target, texture, 0);
        Ok(())
    }

    /// Attach one layer of a 3D texture as color attachment `index`
    pub fn attach_texture_3d(
        &self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        texture: NativeHandle,
        index: usize,
        layer: u32,
    ) -> RenderResult<()> {
        let (framebuffer, point) = self.color_point(id, index)?;
        device.attach_texture(framebuffer, point, TextureTarget::Texture3D, texture, layer);
        Ok(())
    }

    /// Attach a packed depth/stencil texture
    pub fn attach_packed_depth_stencil_texture(
        &self,
        device: &mut dyn GraphicsDevice,
        id: FboId,
        texture: NativeHandle,
    ) -> RenderResult<()> {
        let framebuffer = self.fbo(id)?.framebuffer;
        device.attach_texture(framebuffer, AttachmentPoint::DepthStencil, TextureTarget::Texture2D, texture, 0);
        Ok(())
    }

    /// Bind an FBO for drawing; no-op if it is already bound
    pub fn bind_fbo(&mut self, device: &mut dyn GraphicsDevice, id: FboId) -> RenderResult<()> {
        let framebuffer = self.fbo(id)?.framebuffer;
        if self.current != Some(id) {
            device.bind_framebuffer(Some(framebuffer));
            self.current = Some(id);
        }
        Ok(())
    }

    /// Bind the default framebuffer; no-op if it is already bound
    pub fn bind_null_fbo(&mut self, device: &mut dyn GraphicsDevice) {
        if self.current.is_some() {
            device.bind_framebuffer(None);
            self.current = None;
        }
    }

    /// Check completeness, logging the reason on failure.
    ///
    /// The previous binding is restored either way.
    pub fn check_fbo(&self, device: &mut dyn GraphicsDevice, id: FboId) -> RenderResult<bool> {
        let fbo = self.fbo(id)?;
        let previous = self.current.and_then(|current| self.fbo_handle(current));

        device.bind_framebuffer(Some(fbo.framebuffer));
        let status = device.framebuffer_status(fbo.framebuffer);
        device.bind_framebuffer(previous);

        let name = &fbo.name;
        match status {
            FramebufferStatus::Complete => return Ok(true),
            FramebufferStatus::Unsupported => log::warn!("check_fbo: ({name}) Unsupported framebuffer format"),
            FramebufferStatus::IncompleteAttachment => {
                log::warn!("check_fbo: ({name}) Framebuffer incomplete attachment");
            }
            FramebufferStatus::MissingAttachment => {
                log::warn!("check_fbo: ({name}) Framebuffer incomplete, missing attachment");
            }
            FramebufferStatus::IncompleteDrawBuffer => {
                log::warn!("check_fbo: ({name}) Framebuffer incomplete, missing draw buffer");
            }
            FramebufferStatus::IncompleteReadBuffer => {
                log::warn!("check_fbo: ({name}) Framebuffer incomplete, missing read buffer");
            }
            FramebufferStatus::IncompleteDimensions => {
                log::warn!("check_fbo: ({name}) Framebuffer incomplete, attached images must have same dimensions");
            }
            FramebufferStatus::IncompleteFormats => {
                log::warn!("check_fbo: ({name}) Framebuffer incomplete, attached images must have same format");
            }
            FramebufferStatus::Unknown(code) => log::warn!("check_fbo: ({name}) unknown error 0x{code:X}"),
        }
        Ok(false)
    }

    /// Table listing, also written to the log
    pub fn list_fbos(&self) -> Vec<String> {
        let mut lines = vec![
            "             size       name".to_string(),
            "----------------------------------------------------------".to_string(),
        ];
        for (i, fbo) in self.fbos.iter().enumerate() {
            lines.push(format!("  {i:4}: {:4} {:4} {}", fbo.width, fbo.height, fbo.name));
        }
        lines.push(format!(" {} FBOs", self.fbos.len()));
        for line in &lines {
            log::info!("{line}");
        }
        lines
    }

    /// Build every target the feature set needs.
    ///
    /// Any previous targets are shut down first. The render thread must be
    /// idle.
    pub fn init_fbos(
        &mut self,
        device: &mut dyn GraphicsDevice,
        textures: &mut TextureManager,
        config: &RendererConfig,
        window: &WindowConfig,
    ) -> RenderResult<()> {
        log::debug!("------- init_fbos -------");
        if !self.fbos.is_empty() {
            log::warn!("init_fbos: {} FBOs still alive, shutting them down", self.fbos.len());
            self.shutdown_fbos(device, textures);
        }

        let float_targets = device.capabilities().has_extension(EXT_TEXTURE_FLOAT);
        let layout = TargetLayout::resolve(config, window, float_targets);
        let (width, height) = (layout.width, layout.height);

        let depth = create_image(
            device,
            textures,
            TextureDesc::new_2d("_currentDepth", ImageFormat::Depth24Stencil8, width, height),
        )?;
        self.images.depth_render = Some(depth);
        let depth_native = native(textures, depth)?;

        for i in 0..2 {
            let color = create_image(
                device,
                textures,
                TextureDesc::new_2d(format!("_currentRender[{i}]"), layout.color_format, width, height),
            )?;
            self.images.current_render[i] = Some(color);
            let fbo = self.create_fbo(device, &format!("_main[{i}]"), width, height)?;
            self.bind_fbo(device, fbo)?;
            self.attach_texture_2d(device, fbo, TextureTarget::Texture2D, native(textures, color)?, 0)?;
            self.attach_packed_depth_stencil_texture(device, fbo, depth_native)?;
            self.check_fbo(device, fbo)?;
            self.targets.main[i] = Some(fbo);
        }

        if layout.realtime_lighting {
            let (w1, h1) = (tiles(width, TILE_SIZE_STEP1), tiles(height, TILE_SIZE_STEP1));
            let (w2, h2) = (tiles(width, TILE_SIZE), tiles(height, TILE_SIZE));

            let image = create_image(device, textures, TextureDesc::new_2d("_depthtile1", ImageFormat::Rgba32F, w1, h1))?;
            self.images.depth_tile1 = Some(image);
            self.targets.depth_tile1 = Some(self.color_target(device, textures, "_depthtile1", image)?);

            let image = create_image(device, textures, TextureDesc::new_2d("_depthtile2", ImageFormat::Rgba32F, w2, h2))?;
            self.images.depth_tile2 = Some(image);
            self.targets.depth_tile2 = Some(self.color_target(device, textures, "_depthtile2", image)?);

            let image = create_image(
                device,
                textures,
                TextureDesc::new_3d("_lighttile", ImageFormat::Rgba32F, w2, h2, LIGHT_TILE_LAYERS),
            )?;
            self.images.light_tile = Some(image);
            let fbo = self.create_fbo(device, "_lighttile", w2, h2)?;
            self.bind_fbo(device, fbo)?;
            self.attach_texture_3d(device, fbo, native(textures, image)?, 0, 0)?;
            self.check_fbo(device, fbo)?;
            self.targets.light_tile = Some(fbo);
        }

        if layout.liquid_mapping {
            let image = create_image(
                device,
                textures,
                TextureDesc::new_2d("_portalRender", layout.color_format, width, height),
            )?;
            self.images.portal_render = Some(image);
            self.targets.portal = Some(self.color_target(device, textures, "_portalRender", image)?);
        }

        if layout.bloom {
            let (w, h) = ((width / BLOOM_DOWNSCALE).max(1), (height / BLOOM_DOWNSCALE).max(1));
            let image = create_image(device, textures, TextureDesc::new_2d("_contrastRender", layout.color_format, w, h))?;
            self.images.contrast_render = Some(image);
            self.targets.contrast = Some(self.color_target(device, textures, "_contrastRender", image)?);

            for i in 0..2 {
                let name = format!("_bloomRender{i}");
                let image = create_image(device, textures, TextureDesc::new_2d(name.as_str(), layout.color_format, w, h))?;
                self.images.bloom_render[i] = Some(image);
                self.targets.bloom[i] = Some(self.color_target(device, textures, &name, image)?);
            }
        }

        if layout.msaa_samples > 0 {
            let samples = layout.msaa_samples;
            let fbo = self.create_fbo(device, "_msaa", width, height)?;
            self.bind_fbo(device, fbo)?;
            self.create_color_buffer(device, fbo, layout.color_format, 0, samples)?;
            self.create_packed_depth_stencil_buffer(device, fbo, ImageFormat::Depth24Stencil8, samples)?;
            self.check_fbo(device, fbo)?;
            self.targets.msaa = Some(fbo);
        }

        for i in 0..layout.shadow_maps {
            let size = layout.shadow_map_size;
            let name = format!("_shadowMap{i}");
            let image = create_image(device, textures, TextureDesc::new_2d(name.as_str(), ImageFormat::Rgba16F, size, size))?;
            self.images.shadow_maps.push(image);
            let fbo = self.create_fbo(device, &name, size, size)?;
            self.bind_fbo(device, fbo)?;
            self.attach_texture_2d(device, fbo, TextureTarget::Texture2D, native(textures, image)?, 0)?;
            self.create_depth_buffer(device, fbo, ImageFormat::Depth24, 0)?;
            self.check_fbo(device, fbo)?;
            self.targets.shadow_maps.push(fbo);
        }

        self.bind_null_fbo(device);
        log::info!("Created {} FBOs at {width}x{height}", self.fbos.len());
        Ok(())
    }

    fn color_target(
        &mut self,
        device: &mut dyn GraphicsDevice,
        textures: &TextureManager,
        name: &str,
        image: TextureKey,
    ) -> RenderResult<FboId> {
        let texture = textures.texture(image).ok_or(RenderError::UnknownTexture)?;
        let (width, height) = texture.dimensions();
        let fbo = self.create_fbo(device, name, width, height)?;
        self.bind_fbo(device, fbo)?;
        self.attach_texture_2d(device, fbo, TextureTarget::Texture2D, texture.native(), 0)?;
        self.check_fbo(device, fbo)?;
        Ok(fbo)
    }

    /// Delete every FBO, its renderbuffers and the target images
    pub fn shutdown_fbos(&mut self, device: &mut dyn GraphicsDevice, textures: &mut TextureManager) {
        log::debug!("------- shutdown_fbos -------");
        self.bind_null_fbo(device);
        for fbo in self.fbos.drain(..) {
            for renderbuffer in fbo.renderbuffers() {
                device.delete_renderbuffer(renderbuffer.handle);
            }
            if fbo.framebuffer != 0 {
                device.delete_framebuffer(fbo.framebuffer);
            }
        }
        self.targets = RenderTargets::default();
        self.images.release(device, textures);
    }
}

fn native(textures: &TextureManager, key: TextureKey) -> RenderResult<NativeHandle> {
    textures
        .texture(key)
        .map(|texture| texture.native())
        .ok_or(RenderError::UnknownTexture)
}
