//! GPU device seam
//!
//! [`GraphicsDevice`] is the narrow interface between the render pipeline
//! and the graphics API. The pipeline never talks to a driver directly; the
//! window/context layer supplies an implementation and the crate ships an
//! in-memory [`HeadlessDevice`] for tests and offline runs.
//!
//! Handles follow the GL convention: `0` means "no object".

mod headless;

pub use headless::{DeviceOp, HeadlessDevice, HeadlessProbe};

use bitflags::bitflags;

use crate::foundation::math::BoneTransform;
use crate::render::commands::{ShaderHandle, SurfaceHandle, ViewDef};
use crate::render::frame::{PolyVert, SubmittedEntity};
use crate::render::RenderResult;

/// Native object name (texture, framebuffer, renderbuffer)
pub type NativeHandle = u32;

/// Bindless texture handle; `0` is never a valid handle
pub type BindlessHandle = u64;

/// Framebuffer objects, required
pub const EXT_FRAMEBUFFER_OBJECT: &str = "GL_ARB_framebuffer_object";
/// Bindless textures, optional
pub const EXT_BINDLESS_TEXTURE: &str = "GL_ARB_bindless_texture";
/// Floating point render targets, optional; needed by bloom and tiled lighting
pub const EXT_TEXTURE_FLOAT: &str = "GL_ARB_texture_float";

bitflags! {
    /// How an extension is treated at startup
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtFlags: u32 {
        /// Startup fails without it
        const REQUIRED = 1 << 0;
        /// Used when present
        const OPTIONAL = 1 << 1;
        /// Part of the core profile on this device
        const CORE = 1 << 2;
    }
}

/// One extension reported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Extension name
    pub name: String,
    /// Whether the device offers it
    pub available: bool,
    /// Startup handling
    pub flags: ExtFlags,
}

impl Extension {
    /// Create an extension entry
    pub fn new(name: impl Into<String>, available: bool, flags: ExtFlags) -> Self {
        Self {
            name: name.into(),
            available,
            flags,
        }
    }
}

/// Device limits and extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Largest renderbuffer edge
    pub max_renderbuffer_size: u32,
    /// Color attachments per framebuffer
    pub max_color_attachments: usize,
    /// Texture image units
    pub max_texture_units: usize,
    /// Reported extensions
    pub extensions: Vec<Extension>,
}

impl DeviceCapabilities {
    /// Whether `name` is reported and available
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext.available && ext.name == name)
    }

    /// Required extensions the device does not offer
    pub fn missing_required(&self) -> impl Iterator<Item = &Extension> {
        self.extensions
            .iter()
            .filter(|ext| ext.flags.contains(ExtFlags::REQUIRED) && !ext.available)
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_renderbuffer_size: 16384,
            max_color_attachments: 8,
            max_texture_units: 16,
            extensions: vec![
                Extension::new(EXT_FRAMEBUFFER_OBJECT, true, ExtFlags::REQUIRED | ExtFlags::CORE),
                Extension::new(EXT_BINDLESS_TEXTURE, true, ExtFlags::OPTIONAL),
                Extension::new(EXT_TEXTURE_FLOAT, true, ExtFlags::OPTIONAL | ExtFlags::CORE),
            ],
        }
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureTarget {
    /// 2D texture
    #[default]
    Texture2D,
    /// 3D texture
    Texture3D,
    /// Cube map
    CubeMap,
}

/// Which attachment points a format may be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatClass {
    /// Color renderable
    Color,
    /// Depth renderable
    Depth,
    /// Stencil renderable
    Stencil,
    /// Combined depth and stencil
    DepthStencil,
}

/// Internal formats used for render targets and textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// 8 bit RGBA
    #[default]
    Rgba8,
    /// Half float RGBA
    Rgba16F,
    /// Float RGBA
    Rgba32F,
    /// Packed float RGB
    R11G11B10F,
    /// 16 bit depth
    Depth16,
    /// 24 bit depth
    Depth24,
    /// Float depth
    Depth32F,
    /// 8 bit stencil
    Stencil8,
    /// Packed 24 bit depth and 8 bit stencil
    Depth24Stencil8,
}

impl ImageFormat {
    /// Renderability class
    pub const fn class(self) -> FormatClass {
        match self {
            Self::Rgba8 | Self::Rgba16F | Self::Rgba32F | Self::R11G11B10F => FormatClass::Color,
            Self::Depth16 | Self::Depth24 | Self::Depth32F => FormatClass::Depth,
            Self::Stencil8 => FormatClass::Stencil,
            Self::Depth24Stencil8 => FormatClass::DepthStencil,
        }
    }

    /// Whether the format needs floating point render target support
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Rgba16F | Self::Rgba32F | Self::R11G11B10F)
    }
}

/// Texture creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Debug name
    pub name: String,
    /// Dimensionality
    pub target: TextureTarget,
    /// Internal format
    pub format: ImageFormat,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Depth in texels, 1 for 2D
    pub depth: u32,
    /// Skip `pic_mip` downscaling (render targets, UI art)
    pub no_pic_mip: bool,
    /// Build a mip chain
    pub mipmaps: bool,
}

impl TextureDesc {
    /// 2D texture description
    pub fn new_2d(name: impl Into<String>, format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            target: TextureTarget::Texture2D,
            format,
            width,
            height,
            depth: 1,
            no_pic_mip: false,
            mipmaps: false,
        }
    }

    /// 3D texture description
    pub fn new_3d(name: impl Into<String>, format: ImageFormat, width: u32, height: u32, depth: u32) -> Self {
        Self {
            target: TextureTarget::Texture3D,
            depth,
            ..Self::new_2d(name, format, width, height)
        }
    }

    /// Render target: exact size, no mips
    pub const fn render_target(mut self) -> Self {
        self.no_pic_mip = true;
        self.mipmaps = false;
        self
    }

    /// Request a mip chain
    pub const fn with_mipmaps(mut self) -> Self {
        self.mipmaps = true;
        self
    }
}

/// Framebuffer attachment point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    /// Color attachment `n`
    Color(u8),
    /// Depth attachment
    Depth,
    /// Stencil attachment
    Stencil,
    /// Combined depth/stencil attachment
    DepthStencil,
}

impl AttachmentPoint {
    /// Format class the point accepts
    pub const fn class(self) -> FormatClass {
        match self {
            Self::Color(_) => FormatClass::Color,
            Self::Depth => FormatClass::Depth,
            Self::Stencil => FormatClass::Stencil,
            Self::DepthStencil => FormatClass::DepthStencil,
        }
    }
}

/// Framebuffer completeness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    /// Ready to render
    Complete,
    /// Format combination not supported
    Unsupported,
    /// An attachment is not renderable
    IncompleteAttachment,
    /// No attachments
    MissingAttachment,
    /// Draw buffer has no attachment
    IncompleteDrawBuffer,
    /// Read buffer has no attachment
    IncompleteReadBuffer,
    /// Attachment sizes differ
    IncompleteDimensions,
    /// Attachment formats are incompatible
    IncompleteFormats,
    /// Driver specific status code
    Unknown(u32),
}

/// Texture filtering selected by the texture mode setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureMode {
    /// `GL_NEAREST`
    Nearest,
    /// `GL_LINEAR`
    Linear,
    /// `GL_NEAREST_MIPMAP_NEAREST`
    NearestMipmapNearest,
    /// `GL_LINEAR_MIPMAP_NEAREST`
    #[default]
    LinearMipmapNearest,
    /// `GL_NEAREST_MIPMAP_LINEAR`
    NearestMipmapLinear,
    /// `GL_LINEAR_MIPMAP_LINEAR`
    LinearMipmapLinear,
}

impl TextureMode {
    /// Parse a mode name, case insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        const MODES: [(&str, TextureMode); 6] = [
            ("GL_NEAREST", TextureMode::Nearest),
            ("GL_LINEAR", TextureMode::Linear),
            ("GL_NEAREST_MIPMAP_NEAREST", TextureMode::NearestMipmapNearest),
            ("GL_LINEAR_MIPMAP_NEAREST", TextureMode::LinearMipmapNearest),
            ("GL_NEAREST_MIPMAP_LINEAR", TextureMode::NearestMipmapLinear),
            ("GL_LINEAR_MIPMAP_LINEAR", TextureMode::LinearMipmapLinear),
        ];
        MODES
            .iter()
            .find(|(mode_name, _)| mode_name.eq_ignore_ascii_case(name))
            .map(|(_, mode)| *mode)
    }
}

/// Buffer the 2D and 3D passes render into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawBufferTarget {
    /// Back buffer
    #[default]
    Back,
    /// Front buffer
    Front,
}

impl DrawBufferTarget {
    /// Parse `GL_BACK` or `GL_FRONT`, case insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("GL_BACK") {
            Some(Self::Back)
        } else if name.eq_ignore_ascii_case("GL_FRONT") {
            Some(Self::Front)
        } else {
            None
        }
    }
}

/// Integer rectangle in window pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Bottom edge
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Rect {
    /// Create a rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// Frame capture request for video recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoCapture {
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Compress as motion JPEG instead of raw RGB
    pub motion_jpeg: bool,
    /// Caller supplied capture slot
    pub slot: u32,
}

/// Portal stencil phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalPhase {
    /// Mark the portal area before the portal view
    Prepare,
    /// Restore after the portal view
    Finalise,
}

/// A 3D view draw
#[derive(Debug, Clone, Copy)]
pub struct ViewDraw<'a> {
    /// View parameters
    pub view: &'a ViewDef,
    /// Depth only pre-pass
    pub depth_pass: bool,
    /// Entities to draw
    pub entities: &'a [SubmittedEntity],
    /// Bone arena the entities' spans index into
    pub bones: &'a [BoneTransform],
    /// Bound framebuffer, `None` for the default framebuffer
    pub target: Option<NativeHandle>,
}

/// A textured 2D quad
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDraw {
    /// Material
    pub shader: ShaderHandle,
    /// Corners in fan order
    pub verts: [PolyVert; 4],
}

/// A 2D polygon batch
#[derive(Debug, Clone, Copy)]
pub struct PolyDraw<'a> {
    /// Material
    pub shader: ShaderHandle,
    /// Vertices
    pub verts: &'a [PolyVert],
    /// Triangle indexes; a fan when absent
    pub indexes: Option<&'a [u32]>,
}

/// One post processing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostProcessPass {
    /// Framebuffer read from
    pub source: Option<NativeHandle>,
    /// Framebuffer written to
    pub destination: Option<NativeHandle>,
    /// Bloom contrast and blur framebuffers when bloom runs
    pub bloom: Option<[NativeHandle; 3]>,
    /// Bound color grading slots
    pub color_grades: usize,
}

/// The graphics API as seen by the render pipeline.
///
/// Implementations are moved onto the render thread in SMP mode, hence
/// `Send`. Calls are only made by whoever currently owns the context.
pub trait GraphicsDevice: Send {
    /// Limits and extensions
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Bind the context to the calling thread
    fn make_current(&mut self) -> RenderResult<()>;
    /// Unbind the context from the calling thread
    fn release_current(&mut self);
    /// Next pending error code, `glGetError` style
    fn poll_error(&mut self) -> Option<u32>;
    /// Change filtering of mipmapped textures
    fn set_texture_mode(&mut self, mode: TextureMode);

    /// Create a texture; returns 0 on failure
    fn create_texture(&mut self, desc: &TextureDesc) -> NativeHandle;
    /// Delete a texture
    fn delete_texture(&mut self, texture: NativeHandle);

    /// Create a framebuffer object
    fn create_framebuffer(&mut self) -> NativeHandle;
    /// Delete a framebuffer object
    fn delete_framebuffer(&mut self, framebuffer: NativeHandle);
    /// Bind a framebuffer, `None` for the default one
    fn bind_framebuffer(&mut self, framebuffer: Option<NativeHandle>);
    /// Completeness of a framebuffer
    fn framebuffer_status(&mut self, framebuffer: NativeHandle) -> FramebufferStatus;

    /// Create a renderbuffer
    fn create_renderbuffer(&mut self) -> NativeHandle;
    /// Delete a renderbuffer
    fn delete_renderbuffer(&mut self, renderbuffer: NativeHandle);
    /// (Re)allocate renderbuffer storage
    fn renderbuffer_storage(&mut self, renderbuffer: NativeHandle, format: ImageFormat, samples: u32, width: u32, height: u32);
    /// Attach a renderbuffer
    fn attach_renderbuffer(&mut self, framebuffer: NativeHandle, point: AttachmentPoint, renderbuffer: NativeHandle);
    /// Attach a texture level or layer
    fn attach_texture(&mut self, framebuffer: NativeHandle, point: AttachmentPoint, target: TextureTarget, texture: NativeHandle, layer: u32);

    /// Create (or fetch) the bindless handle of a texture; 0 on failure
    fn texture_handle(&mut self, texture: NativeHandle) -> BindlessHandle;
    /// Request residency of a bindless handle
    fn make_handle_resident(&mut self, handle: BindlessHandle);
    /// Revoke residency of a bindless handle
    fn make_handle_non_resident(&mut self, handle: BindlessHandle);
    /// Whether a bindless handle is resident
    fn is_handle_resident(&self, handle: BindlessHandle) -> bool;
    /// Upload a bindless handle to a sampler uniform
    fn set_uniform_handle(&mut self, location: i32, handle: BindlessHandle);
    /// Bind a texture to an image unit
    fn bind_texture_unit(&mut self, unit: u32, target: TextureTarget, texture: NativeHandle);
    /// Point a sampler uniform at an image unit
    fn set_uniform_unit(&mut self, location: i32, unit: u32);

    /// Build the light tiles of a view
    fn setup_lights(&mut self, view: &ViewDef);
    /// Clear the bound render target
    fn clear(&mut self, view: &ViewDef);
    /// Draw the world and entities of a view
    fn draw_view(&mut self, draw: &ViewDraw<'_>);
    /// Portal stencil phase
    fn portal(&mut self, phase: PortalPhase, surface: SurfaceHandle);
    /// Post processing pass
    fn post_process(&mut self, pass: &PostProcessPass);
    /// Select front or back buffer
    fn set_draw_buffer(&mut self, target: DrawBufferTarget);
    /// Set the scissor rectangle
    fn set_scissor(&mut self, rect: Rect);
    /// Draw a 2D quad
    fn draw_quad(&mut self, quad: &QuadDraw);
    /// Draw 2D polygons
    fn draw_polys(&mut self, polys: &PolyDraw<'_>);
    /// Present
    fn swap_buffers(&mut self);
    /// Read back the frame for video capture
    fn capture_frame(&mut self, capture: &VideoCapture);
}
