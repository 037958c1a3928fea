//! # Render Pipeline
//!
//! The front end records typed commands into one of two per-frame buffers,
//! the dispatcher hands the finished buffer to the back end (inline or on a
//! render thread), and the back end replays it against a [`GraphicsDevice`].
//!
//! ## Organization
//!
//! - [`commands`]: command records and the fixed capacity command list
//! - [`frame`]: everything one SMP frame owns (commands, polygon and bone arenas, entities)
//! - [`device`]: the GPU seam and an in-memory headless device
//! - [`context`]: GPU state shared between front end and back end, with context ownership
//! - [`backend`]: command list executor and back-end counters
//! - [`dispatch`]: inline or threaded frame handoff
//! - [`resources`]: texture residency, FBO registry, render target images, shader table
//! - [`renderer`]: the top level [`Renderer`] and its `RE_*` entry points
//!
//! ## Error Classes
//!
//! Failures fall in three classes reported by [`RenderError::severity`]:
//! recoverable problems are logged and the feature degrades; operation
//! fatal problems abort the current map or frame; process fatal problems
//! stop renderer startup.

pub mod backend;
pub mod commands;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod frame;
pub mod renderer;
pub mod resources;

pub use backend::{BackendCounters, BackendExecutor};
pub use commands::{RenderCommand, RenderCommandList, ShaderHandle, SurfaceHandle, ViewDef};
pub use context::{GpuContext, GpuState};
pub use device::{GraphicsDevice, HeadlessDevice, HeadlessProbe};
pub use dispatch::{FrameDispatcher, SmpStats};
pub use frame::{FrameData, PolyVert, SubmittedEntity, SMP_FRAMES};
pub use renderer::{FrameTimes, Renderer};

use crate::config::ConfigError;
use device::{FormatClass, ImageFormat};

/// How bad a [`RenderError`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Logged; the affected feature is disabled or the request ignored
    Recoverable,
    /// Aborts the current map or frame, the renderer itself survives
    FatalForOperation,
    /// The renderer cannot start or continue
    FatalForProcess,
}

/// Errors raised by the render pipeline
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// A single command can never fit in an empty buffer
    #[error("render command of {bytes} bytes exceeds the usable command buffer size of {capacity} bytes")]
    CommandTooLarge {
        /// Size of the rejected command
        bytes: usize,
        /// Capacity minus the reserved tail
        capacity: usize,
    },

    /// FBO name does not fit a path
    #[error("FBO name '{0}' is too long")]
    FboNameTooLong(String),

    /// FBO size is zero or above the renderbuffer limit
    #[error("bad dimensions {width}x{height} for FBO '{name}'")]
    FboBadDimensions {
        /// FBO name
        name: String,
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// FBO table is full
    #[error("FBO table is full ({0} FBOs)")]
    FboLimitReached(usize),

    /// FBO id does not refer to a live FBO
    #[error("unknown FBO id {0}")]
    UnknownFbo(usize),

    /// Attachment format is of the wrong class for the attachment point
    #[error("format {format:?} cannot be used as a {expected:?} attachment of FBO '{fbo}'")]
    InvalidAttachmentFormat {
        /// FBO name
        fbo: String,
        /// Rejected format
        format: ImageFormat,
        /// Class the attachment point needs
        expected: FormatClass,
    },

    /// Color attachment index above the device limit
    #[error("color attachment {index} of FBO '{fbo}' exceeds the device limit of {max}")]
    AttachmentIndexOutOfRange {
        /// FBO name
        fbo: String,
        /// Requested index
        index: usize,
        /// Device limit
        max: usize,
    },

    /// Every evictable texture was tried and the new one is still not resident
    #[error("no texture space available")]
    NoTextureSpace,

    /// The driver refused to create a bindless handle
    #[error("failed to generate a bindless handle for texture '{0}'")]
    BindlessHandleFailed(String),

    /// Texture key does not refer to a live texture
    #[error("unknown texture")]
    UnknownTexture,

    /// Entity refers to a model handle that no longer exists
    #[error("entity {0} uses an unknown model")]
    UnknownModel(usize),

    /// Tag attachments loop back onto an entity still being transformed
    #[error("entity {0} is part of a tag attachment cycle")]
    AttachmentCycle(usize),

    /// Entity id outside the cache
    #[error("entity id {0} is out of range")]
    EntityOutOfRange(usize),

    /// A required extension is missing
    #[error("required extension {0} is missing")]
    MissingExtension(String),

    /// The render thread could not be started
    #[error("render thread failure: {0}")]
    RenderThread(String),

    /// The device rejected a context operation
    #[error("device error: {0}")]
    Device(String),

    /// Configuration problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RenderError {
    /// Classify the error
    pub const fn severity(&self) -> Severity {
        match self {
            Self::InvalidAttachmentFormat { .. }
            | Self::AttachmentIndexOutOfRange { .. }
            | Self::Config(_) => Severity::Recoverable,
            Self::MissingExtension(_) | Self::RenderThread(_) | Self::Device(_) => {
                Severity::FatalForProcess
            }
            _ => Severity::FatalForOperation,
        }
    }
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;
