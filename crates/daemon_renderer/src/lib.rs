//! # Daemon Renderer
//!
//! The front end, SMP dispatch and GPU resource lifecycle of an id Tech 3
//! derived renderer.
//!
//! ## Features
//!
//! - **Command Buffers**: Fixed capacity per-frame command lists, overflow drops quietly
//! - **SMP Dispatch**: Double buffered frames handed to a dedicated render thread
//! - **Entity Cache**: Attachment chains, skeletons and tag transforms computed once per frame
//! - **Texture Residency**: Bindless handles with priority based eviction
//! - **FBO Registry**: Render targets rebuilt on video restart
//! - **Headless Device**: The whole pipeline runs without a GPU for tests and tools
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon_renderer::prelude::*;
//!
//! fn main() -> Result<(), RenderError> {
//!     let device = HeadlessDevice::default();
//!     let mut renderer = Renderer::new(Box::new(device), RendererConfig::new(), WindowConfig::new(1280, 720))?;
//!
//!     renderer.begin_frame()?;
//!     renderer.render_scene(&ViewDef::default())?;
//!     renderer.stretch_pic(PicRect::new(0.0, 0.0, 64.0, 64.0, 0.0, 0.0, 1.0, 1.0), ShaderHandle::DEFAULT)?;
//!     let times = renderer.end_frame()?;
//!     println!("front end {} ms", times.front_end_msec);
//!
//!     renderer.shutdown()
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;
pub mod scene;

#[cfg(test)]
mod tests;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        core::config::{ApplicationConfig, Config, EngineConfig, RenderSpeeds, RendererConfig, WindowConfig},
        foundation::math::{Axis, Bounds, BoneTransform, Orientation, Vec3},
        render::{
            commands::{GradientType, PicRect, ShaderHandle, SurfaceHandle, ViewDef},
            device::{DeviceCapabilities, GraphicsDevice, HeadlessDevice, Rect, TextureDesc, VideoCapture},
            resources::{TextureKey, TexturePriority},
            FrameTimes, PolyVert, RenderError, RenderResult, Renderer,
        },
        scene::{
            EntityTag, EntityUpdate, LerpTagUpdate, Model, ModelCache, ModelHandle, RefEntity, RefEntityType,
        },
    };
}
