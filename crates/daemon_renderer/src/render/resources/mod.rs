//! GPU resources shared by the front end and the back end
//!
//! Everything here is owned by [`crate::render::GpuState`] and only touched
//! by whoever holds the context.

pub mod fbo;
pub mod render_targets;
pub mod shader_table;
pub mod texture_manager;

pub use fbo::{Fbo, FboId, FboRegistry, Renderbuffer, MAX_FBOS};
pub use render_targets::{RenderTargetImages, RenderTargets, TargetLayout};
pub use shader_table::{Shader, ShaderStage, ShaderTable};
pub use texture_manager::{Texture, TextureKey, TextureManager, TexturePriority};
