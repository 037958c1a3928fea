//! # Renderer Configuration
//!
//! Every tunable the render pipeline reads lives here. Values are read at
//! well defined points: frame start (texture mode, draw buffer, speeds),
//! video restart (window size, FBO feature toggles) and renderer creation
//! (SMP thread, command buffer capacity).
//!
//! ## Configuration Categories
//!
//! - **Renderer Config**: SMP dispatch, buffer limits, FBO features, debug output
//! - **Window Config**: Drawable size that FBOs follow
//! - **Engine Config**: Logging
//! - **Application Config**: Everything above, loadable from TOML or RON

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Default command buffer capacity in bytes
pub const DEFAULT_MAX_RENDER_COMMANDS: usize = 0x40000 * 8;

/// Default 2D polygon vertex arena size
pub const DEFAULT_MAX_POLY_VERTS: usize = 8192;

/// Which statistics `end_frame` logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderSpeeds {
    /// No statistics
    #[default]
    Off,
    /// Back end views, batches and vertex counts
    General,
    /// Entity cache transform and skeleton counts
    Entities,
    /// Front end / back end overlap
    Smp,
}

/// # Renderer Configuration
///
/// The console variables of the render pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Run the back end on a dedicated render thread
    pub smp: bool,
    /// Log `R` when the front end waited on the render thread and `.` otherwise
    pub show_smp: bool,
    /// Record commands but never execute them
    pub skip_backend: bool,
    /// Per-frame statistics output
    pub speeds: RenderSpeeds,
    /// Command buffer capacity in bytes, per SMP frame
    pub max_render_commands: usize,
    /// 2D polygon vertex arena size, per SMP frame
    pub max_poly_verts: usize,
    /// 2D polygon index arena size, per SMP frame
    pub max_poly_indexes: usize,
    /// Texture downscale steps applied at texture creation
    pub pic_mip: u8,
    /// Texture filter mode name, e.g. `GL_LINEAR_MIPMAP_NEAREST`
    pub texture_mode: String,
    /// Draw buffer name, `GL_BACK` or `GL_FRONT`
    pub draw_buffer: String,
    /// Poll GPU errors after every command list
    pub check_gl_errors: bool,
    /// Repeats of one GPU error logged before suppression kicks in
    pub gl_error_repeat_limit: u32,
    /// Use bindless textures when the device offers them
    pub bindless_textures: bool,
    /// Allow color grading commands
    pub color_grading: bool,
    /// Bloom render targets
    pub bloom: bool,
    /// Multisample count for the MSAA target; 0 disables it
    pub msaa_samples: u32,
    /// Tiled realtime lighting render targets
    pub realtime_lighting: bool,
    /// Portal render target for liquid surfaces
    pub liquid_mapping: bool,
    /// Number of shadow map render targets
    pub shadow_maps: u32,
    /// Edge length of each shadow map
    pub shadow_map_size: u32,
}

impl RendererConfig {
    /// Create a renderer configuration with defaults
    pub fn new() -> Self {
        Self {
            smp: false,
            show_smp: false,
            skip_backend: false,
            speeds: RenderSpeeds::Off,
            max_render_commands: DEFAULT_MAX_RENDER_COMMANDS,
            max_poly_verts: DEFAULT_MAX_POLY_VERTS,
            max_poly_indexes: DEFAULT_MAX_POLY_VERTS * 6 / 4,
            pic_mip: 0,
            texture_mode: "GL_LINEAR_MIPMAP_NEAREST".to_string(),
            draw_buffer: "GL_BACK".to_string(),
            check_gl_errors: true,
            gl_error_repeat_limit: 4,
            bindless_textures: true,
            color_grading: true,
            bloom: true,
            msaa_samples: 0,
            realtime_lighting: true,
            liquid_mapping: false,
            shadow_maps: 0,
            shadow_map_size: 512,
        }
    }

    /// Enable or disable the render thread
    pub fn with_smp(mut self, enabled: bool) -> Self {
        self.smp = enabled;
        self
    }

    /// Set the command buffer capacity
    pub fn with_max_render_commands(mut self, bytes: usize) -> Self {
        self.max_render_commands = bytes;
        self
    }

    /// Set the polygon arena limits
    pub fn with_poly_limits(mut self, verts: usize, indexes: usize) -> Self {
        self.max_poly_verts = verts;
        self.max_poly_indexes = indexes;
        self
    }

    /// Toggle the optional FBO features
    pub fn with_fbo_features(mut self, bloom: bool, realtime_lighting: bool, liquid_mapping: bool) -> Self {
        self.bloom = bloom;
        self.realtime_lighting = realtime_lighting;
        self.liquid_mapping = liquid_mapping;
        self
    }

    /// Set the multisample count
    pub fn with_msaa(mut self, samples: u32) -> Self {
        self.msaa_samples = samples;
        self
    }

    /// Set the shadow map count and size
    pub fn with_shadow_maps(mut self, count: u32, size: u32) -> Self {
        self.shadow_maps = count;
        self.shadow_map_size = size;
        self
    }

    /// Set the statistics mode
    pub fn with_speeds(mut self, speeds: RenderSpeeds) -> Self {
        self.speeds = speeds;
        self
    }

    /// Skip execution of recorded commands
    pub fn with_skip_backend(mut self, skip: bool) -> Self {
        self.skip_backend = skip;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_render_commands < 1024 {
            return Err(ConfigError::Invalid(format!(
                "max_render_commands must be at least 1024 bytes, got {}",
                self.max_render_commands
            )));
        }
        if self.max_poly_verts == 0 || self.max_poly_indexes == 0 {
            return Err(ConfigError::Invalid("polygon arenas cannot be empty".to_string()));
        }
        if self.pic_mip > 4 {
            return Err(ConfigError::Invalid(format!("pic_mip {} is out of range 0..=4", self.pic_mip)));
        }
        if self.msaa_samples == 1 || self.msaa_samples > 16 {
            return Err(ConfigError::Invalid(format!(
                "msaa_samples must be 0 or 2..=16, got {}",
                self.msaa_samples
            )));
        }
        if self.shadow_maps > 0 && self.shadow_map_size == 0 {
            return Err(ConfigError::Invalid("shadow_map_size cannot be zero".to_string()));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Window Configuration
///
/// Size of the drawable surface. Every window-sized FBO follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Drawable width in pixels
    pub width: u32,
    /// Drawable height in pixels
    pub height: u32,
    /// Fullscreen mode
    pub fullscreen: bool,
}

impl WindowConfig {
    /// Create a windowed configuration
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fullscreen: false,
        }
    }

    /// Set fullscreen mode
    pub const fn with_fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size {}x{} is empty",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// # Engine Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log filter, e.g. `info` or `daemon_renderer=debug`
    pub log_level: String,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration that applications load from disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Window configuration
    pub window: WindowConfig,
    /// Rendering configuration
    pub renderer: RendererConfig,
}

impl ApplicationConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window.validate()?;
        self.renderer.validate()
    }
}

impl Config for ApplicationConfig {}
