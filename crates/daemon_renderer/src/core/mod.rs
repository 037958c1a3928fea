//! # Core Module
//!
//! Shared configuration used by every renderer subsystem.

pub mod config;

pub use config::{
    ApplicationConfig, Config, ConfigError, EngineConfig, RenderSpeeds, RendererConfig, WindowConfig,
};
