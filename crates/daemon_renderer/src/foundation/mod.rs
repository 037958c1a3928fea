//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the renderer:
//! - Math types and orientation conventions
//! - Collections (active-id bitset, slot map handles)
//! - Time measurement
//! - Logging utilities

pub mod collections;
pub mod logging;
pub mod math;
pub mod time;
