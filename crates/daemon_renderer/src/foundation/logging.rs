//! Logging utilities
//!
//! The crate logs through the `log` facade. Binaries call [`init`] once to
//! install `env_logger`; `RUST_LOG` still overrides the configured level.
//!
//! [`SuppressedLog`] keeps polled GPU errors from flooding the log when the
//! same error repeats every frame.

use std::collections::HashMap;

pub use log::{debug, error, info, trace, warn};

/// Initialize `env_logger` with `level` as the default filter
pub fn init(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // a second init (tests, restarts) is harmless
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();
}

/// Logs the first few occurrences of each error code and counts the rest
#[derive(Debug, Clone)]
pub struct SuppressedLog {
    threshold: u32,
    seen: HashMap<u32, u32>,
}

impl SuppressedLog {
    /// Create a reporter that logs at most `threshold` repeats of one code between flushes
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            seen: HashMap::new(),
        }
    }

    /// Report one occurrence of `code`. Returns whether it was logged.
    pub fn report(&mut self, code: u32, context: &str) -> bool {
        let count = self.seen.entry(code).or_insert(0);
        *count += 1;
        if *count <= self.threshold {
            log::warn!("{context}: GPU error 0x{code:X}");
            true
        } else {
            false
        }
    }

    /// Number of occurrences of `code` since the last flush
    pub fn occurrences(&self, code: u32) -> u32 {
        self.seen.get(&code).copied().unwrap_or(0)
    }

    /// Log a summary of suppressed repeats and start counting again
    pub fn flush(&mut self) {
        for (code, count) in self.seen.drain() {
            if count > self.threshold {
                log::warn!("GPU error 0x{code:X} repeated {} more times", count - self.threshold);
            }
        }
    }
}

impl Default for SuppressedLog {
    fn default() -> Self {
        Self::new(4)
    }
}
