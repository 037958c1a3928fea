//! Frame timing utilities

use std::time::{Duration, Instant};

/// Accumulating stopwatch used for front-end and back-end msec counters
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub const fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch; a running stopwatch keeps its original start
    pub fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Reset the stopwatch to zero
    pub fn reset(&mut self) {
        self.start_time = None;
        self.elapsed = Duration::ZERO;
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        self.elapsed + self.start_time.map_or(Duration::ZERO, |start| start.elapsed())
    }

    /// Whole milliseconds elapsed, saturating
    pub fn elapsed_msec(&self) -> u32 {
        u32::try_from(self.elapsed().as_millis()).unwrap_or(u32::MAX)
    }

    /// Stop, return whole milliseconds, and reset
    pub fn take_msec(&mut self) -> u32 {
        self.stop();
        let msec = self.elapsed_msec();
        self.reset();
        msec
    }

    /// Check if the stopwatch is currently running
    pub const fn is_running(&self) -> bool {
        self.start_time.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_msec_resets() {
        let mut stopwatch = Stopwatch::start_new();
        std::thread::sleep(Duration::from_millis(2));
        assert!(stopwatch.take_msec() >= 1);
        assert!(!stopwatch.is_running());
        assert_eq!(stopwatch.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_stop_accumulates() {
        let mut stopwatch = Stopwatch::new();
        stopwatch.start();
        stopwatch.stop();
        let first = stopwatch.elapsed();
        stopwatch.start();
        stopwatch.stop();
        assert!(stopwatch.elapsed() >= first);
    }
}
