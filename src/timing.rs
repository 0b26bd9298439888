//! Phase timing for activation runs.

use std::time::Instant;

/// Measures one phase of a run and logs its duration on finish.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Log the elapsed time and return it in milliseconds.
    pub fn finish(self) -> u128 {
        let elapsed = self.start.elapsed();
        let ms = elapsed.as_millis();
        if elapsed.as_secs_f64() >= 1.0 {
            tracing::info!("[{:.1}s] {}", elapsed.as_secs_f64(), self.name);
        } else {
            tracing::debug!("[{ms}ms] {}", self.name);
        }
        ms
    }
}
