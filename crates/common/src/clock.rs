//! Clock and timestamp utilities.
//!
//! Media timestamps inside the pipeline are microseconds (`i64`), matching
//! what demuxers and encoders report.

use std::time::Instant;

/// Microseconds per second.
pub const US_PER_SEC: i64 = 1_000_000;

/// Duration of one frame at `fps`, in microseconds.
pub fn frame_interval_us(fps: u32) -> i64 {
    US_PER_SEC / fps.max(1) as i64
}

/// Wall-clock stopwatch for a single edit invocation.
#[derive(Debug, Clone)]
pub struct EditClock {
    /// The instant the invocation started.
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string).
    epoch_wall: String,
}

impl EditClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the invocation started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval_us(30), 33_333);
        assert_eq!(frame_interval_us(0), US_PER_SEC);
    }

    #[test]
    fn test_clock_elapsed() {
        let clock = EditClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }
}
