//! The trim window.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Half-open trim window `[start, end)` in seconds.
///
/// Samples whose presentation time is at or past `end` are excluded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    start_secs: f64,
    end_secs: f64,
}

impl TimeRange {
    /// Create a range, rejecting negative starts and empty windows.
    pub fn new(start_secs: f64, end_secs: f64) -> Result<Self, ModelError> {
        if !start_secs.is_finite() || !end_secs.is_finite() {
            return Err(ModelError::time_range("bounds must be finite"));
        }
        if start_secs < 0.0 {
            return Err(ModelError::time_range(format!(
                "start {start_secs}s is negative"
            )));
        }
        if end_secs <= start_secs {
            return Err(ModelError::time_range(format!(
                "end {end_secs}s must be after start {start_secs}s"
            )));
        }
        Ok(Self {
            start_secs,
            end_secs,
        })
    }

    pub fn start_secs(&self) -> f64 {
        self.start_secs
    }

    pub fn end_secs(&self) -> f64 {
        self.end_secs
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    pub fn start_us(&self) -> i64 {
        (self.start_secs * 1_000_000.0).round() as i64
    }

    pub fn end_us(&self) -> i64 {
        (self.end_secs * 1_000_000.0).round() as i64
    }

    /// Whether a sample at `pts_us` falls at or past the end of the window.
    pub fn is_past_end(&self, pts_us: i64) -> bool {
        pts_us >= self.end_us()
    }

    /// Whether a sample at `pts_us` falls before the start of the window.
    pub fn is_before_start(&self, pts_us: i64) -> bool {
        pts_us < self.start_us()
    }

    /// Whether `pts_us` lies inside `[start, end)`.
    pub fn contains_us(&self, pts_us: i64) -> bool {
        !self.is_before_start(pts_us) && !self.is_past_end(pts_us)
    }

    /// Shift a timestamp so the window start becomes zero.
    pub fn rebase_us(&self, pts_us: i64) -> i64 {
        (pts_us - self.start_us()).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_range() {
        let range = TimeRange::new(2.0, 5.0).unwrap();
        assert_eq!(range.start_us(), 2_000_000);
        assert_eq!(range.end_us(), 5_000_000);
        assert!((range.duration_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(TimeRange::new(-1.0, 2.0).is_err());
        assert!(TimeRange::new(3.0, 3.0).is_err());
        assert!(TimeRange::new(4.0, 3.0).is_err());
        assert!(TimeRange::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_window_is_half_open() {
        let range = TimeRange::new(2.0, 5.0).unwrap();
        assert!(range.is_before_start(1_999_999));
        assert!(range.contains_us(2_000_000));
        assert!(range.contains_us(4_999_999));
        assert!(range.is_past_end(5_000_000));
        assert!(!range.contains_us(5_000_000));
    }

    #[test]
    fn test_rebase() {
        let range = TimeRange::new(2.0, 5.0).unwrap();
        assert_eq!(range.rebase_us(2_500_000), 500_000);
        assert_eq!(range.rebase_us(1_000_000), 0);
    }
}
