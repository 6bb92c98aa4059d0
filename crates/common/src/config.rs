//! Edit configuration.
//!
//! The encoding policy is fixed by default (720px square cap, 30 fps, 2 s
//! keyframe interval, 3 Mbit/s) but can be overridden from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EditError, EditResult};

/// Highest accepted value for [`EncoderPolicy::quality`].
pub const MAX_QUALITY_LEVEL: u32 = 20;

/// Global configuration for edit invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    /// Output encoding policy.
    pub encoder: EncoderPolicy,

    /// Hints handed to the decoder.
    pub decoder: DecoderPolicy,

    /// Driver and buffering knobs.
    pub pipeline: PipelineTuning,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// How the composed square frames are encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderPolicy {
    /// Upper bound for the square output side, in pixels.
    pub max_side: u32,

    /// Target frame rate.
    pub fps: u32,

    /// Seconds between forced keyframes.
    pub keyframe_interval_secs: u32,

    /// Target bitrate in bits per second.
    pub bitrate_bps: u32,

    /// Opaque encoder tuning level in `0..=20`, handed to the encoder as-is.
    pub quality: u32,

    /// Encoder element name used by the GStreamer backend.
    pub element: String,
}

/// Limits passed to the decoder when it is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderPolicy {
    pub max_width: u32,
    pub max_height: u32,
}

/// Driver tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineTuning {
    /// Seconds of encoded output the ring buffer can hold.
    pub ring_buffer_secs: u32,

    /// Upper bound for flushing the encoder after end-of-stream, in ms.
    pub drain_timeout_ms: u64,

    /// Sleep between loop iterations that made no progress, in µs.
    /// Zero keeps the loop spinning with a plain yield.
    pub idle_backoff_us: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "squarecut=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for EncoderPolicy {
    fn default() -> Self {
        Self {
            max_side: 720,
            fps: 30,
            keyframe_interval_secs: 2,
            bitrate_bps: 3_000_000,
            quality: MAX_QUALITY_LEVEL,
            element: "x264enc".to_string(),
        }
    }
}

impl Default for DecoderPolicy {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 1280,
        }
    }
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            ring_buffer_secs: 60,
            drain_timeout_ms: 5_000,
            idle_backoff_us: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl EncoderPolicy {
    /// Side of the square output for a source of the given display size.
    pub fn output_side(&self, source_width: u32, source_height: u32) -> u32 {
        source_width.max(source_height).min(self.max_side)
    }

    /// Keyframe interval expressed in frames.
    pub fn keyframe_interval_frames(&self) -> u32 {
        self.fps.saturating_mul(self.keyframe_interval_secs).max(1)
    }
}

impl PipelineTuning {
    /// Number of chunk slots for an encoder running at `fps`.
    pub fn ring_capacity(&self, fps: u32) -> usize {
        (fps as usize * self.ring_buffer_secs as usize).max(1)
    }
}

impl EditConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: &Path) -> EditResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> EditResult<()> {
        let enc = &self.encoder;
        if enc.max_side == 0 {
            return Err(EditError::config("encoder.max_side must be positive"));
        }
        if enc.fps == 0 {
            return Err(EditError::config("encoder.fps must be positive"));
        }
        if enc.bitrate_bps == 0 {
            return Err(EditError::config("encoder.bitrate_bps must be positive"));
        }
        if enc.quality > MAX_QUALITY_LEVEL {
            return Err(EditError::config(format!(
                "encoder.quality must be in 0..={MAX_QUALITY_LEVEL}, got {}",
                enc.quality
            )));
        }
        if enc.element.trim().is_empty() {
            return Err(EditError::config("encoder.element must not be empty"));
        }
        if self.pipeline.ring_buffer_secs == 0 {
            return Err(EditError::config(
                "pipeline.ring_buffer_secs must be positive",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("squarecut").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fixed_policy() {
        let config = EditConfig::default();
        assert_eq!(config.encoder.max_side, 720);
        assert_eq!(config.encoder.fps, 30);
        assert_eq!(config.encoder.keyframe_interval_secs, 2);
        assert_eq!(config.encoder.bitrate_bps, 3_000_000);
        assert_eq!(config.encoder.quality, 20);
        assert_eq!(config.decoder.max_width, 1280);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_side_is_capped() {
        let policy = EncoderPolicy::default();
        assert_eq!(policy.output_side(1920, 1080), 720);
        assert_eq!(policy.output_side(640, 480), 640);
        assert_eq!(policy.output_side(480, 640), 640);
    }

    #[test]
    fn test_keyframe_interval_in_frames() {
        assert_eq!(EncoderPolicy::default().keyframe_interval_frames(), 60);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EditConfig =
            serde_json::from_str(r#"{ "encoder": { "bitrate_bps": 1000000 } }"#).unwrap();
        assert_eq!(config.encoder.bitrate_bps, 1_000_000);
        assert_eq!(config.encoder.fps, 30);
        assert_eq!(config.pipeline.ring_buffer_secs, 60);
    }

    #[test]
    fn test_quality_out_of_range_is_rejected() {
        let mut config = EditConfig::default();
        config.encoder.quality = 21;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("encoder.quality"));
    }

    #[test]
    fn test_load_from_reads_file() {
        let dir = std::env::temp_dir().join(format!("squarecut-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{ "pipeline": { "ring_buffer_secs": 10 } }"#).unwrap();

        let config = EditConfig::load_from(&path).unwrap();
        assert_eq!(config.pipeline.ring_buffer_secs, 10);
        assert_eq!(config.pipeline.ring_capacity(30), 300);

        std::fs::remove_dir_all(&dir).ok();
    }
}
