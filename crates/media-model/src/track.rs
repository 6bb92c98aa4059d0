//! Demuxer tracks and their codec formats.

use serde::{Deserialize, Serialize};

/// Coarse classification of a track by its declared MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Other,
}

impl MediaType {
    /// Classify a MIME type such as `video/avc` or `audio/mpeg`.
    pub fn from_mime(mime: &str) -> Self {
        let top = mime.split('/').next().unwrap_or_default();
        if top.eq_ignore_ascii_case("video") {
            Self::Video
        } else if top.eq_ignore_ascii_case("audio") {
            Self::Audio
        } else {
            Self::Other
        }
    }
}

/// Codec format of a track.
///
/// `descriptor` is backend-specific (serialized caps for GStreamer) and is
/// handed back to the same backend untouched. The remaining fields are the
/// parts the pipeline itself needs to reason about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackFormat {
    /// MIME type, e.g. `video/avc`.
    pub mime: String,

    /// Opaque backend format description.
    pub descriptor: String,

    /// Coded width, for video tracks.
    pub width: Option<u32>,

    /// Coded height, for video tracks.
    pub height: Option<u32>,

    /// Clockwise display rotation in degrees (0, 90, 180, 270).
    pub rotation_degrees: u32,

    /// Sample rate, for audio tracks.
    pub sample_rate: Option<u32>,

    /// Channel count, for audio tracks.
    pub channels: Option<u32>,

    /// Track duration.
    pub duration_us: Option<i64>,
}

impl TrackFormat {
    pub fn new(mime: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            descriptor: descriptor.into(),
            ..Self::default()
        }
    }

    /// Builder-style helper for video formats.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Builder-style helper for rotation metadata.
    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = degrees % 360;
        self
    }

    /// Builder-style helper for audio formats.
    pub fn with_audio(mut self, sample_rate: u32, channels: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self.channels = Some(channels);
        self
    }

    pub fn media_type(&self) -> MediaType {
        MediaType::from_mime(&self.mime)
    }

    /// Whether the display orientation is a quarter turn from the coded one.
    pub fn is_quarter_turn(&self) -> bool {
        self.rotation_degrees % 180 == 90
    }

    /// Size as displayed, i.e. with width and height swapped for 90°/270°
    /// rotations.
    pub fn display_size(&self) -> Option<(u32, u32)> {
        let (w, h) = (self.width?, self.height?);
        if self.is_quarter_turn() {
            Some((h, w))
        } else {
            Some((w, h))
        }
    }
}

/// One track exposed by a demuxer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaTrack {
    /// Position in the demuxer's track list.
    pub index: usize,

    /// Classification derived from the format's MIME type.
    pub media_type: MediaType,

    /// Codec format.
    pub format: TrackFormat,
}

impl MediaTrack {
    pub fn new(index: usize, format: TrackFormat) -> Self {
        Self {
            index,
            media_type: format.media_type(),
            format,
        }
    }
}
