//! Picks the video and audio tracks to work on.

use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{MediaTrack, MediaType};

/// Indices of the chosen tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackSelection {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

impl TrackSelection {
    /// The video track index, or [`EditError::NoVideoTrack`].
    pub fn require_video(&self) -> EditResult<usize> {
        self.video.ok_or(EditError::NoVideoTrack)
    }
}

/// Choose the first video track and the first audio track.
///
/// "First" means lowest track index, regardless of the order of `tracks`.
/// Tracks that are neither video nor audio are ignored.
pub fn select_tracks(tracks: &[MediaTrack]) -> TrackSelection {
    let first_of = |kind: MediaType| {
        tracks
            .iter()
            .filter(|t| t.media_type == kind)
            .map(|t| t.index)
            .min()
    };
    TrackSelection {
        video: first_of(MediaType::Video),
        audio: first_of(MediaType::Audio),
    }
}
