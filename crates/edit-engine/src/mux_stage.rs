//! Writes the buffered video and the source audio slice into the output
//! container.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{ChunkFlags, MediaTrack, TimeRange, TrackFormat};

use crate::cancel::CancelToken;
use crate::codec::{Demuxer, MuxTrackId, Muxer, SeekMode};
use crate::ring_buffer::{monotonic, RingBuffer};

/// Output path plus the sibling file the container is written to first.
///
/// The final path is only touched by [`OutputTarget::commit`], so a failed or
/// cancelled edit leaves whatever was there before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    final_path: PathBuf,
    partial_path: PathBuf,
}

impl OutputTarget {
    pub fn new(final_path: impl Into<PathBuf>) -> Self {
        let final_path = final_path.into();
        let mut partial: OsString = final_path.clone().into_os_string();
        partial.push(".partial");
        Self {
            final_path,
            partial_path: PathBuf::from(partial),
        }
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Move the finished partial file into place.
    pub fn commit(&self) -> EditResult<PathBuf> {
        if let Err(e) = std::fs::rename(&self.partial_path, &self.final_path) {
            self.discard();
            return Err(e.into());
        }
        Ok(self.final_path.clone())
    }

    /// Remove the partial file, if any.
    pub fn discard(&self) {
        match std::fs::remove_file(&self.partial_path) {
            Ok(()) => tracing::debug!(path = %self.partial_path.display(), "Partial output removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.partial_path.display(),
                error = %e,
                "Failed to remove partial output"
            ),
        }
    }
}

/// The source audio to copy alongside the video.
pub struct AudioSource<'a> {
    pub demuxer: &'a mut dyn Demuxer,
    pub track: &'a MediaTrack,
    /// Video track to deselect before copying.
    pub video_track: usize,
}

/// Counts of what went into the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxReport {
    pub video_chunks_written: usize,
    /// Chunks dropped by the monotonic filter.
    pub video_chunks_discarded: usize,
    pub audio_samples_written: usize,
    pub has_audio: bool,
}

pub struct MuxStage<'a> {
    range: TimeRange,
    cancel: &'a CancelToken,
}

impl<'a> MuxStage<'a> {
    pub fn new(range: TimeRange, cancel: &'a CancelToken) -> Self {
        Self { range, cancel }
    }

    /// Write everything and finalize `muxer`.
    ///
    /// On any error (including cancellation) the muxer is aborted instead of
    /// finalized.
    pub fn write(
        &self,
        mut muxer: Box<dyn Muxer>,
        ring: &RingBuffer,
        video_format: &TrackFormat,
        audio: Option<AudioSource<'_>>,
    ) -> EditResult<MuxReport> {
        if ring.is_empty() {
            muxer.abort();
            return Err(EditError::EmptyOutput);
        }

        match self.write_tracks(muxer.as_mut(), ring, video_format, audio) {
            Ok(report) => {
                muxer.finish()?;
                tracing::info!(
                    video_chunks = report.video_chunks_written,
                    discarded = report.video_chunks_discarded,
                    audio_samples = report.audio_samples_written,
                    "Output container finalized"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Aborting output container");
                muxer.abort();
                Err(e)
            }
        }
    }

    fn write_tracks(
        &self,
        muxer: &mut dyn Muxer,
        ring: &RingBuffer,
        video_format: &TrackFormat,
        audio: Option<AudioSource<'_>>,
    ) -> EditResult<MuxReport> {
        let video_track = muxer.add_track(video_format)?;
        let audio = match audio {
            Some(source) => {
                let id = muxer.add_track(&source.track.format)?;
                Some((id, source))
            }
            None => None,
        };
        muxer.start()?;

        let mut report = MuxReport {
            has_audio: audio.is_some(),
            ..MuxReport::default()
        };

        let mut chunks = monotonic(ring.iter());
        for chunk in chunks.by_ref() {
            muxer.write_sample(
                video_track,
                chunk.data,
                self.range.rebase_us(chunk.pts_us),
                chunk.flags,
            )?;
            report.video_chunks_written += 1;
        }
        report.video_chunks_discarded = chunks.discarded();
        if report.video_chunks_discarded > 0 {
            tracing::debug!(
                discarded = report.video_chunks_discarded,
                "Dropped out-of-order video chunks"
            );
        }
        self.check_cancelled()?;

        if let Some((id, source)) = audio {
            report.audio_samples_written = self.copy_audio(muxer, id, source)?;
        }
        self.check_cancelled()?;
        Ok(report)
    }

    /// Copy audio samples with pts in the trim window, unmodified.
    fn copy_audio(
        &self,
        muxer: &mut dyn Muxer,
        track: MuxTrackId,
        source: AudioSource<'_>,
    ) -> EditResult<usize> {
        let AudioSource {
            demuxer,
            track: audio,
            video_track,
        } = source;
        demuxer.select_track(audio.index)?;
        demuxer.seek_to(self.range.start_us(), SeekMode::ClosestSync)?;
        demuxer.unselect_track(video_track)?;

        let mut written = 0;
        while let Some(sample) = demuxer.read_sample()? {
            self.check_cancelled()?;
            if sample.track_index != audio.index {
                continue;
            }
            if self.range.is_past_end(sample.pts_us) {
                break;
            }
            if self.range.is_before_start(sample.pts_us) {
                continue;
            }
            let flags = if sample.is_sync {
                ChunkFlags::KEY_FRAME
            } else {
                ChunkFlags::NONE
            };
            muxer.write_sample(track, &sample.data, self.range.rebase_us(sample.pts_us), flags)?;
            written += 1;
        }
        Ok(written)
    }

    fn check_cancelled(&self) -> EditResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EditError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_is_sibling() {
        let target = OutputTarget::new("/tmp/out/clip.mp4");
        assert_eq!(target.partial_path(), Path::new("/tmp/out/clip.mp4.partial"));
        assert_eq!(target.final_path(), Path::new("/tmp/out/clip.mp4"));
    }

    #[test]
    fn test_commit_replaces_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = OutputTarget::new(dir.path().join("out.mp4"));
        std::fs::write(target.final_path(), b"old").unwrap();
        std::fs::write(target.partial_path(), b"new").unwrap();
        let path = target.commit().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"new");
        assert!(!target.partial_path().exists());
    }

    #[test]
    fn test_discard_leaves_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = OutputTarget::new(dir.path().join("out.mp4"));
        std::fs::write(target.final_path(), b"old").unwrap();
        std::fs::write(target.partial_path(), b"half").unwrap();
        target.discard();
        target.discard();
        assert!(!target.partial_path().exists());
        assert_eq!(std::fs::read(target.final_path()).unwrap(), b"old");
    }
}
