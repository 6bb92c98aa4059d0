//! Edit requests and the entry point that runs them.

use std::path::PathBuf;
use std::thread::JoinHandle;

use serde::Serialize;
use squarecut_common::{EditClock, EditConfig, EditError, EditResult};
use squarecut_media_model::{CropRect, CropRegion, MediaTrack, TimeRange};
use tokio::sync::oneshot;

use crate::cancel::CancelToken;
use crate::codec::{DecoderConfig, EncoderConfig, MediaBackend, SeekMode};
use crate::compositor::{Compositor, RenderContext};
use crate::driver::CodecDriver;
use crate::encoder::BufferedEncoder;
use crate::lifecycle::PipelineResources;
use crate::mux_stage::{AudioSource, MuxStage, OutputTarget};
use crate::ring_buffer::RingBuffer;
use crate::track_select::select_tracks;

/// One trim-and-crop job.
#[derive(Debug, Clone)]
pub struct EditRequest {
    /// Source media file.
    pub source: PathBuf,

    /// Output MP4 path.
    pub output: PathBuf,

    /// Trim window.
    pub range: TimeRange,

    /// Crop rectangle in display pixels. `None` picks the centered square.
    pub crop: Option<CropRect>,
}

/// What a successful edit produced.
#[derive(Debug, Clone, Serialize)]
pub struct EditSummary {
    pub output: PathBuf,
    pub started_at: String,
    pub elapsed_secs: f64,
    pub crop: CropRect,
    pub output_side: u32,
    pub samples_fed: u64,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub video_chunks_written: usize,
    pub video_chunks_discarded: usize,
    pub audio_samples_written: usize,
    pub has_audio: bool,
}

/// Runs edits against a [`MediaBackend`].
pub struct VideoEditor<B> {
    backend: B,
    config: EditConfig,
}

impl<B: MediaBackend> VideoEditor<B> {
    pub fn new(backend: B, config: EditConfig) -> Self {
        Self { backend, config }
    }

    /// Run one edit on the calling thread.
    ///
    /// Every codec resource is created, used and released on this thread.
    /// `NoVideoTrack`, `EmptyOutput` and `Cancelled` come back as errors;
    /// see [`squarecut_common::into_output_path`] to treat them as "no
    /// result".
    pub fn perform_edit(
        &self,
        request: &EditRequest,
        cancel: &CancelToken,
    ) -> EditResult<EditSummary> {
        let clock = EditClock::start();
        tracing::info!(
            source = %request.source.display(),
            output = %request.output.display(),
            start_secs = request.range.start_secs(),
            end_secs = request.range.end_secs(),
            backend = self.backend.name(),
            "Starting edit"
        );

        if !request.source.exists() {
            return Err(EditError::FileNotFound {
                path: request.source.clone(),
            });
        }
        if request.source == request.output {
            return Err(EditError::invalid_request(
                "output path must differ from the source",
            ));
        }

        let mut resources = PipelineResources::new(self.backend.open_demuxer(&request.source)?);
        let selection = select_tracks(resources.demuxer()?.tracks());
        let video_index = selection.require_video()?;
        let tracks = resources.demuxer()?.tracks().to_vec();
        let video = track_at(&tracks, video_index)?;
        let audio = selection
            .audio
            .map(|index| track_at(&tracks, index))
            .transpose()?;
        if audio.is_none() {
            tracing::info!("Source has no audio track");
        }

        let (display_width, display_height) = video
            .format
            .display_size()
            .ok_or_else(|| EditError::codec("video track has no dimensions"))?;
        let crop = request
            .crop
            .unwrap_or_else(|| CropRect::centered_square(display_width, display_height))
            .clamp_to(display_width, display_height)
            .map_err(|e| EditError::invalid_request(e.to_string()))?;
        if !crop.is_square() {
            tracing::warn!(crop = %crop, "Crop is not square; output will be stretched");
        }
        let policy = &self.config.encoder;
        let side = policy.output_side(display_width, display_height);
        let region = CropRegion::square(crop, side);

        // Each codec is owned by `resources` before it is started, so a
        // failing start still gets it stopped.
        let ring = RingBuffer::with_capacity(self.config.pipeline.ring_capacity(policy.fps));
        let encoder_config = EncoderConfig::square(policy, side);
        resources.attach_encoder(BufferedEncoder::new(
            self.backend.create_encoder(&encoder_config)?,
            ring,
        ));
        resources.encoder_mut()?.start()?;

        let context = RenderContext::create()?;
        let surface = resources.encoder_mut()?.create_input_surface()?;
        let compositor = Compositor::new(
            context,
            surface,
            (display_width, display_height),
            video.format.rotation_degrees,
            region,
        )?;
        resources.attach_compositor(compositor);

        let decoder_config = DecoderConfig {
            format: video.format.clone(),
            max_width: self.config.decoder.max_width,
            max_height: self.config.decoder.max_height,
        };
        resources.attach_decoder(self.backend.create_decoder(&decoder_config)?);
        resources.decoder_mut()?.start()?;

        let demuxer = resources.demuxer_mut()?;
        demuxer.select_track(video_index)?;
        demuxer.seek_to(request.range.start_us(), SeekMode::ClosestSync)?;

        tracing::info!(
            display_width,
            display_height,
            rotation = video.format.rotation_degrees,
            crop = %crop,
            side,
            "Decoding"
        );
        let drive = CodecDriver::new(request.range, cancel, &self.config.pipeline)
            .run(&mut resources)?;
        if drive.is_cancelled() {
            tracing::info!(frames_rendered = drive.frames_rendered, "Edit cancelled");
            return Err(EditError::Cancelled);
        }
        tracing::debug!(
            samples_fed = drive.samples_fed,
            frames_rendered = drive.frames_rendered,
            frames_skipped = drive.frames_skipped,
            iterations = drive.iterations,
            encoder_flushed = drive.encoder_flushed,
            "Decode loop finished"
        );

        let (encoder, demuxer) = resources.mux_inputs()?;
        if encoder.ring().is_empty() {
            tracing::info!("Encoder produced no output");
            return Err(EditError::EmptyOutput);
        }
        let video_format = encoder.output_format()?.clone();

        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let target = OutputTarget::new(&request.output);
        let muxer = self.backend.create_muxer(target.partial_path())?;
        let audio_source = audio.as_ref().map(|track| AudioSource {
            demuxer,
            track,
            video_track: video_index,
        });
        let mux = MuxStage::new(request.range, cancel).write(
            muxer,
            encoder.ring(),
            &video_format,
            audio_source,
        );
        let mux = match mux {
            Ok(report) => report,
            Err(e) => {
                target.discard();
                return Err(e);
            }
        };

        resources.release();
        let output = target.commit()?;

        let summary = EditSummary {
            output,
            started_at: clock.epoch_wall().to_string(),
            elapsed_secs: clock.elapsed_secs(),
            crop,
            output_side: side,
            samples_fed: drive.samples_fed,
            frames_rendered: drive.frames_rendered,
            frames_skipped: drive.frames_skipped,
            video_chunks_written: mux.video_chunks_written,
            video_chunks_discarded: mux.video_chunks_discarded,
            audio_samples_written: mux.audio_samples_written,
            has_audio: mux.has_audio,
        };
        tracing::info!(
            output = %summary.output.display(),
            frames = summary.frames_rendered,
            elapsed_secs = summary.elapsed_secs,
            "Edit complete"
        );
        Ok(summary)
    }
}

fn track_at(tracks: &[MediaTrack], index: usize) -> EditResult<MediaTrack> {
    tracks
        .iter()
        .find(|t| t.index == index)
        .cloned()
        .ok_or_else(|| EditError::codec(format!("track {index} disappeared")))
}

/// A running edit on its own worker thread.
pub struct EditHandle {
    cancel: CancelToken,
    result: oneshot::Receiver<EditResult<EditSummary>>,
    worker: Option<JoinHandle<()>>,
}

impl EditHandle {
    /// Ask the worker to stop. It releases everything and reports
    /// [`EditError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Wait for the outcome from async code.
    pub async fn wait(mut self) -> EditResult<EditSummary> {
        let outcome = (&mut self.result).await;
        self.join_worker();
        outcome.unwrap_or_else(|_| Err(worker_lost()))
    }

    /// Wait for the outcome from blocking code. Must not be called from
    /// inside an async runtime.
    pub fn join(mut self) -> EditResult<EditSummary> {
        let worker = self.worker.take();
        let outcome = match worker {
            Some(worker) => worker.join().map_err(|_| worker_lost()).and_then(|()| {
                self.result.try_recv().map_err(|_| worker_lost())
            }),
            None => Err(worker_lost()),
        };
        outcome.and_then(|result| result)
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Edit worker panicked");
            }
        }
    }
}

fn worker_lost() -> EditError {
    EditError::codec("edit worker exited without reporting a result")
}

/// Run `request` on a dedicated worker thread.
///
/// The worker owns every codec resource from creation to release and sends
/// exactly one outcome when it terminates.
pub fn spawn_edit<B>(
    editor: VideoEditor<B>,
    request: EditRequest,
    cancel: CancelToken,
) -> EditResult<EditHandle>
where
    B: MediaBackend + 'static,
{
    let (tx, rx) = oneshot::channel();
    let worker_cancel = cancel.clone();
    let worker = std::thread::Builder::new()
        .name("squarecut-edit".to_string())
        .spawn(move || {
            let outcome = editor.perform_edit(&request, &worker_cancel);
            if let Err(e) = &outcome {
                if e.is_transient() {
                    tracing::info!(reason = %e, "Edit ended without output");
                } else {
                    tracing::error!(error = %e, "Edit failed");
                }
            }
            let _ = tx.send(outcome);
        })?;
    Ok(EditHandle {
        cancel,
        result: rx,
        worker: Some(worker),
    })
}
