//! The decode → composite → encode loop.
//!
//! Each iteration does three things, in order:
//!
//! 1. feed the decoder one sample (or end of stream) if it has a free input
//! 2. check for cancellation; if set, release everything and stop right away
//! 3. take one decoded buffer, composite it and drain the encoder
//!
//! All codec queries are zero-timeout, so the loop never blocks on a codec.
//! Once the decoder reports end of stream the encoder is told there is no more
//! input and drained until it reports end of stream too.

use std::time::Duration;

use squarecut_common::{EditResult, PipelineTuning};
use squarecut_media_model::TimeRange;

use crate::cancel::CancelToken;
use crate::codec::DecodedBuffer;
use crate::encoder::FlushOutcome;
use crate::lifecycle::{ActiveStages, PipelineResources};

/// Driver progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Created, loop not entered yet.
    Priming,
    /// Feeding samples and pulling frames.
    Decoding,
    /// End of stream submitted to the decoder; waiting for it to flush.
    Draining,
    /// Decoder and encoder both flushed.
    Done,
    /// Cancellation observed; resources already released.
    Cancelled,
}

/// Loop flags, owned by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineState {
    pub input_done: bool,
    pub output_done: bool,
    pub cancelled: bool,
}

/// What the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveReport {
    pub state: DriverState,
    pub samples_fed: u64,
    pub frames_rendered: u64,
    /// Decoded frames before the trim start, released without drawing.
    pub frames_skipped: u64,
    pub iterations: u64,
    /// Whether the encoder confirmed end of stream before the drain timeout.
    pub encoder_flushed: bool,
}

impl DriveReport {
    pub fn is_cancelled(&self) -> bool {
        self.state == DriverState::Cancelled
    }
}

pub struct CodecDriver<'a> {
    range: TimeRange,
    cancel: &'a CancelToken,
    tuning: &'a PipelineTuning,
    state: DriverState,
    pipeline: PipelineState,
    samples_fed: u64,
    frames_rendered: u64,
    frames_skipped: u64,
    iterations: u64,
}

impl<'a> CodecDriver<'a> {
    pub fn new(range: TimeRange, cancel: &'a CancelToken, tuning: &'a PipelineTuning) -> Self {
        Self {
            range,
            cancel,
            tuning,
            state: DriverState::Priming,
            pipeline: PipelineState::default(),
            samples_fed: 0,
            frames_rendered: 0,
            frames_skipped: 0,
            iterations: 0,
        }
    }

    /// Run the loop to completion or cancellation.
    ///
    /// On cancellation `resources` are released before returning. Codec
    /// faults are returned as errors; releasing is then left to the owner
    /// of `resources`.
    pub fn run(&mut self, resources: &mut PipelineResources) -> EditResult<DriveReport> {
        self.transition(DriverState::Decoding);

        while !self.pipeline.output_done {
            self.iterations += 1;
            let mut progressed = false;

            if !self.pipeline.input_done {
                progressed |= self.feed_input(&mut resources.active()?)?;
            }

            if self.cancel.is_cancelled() {
                return Ok(self.stop_cancelled(resources));
            }

            progressed |= self.pull_output(&mut resources.active()?)?;

            if !progressed {
                self.idle();
            }
        }

        let outcome = {
            let stages = resources.active()?;
            let timeout = Duration::from_millis(self.tuning.drain_timeout_ms);
            stages.encoder.finish(timeout, self.cancel, || self.idle())?
        };
        if outcome == FlushOutcome::Cancelled {
            return Ok(self.stop_cancelled(resources));
        }
        self.transition(DriverState::Done);
        Ok(self.report(outcome == FlushOutcome::Flushed))
    }

    fn stop_cancelled(&mut self, resources: &mut PipelineResources) -> DriveReport {
        self.pipeline.cancelled = true;
        resources.release();
        self.transition(DriverState::Cancelled);
        self.report(false)
    }

    /// Step 1: hand the decoder one sample, or end of stream.
    fn feed_input(&mut self, stages: &mut ActiveStages<'_>) -> EditResult<bool> {
        let Some(slot) = stages.decoder.try_dequeue_input()? else {
            return Ok(false);
        };

        match stages.demuxer.read_sample()? {
            Some(sample) if !self.range.is_past_end(sample.pts_us) => {
                stages.decoder.queue_input(slot, &sample)?;
                self.samples_fed += 1;
            }
            last => {
                stages.decoder.queue_end_of_stream(slot)?;
                self.pipeline.input_done = true;
                tracing::debug!(
                    samples_fed = self.samples_fed,
                    stop_pts_us = last.map(|s| s.pts_us),
                    "Decoder input exhausted"
                );
                self.transition(DriverState::Draining);
            }
        }
        Ok(true)
    }

    /// Step 3: take one decoded buffer and composite it.
    fn pull_output(&mut self, stages: &mut ActiveStages<'_>) -> EditResult<bool> {
        let Some(buffer) = stages.decoder.try_dequeue_output()? else {
            return Ok(false);
        };
        let end_of_stream = buffer.flags.end_of_stream;
        self.composite(stages, buffer)?;
        if end_of_stream {
            self.pipeline.output_done = true;
        }
        Ok(true)
    }

    fn composite(&mut self, stages: &mut ActiveStages<'_>, buffer: DecodedBuffer) -> EditResult<()> {
        let index = buffer.index;
        let pts_us = buffer.pts_us;
        let has_content = buffer.has_content();
        let frame = match buffer.frame {
            Some(frame) if has_content => frame,
            _ => return stages.decoder.release_output(index, false),
        };

        if !self.range.contains_us(pts_us) {
            self.frames_skipped += 1;
            return stages.decoder.release_output(index, false);
        }

        stages.compositor.draw_frame(frame, pts_us)?;
        stages.encoder.drain()?;
        stages.decoder.release_output(index, true)?;
        self.frames_rendered += 1;
        Ok(())
    }

    fn idle(&self) {
        if self.tuning.idle_backoff_us == 0 {
            std::thread::yield_now();
        } else {
            std::thread::sleep(Duration::from_micros(self.tuning.idle_backoff_us));
        }
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Driver state");
            self.state = next;
        }
    }

    fn report(&self, encoder_flushed: bool) -> DriveReport {
        DriveReport {
            state: self.state,
            samples_fed: self.samples_fed,
            frames_rendered: self.frames_rendered,
            frames_skipped: self.frames_skipped,
            iterations: self.iterations,
            encoder_flushed,
        }
    }
}
