//! Encoder plus the ring buffer it drains into.

use std::time::{Duration, Instant};

use squarecut_common::{EditError, EditResult};
use squarecut_media_model::TrackFormat;

use crate::cancel::CancelToken;
use crate::codec::{EncoderOutput, EncoderSurface, HardwareEncoder};
use crate::ring_buffer::RingBuffer;

/// Result of one [`BufferedEncoder::drain`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainStatus {
    /// Packets moved into the ring.
    pub packets: usize,
    /// The encoder reported end of stream.
    pub end_of_stream: bool,
}

/// How [`BufferedEncoder::finish`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The encoder reported end of stream.
    Flushed,
    /// The timeout elapsed first; what was drained so far is kept.
    TimedOut,
    /// Cancellation was observed while waiting.
    Cancelled,
}

/// Owns the encoder and stores everything it produces.
pub struct BufferedEncoder {
    encoder: Box<dyn HardwareEncoder>,
    ring: RingBuffer,
    output_format: Option<TrackFormat>,
    end_of_stream: bool,
    stopped: bool,
}

impl BufferedEncoder {
    pub fn new(encoder: Box<dyn HardwareEncoder>, ring: RingBuffer) -> Self {
        Self {
            encoder,
            ring,
            output_format: None,
            end_of_stream: false,
            stopped: false,
        }
    }

    pub fn start(&mut self) -> EditResult<()> {
        self.encoder.start()
    }

    pub fn create_input_surface(&mut self) -> EditResult<Box<dyn EncoderSurface>> {
        self.encoder.create_input_surface()
    }

    /// Move every packet the encoder has ready into the ring.
    ///
    /// Never blocks. Empty end-of-stream packets are not stored.
    pub fn drain(&mut self) -> EditResult<DrainStatus> {
        let mut status = DrainStatus {
            end_of_stream: self.end_of_stream,
            ..DrainStatus::default()
        };
        if self.end_of_stream || self.stopped {
            return Ok(status);
        }

        loop {
            match self.encoder.try_dequeue_output()? {
                EncoderOutput::TryAgainLater => break,
                EncoderOutput::FormatChanged(format) => {
                    tracing::debug!(mime = %format.mime, "Encoder output format changed");
                    self.output_format = Some(format);
                }
                EncoderOutput::Packet(packet) => {
                    if !packet.data.is_empty() {
                        self.ring.push(&packet.data, packet.pts_us, packet.flags);
                        status.packets += 1;
                    }
                    if packet.flags.end_of_stream {
                        self.end_of_stream = true;
                        break;
                    }
                }
                EncoderOutput::EndOfStream => {
                    self.end_of_stream = true;
                    break;
                }
            }
        }

        status.end_of_stream = self.end_of_stream;
        Ok(status)
    }

    /// Signal end of input and drain until the encoder reports end of
    /// stream, `timeout` elapses or `cancel` is set.
    ///
    /// Giving up on the timeout is not an error.
    pub fn finish(
        &mut self,
        timeout: Duration,
        cancel: &CancelToken,
        idle: impl Fn(),
    ) -> EditResult<FlushOutcome> {
        self.encoder.signal_end_of_input()?;
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.drain()?;
            if status.end_of_stream {
                return Ok(FlushOutcome::Flushed);
            }
            if cancel.is_cancelled() {
                return Ok(FlushOutcome::Cancelled);
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    buffered = self.ring.len(),
                    "Encoder did not reach end of stream in time"
                );
                return Ok(FlushOutcome::TimedOut);
            }
            if status.packets == 0 {
                idle();
            }
        }
    }

    /// Format to register with the muxer.
    pub fn output_format(&self) -> EditResult<&TrackFormat> {
        self.output_format
            .as_ref()
            .ok_or_else(|| EditError::codec("encoder never reported an output format"))
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Stop the encoder. The ring keeps its contents. Idempotent.
    pub fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.encoder.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::codec::EncodedPacket;
    use squarecut_media_model::{ChunkFlags, VideoFrame};

    struct ScriptedEncoder {
        outputs: VecDeque<EncoderOutput>,
        stops: usize,
    }

    impl HardwareEncoder for ScriptedEncoder {
        fn start(&mut self) -> EditResult<()> {
            Ok(())
        }

        fn create_input_surface(&mut self) -> EditResult<Box<dyn EncoderSurface>> {
            struct Null;
            impl EncoderSurface for Null {
                fn submit_frame(&mut self, _: &VideoFrame, _: i64) -> EditResult<()> {
                    Ok(())
                }
                fn release(&mut self) {}
            }
            Ok(Box::new(Null))
        }

        fn try_dequeue_output(&mut self) -> EditResult<EncoderOutput> {
            Ok(self.outputs.pop_front().unwrap_or(EncoderOutput::TryAgainLater))
        }

        fn signal_end_of_input(&mut self) -> EditResult<()> {
            Ok(())
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn packet(pts_us: i64, flags: ChunkFlags) -> EncoderOutput {
        EncoderOutput::Packet(EncodedPacket {
            data: vec![1, 2, 3],
            pts_us,
            flags,
        })
    }

    fn encoder(outputs: Vec<EncoderOutput>) -> BufferedEncoder {
        BufferedEncoder::new(
            Box::new(ScriptedEncoder {
                outputs: outputs.into(),
                stops: 0,
            }),
            RingBuffer::with_capacity(8),
        )
    }

    #[test]
    fn test_drain_stops_at_try_again() {
        let mut enc = encoder(vec![
            EncoderOutput::FormatChanged(TrackFormat::new("video/avc", "caps")),
            packet(0, ChunkFlags::KEY_FRAME),
            EncoderOutput::TryAgainLater,
            packet(33_333, ChunkFlags::NONE),
        ]);
        let status = enc.drain().unwrap();
        assert_eq!(status, DrainStatus { packets: 1, end_of_stream: false });
        assert_eq!(enc.output_format().unwrap().mime, "video/avc");
        assert_eq!(enc.drain().unwrap().packets, 1);
        assert_eq!(enc.ring().len(), 2);
    }

    #[test]
    fn test_empty_eos_packet_not_stored() {
        let mut enc = encoder(vec![
            packet(0, ChunkFlags::KEY_FRAME),
            EncoderOutput::Packet(EncodedPacket {
                data: Vec::new(),
                pts_us: 0,
                flags: ChunkFlags::END_OF_STREAM,
            }),
        ]);
        let status = enc.drain().unwrap();
        assert!(status.end_of_stream);
        assert_eq!(enc.ring().len(), 1);
        assert!(enc.drain().unwrap().end_of_stream);
    }

    #[test]
    fn test_finish_times_out_without_error() {
        let mut enc = encoder(vec![packet(0, ChunkFlags::KEY_FRAME)]);
        let outcome = enc
            .finish(Duration::from_millis(5), &CancelToken::new(), std::thread::yield_now)
            .unwrap();
        assert_eq!(outcome, FlushOutcome::TimedOut);
        assert_eq!(enc.ring().len(), 1);
    }

    #[test]
    fn test_finish_reaches_end_of_stream() {
        let mut enc = encoder(vec![packet(0, ChunkFlags::KEY_FRAME), EncoderOutput::EndOfStream]);
        let outcome = enc
            .finish(Duration::from_secs(1), &CancelToken::new(), || {})
            .unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed);
    }

    #[test]
    fn test_finish_returns_early_on_cancel() {
        let mut enc = encoder(vec![packet(0, ChunkFlags::KEY_FRAME)]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        let outcome = enc
            .finish(Duration::from_secs(30), &cancel, std::thread::yield_now)
            .unwrap();
        assert_eq!(outcome, FlushOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(enc.ring().len(), 1);
    }

    #[test]
    fn test_missing_output_format_is_codec_error() {
        let enc = encoder(Vec::new());
        assert!(matches!(enc.output_format(), Err(EditError::Codec { .. })));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut enc = encoder(Vec::new());
        enc.stop();
        enc.stop();
        assert!(enc.is_stopped());
        assert_eq!(enc.drain().unwrap(), DrainStatus::default());
    }
}
