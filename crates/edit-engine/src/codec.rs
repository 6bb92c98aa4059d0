//! Backend seams: demuxer, decoder, encoder, muxer.
//!
//! The pipeline only talks to codecs through these traits. Decoder and
//! encoder queries are non-blocking: a `None` / [`EncoderOutput::TryAgainLater`]
//! answer means "nothing right now, poll again". Objects created by a
//! [`MediaBackend`] are not required to be `Send`; they live and die on the
//! worker thread that created them.

use std::path::Path;

use squarecut_common::{EditResult, EncoderPolicy};
use squarecut_media_model::{ChunkFlags, MediaTrack, Sample, TrackFormat, VideoFrame};

/// How a seek picks its landing sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// The sync sample closest to the target, earlier or later.
    ClosestSync,
    /// The last sync sample at or before the target.
    PreviousSync,
}

/// Reads compressed samples from a container.
pub trait Demuxer {
    /// All tracks of the source, in container order.
    fn tracks(&self) -> &[MediaTrack];

    /// Include a track in subsequent reads.
    fn select_track(&mut self, index: usize) -> EditResult<()>;

    /// Exclude a track from subsequent reads.
    fn unselect_track(&mut self, index: usize) -> EditResult<()>;

    /// Reposition all selected tracks.
    fn seek_to(&mut self, pts_us: i64, mode: SeekMode) -> EditResult<()>;

    /// Next sample from the selected tracks in presentation order, or `None`
    /// once they are exhausted.
    fn read_sample(&mut self) -> EditResult<Option<Sample>>;

    /// Free the underlying container handle. Idempotent.
    fn release(&mut self);
}

/// A free decoder input buffer, handed out by [`VideoDecoder::try_dequeue_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot(pub usize);

/// A decoder output buffer.
#[derive(Debug)]
pub struct DecodedBuffer {
    /// Token passed back to [`VideoDecoder::release_output`].
    pub index: usize,

    /// Presentation time in microseconds.
    pub pts_us: i64,

    pub flags: ChunkFlags,

    /// Decoded picture; `None` for zero-length buffers such as a bare
    /// end-of-stream marker.
    pub frame: Option<VideoFrame>,
}

impl DecodedBuffer {
    pub fn has_content(&self) -> bool {
        self.frame.as_ref().is_some_and(|f| !f.is_empty())
    }
}

/// Decoder configuration.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub format: TrackFormat,

    /// Largest output the decoder should produce.
    pub max_width: u32,
    pub max_height: u32,
}

impl DecoderConfig {
    /// Output size: the coded size scaled down, aspect preserved, to fit the
    /// size hints. Sources already inside the hints are left alone.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        let (w, h) = (self.format.width?, self.format.height?);
        Some(fit_within(w, h, self.max_width, self.max_height))
    }
}

/// Scale `width`×`height` down to fit `max_width`×`max_height`, keeping the
/// aspect ratio and even dimensions. Never scales up.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let even = |v: f64| ((v.round() as u32) & !1).max(2);
    (even(width as f64 * scale), even(height as f64 * scale))
}

/// Wraps compressed samples into decoded pictures.
pub trait VideoDecoder {
    fn start(&mut self) -> EditResult<()>;

    /// A free input buffer, if one is available right now.
    fn try_dequeue_input(&mut self) -> EditResult<Option<InputSlot>>;

    fn queue_input(&mut self, slot: InputSlot, sample: &Sample) -> EditResult<()>;

    /// Mark the end of input using the given slot.
    fn queue_end_of_stream(&mut self, slot: InputSlot) -> EditResult<()>;

    /// A decoded buffer, if one is ready right now.
    fn try_dequeue_output(&mut self) -> EditResult<Option<DecodedBuffer>>;

    /// Return an output buffer. `rendered` tells whether its picture was
    /// consumed by the compositor.
    fn release_output(&mut self, index: usize, rendered: bool) -> EditResult<()>;

    /// Stop and free the decoder. Idempotent.
    fn stop(&mut self);
}

/// Encoder configuration for the square output.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub keyframe_interval_frames: u32,
    pub bitrate_bps: u32,
    /// Backend-specific quality level, passed through untouched.
    pub quality: u32,
    /// Backend encoder element to use.
    pub element: String,
}

impl EncoderConfig {
    /// H.264 output of `side`×`side` pixels, per `policy`.
    pub fn square(policy: &EncoderPolicy, side: u32) -> Self {
        Self {
            mime: "video/avc".to_string(),
            width: side,
            height: side,
            fps: policy.fps,
            keyframe_interval_frames: policy.keyframe_interval_frames(),
            bitrate_bps: policy.bitrate_bps,
            quality: policy.quality,
            element: policy.element.clone(),
        }
    }
}

/// An encoded packet, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: ChunkFlags,
}

/// Answer to a non-blocking encoder output query.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderOutput {
    /// Nothing ready yet.
    TryAgainLater,
    /// The negotiated output format is now known.
    FormatChanged(TrackFormat),
    Packet(EncodedPacket),
    /// The encoder has flushed everything after end of input.
    EndOfStream,
}

/// The encoder's input surface. Frames drawn for the encoder are submitted
/// here.
pub trait EncoderSurface {
    fn submit_frame(&mut self, frame: &VideoFrame, pts_us: i64) -> EditResult<()>;

    /// Free the surface. Idempotent.
    fn release(&mut self);
}

/// A video encoder fed through an input surface.
pub trait HardwareEncoder {
    fn start(&mut self) -> EditResult<()>;

    /// Create the surface frames are submitted through. Called once, after
    /// [`HardwareEncoder::start`].
    fn create_input_surface(&mut self) -> EditResult<Box<dyn EncoderSurface>>;

    fn try_dequeue_output(&mut self) -> EditResult<EncoderOutput>;

    /// No more frames will be submitted.
    fn signal_end_of_input(&mut self) -> EditResult<()>;

    /// Stop and free the encoder. Idempotent.
    fn stop(&mut self);
}

/// Identifies a track added to a [`Muxer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxTrackId(pub usize);

/// Writes samples into an output container.
pub trait Muxer {
    fn add_track(&mut self, format: &TrackFormat) -> EditResult<MuxTrackId>;

    /// No tracks can be added after this.
    fn start(&mut self) -> EditResult<()>;

    fn write_sample(
        &mut self,
        track: MuxTrackId,
        data: &[u8],
        pts_us: i64,
        flags: ChunkFlags,
    ) -> EditResult<()>;

    /// Finalize the container and close the file.
    fn finish(self: Box<Self>) -> EditResult<()>;

    /// Close without finalizing. The file left behind is not playable.
    fn abort(self: Box<Self>);
}

/// Creates codec objects. Implementations must be shareable with the worker
/// thread; the objects they create need not be.
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    fn open_demuxer(&self, source: &Path) -> EditResult<Box<dyn Demuxer>>;

    fn create_decoder(&self, config: &DecoderConfig) -> EditResult<Box<dyn VideoDecoder>>;

    fn create_encoder(&self, config: &EncoderConfig) -> EditResult<Box<dyn HardwareEncoder>>;

    fn create_muxer(&self, output: &Path) -> EditResult<Box<dyn Muxer>>;
}
