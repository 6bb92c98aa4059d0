//! GStreamer backend.
//!
//! Each codec object owns a small pipeline:
//!
//! - demuxer: `filesrc ! parsebin`, one `appsink` per selected track
//! - decoder: `appsrc ! decodebin ! videoconvert ! videoscale ! appsink` (RGBA)
//! - encoder: `appsrc ! videoconvert ! <encoder> ! h264parse ! appsink` (AVC/AU)
//! - muxer: `appsrc`s `! mp4mux ! filesink`
//!
//! Codec queries use `try_pull_sample` with a zero timeout, and every query
//! checks the pipeline bus so element errors surface as codec faults.

mod decode;
mod demux;
mod encode;
mod mux;

use std::path::Path;
use std::sync::OnceLock;

use gst::prelude::*;
use gstreamer as gst;
use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{Sample, TrackFormat};

use crate::codec::{
    DecoderConfig, Demuxer, EncoderConfig, HardwareEncoder, MediaBackend, Muxer, VideoDecoder,
};

pub use decode::GstDecoder;
pub use demux::GstDemuxer;
pub use encode::GstEncoder;
pub use mux::GstMuxer;

/// Elements every edit needs, besides the configured encoder.
pub const REQUIRED_ELEMENTS: &[&str] = &[
    "filesrc",
    "parsebin",
    "decodebin",
    "videoconvert",
    "videoscale",
    "capsfilter",
    "appsrc",
    "appsink",
    "fakesink",
    "h264parse",
    "mp4mux",
    "filesink",
];

/// How long a state change may take before it is treated as a fault.
const STATE_CHANGE_TIMEOUT_SECS: u64 = 10;

pub struct GstBackend;

impl GstBackend {
    pub fn new() -> EditResult<Self> {
        init_gstreamer()?;
        Ok(Self)
    }

    /// GStreamer runtime version.
    pub fn version() -> String {
        gst::version_string().to_string()
    }

    /// Names from [`REQUIRED_ELEMENTS`] and `extra` that have no factory.
    pub fn missing_elements(extra: &[&str]) -> Vec<String> {
        REQUIRED_ELEMENTS
            .iter()
            .chain(extra)
            .filter(|name| gst::ElementFactory::find(name).is_none())
            .map(|name| name.to_string())
            .collect()
    }
}

impl MediaBackend for GstBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn open_demuxer(&self, source: &Path) -> EditResult<Box<dyn Demuxer>> {
        Ok(Box::new(GstDemuxer::open(source)?))
    }

    fn create_decoder(&self, config: &DecoderConfig) -> EditResult<Box<dyn VideoDecoder>> {
        Ok(Box::new(GstDecoder::new(config)?))
    }

    fn create_encoder(&self, config: &EncoderConfig) -> EditResult<Box<dyn HardwareEncoder>> {
        Ok(Box::new(GstEncoder::new(config)?))
    }

    fn create_muxer(&self, output: &Path) -> EditResult<Box<dyn Muxer>> {
        Ok(Box::new(GstMuxer::new(output)?))
    }
}

pub(crate) fn init_gstreamer() -> EditResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(EditError::codec(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn make_element(factory: &str) -> EditResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| EditError::codec(format!("Failed to create {factory}: {e}")))
}

fn set_state(pipeline: &gst::Pipeline, state: gst::State, what: &str) -> EditResult<()> {
    pipeline
        .set_state(state)
        .map(|_| ())
        .map_err(|e| EditError::codec(format!("Failed to set {what} to {state:?}: {e:?}")))
}

/// Block until the pipeline settles in `state`.
fn wait_for_state(pipeline: &gst::Pipeline, state: gst::State, what: &str) -> EditResult<()> {
    let wait_result = pipeline.state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
    match wait_result {
        (Ok(_), current, _) if current == state => Ok(()),
        (Ok(_), current, pending) => {
            poll_bus_error(pipeline, what)?;
            Err(EditError::codec(format!(
                "{what} did not reach {state:?} (current={current:?}, pending={pending:?})"
            )))
        }
        (Err(e), current, pending) => {
            poll_bus_error(pipeline, what)?;
            Err(EditError::codec(format!(
                "{what} state change failed: {e:?} (current={current:?}, pending={pending:?})"
            )))
        }
    }
}

/// Turn the first queued bus error into a codec fault. Never blocks.
fn poll_bus_error(pipeline: &gst::Pipeline, what: &str) -> EditResult<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
        if let gst::MessageView::Error(err) = msg.view() {
            return Err(EditError::codec(format!(
                "{what}: {} ({:?})",
                err.error(),
                err.debug()
            )));
        }
    }
    Ok(())
}

fn us_to_clock(pts_us: i64) -> gst::ClockTime {
    gst::ClockTime::from_useconds(pts_us.max(0) as u64)
}

fn clock_to_us(time: Option<gst::ClockTime>) -> i64 {
    time.map(|t| t.useconds() as i64).unwrap_or(0)
}

/// Describe caps as a [`TrackFormat`]; the caps string becomes the
/// descriptor.
fn format_from_caps(caps: &gst::CapsRef) -> TrackFormat {
    let Some(s) = caps.structure(0) else {
        return TrackFormat::new("application/octet-stream", caps.to_string());
    };
    let name = s.name().as_str();
    let mime = match name {
        "video/x-h264" => "video/avc",
        "video/x-h265" => "video/hevc",
        "audio/mpeg" if s.get::<i32>("mpegversion").ok() == Some(4) => "audio/mp4a-latm",
        other => other,
    };

    let mut format = TrackFormat::new(mime, caps.to_string());
    if let (Ok(w), Ok(h)) = (s.get::<i32>("width"), s.get::<i32>("height")) {
        format = format.with_size(w.max(0) as u32, h.max(0) as u32);
    }
    if let (Ok(rate), Ok(channels)) = (s.get::<i32>("rate"), s.get::<i32>("channels")) {
        format = format.with_audio(rate.max(0) as u32, channels.max(0) as u32);
    }
    format
}

fn caps_from_format(format: &TrackFormat) -> EditResult<gst::Caps> {
    format
        .descriptor
        .parse::<gst::Caps>()
        .map_err(|e| EditError::codec(format!("Unusable format for {}: {e}", format.mime)))
}

/// Copy a pulled sample into a [`Sample`] of `track_index`.
fn sample_from_gst(track_index: usize, sample: &gst::Sample) -> EditResult<Sample> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| EditError::codec("sample without buffer"))?;
    let map = buffer
        .map_readable()
        .map_err(|e| EditError::codec(format!("Failed to map buffer: {e}")))?;
    Ok(Sample::new(
        track_index,
        map.as_slice().to_vec(),
        clock_to_us(buffer.pts().or(buffer.dts())),
        !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
    ))
}

/// Build a buffer carrying `data` at `pts_us`.
fn buffer_at(data: Vec<u8>, pts_us: i64, key_frame: bool) -> gst::Buffer {
    let mut buffer = gst::Buffer::from_mut_slice(data);
    if let Some(buffer_ref) = buffer.get_mut() {
        buffer_ref.set_pts(us_to_clock(pts_us));
        if !key_frame {
            buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
        }
    }
    buffer
}

/// Clockwise rotation from an `image-orientation` tag value.
fn rotation_from_orientation(orientation: &str) -> u32 {
    match orientation {
        "rotate-90" => 90,
        "rotate-180" => 180,
        "rotate-270" => 270,
        _ => 0,
    }
}
