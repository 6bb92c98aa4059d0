//! Video decoding through `decodebin`.

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use gst_video::VideoFrameExt;
use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{ChunkFlags, Sample, VideoFrame, RGBA_BYTES};

use super::{buffer_at, caps_from_format, clock_to_us, make_element, poll_bus_error, set_state};
use crate::codec::{DecodedBuffer, DecoderConfig, InputSlot, VideoDecoder};

/// Compressed bytes allowed in the input queue before the decoder reports
/// no free input.
const MAX_QUEUED_INPUT_BYTES: u64 = 8 * 1024 * 1024;

pub struct GstDecoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    next_input: usize,
    next_output: usize,
    input_closed: bool,
    eos_reported: bool,
    stopped: bool,
}

impl GstDecoder {
    pub fn new(config: &DecoderConfig) -> EditResult<Self> {
        let input_caps = caps_from_format(&config.format)?;
        let pipeline = gst::Pipeline::new();

        let appsrc = gst_app::AppSrc::builder()
            .name("decoder-input")
            .caps(&input_caps)
            .format(gst::Format::Time)
            .is_live(false)
            .stream_type(gst_app::AppStreamType::Stream)
            .max_bytes(MAX_QUEUED_INPUT_BYTES)
            .block(false)
            .build();
        let decodebin = make_element("decodebin")?;
        let convert = make_element("videoconvert")?;
        let scale = gst::ElementFactory::make("videoscale")
            .property("add-borders", false)
            .build()
            .map_err(|e| EditError::codec(format!("Failed to create videoscale: {e}")))?;

        let mut output_caps = gst::Caps::builder("video/x-raw").field("format", "RGBA");
        if let Some((width, height)) = config.output_size() {
            output_caps = output_caps
                .field("width", width as i32)
                .field("height", height as i32);
        }
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", output_caps.build())
            .build()
            .map_err(|e| EditError::codec(format!("Failed to create capsfilter: {e}")))?;
        let appsink = gst_app::AppSink::builder()
            .name("decoder-output")
            .sync(false)
            .build();

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &decodebin,
                &convert,
                &scale,
                &capsfilter,
                appsink.upcast_ref(),
            ])
            .map_err(|e| EditError::codec(format!("Failed to add decoder elements: {e}")))?;
        appsrc
            .link(&decodebin)
            .map_err(|e| EditError::codec(format!("Failed to link decoder input: {e}")))?;
        gst::Element::link_many([&convert, &scale, &capsfilter, appsink.upcast_ref()])
            .map_err(|e| EditError::codec(format!("Failed to link decoder output: {e}")))?;

        let convert_weak = convert.downgrade();
        decodebin.connect_pad_added(move |_decodebin, src_pad| {
            let Some(convert) = convert_weak.upgrade() else {
                return;
            };
            let Some(sink_pad) = convert.static_pad("sink") else {
                return;
            };
            if sink_pad.is_linked() {
                return;
            }
            if let Err(e) = src_pad.link(&sink_pad) {
                tracing::warn!(error = ?e, "Failed to link decoded pad");
            }
        });

        tracing::debug!(
            mime = %config.format.mime,
            output_size = ?config.output_size(),
            "Decoder created"
        );
        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            next_input: 0,
            next_output: 0,
            input_closed: false,
            eos_reported: false,
            stopped: false,
        })
    }

    fn check_running(&self) -> EditResult<()> {
        if self.stopped {
            return Err(EditError::codec("decoder used after stop"));
        }
        poll_bus_error(&self.pipeline, "decoder")
    }
}

impl VideoDecoder for GstDecoder {
    fn start(&mut self) -> EditResult<()> {
        set_state(&self.pipeline, gst::State::Playing, "decoder")
    }

    fn try_dequeue_input(&mut self) -> EditResult<Option<InputSlot>> {
        self.check_running()?;
        if self.input_closed || self.appsrc.current_level_bytes() >= MAX_QUEUED_INPUT_BYTES {
            return Ok(None);
        }
        let slot = InputSlot(self.next_input);
        self.next_input += 1;
        Ok(Some(slot))
    }

    fn queue_input(&mut self, _slot: InputSlot, sample: &Sample) -> EditResult<()> {
        let buffer = buffer_at(sample.data.clone(), sample.pts_us, sample.is_sync);
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| EditError::codec(format!("Decoder rejected input: {e:?}")))
    }

    fn queue_end_of_stream(&mut self, _slot: InputSlot) -> EditResult<()> {
        self.input_closed = true;
        self.appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| EditError::codec(format!("Decoder rejected end of stream: {e:?}")))
    }

    fn try_dequeue_output(&mut self) -> EditResult<Option<DecodedBuffer>> {
        self.check_running()?;
        if self.eos_reported {
            return Ok(None);
        }
        let index = self.next_output;
        match self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
            Some(sample) => {
                self.next_output += 1;
                let pts_us = clock_to_us(sample.buffer().and_then(|b| b.pts()));
                Ok(Some(DecodedBuffer {
                    index,
                    pts_us,
                    flags: ChunkFlags::NONE,
                    frame: Some(frame_from_sample(&sample)?),
                }))
            }
            None if self.appsink.is_eos() => {
                self.eos_reported = true;
                self.next_output += 1;
                Ok(Some(DecodedBuffer {
                    index,
                    pts_us: 0,
                    flags: ChunkFlags::END_OF_STREAM,
                    frame: None,
                }))
            }
            None => Ok(None),
        }
    }

    fn release_output(&mut self, _index: usize, _rendered: bool) -> EditResult<()> {
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}

impl Drop for GstDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Copy an RGBA sample into a tightly packed frame.
fn frame_from_sample(sample: &gst::Sample) -> EditResult<VideoFrame> {
    let caps = sample
        .caps()
        .ok_or_else(|| EditError::codec("decoded sample without caps"))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| EditError::codec(format!("Unusable decoded caps: {e}")))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| EditError::codec("decoded sample without buffer"))?;
    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|e| EditError::codec(format!("Failed to map decoded frame: {e}")))?;

    let (width, height) = (info.width(), info.height());
    let stride = frame.plane_stride()[0] as usize;
    let plane = frame
        .plane_data(0)
        .map_err(|e| EditError::codec(format!("Failed to read decoded plane: {e}")))?;
    let row_bytes = width as usize * RGBA_BYTES;
    let mut data = Vec::with_capacity(row_bytes * height as usize);
    for row in plane.chunks(stride).take(height as usize) {
        data.extend_from_slice(&row[..row_bytes]);
    }
    VideoFrame::new(width, height, data).map_err(|e| EditError::codec(e.to_string()))
}
