//! H.264 encoding through an app source fed with composited frames.

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use squarecut_common::clock::frame_interval_us;
use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{ChunkFlags, VideoFrame};

use super::{
    buffer_at, clock_to_us, format_from_caps, make_element, poll_bus_error, set_state,
    us_to_clock,
};
use crate::codec::{EncodedPacket, EncoderConfig, EncoderOutput, EncoderSurface, HardwareEncoder};

pub struct GstEncoder {
    config: EncoderConfig,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    surface_created: bool,
    format_reported: bool,
    pending: Option<EncodedPacket>,
    end_of_stream: bool,
    stopped: bool,
}

impl GstEncoder {
    pub fn new(config: &EncoderConfig) -> EditResult<Self> {
        let pipeline = gst::Pipeline::new();
        let input_caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", config.width as i32)
            .field("height", config.height as i32)
            .field("framerate", gst::Fraction::new(config.fps as i32, 1))
            .build();

        let appsrc = gst_app::AppSrc::builder()
            .name("encoder-input")
            .caps(&input_caps)
            .format(gst::Format::Time)
            .is_live(false)
            .stream_type(gst_app::AppStreamType::Stream)
            .block(false)
            .build();
        let convert = make_element("videoconvert")?;
        let encoder = make_element(&config.element)?;
        configure_encoder(&encoder, config);
        let parser = make_element("h264parse")?;
        let output_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au")
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", output_caps)
            .build()
            .map_err(|e| EditError::codec(format!("Failed to create capsfilter: {e}")))?;
        let appsink = gst_app::AppSink::builder()
            .name("encoder-output")
            .sync(false)
            .build();

        let elements = [
            appsrc.upcast_ref(),
            &convert,
            &encoder,
            &parser,
            &capsfilter,
            appsink.upcast_ref(),
        ];
        pipeline
            .add_many(elements)
            .map_err(|e| EditError::codec(format!("Failed to add encoder elements: {e}")))?;
        gst::Element::link_many(elements)
            .map_err(|e| EditError::codec(format!("Failed to link encoder elements: {e}")))?;

        tracing::debug!(
            element = %config.element,
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate_bps = config.bitrate_bps,
            "Encoder created"
        );
        Ok(Self {
            config: config.clone(),
            pipeline,
            appsrc,
            appsink,
            surface_created: false,
            format_reported: false,
            pending: None,
            end_of_stream: false,
            stopped: false,
        })
    }
}

/// Apply bitrate, keyframe interval and quality to whichever of the usual
/// property names the element has.
fn configure_encoder(encoder: &gst::Element, config: &EncoderConfig) {
    let has = |name: &str| encoder.find_property(name).is_some();
    let kbps = (config.bitrate_bps / 1000).max(1).to_string();
    let keyframes = config.keyframe_interval_frames.to_string();

    if has("bitrate") {
        encoder.set_property_from_str("bitrate", &kbps);
    }
    if has("key-int-max") {
        encoder.set_property_from_str("key-int-max", &keyframes);
    } else if has("gop-size") {
        encoder.set_property_from_str("gop-size", &keyframes);
    }
    if has("quantizer") {
        encoder.set_property_from_str("quantizer", &config.quality.to_string());
    }

    let is_x264 = encoder
        .factory()
        .is_some_and(|factory| factory.name().as_str() == "x264enc");
    if is_x264 {
        encoder.set_property_from_str("tune", "zerolatency");
        encoder.set_property_from_str("speed-preset", "veryfast");
    }
}

impl HardwareEncoder for GstEncoder {
    fn start(&mut self) -> EditResult<()> {
        set_state(&self.pipeline, gst::State::Playing, "encoder")
    }

    fn create_input_surface(&mut self) -> EditResult<Box<dyn EncoderSurface>> {
        if self.surface_created {
            return Err(EditError::codec("encoder input surface already created"));
        }
        self.surface_created = true;
        Ok(Box::new(GstEncoderSurface {
            appsrc: Some(self.appsrc.clone()),
            frame_duration: us_to_clock(frame_interval_us(self.config.fps)),
        }))
    }

    fn try_dequeue_output(&mut self) -> EditResult<EncoderOutput> {
        if self.stopped {
            return Err(EditError::codec("encoder used after stop"));
        }
        poll_bus_error(&self.pipeline, "encoder")?;
        if let Some(packet) = self.pending.take() {
            return Ok(EncoderOutput::Packet(packet));
        }
        if self.end_of_stream {
            return Ok(EncoderOutput::EndOfStream);
        }

        match self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
            Some(sample) => {
                let packet = packet_from_sample(&sample)?;
                if self.format_reported {
                    return Ok(EncoderOutput::Packet(packet));
                }
                self.format_reported = true;
                self.pending = Some(packet);
                let caps = sample
                    .caps()
                    .ok_or_else(|| EditError::codec("encoded sample without caps"))?;
                let format = format_from_caps(caps).with_size(self.config.width, self.config.height);
                Ok(EncoderOutput::FormatChanged(format))
            }
            None if self.appsink.is_eos() => {
                self.end_of_stream = true;
                Ok(EncoderOutput::EndOfStream)
            }
            None => Ok(EncoderOutput::TryAgainLater),
        }
    }

    fn signal_end_of_input(&mut self) -> EditResult<()> {
        self.appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| EditError::codec(format!("Encoder rejected end of stream: {e:?}")))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn packet_from_sample(sample: &gst::Sample) -> EditResult<EncodedPacket> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| EditError::codec("encoded sample without buffer"))?;
    let map = buffer
        .map_readable()
        .map_err(|e| EditError::codec(format!("Failed to map encoded buffer: {e}")))?;
    let flags = if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
        ChunkFlags::NONE
    } else {
        ChunkFlags::KEY_FRAME
    };
    Ok(EncodedPacket {
        data: map.as_slice().to_vec(),
        pts_us: clock_to_us(buffer.pts()),
        flags,
    })
}

/// Pushes composited frames into the encoder's app source.
struct GstEncoderSurface {
    appsrc: Option<gst_app::AppSrc>,
    frame_duration: gst::ClockTime,
}

impl EncoderSurface for GstEncoderSurface {
    fn submit_frame(&mut self, frame: &VideoFrame, pts_us: i64) -> EditResult<()> {
        let appsrc = self
            .appsrc
            .as_ref()
            .ok_or_else(|| EditError::codec("encoder surface used after release"))?;
        let mut buffer = buffer_at(frame.as_bytes().to_vec(), pts_us, true);
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_duration(self.frame_duration);
        }
        appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| EditError::codec(format!("Encoder rejected frame: {e:?}")))
    }

    fn release(&mut self) {
        self.appsrc = None;
    }
}
