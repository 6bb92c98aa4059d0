//! MP4 writing through `mp4mux`.

use std::path::{Path, PathBuf};

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{ChunkFlags, MediaType, TrackFormat};

use super::{buffer_at, caps_from_format, make_element, set_state, us_to_clock};
use crate::codec::{MuxTrackId, Muxer};

/// Longest wait for the muxer to write its trailer.
const FINALIZE_TIMEOUT_SECS: u64 = 30;

pub struct GstMuxer {
    path: PathBuf,
    pipeline: gst::Pipeline,
    mux: gst::Element,
    sources: Vec<gst_app::AppSrc>,
    started: bool,
}

impl GstMuxer {
    pub fn new(path: &Path) -> EditResult<Self> {
        let pipeline = gst::Pipeline::new();
        let mux = make_element("mp4mux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(|e| EditError::codec(format!("Failed to create filesink: {e}")))?;

        pipeline
            .add_many([&mux, &filesink])
            .map_err(|e| EditError::codec(format!("Failed to add muxer elements: {e}")))?;
        mux.link(&filesink)
            .map_err(|e| EditError::codec(format!("Failed to link muxer to filesink: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
            mux,
            sources: Vec::new(),
            started: false,
        })
    }

    fn shutdown(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Muxer for GstMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> EditResult<MuxTrackId> {
        if self.started {
            return Err(EditError::codec("muxer tracks must be added before start"));
        }
        let template = match format.media_type() {
            MediaType::Video => "video_%u",
            MediaType::Audio => "audio_%u",
            MediaType::Other => {
                return Err(EditError::codec(format!(
                    "cannot mux a {} track",
                    format.mime
                )))
            }
        };

        let id = MuxTrackId(self.sources.len());
        let appsrc = gst_app::AppSrc::builder()
            .name(format!("mux-input-{}", id.0))
            .caps(&caps_from_format(format)?)
            .format(gst::Format::Time)
            .is_live(false)
            .stream_type(gst_app::AppStreamType::Stream)
            .max_bytes(0)
            .block(false)
            .build();
        self.pipeline
            .add(&appsrc)
            .map_err(|e| EditError::codec(format!("Failed to add muxer input: {e}")))?;

        let sink_pad = self
            .mux
            .request_pad_simple(template)
            .ok_or_else(|| EditError::codec(format!("mp4mux refused a {} pad", format.mime)))?;
        let src_pad = appsrc
            .static_pad("src")
            .ok_or_else(|| EditError::codec("app source without src pad"))?;
        src_pad
            .link(&sink_pad)
            .map_err(|e| EditError::codec(format!("Failed to link {} track: {e:?}", format.mime)))?;

        tracing::debug!(track = id.0, mime = %format.mime, "Muxer track added");
        self.sources.push(appsrc);
        Ok(id)
    }

    fn start(&mut self) -> EditResult<()> {
        set_state(&self.pipeline, gst::State::Playing, "muxer")?;
        self.started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: MuxTrackId,
        data: &[u8],
        pts_us: i64,
        flags: ChunkFlags,
    ) -> EditResult<()> {
        let appsrc = self
            .sources
            .get(track.0)
            .ok_or_else(|| EditError::codec(format!("unknown muxer track {}", track.0)))?;
        let mut buffer = buffer_at(data.to_vec(), pts_us, flags.key_frame);
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_dts(us_to_clock(pts_us));
        }
        appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| EditError::codec(format!("Muxer rejected sample: {e:?}")))
    }

    fn finish(self: Box<Self>) -> EditResult<()> {
        for appsrc in &self.sources {
            if let Err(e) = appsrc.end_of_stream() {
                tracing::warn!(error = ?e, "Failed to send EOS to muxer input");
            }
        }

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| EditError::codec("muxer pipeline has no bus"))?;
        let mut outcome = Err(EditError::codec(format!(
            "muxer did not finish within {FINALIZE_TIMEOUT_SECS}s"
        )));
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS)) {
            match msg.view() {
                gst::MessageView::Eos(_) => {
                    outcome = Ok(());
                    break;
                }
                gst::MessageView::Error(err) => {
                    outcome = Err(EditError::codec(format!(
                        "muxer: {} ({:?})",
                        err.error(),
                        err.debug()
                    )));
                    break;
                }
                _ => {}
            }
        }
        self.shutdown();
        if outcome.is_ok() {
            tracing::debug!(path = %self.path.display(), "Muxer finalized");
        }
        outcome
    }

    fn abort(self: Box<Self>) {
        tracing::debug!(path = %self.path.display(), "Muxer aborted");
        self.shutdown();
    }
}

impl Drop for GstMuxer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
