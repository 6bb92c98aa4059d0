//! Container reading through `parsebin`.
//!
//! Tracks are discovered once by prerolling the file into fake sinks. Reads
//! run on a second pipeline that routes only the selected tracks into app
//! sinks; selecting, deselecting or seeking throws that pipeline away and the
//! next read rebuilds it at the last seek position.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use squarecut_common::{EditError, EditResult};
use squarecut_media_model::{MediaTrack, Sample};

use super::{
    format_from_caps, make_element, poll_bus_error, rotation_from_orientation, sample_from_gst,
    set_state, us_to_clock, wait_for_state,
};
use crate::codec::{Demuxer, SeekMode};

/// Longest wait for one sample before the read is treated as stalled.
const READ_TIMEOUT_SECS: u64 = 10;

/// Queue depth per app sink when only one track is read. With several
/// tracks the sinks are unbounded so a slow track cannot stall the others.
const SINGLE_TRACK_QUEUE: u32 = 64;

pub struct GstDemuxer {
    location: PathBuf,
    tracks: Vec<MediaTrack>,
    selected: BTreeSet<usize>,
    seek: Option<(i64, SeekMode)>,
    session: Option<ReadSession>,
    released: bool,
}

impl GstDemuxer {
    pub fn open(location: &Path) -> EditResult<Self> {
        if !location.exists() {
            return Err(EditError::FileNotFound {
                path: location.to_path_buf(),
            });
        }
        let tracks = probe_tracks(location)?;
        tracing::debug!(
            path = %location.display(),
            tracks = tracks.len(),
            "Demuxer opened"
        );
        Ok(Self {
            location: location.to_path_buf(),
            tracks,
            selected: BTreeSet::new(),
            seek: None,
            session: None,
            released: false,
        })
    }

    fn check_track(&self, index: usize) -> EditResult<()> {
        if self.tracks.iter().any(|t| t.index == index) {
            Ok(())
        } else {
            Err(EditError::codec(format!("no track {index} in {}", self.location.display())))
        }
    }

    fn check_open(&self) -> EditResult<()> {
        if self.released {
            return Err(EditError::codec("demuxer used after release"));
        }
        Ok(())
    }
}

impl Demuxer for GstDemuxer {
    fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> EditResult<()> {
        self.check_open()?;
        self.check_track(index)?;
        if self.selected.insert(index) {
            self.session = None;
        }
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> EditResult<()> {
        self.check_open()?;
        if self.selected.remove(&index) {
            self.session = None;
        }
        Ok(())
    }

    fn seek_to(&mut self, pts_us: i64, mode: SeekMode) -> EditResult<()> {
        self.check_open()?;
        self.seek = Some((pts_us, mode));
        self.session = None;
        Ok(())
    }

    fn read_sample(&mut self) -> EditResult<Option<Sample>> {
        self.check_open()?;
        if self.selected.is_empty() {
            return Ok(None);
        }
        if self.session.is_none() {
            self.session = Some(ReadSession::open(&self.location, &self.selected, self.seek)?);
        }
        match self.session.as_mut() {
            Some(session) => session.next_sample(),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.session = None;
        self.released = true;
    }
}

/// Build `filesrc ! parsebin` and hand every exposed pad to `make_sink`,
/// together with its position among the exposed pads.
fn build_pipeline<F>(location: &Path, make_sink: F) -> EditResult<gst::Pipeline>
where
    F: Fn(usize, &gst::Pad) -> EditResult<gst::Element> + Send + Sync + 'static,
{
    let pipeline = gst::Pipeline::new();
    let filesrc = gst::ElementFactory::make("filesrc")
        .property("location", location.to_string_lossy().to_string())
        .build()
        .map_err(|e| EditError::codec(format!("Failed to create filesrc: {e}")))?;
    let parsebin = make_element("parsebin")?;

    pipeline
        .add_many([&filesrc, &parsebin])
        .map_err(|e| EditError::codec(format!("Failed to add demux elements: {e}")))?;
    filesrc
        .link(&parsebin)
        .map_err(|e| EditError::codec(format!("Failed to link filesrc to parsebin: {e}")))?;

    let next_index = AtomicUsize::new(0);
    let pipeline_weak = pipeline.downgrade();
    parsebin.connect_pad_added(move |_parsebin, src_pad| {
        let Some(pipeline) = pipeline_weak.upgrade() else {
            return;
        };
        let index = next_index.fetch_add(1, Ordering::SeqCst);
        let sink = match make_sink(index, src_pad) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!(track = index, error = %e, "No sink for demuxed pad");
                return;
            }
        };
        if let Err(e) = pipeline.add(&sink) {
            tracing::warn!(track = index, error = %e, "Failed to add track sink");
            return;
        }
        let _ = sink.sync_state_with_parent();
        let Some(sink_pad) = sink.static_pad("sink") else {
            return;
        };
        if let Err(e) = src_pad.link(&sink_pad) {
            tracing::warn!(track = index, error = ?e, "Failed to link demuxed pad");
        }
    });

    Ok(pipeline)
}

fn fake_sink() -> EditResult<gst::Element> {
    gst::ElementFactory::make("fakesink")
        .property("sync", false)
        .build()
        .map_err(|e| EditError::codec(format!("Failed to create fakesink: {e}")))
}

/// Preroll the file once and describe every exposed stream.
fn probe_tracks(location: &Path) -> EditResult<Vec<MediaTrack>> {
    let pads: Arc<Mutex<Vec<(usize, gst::Pad)>>> = Arc::new(Mutex::new(Vec::new()));
    let found = pads.clone();
    let pipeline = build_pipeline(location, move |index, pad| {
        if let Ok(mut found) = found.lock() {
            found.push((index, pad.clone()));
        }
        fake_sink()
    })?;

    set_state(&pipeline, gst::State::Paused, "probe pipeline")?;
    let settled = wait_for_state(&pipeline, gst::State::Paused, "probe pipeline");
    let duration_us = pipeline
        .query_duration::<gst::ClockTime>()
        .map(|d| d.useconds() as i64);

    let mut tracks = Vec::new();
    if settled.is_ok() {
        let pads = pads
            .lock()
            .map_err(|_| EditError::codec("probe pad list poisoned"))?;
        for (index, pad) in pads.iter() {
            let Some(caps) = pad.current_caps() else {
                continue;
            };
            let mut format = format_from_caps(&caps);
            format.rotation_degrees = pad_rotation(pad);
            format.duration_us = duration_us;
            tracks.push(MediaTrack::new(*index, format));
        }
    }
    let _ = pipeline.set_state(gst::State::Null);
    settled?;

    tracks.sort_by_key(|t| t.index);
    Ok(tracks)
}

/// Rotation from the first `image-orientation` tag sticky on `pad`.
fn pad_rotation(pad: &gst::Pad) -> u32 {
    (0..4)
        .filter_map(|idx| pad.sticky_event::<gst::event::Tag>(idx))
        .find_map(|event| {
            event
                .tag()
                .get::<gst::tags::ImageOrientation>()
                .map(|value| rotation_from_orientation(value.get()))
        })
        .unwrap_or(0)
}

/// A running read pipeline over the selected tracks.
struct ReadSession {
    pipeline: gst::Pipeline,
    sinks: Vec<(usize, gst_app::AppSink)>,
    pending: Vec<Option<Sample>>,
    finished: Vec<bool>,
}

impl ReadSession {
    fn open(
        location: &Path,
        selected: &BTreeSet<usize>,
        seek: Option<(i64, SeekMode)>,
    ) -> EditResult<Self> {
        let sinks: Arc<Mutex<Vec<(usize, gst_app::AppSink)>>> = Arc::new(Mutex::new(Vec::new()));
        let registered = sinks.clone();
        let wanted = selected.clone();
        let queue = if wanted.len() == 1 { SINGLE_TRACK_QUEUE } else { 0 };

        let pipeline = build_pipeline(location, move |index, _pad| {
            if !wanted.contains(&index) {
                return fake_sink();
            }
            let sink = gst_app::AppSink::builder()
                .name(format!("track-{index}"))
                .sync(false)
                .max_buffers(queue)
                .build();
            if let Ok(mut registered) = registered.lock() {
                registered.push((index, sink.clone()));
            }
            Ok(sink.upcast())
        })?;

        set_state(&pipeline, gst::State::Paused, "demux pipeline")?;
        wait_for_state(&pipeline, gst::State::Paused, "demux pipeline")?;

        if let Some((pts_us, mode)) = seek {
            let snap = match mode {
                SeekMode::ClosestSync => gst::SeekFlags::SNAP_NEAREST,
                SeekMode::PreviousSync => gst::SeekFlags::SNAP_BEFORE,
            };
            pipeline
                .seek_simple(
                    gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT | snap,
                    us_to_clock(pts_us),
                )
                .map_err(|e| EditError::codec(format!("Seek to {pts_us}us failed: {e}")))?;
            wait_for_state(&pipeline, gst::State::Paused, "demux pipeline")?;
        }
        set_state(&pipeline, gst::State::Playing, "demux pipeline")?;

        let mut sinks = sinks
            .lock()
            .map_err(|_| EditError::codec("demux sink list poisoned"))?
            .clone();
        sinks.sort_by_key(|(index, _)| *index);
        let count = sinks.len();
        tracing::debug!(tracks = ?selected, sinks = count, "Demux session started");

        Ok(Self {
            pipeline,
            sinks,
            pending: vec![None; count],
            finished: vec![false; count],
        })
    }

    /// Next sample across all sinks, lowest pts first.
    fn next_sample(&mut self) -> EditResult<Option<Sample>> {
        for (slot, (index, sink)) in self.sinks.iter().enumerate() {
            if self.pending[slot].is_some() || self.finished[slot] {
                continue;
            }
            match sink.try_pull_sample(gst::ClockTime::from_seconds(READ_TIMEOUT_SECS)) {
                Some(sample) => self.pending[slot] = Some(sample_from_gst(*index, &sample)?),
                None if sink.is_eos() => self.finished[slot] = true,
                None => {
                    poll_bus_error(&self.pipeline, "demuxer")?;
                    return Err(EditError::codec(format!(
                        "timed out reading track {index}"
                    )));
                }
            }
        }

        let earliest = self
            .pending
            .iter()
            .enumerate()
            .filter_map(|(slot, sample)| sample.as_ref().map(|s| (slot, s.pts_us)))
            .min_by_key(|(_, pts)| *pts)
            .map(|(slot, _)| slot);
        Ok(earliest.and_then(|slot| self.pending[slot].take()))
    }
}

impl Drop for ReadSession {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
