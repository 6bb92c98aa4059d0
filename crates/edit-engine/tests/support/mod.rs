//! In-memory media backend that records every resource it hands out.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use squarecut_common::{EditError, EditResult};
use squarecut_edit_engine::codec::{
    DecodedBuffer, DecoderConfig, Demuxer, EncodedPacket, EncoderConfig, EncoderOutput,
    EncoderSurface, HardwareEncoder, InputSlot, MediaBackend, MuxTrackId, Muxer, SeekMode,
    VideoDecoder,
};
use squarecut_edit_engine::CancelToken;
use squarecut_media_model::{ChunkFlags, MediaTrack, Sample, TrackFormat, VideoFrame};

pub const FPS: i64 = 30;
pub const FRAME_US: i64 = 1_000_000 / FPS;
pub const AUDIO_RATE: i64 = 48_000;
pub const AUDIO_FRAME: i64 = 1024;

/// Everything the fakes did, in order.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    inner: Arc<Mutex<LedgerInner>>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    events: Vec<String>,
    submitted_sizes: Vec<(u32, u32)>,
}

impl Ledger {
    pub fn record(&self, event: impl Into<String>) {
        self.inner.lock().unwrap().events.push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| *e == event)
            .count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .position(|e| e == event)
    }

    pub fn submitted_sizes(&self) -> Vec<(u32, u32)> {
        self.inner.lock().unwrap().submitted_sizes.clone()
    }

    fn record_frame(&self, width: u32, height: u32) {
        self.inner.lock().unwrap().submitted_sizes.push((width, height));
    }
}

/// A synthetic source file: tracks plus their samples.
#[derive(Debug, Clone)]
pub struct FakeSource {
    pub tracks: Vec<MediaTrack>,
    pub samples: BTreeMap<usize, Vec<Sample>>,
}

impl FakeSource {
    /// 30 fps video with a sync sample every second.
    pub fn video(width: u32, height: u32, duration_secs: f64) -> Self {
        let mut source = Self {
            tracks: Vec::new(),
            samples: BTreeMap::new(),
        };
        let index = source.tracks.len();
        let frames = (duration_secs * FPS as f64).round() as i64;
        let samples = (0..frames)
            .map(|k| Sample::new(index, vec![k as u8; 32], k * 1_000_000 / FPS, k % FPS == 0))
            .collect();
        source.tracks.push(MediaTrack::new(
            index,
            TrackFormat::new("video/avc", "fake/avc").with_size(width, height),
        ));
        source.samples.insert(index, samples);
        source
    }

    /// Only an audio track.
    pub fn audio_only(duration_secs: f64) -> Self {
        Self {
            tracks: Vec::new(),
            samples: BTreeMap::new(),
        }
        .with_audio(duration_secs)
    }

    /// Add 48 kHz AAC-like audio with 1024-sample frames.
    pub fn with_audio(mut self, duration_secs: f64) -> Self {
        let index = self.tracks.len();
        let end_us = (duration_secs * 1_000_000.0) as i64;
        let samples = (0..)
            .map(|n: i64| n * AUDIO_FRAME * 1_000_000 / AUDIO_RATE)
            .take_while(|pts| *pts < end_us)
            .map(|pts| Sample::new(index, vec![0xaa; 8], pts, true))
            .collect();
        self.tracks.push(MediaTrack::new(
            index,
            TrackFormat::new("audio/mp4a-latm", "fake/aac").with_audio(AUDIO_RATE as u32, 2),
        ));
        self.samples.insert(index, samples);
        self
    }

    /// Add a subtitle-like track the pipeline must ignore.
    pub fn with_other_track(mut self) -> Self {
        let index = self.tracks.len();
        self.tracks
            .push(MediaTrack::new(index, TrackFormat::new("text/x-subtitle", "fake/text")));
        self.samples.insert(index, Vec::new());
        self
    }

    /// Tag the video track as displayed rotated.
    pub fn rotated(mut self, degrees: u32) -> Self {
        for track in &mut self.tracks {
            if track.format.mime.starts_with("video/") {
                track.format = track.format.clone().with_rotation(degrees);
            }
        }
        self
    }
}

/// Fault and timing knobs.
#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    /// Frames the encoder holds back until end of input.
    pub encoder_latency: usize,
    /// The encoder never produces a packet.
    pub encoder_silent: bool,
    /// After this many packets, emit one packet whose pts goes backwards.
    pub stale_packet_after: Option<usize>,
    /// Cancel this token once this many frames reached the encoder.
    pub cancel_after_frames: Option<(usize, CancelToken)>,
    /// Fail the muxer write with this index.
    pub muxer_fails_at: Option<usize>,
    /// Cancel this token once the muxer has written this many samples.
    pub cancel_after_muxed: Option<(usize, CancelToken)>,
    /// `create_decoder` fails.
    pub decoder_create_fails: bool,
    /// The decoder is created but fails to start.
    pub decoder_start_fails: bool,
    /// The encoder is created but fails to start.
    pub encoder_start_fails: bool,
    /// The encoder starts but cannot hand out an input surface.
    pub surface_fails: bool,
}

pub struct FakeBackend {
    pub source: FakeSource,
    pub options: FakeOptions,
    pub ledger: Ledger,
}

impl FakeBackend {
    pub fn new(source: FakeSource) -> Self {
        Self::with_options(source, FakeOptions::default())
    }

    pub fn with_options(source: FakeSource, options: FakeOptions) -> Self {
        Self {
            source,
            options,
            ledger: Ledger::default(),
        }
    }
}

impl MediaBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn open_demuxer(&self, _source: &Path) -> EditResult<Box<dyn Demuxer>> {
        self.ledger.record("demuxer.open");
        Ok(Box::new(FakeDemuxer {
            source: self.source.clone(),
            cursor: BTreeMap::new(),
            selected: BTreeSet::new(),
            ledger: self.ledger.clone(),
        }))
    }

    fn create_decoder(&self, config: &DecoderConfig) -> EditResult<Box<dyn VideoDecoder>> {
        self.ledger.record("decoder.create");
        if self.options.decoder_create_fails {
            return Err(EditError::codec("fake decoder unavailable"));
        }
        Ok(Box::new(FakeDecoder {
            output_size: config.output_size().unwrap_or((16, 16)),
            outputs: VecDeque::new(),
            next_index: 0,
            input_closed: false,
            start_fails: self.options.decoder_start_fails,
            ledger: self.ledger.clone(),
        }))
    }

    fn create_encoder(&self, config: &EncoderConfig) -> EditResult<Box<dyn HardwareEncoder>> {
        self.ledger.record("encoder.create");
        Ok(Box::new(FakeEncoder {
            config: config.clone(),
            state: Rc::new(RefCell::new(EncoderState::default())),
            options: self.options.clone(),
            ledger: self.ledger.clone(),
        }))
    }

    fn create_muxer(&self, output: &Path) -> EditResult<Box<dyn Muxer>> {
        self.ledger.record("muxer.create");
        std::fs::write(output, b"incomplete")?;
        Ok(Box::new(FakeMuxer {
            path: output.to_path_buf(),
            file: MuxedFile::default(),
            fails_at: self.options.muxer_fails_at,
            cancel_after: self.options.cancel_after_muxed.clone(),
            ledger: self.ledger.clone(),
        }))
    }
}

struct FakeDemuxer {
    source: FakeSource,
    cursor: BTreeMap<usize, usize>,
    selected: BTreeSet<usize>,
    ledger: Ledger,
}

impl Demuxer for FakeDemuxer {
    fn tracks(&self) -> &[MediaTrack] {
        &self.source.tracks
    }

    fn select_track(&mut self, index: usize) -> EditResult<()> {
        self.ledger.record(format!("demuxer.select:{index}"));
        self.selected.insert(index);
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> EditResult<()> {
        self.ledger.record(format!("demuxer.unselect:{index}"));
        self.selected.remove(&index);
        Ok(())
    }

    fn seek_to(&mut self, pts_us: i64, mode: SeekMode) -> EditResult<()> {
        self.ledger.record("demuxer.seek");
        for (track, samples) in &self.source.samples {
            let syncs = samples.iter().enumerate().filter(|(_, s)| s.is_sync);
            let landing = match mode {
                SeekMode::ClosestSync => syncs
                    .min_by_key(|(_, s)| ((s.pts_us - pts_us).abs(), s.pts_us))
                    .map(|(i, _)| i),
                SeekMode::PreviousSync => syncs
                    .filter(|(_, s)| s.pts_us <= pts_us)
                    .last()
                    .map(|(i, _)| i),
            };
            self.cursor.insert(*track, landing.unwrap_or(0));
        }
        Ok(())
    }

    fn read_sample(&mut self) -> EditResult<Option<Sample>> {
        let next = self
            .selected
            .iter()
            .filter_map(|track| {
                let at = self.cursor.get(track).copied().unwrap_or(0);
                self.source.samples.get(track)?.get(at).map(|s| (*track, s.pts_us))
            })
            .min_by_key(|(_, pts)| *pts);
        let Some((track, _)) = next else {
            return Ok(None);
        };
        let at = self.cursor.entry(track).or_insert(0);
        let sample = self.source.samples[&track][*at].clone();
        *at += 1;
        Ok(Some(sample))
    }

    fn release(&mut self) {
        self.ledger.record("demuxer.release");
    }
}

const DECODER_SLOTS: usize = 4;

struct FakeDecoder {
    output_size: (u32, u32),
    outputs: VecDeque<DecodedBuffer>,
    next_index: usize,
    input_closed: bool,
    start_fails: bool,
    ledger: Ledger,
}

impl VideoDecoder for FakeDecoder {
    fn start(&mut self) -> EditResult<()> {
        self.ledger.record("decoder.start");
        if self.start_fails {
            return Err(EditError::codec("fake decoder refused to start"));
        }
        Ok(())
    }

    fn try_dequeue_input(&mut self) -> EditResult<Option<InputSlot>> {
        if self.input_closed || self.outputs.len() >= DECODER_SLOTS {
            return Ok(None);
        }
        Ok(Some(InputSlot(self.next_index)))
    }

    fn queue_input(&mut self, _slot: InputSlot, sample: &Sample) -> EditResult<()> {
        let (w, h) = self.output_size;
        let shade = (sample.pts_us / FRAME_US) as u8;
        self.outputs.push_back(DecodedBuffer {
            index: self.next_index,
            pts_us: sample.pts_us,
            flags: ChunkFlags::NONE,
            frame: Some(VideoFrame::filled(w, h, [shade, 0, 0, 255])),
        });
        self.next_index += 1;
        Ok(())
    }

    fn queue_end_of_stream(&mut self, _slot: InputSlot) -> EditResult<()> {
        self.input_closed = true;
        self.outputs.push_back(DecodedBuffer {
            index: self.next_index,
            pts_us: 0,
            flags: ChunkFlags::END_OF_STREAM,
            frame: None,
        });
        self.next_index += 1;
        Ok(())
    }

    fn try_dequeue_output(&mut self) -> EditResult<Option<DecodedBuffer>> {
        Ok(self.outputs.pop_front())
    }

    fn release_output(&mut self, _index: usize, _rendered: bool) -> EditResult<()> {
        Ok(())
    }

    fn stop(&mut self) {
        self.ledger.record("decoder.stop");
    }
}

#[derive(Debug, Default)]
struct EncoderState {
    queued: VecDeque<i64>,
    produced: usize,
    end_of_input: bool,
    format_sent: bool,
    stale_sent: bool,
}

struct FakeEncoder {
    config: EncoderConfig,
    state: Rc<RefCell<EncoderState>>,
    options: FakeOptions,
    ledger: Ledger,
}

impl HardwareEncoder for FakeEncoder {
    fn start(&mut self) -> EditResult<()> {
        self.ledger.record("encoder.start");
        if self.options.encoder_start_fails {
            return Err(EditError::codec("fake encoder refused to start"));
        }
        Ok(())
    }

    fn create_input_surface(&mut self) -> EditResult<Box<dyn EncoderSurface>> {
        if self.options.surface_fails {
            return Err(EditError::codec("fake encoder has no input surface"));
        }
        Ok(Box::new(FakeSurface {
            state: self.state.clone(),
            submitted: 0,
            cancel_after: self.options.cancel_after_frames.clone(),
            ledger: self.ledger.clone(),
        }))
    }

    fn try_dequeue_output(&mut self) -> EditResult<EncoderOutput> {
        let mut state = self.state.borrow_mut();
        if self.options.encoder_silent {
            state.queued.clear();
        }
        let ready = state.end_of_input || state.queued.len() > self.options.encoder_latency;
        if !ready || state.queued.is_empty() {
            return Ok(if state.end_of_input && state.queued.is_empty() {
                EncoderOutput::EndOfStream
            } else {
                EncoderOutput::TryAgainLater
            });
        }
        if !state.format_sent {
            state.format_sent = true;
            return Ok(EncoderOutput::FormatChanged(
                TrackFormat::new(self.config.mime.clone(), "fake/avc-out")
                    .with_size(self.config.width, self.config.height),
            ));
        }
        if self.options.stale_packet_after == Some(state.produced) && !state.stale_sent {
            state.stale_sent = true;
            return Ok(EncoderOutput::Packet(EncodedPacket {
                data: vec![0xee],
                pts_us: 1,
                flags: ChunkFlags::NONE,
            }));
        }

        let Some(pts_us) = state.queued.pop_front() else {
            return Ok(EncoderOutput::TryAgainLater);
        };
        let key = state.produced as u32 % self.config.keyframe_interval_frames == 0;
        state.produced += 1;
        Ok(EncoderOutput::Packet(EncodedPacket {
            data: pts_us.to_le_bytes().to_vec(),
            pts_us,
            flags: if key { ChunkFlags::KEY_FRAME } else { ChunkFlags::NONE },
        }))
    }

    fn signal_end_of_input(&mut self) -> EditResult<()> {
        self.ledger.record("encoder.end_of_input");
        self.state.borrow_mut().end_of_input = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.ledger.record("encoder.stop");
    }
}

struct FakeSurface {
    state: Rc<RefCell<EncoderState>>,
    submitted: usize,
    cancel_after: Option<(usize, CancelToken)>,
    ledger: Ledger,
}

impl EncoderSurface for FakeSurface {
    fn submit_frame(&mut self, frame: &VideoFrame, pts_us: i64) -> EditResult<()> {
        self.ledger.record_frame(frame.width(), frame.height());
        self.state.borrow_mut().queued.push_back(pts_us);
        self.submitted += 1;
        if let Some((after, token)) = &self.cancel_after {
            if self.submitted >= *after {
                token.cancel();
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        self.ledger.record("surface.release");
    }
}

/// What the fake muxer writes on finish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MuxedFile {
    pub tracks: Vec<MuxedTrack>,
    pub samples: Vec<MuxedSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxedTrack {
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxedSample {
    pub track: usize,
    pub pts_us: i64,
    pub key_frame: bool,
}

impl MuxedFile {
    pub fn read(path: &Path) -> Self {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    pub fn pts_of(&self, track: usize) -> Vec<i64> {
        self.samples
            .iter()
            .filter(|s| s.track == track)
            .map(|s| s.pts_us)
            .collect()
    }
}

struct FakeMuxer {
    path: PathBuf,
    file: MuxedFile,
    fails_at: Option<usize>,
    cancel_after: Option<(usize, CancelToken)>,
    ledger: Ledger,
}

impl Muxer for FakeMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> EditResult<MuxTrackId> {
        self.file.tracks.push(MuxedTrack {
            mime: format.mime.clone(),
            width: format.width,
            height: format.height,
        });
        Ok(MuxTrackId(self.file.tracks.len() - 1))
    }

    fn start(&mut self) -> EditResult<()> {
        self.ledger.record("muxer.start");
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: MuxTrackId,
        _data: &[u8],
        pts_us: i64,
        flags: ChunkFlags,
    ) -> EditResult<()> {
        if self.fails_at == Some(self.file.samples.len()) {
            return Err(EditError::codec("fake muxer out of space"));
        }
        self.file.samples.push(MuxedSample {
            track: track.0,
            pts_us,
            key_frame: flags.key_frame,
        });
        if let Some((after, token)) = &self.cancel_after {
            if self.file.samples.len() >= *after {
                token.cancel();
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> EditResult<()> {
        std::fs::write(&self.path, serde_json::to_vec(&self.file)?)?;
        self.ledger.record("muxer.finish");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        self.ledger.record("muxer.abort");
    }
}
