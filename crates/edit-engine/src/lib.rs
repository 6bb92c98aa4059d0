//! Squarecut Edit Engine
//!
//! Trims a source video to a time window, crops it to a square, re-encodes
//! the picture and copies the audio untouched into a new MP4.
//!
//! # Pipeline Architecture
//!
//! ```text
//! source.mp4 ── Demuxer ── Decoder ── Compositor (crop/scale/rotate)
//!                  │                        │
//!                  │                        ▼
//!                  │              Encoder ── Ring Buffer
//!                  │                              │
//!                  └── audio samples ─────────┐   │ monotonic filter
//!                                             ▼   ▼
//!                                             Muxer ──▶ output.mp4
//! ```
//!
//! Every codec resource is owned by one worker thread from creation to
//! release. The codec driver busy-polls the decoder and encoder with
//! zero-timeout queries and checks the [`CancelToken`] on every iteration.

pub mod backend;
pub mod cancel;
pub mod codec;
pub mod compositor;
pub mod driver;
pub mod editor;
pub mod encoder;
pub mod lifecycle;
pub mod mux_stage;
pub mod ring_buffer;
pub mod track_select;

pub use cancel::CancelToken;
pub use editor::*;
