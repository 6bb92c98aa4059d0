//! Codec backends implementing the [`crate::codec`] traits.

pub mod gst;

pub use self::gst::GstBackend;
