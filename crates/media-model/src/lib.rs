//! squarecut Media Model
//!
//! Defines the data contracts passed between the edit pipeline stages:
//! - **Tracks:** Demuxer tracks, their media type and opaque codec format
//! - **Time ranges:** The trim window, in seconds and microseconds
//! - **Crop:** Source-pixel crop rectangles and the square output region
//! - **Samples / chunks:** Compressed input samples and encoded output chunks
//! - **Frames:** Decoded RGBA images handed to the compositor
//!
//! Timestamps are microseconds relative to the start of the source stream.

pub mod chunk;
pub mod crop;
pub mod error;
pub mod frame;
pub mod sample;
pub mod time_range;
pub mod track;

pub use chunk::*;
pub use crop::*;
pub use error::*;
pub use frame::*;
pub use sample::*;
pub use time_range::*;
pub use track::*;
