//! Compressed samples read from a demuxer.

/// One compressed sample (access unit) of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Track the sample belongs to.
    pub track_index: usize,

    /// Compressed payload.
    pub data: Vec<u8>,

    /// Presentation time in microseconds.
    pub pts_us: i64,

    /// Whether decoding can start at this sample.
    pub is_sync: bool,
}

impl Sample {
    pub fn new(track_index: usize, data: Vec<u8>, pts_us: i64, is_sync: bool) -> Self {
        Self {
            track_index,
            data,
            pts_us,
            is_sync,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
