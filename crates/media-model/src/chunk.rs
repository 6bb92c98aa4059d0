//! Encoded output chunks.

use serde::{Deserialize, Serialize};

/// Flags attached to an encoded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkFlags {
    pub key_frame: bool,
    pub end_of_stream: bool,
}

impl ChunkFlags {
    pub const NONE: ChunkFlags = ChunkFlags {
        key_frame: false,
        end_of_stream: false,
    };

    pub const KEY_FRAME: ChunkFlags = ChunkFlags {
        key_frame: true,
        end_of_stream: false,
    };

    pub const END_OF_STREAM: ChunkFlags = ChunkFlags {
        key_frame: false,
        end_of_stream: true,
    };

    pub fn is_none(&self) -> bool {
        !self.key_frame && !self.end_of_stream
    }
}

/// A view of one encoded chunk.
///
/// The bytes are borrowed from whoever stores the chunk (normally the ring
/// buffer) and are only valid for that borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedChunk<'a> {
    pub data: &'a [u8],
    pub pts_us: i64,
    pub flags: ChunkFlags,
}

impl<'a> EncodedChunk<'a> {
    pub fn new(data: &'a [u8], pts_us: i64, flags: ChunkFlags) -> Self {
        Self {
            data,
            pts_us,
            flags,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
