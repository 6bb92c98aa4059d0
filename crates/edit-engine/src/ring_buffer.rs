//! Fixed-capacity store for encoded chunks.
//!
//! The encoder writes into the ring as fast as it produces output; the muxer
//! stage reads it back oldest-first once encoding is over. When the ring is
//! full the oldest chunk is overwritten, so a long source keeps only the most
//! recent `capacity` chunks.

use squarecut_media_model::{ChunkFlags, EncodedChunk};

#[derive(Debug, Default)]
struct Slot {
    data: Vec<u8>,
    pts_us: i64,
    flags: ChunkFlags,
}

/// Circular buffer of encoded chunks with per-slot byte storage.
///
/// Slot allocations are reused across overwrites.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Vec<Slot>,
    /// Index the next push writes to.
    head: usize,
    len: usize,
    overwritten: u64,
}

impl RingBuffer {
    /// Create a ring holding at most `capacity` chunks (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            slots,
            head: 0,
            len: 0,
            overwritten: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chunks lost to overwriting since creation.
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Store a copy of `data`. Returns the pts of the chunk that was evicted,
    /// if the ring was full.
    pub fn push(&mut self, data: &[u8], pts_us: i64, flags: ChunkFlags) -> Option<i64> {
        let capacity = self.capacity();
        let slot = &mut self.slots[self.head];
        let evicted = if self.len == capacity {
            self.overwritten += 1;
            Some(slot.pts_us)
        } else {
            self.len += 1;
            None
        };

        slot.data.clear();
        slot.data.extend_from_slice(data);
        slot.pts_us = pts_us;
        slot.flags = flags;

        self.head = (self.head + 1) % capacity;
        evicted
    }

    /// Iterate stored chunks from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = EncodedChunk<'_>> + '_ {
        let capacity = self.capacity();
        let oldest = (self.head + capacity - self.len) % capacity;
        (0..self.len).map(move |i| {
            let slot = &self.slots[(oldest + i) % capacity];
            EncodedChunk::new(&slot.data, slot.pts_us, slot.flags)
        })
    }
}

/// Iterator adapter that drops chunks whose pts goes backwards.
///
/// The cursor starts at zero: a chunk is kept when its pts is at least the
/// pts of the last kept chunk, so the output is non-decreasing. Chunks with
/// negative timestamps are always dropped.
#[derive(Debug)]
pub struct Monotonic<I> {
    inner: I,
    last_pts_us: i64,
    discarded: usize,
}

impl<I> Monotonic<I> {
    /// How many chunks have been dropped so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

impl<'a, I> Iterator for Monotonic<I>
where
    I: Iterator<Item = EncodedChunk<'a>>,
{
    type Item = EncodedChunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for chunk in self.inner.by_ref() {
            if chunk.pts_us >= self.last_pts_us {
                self.last_pts_us = chunk.pts_us;
                return Some(chunk);
            }
            self.discarded += 1;
        }
        None
    }
}

/// Wrap `chunks` in the monotonic filter.
pub fn monotonic<'a, I>(chunks: I) -> Monotonic<I::IntoIter>
where
    I: IntoIterator<Item = EncodedChunk<'a>>,
{
    Monotonic {
        inner: chunks.into_iter(),
        last_pts_us: 0,
        discarded: 0,
    }
}
