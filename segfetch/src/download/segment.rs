//! Byte-range segments and the cursor that hands them out.

use crate::error::{FetchError, FetchResult};
use crate::store::ByteRange;

/// Completion state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Created, fetch not finished.
    Pending,
    /// Buffer holds exactly `len()` bytes of the object.
    Complete,
    /// The fetch gave up.
    Failed,
}

/// One contiguous range of the object and the buffer it is fetched into.
///
/// The buffer is sized to the range exactly. A segment leaves `Pending`
/// exactly once; [`reset`](Segment::reset) re-arms it for a new range.
#[derive(Debug)]
pub struct Segment {
    start: u64,
    buffer: Vec<u8>,
    state: SegmentState,
    slot: usize,
}

impl Segment {
    /// Create a pending segment of `length` bytes at `start`.
    pub fn new(start: u64, length: usize, slot: usize) -> FetchResult<Self> {
        if length == 0 {
            return Err(FetchError::EmptySegment);
        }
        Ok(Self {
            start,
            buffer: vec![0u8; length],
            state: SegmentState::Pending,
            slot,
        })
    }

    /// Re-arm for a new range, keeping the allocation when the length is unchanged.
    pub fn reset(&mut self, start: u64, length: usize) -> FetchResult<()> {
        if length == 0 {
            return Err(FetchError::EmptySegment);
        }
        if self.buffer.len() != length {
            self.buffer = vec![0u8; length];
        }
        self.start = start;
        self.state = SegmentState::Pending;
        Ok(())
    }

    /// First byte offset.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.buffer.len() as u64
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True only after the buffer was moved out with `take_bytes`.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Slot index this segment occupies.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Inclusive range to request from the store.
    pub fn range(&self) -> ByteRange {
        ByteRange::from_offset_len(self.start, self.buffer.len() as u64)
    }

    /// Current state.
    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// The fetched bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Buffer for the fetch to fill in place.
    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Give up the buffer, e.g. to hand it to another stage.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Move the buffer out, leaving the segment empty until the next `reset`.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Mark the fetch as successful.
    pub fn mark_complete(&mut self) {
        debug_assert_eq!(self.state, SegmentState::Pending, "segment completed twice");
        if self.state == SegmentState::Pending {
            self.state = SegmentState::Complete;
        }
    }

    /// Mark the fetch as failed.
    pub fn mark_failed(&mut self) {
        debug_assert_eq!(self.state, SegmentState::Pending, "segment completed twice");
        if self.state == SegmentState::Pending {
            self.state = SegmentState::Failed;
        }
    }
}

/// Cursor over the not-yet-requested part of the object.
#[derive(Debug, Clone)]
pub struct SegmentPlanner {
    cursor: u64,
    object_size: u64,
    segment_size: usize,
}

impl SegmentPlanner {
    /// Plan segments of at most `segment_size` bytes over `object_size` bytes.
    pub fn new(object_size: u64, segment_size: usize) -> FetchResult<Self> {
        if segment_size == 0 {
            return Err(FetchError::InvalidConfig(
                "segment size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            cursor: 0,
            object_size,
            segment_size,
        })
    }

    /// Next unrequested offset.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Bytes not yet handed out.
    pub fn remaining(&self) -> u64 {
        self.object_size - self.cursor
    }

    /// Total number of segments the object splits into.
    pub fn total_segments(&self) -> usize {
        self.object_size.div_ceil(self.segment_size as u64) as usize
    }

    /// Hand out the next `(start, length)` and advance, or `None` at the end.
    pub fn next_range(&mut self) -> Option<(u64, usize)> {
        let remaining = self.remaining();
        if remaining == 0 {
            return None;
        }
        let length = (self.segment_size as u64).min(remaining) as usize;
        let start = self.cursor;
        self.cursor += length as u64;
        Some((start, length))
    }
}
