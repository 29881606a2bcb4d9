//! Cache-buffer bookkeeping
//!
//! The planner owns a single block-sized RAM buffer on the target. Staged
//! data lives there as segments: a byte range of some origin block's old
//! contents, placed at a cache offset. A whole-block stage (LOAD_AND_FLUSH)
//! puts every range at its natural offset; fragment parking prefers the
//! natural offset and falls back to first-fit. Each segment stays reserved
//! until every destination block waiting on it has been written, so a
//! pivot's self-ranges free up as soon as the pivot is rewritten while a
//! slower reader's range keeps riding in the buffer.

use std::collections::BTreeSet;

use tracing::trace;

use crate::error::{PlanError, PlanResult};

/// A staged byte range and the destination blocks still waiting on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRange {
    /// Offset of the bytes within the origin block
    pub src_offset: u32,
    /// Byte count
    pub length: u32,
    /// Destination blocks that still have to read this range
    pub readers: BTreeSet<u32>,
}

#[derive(Debug, Clone)]
struct Segment {
    origin: u32,
    src_offset: u32,
    length: u32,
    cache_offset: u32,
    pending: BTreeSet<u32>,
}

/// Cache placement handed back to the planner for parking copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Offset of the bytes within the origin block
    pub src_offset: u32,
    /// Byte count
    pub length: u32,
    /// Where the bytes were placed in the cache
    pub cache_offset: u32,
}

/// Reservation map for the single cache buffer
#[derive(Debug)]
pub struct CacheTracker {
    block_size: u32,
    segments: Vec<Segment>,
}

impl CacheTracker {
    /// Empty tracker for a cache of `block_size` bytes
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            segments: Vec::new(),
        }
    }

    /// True when nothing is staged
    pub fn is_free(&self) -> bool {
        self.segments.is_empty()
    }

    /// Bytes not covered by any live segment
    pub fn free_bytes(&self) -> u32 {
        let reserved: u32 = self.segments.iter().map(|s| s.length).sum();
        self.block_size - reserved
    }

    /// Cache offset holding `origin`'s bytes `[src_offset, src_offset + length)`
    pub fn lookup(&self, origin: u32, src_offset: u32, length: u32) -> Option<u32> {
        self.segments
            .iter()
            .find(|s| {
                s.origin == origin
                    && s.src_offset <= src_offset
                    && src_offset + length <= s.src_offset + s.length
            })
            .map(|s| s.cache_offset + (src_offset - s.src_offset))
    }

    /// True when `origin` has live staged data
    pub fn holds_origin(&self, origin: u32) -> bool {
        self.segments.iter().any(|s| s.origin == origin)
    }

    /// Record a whole-block stage of `origin` (LOAD_AND_FLUSH).
    ///
    /// The cache physically holds the entire block, so every needed range
    /// sits at its natural offset; only the needed ranges are reserved and
    /// the rest of the buffer stays available for later parking.
    pub fn stage_full_block(&mut self, origin: u32, ranges: &[StagedRange]) {
        debug_assert!(self.is_free(), "full-block stage over live segments");
        trace!(origin, count = ranges.len(), "staged full block");
        for range in ranges {
            self.segments.push(Segment {
                origin,
                src_offset: range.src_offset,
                length: range.length,
                cache_offset: range.src_offset,
                pending: range.readers.clone(),
            });
        }
    }

    /// Reserve cache space for `origin`'s ranges without assuming the whole
    /// buffer, preferring natural offsets. Returns the placements, in range
    /// order, so the caller can emit the parking copies.
    pub fn park(&mut self, origin: u32, ranges: &[StagedRange]) -> PlanResult<Vec<Placement>> {
        let mut placed: Vec<Segment> = Vec::with_capacity(ranges.len());
        for range in ranges {
            let cache_offset = match self.place(range.src_offset, range.length, &placed) {
                Some(offset) => offset,
                None => {
                    return Err(PlanError::CacheExhausted {
                        block: origin,
                        requested: range.length,
                        free: self.free_bytes(),
                    })
                }
            };
            placed.push(Segment {
                origin,
                src_offset: range.src_offset,
                length: range.length,
                cache_offset,
                pending: range.readers.clone(),
            });
        }
        let placements = placed
            .iter()
            .map(|s| Placement {
                src_offset: s.src_offset,
                length: s.length,
                cache_offset: s.cache_offset,
            })
            .collect();
        trace!(origin, ?placements, "parked fragments");
        self.segments.extend(placed);
        Ok(placements)
    }

    /// A destination block has been written; drop reservations nobody is
    /// still waiting on. Returns true when this freed the last live segment.
    pub fn consumer_emitted(&mut self, block: u32) -> bool {
        if self.segments.is_empty() {
            return false;
        }
        for segment in &mut self.segments {
            segment.pending.remove(&block);
        }
        self.segments.retain(|s| !s.pending.is_empty());
        self.segments.is_empty()
    }

    /// Drop every reservation (RELEASE_BLOCK / plan end)
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    fn place(&self, src_offset: u32, length: u32, sibling: &[Segment]) -> Option<u32> {
        if self.fits(src_offset, length, sibling) {
            return Some(src_offset);
        }
        // First fit over the gaps between live segments.
        let mut taken: Vec<(u32, u32)> = self
            .segments
            .iter()
            .chain(sibling.iter())
            .map(|s| (s.cache_offset, s.cache_offset + s.length))
            .collect();
        taken.sort_unstable();

        let mut candidate = 0u32;
        for (start, end) in taken {
            if candidate + length <= start {
                break;
            }
            candidate = candidate.max(end);
        }
        if candidate + length <= self.block_size {
            Some(candidate)
        } else {
            None
        }
    }

    fn fits(&self, offset: u32, length: u32, sibling: &[Segment]) -> bool {
        if offset + length > self.block_size {
            return false;
        }
        let end = offset + length;
        self.segments
            .iter()
            .chain(sibling.iter())
            .all(|s| end <= s.cache_offset || s.cache_offset + s.length <= offset)
    }
}
