//! Input model: block-aligned byte-range moves
//!
//! A [`Move`] asks for `length` bytes at `source` in the old image to end up
//! at `destination` in the new image. Order in the input list is
//! informational only; the planner treats the collection as a set.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};
use crate::layout::FlashLayout;

/// One requested relocation of old-image bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    /// Byte address of the data in the old image
    pub source: u32,
    /// Byte count
    pub length: u32,
    /// Byte address the data must occupy in the new image
    pub destination: u32,
}

impl Move {
    /// Convenience constructor in (source, length, destination) order
    pub fn new(source: u32, length: u32, destination: u32) -> Self {
        Self {
            source,
            length,
            destination,
        }
    }
}

/// Check every move against the layout and against the others.
///
/// Rejects zero-length moves, moves that run past the end of flash, and
/// pairs of moves whose destination ranges overlap (a well-formed delta
/// writes every output byte exactly once).
pub fn validate_moves(layout: &FlashLayout, moves: &[Move]) -> PlanResult<()> {
    let limit = layout.flash_size();

    for (index, m) in moves.iter().enumerate() {
        if m.length == 0 {
            return Err(PlanError::ZeroLengthMove { index });
        }
        let src_end = u64::from(layout.wrap(m.source)) + u64::from(m.length);
        let dst_end = u64::from(layout.wrap(m.destination)) + u64::from(m.length);
        if src_end > limit || dst_end > limit {
            return Err(PlanError::MoveOutOfRange { index, limit });
        }
    }

    // Destination ranges must be pairwise disjoint.
    let mut spans: Vec<(u64, u64, usize)> = moves
        .iter()
        .enumerate()
        .map(|(index, m)| {
            let start = u64::from(layout.wrap(m.destination));
            (start, start + u64::from(m.length), index)
        })
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        let (_, prev_end, prev_index) = pair[0];
        let (next_start, _, next_index) = pair[1];
        if next_start < prev_end {
            let (first, second) = if prev_index < next_index {
                (prev_index, next_index)
            } else {
                (next_index, prev_index)
            };
            return Err(PlanError::DestinationOverlap { first, second });
        }
    }

    Ok(())
}
