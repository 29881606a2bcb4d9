//! Error types for plan generation and plan simulation

use thiserror::Error;

/// Errors that can occur while turning a move list into a command stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A move has a zero byte length
    #[error("move #{index} has zero length")]
    ZeroLengthMove {
        /// Position of the offending move in the input list
        index: usize,
    },

    /// A move reads or writes past the end of the flash address space
    #[error("move #{index} exceeds the flash address space ({limit:#x} bytes)")]
    MoveOutOfRange {
        /// Position of the offending move in the input list
        index: usize,
        /// Flash size in bytes
        limit: u64,
    },

    /// Two moves write overlapping destination ranges
    #[error("moves #{first} and #{second} write overlapping destination ranges")]
    DestinationOverlap {
        /// Position of the earlier conflicting move
        first: usize,
        /// Position of the later conflicting move
        second: usize,
    },

    /// Block size exponent outside the supported 8..=20 range
    #[error("block size bit {0} outside supported range 8..=20")]
    BlockSizeBitOutOfRange(u8),

    /// Flash size exponent smaller than the block size exponent or above 32
    #[error("flash size bit {flash_size_bit} incompatible with block size bit {block_size_bit}")]
    FlashSizeBitOutOfRange {
        /// Rejected flash size exponent
        flash_size_bit: u8,
        /// Block size exponent it was checked against
        block_size_bit: u8,
    },

    /// More bytes must be staged simultaneously than the cache can hold
    #[error("cache exhausted while staging block {block:#x}: {requested} bytes requested, {free} free")]
    CacheExhausted {
        /// Block whose data could not be staged
        block: u32,
        /// Bytes that needed parking
        requested: u32,
        /// Free cache bytes at the time of the request
        free: u32,
    },

    /// A scheduling pass violated one of its postconditions; this is a bug
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
}

/// Result alias for plan generation
pub type PlanResult<T> = Result<T, PlanError>;
