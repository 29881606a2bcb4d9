//! Output model: the public command stream
//!
//! Each command is one instruction for the flash VM that applies the update
//! on-device. Blocks are named by index; [`CopyAddr`] distinguishes a flash
//! block from the single RAM cache buffer so that a cache operand can never
//! be misread as a block index.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source or destination of a copy: a flash block or the cache buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyAddr {
    /// Flash block, by block index
    Block(u32),
    /// The block-sized RAM staging buffer
    Cache,
}

impl CopyAddr {
    /// Block index if this operand addresses flash
    pub fn block(self) -> Option<u32> {
        match self {
            CopyAddr::Block(index) => Some(index),
            CopyAddr::Cache => None,
        }
    }

    /// True when this operand addresses the cache buffer
    pub fn is_cache(self) -> bool {
        matches!(self, CopyAddr::Cache)
    }
}

impl fmt::Display for CopyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyAddr::Block(index) => write!(f, "block {index:#x}"),
            CopyAddr::Cache => write!(f, "CACHE_BUF"),
        }
    }
}

/// One instruction of the emitted update program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Establish the working block window; first in any plan that leaves
    /// the default single-block window at block 0
    Rebase {
        /// Lowest block index the program touches
        first_block: u32,
        /// Highest block index the program touches
        last_block: u32,
    },

    /// Open a flash block for reading
    UseBlock {
        /// Block to open
        block: u32,
    },

    /// Close the currently-open source block and drop stale cache content
    ReleaseBlock,

    /// Erase a whole block
    Erase {
        /// Block to erase
        block: u32,
    },

    /// Read a block into the cache buffer, then erase the block
    LoadAndFlush {
        /// Block to stage and erase
        block: u32,
    },

    /// Copy `length` bytes between flash and/or cache
    Copy {
        /// Data origin
        src: CopyAddr,
        /// Byte offset within the origin
        src_offset: u32,
        /// Byte count
        length: u32,
        /// Data destination
        dst: CopyAddr,
        /// Byte offset within the destination
        dst_offset: u32,
    },

    /// Copy that appends at the destination cursor left by the previous
    /// `Copy` or `FlushAndPartialCommit`
    ChainedCopy {
        /// Data origin
        src: CopyAddr,
        /// Byte offset within the origin
        src_offset: u32,
        /// Byte count
        length: u32,
    },

    /// Erase `block`, write the first `length` cache bytes back to it, and
    /// leave the write cursor at `length`; cache contents stay staged
    FlushAndPartialCommit {
        /// Block to rewrite
        block: u32,
        /// Committed prefix length in bytes
        length: u32,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::Rebase {
                first_block,
                last_block,
            } => write!(f, "REBASE {first_block:#x} {last_block:#x}"),
            Command::UseBlock { block } => write!(f, "USE_BLOCK {block:#x}"),
            Command::ReleaseBlock => write!(f, "RELEASE_BLOCK"),
            Command::Erase { block } => write!(f, "ERASE {block:#x}"),
            Command::LoadAndFlush { block } => write!(f, "LOAD_AND_FLUSH {block:#x}"),
            Command::Copy {
                src,
                src_offset,
                length,
                dst,
                dst_offset,
            } => write!(
                f,
                "COPY {src}+{src_offset:#x} -> {dst}+{dst_offset:#x} ({length:#x} bytes)"
            ),
            Command::ChainedCopy {
                src,
                src_offset,
                length,
            } => write!(f, "CHAINED_COPY {src}+{src_offset:#x} ({length:#x} bytes)"),
            Command::FlushAndPartialCommit { block, length } => {
                write!(f, "FLUSH_AND_PARTIAL_COMMIT {block:#x} ({length:#x} bytes)")
            }
        }
    }
}

/// A finished update program plus the geometry it was planned against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    commands: Vec<Command>,
}

impl Plan {
    pub(crate) fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    /// The instruction stream, in execution order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// True when there is nothing to do
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Derive the informational counters for this program
    pub fn stats(&self) -> crate::stats::PlanStats {
        crate::stats::PlanStats::from_commands(&self.commands)
    }
}

impl IntoIterator for Plan {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
