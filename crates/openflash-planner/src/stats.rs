//! Informational counters derived from a finished plan

use serde::{Deserialize, Serialize};

use crate::command::Command;

/// Counters summarizing a command stream
///
/// Purely informational; nothing in the planner consumes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    /// Total instructions emitted
    pub commands: usize,
    /// Whole-block erases, not counting those implied by `LOAD_AND_FLUSH`
    /// or `FLUSH_AND_PARTIAL_COMMIT`
    pub erases: usize,
    /// Blocks staged through `LOAD_AND_FLUSH`
    pub load_and_flush: usize,
    /// Partial commits of the cache
    pub partial_commits: usize,
    /// Round-trips through the cache buffer: block stagings plus copies
    /// parking data into the cache
    pub cache_round_trips: usize,
    /// Bytes moved by `COPY`/`CHAINED_COPY`, all directions
    pub bytes_copied: u64,
    /// Bytes written into the cache by explicit copies
    pub bytes_staged: u64,
}

impl PlanStats {
    /// Tally a command stream
    pub fn from_commands(commands: &[Command]) -> Self {
        let mut stats = Self {
            commands: commands.len(),
            ..Self::default()
        };

        for command in commands {
            match *command {
                Command::Erase { .. } => stats.erases += 1,
                Command::LoadAndFlush { .. } => {
                    stats.load_and_flush += 1;
                    stats.cache_round_trips += 1;
                }
                Command::FlushAndPartialCommit { .. } => stats.partial_commits += 1,
                Command::Copy {
                    length, src, dst, ..
                } => {
                    stats.bytes_copied += u64::from(length);
                    if dst.is_cache() && !src.is_cache() {
                        stats.cache_round_trips += 1;
                        stats.bytes_staged += u64::from(length);
                    }
                }
                Command::ChainedCopy { length, .. } => {
                    stats.bytes_copied += u64::from(length);
                }
                Command::Rebase { .. } | Command::UseBlock { .. } | Command::ReleaseBlock => {}
            }
        }

        stats
    }
}
