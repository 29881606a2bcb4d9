//! Injectable pass profiling
//!
//! The original peppered the pipeline with wall-clock measurements behind a
//! compile-time flag. Callers that want timing (or any other per-pass
//! bookkeeping) implement [`PassObserver`] and hand it to
//! [`MovePlanner::plan_with_observer`](crate::planner::MovePlanner::plan_with_observer).

use std::time::Duration;

/// The scheduling passes, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Move splitting and block-graph construction
    BuildGraph,
    /// Self-reference pruning
    PruneSelfReferences,
    /// Unidirectional-chain resolution
    ResolveChains,
    /// Network/cycle resolution
    ResolveNetworks,
    /// Command assembly finalization
    GenerateInstructions,
}

/// Callback surface invoked at pass boundaries
pub trait PassObserver {
    /// A pass is about to run
    fn pass_started(&mut self, pass: Pass);

    /// A pass finished; `elapsed` is wall-clock time spent in it
    fn pass_finished(&mut self, pass: Pass, elapsed: Duration);
}

/// Observer that ignores every callback
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PassObserver for NullObserver {
    fn pass_started(&mut self, _pass: Pass) {}

    fn pass_finished(&mut self, _pass: Pass, _elapsed: Duration) {}
}

/// Observer that accumulates elapsed time per pass
#[derive(Debug, Default, Clone)]
pub struct TimingObserver {
    samples: Vec<(Pass, Duration)>,
}

impl TimingObserver {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded (pass, elapsed) pairs in completion order
    pub fn samples(&self) -> &[(Pass, Duration)] {
        &self.samples
    }

    /// Total time across all recorded passes
    pub fn total(&self) -> Duration {
        self.samples.iter().map(|(_, d)| *d).sum()
    }
}

impl PassObserver for TimingObserver {
    fn pass_started(&mut self, _pass: Pass) {}

    fn pass_finished(&mut self, pass: Pass, elapsed: Duration) {
        self.samples.push((pass, elapsed));
    }
}
