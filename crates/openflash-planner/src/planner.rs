//! The move planner
//!
//! Drives the scheduling pipeline: build the block graph, prune
//! self-references, drain unidirectional chains, then break the remaining
//! networks by staging pivots through the cache. Blocks are written
//! consumers-first so every read hits either a block that still holds its
//! old contents or staged cache bytes.
//!
//! # Example
//!
//! ```
//! use openflash_planner::{Move, MovePlanner, PlannerConfig};
//!
//! let planner = MovePlanner::new(PlannerConfig::default())?;
//! let plan = planner.plan(&[Move::new(100, 100, 400)])?;
//! assert!(!plan.is_empty());
//! # Ok::<(), openflash_planner::PlanError>(())
//! ```

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, trace};

use crate::cache::{CacheTracker, StagedRange};
use crate::command::Plan;
use crate::emit::Emitter;
use crate::error::{PlanError, PlanResult};
use crate::graph::{BlockGraph, Fragment, NodeState};
use crate::layout::{FlashLayout, PlannerConfig};
use crate::moves::Move;
use crate::observer::{NullObserver, Pass, PassObserver};

/// Schedules block moves into flash VM command streams.
///
/// Geometry is fixed at construction; one planner can be reused across any
/// number of `plan` calls and instances are independent, so planners may
/// run concurrently on separate move sets.
#[derive(Debug, Clone)]
pub struct MovePlanner {
    layout: FlashLayout,
}

impl MovePlanner {
    /// Validate `config` and build a planner for that geometry
    pub fn new(config: PlannerConfig) -> PlanResult<Self> {
        Ok(Self {
            layout: FlashLayout::new(config)?,
        })
    }

    /// The geometry this planner schedules against
    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    /// Plan `moves` into a command stream.
    ///
    /// An empty move list yields an empty plan; malformed moves yield an
    /// error and no plan.
    pub fn plan(&self, moves: &[Move]) -> PlanResult<Plan> {
        self.plan_with_observer(moves, &mut NullObserver)
    }

    /// Like [`plan`](Self::plan), reporting pass boundaries to `observer`
    pub fn plan_with_observer(
        &self,
        moves: &[Move],
        observer: &mut dyn PassObserver,
    ) -> PlanResult<Plan> {
        if moves.is_empty() {
            return Ok(Plan::new(Vec::new()));
        }

        let mut graph = run_pass(observer, Pass::BuildGraph, || {
            BlockGraph::build(&self.layout, moves)
        })?;

        run_pass(observer, Pass::PruneSelfReferences, || {
            graph.prune_self_references()
        });

        let remaining = graph.len();
        let mut scheduler = Scheduler {
            emit: Emitter::new(),
            cache: CacheTracker::new(self.layout.block_size()),
            graph,
            remaining,
        };

        if let Some((first, last)) = scheduler.graph.block_window() {
            scheduler.emit.rebase(first, last);
        }

        run_pass(observer, Pass::ResolveChains, || scheduler.resolve_chains())?;
        run_pass(observer, Pass::ResolveNetworks, || {
            scheduler.resolve_networks()
        })?;

        run_pass(observer, Pass::GenerateInstructions, || {
            scheduler.into_plan()
        })
    }
}

fn run_pass<T>(observer: &mut dyn PassObserver, pass: Pass, f: impl FnOnce() -> T) -> T {
    observer.pass_started(pass);
    let start = Instant::now();
    let out = f();
    observer.pass_finished(pass, start.elapsed());
    out
}

struct Scheduler {
    graph: BlockGraph,
    emit: Emitter,
    cache: CacheTracker,
    remaining: usize,
}

impl Scheduler {
    /// Repeatedly emit blocks whose readers have all been written.
    ///
    /// Among simultaneously-ready blocks, one reading from the
    /// currently-open source block goes first (saves a USE_BLOCK switch),
    /// then the lowest block index.
    fn resolve_chains(&mut self) -> PlanResult<()> {
        let mut emitted = 0usize;
        loop {
            let open = self.emit.open_block();
            let mut best: Option<(u8, u32, usize)> = None;
            for id in self.graph.ids() {
                if !self.is_ready(id) {
                    continue;
                }
                let node = self.graph.node(id);
                let continues_open = open
                    .map(|o| node.fragments.iter().any(|f| f.src_block == o))
                    .unwrap_or(false);
                let key = (u8::from(!continues_open), node.block, id);
                if best.map_or(true, |b| (key.0, key.1) < (b.0, b.1)) {
                    best = Some(key);
                }
            }
            match best {
                Some((_, _, id)) => {
                    self.emit_block(id)?;
                    emitted += 1;
                }
                None => break,
            }
        }
        if emitted > 0 {
            debug!(emitted, remaining = self.remaining, "chain pass");
        }
        Ok(())
    }

    /// Break the remaining strongly-connected networks by staging one pivot
    /// at a time through the cache, then draining the chains it frees.
    fn resolve_networks(&mut self) -> PlanResult<()> {
        while self.remaining > 0 {
            let pivot = self.choose_pivot()?;
            self.stage_pivot(pivot)?;
            self.resolve_chains()?;
        }
        Ok(())
    }

    fn into_plan(self) -> PlanResult<Plan> {
        if self.remaining > 0 {
            return Err(PlanError::InternalInvariant(
                "blocks left unscheduled after the network pass",
            ));
        }
        Ok(Plan::new(self.emit.finish()))
    }

    fn is_emitted_block(&self, block: u32) -> bool {
        self.graph
            .id_for_block(block)
            .map(|id| self.graph.node(id).state == NodeState::Emitted)
            .unwrap_or(true)
    }

    fn is_ready(&self, id: usize) -> bool {
        let node = self.graph.node(id);
        node.state != NodeState::Emitted
            && node.readers.iter().all(|&r| self.is_emitted_block(r))
    }

    /// Pick the next pivot: in the first schedulable component (all
    /// external readers already written), the block read by the fewest
    /// other component members, ties to the lowest block index.
    fn choose_pivot(&self) -> PlanResult<usize> {
        let alive = |id: usize| self.graph.node(id).state != NodeState::Emitted;
        let components = self.graph.components(&alive);

        let mut chosen: Option<(u32, usize)> = None;
        for component in &components {
            let blocks: BTreeSet<u32> =
                component.iter().map(|&id| self.graph.node(id).block).collect();
            let schedulable = component.iter().all(|&id| {
                self.graph
                    .node(id)
                    .readers
                    .iter()
                    .all(|&r| blocks.contains(&r) || self.is_emitted_block(r))
            });
            if !schedulable {
                continue;
            }

            let pivot = component.iter().copied().min_by_key(|&id| {
                let node = self.graph.node(id);
                let internal_readers = node
                    .readers
                    .iter()
                    .filter(|r| blocks.contains(r))
                    .count();
                (internal_readers, node.block)
            });
            if let Some(pivot) = pivot {
                let first_block = self.graph.node(component[0]).block;
                if chosen.map_or(true, |(b, _)| first_block < b) {
                    chosen = Some((first_block, pivot));
                }
            }
        }

        chosen
            .map(|(_, id)| id)
            .ok_or(PlanError::InternalInvariant(
                "no schedulable component in the network pass",
            ))
    }

    /// Stage a pivot's still-needed old bytes into the cache and erase it,
    /// detaching its readers from the flash copy.
    fn stage_pivot(&mut self, id: usize) -> PlanResult<()> {
        let block = self.graph.node(id).block;
        let ranges = self.needed_ranges(block);
        debug!(block, ranges = ranges.len(), "staging pivot");

        if ranges.is_empty() {
            self.emit.erase(block);
        } else if self.cache.is_free() {
            self.emit.load_and_flush(block);
            self.cache.stage_full_block(block, &ranges);
        } else {
            let placements = self.cache.park(block, &ranges)?;
            for p in &placements {
                self.emit
                    .copy_to_cache(block, p.src_offset, p.length, p.cache_offset);
            }
            self.emit.erase(block);
        }

        let node = self.graph.node_mut(id);
        node.state = NodeState::Staged;
        node.readers.clear();
        Ok(())
    }

    /// Emit the full write plan for one block: make it erasable (staging
    /// its own old bytes if its write plan reads them), erase or partially
    /// commit, then copy every fragment from flash or cache.
    fn emit_block(&mut self, id: usize) -> PlanResult<()> {
        let node = self.graph.node(id);
        let block = node.block;
        let staged = node.state == NodeState::Staged;
        let fragments = node.fragments.clone();
        trace!(block, staged, "writing block");

        let mut committed = 0u32;
        if !staged {
            let ranges = self.needed_ranges(block);
            if ranges.is_empty() {
                self.emit.erase(block);
            } else if self.cache.is_free() {
                self.emit.load_and_flush(block);
                self.cache.stage_full_block(block, &ranges);
            } else {
                let placements = self.cache.park(block, &ranges)?;
                for p in &placements {
                    self.emit
                        .copy_to_cache(block, p.src_offset, p.length, p.cache_offset);
                }
                committed = self.flush_prefix(&fragments);
                if committed > 0 {
                    self.emit.flush_partial(block, committed);
                } else {
                    self.emit.erase(block);
                }
            }
        }

        for frag in &fragments {
            if frag.dst_offset < committed {
                continue;
            }
            match self
                .cache
                .lookup(frag.src_block, frag.src_offset, frag.length)
            {
                Some(cache_offset) => {
                    self.emit
                        .copy_from_cache(cache_offset, frag.length, block, frag.dst_offset)
                }
                None => self.emit.copy_from_block(
                    frag.src_block,
                    frag.src_offset,
                    frag.length,
                    block,
                    frag.dst_offset,
                ),
            }
        }

        self.graph.node_mut(id).state = NodeState::Emitted;
        self.remaining -= 1;
        if self.cache.consumer_emitted(block) && self.remaining > 0 {
            self.emit.release();
        }
        Ok(())
    }

    /// Byte ranges of `block`'s old contents still needed by unwritten
    /// blocks (the block itself included).
    ///
    /// Overlapping reads coalesce into one range so any single fragment's
    /// read resolves against one staged segment; merely touching ranges
    /// stay separate so each frees as soon as its own readers are written.
    fn needed_ranges(&self, block: u32) -> Vec<StagedRange> {
        let mut reads: Vec<(u32, u32, u32)> = Vec::new();
        for id in self.graph.ids() {
            let node = self.graph.node(id);
            if node.state == NodeState::Emitted {
                continue;
            }
            for frag in &node.fragments {
                if frag.src_block == block {
                    reads.push((frag.src_offset, frag.src_end(), node.block));
                }
            }
        }
        reads.sort_unstable();

        let mut ranges: Vec<StagedRange> = Vec::new();
        for (start, end, reader) in reads {
            match ranges.last_mut() {
                Some(last) if start < last.src_offset + last.length => {
                    let new_end = end.max(last.src_offset + last.length);
                    last.length = new_end - last.src_offset;
                    last.readers.insert(reader);
                }
                _ => {
                    let mut readers = BTreeSet::new();
                    readers.insert(reader);
                    ranges.push(StagedRange {
                        src_offset: start,
                        length: end - start,
                        readers,
                    });
                }
            }
        }
        ranges
    }

    /// Length of the leading run of fragments already sitting in the cache
    /// at their final offsets; that prefix can be committed in one
    /// FLUSH_AND_PARTIAL_COMMIT instead of an erase plus copies.
    fn flush_prefix(&self, fragments: &[Fragment]) -> u32 {
        let mut end = 0u32;
        for frag in fragments {
            if frag.dst_offset != end {
                break;
            }
            match self
                .cache
                .lookup(frag.src_block, frag.src_offset, frag.length)
            {
                Some(cache_offset) if cache_offset == frag.dst_offset => end += frag.length,
                _ => break,
            }
        }
        end
    }
}
