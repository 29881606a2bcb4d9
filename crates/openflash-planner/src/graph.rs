//! Block dependency graph
//!
//! Moves are split into per-block fragments and grouped by destination
//! block. An edge S -> D records that D reads bytes still sitting in S, so
//! S must not be erased before D has consumed them. Nodes live in a flat
//! arena and are addressed by index; passes mutate edge sets in place and
//! mark nodes emitted rather than unlinking anything.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::PlanResult;
use crate::layout::FlashLayout;
use crate::moves::{validate_moves, Move};

/// A move restricted to one source block and one destination block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Block the bytes come from
    pub src_block: u32,
    /// Offset of the bytes within `src_block`
    pub src_offset: u32,
    /// Byte count
    pub length: u32,
    /// Offset the bytes land at within the destination block
    pub dst_offset: u32,
}

impl Fragment {
    /// Source range end, exclusive, within the source block
    pub fn src_end(&self) -> u32 {
        self.src_offset + self.length
    }
}

/// Scheduling state of a destination block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not yet handled
    Pending,
    /// Old contents staged in the cache and the block erased, write pending
    Staged,
    /// Write plan fully emitted
    Emitted,
}

/// One destination block and its scheduling bookkeeping
#[derive(Debug, Clone)]
pub struct BlockNode {
    /// Block index this node writes
    pub block: u32,
    /// Write plan, sorted by destination offset
    pub fragments: Vec<Fragment>,
    /// Destination blocks that read from this block
    pub readers: BTreeSet<u32>,
    /// Destination blocks this block reads from
    pub sources: BTreeSet<u32>,
    /// Where this node is in the pipeline
    pub state: NodeState,
}

impl BlockNode {
    /// True if any fragment reads this block's own old contents
    pub fn has_self_reads(&self) -> bool {
        self.fragments.iter().any(|f| f.src_block == self.block)
    }
}

/// Arena of destination-block nodes, indexed by block index
#[derive(Debug, Default)]
pub struct BlockGraph {
    nodes: Vec<BlockNode>,
    by_block: BTreeMap<u32, usize>,
}

impl BlockGraph {
    /// Split `moves` at block boundaries and build the dependency graph.
    ///
    /// Input is validated first; an empty move list yields an empty graph.
    pub fn build(layout: &FlashLayout, moves: &[Move]) -> PlanResult<Self> {
        validate_moves(layout, moves)?;

        let mut fragments: BTreeMap<u32, Vec<Fragment>> = BTreeMap::new();
        let mut fragment_count = 0usize;

        for m in moves {
            let mut src = layout.wrap(m.source);
            let mut dst = layout.wrap(m.destination);
            let mut remaining = m.length;

            while remaining > 0 {
                let span = remaining
                    .min(layout.remaining_in_block(src))
                    .min(layout.remaining_in_block(dst));

                fragments
                    .entry(layout.block_of(dst))
                    .or_default()
                    .push(Fragment {
                        src_block: layout.block_of(src),
                        src_offset: layout.offset_of(src),
                        length: span,
                        dst_offset: layout.offset_of(dst),
                    });
                fragment_count += 1;

                src += span;
                dst += span;
                remaining -= span;
            }
        }

        let mut graph = Self::default();
        for (block, mut frags) in fragments {
            frags.sort_unstable_by_key(|f| f.dst_offset);
            let id = graph.nodes.len();
            graph.by_block.insert(block, id);
            graph.nodes.push(BlockNode {
                block,
                fragments: frags,
                readers: BTreeSet::new(),
                sources: BTreeSet::new(),
                state: NodeState::Pending,
            });
        }

        // Edges only exist between destination blocks: a block nobody
        // rewrites is never erased, so reading it needs no ordering.
        for id in 0..graph.nodes.len() {
            let block = graph.nodes[id].block;
            let srcs: Vec<u32> = graph.nodes[id]
                .fragments
                .iter()
                .map(|f| f.src_block)
                .collect();
            for src in srcs {
                if graph.by_block.contains_key(&src) {
                    graph.nodes[id].sources.insert(src);
                    let src_id = graph.by_block[&src];
                    graph.nodes[src_id].readers.insert(block);
                }
            }
        }

        debug!(
            nodes = graph.nodes.len(),
            fragments = fragment_count,
            "block graph built"
        );

        Ok(graph)
    }

    /// Drop S -> S edges; intra-block fragments stay in the write plan.
    ///
    /// Returns how many self-loops were removed.
    pub fn prune_self_references(&mut self) -> usize {
        let mut pruned = 0;
        for node in &mut self.nodes {
            let block = node.block;
            if node.sources.remove(&block) {
                node.readers.remove(&block);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "self references pruned");
        }
        pruned
    }

    /// Number of destination blocks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no move survived splitting
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node for a destination block, if the block is written at all
    pub fn node_for_block(&self, block: u32) -> Option<&BlockNode> {
        self.by_block.get(&block).map(|&id| &self.nodes[id])
    }

    /// Arena id for a destination block
    pub fn id_for_block(&self, block: u32) -> Option<usize> {
        self.by_block.get(&block).copied()
    }

    /// Node by arena id
    pub fn node(&self, id: usize) -> &BlockNode {
        &self.nodes[id]
    }

    /// Mutable node by arena id
    pub fn node_mut(&mut self, id: usize) -> &mut BlockNode {
        &mut self.nodes[id]
    }

    /// Arena ids in ascending block order
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_block.values().copied()
    }

    /// Lowest and highest block index touched by any fragment, as source
    /// or destination
    pub fn block_window(&self) -> Option<(u32, u32)> {
        let mut window: Option<(u32, u32)> = None;
        for node in &self.nodes {
            let mut widen = |block: u32| {
                window = Some(match window {
                    None => (block, block),
                    Some((lo, hi)) => (lo.min(block), hi.max(block)),
                });
            };
            widen(node.block);
            for frag in &node.fragments {
                widen(frag.src_block);
            }
        }
        window
    }

    /// Strongly connected components among nodes accepted by `alive`,
    /// using the reader relation as the edge set.
    ///
    /// Components come back in a deterministic order; nodes within one are
    /// sorted by block index.
    pub fn components(&self, alive: impl Fn(usize) -> bool) -> Vec<Vec<usize>> {
        // Iterative Tarjan over the alive subgraph.
        const UNVISITED: usize = usize::MAX;

        let n = self.nodes.len();
        let mut index = vec![UNVISITED; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut components: Vec<Vec<usize>> = Vec::new();

        let neighbors = |id: usize| -> Vec<usize> {
            self.nodes[id]
                .readers
                .iter()
                .filter_map(|b| self.id_for_block(*b))
                .filter(|&t| alive(t))
                .collect()
        };

        for start in self.ids() {
            if !alive(start) || index[start] != UNVISITED {
                continue;
            }

            // frame: (node, neighbor list, next neighbor position)
            let mut frames: Vec<(usize, Vec<usize>, usize)> = vec![(start, neighbors(start), 0)];
            index[start] = next_index;
            low[start] = next_index;
            next_index += 1;
            stack.push(start);
            on_stack[start] = true;

            while !frames.is_empty() {
                let fi = frames.len() - 1;
                let v = frames[fi].0;
                let pos = frames[fi].2;
                if pos < frames[fi].1.len() {
                    frames[fi].2 += 1;
                    let w = frames[fi].1[pos];
                    if index[w] == UNVISITED {
                        index[w] = next_index;
                        low[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        let ns = neighbors(w);
                        frames.push((w, ns, 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                } else {
                    frames.pop();
                    if let Some(parent) = frames.last() {
                        let p = parent.0;
                        low[p] = low[p].min(low[v]);
                    }
                    if low[v] == index[v] {
                        let mut component = Vec::new();
                        while let Some(w) = stack.pop() {
                            on_stack[w] = false;
                            component.push(w);
                            if w == v {
                                break;
                            }
                        }
                        component.sort_unstable_by_key(|&id| self.nodes[id].block);
                        components.push(component);
                    }
                }
            }
        }

        components
    }
}
