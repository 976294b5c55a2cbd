//! Dominance frontiers and their iterated closure.
//!
//! Phi placement needs, per tracked slot, the iterated dominance
//! frontier of the slot's definition-site set. Frontiers are computed
//! once per method with the Cooper/Harvey/Kennedy predecessor walk and
//! stored in one of two representations selected by block count: a
//! bitmask per block for small graphs, pooled sparse sets otherwise.

use crate::dominator_tree::DominatorTree;
use crate::ir::{Block, MethodGraph};
use cranelift_entity::{EntityRef, SecondaryMap};

/// Graphs with at most this many blocks use the bitmask representation.
const DENSE_LIMIT: usize = 64;

/// Per-block dominance frontiers.
pub enum DominanceFrontiers {
    /// One bit per block; bit `i` of `masks[b]` means block `i` is in
    /// `DF(b)`.
    Dense {
        /// The masks.
        masks: SecondaryMap<Block, u64>,
    },
    /// Explicit frontier sets.
    Sparse {
        /// The sets, each sorted by construction order.
        sets: SecondaryMap<Block, Vec<Block>>,
    },
}

impl DominanceFrontiers {
    /// Compute the frontiers of every reachable block.
    ///
    /// For each join (a block with two or more predecessors), each
    /// predecessor and its dominators up to, but excluding, the join's
    /// immediate dominator have the join in their frontier. A join whose
    /// immediate dominator is the synthetic start terminates the walk at
    /// roots.
    pub fn compute(graph: &MethodGraph, tree: &DominatorTree) -> Self {
        let mut frontiers = if graph.blocks.len() <= DENSE_LIMIT {
            DominanceFrontiers::Dense {
                masks: SecondaryMap::with_capacity(graph.blocks.len()),
            }
        } else {
            DominanceFrontiers::Sparse {
                sets: SecondaryMap::with_capacity(graph.blocks.len()),
            }
        };
        for &block in tree.rpo() {
            let preds = graph.preds(block);
            // Roots have an implicit edge from the synthetic start, so
            // one explicit predecessor already makes them joins.
            let pred_count = preds.len() + tree.is_root(block) as usize;
            if pred_count < 2 {
                continue;
            }
            let idom = tree.idom(block);
            for &pred in preds {
                if !tree.is_reachable(pred) {
                    continue;
                }
                let mut runner = pred;
                loop {
                    if Some(runner) == idom {
                        break;
                    }
                    frontiers.insert(runner, block);
                    match tree.idom(runner) {
                        Some(up) => runner = up,
                        None => break,
                    }
                }
            }
        }
        frontiers
    }

    fn insert(&mut self, block: Block, frontier: Block) {
        match self {
            DominanceFrontiers::Dense { masks } => {
                masks[block] |= 1u64 << frontier.index();
            }
            DominanceFrontiers::Sparse { sets } => {
                if !sets[block].contains(&frontier) {
                    sets[block].push(frontier);
                }
            }
        }
    }

    fn for_each(&self, block: Block, mut f: impl FnMut(Block)) {
        match self {
            DominanceFrontiers::Dense { masks } => {
                let mut mask = masks.get(block).copied().unwrap_or(0);
                while mask != 0 {
                    let bit = mask.trailing_zeros() as usize;
                    mask &= mask - 1;
                    f(Block::new(bit));
                }
            }
            DominanceFrontiers::Sparse { sets } => {
                if let Some(set) = sets.get(block) {
                    for &b in set {
                        f(b);
                    }
                }
            }
        }
    }

    /// The iterated dominance frontier of a definition-site set: the
    /// fixed point of `S -> S ∪ DF(S)` minus the original sites.
    pub fn iterated(&self, defsites: &[Block], block_count: usize) -> Vec<Block> {
        let mut in_result = vec![false; block_count];
        let mut result = Vec::new();
        let mut worklist: Vec<Block> = defsites.to_vec();
        while let Some(block) = worklist.pop() {
            self.for_each(block, |frontier| {
                if !in_result[frontier.index()] {
                    in_result[frontier.index()] = true;
                    result.push(frontier);
                    worklist.push(frontier);
                }
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use crate::flowgraph;

    fn build(code: &[u8]) -> (MethodGraph, DominatorTree) {
        let mut g = MethodGraph::new(8, 8, 4);
        decode::decode(&mut g, code).unwrap();
        flowgraph::compute(&mut g, &[]).unwrap();
        let tree = DominatorTree::compute(&mut g);
        (g, tree)
    }

    #[test]
    fn diamond_frontier_is_join() {
        // 0: pushtrue; 1: iffalse +6 -> 11; 5: pushbyte; 7: jump +2 -> 13;
        // 11: pushbyte; 13: returnvoid
        let code = [
            0x26, 0x12, 6, 0, 0, 0x24, 1, 0x10, 2, 0, 0, 0x24, 2, 0x47,
        ];
        let (g, tree) = build(&code);
        let df = DominanceFrontiers::compute(&g, &tree);
        let join = g
            .inst_at_offset(13)
            .and_then(|i| g.insts[i].block.expand())
            .unwrap();
        let left = g
            .inst_at_offset(5)
            .and_then(|i| g.insts[i].block.expand())
            .unwrap();
        let idf = df.iterated(&[left], g.blocks.len());
        assert_eq!(idf, vec![join]);
        // A definition in the entry dominates everything; empty IDF.
        let entry = g.entry_block.unwrap();
        assert!(df.iterated(&[entry], g.blocks.len()).is_empty());
    }

    #[test]
    fn loop_header_in_own_frontier() {
        // 0: label; 1: pushtrue; 2: iftrue -6 -> 0; 6: returnvoid
        let code = [0x09, 0x26, 0x11, 0xfa, 0xff, 0xff, 0x47];
        let (g, tree) = build(&code);
        let df = DominanceFrontiers::compute(&g, &tree);
        let header = g.entry_block.unwrap();
        // The back edge makes the header a join; a definition inside the
        // loop body (the header itself) has the header in its IDF.
        let idf = df.iterated(&[header], g.blocks.len());
        assert_eq!(idf, vec![header]);
    }
}
