//! Reverse postorder and immediate dominators.
//!
//! The dominator tree is computed over a graph whose roots are the
//! method entry plus every reachable catch entry: exceptions can arrive
//! at a catch from anywhere in its try range, so the only sound
//! immediate dominator for a catch entry is the synthetic start node,
//! represented here as `None`. Within one root's tree the algorithm is
//! Keith D. Cooper's "Simple, Fast Dominator Algorithm": assign RPO
//! numbers, seed each node's idom from its first processed predecessor,
//! and iterate to convergence (one pass when the flow graph is
//! reducible).

use crate::ir::{Block, MethodGraph};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;
use core::cmp::Ordering;

/// RPO numbers are assigned as multiples of `STRIDE` to leave room for
/// local renumbering.
const STRIDE: u32 = 4;

/// States used by `compute_postorder`.
const SEEN: u32 = 1;
const DONE: u32 = 2;

#[derive(Clone, Default, Debug)]
struct DomNode {
    /// Position in a reverse postorder, starting from `2 * STRIDE`.
    /// Zero means unreachable; `SEEN`/`DONE` are transient traversal
    /// states.
    rpo_number: u32,
    /// Immediate dominator; `None` for roots, for blocks dominated only
    /// by the synthetic start, and for unreachable blocks.
    idom: PackedOption<Block>,
}

/// The dominator tree for one method.
#[derive(Debug)]
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,
    /// Reverse postorder of all reachable blocks: the entry's tree
    /// first, then each catch entry's tree in discovery order.
    rpo: Vec<Block>,
    /// Roots: the entry block plus reachable catch entries.
    roots: Vec<Block>,
    /// Scratch for the postorder walk.
    stack: Vec<Block>,
}

impl DominatorTree {
    /// Compute the tree for `graph` and copy the results into its
    /// blocks (`idom`, `rpo_index`).
    pub fn compute(graph: &mut MethodGraph) -> Self {
        let mut tree = Self {
            nodes: SecondaryMap::with_capacity(graph.blocks.len()),
            rpo: Vec::with_capacity(graph.blocks.len()),
            roots: Vec::new(),
            stack: Vec::new(),
        };
        tree.compute_rpo(graph);
        tree.compute_domtree(graph);
        for (index, &block) in tree.rpo.iter().enumerate() {
            graph.blocks[block].rpo_index = index as u32;
            graph.blocks[block].idom = tree.nodes[block].idom;
        }
        log::trace!(
            "dominators: {} reachable of {} blocks, {} roots",
            tree.rpo.len(),
            graph.blocks.len(),
            tree.roots.len()
        );
        tree
    }

    /// The reverse postorder of reachable blocks.
    pub fn rpo(&self) -> &[Block] {
        &self.rpo
    }

    /// Is `block` reachable from any root?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    /// The immediate dominator, or `None` for roots and blocks dominated
    /// only by the synthetic start.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    /// Is `block` a traversal root (the entry or a catch entry)? Roots
    /// have an implicit edge from the synthetic start.
    pub fn is_root(&self, block: Block) -> bool {
        self.roots.contains(&block)
    }

    /// Grow one root's depth-first tree, appending its postorder.
    ///
    /// Standard two-state walk: the first pop pushes the block back and
    /// then its unseen successors; the second pop emits it.
    fn grow_tree(&mut self, graph: &MethodGraph, root: Block, postorder: &mut Vec<Block>) {
        debug_assert!(self.stack.is_empty());
        self.stack.push(root);
        self.nodes[root].rpo_number = SEEN;
        while let Some(block) = self.stack.pop() {
            match self.nodes[block].rpo_number {
                SEEN => {
                    self.nodes[block].rpo_number = DONE;
                    self.stack.push(block);
                    for &succ in graph.succs(block) {
                        if self.nodes[succ].rpo_number == 0 {
                            self.nodes[succ].rpo_number = SEEN;
                            self.stack.push(succ);
                        }
                    }
                }
                DONE => postorder.push(block),
                _ => unreachable!("block revisited after postorder emission"),
            }
        }
    }

    /// Build the multi-root reverse postorder: the entry tree, then the
    /// tree of every catch entry whose try range has become reachable.
    /// Nested regions make this iterative: a catch body can itself be a
    /// try range.
    fn compute_rpo(&mut self, graph: &MethodGraph) {
        let Some(entry) = graph.entry_block.expand() else {
            return;
        };
        let mut postorder = Vec::new();
        self.grow_tree(graph, entry, &mut postorder);
        self.roots.push(entry);
        self.rpo.extend(postorder.iter().rev());

        loop {
            let mut new_root = None;
            'blocks: for (block, _) in graph.blocks.iter() {
                if self.nodes[block].rpo_number == 0 {
                    continue;
                }
                for &catch in graph.catch_succs(block) {
                    if self.nodes[catch].rpo_number == 0 {
                        new_root = Some(catch);
                        break 'blocks;
                    }
                }
            }
            let Some(root) = new_root else { break };
            let mut postorder = Vec::new();
            self.grow_tree(graph, root, &mut postorder);
            self.roots.push(root);
            self.rpo.extend(postorder.iter().rev());
        }
    }

    fn rpo_cmp(&self, a: Block, b: Block) -> Ordering {
        self.nodes[a].rpo_number.cmp(&self.nodes[b].rpo_number)
    }

    /// Nearest common dominator, or `None` when the chains only meet at
    /// the synthetic start.
    fn common_dominator(&self, mut a: Block, mut b: Block) -> Option<Block> {
        loop {
            match self.rpo_cmp(a, b) {
                Ordering::Less => b = self.nodes[b].idom.expand()?,
                Ordering::Greater => a = self.nodes[a].idom.expand()?,
                Ordering::Equal => return Some(a),
            }
        }
    }

    /// One estimation step for `block`'s idom from its already-numbered
    /// predecessors.
    fn compute_idom(&self, graph: &MethodGraph, block: Block) -> Option<Block> {
        let mut reachable_preds = graph
            .preds(block)
            .iter()
            .copied()
            .filter(|&pred| self.nodes[pred].rpo_number > DONE);
        let mut idom = reachable_preds.next()?;
        for pred in reachable_preds {
            match self.common_dominator(idom, pred) {
                Some(common) => idom = common,
                // The predecessors meet only at the synthetic start.
                None => return None,
            }
        }
        Some(idom)
    }

    fn compute_domtree(&mut self, graph: &MethodGraph) {
        // First pass: walk the RPO assigning numbers and seeding each
        // node's idom from its already-numbered predecessors. Roots keep
        // `idom == None`. Every non-root node has at least one
        // predecessor that appears earlier in the RPO (its depth-first
        // tree parent), so the seed always exists.
        let rpo = core::mem::take(&mut self.rpo);
        for (i, &block) in rpo.iter().enumerate() {
            let rpo_number = (i as u32 + 2) * STRIDE;
            if self.roots.contains(&block) {
                self.nodes[block].rpo_number = rpo_number;
                continue;
            }
            self.nodes[block] = DomNode {
                rpo_number,
                idom: self.compute_idom(graph, block).into(),
            };
        }

        // Iterate until convergence; a single pass suffices for
        // reducible control flow.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &rpo {
                if self.roots.contains(&block) {
                    continue;
                }
                let idom: PackedOption<Block> = self.compute_idom(graph, block).into();
                if self.nodes[block].idom != idom {
                    self.nodes[block].idom = idom;
                    changed = true;
                }
            }
        }
        self.rpo = rpo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use crate::flowgraph;
    use avmlift_environ::ExceptionInfo;

    fn build(code: &[u8], exceptions: &[ExceptionInfo]) -> (MethodGraph, DominatorTree) {
        let mut g = MethodGraph::new(8, 8, 4);
        decode::decode(&mut g, code).unwrap();
        flowgraph::compute(&mut g, exceptions).unwrap();
        let tree = DominatorTree::compute(&mut g);
        (g, tree)
    }

    #[test]
    fn diamond_idoms() {
        // 0: pushtrue
        // 1: iffalse +6 -> 11
        // 5: pushbyte 1
        // 7: jump +2 -> 13
        // 11: pushbyte 2
        // 13: returnvoid          (the join)
        let code = [
            0x26, 0x12, 6, 0, 0, 0x24, 1, 0x10, 2, 0, 0, 0x24, 2, 0x47,
        ];
        let (g, tree) = build(&code, &[]);
        assert_eq!(g.blocks.len(), 4);
        let entry = g.entry_block.unwrap();
        let join = g.inst_at_offset(13).and_then(|i| g.insts[i].block.expand()).unwrap();
        assert_eq!(tree.idom(entry), None);
        assert_eq!(tree.idom(join), Some(entry));
        for &b in tree.rpo() {
            if b != entry && b != join {
                assert_eq!(tree.idom(b), Some(entry));
            }
        }
        assert_eq!(g.blocks[entry].rpo_index, 0);
    }

    #[test]
    fn loop_back_edge() {
        // 0: label
        // 1: pushtrue
        // 2: iftrue -6 -> 0
        // 6: returnvoid
        let code = [0x09, 0x26, 0x11, 0xfa, 0xff, 0xff, 0x47];
        let (g, tree) = build(&code, &[]);
        let entry = g.entry_block.unwrap();
        let exit = g.inst_at_offset(6).and_then(|i| g.insts[i].block.expand()).unwrap();
        assert_eq!(tree.idom(entry), None);
        assert_eq!(tree.idom(exit), Some(entry));
        assert!(tree.is_reachable(entry));
    }

    #[test]
    fn catch_entry_is_a_root() {
        // try [0,3): 0: nop; 1: pushnull; 2: throw
        // 3: returnvoid
        // 4: pop (catch); 5: returnvoid
        let code = [0x02, 0x20, 0x03, 0x47, 0x29, 0x47];
        let exceptions = [ExceptionInfo {
            from: 0,
            to: 3,
            target: 4,
            type_name: 0,
            var_name: 0,
        }];
        let (g, tree) = build(&code, &exceptions);
        let catch = g.handlers[crate::ir::Handler::from_u32(0)]
            .target_block
            .unwrap();
        assert!(tree.is_reachable(catch));
        assert_eq!(tree.idom(catch), None);
        // The catch tree is appended after the entry tree in the RPO.
        let entry = g.entry_block.unwrap();
        assert!(g.blocks[entry].rpo_index < g.blocks[catch].rpo_index);
    }

    #[test]
    fn unreachable_block_stays_unnumbered() {
        // 0: returnvoid; 1: returnvoid (unreachable)
        let code = [0x47, 0x47];
        let (g, tree) = build(&code, &[]);
        let b1 = g.inst_at_offset(1).and_then(|i| g.insts[i].block.expand());
        // Both instructions share a block unless something splits them;
        // returnvoid ends the block, so inst 1 starts a new one.
        let b1 = b1.unwrap();
        assert!(!tree.is_reachable(b1));
        assert_eq!(g.blocks[b1].rpo_index, u32::MAX);
    }
}
