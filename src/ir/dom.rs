//! Dominance and DFS edge classification.
//!
//! The dominator computation is Keith D. Cooper, Timothy J. Harvey, and Ken
//! Kennedy's "A Simple, Fast Dominance Algorithm": an iterative fixed-point
//! over reverse postorder, using a `rpo_number`-guided finger-walk to
//! compute the intersection (nearest common ancestor) of two blocks. That
//! much is the same algorithm this crate's dominator-tree module already
//! used. What it didn't carry is a subtree range numbering: the liveness
//! checker (`crate::liveness`) needs `dom_pre`/`dom_max` — a preorder stamp
//! over the *dominator tree* such that `b` dominates `b'` iff
//! `dom_pre(b) <= dom_pre(b') <= dom_max(b)` — so this module adds one extra
//! preorder walk of the computed dominator tree to stamp those ranges.
//!
//! DFS edge classification (tree/forward/cross/back) is a second, separate
//! walk over the CFG itself (not the dominator tree): it is what seeds loop
//! discovery in `crate::ir::loop_info`.

use crate::entity::{EntityRef, SecondaryMap};
use crate::ir::entities::Block;
use crate::ir::graph::Graph;
use std::vec::Vec;

/// The classification of a CFG edge after a DFS from the entry block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EdgeKind {
    /// Part of the DFS spanning tree.
    Tree,
    /// Connects an ancestor to a proper (already-finished) descendant, but
    /// is not itself a tree edge.
    Forward,
    /// Connects two blocks with no ancestor/descendant relationship.
    Cross,
    /// Connects a block to one of its DFS-tree ancestors (loop-forming).
    Back,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Per-block DFS timestamps and edge classification, valid while the CFG is
/// unchanged.
pub struct Dfs {
    pre: SecondaryMap<Block, u32>,
    post: SecondaryMap<Block, u32>,
    reachable: SecondaryMap<Block, bool>,
    edge_kinds: Vec<(Block, Block, EdgeKind)>,
    postorder: Vec<Block>,
}

impl Dfs {
    /// Run a DFS from `graph`'s entry block and classify every CFG edge.
    pub fn compute(graph: &Graph) -> Self {
        let mut pre = SecondaryMap::new();
        let mut post = SecondaryMap::new();
        let mut reachable = SecondaryMap::new();
        let mut color: SecondaryMap<Block, Color> = SecondaryMap::with_default(Color::White);
        let mut edge_kinds = Vec::new();
        let mut postorder = Vec::new();
        let mut clock = 0u32;

        // Explicit-stack DFS: each stack frame is (block, next successor index).
        let mut stack: Vec<(Block, usize)> = Vec::new();
        let entry = graph.entry();
        color[entry] = Color::Gray;
        pre[entry] = clock;
        reachable[entry] = true;
        clock += 1;
        stack.push((entry, 0));

        while let Some(&mut (b, ref mut next)) = stack.last_mut() {
            let succs = graph.succs(b);
            if *next < succs.len() {
                let s = succs[*next];
                *next += 1;
                match color[s] {
                    Color::White => {
                        edge_kinds.push((b, s, EdgeKind::Tree));
                        color[s] = Color::Gray;
                        pre[s] = clock;
                        reachable[s] = true;
                        clock += 1;
                        stack.push((s, 0));
                    }
                    Color::Gray => {
                        edge_kinds.push((b, s, EdgeKind::Back));
                    }
                    Color::Black => {
                        let kind = if pre[s] > pre[b] {
                            EdgeKind::Forward
                        } else {
                            EdgeKind::Cross
                        };
                        edge_kinds.push((b, s, kind));
                    }
                }
            } else {
                color[b] = Color::Black;
                post[b] = clock;
                clock += 1;
                postorder.push(b);
                stack.pop();
            }
        }

        Dfs {
            pre,
            post,
            reachable,
            edge_kinds,
            postorder,
        }
    }

    /// Is `block` reachable from the entry?
    pub fn is_reachable(&self, block: Block) -> bool {
        *self.reachable.get(block)
    }

    /// DFS discovery (pre) time of `block`.
    pub fn pre(&self, block: Block) -> u32 {
        *self.pre.get(block)
    }

    /// DFS finish (post) time of `block`.
    pub fn post(&self, block: Block) -> u32 {
        *self.post.get(block)
    }

    /// Blocks in DFS postorder (finish order).
    pub fn postorder(&self) -> &[Block] {
        &self.postorder
    }

    /// Blocks in reverse postorder.
    pub fn reverse_postorder(&self) -> Vec<Block> {
        let mut v = self.postorder.clone();
        v.reverse();
        v
    }

    /// The classification of edge `from -> to`, if that edge was visited
    /// during the DFS (i.e. `from` is reachable).
    pub fn edge_kind(&self, from: Block, to: Block) -> Option<EdgeKind> {
        self.edge_kinds
            .iter()
            .find(|&&(f, t, _)| f == from && t == to)
            .map(|&(_, _, k)| k)
    }

    /// Every back edge discovered, as `(source, target)` pairs.
    pub fn back_edges(&self) -> impl Iterator<Item = (Block, Block)> + '_ {
        self.edge_kinds.iter().filter_map(|&(f, t, k)| {
            if k == EdgeKind::Back {
                Some((f, t))
            } else {
                None
            }
        })
    }
}

/// A computed dominator tree, plus the `dom_pre`/`dom_max` subtree ranges the
/// liveness checker relies on.
pub struct DominatorTree {
    idom: SecondaryMap<Block, Option<Block>>,
    dom_pre: SecondaryMap<Block, u32>,
    dom_max: SecondaryMap<Block, u32>,
    rpo_number: SecondaryMap<Block, Option<u32>>,
}

impl DominatorTree {
    /// Compute the dominator tree of `graph`'s reachable blocks, given its
    /// DFS.
    pub fn compute(graph: &Graph, dfs: &Dfs) -> Self {
        let rpo = dfs.reverse_postorder();
        let mut rpo_number: SecondaryMap<Block, Option<u32>> = SecondaryMap::new();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_number[b] = Some(i as u32);
        }

        let entry = graph.entry();
        let mut idom: SecondaryMap<Block, Option<Block>> = SecondaryMap::new();
        idom[entry] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for &p in graph.preds(b) {
                    if !dfs.is_reachable(p) {
                        continue;
                    }
                    if idom.get(p).is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => {
                            Self::intersect(&idom, &rpo_number, cur, p).expect("both processed")
                        }
                    });
                }
                if *idom.get(b) != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        let mut tree = DominatorTree {
            idom,
            dom_pre: SecondaryMap::new(),
            dom_max: SecondaryMap::new(),
            rpo_number,
        };
        tree.stamp_subtree_ranges(graph, entry);
        tree
    }

    fn intersect(
        idom: &SecondaryMap<Block, Option<Block>>,
        rpo_number: &SecondaryMap<Block, Option<u32>>,
        mut a: Block,
        mut b: Block,
    ) -> Option<Block> {
        loop {
            if a == b {
                return Some(a);
            }
            let ra = rpo_number.get(a).unwrap();
            let rb = rpo_number.get(b).unwrap();
            if ra > rb {
                a = (*idom.get(a))?;
            } else {
                b = (*idom.get(b))?;
            }
        }
    }

    fn stamp_subtree_ranges(&mut self, graph: &Graph, entry: Block) {
        // Build dominator-tree children lists from `idom`, then walk it
        // preorder, numbering as we descend and recording each subtree's
        // maximum preorder number as we ascend.
        let mut children: SecondaryMap<Block, Vec<Block>> = SecondaryMap::new();
        for b in graph.iter_blocks() {
            if let Some(p) = *self.idom.get(b) {
                if p != b {
                    children[p].push(b);
                }
            }
        }

        let mut counter = 0u32;
        // (block, next child index)
        let mut stack: Vec<(Block, usize)> = Vec::new();
        self.dom_pre[entry] = counter;
        counter += 1;
        stack.push((entry, 0));

        while let Some(&mut (b, ref mut next)) = stack.last_mut() {
            let kids = children.get(b);
            if *next < kids.len() {
                let c = kids[*next];
                *next += 1;
                self.dom_pre[c] = counter;
                counter += 1;
                stack.push((c, 0));
            } else {
                self.dom_max[b] = counter - 1;
                stack.pop();
            }
        }
    }

    /// The immediate dominator of `block`, or `None` if `block` is
    /// unreachable. The entry block is its own immediate dominator.
    pub fn idom(&self, block: Block) -> Option<Block> {
        *self.idom.get(block)
    }

    /// `block`'s preorder number in the dominator tree.
    pub fn dom_pre(&self, block: Block) -> u32 {
        *self.dom_pre.get(block)
    }

    /// The maximum preorder number in `block`'s dominator subtree.
    pub fn dom_max(&self, block: Block) -> u32 {
        *self.dom_max.get(block)
    }

    /// Does `a` dominate `b`? True when `a == b`. `false` if either is
    /// unreachable.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if self.rpo_number.get(a).is_none() || self.rpo_number.get(b).is_none() {
            return false;
        }
        let pa = self.dom_pre(a);
        let pb = self.dom_pre(b);
        pa <= pb && pb <= self.dom_max(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::entities::Opcode;

    fn diamond() -> (Graph, Block, Block, Block, Block) {
        let mut g = Graph::new();
        let entry = g.make_block();
        let left = g.make_block();
        let right = g.make_block();
        let join = g.make_block();
        g.set_entry(entry);
        g.add_edge(entry, left);
        g.add_edge(entry, right);
        g.add_edge(left, join);
        g.add_edge(right, join);
        (g, entry, left, right, join)
    }

    #[test]
    fn diamond_dominance() {
        let (g, entry, left, right, join) = diamond();
        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        assert_eq!(dom.idom(entry), Some(entry));
        assert_eq!(dom.idom(left), Some(entry));
        assert_eq!(dom.idom(right), Some(entry));
        assert_eq!(dom.idom(join), Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(left, join));
        assert!(!dom.dominates(right, join));
    }

    #[test]
    fn loop_back_edge_classified() {
        let mut g = Graph::new();
        let entry = g.make_block();
        let header = g.make_block();
        let body = g.make_block();
        let exit = g.make_block();
        g.set_entry(entry);
        g.add_edge(entry, header);
        g.add_edge(header, body);
        g.add_edge(body, header);
        g.add_edge(header, exit);
        let _ = g.make_value(entry, Opcode::BlockHeader, Vec::new(), None);

        let dfs = Dfs::compute(&g);
        assert_eq!(dfs.edge_kind(body, header), Some(EdgeKind::Back));
        assert_eq!(dfs.edge_kind(entry, header), Some(EdgeKind::Tree));
        let dom = DominatorTree::compute(&g, &dfs);
        assert!(dom.dominates(header, body));
        assert!(dom.dominates(header, exit));
    }

    #[test]
    fn unreachable_block_has_no_dominance() {
        let mut g = Graph::new();
        let entry = g.make_block();
        let unreachable = g.make_block();
        g.set_entry(entry);
        let dfs = Dfs::compute(&g);
        assert!(!dfs.is_reachable(unreachable));
        let dom = DominatorTree::compute(&g, &dfs);
        assert!(!dom.dominates(entry, unreachable));
        assert!(!dom.dominates(unreachable, unreachable));
    }
}
