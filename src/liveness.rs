//! Incremental, query-driven liveness checking.
//!
//! A direct port of the dominance + DFS back-edge-reachability liveness
//! checker: precompute, once per CFG, a `red_reachable` and `be_tgt_reach`
//! bitset per block, then answer `check(bl, var)` queries by combining
//! dominance with a sliding pre-number walk over `be_tgt_reach`. See
//! `crate::SPEC_FULL` component C3 for the full algorithm description; this
//! module implements it verbatim.

use crate::bitset::DenseBitSet;
use crate::entity::{EntityRef, SecondaryMap};
use crate::ir::dom::{DominatorTree, Dfs};
use crate::ir::entities::{Block, Value};
use crate::ir::graph::Graph;
use log::{debug, log_enabled, trace, Level};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use std::vec::Vec;

/// Liveness state bits a query can return.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct LiveState {
    bits: u8,
}

const IN: u8 = 1;
const END: u8 = 2;
const OUT: u8 = 4;

impl LiveState {
    /// The empty state (not live at all).
    pub fn empty() -> Self {
        LiveState { bits: 0 }
    }

    /// Live at block entrance.
    pub fn is_in(&self) -> bool {
        self.bits & IN != 0
    }

    /// Live at the block's last instruction.
    pub fn is_end(&self) -> bool {
        self.bits & END != 0
    }

    /// Live at block exit.
    pub fn is_out(&self) -> bool {
        self.bits & OUT != 0
    }

    /// Is this the empty state?
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    fn with(mut self, flag: u8) -> Self {
        self.bits |= flag;
        self
    }
}

struct BlockInfo {
    /// Dominator-tree preorder number, duplicated here for quick sorted
    /// iteration of `be_tgt_reach` independent of borrowing the dom tree.
    pre_num: u32,
    red_reachable: DenseBitSet,
    be_tgt_reach: DenseBitSet,
    is_back_edge_target: bool,
}

/// Precomputed per-block liveness state for one CFG. Invalidated only by CFG
/// mutation (the unroller explicitly discards and rebuilds it).
pub struct LivenessChecker<'a> {
    graph: &'a Graph,
    dfs: &'a Dfs,
    dom: &'a DominatorTree,
    /// Indexed by dominator-tree preorder number (`pre_num`), not by `Block`,
    /// matching the original's pre-number-indexed `bl_info` array so the
    /// sliding pre-number walk in `check` is a direct vector scan.
    by_pre_num: Vec<BlockInfo>,
    /// `Block -> index into by_pre_num`.
    block_to_pre: SecondaryMap<Block, u32>,
    /// The inverse of `block_to_pre`: `pre_to_block[i]` is the block whose
    /// dense pre-number is `i`.
    pre_to_block: Vec<Block>,
}

impl<'a> LivenessChecker<'a> {
    /// Build the liveness checker for `graph`. Requires a valid DFS and
    /// dominator tree (`assure_doms` in spec terms).
    pub fn new(graph: &'a Graph, dfs: &'a Dfs, dom: &'a DominatorTree) -> Self {
        let reachable: Vec<Block> = graph.iter_blocks().filter(|&b| dfs.is_reachable(b)).collect();
        let n = reachable.len();

        let mut block_to_pre: SecondaryMap<Block, u32> = SecondaryMap::new();
        // Order blocks by dominator-tree preorder so pre_num doubles as a
        // dense index compatible with dom_pre/dom_max range tests.
        let mut by_dom_pre = reachable.clone();
        by_dom_pre.sort_by_key(|&b| dom.dom_pre(b));
        for (i, &b) in by_dom_pre.iter().enumerate() {
            block_to_pre[b] = i as u32;
        }

        let back_edge_sources: Vec<Block> = dfs.back_edges().map(|(s, _)| s).collect();
        let back_edge_targets: Vec<Block> = dfs.back_edges().map(|(_, t)| t).collect();

        // Ascending post-number order: every non-back successor finishes (and
        // is processed) strictly before its predecessor, so each block's
        // `union_with` below always sees final successor state, never the
        // all-zero default.
        let rpo = dfs.postorder();

        // Reduced transitive closure over non-back edges, ascending post-number.
        let mut red_reachable: SecondaryMap<Block, DenseBitSet> = SecondaryMap::new();
        for &b in rpo {
            let mut set = DenseBitSet::with_capacity(n);
            set.insert(block_to_pre[b] as usize);
            for &s in graph.succs(b) {
                if !dfs.is_reachable(s) {
                    continue;
                }
                if dfs.edge_kind(b, s) == Some(crate::ir::dom::EdgeKind::Back) {
                    continue;
                }
                let succ_set = red_reachable.get(s).clone();
                set.union_with(&succ_set);
            }
            red_reachable[b] = set;
        }

        // Back-edge target reachability: for every back-edge source, union
        // in every back-edge target not already reduced-reachable from it
        // (recursing through further back edges), minus itself; then
        // propagate along non-back edges in ascending post-number order,
        // finally adding each block to its own set.
        let mut be_tgt_reach: SecondaryMap<Block, DenseBitSet> = SecondaryMap::new();
        for &b in &rpo {
            be_tgt_reach[b] = DenseBitSet::with_capacity(n);
        }
        for (source, target) in dfs.back_edges() {
            Self::compute_back_edge_chain(graph, dfs, &red_reachable, &block_to_pre, &mut be_tgt_reach, source, target);
        }
        for &b in &rpo {
            let own = red_reachable.get(b).clone();
            let mut acc = be_tgt_reach.get(b).clone();
            for &s in graph.succs(b) {
                if !dfs.is_reachable(s) {
                    continue;
                }
                if dfs.edge_kind(b, s) == Some(crate::ir::dom::EdgeKind::Back) {
                    continue;
                }
                let succ = be_tgt_reach.get(s).clone();
                acc.union_with(&succ);
            }
            let _ = own;
            be_tgt_reach[b] = acc;
        }
        for &b in &rpo {
            let mut set = be_tgt_reach.get(b).clone();
            set.insert(block_to_pre[b] as usize);
            be_tgt_reach[b] = set;
        }

        let mut by_pre_num: Vec<BlockInfo> = Vec::with_capacity(n);
        for &b in &by_dom_pre {
            by_pre_num.push(BlockInfo {
                pre_num: block_to_pre[b],
                red_reachable: red_reachable.get(b).clone(),
                be_tgt_reach: be_tgt_reach.get(b).clone(),
                is_back_edge_target: back_edge_targets.contains(&b),
            });
        }
        let _ = back_edge_sources;

        debug!("liveness: built bl_info for {} reachable blocks", n);

        LivenessChecker {
            graph,
            dfs,
            dom,
            by_pre_num,
            block_to_pre,
            pre_to_block: by_dom_pre,
        }
    }

    /// Recursively accumulate back-edge target reachability seen from
    /// `source`, stopping at targets already reduced-reachable from it.
    fn compute_back_edge_chain(
        graph: &Graph,
        dfs: &Dfs,
        red_reachable: &SecondaryMap<Block, DenseBitSet>,
        block_to_pre: &SecondaryMap<Block, u32>,
        be_tgt_reach: &mut SecondaryMap<Block, DenseBitSet>,
        source: Block,
        target: Block,
    ) {
        if red_reachable.get(source).contains(block_to_pre[target] as usize) {
            return;
        }
        if be_tgt_reach.get(source).contains(block_to_pre[target] as usize) {
            return;
        }
        be_tgt_reach[source].insert(block_to_pre[target] as usize);
        for (s2, t2) in dfs.back_edges() {
            if s2 == target {
                Self::compute_back_edge_chain(graph, dfs, red_reachable, block_to_pre, be_tgt_reach, source, t2);
            }
        }
    }

    fn info(&self, block: Block) -> &BlockInfo {
        &self.by_pre_num[self.block_to_pre[block] as usize]
    }

    /// The block a use maps to for liveness purposes: for a phi operand,
    /// that is the corresponding predecessor block, not the phi's own block.
    fn use_block(&self, user: Value, operand_slot: usize) -> Block {
        if self.graph.is_phi(user) {
            self.graph.phi_pred_block(user, operand_slot)
        } else {
            self.graph.block_of(user)
        }
    }

    /// Answer `state(bl, var)`.
    pub fn check(&self, bl: Block, var: Value) -> LiveState {
        let result = self.check_inner(bl, var);
        if log_enabled!(Level::Trace) {
            trace!("liveness: check({:?}, {:?}) -> {:?}", bl, var, result);
        }
        result
    }

    fn check_inner(&self, bl: Block, var: Value) -> LiveState {
        if !self.graph.is_liveness_relevant(var) {
            return LiveState::empty();
        }
        if !self.dfs.is_reachable(bl) {
            return LiveState::empty();
        }
        let def_bl = self.graph.block_of(var);
        if !self.dom.dominates(def_bl, bl) {
            return LiveState::empty();
        }

        if def_bl == bl {
            self.check_same_block(bl, var)
        } else {
            self.check_other_block(bl, var, def_bl)
        }
    }

    fn users_with_blocks(&self, var: Value) -> Vec<(Value, Block)> {
        self.graph
            .out_edges(var)
            .iter()
            .map(|&u| {
                let slot = self
                    .graph
                    .operands(u)
                    .iter()
                    .position(|&o| o == var)
                    .expect("use-list entry must reference var as an operand");
                (u, self.use_block(u, slot))
            })
            .collect()
    }

    fn check_same_block(&self, bl: Block, var: Value) -> LiveState {
        let mut state = LiveState::empty();
        for (_, ub) in self.users_with_blocks(var) {
            if ub == bl {
                state = state.with(END);
            }
            if ub != bl {
                return state.with(END).with(OUT);
            }
        }
        state
    }

    fn check_other_block(&self, bl: Block, var: Value, def_bl: Block) -> LiveState {
        let users = self.users_with_blocks(var);
        let mut state = LiveState::empty();
        for &(u, ub) in &users {
            if ub == bl {
                state = state.with(IN);
                if self.graph.is_phi(u) {
                    state = state.with(END);
                }
            }
        }

        let bl_info = self.info(bl);
        let lo = self.dom.dom_pre(def_bl) + 1;
        let hi = self.dom.dom_max(def_bl);

        let bl_pre = self.block_to_pre[bl];
        let bl_is_bet = bl_info.is_back_edge_target;

        let mut t_pre = lo;
        while t_pre <= hi {
            // `Tq` is `be_tgt_reach(bl)` restricted to `[lo, hi]`; walking by
            // ascending dominator-tree preorder over that range is
            // equivalent to walking the set in pre-number order, since the
            // membership test below filters to members.
            if !bl_info.be_tgt_reach.contains(t_pre as usize) {
                t_pre += 1;
                continue;
            }
            let t = self.block_by_dom_pre(t_pre);

            // A use in `bl` itself does not prove `OUT`/`END` at `bl` unless
            // `bl` is itself a back-edge target; this is a view-local filter
            // on `U`, not a mutation, so it never needs restoring.
            let drop_bl_seed = t_pre == bl_pre && !bl_is_bet;
            let t_info = self.info(t);
            let hit = users.iter().any(|&(_, ub)| {
                if drop_bl_seed && ub == bl {
                    return false;
                }
                t_info.red_reachable.contains(self.block_to_pre[ub] as usize)
            });
            if hit {
                return state.with(IN).with(OUT).with(END);
            }

            t_pre = self.dom.dom_max(t) + 1;
        }

        state
    }

    fn block_by_dom_pre(&self, pre: u32) -> Block {
        self.pre_to_block[pre as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::entities::Opcode;

    fn setup() -> (Graph, Block, Block, Block, Block) {
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
    fn value_live_across_diamond() {
        let (mut g, entry, left, _right, join) = setup();
        let v = g.make_value(entry, Opcode::Normal, Vec::new(), None);
        let _use_in_left = g.make_value(left, Opcode::Normal, std::vec![v], None);
        let _use_in_join = g.make_value(join, Opcode::Normal, std::vec![v], None);

        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let lc = LivenessChecker::new(&g, &dfs, &dom);

        let s = lc.check(entry, v);
        assert!(s.is_end());
        assert!(s.is_out());

        let s_join = lc.check(join, v);
        assert!(s_join.is_in());
    }

    #[test]
    fn unreachable_block_is_empty() {
        let mut g = Graph::new();
        let entry = g.make_block();
        let unreachable = g.make_block();
        g.set_entry(entry);
        let v = g.make_value(entry, Opcode::Normal, Vec::new(), None);

        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let lc = LivenessChecker::new(&g, &dfs, &dom);
        assert!(lc.check(unreachable, v).is_empty());
    }

    #[test]
    fn non_dominating_def_is_empty() {
        let (mut g, _entry, left, right, _join) = setup();
        let v = g.make_value(left, Opcode::Normal, Vec::new(), None);
        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let lc = LivenessChecker::new(&g, &dfs, &dom);
        assert!(lc.check(right, v).is_empty());
    }

    #[test]
    fn ignored_opcode_is_empty() {
        let (mut g, entry, _left, _right, _join) = setup();
        let v = g.make_value(entry, Opcode::Ignored, Vec::new(), None);
        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let lc = LivenessChecker::new(&g, &dfs, &dom);
        assert!(lc.check(entry, v).is_empty());
    }

    #[test]
    fn live_through_loop_back_edge() {
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

        let v = g.make_value(entry, Opcode::Normal, Vec::new(), None);
        let _use_in_body = g.make_value(body, Opcode::Normal, std::vec![v], None);

        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let lc = LivenessChecker::new(&g, &dfs, &dom);

        // `v` must be seen live in the header, since a path through the back
        // edge revisits the header on the way to its use in `body`.
        let s_header = lc.check(header, v);
        assert!(s_header.is_in());
        assert!(s_header.is_out());
    }
}
