//! The coalescing allocator "co2" (C8).
//!
//! A direct port of libFirm's `becopyheur2.c`: per-value tentative/fixed
//! color state, BFS-discovered affinity clouds processed in descending
//! cost order, a Kruskal maximum spanning tree per cloud, and a top-down
//! recoloring search that prefers the parent's color when it is cheap,
//! backed by a change-list unwinding primitive instead of stack-unwinding
//! exceptions (`SPEC_FULL.md` §4.8, §9). `coalesce_top_down` is the only
//! heuristic actually exercised by the original (its beam-search sibling is
//! dead code behind a commented-out call site), so it is the only one
//! implemented here.
//!
//! One simplification from the original's in-place union-find re-rooting:
//! the maximum spanning tree here is rooted at the cloud's master *after*
//! Kruskal completes (a plain BFS from the master over the finished tree),
//! rather than by re-parenting subtrees during each union step. Heavy nodes
//! still end up near the root, since the master is chosen as the
//! heaviest-incident-cost member, but the tie-break during union is not
//! replicated bit-for-bit.
//!
//! A second simplification: finding each tree node's best color compares
//! candidates by fully trying and then unwinding every one (instead of only
//! unwinding a replaced incumbent), then re-applies the winner once more.
//! This costs one extra trial of the winning candidate but keeps the
//! change-list rollback invariant simple: every trial starts from the same
//! clean state.

use crate::bitset::ScalarBitSet;
use crate::context::{AllocatorConfig, DumpFlags};
use crate::entity::{EntityRef, SecondaryMap};
use crate::ir::{Graph, Value};
use crate::regalloc::affinity::AffinityGraph;
use crate::regalloc::constraints::ConstraintModel;
use crate::regalloc::interference::InterferenceGraph;
use crate::result::{CodegenError, CodegenResult};
use log::{debug, info, warn};
use std::vec::Vec;

const NODE_COST: i64 = 1;

#[derive(Clone, Default)]
struct ValueState {
    orig_col: Option<u8>,
    tmp_col: Option<u8>,
    tmp_fixed: bool,
    fixed: bool,
}

struct ChangeEntry {
    value: Value,
    prev_tmp_col: Option<u8>,
    prev_tmp_fixed: bool,
}

struct Cloud {
    members: Vec<Value>,
    cost: i64,
    master: Value,
}

/// A rooted maximum spanning tree over one cloud's affinity edges.
struct Mst {
    root: Value,
    members: Vec<Value>,
    parent_cost: Vec<(Value, u32)>,
    children: Vec<(Value, Vec<Value>)>,
}

impl Mst {
    fn cost_to_parent(&self, v: Value) -> u32 {
        self.parent_cost
            .iter()
            .find(|(k, _)| *k == v)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    fn children_of(&self, v: Value) -> &[Value] {
        self.children
            .iter()
            .find(|(k, _)| *k == v)
            .map(|(_, c)| c.as_slice())
            .unwrap_or(&[])
    }
}

fn build_clouds(ag: &AffinityGraph) -> Vec<Cloud> {
    let all_members: Vec<Value> = ag.members().collect();
    let mut visited: Vec<Value> = Vec::new();
    let mut clouds = Vec::new();

    for &start in &all_members {
        if visited.contains(&start) {
            continue;
        }
        let mut members = Vec::new();
        let mut queue = std::vec![start];
        visited.push(start);
        while let Some(v) = queue.pop() {
            members.push(v);
            for edge in ag.neighbors(v) {
                if !visited.contains(&edge.neighbor) {
                    visited.push(edge.neighbor);
                    queue.push(edge.neighbor);
                }
            }
        }

        let mut cost = 0i64;
        let mut weights: Vec<(Value, i64)> = Vec::with_capacity(members.len());
        for &m in &members {
            let w: i64 = ag.neighbors(m).iter().map(|e| i64::from(e.cost)).sum();
            weights.push((m, w));
            for edge in ag.neighbors(m) {
                if edge.neighbor.index() > m.index() {
                    cost += i64::from(edge.cost);
                }
            }
        }
        let master = weights
            .iter()
            .fold(weights[0], |best, &cur| {
                if cur.1 > best.1 || (cur.1 == best.1 && cur.0.index() < best.0.index()) {
                    cur
                } else {
                    best
                }
            })
            .0;

        clouds.push(Cloud { members, cost, master });
    }

    clouds
}

fn uf_find(uf: &mut Vec<(Value, Value)>, v: Value) -> Value {
    let p = uf.iter().find(|(k, _)| *k == v).map(|(_, p)| *p).unwrap();
    if p == v {
        v
    } else {
        let root = uf_find(uf, p);
        if let Some(entry) = uf.iter_mut().find(|(k, _)| *k == v) {
            entry.1 = root;
        }
        root
    }
}

fn build_mst(cloud: &Cloud, ag: &AffinityGraph) -> Mst {
    let mut edges: Vec<(u32, Value, Value)> = Vec::new();
    for &m in &cloud.members {
        for edge in ag.neighbors(m) {
            if edge.neighbor.index() > m.index() {
                edges.push((edge.cost, m, edge.neighbor));
            }
        }
    }
    // Descending weight, deterministic tie-break, for Kruskal's maximum
    // spanning tree.
    edges.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| a.1.index().cmp(&b.1.index()))
            .then_with(|| a.2.index().cmp(&b.2.index()))
    });

    let mut uf_parent: Vec<(Value, Value)> = cloud.members.iter().map(|&m| (m, m)).collect();
    let mut tree_adj: Vec<(Value, Vec<(Value, u32)>)> =
        cloud.members.iter().map(|&m| (m, Vec::new())).collect();

    for (cost, u, v) in edges {
        let ru = uf_find(&mut uf_parent, u);
        let rv = uf_find(&mut uf_parent, v);
        if ru != rv {
            if let Some(entry) = uf_parent.iter_mut().find(|(k, _)| *k == ru) {
                entry.1 = rv;
            }
            if let Some((_, adj)) = tree_adj.iter_mut().find(|(k, _)| *k == u) {
                adj.push((v, cost));
            }
            if let Some((_, adj)) = tree_adj.iter_mut().find(|(k, _)| *k == v) {
                adj.push((u, cost));
            }
        }
    }

    let root = cloud.master;
    let mut parent_cost = std::vec![(root, 0u32)];
    let mut children: Vec<(Value, Vec<Value>)> = cloud.members.iter().map(|&m| (m, Vec::new())).collect();
    let mut seen = std::vec![root];
    let mut queue = std::vec![root];
    while let Some(v) = queue.pop() {
        let adj = tree_adj
            .iter()
            .find(|(k, _)| *k == v)
            .map(|(_, a)| a.clone())
            .unwrap_or_default();
        for (n, cost) in adj {
            if !seen.contains(&n) {
                seen.push(n);
                parent_cost.push((n, cost));
                if let Some((_, kids)) = children.iter_mut().find(|(k, _)| *k == v) {
                    kids.push(n);
                }
                queue.push(n);
            }
        }
    }

    Mst {
        root,
        members: cloud.members.clone(),
        parent_cost,
        children,
    }
}

fn order_candidates(cost: &[i64], admissible: ScalarBitSet, exclude: Option<u8>) -> Vec<u8> {
    let mut v: Vec<u8> = (0..cost.len() as u8)
        .filter(|&c| admissible.contains(c))
        .filter(|&c| exclude.map_or(true, |e| e != c))
        .filter(|&c| cost[c as usize] != i64::max_value())
        .collect();
    v.sort_by_key(|&c| cost[c as usize]);
    v
}

fn badness_for<'b>(badness: &'b [(Value, Vec<i64>)], v: Value) -> &'b [i64] {
    badness
        .iter()
        .find(|(k, _)| *k == v)
        .map(|(_, b)| b.as_slice())
        .expect("every MST member has a computed badness vector")
}

/// Summary of one `allocate` run, surfaced for the §4.8 `info!` log line.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocationSummary {
    pub clouds_processed: usize,
    pub clouds_abandoned: usize,
}

struct Coalescer<'a> {
    graph: &'a Graph,
    ig: &'a InterferenceGraph,
    ag: &'a AffinityGraph,
    constraints: &'a ConstraintModel<'a>,
    dump_flags: DumpFlags,
    state: SecondaryMap<Value, ValueState>,
    in_progress: SecondaryMap<Value, bool>,
    changes: Vec<ChangeEntry>,
    clouds_processed: usize,
    clouds_abandoned: usize,
}

impl<'a> Coalescer<'a> {
    fn new(
        graph: &'a Graph,
        ig: &'a InterferenceGraph,
        ag: &'a AffinityGraph,
        constraints: &'a ConstraintModel<'a>,
        dump_flags: DumpFlags,
    ) -> Self {
        let mut c = Coalescer {
            graph,
            ig,
            ag,
            constraints,
            dump_flags,
            state: SecondaryMap::new(),
            in_progress: SecondaryMap::new(),
            changes: Vec::new(),
            clouds_processed: 0,
            clouds_abandoned: 0,
        };
        c.initial_coloring();
        c
    }

    /// A legal base coloring (the "prior allocator" input §3 assumes `co2`
    /// starts from): greedy, visiting values in index order and picking the
    /// smallest admissible color not already used by an earlier-indexed
    /// interference neighbor. Every edge is checked from its later-indexed
    /// endpoint, so the result is a valid coloring overall, not just locally.
    fn initial_coloring(&mut self) {
        for v in self.graph.iter_values() {
            if self.graph.reg_class(v).is_none() {
                continue;
            }
            let admissible = self.constraints.admissible(self.graph, v);
            let mut chosen = None;
            'candidates: for c in admissible.iter() {
                for n in self.ig.iter_neighbors(v) {
                    if n.index() < v.index() {
                        if self.state.get(n).orig_col == Some(c) {
                            continue 'candidates;
                        }
                    }
                }
                chosen = Some(c);
                break;
            }
            self.state[v].orig_col = chosen;
        }
    }

    fn effective_color(&self, v: Value) -> Option<u8> {
        let st = self.state.get(v);
        st.tmp_col.or(st.orig_col)
    }

    fn class_size(&self, v: Value) -> usize {
        match self.graph.reg_class(v) {
            Some(rci) => self.constraints.reginfo().rc(rci).num_regs(),
            None => 0,
        }
    }

    fn push_change(&mut self, v: Value) {
        let st = self.state.get(v).clone();
        self.changes.push(ChangeEntry {
            value: v,
            prev_tmp_col: st.tmp_col,
            prev_tmp_fixed: st.tmp_fixed,
        });
    }

    fn unwind_to(&mut self, mark: usize) {
        while self.changes.len() > mark {
            let entry = self.changes.pop().expect("len() > mark implies non-empty");
            self.state[entry.value].tmp_col = entry.prev_tmp_col;
            self.state[entry.value].tmp_fixed = entry.prev_tmp_fixed;
        }
    }

    fn color_cost(&self, v: Value, admissible: ScalarBitSet, n_regs: usize) -> Vec<i64> {
        let mut cost = std::vec![0i64; n_regs];
        for (c, slot) in cost.iter_mut().enumerate() {
            if !admissible.contains(c as u8) {
                *slot = i64::max_value();
            }
        }
        for edge in self.ag.neighbors(v) {
            if let Some(c) = self.effective_color(edge.neighbor) {
                let idx = c as usize;
                if idx < n_regs && cost[idx] != i64::max_value() {
                    cost[idx] -= 128 * i64::from(edge.cost);
                }
            }
        }
        for n in self.ig.iter_neighbors(v) {
            if n == v {
                continue;
            }
            if let Some(c) = self.effective_color(n) {
                let idx = c as usize;
                if idx >= n_regs {
                    continue;
                }
                if self.state.get(n).fixed {
                    cost[idx] = i64::max_value();
                } else if cost[idx] != i64::max_value() {
                    cost[idx] += 8 * self.ig.degree(n) as i64;
                }
            }
        }
        cost
    }

    /// `change_color_not(v, col_avoid)`: move `v` off `col_avoid` onto any
    /// other admissible color, recursively displacing interference
    /// neighbors that stand in the way. Off-limits for both a permanently
    /// `fixed` node and one merely `tmp_fixed` within the current trial
    /// (`color_is_fix` in the original), since an ancestor call earlier in
    /// the same top-down trial must not be reopened.
    fn change_color_not(&mut self, v: Value, avoid: u8) -> bool {
        if self.effective_color(v) != Some(avoid) {
            return true;
        }
        if self.state.get(v).fixed || self.state.get(v).tmp_fixed {
            return false;
        }
        let n_regs = self.class_size(v);
        if n_regs == 0 {
            return false;
        }
        let admissible = self.constraints.admissible(self.graph, v);
        let cost = self.color_cost(v, admissible, n_regs);
        let candidates = order_candidates(&cost, admissible, Some(avoid));
        for c in candidates {
            let mark = self.changes.len();
            if self.attempt_color(v, c) {
                return true;
            }
            self.unwind_to(mark);
        }
        false
    }

    /// `change_color_single(v, target)`: force `v` to exactly `target`. Same
    /// `fixed || tmp_fixed` gate as `change_color_not`.
    fn change_color_single(&mut self, v: Value, target: u8) -> bool {
        if self.effective_color(v) == Some(target) {
            return true;
        }
        if self.state.get(v).fixed || self.state.get(v).tmp_fixed {
            return false;
        }
        let admissible = self.constraints.admissible(self.graph, v);
        if !admissible.contains(target) {
            return false;
        }
        let mark = self.changes.len();
        if self.attempt_color(v, target) {
            true
        } else {
            self.unwind_to(mark);
            false
        }
    }

    /// The shared `recolor` primitive: tentatively color `v` as `c`,
    /// recursively displacing any interference neighbor that currently
    /// holds `c`. Guarded against revisiting a value already mid-recursion
    /// on this call stack, since the interference graph (unlike the MST) can
    /// contain cycles.
    fn attempt_color(&mut self, v: Value, c: u8) -> bool {
        if self.effective_color(v) == Some(c) {
            return true;
        }
        if self.state.get(v).fixed {
            return false;
        }
        if *self.in_progress.get(v) {
            return false;
        }
        self.in_progress[v] = true;
        self.push_change(v);
        self.state[v].tmp_col = Some(c);
        self.state[v].tmp_fixed = true;

        let neighbors: Vec<Value> = self.ig.iter_neighbors(v).collect();
        let mut ok = true;
        for n in neighbors {
            if self.effective_color(n) == Some(c) && !self.change_color_not(n, c) {
                ok = false;
                break;
            }
        }
        self.in_progress[v] = false;
        ok
    }

    fn node_badness(&self, v: Value, n_regs: usize) -> Vec<i64> {
        let admissible = self.constraints.admissible(self.graph, v);
        let mut b = std::vec![0i64; n_regs];
        for (c, slot) in b.iter_mut().enumerate() {
            if !admissible.contains(c as u8) {
                *slot += n_regs as i64 * NODE_COST;
            }
        }
        for n in self.ig.iter_neighbors(v) {
            let n_admissible = self.constraints.admissible(self.graph, n);
            let missing = n_regs.saturating_sub(n_admissible.len() as usize) as i64;
            for slot in b.iter_mut() {
                *slot += missing;
            }
            if self.state.get(n).fixed {
                if let Some(c) = self.effective_color(n) {
                    if (c as usize) < n_regs {
                        b[c as usize] += n_regs as i64 * NODE_COST;
                    }
                }
            }
        }
        b
    }

    fn badness_post_order(&self, mst: &Mst, v: Value, n_regs: usize, out: &mut Vec<(Value, Vec<i64>)>) {
        for &child in mst.children_of(v) {
            self.badness_post_order(mst, child, n_regs, out);
        }
        let mut b = self.node_badness(v, n_regs);
        for &child in mst.children_of(v) {
            let child_b = badness_for(out, child);
            for (slot, &cb) in b.iter_mut().zip(child_b) {
                *slot = slot.saturating_add(cb);
            }
        }
        out.push((v, b));
    }

    fn compute_badness(&self, mst: &Mst, n_regs: usize) -> Vec<(Value, Vec<i64>)> {
        let mut out = Vec::with_capacity(mst.members.len());
        self.badness_post_order(mst, mst.root, n_regs, &mut out);
        out
    }

    /// Try coloring `v` as `c` (with `parent_col` as the MST parent's
    /// already-chosen color, for the parent-edge cost term) and recurse into
    /// every MST child. Returns the subtree's total cost, or `None` if `c`
    /// is not achievable. Always leaves its changes applied on success;
    /// callers compare trial costs and unwind the loser themselves.
    fn try_candidate(
        &mut self,
        mst: &Mst,
        v: Value,
        c: u8,
        parent_col: Option<u8>,
        badness: &[(Value, Vec<i64>)],
        n_regs: usize,
    ) -> Option<i64> {
        if !self.change_color_single(v, c) {
            return None;
        }
        let mut total = 0i64;
        if v != mst.root && Some(c) != parent_col {
            total += i64::from(mst.cost_to_parent(v));
        }
        for &child in mst.children_of(v) {
            match self.coalesce_top_down(mst, child, Some(c), badness, n_regs) {
                (Some(_), cost) => total += cost,
                (None, _) => return None,
            }
        }
        Some(total)
    }

    /// `coalesce_top_down(ci, parent_col)`: pick `ci`'s color, cheapest
    /// badness first with the parent's color boosted just below the
    /// cheapest candidate, recursing into MST children and tracking the
    /// lowest-cost legal assignment. Returns `(chosen_color, subtree_cost)`;
    /// `chosen_color` is `None` only if every admissible color is
    /// unreachable, in which case the cloud is abandoned by the caller.
    fn coalesce_top_down(
        &mut self,
        mst: &Mst,
        v: Value,
        parent_col: Option<u8>,
        badness: &[(Value, Vec<i64>)],
        n_regs: usize,
    ) -> (Option<u8>, i64) {
        let admissible = self.constraints.admissible(self.graph, v);
        let my_badness = badness_for(badness, v);
        let mut order: Vec<u8> = (0..n_regs as u8)
            .filter(|&c| admissible.contains(c))
            .filter(|&c| my_badness[c as usize] < i64::max_value())
            .collect();
        order.sort_by_key(|&c| my_badness[c as usize]);
        if let Some(pc) = parent_col {
            if admissible.contains(pc) {
                if let Some(pos) = order.iter().position(|&c| c == pc) {
                    let val = order.remove(pos);
                    let insert_at = usize::min(1, order.len());
                    order.insert(insert_at, val);
                }
            }
        }

        if order.is_empty() {
            return (None, 0);
        }

        let node_mark = self.changes.len();
        let mut best: Option<(u8, i64)> = None;
        for &c in &order {
            if let Some((_, bc)) = best {
                if bc == 0 {
                    break;
                }
            }
            let trial_mark = self.changes.len();
            let result = self.try_candidate(mst, v, c, parent_col, badness, n_regs);
            self.unwind_to(trial_mark);
            if let Some(cost) = result {
                if best.map_or(true, |(_, bc)| cost < bc) {
                    best = Some((c, cost));
                }
            }
        }
        debug_assert_eq!(self.changes.len(), node_mark);

        match best {
            Some((c, cost)) => {
                let applied = self.try_candidate(mst, v, c, parent_col, badness, n_regs);
                debug_assert_eq!(applied, Some(cost));
                (Some(c), cost)
            }
            None => (None, 0),
        }
    }

    fn materialize(&mut self, members: &[Value]) {
        for &m in members {
            if let Some(c) = self.state.get(m).tmp_col {
                self.state[m].orig_col = Some(c);
            }
            self.state[m].tmp_col = None;
            self.state[m].tmp_fixed = false;
            self.state[m].fixed = true;
        }
    }

    fn process_cloud(&mut self, cloud: &Cloud) {
        if self.dump_flags.contains(DumpFlags::CLOUD) {
            debug!(
                "co2: processing cloud master={:?} members={} cost={}",
                cloud.master,
                cloud.members.len(),
                cloud.cost
            );
        }
        self.clouds_processed += 1;

        let n_regs = self.class_size(cloud.master);
        if n_regs == 0 {
            return;
        }

        let mst = build_mst(cloud, self.ag);
        let badness = self.compute_badness(&mst, n_regs);
        let mark = self.changes.len();
        let (color, _cost) = self.coalesce_top_down(&mst, mst.root, None, &badness, n_regs);
        match color {
            Some(_) => self.materialize(&cloud.members),
            None => {
                warn!(
                    "co2: cloud master={:?} abandoned, no legal coloring for {:?}",
                    cloud.master, cloud.master
                );
                self.clouds_abandoned += 1;
                self.unwind_to(mark);
            }
        }
    }

    fn run(&mut self) {
        let mut clouds = build_clouds(self.ag);
        clouds.sort_by(|a, b| b.cost.cmp(&a.cost));
        for cloud in &clouds {
            self.process_cloud(cloud);
        }
    }
}

fn verify(
    graph: &Graph,
    constraints: &ConstraintModel,
    ig: &InterferenceGraph,
    colors: &SecondaryMap<Value, ValueState>,
) -> CodegenResult<()> {
    for v in graph.iter_values() {
        if graph.reg_class(v).is_none() {
            continue;
        }
        let c = colors.get(v).orig_col;
        let admissible = constraints.admissible(graph, v);
        let c = match c {
            Some(c) => c,
            None => return Err(CodegenError::AllocationFailed(v)),
        };
        if !admissible.contains(c) {
            return Err(CodegenError::AllocationFailed(v));
        }
        for n in ig.iter_neighbors(v) {
            if graph.reg_class(n).is_none() {
                continue;
            }
            if colors.get(n).orig_col == Some(c) {
                return Err(CodegenError::AllocationFailed(v));
            }
        }
    }
    Ok(())
}

/// Run `co2` over `graph`, writing the final color assignment back via
/// `Graph::set_register`. Returns the allocation summary on success, or
/// `AllocationFailed` if the post-condition verifier finds a constrained
/// value with no legal color. `config.dump_flags` gates which structured
/// dump events (`BEFORE`/`AFTER`/`CLOUD`, `SPEC_FULL.md` §6) are emitted;
/// rendering them is left to the caller, same as every other `log` call in
/// this crate.
pub fn allocate(
    graph: &mut Graph,
    constraints: &ConstraintModel,
    ig: &InterferenceGraph,
    ag: &AffinityGraph,
    config: &AllocatorConfig,
) -> CodegenResult<AllocationSummary> {
    if config.dump_flags.contains(DumpFlags::BEFORE) {
        debug!(
            "co2: before allocation: {} register-class-carrying values, {} affinity-graph members",
            graph.iter_values().filter(|&v| graph.reg_class(v).is_some()).count(),
            ag.members().count(),
        );
    }

    let mut coalescer = Coalescer::new(graph, ig, ag, constraints, config.dump_flags);
    coalescer.run();

    verify(graph, constraints, ig, &coalescer.state)?;

    for v in graph.iter_values() {
        if let Some(c) = coalescer.state.get(v).orig_col {
            graph.set_register(v, c);
        }
    }

    let summary = AllocationSummary {
        clouds_processed: coalescer.clouds_processed,
        clouds_abandoned: coalescer.clouds_abandoned,
    };
    info!(
        "co2: {} clouds processed, {} abandoned",
        summary.clouds_processed, summary.clouds_abandoned
    );
    if config.dump_flags.contains(DumpFlags::AFTER) {
        for v in graph.iter_values() {
            if let Some(c) = graph.register(v) {
                debug!("co2: after allocation: {:?} -> color {}", v, c);
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::dom::{Dfs, DominatorTree};
    use crate::ir::entities::Opcode;
    use crate::isa::registers::RegClassIndex;
    use crate::isa::INFO;
    use crate::liveness::LivenessChecker;
    use std::vec::Vec as StdVec;

    fn rc() -> Option<RegClassIndex> {
        Some(RegClassIndex::new(0))
    }

    #[test]
    fn single_block_cloud_picks_one_color_for_both() {
        // A two-block diamond whose join phi merges two never-simultaneously-
        // live operands: co2 should be free to give the phi and one operand
        // the same color (S6's "zero runtime copy moves" scenario, minus the
        // actual move-instruction count, which is an emission-level concern
        // out of this crate's scope).
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

        let v1 = g.make_value(left, Opcode::Normal, StdVec::new(), rc());
        let v2 = g.make_value(right, Opcode::Normal, StdVec::new(), rc());
        let phi = g.make_value(join, Opcode::Phi, std::vec![v1, v2], rc());

        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let liveness = LivenessChecker::new(&g, &dfs, &dom);
        let ig = InterferenceGraph::build(&g, &dfs, &liveness);
        let ag = AffinityGraph::build(&g, |_| 1);
        let constraints = ConstraintModel::new(&INFO, ScalarBitSet::new());

        let summary = allocate(&mut g, &constraints, &ig, &ag, &AllocatorConfig::default()).expect("legal coloring");
        assert_eq!(summary.clouds_processed, 1);
        assert_eq!(summary.clouds_abandoned, 0);

        let c_phi = g.register(phi).expect("phi colored");
        let c_v1 = g.register(v1).expect("v1 colored");
        assert_eq!(c_phi, c_v1);
        let _ = v2;
    }

    #[test]
    fn interference_overrides_affinity() {
        // v1 and v2 are both affinity-linked to the phi, but also
        // interfere with each other directly, so they cannot both match
        // the phi's color.
        let mut g = Graph::new();
        let entry = g.make_block();
        let join = g.make_block();
        g.set_entry(entry);
        g.add_edge(entry, join);
        g.add_edge(entry, join);

        let v1 = g.make_value(entry, Opcode::Normal, StdVec::new(), rc());
        let v2 = g.make_value(entry, Opcode::Add, std::vec![v1, v1], rc());
        let phi = g.make_value(join, Opcode::Phi, std::vec![v1, v2], rc());

        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let liveness = LivenessChecker::new(&g, &dfs, &dom);
        let ig = InterferenceGraph::build(&g, &dfs, &liveness);
        let ag = AffinityGraph::build(&g, |_| 1);
        let constraints = ConstraintModel::new(&INFO, ScalarBitSet::new());

        allocate(&mut g, &constraints, &ig, &ag, &AllocatorConfig::default()).expect("legal coloring");

        let c_v1 = g.register(v1).expect("v1 colored");
        let c_v2 = g.register(v2).expect("v2 colored");
        assert_ne!(c_v1, c_v2, "interfering values must never share a color");
        let _ = phi;
    }

    #[test]
    fn branching_cloud_respects_mutual_interference() {
        // A phi at `join` pulls affinity toward v1, v2, and v3, making it
        // the cloud's master and giving the MST a root with three distinct
        // children (not the linear two-node shape the other tests build).
        // v1/v2/v3 are all defined together in `entry` and each stay live
        // across their own branch until the phi consumes them, so they
        // mutually interfere: at most one of them can share the phi's
        // color, and a recolor of one must never silently clobber a
        // sibling the top-down search already committed earlier in the
        // same trial.
        let mut g = Graph::new();
        let entry = g.make_block();
        let b1 = g.make_block();
        let b2 = g.make_block();
        let b3 = g.make_block();
        let join = g.make_block();
        g.set_entry(entry);
        g.add_edge(entry, b1);
        g.add_edge(entry, b2);
        g.add_edge(entry, b3);
        g.add_edge(b1, join);
        g.add_edge(b2, join);
        g.add_edge(b3, join);

        let v1 = g.make_value(entry, Opcode::Normal, StdVec::new(), rc());
        let v2 = g.make_value(entry, Opcode::Normal, StdVec::new(), rc());
        let v3 = g.make_value(entry, Opcode::Normal, StdVec::new(), rc());
        let phi = g.make_value(join, Opcode::Phi, std::vec![v1, v2, v3], rc());

        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let liveness = LivenessChecker::new(&g, &dfs, &dom);
        let ig = InterferenceGraph::build(&g, &dfs, &liveness);
        let ag = AffinityGraph::build(&g, |_| 1);
        let constraints = ConstraintModel::new(&INFO, ScalarBitSet::new());

        allocate(&mut g, &constraints, &ig, &ag, &AllocatorConfig::default()).expect("legal coloring");

        let c1 = g.register(v1).expect("v1 colored");
        let c2 = g.register(v2).expect("v2 colored");
        let c3 = g.register(v3).expect("v3 colored");
        assert_ne!(c1, c2, "v1 and v2 interfere");
        assert_ne!(c1, c3, "v1 and v3 interfere");
        assert_ne!(c2, c3, "v2 and v3 interfere");
        let _ = phi;
    }

    #[test]
    fn empty_admissible_set_is_allocation_failed() {
        let mut g = Graph::new();
        let b = g.make_block();
        g.set_entry(b);
        let v = g.make_value(b, Opcode::Normal, StdVec::new(), rc());
        g.set_fixed_color(v, 15);

        let mut ignore = ScalarBitSet::new();
        ignore.insert(15);
        let constraints = ConstraintModel::new(&INFO, ignore);

        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let liveness = LivenessChecker::new(&g, &dfs, &dom);
        let ig = InterferenceGraph::build(&g, &dfs, &liveness);
        let ag = AffinityGraph::build(&g, |_| 1);

        let err = allocate(&mut g, &constraints, &ig, &ag, &AllocatorConfig::default()).unwrap_err();
        assert_eq!(err, CodegenError::AllocationFailed(v));
    }
}
