//! SSA-preserving loop unrolling (C5).
//!
//! Operates per innermost natural loop, after `assure_lcssa` has run over the
//! same `LoopForest` (a precondition this module does not check structurally,
//! only assumes — `SPEC_FULL.md` §4.5 treats LCSSA as an upstream pass's
//! responsibility, not something each consumer re-verifies). Two independent
//! pieces:
//!
//! - [`find_suitable_factor`]: decide how many times to duplicate a loop's
//!   body from the shape of its header phi and its `Cmp`, never touching the
//!   graph.
//! - [`unroll_loop`]/[`unroll_loops`]: the duplication itself, grounded in
//!   `crate::ir::graph::Graph::exact_copy` plus the rewiring primitives
//!   (`replace_operand`, `push_operand`, `set_operand_at`, `push_pred`,
//!   `redirect_pred`) that module's doc comments already call out as
//!   existing for this purpose.
//!
//! A duplication round never mutates a slot on the original IR to "become"
//! the copy; every original-to-copy correspondence lives in a short-lived
//! `HashMap` discarded at the end of the round.

use crate::context::AllocatorConfig;
use crate::ir::dom::DominatorTree;
use crate::ir::entities::{Block, Opcode, Value};
use crate::ir::graph::Graph;
use crate::ir::loop_info::{Loop, LoopForest};
use log::debug;
use std::collections::HashMap;
use std::vec::Vec;

/// Outcome of a full pass over a graph's innermost loops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnrollSummary {
    /// Innermost loops considered.
    pub attempted: usize,
    /// Loops actually duplicated (a suitable factor greater than one was
    /// found and the size gate passed).
    pub unrolled: usize,
}

/// Run the unroller over every innermost loop in `forest`, honoring
/// `config`'s size and factor caps. Returns how many loops were actually
/// duplicated.
pub fn unroll_loops(graph: &mut Graph, dom: &DominatorTree, forest: &LoopForest, config: &AllocatorConfig) -> UnrollSummary {
    let mut summary = UnrollSummary::default();
    for lp in forest.innermost_loops() {
        summary.attempted += 1;
        if unroll_one(graph, dom, lp, config) {
            summary.unrolled += 1;
        }
    }
    summary
}

fn unroll_one(graph: &mut Graph, dom: &DominatorTree, lp: &Loop, config: &AllocatorConfig) -> bool {
    let header = match find_header(dom, lp) {
        Some(h) => h,
        None => {
            debug!("unroll: loop rejected: no block dominates every member");
            return false;
        }
    };

    if lp.node_count(graph) > config.max_unroll_size {
        debug!("unroll: loop at {:?} rejected: exceeds max_unroll_size", header);
        return false;
    }

    let factor = find_suitable_factor(graph, header, lp, config.max_unroll_factor);
    if factor <= 1 {
        debug!("unroll: loop at {:?} rejected: no suitable factor", header);
        return false;
    }

    unroll_loop(graph, lp, header, factor);
    debug!("unroll: loop at {:?} factor={}", header, factor);
    true
}

/// Find a block in `lp` that dominates every member, walking up the
/// dominator tree from the loop's recorded header. `LoopForest` already
/// seeds `header` from the loop's back-edge target, which for a reducible
/// natural loop always dominates its members; this just confirms that
/// invariant instead of assuming it, so a malformed or irreducible input
/// is rejected rather than mishandled.
fn find_header(dom: &DominatorTree, lp: &Loop) -> Option<Block> {
    let header = lp.header;
    if lp.members.iter().all(|&m| dom.dominates(header, m)) {
        Some(header)
    } else {
        None
    }
}

/// Decide how many times to duplicate `lp`'s body, given its header `header`
/// and a cap `max` on both a full unroll's trip count and the fallback
/// power-of-two factor.
///
/// Looks for exactly one of each of these shapes in `header`:
/// - a single `Cmp(LessEqual)` comparing a header phi against a compile-time
///   `IConst` limit;
/// - that phi's operands split into exactly one constant ("init") and
///   exactly one `Add(phi_or_wrapper, step_const)` ("step").
///
/// Any deviation — more than one candidate `Cmp`, an unrecognized phi operand,
/// a zero step, or a malformed trip-count — rejects the loop by returning 1
/// rather than failing the whole pass.
pub fn find_suitable_factor(graph: &Graph, header: Block, lp: &Loop, max: usize) -> usize {
    let reject = |msg: &str| {
        debug!("unroll: loop at {:?} rejected: {}", header, msg);
        1usize
    };

    let cmps: Vec<Value> = graph
        .insts(header)
        .iter()
        .copied()
        .filter(|&v| matches!(graph.opcode(v), Opcode::Cmp(_)))
        .collect();
    if cmps.len() != 1 {
        return reject("zero or more than one Cmp in the header");
    }
    let cmp = cmps[0];
    if graph.cmp_relation(cmp) != Some(crate::ir::entities::CmpRelation::LessEqual) {
        return reject("header Cmp is not a LessEqual relation");
    }
    let operands = graph.operands(cmp);
    if operands.len() != 2 {
        return reject("Cmp does not have exactly two operands");
    }

    let (phi, limit_val) = match identify_phi_and_const(graph, header, operands[0], operands[1]) {
        Some(pair) => pair,
        None => return reject("Cmp is not phi-vs-constant"),
    };
    let mut limit = match graph.iconst(limit_val) {
        Some(c) => c,
        None => return reject("Cmp's constant side is not an IConst"),
    };

    if !lp.contains(header) || graph.block_of(phi) != header {
        return reject("comparison phi is not defined in the header");
    }

    let mut consts = Vec::new();
    let mut steps = Vec::new();
    for &operand in graph.operands(phi) {
        if let Some(c) = graph.iconst(operand) {
            consts.push(c);
        } else if let Some(step) = step_from_add(graph, phi, operand) {
            steps.push(step);
        } else {
            return reject("header phi has an operand that is neither a constant nor phi+const");
        }
    }
    if consts.len() != 1 || steps.len() != 1 {
        return reject("header phi does not split into exactly one init and one step operand");
    }

    let mut init = consts[0];
    let mut step = steps[0];
    if init > limit {
        std::mem::swap(&mut init, &mut limit);
        step = -step;
    }
    if step == 0 {
        return reject("induction step is zero");
    }
    if step < 0 {
        return reject("induction step is negative after normalization");
    }

    let diff = limit - init + step;
    if diff <= 0 {
        return reject("trip count is not positive");
    }
    if diff % step != 0 {
        return reject("trip count does not divide evenly by the step");
    }
    let loop_count = (diff / step) as usize;
    if loop_count == 0 {
        return reject("trip count is zero");
    }

    if loop_count <= max {
        return loop_count;
    }

    let mut d = 1usize;
    while d <= loop_count {
        if loop_count % d == 0 {
            let candidate = loop_count / d;
            if candidate <= max && candidate.is_power_of_two() {
                return candidate;
            }
        }
        d += 1;
    }
    max
}

fn identify_phi_and_const(graph: &Graph, header: Block, a: Value, b: Value) -> Option<(Value, Value)> {
    let a_is_phi = graph.is_phi(a) && graph.block_of(a) == header;
    let b_is_phi = graph.is_phi(b) && graph.block_of(b) == header;
    let a_is_const = graph.iconst(a).is_some();
    let b_is_const = graph.iconst(b).is_some();
    if a_is_phi && b_is_const {
        Some((a, b))
    } else if b_is_phi && a_is_const {
        Some((b, a))
    } else {
        None
    }
}

/// If `operand` is `Add(x, c)` or `Add(c, x)` where `x` is `phi` itself or a
/// degenerate one-input phi wrapping it, return the constant step `c`.
fn step_from_add(graph: &Graph, phi: Value, operand: Value) -> Option<i64> {
    if !matches!(graph.opcode(operand), Opcode::Add) {
        return None;
    }
    let add_operands = graph.operands(operand);
    if add_operands.len() != 2 {
        return None;
    }
    let refers_to_phi = |v: Value| v == phi || is_degenerate_wrapper(graph, phi, v);
    if refers_to_phi(add_operands[0]) {
        graph.iconst(add_operands[1])
    } else if refers_to_phi(add_operands[1]) {
        graph.iconst(add_operands[0])
    } else {
        None
    }
}

fn is_degenerate_wrapper(graph: &Graph, phi: Value, v: Value) -> bool {
    graph.is_phi(v) && graph.operands(v).len() == 1 && graph.operands(v)[0] == phi
}

/// Duplicate `lp`'s body `factor - 1` times, chaining each copy's header
/// snapshot into the next so the shared header's back edge ends up fed by
/// the last copy produced (`SPEC_FULL.md` §4.4's six-step rewiring).
pub fn unroll_loop(graph: &mut Graph, lp: &Loop, header: Block, factor: usize) {
    if factor <= 1 {
        return;
    }

    let header_phis: Vec<Value> = graph.insts(header).iter().copied().filter(|&v| graph.is_phi(v)).collect();
    let latch_slots: Vec<usize> = graph
        .preds(header)
        .iter()
        .enumerate()
        .filter(|&(_, &p)| lp.contains(p))
        .map(|(i, _)| i)
        .collect();
    let original_latch_at: Vec<Block> = latch_slots.iter().map(|&i| graph.preds(header)[i]).collect();
    let original_slot_value: Vec<Vec<Value>> = header_phis
        .iter()
        .map(|&phi| latch_slots.iter().map(|&i| graph.operands(phi)[i]).collect())
        .collect();

    for _ in 0..(factor - 1) {
        duplicate_round(graph, lp, header, &header_phis, &latch_slots, &original_latch_at, &original_slot_value);
    }
}

#[allow(clippy::too_many_arguments)]
fn duplicate_round(
    graph: &mut Graph,
    lp: &Loop,
    header: Block,
    header_phis: &[Value],
    latch_slots: &[usize],
    original_latch_at: &[Block],
    original_slot_value: &[Vec<Value>],
) {
    let members: Vec<Block> = lp.members.clone();

    // Step 1/2: shallow-copy every member block and every value defined in
    // it. Operands are left pointing at the originals for now.
    let mut block_link: HashMap<Block, Block> = HashMap::new();
    for &b in &members {
        block_link.insert(b, graph.make_block());
    }
    let mut value_link: HashMap<Value, Value> = HashMap::new();
    for &b in &members {
        let copy_block = block_link[&b];
        let insts: Vec<Value> = graph.insts(b).to_vec();
        for v in insts {
            let copy = graph.exact_copy(v, copy_block);
            value_link.insert(v, copy);
        }
    }

    // Step 2b: internal CFG edges, skipping any edge whose target is the
    // header — its predecessor list is rebuilt explicitly below, since the
    // header is not itself duplicated into a second live copy; its snapshot
    // copy only hosts this round's phi values.
    for &b in &members {
        let succs: Vec<Block> = graph.succs(b).to_vec();
        for s in succs {
            if lp.contains(s) && s != header {
                graph.add_edge(block_link[&b], block_link[&s]);
            }
        }
    }

    // Step 4 (header phis, done first so step 5 below can skip them): the
    // header's copy is a pure snapshot of header's *current* predecessors
    // and phi operand values — "the copy-header's inputs come from the
    // original predecessors only".
    let header_copy = block_link[&header];
    let header_preds_snapshot: Vec<Block> = graph.preds(header).to_vec();
    for &p in &header_preds_snapshot {
        graph.push_pred(header_copy, p);
    }
    for &phi in header_phis {
        let phi_copy = value_link[&phi];
        let operand_snapshot: Vec<Value> = graph.operands(phi).to_vec();
        for val in operand_snapshot {
            graph.push_operand(phi_copy, val);
        }
    }

    // Step 5: for every other duplicated value, replace each operand that
    // was itself duplicated with its copy.
    let header_phi_set: Vec<Value> = header_phis.to_vec();
    for (&orig, &copy) in value_link.iter() {
        if header_phi_set.contains(&orig) {
            continue;
        }
        let operand_snapshot: Vec<Value> = graph.operands(orig).to_vec();
        for old in operand_snapshot {
            if let Some(&new) = value_link.get(&old) {
                graph.replace_operand(copy, old, new);
            }
        }
    }

    // Step 3: every member's edges to blocks outside the loop get a parallel
    // edge from the copy, and any phi at the far end gains a matching
    // operand.
    for &b in &members {
        let succs: Vec<Block> = graph.succs(b).to_vec();
        for s in succs {
            if lp.contains(s) {
                continue;
            }
            let pred_idx = match graph.pred_index(s, b) {
                Some(i) => i,
                None => continue,
            };
            let copy_block = block_link[&b];
            graph.push_pred(s, copy_block);
            let phis: Vec<Value> = graph.insts(s).iter().copied().filter(|&v| graph.is_phi(v)).collect();
            for phi in phis {
                let val = graph.operands(phi)[pred_idx];
                let new_val = value_link.get(&val).copied().unwrap_or(val);
                graph.push_operand(phi, new_val);
            }
        }
    }

    // End keep-alive: any duplicated value named in the keep-alive sink's
    // operand list picks up the copy too.
    let ends: Vec<Value> = graph.iter_values().filter(|&v| graph.is_end(v)).collect();
    for end in ends {
        let keepalive: Vec<Value> = graph.operands(end).to_vec();
        for v in keepalive {
            if let Some(&copy) = value_link.get(&v) {
                graph.add_end_keepalive(end, copy);
            }
        }
    }

    // Step 4 (continued): redirect the shared header's back-edge slots to
    // this round's copies — "the new header inputs from that copy; the old
    // iteration chains into the new one".
    for (slot_pos, &slot) in latch_slots.iter().enumerate() {
        let new_pred = block_link[&original_latch_at[slot_pos]];
        graph.redirect_pred(header, slot, new_pred);
        for (phi_pos, &phi) in header_phis.iter().enumerate() {
            let orig_val = original_slot_value[phi_pos][slot_pos];
            if let Some(&new_val) = value_link.get(&orig_val) {
                graph.set_operand_at(phi, slot, new_val);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::dom::{DominatorTree, Dfs};
    use crate::ir::entities::CmpRelation;
    use crate::isa::registers::RegClassIndex;
    use std::vec::Vec as StdVec;

    fn rc() -> Option<RegClassIndex> {
        Some(RegClassIndex::new(0))
    }

    /// `for (i = 0; i <= 7; i += 1) { s += a[i]; }`, shaped as
    /// entry -> header -> body -> header (back edge), header -> exit, with
    /// `header` carrying the induction phi `i` and the accumulator phi `s`,
    /// and `exit` carrying an LCSSA phi for `s`'s final value. Matches the
    /// "full unroll of a compile-time-bounded simple counted loop" scenario.
    fn build_countable_loop(graph: &mut Graph) -> (Block, Block, Value) {
        let entry = graph.make_block();
        let header = graph.make_block();
        let body = graph.make_block();
        let exit = graph.make_block();
        graph.set_entry(entry);
        graph.add_edge(entry, header);
        graph.add_edge(header, body);
        graph.add_edge(body, header);
        graph.add_edge(header, exit);

        let zero = graph.make_value(entry, Opcode::IConst(0), StdVec::new(), None);
        let seed = graph.make_value(entry, Opcode::IConst(0), StdVec::new(), rc());
        let limit = graph.make_value(entry, Opcode::IConst(7), StdVec::new(), None);

        // Placeholders patched after `step`/`acc_next` are created, since the
        // header phis and the body's uses of them are mutually circular.
        let i_phi = graph.make_phi(header, StdVec::new(), rc());
        let s_phi = graph.make_phi(header, StdVec::new(), rc());
        let cmp = graph.make_value(header, Opcode::Cmp(CmpRelation::LessEqual), std::vec![i_phi, limit], None);
        let _ = cmp;

        let step_const = graph.make_value(body, Opcode::IConst(1), StdVec::new(), None);
        let i_next = graph.make_value(body, Opcode::Add, std::vec![i_phi, step_const], rc());
        let elem = graph.make_value(body, Opcode::Normal, std::vec![i_phi], rc());
        let s_next = graph.make_value(body, Opcode::Add, std::vec![s_phi, elem], rc());

        graph.push_operand(i_phi, zero);
        graph.push_operand(i_phi, i_next);
        graph.push_operand(s_phi, seed);
        graph.push_operand(s_phi, s_next);

        let s_exit = graph.make_phi(exit, std::vec![s_phi], rc());

        (header, exit, s_exit)
    }

    #[test]
    fn full_unroll_factor_matches_static_trip_count() {
        let mut g = Graph::new();
        let (header, _exit, _s_exit) = build_countable_loop(&mut g);
        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let forest = LoopForest::compute(&g, &dfs);
        let lp = forest.innermost_loops()[0];

        let factor = find_suitable_factor(&g, header, lp, 8);
        assert_eq!(factor, 8);
        let _ = dom;
    }

    #[test]
    fn factor_falls_back_to_largest_power_of_two_divisor() {
        let mut g = Graph::new();
        let (header, _exit, _s_exit) = build_countable_loop(&mut g);
        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        let lp = forest.innermost_loops()[0];

        // Trip count is 8; capping `max` at 3 forces the fallback scan,
        // which should pick 2 (the largest power-of-two divisor of 8 that
        // does not exceed 3).
        let factor = find_suitable_factor(&g, header, lp, 3);
        assert_eq!(factor, 2);
    }

    #[test]
    fn zero_step_is_rejected() {
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

        let zero = g.make_value(entry, Opcode::IConst(0), StdVec::new(), None);
        let limit = g.make_value(entry, Opcode::IConst(7), StdVec::new(), None);
        let i_phi = g.make_phi(header, StdVec::new(), None);
        g.make_value(header, Opcode::Cmp(CmpRelation::LessEqual), std::vec![i_phi, limit], None);
        let step_const = g.make_value(body, Opcode::IConst(0), StdVec::new(), None);
        let i_next = g.make_value(body, Opcode::Add, std::vec![i_phi, step_const], None);
        g.push_operand(i_phi, zero);
        g.push_operand(i_phi, i_next);

        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        let lp = forest.innermost_loops()[0];
        assert_eq!(find_suitable_factor(&g, header, lp, 8), 1);
    }

    #[test]
    fn loop_with_no_recognizable_induction_is_rejected() {
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

        let cond = g.make_value(entry, Opcode::Normal, StdVec::new(), None);
        let _ = g.make_value(header, Opcode::Normal, std::vec![cond], None);

        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        let lp = forest.innermost_loops()[0];
        assert_eq!(find_suitable_factor(&g, header, lp, 8), 1);
    }

    #[test]
    fn oversized_loop_is_never_unrolled() {
        let mut g = Graph::new();
        let (header, _exit, _s_exit) = build_countable_loop(&mut g);
        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let forest = LoopForest::compute(&g, &dfs);

        let mut config = AllocatorConfig::default();
        config.max_unroll_size = 0;
        let summary = unroll_loops(&mut g, &dom, &forest, &config);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.unrolled, 0);
        let _ = header;
    }

    #[test]
    fn full_unroll_grows_header_phi_predecessors_by_k_minus_one() {
        let mut g = Graph::new();
        let (header, exit, s_exit) = build_countable_loop(&mut g);
        let dfs = Dfs::compute(&g);
        let dom = DominatorTree::compute(&g, &dfs);
        let forest = LoopForest::compute(&g, &dfs);
        let lp = forest.innermost_loops()[0].clone();

        let before = g.preds(header).len();
        let factor = find_suitable_factor(&g, header, &lp, 8);
        assert_eq!(factor, 8);
        unroll_loop(&mut g, &lp, header, factor);

        // The shared header block itself never grows a predecessor slot
        // (redirect_pred replaces in place); what grows is the number of
        // distinct copy blocks chained in behind it.
        assert_eq!(g.preds(header).len(), before);
        assert!(g.num_blocks() > 4);

        // Every copy's exit edge reached `exit` in parallel, so its phi
        // gained one operand per copy produced (k - 1 = 7 more).
        assert_eq!(g.operands(s_exit).len(), 1 + (factor - 1));
        let _ = dom;
        let _ = exit;
    }
}
