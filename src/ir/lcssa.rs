//! LCSSA (loop-closed SSA) construction (C4), a precondition for the loop
//! unroller (C5): every value used outside its defining loop must be
//! referenced through a single-operand phi placed in the loop's exit block,
//! so duplicating the loop body only ever has to rewire that one phi per
//! unrolled iteration, never every transitive out-of-loop use.
//!
//! This builder targets loops whose exit blocks have already had their
//! critical edges split (each exit block has exactly one predecessor, the
//! loop-exiting block); a loop with a merged, multi-predecessor exit block is
//! left untouched; `assure_lcssa` is a no-op for it; it is the caller's
//! responsibility to split critical edges first; this crate's scope does not
//! include a CFG edge-splitting pass of its own.

use crate::ir::entities::{Block, Opcode};
use crate::ir::graph::Graph;
use crate::ir::loop_info::{Loop, LoopForest};
use std::vec::Vec;

/// Run LCSSA construction over every loop in `forest`. Idempotent: calling
/// this twice on the same graph inserts no additional phis.
pub fn assure_lcssa(graph: &mut Graph, forest: &LoopForest) {
    for lp in forest.loops() {
        assure_lcssa_for_loop(graph, lp);
    }
}

fn exit_blocks(graph: &Graph, lp: &Loop) -> Vec<Block> {
    let mut exits = Vec::new();
    for &m in &lp.members {
        for &s in graph.succs(m) {
            if !lp.contains(s) && !exits.contains(&s) {
                exits.push(s);
            }
        }
    }
    exits
}

/// The block that governs one use of a value: for a phi operand, the
/// predecessor the operand flows from; for anything else, the user's own
/// block. LCSSA cares about this, not the user's literal block, because a
/// phi operand "happens" at the end of its predecessor, not inside the
/// phi's own block.
fn use_block(graph: &Graph, user: crate::ir::entities::Value, operand_index: usize) -> Block {
    if graph.is_phi(user) {
        graph.phi_pred_block(user, operand_index)
    } else {
        graph.block_of(user)
    }
}

fn find_existing_exit_phi(
    graph: &Graph,
    exit: Block,
    v: crate::ir::entities::Value,
) -> Option<crate::ir::entities::Value> {
    graph
        .insts(exit)
        .iter()
        .copied()
        .find(|&i| graph.is_phi(i) && graph.operands(i).len() == 1 && graph.operands(i)[0] == v)
}

fn assure_lcssa_for_loop(graph: &mut Graph, lp: &Loop) {
    for exit in exit_blocks(graph, lp) {
        if graph.preds(exit).len() != 1 {
            // A merged exit needs critical-edge splitting first; skip it
            // rather than placing a phi whose single operand would be wrong
            // for the other incoming paths.
            continue;
        }

        let candidates: Vec<crate::ir::entities::Value> = graph
            .iter_values()
            .filter(|&v| lp.contains(graph.block_of(v)))
            .collect();

        for v in candidates {
            let users: Vec<crate::ir::entities::Value> = graph.out_edges(v).to_vec();
            let needs_phi = users.iter().any(|&user| {
                graph
                    .operands(user)
                    .iter()
                    .enumerate()
                    .any(|(i, &op)| op == v && use_block(graph, user, i) == exit)
            });
            if !needs_phi {
                continue;
            }

            let phi = match find_existing_exit_phi(graph, exit, v) {
                Some(phi) => phi,
                None => {
                    let rc = graph.reg_class(v);
                    graph.make_phi(exit, std::vec![v], rc)
                }
            };
            redirect_out_of_loop_uses(graph, exit, v, phi);
        }
    }
}

fn redirect_out_of_loop_uses(
    graph: &mut Graph,
    exit: Block,
    v: crate::ir::entities::Value,
    phi: crate::ir::entities::Value,
) {
    let users: Vec<crate::ir::entities::Value> = graph.out_edges(v).to_vec();
    for user in users {
        if user == phi {
            continue;
        }
        let slots: Vec<usize> = graph
            .operands(user)
            .iter()
            .enumerate()
            .filter(|&(_, &op)| op == v)
            .map(|(i, _)| i)
            .collect();
        for i in slots {
            if use_block(graph, user, i) == exit {
                graph.set_operand_at(user, i, phi);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dom::Dfs;
    use crate::ir::entities::Opcode as Op;
    use crate::isa::registers::RegClassIndex;
    use std::vec::Vec as StdVec;

    fn rc() -> Option<RegClassIndex> {
        Some(RegClassIndex::new(0))
    }

    fn build_simple_loop(graph: &mut Graph) -> (crate::ir::entities::Value, crate::ir::entities::Value) {
        // entry -> header -> body -> header (back edge)
        //                  \-> exit
        let entry = graph.make_block();
        let header = graph.make_block();
        let body = graph.make_block();
        let exit = graph.make_block();
        graph.set_entry(entry);
        graph.add_edge(entry, header);
        graph.add_edge(header, body);
        graph.add_edge(body, header);
        graph.add_edge(header, exit);

        let def = graph.make_value(body, Op::Normal, StdVec::new(), rc());
        let outside = graph.make_value(exit, Op::Add, std::vec![def, def], rc());
        (def, outside)
    }

    #[test]
    fn inserts_single_operand_exit_phi() {
        let mut g = Graph::new();
        let (def, outside) = build_simple_loop(&mut g);

        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        assure_lcssa(&mut g, &forest);

        let exit_block = g.block_of(outside);
        let phis: StdVec<_> = g.insts(exit_block).iter().copied().filter(|&i| g.is_phi(i)).collect();
        assert_eq!(phis.len(), 1);
        assert_eq!(g.operands(phis[0]), &[def]);
        assert_eq!(g.operands(outside), &[phis[0], phis[0]]);
    }

    #[test]
    fn idempotent_on_repeated_runs() {
        let mut g = Graph::new();
        let (_, outside) = build_simple_loop(&mut g);

        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        assure_lcssa(&mut g, &forest);
        let first_count = g.num_values();
        assure_lcssa(&mut g, &forest);
        assert_eq!(g.num_values(), first_count, "second run must add no phis");
        let _ = outside;
    }

    #[test]
    fn in_loop_use_gets_no_exit_phi() {
        // A use inside the loop body itself must not trigger an exit phi.
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

        let def = g.make_value(body, Opcode::Normal, StdVec::new(), rc());
        let _in_loop_use = g.make_value(body, Opcode::Add, std::vec![def, def], rc());

        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        let before = g.num_values();
        assure_lcssa(&mut g, &forest);
        assert_eq!(g.num_values(), before);
        let _ = exit;
    }
}
