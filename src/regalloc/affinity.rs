//! Affinity graph (C7).
//!
//! Collected from phi operand/result pairs: each predecessor's incoming
//! value and the phi it feeds are a candidate affinity edge, weighted by
//! that predecessor's estimated execution frequency (defaulting to 1 when no
//! profile is available, per `SPEC_FULL.md` §4.7). Target-specific
//! two-address encoding constraints are a second affinity source the
//! original names, but they are a consequence of instruction selection,
//! which §1 places out of scope, so this collector's only edges are
//! phi-sourced.

use crate::entity::SecondaryMap;
use crate::ir::{Block, Graph, Value};
use std::vec::Vec;

/// One affinity edge: a same-color preference worth `cost` if honored.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AffinityEdge {
    pub neighbor: Value,
    pub cost: u32,
}

/// The affinity graph: an undirected, weighted graph of copy-related
/// values. Vertices with no affinity edges are not part of any cloud.
#[derive(Default)]
pub struct AffinityGraph {
    edges: SecondaryMap<Value, Vec<AffinityEdge>>,
}

impl AffinityGraph {
    /// Collect affinity edges from every phi in `graph`. `block_freq`
    /// estimates a block's execution frequency; pass `|_| 1` when no
    /// profile is available.
    pub fn build(graph: &Graph, block_freq: impl Fn(Block) -> u32) -> Self {
        let mut ag = AffinityGraph::default();
        for block in graph.iter_blocks() {
            for &inst in graph.insts(block) {
                if !graph.is_phi(inst) || graph.reg_class(inst).is_none() {
                    continue;
                }
                for (slot, &operand) in graph.operands(inst).iter().enumerate() {
                    if graph.reg_class(operand).is_none() {
                        continue;
                    }
                    let pred = graph.phi_pred_block(inst, slot);
                    let cost = block_freq(pred).max(1);
                    ag.add_edge(inst, operand, cost);
                }
            }
        }
        ag
    }

    fn add_edge(&mut self, a: Value, b: Value, cost: u32) {
        if a == b {
            return;
        }
        Self::add_one_side(&mut self.edges, a, b, cost);
        Self::add_one_side(&mut self.edges, b, a, cost);
    }

    fn add_one_side(edges: &mut SecondaryMap<Value, Vec<AffinityEdge>>, from: Value, to: Value, cost: u32) {
        match edges[from].iter_mut().find(|e| e.neighbor == to) {
            Some(e) => e.cost += cost,
            None => edges[from].push(AffinityEdge { neighbor: to, cost }),
        }
    }

    /// `v`'s affinity edges, undirected (also reachable from the other
    /// endpoint).
    pub fn neighbors(&self, v: Value) -> &[AffinityEdge] {
        self.edges.get(v)
    }

    /// The number of affinity edges touching `v`.
    pub fn degree(&self, v: Value) -> usize {
        self.edges.get(v).len()
    }

    /// Every value with at least one affinity edge (a cloud member
    /// candidate).
    pub fn members(&self) -> impl Iterator<Item = Value> + '_ {
        self.edges.iter().filter(|(_, e)| !e.is_empty()).map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::entities::Opcode;
    use crate::isa::registers::RegClassIndex;
    use crate::entity::EntityRef;
    use std::vec::Vec as StdVec;

    fn rc() -> Option<RegClassIndex> {
        Some(RegClassIndex::new(0))
    }

    #[test]
    fn phi_operands_gain_symmetric_affinity() {
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

        let ag = AffinityGraph::build(&g, |_| 1);
        assert_eq!(ag.degree(phi), 2);
        assert_eq!(ag.neighbors(v1).len(), 1);
        assert_eq!(ag.neighbors(v1)[0].neighbor, phi);
    }

    #[test]
    fn repeated_phi_operand_accumulates_cost() {
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
        let phi = g.make_value(join, Opcode::Phi, std::vec![v1, v1], rc());

        let ag = AffinityGraph::build(&g, |b| if b == left { 7 } else { 1 });
        assert_eq!(ag.neighbors(phi).len(), 1);
        assert_eq!(ag.neighbors(phi)[0].cost, 8);
    }
}
