//! The abstract graph container.
//!
//! Per the crate's scope, the surrounding IR is treated as an external
//! collaborator exposing a small set of read/write primitives (`iter_blocks`,
//! `block_of`, `opcode`, `operands`, `out_edges`, `set_register`, ...). Since
//! no separate IR crate lives in this workspace, `Graph` plays that role
//! directly: a dense, index-based container (`PrimaryMap`s of `BlockData` and
//! `ValueData`) that also maintains each value's use-list incrementally, so
//! `out_edges` is O(1) instead of a full scan.

use crate::entity::{EntityRef, PrimaryMap, SecondaryMap};
use crate::isa::registers::RegClassIndex;
use crate::ir::entities::{Block, BlockData, CmpRelation, Opcode, Value, ValueData};
use std::vec::Vec;

/// The graph: blocks, values, and the edges between them.
#[derive(Clone, Default)]
pub struct Graph {
    blocks: PrimaryMap<Block, BlockData>,
    values: PrimaryMap<Value, ValueData>,
    uses: SecondaryMap<Value, Vec<Value>>,
    entry: Option<Block>,
    /// The allocator's final color assignment, written back once per value
    /// at commit time (§6 `set_register`). Distinct from `fixed_color`,
    /// which is an input constraint, not an output.
    registers: SecondaryMap<Value, Option<u8>>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Graph {
            blocks: PrimaryMap::new(),
            values: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            entry: None,
            registers: SecondaryMap::new(),
        }
    }

    /// Create a new, empty block.
    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Designate `block` as the graph's entry point.
    pub fn set_entry(&mut self, block: Block) {
        self.entry = Some(block);
    }

    /// The graph's entry block.
    ///
    /// # Panics
    /// Panics if no entry block has been set; callers are expected to set
    /// one before running any analysis.
    pub fn entry(&self) -> Block {
        self.entry.expect("graph entry block not set")
    }

    /// Add a CFG edge `from -> to`. `to` gains a new predecessor slot whose
    /// index phi operands on `to` must line up with.
    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    /// Append a new value to `block`, registering it in every operand's
    /// use-list.
    pub fn make_value(
        &mut self,
        block: Block,
        opcode: Opcode,
        operands: Vec<Value>,
        reg_class: Option<RegClassIndex>,
    ) -> Value {
        for &op in &operands {
            self.uses[op].push(Value::new(self.values.len()));
        }
        let v = self.values.push(ValueData {
            block,
            opcode,
            operands: operands.into(),
            reg_class,
            fixed_color: None,
        });
        self.blocks[block].insts.push(v);
        v
    }

    /// Append a new phi to `block`, placed before the first non-phi
    /// instruction so `insts` keeps its "phis first" invariant. Used by the
    /// LCSSA builder to insert exit phis into a block that may already hold
    /// other phis or (after unrolling) ordinary instructions.
    pub fn make_phi(&mut self, block: Block, operands: Vec<Value>, reg_class: Option<RegClassIndex>) -> Value {
        for &op in &operands {
            self.uses[op].push(Value::new(self.values.len()));
        }
        let v = self.values.push(ValueData {
            block,
            opcode: Opcode::Phi,
            operands: operands.into(),
            reg_class,
            fixed_color: None,
        });
        let mut pos = self.blocks[block].insts.len();
        for (i, &inst) in self.blocks[block].insts.iter().enumerate() {
            if !matches!(self.values[inst].opcode, Opcode::Phi) {
                pos = i;
                break;
            }
        }
        self.blocks[block].insts.insert(pos, v);
        v
    }

    /// Iterate over every block, in creation order.
    pub fn iter_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over every value, in creation order.
    pub fn iter_values(&self) -> impl Iterator<Item = Value> + '_ {
        self.values.keys()
    }

    /// Number of values.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Predecessors of `block`, stable order.
    pub fn preds(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    /// Successors of `block`, stable order.
    pub fn succs(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// Values defined in `block`, program order.
    pub fn insts(&self, block: Block) -> &[Value] {
        &self.blocks[block].insts
    }

    /// The block `value` is defined in.
    pub fn block_of(&self, value: Value) -> Block {
        self.values[value].block
    }

    /// `value`'s opcode.
    pub fn opcode(&self, value: Value) -> Opcode {
        self.values[value].opcode
    }

    /// `value`'s operands.
    pub fn operands(&self, value: Value) -> &[Value] {
        &self.values[value].operands
    }

    /// Values that use `value` as an operand (its use-list).
    pub fn out_edges(&self, value: Value) -> &[Value] {
        self.uses.get(value)
    }

    /// `value`'s required register class, if it is register-allocated.
    pub fn reg_class(&self, value: Value) -> Option<RegClassIndex> {
        self.values[value].reg_class
    }

    /// `value`'s fixed-color constraint, if any.
    pub fn fixed_color(&self, value: Value) -> Option<u8> {
        self.values[value].fixed_color
    }

    /// Write a fixed-color constraint onto `value` (used by the caller
    /// setting up two-address/fixed-operand constraints; distinct from the
    /// allocator's own `set_register` commit).
    pub fn set_fixed_color(&mut self, value: Value, color: u8) {
        self.values[value].fixed_color = Some(color);
    }

    /// Is `value` relevant to liveness queries?
    pub fn is_liveness_relevant(&self, value: Value) -> bool {
        self.opcode(value).is_liveness_relevant()
    }

    /// Is `value` a phi?
    pub fn is_phi(&self, value: Value) -> bool {
        self.opcode(value).is_phi()
    }

    /// Is `value` the `End` keep-alive sink?
    pub fn is_end(&self, value: Value) -> bool {
        matches!(self.opcode(value), Opcode::End)
    }

    /// Is `value` a structural, liveness-ignored node?
    pub fn is_ignored(&self, value: Value) -> bool {
        matches!(self.opcode(value), Opcode::Ignored)
    }

    /// The predecessor index of `pred` within `block`'s predecessor list, if
    /// `pred` is indeed a predecessor. Used to map a phi operand slot back to
    /// its source block and vice versa.
    pub fn pred_index(&self, block: Block, pred: Block) -> Option<usize> {
        self.blocks[block].preds.iter().position(|&p| p == pred)
    }

    /// For a phi `phi_val` defined in `block` and operand index `i`, the
    /// predecessor block that operand flows from.
    pub fn phi_pred_block(&self, phi_val: Value, operand_index: usize) -> Block {
        debug_assert!(self.is_phi(phi_val));
        self.blocks[self.block_of(phi_val)].preds[operand_index]
    }

    /// Replace operand `old` with `new` on `user`, updating use-lists on
    /// both sides. Used by the unroller's rewiring step; every operand
    /// occurrence of `old` is replaced, not just the first.
    pub fn replace_operand(&mut self, user: Value, old: Value, new: Value) {
        let mut changed = 0usize;
        for op in &mut self.values[user].operands {
            if *op == old {
                *op = new;
                changed += 1;
            }
        }
        if changed == 0 {
            return;
        }
        self.uses[old].retain(|&u| u != user);
        for _ in 0..changed {
            self.uses[new].push(user);
        }
    }

    /// Append a new operand to `user` (used to grow a phi or `End`'s
    /// keep-alive list when the unroller adds a new incoming edge).
    pub fn push_operand(&mut self, user: Value, operand: Value) {
        self.values[user].operands.push(operand);
        self.uses[operand].push(user);
    }

    /// Replace the operand at `index` on `user`, fixing up use-lists on both
    /// sides. Unlike `replace_operand`, this touches exactly one slot, which
    /// the unroller needs when two slots of the same phi happen to carry the
    /// same value.
    pub fn set_operand_at(&mut self, user: Value, index: usize, new: Value) {
        let old = self.values[user].operands[index];
        if old == new {
            return;
        }
        self.values[user].operands[index] = new;
        if let Some(pos) = self.uses[old].iter().position(|&u| u == user) {
            self.uses[old].remove(pos);
        }
        self.uses[new].push(user);
    }

    /// Add `pred` as a new predecessor of `block`, also registering `block`
    /// as a successor of `pred`. Returns the new predecessor's slot index.
    /// Used by the unroller when a duplicated block gains an extra entry or
    /// exit edge.
    pub fn push_pred(&mut self, block: Block, pred: Block) -> usize {
        self.blocks[block].preds.push(pred);
        self.blocks[pred].succs.push(block);
        self.blocks[block].preds.len() - 1
    }

    /// Add `succ` to `block`'s successor list only, without a matching
    /// predecessor entry on `succ`. Used when the caller builds the
    /// predecessor side itself (e.g. `redirect_pred`).
    pub fn push_succ(&mut self, block: Block, succ: Block) {
        self.blocks[block].succs.push(succ);
    }

    /// Replace `block`'s predecessor at `index` with `new_pred`, moving the
    /// corresponding successor edge: `old_pred` loses `block` as a successor,
    /// `new_pred` gains it. The unroller uses this to redirect a loop
    /// header's back-edge slot to the freshly duplicated tail block each
    /// round.
    pub fn redirect_pred(&mut self, block: Block, index: usize, new_pred: Block) {
        let old_pred = self.blocks[block].preds[index];
        if old_pred == new_pred {
            return;
        }
        self.blocks[block].preds[index] = new_pred;
        if let Some(pos) = self.blocks[old_pred].succs.iter().position(|&s| s == block) {
            self.blocks[old_pred].succs.remove(pos);
        }
        self.blocks[new_pred].succs.push(block);
    }

    /// Shallow-copy `value`'s record into a freshly allocated `Value` whose
    /// operands are left untouched (the caller rewrites them via
    /// `replace_operand`/`push_operand` per `crate::unroll`'s duplication
    /// map). The copy is appended to `block`'s instruction list.
    pub fn exact_copy(&mut self, value: Value, block: Block) -> Value {
        let data = self.values[value].clone();
        let operands = data.operands.clone();
        for &op in &operands {
            self.uses[op].push(Value::new(self.values.len()));
        }
        let copy = self.values.push(ValueData {
            block,
            opcode: data.opcode,
            operands,
            reg_class: data.reg_class,
            fixed_color: None,
        });
        self.blocks[block].insts.push(copy);
        copy
    }

    /// `value`'s `Cmp` relation, if it is a comparison.
    pub fn cmp_relation(&self, value: Value) -> Option<CmpRelation> {
        match self.opcode(value) {
            Opcode::Cmp(rel) => Some(rel),
            _ => None,
        }
    }

    /// `value`'s constant, if it is an `IConst`.
    pub fn iconst(&self, value: Value) -> Option<i64> {
        match self.opcode(value) {
            Opcode::IConst(c) => Some(c),
            _ => None,
        }
    }

    /// Commit the allocator's final color for `value` (§6 `set_register`).
    /// The single writer at commit time; never consulted by any pass other
    /// than a caller reading the finished allocation back out.
    pub fn set_register(&mut self, value: Value, color: u8) {
        self.registers[value] = Some(color);
    }

    /// `value`'s committed color, if allocation has run.
    pub fn register(&self, value: Value) -> Option<u8> {
        *self.registers.get(value)
    }

    /// Add `v` to `end`'s keep-alive operand list (§6 `add_end_keepalive`).
    /// Used by the unroller when a duplicated value must stay reachable from
    /// the graph's keep-alive sink.
    pub fn add_end_keepalive(&mut self, end: Value, v: Value) {
        debug_assert!(self.is_end(end));
        self.push_operand(end, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_two_block_diamond() {
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

        let v0 = g.make_value(entry, Opcode::Normal, Vec::new(), None);
        let v1 = g.make_value(left, Opcode::Normal, std::vec![v0], None);
        let v2 = g.make_value(right, Opcode::Normal, std::vec![v0], None);
        let phi = g.make_value(join, Opcode::Phi, std::vec![v1, v2], None);

        assert_eq!(g.preds(join), &[left, right]);
        assert_eq!(g.out_edges(v0), &[v1, v2]);
        assert!(g.is_phi(phi));
        assert_eq!(g.phi_pred_block(phi, 0), left);
        assert_eq!(g.phi_pred_block(phi, 1), right);
    }

    #[test]
    fn replace_operand_updates_both_sides() {
        let mut g = Graph::new();
        let b = g.make_block();
        g.set_entry(b);
        let a = g.make_value(b, Opcode::Normal, Vec::new(), None);
        let c = g.make_value(b, Opcode::Normal, Vec::new(), None);
        let user = g.make_value(b, Opcode::Add, std::vec![a, a], None);
        g.replace_operand(user, a, c);
        assert_eq!(g.operands(user), &[c, c]);
        assert!(g.out_edges(a).is_empty());
        assert_eq!(g.out_edges(c), &[user, user]);
    }
}
