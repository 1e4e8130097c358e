//! The two entity handles the graph is built from, plus the opcode
//! distinctions the rest of the crate pattern-matches against.

use crate::entity::EntityRef;
use crate::entity_impl;
use crate::isa::registers::RegClassIndex;
use smallvec::SmallVec;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use std::vec::Vec;

/// Operand lists live inline up to four values (covers everything from a
/// `Cmp` to a small phi) before spilling to the heap, the same tradeoff
/// `cranelift-codegen` makes for its own per-instruction argument lists.
pub type ValueList = SmallVec<[Value; 4]>;

/// A basic block handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An SSA value handle (a "node", in sea-of-nodes terms).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Value(u32);
entity_impl!(Value, "v");

/// The comparison relation carried by a `Cmp` node. Only `LessEqual` is
/// consulted by the loop unroller's factor-finding heuristic (see
/// `crate::unroll`); the others exist so arbitrary input graphs can be
/// represented and rejected rather than refused to parse.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum CmpRelation {
    /// `<=`
    LessEqual,
    /// `<`
    Less,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>=`
    GreaterEqual,
    /// `>`
    Greater,
}

/// The opcode of a value, distinguishing the kinds the core cares about.
///
/// Everything that is not one of the named variants here is represented as
/// `Normal`: an ordinary register-allocated value whose only relevant facts
/// are its defining block and its operands (for interference/affinity/use-list
/// purposes), not its specific operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Opcode {
    /// An ordinary value-producing instruction.
    Normal,
    /// A join-point phi: operand `i` corresponds to predecessor `i` of the
    /// phi's defining block.
    Phi,
    /// The pseudo-value standing in for a block's entry. Never
    /// register-allocated, never queried for liveness.
    BlockHeader,
    /// A structural node that never participates in liveness (e.g. `Bad`,
    /// `Anchor`).
    Ignored,
    /// The graph's keep-alive sink; its operand list is the keep-alive set.
    End,
    /// A compile-time integer constant.
    IConst(i64),
    /// Integer addition.
    Add,
    /// A comparison, carrying its relation.
    Cmp(CmpRelation),
}

impl Opcode {
    /// Is this opcode one the liveness checker ever reports non-empty state
    /// for?
    ///
    /// Grounded in `is_liveness_node` from the original liveness checker,
    /// which excludes `Block`/`Bad`/`End`/`Anchor` opcodes but *not* `Phi` —
    /// phis are ordinary register-allocated values at their definition
    /// point, they just happen to also be consulted specially when mapping
    /// a use back to a predecessor block.
    pub fn is_liveness_relevant(&self) -> bool {
        !matches!(self, Opcode::BlockHeader | Opcode::Ignored | Opcode::End)
    }

    /// Is this a phi?
    pub fn is_phi(&self) -> bool {
        matches!(self, Opcode::Phi)
    }
}

/// The data backing a `Value`.
#[derive(Clone)]
pub struct ValueData {
    /// The block this value is defined in.
    pub block: Block,
    /// This value's opcode.
    pub opcode: Opcode,
    /// Operand values. For a `Phi`, operand `i` is the value supplied by
    /// predecessor `i` of `block`. For `End`, the operand list is the
    /// keep-alive set.
    pub operands: ValueList,
    /// The register class this value must be allocated from, or `None` if
    /// this value is never register-allocated (e.g. `BlockHeader`).
    pub reg_class: Option<RegClassIndex>,
    /// A fixed-color constraint narrower than the full register class, if
    /// any (e.g. a fixed-register operand or a two-address source).
    pub fixed_color: Option<u8>,
}

/// The data backing a `Block`.
#[derive(Clone, Default)]
pub struct BlockData {
    /// Predecessor blocks, in the order phi operands are indexed by.
    pub preds: Vec<Block>,
    /// Successor blocks.
    pub succs: Vec<Block>,
    /// Values defined in this block, in program order (phis first).
    pub insts: Vec<Value>,
}
