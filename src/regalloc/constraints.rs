//! Register-class constraint model (C9).
//!
//! Exposes a single `admissible(value) -> bitset` primitive: the full
//! register class, minus an ABI-imposed ignore-set, narrowed further to a
//! single color if the value carries a fixed-color constraint (a fixed
//! operand or a two-address source). Register-class representation itself
//! is `crate::isa::registers`'s `RegClass`/`RegClassData`/`RegInfo`, kept
//! nearly verbatim from the teacher; this module only adds the ignore-set
//! and fixed-color narrowing the teacher's own model doesn't need to do
//! (cranelift's register allocator reads ABI reservations from its own
//! `RegisterSet`, not a per-call ignore-set, since it is tied to concrete
//! target ISAs this crate does not carry).

use crate::bitset::ScalarBitSet;
use crate::ir::{Graph, Value};
use crate::isa::registers::RegInfo;

/// The constraint source threaded through interference/affinity-to-coloring:
/// a `RegInfo` plus the set of colors no value may ever be assigned (an ABI
/// reservation such as the stack or frame pointer).
pub struct ConstraintModel<'a> {
    reginfo: &'a RegInfo,
    ignore: ScalarBitSet,
}

impl<'a> ConstraintModel<'a> {
    /// Build a constraint model over `reginfo`, reserving every color in
    /// `ignore` (indexed the same way as a register class's colors, i.e.
    /// dense `0..num_regs()`, not raw register units) across every class.
    pub fn new(reginfo: &'a RegInfo, ignore: ScalarBitSet) -> Self {
        ConstraintModel { reginfo, ignore }
    }

    /// The register-class table this model narrows. Used by the coalescing
    /// allocator (C8) to read a register class's `num_regs()` when sizing a
    /// per-color cost/badness vector.
    pub fn reginfo(&self) -> &'a RegInfo {
        self.reginfo
    }

    /// The admissible-color set for `value`.
    ///
    /// Empty if `value` is not register-allocated (`reg_class` is `None`),
    /// matching the boundary case in which an allocator-visited value with
    /// `admissible = ∅` must be refused a color (`AllocationFailed`).
    pub fn admissible(&self, graph: &Graph, value: Value) -> ScalarBitSet {
        let class = match graph.reg_class(value) {
            Some(rci) => self.reginfo.rc(rci),
            None => return ScalarBitSet::new(),
        };
        let mut set = ScalarBitSet::all(class.num_regs());
        for bit in self.ignore.iter() {
            if (bit as usize) < class.num_regs() {
                set.remove(bit);
            }
        }
        if let Some(fixed) = graph.fixed_color(value) {
            let mut limited = ScalarBitSet::new();
            if set.contains(fixed) {
                limited.insert(fixed);
            }
            return limited;
        }
        set
    }
}
