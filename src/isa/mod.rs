//! Target-independent register-class description.
//!
//! Concrete instruction-selection and target ISA tables are out of scope for
//! this crate (see the crate-level docs); what remains here is the generic
//! register-class/register-bank model that the constraint model (C9) and the
//! coalescing allocator (C8) consume.

pub mod registers;

use crate::isa::registers::{RegBank, RegClass, RegClassData, RegInfo, RegUnitMask};

const INT_MASK: RegUnitMask = [0xffff, 0, 0];
const GPR8_MASK: RegUnitMask = [0x00ff, 0, 0];

static GPR_DATA: RegClassData = RegClassData {
    name: "GPR",
    index: 0,
    width: 1,
    bank: 0,
    toprc: 0,
    first: 0,
    subclasses: 0b11,
    mask: INT_MASK,
    info: &INFO,
    pinned_reg: None,
};

static GPR8_DATA: RegClassData = RegClassData {
    name: "GPR8",
    index: 1,
    width: 1,
    bank: 0,
    toprc: 0,
    first: 0,
    subclasses: 0b10,
    mask: GPR8_MASK,
    info: &INFO,
    pinned_reg: None,
};

/// A 16-register integer class, standing in for a real target's general
/// purpose registers (out of scope per the crate-level docs).
pub static GPR: RegClass = &GPR_DATA;

/// The low 8 registers of [`GPR`], exercising `RegClassData`'s subclass
/// machinery (`intersect`, `has_subclass`) the way a real caller-saved vs.
/// callee-saved split would.
pub static GPR8: RegClass = &GPR8_DATA;

static CLASSES: [RegClass; 2] = [&GPR_DATA, &GPR8_DATA];

static BANKS: [RegBank; 1] = [RegBank {
    name: "int",
    first_unit: 0,
    units: 16,
    names: &[],
    prefix: "r",
    first_toprc: 0,
    num_toprcs: 1,
    pressure_tracking: true,
}];

/// The synthetic single-bank `RegInfo` supplied for testing and as the
/// default constraint source (no concrete target ISA tables live in this
/// crate).
pub static INFO: RegInfo = RegInfo {
    banks: &BANKS,
    classes: &CLASSES,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpr_has_sixteen_registers() {
        assert_eq!(GPR.num_regs(), 16);
        assert_eq!(GPR8.num_regs(), 8);
    }

    #[test]
    fn gpr8_is_subclass_of_gpr() {
        assert!(GPR.has_subclass(GPR8));
        assert_eq!(GPR.intersect(GPR8).map(|rc| rc.name), Some("GPR8"));
    }

    #[test]
    fn regunit_for_color_round_trips_through_contains() {
        for color in 0..GPR.num_regs() as u8 {
            let unit = GPR.regunit_for_color(color);
            assert!(GPR.contains(unit));
        }
    }
}
