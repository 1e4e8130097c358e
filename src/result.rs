//! Compilation error type.
//!
//! Mirrors §7's error kinds one-to-one: `Unsupported` for an IR node the
//! crate's passes cannot handle, `InvariantBroken` for a pass entered without
//! its required assured properties (dominance, loop info, LCSSA), and
//! `AllocationFailed` for a constrained value the coalescing allocator could
//! not legally color after its post-condition verifier ran.

use crate::ir::Value;
use failure_derive::Fail;
use std::string::String;

/// A compilation error.
#[derive(Fail, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// The IR contains a node kind this pass cannot handle.
    #[fail(display = "unsupported construct: {}", _0)]
    Unsupported(String),

    /// A pass was entered without one of its required assured properties
    /// (e.g. dominance, loop info, LCSSA). Indicates a caller bug, not a
    /// malformed program.
    #[fail(display = "invariant broken: {}", _0)]
    InvariantBroken(String),

    /// The post-condition verifier found a register-allocated value with no
    /// legal color after `co2` ran.
    #[fail(display = "register allocation failed for {}", _0)]
    AllocationFailed(Value),
}

/// A `Result` alias for the common case of top-level compilation errors.
pub type CodegenResult<T> = Result<T, CodegenError>;
