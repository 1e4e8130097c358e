//! Liveness analysis, SSA-preserving loop unrolling, and a coalescing
//! graph-coloring register allocator for sea-of-nodes SSA IR.
//!
//! This crate is deliberately self-contained: since no separate IR crate
//! lives in this workspace, [`ir::Graph`] plays the role a real compiler's
//! own IR would, and the three headline passes are layered directly on top
//! of it:
//!
//! - [`ir::dom`] / [`ir::loop_info`]: dominance, DFS back-edge
//!   classification, and natural-loop discovery (C1).
//! - [`liveness`]: the incremental, query-driven liveness checker built on
//!   those two (C3).
//! - [`ir::lcssa`] / [`ir::unroll`]: LCSSA construction and the loop
//!   unroller it is a precondition for (C4, C5).
//! - [`regalloc`]: interference and affinity analysis, plus the `co2`
//!   coalescing graph-coloring allocator (C6–C9).
//!
//! [`context::AllocatorConfig`] and [`context::DumpFlags`] thread
//! per-compilation-unit configuration through every pass explicitly; nothing
//! here reads or writes global mutable state.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
#[macro_use]
extern crate alloc as std;
#[cfg(feature = "std")]
#[macro_use]
extern crate std;

pub mod bitset;
pub mod context;
pub mod entity;
pub mod ir;
pub mod isa;
pub mod liveness;
pub mod regalloc;

mod result;

pub use crate::context::{AllocatorConfig, DumpFlags};
pub use crate::result::{CodegenError, CodegenResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
