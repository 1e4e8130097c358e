//! Register allocation: constraint modeling, interference and affinity
//! analysis, and the coalescing allocator built on top of them (C6–C9).
//!
//! The pipeline a caller runs, in order: build an `InterferenceGraph` and an
//! `AffinityGraph` from a liveness-analyzed `Graph`, then hand both plus a
//! `ConstraintModel` to [`coalesce::allocate`].

pub mod affinity;
pub mod coalesce;
pub mod constraints;
pub mod interference;

pub use self::affinity::{AffinityEdge, AffinityGraph};
pub use self::coalesce::{allocate, AllocationSummary};
pub use self::constraints::ConstraintModel;
pub use self::interference::InterferenceGraph;
