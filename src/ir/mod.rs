//! The graph primitives (C1): entity handles, the graph container, dominance
//! and DFS edge classification, natural-loop discovery, LCSSA construction,
//! and the loop unroller.
//!
//! Everything here treats the surrounding compiler as an external
//! collaborator per the crate's scope: this module *is* that collaborator's
//! stand-in, since no separate IR crate lives in this workspace (see the
//! crate-level docs and `SPEC_FULL.md` §6).

pub mod dom;
pub mod entities;
pub mod graph;
pub mod lcssa;
pub mod loop_info;
pub mod unroll;

pub use self::dom::{DominatorTree, Dfs, EdgeKind};
pub use self::entities::{Block, CmpRelation, Opcode, Value};
pub use self::graph::Graph;
pub use self::lcssa::assure_lcssa;
pub use self::loop_info::{Loop, LoopForest};
pub use self::unroll::{find_suitable_factor, unroll_loop, unroll_loops, UnrollSummary};
