//! The explicit, per-compilation-unit context threaded through every pass.
//!
//! Re-architects the "global per-compilation state" `SPEC_FULL.md` §9 calls
//! out (current graph pointer, allocator dump flags, disambiguator options):
//! instead of module-level statics, `AllocatorConfig` and `DumpFlags` are
//! constructed once per compilation unit and passed by reference through
//! every pass's entry point. Nothing in this crate reads or writes global
//! mutable state.

/// Bitmask mirroring the surrounding CLI's allocator-dump flag (§6):
/// `before=1, after=2, cloud=4`. The core only gates which structured log
/// events it emits on these bits; rendering a dump is the external driver's
/// job.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DumpFlags(u8);

impl DumpFlags {
    /// Dump the interference graph before allocation.
    pub const BEFORE: DumpFlags = DumpFlags(1);
    /// Dump the interference graph after allocation.
    pub const AFTER: DumpFlags = DumpFlags(2);
    /// Dump each cloud's interference graph as it is processed.
    pub const CLOUD: DumpFlags = DumpFlags(4);
    /// All of the above.
    pub const ALL: DumpFlags = DumpFlags(1 | 2 | 4);

    /// The empty flag set (no dump events gated on).
    pub fn none() -> Self {
        DumpFlags(0)
    }

    /// Union `other` into `self`.
    pub fn insert(&mut self, other: DumpFlags) {
        self.0 |= other.0;
    }

    /// Does this flag set contain `other`?
    pub fn contains(&self, other: DumpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Per-compilation-unit configuration, threaded by reference through every
/// pass. The explicit replacement for the original's module-level statics
/// (`SPEC_FULL.md` §9).
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// The caller-supplied cap on a loop's static trip count for a *full*
    /// unroll; above this the unroller falls back to the largest
    /// power-of-two divisor (`find_suitable_factor`'s `max`).
    pub max_unroll_factor: usize,
    /// The node-count size gate: loops larger than this are never unrolled,
    /// regardless of their trip count.
    pub max_unroll_size: usize,
    /// Mirrors the CLI surface's `stop` option (§6): the fraction of a
    /// cloud's total affinity cost the coalescer may stop short of
    /// recovering before giving up on further improvement. Not consulted by
    /// this crate's `co2` implementation, which always runs `coalesce_top_down`
    /// to completion for each cloud, but carried so a caller wiring up the
    /// CLI surface has somewhere to put the value.
    pub stop_threshold: f32,
    /// Which structured dump events to emit.
    pub dump_flags: DumpFlags,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            max_unroll_factor: 4,
            max_unroll_size: 1000,
            stop_threshold: 1.0,
            dump_flags: DumpFlags::none(),
        }
    }
}
