//! Natural loop detection and the loop nesting forest.
//!
//! A loop is discovered from each back edge `s -> h` found by `crate::ir::dom`:
//! its member set is `{h}` plus every block that can reach `s` without going
//! through `h`, found by walking predecessors backward from `s`. Several back
//! edges sharing the same target merge into one loop (an irreducible-looking
//! header with multiple back edges is still a single natural loop here).
//! Loops then nest by member-set containment: `a` is a child of `b` if `a`'s
//! members are a proper subset of `b`'s.

use crate::entity::SecondaryMap;
use crate::ir::dom::Dfs;
use crate::ir::entities::Block;
use crate::ir::graph::Graph;
use std::vec::Vec;

/// A natural loop: a header block plus every member block, including the
/// header itself.
#[derive(Clone)]
pub struct Loop {
    /// The back-edge target that seeded this loop.
    pub header: Block,
    /// Every block in the loop body, header included, unordered.
    pub members: Vec<Block>,
}

impl Loop {
    /// Does this loop contain `block`?
    pub fn contains(&self, block: Block) -> bool {
        self.members.contains(&block)
    }

    /// Total node count across every value defined in a member block (used
    /// by the unroller's size gate).
    pub fn node_count(&self, graph: &Graph) -> usize {
        self.members.iter().map(|&b| graph.insts(b).len()).sum()
    }
}

/// The set of natural loops in a graph, with parent/child nesting recorded
/// by member-set containment.
pub struct LoopForest {
    loops: Vec<Loop>,
    /// `parent[i]` is the index of the tightest enclosing loop of `loops[i]`,
    /// if any.
    parent: Vec<Option<usize>>,
}

impl LoopForest {
    /// Discover every natural loop in `graph`, given its DFS back edges.
    pub fn compute(graph: &Graph, dfs: &Dfs) -> Self {
        // Merge back edges by target header.
        let mut by_header: Vec<(Block, Vec<Block>)> = Vec::new();
        for (source, header) in dfs.back_edges() {
            match by_header.iter_mut().find(|(h, _)| *h == header) {
                Some((_, sources)) => sources.push(source),
                None => by_header.push((header, std::vec![source])),
            }
        }

        let mut loops = Vec::new();
        for (header, sources) in by_header {
            let mut in_loop: SecondaryMap<Block, bool> = SecondaryMap::new();
            let mut members = std::vec![header];
            in_loop[header] = true;
            let mut worklist = sources;
            for &s in &worklist {
                if !*in_loop.get(s) {
                    in_loop[s] = true;
                    members.push(s);
                }
            }
            while let Some(b) = worklist.pop() {
                if b == header {
                    continue;
                }
                for &p in graph.preds(b) {
                    if !*in_loop.get(p) {
                        in_loop[p] = true;
                        members.push(p);
                        worklist.push(p);
                    }
                }
            }
            loops.push(Loop { header, members });
        }

        // Nest by member-set containment: parent is the smallest strict
        // superset among the other loops.
        let mut parent = std::vec![None; loops.len()];
        for i in 0..loops.len() {
            let mut best: Option<usize> = None;
            for j in 0..loops.len() {
                if i == j {
                    continue;
                }
                if is_proper_subset(&loops[i].members, &loops[j].members) {
                    best = Some(match best {
                        None => j,
                        Some(b) => {
                            if loops[j].members.len() < loops[b].members.len() {
                                j
                            } else {
                                b
                            }
                        }
                    });
                }
            }
            parent[i] = best;
        }

        LoopForest { loops, parent }
    }

    /// Every discovered loop.
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// The innermost loops: those with no child loop nested inside them.
    pub fn innermost_loops(&self) -> Vec<&Loop> {
        let mut has_child = std::vec![false; self.loops.len()];
        for p in self.parent.iter().copied().flatten() {
            has_child[p] = true;
        }
        self.loops
            .iter()
            .enumerate()
            .filter(|&(i, _)| !has_child[i])
            .map(|(_, l)| l)
            .collect()
    }
}

fn is_proper_subset(a: &[Block], b: &[Block]) -> bool {
    a.len() < b.len() && a.iter().all(|x| b.contains(x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dom::Dfs;

    #[test]
    fn single_loop_detected() {
        let mut g = Graph::new();
        let entry = g.make_block();
        let header = g.make_block();
        let body = g.make_block();
        let exit = g.make_block();
        g.set_entry(entry);
        g.add_edge(entry, header);
        g.add_edge(header, body);
        g.add_edge(body, header);
        g.add_edge(header, exit);

        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        assert_eq!(forest.loops().len(), 1);
        let l = &forest.loops()[0];
        assert_eq!(l.header, header);
        assert!(l.contains(header));
        assert!(l.contains(body));
        assert!(!l.contains(exit));
        assert_eq!(forest.innermost_loops().len(), 1);
    }

    #[test]
    fn nested_loops() {
        let mut g = Graph::new();
        let entry = g.make_block();
        let outer_h = g.make_block();
        let inner_h = g.make_block();
        let inner_body = g.make_block();
        let outer_tail = g.make_block();
        let exit = g.make_block();
        g.set_entry(entry);
        g.add_edge(entry, outer_h);
        g.add_edge(outer_h, inner_h);
        g.add_edge(inner_h, inner_body);
        g.add_edge(inner_body, inner_h); // inner back edge
        g.add_edge(inner_h, outer_tail);
        g.add_edge(outer_tail, outer_h); // outer back edge
        g.add_edge(outer_h, exit);

        let dfs = Dfs::compute(&g);
        let forest = LoopForest::compute(&g, &dfs);
        assert_eq!(forest.loops().len(), 2);
        let inner = forest
            .innermost_loops()
            .into_iter()
            .find(|l| l.header == inner_h)
            .expect("inner loop found");
        assert!(!inner.contains(outer_tail));
        assert_eq!(forest.innermost_loops().len(), 1);
    }
}
