//! # Graph Traversal Module
//!
//! Reachability search, fewest-hop spanning trees and the ultimate-master
//! walk, written against the [`GraphView`] abstraction so the same code runs
//! over the whole pool, over decided edges only, or over a restricted node set.
//!
//! Every view enumerates neighbours in a fixed order (neighbour key, then
//! edge id). Ties between equal-length paths are broken by that order, so the
//! master chosen for an ambiguous cluster is reproducible.

use crate::model::{EdgeId, MatchEdge, MatchStatus, RecordId};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which edges a view lets a traversal cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeFilter {
    /// Every edge, whatever its status.
    All,
    /// `MATCH` and `AUTOMATCH` edges only.
    Decided,
    /// Everything except `NOMATCH` edges.
    Candidate,
}

impl EdgeFilter {
    pub fn admits(self, edge: &MatchEdge) -> bool {
        match self {
            EdgeFilter::All => true,
            EdgeFilter::Decided => edge.status().is_decided(),
            EdgeFilter::Candidate => edge.status() != MatchStatus::NoMatch,
        }
    }
}

/// A read-only, filtered view of the match graph.
pub trait GraphView {
    /// Whether `node` belongs to the view.
    fn contains(&self, node: RecordId) -> bool;

    /// Admitted edges incident to `node` whose far end is also in the view,
    /// as `(edge, neighbour)` pairs in deterministic order.
    fn neighbours(&self, node: RecordId) -> Vec<(EdgeId, RecordId)>;

    /// Decided edges on which `node` is the duplicate, as `(edge, master)`
    /// pairs in deterministic order. Direction is duplicate -> master.
    fn masters_of(&self, node: RecordId) -> Vec<(EdgeId, RecordId)>;
}

/// Breadth-first reachability from `start`, including `start` itself.
///
/// Nodes come back in discovery order. A `start` outside the view yields an
/// empty result.
pub fn reachable<G: GraphView + ?Sized>(graph: &G, start: RecordId) -> Vec<RecordId> {
    if !graph.contains(start) {
        return Vec::new();
    }
    let mut seen = FxHashSet::default();
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for (_, next) in graph.neighbours(node) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    order
}

/// Reachable set from `start`, for membership tests.
pub fn reachable_set<G: GraphView + ?Sized>(graph: &G, start: RecordId) -> FxHashSet<RecordId> {
    reachable(graph, start).into_iter().collect()
}

/// Previous-hop assignment of a fewest-hop path from a root to every node it reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanningTree {
    root: RecordId,
    /// node -> (parent, edge joining them)
    parents: FxHashMap<RecordId, (RecordId, EdgeId)>,
    /// Reached nodes in discovery order, root first.
    order: Vec<RecordId>,
}

impl SpanningTree {
    pub fn root(&self) -> RecordId {
        self.root
    }

    pub fn reaches(&self, node: RecordId) -> bool {
        node == self.root || self.parents.contains_key(&node)
    }

    /// The designated master of `node`, or `None` for the root and unreached nodes.
    pub fn parent(&self, node: RecordId) -> Option<RecordId> {
        self.parents.get(&node).map(|(parent, _)| *parent)
    }

    /// `(duplicate, master, edge)` triples in discovery order.
    pub fn links(&self) -> impl Iterator<Item = (RecordId, RecordId, EdgeId)> + '_ {
        self.order.iter().filter_map(move |node| {
            self.parents
                .get(node)
                .map(|(parent, edge)| (*node, *parent, *edge))
        })
    }

    pub fn tree_edges(&self) -> FxHashSet<EdgeId> {
        self.parents.values().map(|(_, edge)| *edge).collect()
    }

    pub fn nodes(&self) -> &[RecordId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Single-source shortest paths with unit edge weights.
///
/// With unit weights the first discovery of a node is already on a shortest
/// path, so a breadth-first sweep settles nodes in the same order a
/// Dijkstra run would. Among equal-length paths the one found first through
/// the view's neighbour order wins.
pub fn shortest_path_tree<G: GraphView + ?Sized>(graph: &G, root: RecordId) -> SpanningTree {
    let mut parents = FxHashMap::default();
    let mut order = Vec::new();
    if !graph.contains(root) {
        return SpanningTree {
            root,
            parents,
            order,
        };
    }

    let mut settled = FxHashSet::default();
    let mut queue = VecDeque::new();
    settled.insert(root);
    queue.push_back(root);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for (edge, next) in graph.neighbours(node) {
            if settled.insert(next) {
                parents.insert(next, (node, edge));
                queue.push_back(next);
            }
        }
    }

    SpanningTree {
        root,
        parents,
        order,
    }
}

/// Follow master pointers from `start` until a node without one is found.
///
/// Nodes in `skip` are never stepped onto, and no node is walked twice, so
/// latent cycles in legacy data end the walk instead of looping.
pub fn ultimate_master<G: GraphView + ?Sized>(
    graph: &G,
    start: RecordId,
    skip: &[RecordId],
) -> RecordId {
    let mut crossed: FxHashSet<RecordId> = skip.iter().copied().collect();
    let mut current = start;
    loop {
        crossed.insert(current);
        let next = graph
            .masters_of(current)
            .into_iter()
            .map(|(_, master)| master)
            .find(|master| !crossed.contains(master));
        match next {
            Some(master) => current = master,
            None => return current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adjacency-list graph: `(edge, a, b, master)` with `master` one of a/b.
    struct TestGraph {
        edges: Vec<(u32, u32, u32, Option<u32>)>,
        nodes: FxHashSet<RecordId>,
    }

    impl TestGraph {
        fn new(nodes: u32, edges: &[(u32, u32, Option<u32>)]) -> Self {
            Self {
                edges: edges
                    .iter()
                    .enumerate()
                    .map(|(i, (a, b, m))| (i as u32, *a, *b, *m))
                    .collect(),
                nodes: (0..nodes).map(RecordId).collect(),
            }
        }

        fn without(mut self, node: u32) -> Self {
            self.nodes.remove(&RecordId(node));
            self
        }
    }

    impl GraphView for TestGraph {
        fn contains(&self, node: RecordId) -> bool {
            self.nodes.contains(&node)
        }

        fn neighbours(&self, node: RecordId) -> Vec<(EdgeId, RecordId)> {
            let mut out: Vec<(EdgeId, RecordId)> = self
                .edges
                .iter()
                .filter_map(|(id, a, b, _)| {
                    if RecordId(*a) == node {
                        Some((EdgeId(*id), RecordId(*b)))
                    } else if RecordId(*b) == node {
                        Some((EdgeId(*id), RecordId(*a)))
                    } else {
                        None
                    }
                })
                .filter(|(_, other)| self.nodes.contains(other))
                .collect();
            out.sort_by_key(|(edge, other)| (*other, *edge));
            out
        }

        fn masters_of(&self, node: RecordId) -> Vec<(EdgeId, RecordId)> {
            let mut out: Vec<(EdgeId, RecordId)> = self
                .edges
                .iter()
                .filter_map(|(id, a, b, master)| {
                    let master = (*master)?;
                    let duplicate = if master == *a { *b } else { *a };
                    (RecordId(duplicate) == node).then_some((EdgeId(*id), RecordId(master)))
                })
                .filter(|(_, master)| self.nodes.contains(master))
                .collect();
            out.sort_by_key(|(edge, master)| (*master, *edge));
            out
        }
    }

    #[test]
    fn test_reachable_collects_component() {
        let graph = TestGraph::new(6, &[(0, 1, None), (1, 2, None), (3, 4, None)]);
        let mut found = reachable(&graph, RecordId(0));
        found.sort();
        assert_eq!(found, vec![RecordId(0), RecordId(1), RecordId(2)]);
        assert_eq!(reachable(&graph, RecordId(5)), vec![RecordId(5)]);
    }

    #[test]
    fn test_reachable_respects_view() {
        let graph = TestGraph::new(4, &[(0, 1, None), (1, 2, None), (2, 3, None)]).without(2);
        let found = reachable_set(&graph, RecordId(0));
        assert_eq!(found.len(), 2);
        assert!(!found.contains(&RecordId(3)));
        assert!(reachable(&graph, RecordId(2)).is_empty());
    }

    #[test]
    fn test_shortest_path_tree_prefers_fewest_hops() {
        // 0-1-2-3 chain plus a shortcut 0-3.
        let graph = TestGraph::new(4, &[(0, 1, None), (1, 2, None), (2, 3, None), (0, 3, None)]);
        let tree = shortest_path_tree(&graph, RecordId(0));
        assert_eq!(tree.parent(RecordId(1)), Some(RecordId(0)));
        assert_eq!(tree.parent(RecordId(3)), Some(RecordId(0)));
        // 2 is two hops away either way; neighbour order picks node 1 first.
        assert_eq!(tree.parent(RecordId(2)), Some(RecordId(1)));
        assert_eq!(tree.parent(RecordId(0)), None);
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.tree_edges().len(), 3);
    }

    #[test]
    fn test_shortest_path_tree_unreached_nodes() {
        let graph = TestGraph::new(4, &[(0, 1, None), (2, 3, None)]);
        let tree = shortest_path_tree(&graph, RecordId(1));
        assert!(tree.reaches(RecordId(0)));
        assert!(!tree.reaches(RecordId(2)));
        let links: Vec<_> = tree.links().collect();
        assert_eq!(links, vec![(RecordId(0), RecordId(1), EdgeId(0))]);
    }

    #[test]
    fn test_ultimate_master_follows_chain() {
        // 0 -> 1 -> 2 (each points at its master)
        let graph = TestGraph::new(3, &[(0, 1, Some(1)), (1, 2, Some(2))]);
        assert_eq!(ultimate_master(&graph, RecordId(0), &[]), RecordId(2));
        assert_eq!(ultimate_master(&graph, RecordId(2), &[]), RecordId(2));
        assert_eq!(ultimate_master(&graph, RecordId(0), &[RecordId(2)]), RecordId(1));
    }

    #[test]
    fn test_ultimate_master_terminates_on_cycle() {
        // 0 -> 1 -> 2 -> 0
        let graph = TestGraph::new(3, &[(0, 1, Some(1)), (1, 2, Some(2)), (2, 0, Some(0))]);
        assert_eq!(ultimate_master(&graph, RecordId(0), &[]), RecordId(2));
        assert_eq!(ultimate_master(&graph, RecordId(1), &[]), RecordId(0));
    }
}
