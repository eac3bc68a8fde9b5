//! # Resolution Operations
//!
//! User and auto-match decisions over a [`MatchPool`]. Every public operation
//! validates its inputs first and then runs to completion, returning the net
//! [`ChangeSet`]. After each one every decided cluster is a tree of master
//! pointers with a single ultimate master.
//!
//! A cluster is rebuilt the same way everywhere: pick the root, compute a
//! fewest-hop spanning tree over the non-`NOMATCH` edges among the cluster's
//! members, then make tree edges decided (pointing at the root side) and reset
//! all other member edges to `UNMATCH`.

use crate::graph::{shortest_path_tree, ultimate_master, EdgeFilter, GraphView, SpanningTree};
use crate::model::{MatchStatus, RecordId};
use crate::pool::{ChangeSet, MatchPool};
use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use tracing::{debug, instrument};

impl MatchPool {
    /// Make `master` the master of `duplicate`, merging their clusters.
    ///
    /// The merged cluster keeps the ultimate master of `master`'s cluster as
    /// its root unless that is `duplicate` itself, in which case `master`
    /// becomes the root. Passing the same record twice behaves like
    /// [`define_master_of_all`](Self::define_master_of_all).
    #[instrument(skip(self), level = "debug")]
    pub fn define_master(
        &mut self,
        master: RecordId,
        duplicate: RecordId,
        auto: bool,
    ) -> Result<ChangeSet> {
        self.ensure_record(master)?;
        self.ensure_record(duplicate)?;
        self.begin();
        self.apply_master(master, duplicate, auto);
        Ok(self.finish())
    }

    /// Pull every record transitively connected to `master` over non-`NOMATCH`
    /// edges into its cluster, except records that a `NOMATCH` decision keeps
    /// apart from the growing cluster.
    #[instrument(skip(self), level = "debug")]
    pub fn define_master_of_all(&mut self, master: RecordId) -> Result<ChangeSet> {
        self.ensure_record(master)?;
        self.begin();
        self.apply_master_of_all(master);
        Ok(self.finish())
    }

    /// Record that `lhs` and `rhs` are not the same entity.
    ///
    /// Idempotent. The two are separated first, then their edge (created if
    /// missing) becomes `NOMATCH`. The same record twice marks every neighbour
    /// of that record as a no-match.
    #[instrument(skip(self), level = "debug")]
    pub fn define_no_match(&mut self, lhs: RecordId, rhs: RecordId) -> Result<ChangeSet> {
        self.ensure_record(lhs)?;
        self.ensure_record(rhs)?;
        self.begin();
        if lhs == rhs {
            self.apply_no_match_of_any(lhs);
        } else {
            self.apply_no_match(lhs, rhs);
        }
        Ok(self.finish())
    }

    /// Detach `rhs` from the cluster it shares with `lhs`.
    ///
    /// The rest of the cluster stays together under one root, bridged with
    /// synthetic edges where removing `rhs` split it. A member that could only
    /// be bridged across a `NOMATCH` is left on its own. A `NOMATCH` between
    /// the two is reverted to `UNMATCH`. The same record twice unmatches it from
    /// all of its decided neighbours.
    #[instrument(skip(self), level = "debug")]
    pub fn define_unmatched(&mut self, lhs: RecordId, rhs: RecordId) -> Result<ChangeSet> {
        self.ensure_record(lhs)?;
        self.ensure_record(rhs)?;
        self.begin();
        self.apply_unmatched(lhs, rhs);
        Ok(self.finish())
    }

    /// Detach `record` from every decided neighbour.
    #[instrument(skip(self), level = "debug")]
    pub fn define_unmatch_all(&mut self, record: RecordId) -> Result<ChangeSet> {
        self.ensure_record(record)?;
        self.begin();
        self.apply_unmatch_all(record);
        Ok(self.finish())
    }

    /// Undo every decision: synthetic edges are removed and all other edges
    /// go back to `UNMATCH`, `NOMATCH` ones included.
    #[instrument(skip(self), level = "debug")]
    pub fn reset_pool(&mut self) -> Result<ChangeSet> {
        self.begin();
        let ids: Vec<_> = self.edges().map(|edge| (edge.id, edge.synthetic)).collect();
        for (id, synthetic) in ids {
            if synthetic {
                self.retire_edge(id);
            } else {
                self.set_edge(id, MatchStatus::Unmatch, None);
            }
        }
        let changes = self.finish();
        debug!(changed = changes.len(), "pool reset");
        Ok(changes)
    }

    // ------------------------------------------------------------------
    // Operation bodies; inputs are already validated.
    // ------------------------------------------------------------------

    pub(crate) fn apply_master(&mut self, master: RecordId, duplicate: RecordId, auto: bool) {
        if master == duplicate {
            self.apply_master_of_all(master);
            return;
        }

        let mark = self.journal_mark();
        if let Some(edge) = self.edge_between(master, duplicate) {
            if self.edge(edge).map(|e| e.status()) == Some(MatchStatus::NoMatch) {
                self.warnings.handle_warning(&format!(
                    "overriding no-match between {} and {} with a master decision",
                    self.key_of(master),
                    self.key_of(duplicate)
                ));
            }
            self.set_edge(edge, MatchStatus::Unmatch, None);
        }

        let mut nodes = self.decided_cluster_set(master);
        nodes.extend(self.decided_cluster(duplicate));

        let mut root = ultimate_master(&self.view(EdgeFilter::Decided, Some(&nodes)), master, &[]);
        if root == duplicate {
            root = master;
        }

        let mut tree = self.candidate_tree(&nodes, root);
        if !tree.reaches(duplicate) {
            self.connect(master, duplicate, MatchStatus::Unmatch);
            tree = self.candidate_tree(&nodes, root);
        }
        let tree = self.bridge_unreached(&nodes, tree);
        debug!(root = %root, members = nodes.len(), "merged clusters");
        self.apply_tree(&nodes, &tree, auto, mark);
    }

    fn apply_master_of_all(&mut self, master: RecordId) {
        let mark = self.journal_mark();
        let mut nodes = self.decided_cluster_set(master);
        let mut excluded = self.no_match_exclusions(&nodes);

        let mut frontier: VecDeque<RecordId> = self.sorted_by_key(&nodes).into();
        while let Some(node) = frontier.pop_front() {
            let neighbours = self.view(EdgeFilter::Candidate, None).neighbours(node);
            for (_, next) in neighbours {
                if nodes.contains(&next) || excluded.contains(&next) {
                    continue;
                }
                let joining = self.decided_cluster_set(next);
                if joining.iter().any(|member| excluded.contains(member)) {
                    continue;
                }
                excluded.extend(self.no_match_exclusions(&joining));
                for member in self.sorted_by_key(&joining) {
                    nodes.insert(member);
                    frontier.push_back(member);
                }
            }
        }

        let tree = self.candidate_tree(&nodes, master);
        let tree = self.bridge_unreached(&nodes, tree);
        debug!(root = %master, members = nodes.len(), "master of all");
        self.apply_tree(&nodes, &tree, false, mark);
    }

    fn apply_no_match(&mut self, lhs: RecordId, rhs: RecordId) {
        if let Some(edge) = self.edge_between(lhs, rhs) {
            if self.edge(edge).map(|e| e.status()) == Some(MatchStatus::NoMatch) {
                return;
            }
        }
        self.apply_unmatched(lhs, rhs);
        match self.edge_between(lhs, rhs) {
            Some(edge) => self.set_edge(edge, MatchStatus::NoMatch, None),
            None => {
                self.connect(lhs, rhs, MatchStatus::NoMatch);
            }
        }
    }

    fn apply_no_match_of_any(&mut self, record: RecordId) {
        let others = self.neighbours_in_key_order(record, EdgeFilter::All);
        for other in others {
            self.apply_no_match(other, record);
        }
    }

    pub(crate) fn apply_unmatched(&mut self, lhs: RecordId, rhs: RecordId) {
        if lhs == rhs {
            self.apply_unmatch_all(lhs);
            return;
        }

        let mark = self.journal_mark();
        if let Some(edge) = self.edge_between(lhs, rhs) {
            if self.edge(edge).map(|e| e.status()) == Some(MatchStatus::NoMatch) {
                self.set_edge(edge, MatchStatus::Unmatch, None);
            }
        }

        let mut nodes = self.decided_cluster_set(lhs);
        if !nodes.contains(&rhs) {
            self.retire_idle_synthetic(mark);
            return;
        }

        let root = {
            let decided = self.view(EdgeFilter::Decided, Some(&nodes));
            let root = ultimate_master(&decided, rhs, &[]);
            if root == rhs {
                ultimate_master(&decided, lhs, &[rhs])
            } else {
                root
            }
        };

        nodes.remove(&rhs);
        let detached: Vec<_> = self
            .record_edges(rhs)
            .iter()
            .copied()
            .filter(|id| self.edge(*id).is_some_and(|edge| edge.is_decided()))
            .collect();
        for edge in detached {
            self.set_edge(edge, MatchStatus::Unmatch, None);
        }

        let tree = self.candidate_tree(&nodes, root);
        let tree = self.bridge_unreached(&nodes, tree);
        debug!(root = %root, removed = %rhs, members = nodes.len(), "record detached");
        self.apply_tree(&nodes, &tree, false, mark);
    }

    fn apply_unmatch_all(&mut self, record: RecordId) {
        let others = self.neighbours_in_key_order(record, EdgeFilter::Decided);
        for other in others {
            self.apply_unmatched(other, record);
        }
    }

    // ------------------------------------------------------------------
    // Tree helpers
    // ------------------------------------------------------------------

    fn candidate_tree(&self, nodes: &FxHashSet<RecordId>, root: RecordId) -> SpanningTree {
        shortest_path_tree(&self.view(EdgeFilter::Candidate, Some(nodes)), root)
    }

    /// Join every member the tree misses to the first reached member, in key
    /// order, that it has no edge to. A member whose every candidate anchor is
    /// behind a `NOMATCH` stays out of the tree and ends up on its own.
    fn bridge_unreached(&mut self, nodes: &FxHashSet<RecordId>, mut tree: SpanningTree) -> SpanningTree {
        let root = tree.root();
        for node in self.sorted_by_key(nodes) {
            if tree.reaches(node) {
                continue;
            }
            let mut reached: Vec<RecordId> = tree.nodes().to_vec();
            reached.sort_by(|a, b| self.key_of(*a).cmp(self.key_of(*b)));
            let Some(anchor) = reached
                .into_iter()
                .find(|member| self.edge_between(*member, node).is_none())
            else {
                debug!(node = %node, "no anchor outside a no-match, left detached");
                continue;
            };
            self.connect(anchor, node, MatchStatus::Unmatch);
            tree = self.candidate_tree(nodes, root);
        }
        tree
    }

    /// Make `tree` the decided structure of `nodes`. `NOMATCH` edges are left
    /// alone; synthetic edges this operation left undecided are retired.
    fn apply_tree(
        &mut self,
        nodes: &FxHashSet<RecordId>,
        tree: &SpanningTree,
        auto: bool,
        mark: usize,
    ) {
        let masters: FxHashMap<_, _> = tree
            .links()
            .map(|(_, master, edge)| (edge, master))
            .collect();
        for edge in self.edges_among(nodes) {
            let Some(status) = self.edge(edge).map(|e| e.status()) else {
                continue;
            };
            if status == MatchStatus::NoMatch {
                continue;
            }
            match masters.get(&edge) {
                Some(master) => self.set_edge(edge, MatchStatus::decided(auto), Some(*master)),
                None => self.set_edge(edge, MatchStatus::Unmatch, None),
            }
        }

        self.retire_idle_synthetic(mark);
    }

    /// Synthetic edges only exist to hold a decision; drop the ones touched
    /// since `mark` that were left in `UNMATCH`.
    fn retire_idle_synthetic(&mut self, mark: usize) {
        for edge in self.touched_since(mark) {
            let idle = self
                .edge(edge)
                .is_some_and(|e| e.synthetic && e.status() == MatchStatus::Unmatch);
            if idle {
                self.retire_edge(edge);
            }
        }
    }

    fn sorted_by_key(&self, nodes: &FxHashSet<RecordId>) -> Vec<RecordId> {
        let mut sorted: Vec<RecordId> = nodes.iter().copied().collect();
        sorted.sort_by(|a, b| self.key_of(*a).cmp(self.key_of(*b)));
        sorted
    }

    fn neighbours_in_key_order(&self, record: RecordId, filter: EdgeFilter) -> Vec<RecordId> {
        let mut others: Vec<RecordId> = self
            .view(filter, None)
            .neighbours(record)
            .into_iter()
            .map(|(_, other)| other)
            .collect();
        others.dedup();
        others
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KeyValue, MatchRule, RecordKey, RuleCatalog, RuleId, StoreState};
    use crate::store::CollectingWarnings;
    use std::sync::Arc;

    fn pool_with(n: i64) -> (MatchPool, Vec<RecordId>, RuleId) {
        pool_reporting_to(n, Arc::new(CollectingWarnings::new()))
    }

    fn pool_reporting_to(
        n: i64,
        warnings: Arc<CollectingWarnings>,
    ) -> (MatchPool, Vec<RecordId>, RuleId) {
        let mut pool = MatchPool::with_warnings(
            RuleCatalog::from_rules(vec![MatchRule::new("Group_One", Some(15))]),
            warnings,
        );
        let rule = pool.rules().rule_by_name("Group_One").unwrap();
        let ids = (1..=n)
            .map(|k| pool.add_record(RecordKey::new(vec![KeyValue::Integer(k)]), Vec::new()))
            .collect();
        (pool, ids, rule)
    }

    fn link(pool: &mut MatchPool, a: RecordId, b: RecordId, rule: RuleId) {
        pool.add_edge(a, b, rule, MatchStatus::Unmatch, None).unwrap();
    }

    fn master_of(pool: &MatchPool, duplicate: RecordId, master: RecordId) -> bool {
        pool.edge_between(duplicate, master)
            .and_then(|id| pool.edge(id))
            .is_some_and(|edge| edge.is_decided() && edge.master() == Some(master))
    }

    #[test]
    fn test_define_master_on_existing_edge() {
        let (mut pool, ids, rule) = pool_with(2);
        link(&mut pool, ids[0], ids[1], rule);
        let changes = pool.define_master(ids[0], ids[1], false).unwrap();
        assert!(master_of(&pool, ids[1], ids[0]));
        assert_eq!(changes.changed.len(), 1);
        assert!(changes.created.is_empty());
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_define_master_creates_synthetic_edge() {
        let (mut pool, ids, _) = pool_with(2);
        let changes = pool.define_master(ids[1], ids[0], true).unwrap();
        assert_eq!(changes.created.len(), 1);
        let edge = pool.edge(*changes.created.iter().next().unwrap()).unwrap();
        assert!(edge.synthetic);
        assert_eq!(edge.status(), MatchStatus::AutoMatch);
        assert_eq!(edge.master(), Some(ids[1]));
        assert_eq!(edge.store_state(), StoreState::New);
    }

    #[test]
    fn test_define_master_merges_clusters_under_master_root() {
        // 1 <- 2 and 3 <- 4 (arrows point at masters), candidates 2-3.
        let (mut pool, ids, rule) = pool_with(4);
        link(&mut pool, ids[0], ids[1], rule);
        link(&mut pool, ids[2], ids[3], rule);
        link(&mut pool, ids[1], ids[2], rule);
        pool.define_master(ids[0], ids[1], false).unwrap();
        pool.define_master(ids[2], ids[3], false).unwrap();

        pool.define_master(ids[1], ids[2], false).unwrap();
        let clusters = pool.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].master, ids[0]);
        assert_eq!(clusters[0].len(), 4);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_define_master_when_duplicate_is_root() {
        let (mut pool, ids, rule) = pool_with(3);
        link(&mut pool, ids[0], ids[1], rule);
        link(&mut pool, ids[1], ids[2], rule);
        pool.define_master(ids[0], ids[1], false).unwrap();
        pool.define_master(ids[0], ids[2], false).unwrap();
        // Reverse the relation: 2 becomes master of 1, which was the root.
        pool.define_master(ids[1], ids[0], false).unwrap();
        let clusters = pool.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].master, ids[1]);
        assert!(master_of(&pool, ids[0], ids[1]));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_define_master_overrides_no_match() {
        let warnings = Arc::new(CollectingWarnings::new());
        let (mut pool, ids, _) = pool_reporting_to(2, warnings.clone());
        pool.define_no_match(ids[0], ids[1]).unwrap();
        pool.define_master(ids[0], ids[1], false).unwrap();
        assert!(master_of(&pool, ids[1], ids[0]));
        assert_eq!(pool.edge_count(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_unmatched_never_bridges_across_no_match() {
        let warnings = Arc::new(CollectingWarnings::new());
        let (mut pool, ids, _) = pool_reporting_to(3, warnings.clone());
        pool.define_no_match(ids[0], ids[1]).unwrap();
        pool.define_master(ids[0], ids[2], false).unwrap();
        pool.define_master(ids[2], ids[1], false).unwrap();
        assert!(pool.decided_cluster_set(ids[0]).contains(&ids[1]));

        pool.define_unmatched(ids[0], ids[2]).unwrap();
        let edge = pool.edge_between(ids[0], ids[1]).unwrap();
        assert_eq!(pool.edge(edge).unwrap().status(), MatchStatus::NoMatch);
        assert!(!pool.decided_cluster_set(ids[0]).contains(&ids[1]));
        assert!(warnings.is_empty());
        // Only the no-match survives; both bridging edges were retired.
        assert_eq!(pool.edge_count(), 1);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_unmatched_bridges_through_an_unblocked_member() {
        // 1 is root of 2, 3 and 4; 2 and 3 are a no-match. Once 1 leaves,
        // 2 becomes root: 4 is bridged to it, 3 is left on its own.
        let (mut pool, ids, _) = pool_with(4);
        pool.define_no_match(ids[1], ids[2]).unwrap();
        pool.define_master(ids[0], ids[1], false).unwrap();
        pool.define_master(ids[0], ids[2], false).unwrap();
        pool.define_master(ids[0], ids[3], false).unwrap();
        assert_eq!(pool.decided_cluster(ids[0]).len(), 4);

        pool.define_unmatched(ids[1], ids[0]).unwrap();
        assert_eq!(pool.decided_cluster(ids[1]), vec![ids[1], ids[3]]);
        assert_eq!(pool.decided_cluster(ids[2]), vec![ids[2]]);
        assert_eq!(pool.decided_cluster(ids[0]), vec![ids[0]]);
        assert!(master_of(&pool, ids[3], ids[1]));
        let edge = pool.edge_between(ids[1], ids[2]).unwrap();
        assert_eq!(pool.edge(edge).unwrap().status(), MatchStatus::NoMatch);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_define_master_then_unmatched_restores_separation() {
        let (mut pool, ids, _) = pool_with(2);
        pool.define_master(ids[0], ids[1], false).unwrap();
        pool.define_unmatched(ids[0], ids[1]).unwrap();
        assert!(pool.decided_cluster(ids[0]).len() == 1);
        assert!(pool.decided_cluster(ids[1]).len() == 1);
        // The synthetic edge was never stored, so it is simply gone.
        assert_eq!(pool.edge_count(), 0);
        assert!(pool.pending_deletes().is_empty());
    }

    #[test]
    fn test_define_unmatched_keeps_rest_of_cluster_together() {
        // Star around record 1: 2, 3 and 4 all point at 1.
        let (mut pool, ids, rule) = pool_with(4);
        for other in &ids[1..] {
            link(&mut pool, ids[0], *other, rule);
        }
        pool.define_master_of_all(ids[0]).unwrap();
        assert_eq!(pool.decided_cluster(ids[0]).len(), 4);

        pool.define_unmatched(ids[1], ids[0]).unwrap();
        assert_eq!(pool.decided_cluster(ids[0]), vec![ids[0]]);
        let rest = pool.decided_cluster(ids[1]);
        assert_eq!(rest.len(), 3);
        pool.check_invariants().unwrap();
        // 3 and 4 only reached 2 through 1, so synthetic edges bridge them.
        assert!(pool.edges().filter(|edge| edge.synthetic).count() >= 2);
    }

    #[test]
    fn test_define_unmatched_outside_cluster_is_noop() {
        let (mut pool, ids, rule) = pool_with(3);
        link(&mut pool, ids[0], ids[1], rule);
        pool.define_master(ids[0], ids[1], false).unwrap();
        let changes = pool.define_unmatched(ids[0], ids[2]).unwrap();
        assert!(changes.is_empty());
        assert!(master_of(&pool, ids[1], ids[0]));
    }

    #[test]
    fn test_define_no_match_is_idempotent() {
        let (mut pool, ids, rule) = pool_with(3);
        link(&mut pool, ids[0], ids[1], rule);
        link(&mut pool, ids[1], ids[2], rule);
        pool.define_master_of_all(ids[0]).unwrap();

        let first = pool.define_no_match(ids[0], ids[1]).unwrap();
        assert!(!first.is_empty());
        let edge = pool.edge_between(ids[0], ids[1]).unwrap();
        assert_eq!(pool.edge(edge).unwrap().status(), MatchStatus::NoMatch);
        assert!(!pool.decided_cluster_set(ids[0]).contains(&ids[1]));

        let second = pool.define_no_match(ids[0], ids[1]).unwrap();
        assert!(second.is_empty());
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_define_no_match_of_any() {
        let (mut pool, ids, rule) = pool_with(3);
        link(&mut pool, ids[0], ids[1], rule);
        link(&mut pool, ids[0], ids[2], rule);
        pool.define_no_match(ids[0], ids[0]).unwrap();
        for edge in pool.edges() {
            assert_eq!(edge.status(), MatchStatus::NoMatch);
        }

        let edges_before = pool.edge_count();
        let again = pool.define_no_match(ids[0], ids[0]).unwrap();
        assert!(again.is_empty());
        assert_eq!(pool.edge_count(), edges_before);
    }

    #[test]
    fn test_define_master_of_all_respects_no_match() {
        // 1-2-3 chain; 1 and 3 must never match.
        let (mut pool, ids, rule) = pool_with(4);
        link(&mut pool, ids[0], ids[1], rule);
        link(&mut pool, ids[1], ids[2], rule);
        link(&mut pool, ids[2], ids[3], rule);
        pool.define_no_match(ids[0], ids[2]).unwrap();

        pool.define_master_of_all(ids[0]).unwrap();
        let cluster = pool.decided_cluster_set(ids[0]);
        assert!(cluster.contains(&ids[1]));
        assert!(!cluster.contains(&ids[2]));
        assert!(!cluster.contains(&ids[3]));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_define_unmatch_all_isolates_record() {
        let (mut pool, ids, rule) = pool_with(3);
        link(&mut pool, ids[0], ids[1], rule);
        link(&mut pool, ids[1], ids[2], rule);
        pool.define_master_of_all(ids[1]).unwrap();
        pool.define_unmatch_all(ids[1]).unwrap();
        assert_eq!(pool.decided_cluster(ids[1]), vec![ids[1]]);
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_reset_pool() {
        let (mut pool, ids, rule) = pool_with(3);
        link(&mut pool, ids[0], ids[1], rule);
        pool.define_master(ids[0], ids[1], false).unwrap();
        pool.define_master(ids[0], ids[2], false).unwrap();
        pool.define_no_match(ids[1], ids[2]).unwrap();

        pool.reset_pool().unwrap();
        assert!(pool.edges().all(|edge| edge.status() == MatchStatus::Unmatch));
        assert!(pool.edges().all(|edge| !edge.synthetic));
        assert_eq!(pool.edge_count(), 1);
        assert!(pool.clusters().is_empty());
    }

    #[test]
    fn test_unknown_record_is_rejected_without_changes() {
        let (mut pool, ids, rule) = pool_with(2);
        link(&mut pool, ids[0], ids[1], rule);
        assert!(pool.define_master(ids[0], RecordId(99), false).is_err());
        assert!(pool.define_no_match(RecordId(99), ids[1]).is_err());
        assert!(pool.edges().all(|edge| edge.status() == MatchStatus::Unmatch));
    }
}
