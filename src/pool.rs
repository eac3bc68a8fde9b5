//! # Match Pool Module
//!
//! The match pool owns every [`SourceRecord`] and [`MatchEdge`] of one matching
//! session in two arenas and keeps the indexes needed by the decision
//! operations (see `resolve`), auto-match and persistence synchronization.
//!
//! Edges removed from the pool are parked in a pending-delete list until the
//! next `store()` writes the deletion back.

use crate::graph::{reachable, reachable_set, ultimate_master, EdgeFilter, GraphView};
use crate::model::{
    ordered_pair, EdgeId, KeyValue, MasterSide, MatchEdge, MatchStatus, RecordId, RecordKey,
    RuleCatalog, RuleId, SourceRecord, StoreState,
};
use crate::store::{TracingWarnings, WarningSink};
use anyhow::{anyhow, bail, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Edges touched by one mutation operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Existing edges whose status or master changed.
    pub changed: BTreeSet<EdgeId>,
    /// Synthetic edges created and still present.
    pub created: BTreeSet<EdgeId>,
    /// Edges removed from the pool.
    pub removed: BTreeSet<EdgeId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.created.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed.len() + self.created.len() + self.removed.len()
    }
}

/// One connected component of the decided sub-graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// The ultimate master: the only member without a master of its own.
    pub master: RecordId,
    /// All members including the master, ordered by record key.
    pub members: Vec<RecordId>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, record: RecordId) -> bool {
        self.members.contains(&record)
    }
}

/// State of an edge before the running operation first touched it.
#[derive(Debug, Clone, Copy)]
struct EdgeSnapshot {
    status: MatchStatus,
    master: Option<MasterSide>,
    store_state: StoreState,
}

#[derive(Debug, Default)]
struct Journal {
    before: FxHashMap<EdgeId, EdgeSnapshot>,
    created: BTreeSet<EdgeId>,
    removed: BTreeSet<EdgeId>,
    /// Every touch in order, repeats included; sub-steps scan their own tail.
    log: Vec<EdgeId>,
}

/// The graph of candidate record pairs for one matching session.
///
/// Not internally synchronized: one pool is driven by one caller at a time.
pub struct MatchPool {
    pub(crate) rules: RuleCatalog,
    records: Vec<SourceRecord>,
    by_key: FxHashMap<RecordKey, RecordId>,
    edges: BTreeMap<EdgeId, MatchEdge>,
    pairs: FxHashMap<(RecordId, RecordId), EdgeId>,
    deleted: Vec<MatchEdge>,
    next_edge_id: u32,
    pub(crate) warnings: Arc<dyn WarningSink>,
    journal: Journal,
}

impl MatchPool {
    /// Create an empty pool for the given rules.
    pub fn new(rules: RuleCatalog) -> Self {
        Self::with_warnings(rules, Arc::new(TracingWarnings))
    }

    /// Create an empty pool that reports recoverable anomalies to `warnings`.
    pub fn with_warnings(rules: RuleCatalog, warnings: Arc<dyn WarningSink>) -> Self {
        Self {
            rules,
            records: Vec::new(),
            by_key: FxHashMap::default(),
            edges: BTreeMap::new(),
            pairs: FxHashMap::default(),
            deleted: Vec::new(),
            next_edge_id: 0,
            warnings,
            journal: Journal::default(),
        }
    }

    pub fn rules(&self) -> &RuleCatalog {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleCatalog {
        &mut self.rules
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Look up the record with `key`, creating it if absent. An existing
    /// record gets its display values replaced when new ones are given.
    pub fn add_record(&mut self, key: RecordKey, display_values: Vec<KeyValue>) -> RecordId {
        if let Some(id) = self.by_key.get(&key) {
            let id = *id;
            if !display_values.is_empty() {
                self.records[id.0 as usize].display_values = display_values;
            }
            return id;
        }
        let id = RecordId(self.records.len() as u32);
        self.by_key.insert(key.clone(), id);
        self.records.push(SourceRecord::new(id, key, display_values));
        id
    }

    pub fn record(&self, id: RecordId) -> Option<&SourceRecord> {
        self.records.get(id.0 as usize)
    }

    pub fn record_by_key(&self, key: &RecordKey) -> Option<RecordId> {
        self.by_key.get(key).copied()
    }

    pub fn record_by_values(&self, values: &[KeyValue]) -> Option<RecordId> {
        self.record_by_key(&RecordKey::new(values.to_vec()))
    }

    pub fn records(&self) -> impl Iterator<Item = &SourceRecord> {
        self.records.iter()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Record ids ordered by key; the deterministic visiting order.
    pub fn records_in_key_order(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.records.iter().map(|record| record.id).collect();
        ids.sort_by(|a, b| self.key_of(*a).cmp(self.key_of(*b)));
        ids
    }

    pub(crate) fn key_of(&self, id: RecordId) -> &RecordKey {
        &self.records[id.0 as usize].key
    }

    pub(crate) fn ensure_record(&self, id: RecordId) -> Result<()> {
        if (id.0 as usize) < self.records.len() {
            Ok(())
        } else {
            bail!("record {} is not part of this match pool", id)
        }
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Add a candidate edge between two records of this pool.
    ///
    /// The new edge is `NEW` for persistence. `master` must be one of the two
    /// endpoints and is only kept for decided statuses. Fails if the pair is
    /// already connected.
    pub fn add_edge(
        &mut self,
        lhs: RecordId,
        rhs: RecordId,
        rule: RuleId,
        status: MatchStatus,
        master: Option<RecordId>,
    ) -> Result<EdgeId> {
        self.ensure_record(lhs)?;
        self.ensure_record(rhs)?;
        if lhs == rhs {
            bail!("cannot connect record {} to itself", lhs);
        }
        if self.rules.get(rule).is_none() {
            bail!("unknown rule {}", rule);
        }
        if let Some(existing) = self.edge_between(lhs, rhs) {
            bail!(
                "records {} and {} are already connected by edge {}",
                lhs,
                rhs,
                existing
            );
        }
        let side = match master {
            Some(node) if node == lhs => Some(MasterSide::Lhs),
            Some(node) if node == rhs => Some(MasterSide::Rhs),
            Some(node) => bail!("master {} is not an endpoint of {}-{}", node, lhs, rhs),
            None => None,
        };
        let mut edge = MatchEdge::new(self.allocate_edge_id(), lhs, rhs, rule, status);
        edge.assign(status, side);
        Ok(self.insert_edge(edge, true))
    }

    pub(crate) fn allocate_edge_id(&mut self) -> EdgeId {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        id
    }

    /// Insert a fully built edge. With `index` false the pair index keeps
    /// whichever edge already claims the pair.
    pub(crate) fn insert_edge(&mut self, edge: MatchEdge, index: bool) -> EdgeId {
        let id = edge.id;
        let pair = edge.pair();
        self.records[edge.original_lhs.0 as usize].attach(id);
        self.records[edge.original_rhs.0 as usize].attach(id);
        if index || !self.pairs.contains_key(&pair) {
            self.pairs.insert(pair, id);
        }
        self.edges.insert(id, edge);
        id
    }

    pub fn edge(&self, id: EdgeId) -> Option<&MatchEdge> {
        self.edges.get(&id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &MatchEdge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The edge joining `a` and `b`, in either orientation.
    pub fn edge_between(&self, a: RecordId, b: RecordId) -> Option<EdgeId> {
        self.pairs.get(&ordered_pair(a, b)).copied()
    }

    /// Edges produced by the named rule.
    pub fn edges_for_rule(&self, rule_name: &str) -> Vec<EdgeId> {
        let Some(rule) = self.rules.rule_by_name(rule_name) else {
            return Vec::new();
        };
        self.edges
            .values()
            .filter(|edge| edge.rule == rule)
            .map(|edge| edge.id)
            .collect()
    }

    /// Edges removed from the pool and not yet deleted from the result table.
    pub fn pending_deletes(&self) -> &[MatchEdge] {
        &self.deleted
    }

    /// Drop every edge of the named rule from memory without scheduling a
    /// delete. Used before the rule's candidates are regenerated.
    pub fn forget_rule_edges(&mut self, rule_name: &str) -> usize {
        let ids = self.edges_for_rule(rule_name);
        for id in &ids {
            self.unlink_edge(*id);
        }
        debug!(rule = rule_name, count = ids.len(), "forgot rule edges");
        ids.len()
    }

    /// Remove an edge from the pool; it is deleted from the result table on
    /// the next `store()` unless it was never stored.
    pub fn remove_edge(&mut self, id: EdgeId) -> bool {
        if !self.edges.contains_key(&id) {
            return false;
        }
        self.begin();
        self.retire_edge(id);
        self.finish();
        true
    }

    fn unlink_edge(&mut self, id: EdgeId) -> Option<MatchEdge> {
        let edge = self.edges.remove(&id)?;
        self.records[edge.original_lhs.0 as usize].detach(id);
        self.records[edge.original_rhs.0 as usize].detach(id);
        let pair = edge.pair();
        if self.pairs.get(&pair) == Some(&id) {
            self.pairs.remove(&pair);
            // A legacy reciprocal duplicate may still claim the pair.
            let survivor = self.records[pair.0 .0 as usize]
                .edges
                .iter()
                .copied()
                .find(|other| self.edges.get(other).is_some_and(|e| e.pair() == pair));
            if let Some(survivor) = survivor {
                self.pairs.insert(pair, survivor);
            }
        }
        Some(edge)
    }

    /// Whether the pair's edge was removed and its row not yet deleted.
    pub(crate) fn is_pending_delete(&self, a: RecordId, b: RecordId) -> bool {
        let pair = ordered_pair(a, b);
        self.deleted.iter().any(|edge| edge.pair() == pair)
    }

    pub(crate) fn mark_clean(&mut self, id: EdgeId) {
        if let Some(edge) = self.edges.get_mut(&id) {
            edge.store_state = StoreState::Clean;
        }
    }

    pub(crate) fn clear_pending_deletes(&mut self) {
        self.deleted.clear();
    }

    // ------------------------------------------------------------------
    // Journaled mutation primitives
    // ------------------------------------------------------------------

    pub(crate) fn begin(&mut self) {
        self.journal = Journal::default();
    }

    /// Close the running operation and report its net effect. Edges that
    /// ended where they started get their previous store state back.
    pub(crate) fn finish(&mut self) -> ChangeSet {
        let journal = std::mem::take(&mut self.journal);
        let mut changes = ChangeSet {
            created: journal.created,
            removed: journal.removed,
            ..ChangeSet::default()
        };
        for (id, before) in journal.before {
            let Some(edge) = self.edges.get_mut(&id) else {
                continue;
            };
            if edge.status == before.status && edge.master == before.master {
                edge.store_state = before.store_state;
            } else {
                changes.changed.insert(id);
            }
        }
        changes
    }

    /// Set an edge's status and master (given as a record, converted to a side).
    pub(crate) fn set_edge(&mut self, id: EdgeId, status: MatchStatus, master: Option<RecordId>) {
        let Some(edge) = self.edges.get_mut(&id) else {
            return;
        };
        let side = master.and_then(|node| edge.side_of(node));
        if !self.journal.created.contains(&id) {
            self.journal.before.entry(id).or_insert(EdgeSnapshot {
                status: edge.status,
                master: edge.master,
                store_state: edge.store_state,
            });
        }
        self.journal.log.push(id);
        if edge.assign(status, side) {
            debug!(edge = %edge, "edge updated");
        }
    }

    /// Make sure an edge joins `a` and `b` and return it.
    ///
    /// An existing edge is reused as is; `status` only applies to a new or
    /// resurrected edge. A pair deleted earlier in the session is resurrected
    /// so the pending delete cannot remove the row again. Otherwise a
    /// synthetic edge is created under the synthetic rule.
    pub(crate) fn connect(&mut self, a: RecordId, b: RecordId, status: MatchStatus) -> EdgeId {
        if let Some(existing) = self.edge_between(a, b) {
            return existing;
        }

        let pair = ordered_pair(a, b);
        if let Some(position) = self.deleted.iter().position(|edge| edge.pair() == pair) {
            let mut edge = self.deleted.remove(position);
            let snapshot = EdgeSnapshot {
                status: edge.status,
                master: edge.master,
                store_state: edge.store_state,
            };
            edge.store_state = StoreState::Dirty;
            edge.assign(status, None);
            let id = self.insert_edge(edge, true);
            if !self.journal.removed.remove(&id) {
                self.journal.before.insert(id, snapshot);
            }
            self.journal.created.insert(id);
            self.journal.log.push(id);
            debug!(edge = %id, "resurrected deleted edge");
            return id;
        }

        let rule = self.rules.synthetic_rule();
        let id = self.allocate_edge_id();
        let mut edge = MatchEdge::new(id, a, b, rule, status);
        edge.synthetic = true;
        self.insert_edge(edge, true);
        self.journal.created.insert(id);
        self.journal.log.push(id);
        debug!(edge = %id, lhs = %a, rhs = %b, status = %status, "created synthetic edge");
        id
    }

    /// Take an edge out of the pool. Edges never stored are simply dropped.
    pub(crate) fn retire_edge(&mut self, id: EdgeId) {
        let Some(edge) = self.unlink_edge(id) else {
            return;
        };
        let created_here = self.journal.created.remove(&id);
        self.journal.before.remove(&id);
        if !created_here {
            self.journal.removed.insert(id);
        }
        debug!(edge = %edge, "edge removed from pool");
        if edge.store_state != StoreState::New {
            self.deleted.push(edge);
        }
    }

    /// Position in the running operation's touch log.
    pub(crate) fn journal_mark(&self) -> usize {
        self.journal.log.len()
    }

    /// Edges touched since `mark`, by id.
    pub(crate) fn touched_since(&self, mark: usize) -> Vec<EdgeId> {
        let mut ids = self.journal.log.get(mark..).unwrap_or_default().to_vec();
        ids.sort();
        ids.dedup();
        ids
    }

    // ------------------------------------------------------------------
    // Graph helpers
    // ------------------------------------------------------------------

    /// A filtered view over the pool, optionally restricted to `nodes`.
    pub fn view<'a>(
        &'a self,
        filter: EdgeFilter,
        nodes: Option<&'a FxHashSet<RecordId>>,
    ) -> PoolView<'a> {
        PoolView {
            pool: self,
            filter,
            nodes,
        }
    }

    /// Members of `start`'s decided cluster, `start` included.
    pub fn decided_cluster(&self, start: RecordId) -> Vec<RecordId> {
        reachable(&self.view(EdgeFilter::Decided, None), start)
    }

    pub(crate) fn decided_cluster_set(&self, start: RecordId) -> FxHashSet<RecordId> {
        reachable_set(&self.view(EdgeFilter::Decided, None), start)
    }

    /// Records that must never join `nodes`: the decided clusters on the far
    /// side of every `NOMATCH` edge leaving any of `nodes`.
    pub(crate) fn no_match_exclusions(&self, nodes: &FxHashSet<RecordId>) -> FxHashSet<RecordId> {
        let mut excluded = FxHashSet::default();
        for node in nodes {
            for edge_id in &self.records[node.0 as usize].edges {
                let edge = &self.edges[edge_id];
                if edge.status != MatchStatus::NoMatch {
                    continue;
                }
                let other = edge.other(*node);
                if excluded.contains(&other) {
                    continue;
                }
                excluded.extend(self.decided_cluster(other));
            }
        }
        excluded
    }

    /// Edges with both endpoints in `nodes`, by id.
    pub(crate) fn edges_among(&self, nodes: &FxHashSet<RecordId>) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = nodes
            .iter()
            .flat_map(|node| self.records[node.0 as usize].edges.iter().copied())
            .filter(|id| {
                let edge = &self.edges[id];
                nodes.contains(&edge.original_lhs) && nodes.contains(&edge.original_rhs)
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Every decided cluster with at least two members, ordered by master key.
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut assigned = FxHashSet::default();
        let mut clusters = Vec::new();
        for id in self.records_in_key_order() {
            if assigned.contains(&id) {
                continue;
            }
            let mut members = self.decided_cluster(id);
            assigned.extend(members.iter().copied());
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| self.key_of(*a).cmp(self.key_of(*b)));
            let view = self.view(EdgeFilter::Decided, None);
            let master = members
                .iter()
                .copied()
                .find(|member| view.masters_of(*member).is_empty())
                .unwrap_or_else(|| ultimate_master(&view, members[0], &[]));
            clusters.push(Cluster { master, members });
        }
        clusters.sort_by(|a, b| self.key_of(a.master).cmp(self.key_of(b.master)));
        clusters
    }

    /// Check the structural invariants and report the first violation.
    ///
    /// - one edge per unordered record pair;
    /// - decided edges carry a master, other edges do not;
    /// - every decided cluster is a tree directed towards a single root.
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen_pairs: FxHashMap<(RecordId, RecordId), EdgeId> = FxHashMap::default();
        for edge in self.edges.values() {
            if let Some(other) = seen_pairs.insert(edge.pair(), edge.id) {
                bail!("edges {} and {} join the same records", other, edge.id);
            }
            if edge.status.is_decided() != edge.master.is_some() {
                bail!("edge {} has status {} but master {:?}", edge.id, edge.status, edge.master);
            }
        }

        let view = self.view(EdgeFilter::Decided, None);
        let mut assigned = FxHashSet::default();
        for record in &self.records {
            if assigned.contains(&record.id) {
                continue;
            }
            let members = self.decided_cluster_set(record.id);
            assigned.extend(members.iter().copied());
            if members.len() < 2 {
                continue;
            }
            let mut roots = 0;
            for member in &members {
                match view.masters_of(*member).len() {
                    0 => roots += 1,
                    1 => {}
                    n => bail!("record {} has {} masters", self.key_of(*member), n),
                }
            }
            let decided_edges = self
                .edges_among(&members)
                .into_iter()
                .filter(|id| self.edges[id].status.is_decided())
                .count();
            if roots != 1 || decided_edges != members.len() - 1 {
                bail!(
                    "cluster of {} has {} ultimate masters and {} decided edges for {} members",
                    self.key_of(record.id),
                    roots,
                    decided_edges,
                    members.len()
                );
            }
        }
        Ok(())
    }

    pub(crate) fn record_edges(&self, id: RecordId) -> &[EdgeId] {
        &self.records[id.0 as usize].edges
    }

    pub(crate) fn require_rule(&self, name: &str) -> Result<RuleId> {
        self.rules
            .rule_by_name(name)
            .ok_or_else(|| anyhow!("auto-match invoked with an invalid rule name: {}", name))
    }
}

impl fmt::Debug for MatchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchPool")
            .field("rules", &self.rules.len())
            .field("records", &self.records.len())
            .field("edges", &self.edges.len())
            .field("pending_deletes", &self.deleted.len())
            .finish()
    }
}

/// A [`GraphView`] over a pool's arenas.
#[derive(Clone, Copy)]
pub struct PoolView<'a> {
    pool: &'a MatchPool,
    filter: EdgeFilter,
    nodes: Option<&'a FxHashSet<RecordId>>,
}

impl PoolView<'_> {
    fn sorted(&self, mut out: Vec<(EdgeId, RecordId)>) -> Vec<(EdgeId, RecordId)> {
        out.sort_by(|(ea, a), (eb, b)| {
            self.pool
                .key_of(*a)
                .cmp(self.pool.key_of(*b))
                .then(ea.cmp(eb))
        });
        out
    }
}

impl GraphView for PoolView<'_> {
    fn contains(&self, node: RecordId) -> bool {
        (node.0 as usize) < self.pool.records.len()
            && self.nodes.map_or(true, |nodes| nodes.contains(&node))
    }

    fn neighbours(&self, node: RecordId) -> Vec<(EdgeId, RecordId)> {
        if !self.contains(node) {
            return Vec::new();
        }
        let out = self
            .pool
            .record_edges(node)
            .iter()
            .filter_map(|id| {
                let edge = &self.pool.edges[id];
                if !self.filter.admits(edge) {
                    return None;
                }
                let other = edge.other(node);
                (other != node && self.contains(other)).then_some((*id, other))
            })
            .collect();
        self.sorted(out)
    }

    fn masters_of(&self, node: RecordId) -> Vec<(EdgeId, RecordId)> {
        if !self.contains(node) {
            return Vec::new();
        }
        let out = self
            .pool
            .record_edges(node)
            .iter()
            .filter_map(|id| {
                let edge = &self.pool.edges[id];
                if !edge.status.is_decided() || edge.duplicate() != Some(node) {
                    return None;
                }
                let master = edge.master()?;
                self.contains(master).then_some((*id, master))
            })
            .collect();
        self.sorted(out)
    }
}
