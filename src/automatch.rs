//! # Auto-Match
//!
//! Depth-first sweep that merges every record with its unvisited neighbours
//! under one rule, honoring `NOMATCH` decisions.

use crate::graph::{EdgeFilter, GraphView};
use crate::model::{MatchStatus, RecordId, RuleId};
use crate::pool::{ChangeSet, MatchPool};
use anyhow::Result;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Outcome of one auto-match run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMatchReport {
    pub rule: String,
    /// Records marked visited, seeded ones included. Equals the record count.
    pub visited: usize,
    /// `define_master` decisions taken.
    pub decisions: usize,
    pub changes: ChangeSet,
}

impl MatchPool {
    /// Merge records connected by `rule_name` edges into clusters.
    ///
    /// Records without a usable edge of the rule start out visited. The rest
    /// are swept depth first from each unvisited record in key order: the
    /// selected record becomes master of every unvisited rule neighbour that
    /// is not kept apart by a `NOMATCH`, then the neighbours are explored.
    #[instrument(skip(self), level = "debug")]
    pub fn do_auto_match(&mut self, rule_name: &str) -> Result<AutoMatchReport> {
        let rule = self.require_rule(rule_name)?;
        let mut visited: FxHashSet<RecordId> = self
            .records()
            .map(|record| record.id)
            .filter(|id| !self.has_rule_edge(*id, rule))
            .collect();
        let seeded = visited.len();

        self.begin();
        let mut decisions = 0;
        for start in self.records_in_key_order() {
            if visited.contains(&start) {
                continue;
            }
            let mut stack = vec![start];
            while let Some(selected) = stack.pop() {
                if !visited.insert(selected) {
                    continue;
                }
                let neighbours = self.rule_neighbours(selected, rule, &visited);
                let mut excluded = self.no_match_exclusions(&self.decided_cluster_set(selected));
                for &neighbour in &neighbours {
                    if excluded.contains(&neighbour) {
                        debug!(selected = %selected, neighbour = %neighbour, "kept apart by no-match");
                        continue;
                    }
                    self.apply_master(selected, neighbour, true);
                    decisions += 1;
                    excluded = self.no_match_exclusions(&self.decided_cluster_set(selected));
                }
                // Reverse so the smallest key is explored first.
                stack.extend(
                    neighbours
                        .into_iter()
                        .rev()
                        .filter(|neighbour| !visited.contains(neighbour)),
                );
            }
        }
        let changes = self.finish();

        info!(
            rule = rule_name,
            seeded,
            visited = visited.len(),
            decisions,
            changed = changes.len(),
            "auto-match finished"
        );
        Ok(AutoMatchReport {
            rule: rule_name.to_string(),
            visited: visited.len(),
            decisions,
            changes,
        })
    }

    fn has_rule_edge(&self, record: RecordId, rule: RuleId) -> bool {
        self.record_edges(record).iter().any(|id| {
            self.edge(*id)
                .is_some_and(|edge| edge.rule == rule && edge.status() != MatchStatus::NoMatch)
        })
    }

    /// Unvisited neighbours of `record` over non-`NOMATCH` edges of `rule`, by key.
    fn rule_neighbours(
        &self,
        record: RecordId,
        rule: RuleId,
        visited: &FxHashSet<RecordId>,
    ) -> Vec<RecordId> {
        let mut neighbours: Vec<RecordId> = self
            .view(EdgeFilter::Candidate, None)
            .neighbours(record)
            .into_iter()
            .filter(|(edge, other)| {
                !visited.contains(other) && self.edge(*edge).is_some_and(|e| e.rule == rule)
            })
            .map(|(_, other)| other)
            .collect();
        neighbours.dedup();
        neighbours
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KeyValue, MatchRule, RecordKey, RuleCatalog};

    fn pool_with(n: i64) -> (MatchPool, Vec<RecordId>, RuleId, RuleId) {
        let mut pool = MatchPool::new(RuleCatalog::from_rules(vec![
            MatchRule::new("Name", Some(80)),
            MatchRule::new("Phone", Some(60)),
        ]));
        let name = pool.rules().rule_by_name("Name").unwrap();
        let phone = pool.rules().rule_by_name("Phone").unwrap();
        let ids = (1..=n)
            .map(|k| pool.add_record(RecordKey::new(vec![KeyValue::Integer(k)]), Vec::new()))
            .collect();
        (pool, ids, name, phone)
    }

    #[test]
    fn test_auto_match_builds_one_cluster_per_component() {
        let (mut pool, ids, name, _) = pool_with(5);
        pool.add_edge(ids[0], ids[1], name, MatchStatus::Unmatch, None)
            .unwrap();
        pool.add_edge(ids[1], ids[2], name, MatchStatus::Unmatch, None)
            .unwrap();
        pool.add_edge(ids[3], ids[4], name, MatchStatus::Unmatch, None)
            .unwrap();

        let report = pool.do_auto_match("Name").unwrap();
        assert_eq!(report.visited, 5);
        assert_eq!(report.decisions, 3);

        let clusters = pool.clusters();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].master, ids[0]);
        assert_eq!(clusters[1].master, ids[3]);
        assert!(pool
            .edges()
            .all(|edge| edge.status() == MatchStatus::AutoMatch));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_auto_match_ignores_other_rules() {
        let (mut pool, ids, name, phone) = pool_with(3);
        pool.add_edge(ids[0], ids[1], name, MatchStatus::Unmatch, None)
            .unwrap();
        pool.add_edge(ids[1], ids[2], phone, MatchStatus::Unmatch, None)
            .unwrap();

        let report = pool.do_auto_match("Name").unwrap();
        assert_eq!(report.visited, 3);
        assert_eq!(pool.decided_cluster(ids[2]), vec![ids[2]]);
        assert_eq!(pool.decided_cluster(ids[0]).len(), 2);
    }

    #[test]
    fn test_auto_match_respects_no_match() {
        // Triangle 1-2-3 with 1 and 3 known to differ.
        let (mut pool, ids, name, _) = pool_with(3);
        pool.add_edge(ids[0], ids[1], name, MatchStatus::Unmatch, None)
            .unwrap();
        pool.add_edge(ids[1], ids[2], name, MatchStatus::Unmatch, None)
            .unwrap();
        pool.add_edge(ids[0], ids[2], name, MatchStatus::NoMatch, None)
            .unwrap();

        pool.do_auto_match("Name").unwrap();
        let cluster = pool.decided_cluster_set(ids[0]);
        assert!(cluster.contains(&ids[1]));
        assert!(!cluster.contains(&ids[2]));
        pool.check_invariants().unwrap();
    }

    #[test]
    fn test_auto_match_unknown_rule_fails() {
        let (mut pool, _, _, _) = pool_with(2);
        let err = pool.do_auto_match("Nope").unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }
}
