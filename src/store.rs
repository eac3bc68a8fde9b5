//! # Store Module
//!
//! Synchronization between a [`MatchPool`] and the result table that holds
//! one row per candidate pair. The pool talks to the table through the
//! [`ResultStore`] trait; `persistence` provides the SQLite implementation.
//!
//! Loading is tolerant: rows naming an unknown rule or status are reported to
//! the pool's [`WarningSink`] and skipped. Writing is all or nothing: the
//! batch is applied in one transaction and store states only change after it
//! committed.

use crate::model::{
    EdgeId, KeyValue, MasterSide, MatchEdge, MatchStatus, RecordKey, StoreState,
    SYNTHETIC_RULE_NAME,
};
use crate::pool::MatchPool;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Receives recoverable anomalies met while loading or storing.
pub trait WarningSink: Send + Sync {
    fn handle_warning(&self, message: &str);
}

/// Forwards warnings to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWarnings;

impl WarningSink for TracingWarnings {
    fn handle_warning(&self, message: &str) {
        warn!("{}", message);
    }
}

/// Keeps warnings in memory, for callers that show them later.
#[derive(Debug, Default)]
pub struct CollectingWarnings {
    messages: Mutex<Vec<String>>,
}

impl CollectingWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|messages| messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WarningSink for CollectingWarnings {
    fn handle_warning(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}

/// One result-table row joined with the display columns of both candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub lhs_key: Vec<KeyValue>,
    pub rhs_key: Vec<KeyValue>,
    pub lhs_display: Vec<KeyValue>,
    pub rhs_display: Vec<KeyValue>,
    pub match_percent: Option<i64>,
    pub group_id: Option<String>,
    pub match_status: Option<String>,
    pub dup1_master_ind: Option<String>,
}

/// Column values written for one edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeWrite {
    pub edge: EdgeId,
    pub lhs_key: Vec<KeyValue>,
    pub rhs_key: Vec<KeyValue>,
    pub match_percent: Option<i64>,
    pub group_id: String,
    pub match_status: &'static str,
    pub dup1_master_ind: Option<&'static str>,
}

/// Everything one `store()` has to write, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreBatch {
    pub updates: Vec<EdgeWrite>,
    pub inserts: Vec<EdgeWrite>,
    pub deletes: Vec<EdgeWrite>,
}

impl StoreBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.inserts.len() + self.deletes.len()
    }
}

/// Access to the result table.
pub trait ResultStore {
    /// Delete the reciprocal duplicate of every pair stored in both
    /// orientations, keeping the row whose first candidate key is larger.
    fn prune_reciprocal_rows(&self) -> Result<usize>;

    /// Every row, in storage order, with `display_columns` of both candidates.
    fn load_rows(&self, display_columns: &[String]) -> Result<Vec<ResultRow>>;

    /// Apply a batch atomically.
    fn apply_batch(&self, batch: &StoreBatch) -> Result<()>;
}

/// How `find_all` reads the result table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Source columns shown for each record. Empty means the key columns.
    pub display_columns: Vec<String>,
    pub prune_reciprocal_rows: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub pruned: usize,
    pub rows: usize,
    pub loaded: usize,
    pub refreshed: usize,
    /// Rows whose pair was removed from the pool and awaits deletion.
    pub pending_delete: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
}

enum RowOutcome {
    Loaded,
    Refreshed,
    PendingDelete,
    Skipped,
}

impl MatchPool {
    /// Populate the pool from the result table.
    ///
    /// Rows already present in the pool only refresh the display values of
    /// their records. Rows of pairs removed since the last `store()` stay
    /// removed. I/O errors are reported to the warning sink and returned.
    #[instrument(skip(self, store, options), level = "debug")]
    pub fn find_all(&mut self, store: &dyn ResultStore, options: &LoadOptions) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        if options.prune_reciprocal_rows {
            summary.pruned = self.report(store.prune_reciprocal_rows())?;
        }
        let rows = self.report(store.load_rows(&options.display_columns))?;
        summary.rows = rows.len();

        for (index, row) in rows.into_iter().enumerate() {
            match self.load_row(index, row) {
                RowOutcome::Loaded => summary.loaded += 1,
                RowOutcome::Refreshed => summary.refreshed += 1,
                RowOutcome::PendingDelete => summary.pending_delete += 1,
                RowOutcome::Skipped => summary.skipped += 1,
            }
        }

        info!(
            pruned = summary.pruned,
            rows = summary.rows,
            loaded = summary.loaded,
            refreshed = summary.refreshed,
            pending_delete = summary.pending_delete,
            skipped = summary.skipped,
            "match pool loaded"
        );
        Ok(summary)
    }

    fn load_row(&mut self, index: usize, row: ResultRow) -> RowOutcome {
        let group = row.group_id.clone().unwrap_or_default();
        let synthetic = group == SYNTHETIC_RULE_NAME;
        let rule = if synthetic {
            Some(self.rules.synthetic_rule())
        } else {
            self.rules.rule_by_name(&group)
        };
        let Some(rule) = rule else {
            self.warnings.handle_warning(&format!(
                "result row {}: unknown rule '{}', skipping",
                index, group
            ));
            return RowOutcome::Skipped;
        };
        let Some(status) = MatchStatus::from_code(row.match_status.as_deref()) else {
            self.warnings.handle_warning(&format!(
                "result row {}: unknown match status '{}', skipping",
                index,
                row.match_status.as_deref().unwrap_or_default()
            ));
            return RowOutcome::Skipped;
        };
        if row.lhs_key.is_empty() || row.lhs_key.len() != row.rhs_key.len() {
            self.warnings.handle_warning(&format!(
                "result row {}: malformed candidate keys, skipping",
                index
            ));
            return RowOutcome::Skipped;
        }

        let lhs = self.add_record(RecordKey::new(row.lhs_key), row.lhs_display);
        let rhs = self.add_record(RecordKey::new(row.rhs_key), row.rhs_display);
        if lhs == rhs {
            self.warnings.handle_warning(&format!(
                "result row {}: record {} is paired with itself, skipping",
                index,
                self.key_of(lhs)
            ));
            return RowOutcome::Skipped;
        }

        if self.is_pending_delete(lhs, rhs) {
            debug!(lhs = %lhs, rhs = %rhs, "row awaits deletion, not reloaded");
            return RowOutcome::PendingDelete;
        }

        let loaded = self.record_edges(lhs).iter().copied().find(|id| {
            self.edge(*id)
                .is_some_and(|edge| edge.original_lhs == lhs && edge.original_rhs == rhs)
        });
        if let Some(existing) = loaded {
            debug!(edge = %existing, "row already loaded");
            return RowOutcome::Refreshed;
        }
        let mut index_pair = true;
        if self.edge_between(lhs, rhs).is_some() {
            self.warnings.handle_warning(&format!(
                "result row {}: pair {} / {} is also stored in reverse orientation",
                index,
                self.key_of(lhs),
                self.key_of(rhs)
            ));
            index_pair = false;
        }

        let mut edge = MatchEdge::new(self.allocate_edge_id(), lhs, rhs, rule, status);
        edge.match_percent = row.match_percent;
        edge.synthetic = synthetic;
        let master = status
            .is_decided()
            .then(|| MasterSide::from_indicator(row.dup1_master_ind.as_deref()));
        edge.assign(status, master);
        edge.store_state = StoreState::Clean;
        self.insert_edge(edge, index_pair);
        RowOutcome::Loaded
    }

    /// The writes the next `store()` will issue.
    pub fn pending_batch(&self) -> StoreBatch {
        let mut batch = StoreBatch::default();
        for edge in self.edges() {
            match edge.store_state() {
                StoreState::Clean => {}
                StoreState::Dirty => batch.updates.push(self.edge_write(edge)),
                StoreState::New => batch.inserts.push(self.edge_write(edge)),
            }
        }
        batch.deletes = self
            .pending_deletes()
            .iter()
            .map(|edge| self.edge_write(edge))
            .collect();
        batch
    }

    /// Write all pending changes back to the result table.
    ///
    /// On failure nothing is marked clean, so the same changes are written by
    /// the next successful call.
    #[instrument(skip(self, store), level = "debug")]
    pub fn store(&mut self, store: &dyn ResultStore) -> Result<StoreSummary> {
        let batch = self.pending_batch();
        let summary = StoreSummary {
            updated: batch.updates.len(),
            inserted: batch.inserts.len(),
            deleted: batch.deletes.len(),
        };
        if batch.is_empty() {
            debug!("nothing to store");
            return Ok(summary);
        }

        self.report(store.apply_batch(&batch))?;

        for write in batch.updates.iter().chain(batch.inserts.iter()) {
            self.mark_clean(write.edge);
        }
        self.clear_pending_deletes();
        info!(
            updated = summary.updated,
            inserted = summary.inserted,
            deleted = summary.deleted,
            "match pool stored"
        );
        Ok(summary)
    }

    fn edge_write(&self, edge: &MatchEdge) -> EdgeWrite {
        let rule = self.rules.get(edge.rule);
        EdgeWrite {
            edge: edge.id,
            lhs_key: self.key_of(edge.original_lhs).values().to_vec(),
            rhs_key: self.key_of(edge.original_rhs).values().to_vec(),
            match_percent: edge
                .match_percent
                .or_else(|| rule.and_then(|rule| rule.match_percent)),
            group_id: self.rules.name(edge.rule).to_string(),
            match_status: edge.status().code(),
            dup1_master_ind: MasterSide::indicator(edge.master_side()),
        }
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.warnings.handle_warning(&format!("{:#}", err));
        }
        result
    }
}
