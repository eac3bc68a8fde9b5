//! # Matchpool
//!
//! A match-resolution graph engine. Candidate duplicate pairs found by
//! matching rules are loaded from a result table into a [`MatchPool`], where
//! user and automatic decisions group records into clusters. Each cluster is a
//! tree of master pointers with one ultimate master, and `NOMATCH` decisions
//! keep records apart. Decisions are written back to the result table.

pub mod automatch;
pub mod config;
pub mod graph;
pub mod model;
pub mod persistence;
pub mod pool;
pub mod resolve;
pub mod store;
pub mod test_support;

// Re-export main types for convenience
pub use automatch::AutoMatchReport;
pub use config::{ConfigError, ConfigOverrides, MatchPoolConfig};
pub use graph::{EdgeFilter, GraphView, SpanningTree};
pub use model::{
    EdgeId, KeyValue, MasterSide, MatchEdge, MatchRule, MatchStatus, RecordId, RecordKey,
    RuleCatalog, RuleId, SourceRecord, StoreState, SYNTHETIC_RULE_NAME,
};
pub use persistence::{ResultSchema, SqliteResultStore};
pub use pool::{ChangeSet, Cluster, MatchPool, PoolView};
pub use store::{
    CollectingWarnings, LoadOptions, LoadSummary, ResultRow, ResultStore, StoreBatch,
    StoreSummary, TracingWarnings, WarningSink,
};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// A pool bound to the result table it was loaded from.
pub struct MatchSession {
    pool: MatchPool,
    store: Box<dyn ResultStore>,
    options: LoadOptions,
}

impl MatchSession {
    /// Open the configured SQLite result table and load it.
    pub fn open(config: &MatchPoolConfig) -> Result<Self> {
        Self::open_with_warnings(config, Arc::new(TracingWarnings))
    }

    pub fn open_with_warnings(
        config: &MatchPoolConfig,
        warnings: Arc<dyn WarningSink>,
    ) -> Result<Self> {
        let store = config.result_store();
        store.create_result_table()?;
        let pool = MatchPool::with_warnings(config.rule_catalog(), warnings);
        let mut session = Self::with_store(pool, Box::new(store), config.load_options());
        session.reload()?;
        Ok(session)
    }

    /// Bind an existing pool to any result store without loading.
    pub fn with_store(pool: MatchPool, store: Box<dyn ResultStore>, options: LoadOptions) -> Self {
        Self {
            pool,
            store,
            options,
        }
    }

    /// Read the result table again; rows already loaded only refresh display values.
    pub fn reload(&mut self) -> Result<LoadSummary> {
        let summary = self.pool.find_all(self.store.as_ref(), &self.options)?;
        info!(
            records = self.pool.record_count(),
            edges = self.pool.edge_count(),
            "session loaded"
        );
        Ok(summary)
    }

    /// Write pending decisions back.
    pub fn save(&mut self) -> Result<StoreSummary> {
        self.pool.store(self.store.as_ref())
    }

    pub fn pool(&self) -> &MatchPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut MatchPool {
        &mut self.pool
    }

    pub fn into_pool(self) -> MatchPool {
        self.pool
    }
}
