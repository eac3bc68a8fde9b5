//! Default constants for matchpool configuration.

// =============================================================================
// Database Defaults
// =============================================================================

/// Default SQLite database file holding the source and result tables
pub const DEFAULT_DATABASE_PATH: &str = "matchpool.db";

/// How long a connection waits on a locked database (milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Schema Defaults
// =============================================================================

/// Default result table name
pub const DEFAULT_RESULT_TABLE: &str = "match_results";

/// Default source table name
pub const DEFAULT_SOURCE_TABLE: &str = "source_table";

/// Default unique-key column of the source table
pub const DEFAULT_KEY_COLUMN: &str = "id";

// =============================================================================
// Session Defaults
// =============================================================================

/// User recorded in `MATCH_STATUS_USER` when none is configured
pub const DEFAULT_APP_USER: &str = "matchpool";

// =============================================================================
// Load Defaults
// =============================================================================

/// Delete reciprocal duplicate rows before loading.
/// Without pruning both orientations load and the first one wins the pair.
pub const DEFAULT_PRUNE_RECIPROCAL_ROWS: bool = true;

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "MATCHPOOL_";

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "MATCHPOOL_CONFIG";
