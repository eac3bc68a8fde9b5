//! Configuration for matchpool sessions.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (matchpool.toml)
//! ```toml
//! [database]
//! path = "/var/lib/matchpool/crm.db"
//!
//! [schema]
//! result_table = "match_results"
//! source_table = "customers"
//! key_columns = ["customer_id"]
//! display_columns = ["name", "email"]
//!
//! [session]
//! app_user = "batch"
//!
//! [[rules]]
//! name = "Name_And_Email"
//! match_percent = 90
//! ```

mod defaults;

pub use defaults::*;

use crate::model::{MatchRule, RuleCatalog};
use crate::persistence::{ResultSchema, SqliteResultStore};
use crate::store::LoadOptions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a matching session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPoolConfig {
    pub database: DatabaseConfig,
    pub schema: SchemaConfig,
    pub session: SessionConfig,
    pub load: LoadConfig,
    /// Rules whose candidate pairs may appear in the result table
    pub rules: Vec<MatchRule>,
}

impl MatchPoolConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(MatchPoolConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with MATCHPOOL_ prefix
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: MatchPoolConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.key_columns.is_empty() {
            return Err(ConfigError::new("schema.key_columns must not be empty"));
        }
        if self.schema.result_table.trim().is_empty() || self.schema.source_table.trim().is_empty()
        {
            return Err(ConfigError::new("table names must not be empty"));
        }
        if let Some(rule) = self.rules.iter().find(|rule| rule.name.trim().is_empty()) {
            return Err(ConfigError::new(format!(
                "rule with match_percent {:?} has no name",
                rule.match_percent
            )));
        }
        Ok(())
    }

    pub fn result_schema(&self) -> ResultSchema {
        ResultSchema::new(
            self.schema.result_table.clone(),
            self.schema.source_table.clone(),
            self.schema.key_columns.clone(),
        )
    }

    pub fn rule_catalog(&self) -> RuleCatalog {
        RuleCatalog::from_rules(self.rules.iter().cloned())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            display_columns: self.schema.display_columns.clone(),
            prune_reciprocal_rows: self.load.prune_reciprocal_rows,
        }
    }

    /// The result store described by this configuration.
    pub fn result_store(&self) -> SqliteResultStore {
        SqliteResultStore::new(
            &self.database.path,
            self.result_schema(),
            self.session.app_user.clone(),
        )
        .with_busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }
}

/// SQLite database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file
    pub path: PathBuf,
    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Table and column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub result_table: String,
    pub source_table: String,
    /// Unique-key columns of the source table, in key order
    pub key_columns: Vec<String>,
    /// Columns shown for each record; empty means the key columns
    pub display_columns: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            result_table: DEFAULT_RESULT_TABLE.to_string(),
            source_table: DEFAULT_SOURCE_TABLE.to_string(),
            key_columns: vec![DEFAULT_KEY_COLUMN.to_string()],
            display_columns: Vec::new(),
        }
    }
}

/// Who is making decisions in this session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Written to `MATCH_STATUS_USER`
    pub app_user: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_user: DEFAULT_APP_USER.to_string(),
        }
    }
}

/// How the result table is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub prune_reciprocal_rows: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            prune_reciprocal_rows: DEFAULT_PRUNE_RECIPROCAL_ROWS,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_user: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune_reciprocal_rows: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MatchPoolConfig::default();
        assert_eq!(config.schema.result_table, DEFAULT_RESULT_TABLE);
        assert_eq!(config.schema.key_columns, vec![DEFAULT_KEY_COLUMN.to_string()]);
        assert!(config.load.prune_reciprocal_rows);
        assert!(config.rules.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_keys() {
        let mut config = MatchPoolConfig::default();
        config.schema.key_columns.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("key_columns"));
    }

    #[test]
    fn test_load_options_follow_schema() {
        let mut config = MatchPoolConfig::default();
        config.schema.display_columns = vec!["name".to_string()];
        config.load.prune_reciprocal_rows = false;
        let options = config.load_options();
        assert_eq!(options.display_columns, vec!["name".to_string()]);
        assert!(!options.prune_reciprocal_rows);
    }

    #[test]
    fn test_overrides_serialize_sparsely() {
        let overrides = ConfigOverrides {
            session: Some(SessionOverrides {
                app_user: Some("alice".to_string()),
            }),
            ..ConfigOverrides::default()
        };
        let json = serde_json::to_string(&overrides).unwrap();
        assert_eq!(json, r#"{"session":{"app_user":"alice"}}"#);
    }
}
