//! # Persistence Module
//!
//! SQLite-backed [`ResultStore`]. Each call opens its own connection and
//! releases it on return; a batch is applied inside one transaction.
//!
//! The result table has one pair of `DUP_CANDIDATE_1<i>` / `DUP_CANDIDATE_2<i>`
//! columns per source key column plus the match metadata columns.

use crate::model::{KeyValue, RecordKey};
use crate::store::{EdgeWrite, ResultRow, ResultStore, StoreBatch};
use anyhow::{bail, Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row, ToSql, Transaction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

impl FromSql for KeyValue {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(KeyValue::Null),
            ValueRef::Integer(value) => Ok(KeyValue::Integer(value)),
            ValueRef::Real(value) => Ok(KeyValue::from(value)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(KeyValue::from)
                .map_err(|err| FromSqlError::Other(Box::new(err))),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for KeyValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            KeyValue::Null => ToSqlOutput::Owned(Value::Null),
            KeyValue::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            KeyValue::Real(value) => ToSqlOutput::Owned(Value::Real(value.0)),
            KeyValue::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

fn sql_value(value: &KeyValue) -> Value {
    match value {
        KeyValue::Null => Value::Null,
        KeyValue::Integer(value) => Value::Integer(*value),
        KeyValue::Real(value) => Value::Real(value.0),
        KeyValue::Text(value) => Value::Text(value.clone()),
    }
}

fn sql_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_string()))
}

/// Quote an identifier, keeping `schema.table` qualification.
fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Names of the tables and key columns the store works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSchema {
    pub result_table: String,
    pub source_table: String,
    /// Unique-key columns of the source table, in key order.
    pub key_columns: Vec<String>,
}

impl ResultSchema {
    pub fn new(
        result_table: impl Into<String>,
        source_table: impl Into<String>,
        key_columns: Vec<String>,
    ) -> Self {
        Self {
            result_table: result_table.into(),
            source_table: source_table.into(),
            key_columns,
        }
    }

    fn candidate_column(side: u8, index: usize) -> String {
        format!("DUP_CANDIDATE_{}{}", side, index)
    }

    fn candidate_columns(&self, side: u8) -> Vec<String> {
        (0..self.key_columns.len())
            .map(|index| Self::candidate_column(side, index))
            .collect()
    }

    /// `col0 IS ? AND col1 IS ? ...` over both candidate key column sets; `IS` so NULL
    /// key values match.
    fn pair_condition(&self, first_param: usize) -> String {
        self.candidate_columns(1)
            .into_iter()
            .chain(self.candidate_columns(2))
            .enumerate()
            .map(|(offset, column)| format!("{} IS ?{}", column, first_param + offset))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn prune_sql(&self) -> String {
        let table = quote_ident(&self.result_table);
        let c1 = self.candidate_columns(1);
        let c2 = self.candidate_columns(2);
        let crossed = c1
            .iter()
            .zip(&c2)
            .map(|(one, two)| format!("{table}.{one} = M2.{two} AND {table}.{two} = M2.{one}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let lhs_tuple = |alias: &str| {
            c1.iter()
                .map(|column| format!("{alias}.{column}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "DELETE FROM {table} WHERE EXISTS (SELECT 1 FROM {table} M2 WHERE {crossed} AND ({}) < ({}))",
            lhs_tuple(table.as_str()),
            lhs_tuple("M2"),
        )
    }

    fn select_sql(&self, display_columns: &[String]) -> String {
        let mut columns: Vec<String> = self
            .candidate_columns(1)
            .into_iter()
            .chain(self.candidate_columns(2))
            .map(|column| format!("r.{column}"))
            .collect();
        columns.extend(
            ["MATCH_PERCENT", "GROUP_ID", "MATCH_STATUS", "DUP1_MASTER_IND"]
                .iter()
                .map(|column| format!("r.{column}")),
        );
        for (side, alias) in [(1, "s1"), (2, "s2")] {
            for (index, column) in display_columns.iter().enumerate() {
                columns.push(format!("{alias}.{} AS disp{side}{index}", quote_ident(column)));
            }
        }
        let join = |alias: &str, side: u8| {
            self.key_columns
                .iter()
                .enumerate()
                .map(|(index, key)| {
                    format!(
                        "r.{} = {alias}.{}",
                        Self::candidate_column(side, index),
                        quote_ident(key)
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ")
        };
        let source = quote_ident(&self.source_table);
        format!(
            "SELECT {} FROM {} r JOIN {source} s1 ON {} JOIN {source} s2 ON {} ORDER BY r.rowid",
            columns.join(", "),
            quote_ident(&self.result_table),
            join("s1", 1),
            join("s2", 2),
        )
    }

    fn update_sql(&self) -> String {
        format!(
            "UPDATE {} SET MATCH_STATUS = ?1, DUP1_MASTER_IND = ?2, \
             MATCH_STATUS_DATE = CURRENT_TIMESTAMP, MATCH_STATUS_USER = ?3 WHERE {}",
            quote_ident(&self.result_table),
            self.pair_condition(4)
        )
    }

    fn insert_sql(&self) -> String {
        let keys: Vec<String> = self
            .candidate_columns(1)
            .into_iter()
            .chain(self.candidate_columns(2))
            .collect();
        let placeholders: Vec<String> = (1..=keys.len() + 5).map(|n| format!("?{n}")).collect();
        let (key_params, meta_params) = placeholders.split_at(keys.len());
        format!(
            "INSERT INTO {} ({}, MATCH_PERCENT, GROUP_ID, MATCH_STATUS, DUP1_MASTER_IND, \
             MATCH_DATE, MATCH_STATUS_DATE, MATCH_STATUS_USER) \
             VALUES ({}, {}, {}, {}, {}, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP, {})",
            quote_ident(&self.result_table),
            keys.join(", "),
            key_params.join(", "),
            meta_params[0],
            meta_params[1],
            meta_params[2],
            meta_params[3],
            meta_params[4],
        )
    }

    fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(&self.result_table),
            self.pair_condition(1)
        )
    }

    fn create_sql(&self) -> String {
        let keys: Vec<String> = self
            .candidate_columns(1)
            .into_iter()
            .chain(self.candidate_columns(2))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, MATCH_PERCENT INTEGER, GROUP_ID TEXT, \
             MATCH_DATE TEXT, MATCH_STATUS TEXT, MATCH_STATUS_DATE TEXT, \
             MATCH_STATUS_USER TEXT, DUP1_MASTER_IND TEXT)",
            quote_ident(&self.result_table),
            keys.join(", ")
        )
    }
}

/// Result table stored in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    path: PathBuf,
    schema: ResultSchema,
    app_user: String,
    busy_timeout: Duration,
}

impl SqliteResultStore {
    pub fn new(path: impl AsRef<Path>, schema: ResultSchema, app_user: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema,
            app_user: app_user.into(),
            busy_timeout: Duration::from_millis(crate::config::DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn schema(&self) -> &ResultSchema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open sqlite database at {}", self.path.display()))?;
        conn.busy_timeout(self.busy_timeout)
            .context("failed to configure sqlite busy timeout")?;
        Ok(conn)
    }

    /// Create the result table if it does not exist yet.
    pub fn create_result_table(&self) -> Result<()> {
        if self.schema.key_columns.is_empty() {
            bail!("result schema needs at least one key column");
        }
        let sql = self.schema.create_sql();
        self.connect()?
            .execute_batch(&sql)
            .with_context(|| format!("failed to create result table: {sql}"))?;
        Ok(())
    }

    /// All columns of the source row with `key`. Exactly one row must exist.
    pub fn fetch_source_row(&self, key: &RecordKey) -> Result<Vec<KeyValue>> {
        if key.len() != self.schema.key_columns.len() {
            bail!(
                "key {} has {} values but the source table has {} key columns",
                key,
                key.len(),
                self.schema.key_columns.len()
            );
        }
        let condition = self
            .schema
            .key_columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{} IS ?{}", quote_ident(column), index + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            quote_ident(&self.schema.source_table),
            condition
        );
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare: {sql}"))?;
        let width = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(key.values().iter()))
            .with_context(|| format!("query failed: {sql}"))?;

        let Some(row) = rows.next()? else {
            bail!("no data found in {} for key {}", self.schema.source_table, key);
        };
        let values = (0..width)
            .map(|index| row.get::<_, KeyValue>(index))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if rows.next()?.is_some() {
            bail!("more than one row in {} for key {}", self.schema.source_table, key);
        }
        Ok(values)
    }

    fn read_row(&self, row: &Row<'_>, display_width: usize) -> rusqlite::Result<ResultRow> {
        let keys = self.schema.key_columns.len();
        let read = |from: usize, count: usize| -> rusqlite::Result<Vec<KeyValue>> {
            (from..from + count).map(|index| row.get(index)).collect()
        };
        let meta = 2 * keys;
        let match_percent = match row.get::<_, KeyValue>(meta)? {
            KeyValue::Integer(value) => Some(value),
            KeyValue::Real(value) => Some(value.0.round() as i64),
            _ => None,
        };
        Ok(ResultRow {
            lhs_key: read(0, keys)?,
            rhs_key: read(keys, keys)?,
            match_percent,
            group_id: row.get(meta + 1)?,
            match_status: row.get(meta + 2)?,
            dup1_master_ind: row.get(meta + 3)?,
            lhs_display: read(meta + 4, display_width)?,
            rhs_display: read(meta + 4 + display_width, display_width)?,
        })
    }

    fn execute_each(
        tx: &Transaction<'_>,
        sql: &str,
        rows: impl Iterator<Item = Vec<Value>>,
    ) -> Result<usize> {
        let mut stmt = tx
            .prepare(sql)
            .with_context(|| format!("failed to prepare: {sql}"))?;
        let mut missing = 0;
        for values in rows {
            let touched = stmt
                .execute(params_from_iter(values.iter()))
                .with_context(|| format!("statement failed: {sql}"))?;
            if touched == 0 {
                missing += 1;
            }
        }
        Ok(missing)
    }

    fn pair_values(write: &EdgeWrite) -> impl Iterator<Item = Value> + '_ {
        write.lhs_key.iter().chain(&write.rhs_key).map(sql_value)
    }
}

impl ResultStore for SqliteResultStore {
    fn prune_reciprocal_rows(&self) -> Result<usize> {
        let sql = self.schema.prune_sql();
        let removed = self
            .connect()?
            .execute(&sql, [])
            .with_context(|| format!("failed to prune reciprocal rows: {sql}"))?;
        debug!(removed, "pruned reciprocal rows");
        Ok(removed)
    }

    fn load_rows(&self, display_columns: &[String]) -> Result<Vec<ResultRow>> {
        let display: &[String] = if display_columns.is_empty() {
            &self.schema.key_columns
        } else {
            display_columns
        };
        let sql = self.schema.select_sql(display);
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare: {sql}"))?;
        let rows = stmt
            .query_map([], |row| self.read_row(row, display.len()))
            .with_context(|| format!("query failed: {sql}"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read result rows: {sql}"))?;
        debug!(rows = rows.len(), "loaded result rows");
        Ok(rows)
    }

    fn apply_batch(&self, batch: &StoreBatch) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().context("failed to start transaction")?;

        let missing_updates = Self::execute_each(
            &tx,
            &self.schema.update_sql(),
            batch.updates.iter().map(|write| {
                let mut values = vec![
                    Value::Text(write.match_status.to_string()),
                    sql_text(write.dup1_master_ind),
                    Value::Text(self.app_user.clone()),
                ];
                values.extend(Self::pair_values(write));
                values
            }),
        )?;
        Self::execute_each(
            &tx,
            &self.schema.insert_sql(),
            batch.inserts.iter().map(|write| {
                let mut values: Vec<Value> = Self::pair_values(write).collect();
                values.push(write.match_percent.map_or(Value::Null, Value::Integer));
                values.push(Value::Text(write.group_id.clone()));
                values.push(Value::Text(write.match_status.to_string()));
                values.push(sql_text(write.dup1_master_ind));
                values.push(Value::Text(self.app_user.clone()));
                values
            }),
        )?;
        let missing_deletes = Self::execute_each(
            &tx,
            &self.schema.delete_sql(),
            batch
                .deletes
                .iter()
                .map(|write| Self::pair_values(write).collect::<Vec<Value>>()),
        )?;

        tx.commit().context("failed to commit result table changes")?;
        if missing_updates > 0 || missing_deletes > 0 {
            warn!(
                missing_updates,
                missing_deletes, "some result rows were no longer present"
            );
        }
        debug!(writes = batch.len(), "result table updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(keys: &[&str]) -> ResultSchema {
        ResultSchema::new(
            "match_results",
            "people",
            keys.iter().map(|key| key.to_string()).collect(),
        )
    }

    #[test]
    fn test_quote_ident_keeps_qualification() {
        assert_eq!(quote_ident("main.results"), "\"main\".\"results\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_update_sql_binds_keys_after_metadata() {
        let sql = schema(&["id", "region"]).update_sql();
        assert!(sql.contains("MATCH_STATUS_USER = ?3"));
        assert!(sql.ends_with(
            "DUP_CANDIDATE_10 IS ?4 AND DUP_CANDIDATE_11 IS ?5 AND DUP_CANDIDATE_20 IS ?6 AND DUP_CANDIDATE_21 IS ?7"
        ));
    }

    #[test]
    fn test_insert_sql_placeholders() {
        let sql = schema(&["id"]).insert_sql();
        assert!(sql.contains("VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP, ?7)"));
    }

    #[test]
    fn test_prune_sql_compares_composite_keys() {
        let sql = schema(&["id", "region"]).prune_sql();
        assert!(sql.contains("(\"match_results\".DUP_CANDIDATE_10, \"match_results\".DUP_CANDIDATE_11) < (M2.DUP_CANDIDATE_10, M2.DUP_CANDIDATE_11)"));
    }

    #[test]
    fn test_null_key_rows_are_updated_and_deleted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteResultStore::new(
            dir.path().join("results.db"),
            schema(&["id", "region"]),
            "tester",
        );
        store.create_result_table()?;
        let conn = store.connect()?;
        conn.execute(
            "INSERT INTO \"match_results\" (DUP_CANDIDATE_10, DUP_CANDIDATE_11, \
             DUP_CANDIDATE_20, DUP_CANDIDATE_21, GROUP_ID) VALUES (1, NULL, 2, NULL, 'Name')",
            [],
        )?;

        let write = EdgeWrite {
            edge: crate::model::EdgeId(0),
            lhs_key: vec![KeyValue::Integer(1), KeyValue::Null],
            rhs_key: vec![KeyValue::Integer(2), KeyValue::Null],
            match_percent: None,
            group_id: "Name".to_string(),
            match_status: "MATCH",
            dup1_master_ind: Some("Y"),
        };
        store.apply_batch(&StoreBatch {
            updates: vec![write.clone()],
            ..StoreBatch::default()
        })?;
        let status: Option<String> = conn.query_row(
            "SELECT MATCH_STATUS FROM \"match_results\"",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(status.as_deref(), Some("MATCH"));

        store.apply_batch(&StoreBatch {
            deletes: vec![write],
            ..StoreBatch::default()
        })?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM \"match_results\"", [], |row| row.get(0))?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[test]
    fn test_key_value_sql_round_trip() -> anyhow::Result<()> {
        let conn = Connection::open_in_memory()?;
        for value in [
            KeyValue::Null,
            KeyValue::Integer(42),
            KeyValue::from(1.5),
            KeyValue::from("x"),
        ] {
            let back: KeyValue = conn.query_row("SELECT ?1", [&value], |row| row.get(0))?;
            assert_eq!(back, value);
        }
        Ok(())
    }
}
