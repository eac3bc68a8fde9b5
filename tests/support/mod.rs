use std::path::Path;

use matchpool_rs::{MatchRule, ResultSchema, RuleCatalog, SqliteResultStore};
use rusqlite::{params, Connection};

pub const RESULT_TABLE: &str = "match_results";
pub const SOURCE_TABLE: &str = "people";

#[allow(dead_code)]
pub fn schema() -> ResultSchema {
    ResultSchema::new(RESULT_TABLE, SOURCE_TABLE, vec!["id".to_string()])
}

#[allow(dead_code)]
pub fn rules() -> RuleCatalog {
    RuleCatalog::from_rules(vec![MatchRule::new("Group_One", Some(15))])
}

/// Database with a `people(id, name)` source table holding `ids` and an empty
/// result table.
#[allow(dead_code)]
pub fn create_database(path: &Path, ids: &[i64]) -> anyhow::Result<SqliteResultStore> {
    let conn = Connection::open(path)?;
    conn.execute_batch(&format!(
        "CREATE TABLE {SOURCE_TABLE} (id INTEGER PRIMARY KEY, name TEXT);"
    ))?;
    for id in ids {
        conn.execute(
            &format!("INSERT INTO {SOURCE_TABLE} (id, name) VALUES (?1, ?2)"),
            params![id, format!("person {id}")],
        )?;
    }
    let store = SqliteResultStore::new(path, schema(), "tester");
    store.create_result_table()?;
    Ok(store)
}

#[allow(dead_code)]
pub fn insert_pair(
    path: &Path,
    lhs: i64,
    rhs: i64,
    group: &str,
    status: Option<&str>,
    master_ind: Option<&str>,
) -> anyhow::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute(
        &format!(
            "INSERT INTO {RESULT_TABLE} (DUP_CANDIDATE_10, DUP_CANDIDATE_20, MATCH_PERCENT, \
             GROUP_ID, MATCH_STATUS, DUP1_MASTER_IND) VALUES (?1, ?2, 15, ?3, ?4, ?5)"
        ),
        params![lhs, rhs, group, status, master_ind],
    )?;
    Ok(())
}

#[allow(dead_code)]
pub fn count_rows(path: &Path) -> anyhow::Result<i64> {
    let conn = Connection::open(path)?;
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {RESULT_TABLE}"), [], |row| {
        row.get(0)
    })?)
}

/// `(lhs, rhs, status, master indicator, status user)` for every row, by rowid.
#[allow(dead_code)]
pub fn read_rows(
    path: &Path,
) -> anyhow::Result<Vec<(i64, i64, Option<String>, Option<String>, Option<String>)>> {
    let conn = Connection::open(path)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT DUP_CANDIDATE_10, DUP_CANDIDATE_20, MATCH_STATUS, DUP1_MASTER_IND, \
         MATCH_STATUS_USER FROM {RESULT_TABLE} ORDER BY rowid"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
