//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use propstore::backend::{Properties, SqlBackend, SqliteFile, TableSpec};
use rusqlite::{Connection, params};
use tempfile::TempDir;

/// Build a property map from literal pairs.
pub fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Write `content` to `name` inside `dir` and return the path.
pub fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

/// The two-line properties file used across the file scenarios.
pub fn seeded_properties(dir: &TempDir) -> PathBuf {
    write_file(dir, "test.properties", "prop1=Line1\nprop2=Line2\n")
}

/// Rewrite a properties file as another process would.
pub fn edit_externally(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
}

/// SQLite database with a `KEYVALUE(ID, VALUE)` table holding prop1/prop2.
pub fn seeded_db(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("props.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE KEYVALUE (ID varchar(40), VALUE varchar(40));
         INSERT INTO KEYVALUE VALUES ('prop1', 'Line1');
         INSERT INTO KEYVALUE VALUES ('prop2', 'Line2');",
    )
    .unwrap();
    path
}

pub fn sql_backend(path: &Path) -> SqlBackend {
    SqlBackend::new(
        Arc::new(SqliteFile::new(path)),
        TableSpec::new("KEYVALUE", "ID", "VALUE"),
    )
    .unwrap()
}

/// Number of rows holding `key`.
pub fn row_count(path: &Path, key: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM KEYVALUE WHERE ID = ?1",
        params![key],
        |row| row.get(0),
    )
    .unwrap()
}

/// Value stored for `key`, if any.
pub fn row_value(path: &Path, key: &str) -> Option<String> {
    let conn = Connection::open(path).unwrap();
    conn.query_row(
        "SELECT VALUE FROM KEYVALUE WHERE ID = ?1",
        params![key],
        |row| row.get(0),
    )
    .ok()
}

/// Run a statement against the database from outside the store.
pub fn execute(path: &Path, sql: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(sql).unwrap();
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}
