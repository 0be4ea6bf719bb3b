//! Relational-table property source.
//!
//! Reads and writes a two-column key/value table. Identifiers come from
//! configuration and are validated then quoted; keys and values are always
//! bound as parameters. A connection is opened per operation and dropped
//! when it completes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, warn};

use super::{Change, PropertyBackend, Properties, WriteMode};
use crate::error::{Error, Result};

/// Supplies database connections, one per operation.
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Opens a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns the driver error if the database cannot be reached.
    fn connect(&self) -> rusqlite::Result<Connection>;

    /// Human-readable description of the database (path, URI).
    fn describe(&self) -> String;
}

/// Connection provider for an existing SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteFile {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteFile {
    /// Provider for the database at `path`. The file is never created implicitly.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Sets how long a connection waits on a locked database.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl ConnectionProvider for SqliteFile {
    fn connect(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Table and column names of a key/value table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub table: String,
    pub key_column: String,
    pub value_column: String,
}

impl TableSpec {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        value_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            value_column: value_column.into(),
        }
    }

    /// Checks that every identifier is a plain SQL name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first invalid identifier.
    pub fn validate(&self) -> Result<()> {
        for (what, ident) in [
            ("table name", &self.table),
            ("key column", &self.key_column),
            ("value column", &self.value_column),
        ] {
            if !is_identifier(ident) {
                return Err(Error::configuration(format!(
                    "invalid {what} '{ident}': expected [A-Za-z_][A-Za-z0-9_]*"
                )));
            }
        }
        Ok(())
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT \"{}\", \"{}\" FROM \"{}\"",
            self.key_column, self.value_column, self.table
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO \"{}\" (\"{}\", \"{}\") VALUES (?1, ?2)",
            self.table, self.key_column, self.value_column
        )
    }

    fn update_sql(&self) -> String {
        format!(
            "UPDATE \"{}\" SET \"{}\" = ?2 WHERE \"{}\" = ?1",
            self.table, self.value_column, self.key_column
        )
    }

    fn delete_all_sql(&self) -> String {
        format!("DELETE FROM \"{}\"", self.table)
    }
}

fn is_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One planned write against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    DeleteAll,
    Insert { key: String, value: String },
    Update { key: String, value: String },
}

/// Key/value table backend.
#[derive(Clone)]
pub struct SqlBackend {
    provider: Arc<dyn ConnectionProvider>,
    spec: TableSpec,
}

impl std::fmt::Debug for SqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBackend")
            .field("database", &self.provider.describe())
            .field("spec", &self.spec)
            .finish()
    }
}

impl SqlBackend {
    /// Creates a backend over `spec`, checking connectivity once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an identifier is invalid or the
    /// database cannot be reached.
    pub fn new(provider: Arc<dyn ConnectionProvider>, spec: TableSpec) -> Result<Self> {
        spec.validate()?;

        let backend = Self { provider, spec };
        if let Err(e) = backend.provider.connect() {
            return Err(Error::configuration_caused_by(
                format!("cannot connect to database '{}'", backend.provider.describe()),
                Error::source_unavailable(backend.location(), e),
            ));
        }
        Ok(backend)
    }

    /// Table layout this backend reads and writes.
    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Plans the statements for `change`.
    ///
    /// `Replace` becomes a delete-all followed by inserts. `Upsert` becomes,
    /// per key, an `UPDATE` when the key is in `change.cached`, else an
    /// `INSERT`. Keys are planned in sorted order.
    pub fn plan(change: &Change<'_>) -> Vec<Statement> {
        let mut keys: Vec<&String> = change.entries.keys().collect();
        keys.sort();

        let mut statements = Vec::with_capacity(keys.len() + 1);
        if change.mode == WriteMode::Replace {
            statements.push(Statement::DeleteAll);
        }

        for key in keys {
            let key_owned = key.clone();
            let value = change.entries[key].clone();
            let known = change.mode == WriteMode::Upsert && change.cached.contains_key(key);
            statements.push(if known {
                Statement::Update {
                    key: key_owned,
                    value,
                }
            } else {
                Statement::Insert {
                    key: key_owned,
                    value,
                }
            });
        }

        statements
    }

    fn execute_plan(&self, statements: &[Statement]) -> rusqlite::Result<()> {
        let mut conn = self.provider.connect()?;
        let tx = conn.transaction()?;

        let insert_sql = self.spec.insert_sql();
        for statement in statements {
            match statement {
                Statement::DeleteAll => {
                    tx.execute(&self.spec.delete_all_sql(), [])?;
                },
                Statement::Insert { key, value } => {
                    tx.execute(&insert_sql, params![key, value])?;
                },
                Statement::Update { key, value } => {
                    let updated = tx.execute(&self.spec.update_sql(), params![key, value])?;
                    if updated == 0 {
                        debug!(key = %key, "Row vanished since last load, inserting instead");
                        tx.execute(&insert_sql, params![key, value])?;
                    }
                },
            }
        }

        tx.commit()
    }

    fn query_all(&self) -> rusqlite::Result<Properties> {
        let conn = self.provider.connect()?;
        let mut stmt = conn.prepare(&self.spec.select_sql())?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut entries = Properties::new();
        let mut skipped = 0usize;
        for row in rows {
            match row? {
                (Some(key), Some(value)) => {
                    entries.insert(key, value);
                },
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                table = %self.spec.table,
                skipped,
                "Ignored rows with NULL key or value"
            );
        }
        Ok(entries)
    }
}

impl PropertyBackend for SqlBackend {
    fn kind(&self) -> &'static str {
        "sql"
    }

    fn location(&self) -> String {
        format!("{}#{}", self.provider.describe(), self.spec.table)
    }

    fn load_all(&self) -> Result<Properties> {
        let entries = self
            .query_all()
            .map_err(|e| Error::source_unavailable(self.location(), e))?;
        debug!(table = %self.spec.table, entries = entries.len(), "Read properties table");
        Ok(entries)
    }

    fn apply_change(&self, change: Change<'_>) -> Result<()> {
        let statements = Self::plan(&change);
        self.execute_plan(&statements)
            .map_err(|e| Error::persistence(self.location(), e))?;

        debug!(
            table = %self.spec.table,
            mode = ?change.mode,
            statements = statements.len(),
            "Committed property batch"
        );
        Ok(())
    }
}
