//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::sqlite::migrations;

/// SQLite-backed store shared by all repositories and the workflow engine.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex`. Public operations acquire
/// the lock, execute SQL, and release it; multi-row mutations go through
/// [`SqliteStore::with_tx`].
pub struct SqliteStore {
    /// The mutex-protected SQLite connection.
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database at the given path.
    ///
    /// Applies the durability pragmas and runs pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let conn = Connection::open(path).map_err(|e| {
            StoreError::Storage(e)
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.run_migrations()?;

        Ok(store)
    }

    /// Opens an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory().map_err(StoreError::Storage)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.run_migrations()?;

        Ok(store)
    }

    /// Sets connection pragmas: WAL journaling, 5-second busy wait,
    /// referential checks on, normal fsync.
    fn configure_connection(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(StoreError::Storage)?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        migrations::run_on_conn(&conn)
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| StoreError::Validation {
            message: format!("connection mutex poisoned: {e}"),
        })
    }

    /// Runs a closure inside a database transaction.
    ///
    /// Commits when the closure succeeds, rolls back (on drop) when it
    /// errors. Entry points call this exactly once; the `*_on_conn` helpers
    /// they invoke take the open connection directly, so nested work is
    /// flattened into the single outer transaction.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction().map_err(StoreError::Storage)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(StoreError::Storage)?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// The store's current-time source.
    pub fn now() -> DateTime<Utc> {
        Utc::now()
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Shared row helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as millisecond-precision ISO 8601 TEXT.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

/// Deserialises a JSON array column, treating malformed text as empty.
pub(crate) fn json_vec<T: DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Serialises a JSON array column.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Maps an optional row result, turning `QueryReturnedNoRows` into `None`.
pub(crate) fn optional<T>(
    result: std::result::Result<T, rusqlite::Error>,
) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
