//! rollcall-store: document collections for students, attendance records
//! and timetables, kept in one SQLite database.
//!
//! All access goes through a single `tokio_rusqlite` connection, which runs
//! statements on its own thread in submission order. Multi-statement updates
//! (ledger upserts, enrollment uniqueness checks, pruning) run inside one
//! transaction each.

mod attendance;
mod error;
mod students;
mod timetables;

pub use error::{Result, StoreError};
pub use students::{FaceDataHealth, NewStudent, StudentProfile, StudentQuery, StudentStatus};

use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS students (
    student_id   TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    department   TEXT NOT NULL,
    year         TEXT NOT NULL,
    division     TEXT NOT NULL,
    semester     TEXT NOT NULL,
    email        TEXT NOT NULL UNIQUE,
    phone_number TEXT NOT NULL,
    status       TEXT NOT NULL,
    face_data    TEXT NOT NULL DEFAULT '[]',
    created_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance_records (
    id               TEXT PRIMARY KEY,
    student_id       TEXT NOT NULL,
    student_name     TEXT NOT NULL,
    date             TEXT NOT NULL,
    session_name     TEXT NOT NULL,
    period           TEXT NOT NULL,
    time             TEXT NOT NULL,
    first_seen       TEXT NOT NULL,
    last_seen        TEXT NOT NULL,
    duration_seconds REAL NOT NULL,
    status           TEXT NOT NULL,
    method           TEXT NOT NULL,
    UNIQUE (student_id, date, session_name)
);
CREATE INDEX IF NOT EXISTS attendance_by_date ON attendance_records (date);
CREATE TABLE IF NOT EXISTS timetables (
    department TEXT NOT NULL,
    year       TEXT NOT NULL,
    division   TEXT NOT NULL,
    periods    TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (department, year, division)
);
";

/// Handle to the rollcall database. Cheap to clone.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let version = self
            .conn
            .call(|conn| {
                conn.pragma_update(None, "journal_mode", "WAL").ok();
                conn.pragma_update(None, "foreign_keys", "ON")?;
                let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
                if current < SCHEMA_VERSION {
                    let tx = conn.transaction()?;
                    tx.execute_batch(SCHEMA_V1)?;
                    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
                    tx.commit()?;
                }
                Ok(current)
            })
            .await?;
        if version < SCHEMA_VERSION {
            tracing::info!(from = version, to = SCHEMA_VERSION, "migrated database schema");
        }
        Ok(())
    }
}

/// Read a JSON-encoded TEXT column.
fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> std::result::Result<String, tokio_rusqlite::Error> {
    serde_json::to_string(value).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let version: i64 = store
            .conn
            .call(|conn| Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
