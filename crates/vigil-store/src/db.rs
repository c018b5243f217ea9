//! SQLite identity store and recognition log.
//!
//! One connection guarded by a mutex. Labels are the `users.id` row ids, and
//! log rows are removed with their identity through `ON DELETE CASCADE`.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use vigil_core::{Identity, IdentityStore, RecognitionLog, StoreError};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
  id    INTEGER PRIMARY KEY AUTOINCREMENT,
  name  TEXT NOT NULL UNIQUE,
  role  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recognition_log (
  log_id      INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  timestamp   TEXT NOT NULL,  -- RFC3339 UTC, fixed microsecond width
  confidence  REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_log_timestamp ON recognition_log(timestamp);
"#;

/// One row of the recognition history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub label: i64,
    pub name: String,
    pub role: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl SqliteStore {
    /// Open or create the database file and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;").map_err(db_err)?;
        tracing::info!(path = %path.display(), "opened identity database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The `limit` most recent recognitions.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.name, u.role, r.timestamp, r.confidence
                 FROM recognition_log r
                 JOIN users u ON r.user_id = u.id
                 ORDER BY r.timestamp DESC, r.log_id DESC
                 LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut history = Vec::new();
        for row in rows {
            let (label, name, role, ts, confidence) = row.map_err(db_err)?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| StoreError::Malformed(format!("timestamp {ts:?}: {e}")))?
                .with_timezone(&Utc);
            history.push(HistoryEntry {
                label,
                name,
                role,
                timestamp,
                confidence,
            });
        }
        Ok(history)
    }
}

impl IdentityStore for SqliteStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, role FROM users ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Identity {
                    label: row.get(0)?,
                    name: row.get(1)?,
                    role: row.get(2)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn add_identity(&self, name: &str, role: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        match conn.execute("INSERT INTO users(name, role) VALUES (?1, ?2)", params![name, role]) {
            Ok(_) => {
                let label = conn.last_insert_rowid();
                tracing::info!(label, name, role, "identity added");
                Ok(label)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateName(name.to_string()))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn remove_identity(&self, label: i64) -> Result<(), StoreError> {
        let conn = self.conn();
        let exists = conn
            .query_row("SELECT 1 FROM users WHERE id = ?1", [label], |_| Ok(()))
            .optional()
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(label));
        }
        conn.execute("DELETE FROM users WHERE id = ?1", [label])
            .map_err(db_err)?;
        tracing::info!(label, "identity and its log removed");
        Ok(())
    }
}

impl RecognitionLog for SqliteStore {
    fn log_recognition(&self, label: i64, confidence: f64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.conn()
            .execute(
                "INSERT INTO recognition_log(user_id, timestamp, confidence) VALUES (?1, ?2, ?3)",
                params![label, now, confidence],
            )
            .map_err(db_err)?;
        Ok(())
    }
}
