use std::path::Path;

use parking_lot::Mutex;
use parley_core::{Alert, AlertSink};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// An alert as stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub kind: String,
    pub session_id: Option<String>,
    pub detail: String,
    pub payload: Option<String>,
    pub raised_at: String,
}

/// Persists alerts to SQLite and logs them at error level.
pub struct SqliteAlertSink {
    conn: Mutex<Connection>,
}

impl SqliteAlertSink {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS alerts (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 kind TEXT NOT NULL,
                 session_id TEXT,
                 detail TEXT NOT NULL,
                 payload TEXT,
                 raised_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_alerts_kind ON alerts(kind);
             CREATE INDEX IF NOT EXISTS idx_alerts_session ON alerts(session_id);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<AlertRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, session_id, detail, payload, raised_at
             FROM alerts ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(AlertRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                session_id: row.get(2)?,
                detail: row.get(3)?,
                payload: row.get(4)?,
                raised_at: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))
    }
}

impl AlertSink for SqliteAlertSink {
    fn raise(&self, alert: Alert) {
        tracing::error!(
            kind = alert.kind.as_str(),
            session_id = alert.session_id.as_ref().map(|s| s.as_str()).unwrap_or(""),
            detail = %alert.detail,
            "alert raised"
        );
        let payload = alert.payload.as_ref().map(|p| p.to_string());
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "INSERT INTO alerts (kind, session_id, detail, payload, raised_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                alert.kind.as_str(),
                alert.session_id.as_ref().map(|s| s.as_str()),
                alert.detail,
                payload,
                alert.raised_at.to_rfc3339(),
            ],
        ) {
            tracing::error!(error = %e, "failed to persist alert");
        }
    }
}

/// Logs alerts without persisting them.
#[derive(Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: Alert) {
        tracing::error!(
            kind = alert.kind.as_str(),
            session_id = alert.session_id.as_ref().map(|s| s.as_str()).unwrap_or(""),
            detail = %alert.detail,
            payload = alert.payload.as_ref().map(|p| p.to_string()).unwrap_or_default(),
            "alert raised"
        );
    }
}
