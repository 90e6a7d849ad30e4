/// SQL DDL for the parley database.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    active_responder_id TEXT,
    title TEXT NOT NULL DEFAULT 'New Chat',
    summary TEXT NOT NULL DEFAULT '',
    message_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS turns (
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    turn_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    responder_id TEXT,
    content TEXT NOT NULL,
    error_kind TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_id, turn_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, last_active_at);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status, last_active_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Applied to every pooled connection.
pub fn pragmas(busy_timeout_ms: u64) -> String {
    format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};
         PRAGMA synchronous = NORMAL;"
    )
}
