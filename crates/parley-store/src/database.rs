use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

pub type ConnectionPool = Pool<SqliteConnectionManager>;

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub connection_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 5_000,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs on every new pooled connection: pragmas, then the (idempotent) schema.
#[derive(Debug)]
struct ConnectionSetup {
    busy_timeout_ms: u64,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(&schema::pragmas(self.busy_timeout_ms))?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        Ok(())
    }
}

/// Pooled SQLite handle. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create dir: {e}")))?;
        }

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .connection_customizer(Box::new(ConnectionSetup {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(SqliteConnectionManager::file(path))?;

        let db = Self { pool, path: path.to_owned() };
        db.ensure_schema_version()?;
        info!(path = %path.display(), pool_size = config.pool_size, "database opened");
        Ok(db)
    }

    /// Each in-memory SQLite connection is its own database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub fn in_memory() -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(ConnectionSetup { busy_timeout_ms: 5_000 }))
            .build(SqliteConnectionManager::memory())?;

        let db = Self { pool, path: PathBuf::from(":memory:") };
        db.ensure_schema_version()?;
        Ok(db)
    }

    fn ensure_schema_version(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let version: Option<u32> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
                .ok();
            if version.is_none() {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    [schema::SCHEMA_VERSION],
                )?;
            }
            Ok(())
        })
    }

    /// Run `f` on a pooled connection, on the current thread.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.pool.get()?;
        f(&mut *conn)
    }

    /// Run `f` on a pooled connection from the blocking thread pool.
    pub async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f)).await?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &Database) -> Vec<String> {
        db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .unwrap()
    }

    #[test]
    fn in_memory_has_schema() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
        let tables = table_names(&db);
        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"turns".to_string()));
    }

    #[test]
    fn in_memory_state_is_shared_across_checkouts() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, user_id, created_at, last_active_at) VALUES ('s', 'u', 'a', 'a')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let n: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn schema_version_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db/parley.db");
        let config = DatabaseConfig::default();
        drop(Database::open(&path, &config).unwrap());
        let db = Database::open(&path, &config).unwrap();
        let rows: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("wal.db"), &DatabaseConfig::default()).unwrap();
        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[tokio::test]
    async fn run_on_blocking_pool() {
        let db = Database::in_memory().unwrap();
        let version: u32 = db
            .run(|conn| Ok(conn.query_row("SELECT version FROM schema_version", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, crate::schema::SCHEMA_VERSION);
    }
}
