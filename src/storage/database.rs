//! SQLite database module with schema migrations.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::error::AppError;

/// Current schema version. Increment when adding new migrations.
const SCHEMA_VERSION: i32 = 1;

/// V1 schema: batch history.
const V1_SCHEMA: &str = r#"
-- One row per executed batch
CREATE TABLE IF NOT EXISTS batch_runs (
    batch_id TEXT PRIMARY KEY NOT NULL,
    issuer_id TEXT NOT NULL,
    issuer_name TEXT NOT NULL,
    template_title TEXT NOT NULL,
    total INTEGER NOT NULL,
    success_count INTEGER NOT NULL,
    failure_count INTEGER NOT NULL,
    success_rate REAL NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    cancelled INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_batch_runs_created_at ON batch_runs(created_at);

-- One row per eligible candidate of a batch
CREATE TABLE IF NOT EXISTS batch_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL REFERENCES batch_runs(batch_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    email TEXT NOT NULL,
    name TEXT NOT NULL,
    succeeded INTEGER NOT NULL,
    credential_id TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_batch_outcomes_batch_id ON batch_outcomes(batch_id);
"#;

/// SQLite database handle.
///
/// Holds only the path; every operation opens its own connection on the
/// blocking pool.
#[derive(Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Initializes the database at the given path.
    /// Creates parent directories if needed, opens the SQLite file, and runs migrations.
    pub async fn init(db_path: PathBuf) -> Result<Self, AppError> {
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Storage(format!("Failed to create database directory: {e}"))
                })?;
            }

            let mut conn = Connection::open(&path)
                .map_err(|e| AppError::Storage(format!("Failed to open database: {e}")))?;

            configure_connection(&conn)?;
            run_migrations(&mut conn)?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Database init task failed: {e}")))??;

        info!("[STORE] Database ready (schema v{})", SCHEMA_VERSION);
        Ok(Self { db_path })
    }

    /// Returns the database path for use by other storage modules.
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }
}

/// Opens and configures a connection. Call from blocking context only.
pub(crate) fn open_connection(db_path: &PathBuf) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Storage(format!("Failed to open database: {e}")))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Configures connection with busy timeout, WAL mode and foreign keys.
fn configure_connection(conn: &Connection) -> Result<(), AppError> {
    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| AppError::Storage(format!("Failed to set busy timeout: {e}")))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Storage(format!("Failed to set WAL mode: {e}")))?;

    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Storage(format!("Failed to enable foreign keys: {e}")))?;

    Ok(())
}

/// Runs database migrations using PRAGMA user_version.
fn run_migrations(conn: &mut Connection) -> Result<(), AppError> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| AppError::Storage(format!("Failed to get schema version: {e}")))?;

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| AppError::Storage(format!("Failed to start migration transaction: {e}")))?;

    if current_version < 1 {
        tx.execute_batch(V1_SCHEMA)
            .map_err(|e| AppError::Storage(format!("V1 migration failed: {e}")))?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| AppError::Storage(format!("Failed to update schema version: {e}")))?;

    tx.commit()
        .map_err(|e| AppError::Storage(format!("Failed to commit migration: {e}")))?;

    info!(
        "[STORE] Migrated schema from v{} to v{}",
        current_version, SCHEMA_VERSION
    );
    Ok(())
}
