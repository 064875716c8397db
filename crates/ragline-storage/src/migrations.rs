//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use ragline_core::error::RaglineError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), RaglineError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RaglineError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version = current_version(conn)?;
    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: session_log");
    }

    Ok(())
}

/// Highest applied migration version (0 for a fresh database).
pub fn current_version(conn: &Connection) -> Result<i64, RaglineError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| RaglineError::Storage(format!("Failed to query migration version: {}", e)))
}

/// Version 1: the session log.
fn apply_v1(conn: &Connection) -> Result<(), RaglineError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS session_log (
            id                  TEXT PRIMARY KEY NOT NULL,
            recorded_at         INTEGER NOT NULL,
            request_id          TEXT NOT NULL,
            client_identity     TEXT NOT NULL DEFAULT '',
            collection          TEXT NOT NULL DEFAULT '',
            query               TEXT NOT NULL,
            response            TEXT NOT NULL DEFAULT '',
            blocked             INTEGER NOT NULL DEFAULT 0,
            safe                INTEGER NOT NULL DEFAULT 1,
            fallback_used       INTEGER NOT NULL DEFAULT 0,
            backend             TEXT NOT NULL DEFAULT '',
            latency_ms          INTEGER NOT NULL DEFAULT 0,
            safety_latency_ms   INTEGER NOT NULL DEFAULT 0,
            streamed            INTEGER NOT NULL DEFAULT 0,
            audio_bytes         INTEGER NOT NULL DEFAULT 0,
            error               TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_session_log_recorded_at
            ON session_log (recorded_at DESC);

        CREATE INDEX IF NOT EXISTS idx_session_log_client
            ON session_log (client_identity, recorded_at DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'session_log');
        ",
    )
    .map_err(|e| RaglineError::Storage(format!("Failed to apply migration v1: {}", e)))
}
