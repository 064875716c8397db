//! Session log repository.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use ragline_core::error::RaglineError;
use ragline_core::types::{RequestId, SessionLogEntry};

use crate::db::Database;

/// Aggregate counts over the session log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub total: u64,
    pub blocked: u64,
    pub failed: u64,
    pub fallbacks: u64,
}

/// Repository for recorded chat exchanges.
#[derive(Debug, Clone)]
pub struct SessionLogRepository {
    db: Arc<Database>,
}

impl SessionLogRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store one exchange.
    pub fn insert(&self, entry: &SessionLogEntry) -> Result<(), RaglineError> {
        self.db.with_conn(|conn| {
            insert_entry(conn, entry)
                .map(|_| ())
                .map_err(|e| RaglineError::Storage(format!("Failed to save session entry: {}", e)))
        })
    }

    /// Store several exchanges in one transaction.
    pub fn insert_batch(&self, entries: &[SessionLogEntry]) -> Result<usize, RaglineError> {
        if entries.is_empty() {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            conn.execute_batch("BEGIN")
                .map_err(|e| RaglineError::Storage(e.to_string()))?;
            for entry in entries {
                if let Err(e) = insert_entry(conn, entry) {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(RaglineError::Storage(format!(
                        "Failed to save session batch: {}",
                        e
                    )));
                }
            }
            conn.execute_batch("COMMIT")
                .map_err(|e| RaglineError::Storage(e.to_string()))?;
            Ok(entries.len())
        })
    }

    /// Most recent exchanges first.
    pub fn recent(&self, limit: u64) -> Result<Vec<SessionLogEntry>, RaglineError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, recorded_at, request_id, client_identity, collection, query,
                            response, blocked, safe, fallback_used, backend, latency_ms,
                            safety_latency_ms, streamed, audio_bytes, error
                     FROM session_log
                     ORDER BY recorded_at DESC
                     LIMIT ?1",
                )
                .map_err(|e| RaglineError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![limit], |row| Ok(row_to_entry(row)))
                .map_err(|e| RaglineError::Storage(e.to_string()))?;

            let mut entries = Vec::new();
            for row in rows {
                let entry = row.map_err(|e| RaglineError::Storage(e.to_string()))??;
                entries.push(entry);
            }
            Ok(entries)
        })
    }

    pub fn stats(&self) -> Result<SessionStats, RaglineError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(blocked), 0),
                        COALESCE(SUM(error IS NOT NULL), 0),
                        COALESCE(SUM(fallback_used), 0)
                 FROM session_log",
                [],
                |row| {
                    Ok(SessionStats {
                        total: row.get::<_, i64>(0)? as u64,
                        blocked: row.get::<_, i64>(1)? as u64,
                        failed: row.get::<_, i64>(2)? as u64,
                        fallbacks: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .map_err(|e| RaglineError::Storage(e.to_string()))
        })
    }
}

fn insert_entry(conn: &Connection, entry: &SessionLogEntry) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO session_log (id, recorded_at, request_id, client_identity, collection,
            query, response, blocked, safe, fallback_used, backend, latency_ms,
            safety_latency_ms, streamed, audio_bytes, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        rusqlite::params![
            entry.id.to_string(),
            entry.recorded_at.timestamp_millis(),
            entry.request_id.to_string(),
            entry.client_identity,
            entry.collection,
            entry.query,
            entry.response,
            entry.blocked as i32,
            entry.safe as i32,
            entry.fallback_used as i32,
            entry.backend,
            entry.latency_ms as i64,
            entry.safety_latency_ms as i64,
            entry.streamed as i32,
            entry.audio_bytes as i64,
            entry.error,
        ],
    )
}

fn row_to_entry(row: &Row<'_>) -> Result<SessionLogEntry, RaglineError> {
    let storage = |e: rusqlite::Error| RaglineError::Storage(e.to_string());

    let id: String = row.get(0).map_err(storage)?;
    let recorded_at: i64 = row.get(1).map_err(storage)?;
    let request_id: String = row.get(2).map_err(storage)?;

    let id = Uuid::parse_str(&id).map_err(|e| RaglineError::Storage(e.to_string()))?;
    let request_id =
        Uuid::parse_str(&request_id).map_err(|e| RaglineError::Storage(e.to_string()))?;
    let recorded_at = Utc
        .timestamp_millis_opt(recorded_at)
        .single()
        .ok_or_else(|| RaglineError::Storage(format!("invalid timestamp {recorded_at}")))?;

    Ok(SessionLogEntry {
        id,
        recorded_at,
        request_id: RequestId(request_id),
        client_identity: row.get(3).map_err(storage)?,
        collection: row.get(4).map_err(storage)?,
        query: row.get(5).map_err(storage)?,
        response: row.get(6).map_err(storage)?,
        blocked: row.get::<_, i32>(7).map_err(storage)? != 0,
        safe: row.get::<_, i32>(8).map_err(storage)? != 0,
        fallback_used: row.get::<_, i32>(9).map_err(storage)? != 0,
        backend: row.get(10).map_err(storage)?,
        latency_ms: row.get::<_, i64>(11).map_err(storage)? as u64,
        safety_latency_ms: row.get::<_, i64>(12).map_err(storage)? as u64,
        streamed: row.get::<_, i32>(13).map_err(storage)? != 0,
        audio_bytes: row.get::<_, i64>(14).map_err(storage)? as usize,
        error: row.get(15).map_err(storage)?,
    })
}
