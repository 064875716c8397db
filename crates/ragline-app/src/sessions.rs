//! `--recent`: session log totals and the latest exchanges.

use std::path::Path;
use std::sync::Arc;

use ragline_core::types::SessionLogEntry;
use ragline_core::RaglineError;
use ragline_storage::{Database, SessionLogRepository, SessionStats};

/// Open an existing session log without creating one.
pub fn open(path: &Path) -> Result<SessionLogRepository, RaglineError> {
    if !path.exists() {
        return Err(RaglineError::Storage(format!(
            "session log {} does not exist",
            path.display()
        )));
    }
    Ok(SessionLogRepository::new(Arc::new(Database::new(path)?)))
}

pub fn totals_line(stats: &SessionStats) -> String {
    format!(
        "{} exchanges, {} blocked, {} failed, {} safety fallbacks",
        stats.total, stats.blocked, stats.failed, stats.fallbacks
    )
}

fn outcome(entry: &SessionLogEntry) -> String {
    match (&entry.error, entry.blocked) {
        (Some(error), _) => format!("failed: {error}"),
        (None, true) => "blocked".to_string(),
        (None, false) => "answered".to_string(),
    }
}

fn entry_line(entry: &SessionLogEntry) -> String {
    format!(
        "{}  {:<15} {:<12} {:>6}ms  {}  {:?}",
        entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        entry.client_identity,
        entry.collection,
        entry.latency_ms,
        outcome(entry),
        entry.query
    )
}

/// Totals first, then one line per exchange, newest first.
pub fn report(repo: &SessionLogRepository, limit: u64) -> Result<Vec<String>, RaglineError> {
    let mut lines = vec![totals_line(&repo.stats()?)];
    lines.extend(repo.recent(limit)?.iter().map(entry_line));
    Ok(lines)
}
