//! Session logging, decoupled from the request path.
//!
//! Requests push entries into a bounded in-memory queue and move on. A
//! background drain task hands them to a [`LogSink`] in small batches. When
//! the queue is full the oldest entry is dropped and counted; entries still
//! queued at a crash are lost.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ragline_core::SessionLogEntry;
use ragline_storage::{Database, SessionLogRepository};

use crate::error::ChatError;

/// Entries handed to the sink per drain iteration.
const DRAIN_BATCH: usize = 64;

// =============================================================================
// Sinks
// =============================================================================

/// Destination for recorded exchanges.
#[async_trait]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn record(&self, entry: SessionLogEntry) -> Result<(), ChatError>;

    /// Record several entries; returns how many were stored.
    async fn record_batch(&self, entries: Vec<SessionLogEntry>) -> Result<usize, ChatError> {
        let mut stored = 0;
        for entry in entries {
            self.record(entry).await?;
            stored += 1;
        }
        Ok(stored)
    }
}

/// Sink backed by the SQLite session log.
pub struct SqliteLogSink {
    repo: SessionLogRepository,
}

impl SqliteLogSink {
    pub fn new(repo: SessionLogRepository) -> Self {
        Self { repo }
    }

    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, ChatError> {
        let db = Database::new(path)?;
        Ok(Self::new(SessionLogRepository::new(Arc::new(db))))
    }

    pub fn repository(&self) -> &SessionLogRepository {
        &self.repo
    }
}

#[async_trait]
impl LogSink for SqliteLogSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn record(&self, entry: SessionLogEntry) -> Result<(), ChatError> {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || repo.insert(&entry))
            .await
            .map_err(|e| ChatError::LogSinkFailure(e.to_string()))?
            .map_err(ChatError::from)
    }

    async fn record_batch(&self, entries: Vec<SessionLogEntry>) -> Result<usize, ChatError> {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || repo.insert_batch(&entries))
            .await
            .map_err(|e| ChatError::LogSinkFailure(e.to_string()))?
            .map_err(ChatError::from)
    }
}

/// Sink that writes each exchange as a structured log event.
#[derive(Debug, Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn record(&self, entry: SessionLogEntry) -> Result<(), ChatError> {
        info!(
            target: "ragline::session",
            request_id = %entry.request_id,
            client = %entry.client_identity,
            collection = %entry.collection,
            blocked = entry.blocked,
            fallback_used = entry.fallback_used,
            backend = %entry.backend,
            latency_ms = entry.latency_ms,
            streamed = entry.streamed,
            audio_bytes = entry.audio_bytes,
            error = entry.error.as_deref().unwrap_or(""),
            "Session recorded"
        );
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<SessionLogEntry>>,
    failing: bool,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record call fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn entries(&self) -> Vec<SessionLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn record(&self, entry: SessionLogEntry) -> Result<(), ChatError> {
        if self.failing {
            return Err(ChatError::LogSinkFailure("memory sink is failing".into()));
        }
        self.entries
            .lock()
            .map_err(|e| ChatError::LogSinkFailure(e.to_string()))?
            .push(entry);
        Ok(())
    }
}

// =============================================================================
// Bounded queue
// =============================================================================

/// Queue counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub recorded: u64,
    pub failed: u64,
}

struct Shared {
    sink: Arc<dyn LogSink>,
    queue: Mutex<VecDeque<SessionLogEntry>>,
    capacity: usize,
    in_flight: AtomicUsize,
    dropped: AtomicU64,
    recorded: AtomicU64,
    failed: AtomicU64,
    closed: AtomicBool,
    wake: Notify,
    idle: Notify,
}

impl Shared {
    fn depth(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn is_idle(&self) -> bool {
        self.depth() == 0 && self.in_flight.load(Ordering::SeqCst) == 0
    }

    fn take_batch(&self) -> Vec<SessionLogEntry> {
        match self.queue.lock() {
            Ok(mut queue) => {
                let n = queue.len().min(DRAIN_BATCH);
                self.in_flight.store(n, Ordering::SeqCst);
                queue.drain(..n).collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

/// Fire-and-forget front of the session log.
#[derive(Clone)]
pub struct SessionLogger {
    shared: Option<Arc<Shared>>,
}

impl SessionLogger {
    pub fn new(sink: Arc<dyn LogSink>, capacity: usize) -> Self {
        Self {
            shared: Some(Arc::new(Shared {
                sink,
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(DRAIN_BATCH * 4))),
                capacity: capacity.max(1),
                in_flight: AtomicUsize::new(0),
                dropped: AtomicU64::new(0),
                recorded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                wake: Notify::new(),
                idle: Notify::new(),
            })),
        }
    }

    /// A logger that discards everything.
    pub fn disabled() -> Self {
        Self { shared: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_some()
    }

    pub fn sink_name(&self) -> Option<&'static str> {
        self.shared.as_ref().map(|s| s.sink.name())
    }

    /// Queue an entry without waiting. Drops the oldest entry when full.
    pub fn enqueue(&self, entry: SessionLogEntry) {
        let Some(shared) = &self.shared else {
            return;
        };
        if shared.closed.load(Ordering::SeqCst) {
            debug!(request_id = %entry.request_id, "Session log closed, entry discarded");
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Ok(mut queue) = shared.queue.lock() else {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        queue.push_back(entry);
        while queue.len() > shared.capacity {
            if let Some(oldest) = queue.pop_front() {
                let total = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    request_id = %oldest.request_id,
                    dropped_total = total,
                    "Session log queue full, dropped oldest entry"
                );
            }
        }
        drop(queue);
        shared.wake.notify_one();
    }

    /// Start the background drain task. `None` when disabled.
    pub fn spawn_drain(&self) -> Option<JoinHandle<()>> {
        let shared = self.shared.clone()?;
        Some(tokio::spawn(async move {
            debug!(sink = shared.sink.name(), "Session log drain started");
            loop {
                let batch = shared.take_batch();
                if batch.is_empty() {
                    shared.idle.notify_waiters();
                    if shared.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    shared.wake.notified().await;
                    continue;
                }

                let count = batch.len() as u64;
                match shared.sink.record_batch(batch).await {
                    Ok(stored) => {
                        shared.recorded.fetch_add(stored as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        shared.failed.fetch_add(count, Ordering::Relaxed);
                        warn!(sink = shared.sink.name(), entries = count, error = %e, "Session log write failed");
                    }
                }
                shared.in_flight.store(0, Ordering::SeqCst);
            }
            debug!("Session log drain stopped");
        }))
    }

    /// Wait until every queued entry reached the sink, up to `timeout`.
    /// Returns false when the deadline passed first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let Some(shared) = &self.shared else {
            return true;
        };
        let wait = async {
            loop {
                let idle = shared.idle.notified();
                if shared.is_idle() {
                    return;
                }
                shared.wake.notify_one();
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Stop accepting entries, flush what is queued within `timeout`, and let
    /// the drain task exit.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let Some(shared) = &self.shared else {
            return true;
        };
        shared.closed.store(true, Ordering::SeqCst);
        let flushed = self.flush(timeout).await;
        shared.wake.notify_one();
        if !flushed {
            warn!(remaining = shared.depth(), "Session log not fully flushed before shutdown");
        }
        flushed
    }

    pub fn stats(&self) -> QueueStats {
        match &self.shared {
            Some(shared) => QueueStats {
                depth: shared.depth(),
                capacity: shared.capacity,
                dropped: shared.dropped.load(Ordering::Relaxed),
                recorded: shared.recorded.load(Ordering::Relaxed),
                failed: shared.failed.load(Ordering::Relaxed),
            },
            None => QueueStats::default(),
        }
    }
}

impl std::fmt::Debug for SessionLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLogger")
            .field("sink", &self.sink_name())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragline_core::RequestId;
    use uuid::Uuid;

    fn entry(query: &str) -> SessionLogEntry {
        SessionLogEntry {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            request_id: RequestId::new(),
            client_identity: "127.0.0.1".into(),
            collection: "default".into(),
            query: query.into(),
            response: "ok".into(),
            blocked: false,
            safe: true,
            fallback_used: false,
            backend: "scripted".into(),
            latency_ms: 5,
            safety_latency_ms: 1,
            streamed: false,
            audio_bytes: 0,
            error: None,
        }
    }

    fn queries(entries: &[SessionLogEntry]) -> Vec<String> {
        entries.iter().map(|e| e.query.clone()).collect()
    }

    // =====================================================================
    // Queue behaviour
    // =====================================================================

    #[tokio::test]
    async fn test_entries_reach_sink_in_order() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = SessionLogger::new(sink.clone(), 16);
        let handle = logger.spawn_drain().unwrap();

        for q in ["a", "b", "c"] {
            logger.enqueue(entry(q));
        }
        assert!(logger.flush(Duration::from_secs(5)).await);
        assert_eq!(queries(&sink.entries()), vec!["a", "b", "c"]);
        assert_eq!(logger.stats().recorded, 3);

        assert!(logger.shutdown(Duration::from_secs(5)).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = SessionLogger::new(sink.clone(), 3);

        for q in ["1", "2", "3", "4", "5"] {
            logger.enqueue(entry(q));
        }
        let stats = logger.stats();
        assert_eq!(stats.depth, 3);
        assert_eq!(stats.dropped, 2);

        let handle = logger.spawn_drain().unwrap();
        assert!(logger.shutdown(Duration::from_secs(5)).await);
        handle.await.unwrap();
        assert_eq!(queries(&sink.entries()), vec!["3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_failing_sink_is_counted_not_raised() {
        let logger = SessionLogger::new(Arc::new(MemoryLogSink::failing()), 8);
        let handle = logger.spawn_drain().unwrap();
        logger.enqueue(entry("x"));
        logger.enqueue(entry("y"));
        assert!(logger.flush(Duration::from_secs(5)).await);

        let stats = logger.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.recorded, 0);
        assert!(logger.shutdown(Duration::from_secs(5)).await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_discarded() {
        let sink = Arc::new(MemoryLogSink::new());
        let logger = SessionLogger::new(sink.clone(), 8);
        let handle = logger.spawn_drain().unwrap();
        assert!(logger.shutdown(Duration::from_secs(5)).await);
        handle.await.unwrap();

        logger.enqueue(entry("late"));
        assert!(sink.entries().is_empty());
        assert_eq!(logger.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_times_out_without_drain() {
        let logger = SessionLogger::new(Arc::new(MemoryLogSink::new()), 8);
        logger.enqueue(entry("stuck"));
        assert!(!logger.flush(Duration::from_millis(200)).await);
        assert_eq!(logger.stats().depth, 1);
    }

    #[tokio::test]
    async fn test_disabled_logger_is_noop() {
        let logger = SessionLogger::disabled();
        assert!(!logger.is_enabled());
        assert!(logger.spawn_drain().is_none());
        logger.enqueue(entry("ignored"));
        assert_eq!(logger.stats(), QueueStats::default());
        assert!(logger.flush(Duration::from_millis(10)).await);
    }

    // =====================================================================
    // Sinks
    // =====================================================================

    #[tokio::test]
    async fn test_sqlite_sink_persists_batches() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SqliteLogSink::open(&dir.path().join("sessions.db")).unwrap());
        let logger = SessionLogger::new(sink.clone(), 32);
        let handle = logger.spawn_drain().unwrap();

        let mut blocked = entry("hack");
        blocked.blocked = true;
        logger.enqueue(entry("hours"));
        logger.enqueue(blocked);
        assert!(logger.shutdown(Duration::from_secs(5)).await);
        handle.await.unwrap();

        let stats = sink.repository().stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.blocked, 1);
        assert_eq!(logger.stats().recorded, 2);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_entries() {
        let sink = TracingLogSink;
        assert!(sink.record(entry("q")).await.is_ok());
        assert_eq!(sink.record_batch(vec![entry("a"), entry("b")]).await.unwrap(), 2);
    }
}
