//! Ragline chat pipeline.
//!
//! Gates each request through the safety evaluator, retrieves context,
//! generates an answer (streamed or whole), optionally synthesizes speech,
//! and records the exchange in the session log. Also hosts the health
//! aggregator that probes the same collaborators.

pub mod error;
pub mod health;
pub mod orchestrator;
pub mod safety;
pub mod session_log;
pub mod state;

pub use error::ChatError;
pub use health::HealthAggregator;
pub use orchestrator::{ChatEvent, ChatEventStream, ChatOrchestrator};
pub use safety::SafetyEvaluator;
pub use session_log::{
    LogSink, MemoryLogSink, QueueStats, SessionLogger, SqliteLogSink, TracingLogSink,
};
pub use state::{validate_transition, ChatState};
