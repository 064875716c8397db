//! Ragline Storage crate - SQLite persistence for the session log.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and the
//! repository the session log sink writes exchanges through.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{SessionLogRepository, SessionStats};
