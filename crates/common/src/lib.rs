//! Tarwatch Common Library
//!
//! Shared code for the collector, classifier and dispatcher workers:
//! - Domain types and the storage abstraction
//! - Database models and the PostgreSQL repository
//! - Source (court portal) and channel (Telegram) clients
//! - Text normalization and keyword sets
//! - Error types, configuration, metrics and logging setup

pub mod channel;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod keywords;
pub mod metrics;
pub mod pacing;
pub mod shutdown;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use keywords::KeywordSets;
pub use pacing::Pacer;
pub use shutdown::Shutdown;
pub use store::{MemoryStore, Store};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
