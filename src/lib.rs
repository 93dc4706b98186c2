//! # Mailroom - offline mail cache and audit store
//!
//! Local persistence and batch retrieval for a multi-account mail client.
//!
//! Mailroom provides:
//! - A versioned SQLite store with transactional, forward-only migrations
//! - Typed repositories for summaries, prompt templates/results, saved queries
//!   and the forward-audit log, all partitioned by account
//! - A bounded worker pool that fetches remote messages by ID and returns
//!   them in input order, tolerating per-item failures

pub mod storage;
pub mod repo;
pub mod fetch;
pub mod config;
pub mod output;
pub mod ui;

// Re-exports for convenient access
pub use storage::{Store, StoreOptions};
pub use repo::{
    BulkPromptResult, ForwardRecord, ForwardRepo, ForwardStats, ForwardStatus, NewForward,
    NewSavedQuery, NewTemplate, PromptRepo, PromptResult, PromptTemplate, SavedQuery,
    SavedQueryRepo, SummaryEntry, SummaryRepo,
};
pub use fetch::{
    CancelToken, FetchBatch, FetchError, FetchPipeline, MailService, Message, MessageMetadata,
    SummaryFetcher,
};
pub use config::MailroomConfig;

/// Result type alias for Mailroom operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Mailroom operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store not initialized")]
    NotInitialized,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("Store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for the "caller asked for a specific entity that does not exist" case
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
