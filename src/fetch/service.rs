//! Contract of the remote mail-service wrapper

use serde::{Deserialize, Serialize};
use thiserror::Error;
use super::CancelToken;

/// Failure of a single remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl From<FetchError> for crate::Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(id) => crate::Error::NotFound(format!("message {}", id)),
            FetchError::Transport(msg) => crate::Error::Fetch(msg),
            FetchError::Cancelled => crate::Error::Cancelled,
        }
    }
}

/// A fully fetched message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: Vec<String>,
    /// Epoch seconds
    pub date: i64,
    pub snippet: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Headers only, no body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub date: i64,
    pub labels: Vec<String>,
    pub size_estimate: i64,
}

impl From<&Message> for MessageMetadata {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            subject: message.subject.clone(),
            from: message.from.clone(),
            date: message.date,
            labels: message.labels.clone(),
            size_estimate: message.body.len() as i64,
        }
    }
}

/// Synchronous, single-item access to the remote mailbox.
///
/// Implementations should check `cancel` before and, where the transport
/// allows it, during a request, returning [`FetchError::Cancelled`].
pub trait MailService: Send + Sync {
    fn fetch_message(&self, id: &str, cancel: &CancelToken) -> Result<Message, FetchError>;

    fn fetch_metadata(&self, id: &str, cancel: &CancelToken) -> Result<MessageMetadata, FetchError>;

    /// Identifiers matching `query`, newest first, at most `limit`
    fn list_message_ids(&self, query: &str, limit: usize, cancel: &CancelToken) -> Result<Vec<String>, FetchError>;
}
