//! Entity repositories
//!
//! Each repository wraps a shared [`Store`] handle and exposes typed
//! operations over one table group. Repositories never own the file: once the
//! store is closed every operation fails with [`Error::NotInitialized`].
//!
//! Blank (empty or whitespace-only) account, identifier and payload
//! parameters are rejected with [`Error::Validation`] before the store is
//! touched.

pub mod forwards;
pub mod prompts;
pub mod queries;
pub mod summaries;

pub use forwards::{ForwardRecord, ForwardRepo, ForwardStats, ForwardStatus, NewForward};
pub use prompts::{
    BulkPromptResult, NewTemplate, PromptRepo, PromptResult, PromptTemplate, bulk_cache_key,
};
pub use queries::{NewSavedQuery, SavedQuery, SavedQueryRepo};
pub use summaries::{SummaryEntry, SummaryRepo};

use crate::storage::Store;
use crate::{Error, Result};

impl Store {
    pub fn summaries(&self) -> SummaryRepo {
        SummaryRepo::new(self)
    }

    pub fn prompts(&self) -> PromptRepo {
        PromptRepo::new(self)
    }

    pub fn saved_queries(&self) -> SavedQueryRepo {
        SavedQueryRepo::new(self)
    }

    pub fn forwards(&self) -> ForwardRepo {
        ForwardRepo::new(self)
    }
}

/// Reject empty or whitespace-only required values
pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Current time as epoch seconds
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Map "zero rows affected" to a typed not-found error
pub(crate) fn expect_affected(affected: usize, what: impl FnOnce() -> String) -> Result<()> {
    if affected == 0 {
        return Err(Error::NotFound(what()));
    }
    Ok(())
}

/// UNIQUE only; CHECK, foreign-key and trigger aborts stay storage errors
pub(crate) fn is_unique_violation(e: &rusqlite::ffi::Error) -> bool {
    e.code == rusqlite::ErrorCode::ConstraintViolation
        && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::storage::Store;

    /// Fresh on-disk store; keep the TempDir alive for the test's duration
    pub fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("mailroom.db")).unwrap();
        (dir, store)
    }
}
