//! Storage Layer - SQLite-backed persistence
//!
//! A single file holds every table, grouped by the migration that adds them:
//! - summary_cache(account, object_id, summary, updated_at)
//! - prompt_templates, prompt_results
//! - bulk_prompt_results(account, cache_key, ...)
//! - saved_queries(account, name, ...)
//! - forward_history(id, object_id, account, status, ...)

pub mod migrations;
pub mod schema;
pub mod store;

pub use migrations::{Migration, MIGRATIONS};
pub use store::{AppliedMigration, DbConn, DbPool, Store, StoreOptions};
