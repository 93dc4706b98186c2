//! Forward-audit log
//!
//! Append-only: rows are never edited except for the status/error_message
//! transition of an in-flight forward.

use std::collections::BTreeMap;
use std::str::FromStr;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use crate::{Error, Result};
use crate::storage::Store;
use super::{expect_affected, now, require};

const FORWARD_COLUMNS: &str = "id, object_id, account, destination_path, template_used, forward_time, status, error_message, file_size, metadata";

/// Outcome of a forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardStatus {
    Success,
    Failed,
    Pending,
}

impl ForwardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardStatus::Success => "success",
            ForwardStatus::Failed => "failed",
            ForwardStatus::Pending => "pending",
        }
    }
}

impl FromStr for ForwardStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(ForwardStatus::Success),
            "failed" => Ok(ForwardStatus::Failed),
            "pending" => Ok(ForwardStatus::Pending),
            _ => Err(Error::Validation(format!("Unknown forward status: {}", s))),
        }
    }
}

impl std::fmt::Display for ForwardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub id: i64,
    pub object_id: String,
    pub account: String,
    pub destination_path: String,
    pub template_used: String,
    /// Epoch seconds
    pub forward_time: i64,
    pub status: ForwardStatus,
    pub error_message: String,
    pub file_size: i64,
    pub metadata: BTreeMap<String, String>,
}

/// A forward about to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewForward {
    pub account: String,
    pub object_id: String,
    pub destination_path: String,
    pub template_used: String,
    pub status: ForwardStatus,
    pub error_message: String,
    pub file_size: i64,
    pub metadata: BTreeMap<String, String>,
    /// Defaults to now
    pub forward_time: Option<i64>,
}

impl NewForward {
    /// A pending forward of `object_id` to `destination_path`
    pub fn new(account: &str, object_id: &str, destination_path: &str) -> Self {
        Self {
            account: account.to_string(),
            object_id: object_id.to_string(),
            destination_path: destination_path.to_string(),
            template_used: String::new(),
            status: ForwardStatus::Pending,
            error_message: String::new(),
            file_size: 0,
            metadata: BTreeMap::new(),
            forward_time: None,
        }
    }

    pub fn template(mut self, name: &str) -> Self {
        self.template_used = name.to_string();
        self
    }

    pub fn status(mut self, status: ForwardStatus) -> Self {
        self.status = status;
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn file_size(mut self, bytes: i64) -> Self {
        self.file_size = bytes;
        self
    }

    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn at(mut self, forward_time: i64) -> Self {
        self.forward_time = Some(forward_time);
        self
    }
}

/// Aggregates over one account's forwards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardStats {
    pub total_forwards: i64,
    /// Forwards inside the requested window
    pub recent_forwards: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub pending_count: i64,
    /// success_count / total_forwards * 100, or 0 with no forwards
    pub success_rate: f64,
    /// Template name -> number of forwards that used it
    pub template_usage: BTreeMap<String, i64>,
}

impl ForwardStats {
    pub fn rate(success: i64, total: i64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        success as f64 / total as f64 * 100.0
    }
}

pub struct ForwardRepo {
    store: Store,
}

impl ForwardRepo {
    pub fn new(store: &Store) -> Self {
        Self { store: store.clone() }
    }

    /// Append a forward and return its id
    pub fn record(&self, forward: &NewForward) -> Result<i64> {
        require("account", &forward.account)?;
        require("object_id", &forward.object_id)?;
        require("destination_path", &forward.destination_path)?;
        if forward.file_size < 0 {
            return Err(Error::Validation("file_size must not be negative".to_string()));
        }

        let metadata = serde_json::to_string(&forward.metadata)?;
        let conn = self.store.conn()?;
        conn.execute(
            r#"
            INSERT INTO forward_history
                (object_id, account, destination_path, template_used, forward_time, status, error_message, file_size, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                forward.object_id,
                forward.account,
                forward.destination_path,
                forward.template_used,
                forward.forward_time.unwrap_or_else(now),
                forward.status.as_str(),
                forward.error_message,
                forward.file_size,
                metadata,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Move an existing forward to a new status
    pub fn update_status(&self, id: i64, status: ForwardStatus, error_message: Option<&str>) -> Result<()> {
        let conn = self.store.conn()?;
        let affected = conn.execute(
            "UPDATE forward_history SET status = ?1, error_message = ?2 WHERE id = ?3",
            params![status.as_str(), error_message.unwrap_or(""), id],
        )?;
        expect_affected(affected, || format!("forward record {}", id))?;
        tracing::debug!("Forward {} -> {}", id, status);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<ForwardRecord> {
        let conn = self.store.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM forward_history WHERE id = ?1", FORWARD_COLUMNS),
            [id],
            row_to_record,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("forward record {}", id)))
    }

    /// Most recent forwards first
    pub fn history(&self, account: &str, limit: usize) -> Result<Vec<ForwardRecord>> {
        require("account", account)?;
        self.select(
            &format!(
                "SELECT {} FROM forward_history WHERE account = ?1 ORDER BY forward_time DESC, id DESC LIMIT ?2",
                FORWARD_COLUMNS
            ),
            params![account, limit as i64],
        )
    }

    pub fn history_for_object(&self, account: &str, object_id: &str) -> Result<Vec<ForwardRecord>> {
        require("account", account)?;
        require("object_id", object_id)?;
        self.select(
            &format!(
                "SELECT {} FROM forward_history WHERE account = ?1 AND object_id = ?2 ORDER BY forward_time DESC, id DESC",
                FORWARD_COLUMNS
            ),
            params![account, object_id],
        )
    }

    /// Forwards still awaiting an outcome, oldest first
    pub fn pending(&self, account: &str) -> Result<Vec<ForwardRecord>> {
        require("account", account)?;
        self.select(
            &format!(
                "SELECT {} FROM forward_history WHERE account = ?1 AND status = 'pending' ORDER BY forward_time ASC, id ASC",
                FORWARD_COLUMNS
            ),
            params![account],
        )
    }

    /// Aggregate statistics for one account; `window_secs` bounds "recent"
    pub fn stats(&self, account: &str, window_secs: i64) -> Result<ForwardStats> {
        require("account", account)?;
        let since = now().saturating_sub(window_secs.max(0));

        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        let mut stats = ForwardStats::default();

        {
            let mut stmt = tx.prepare(
                "SELECT status, COUNT(*) FROM forward_history WHERE account = ?1 GROUP BY status",
            )?;
            let mut rows = stmt.query([account])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                stats.total_forwards += count;
                match status.parse::<ForwardStatus>() {
                    Ok(ForwardStatus::Success) => stats.success_count = count,
                    Ok(ForwardStatus::Failed) => stats.failed_count = count,
                    Ok(ForwardStatus::Pending) => stats.pending_count = count,
                    Err(_) => tracing::warn!("Ignoring unknown forward status '{}'", status),
                }
            }

            stats.recent_forwards = tx.query_row(
                "SELECT COUNT(*) FROM forward_history WHERE account = ?1 AND forward_time >= ?2",
                params![account, since],
                |row| row.get(0),
            )?;

            let mut stmt = tx.prepare(
                r#"
                SELECT template_used, COUNT(*) FROM forward_history
                WHERE account = ?1 AND template_used != ''
                GROUP BY template_used
                "#,
            )?;
            let usage = stmt
                .query_map([account], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
            stats.template_usage = usage;
        }
        tx.commit()?;

        stats.success_rate = ForwardStats::rate(stats.success_count, stats.total_forwards);
        Ok(stats)
    }

    fn select(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ForwardRecord>> {
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ForwardRecord> {
    let status_str: String = row.get(6)?;
    let status: ForwardStatus = status_str.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let metadata_str: String = row.get(9)?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ForwardRecord {
        id: row.get(0)?,
        object_id: row.get(1)?,
        account: row.get(2)?,
        destination_path: row.get(3)?,
        template_used: row.get(4)?,
        forward_time: row.get(5)?,
        status,
        error_message: row.get(7)?,
        file_size: row.get(8)?,
        metadata,
    })
}
