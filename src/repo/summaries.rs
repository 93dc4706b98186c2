//! Summary cache keyed by (account, object_id)

use std::collections::HashMap;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use crate::Result;
use crate::storage::Store;
use super::{now, require};

/// Cached summary of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub account: String,
    pub object_id: String,
    pub text: String,
    /// Epoch seconds
    pub updated_at: i64,
}

pub struct SummaryRepo {
    store: Store,
}

impl SummaryRepo {
    pub fn new(store: &Store) -> Self {
        Self { store: store.clone() }
    }

    /// Insert or fully replace the summary for (account, object_id)
    pub fn save(&self, account: &str, object_id: &str, text: &str) -> Result<()> {
        self.save_at(account, object_id, text, now())
    }

    /// Like [`save`](Self::save) with an explicit timestamp
    pub fn save_at(&self, account: &str, object_id: &str, text: &str, updated_at: i64) -> Result<()> {
        require("account", account)?;
        require("object_id", object_id)?;
        require("summary text", text)?;

        let conn = self.store.conn()?;
        conn.execute(
            r#"
            INSERT INTO summary_cache (account, object_id, summary, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(account, object_id) DO UPDATE SET
                summary = excluded.summary,
                updated_at = excluded.updated_at
            "#,
            params![account, object_id, text, updated_at],
        )?;
        Ok(())
    }

    /// Cached summary, or `None` on a miss
    pub fn load(&self, account: &str, object_id: &str) -> Result<Option<SummaryEntry>> {
        require("account", account)?;
        require("object_id", object_id)?;

        let conn = self.store.conn()?;
        conn.query_row(
            "SELECT account, object_id, summary, updated_at FROM summary_cache WHERE account = ?1 AND object_id = ?2",
            params![account, object_id],
            row_to_entry,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Batch lookup; only hits are present in the returned map
    pub fn load_many(&self, account: &str, object_ids: &[String]) -> Result<HashMap<String, SummaryEntry>> {
        require("account", account)?;

        let conn = self.store.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT account, object_id, summary, updated_at FROM summary_cache WHERE account = ?1 AND object_id = ?2",
        )?;

        let mut found = HashMap::new();
        for object_id in object_ids.iter().filter(|id| !id.trim().is_empty()) {
            if let Some(entry) = stmt.query_row(params![account, object_id], row_to_entry).optional()? {
                found.insert(object_id.clone(), entry);
            }
        }
        Ok(found)
    }

    /// Remove one entry; removing a missing entry is not an error
    pub fn delete(&self, account: &str, object_id: &str) -> Result<()> {
        require("account", account)?;
        require("object_id", object_id)?;

        let conn = self.store.conn()?;
        conn.execute(
            "DELETE FROM summary_cache WHERE account = ?1 AND object_id = ?2",
            params![account, object_id],
        )?;
        Ok(())
    }

    /// Drop every summary for one account
    pub fn purge_account(&self, account: &str) -> Result<usize> {
        require("account", account)?;

        let conn = self.store.conn()?;
        let removed = conn.execute("DELETE FROM summary_cache WHERE account = ?1", [account])?;
        tracing::info!("Purged {} cached summaries for {}", removed, account);
        Ok(removed)
    }

    /// Drop summaries last written before `cutoff` (epoch seconds), all accounts
    pub fn purge_older_than(&self, cutoff: i64) -> Result<usize> {
        let conn = self.store.conn()?;
        let removed = conn.execute("DELETE FROM summary_cache WHERE updated_at < ?1", [cutoff])?;
        tracing::debug!("Expired {} cached summaries older than {}", removed, cutoff);
        Ok(removed)
    }

    /// Drop one account's summaries last written before `cutoff`
    pub fn purge_account_older_than(&self, account: &str, cutoff: i64) -> Result<usize> {
        require("account", account)?;

        let conn = self.store.conn()?;
        let removed = conn.execute(
            "DELETE FROM summary_cache WHERE account = ?1 AND updated_at < ?2",
            params![account, cutoff],
        )?;
        tracing::info!("Purged {} stale cached summaries for {}", removed, account);
        Ok(removed)
    }

    pub fn count(&self, account: &str) -> Result<usize> {
        require("account", account)?;

        let conn = self.store.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM summary_cache WHERE account = ?1",
            [account],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<SummaryEntry> {
    Ok(SummaryEntry {
        account: row.get(0)?,
        object_id: row.get(1)?,
        text: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::repo::test_support::temp_store;

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";

    #[test]
    fn test_save_then_load() {
        let (_dir, store) = temp_store();
        let repo = store.summaries();

        repo.save(ALICE, "msg-1", "Lunch moved to Friday").unwrap();
        let entry = repo.load(ALICE, "msg-1").unwrap().unwrap();
        assert_eq!(entry.text, "Lunch moved to Friday");
        assert_eq!(entry.object_id, "msg-1");
    }

    #[test]
    fn test_upsert_keeps_single_row() {
        let (_dir, store) = temp_store();
        let repo = store.summaries();

        repo.save_at(ALICE, "msg-1", "first", 100).unwrap();
        repo.save_at(ALICE, "msg-1", "second", 200).unwrap();
        repo.save_at(ALICE, "msg-1", "third", 300).unwrap();

        let entry = repo.load(ALICE, "msg-1").unwrap().unwrap();
        assert_eq!(entry.text, "third");
        assert_eq!(entry.updated_at, 300);
        assert_eq!(repo.count(ALICE).unwrap(), 1);
    }

    #[test]
    fn test_miss_is_not_an_error() {
        let (_dir, store) = temp_store();
        assert!(store.summaries().load(ALICE, "nope").unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = temp_store();
        let repo = store.summaries();

        repo.delete(ALICE, "never-existed").unwrap();

        repo.save(ALICE, "msg-1", "text").unwrap();
        repo.delete(ALICE, "msg-1").unwrap();
        assert!(repo.load(ALICE, "msg-1").unwrap().is_none());
        repo.delete(ALICE, "msg-1").unwrap();
    }

    #[test]
    fn test_accounts_are_isolated() {
        let (_dir, store) = temp_store();
        let repo = store.summaries();

        repo.save(ALICE, "shared-id", "alice's view").unwrap();
        repo.save(BOB, "shared-id", "bob's view").unwrap();
        repo.delete(BOB, "shared-id").unwrap();

        assert_eq!(repo.load(ALICE, "shared-id").unwrap().unwrap().text, "alice's view");
        assert!(repo.load(BOB, "shared-id").unwrap().is_none());
    }

    #[test]
    fn test_blank_inputs_rejected() {
        let (_dir, store) = temp_store();
        let repo = store.summaries();

        assert!(matches!(repo.save("", "m", "t"), Err(Error::Validation(_))));
        assert!(matches!(repo.save(ALICE, "  ", "t"), Err(Error::Validation(_))));
        assert!(matches!(repo.save(ALICE, "m", "\n\t"), Err(Error::Validation(_))));
        assert_eq!(repo.count(ALICE).unwrap(), 0);
    }

    #[test]
    fn test_load_many_returns_hits_only() {
        let (_dir, store) = temp_store();
        let repo = store.summaries();
        repo.save(ALICE, "a", "A").unwrap();
        repo.save(ALICE, "c", "C").unwrap();
        repo.save(BOB, "b", "B").unwrap();

        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let hits = repo.load_many(ALICE, &ids).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits["a"].text, "A");
        assert!(!hits.contains_key("b"));
    }

    #[test]
    fn test_purges() {
        let (_dir, store) = temp_store();
        let repo = store.summaries();
        repo.save_at(ALICE, "old", "x", 10).unwrap();
        repo.save_at(ALICE, "new", "y", 1_000).unwrap();
        repo.save_at(BOB, "old", "z", 10).unwrap();

        repo.save_at(BOB, "stale", "w", 20).unwrap();
        assert_eq!(repo.purge_account_older_than(BOB, 15).unwrap(), 1);
        assert!(repo.load(BOB, "stale").unwrap().is_some());
        assert!(repo.load(ALICE, "old").unwrap().is_some());

        assert_eq!(repo.purge_older_than(500).unwrap(), 2);
        assert!(repo.load(ALICE, "new").unwrap().is_some());

        assert_eq!(repo.purge_account(ALICE).unwrap(), 1);
        assert_eq!(repo.count(ALICE).unwrap(), 0);
    }
}
