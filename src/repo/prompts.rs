//! Prompt templates and cached prompt results
//!
//! Results come in two shapes: one row per (account, object, template)
//! execution, and one row per batch keyed by an externally derived cache key.
//! Clearing caches always touches both tables in a single transaction.

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use crate::{Error, Result};
use crate::storage::Store;
use super::{expect_affected, is_unique_violation, now, require};

const TEMPLATE_COLUMNS: &str =
    "id, name, description, body_text, category, created_at, is_favorite, usage_count";

/// A reusable prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub body_text: String,
    pub category: String,
    pub created_at: i64,
    pub is_favorite: bool,
    pub usage_count: i64,
}

/// Writable template fields, used for both create and update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub description: String,
    pub body_text: String,
    pub category: String,
    pub is_favorite: bool,
}

impl NewTemplate {
    pub fn new(name: &str, body_text: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            body_text: body_text.to_string(),
            category: category.to_string(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn favorite(mut self) -> Self {
        self.is_favorite = true;
        self
    }

    fn validate(&self) -> Result<()> {
        require("template name", &self.name)?;
        require("template body", &self.body_text)?;
        require("template category", &self.category)
    }
}

/// Output of one template execution against one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResult {
    pub id: i64,
    pub account: String,
    pub object_id: String,
    pub template_id: i64,
    pub result_text: String,
    pub created_at: i64,
}

/// Output of one template execution against an ordered batch of messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPromptResult {
    pub account: String,
    pub cache_key: String,
    pub template_id: i64,
    pub object_count: usize,
    pub object_ids: Vec<String>,
    pub result_text: String,
    pub created_at: i64,
}

/// Stable cache key for a batch: blake3 over the template and the ordered ids
pub fn bulk_cache_key(template_id: i64, object_ids: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&template_id.to_le_bytes());
    for id in object_ids {
        hasher.update(&(id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

pub struct PromptRepo {
    store: Store,
}

impl PromptRepo {
    pub fn new(store: &Store) -> Self {
        Self { store: store.clone() }
    }

    // ========== Template Operations ==========

    /// Create a template and return its id
    pub fn create_template(&self, template: &NewTemplate) -> Result<i64> {
        template.validate()?;

        let conn = self.store.conn()?;
        conn.execute(
            r#"
            INSERT INTO prompt_templates (name, description, body_text, category, created_at, is_favorite)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                template.name.trim(),
                template.description,
                template.body_text,
                template.category.trim(),
                now(),
                template.is_favorite,
            ],
        )
        .map_err(|e| duplicate_name(e, &template.name))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_template(&self, id: i64) -> Result<PromptTemplate> {
        let conn = self.store.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM prompt_templates WHERE id = ?1", TEMPLATE_COLUMNS),
            [id],
            row_to_template,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("prompt template {}", id)))
    }

    pub fn get_template_by_name(&self, name: &str) -> Result<PromptTemplate> {
        require("template name", name)?;

        let conn = self.store.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM prompt_templates WHERE name = ?1", TEMPLATE_COLUMNS),
            [name.trim()],
            row_to_template,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("prompt template '{}'", name)))
    }

    /// Templates ranked favorite-first, then most used, then by name
    pub fn list_templates(&self, category: Option<&str>) -> Result<Vec<PromptTemplate>> {
        let conn = self.store.conn()?;
        let order = "ORDER BY is_favorite DESC, usage_count DESC, name ASC";

        let templates = match category.filter(|c| !c.trim().is_empty()) {
            Some(category) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM prompt_templates WHERE category = ?1 {}",
                    TEMPLATE_COLUMNS, order
                ))?;
                let rows = stmt
                    .query_map([category.trim()], row_to_template)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM prompt_templates {}",
                    TEMPLATE_COLUMNS, order
                ))?;
                let rows = stmt
                    .query_map([], row_to_template)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(templates)
    }

    /// Replace a template's writable fields; usage count is preserved
    pub fn update_template(&self, id: i64, template: &NewTemplate) -> Result<()> {
        template.validate()?;

        let conn = self.store.conn()?;
        let affected = conn
            .execute(
                r#"
                UPDATE prompt_templates
                SET name = ?1, description = ?2, body_text = ?3, category = ?4, is_favorite = ?5
                WHERE id = ?6
                "#,
                params![
                    template.name.trim(),
                    template.description,
                    template.body_text,
                    template.category.trim(),
                    template.is_favorite,
                    id,
                ],
            )
            .map_err(|e| duplicate_name(e, &template.name))?;
        expect_affected(affected, || format!("prompt template {}", id))
    }

    /// Delete a template along with its cached results
    pub fn delete_template(&self, id: i64) -> Result<()> {
        let conn = self.store.conn()?;
        let affected = conn.execute("DELETE FROM prompt_templates WHERE id = ?1", [id])?;
        expect_affected(affected, || format!("prompt template {}", id))
    }

    /// Atomically bump the usage counter
    pub fn increment_usage(&self, id: i64) -> Result<()> {
        let conn = self.store.conn()?;
        let affected = conn.execute(
            "UPDATE prompt_templates SET usage_count = usage_count + 1 WHERE id = ?1",
            [id],
        )?;
        expect_affected(affected, || format!("prompt template {}", id))
    }

    pub fn set_favorite(&self, id: i64, favorite: bool) -> Result<()> {
        let conn = self.store.conn()?;
        let affected = conn.execute(
            "UPDATE prompt_templates SET is_favorite = ?1 WHERE id = ?2",
            params![favorite, id],
        )?;
        expect_affected(affected, || format!("prompt template {}", id))
    }

    /// Distinct template categories, sorted
    pub fn categories(&self) -> Result<Vec<String>> {
        let conn = self.store.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT category FROM prompt_templates ORDER BY category")?;
        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(categories)
    }

    // ========== Result Operations ==========

    /// Append one execution result and return its id
    pub fn save_result(
        &self,
        account: &str,
        object_id: &str,
        template_id: i64,
        result_text: &str,
    ) -> Result<i64> {
        require("account", account)?;
        require("object_id", object_id)?;
        require("result text", result_text)?;

        let conn = self.store.conn()?;
        conn.execute(
            r#"
            INSERT INTO prompt_results (account, object_id, template_id, result_text, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![account, object_id, template_id, result_text, now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent result for the triple, or `None` if never computed
    pub fn latest_result(
        &self,
        account: &str,
        object_id: &str,
        template_id: i64,
    ) -> Result<Option<PromptResult>> {
        require("account", account)?;
        require("object_id", object_id)?;

        let conn = self.store.conn()?;
        conn.query_row(
            r#"
            SELECT id, account, object_id, template_id, result_text, created_at
            FROM prompt_results
            WHERE account = ?1 AND object_id = ?2 AND template_id = ?3
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            params![account, object_id, template_id],
            row_to_result,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Every result for one message, newest first
    pub fn results_for_object(&self, account: &str, object_id: &str) -> Result<Vec<PromptResult>> {
        require("account", account)?;
        require("object_id", object_id)?;

        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, account, object_id, template_id, result_text, created_at
            FROM prompt_results
            WHERE account = ?1 AND object_id = ?2
            ORDER BY created_at DESC, id DESC
            "#,
        )?;
        let results = stmt
            .query_map(params![account, object_id], row_to_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Insert or replace the batch result stored under (account, cache_key)
    pub fn save_bulk(
        &self,
        account: &str,
        cache_key: &str,
        template_id: i64,
        object_ids: &[String],
        result_text: &str,
    ) -> Result<()> {
        require("account", account)?;
        require("cache_key", cache_key)?;
        require("result text", result_text)?;
        if object_ids.is_empty() {
            return Err(Error::Validation("bulk result needs at least one object id".to_string()));
        }
        for id in object_ids {
            require("object_id", id)?;
        }

        let ids_json = serde_json::to_string(object_ids)?;
        let conn = self.store.conn()?;
        conn.execute(
            r#"
            INSERT INTO bulk_prompt_results
                (account, cache_key, template_id, object_count, object_ids, result_text, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(account, cache_key) DO UPDATE SET
                template_id = excluded.template_id,
                object_count = excluded.object_count,
                object_ids = excluded.object_ids,
                result_text = excluded.result_text,
                created_at = excluded.created_at
            "#,
            params![
                account,
                cache_key,
                template_id,
                object_ids.len() as i64,
                ids_json,
                result_text,
                now()
            ],
        )?;
        Ok(())
    }

    pub fn load_bulk(&self, account: &str, cache_key: &str) -> Result<Option<BulkPromptResult>> {
        require("account", account)?;
        require("cache_key", cache_key)?;

        let conn = self.store.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT account, cache_key, template_id, object_count, object_ids, result_text, created_at
                FROM bulk_prompt_results
                WHERE account = ?1 AND cache_key = ?2
                "#,
                params![account, cache_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((account, cache_key, template_id, object_count, ids_json, result_text, created_at)) = row
        else {
            return Ok(None);
        };
        Ok(Some(BulkPromptResult {
            account,
            cache_key,
            template_id,
            object_count: object_count as usize,
            object_ids: serde_json::from_str(&ids_json)?,
            result_text,
            created_at,
        }))
    }

    /// Clear single and bulk results for one account in one transaction.
    ///
    /// Returns (single rows removed, bulk rows removed).
    pub fn clear_account_caches(&self, account: &str) -> Result<(usize, usize)> {
        require("account", account)?;

        let removed = self.store.with_transaction(|tx| {
            let single = tx.execute("DELETE FROM prompt_results WHERE account = ?1", [account])?;
            let bulk = tx.execute("DELETE FROM bulk_prompt_results WHERE account = ?1", [account])?;
            Ok((single, bulk))
        })?;
        tracing::info!(
            "Cleared prompt caches for {}: {} results, {} bulk results",
            account,
            removed.0,
            removed.1
        );
        Ok(removed)
    }

    /// Clear single and bulk results for every account in one transaction
    pub fn clear_all_caches(&self) -> Result<(usize, usize)> {
        let removed = self.store.with_transaction(|tx| {
            let single = tx.execute("DELETE FROM prompt_results", [])?;
            let bulk = tx.execute("DELETE FROM bulk_prompt_results", [])?;
            Ok((single, bulk))
        })?;
        tracing::info!(
            "Cleared all prompt caches: {} results, {} bulk results",
            removed.0,
            removed.1
        );
        Ok(removed)
    }
}

fn duplicate_name(err: rusqlite::Error, name: &str) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if is_unique_violation(e) => {
            Error::Validation(format!("a prompt template named '{}' already exists", name.trim()))
        }
        _ => err.into(),
    }
}

fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<PromptTemplate> {
    Ok(PromptTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        body_text: row.get(3)?,
        category: row.get(4)?,
        created_at: row.get(5)?,
        is_favorite: row.get(6)?,
        usage_count: row.get(7)?,
    })
}

fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<PromptResult> {
    Ok(PromptResult {
        id: row.get(0)?,
        account: row.get(1)?,
        object_id: row.get(2)?,
        template_id: row.get(3)?,
        result_text: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::test_support::temp_store;
    use std::thread;

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";

    fn template(repo: &PromptRepo, name: &str) -> i64 {
        repo.create_template(&NewTemplate::new(name, "Do the thing: {{body}}", "test"))
            .unwrap()
    }

    #[test]
    fn test_template_crud() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();

        let id = repo
            .create_template(&NewTemplate::new("Tone check", "Rate the tone", "analysis").with_description("tone"))
            .unwrap();
        let fetched = repo.get_template(id).unwrap();
        assert_eq!(fetched.name, "Tone check");
        assert_eq!(fetched.usage_count, 0);
        assert!(!fetched.is_favorite);

        repo.update_template(id, &NewTemplate::new("Tone check v2", "Rate it", "analysis"))
            .unwrap();
        assert_eq!(repo.get_template_by_name("Tone check v2").unwrap().id, id);

        repo.delete_template(id).unwrap();
        assert!(repo.get_template(id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_rejects_blank_fields() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        let before = repo.list_templates(None).unwrap().len();

        for bad in [
            NewTemplate::new(" ", "body", "cat"),
            NewTemplate::new("name", "", "cat"),
            NewTemplate::new("name", "body", "\t"),
        ] {
            assert!(matches!(repo.create_template(&bad), Err(Error::Validation(_))));
        }
        assert_eq!(repo.list_templates(None).unwrap().len(), before);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        template(&repo, "Unique");

        let err = repo
            .create_template(&NewTemplate::new("Unique", "other body", "test"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_other_constraint_failures_are_not_duplicates() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        store
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER block_templates BEFORE INSERT ON prompt_templates
                 BEGIN SELECT RAISE(ABORT, 'templates are read-only'); END;",
            )
            .unwrap();

        let err = repo
            .create_template(&NewTemplate::new("Fresh", "body", "test"))
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "got {:?}", err);
    }

    #[test]
    fn test_missing_template_is_not_found() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        let before = repo.list_templates(None).unwrap();

        assert!(repo.update_template(9_999, &NewTemplate::new("x", "y", "z")).unwrap_err().is_not_found());
        assert!(repo.delete_template(9_999).unwrap_err().is_not_found());
        assert!(repo.increment_usage(9_999).unwrap_err().is_not_found());
        assert!(repo.get_template_by_name("missing").unwrap_err().is_not_found());

        assert_eq!(repo.list_templates(None).unwrap(), before);
    }

    #[test]
    fn test_list_ranking_and_filter() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();

        template(&repo, "alpha");
        let beta = template(&repo, "beta");
        let gamma = template(&repo, "gamma");
        let delta = template(&repo, "delta");

        repo.increment_usage(beta).unwrap();
        repo.increment_usage(beta).unwrap();
        repo.increment_usage(gamma).unwrap();
        repo.set_favorite(delta, true).unwrap();

        let names: Vec<String> = repo
            .list_templates(Some("test"))
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["delta", "beta", "gamma", "alpha"]);

        assert!(repo.list_templates(Some("summary")).unwrap().iter().all(|t| t.category == "summary"));
        assert!(repo.categories().unwrap().contains(&"test".to_string()));
    }

    #[test]
    fn test_concurrent_usage_increments() {
        let (_dir, store) = temp_store();
        let id = template(&store.prompts(), "hot");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = store.prompts();
                thread::spawn(move || {
                    for _ in 0..25 {
                        repo.increment_usage(id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.prompts().get_template(id).unwrap().usage_count, 200);
    }

    #[test]
    fn test_latest_result_wins() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        let id = template(&repo, "summarize");

        assert!(repo.latest_result(ALICE, "m1", id).unwrap().is_none());

        repo.save_result(ALICE, "m1", id, "first").unwrap();
        repo.save_result(ALICE, "m1", id, "second").unwrap();
        repo.save_result(BOB, "m1", id, "bob's").unwrap();

        assert_eq!(repo.latest_result(ALICE, "m1", id).unwrap().unwrap().result_text, "second");
        assert_eq!(repo.results_for_object(ALICE, "m1").unwrap().len(), 2);
    }

    #[test]
    fn test_result_requires_existing_template() {
        let (_dir, store) = temp_store();
        assert!(matches!(
            store.prompts().save_result(ALICE, "m1", 9_999, "orphan"),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_bulk_upsert_and_load() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        let id = template(&repo, "digest");
        let ids: Vec<String> = vec!["m3".into(), "m1".into(), "m2".into()];
        let key = bulk_cache_key(id, &ids);

        repo.save_bulk(ALICE, &key, id, &ids, "v1").unwrap();
        repo.save_bulk(ALICE, &key, id, &ids, "v2").unwrap();

        let bulk = repo.load_bulk(ALICE, &key).unwrap().unwrap();
        assert_eq!(bulk.result_text, "v2");
        assert_eq!(bulk.object_ids, ids);
        assert_eq!(bulk.object_count, 3);
        assert!(repo.load_bulk(BOB, &key).unwrap().is_none());
        assert_eq!(store.count_rows("bulk_prompt_results").unwrap(), 1);
    }

    #[test]
    fn test_bulk_cache_key_depends_on_order() {
        let a: Vec<String> = vec!["x".into(), "y".into()];
        let b: Vec<String> = vec!["y".into(), "x".into()];
        assert_eq!(bulk_cache_key(1, &a), bulk_cache_key(1, &a));
        assert_ne!(bulk_cache_key(1, &a), bulk_cache_key(1, &b));
        assert_ne!(bulk_cache_key(1, &a), bulk_cache_key(2, &a));
    }

    #[test]
    fn test_clear_account_caches_isolated() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        let id = template(&repo, "t");
        let ids: Vec<String> = vec!["m1".into()];

        repo.save_result(ALICE, "m1", id, "a").unwrap();
        repo.save_result(BOB, "m1", id, "b").unwrap();
        repo.save_bulk(ALICE, "k", id, &ids, "a").unwrap();
        repo.save_bulk(BOB, "k", id, &ids, "b").unwrap();

        assert_eq!(repo.clear_account_caches(ALICE).unwrap(), (1, 1));
        assert!(repo.latest_result(ALICE, "m1", id).unwrap().is_none());
        assert!(repo.latest_result(BOB, "m1", id).unwrap().is_some());
        assert!(repo.load_bulk(BOB, "k").unwrap().is_some());

        assert_eq!(repo.clear_all_caches().unwrap(), (1, 1));
        assert_eq!(store.count_rows("prompt_results").unwrap(), 0);
        assert_eq!(store.count_rows("bulk_prompt_results").unwrap(), 0);
    }

    #[test]
    fn test_clear_all_is_atomic_under_fault() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        let id = template(&repo, "t");
        let ids: Vec<String> = vec!["m1".into()];
        repo.save_result(ALICE, "m1", id, "a").unwrap();
        repo.save_result(BOB, "m2", id, "b").unwrap();
        repo.save_bulk(ALICE, "k", id, &ids, "bulk").unwrap();

        // Fail the second DELETE after the first has already run.
        store
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_bulk_clear BEFORE DELETE ON bulk_prompt_results
                 BEGIN SELECT RAISE(ABORT, 'injected fault'); END;",
            )
            .unwrap();

        assert!(repo.clear_all_caches().is_err());
        assert_eq!(store.count_rows("prompt_results").unwrap(), 2);
        assert_eq!(store.count_rows("bulk_prompt_results").unwrap(), 1);

        store.conn().unwrap().execute_batch("DROP TRIGGER fail_bulk_clear;").unwrap();
        assert_eq!(repo.clear_all_caches().unwrap(), (2, 1));
    }

    #[test]
    fn test_deleting_template_cascades_results() {
        let (_dir, store) = temp_store();
        let repo = store.prompts();
        let id = template(&repo, "short-lived");
        repo.save_result(ALICE, "m1", id, "x").unwrap();

        repo.delete_template(id).unwrap();
        assert_eq!(store.count_rows("prompt_results").unwrap(), 0);
    }
}
