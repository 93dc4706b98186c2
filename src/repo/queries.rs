//! Saved search queries, unique by name within an account

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use crate::{Error, Result};
use crate::storage::Store;
use super::{expect_affected, is_unique_violation, now, require};

const QUERY_COLUMNS: &str =
    "id, account, name, query_text, description, category, created_at, last_used, use_count";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: i64,
    pub account: String,
    pub name: String,
    pub query_text: String,
    pub description: String,
    pub category: String,
    pub created_at: i64,
    /// Epoch seconds of the last `record_usage`, if any
    pub last_used: Option<i64>,
    pub use_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSavedQuery {
    pub name: String,
    pub query_text: String,
    pub description: String,
    pub category: String,
}

impl NewSavedQuery {
    pub fn new(name: &str, query_text: &str) -> Self {
        Self {
            name: name.to_string(),
            query_text: query_text.to_string(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    fn validate(&self) -> Result<()> {
        require("query name", &self.name)?;
        require("query text", &self.query_text)
    }
}

pub struct SavedQueryRepo {
    store: Store,
}

impl SavedQueryRepo {
    pub fn new(store: &Store) -> Self {
        Self { store: store.clone() }
    }

    /// Create the query, or replace the text/description/category of the
    /// account's existing query with the same name. Usage stats are kept.
    pub fn save(&self, account: &str, query: &NewSavedQuery) -> Result<i64> {
        require("account", account)?;
        query.validate()?;

        let conn = self.store.conn()?;
        let id = conn.query_row(
            r#"
            INSERT INTO saved_queries (account, name, query_text, description, category, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(account, name) DO UPDATE SET
                query_text = excluded.query_text,
                description = excluded.description,
                category = excluded.category
            RETURNING id
            "#,
            params![
                account,
                query.name.trim(),
                query.query_text,
                query.description,
                query.category.trim(),
                now()
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<SavedQuery> {
        let conn = self.store.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM saved_queries WHERE id = ?1", QUERY_COLUMNS),
            [id],
            row_to_query,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("saved query {}", id)))
    }

    pub fn get_by_name(&self, account: &str, name: &str) -> Result<SavedQuery> {
        require("account", account)?;
        require("query name", name)?;

        let conn = self.store.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM saved_queries WHERE account = ?1 AND name = ?2", QUERY_COLUMNS),
            params![account, name.trim()],
            row_to_query,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("saved query '{}' for {}", name, account)))
    }

    /// Queries for an account, most used first
    pub fn list(&self, account: &str, category: Option<&str>) -> Result<Vec<SavedQuery>> {
        require("account", account)?;

        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM saved_queries
            WHERE account = ?1 AND (?2 IS NULL OR category = ?2)
            ORDER BY use_count DESC, last_used DESC, name ASC
            "#,
            QUERY_COLUMNS
        ))?;
        let category = category.map(str::trim).filter(|c| !c.is_empty());
        let queries = stmt
            .query_map(params![account, category], row_to_query)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(queries)
    }

    /// Substring match over name, query text and description
    pub fn search(&self, account: &str, term: &str) -> Result<Vec<SavedQuery>> {
        require("account", account)?;
        require("search term", term)?;

        let pattern = format!("%{}%", term.trim());
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM saved_queries
            WHERE account = ?1 AND (name LIKE ?2 OR query_text LIKE ?2 OR description LIKE ?2)
            ORDER BY use_count DESC, name ASC
            "#,
            QUERY_COLUMNS
        ))?;
        let queries = stmt
            .query_map(params![account, pattern], row_to_query)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(queries)
    }

    pub fn update(&self, id: i64, query: &NewSavedQuery) -> Result<()> {
        query.validate()?;

        let conn = self.store.conn()?;
        let affected = conn
            .execute(
                r#"
                UPDATE saved_queries
                SET name = ?1, query_text = ?2, description = ?3, category = ?4
                WHERE id = ?5
                "#,
                params![
                    query.name.trim(),
                    query.query_text,
                    query.description,
                    query.category.trim(),
                    id
                ],
            )
            .map_err(|e| match &e {
                rusqlite::Error::SqliteFailure(f, _) if is_unique_violation(f) => {
                    Error::Validation(format!("a saved query named '{}' already exists", query.name.trim()))
                }
                _ => e.into(),
            })?;
        expect_affected(affected, || format!("saved query {}", id))
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.store.conn()?;
        let affected = conn.execute("DELETE FROM saved_queries WHERE id = ?1", [id])?;
        expect_affected(affected, || format!("saved query {}", id))
    }

    /// Atomically bump use_count and stamp last_used
    pub fn record_usage(&self, id: i64) -> Result<()> {
        let conn = self.store.conn()?;
        let affected = conn.execute(
            "UPDATE saved_queries SET use_count = use_count + 1, last_used = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        expect_affected(affected, || format!("saved query {}", id))
    }
}

fn row_to_query(row: &rusqlite::Row) -> rusqlite::Result<SavedQuery> {
    Ok(SavedQuery {
        id: row.get(0)?,
        account: row.get(1)?,
        name: row.get(2)?,
        query_text: row.get(3)?,
        description: row.get(4)?,
        category: row.get(5)?,
        created_at: row.get(6)?,
        last_used: row.get(7)?,
        use_count: row.get(8)?,
    })
}
