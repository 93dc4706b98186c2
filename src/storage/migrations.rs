//! Forward-only schema migrations
//!
//! The schema version lives in `PRAGMA user_version`. Every pending step runs
//! in its own IMMEDIATE transaction: DDL, seed rows, the `schema_migrations`
//! log entry and the version bump commit together or not at all, so a failed
//! or interrupted step leaves the store at the previous version and is simply
//! retried on the next open.

use rusqlite::{Connection, TransactionBehavior, params};
use crate::{Error, Result};
use super::schema;

/// One numbered schema step
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    /// SQL batches executed in order
    pub sql: &'static [&'static str],
    /// Optional row seeding, run inside the step's transaction after `sql`
    pub seed: Option<fn(&Connection) -> rusqlite::Result<()>>,
}

/// All known migrations, strictly ascending
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "migration log and summary cache",
        sql: &[schema::CREATE_SCHEMA_MIGRATIONS_TABLE, schema::CREATE_SUMMARY_CACHE_TABLE],
        seed: None,
    },
    Migration {
        version: 2,
        description: "prompt templates and results",
        sql: &[schema::CREATE_PROMPT_TABLES],
        seed: Some(seed_default_templates),
    },
    Migration {
        version: 3,
        description: "bulk prompt results",
        sql: &[schema::CREATE_BULK_PROMPT_RESULTS_TABLE],
        seed: None,
    },
    Migration {
        version: 4,
        description: "saved queries",
        sql: &[schema::CREATE_SAVED_QUERIES_TABLE],
        seed: None,
    },
    Migration {
        version: 5,
        description: "forward audit history",
        sql: &[schema::CREATE_FORWARD_HISTORY_TABLE],
        seed: None,
    },
];

/// Highest version in a migration list (0 for an empty list)
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map(|m| m.version).unwrap_or(0)
}

/// Read the persisted schema version
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Apply every pending step of `migrations` in ascending order.
///
/// Returns the number of steps applied (0 when already up to date).
pub fn run_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<usize> {
    check_ordering(migrations)?;

    let current = current_version(conn)?;
    let latest = latest_version(migrations);
    if current > latest {
        return Err(Error::SchemaTooNew {
            found: current,
            supported: latest,
        });
    }

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        if apply_step(conn, migration)? {
            tracing::info!("Applied migration v{}: {}", migration.version, migration.description);
            applied += 1;
        }
    }

    if applied == 0 {
        tracing::debug!("Schema up to date at v{}", current);
    }
    Ok(applied)
}

fn check_ordering(migrations: &[Migration]) -> Result<()> {
    let mut previous = 0;
    for migration in migrations {
        if migration.version <= previous {
            return Err(Error::Migration {
                version: migration.version,
                message: format!("steps must be strictly ascending (follows v{})", previous),
            });
        }
        previous = migration.version;
    }
    Ok(())
}

/// Run one step. Returns false if another connection applied it first.
fn apply_step(conn: &mut Connection, migration: &Migration) -> Result<bool> {
    let step_err = |e: rusqlite::Error| Error::Migration {
        version: migration.version,
        message: e.to_string(),
    };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(step_err)?;

    // Re-check under the write lock: a concurrent opener may have advanced.
    let version: u32 = tx
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(step_err)?;
    if version >= migration.version {
        return Ok(false);
    }

    for batch in migration.sql {
        tx.execute_batch(batch).map_err(step_err)?;
    }
    if let Some(seed) = migration.seed {
        seed(&tx).map_err(step_err)?;
    }
    tx.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        params![migration.version, migration.description, chrono::Utc::now().timestamp()],
    )
    .map_err(step_err)?;
    tx.pragma_update(None, "user_version", migration.version)
        .map_err(step_err)?;
    tx.commit().map_err(step_err)?;

    Ok(true)
}

fn seed_default_templates(conn: &Connection) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut stmt = conn.prepare(
        r#"
        INSERT OR IGNORE INTO prompt_templates (name, description, body_text, category, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;
    for (name, description, body, category) in schema::DEFAULT_TEMPLATES {
        stmt.execute(params![name, description, body, category, now])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn test_fresh_db_applies_all_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        let applied = run_migrations(&mut conn, MIGRATIONS).unwrap();

        assert_eq!(applied, MIGRATIONS.len());
        assert_eq!(current_version(&conn).unwrap(), latest_version(MIGRATIONS));
        for table in [
            "schema_migrations",
            "summary_cache",
            "prompt_templates",
            "prompt_results",
            "bulk_prompt_results",
            "saved_queries",
            "forward_history",
        ] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }

        let logged: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(logged as usize, MIGRATIONS.len());
    }

    #[test]
    fn test_default_templates_seeded() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, MIGRATIONS).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM prompt_templates", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count as usize, schema::DEFAULT_TEMPLATES.len());
    }

    #[test]
    fn test_idempotency() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, MIGRATIONS).unwrap();

        let second = run_migrations(&mut conn, MIGRATIONS).unwrap();
        assert_eq!(second, 0);
        assert_eq!(current_version(&conn).unwrap(), latest_version(MIGRATIONS));
    }

    #[test]
    fn test_failed_step_rolls_back_and_keeps_version() {
        const BROKEN: &[Migration] = &[
            Migration {
                version: 1,
                description: "ok",
                sql: &["CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, description TEXT, applied_at INTEGER);"],
                seed: None,
            },
            Migration {
                version: 2,
                description: "broken",
                sql: &["CREATE TABLE half_done (x INTEGER);", "INSERT INTO no_such_table VALUES (1);"],
                seed: None,
            },
        ];

        let mut conn = Connection::open_in_memory().unwrap();
        let err = run_migrations(&mut conn, BROKEN).unwrap_err();

        assert!(matches!(err, Error::Migration { version: 2, .. }));
        assert_eq!(current_version(&conn).unwrap(), 1);
        assert!(!table_exists(&conn, "half_done"));

        const FIXED: &[Migration] = &[
            Migration {
                version: 1,
                description: "ok",
                sql: &["CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, description TEXT, applied_at INTEGER);"],
                seed: None,
            },
            Migration {
                version: 2,
                description: "fixed",
                sql: &["CREATE TABLE half_done (x INTEGER);"],
                seed: None,
            },
        ];
        assert_eq!(run_migrations(&mut conn, FIXED).unwrap(), 1);
        assert_eq!(current_version(&conn).unwrap(), 2);
        assert!(table_exists(&conn, "half_done"));
    }

    #[test]
    fn test_forward_compat_guard() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 999u32).unwrap();

        let err = run_migrations(&mut conn, MIGRATIONS).unwrap_err();
        assert!(matches!(err, Error::SchemaTooNew { found: 999, .. }));
        assert!(!table_exists(&conn, "summary_cache"));
    }

    #[test]
    fn test_out_of_order_steps_rejected() {
        const SHUFFLED: &[Migration] = &[
            Migration { version: 2, description: "b", sql: &[], seed: None },
            Migration { version: 1, description: "a", sql: &[], seed: None },
        ];

        let mut conn = Connection::open_in_memory().unwrap();
        let err = run_migrations(&mut conn, SHUFFLED).unwrap_err();
        assert!(matches!(err, Error::Migration { version: 1, .. }));
        assert_eq!(current_version(&conn).unwrap(), 0);
    }
}
