//! Store lifecycle: open, configure, migrate, close

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use crate::{Error, Result};
use super::migrations::{self, MIGRATIONS};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Connection settings applied to every pooled connection
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// How long a connection retries on a locked database before failing
    pub busy_timeout: Duration,
    /// Maximum number of pooled connections
    pub pool_size: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            pool_size: 8,
        }
    }
}

/// One row of the `schema_migrations` log
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub description: String,
    /// Epoch seconds
    pub applied_at: i64,
}

#[derive(Default)]
struct StoreInner {
    path: Option<PathBuf>,
    pool: RwLock<Option<DbPool>>,
}

/// Shared handle to the on-disk store.
///
/// Cloning is cheap; every clone (and every repository built from one) sees
/// the same pool, so `close` on any clone closes it for all of them.
/// `Store::default()` is a handle that was never opened.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open (creating if needed) and migrate the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open with explicit connection settings
    pub fn open_with(path: &Path, options: StoreOptions) -> Result<Self> {
        validate_path(path)?;
        ensure_parent_dir(path)?;
        ensure_store_file(path)?;
        enable_wal(path, options.busy_timeout)?;

        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(options.pool_size.max(1))
            .build(manager)?;

        {
            let mut conn = pool.get()?;
            let applied = migrations::run_migrations(&mut conn, MIGRATIONS)?;
            tracing::info!(
                "Opened store {} at schema v{} ({} migration(s) applied)",
                path.display(),
                migrations::current_version(&conn)?,
                applied
            );
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                path: Some(path.to_path_buf()),
                pool: RwLock::new(Some(pool)),
            }),
        })
    }

    /// Release the pool. Safe on never-opened and already-closed handles.
    pub fn close(&self) {
        let pool = self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pool.is_some() {
            tracing::debug!("Closed store {:?}", self.inner.path);
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Check out a connection, failing with `NotInitialized` once closed
    pub(crate) fn conn(&self) -> Result<DbConn> {
        let pool = self
            .inner
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotInitialized)?;
        Ok(pool.get()?)
    }

    /// Run `f` inside an IMMEDIATE transaction; any error rolls everything back
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Persisted schema version
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        migrations::current_version(&conn)
    }

    /// Newest schema version this build knows how to create
    pub fn latest_version() -> u32 {
        migrations::latest_version(MIGRATIONS)
    }

    /// User tables in the store, sorted by name
    pub fn table_names(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Entries of the migration log, oldest first
    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT version, description, applied_at FROM schema_migrations ORDER BY version",
        )?;
        let applied = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    description: row.get(1)?,
                    applied_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(applied)
    }

    /// Row count of one of the store's tables
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        if !self.table_names()?.iter().any(|t| t == table) {
            return Err(Error::NotFound(format!("table {}", table)));
        }
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish()
    }
}

fn validate_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidPath("empty path".to_string()));
    }
    if path.is_dir() {
        return Err(Error::InvalidPath(format!("{} is a directory", path.display())));
    }
    if path.file_name().is_none() {
        return Err(Error::InvalidPath(format!("{} has no file name", path.display())));
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(parent)?;
    Ok(())
}

fn ensure_store_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?;
    Ok(())
}

/// WAL is persistent in the file, so it is switched on once before pooling
fn enable_wal(path: &Path, busy_timeout: Duration) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!("Store {} is using journal mode {}", path.display(), mode);
    }
    Ok(())
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )
}
