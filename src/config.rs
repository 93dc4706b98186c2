use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::fetch::FetchPipeline;
use crate::storage::StoreOptions;

/// Contents of `mailroom.toml`; every field is optional
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MailroomConfig {
    pub database: Option<String>,
    /// Default account for commands that take `--account`
    pub account: Option<String>,
    pub fetch_workers: Option<usize>,
    pub busy_timeout_ms: Option<u64>,
    pub pool_size: Option<u32>,
}

impl MailroomConfig {
    /// Store tuning with defaults filled in
    pub fn store_options(&self) -> StoreOptions {
        let defaults = StoreOptions::default();
        StoreOptions {
            busy_timeout: self
                .busy_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
            pool_size: self.pool_size.filter(|n| *n > 0).unwrap_or(defaults.pool_size),
        }
    }

    /// Worker count after the pipeline's sizing policy
    pub fn fetch_workers(&self) -> usize {
        FetchPipeline::effective_workers(self.fetch_workers.unwrap_or(0))
    }

    /// Configured database, or `<base>/.mailroom/mailroom.db`
    pub fn database_path(&self, base: &Path) -> PathBuf {
        match &self.database {
            Some(db) => PathBuf::from(db),
            None => default_database_path_in(base),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("mailroom.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".mailroom").join("mailroom.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<MailroomConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: MailroomConfig = toml::from_str(&contents)
        .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &MailroomConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
