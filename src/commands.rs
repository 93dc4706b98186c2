use crate::{emit_success, OutputMode};
use anyhow::Context as _;
use mailroom::config::{self, MailroomConfig};
use mailroom::ui::{self, Icons};
use mailroom::Store;
use owo_colors::OwoColorize;
use std::path::PathBuf;

/// Settings resolved from flags and mailroom.toml
pub struct Context {
    pub database: PathBuf,
    pub config_path: PathBuf,
    pub config: MailroomConfig,
    pub mode: OutputMode,
}

impl Context {
    fn open_store(&self) -> anyhow::Result<Store> {
        Store::open_with(&self.database, self.config.store_options())
            .with_context(|| format!("failed to open store at {}", self.database.display()))
    }

    /// Explicit `--account`, else the configured default
    fn account(&self, explicit: Option<String>) -> anyhow::Result<String> {
        explicit
            .or_else(|| self.config.account.clone())
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("no account given (use --account or set `account` in mailroom.toml)"))
    }
}

pub fn run_init(ctx: &Context, account: Option<String>, force: bool) -> anyhow::Result<()> {
    let config = MailroomConfig {
        database: Some(ctx.database.display().to_string()),
        account: account.or_else(|| ctx.config.account.clone()),
        ..ctx.config.clone()
    };
    config::write_config(&ctx.config_path, &config, force)?;

    let store = ctx.open_store()?;
    let version = store.schema_version()?;
    store.close();

    if ctx.mode.is_human() {
        ui::header("Mailroom initialised");
        ui::info("Config", &ctx.config_path.display().to_string());
        ui::info("Database", &ctx.database.display().to_string());
        ui::success(&format!("Store ready at schema v{}", version));
    } else {
        emit_success(
            ctx.mode,
            "init",
            serde_json::json!({
                "config": ctx.config_path,
                "database": ctx.database,
                "schema_version": version,
            }),
        )?;
    }
    Ok(())
}

pub fn run_migrate(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let applied = store.applied_migrations()?;
    let version = store.schema_version()?;

    if ctx.mode.is_human() {
        ui::header(&format!("Schema v{} (latest v{})", version, Store::latest_version()));
        for migration in &applied {
            ui::summary_row(
                &format!("v{}", migration.version),
                &format!("{} {}", migration.description, ui::dim(&ui::timestamp(migration.applied_at))),
            );
        }
        ui::success("Store is up to date");
    } else {
        emit_success(
            ctx.mode,
            "migrate",
            serde_json::json!({
                "schema_version": version,
                "latest_version": Store::latest_version(),
                "applied": applied,
            }),
        )?;
    }
    Ok(())
}

pub fn run_status(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let version = store.schema_version()?;

    let mut counts = Vec::new();
    for table in store.table_names()? {
        let rows = store.count_rows(&table)?;
        counts.push((table, rows));
    }

    if ctx.mode.is_human() {
        ui::header(&format!("{} {}", Icons::DATABASE, ctx.database.display()));
        let mut rows = vec![("Schema version", format!("v{} / v{}", version, Store::latest_version()))];
        for (table, count) in &counts {
            rows.push((table.as_str(), count.to_string()));
        }
        println!("{}", ui::stats_table(&rows));
    } else {
        let tables: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|(table, rows)| (table, serde_json::Value::from(rows)))
            .collect();
        emit_success(
            ctx.mode,
            "status",
            serde_json::json!({
                "database": ctx.database,
                "schema_version": version,
                "latest_version": Store::latest_version(),
                "tables": tables,
            }),
        )?;
    }
    Ok(())
}

pub fn run_templates(ctx: &Context, category: Option<&str>) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let prompts = store.prompts();
    let templates = prompts.list_templates(category)?;

    if ctx.mode.is_human() {
        if templates.is_empty() {
            ui::warn("No prompt templates found.");
            return Ok(());
        }
        println!("{}", ui::templates_table(&templates));
        ui::info("Categories", &prompts.categories()?.join(", "));
    } else {
        emit_success(ctx.mode, "templates", serde_json::to_value(&templates)?)?;
    }
    Ok(())
}

pub fn run_queries(ctx: &Context, account: Option<String>, search: Option<&str>) -> anyhow::Result<()> {
    let account = ctx.account(account)?;
    let store = ctx.open_store()?;
    let repo = store.saved_queries();
    let queries = match search {
        Some(term) => repo.search(&account, term)?,
        None => repo.list(&account, None)?,
    };

    if ctx.mode.is_human() {
        if queries.is_empty() {
            ui::warn(&format!("No saved queries for {}.", account));
            return Ok(());
        }
        ui::header(&format!("{} Saved queries for {}", Icons::MAG, account));
        println!("{}", ui::queries_table(&queries));
    } else {
        emit_success(ctx.mode, "queries", serde_json::to_value(&queries)?)?;
    }
    Ok(())
}

pub fn run_forwards(ctx: &Context, account: Option<String>, window_hours: i64, limit: usize) -> anyhow::Result<()> {
    let account = ctx.account(account)?;
    let store = ctx.open_store()?;
    let repo = store.forwards();
    let stats = repo.stats(&account, window_secs(window_hours))?;
    let history = repo.history(&account, limit)?;
    let pending = repo.pending(&account)?;

    if ctx.mode.is_human() {
        ui::header(&format!("{} Forwards for {}", Icons::FORWARD, account));
        println!("{}", ui::forward_stats_table(&stats, window_hours));
        if !history.is_empty() {
            ui::section("Recent forwards");
            println!("{}", ui::forwards_table(&history));
        }
        if !pending.is_empty() {
            ui::section("Awaiting outcome");
            for record in &pending {
                println!(
                    "  {} {} -> {} ({})",
                    Icons::HOURGLASS,
                    record.object_id,
                    record.destination_path,
                    record.status.style(ui::theme().forward_status(record.status))
                );
            }
        }
    } else {
        emit_success(
            ctx.mode,
            "forwards",
            serde_json::json!({
                "account": account,
                "stats": stats,
                "history": history,
                "pending": pending,
            }),
        )?;
    }
    Ok(())
}

pub fn run_clear_cache(ctx: &Context, account: Option<String>, all: bool) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let prompts = store.prompts();
    let (scope, (single, bulk)) = if all {
        ("all accounts".to_string(), prompts.clear_all_caches()?)
    } else {
        let account = ctx.account(account)?;
        let removed = prompts.clear_account_caches(&account)?;
        (account, removed)
    };

    if ctx.mode.is_human() {
        ui::success(&format!(
            "{} Cleared {} prompt results and {} bulk results for {}",
            Icons::DEL,
            single,
            bulk,
            scope
        ));
    } else {
        emit_success(
            ctx.mode,
            "clear-cache",
            serde_json::json!({ "scope": scope, "results": single, "bulk_results": bulk }),
        )?;
    }
    Ok(())
}

pub fn run_purge(ctx: &Context, account: Option<String>, older_than_days: Option<i64>) -> anyhow::Result<()> {
    let account = ctx.account(account)?;
    let store = ctx.open_store()?;
    let summaries = store.summaries();

    let removed = match older_than_days {
        Some(days) => {
            let cutoff = cutoff_for_days(chrono::Utc::now().timestamp(), days);
            summaries.purge_account_older_than(&account, cutoff)?
        }
        None => summaries.purge_account(&account)?,
    };

    if ctx.mode.is_human() {
        ui::success(&format!("{} Removed {} cached summaries for {}", Icons::DEL, removed, account));
    } else {
        emit_success(
            ctx.mode,
            "purge",
            serde_json::json!({ "account": account, "removed": removed }),
        )?;
    }
    Ok(())
}

/// Stats window in seconds; negative hours count as zero, huge ones saturate
fn window_secs(hours: i64) -> i64 {
    hours.max(0).saturating_mul(3600)
}

/// Epoch cutoff `days` before `now`, clamped instead of wrapping
fn cutoff_for_days(now: i64, days: i64) -> i64 {
    now.saturating_sub(days.max(0).saturating_mul(86_400))
}

pub fn run_version(output_mode: OutputMode) -> anyhow::Result<()> {
    if output_mode.is_human() {
        println!(
            "{} {} {}",
            Icons::MAIL,
            "Mailroom".bold().style(ui::theme().info.clone()),
            env!("CARGO_PKG_VERSION").bold()
        );
        ui::summary_row("Schema", &format!("v{}", Store::latest_version()));
    } else {
        emit_success(
            output_mode,
            "version",
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "schema_version": Store::latest_version(),
            }),
        )?;
    }
    Ok(())
}
