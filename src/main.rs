//! Mailroom CLI - administer the local mail cache and audit store

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use mailroom::config::{self, MailroomConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mailroom")]
#[command(version)]
#[command(about = "Inspect and maintain the local mail cache and forward-audit store")]
#[command(long_about = r#"
Mailroom keeps an offline cache of message summaries, prompt templates and
results, saved searches and a forward-audit log, partitioned by account.

Example usage:
  mailroom init
  mailroom status
  mailroom forwards --account me@example.com --window-hours 48
  mailroom clear-cache --all
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to mailroom.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputMode::Text)]
    format: OutputMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and an empty, fully migrated store
    Init {
        /// Default account written to the config
        #[arg(short, long)]
        account: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Apply pending schema migrations
    Migrate,

    /// Schema version and per-table row counts
    Status,

    /// List prompt templates
    Templates {
        /// Only templates in this category
        #[arg(long)]
        category: Option<String>,
    },

    /// List saved searches for an account
    Queries {
        #[arg(short, long)]
        account: Option<String>,

        /// Only queries containing this text
        #[arg(long)]
        search: Option<String>,
    },

    /// Forward statistics and recent history for an account
    Forwards {
        #[arg(short, long)]
        account: Option<String>,

        /// Window for the "recent" count
        #[arg(long, default_value = "24")]
        window_hours: i64,

        /// Number of history rows to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Clear cached prompt results
    ClearCache {
        #[arg(short, long, conflicts_with = "all", required_unless_present = "all")]
        account: Option<String>,

        /// Clear caches for every account
        #[arg(long)]
        all: bool,
    },

    /// Delete cached summaries for an account
    Purge {
        #[arg(short, long)]
        account: Option<String>,

        /// Only summaries not refreshed in this many days
        #[arg(long)]
        older_than_days: Option<i64>,
    },

    /// Print version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Text,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputMode::Text)
    }
}

/// Print a JSON envelope for machine-readable output
pub fn emit_success(output_mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    if output_mode.is_human() {
        return Ok(());
    }
    let envelope = serde_json::json!({
        "ok": true,
        "command": command,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let mode = cli.format;

    if let Err(err) = run(cli) {
        if mode.is_human() {
            mailroom::ui::error(&format!("{:#}", err));
        } else {
            let envelope = serde_json::json!({ "ok": false, "error": format!("{:#}", err) });
            println!("{}", envelope);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let file_config = config::load_config(Some(&config_path))?;
    let loaded = file_config.is_some();
    let app_config: MailroomConfig = file_config.unwrap_or_default();

    let base = std::env::current_dir()?;
    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| app_config.database_path(&base));
    tracing::debug!(
        "Using database {} (config {}{})",
        database.display(),
        config_path.display(),
        if loaded { "" } else { ", not found" }
    );

    let ctx = commands::Context {
        database,
        config_path,
        config: app_config,
        mode: cli.format,
    };

    match cli.command {
        Commands::Init { account, force } => commands::run_init(&ctx, account, force),
        Commands::Migrate => commands::run_migrate(&ctx),
        Commands::Status => commands::run_status(&ctx),
        Commands::Templates { category } => commands::run_templates(&ctx, category.as_deref()),
        Commands::Queries { account, search } => {
            commands::run_queries(&ctx, account, search.as_deref())
        }
        Commands::Forwards {
            account,
            window_hours,
            limit,
        } => commands::run_forwards(&ctx, account, window_hours, limit),
        Commands::ClearCache { account, all } => commands::run_clear_cache(&ctx, account, all),
        Commands::Purge {
            account,
            older_than_days,
        } => commands::run_purge(&ctx, account, older_than_days),
        Commands::Version => commands::run_version(ctx.mode),
    }
}
