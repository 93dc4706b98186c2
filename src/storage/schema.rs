//! Database schema definitions, grouped by the migration step that introduces them

/// Audit log of applied migration steps (version 1)
pub const CREATE_SCHEMA_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at INTEGER NOT NULL
);
"#;

/// Per-account message summaries (version 1)
pub const CREATE_SUMMARY_CACHE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS summary_cache (
    account TEXT NOT NULL,
    object_id TEXT NOT NULL,
    summary TEXT NOT NULL CHECK (length(summary) > 0),
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (account, object_id)
);
CREATE INDEX IF NOT EXISTS idx_summary_cache_updated ON summary_cache(account, updated_at);
"#;

/// Prompt templates and one row per prompt execution (version 2)
pub const CREATE_PROMPT_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS prompt_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    body_text TEXT NOT NULL,
    category TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    usage_count INTEGER NOT NULL DEFAULT 0 CHECK (usage_count >= 0)
);
CREATE INDEX IF NOT EXISTS idx_prompt_templates_category ON prompt_templates(category);

CREATE TABLE IF NOT EXISTS prompt_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account TEXT NOT NULL,
    object_id TEXT NOT NULL,
    template_id INTEGER NOT NULL REFERENCES prompt_templates(id) ON DELETE CASCADE,
    result_text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_prompt_results_lookup
    ON prompt_results(account, object_id, template_id, created_at DESC);
"#;

/// Results of running one template over a batch of messages (version 3)
pub const CREATE_BULK_PROMPT_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bulk_prompt_results (
    account TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    template_id INTEGER NOT NULL REFERENCES prompt_templates(id) ON DELETE CASCADE,
    object_count INTEGER NOT NULL,
    object_ids TEXT NOT NULL,
    result_text TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (account, cache_key)
);
"#;

/// Named search queries per account (version 4)
pub const CREATE_SAVED_QUERIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS saved_queries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account TEXT NOT NULL,
    name TEXT NOT NULL,
    query_text TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    last_used INTEGER,
    use_count INTEGER NOT NULL DEFAULT 0 CHECK (use_count >= 0),
    UNIQUE(account, name)
);
CREATE INDEX IF NOT EXISTS idx_saved_queries_account ON saved_queries(account, category);
"#;

/// Append-only audit trail of forwarded messages (version 5)
pub const CREATE_FORWARD_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS forward_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    object_id TEXT NOT NULL,
    account TEXT NOT NULL,
    destination_path TEXT NOT NULL,
    template_used TEXT NOT NULL DEFAULT '',
    forward_time INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('success', 'failed', 'pending')),
    error_message TEXT NOT NULL DEFAULT '',
    file_size INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_forward_history_time ON forward_history(account, forward_time DESC);
CREATE INDEX IF NOT EXISTS idx_forward_history_object ON forward_history(account, object_id);
"#;

/// Templates available on a fresh store: (name, description, body, category)
pub const DEFAULT_TEMPLATES: &[(&str, &str, &str, &str)] = &[
    (
        "Summarize",
        "Short neutral summary of a message",
        "Summarize the following email in three sentences or fewer:\n\n{{body}}",
        "summary",
    ),
    (
        "Action Items",
        "Extract concrete follow-ups",
        "List every action item in this email as a bullet list with owners where stated:\n\n{{body}}",
        "extraction",
    ),
    (
        "Draft Reply",
        "Polite reply acknowledging the message",
        "Write a brief, polite reply to this email:\n\n{{body}}",
        "writing",
    ),
    (
        "Key Points",
        "Main points of a thread or batch",
        "Identify the key points across these emails:\n\n{{body}}",
        "summary",
    ),
];
