//! Embedded schema, applied idempotently at startup. Plain
//! `CREATE TABLE IF NOT EXISTS` rather than a migration framework: the
//! on-disk store is a single-client cache, not a shared service database,
//! so there is no multi-version fleet to migrate.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS capabilities (
    id TEXT PRIMARY KEY,
    fqdn TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    intent TEXT NOT NULL,
    intent_embedding TEXT NOT NULL,
    code_hash TEXT NOT NULL UNIQUE,
    code TEXT NOT NULL,
    tools_used TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0,
    success_rate REAL NOT NULL DEFAULT 0.0,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS capability_dependencies (
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    observed_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (from_id, to_id, edge_type)
);

CREATE TABLE IF NOT EXISTS lockfile_entries (
    fqdn TEXT PRIMARY KEY,
    integrity TEXT NOT NULL,
    kind TEXT NOT NULL,
    approved INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS execution_traces (
    trace_id TEXT PRIMARY KEY,
    parent_trace_id TEXT,
    capability_id TEXT,
    workflow_id TEXT,
    success INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    task_results TEXT NOT NULL,
    decisions TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    executed_path TEXT NOT NULL,
    priority REAL NOT NULL DEFAULT 0.5,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_execution_traces_parent ON execution_traces(parent_trace_id);
CREATE INDEX IF NOT EXISTS idx_execution_traces_synced ON execution_traces(synced);

CREATE TABLE IF NOT EXISTS threshold_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    explicit_threshold REAL NOT NULL,
    suggestion_threshold REAL NOT NULL,
    learning_rate REAL NOT NULL,
    target_success_rate REAL NOT NULL,
    window_size INTEGER NOT NULL,
    min_threshold REAL NOT NULL,
    max_threshold REAL NOT NULL
);
"#;
