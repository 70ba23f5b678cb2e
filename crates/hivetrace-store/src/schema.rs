/// Full schema, applied idempotently on open.
///
/// Timestamps are integer milliseconds since epoch throughout. Aggregate
/// buckets additionally carry a `bucket_start` timestamp so the retention
/// sweep can cut by age without parsing key strings.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_app TEXT NOT NULL,
    session_id TEXT NOT NULL,
    hook_event_type TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    payload TEXT NOT NULL,
    parent_session_id TEXT,
    session_depth INTEGER,
    wave_id TEXT,
    delegation_context TEXT,
    correlation_id TEXT,
    duration_ms INTEGER,
    error TEXT,
    summary TEXT,
    chat TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_type ON events(hook_event_type);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);
CREATE INDEX IF NOT EXISTS idx_events_ts ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_correlation ON events(correlation_id);

CREATE TABLE IF NOT EXISTS agent_executions (
    agent_id TEXT PRIMARY KEY,
    agent_name TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    duration_ms INTEGER,
    session_id TEXT NOT NULL,
    task_description TEXT,
    tools_granted TEXT NOT NULL DEFAULT '[]',
    tokens_input INTEGER NOT NULL DEFAULT 0,
    tokens_output INTEGER NOT NULL DEFAULT 0,
    tokens_total INTEGER NOT NULL DEFAULT 0,
    estimated_cost REAL NOT NULL DEFAULT 0,
    performance_metrics TEXT,
    source_app TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_agents_status ON agent_executions(status);
CREATE INDEX IF NOT EXISTS idx_agents_session ON agent_executions(session_id);
CREATE INDEX IF NOT EXISTS idx_agents_type ON agent_executions(agent_type);
CREATE INDEX IF NOT EXISTS idx_agents_start ON agent_executions(start_time);

CREATE TABLE IF NOT EXISTS agent_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    session_id TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    agent_name TEXT NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 1,
    cost_cents_x100 INTEGER NOT NULL DEFAULT 0,
    tool_name TEXT,
    source_app TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_ts ON agent_metrics(timestamp);
CREATE INDEX IF NOT EXISTS idx_metrics_session ON agent_metrics(session_id);
CREATE INDEX IF NOT EXISTS idx_metrics_type ON agent_metrics(agent_type);
CREATE INDEX IF NOT EXISTS idx_metrics_success ON agent_metrics(success);

CREATE TABLE IF NOT EXISTS metrics_hourly (
    hour_key TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    execution_count INTEGER NOT NULL DEFAULT 0,
    duration_ms_total INTEGER NOT NULL DEFAULT 0,
    tokens_total INTEGER NOT NULL DEFAULT 0,
    cost_cents_x100_total INTEGER NOT NULL DEFAULT 0,
    bucket_start INTEGER NOT NULL,
    PRIMARY KEY (hour_key, agent_type)
);

CREATE INDEX IF NOT EXISTS idx_hourly_start ON metrics_hourly(bucket_start);

CREATE TABLE IF NOT EXISTS metrics_daily (
    day_key TEXT PRIMARY KEY,
    execution_count INTEGER NOT NULL DEFAULT 0,
    duration_ms_total INTEGER NOT NULL DEFAULT 0,
    tokens_total INTEGER NOT NULL DEFAULT 0,
    cost_cents_x100_total INTEGER NOT NULL DEFAULT 0,
    bucket_start INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_daily_start ON metrics_daily(bucket_start);

CREATE TABLE IF NOT EXISTS tool_usage (
    tool_name TEXT NOT NULL,
    usage_date TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0,
    agent_ids TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (tool_name, usage_date)
);

CREATE INDEX IF NOT EXISTS idx_tool_usage_date ON tool_usage(usage_date);

CREATE TABLE IF NOT EXISTS timeline_points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    metric_type TEXT NOT NULL,
    value REAL NOT NULL,
    agent_type TEXT,
    source_app TEXT
);

CREATE INDEX IF NOT EXISTS idx_timeline_ts ON timeline_points(timestamp);
CREATE INDEX IF NOT EXISTS idx_timeline_ts_type ON timeline_points(timestamp, metric_type);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    source_app TEXT NOT NULL,
    session_type TEXT NOT NULL DEFAULT 'main',
    parent_session_id TEXT,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    duration_ms INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    agent_count INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

CREATE TABLE IF NOT EXISTS session_relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_session_id TEXT NOT NULL,
    child_session_id TEXT NOT NULL UNIQUE,
    relationship_type TEXT NOT NULL,
    spawn_reason TEXT,
    delegation_type TEXT NOT NULL DEFAULT 'other',
    spawn_metadata TEXT,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    depth_level INTEGER NOT NULL DEFAULT 1,
    session_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_relationships_parent ON session_relationships(parent_session_id);
CREATE INDEX IF NOT EXISTS idx_relationships_created ON session_relationships(created_at);

CREATE TABLE IF NOT EXISTS terminal_status (
    agent_id TEXT PRIMARY KEY,
    agent_name TEXT NOT NULL,
    status TEXT NOT NULL,
    session_id TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_terminal_status ON terminal_status(status);

CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    field TEXT,
    score REAL,
    ttl_secs INTEGER,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt INTEGER
);

CREATE INDEX IF NOT EXISTS idx_sync_status ON sync_queue(status);
CREATE INDEX IF NOT EXISTS idx_sync_created ON sync_queue(created_at);
"#;
