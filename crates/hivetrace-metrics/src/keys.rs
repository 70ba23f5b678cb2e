//! Cache key naming and TTL contracts.

/// Rolling hourly rollup hash, fields `<agent_type>:<measure>`
pub fn hourly(hour_key: &str) -> String {
    format!("metrics:hourly:{}", hour_key)
}

/// Rolling daily rollup hash, fields per measure
pub fn daily(day_key: &str) -> String {
    format!("metrics:daily:{}", day_key)
}

/// Per-day tool usage zset, member = tool name
pub fn tools(day_key: &str) -> String {
    format!("metrics:tools:{}", day_key)
}

/// Set of currently-active agent ids
pub const ACTIVE_AGENTS: &str = "agents:active";

/// Per-agent hash with the live execution fields
pub fn active_agent(agent_id: &str) -> String {
    format!("agent:active:{}", agent_id)
}

/// Read-through cache of the current-metrics snapshot
pub fn current_snapshot(start: i64, end: i64) -> String {
    format!("cache:metrics:current:{}:{}", start, end)
}

pub fn timeline_snapshot(start: i64, end: i64) -> String {
    format!("cache:metrics:timeline:{}:{}", start, end)
}

pub fn distribution_snapshot(start: i64, end: i64) -> String {
    format!("cache:metrics:distribution:{}:{}", start, end)
}

pub fn tools_snapshot(start: i64, end: i64) -> String {
    format!("cache:tools:usage:{}:{}", start, end)
}

/// Read-through TTLs, seconds
pub const TTL_METRICS: u64 = 60;
pub const TTL_TIMELINE: u64 = 120;
pub const TTL_DISTRIBUTION: u64 = 180;
pub const TTL_TOOL_USAGE: u64 = 300;

/// Lifetime of the per-agent live hash and active set entries
pub const TTL_AGENT_LIVENESS: u64 = 300;
