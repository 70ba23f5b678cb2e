use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted projection of events per session, maintained on every insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub source_app: String,
    /// "main" for roots, "subagent"/"wave" for spawned children
    pub session_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// "active" until a SessionEnd arrives, then "completed"
    pub status: String,
    pub agent_count: u32,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}
