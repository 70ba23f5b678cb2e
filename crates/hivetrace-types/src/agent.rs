use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of one subagent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Complete,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Complete => "complete",
            AgentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentStatus::Active),
            "complete" => Some(AgentStatus::Complete),
            "failed" => Some(AgentStatus::Failed),
            _ => None,
        }
    }

    /// `active -> complete | failed`; terminal states never transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::Active)
    }
}

/// Token accounting for a single agent execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Estimated dollars, derived from total tokens
    pub estimated_cost: f64,
}

/// One run of a subagent, inserted at SubagentStart and terminalized at
/// SubagentStop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    /// `ag_<millis>_<random>` identifier
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,
    #[serde(default)]
    pub tools_granted: Vec<String>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    /// Opaque map of producer-reported performance numbers
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub performance_metrics: Value,
    pub source_app: String,
    /// 0-100
    #[serde(default)]
    pub progress: u8,
}

/// One row per agent-terminal event, for point-in-time queries.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetricRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: i64,
    pub session_id: String,
    pub agent_type: String,
    pub agent_name: String,
    pub tokens: u64,
    pub duration_ms: i64,
    pub success: bool,
    /// Hundredths of a cent, kept integral so sums stay exact
    pub cost_cents_x100: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub source_app: String,
}

/// Metric dimension for time-series points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineMetric {
    Executions,
    Tokens,
    Duration,
    Cost,
}

impl TimelineMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineMetric::Executions => "executions",
            TimelineMetric::Tokens => "tokens",
            TimelineMetric::Duration => "duration",
            TimelineMetric::Cost => "cost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executions" => Some(TimelineMetric::Executions),
            "tokens" => Some(TimelineMetric::Tokens),
            "duration" => Some(TimelineMetric::Duration),
            "cost" => Some(TimelineMetric::Cost),
            _ => None,
        }
    }
}

/// One time-series sample. Zero-valued samples are never written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub timestamp: i64,
    pub metric_type: TimelineMetric,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_terminal() {
        assert!(!AgentStatus::Active.is_terminal());
        assert!(AgentStatus::Complete.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert_eq!(AgentStatus::parse("complete"), Some(AgentStatus::Complete));
        assert_eq!(AgentStatus::parse("unknown"), None);
    }

    #[test]
    fn timeline_metric_names_are_stable() {
        for m in [
            TimelineMetric::Executions,
            TimelineMetric::Tokens,
            TimelineMetric::Duration,
            TimelineMetric::Cost,
        ] {
            assert_eq!(TimelineMetric::parse(m.as_str()), Some(m));
        }
    }
}
