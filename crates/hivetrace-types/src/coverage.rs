use serde::{Deserialize, Serialize};

/// Health classification of one hook type over the rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStatus {
    /// Seen at least once and clean in the last 24 h
    Active,
    /// Never seen
    Inactive,
    /// At least one error in the last 24 h
    Error,
}

/// Rolling statistics for one hook type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookStatus {
    pub hook_type: String,
    pub execution_count: u64,
    /// Formatted as "N/day" over the trailing 24 h
    pub execution_rate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<i64>,
    /// 0..1, share of rows with no error marker
    pub success_rate: f64,
    /// Mean duration in ms across events with a positive duration
    pub average_execution_time: f64,
    pub status: CoverageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Totals across all hook types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageOverall {
    pub active: usize,
    pub inactive: usize,
    pub error: usize,
    pub mean_success_rate: f64,
}

/// Snapshot pushed to subscribers after every event insertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCoverageSnapshot {
    pub hooks: Vec<HookStatus>,
    pub overall: CoverageOverall,
    pub generated_at: i64,
}
