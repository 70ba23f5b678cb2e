use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use hivetrace_metrics::{AgentCompleteRequest, AgentStartRequest};
use hivetrace_store::{day_start, hour_start};

use crate::error::ApiError;
use crate::ingest::push_terminal_status;
use crate::state::{now_ms, AppState};

/// Timeline windows clamp to the retention horizon
const MAX_TIMELINE_HOURS: i64 = 24 * 30;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

fn today_window(now: i64) -> (i64, i64) {
    let start = day_start(now);
    (start, start + 86_400_000)
}

pub async fn current(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Value>, ApiError> {
    let (default_start, default_end) = today_window(now_ms());
    let start = query.start.unwrap_or(default_start);
    let end = query.end.unwrap_or(default_end);

    let metrics = state.metrics.current_metrics(start, end).await?;
    Ok(Json(serde_json::to_value(&metrics).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub hours: Option<i64>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

pub async fn timeline(
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<Value>, ApiError> {
    let (start, end) = match (query.start, query.end) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            let hours = query.hours.unwrap_or(24).clamp(0, MAX_TIMELINE_HOURS);
            if hours == 0 {
                return Ok(Json(json!({ "timeline": [] })));
            }
            let now = now_ms();
            // Align to hour buckets so the cache key is stable
            let end = hour_start(now) + 3_600_000;
            (end - hours * 3_600_000, end)
        }
    };

    let buckets = state.metrics.timeline(start, end).await?;
    Ok(Json(json!({ "timeline": buckets })))
}

pub async fn distribution(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let now = now_ms();
    let end = day_start(now) + 86_400_000;
    let start = end - 30 * 86_400_000;

    let distribution = state.metrics.distribution(start, end).await?;
    Ok(Json(json!({ "distribution": distribution })))
}

#[derive(Debug, Deserialize)]
pub struct ToolUsageQuery {
    /// Window in days, default 7
    pub period: Option<i64>,
}

pub async fn tools_usage(
    State(state): State<AppState>,
    Query(query): Query<ToolUsageQuery>,
) -> Result<Json<Value>, ApiError> {
    let days = query.period.unwrap_or(7).clamp(1, 30);
    let now = now_ms();
    let end = day_start(now) + 86_400_000;
    let start = end - days * 86_400_000;

    let rows = state.metrics.tools_usage(start, end).await?;
    let executions = state
        .metrics
        .current_metrics(start, end)
        .await?
        .executions_today;

    let total_usage: u64 = rows.iter().map(|r| r.usage_count).sum();
    let tools: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "name": row.name,
                "usage_count": row.usage_count,
                "percentage": if total_usage > 0 {
                    row.usage_count as f64 / total_usage as f64
                } else {
                    0.0
                },
                "agent_types_using": row.agent_types_using,
                "avg_per_execution": if executions > 0 {
                    row.usage_count as f64 / executions as f64
                } else {
                    0.0
                },
            })
        })
        .collect();

    Ok(Json(json!({
        "period": format!("{}d", days),
        "tools": tools,
        "insights": {
            "most_used_tool": rows.first().map(|r| r.name.clone()),
            "least_used_tool": rows.last().map(|r| r.name.clone()),
            "total_unique_tools": rows.len(),
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct StartBody {
    pub agent_name: String,
    pub agent_type: Option<String>,
    pub session_id: String,
    pub source_app: Option<String>,
    pub task_description: Option<String>,
    #[serde(default)]
    pub tools_granted: Vec<String>,
    pub timestamp: Option<i64>,
}

pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartBody>,
) -> Result<Json<Value>, ApiError> {
    if body.agent_name.trim().is_empty() || body.session_id.trim().is_empty() {
        return Err(ApiError::Validation(
            "agent_name and session_id are required".into(),
        ));
    }

    let agent_id = state
        .metrics
        .mark_agent_started(AgentStartRequest {
            agent_name: body.agent_name,
            agent_type: body.agent_type,
            session_id: body.session_id,
            source_app: body.source_app.unwrap_or_else(|| "api".to_string()),
            task_description: body.task_description,
            tools_granted: body.tools_granted,
            timestamp: body.timestamp,
            payload: Value::Null,
        })
        .await?;

    push_terminal_status(&state);
    Ok(Json(json!({ "agent_id": agent_id })))
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub agent_type: Option<String>,
    pub session_id: String,
    pub source_app: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    pub timestamp: Option<i64>,
}

fn default_true() -> bool {
    true
}

pub async fn complete(
    State(state): State<AppState>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<Value>, ApiError> {
    if body.agent_id.is_none() && body.agent_name.is_none() {
        return Err(ApiError::Validation(
            "agent_id or agent_name is required".into(),
        ));
    }

    let transitioned = state
        .metrics
        .mark_agent_completed(AgentCompleteRequest {
            agent_id: body.agent_id,
            agent_name: body.agent_name,
            agent_type: body.agent_type,
            session_id: body.session_id,
            source_app: body.source_app.unwrap_or_else(|| "api".to_string()),
            success: body.success,
            tokens_used: body.tokens_used,
            duration_ms: body.duration_ms,
            tools_used: body.tools_used,
            timestamp: body.timestamp,
        })
        .await?;

    push_terminal_status(&state);
    Ok(Json(json!({ "transitioned": transitioned })))
}

pub async fn terminal_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let (active, completed) = {
        let db = state.db.lock().expect("db lock");
        db.terminal_snapshot(10)?
    };
    Ok(Json(
        json!({ "active": active, "recently_completed": completed }),
    ))
}
