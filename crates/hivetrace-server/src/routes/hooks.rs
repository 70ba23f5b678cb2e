use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;

use hivetrace_metrics::coverage_snapshot;
use hivetrace_types::{HookEvent, HookEventType};

use crate::error::ApiError;
use crate::state::{now_ms, AppState};

const WINDOW_MS: i64 = 86_400_000;

pub async fn coverage(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = {
        let db = state.db.lock().expect("db lock");
        coverage_snapshot(&db, now_ms())?
    };
    Ok(Json(serde_json::to_value(&snapshot).unwrap_or(Value::Null)))
}

fn parse_hook_type(raw: &str) -> Result<HookEventType, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("hook type {}", raw)))
}

fn window_events(state: &AppState, hook_type: HookEventType, limit: usize) -> Result<Vec<HookEvent>, ApiError> {
    let db = state.db.lock().expect("db lock");
    Ok(db.events_by_type_since(hook_type.as_str(), now_ms() - WINDOW_MS, limit)?)
}

/// Sessions and source apps that exercised this hook in the last 24 h.
pub async fn context(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let hook_type = parse_hook_type(&raw)?;
    let events = window_events(&state, hook_type, 1_000)?;

    let mut sessions: HashMap<&str, u64> = HashMap::new();
    let mut source_apps: HashMap<&str, u64> = HashMap::new();
    for event in &events {
        *sessions.entry(event.session_id.as_str()).or_insert(0) += 1;
        *source_apps.entry(event.source_app.as_str()).or_insert(0) += 1;
    }

    let mut sessions: Vec<_> = sessions.into_iter().collect();
    sessions.sort_by(|a, b| b.1.cmp(&a.1));
    sessions.truncate(20);

    Ok(Json(json!({
        "hook_type": hook_type.as_str(),
        "window": "24h",
        "total_events": events.len(),
        "sessions": sessions
            .iter()
            .map(|(id, count)| json!({ "session_id": id, "count": count }))
            .collect::<Vec<_>>(),
        "source_apps": source_apps,
    })))
}

/// Raw events of this hook type over the last 24 h.
pub async fn hook_events(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let hook_type = parse_hook_type(&raw)?;
    let events = window_events(&state, hook_type, 50)?;
    Ok(Json(json!({
        "hook_type": hook_type.as_str(),
        "events": events,
    })))
}

/// Per-hook numbers over the last 24 h, bucketed by hour.
pub async fn hook_metrics(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let hook_type = parse_hook_type(&raw)?;
    let events = window_events(&state, hook_type, 10_000)?;

    let total = events.len() as u64;
    let errors = events.iter().filter(|e| e.is_error()).count() as u64;
    let durations: Vec<i64> = events.iter().filter_map(|e| e.duration).filter(|d| *d > 0).collect();
    let avg_duration = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<i64>() as f64 / durations.len() as f64
    };

    let mut per_hour: HashMap<i64, u64> = HashMap::new();
    for event in &events {
        if let Some(ts) = event.timestamp {
            *per_hour.entry(hivetrace_store::hour_start(ts)).or_insert(0) += 1;
        }
    }
    let mut per_hour: Vec<_> = per_hour.into_iter().collect();
    per_hour.sort_by_key(|(hour, _)| *hour);

    Ok(Json(json!({
        "hook_type": hook_type.as_str(),
        "window": "24h",
        "execution_count": total,
        "error_count": errors,
        "success_rate": if total > 0 { (total - errors) as f64 / total as f64 } else { 1.0 },
        "avg_duration_ms": avg_duration,
        "per_hour": per_hour
            .iter()
            .map(|(hour, count)| json!({ "timestamp": hour, "count": count }))
            .collect::<Vec<_>>(),
    })))
}

/// Recent payload samples for debugging producers.
pub async fn execution_context(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let hook_type = parse_hook_type(&raw)?;
    let events = window_events(&state, hook_type, 10)?;

    let samples: Vec<Value> = events
        .iter()
        .map(|e| {
            json!({
                "id": e.id,
                "session_id": e.session_id,
                "timestamp": e.timestamp,
                "payload": e.payload,
                "error": e.error,
            })
        })
        .collect();

    Ok(Json(json!({
        "hook_type": hook_type.as_str(),
        "samples": samples,
    })))
}
