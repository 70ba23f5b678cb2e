use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use hivetrace_metrics::WarmOutcome;

use crate::error::ApiError;
use crate::state::{now_ms, AppState};

fn status_json(state: &AppState) -> Value {
    let connection = state.monitor.status();
    let breaker = state.breaker.snapshot();
    json!({
        "connection": {
            "is_connected": connection.is_connected,
            "last_check": connection.last_check,
            "last_error": connection.last_error,
            "latency_ms": connection.latency_ms,
        },
        "circuit_breaker": {
            "state": breaker.state.as_str(),
            "failure_count": breaker.failure_count,
            "seconds_until_probe": breaker.seconds_until_probe,
        },
    })
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sync_queue = {
        let db = state.db.lock().expect("db lock");
        db.sync_queue_stats()?
    };
    let connected = state.monitor.is_connected();

    let mut body = status_json(&state);
    body["overall"] = json!({
        "mode": if connected { "redis" } else { "sqlite" },
        "connected": connected,
    });
    body["sync_queue"] = serde_json::to_value(&sync_queue).unwrap_or(Value::Null);
    Ok(Json(body))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let store_ok = {
        let db = state.db.lock().expect("db lock");
        db.count_events().is_ok()
    };
    let cache_ok = state.monitor.check_now().await;

    Ok(Json(json!({
        "store": if store_ok { "ok" } else { "failing" },
        "cache": if cache_ok { "ok" } else { "unreachable" },
        "checked_at": now_ms(),
    })))
}

pub async fn test_redis(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let connected = state.monitor.check_now().await;
    let mut body = status_json(&state);
    body["connected"] = json!(connected);
    Ok(Json(body))
}

/// Force a drain plus a cache warm, regardless of the periodic schedule.
pub async fn force_sync(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let drained = state.sync_worker.drain_all().await;
    let warm = state.metrics.sync_cache_from_database().await?;

    Ok(Json(json!({
        "drained": {
            "replayed": drained.replayed,
            "failed_attempts": drained.failed_attempts,
            "exhausted": drained.exhausted,
            "aborted_early": drained.aborted_early,
        },
        "warm": match warm {
            WarmOutcome::Completed { active_agents } => {
                json!({ "outcome": "completed", "active_agents": active_agents })
            }
            WarmOutcome::SkippedInFlight => json!({ "outcome": "skipped_in_flight" }),
            WarmOutcome::SkippedRateLimited => json!({ "outcome": "skipped_rate_limited" }),
        },
    })))
}

pub async fn sync_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = {
        let db = state.db.lock().expect("db lock");
        db.sync_queue_stats()?
    };
    let oldest_pending_age_ms = stats.oldest_pending_at.map(|at| (now_ms() - at).max(0));

    let mut body = serde_json::to_value(&stats).unwrap_or(Value::Null);
    body["oldest_pending_age_ms"] = json!(oldest_pending_age_ms);
    Ok(Json(body))
}

pub async fn latest_handoff(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let content = {
        let db = state.db.lock().expect("db lock");
        db.latest_handoff(&project)?
    };
    match content {
        Some(content) => Ok(Json(json!({ "project": project, "content": content }))),
        None => Err(ApiError::NotFound(format!("handoff for {}", project))),
    }
}

pub async fn save_handoff(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(content): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let now = now_ms();
    let name = {
        let db = state.db.lock().expect("db lock");
        db.save_handoff(&project, &content, now)?
    };

    // Mirror to the cache with a 30-day ttl, best effort
    let key = format!("handoff:latest:{}", project);
    if let Ok(body) = serde_json::to_string(&content) {
        let _ = state.cache.setex(&key, &body, 30 * 86_400).await;
    }

    Ok(Json(json!({ "project": project, "file": name })))
}

pub async fn list_handoffs(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let files = {
        let db = state.db.lock().expect("db lock");
        db.list_handoffs(&project)?
    };
    Ok(Json(json!({ "project": project, "files": files })))
}
