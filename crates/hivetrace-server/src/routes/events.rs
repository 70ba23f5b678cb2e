use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use hivetrace_types::HookEvent;

use crate::error::ApiError;
use crate::ingest::ingest_event;
use crate::state::AppState;

const RECENT_DEFAULT: usize = 100;
const RECENT_MAX: usize = 2_000;

pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<HookEvent>, ApiError> {
    let event: HookEvent = serde_json::from_value(body)
        .map_err(|e| ApiError::Validation(format!("invalid event: {}", e)))?;
    let saved = ingest_event(&state, event).await?;
    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<HookEvent>>, ApiError> {
    let limit = query.limit.unwrap_or(RECENT_DEFAULT).min(RECENT_MAX);
    let db = state.db.lock().expect("db lock");
    Ok(Json(db.recent_events(limit)?))
}

pub async fn filter_options(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let (source_apps, hook_event_types) = {
        let db = state.db.lock().expect("db lock");
        db.filter_options()?
    };
    Ok(Json(json!({
        "source_apps": source_apps,
        "hook_event_types": hook_event_types,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CorrelatedQuery {
    pub correlation_id: Option<String>,
    pub limit: Option<usize>,
}

pub async fn correlated(
    State(state): State<AppState>,
    Query(query): Query<CorrelatedQuery>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.lock().expect("db lock");
    match query.correlation_id {
        Some(id) => {
            let events = db.correlated_events(&id)?;
            Ok(Json(json!({ "correlation_id": id, "events": events })))
        }
        None => {
            let limit = query.limit.unwrap_or(20).min(200);
            let pairs = db.recent_correlated_pairs(limit)?;
            Ok(Json(json!({ "pairs": pairs })))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionEventsQuery {
    pub limit: Option<usize>,
}

pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<SessionEventsQuery>,
) -> Result<Json<Vec<HookEvent>>, ApiError> {
    let limit = query.limit.unwrap_or(500).min(RECENT_MAX);
    let db = state.db.lock().expect("db lock");
    Ok(Json(db.session_events(&session_id, limit)?))
}
