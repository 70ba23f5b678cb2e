use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use hivetrace_relations::{EdgeRequest, RelationshipQuery};
use hivetrace_types::{DelegationType, RelationshipType};

use crate::bus::StreamMessage;
use crate::error::ApiError;
use crate::state::{now_ms, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipsQuery {
    #[serde(default = "default_true")]
    pub include_parent: bool,
    #[serde(default = "default_true")]
    pub include_children: bool,
    #[serde(default)]
    pub include_siblings: bool,
    #[serde(default = "default_depth")]
    pub max_depth: u32,
}

fn default_true() -> bool {
    true
}

fn default_depth() -> u32 {
    5
}

pub async fn relationships(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RelationshipsQuery>,
) -> Result<Json<Value>, ApiError> {
    let view = state.relations.get_relationships(
        &id,
        &RelationshipQuery {
            include_parent: query.include_parent,
            include_children: query.include_children,
            include_siblings: query.include_siblings,
            max_depth: query.max_depth,
        },
    )?;
    Ok(Json(serde_json::to_value(&view).unwrap_or(Value::Null)))
}

pub async fn children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let view = state.relations.get_relationships(
        &id,
        &RelationshipQuery {
            include_children: true,
            ..Default::default()
        },
    )?;
    Ok(Json(json!({ "session_id": id, "children": view.children })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeQuery {
    #[serde(default = "default_depth")]
    pub max_depth: u32,
}

pub async fn tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Value>, ApiError> {
    let tree = state.relations.build_session_tree(&id, query.max_depth)?;
    // A cycle in stored data yields a null tree rather than a partial one
    Ok(Json(serde_json::to_value(&tree).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
pub struct SpawnBody {
    pub parent_session_id: String,
    #[serde(default)]
    pub spawn_context: Value,
}

pub async fn spawn(
    State(state): State<AppState>,
    Json(body): Json<SpawnBody>,
) -> Result<Json<Value>, ApiError> {
    if body.parent_session_id.trim().is_empty() {
        return Err(ApiError::Validation("parent_session_id is required".into()));
    }

    let child_session_id = format!("{}_child_{}", body.parent_session_id, Uuid::new_v4().simple());
    let spawn_reason = body
        .spawn_context
        .get("spawn_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    let delegation_type = body
        .spawn_context
        .get("delegation_type")
        .and_then(Value::as_str)
        .map(DelegationType::parse)
        .unwrap_or(DelegationType::Other);
    let wave = body.spawn_context.get("wave_id").and_then(Value::as_str);

    let edge = state.relations.insert_relationship(EdgeRequest {
        parent_session_id: body.parent_session_id.clone(),
        child_session_id: child_session_id.clone(),
        relationship_type: if wave.is_some() {
            RelationshipType::WaveMember
        } else {
            RelationshipType::ParentChild
        },
        spawn_reason,
        delegation_type,
        spawn_metadata: body.spawn_context.clone(),
        claimed_depth: None,
        created_at: now_ms(),
    })?;

    let edge_json = serde_json::to_value(&edge).unwrap_or(Value::Null);
    state
        .bus
        .broadcast(StreamMessage::new("session_spawn", edge_json.clone()));
    state
        .bus
        .broadcast(StreamMessage::new("relationship_created", edge_json.clone()));

    Ok(Json(json!({
        "child_session_id": child_session_id,
        "relationship": edge_json,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ChildCompletedBody {
    pub child_session_id: String,
}

pub async fn child_completed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChildCompletedBody>,
) -> Result<Json<Value>, ApiError> {
    let edge = state
        .relations
        .complete_relationship(&id, &body.child_session_id, now_ms())?;

    let edge_json = serde_json::to_value(&edge).unwrap_or(Value::Null);
    state
        .bus
        .broadcast(StreamMessage::new("relationship_updated", edge_json.clone()));
    state.bus.broadcast(StreamMessage::new(
        "child_session_completed",
        edge_json.clone(),
    ));

    Ok(Json(edge_json))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.relations.get_stats(query.start, query.end)?;
    Ok(Json(serde_json::to_value(&stats).unwrap_or(Value::Null)))
}

pub async fn active(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sessions = {
        let db = state.db.lock().expect("db lock");
        db.active_sessions(100)?
    };
    Ok(Json(json!({ "sessions": sessions })))
}
