use serde_json::{json, Value};

use tracing::{debug, warn};

use hivetrace_metrics::{coverage_snapshot, AgentCompleteRequest, AgentStartRequest};
use hivetrace_relations::EdgeRequest;
use hivetrace_types::{
    DelegationType, HookEvent, HookEventType, PayloadFields, RelationshipType,
};

use crate::bus::StreamMessage;
use crate::error::ApiError;
use crate::state::{now_ms, AppState};

// NOTE: Ingestion Pipeline
//
// Persist first, derive second, broadcast last. The event row is the
// authoritative record; lifecycle derivations (relationship edges, agent
// executions) are best-effort on top of it, so a rejected edge or an
// unknown agent never un-ingests the event.

/// Validate, persist, derive, and fan out one hook event. Returns the saved
/// event with its assigned id.
pub async fn ingest_event(state: &AppState, mut event: HookEvent) -> Result<HookEvent, ApiError> {
    if event.source_app.trim().is_empty() {
        return Err(ApiError::Validation("source_app is required".into()));
    }
    if event.session_id.trim().is_empty() {
        return Err(ApiError::Validation("session_id is required".into()));
    }

    let timestamp = event.timestamp.unwrap_or_else(now_ms);
    event.timestamp = Some(timestamp);
    event.id = None;

    let mut saved = {
        let db = state.db.lock().expect("db lock");
        let saved = db.insert_event(&event)?;

        let session_type = if event.wave_id.is_some() {
            "wave"
        } else if event.parent_session_id.is_some() {
            "subagent"
        } else {
            "main"
        };
        db.upsert_session_started(
            &event.session_id,
            &event.source_app,
            session_type,
            event.parent_session_id.as_deref(),
            timestamp,
            None,
        )?;
        if event.hook_event_type == HookEventType::SessionEnd {
            db.close_session(&event.session_id, timestamp)?;
        }
        saved
    };

    // Metric recording for agent-terminal events happens inside the
    // completion derivation below; everything else goes through directly.
    if saved.hook_event_type != HookEventType::SubagentStop {
        state.metrics.record_metric(&saved).await?;
    }

    match saved.hook_event_type {
        HookEventType::SessionStart => derive_session_start(state, &saved, timestamp),
        HookEventType::SessionEnd => derive_session_end(state, &saved, timestamp),
        HookEventType::SubagentStart => derive_subagent_start(state, &mut saved, timestamp).await?,
        HookEventType::SubagentStop => derive_subagent_stop(state, &saved, timestamp).await?,
        _ => {}
    }

    state
        .bus
        .broadcast_event(serde_json::to_value(&saved).unwrap_or(Value::Null));
    push_hook_coverage(state, timestamp);

    Ok(saved)
}

fn derive_session_start(state: &AppState, event: &HookEvent, timestamp: i64) {
    let Some(parent) = event.parent_session_id.clone() else {
        return;
    };
    let fields = PayloadFields::from_value(&event.payload);

    let relationship_type = if event.wave_id.is_some() {
        RelationshipType::WaveMember
    } else {
        RelationshipType::ParentChild
    };

    let request = EdgeRequest {
        parent_session_id: parent,
        child_session_id: event.session_id.clone(),
        relationship_type,
        spawn_reason: fields.spawn_reason,
        delegation_type: fields
            .delegation_type
            .as_deref()
            .map(DelegationType::parse)
            .unwrap_or(DelegationType::Other),
        spawn_metadata: event.delegation_context.clone().unwrap_or(Value::Null),
        claimed_depth: event.session_depth,
        created_at: timestamp,
    };

    match state.relations.insert_relationship(request) {
        Ok(edge) => {
            state.bus.broadcast(StreamMessage::new(
                "relationship_created",
                serde_json::to_value(&edge).unwrap_or(Value::Null),
            ));
        }
        Err(e) => {
            // The event itself stays ingested; a bad edge is not fatal
            warn!(child = %event.session_id, error = %e, "spawn edge rejected");
        }
    }
}

fn derive_session_end(state: &AppState, event: &HookEvent, timestamp: i64) {
    let Some(parent) = event.parent_session_id.as_deref() else {
        return;
    };
    match state
        .relations
        .complete_relationship(parent, &event.session_id, timestamp)
    {
        Ok(edge) => {
            state.bus.broadcast(StreamMessage::new(
                "child_session_completed",
                serde_json::to_value(&edge).unwrap_or(Value::Null),
            ));
        }
        Err(e) => debug!(child = %event.session_id, error = %e, "no open edge to complete"),
    }
}

async fn derive_subagent_start(
    state: &AppState,
    saved: &mut HookEvent,
    timestamp: i64,
) -> Result<(), ApiError> {
    let fields = PayloadFields::from_value(&saved.payload);

    let agent_id = state
        .metrics
        .mark_agent_started(AgentStartRequest {
            agent_name: fields.agent_name.unwrap_or_else(|| "agent".to_string()),
            agent_type: fields.agent_type,
            session_id: saved.session_id.clone(),
            source_app: saved.source_app.clone(),
            task_description: fields.task_description,
            tools_granted: fields.tools_used.unwrap_or_default(),
            timestamp: Some(timestamp),
            payload: saved.payload.clone(),
        })
        .await?;

    // Attach the generated id to the persisted payload for correlation
    if let Value::Object(map) = &mut saved.payload {
        map.insert("agent_id".into(), json!(agent_id));
    } else {
        saved.payload = json!({ "agent_id": agent_id });
    }
    if let Some(id) = saved.id {
        let db = state.db.lock().expect("db lock");
        db.update_event_payload(id, &saved.payload)?;
    }

    state.bus.broadcast(StreamMessage::new(
        "agent_started",
        json!({ "agent_id": agent_id, "session_id": saved.session_id }),
    ));
    push_terminal_status(state);
    Ok(())
}

async fn derive_subagent_stop(
    state: &AppState,
    saved: &HookEvent,
    timestamp: i64,
) -> Result<(), ApiError> {
    let fields = PayloadFields::from_value(&saved.payload);

    // Recover the tool set from the session's tool-use events when the
    // producer did not report it
    let tools_used = match fields.tools_used {
        Some(ref tools) if !tools.is_empty() => tools.clone(),
        _ => {
            let db = state.db.lock().expect("db lock");
            db.session_tool_names(&saved.session_id)?
        }
    };

    let success = fields.is_success() && !saved.is_error();
    let request = AgentCompleteRequest {
        agent_id: fields.agent_id.clone(),
        agent_name: fields.agent_name.clone(),
        agent_type: fields.agent_type.clone(),
        session_id: saved.session_id.clone(),
        source_app: saved.source_app.clone(),
        success,
        tokens_used: fields.tokens_used,
        duration_ms: saved.duration.or(fields.duration),
        tools_used,
        timestamp: Some(timestamp),
    };

    let outcome = match state.metrics.mark_agent_completed(request.clone()).await {
        Err(hivetrace_metrics::Error::UnknownAgent(id)) => {
            // Stale or foreign id in the payload; retry by name recovery
            debug!(agent = %id, "completion with unknown agent id, recovering by name");
            state
                .metrics
                .mark_agent_completed(AgentCompleteRequest {
                    agent_id: None,
                    ..request
                })
                .await
        }
        other => other,
    };
    outcome?;

    state.bus.broadcast(StreamMessage::new(
        "agent_completed",
        json!({
            "agent_id": fields.agent_id,
            "agent_name": fields.agent_name,
            "session_id": saved.session_id,
            "success": success,
        }),
    ));
    push_terminal_status(state);
    Ok(())
}

/// Push the terminal snapshot as an `agent_status_update`.
pub fn push_terminal_status(state: &AppState) {
    let snapshot = {
        let db = state.db.lock().expect("db lock");
        db.terminal_snapshot(10)
    };
    match snapshot {
        Ok((active, completed)) => {
            state.bus.broadcast(StreamMessage::new(
                "agent_status_update",
                json!({ "active": active, "recently_completed": completed }),
            ));
        }
        Err(e) => warn!(error = %e, "terminal snapshot failed"),
    }
}

/// Recompute and push hook coverage after an insertion.
pub fn push_hook_coverage(state: &AppState, now: i64) {
    let snapshot = {
        let db = state.db.lock().expect("db lock");
        coverage_snapshot(&db, now)
    };
    match snapshot {
        Ok(snapshot) => {
            state
                .bus
                .broadcast_hook_coverage(serde_json::to_value(&snapshot).unwrap_or(Value::Null));
        }
        Err(e) => warn!(error = %e, "hook coverage snapshot failed"),
    }
}
