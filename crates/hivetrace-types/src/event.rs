use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::HookEventType;

// NOTE: Payload Design
//
// The payload is opaque to the core: producers attach whatever their hook
// emitted, and the server stores it byte-for-byte. Derivation rules only read
// a small set of well-known fields (agent_name, tokens_used, result, ...),
// extracted through `PayloadFields` so that the list of fields the core
// depends on lives in exactly one place. Everything else rides along
// untouched and comes back out on query/broadcast.

/// One ingested hook record.
/// Maps 1:1 to a database row; `id` is assigned by the store on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Producer application tag (e.g. "claude-code", "orchestrator")
    pub source_app: String,

    /// Session the event belongs to
    pub session_id: String,

    pub hook_event_type: HookEventType,

    /// Milliseconds since epoch; producers may omit it and the server stamps
    /// arrival time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Opaque structured payload
    #[serde(default)]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,

    /// 1-based depth in the session tree, when the producer knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_depth: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_context: Option<Value>,

    /// Pairs PreToolUse/PostToolUse within a session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,

    /// Error marker: a string message or boolean flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Value>,
}

impl HookEvent {
    pub fn new(
        source_app: impl Into<String>,
        session_id: impl Into<String>,
        hook_event_type: HookEventType,
        payload: Value,
    ) -> Self {
        Self {
            id: None,
            source_app: source_app.into(),
            session_id: session_id.into(),
            hook_event_type,
            timestamp: None,
            payload,
            parent_session_id: None,
            session_depth: None,
            wave_id: None,
            delegation_context: None,
            correlation_id: None,
            duration: None,
            error: None,
            summary: None,
            chat: None,
        }
    }

    /// Whether the event carries an error marker (`error: true` or a
    /// non-empty error string).
    pub fn is_error(&self) -> bool {
        value_is_error(self.error.as_ref())
    }

    /// Error message, when the marker is a string.
    pub fn error_message(&self) -> Option<&str> {
        match &self.error {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}

pub(crate) fn value_is_error(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// Well-known payload fields read by the derivation rules.
///
/// Extraction is lossy by design: unknown fields stay in the raw payload.
#[derive(Debug, Clone, Default)]
pub struct PayloadFields {
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub agent_type: Option<String>,
    pub task_description: Option<String>,
    pub duration: Option<i64>,
    pub tokens_used: Option<u64>,
    pub tools_used: Option<Vec<String>>,
    pub tool_name: Option<String>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub spawn_reason: Option<String>,
    pub delegation_type: Option<String>,
}

impl PayloadFields {
    pub fn from_value(payload: &Value) -> Self {
        let get_str = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let tools_used = payload.get("tools_used").and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        });

        Self {
            agent_id: get_str("agent_id"),
            agent_name: get_str("agent_name"),
            agent_type: get_str("agent_type"),
            task_description: get_str("task_description"),
            duration: payload.get("duration").and_then(Value::as_i64),
            tokens_used: payload.get("tokens_used").and_then(Value::as_u64),
            tools_used,
            tool_name: get_str("tool_name"),
            result: payload.get("result").cloned(),
            error: payload.get("error").cloned(),
            spawn_reason: get_str("spawn_reason"),
            delegation_type: get_str("delegation_type"),
        }
    }

    /// Success rule for SubagentStop: `result !== false && !error`.
    pub fn is_success(&self) -> bool {
        let result_failed = matches!(self.result, Some(Value::Bool(false)));
        !result_failed && !value_is_error(self.error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_fields_extracts_known_keys() {
        let payload = json!({
            "agent_name": "reviewer-1",
            "agent_type": "reviewer",
            "tokens_used": 120,
            "duration": 500,
            "tools_used": ["Read", "Grep"],
            "result": true,
            "custom_field": {"kept": "opaque"}
        });

        let fields = PayloadFields::from_value(&payload);
        assert_eq!(fields.agent_name.as_deref(), Some("reviewer-1"));
        assert_eq!(fields.tokens_used, Some(120));
        assert_eq!(fields.duration, Some(500));
        assert_eq!(
            fields.tools_used,
            Some(vec!["Read".to_string(), "Grep".to_string()])
        );
        assert!(fields.is_success());
    }

    #[test]
    fn success_rule_rejects_false_result_and_errors() {
        let failed = PayloadFields::from_value(&json!({ "result": false }));
        assert!(!failed.is_success());

        let errored = PayloadFields::from_value(&json!({ "error": "timeout" }));
        assert!(!errored.is_success());

        let error_flag = PayloadFields::from_value(&json!({ "error": true }));
        assert!(!error_flag.is_success());

        let fine = PayloadFields::from_value(&json!({ "result": "done", "error": "" }));
        assert!(fine.is_success());
    }

    #[test]
    fn event_round_trips_through_json() {
        let mut event = HookEvent::new(
            "app1",
            "s1",
            crate::HookEventType::UserPromptSubmit,
            json!({"prompt": "hi"}),
        );
        event.timestamp = Some(1_700_000_000_000);
        event.correlation_id = Some("corr-1".into());

        let text = serde_json::to_string(&event).unwrap();
        let back: HookEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back.session_id, "s1");
        assert_eq!(back.hook_event_type, crate::HookEventType::UserPromptSubmit);
        assert_eq!(back.payload, json!({"prompt": "hi"}));
        assert_eq!(back.correlation_id.as_deref(), Some("corr-1"));
    }
}
