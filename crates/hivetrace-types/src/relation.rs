use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of edge between a parent and child session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "parent/child")]
    ParentChild,
    #[serde(rename = "wave_member")]
    WaveMember,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::ParentChild => "parent/child",
            RelationshipType::WaveMember => "wave_member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parent/child" => Some(RelationshipType::ParentChild),
            "wave_member" => Some(RelationshipType::WaveMember),
            _ => None,
        }
    }
}

/// How the child session relates to the parent's context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationType {
    Isolated,
    Shared,
    Other,
}

impl DelegationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationType::Isolated => "isolated",
            DelegationType::Shared => "shared",
            DelegationType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "isolated" => DelegationType::Isolated,
            "shared" => DelegationType::Shared,
            _ => DelegationType::Other,
        }
    }
}

/// Directed edge `(parent_session_id, child_session_id)`.
///
/// Invariants enforced by the relationship store: a child has at most one
/// parent, the graph stays acyclic, and `session_path` mirrors the
/// transitive parent chain (`root.child.grandchild`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRelationship {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub parent_session_id: String,
    pub child_session_id: String,
    pub relationship_type: RelationshipType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_reason: Option<String>,
    pub delegation_type: DelegationType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spawn_metadata: Value,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// 1-based depth of the child below the tree root
    pub depth_level: u32,
    /// Dotted ancestry path, usable for prefix queries
    pub session_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_type_serializes_with_slash_name() {
        let json = serde_json::to_string(&RelationshipType::ParentChild).unwrap();
        assert_eq!(json, "\"parent/child\"");
        assert_eq!(
            RelationshipType::parse("wave_member"),
            Some(RelationshipType::WaveMember)
        );
    }

    #[test]
    fn delegation_type_defaults_to_other() {
        assert_eq!(DelegationType::parse("isolated"), DelegationType::Isolated);
        assert_eq!(DelegationType::parse("weird"), DelegationType::Other);
    }
}
