use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use hivetrace_store::Database;
use hivetrace_types::{DelegationType, RelationshipType, SessionRelationship};

use crate::error::{Error, Result};

/// Cap on ancestry walks; a chain deeper than this means corrupt data
const MAX_ANCESTRY: usize = 1_000;

/// Fields a caller provides when registering a spawn edge
#[derive(Debug, Clone)]
pub struct EdgeRequest {
    pub parent_session_id: String,
    pub child_session_id: String,
    pub relationship_type: RelationshipType,
    pub spawn_reason: Option<String>,
    pub delegation_type: DelegationType,
    pub spawn_metadata: Value,
    /// Producer-claimed 1-based depth; only honored when the parent has no
    /// recorded chain of its own
    pub claimed_depth: Option<u32>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipQuery {
    pub include_parent: bool,
    pub include_children: bool,
    pub include_siblings: bool,
    pub max_depth: u32,
}

/// Answer for `GET /api/sessions/:id/relationships`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipView {
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<SessionRelationship>,
    pub children: Vec<SessionRelationship>,
    pub siblings: Vec<String>,
    pub depth: u32,
    pub path: String,
}

/// One node of the session tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTreeNode {
    pub session_id: String,
    pub depth: u32,
    pub session_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<RelationshipType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_reason: Option<String>,
    pub children: Vec<SessionTreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipStats {
    pub total: u64,
    pub completed: u64,
    /// completed / total, 0 when empty
    pub completion_rate: f64,
    pub by_type: HashMap<String, u64>,
    pub by_spawn_reason: HashMap<String, u64>,
    pub by_delegation_type: HashMap<String, u64>,
    pub avg_depth: f64,
    pub max_depth: u32,
}

/// Insert/complete relationships and answer tree, lineage, and stats
/// queries over the edge set.
pub struct RelationshipStore {
    db: Arc<Mutex<Database>>,
}

impl RelationshipStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Insert an edge, deriving depth and path from the parent's recorded
    /// chain. Rejects edges that would close a cycle (the parent being
    /// reachable from the child).
    pub fn insert_relationship(&self, request: EdgeRequest) -> Result<SessionRelationship> {
        if request.parent_session_id == request.child_session_id {
            return Err(Error::Cycle(format!(
                "session {} cannot spawn itself",
                request.child_session_id
            )));
        }

        let db = self.db.lock().expect("db lock");

        // Ancestry check: if the child already sits above the parent, this
        // edge would close a loop.
        let mut cursor = request.parent_session_id.clone();
        let mut hops = 0;
        while let Some(edge) = db.parent_edge_of(&cursor)? {
            if edge.parent_session_id == request.child_session_id {
                return Err(Error::Cycle(format!(
                    "{} is an ancestor of {}",
                    request.child_session_id, request.parent_session_id
                )));
            }
            cursor = edge.parent_session_id;
            hops += 1;
            if hops > MAX_ANCESTRY {
                return Err(Error::Cycle(format!(
                    "ancestry of {} exceeds {} levels",
                    request.parent_session_id, MAX_ANCESTRY
                )));
            }
        }

        let (depth_level, parent_path) = match db.parent_edge_of(&request.parent_session_id)? {
            Some(parent_edge) => {
                if let Some(claimed) = request.claimed_depth {
                    if claimed != parent_edge.depth_level + 1 {
                        debug!(
                            claimed,
                            recomputed = parent_edge.depth_level + 1,
                            child = %request.child_session_id,
                            "claimed session depth disagrees with parent chain"
                        );
                    }
                }
                (parent_edge.depth_level + 1, parent_edge.session_path)
            }
            // Root parent: honor the producer's claim, else depth 1
            None => (
                request.claimed_depth.unwrap_or(1),
                request.parent_session_id.clone(),
            ),
        };

        let mut edge = SessionRelationship {
            id: None,
            parent_session_id: request.parent_session_id,
            child_session_id: request.child_session_id.clone(),
            relationship_type: request.relationship_type,
            spawn_reason: request.spawn_reason,
            delegation_type: request.delegation_type,
            spawn_metadata: request.spawn_metadata,
            created_at: request.created_at,
            completed_at: None,
            depth_level,
            session_path: format!("{}.{}", parent_path, request.child_session_id),
        };

        let id = db.insert_relationship_row(&edge)?;
        edge.id = Some(id);
        Ok(edge)
    }

    /// Close an edge. Returns the updated edge.
    pub fn complete_relationship(
        &self,
        parent: &str,
        child: &str,
        completed_at: i64,
    ) -> Result<SessionRelationship> {
        let db = self.db.lock().expect("db lock");
        db.complete_relationship_row(parent, child, completed_at)?;
        db.parent_edge_of(child)?
            .filter(|e| e.parent_session_id == parent)
            .ok_or_else(|| Error::NotFound(format!("edge {} -> {}", parent, child)))
    }

    pub fn get_relationships(
        &self,
        session: &str,
        query: &RelationshipQuery,
    ) -> Result<RelationshipView> {
        let db = self.db.lock().expect("db lock");

        let own_edge = db.parent_edge_of(session)?;
        let (depth, path) = match &own_edge {
            Some(edge) => (edge.depth_level, edge.session_path.clone()),
            None => (0, session.to_string()),
        };

        let parent = if query.include_parent {
            own_edge.clone()
        } else {
            None
        };

        let children = if query.include_children {
            db.child_edges_of(session)?
        } else {
            Vec::new()
        };

        let siblings = if query.include_siblings {
            match &own_edge {
                Some(edge) => db
                    .child_edges_of(&edge.parent_session_id)?
                    .into_iter()
                    .map(|e| e.child_session_id)
                    .filter(|id| id != session)
                    .collect(),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        Ok(RelationshipView {
            session: session.to_string(),
            parent,
            children,
            siblings,
            depth,
            path,
        })
    }

    /// DFS from `root`, at most `max_depth` levels below it. Returns `None`
    /// when the traversal meets an already-visited session (data corruption;
    /// inserts should have rejected the cycle).
    pub fn build_session_tree(&self, root: &str, max_depth: u32) -> Result<Option<SessionTreeNode>> {
        let db = self.db.lock().expect("db lock");

        let root_path = db
            .parent_edge_of(root)?
            .map(|e| e.session_path)
            .unwrap_or_else(|| root.to_string());

        let mut visited = HashSet::new();
        self.tree_node(&db, root, 0, max_depth, root_path, None, None, &mut visited)
    }

    #[allow(clippy::too_many_arguments)]
    fn tree_node(
        &self,
        db: &Database,
        session: &str,
        depth: u32,
        max_depth: u32,
        session_path: String,
        relationship_type: Option<RelationshipType>,
        spawn_reason: Option<String>,
        visited: &mut HashSet<String>,
    ) -> Result<Option<SessionTreeNode>> {
        if !visited.insert(session.to_string()) {
            debug!(session, "cycle met during tree construction");
            return Ok(None);
        }

        let mut node = SessionTreeNode {
            session_id: session.to_string(),
            depth,
            session_path: session_path.clone(),
            relationship_type,
            spawn_reason,
            children: Vec::new(),
        };

        if depth < max_depth {
            for edge in db.child_edges_of(session)? {
                let child = self.tree_node(
                    db,
                    &edge.child_session_id,
                    depth + 1,
                    max_depth,
                    edge.session_path,
                    Some(edge.relationship_type),
                    edge.spawn_reason,
                    visited,
                )?;
                match child {
                    Some(child) => node.children.push(child),
                    // A cycle anywhere poisons the whole tree
                    None => return Ok(None),
                }
            }
        }

        Ok(Some(node))
    }

    /// Ancestors from the root down to `session` itself.
    pub fn get_lineage(&self, session: &str) -> Result<Vec<String>> {
        let db = self.db.lock().expect("db lock");

        let mut lineage = vec![session.to_string()];
        let mut visited: HashSet<String> = lineage.iter().cloned().collect();
        let mut cursor = session.to_string();

        while let Some(edge) = db.parent_edge_of(&cursor)? {
            if !visited.insert(edge.parent_session_id.clone()) {
                return Err(Error::Cycle(format!(
                    "lineage of {} revisits {}",
                    session, edge.parent_session_id
                )));
            }
            lineage.push(edge.parent_session_id.clone());
            cursor = edge.parent_session_id;
        }

        lineage.reverse();
        Ok(lineage)
    }

    pub fn get_stats(&self, start: Option<i64>, end: Option<i64>) -> Result<RelationshipStats> {
        let edges = {
            let db = self.db.lock().expect("db lock");
            db.relationships_in_range(start, end)?
        };

        let mut stats = RelationshipStats {
            total: edges.len() as u64,
            completed: 0,
            completion_rate: 0.0,
            by_type: HashMap::new(),
            by_spawn_reason: HashMap::new(),
            by_delegation_type: HashMap::new(),
            avg_depth: 0.0,
            max_depth: 0,
        };

        let mut depth_sum = 0u64;
        for edge in &edges {
            if edge.completed_at.is_some() {
                stats.completed += 1;
            }
            *stats
                .by_type
                .entry(edge.relationship_type.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_spawn_reason
                .entry(
                    edge.spawn_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string()),
                )
                .or_insert(0) += 1;
            *stats
                .by_delegation_type
                .entry(edge.delegation_type.as_str().to_string())
                .or_insert(0) += 1;

            depth_sum += u64::from(edge.depth_level);
            stats.max_depth = stats.max_depth.max(edge.depth_level);
        }

        if !edges.is_empty() {
            stats.completion_rate = stats.completed as f64 / stats.total as f64;
            stats.avg_depth = depth_sum as f64 / edges.len() as f64;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RelationshipStore {
        RelationshipStore::new(Arc::new(Mutex::new(Database::open_in_memory().unwrap())))
    }

    fn request(parent: &str, child: &str, created_at: i64) -> EdgeRequest {
        EdgeRequest {
            parent_session_id: parent.to_string(),
            child_session_id: child.to_string(),
            relationship_type: RelationshipType::ParentChild,
            spawn_reason: Some("delegate".to_string()),
            delegation_type: DelegationType::Isolated,
            spawn_metadata: Value::Null,
            claimed_depth: None,
            created_at,
        }
    }

    #[test]
    fn depth_recomputed_from_parent_chain() {
        let store = store();

        let e1 = store.insert_relationship(request("p", "c1", 1000)).unwrap();
        assert_eq!(e1.depth_level, 1);
        assert_eq!(e1.session_path, "p.c1");

        // Claimed depth is ignored once the parent has a recorded chain
        let mut deep = request("c1", "c2", 2000);
        deep.claimed_depth = Some(9);
        let e2 = store.insert_relationship(deep).unwrap();
        assert_eq!(e2.depth_level, 2);
        assert_eq!(e2.session_path, "p.c1.c2");
    }

    #[test]
    fn claimed_depth_honored_for_unknown_parents() {
        let store = store();
        let mut req = request("orphan-root", "c", 1000);
        req.claimed_depth = Some(3);
        let edge = store.insert_relationship(req).unwrap();
        assert_eq!(edge.depth_level, 3);
    }

    #[test]
    fn cycle_is_rejected() {
        let store = store();
        store.insert_relationship(request("a", "b", 1000)).unwrap();

        let err = store.insert_relationship(request("b", "a", 2000)).unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));

        // Self-loop is also a cycle
        let err = store.insert_relationship(request("x", "x", 3000)).unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));

        // The A-B chain survives intact
        let tree = store.build_session_tree("a", 5).unwrap().unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].session_id, "b");
        assert!(tree.children[0].children.is_empty());
    }

    #[test]
    fn deep_cycle_is_rejected() {
        let store = store();
        store.insert_relationship(request("a", "b", 1000)).unwrap();
        store.insert_relationship(request("b", "c", 2000)).unwrap();

        let err = store.insert_relationship(request("c", "a", 3000)).unwrap_err();
        assert!(matches!(err, Error::Cycle(_)));
    }

    #[test]
    fn tree_carries_edge_attributes_and_depths() {
        let store = store();
        store.insert_relationship(request("p", "c1", 1000)).unwrap();
        store.insert_relationship(request("c1", "c2", 2000)).unwrap();

        let tree = store.build_session_tree("p", 5).unwrap().unwrap();
        assert_eq!(tree.session_id, "p");
        assert_eq!(tree.depth, 0);
        assert_eq!(tree.session_path, "p");

        let c1 = &tree.children[0];
        assert_eq!(c1.depth, 1);
        assert_eq!(c1.session_path, "p.c1");
        assert_eq!(c1.relationship_type, Some(RelationshipType::ParentChild));
        assert_eq!(c1.spawn_reason.as_deref(), Some("delegate"));

        let c2 = &c1.children[0];
        assert_eq!(c2.depth, 2);
        assert_eq!(c2.session_path, "p.c1.c2");
    }

    #[test]
    fn max_depth_zero_returns_root_only() {
        let store = store();
        store.insert_relationship(request("p", "c1", 1000)).unwrap();

        let tree = store.build_session_tree("p", 0).unwrap().unwrap();
        assert!(tree.children.is_empty());
    }

    #[test]
    fn lineage_walks_to_root() {
        let store = store();
        store.insert_relationship(request("p", "c1", 1000)).unwrap();
        store.insert_relationship(request("c1", "c2", 2000)).unwrap();

        let lineage = store.get_lineage("c2").unwrap();
        assert_eq!(lineage, vec!["p", "c1", "c2"]);

        // A root's lineage is itself
        assert_eq!(store.get_lineage("p").unwrap(), vec!["p"]);
    }

    #[test]
    fn relationships_view_respects_flags() {
        let store = store();
        store.insert_relationship(request("p", "c1", 1000)).unwrap();
        store.insert_relationship(request("p", "c2", 2000)).unwrap();

        let all = store
            .get_relationships(
                "c1",
                &RelationshipQuery {
                    include_parent: true,
                    include_children: true,
                    include_siblings: true,
                    max_depth: 5,
                },
            )
            .unwrap();
        assert_eq!(all.depth, 1);
        assert_eq!(all.path, "p.c1");
        assert!(all.parent.is_some());
        assert_eq!(all.siblings, vec!["c2"]);

        let bare = store
            .get_relationships("c1", &RelationshipQuery::default())
            .unwrap();
        assert!(bare.parent.is_none());
        assert!(bare.children.is_empty());
        assert!(bare.siblings.is_empty());
    }

    #[test]
    fn stats_aggregate_counts_and_depths() {
        let store = store();
        store.insert_relationship(request("p", "c1", 1000)).unwrap();
        let mut wave = request("p", "c2", 2000);
        wave.relationship_type = RelationshipType::WaveMember;
        wave.spawn_reason = None;
        store.insert_relationship(wave).unwrap();
        store.insert_relationship(request("c1", "c3", 3000)).unwrap();
        store.complete_relationship("p", "c1", 4000).unwrap();

        let stats = store.get_stats(None, None).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert!((stats.completion_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.by_type["parent/child"], 2);
        assert_eq!(stats.by_type["wave_member"], 1);
        assert_eq!(stats.by_spawn_reason["unspecified"], 1);
        assert_eq!(stats.max_depth, 2);
        assert!((stats.avg_depth - 4.0 / 3.0).abs() < 1e-9);

        // Range filters by created_at
        let windowed = store.get_stats(Some(1500), Some(2500)).unwrap();
        assert_eq!(windowed.total, 1);
    }
}
