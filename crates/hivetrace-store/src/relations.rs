use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use hivetrace_types::{DelegationType, RelationshipType, SessionRelationship};

use crate::db::Database;
use crate::error::{Error, Result};

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRelationship> {
    let rel_type: String = row.get(3)?;
    let del_type: String = row.get(5)?;
    let metadata: Option<String> = row.get(6)?;

    Ok(SessionRelationship {
        id: Some(row.get(0)?),
        parent_session_id: row.get(1)?,
        child_session_id: row.get(2)?,
        relationship_type: RelationshipType::parse(&rel_type)
            .unwrap_or(RelationshipType::ParentChild),
        spawn_reason: row.get(4)?,
        delegation_type: DelegationType::parse(&del_type),
        spawn_metadata: metadata
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null),
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
        depth_level: row.get::<_, i64>(9)? as u32,
        session_path: row.get(10)?,
    })
}

const RELATIONSHIP_COLUMNS: &str = "id, parent_session_id, child_session_id, relationship_type, \
     spawn_reason, delegation_type, spawn_metadata, created_at, completed_at, depth_level, \
     session_path";

impl Database {
    /// Insert an edge row. A duplicate `(parent, child)` is an upsert no-op
    /// returning the existing id; a second parent for the same child is a
    /// constraint violation.
    pub fn insert_relationship_row(&self, edge: &SessionRelationship) -> Result<i64> {
        if let Some(existing) = self.parent_edge_of(&edge.child_session_id)? {
            if existing.parent_session_id == edge.parent_session_id {
                return Ok(existing.id.expect("stored edge has id"));
            }
            return Err(Error::Constraint(format!(
                "session {} already has parent {}",
                edge.child_session_id, existing.parent_session_id
            )));
        }

        self.conn().execute(
            r#"
            INSERT INTO session_relationships (
                parent_session_id, child_session_id, relationship_type,
                spawn_reason, delegation_type, spawn_metadata, created_at,
                completed_at, depth_level, session_path
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                &edge.parent_session_id,
                &edge.child_session_id,
                edge.relationship_type.as_str(),
                &edge.spawn_reason,
                edge.delegation_type.as_str(),
                if edge.spawn_metadata.is_null() {
                    None
                } else {
                    Some(edge.spawn_metadata.to_string())
                },
                edge.created_at,
                edge.completed_at,
                edge.depth_level as i64,
                &edge.session_path,
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// The edge pointing at `child`, if any (a child has at most one parent).
    pub fn parent_edge_of(&self, child: &str) -> Result<Option<SessionRelationship>> {
        let sql = format!(
            "SELECT {} FROM session_relationships WHERE child_session_id = ?1",
            RELATIONSHIP_COLUMNS
        );
        let edge = self
            .conn()
            .query_row(&sql, [child], relationship_from_row)
            .optional()?;
        Ok(edge)
    }

    /// Outgoing edges of `parent` in insertion order.
    pub fn child_edges_of(&self, parent: &str) -> Result<Vec<SessionRelationship>> {
        let sql = format!(
            "SELECT {} FROM session_relationships WHERE parent_session_id = ?1 \
             ORDER BY created_at ASC, id ASC",
            RELATIONSHIP_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let edges = stmt
            .query_map([parent], relationship_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Set `completed_at` on an open edge. Returns false when the edge does
    /// not exist or is already closed.
    pub fn complete_relationship_row(
        &self,
        parent: &str,
        child: &str,
        completed_at: i64,
    ) -> Result<bool> {
        let changed = self.conn().execute(
            r#"
            UPDATE session_relationships
            SET completed_at = ?3
            WHERE parent_session_id = ?1 AND child_session_id = ?2
              AND completed_at IS NULL
              AND ?3 >= created_at
            "#,
            params![parent, child, completed_at],
        )?;
        Ok(changed > 0)
    }

    /// All edges created within `[start, end)`, for stats.
    pub fn relationships_in_range(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<SessionRelationship>> {
        let sql = format!(
            "SELECT {} FROM session_relationships \
             WHERE created_at >= ?1 AND created_at < ?2 \
             ORDER BY created_at ASC, id ASC",
            RELATIONSHIP_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let edges = stmt
            .query_map(
                params![start.unwrap_or(0), end.unwrap_or(i64::MAX)],
                relationship_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(parent: &str, child: &str, created_at: i64) -> SessionRelationship {
        SessionRelationship {
            id: None,
            parent_session_id: parent.to_string(),
            child_session_id: child.to_string(),
            relationship_type: RelationshipType::ParentChild,
            spawn_reason: Some("delegate".to_string()),
            delegation_type: DelegationType::Isolated,
            spawn_metadata: Value::Null,
            created_at,
            completed_at: None,
            depth_level: 1,
            session_path: format!("{}.{}", parent, child),
        }
    }

    #[test]
    fn duplicate_edge_is_noop() {
        let db = Database::open_in_memory().unwrap();

        let first = db.insert_relationship_row(&edge("p", "c", 1000)).unwrap();
        let second = db.insert_relationship_row(&edge("p", "c", 2000)).unwrap();
        assert_eq!(first, second);

        let children = db.child_edges_of("p").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].created_at, 1000);
    }

    #[test]
    fn second_parent_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_relationship_row(&edge("p1", "c", 1000)).unwrap();

        let err = db
            .insert_relationship_row(&edge("p2", "c", 2000))
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn children_come_back_in_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        db.insert_relationship_row(&edge("p", "c1", 1000)).unwrap();
        db.insert_relationship_row(&edge("p", "c2", 2000)).unwrap();
        db.insert_relationship_row(&edge("p", "c3", 1500)).unwrap();

        let children: Vec<String> = db
            .child_edges_of("p")
            .unwrap()
            .into_iter()
            .map(|e| e.child_session_id)
            .collect();
        assert_eq!(children, vec!["c1", "c3", "c2"]);
    }

    #[test]
    fn completion_is_single_shot_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        db.insert_relationship_row(&edge("p", "c", 1000)).unwrap();

        // completed_at must be >= created_at
        assert!(!db.complete_relationship_row("p", "c", 500).unwrap());
        assert!(db.complete_relationship_row("p", "c", 2000).unwrap());
        assert!(!db.complete_relationship_row("p", "c", 3000).unwrap());

        let stored = db.parent_edge_of("c").unwrap().unwrap();
        assert_eq!(stored.completed_at, Some(2000));
    }
}
