use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use hivetrace_types::SessionRow;

use crate::db::Database;
use crate::error::Result;

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    let metadata: Option<String> = row.get(10)?;
    Ok(SessionRow {
        session_id: row.get(0)?,
        source_app: row.get(1)?,
        session_type: row.get(2)?,
        parent_session_id: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        duration_ms: row.get(6)?,
        status: row.get(7)?,
        agent_count: row.get::<_, i64>(8)? as u32,
        total_tokens: row.get::<_, i64>(9)? as u64,
        metadata: metadata
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null),
    })
}

const SESSION_COLUMNS: &str = "session_id, source_app, session_type, parent_session_id, \
     start_time, end_time, duration_ms, status, agent_count, total_tokens, metadata";

impl Database {
    /// Register a session on its first event. Later SessionStarts for the
    /// same id keep the original start time.
    pub fn upsert_session_started(
        &self,
        session_id: &str,
        source_app: &str,
        session_type: &str,
        parent_session_id: Option<&str>,
        start_time: i64,
        metadata: Option<&Value>,
    ) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO sessions (
                session_id, source_app, session_type, parent_session_id,
                start_time, status, metadata
            )
            VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)
            ON CONFLICT(session_id) DO UPDATE SET
                source_app = ?2,
                parent_session_id = COALESCE(?4, parent_session_id),
                metadata = COALESCE(?6, metadata)
            "#,
            params![
                session_id,
                source_app,
                session_type,
                parent_session_id,
                start_time,
                metadata.map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn close_session(&self, session_id: &str, end_time: i64) -> Result<()> {
        self.conn().execute(
            r#"
            UPDATE sessions
            SET end_time = ?2,
                duration_ms = ?2 - start_time,
                status = 'completed'
            WHERE session_id = ?1 AND status = 'active'
            "#,
            params![session_id, end_time],
        )?;
        Ok(())
    }

    pub fn bump_session_agent_count(&self, session_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET agent_count = agent_count + 1 WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(())
    }

    pub fn add_session_tokens(&self, session_id: &str, tokens: u64) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET total_tokens = total_tokens + ?2 WHERE session_id = ?1",
            params![session_id, tokens as i64],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE session_id = ?1",
            SESSION_COLUMNS
        );
        let session = self
            .conn()
            .query_row(&sql, [session_id], session_from_row)
            .optional()?;
        Ok(session)
    }

    /// Sessions with a start and no end yet, newest first.
    pub fn active_sessions(&self, limit: usize) -> Result<Vec<SessionRow>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE status = 'active' ORDER BY start_time DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let sessions = stmt
            .query_map([limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle_round_trips() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_session_started("s1", "app1", "main", None, 1000, None)
            .unwrap();
        db.bump_session_agent_count("s1").unwrap();
        db.add_session_tokens("s1", 120).unwrap();
        db.close_session("s1", 5000).unwrap();

        let s = db.get_session("s1").unwrap().unwrap();
        assert_eq!(s.status, "completed");
        assert_eq!(s.end_time, Some(5000));
        assert_eq!(s.duration_ms, Some(4000));
        assert_eq!(s.agent_count, 1);
        assert_eq!(s.total_tokens, 120);
    }

    #[test]
    fn duplicate_start_keeps_original_start_time() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session_started("s1", "app1", "main", None, 1000, None)
            .unwrap();
        db.upsert_session_started("s1", "app1", "main", Some("p1"), 9000, None)
            .unwrap();

        let s = db.get_session("s1").unwrap().unwrap();
        assert_eq!(s.start_time, 1000);
        assert_eq!(s.parent_session_id.as_deref(), Some("p1"));
    }

    #[test]
    fn active_sessions_excludes_closed() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_session_started("s1", "app1", "main", None, 1000, None)
            .unwrap();
        db.upsert_session_started("s2", "app1", "main", None, 2000, None)
            .unwrap();
        db.close_session("s1", 3000).unwrap();

        let active = db.active_sessions(10).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "s2");
    }
}
