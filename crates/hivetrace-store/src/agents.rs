use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use hivetrace_types::{AgentExecution, AgentStatus, TokenUsage};

use crate::db::Database;
use crate::error::{Error, Result};

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<AgentExecution> {
    let status: String = row.get(3)?;
    let tools: String = row.get(9)?;
    let perf: Option<String> = row.get(14)?;

    Ok(AgentExecution {
        agent_id: row.get(0)?,
        agent_name: row.get(1)?,
        agent_type: row.get(2)?,
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Failed),
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        duration_ms: row.get(6)?,
        session_id: row.get(7)?,
        task_description: row.get(8)?,
        tools_granted: serde_json::from_str(&tools).unwrap_or_default(),
        token_usage: TokenUsage {
            input_tokens: row.get::<_, i64>(10)? as u64,
            output_tokens: row.get::<_, i64>(11)? as u64,
            total_tokens: row.get::<_, i64>(12)? as u64,
            estimated_cost: row.get(13)?,
        },
        performance_metrics: perf
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null),
        source_app: row.get(15)?,
        progress: row.get::<_, i64>(16)? as u8,
    })
}

const EXECUTION_COLUMNS: &str = "agent_id, agent_name, agent_type, status, start_time, end_time, \
     duration_ms, session_id, task_description, tools_granted, tokens_input, tokens_output, \
     tokens_total, estimated_cost, performance_metrics, source_app, progress";

impl Database {
    pub fn insert_agent_execution(&self, exec: &AgentExecution) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO agent_executions (
                agent_id, agent_name, agent_type, status, start_time, end_time,
                duration_ms, session_id, task_description, tools_granted,
                tokens_input, tokens_output, tokens_total, estimated_cost,
                performance_metrics, source_app, progress
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(agent_id) DO NOTHING
            "#,
            params![
                &exec.agent_id,
                &exec.agent_name,
                &exec.agent_type,
                exec.status.as_str(),
                exec.start_time,
                exec.end_time,
                exec.duration_ms,
                &exec.session_id,
                &exec.task_description,
                serde_json::to_string(&exec.tools_granted).unwrap_or_else(|_| "[]".into()),
                exec.token_usage.input_tokens as i64,
                exec.token_usage.output_tokens as i64,
                exec.token_usage.total_tokens as i64,
                exec.token_usage.estimated_cost,
                if exec.performance_metrics.is_null() {
                    None
                } else {
                    Some(exec.performance_metrics.to_string())
                },
                &exec.source_app,
                exec.progress as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent_execution(&self, agent_id: &str) -> Result<Option<AgentExecution>> {
        let sql = format!(
            "SELECT {} FROM agent_executions WHERE agent_id = ?1",
            EXECUTION_COLUMNS
        );
        let exec = self
            .conn()
            .query_row(&sql, [agent_id], execution_from_row)
            .optional()?;
        Ok(exec)
    }

    /// Terminalize an execution. Only transitions rows still `active`, so a
    /// second completion for the same id is a no-op and the first end_time
    /// sticks.
    pub fn complete_agent_execution(
        &self,
        agent_id: &str,
        status: AgentStatus,
        end_time: i64,
        duration_ms: i64,
        tokens: Option<&TokenUsage>,
        tools_used: Option<&[String]>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(Error::Constraint(format!(
                "cannot transition agent {} back to {}",
                agent_id,
                status.as_str()
            )));
        }

        let changed = self.conn().execute(
            r#"
            UPDATE agent_executions
            SET status = ?2,
                end_time = ?3,
                duration_ms = ?4,
                progress = 100,
                tokens_input = COALESCE(?5, tokens_input),
                tokens_output = COALESCE(?6, tokens_output),
                tokens_total = COALESCE(?7, tokens_total),
                estimated_cost = COALESCE(?8, estimated_cost),
                tools_granted = COALESCE(?9, tools_granted)
            WHERE agent_id = ?1 AND status = 'active'
            "#,
            params![
                agent_id,
                status.as_str(),
                end_time,
                duration_ms,
                tokens.map(|t| t.input_tokens as i64),
                tokens.map(|t| t.output_tokens as i64),
                tokens.map(|t| t.total_tokens as i64),
                tokens.map(|t| t.estimated_cost),
                tools_used.map(|t| serde_json::to_string(t).unwrap_or_else(|_| "[]".into())),
            ],
        )?;

        Ok(changed > 0)
    }

    pub fn active_agent_executions(&self) -> Result<Vec<AgentExecution>> {
        let sql = format!(
            "SELECT {} FROM agent_executions WHERE status = 'active' ORDER BY start_time ASC",
            EXECUTION_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let execs = stmt
            .query_map([], execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(execs)
    }

    pub fn count_active_agents(&self) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM agent_executions WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Insert or overwrite the terminal-status row for an agent.
    pub fn upsert_terminal_status(
        &self,
        agent_id: &str,
        agent_name: &str,
        status: AgentStatus,
        session_id: &str,
        updated_at: i64,
    ) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO terminal_status (agent_id, agent_name, status, session_id, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(agent_id) DO UPDATE SET
                agent_name = ?2,
                status = ?3,
                session_id = ?4,
                updated_at = ?5
            "#,
            params![agent_id, agent_name, status.as_str(), session_id, updated_at],
        )?;
        Ok(())
    }

    /// Active agent names plus the most recently completed ones, for the
    /// terminal snapshot pushed on subscribe.
    pub fn terminal_snapshot(&self, recent_limit: usize) -> Result<(Vec<String>, Vec<String>)> {
        let mut stmt = self.conn().prepare(
            "SELECT agent_name FROM terminal_status WHERE status = 'active' ORDER BY updated_at DESC",
        )?;
        let active = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let mut stmt = self.conn().prepare(
            r#"
            SELECT agent_name FROM terminal_status
            WHERE status IN ('complete', 'failed')
            ORDER BY updated_at DESC
            LIMIT ?1
            "#,
        )?;
        let completed = stmt
            .query_map([recent_limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok((active, completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(agent_id: &str, start: i64) -> AgentExecution {
        AgentExecution {
            agent_id: agent_id.to_string(),
            agent_name: "reviewer-1".to_string(),
            agent_type: "reviewer".to_string(),
            status: AgentStatus::Active,
            start_time: start,
            end_time: None,
            duration_ms: None,
            session_id: "s1".to_string(),
            task_description: Some("review the diff".to_string()),
            tools_granted: vec!["Read".to_string()],
            token_usage: TokenUsage::default(),
            performance_metrics: Value::Null,
            source_app: "app1".to_string(),
            progress: 0,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let db = Database::open_in_memory().unwrap();
        db.insert_agent_execution(&execution("ag_1", 1000)).unwrap();

        let loaded = db.get_agent_execution("ag_1").unwrap().unwrap();
        assert_eq!(loaded.agent_name, "reviewer-1");
        assert_eq!(loaded.status, AgentStatus::Active);
        assert_eq!(loaded.tools_granted, vec!["Read".to_string()]);
    }

    #[test]
    fn complete_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.insert_agent_execution(&execution("ag_1", 1000)).unwrap();

        let first = db
            .complete_agent_execution("ag_1", AgentStatus::Complete, 1500, 500, None, None)
            .unwrap();
        assert!(first);

        // Second completion must not touch the row
        let second = db
            .complete_agent_execution("ag_1", AgentStatus::Failed, 9999, 8999, None, None)
            .unwrap();
        assert!(!second);

        let loaded = db.get_agent_execution("ag_1").unwrap().unwrap();
        assert_eq!(loaded.status, AgentStatus::Complete);
        assert_eq!(loaded.end_time, Some(1500));
        assert_eq!(loaded.duration_ms, Some(500));
        assert_eq!(loaded.progress, 100);
    }

    #[test]
    fn completing_to_active_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_agent_execution(&execution("ag_1", 1000)).unwrap();

        let err = db
            .complete_agent_execution("ag_1", AgentStatus::Active, 1500, 500, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
    }

    #[test]
    fn active_agents_exclude_terminal_rows() {
        let db = Database::open_in_memory().unwrap();
        db.insert_agent_execution(&execution("ag_1", 1000)).unwrap();
        db.insert_agent_execution(&execution("ag_2", 1100)).unwrap();
        db.complete_agent_execution("ag_1", AgentStatus::Complete, 1500, 500, None, None)
            .unwrap();

        assert_eq!(db.count_active_agents().unwrap(), 1);
        let active = db.active_agent_executions().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_id, "ag_2");
    }

    #[test]
    fn terminal_snapshot_splits_active_and_completed() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_terminal_status("ag_1", "alpha", AgentStatus::Active, "s1", 1000)
            .unwrap();
        db.upsert_terminal_status("ag_2", "beta", AgentStatus::Complete, "s1", 2000)
            .unwrap();
        db.upsert_terminal_status("ag_1", "alpha", AgentStatus::Failed, "s1", 3000)
            .unwrap();

        let (active, completed) = db.terminal_snapshot(10).unwrap();
        assert!(active.is_empty());
        assert_eq!(completed, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
