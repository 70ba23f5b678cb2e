use rusqlite::{params, Row};
use serde_json::Value;

use hivetrace_types::{HookEvent, HookEventType};

use crate::db::Database;
use crate::error::{Error, Result};

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<HookEvent> {
    let hook_type: String = row.get(3)?;
    let payload: String = row.get(5)?;

    let parse_opt_json = |v: Option<String>| v.and_then(|s| serde_json::from_str(&s).ok());

    Ok(HookEvent {
        id: Some(row.get(0)?),
        source_app: row.get(1)?,
        session_id: row.get(2)?,
        hook_event_type: hook_type
            .parse::<HookEventType>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?,
        timestamp: Some(row.get(4)?),
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        parent_session_id: row.get(6)?,
        session_depth: row.get(7)?,
        wave_id: row.get(8)?,
        delegation_context: parse_opt_json(row.get(9)?),
        correlation_id: row.get(10)?,
        duration: row.get(11)?,
        error: parse_opt_json(row.get(12)?),
        summary: row.get(13)?,
        chat: parse_opt_json(row.get(14)?),
    })
}

const EVENT_COLUMNS: &str = "id, source_app, session_id, hook_event_type, timestamp, payload, \
     parent_session_id, session_depth, wave_id, delegation_context, correlation_id, \
     duration_ms, error, summary, chat";

impl Database {
    /// Persist an event and return it with the assigned id.
    /// Ids are strictly increasing in persistence order.
    pub fn insert_event(&self, event: &HookEvent) -> Result<HookEvent> {
        let timestamp = event
            .timestamp
            .ok_or_else(|| Error::Constraint("event timestamp must be set before insert".into()))?;

        self.conn().execute(
            r#"
            INSERT INTO events (
                source_app, session_id, hook_event_type, timestamp, payload,
                parent_session_id, session_depth, wave_id, delegation_context,
                correlation_id, duration_ms, error, summary, chat
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                &event.source_app,
                &event.session_id,
                event.hook_event_type.as_str(),
                timestamp,
                event.payload.to_string(),
                &event.parent_session_id,
                &event.session_depth,
                &event.wave_id,
                event.delegation_context.as_ref().map(|v| v.to_string()),
                &event.correlation_id,
                &event.duration,
                event.error.as_ref().map(|v| v.to_string()),
                &event.summary,
                event.chat.as_ref().map(|v| v.to_string()),
            ],
        )?;

        let mut saved = event.clone();
        saved.id = Some(self.conn().last_insert_rowid());
        saved.timestamp = Some(timestamp);
        Ok(saved)
    }

    pub fn get_event(&self, id: i64) -> Result<HookEvent> {
        let sql = format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS);
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(event_from_row(row)?),
            None => Err(Error::NotFound(format!("event {}", id))),
        }
    }

    /// Most recent events, newest last (persistence order within the window).
    pub fn recent_events(&self, limit: usize) -> Result<Vec<HookEvent>> {
        let sql = format!(
            "SELECT {} FROM (SELECT {} FROM events ORDER BY id DESC LIMIT ?1) ORDER BY id ASC",
            EVENT_COLUMNS, EVENT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let events = stmt
            .query_map([limit as i64], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn session_events(&self, session_id: &str, limit: usize) -> Result<Vec<HookEvent>> {
        let sql = format!(
            "SELECT {} FROM events WHERE session_id = ?1 ORDER BY id ASC LIMIT ?2",
            EVENT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let events = stmt
            .query_map(params![session_id, limit as i64], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Distinct source apps and hook event types seen so far.
    pub fn filter_options(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut stmt = self
            .conn()
            .prepare("SELECT DISTINCT source_app FROM events ORDER BY source_app")?;
        let apps = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let mut stmt = self
            .conn()
            .prepare("SELECT DISTINCT hook_event_type FROM events ORDER BY hook_event_type")?;
        let types = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok((apps, types))
    }

    /// Events sharing a correlation id, in timestamp order (the Pre/Post
    /// tool-use pair).
    pub fn correlated_events(&self, correlation_id: &str) -> Result<Vec<HookEvent>> {
        let sql = format!(
            "SELECT {} FROM events WHERE correlation_id = ?1 ORDER BY timestamp ASC, id ASC",
            EVENT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let events = stmt
            .query_map([correlation_id], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Recent complete Pre/Post pairs, newest pair first.
    pub fn recent_correlated_pairs(&self, limit: usize) -> Result<Vec<Vec<HookEvent>>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT correlation_id, MAX(timestamp) AS latest
            FROM events
            WHERE correlation_id IS NOT NULL
              AND hook_event_type IN ('PreToolUse', 'PostToolUse')
            GROUP BY correlation_id
            HAVING COUNT(DISTINCT hook_event_type) = 2
            ORDER BY latest DESC
            LIMIT ?1
            "#,
        )?;
        let ids = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut pairs = Vec::with_capacity(ids.len());
        for id in ids {
            pairs.push(self.correlated_events(&id)?);
        }
        Ok(pairs)
    }

    /// Tool names used in a session, recovered from PreToolUse/PostToolUse
    /// payloads. Used when a SubagentStop payload omits `tools_used`.
    pub fn session_tool_names(&self, session_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT DISTINCT json_extract(payload, '$.tool_name')
            FROM events
            WHERE session_id = ?1
              AND hook_event_type IN ('PreToolUse', 'PostToolUse')
              AND json_extract(payload, '$.tool_name') IS NOT NULL
            ORDER BY 1
            "#,
        )?;
        let tools = stmt
            .query_map([session_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tools)
    }

    /// Events of one hook type since `since`, newest first.
    pub fn events_by_type_since(
        &self,
        hook_event_type: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<HookEvent>> {
        let sql = format!(
            "SELECT {} FROM events \
             WHERE hook_event_type = ?1 AND timestamp >= ?2 \
             ORDER BY timestamp DESC, id DESC LIMIT ?3",
            EVENT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let events = stmt
            .query_map(
                params![hook_event_type, since, limit as i64],
                event_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Rewrite a persisted event's payload (used to attach the generated
    /// agent id after SubagentStart derivation).
    pub fn update_event_payload(&self, id: i64, payload: &Value) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE events SET payload = ?2 WHERE id = ?1",
            params![id, payload.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("event {}", id)));
        }
        Ok(())
    }

    pub fn count_events(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
