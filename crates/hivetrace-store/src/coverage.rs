use rusqlite::params;
use std::collections::HashMap;

use crate::db::Database;
use crate::error::Result;

/// Raw per-hook-type counters; shaped into `HookStatus` by the coverage
/// aggregator.
#[derive(Debug, Clone, Default)]
pub struct HookTypeStats {
    pub execution_count: u64,
    pub success_count: u64,
    pub last_execution: Option<i64>,
    /// Mean of events with a positive duration, ms
    pub avg_duration_ms: Option<f64>,
    pub count_24h: u64,
    pub errors_24h: u64,
    pub last_error_24h: Option<String>,
}

// An event row counts as errored when its error column holds anything other
// than null/false/empty-string (the column stores the JSON encoding).
const CLEAN_ERROR: &str = "(error IS NULL OR error IN ('false', 'null', '\"\"'))";

impl Database {
    /// All-time and trailing-24 h statistics grouped by hook type.
    pub fn hook_stats(&self, now_ms: i64) -> Result<HashMap<String, HookTypeStats>> {
        let mut out: HashMap<String, HookTypeStats> = HashMap::new();

        let sql = format!(
            r#"
            SELECT hook_event_type,
                   COUNT(*),
                   SUM(CASE WHEN {clean} THEN 1 ELSE 0 END),
                   MAX(timestamp),
                   AVG(CASE WHEN duration_ms > 0 THEN duration_ms END)
            FROM events
            GROUP BY hook_event_type
            "#,
            clean = CLEAN_ERROR
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let hook_type: String = row.get(0)?;
            let stats = out.entry(hook_type).or_default();
            stats.execution_count = row.get::<_, i64>(1)? as u64;
            stats.success_count = row.get::<_, i64>(2)? as u64;
            stats.last_execution = row.get(3)?;
            stats.avg_duration_ms = row.get(4)?;
        }

        let day_ago = now_ms - 86_400_000;
        let sql = format!(
            r#"
            SELECT hook_event_type,
                   COUNT(*),
                   SUM(CASE WHEN {clean} THEN 0 ELSE 1 END)
            FROM events
            WHERE timestamp >= ?1
            GROUP BY hook_event_type
            "#,
            clean = CLEAN_ERROR
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query([day_ago])?;
        while let Some(row) = rows.next()? {
            let hook_type: String = row.get(0)?;
            let stats = out.entry(hook_type).or_default();
            stats.count_24h = row.get::<_, i64>(1)? as u64;
            stats.errors_24h = row.get::<_, i64>(2)? as u64;
        }

        // Latest error message in the window, per type that had any
        let sql = format!(
            r#"
            SELECT hook_event_type, error
            FROM events
            WHERE timestamp >= ?1 AND NOT {clean}
            ORDER BY timestamp ASC
            "#,
            clean = CLEAN_ERROR
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let mut rows = stmt.query([day_ago])?;
        while let Some(row) = rows.next()? {
            let hook_type: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let message = match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(serde_json::Value::String(s)) => s,
                Ok(other) => other.to_string(),
                Err(_) => raw,
            };
            out.entry(hook_type).or_default().last_error_24h = Some(message);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivetrace_types::{HookEvent, HookEventType};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn insert(db: &Database, ty: HookEventType, ts: i64, duration: Option<i64>, error: Option<serde_json::Value>) {
        let mut e = HookEvent::new("app1", "s1", ty, json!({}));
        e.timestamp = Some(ts);
        e.duration = duration;
        e.error = error;
        db.insert_event(&e).unwrap();
    }

    #[test]
    fn hook_stats_counts_errors_in_window_only() {
        let db = Database::open_in_memory().unwrap();

        // Two days old: errored, but outside the 24 h window
        insert(&db, HookEventType::PreToolUse, NOW - 2 * 86_400_000, None, Some(json!("old boom")));
        // Fresh clean event with duration
        insert(&db, HookEventType::PreToolUse, NOW - 1000, Some(250), None);
        // Fresh errored event
        insert(&db, HookEventType::PreToolUse, NOW - 500, Some(750), Some(json!("boom")));
        // error: false is clean
        insert(&db, HookEventType::Stop, NOW - 100, None, Some(json!(false)));

        let stats = db.hook_stats(NOW).unwrap();

        let pre = &stats["PreToolUse"];
        assert_eq!(pre.execution_count, 3);
        assert_eq!(pre.success_count, 1);
        assert_eq!(pre.count_24h, 2);
        assert_eq!(pre.errors_24h, 1);
        assert_eq!(pre.last_error_24h.as_deref(), Some("boom"));
        assert_eq!(pre.avg_duration_ms, Some(500.0));

        let stop = &stats["Stop"];
        assert_eq!(stop.execution_count, 1);
        assert_eq!(stop.success_count, 1);
        assert_eq!(stop.errors_24h, 0);
        assert!(stop.last_error_24h.is_none());
    }
}
