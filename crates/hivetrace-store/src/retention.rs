use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::Result;

/// What one retention sweep removed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub events: usize,
    pub metric_records: usize,
    pub timeline_points: usize,
    pub hourly_buckets: usize,
    pub daily_buckets: usize,
    pub synced_ops: usize,
    pub handoff_files: usize,
}

impl Database {
    /// Delete rows older than `retention_days`, synced sync-queue rows older
    /// than one day, and aged handoff files (keeping each project's
    /// `latest_*` pointer).
    pub fn retention_sweep(&self, now_ms: i64, retention_days: u32) -> Result<SweepReport> {
        let cutoff = now_ms - i64::from(retention_days) * 86_400_000;
        let mut report = SweepReport::default();

        report.events = self
            .conn()
            .execute("DELETE FROM events WHERE timestamp < ?1", [cutoff])?;
        report.metric_records = self
            .conn()
            .execute("DELETE FROM agent_metrics WHERE timestamp < ?1", [cutoff])?;
        report.timeline_points = self
            .conn()
            .execute("DELETE FROM timeline_points WHERE timestamp < ?1", [cutoff])?;
        report.hourly_buckets = self
            .conn()
            .execute("DELETE FROM metrics_hourly WHERE bucket_start < ?1", [cutoff])?;
        report.daily_buckets = self
            .conn()
            .execute("DELETE FROM metrics_daily WHERE bucket_start < ?1", [cutoff])?;

        report.synced_ops = self.purge_synced_ops_before(now_ms - 86_400_000)?;
        report.handoff_files = self.sweep_handoff_files(cutoff)?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivetrace_types::{AgentMetricRecord, HookEvent, HookEventType};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn sweep_removes_only_aged_rows() {
        let db = Database::open_in_memory().unwrap();

        let mut old = HookEvent::new("app1", "s1", HookEventType::Stop, json!({}));
        old.timestamp = Some(NOW - 40 * 86_400_000);
        db.insert_event(&old).unwrap();

        let mut fresh = HookEvent::new("app1", "s1", HookEventType::Stop, json!({}));
        fresh.timestamp = Some(NOW - 1000);
        db.insert_event(&fresh).unwrap();

        let record = AgentMetricRecord {
            id: None,
            timestamp: NOW - 40 * 86_400_000,
            session_id: "s1".into(),
            agent_type: "tester".into(),
            agent_name: "t".into(),
            tokens: 10,
            duration_ms: 100,
            success: true,
            cost_cents_x100: 1,
            tool_name: None,
            source_app: "app1".into(),
        };
        db.record_agent_metric(&record, &[], None).unwrap();

        let report = db.retention_sweep(NOW, 30).unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(report.metric_records, 1);
        assert_eq!(report.hourly_buckets, 1);
        assert_eq!(report.daily_buckets, 1);
        assert!(report.timeline_points > 0);

        assert_eq!(db.count_events().unwrap(), 1);
    }
}
