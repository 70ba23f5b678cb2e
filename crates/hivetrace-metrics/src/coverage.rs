use hivetrace_store::Database;
use hivetrace_types::{CoverageOverall, CoverageStatus, HookCoverageSnapshot, HookEventType, HookStatus};

/// Rolling per-hook-type statistics over the event log.
///
/// Computed on demand; the ingest path pushes a fresh snapshot to
/// subscribers after every insertion.
pub fn coverage_snapshot(db: &Database, now_ms: i64) -> hivetrace_store::Result<HookCoverageSnapshot> {
    let stats = db.hook_stats(now_ms)?;

    let mut hooks = Vec::with_capacity(HookEventType::ALL.len());
    let mut overall = CoverageOverall {
        active: 0,
        inactive: 0,
        error: 0,
        mean_success_rate: 0.0,
    };
    let mut success_sum = 0.0;

    for hook_type in HookEventType::ALL {
        let s = stats.get(hook_type.as_str()).cloned().unwrap_or_default();

        let status = if s.errors_24h > 0 {
            CoverageStatus::Error
        } else if s.execution_count == 0 {
            CoverageStatus::Inactive
        } else {
            CoverageStatus::Active
        };
        match status {
            CoverageStatus::Active => overall.active += 1,
            CoverageStatus::Inactive => overall.inactive += 1,
            CoverageStatus::Error => overall.error += 1,
        }

        // A hook that never ran has nothing to hold against it
        let success_rate = if s.execution_count > 0 {
            s.success_count as f64 / s.execution_count as f64
        } else {
            1.0
        };
        success_sum += success_rate;

        hooks.push(HookStatus {
            hook_type: hook_type.as_str().to_string(),
            execution_count: s.execution_count,
            execution_rate: format!("{}/day", s.count_24h),
            last_execution: s.last_execution,
            success_rate,
            average_execution_time: s.avg_duration_ms.unwrap_or(0.0),
            status,
            last_error: s.last_error_24h,
        });
    }

    overall.mean_success_rate = success_sum / HookEventType::ALL.len() as f64;

    Ok(HookCoverageSnapshot {
        hooks,
        overall,
        generated_at: now_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivetrace_types::HookEvent;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn snapshot_classifies_hook_states() {
        let db = Database::open_in_memory().unwrap();

        let mut clean = HookEvent::new("app1", "s1", HookEventType::UserPromptSubmit, json!({}));
        clean.timestamp = Some(NOW - 1000);
        clean.duration = Some(120);
        db.insert_event(&clean).unwrap();

        let mut bad = HookEvent::new("app1", "s1", HookEventType::PreToolUse, json!({}));
        bad.timestamp = Some(NOW - 2000);
        bad.error = Some(json!("tool exploded"));
        db.insert_event(&bad).unwrap();

        let snapshot = coverage_snapshot(&db, NOW).unwrap();
        assert_eq!(snapshot.hooks.len(), HookEventType::ALL.len());

        let by_type = |name: &str| {
            snapshot
                .hooks
                .iter()
                .find(|h| h.hook_type == name)
                .unwrap()
        };

        let prompt = by_type("UserPromptSubmit");
        assert_eq!(prompt.status, CoverageStatus::Active);
        assert_eq!(prompt.execution_count, 1);
        assert_eq!(prompt.execution_rate, "1/day");
        assert!((prompt.success_rate - 1.0).abs() < 1e-9);
        assert!((prompt.average_execution_time - 120.0).abs() < 1e-9);

        let pre = by_type("PreToolUse");
        assert_eq!(pre.status, CoverageStatus::Error);
        assert_eq!(pre.last_error.as_deref(), Some("tool exploded"));
        assert!((pre.success_rate - 0.0).abs() < 1e-9);

        let stop = by_type("Stop");
        assert_eq!(stop.status, CoverageStatus::Inactive);
        assert_eq!(stop.execution_count, 0);

        assert_eq!(snapshot.overall.active, 1);
        assert_eq!(snapshot.overall.error, 1);
        assert_eq!(snapshot.overall.inactive, 8);
        assert!(snapshot.overall.mean_success_rate > 0.8);
    }
}
