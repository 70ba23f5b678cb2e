use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use hivetrace_types::{AgentMetricRecord, TimelineMetric, TimelinePoint};

use crate::db::Database;
use crate::error::{Error, Result};

/// Hour bucket key: `YYYY-MM-DDTHH` in UTC
pub fn hour_key(timestamp_ms: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or_default();
    dt.format("%Y-%m-%dT%H").to_string()
}

/// Day bucket key: `YYYY-MM-DD` in UTC
pub fn day_key(timestamp_ms: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or_default();
    dt.format("%Y-%m-%d").to_string()
}

/// Floor a timestamp to its hour bucket start.
pub fn hour_start(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(3_600_000)
}

/// Floor a timestamp to its UTC day start.
pub fn day_start(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(86_400_000)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTypeBreakdown {
    pub agent_type: String,
    pub count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub total_tokens: u64,
}

/// Snapshot answered by `GET /api/agents/metrics/current`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentMetrics {
    pub active_agents: u64,
    pub executions_today: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub tokens_used_today: u64,
    /// Hundredths of a cent
    pub estimated_cost_today: i64,
    pub agent_type_breakdown: Vec<AgentTypeBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub timestamp: i64,
    pub executions: u64,
    pub tokens: u64,
    /// Hundredths of a cent
    pub cost: i64,
    pub avg_duration_ms: f64,
    pub agent_types_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_agent_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRow {
    #[serde(rename = "type")]
    pub agent_type: String,
    pub count: u64,
    pub percentage: f64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub common_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsageRow {
    pub name: String,
    pub usage_count: u64,
    pub agent_types_using: Vec<String>,
}

impl Database {
    /// Record one agent-terminal metric: the immutable point-in-time row,
    /// the hourly and daily rollups, tool usage, and non-zero timeline
    /// points, all in one transaction so replays cannot half-apply.
    pub fn record_agent_metric(
        &self,
        record: &AgentMetricRecord,
        tools_used: &[String],
        agent_id: Option<&str>,
    ) -> Result<i64> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO agent_metrics (
                timestamp, session_id, agent_type, agent_name, tokens,
                duration_ms, success, cost_cents_x100, tool_name, source_app
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.timestamp,
                &record.session_id,
                &record.agent_type,
                &record.agent_name,
                record.tokens as i64,
                record.duration_ms,
                record.success as i64,
                record.cost_cents_x100,
                &record.tool_name,
                &record.source_app,
            ],
        )?;
        let metric_id = tx.last_insert_rowid();

        tx.execute(
            r#"
            INSERT INTO metrics_hourly (
                hour_key, agent_type, execution_count, duration_ms_total,
                tokens_total, cost_cents_x100_total, bucket_start
            )
            VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
            ON CONFLICT(hour_key, agent_type) DO UPDATE SET
                execution_count = execution_count + 1,
                duration_ms_total = duration_ms_total + ?3,
                tokens_total = tokens_total + ?4,
                cost_cents_x100_total = cost_cents_x100_total + ?5
            "#,
            params![
                hour_key(record.timestamp),
                &record.agent_type,
                record.duration_ms,
                record.tokens as i64,
                record.cost_cents_x100,
                hour_start(record.timestamp),
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO metrics_daily (
                day_key, execution_count, duration_ms_total, tokens_total,
                cost_cents_x100_total, bucket_start
            )
            VALUES (?1, 1, ?2, ?3, ?4, ?5)
            ON CONFLICT(day_key) DO UPDATE SET
                execution_count = execution_count + 1,
                duration_ms_total = duration_ms_total + ?2,
                tokens_total = tokens_total + ?3,
                cost_cents_x100_total = cost_cents_x100_total + ?4
            "#,
            params![
                day_key(record.timestamp),
                record.duration_ms,
                record.tokens as i64,
                record.cost_cents_x100,
                day_start(record.timestamp),
            ],
        )?;

        let date = day_key(record.timestamp);
        for tool in tools_used {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT agent_ids FROM tool_usage WHERE tool_name = ?1 AND usage_date = ?2",
                    params![tool, &date],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let mut agents: Vec<String> = existing
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            if let Some(id) = agent_id {
                if !agents.iter().any(|a| a == id) {
                    agents.push(id.to_string());
                }
            }

            tx.execute(
                r#"
                INSERT INTO tool_usage (tool_name, usage_date, usage_count, agent_ids)
                VALUES (?1, ?2, 1, ?3)
                ON CONFLICT(tool_name, usage_date) DO UPDATE SET
                    usage_count = usage_count + 1,
                    agent_ids = ?3
                "#,
                params![
                    tool,
                    &date,
                    serde_json::to_string(&agents).unwrap_or_else(|_| "[]".into())
                ],
            )?;
        }

        let points = [
            (TimelineMetric::Executions, 1.0),
            (TimelineMetric::Tokens, record.tokens as f64),
            (TimelineMetric::Duration, record.duration_ms as f64),
            (TimelineMetric::Cost, record.cost_cents_x100 as f64),
        ];
        for (metric, value) in points {
            // Zero-valued samples are never written
            if value == 0.0 {
                continue;
            }
            tx.execute(
                r#"
                INSERT INTO timeline_points (timestamp, metric_type, value, agent_type, source_app)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.timestamp,
                    metric.as_str(),
                    value,
                    &record.agent_type,
                    &record.source_app,
                ],
            )?;
        }

        tx.commit()?;
        Ok(metric_id)
    }

    /// Aggregate metric snapshot over `[start, end)`.
    pub fn current_metrics(&self, start: i64, end: i64) -> Result<CurrentMetrics> {
        let (executions, success_rate, avg_duration, tokens, cost): (i64, f64, f64, i64, i64) =
            self.conn().query_row(
                r#"
                SELECT COUNT(*),
                       COALESCE(AVG(success), 0.0),
                       COALESCE(AVG(duration_ms), 0.0),
                       COALESCE(SUM(tokens), 0),
                       COALESCE(SUM(cost_cents_x100), 0)
                FROM agent_metrics
                WHERE timestamp >= ?1 AND timestamp < ?2
                "#,
                params![start, end],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )?;

        let mut stmt = self.conn().prepare(
            r#"
            SELECT agent_type, COUNT(*), AVG(success), AVG(duration_ms), SUM(tokens)
            FROM agent_metrics
            WHERE timestamp >= ?1 AND timestamp < ?2
            GROUP BY agent_type
            ORDER BY COUNT(*) DESC
            "#,
        )?;
        let breakdown = stmt
            .query_map(params![start, end], |row| {
                Ok(AgentTypeBreakdown {
                    agent_type: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    success_rate: row.get(2)?,
                    avg_duration_ms: row.get(3)?,
                    total_tokens: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(CurrentMetrics {
            active_agents: self.count_active_agents()?,
            executions_today: executions as u64,
            success_rate,
            avg_duration_ms: avg_duration,
            tokens_used_today: tokens as u64,
            estimated_cost_today: cost,
            agent_type_breakdown: breakdown,
        })
    }

    /// Hour-bucketed time series over `[start, end)`, built from the
    /// timeline points written at record time.
    pub fn metrics_timeline(&self, start: i64, end: i64) -> Result<Vec<TimelineBucket>> {
        #[derive(Default)]
        struct Acc {
            executions: f64,
            tokens: f64,
            cost: f64,
            duration_sum: f64,
            duration_n: u64,
            per_type: HashMap<String, f64>,
        }

        let mut stmt = self.conn().prepare(
            r#"
            SELECT timestamp, metric_type, value, agent_type
            FROM timeline_points
            WHERE timestamp >= ?1 AND timestamp < ?2
            ORDER BY timestamp ASC
            "#,
        )?;

        let mut buckets: Vec<(i64, Acc)> = Vec::new();
        let mut rows = stmt.query(params![start, end])?;
        while let Some(row) = rows.next()? {
            let ts: i64 = row.get(0)?;
            let metric: String = row.get(1)?;
            let value: f64 = row.get(2)?;
            let agent_type: Option<String> = row.get(3)?;

            let bucket_ts = hour_start(ts);
            if buckets.last().map(|(t, _)| *t) != Some(bucket_ts) {
                buckets.push((bucket_ts, Acc::default()));
            }
            let acc = &mut buckets.last_mut().expect("bucket just pushed").1;

            match TimelineMetric::parse(&metric) {
                Some(TimelineMetric::Executions) => {
                    acc.executions += value;
                    if let Some(t) = agent_type {
                        *acc.per_type.entry(t).or_insert(0.0) += value;
                    }
                }
                Some(TimelineMetric::Tokens) => acc.tokens += value,
                Some(TimelineMetric::Cost) => acc.cost += value,
                Some(TimelineMetric::Duration) => {
                    acc.duration_sum += value;
                    acc.duration_n += 1;
                }
                None => {}
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(timestamp, acc)| {
                let dominant = acc
                    .per_type
                    .iter()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(t, _)| t.clone());
                TimelineBucket {
                    timestamp,
                    executions: acc.executions as u64,
                    tokens: acc.tokens as u64,
                    cost: acc.cost as i64,
                    avg_duration_ms: if acc.duration_n > 0 {
                        acc.duration_sum / acc.duration_n as f64
                    } else {
                        0.0
                    },
                    agent_types_count: acc.per_type.len() as u64,
                    dominant_agent_type: dominant,
                }
            })
            .collect())
    }

    /// Share of executions per agent type over `[start, end)`.
    /// Percentages sum to 1 (within float error) when the window is non-empty.
    pub fn type_distribution(&self, start: i64, end: i64) -> Result<Vec<DistributionRow>> {
        let total: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM agent_metrics WHERE timestamp >= ?1 AND timestamp < ?2",
            params![start, end],
            |row| row.get(0),
        )?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn().prepare(
            r#"
            SELECT agent_type, COUNT(*), AVG(duration_ms), AVG(success)
            FROM agent_metrics
            WHERE timestamp >= ?1 AND timestamp < ?2
            GROUP BY agent_type
            ORDER BY COUNT(*) DESC
            "#,
        )?;
        let mut out = stmt
            .query_map(params![start, end], |row| {
                let count: i64 = row.get(1)?;
                Ok(DistributionRow {
                    agent_type: row.get(0)?,
                    count: count as u64,
                    percentage: count as f64 / total as f64,
                    avg_duration_ms: row.get(2)?,
                    success_rate: row.get(3)?,
                    common_tools: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for row in &mut out {
            let mut stmt = self.conn().prepare(
                r#"
                SELECT tool_name, COUNT(*) AS uses
                FROM agent_metrics
                WHERE agent_type = ?1 AND timestamp >= ?2 AND timestamp < ?3
                  AND tool_name IS NOT NULL
                GROUP BY tool_name
                ORDER BY uses DESC
                LIMIT 3
                "#,
            )?;
            row.common_tools = stmt
                .query_map(params![&row.agent_type, start, end], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
        }

        Ok(out)
    }

    /// Per-tool usage over the dates in `[start, end)`, counts from the
    /// rolling `tool_usage` aggregate and using-types from metric rows.
    pub fn tools_usage(&self, start: i64, end: i64) -> Result<Vec<ToolUsageRow>> {
        let start_date = day_key(start);
        let end_date = day_key(end);

        let mut stmt = self.conn().prepare(
            r#"
            SELECT tool_name, SUM(usage_count)
            FROM tool_usage
            WHERE usage_date >= ?1 AND usage_date <= ?2
            GROUP BY tool_name
            ORDER BY SUM(usage_count) DESC
            "#,
        )?;
        let mut out = stmt
            .query_map(params![start_date, end_date], |row| {
                Ok(ToolUsageRow {
                    name: row.get(0)?,
                    usage_count: row.get::<_, i64>(1)? as u64,
                    agent_types_using: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for row in &mut out {
            let mut stmt = self.conn().prepare(
                r#"
                SELECT DISTINCT agent_type
                FROM agent_metrics
                WHERE tool_name = ?1 AND timestamp >= ?2 AND timestamp < ?3
                ORDER BY agent_type
                "#,
            )?;
            row.agent_types_using = stmt
                .query_map(params![&row.name, start, end], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
        }

        Ok(out)
    }

    pub fn insert_timeline_point(&self, point: &TimelinePoint) -> Result<()> {
        if point.value == 0.0 {
            return Err(Error::Constraint(
                "zero-valued timeline points are never written".into(),
            ));
        }
        self.conn().execute(
            r#"
            INSERT INTO timeline_points (timestamp, metric_type, value, agent_type, source_app)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                point.timestamp,
                point.metric_type.as_str(),
                point.value,
                &point.agent_type,
                &point.source_app,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64, agent_type: &str, tokens: u64, duration: i64, success: bool) -> AgentMetricRecord {
        AgentMetricRecord {
            id: None,
            timestamp: ts,
            session_id: "s1".to_string(),
            agent_type: agent_type.to_string(),
            agent_name: format!("{}-1", agent_type),
            tokens,
            duration_ms: duration,
            success,
            cost_cents_x100: (tokens / 10) as i64,
            tool_name: Some("Read".to_string()),
            source_app: "app1".to_string(),
        }
    }

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn bucket_keys_are_utc() {
        // 2023-11-14T22:13:20 UTC
        assert_eq!(hour_key(T0), "2023-11-14T22");
        assert_eq!(day_key(T0), "2023-11-14");
        assert_eq!(hour_start(T0) % 3_600_000, 0);
    }

    #[test]
    fn record_metric_updates_all_rollups() {
        let db = Database::open_in_memory().unwrap();

        db.record_agent_metric(&record(T0, "reviewer", 120, 500, true), &["Read".into()], Some("ag_1"))
            .unwrap();
        db.record_agent_metric(&record(T0 + 1000, "reviewer", 80, 300, false), &["Read".into()], Some("ag_2"))
            .unwrap();

        let metrics = db.current_metrics(T0 - 1, T0 + 2000).unwrap();
        assert_eq!(metrics.executions_today, 2);
        assert_eq!(metrics.tokens_used_today, 200);
        assert!((metrics.success_rate - 0.5).abs() < 1e-9);
        assert!((metrics.avg_duration_ms - 400.0).abs() < 1e-9);
        assert_eq!(metrics.agent_type_breakdown.len(), 1);
        assert_eq!(metrics.agent_type_breakdown[0].agent_type, "reviewer");

        // Hourly rollup is monotone across the bucket's life
        let (count, tokens): (i64, i64) = db
            .conn()
            .query_row(
                "SELECT execution_count, tokens_total FROM metrics_hourly WHERE agent_type = 'reviewer'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(tokens, 200);
    }

    #[test]
    fn tool_usage_tracks_unique_agents() {
        let db = Database::open_in_memory().unwrap();

        db.record_agent_metric(&record(T0, "reviewer", 10, 100, true), &["Grep".into()], Some("ag_1"))
            .unwrap();
        db.record_agent_metric(&record(T0, "reviewer", 10, 100, true), &["Grep".into()], Some("ag_1"))
            .unwrap();
        db.record_agent_metric(&record(T0, "tester", 10, 100, true), &["Grep".into()], Some("ag_2"))
            .unwrap();

        let (count, agents): (i64, String) = db
            .conn()
            .query_row(
                "SELECT usage_count, agent_ids FROM tool_usage WHERE tool_name = 'Grep'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 3);
        let ids: Vec<String> = serde_json::from_str(&agents).unwrap();
        assert_eq!(ids.len(), 2);

        let usage = db.tools_usage(T0 - 1, T0 + 1000).unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].usage_count, 3);
        assert_eq!(
            usage[0].agent_types_using,
            vec!["reviewer".to_string(), "tester".to_string()]
        );
    }

    #[test]
    fn timeline_buckets_by_hour_with_dominant_type() {
        let db = Database::open_in_memory().unwrap();

        db.record_agent_metric(&record(T0, "reviewer", 100, 500, true), &[], None)
            .unwrap();
        db.record_agent_metric(&record(T0 + 1, "reviewer", 50, 300, true), &[], None)
            .unwrap();
        db.record_agent_metric(&record(T0 + 2, "tester", 25, 100, true), &[], None)
            .unwrap();
        // Next hour
        db.record_agent_metric(&record(T0 + 3_600_000, "tester", 10, 100, true), &[], None)
            .unwrap();

        let timeline = db.metrics_timeline(T0 - 1, T0 + 7_200_000).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].executions, 3);
        assert_eq!(timeline[0].tokens, 175);
        assert_eq!(timeline[0].agent_types_count, 2);
        assert_eq!(timeline[0].dominant_agent_type.as_deref(), Some("reviewer"));
        assert_eq!(timeline[1].executions, 1);
    }

    #[test]
    fn distribution_percentages_sum_to_one() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..3 {
            db.record_agent_metric(&record(T0 + i, "reviewer", 10, 100, true), &[], None)
                .unwrap();
        }
        db.record_agent_metric(&record(T0 + 10, "tester", 10, 100, false), &[], None)
            .unwrap();

        let dist = db.type_distribution(T0 - 1, T0 + 1000).unwrap();
        assert_eq!(dist.len(), 2);
        let sum: f64 = dist.iter().map(|d| d.percentage).sum();
        assert!((sum - 1.0).abs() < 0.01);
        assert_eq!(dist[0].agent_type, "reviewer");
        assert_eq!(dist[0].common_tools, vec!["Read".to_string()]);
    }

    #[test]
    fn empty_window_yields_empty_distribution() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.type_distribution(0, 1).unwrap().is_empty());
        assert!(db.metrics_timeline(0, 1).unwrap().is_empty());
    }

    #[test]
    fn zero_timeline_point_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let point = TimelinePoint {
            timestamp: T0,
            metric_type: TimelineMetric::Tokens,
            value: 0.0,
            agent_type: None,
            source_app: None,
        };
        assert!(matches!(
            db.insert_timeline_point(&point).unwrap_err(),
            Error::Constraint(_)
        ));
    }
}
