use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use hivetrace_cache::{Cache, ConnectivityMonitor};
use hivetrace_store::{CurrentMetrics, Database, DistributionRow, TimelineBucket, ToolUsageRow};
use hivetrace_types::{
    classify_agent_type, AgentExecution, AgentMetricRecord, AgentStatus, HookEvent, HookEventType,
    PayloadFields, SyncOpKind, SyncOperation, TokenUsage,
};

use crate::error::{Error, Result};
use crate::keys;

/// Flat-rate cost model: $3 per million tokens, kept in hundredths of a
/// cent so aggregate sums stay integral.
const COST_CENTS_X100_PER_1K_TOKENS: i64 = 30;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn estimate_cost_cents_x100(tokens: u64) -> i64 {
    (tokens as i64) * COST_CENTS_X100_PER_1K_TOKENS / 1000
}

/// `ag_<millis>_<random>`
pub fn generate_agent_id(timestamp_ms: i64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(6)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("ag_{}_{}", timestamp_ms, suffix)
}

#[derive(Debug, Clone)]
pub struct AgentStartRequest {
    pub agent_name: String,
    pub agent_type: Option<String>,
    pub session_id: String,
    pub source_app: String,
    pub task_description: Option<String>,
    pub tools_granted: Vec<String>,
    pub timestamp: Option<i64>,
    /// Raw payload, consulted by the agent-type classifier
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct AgentCompleteRequest {
    /// When absent, the active execution is recovered by session + name
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub agent_type: Option<String>,
    pub session_id: String,
    pub source_app: String,
    pub success: bool,
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<i64>,
    pub tools_used: Vec<String>,
    pub timestamp: Option<i64>,
}

/// Outcome of a cache-warming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmOutcome {
    /// Keys rebuilt; carries the number of re-registered active agents
    Completed { active_agents: usize },
    /// Another warmup is already running
    SkippedInFlight,
    /// Last warmup was under five minutes ago
    SkippedRateLimited,
}

// NOTE: Write/Read Discipline
//
// Writes go durable-first: the SQLite transaction is the call's success
// criterion, and every cache mutation afterwards is best-effort. A failed
// cache op lands in the sync queue as the same operation it would have been,
// so the replay path and the live path share one vocabulary (SyncOpKind).
// Reads go cache-first and repopulate the cache with a TTL on miss.

/// Single facade over the durable store and the cache for everything
/// metric-shaped.
pub struct MetricsService {
    db: Arc<Mutex<Database>>,
    cache: Arc<dyn Cache>,
    monitor: Arc<ConnectivityMonitor>,
    warm_in_flight: AtomicBool,
    last_warm: Mutex<Option<Instant>>,
    warm_min_interval: Duration,
}

impl MetricsService {
    pub fn new(
        db: Arc<Mutex<Database>>,
        cache: Arc<dyn Cache>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            db,
            cache,
            monitor,
            warm_in_flight: AtomicBool::new(false),
            last_warm: Mutex::new(None),
            warm_min_interval: Duration::from_secs(300),
        }
    }

    /// Record metrics for an event. Only agent-terminal events produce a
    /// metric row; everything else is a no-op so callers can invoke this
    /// unconditionally.
    pub async fn record_metric(&self, event: &HookEvent) -> Result<()> {
        if event.hook_event_type != HookEventType::SubagentStop {
            return Ok(());
        }

        let fields = PayloadFields::from_value(&event.payload);
        let timestamp = event.timestamp.unwrap_or_else(now_ms);
        let agent_name = fields
            .agent_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let agent_type = fields
            .agent_type
            .clone()
            .unwrap_or_else(|| classify_agent_type(&agent_name, &event.payload).to_string());
        let tokens = fields.tokens_used.unwrap_or(0);
        let duration_ms = event.duration.or(fields.duration).unwrap_or(0);
        let success = fields.is_success() && !event.is_error();
        let tools = fields.tools_used.clone().unwrap_or_default();

        let record = AgentMetricRecord {
            id: None,
            timestamp,
            session_id: event.session_id.clone(),
            agent_type: agent_type.clone(),
            agent_name,
            tokens,
            duration_ms,
            success,
            cost_cents_x100: estimate_cost_cents_x100(tokens),
            tool_name: tools.first().cloned(),
            source_app: event.source_app.clone(),
        };

        // Durable first; failure here fails the call
        {
            let db = self.db.lock().expect("db lock");
            db.record_agent_metric(&record, &tools, fields.agent_id.as_deref())?;
        }

        // Cache rollups are best-effort from here on
        let mut ops = Vec::new();
        let hour = keys::hourly(&hivetrace_store::hour_key(timestamp));
        let day = keys::daily(&hivetrace_store::day_key(timestamp));
        for (key, field_prefix) in [(hour, &agent_type), (day, &agent_type)] {
            ops.push(
                SyncOperation::new(SyncOpKind::Hincrby, key.clone(), timestamp)
                    .with_field(format!("{}:executions", field_prefix))
                    .with_value("1"),
            );
            if tokens > 0 {
                ops.push(
                    SyncOperation::new(SyncOpKind::Hincrby, key.clone(), timestamp)
                        .with_field(format!("{}:tokens", field_prefix))
                        .with_value(tokens.to_string()),
                );
            }
            if duration_ms > 0 {
                ops.push(
                    SyncOperation::new(SyncOpKind::Hincrby, key.clone(), timestamp)
                        .with_field(format!("{}:duration_ms", field_prefix))
                        .with_value(duration_ms.to_string()),
                );
            }
            if record.cost_cents_x100 > 0 {
                ops.push(
                    SyncOperation::new(SyncOpKind::Hincrby, key, timestamp)
                        .with_field(format!("{}:cost", field_prefix))
                        .with_value(record.cost_cents_x100.to_string()),
                );
            }
        }
        let tools_key = keys::tools(&hivetrace_store::day_key(timestamp));
        for tool in &tools {
            ops.push(
                SyncOperation::new(SyncOpKind::Zincrby, tools_key.clone(), timestamp)
                    .with_value(tool.clone())
                    .with_score(1.0),
            );
        }
        ops.extend(self.invalidation_ops(timestamp));

        self.best_effort(ops).await;
        Ok(())
    }

    /// Stale read-through snapshots for the event's day
    fn invalidation_ops(&self, timestamp: i64) -> Vec<SyncOperation> {
        let day_start = hivetrace_store::day_start(timestamp);
        let day_end = day_start + 86_400_000;
        [
            keys::current_snapshot(day_start, day_end),
            keys::distribution_snapshot(day_start, day_end),
            keys::tools_snapshot(day_start, day_end),
        ]
        .into_iter()
        .map(|key| SyncOperation::new(SyncOpKind::Del, key, timestamp))
        .collect()
    }

    /// Apply cache operations, queueing any that fail for deferred sync.
    async fn best_effort(&self, ops: Vec<SyncOperation>) {
        for op in ops {
            if let Err(e) = self.cache.apply(&op).await {
                debug!(key = %op.key, kind = op.kind.as_str(), error = %e, "cache write deferred");
                let db = self.db.lock().expect("db lock");
                if let Err(e) = db.enqueue_sync_op(&op) {
                    warn!(error = %e, "failed to enqueue deferred cache op");
                }
            }
        }
    }

    /// Insert a new active execution and return its generated agent id.
    pub async fn mark_agent_started(&self, req: AgentStartRequest) -> Result<String> {
        let timestamp = req.timestamp.unwrap_or_else(now_ms);
        let agent_id = generate_agent_id(timestamp);
        let agent_type = req
            .agent_type
            .clone()
            .unwrap_or_else(|| classify_agent_type(&req.agent_name, &req.payload).to_string());

        let exec = AgentExecution {
            agent_id: agent_id.clone(),
            agent_name: req.agent_name.clone(),
            agent_type,
            status: AgentStatus::Active,
            start_time: timestamp,
            end_time: None,
            duration_ms: None,
            session_id: req.session_id.clone(),
            task_description: req.task_description.clone(),
            tools_granted: req.tools_granted.clone(),
            token_usage: TokenUsage::default(),
            performance_metrics: Value::Null,
            source_app: req.source_app.clone(),
            progress: 0,
        };

        {
            let db = self.db.lock().expect("db lock");
            db.insert_agent_execution(&exec)?;
            db.upsert_terminal_status(
                &agent_id,
                &req.agent_name,
                AgentStatus::Active,
                &req.session_id,
                timestamp,
            )?;
            db.bump_session_agent_count(&req.session_id)?;
        }

        let exec_json = serde_json::to_string(&exec).unwrap_or_else(|_| "{}".into());
        let ops = vec![
            SyncOperation::new(SyncOpKind::Hset, keys::active_agent(&agent_id), timestamp)
                .with_field("data")
                .with_value(exec_json),
            SyncOperation::new(SyncOpKind::Expire, keys::active_agent(&agent_id), timestamp)
                .with_ttl(keys::TTL_AGENT_LIVENESS),
            SyncOperation::new(SyncOpKind::Sadd, keys::ACTIVE_AGENTS, timestamp)
                .with_value(agent_id.clone()),
            SyncOperation::new(SyncOpKind::Expire, keys::ACTIVE_AGENTS, timestamp)
                .with_ttl(keys::TTL_AGENT_LIVENESS),
        ];
        self.best_effort(ops).await;

        // Lifecycle contract: every lifecycle operation routes through
        // record_metric (a start is not terminal, so no row comes of it)
        let mut synthetic = HookEvent::new(
            req.source_app,
            req.session_id,
            HookEventType::SubagentStart,
            json!({ "agent_id": agent_id, "agent_name": req.agent_name }),
        );
        synthetic.timestamp = Some(timestamp);
        self.record_metric(&synthetic).await?;

        Ok(agent_id)
    }

    /// Terminalize an execution. Returns true when this call performed the
    /// transition; repeats are no-ops and do not grow aggregates.
    pub async fn mark_agent_completed(&self, req: AgentCompleteRequest) -> Result<bool> {
        let timestamp = req.timestamp.unwrap_or_else(now_ms);

        let exec = self.resolve_execution(&req)?;
        let Some(exec) = exec else {
            if let Some(id) = req.agent_id {
                return Err(Error::UnknownAgent(id));
            }
            // Stop without a tracked start: keep the metric, skip lifecycle
            debug!(session = %req.session_id, "agent completion without tracked execution");
            self.record_metric(&synthetic_stop(&req, timestamp, req.agent_name.clone()))
                .await?;
            return Ok(false);
        };

        let status = if req.success {
            AgentStatus::Complete
        } else {
            AgentStatus::Failed
        };
        let duration_ms = req
            .duration_ms
            .unwrap_or_else(|| (timestamp - exec.start_time).max(0));
        let tokens = req.tokens_used.map(|total| TokenUsage {
            input_tokens: 0,
            output_tokens: total,
            total_tokens: total,
            estimated_cost: estimate_cost_cents_x100(total) as f64 / 10_000.0,
        });

        let transitioned = {
            let db = self.db.lock().expect("db lock");
            let transitioned = db.complete_agent_execution(
                &exec.agent_id,
                status,
                timestamp,
                duration_ms,
                tokens.as_ref(),
                if req.tools_used.is_empty() {
                    None
                } else {
                    Some(&req.tools_used)
                },
            )?;
            if transitioned {
                db.upsert_terminal_status(
                    &exec.agent_id,
                    &exec.agent_name,
                    status,
                    &req.session_id,
                    timestamp,
                )?;
                if let Some(total) = req.tokens_used {
                    db.add_session_tokens(&req.session_id, total)?;
                }
            }
            transitioned
        };

        if !transitioned {
            return Ok(false);
        }

        let ops = vec![
            SyncOperation::new(SyncOpKind::Srem, keys::ACTIVE_AGENTS, timestamp)
                .with_value(exec.agent_id.clone()),
            SyncOperation::new(SyncOpKind::Del, keys::active_agent(&exec.agent_id), timestamp),
        ];
        self.best_effort(ops).await;

        let mut synthetic = synthetic_stop(&req, timestamp, Some(exec.agent_name.clone()));
        synthetic.duration = Some(duration_ms);
        if let Value::Object(map) = &mut synthetic.payload {
            map.insert("agent_id".into(), json!(exec.agent_id));
            map.insert("agent_type".into(), json!(exec.agent_type));
        }
        self.record_metric(&synthetic).await?;

        Ok(true)
    }

    fn resolve_execution(&self, req: &AgentCompleteRequest) -> Result<Option<AgentExecution>> {
        let db = self.db.lock().expect("db lock");
        if let Some(id) = &req.agent_id {
            return Ok(db.get_agent_execution(id)?);
        }
        let Some(name) = &req.agent_name else {
            return Ok(None);
        };
        let found = db
            .active_agent_executions()?
            .into_iter()
            .find(|e| e.session_id == req.session_id && &e.agent_name == name);
        Ok(found)
    }

    /// Cache-first read with TTL write-back on miss.
    async fn read_through<T, F>(&self, key: &str, ttl: u64, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&Database) -> hivetrace_store::Result<T>,
    {
        if self.monitor.is_connected() {
            match self.cache.get(key).await {
                Ok(Some(body)) => {
                    if let Ok(value) = serde_json::from_str(&body) {
                        return Ok(value);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(key, error = %e, "cache read failed, falling back to store");
                    self.monitor.mark_disconnected(&e.to_string());
                }
            }
        }

        let value = {
            let db = self.db.lock().expect("db lock");
            load(&db)?
        };

        if let Ok(body) = serde_json::to_string(&value) {
            if let Err(e) = self.cache.setex(key, &body, ttl).await {
                debug!(key, error = %e, "cache write-back skipped");
            }
        }
        Ok(value)
    }

    pub async fn current_metrics(&self, start: i64, end: i64) -> Result<CurrentMetrics> {
        self.read_through(
            &keys::current_snapshot(start, end),
            keys::TTL_METRICS,
            |db| db.current_metrics(start, end),
        )
        .await
    }

    pub async fn timeline(&self, start: i64, end: i64) -> Result<Vec<TimelineBucket>> {
        self.read_through(
            &keys::timeline_snapshot(start, end),
            keys::TTL_TIMELINE,
            |db| db.metrics_timeline(start, end),
        )
        .await
    }

    pub async fn distribution(&self, start: i64, end: i64) -> Result<Vec<DistributionRow>> {
        self.read_through(
            &keys::distribution_snapshot(start, end),
            keys::TTL_DISTRIBUTION,
            |db| db.type_distribution(start, end),
        )
        .await
    }

    pub async fn tools_usage(&self, start: i64, end: i64) -> Result<Vec<ToolUsageRow>> {
        self.read_through(&keys::tools_snapshot(start, end), keys::TTL_TOOL_USAGE, |db| {
            db.tools_usage(start, end)
        })
        .await
    }

    pub async fn active_agent_count(&self) -> Result<u64> {
        let fallback = {
            let db = Arc::clone(&self.db);
            async move {
                let db = db.lock().expect("db lock");
                db.count_active_agents().map_err(Error::from)
            }
        };
        self.monitor
            .run_with_fallback(
                async { self.cache.scard(keys::ACTIVE_AGENTS).await.map(Ok) },
                fallback,
            )
            .await
    }

    /// Rebuild the cache from the durable store after recovery: re-register
    /// active agents and refresh today's read-through snapshots. Rate
    /// limited to once per five minutes, one warmup at a time, and partial
    /// failures do not abort the rest.
    pub async fn sync_cache_from_database(&self) -> Result<WarmOutcome> {
        {
            let last = self.last_warm.lock().expect("warm lock");
            if let Some(at) = *last {
                if at.elapsed() < self.warm_min_interval {
                    return Ok(WarmOutcome::SkippedRateLimited);
                }
            }
        }
        if self
            .warm_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(WarmOutcome::SkippedInFlight);
        }

        let result = self.warm_inner().await;

        *self.last_warm.lock().expect("warm lock") = Some(Instant::now());
        self.warm_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn warm_inner(&self) -> Result<WarmOutcome> {
        let now = now_ms();
        let active = {
            let db = self.db.lock().expect("db lock");
            db.active_agent_executions()?
        };

        let mut failures = 0usize;
        for exec in &active {
            let body = serde_json::to_string(exec).unwrap_or_else(|_| "{}".into());
            let agent_key = keys::active_agent(&exec.agent_id);
            for op in [
                SyncOperation::new(SyncOpKind::Sadd, keys::ACTIVE_AGENTS, now)
                    .with_value(exec.agent_id.clone()),
                SyncOperation::new(SyncOpKind::Hset, agent_key.clone(), now)
                    .with_field("data")
                    .with_value(body.clone()),
                SyncOperation::new(SyncOpKind::Expire, agent_key, now)
                    .with_ttl(keys::TTL_AGENT_LIVENESS),
            ] {
                if self.cache.apply(&op).await.is_err() {
                    failures += 1;
                }
            }
        }

        // Refresh the day's snapshots; each one is independent
        let day_start = hivetrace_store::day_start(now);
        let day_end = day_start + 86_400_000;
        if let Err(e) = self.current_metrics(day_start, day_end).await {
            warn!(error = %e, "cache warm: current metrics failed");
        }
        if let Err(e) = self.distribution(day_start, day_end).await {
            warn!(error = %e, "cache warm: distribution failed");
        }
        if let Err(e) = self.tools_usage(day_start, day_end).await {
            warn!(error = %e, "cache warm: tool usage failed");
        }

        if failures > 0 {
            debug!(failures, "cache warm finished with partial failures");
        }
        Ok(WarmOutcome::Completed {
            active_agents: active.len(),
        })
    }
}

fn synthetic_stop(req: &AgentCompleteRequest, timestamp: i64, agent_name: Option<String>) -> HookEvent {
    let mut payload = json!({
        "agent_name": agent_name,
        "tokens_used": req.tokens_used,
        "tools_used": req.tools_used,
        "result": req.success,
    });
    if let Some(agent_type) = &req.agent_type {
        payload["agent_type"] = json!(agent_type);
    }
    if !req.success {
        payload["error"] = json!(true);
    }
    let mut event = HookEvent::new(
        req.source_app.clone(),
        req.session_id.clone(),
        HookEventType::SubagentStop,
        payload,
    );
    event.timestamp = Some(timestamp);
    event.duration = req.duration_ms;
    event
}
