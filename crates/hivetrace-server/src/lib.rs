pub mod bus;
pub mod config;
pub mod error;
pub mod ingest;
pub mod routes;
pub mod state;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{info, warn};

use hivetrace_cache::{
    BreakerConfig, Cache, CircuitBreaker, ConnectivityMonitor, MemoryCache, RedisCache,
    RedisCacheConfig,
};
use hivetrace_metrics::MetricsService;
use hivetrace_relations::RelationshipStore;
use hivetrace_store::Database;
use hivetrace_sync::{SyncWorker, SyncWorkerConfig};

use crate::bus::BroadcastBus;
use crate::config::ServerConfig;
use crate::state::{now_ms, AppState};

/// Wire every collaborator once, at startup. Components depend on the
/// `Cache` trait, so a missing or unreachable Redis degrades to an
/// in-process cache instead of changing the pipeline's shape.
pub async fn build_state(config: ServerConfig) -> Result<AppState> {
    let db = Database::open(&config.storage_dir).with_context(|| {
        format!(
            "failed to open storage at {}",
            config.storage_dir.display()
        )
    })?;
    let db = Arc::new(Mutex::new(db));

    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        recovery_timeout: config.breaker_recovery,
        monitoring_window: config.breaker_window,
    }));

    let cache: Arc<dyn Cache> = match &config.cache_url {
        Some(url) => {
            let redis_config = RedisCacheConfig {
                url: url.clone(),
                command_timeout: config.cache_command_timeout,
                connect_timeout: config.cache_connect_timeout,
                ..Default::default()
            };
            match RedisCache::connect(redis_config, breaker.clone()).await {
                Ok(cache) => {
                    info!(url, "connected to redis cache");
                    Arc::new(cache)
                }
                Err(e) => {
                    warn!(url, error = %e, "redis unreachable, using in-process cache");
                    Arc::new(MemoryCache::new())
                }
            }
        }
        None => Arc::new(MemoryCache::new()),
    };

    let monitor = Arc::new(ConnectivityMonitor::new(
        cache.clone(),
        config.cache_ping_interval,
    ));
    monitor.check_now().await;

    let metrics = Arc::new(MetricsService::new(db.clone(), cache.clone(), monitor.clone()));
    let relations = Arc::new(RelationshipStore::new(db.clone()));
    let sync_worker = Arc::new(SyncWorker::new(
        db.clone(),
        cache.clone(),
        monitor.clone(),
        SyncWorkerConfig {
            sync_interval: config.sync_interval,
            batch_size: config.sync_batch_size,
            max_retries: config.sync_max_retries,
            ..Default::default()
        },
    ));
    let bus = Arc::new(BroadcastBus::new(config.broadcast_high_water));
    let (shutdown, _) = tokio::sync::watch::channel(false);

    Ok(AppState {
        db,
        cache,
        breaker,
        monitor,
        metrics,
        relations,
        sync_worker,
        bus,
        config: Arc::new(config),
        shutdown: Arc::new(shutdown),
    })
}

/// Background loops: connectivity pings, deferred-sync drains, cache warm
/// on recovery, and the retention sweep.
pub fn spawn_workers(state: &AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(state.monitor.spawn());
    handles.push(state.sync_worker.clone().spawn());

    // Warm the cache whenever it comes back
    {
        let metrics = state.metrics.clone();
        let mut changes = state.monitor.subscribe();
        handles.push(tokio::spawn(async move {
            while let Ok(change) = changes.recv().await {
                if change.connected {
                    match metrics.sync_cache_from_database().await {
                        Ok(outcome) => info!(?outcome, "cache warm after recovery"),
                        Err(e) => warn!(error = %e, "cache warm after recovery failed"),
                    }
                }
            }
        }));
    }

    // Retention sweep every six hours; under size pressure the cutoff
    // tightens until the file fits again
    {
        let db = state.db.clone();
        let retention_days = state.config.retention_days;
        let max_bytes = state.config.max_db_size_mb * 1_024 * 1_024;
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(6 * 3600));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let report = {
                    let db = db.lock().expect("db lock");
                    let mut report = db.retention_sweep(now_ms(), retention_days);
                    let mut days = retention_days;
                    while report.is_ok()
                        && days > 1
                        && db.size_bytes().map(|s| s > max_bytes).unwrap_or(false)
                    {
                        days /= 2;
                        report = db.retention_sweep(now_ms(), days.max(1));
                    }
                    report
                };
                match report {
                    Ok(report) => info!(
                        events = report.events,
                        metric_records = report.metric_records,
                        handoffs = report.handoff_files,
                        "retention sweep done"
                    ),
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            }
        }));
    }

    handles
}
