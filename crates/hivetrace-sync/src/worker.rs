use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use hivetrace_cache::{Cache, ConnectivityMonitor};
use hivetrace_store::Database;
use hivetrace_types::SyncStatus;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct SyncWorkerConfig {
    /// Cadence of the periodic drain while the cache is healthy
    pub sync_interval: Duration,
    /// Rows pulled per batch, oldest first
    pub batch_size: usize,
    /// Attempts before a row is marked failed
    pub max_retries: u32,
    /// Pause between a connected transition and the immediate drain
    pub settle_delay: Duration,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            batch_size: 100,
            max_retries: 3,
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// What one batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub replayed: usize,
    pub failed_attempts: usize,
    pub exhausted: usize,
    pub skipped: usize,
    /// True when the batch stopped early because more than half its
    /// attempts failed
    pub aborted_early: bool,
}

// NOTE: Ordering and idempotence
//
// Rows are pulled in created order, which gives per-key FIFO for free as
// long as a failed key blocks its later rows in the same batch (the
// `blocked` set below). Marking a row synced happens in the same store call
// that records the attempt, so a replayed counter increments at most once
// per successful Redis ACK; a crash between the ACK and the mark can replay
// one increment, which the design accepts.

/// Replays queued cache mutations once the cache is reachable again.
pub struct SyncWorker {
    db: Arc<Mutex<Database>>,
    cache: Arc<dyn Cache>,
    monitor: Arc<ConnectivityMonitor>,
    config: SyncWorkerConfig,
}

impl SyncWorker {
    pub fn new(
        db: Arc<Mutex<Database>>,
        cache: Arc<dyn Cache>,
        monitor: Arc<ConnectivityMonitor>,
        config: SyncWorkerConfig,
    ) -> Self {
        Self {
            db,
            cache,
            monitor,
            config,
        }
    }

    /// Replay one batch of pending operations. Returns what happened; a
    /// `None`-like empty outcome means the queue was empty.
    pub async fn drain_batch(&self) -> BatchOutcome {
        let ops = {
            let db = self.db.lock().expect("db lock");
            match db.pending_sync_ops(self.config.batch_size) {
                Ok(ops) => ops,
                Err(e) => {
                    warn!(error = %e, "failed to read pending sync ops");
                    return BatchOutcome::default();
                }
            }
        };
        if ops.is_empty() {
            return BatchOutcome::default();
        }

        let mut outcome = BatchOutcome::default();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut attempted = 0usize;

        for op in &ops {
            // A failed key blocks its later rows to preserve per-key FIFO
            if blocked.contains(&op.key) {
                outcome.skipped += 1;
                continue;
            }

            let id = op.id.expect("queued op has id");
            attempted += 1;

            match self.cache.apply(op).await {
                Ok(()) => {
                    let db = self.db.lock().expect("db lock");
                    if let Err(e) = db.mark_sync_op_synced(id, now_ms()) {
                        warn!(id, error = %e, "replayed op could not be marked synced");
                    }
                    outcome.replayed += 1;
                }
                Err(e) => {
                    debug!(id, key = %op.key, error = %e, "sync replay failed");
                    blocked.insert(op.key.clone());
                    outcome.failed_attempts += 1;

                    let status = {
                        let db = self.db.lock().expect("db lock");
                        db.mark_sync_op_failed_attempt(id, now_ms(), self.config.max_retries)
                    };
                    if matches!(status, Ok(SyncStatus::Failed)) {
                        outcome.exhausted += 1;
                    }

                    if outcome.failed_attempts * 2 > attempted {
                        outcome.aborted_early = true;
                        break;
                    }
                }
            }
        }

        if outcome.replayed > 0 || outcome.failed_attempts > 0 {
            info!(
                replayed = outcome.replayed,
                failed = outcome.failed_attempts,
                exhausted = outcome.exhausted,
                aborted = outcome.aborted_early,
                "sync batch finished"
            );
        }
        outcome
    }

    /// Drain batches until the queue stops making progress.
    pub async fn drain_all(&self) -> BatchOutcome {
        let mut total = BatchOutcome::default();
        loop {
            let batch = self.drain_batch().await;
            let progressed = batch.replayed > 0;
            total.replayed += batch.replayed;
            total.failed_attempts += batch.failed_attempts;
            total.exhausted += batch.exhausted;
            total.skipped += batch.skipped;
            total.aborted_early |= batch.aborted_early;

            if batch.aborted_early || !progressed {
                break;
            }
        }
        total
    }

    /// Worker loop: periodic drain while connected, plus an immediate drain
    /// (after a settle delay) on every disconnected->connected transition.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut changes = self.monitor.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.sync_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if self.monitor.is_connected() {
                            self.drain_all().await;
                        }
                    }
                    change = changes.recv() => {
                        match change {
                            Ok(change) if change.connected => {
                                tokio::time::sleep(self.config.settle_delay).await;
                                info!("cache recovered, draining sync queue");
                                self.drain_all().await;
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(n)) => {
                                warn!(missed = n, "sync worker lagged on status changes");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivetrace_cache::MemoryCache;
    use hivetrace_types::{SyncOpKind, SyncOperation};

    fn setup() -> (Arc<Mutex<Database>>, Arc<MemoryCache>, SyncWorker) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let cache = Arc::new(MemoryCache::new());
        let monitor = Arc::new(ConnectivityMonitor::new(
            cache.clone(),
            Duration::from_secs(60),
        ));
        let worker = SyncWorker::new(
            db.clone(),
            cache.clone(),
            monitor,
            SyncWorkerConfig::default(),
        );
        (db, cache, worker)
    }

    fn enqueue(db: &Arc<Mutex<Database>>, kind: SyncOpKind, key: &str, value: &str, created_at: i64) {
        let op = SyncOperation::new(kind, key, created_at).with_value(value);
        db.lock().unwrap().enqueue_sync_op(&op).unwrap();
    }

    #[tokio::test]
    async fn sync_marks_rows_synced_after_replay() {
        let (db, cache, worker) = setup();
        enqueue(&db, SyncOpKind::Set, "a", "1", 1000);
        enqueue(&db, SyncOpKind::Sadd, "agents:active", "ag_1", 2000);

        let outcome = worker.drain_batch().await;
        assert_eq!(outcome.replayed, 2);
        assert_eq!(outcome.failed_attempts, 0);

        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(cache.scard("agents:active").await.unwrap(), 1);

        let stats = db.lock().unwrap().sync_queue_stats().unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.synced, 2);
    }

    #[tokio::test]
    async fn outage_exhausts_rows_into_failed() {
        let (db, cache, worker) = setup();
        cache.set_fail_mode(true);
        enqueue(&db, SyncOpKind::Hincrby, "h", "1", 1000);

        for _ in 0..3 {
            worker.drain_batch().await;
        }

        let stats = db.lock().unwrap().sync_queue_stats().unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn failed_key_blocks_later_rows_in_batch() {
        let (db, cache, worker) = setup();

        // Counter ops on the same key must stay FIFO
        enqueue(&db, SyncOpKind::Set, "k", "first", 1000);
        enqueue(&db, SyncOpKind::Set, "other", "x", 1500);
        enqueue(&db, SyncOpKind::Set, "k", "second", 2000);

        cache.set_fail_mode(true);
        let outcome = worker.drain_batch().await;
        // First row fails (ratio 100%), batch aborts; nothing applied out
        // of order
        assert!(outcome.aborted_early);
        assert_eq!(outcome.replayed, 0);

        cache.set_fail_mode(false);
        let outcome = worker.drain_all().await;
        assert_eq!(outcome.replayed, 3);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn batch_aborts_past_half_errors() {
        let (db, cache, worker) = setup();
        for i in 0..10 {
            enqueue(&db, SyncOpKind::Set, &format!("k{}", i), "v", 1000 + i);
        }
        cache.set_fail_mode(true);

        let outcome = worker.drain_batch().await;
        assert!(outcome.aborted_early);
        // Early abort leaves most of the batch untouched
        assert!(outcome.failed_attempts < 10);

        let stats = db.lock().unwrap().sync_queue_stats().unwrap();
        assert!(stats.pending > 0);
    }
}
