use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::error::Result as CacheResult;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Last observed cache liveness
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub last_check: i64,
    pub last_error: Option<String>,
    pub latency_ms: Option<u64>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            is_connected: false,
            last_check: 0,
            last_error: None,
            latency_ms: None,
        }
    }
}

/// Pushed to subscribers on every connected/disconnected transition
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub connected: bool,
    pub at: i64,
}

/// Watches the cache with a periodic ping plus a capability probe, keeps a
/// `ConnectionStatus`, and fans transitions out to subscribers (the sync
/// worker drains on the disconnected->connected edge).
pub struct ConnectivityMonitor {
    cache: Arc<dyn Cache>,
    status: Mutex<ConnectionStatus>,
    changes: broadcast::Sender<StatusChange>,
    ping_interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(cache: Arc<dyn Cache>, ping_interval: Duration) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            cache,
            status: Mutex::new(ConnectionStatus::default()),
            changes,
            ping_interval,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().expect("status lock").clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.lock().expect("status lock").is_connected
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Ping plus one minimal write of each primitive kind against ephemeral
    /// keys. Returns the new connected state.
    pub async fn check_now(&self) -> bool {
        let started = Instant::now();
        let outcome = self.probe().await;
        let latency = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                self.update(true, None, Some(latency));
                true
            }
            Err(e) => {
                self.update(false, Some(e.to_string()), None);
                false
            }
        }
    }

    async fn probe(&self) -> CacheResult<()> {
        self.cache.ping().await?;

        let key = "hivetrace:probe";
        self.cache.set(key, "1").await?;
        self.cache.expire(key, 60).await?;
        self.cache.hset("hivetrace:probe:h", "f", "1").await?;
        self.cache.sadd("hivetrace:probe:s", "m").await?;
        self.cache.zadd("hivetrace:probe:z", "m", 1.0).await?;
        self.cache.lpush("hivetrace:probe:l", "1").await?;
        self.cache.ltrim("hivetrace:probe:l", 0, 0).await?;

        for k in [key, "hivetrace:probe:h", "hivetrace:probe:s", "hivetrace:probe:z", "hivetrace:probe:l"] {
            self.cache.del(k).await?;
        }
        Ok(())
    }

    /// Record a cache failure observed outside the probe loop.
    pub fn mark_disconnected(&self, error: &str) {
        self.update(false, Some(error.to_string()), None);
    }

    fn update(&self, connected: bool, error: Option<String>, latency_ms: Option<u64>) {
        let transition = {
            let mut status = self.status.lock().expect("status lock");
            let transition = status.is_connected != connected;
            status.is_connected = connected;
            status.last_check = now_ms();
            status.last_error = error;
            status.latency_ms = latency_ms;
            transition
        };

        if transition {
            if connected {
                info!("cache connected");
            } else {
                warn!("cache disconnected");
            }
            let _ = self.changes.send(StatusChange {
                connected,
                at: now_ms(),
            });
        }
    }

    /// Run `primary` against the cache when it is connected, falling back
    /// otherwise. A cache failure inside `primary` flips the status to
    /// disconnected before the fallback runs.
    pub async fn run_with_fallback<T, PF, FF>(&self, primary: PF, fallback: FF) -> T
    where
        PF: Future<Output = CacheResult<T>>,
        FF: Future<Output = T>,
    {
        if self.is_connected() {
            match primary.await {
                Ok(value) => return value,
                Err(e) => {
                    debug!(error = %e, "primary path failed, using fallback");
                    self.mark_disconnected(&e.to_string());
                }
            }
        }
        fallback.await
    }

    /// Background loop checking the cache every `ping_interval`.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                monitor.check_now().await;
                tokio::time::sleep(monitor.ping_interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;

    #[tokio::test]
    async fn check_now_reports_transitions() {
        let cache = Arc::new(MemoryCache::new());
        let monitor = ConnectivityMonitor::new(cache.clone(), Duration::from_secs(60));
        let mut changes = monitor.subscribe();

        assert!(monitor.check_now().await);
        let change = changes.recv().await.unwrap();
        assert!(change.connected);
        assert!(monitor.status().latency_ms.is_some());

        cache.set_fail_mode(true);
        assert!(!monitor.check_now().await);
        let change = changes.recv().await.unwrap();
        assert!(!change.connected);
        assert!(monitor.status().last_error.is_some());

        // No transition, no extra notification
        assert!(!monitor.check_now().await);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_with_fallback_prefers_primary_when_connected() {
        let cache = Arc::new(MemoryCache::new());
        let monitor = ConnectivityMonitor::new(cache.clone(), Duration::from_secs(60));
        monitor.check_now().await;

        let out = monitor
            .run_with_fallback(async { Ok::<_, crate::Error>(1) }, async { 2 })
            .await;
        assert_eq!(out, 1);
    }

    #[tokio::test]
    async fn primary_failure_flips_status_and_falls_back() {
        let cache = Arc::new(MemoryCache::new());
        let monitor = ConnectivityMonitor::new(cache.clone(), Duration::from_secs(60));
        monitor.check_now().await;
        assert!(monitor.is_connected());

        let out = monitor
            .run_with_fallback(
                async { Err::<i32, _>(crate::Error::Unavailable("boom".into())) },
                async { 2 },
            )
            .await;
        assert_eq!(out, 2);
        assert!(!monitor.is_connected());

        // Disconnected: primary is not even tried
        let out = monitor
            .run_with_fallback(async { Ok::<_, crate::Error>(1) }, async { 3 })
            .await;
        assert_eq!(out, 3);
    }
}
