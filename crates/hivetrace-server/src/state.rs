use std::sync::{Arc, Mutex};

use hivetrace_cache::{Cache, CircuitBreaker, ConnectivityMonitor};
use hivetrace_metrics::MetricsService;
use hivetrace_relations::RelationshipStore;
use hivetrace_store::Database;
use hivetrace_sync::SyncWorker;

use crate::bus::BroadcastBus;
use crate::config::ServerConfig;

/// Everything a request handler can reach. All collaborators are explicit
/// constructed values wired once at startup; nothing is process-global.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub cache: Arc<dyn Cache>,
    pub breaker: Arc<CircuitBreaker>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub metrics: Arc<MetricsService>,
    pub relations: Arc<RelationshipStore>,
    pub sync_worker: Arc<SyncWorker>,
    pub bus: Arc<BroadcastBus>,
    pub config: Arc<ServerConfig>,
    /// Flips to true once on shutdown; stream handlers close their sockets
    pub shutdown: Arc<tokio::sync::watch::Sender<bool>>,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
