use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server knobs. Resolution priority: environment variable, then the
/// optional `hivetrace.toml` in the storage directory, then the contract
/// default.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub storage_dir: PathBuf,
    pub retention_days: u32,
    /// Pressure limit: when the database outgrows this, the sweep tightens
    /// its cutoff until the size is back under
    pub max_db_size_mb: u64,

    /// Redis URL; absent disables the external cache (an in-process one is
    /// used so the metrics pipeline keeps its shape)
    pub cache_url: Option<String>,
    pub cache_command_timeout: Duration,
    pub cache_connect_timeout: Duration,
    pub cache_ping_interval: Duration,

    pub breaker_failure_threshold: u32,
    pub breaker_recovery: Duration,
    pub breaker_window: Duration,

    pub sync_interval: Duration,
    pub sync_batch_size: usize,
    pub sync_max_retries: u32,

    /// Pending messages per subscriber before it is dropped as too slow
    pub broadcast_high_water: usize,
    /// Size of the `initial` window pushed on subscribe
    pub initial_events: usize,
    /// Inbound request deadline; exceeding it answers 504
    pub request_timeout: Duration,
}

/// Optional file overrides, every field absent by default
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<String>,
    retention_days: Option<u32>,
    max_db_size_mb: Option<u64>,
    cache_url: Option<String>,
    cache_command_timeout_ms: Option<u64>,
    cache_connect_timeout_ms: Option<u64>,
    cache_ping_interval_secs: Option<u64>,
    breaker_failure_threshold: Option<u32>,
    breaker_recovery_ms: Option<u64>,
    breaker_window_ms: Option<u64>,
    sync_interval_secs: Option<u64>,
    sync_batch_size: Option<usize>,
    sync_max_retries: Option<u32>,
    broadcast_high_water: Option<usize>,
    initial_events: Option<usize>,
    request_timeout_ms: Option<u64>,
}

impl FileConfig {
    fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let storage_dir = env_string("HIVETRACE_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".hivetrace"));
        let file = FileConfig::load_from(&storage_dir.join("hivetrace.toml"));
        Self::resolve(storage_dir, file)
    }

    fn resolve(storage_dir: PathBuf, file: FileConfig) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: env_string("HIVETRACE_BIND")
                .or(file.bind_addr)
                .unwrap_or(defaults.bind_addr),
            storage_dir,
            retention_days: env_parse("HIVETRACE_RETENTION_DAYS")
                .or(file.retention_days)
                .unwrap_or(defaults.retention_days),
            max_db_size_mb: env_parse("HIVETRACE_MAX_DB_SIZE_MB")
                .or(file.max_db_size_mb)
                .unwrap_or(defaults.max_db_size_mb),

            cache_url: env_string("HIVETRACE_CACHE_URL").or(file.cache_url),
            cache_command_timeout: Duration::from_millis(
                env_parse("HIVETRACE_CACHE_COMMAND_TIMEOUT_MS")
                    .or(file.cache_command_timeout_ms)
                    .unwrap_or(3_000),
            ),
            cache_connect_timeout: Duration::from_millis(
                env_parse("HIVETRACE_CACHE_CONNECT_TIMEOUT_MS")
                    .or(file.cache_connect_timeout_ms)
                    .unwrap_or(5_000),
            ),
            cache_ping_interval: Duration::from_secs(
                env_parse("HIVETRACE_CACHE_PING_INTERVAL_SECS")
                    .or(file.cache_ping_interval_secs)
                    .unwrap_or(60),
            ),

            breaker_failure_threshold: env_parse("HIVETRACE_BREAKER_FAILURE_THRESHOLD")
                .or(file.breaker_failure_threshold)
                .unwrap_or(defaults.breaker_failure_threshold),
            breaker_recovery: Duration::from_millis(
                env_parse("HIVETRACE_BREAKER_RECOVERY_MS")
                    .or(file.breaker_recovery_ms)
                    .unwrap_or(30_000),
            ),
            breaker_window: Duration::from_millis(
                env_parse("HIVETRACE_BREAKER_WINDOW_MS")
                    .or(file.breaker_window_ms)
                    .unwrap_or(60_000),
            ),

            sync_interval: Duration::from_secs(
                env_parse("HIVETRACE_SYNC_INTERVAL_SECS")
                    .or(file.sync_interval_secs)
                    .unwrap_or(30),
            ),
            sync_batch_size: env_parse("HIVETRACE_SYNC_BATCH_SIZE")
                .or(file.sync_batch_size)
                .unwrap_or(defaults.sync_batch_size),
            sync_max_retries: env_parse("HIVETRACE_SYNC_MAX_RETRIES")
                .or(file.sync_max_retries)
                .unwrap_or(defaults.sync_max_retries),

            broadcast_high_water: env_parse("HIVETRACE_BROADCAST_HIGH_WATER")
                .or(file.broadcast_high_water)
                .unwrap_or(defaults.broadcast_high_water),
            initial_events: env_parse("HIVETRACE_INITIAL_EVENTS")
                .or(file.initial_events)
                .unwrap_or(defaults.initial_events),
            request_timeout: Duration::from_millis(
                env_parse("HIVETRACE_REQUEST_TIMEOUT_MS")
                    .or(file.request_timeout_ms)
                    .unwrap_or(30_000),
            ),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4056".to_string(),
            storage_dir: PathBuf::from(".hivetrace"),
            retention_days: 30,
            max_db_size_mb: 1_024,
            cache_url: None,
            cache_command_timeout: Duration::from_secs(3),
            cache_connect_timeout: Duration::from_secs(5),
            cache_ping_interval: Duration::from_secs(60),
            breaker_failure_threshold: 5,
            breaker_recovery: Duration::from_secs(30),
            breaker_window: Duration::from_secs(60),
            sync_interval: Duration::from_secs(30),
            sync_batch_size: 100,
            sync_max_retries: 3,
            broadcast_high_water: 1_024,
            initial_events: 500,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hivetrace.toml");
        std::fs::write(&path, "retention_days = 7\nsync_batch_size = 10\n").unwrap();

        let file = FileConfig::load_from(&path);
        let config = ServerConfig::resolve(dir.path().to_path_buf(), file);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.sync_batch_size, 10);
        // Untouched knobs keep their contract defaults
        assert_eq!(config.broadcast_high_water, 1_024);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileConfig::load_from(&dir.path().join("hivetrace.toml"));
        let config = ServerConfig::resolve(dir.path().to_path_buf(), file);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.initial_events, 500);
    }
}
