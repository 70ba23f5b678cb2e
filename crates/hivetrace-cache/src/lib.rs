mod breaker;
mod cache;
mod error;
mod memory;
mod monitor;
mod redis_cache;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use cache::Cache;
pub use error::{Error, Result};
pub use memory::MemoryCache;
pub use monitor::{ConnectionStatus, ConnectivityMonitor, StatusChange};
pub use redis_cache::{RedisCache, RedisCacheConfig};
