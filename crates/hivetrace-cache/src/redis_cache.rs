use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::FromRedisValue;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::cache::Cache;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            command_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(8),
        }
    }
}

/// Redis-backed cache: one managed connection, every command gated by the
/// circuit breaker and bounded by a per-command deadline.
pub struct RedisCache {
    manager: ConnectionManager,
    breaker: Arc<CircuitBreaker>,
    config: RedisCacheConfig,
}

impl RedisCache {
    pub async fn connect(config: RedisCacheConfig, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = timeout(config.connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| Error::Timeout("connect".into()))??;

        Ok(Self {
            manager,
            breaker,
            config,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Exponential backoff with a small jitter so replays across workers
    /// don't land on the same tick.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as u64;
        let cap = self.config.backoff_cap.as_millis() as u64;
        let raw = base.saturating_mul(1u64 << attempt.min(16)).min(cap);
        let jitter = (raw as f64 * 0.1 * rand::random::<f64>()) as u64;
        Duration::from_millis(raw + jitter)
    }

    async fn run<T: FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T> {
        if !self.breaker.allow() {
            return Err(Error::Unavailable("circuit open".into()));
        }

        let mut attempt = 0;
        loop {
            let mut conn = self.manager.clone();
            let outcome = timeout(self.config.command_timeout, cmd.query_async(&mut conn)).await;

            let err = match outcome {
                Ok(Ok(value)) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(e)) => Error::Redis(e),
                Err(_) => Error::Timeout("command deadline exceeded".into()),
            };

            self.breaker.record_failure();
            attempt += 1;
            if attempt >= self.config.max_attempts {
                return Err(err);
            }
            debug!(attempt, error = %err, "cache command failed, retrying");
            tokio::time::sleep(self.backoff(attempt - 1)).await;

            // The breaker may have opened while we were backing off
            if !self.breaker.allow() {
                return Err(Error::Unavailable("circuit open".into()));
            }
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn ping(&self) -> Result<()> {
        self.run::<String>(redis::cmd("PING").to_owned()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(redis::cmd("GET").arg(key).to_owned()).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.run(redis::cmd("SET").arg(key).arg(value).to_owned())
            .await
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.run(
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_secs)
                .arg(value)
                .to_owned(),
        )
        .await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.run::<i64>(redis::cmd("DEL").arg(key).to_owned())
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.run::<i64>(redis::cmd("EXPIRE").arg(key).arg(ttl_secs).to_owned())
            .await?;
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.run::<i64>(
            redis::cmd("HSET")
                .arg(key)
                .arg(field)
                .arg(value)
                .to_owned(),
        )
        .await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.run(redis::cmd("HGETALL").arg(key).to_owned()).await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.run(
            redis::cmd("HINCRBY")
                .arg(key)
                .arg(field)
                .arg(delta)
                .to_owned(),
        )
        .await
    }

    async fn hincrbyfloat(&self, key: &str, field: &str, delta: f64) -> Result<f64> {
        self.run(
            redis::cmd("HINCRBYFLOAT")
                .arg(key)
                .arg(field)
                .arg(delta)
                .to_owned(),
        )
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.run::<i64>(redis::cmd("SADD").arg(key).arg(member).to_owned())
            .await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.run::<i64>(redis::cmd("SREM").arg(key).arg(member).to_owned())
            .await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.run(redis::cmd("SMEMBERS").arg(key).to_owned()).await
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.run(redis::cmd("SCARD").arg(key).to_owned()).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.run::<i64>(
            redis::cmd("ZADD")
                .arg(key)
                .arg(score)
                .arg(member)
                .to_owned(),
        )
        .await?;
        Ok(())
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.run(
            redis::cmd("ZINCRBY")
                .arg(key)
                .arg(delta)
                .arg(member)
                .to_owned(),
        )
        .await
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.run::<i64>(redis::cmd("LPUSH").arg(key).arg(value).to_owned())
            .await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.run::<String>(
            redis::cmd("LTRIM")
                .arg(key)
                .arg(start)
                .arg(stop)
                .to_owned(),
        )
        .await?;
        Ok(())
    }
}
