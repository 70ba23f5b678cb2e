use async_trait::async_trait;

use hivetrace_types::{SyncOpKind, SyncOperation};

use crate::error::{Error, Result};

/// Typed cache operations matching the sync-operation kinds.
///
/// The metrics service and the sync worker depend on this trait rather than
/// the Redis client so tests can substitute an in-memory implementation.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hincrbyfloat(&self, key: &str, field: &str, delta: f64) -> Result<f64>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn scard(&self, key: &str) -> Result<u64>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64>;

    async fn lpush(&self, key: &str, value: &str) -> Result<()>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Replay one queued operation through the matching typed call.
    async fn apply(&self, op: &SyncOperation) -> Result<()> {
        let value = op.value.as_deref();
        let field = op.field.as_deref();

        match op.kind {
            SyncOpKind::Set => self.set(&op.key, required(value, "value")?).await,
            SyncOpKind::Setex => {
                self.setex(
                    &op.key,
                    required(value, "value")?,
                    op.ttl_secs.unwrap_or(0),
                )
                .await
            }
            SyncOpKind::Del => self.del(&op.key).await,
            SyncOpKind::Expire => self.expire(&op.key, op.ttl_secs.unwrap_or(0)).await,
            SyncOpKind::Hset => {
                self.hset(&op.key, required(field, "field")?, required(value, "value")?)
                    .await
            }
            SyncOpKind::Hincrby => {
                let delta = required(value, "value")?.parse::<i64>().unwrap_or(0);
                self.hincrby(&op.key, required(field, "field")?, delta)
                    .await
                    .map(|_| ())
            }
            SyncOpKind::Hincrbyfloat => {
                let delta = required(value, "value")?.parse::<f64>().unwrap_or(0.0);
                self.hincrbyfloat(&op.key, required(field, "field")?, delta)
                    .await
                    .map(|_| ())
            }
            SyncOpKind::Sadd => self.sadd(&op.key, required(value, "value")?).await,
            SyncOpKind::Srem => self.srem(&op.key, required(value, "value")?).await,
            SyncOpKind::Zadd => {
                self.zadd(&op.key, required(value, "value")?, op.score.unwrap_or(0.0))
                    .await
            }
            SyncOpKind::Zincrby => self
                .zincrby(&op.key, required(value, "value")?, op.score.unwrap_or(1.0))
                .await
                .map(|_| ()),
            SyncOpKind::Lpush => self.lpush(&op.key, required(value, "value")?).await,
            SyncOpKind::Ltrim => {
                let (start, stop) = value
                    .and_then(|v| v.split_once(':'))
                    .map(|(a, b)| (a.parse().unwrap_or(0), b.parse().unwrap_or(-1)))
                    .unwrap_or((0, -1));
                self.ltrim(&op.key, start, stop).await
            }
        }
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.ok_or_else(|| Error::Unavailable(format!("sync op missing {}", name)))
}
