use serde::{Deserialize, Serialize};

/// Cache mutation kinds the deferred sync queue can replay.
///
/// `set`/`setex`/`hset`/`expire`/`del`/`ltrim` are idempotent under replay;
/// the counter-like kinds are not, so the worker marks a row synced in the
/// same transaction as a successful replay to keep duplicates out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpKind {
    Set,
    Setex,
    Del,
    Hset,
    Hincrby,
    Hincrbyfloat,
    Sadd,
    Srem,
    Zadd,
    Zincrby,
    Expire,
    Lpush,
    Ltrim,
}

impl SyncOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOpKind::Set => "set",
            SyncOpKind::Setex => "setex",
            SyncOpKind::Del => "del",
            SyncOpKind::Hset => "hset",
            SyncOpKind::Hincrby => "hincrby",
            SyncOpKind::Hincrbyfloat => "hincrbyfloat",
            SyncOpKind::Sadd => "sadd",
            SyncOpKind::Srem => "srem",
            SyncOpKind::Zadd => "zadd",
            SyncOpKind::Zincrby => "zincrby",
            SyncOpKind::Expire => "expire",
            SyncOpKind::Lpush => "lpush",
            SyncOpKind::Ltrim => "ltrim",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "set" => Some(SyncOpKind::Set),
            "setex" => Some(SyncOpKind::Setex),
            "del" => Some(SyncOpKind::Del),
            "hset" => Some(SyncOpKind::Hset),
            "hincrby" => Some(SyncOpKind::Hincrby),
            "hincrbyfloat" => Some(SyncOpKind::Hincrbyfloat),
            "sadd" => Some(SyncOpKind::Sadd),
            "srem" => Some(SyncOpKind::Srem),
            "zadd" => Some(SyncOpKind::Zadd),
            "zincrby" => Some(SyncOpKind::Zincrby),
            "expire" => Some(SyncOpKind::Expire),
            "lpush" => Some(SyncOpKind::Lpush),
            "ltrim" => Some(SyncOpKind::Ltrim),
            _ => None,
        }
    }

    /// True when replaying the operation twice leaves the cache in the same
    /// state as replaying it once.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            SyncOpKind::Set
                | SyncOpKind::Setex
                | SyncOpKind::Del
                | SyncOpKind::Hset
                | SyncOpKind::Expire
                | SyncOpKind::Ltrim
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// One pending cache mutation in the durable queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub kind: SyncOpKind,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    pub created_at: i64,
    pub status: SyncStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<i64>,
}

impl SyncOperation {
    pub fn new(kind: SyncOpKind, key: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: None,
            kind,
            key: key.into(),
            value: None,
            field: None,
            score: None,
            ttl_secs: None,
            created_at,
            status: SyncStatus::Pending,
            attempts: 0,
            last_attempt: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            SyncOpKind::Set,
            SyncOpKind::Setex,
            SyncOpKind::Del,
            SyncOpKind::Hset,
            SyncOpKind::Hincrby,
            SyncOpKind::Hincrbyfloat,
            SyncOpKind::Sadd,
            SyncOpKind::Srem,
            SyncOpKind::Zadd,
            SyncOpKind::Zincrby,
            SyncOpKind::Expire,
            SyncOpKind::Lpush,
            SyncOpKind::Ltrim,
        ] {
            assert_eq!(SyncOpKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn counter_kinds_are_not_idempotent() {
        assert!(SyncOpKind::Set.is_idempotent());
        assert!(SyncOpKind::Del.is_idempotent());
        assert!(!SyncOpKind::Hincrby.is_idempotent());
        assert!(!SyncOpKind::Zincrby.is_idempotent());
        assert!(!SyncOpKind::Lpush.is_idempotent());
    }
}
