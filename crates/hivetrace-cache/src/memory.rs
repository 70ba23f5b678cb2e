use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::cache::Cache;
use crate::error::{Error, Result};

#[derive(Default)]
struct MemoryInner {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, Vec<String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    lists: HashMap<String, Vec<String>>,
    ttls: HashMap<String, u64>,
}

/// In-memory `Cache` used by tests and by deployments without a cache URL.
///
/// TTLs are recorded but never enforced; `fail_mode` makes every call return
/// `Unavailable` to simulate an outage.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    fail_mode: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_mode(&self, fail: bool) {
        self.fail_mode.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_mode.load(Ordering::SeqCst) {
            Err(Error::Unavailable("memory cache in fail mode".into()))
        } else {
            Ok(())
        }
    }

    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.inner.lock().expect("cache lock").ttls.get(key).copied()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.inner.lock().expect("cache lock").strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner
            .lock()
            .expect("cache lock")
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        inner.strings.insert(key.to_string(), value.to_string());
        inner.ttls.insert(key.to_string(), ttl_secs);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        inner.strings.remove(key);
        inner.hashes.remove(key);
        inner.sets.remove(key);
        inner.zsets.remove(key);
        inner.lists.remove(key);
        inner.ttls.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.check()?;
        self.inner
            .lock()
            .expect("cache lock")
            .ttls
            .insert(key.to_string(), ttl_secs);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner
            .lock()
            .expect("cache lock")
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .expect("cache lock")
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let next = entry.parse::<i64>().unwrap_or(0) + delta;
        *entry = next.to_string();
        Ok(next)
    }

    async fn hincrbyfloat(&self, key: &str, field: &str, delta: f64) -> Result<f64> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let next = entry.parse::<f64>().unwrap_or(0.0) + delta;
        *entry = next.to_string();
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        let set = inner.sets.entry(key.to_string()).or_default();
        if !set.iter().any(|m| m == member) {
            set.push(member.to_string());
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        if let Some(set) = self
            .inner
            .lock()
            .expect("cache lock")
            .sets
            .get_mut(key)
        {
            set.retain(|m| m != member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .expect("cache lock")
            .sets
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .expect("cache lock")
            .sets
            .get(key)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        let zset = inner.zsets.entry(key.to_string()).or_default();
        match zset.iter_mut().find(|(m, _)| m == member) {
            Some((_, s)) => *s = score,
            None => zset.push((member.to_string(), score)),
        }
        Ok(())
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        let zset = inner.zsets.entry(key.to_string()).or_default();
        match zset.iter_mut().find(|(m, _)| m == member) {
            Some((_, s)) => {
                *s += delta;
                Ok(*s)
            }
            None => {
                zset.push((member.to_string(), delta));
                Ok(delta)
            }
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner
            .lock()
            .expect("cache lock")
            .lists
            .entry(key.to_string())
            .or_default()
            .insert(0, value.to_string());
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().expect("cache lock");
        if let Some(list) = inner.lists.get_mut(key) {
            let len = list.len() as i64;
            let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i.min(len) };
            let start = norm(start) as usize;
            let stop = (norm(stop) + 1).min(len) as usize;
            *list = if start < stop {
                list[start..stop].to_vec()
            } else {
                Vec::new()
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivetrace_types::{SyncOpKind, SyncOperation};

    #[tokio::test]
    async fn fail_mode_turns_every_call_unavailable() {
        let cache = MemoryCache::new();
        cache.set("k", "v").await.unwrap();

        cache.set_fail_mode(true);
        assert!(matches!(
            cache.get("k").await.unwrap_err(),
            Error::Unavailable(_)
        ));

        cache.set_fail_mode(false);
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn apply_dispatches_by_kind() {
        let cache = MemoryCache::new();

        cache
            .apply(&SyncOperation::new(SyncOpKind::Hincrby, "h", 0).with_field("count").with_value("3"))
            .await
            .unwrap();
        cache
            .apply(&SyncOperation::new(SyncOpKind::Hincrby, "h", 0).with_field("count").with_value("2"))
            .await
            .unwrap();
        assert_eq!(cache.hincrby("h", "count", 0).await.unwrap(), 5);

        cache
            .apply(&SyncOperation::new(SyncOpKind::Sadd, "agents", 0).with_value("ag_1"))
            .await
            .unwrap();
        assert_eq!(cache.scard("agents").await.unwrap(), 1);

        cache
            .apply(&SyncOperation::new(SyncOpKind::Setex, "k", 0).with_value("v").with_ttl(60))
            .await
            .unwrap();
        assert_eq!(cache.ttl_of("k"), Some(60));
    }

    #[tokio::test]
    async fn ltrim_keeps_requested_window() {
        let cache = MemoryCache::new();
        for i in 0..5 {
            cache.lpush("l", &i.to_string()).await.unwrap();
        }
        // List is [4,3,2,1,0]; keep first three
        cache.ltrim("l", 0, 2).await.unwrap();
        let inner = cache.inner.lock().unwrap();
        assert_eq!(inner.lists["l"], vec!["4", "3", "2"]);
    }
}
