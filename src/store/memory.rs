//! In-memory [`KvStore`] used by the test suite.
//!
//! Implements the same primitive contract as the Redis store, including TTL
//! bookkeeping, so analyzer/reporter/index tests exercise the real semantic
//! layer end to end without a running store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::StoreError;

use super::KvStore;

enum Value {
    Str(String),
    Set(BTreeSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| !e.live()).unwrap_or(false) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    /// Force a key to expire immediately (test hook for TTL behavior).
    pub fn force_expire(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Remaining TTL, if the key exists and carries one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|e| e.live())
            .and_then(|e| e.expires_at)
            .map(|t| t.saturating_duration_since(Instant::now()))
    }

    pub fn key_count(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.values().filter(|e| e.live()).count()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.with_live(key, |e| match e.map(|e| &e.value) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| e.live()).unwrap_or(false) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| !e.live()).unwrap_or(false) {
            entries.remove(key);
        }
        let current = match entries.get(key).map(|e| &e.value) {
            Some(Value::Str(s)) => s.parse::<i64>().map_err(|_| StoreError::Malformed {
                key: key.to_string(),
                reason: "not an integer".into(),
            })?,
            _ => 0,
        };
        let next = current + delta;
        let expires_at = entries.get(key).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            if entry.live() {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| !e.live()).unwrap_or(false) {
            entries.remove(key);
        }
        match entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Set(set)) => {
                set.insert(member.to_string());
            }
            _ => {
                let mut set = BTreeSet::new();
                set.insert(member.to_string());
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(set),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn exists_multi(&self, keys: &[String]) -> Result<Vec<bool>, StoreError> {
        Ok(keys
            .iter()
            .map(|k| self.with_live(k, |e| e.is_some()))
            .collect())
    }

    async fn smembers_multi(&self, keys: &[String]) -> Result<Vec<Vec<String>>, StoreError> {
        Ok(keys
            .iter()
            .map(|k| {
                self.with_live(k, |e| match e.map(|e| &e.value) {
                    Some(Value::Set(set)) => set.iter().cloned().collect(),
                    _ => Vec::new(),
                })
            })
            .collect())
    }

    async fn del_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn set_nx_only_first_wins() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_nx_ex("k", "a", ttl).await.unwrap());
        assert!(!store.set_nx_ex("k", "b", ttl).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("a".into()));
    }

    #[tokio::test]
    async fn incr_creates_and_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("n", 3).await.unwrap(), 3);
        assert_eq!(store.incr_by("n", -1).await.unwrap(), 2);
        assert_eq!(store.get("n").await.unwrap(), Some("2".into()));
    }

    #[tokio::test]
    async fn expired_keys_vanish() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".into()));
        store.force_expire("k");
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sets_collect_members() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "b").await.unwrap();
        store.sadd("s", "a").await.unwrap();
        let members = store.smembers_multi(&["s".to_string()]).await.unwrap();
        assert_eq!(members[0], vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn exists_multi_tracks_each_key() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        let flags = store
            .exists_multi(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn del_prefix_sweeps_namespace() {
        let store = MemoryStore::new();
        store.set("mi_f:0:AAAAAA", "1").await.unwrap();
        store.set("mi_f:3:BBBBBB", "1").await.unwrap();
        store.set("lg_f:0:CCCCCC", "1").await.unwrap();
        assert_eq!(store.del_prefix("mi_f:").await.unwrap(), 2);
        assert_eq!(store.key_count(), 1);
    }
}
