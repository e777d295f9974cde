// =============================================================================
// In-memory CacheStore — test double
// =============================================================================

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::CacheStore;
use crate::error::ScannerResult;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// Glob match supporting `*` wildcards at any position, e.g.
/// `scanner:bars:*:AAPL` — the shape Redis' own `KEYS` pattern supports and
/// that `BarStore::delete_symbol` relies on.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return key == pattern;
    }

    let mut idx = 0;
    if !key[idx..].starts_with(parts[0]) {
        return false;
    }
    idx += parts[0].len();

    for mid in &parts[1..parts.len() - 1] {
        match key[idx..].find(mid) {
            Some(pos) => idx += pos + mid.len(),
            None => return false,
        }
    }

    key[idx..].ends_with(parts[parts.len() - 1])
}

/// Thread-safe in-memory stand-in for Redis, used by unit and integration
/// tests so they never need a running server.
#[derive(Default)]
pub struct MemoryCacheStore {
    values: RwLock<HashMap<String, Entry>>,
    lists: RwLock<HashMap<String, VecDeque<String>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        entry.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> ScannerResult<Option<String>> {
        let values = self.values.read();
        Ok(values
            .get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ScannerResult<()> {
        self.values.write().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn add(&self, key: &str, value: &str, ttl: Duration) -> ScannerResult<bool> {
        let mut values = self.values.write();
        if let Some(existing) = values.get(key) {
            if Self::is_live(existing) {
                return Ok(false);
            }
        }
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> ScannerResult<()> {
        self.values.write().remove(key);
        self.lists.write().remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> ScannerResult<u64> {
        let matches = |k: &str| -> bool { glob_match(pattern, k) };
        let mut count = 0;
        {
            let mut values = self.values.write();
            let keys: Vec<String> = values.keys().filter(|k| matches(k)).cloned().collect();
            for k in keys {
                values.remove(&k);
                count += 1;
            }
        }
        {
            let mut lists = self.lists.write();
            let keys: Vec<String> = lists.keys().filter(|k| matches(k)).cloned().collect();
            for k in keys {
                lists.remove(&k);
            }
        }
        Ok(count)
    }

    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
        _ttl: Duration,
    ) -> ScannerResult<()> {
        let mut lists = self.lists.write();
        let deque = lists.entry(key.to_string()).or_default();
        deque.push_front(value.to_string());
        while deque.len() as i64 > max_len {
            deque.pop_back();
        }
        Ok(())
    }

    async fn list_range(&self, key: &str, count: i64) -> ScannerResult<Vec<String>> {
        let lists = self.lists.read();
        let mut entries: Vec<String> = lists
            .get(key)
            .map(|d| d.iter().take(count.max(0) as usize).cloned().collect())
            .unwrap_or_default();
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_only_sets_once() {
        let store = MemoryCacheStore::new();
        assert!(store.add("k", "1", Duration::from_secs(60)).await.unwrap());
        assert!(!store.add("k", "2", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn list_push_trim_keeps_newest_first_internally() {
        let store = MemoryCacheStore::new();
        for v in ["a", "b", "c"] {
            store
                .list_push_trim("l", v, 2, Duration::from_secs(60))
                .await
                .unwrap();
        }
        // Trimmed to 2 entries, oldest-first on read: "b" then "c".
        let range = store.list_range("l", 10).await.unwrap();
        assert_eq!(range, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn delete_pattern_matches_prefix_glob() {
        let store = MemoryCacheStore::new();
        store.set("scanner:bars:2024-01-01:AAPL", "x", None).await.unwrap();
        store.set("scanner:bars:2024-01-01:MSFT", "x", None).await.unwrap();
        store.set("scanner:other", "x", None).await.unwrap();
        let deleted = store.delete_pattern("scanner:bars:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.get("scanner:other").await.unwrap(), Some("x".to_string()));
    }

    #[tokio::test]
    async fn delete_pattern_matches_mid_string_wildcard() {
        let store = MemoryCacheStore::new();
        store.set("scanner:bars:2024-01-01:AAPL", "x", None).await.unwrap();
        store.set("scanner:bars:2024-01-02:AAPL", "x", None).await.unwrap();
        store.set("scanner:bars:2024-01-01:MSFT", "x", None).await.unwrap();
        let deleted = store.delete_pattern("scanner:bars:*:AAPL").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            store.get("scanner:bars:2024-01-01:MSFT").await.unwrap(),
            Some("x".to_string())
        );
    }
}
