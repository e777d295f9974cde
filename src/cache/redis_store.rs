// =============================================================================
// Redis-backed CacheStore
// =============================================================================

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::warn;

use super::CacheStore;
use crate::error::{ScannerError, ScannerResult};

pub struct RedisCacheStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(redis_url: &str) -> ScannerResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ScannerError::Configuration(format!("invalid REDIS_URL: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| ScannerError::Transient(format!("redis connect failed: {e}")))?;
        Ok(Self { manager })
    }
}

fn transient(e: redis::RedisError) -> ScannerError {
    ScannerError::Transient(format!("redis error: {e}"))
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> ScannerResult<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(transient)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ScannerResult<()> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, secs).await.map_err(transient)
            }
            None => conn.set::<_, _, ()>(key, value).await.map_err(transient),
        }
    }

    async fn add(&self, key: &str, value: &str, ttl: Duration) -> ScannerResult<bool> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1);
        let won: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(secs)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(transient)?
            .is_some();
        Ok(won)
    }

    async fn delete(&self, key: &str) -> ScannerResult<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(transient)
    }

    async fn delete_pattern(&self, pattern: &str) -> ScannerResult<u64> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn.keys(pattern).await.map_err(transient)?;
        if keys.is_empty() {
            return Ok(0);
        }
        conn.del::<_, ()>(&keys).await.map_err(transient)?;
        Ok(keys.len() as u64)
    }

    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
        ttl: Duration,
    ) -> ScannerResult<()> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1) as i64;
        let mut pipe = redis::pipe();
        pipe.lpush(key, value)
            .ignore()
            .ltrim(key, 0, (max_len - 1) as isize)
            .ignore()
            .expire(key, secs)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(|e| {
            warn!(key, error = %e, "redis list_push_trim failed");
            transient(e)
        })
    }

    async fn list_range(&self, key: &str, count: i64) -> ScannerResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let mut entries: Vec<String> = conn
            .lrange(key, 0, (count - 1) as isize)
            .await
            .map_err(transient)?;
        // Stored newest-first (lpush); callers want oldest-first.
        entries.reverse();
        Ok(entries)
    }
}
