// =============================================================================
// CacheStore port — the low-level KV primitive every higher store builds on
// =============================================================================
//
// `BarStore` (src/bar_store.rs) and the push-notification idempotency guard
// (src/push_notifier.rs) are both expressed purely in terms of this trait, so
// they can run against an in-memory fake in tests and a real Redis instance
// in production.
// =============================================================================

pub mod memory_store;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ScannerResult;

pub use memory_store::MemoryCacheStore;
pub use redis_store::RedisCacheStore;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the raw string stored at `key`, if any.
    async fn get(&self, key: &str) -> ScannerResult<Option<String>>;

    /// Store `value` at `key`, optionally expiring it after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ScannerResult<()>;

    /// Set `key` to `value` with `ttl` only if `key` does not already exist.
    /// Returns `true` if the value was set (i.e. this call "won").
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> ScannerResult<bool>;

    async fn delete(&self, key: &str) -> ScannerResult<()>;

    /// Delete every key matching `pattern` (a Redis glob pattern, e.g.
    /// `scanner:bars:*:AAPL`).
    async fn delete_pattern(&self, pattern: &str) -> ScannerResult<u64>;

    /// Push `value` onto the left of the list at `key`, trim it to `max_len`
    /// entries, and refresh its TTL to `ttl`.
    async fn list_push_trim(
        &self,
        key: &str,
        value: &str,
        max_len: i64,
        ttl: Duration,
    ) -> ScannerResult<()>;

    /// Return up to `count` entries from the list at `key`, oldest first.
    async fn list_range(&self, key: &str, count: i64) -> ScannerResult<Vec<String>>;
}
