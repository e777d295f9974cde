// =============================================================================
// Rate limiter — per-scope, per-user fixed-window request throttling
// =============================================================================
//
// The scanner's REST surface is throttled per §7's three buckets:
// `scanner_triggers` (polling the trigger feed), `scanner_read` (config/
// universe/preferences reads), `scanner_write` (admin config/universe
// mutations). Each (scope, user_id) pair gets its own fixed window, reset by
// a background sweep rather than per-request bookkeeping, generalizing the
// atomic-counter tracker used for the exchange's own API limits.
// =============================================================================

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    ScannerTriggers,
    ScannerRead,
    ScannerWrite,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScannerTriggers => "scanner_triggers",
            Self::ScannerRead => "scanner_read",
            Self::ScannerWrite => "scanner_write",
        }
    }

    /// Requests allowed per window for this scope. Triggers are polled
    /// frequently by live clients; writes are rare, admin-only mutations.
    fn limit(&self) -> u32 {
        match self {
            Self::ScannerTriggers => 120,
            Self::ScannerRead => 120,
            Self::ScannerWrite => 30,
        }
    }

    fn window_secs(&self) -> u64 {
        60
    }
}

struct Bucket {
    count: AtomicU32,
    window_started_at: AtomicU64,
}

impl Bucket {
    fn new(now: u64) -> Self {
        Self { count: AtomicU32::new(0), window_started_at: AtomicU64::new(now) }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Thread-safe fixed-window limiter keyed by `(scope, user_id)`.
#[derive(Default)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<(RateLimitScope, i64), Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the request is allowed, incrementing the bucket as
    /// a side effect. A window that has expired resets transparently rather
    /// than requiring a separate sweep call.
    pub fn check(&self, scope: RateLimitScope, user_id: i64) -> bool {
        let now = now_secs();

        {
            let buckets = self.buckets.read();
            if let Some(bucket) = buckets.get(&(scope, user_id)) {
                let started = bucket.window_started_at.load(Ordering::Relaxed);
                if now.saturating_sub(started) < scope.window_secs() {
                    let count = bucket.count.fetch_add(1, Ordering::Relaxed) + 1;
                    return count <= scope.limit();
                }
            }
        }

        // Either no bucket yet, or its window has expired — (re)create it.
        let mut buckets = self.buckets.write();
        let bucket = buckets.entry((scope, user_id)).or_insert_with(|| Bucket::new(now));
        let started = bucket.window_started_at.load(Ordering::Relaxed);
        if now.saturating_sub(started) >= scope.window_secs() {
            bucket.window_started_at.store(now, Ordering::Relaxed);
            bucket.count.store(0, Ordering::Relaxed);
        }
        let count = bucket.count.fetch_add(1, Ordering::Relaxed) + 1;
        count <= scope.limit()
    }

    /// Drop buckets whose window has long since expired, so idle users don't
    /// accumulate entries forever.
    pub fn sweep(&self) {
        let now = now_secs();
        self.buckets.write().retain(|(scope, _), bucket| {
            now.saturating_sub(bucket.window_started_at.load(Ordering::Relaxed)) < scope.window_secs() * 2
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_under_the_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..30 {
            assert!(limiter.check(RateLimitScope::ScannerWrite, 1));
        }
    }

    #[test]
    fn blocks_requests_over_the_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..30 {
            assert!(limiter.check(RateLimitScope::ScannerWrite, 1));
        }
        assert!(!limiter.check(RateLimitScope::ScannerWrite, 1));
    }

    #[test]
    fn scopes_and_users_are_isolated() {
        let limiter = RateLimiter::new();
        for _ in 0..30 {
            assert!(limiter.check(RateLimitScope::ScannerWrite, 1));
        }
        assert!(limiter.check(RateLimitScope::ScannerWrite, 2));
        assert!(limiter.check(RateLimitScope::ScannerRead, 1));
    }

    #[test]
    fn sweep_drops_long_idle_buckets() {
        let limiter = RateLimiter::new();
        limiter.check(RateLimitScope::ScannerRead, 1);
        // Force the window far enough into the past to be swept.
        {
            let buckets = limiter.buckets.read();
            let bucket = buckets.get(&(RateLimitScope::ScannerRead, 1)).unwrap();
            bucket.window_started_at.store(0, Ordering::Relaxed);
        }
        limiter.sweep();
        assert!(limiter.buckets.read().is_empty());
    }
}
