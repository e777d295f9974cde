// =============================================================================
// BarStore — day-scoped bar buffer + high-of-day cache
// =============================================================================
//
// Bars are kept in a bounded ring per `(trading_day, symbol)` so that a
// symbol's history never leaks across a session boundary. HOD is maintained
// as a small side record rather than recomputed from the whole buffer on
// every tick, with a rebuild path for when the cache entry is missing or
// provably stale (e.g. after a cache flush mid-session).
// =============================================================================

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::cache::CacheStore;
use crate::error::ScannerResult;
use crate::trading_day::trading_day_id;
use crate::types::{Bar, HodState};

/// Maximum bars retained per symbol per day. 180 minutes covers the default
/// `rvol_lookback_minutes` with headroom for the 6-bar minimum window.
const MAX_BARS_PER_DAY: i64 = 400;
const BAR_LIST_TTL_SECS: u64 = 36 * 3600;
const HOD_TTL_SECS: u64 = 36 * 3600;

fn bars_key(day: &str, symbol: &str) -> String {
    format!("scanner:bars:{day}:{}", symbol.to_ascii_uppercase())
}

fn hod_key(day: &str, symbol: &str) -> String {
    format!("scanner:hod:{day}:{}", symbol.to_ascii_uppercase())
}

pub struct BarStore {
    cache: Arc<dyn CacheStore>,
}

impl BarStore {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// Append `bar` to the symbol's ring for the trading day it falls in, and
    /// update (or initialise) that day's HOD record. A bar whose `ts` is not
    /// strictly newer than the entry already at the head (duplicate,
    /// out-of-order, or late replay) is silently dropped rather than
    /// re-inserted, preserving the strictly-decreasing-from-head invariant.
    pub async fn push_bar(&self, symbol: &str, bar: Bar) -> ScannerResult<()> {
        let day = trading_day_id(bar.ts);
        let key = bars_key(&day, symbol);

        if let Some(head) = self.cache.list_range(&key, 1).await?.into_iter().next() {
            if let Ok(head_bar) = serde_json::from_str::<Bar>(&head) {
                if bar.ts <= head_bar.ts {
                    return Ok(());
                }
            }
        }

        let encoded = serde_json::to_string(&bar)
            .map_err(|e| crate::error::ScannerError::Malformed(e.to_string()))?;

        self.cache
            .list_push_trim(
                &key,
                &encoded,
                MAX_BARS_PER_DAY,
                std::time::Duration::from_secs(BAR_LIST_TTL_SECS),
            )
            .await?;

        self.update_hod(symbol, &day, bar).await?;
        Ok(())
    }

    /// Fetch the most recent `minutes` bars for `symbol` on the current
    /// trading day, oldest-first. Malformed entries are skipped rather than
    /// failing the whole read.
    pub async fn fetch_bars(&self, symbol: &str, minutes: i64) -> ScannerResult<Vec<Bar>> {
        let day = trading_day_id(Utc::now());
        self.fetch_bars_for_day(symbol, &day, minutes).await
    }

    pub async fn fetch_bars_for_day(
        &self,
        symbol: &str,
        day: &str,
        minutes: i64,
    ) -> ScannerResult<Vec<Bar>> {
        // Matches the original's "fetch a few extra bars" cushion so the
        // engine's lookback window never runs short by one.
        let raw = self
            .cache
            .list_range(&bars_key(day, symbol), minutes + 6)
            .await?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<Bar>(&entry) {
                Ok(bar) => bars.push(bar),
                Err(e) => warn!(symbol, day, error = %e, "skipping malformed bar entry"),
            }
        }
        Ok(bars)
    }

    /// Fetch today's full buffer (up to `MAX_BARS_PER_DAY`) for `symbol`.
    pub async fn fetch_all_bars(&self, symbol: &str) -> ScannerResult<Vec<Bar>> {
        self.fetch_bars(symbol, MAX_BARS_PER_DAY).await
    }

    pub async fn get_hod(&self, symbol: &str) -> ScannerResult<Option<HodState>> {
        let day = trading_day_id(Utc::now());
        let raw = self.cache.get(&hod_key(&day, symbol)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    async fn update_hod(&self, symbol: &str, day: &str, bar: Bar) -> ScannerResult<()> {
        let key = hod_key(day, symbol);
        let current = self
            .cache
            .get(&key)
            .await?
            .and_then(|s| serde_json::from_str::<HodState>(&s).ok());

        // `prev_hod` is the max high over every bar except the one just
        // pushed, so it always advances to the prior `hod` regardless of
        // whether this bar sets a new high (matches rebuild_hod's
        // from-scratch computation).
        let next = match current {
            Some(existing) => {
                HodState { hod: existing.hod.max(bar.h), prev_hod: Some(existing.hod), ts: bar.ts }
            }
            None => HodState { hod: bar.h, prev_hod: None, ts: bar.ts },
        };

        let encoded = serde_json::to_string(&next)
            .map_err(|e| crate::error::ScannerError::Malformed(e.to_string()))?;
        self.cache
            .set(&key, &encoded, Some(std::time::Duration::from_secs(HOD_TTL_SECS)))
            .await
    }

    /// Recompute HOD from the full day's bar buffer and overwrite the cached
    /// record. Used when the HOD entry is missing (e.g. evicted) but bars
    /// are still present, so a restart or cache hiccup can't silently reset
    /// the day's high.
    pub async fn rebuild_hod(&self, symbol: &str) -> ScannerResult<Option<HodState>> {
        let bars = self.fetch_all_bars(symbol).await?;
        let Some(last) = bars.last() else {
            return Ok(None);
        };
        let day = trading_day_id(last.ts);
        let hod = bars.iter().map(|b| b.h).fold(f64::MIN, f64::max);
        let prev_hod = if bars.len() >= 2 {
            Some(bars[..bars.len() - 1].iter().map(|b| b.h).fold(f64::MIN, f64::max))
        } else {
            None
        };
        let state = HodState { hod, prev_hod, ts: last.ts };
        let encoded = serde_json::to_string(&state)
            .map_err(|e| crate::error::ScannerError::Malformed(e.to_string()))?;
        self.cache
            .set(
                &hod_key(&day, symbol),
                &encoded,
                Some(std::time::Duration::from_secs(HOD_TTL_SECS)),
            )
            .await?;
        Ok(Some(state))
    }

    /// Drop all cached state for `symbol` across every day. Used when a
    /// symbol leaves the universe so stale data can't reappear if it is
    /// re-added later.
    pub async fn delete_symbol(&self, symbol: &str) -> ScannerResult<()> {
        let symbol = symbol.to_ascii_uppercase();
        self.cache
            .delete_pattern(&format!("scanner:bars:*:{symbol}"))
            .await?;
        self.cache
            .delete_pattern(&format!("scanner:hod:*:{symbol}"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;

    fn bar(ts: DateTime<Utc>, h: f64, c: f64, v: f64) -> Bar {
        Bar { ts, o: c, h, l: c, c, v }
    }

    #[tokio::test]
    async fn push_and_fetch_roundtrips_bars_oldest_first() {
        let store = BarStore::new(Arc::new(MemoryCacheStore::new()));
        let base = Utc::now();
        for i in 0..3 {
            let ts = base + chrono::Duration::minutes(i);
            store.push_bar("AAPL", bar(ts, 10.0 + i as f64, 10.0, 100.0)).await.unwrap();
        }
        let bars = store.fetch_bars("AAPL", 10).await.unwrap();
        assert_eq!(bars.len(), 3);
        assert!(bars[0].ts < bars[2].ts);
    }

    #[tokio::test]
    async fn hod_tracks_prev_hod_on_new_high() {
        let store = BarStore::new(Arc::new(MemoryCacheStore::new()));
        let base = Utc::now();
        store.push_bar("AAPL", bar(base, 10.0, 9.5, 100.0)).await.unwrap();
        store.push_bar("AAPL", bar(base + chrono::Duration::minutes(1), 11.0, 10.5, 100.0)).await.unwrap();

        let hod = store.get_hod("AAPL").await.unwrap().unwrap();
        assert_eq!(hod.hod, 11.0);
        assert_eq!(hod.prev_hod, Some(10.0));
    }

    #[tokio::test]
    async fn hod_unchanged_but_prev_hod_advances_when_new_high_not_reached() {
        let store = BarStore::new(Arc::new(MemoryCacheStore::new()));
        let base = Utc::now();
        store.push_bar("AAPL", bar(base, 12.0, 11.5, 100.0)).await.unwrap();
        store.push_bar("AAPL", bar(base + chrono::Duration::minutes(1), 11.0, 10.5, 100.0)).await.unwrap();

        let hod = store.get_hod("AAPL").await.unwrap().unwrap();
        assert_eq!(hod.hod, 12.0);
        assert_eq!(hod.prev_hod, Some(12.0));
    }

    #[tokio::test]
    async fn prev_hod_tracks_max_of_all_but_newest_across_several_pushes() {
        let store = BarStore::new(Arc::new(MemoryCacheStore::new()));
        let base = Utc::now();
        for (i, h) in [10.0, 12.0, 9.0, 11.0].into_iter().enumerate() {
            store
                .push_bar("AAPL", bar(base + chrono::Duration::minutes(i as i64), h, h - 0.5, 100.0))
                .await
                .unwrap();
        }
        let hod = store.get_hod("AAPL").await.unwrap().unwrap();
        assert_eq!(hod.hod, 12.0);
        assert_eq!(hod.prev_hod, Some(12.0));
    }

    #[tokio::test]
    async fn push_bar_drops_bars_not_strictly_newer_than_head() {
        let store = BarStore::new(Arc::new(MemoryCacheStore::new()));
        let base = Utc::now();
        store.push_bar("AAPL", bar(base, 10.0, 9.5, 100.0)).await.unwrap();
        store.push_bar("AAPL", bar(base + chrono::Duration::minutes(2), 11.0, 10.5, 100.0)).await.unwrap();
        // Late bar older than the current head must be dropped, not inserted.
        store.push_bar("AAPL", bar(base + chrono::Duration::minutes(1), 50.0, 49.5, 100.0)).await.unwrap();

        let bars = store.fetch_bars("AAPL", 10).await.unwrap();
        assert_eq!(bars.len(), 2);
        let hod = store.get_hod("AAPL").await.unwrap().unwrap();
        assert_eq!(hod.hod, 11.0);
    }

    #[tokio::test]
    async fn rebuild_hod_recomputes_from_buffer() {
        let store = BarStore::new(Arc::new(MemoryCacheStore::new()));
        let base = Utc::now();
        store.push_bar("AAPL", bar(base, 10.0, 9.5, 100.0)).await.unwrap();
        store.push_bar("AAPL", bar(base + chrono::Duration::minutes(1), 13.0, 12.5, 100.0)).await.unwrap();

        // Simulate a lost HOD record (e.g. cache eviction) without touching bars.
        store.cache.delete(&hod_key(&trading_day_id(base), "AAPL")).await.unwrap();
        assert!(store.get_hod("AAPL").await.unwrap().is_none());

        let rebuilt = store.rebuild_hod("AAPL").await.unwrap().unwrap();
        assert_eq!(rebuilt.hod, 13.0);
        assert_eq!(rebuilt.prev_hod, Some(10.0));
    }

    #[tokio::test]
    async fn delete_symbol_clears_bars_and_hod() {
        let store = BarStore::new(Arc::new(MemoryCacheStore::new()));
        let base = Utc::now();
        store.push_bar("AAPL", bar(base, 10.0, 9.5, 100.0)).await.unwrap();
        store.delete_symbol("AAPL").await.unwrap();
        assert!(store.fetch_bars("AAPL", 10).await.unwrap().is_empty());
        assert!(store.get_hod("AAPL").await.unwrap().is_none());
    }
}
