// =============================================================================
// Ingestor — universe-aware market-data state machine
// =============================================================================
//
// Owns the lifecycle of the live feed connection: polls the universe store
// for symbol changes, reconnects the feed whenever the desired symbol set
// changes, clears cached bars for symbols that leave the universe, and
// forwards every received bar into the BarStore. Exposes a heartbeat
// timestamp the admin health check reads to detect a silently-stalled feed.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::feed::MarketDataFeed;
use crate::bar_store::BarStore;
use crate::cache::CacheStore;
use crate::config::{AppConfig, DataFeed};
use crate::stores::UniverseStore;

const HEARTBEAT_KEY: &str = "scanner:ingestor:heartbeat";
const HEARTBEAT_TTL_SECS: u64 = 60;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const MAX_RECONNECT_DELAY_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestorState {
    Init,
    Connecting,
    Subscribed,
    Monitoring,
    Reconnecting,
}

pub struct Ingestor {
    feed: Arc<dyn MarketDataFeed>,
    universe: Arc<dyn UniverseStore>,
    bar_store: Arc<BarStore>,
    cache: Arc<dyn CacheStore>,
    data_feed: DataFeed,
    universe_poll_interval_secs: u64,
    reconnect_delay_secs: u64,
    heartbeat_log_interval_secs: u64,

    state: RwLock<IngestorState>,
    last_bar_at: RwLock<Option<DateTime<Utc>>>,
    /// Per-symbol last-accepted bar timestamp, gating out-of-order or
    /// duplicate bars before they ever reach the `BarStore` (§4.3).
    last_seen_ts: RwLock<HashMap<String, DateTime<Utc>>>,
    shutdown: AtomicBool,
}

impl Ingestor {
    pub fn new(
        feed: Arc<dyn MarketDataFeed>,
        universe: Arc<dyn UniverseStore>,
        bar_store: Arc<BarStore>,
        cache: Arc<dyn CacheStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            feed,
            universe,
            bar_store,
            cache,
            data_feed: config.alpaca_data_feed,
            universe_poll_interval_secs: config.universe_poll_interval_secs,
            reconnect_delay_secs: config.reconnect_delay_secs,
            heartbeat_log_interval_secs: config.heartbeat_log_interval_secs,
            state: RwLock::new(IngestorState::Init),
            last_bar_at: RwLock::new(None),
            last_seen_ts: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Write the cache-backed heartbeat key the admin health probe reads to
    /// compute the feed's staleness (`age_seconds`). Best-effort: a cache
    /// hiccup here must never take the ingestor down.
    async fn write_heartbeat(&self, ts: DateTime<Utc>) {
        if let Err(e) = self
            .cache
            .set(
                HEARTBEAT_KEY,
                &ts.to_rfc3339(),
                Some(std::time::Duration::from_secs(HEARTBEAT_TTL_SECS)),
            )
            .await
        {
            warn!(error = %e, "failed to write ingestor heartbeat");
        }
    }

    pub fn state(&self) -> IngestorState {
        *self.state.read()
    }

    pub fn last_bar_at(&self) -> Option<DateTime<Utc>> {
        *self.last_bar_at.read()
    }

    /// `true` if `ts` is strictly newer than the last bar accepted for
    /// `symbol`, and records it as the new watermark. Mirrors the
    /// strictly-decreasing-from-head invariant `BarStore::push_bar` enforces
    /// on read, but rejects stale/duplicate bars before they cost a cache
    /// round trip at all.
    fn accept_and_record(&self, symbol: &str, ts: DateTime<Utc>) -> bool {
        let mut seen = self.last_seen_ts.write();
        match seen.get(symbol) {
            Some(last) if ts <= *last => false,
            _ => {
                seen.insert(symbol.to_string(), ts);
                true
            }
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn set_state(&self, next: IngestorState) {
        *self.state.write() = next;
    }

    async fn enabled_symbols(&self) -> Vec<String> {
        match self.universe.list_enabled().await {
            Ok(list) => list.into_iter().map(|s| s.symbol).collect(),
            Err(e) => {
                warn!(error = %e, "failed to read universe — treating as empty this round");
                Vec::new()
            }
        }
    }

    /// Drive the ingestor forever: poll the universe, (re)connect the feed
    /// whenever the desired symbol set changes, and ingest bars until a
    /// universe change or a stream error forces a reconnect.
    pub async fn run(self: Arc<Self>) {
        let mut current: BTreeSet<String> = BTreeSet::new();
        let mut reconnect_attempts: u32 = 0;

        while !self.shutdown.load(Ordering::Relaxed) {
            self.set_state(IngestorState::Connecting);
            let desired: BTreeSet<String> = self.enabled_symbols().await.into_iter().collect();

            if desired.is_empty() {
                if !current.is_empty() {
                    info!("universe emptied — clearing cached bars for prior symbols");
                    for symbol in &current {
                        if let Err(e) = self.bar_store.delete_symbol(symbol).await {
                            warn!(symbol, error = %e, "failed to clear symbol cache");
                        }
                        self.last_seen_ts.write().remove(symbol);
                    }
                    current.clear();
                }
                self.set_state(IngestorState::Monitoring);
                tokio::time::sleep(std::time::Duration::from_secs(self.universe_poll_interval_secs)).await;
                continue;
            }

            for removed in current.difference(&desired) {
                info!(symbol = %removed, "symbol left universe — clearing cached bars");
                if let Err(e) = self.bar_store.delete_symbol(removed).await {
                    warn!(symbol = %removed, error = %e, "failed to clear symbol cache");
                }
                self.last_seen_ts.write().remove(removed);
            }
            current = desired.clone();

            let symbols: Vec<String> = desired.into_iter().collect();
            let stream_result = self.run_stream_until_universe_change(&symbols).await;
            self.set_state(IngestorState::Reconnecting);
            match stream_result {
                Ok(()) => {
                    // Clean exit (universe change or channel close, not a
                    // stream error) — no need to back off harder.
                    reconnect_attempts = 0;
                    tokio::time::sleep(std::time::Duration::from_secs(self.reconnect_delay_secs)).await;
                }
                Err(e) => {
                    reconnect_attempts += 1;
                    error!(
                        error = %e,
                        attempt = reconnect_attempts,
                        max_attempts = MAX_RECONNECT_ATTEMPTS,
                        "ingestor stream error — reconnecting"
                    );

                    if reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
                        error!(
                            attempts = reconnect_attempts,
                            "reconnect attempts exhausted for this cycle — backing off until the next universe poll"
                        );
                        reconnect_attempts = 0;
                        tokio::time::sleep(std::time::Duration::from_secs(self.universe_poll_interval_secs)).await;
                    } else {
                        let delay_secs = self
                            .reconnect_delay_secs
                            .saturating_mul(1u64 << (reconnect_attempts - 1))
                            .min(MAX_RECONNECT_DELAY_SECS);
                        tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
                    }
                }
            }
        }
    }

    /// Run the feed for `symbols` until it disconnects, errors, or the
    /// universe changes underneath it.
    async fn run_stream_until_universe_change(
        self: &Arc<Self>,
        symbols: &[String],
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(1024);

        let feed = self.feed.clone();
        let feed_symbols = symbols.to_vec();
        let data_feed = self.data_feed;
        let stream_task = tokio::spawn(async move { feed.run(&feed_symbols, data_feed, tx).await });

        self.set_state(IngestorState::Subscribed);

        let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(
            self.heartbeat_log_interval_secs,
        ));
        let mut universe_poll = tokio::time::interval(std::time::Duration::from_secs(
            self.universe_poll_interval_secs,
        ));
        let desired: BTreeSet<String> = symbols.iter().cloned().collect();

        loop {
            tokio::select! {
                maybe_bar = rx.recv() => {
                    match maybe_bar {
                        Some(feed_bar) => {
                            self.set_state(IngestorState::Monitoring);
                            *self.last_bar_at.write() = Some(feed_bar.bar.ts);
                            self.write_heartbeat(feed_bar.bar.ts).await;
                            if !self.accept_and_record(&feed_bar.symbol, feed_bar.bar.ts) {
                                warn!(
                                    symbol = %feed_bar.symbol,
                                    ts = %feed_bar.bar.ts,
                                    "dropping out-of-order or duplicate bar from feed"
                                );
                                continue;
                            }
                            if let Err(e) = self.bar_store.push_bar(&feed_bar.symbol, feed_bar.bar).await {
                                warn!(symbol = %feed_bar.symbol, error = %e, "failed to persist bar");
                            }
                        }
                        None => {
                            // `feed.run` returned and dropped its side of the
                            // channel; check whether that was a clean stop or
                            // a stream error so the caller can back off.
                            match stream_task.await {
                                Ok(Ok(())) => {
                                    info!("feed stream ended cleanly");
                                }
                                Ok(Err(e)) => {
                                    return Err(e.into());
                                }
                                Err(join_err) => {
                                    return Err(anyhow::anyhow!("feed task panicked: {join_err}"));
                                }
                            }
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    info!(
                        symbols = symbols.len(),
                        last_bar_at = ?self.last_bar_at(),
                        "ingestor heartbeat"
                    );
                }
                _ = universe_poll.tick() => {
                    let now_desired: BTreeSet<String> = self.enabled_symbols().await.into_iter().collect();
                    if now_desired != desired {
                        info!("universe changed — restarting feed with new symbol set");
                        stream_task.abort();
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::ScannerResult;
    use crate::market_data::feed::FeedBar;
    use crate::stores::memory::MemoryUniverseStore;
    use crate::stores::UniverseStore;
    use crate::types::Bar;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct OneShotFeed {
        bar: Bar,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataFeed for OneShotFeed {
        async fn run(
            &self,
            symbols: &[String],
            _feed: DataFeed,
            tx: mpsc::Sender<FeedBar>,
        ) -> ScannerResult<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if let Some(symbol) = symbols.first() {
                let _ = tx.send(FeedBar { symbol: symbol.clone(), bar: self.bar }).await;
            }
            Ok(())
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: String::new(),
            redis_url: String::new(),
            alpaca_key_id: String::new(),
            alpaca_secret_key: String::new(),
            alpaca_data_feed: DataFeed::Iex,
            pushover_app_token: String::new(),
            scanner_admin_email: String::new(),
            scanner_admin_token: String::new(),
            bind_addr: String::new(),
            retention_days: 30,
            universe_poll_interval_secs: 3600,
            reconnect_delay_secs: 0,
            heartbeat_log_interval_secs: 3600,
        }
    }

    #[tokio::test]
    async fn ingests_a_bar_and_updates_heartbeat() {
        let now = Utc::now();
        let bar = Bar { ts: now, o: 1.0, h: 1.1, l: 0.9, c: 1.05, v: 100.0 };
        let feed = Arc::new(OneShotFeed { bar, calls: AtomicUsize::new(0) });
        let universe = Arc::new(MemoryUniverseStore::default());
        universe.upsert("AAPL", true).await.unwrap();
        let cache = Arc::new(MemoryCacheStore::new());
        let bar_store = Arc::new(BarStore::new(cache.clone()));

        let ingestor = Arc::new(Ingestor::new(feed, universe, bar_store.clone(), cache.clone(), &test_config()));
        let symbols = vec!["AAPL".to_string()];
        ingestor.run_stream_until_universe_change(&symbols).await.unwrap();

        assert_eq!(ingestor.last_bar_at(), Some(now));
        let stored = bar_store.fetch_bars("AAPL", 10).await.unwrap();
        assert_eq!(stored.len(), 1);

        let heartbeat = cache.get(HEARTBEAT_KEY).await.unwrap();
        assert!(heartbeat.is_some());
    }

    struct FailingFeed;

    #[async_trait]
    impl MarketDataFeed for FailingFeed {
        async fn run(
            &self,
            _symbols: &[String],
            _feed: DataFeed,
            _tx: mpsc::Sender<FeedBar>,
        ) -> ScannerResult<()> {
            Err(crate::error::ScannerError::Transient("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn run_stream_until_universe_change_propagates_feed_error() {
        let universe = Arc::new(MemoryUniverseStore::default());
        universe.upsert("AAPL", true).await.unwrap();
        let cache = Arc::new(MemoryCacheStore::new());
        let bar_store = Arc::new(BarStore::new(cache.clone()));

        let ingestor = Arc::new(Ingestor::new(
            Arc::new(FailingFeed),
            universe,
            bar_store,
            cache,
            &test_config(),
        ));
        let symbols = vec!["AAPL".to_string()];
        let result = ingestor.run_stream_until_universe_change(&symbols).await;
        assert!(result.is_err());
    }

    #[test]
    fn accept_and_record_rejects_duplicate_and_out_of_order_bars_per_symbol() {
        let universe = Arc::new(MemoryUniverseStore::default());
        let cache = Arc::new(MemoryCacheStore::new());
        let bar_store = Arc::new(BarStore::new(cache.clone()));
        let ingestor = Ingestor::new(Arc::new(OneShotFeed {
            bar: Bar { ts: Utc::now(), o: 1.0, h: 1.0, l: 1.0, c: 1.0, v: 1.0 },
            calls: AtomicUsize::new(0),
        }), universe, bar_store, cache, &test_config());

        let base = Utc::now();
        assert!(ingestor.accept_and_record("AAPL", base));
        assert!(!ingestor.accept_and_record("AAPL", base)); // exact duplicate
        assert!(!ingestor.accept_and_record("AAPL", base - chrono::Duration::seconds(1))); // late
        assert!(ingestor.accept_and_record("AAPL", base + chrono::Duration::minutes(1))); // newer

        // A different symbol's watermark is independent.
        assert!(ingestor.accept_and_record("MSFT", base));
    }
}
