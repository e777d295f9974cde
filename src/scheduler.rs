// =============================================================================
// Scheduler — periodic scanner tick and event retention
// =============================================================================
//
// Two cooperating periodic tasks, mirroring the teacher's 5-second strategy
// loop (examples/orc2626-tech-sBot9999/backend/src/main.rs): a 60-second
// scanner tick that drives the engine and fans out any resulting events, and
// a slower retention sweep that prunes events past the configured horizon.
// An `AtomicBool` overlap guard makes the tick loop skip a beat rather than
// run two ticks concurrently if a pass ever takes longer than the interval.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::app_state::AppState;
use crate::stores::PreferenceStore;
use crate::types::TriggerEvent;

const TICK_INTERVAL_SECS: u64 = 60;
const RETENTION_INTERVAL_SECS: u64 = 3600;
const HOT5_TOP_N: usize = 5;

/// Drive the scanner tick forever. Intended to be `tokio::spawn`ed once at
/// startup and left running for the lifetime of the process.
pub async fn run_tick_loop(state: Arc<AppState>) {
    let overlap_guard = Arc::new(AtomicBool::new(false));
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_INTERVAL_SECS));

    loop {
        interval.tick().await;

        if overlap_guard.swap(true, Ordering::SeqCst) {
            warn!("scanner tick still running — skipping this interval");
            continue;
        }

        let state = state.clone();
        let overlap_guard = overlap_guard.clone();
        tokio::spawn(async move {
            run_one_tick(&state).await;
            overlap_guard.store(false, Ordering::SeqCst);
        });
    }
}

async fn run_one_tick(state: &Arc<AppState>) {
    let now = chrono::Utc::now();
    let report = match state.engine.run_once(now).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "scanner tick failed — next tick proceeds from fresh state");
            return;
        }
    };

    for event in &report.events {
        dispatch_event(state, event).await;
    }

    broadcast_hotlist(state, &report.scored).await;
}

/// Fan out one newly created event to every `follow_alerts` user's websocket
/// group, then hand it to the push notifier. Per §4.5: event fan-out and
/// push enqueue happen for every accepted event regardless of whether any
/// user is currently connected.
async fn dispatch_event(state: &Arc<AppState>, event: &TriggerEvent) {
    let follow_user_ids = match followers(state).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "failed to load follower list — event still pushed, not broadcast");
            Vec::new()
        }
    };

    state.fanout.publish_trigger_event(event, &follow_user_ids);
    state.push_notifier.notify(event).await;

    info!(
        symbol = %event.symbol,
        event_id = %event.id,
        followers = follow_user_ids.len(),
        "trigger event dispatched"
    );
}

/// Users eligible for the live websocket trigger feed: any `follow_alerts`
/// user, independent of their pushover gating.
async fn followers(state: &Arc<AppState>) -> crate::error::ScannerResult<Vec<i64>> {
    state.preference_store.follow_alert_user_ids().await
}

/// Build the HOT-5 ranking from this tick's full-universe scored symbols —
/// not from persisted `TriggerEvent`s — so a symbol with a high live score
/// that never cleared the rule gate or is in cooldown still appears, and
/// broadcast it to every `live_feed_enabled` user (§4.4 step 6, independent
/// of whether this tick produced any new events).
async fn broadcast_hotlist(state: &Arc<AppState>, scored: &[crate::engine::ScoredSymbol]) {
    if scored.is_empty() {
        return;
    }

    let live_feed_user_ids = match live_feed_users(state).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "failed to load live-feed users — skipping hotlist broadcast");
            return;
        }
    };
    if live_feed_user_ids.is_empty() {
        return;
    }

    let items = crate::fanout::build_hot5_from_scored(scored, HOT5_TOP_N);
    state.fanout.publish_hotlist(items, &live_feed_user_ids);
}

async fn live_feed_users(state: &Arc<AppState>) -> crate::error::ScannerResult<Vec<i64>> {
    state.preference_store.live_feed_user_ids().await
}

/// Drive the retention sweep forever: delete events older than
/// `retention_days` every hour.
pub async fn run_retention_loop(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(RETENTION_INTERVAL_SECS));
    loop {
        interval.tick().await;
        match state.event_store.prune_older_than(state.config.retention_days).await {
            Ok(pruned) if pruned > 0 => info!(pruned, "retention sweep pruned old events"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }
        state.ws_groups.reap_idle();
        state.rate_limiter.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar_store::BarStore;
    use crate::cache::{CacheStore, MemoryCacheStore};
    use crate::config::{AppConfig, DataFeed};
    use crate::engine::Engine;
    use crate::fanout::Fanout;
    use crate::market_data::feed::{FeedBar, MarketDataFeed};
    use crate::market_data::ingestor::Ingestor;
    use crate::push_notifier::PushNotifier;
    use crate::stores::memory::{
        MemoryConfigStore, MemoryEventStore, MemoryPreferenceStore, MemoryUniverseStore,
        MemoryUserDirectory,
    };
    use crate::stores::{ConfigStore, EventStore, UniverseStore, UserDirectory};
    use crate::types::{Bar, ScannerConfig, UserScannerSettings};
    use crate::ws_groups::WsGroups;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct NullFeed;

    #[async_trait]
    impl MarketDataFeed for NullFeed {
        async fn run(
            &self,
            _symbols: &[String],
            _feed: DataFeed,
            _tx: mpsc::Sender<FeedBar>,
        ) -> crate::error::ScannerResult<()> {
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
            reconnect_delay_secs: 5,
            heartbeat_log_interval_secs: 3600,
        }
    }

    async fn build_state_with_ignition_bars() -> Arc<AppState> {
        let config = test_config();
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let bar_store = Arc::new(BarStore::new(cache.clone()));

        let base = chrono::Utc::now();
        for i in 0..30 {
            let ts = base - chrono::Duration::minutes(30 - i);
            bar_store
                .push_bar("AAPL", Bar { ts, o: 10.0, h: 10.0, l: 10.0, c: 10.0, v: 1000.0 })
                .await
                .unwrap();
        }
        bar_store
            .push_bar(
                "AAPL",
                Bar { ts: base, o: 10.0, h: 10.5, l: 10.0, c: 10.4, v: 20_000.0 },
            )
            .await
            .unwrap();

        let config_store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::default());
        let mut cfg = ScannerConfig::default();
        cfg.enabled = true;
        config_store.update(cfg).await.unwrap();

        let universe_store: Arc<dyn UniverseStore> = Arc::new(MemoryUniverseStore::default());
        universe_store.upsert("AAPL", true).await.unwrap();

        let preference_store: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::default());
        let mut settings = UserScannerSettings::default_for_user(1, base);
        settings.follow_alerts = true;
        settings.live_feed_enabled = true;
        preference_store.update(settings).await.unwrap();

        let event_store: Arc<dyn EventStore> =
            Arc::new(MemoryEventStore::default().with_preferences(preference_store.clone()));
        let user_directory: Arc<dyn UserDirectory> = Arc::new(MemoryUserDirectory::default());

        let engine = Arc::new(Engine::new(
            config_store.clone(),
            universe_store.clone(),
            event_store.clone(),
            bar_store.clone(),
        ));
        let ws_groups = Arc::new(WsGroups::new());
        let fanout = Arc::new(Fanout::new(ws_groups.clone()));
        let push_notifier = Arc::new(PushNotifier::new(
            cache.clone(),
            preference_store.clone(),
            config.pushover_app_token.clone(),
        ));
        let feed: Arc<dyn MarketDataFeed> = Arc::new(NullFeed);
        let ingestor = Arc::new(Ingestor::new(
            feed,
            universe_store.clone(),
            bar_store.clone(),
            cache.clone(),
            &config,
        ));

        Arc::new(AppState::new(
            config,
            config_store,
            universe_store,
            event_store,
            preference_store,
            user_directory,
            cache,
            bar_store,
            engine,
            fanout,
            push_notifier,
            ws_groups,
            ingestor,
        ))
    }

    #[tokio::test]
    async fn one_tick_creates_event_and_broadcasts_to_follower() {
        let state = build_state_with_ignition_bars().await;
        let mut rx = state.ws_groups.subscribe(1);

        run_one_tick(&state).await;

        let stored = state.event_store.list_for_user(1, None, 10).await.unwrap();
        assert_eq!(stored.len(), 1);

        // Should have received both the trigger broadcast and the hotlist.
        let mut saw_trigger = false;
        let mut saw_hot5 = false;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                crate::types::ScannerWsMessage::Trigger(_) => saw_trigger = true,
                crate::types::ScannerWsMessage::Hot5 { .. } => saw_hot5 = true,
                _ => {}
            }
        }
        assert!(saw_trigger);
        assert!(saw_hot5);
    }

    #[tokio::test]
    async fn tick_with_disabled_config_produces_no_events() {
        let state = build_state_with_ignition_bars().await;
        let mut cfg = state.config_store.get().await.unwrap();
        cfg.enabled = false;
        state.config_store.update(cfg).await.unwrap();

        run_one_tick(&state).await;

        let stored = state.event_store.list_for_user(1, None, 10).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn hot5_broadcast_includes_symbols_that_never_triggered() {
        let state = build_state_with_ignition_bars().await;
        // Raise the volume floor so AAPL's bars no longer clear the rule
        // gate, but metrics are still computed every tick.
        let mut cfg = state.config_store.get().await.unwrap();
        cfg.min_vol_1m = 10_000_000.0;
        state.config_store.update(cfg).await.unwrap();

        let mut rx = state.ws_groups.subscribe(1);
        run_one_tick(&state).await;

        let stored = state.event_store.list_for_user(1, None, 10).await.unwrap();
        assert!(stored.is_empty(), "rule gate should have rejected the bar");

        let mut hot5_items = None;
        while let Ok(msg) = rx.try_recv() {
            if let crate::types::ScannerWsMessage::Hot5 { items, .. } = msg {
                hot5_items = Some(items);
            }
        }
        let items = hot5_items.expect("HOT-5 should still broadcast for a non-triggering symbol");
        assert!(items.iter().any(|i| i.symbol == "AAPL"));
    }
}
