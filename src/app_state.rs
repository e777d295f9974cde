// =============================================================================
// Central Application State — Ignition Scanner
// =============================================================================
//
// The single source of truth tying every subsystem together: the durable
// store ports, the bar/HOD cache, the scanner engine, fan-out/push delivery,
// per-user websocket groups, the ingestor, and the rate limiter. Handlers and
// background tasks hold `Arc<AppState>` and reach into it rather than
// threading a dozen separate `Arc`s through every function signature.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bar_store::BarStore;
use crate::cache::CacheStore;
use crate::config::AppConfig;
use crate::engine::Engine;
use crate::fanout::Fanout;
use crate::market_data::ingestor::Ingestor;
use crate::push_notifier::PushNotifier;
use crate::rate_limit::RateLimiter;
use crate::stores::{ConfigStore, EventStore, PreferenceStore, UniverseStore, UserDirectory};
use crate::ws_groups::WsGroups;

const HEARTBEAT_KEY: &str = "scanner:ingestor:heartbeat";
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Process-wide state shared across API handlers and background tasks via
/// `Arc<AppState>`.
pub struct AppState {
    pub config: AppConfig,

    pub config_store: Arc<dyn ConfigStore>,
    pub universe_store: Arc<dyn UniverseStore>,
    pub event_store: Arc<dyn EventStore>,
    pub preference_store: Arc<dyn PreferenceStore>,
    pub user_directory: Arc<dyn UserDirectory>,

    pub cache: Arc<dyn CacheStore>,
    pub bar_store: Arc<BarStore>,

    pub engine: Arc<Engine>,
    pub fanout: Arc<Fanout>,
    pub push_notifier: Arc<PushNotifier>,
    pub ws_groups: Arc<WsGroups>,
    pub ingestor: Arc<Ingestor>,

    pub rate_limiter: RateLimiter,

    /// Last time the durable store responded successfully to a probe,
    /// updated by the admin health check.
    pub last_db_ok: RwLock<Option<std::time::Instant>>,
    /// Last time the cache responded successfully to a probe.
    pub last_cache_ok: RwLock<Option<std::time::Instant>>,

    /// Unix seconds of the last websocket-layer probe (subscribe+publish on
    /// a synthetic channel). Negative means "never probed successfully".
    pub last_ws_probe_ok: AtomicI64,

    pub start_time: std::time::Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        config_store: Arc<dyn ConfigStore>,
        universe_store: Arc<dyn UniverseStore>,
        event_store: Arc<dyn EventStore>,
        preference_store: Arc<dyn PreferenceStore>,
        user_directory: Arc<dyn UserDirectory>,
        cache: Arc<dyn CacheStore>,
        bar_store: Arc<BarStore>,
        engine: Arc<Engine>,
        fanout: Arc<Fanout>,
        push_notifier: Arc<PushNotifier>,
        ws_groups: Arc<WsGroups>,
        ingestor: Arc<Ingestor>,
    ) -> Self {
        Self {
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
            rate_limiter: RateLimiter::new(),
            last_db_ok: RwLock::new(None),
            last_cache_ok: RwLock::new(None),
            last_ws_probe_ok: AtomicI64::new(-1),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Exercise the durable store with a cheap read, recording the result
    /// for the admin health probe. Bounded to `PROBE_TIMEOUT` so a wedged
    /// connection pool can't stall the health endpoint.
    pub async fn probe_db(&self) -> bool {
        let ok = tokio::time::timeout(PROBE_TIMEOUT, self.config_store.get())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        if ok {
            *self.last_db_ok.write() = Some(std::time::Instant::now());
        }
        ok
    }

    /// Exercise the cache with a set/get round trip, bounded to `PROBE_TIMEOUT`.
    pub async fn probe_cache(&self) -> bool {
        let key = "scanner:healthcheck:probe";
        let ok = tokio::time::timeout(PROBE_TIMEOUT, async {
            self.cache
                .set(key, "1", Some(std::time::Duration::from_secs(5)))
                .await
                .is_ok()
                && self.cache.get(key).await.ok().flatten().is_some()
        })
        .await
        .unwrap_or(false);
        if ok {
            *self.last_cache_ok.write() = Some(std::time::Instant::now());
        }
        ok
    }

    /// Exercise the websocket-layer group broker: subscribe to a synthetic
    /// channel, then immediately let the subscription drop. A clean
    /// subscribe/discard cycle is enough to prove the broker is alive; no
    /// real client ever joins `i64::MIN`.
    pub fn probe_ws(&self) -> bool {
        const SYNTHETIC_USER_ID: i64 = i64::MIN;
        let _rx = self.ws_groups.subscribe(SYNTHETIC_USER_ID);
        self.ws_groups.reap_idle();
        self.last_ws_probe_ok.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        true
    }

    /// Raw ingestor heartbeat value plus its parsed age, as surfaced by the
    /// admin status endpoint.
    pub async fn ingestor_heartbeat(&self) -> (Option<String>, Option<i64>) {
        let raw = match self.cache.get(HEARTBEAT_KEY).await {
            Ok(v) => v,
            Err(_) => return (None, None),
        };
        let age_seconds = raw.as_deref().and_then(|ts| {
            chrono::DateTime::parse_from_rfc3339(ts)
                .ok()
                .map(|parsed| (chrono::Utc::now() - parsed.with_timezone(&chrono::Utc)).num_seconds())
        });
        (raw, age_seconds)
    }
}
