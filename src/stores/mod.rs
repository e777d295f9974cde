// =============================================================================
// Durable storage ports
// =============================================================================
//
// Narrow repository traits over the relational store, mirroring the four
// Django models the scanner app persists against: ScannerConfig,
// ScannerUniverseTicker, ScannerTriggerEvent and UserScannerSettings. Each
// trait has a Postgres-backed production implementation (stores/postgres.rs)
// and an in-memory fake (stores/memory.rs) used throughout the test suite.
// =============================================================================

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ScannerResult;
use crate::types::{ScannerConfig, TriggerEvent, UniverseSymbol, UserScannerSettings};

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self) -> ScannerResult<ScannerConfig>;
    async fn update(&self, config: ScannerConfig) -> ScannerResult<ScannerConfig>;
}

#[async_trait]
pub trait UniverseStore: Send + Sync {
    async fn list(&self) -> ScannerResult<Vec<UniverseSymbol>>;
    async fn list_enabled(&self) -> ScannerResult<Vec<UniverseSymbol>>;
    async fn upsert(&self, symbol: &str, enabled: bool) -> ScannerResult<UniverseSymbol>;
    async fn remove(&self, symbol: &str) -> ScannerResult<()>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create(&self, event: TriggerEvent) -> ScannerResult<TriggerEvent>;

    /// List events visible to `user_id`, newest first, optionally filtered by
    /// symbol and excluding events the user has cleared.
    async fn list_for_user(
        &self,
        user_id: i64,
        symbol: Option<&str>,
        limit: i64,
    ) -> ScannerResult<Vec<TriggerEvent>>;

    async fn get(&self, id: uuid::Uuid) -> ScannerResult<Option<TriggerEvent>>;

    /// Most recent event for `symbol` at or after `cutoff`, used for the
    /// cooldown gate.
    async fn most_recent_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> ScannerResult<Option<TriggerEvent>>;

    /// Delete events older than `retention_days`. Returns rows removed.
    async fn prune_older_than(&self, retention_days: i64) -> ScannerResult<u64>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user_id: i64) -> ScannerResult<UserScannerSettings>;
    async fn update(&self, settings: UserScannerSettings) -> ScannerResult<UserScannerSettings>;
    async fn clear_until(&self, user_id: i64, until: DateTime<Utc>) -> ScannerResult<()>;

    /// Users eligible for a push notification about `event`: follow_alerts,
    /// pushover_enabled, a non-empty pushover_user_key, and not currently
    /// cleared past the event's trigger time.
    async fn pushover_candidates(&self, triggered_at: DateTime<Utc>) -> ScannerResult<Vec<UserScannerSettings>>;

    /// User ids with `follow_alerts=true`, i.e. eligible for the personal
    /// websocket trigger broadcast (§4.5).
    async fn follow_alert_user_ids(&self) -> ScannerResult<Vec<i64>>;

    /// User ids with `live_feed_enabled=true`, i.e. eligible for the HOT-5
    /// broadcast on every tick (§4.4 step 6).
    async fn live_feed_user_ids(&self) -> ScannerResult<Vec<i64>>;
}

/// A minimal user identity, independent of whatever auth system sits in
/// front of the scanner (matches the original's reliance on Django's user
/// model purely for id/email/admin-flag lookups).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: i64,
    pub email: String,
    pub is_admin: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_token(&self, token: &str) -> ScannerResult<Option<UserIdentity>>;
}
