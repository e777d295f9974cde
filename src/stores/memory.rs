// =============================================================================
// In-memory store fakes — used by engine/fanout/push-notifier unit tests
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{ConfigStore, EventStore, PreferenceStore, UniverseStore, UserDirectory, UserIdentity};
use crate::error::ScannerResult;
use crate::types::{ScannerConfig, TriggerEvent, UniverseSymbol, UserScannerSettings};

#[derive(Default)]
pub struct MemoryConfigStore {
    config: RwLock<Option<ScannerConfig>>,
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self) -> ScannerResult<ScannerConfig> {
        let mut guard = self.config.write();
        Ok(guard.get_or_insert_with(ScannerConfig::default).clone())
    }

    async fn update(&self, config: ScannerConfig) -> ScannerResult<ScannerConfig> {
        *self.config.write() = Some(config.clone());
        Ok(config)
    }
}

#[derive(Default)]
pub struct MemoryUniverseStore {
    symbols: RwLock<HashMap<String, UniverseSymbol>>,
}

#[async_trait]
impl UniverseStore for MemoryUniverseStore {
    async fn list(&self) -> ScannerResult<Vec<UniverseSymbol>> {
        let mut list: Vec<_> = self.symbols.read().values().cloned().collect();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(list)
    }

    async fn list_enabled(&self) -> ScannerResult<Vec<UniverseSymbol>> {
        Ok(self.list().await?.into_iter().filter(|s| s.enabled).collect())
    }

    async fn upsert(&self, symbol: &str, enabled: bool) -> ScannerResult<UniverseSymbol> {
        let symbol_up = symbol.to_ascii_uppercase();
        let mut map = self.symbols.write();
        let entry = map.entry(symbol_up.clone()).or_insert_with(|| UniverseSymbol {
            symbol: symbol_up.clone(),
            enabled,
            created_at: Utc::now(),
        });
        entry.enabled = enabled;
        Ok(entry.clone())
    }

    async fn remove(&self, symbol: &str) -> ScannerResult<()> {
        self.symbols.write().remove(&symbol.to_ascii_uppercase());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<TriggerEvent>>,
    preferences: RwLock<Option<Arc<dyn PreferenceStore>>>,
}

impl MemoryEventStore {
    /// Wire a preference store so `list_for_user` can honour each user's
    /// clear cursor, matching `PgEventStore`'s join against
    /// `user_scanner_settings.cleared_until`. Without this, cleared events
    /// are never filtered out — fine for tests that don't exercise clearing.
    pub fn with_preferences(self, preferences: Arc<dyn PreferenceStore>) -> Self {
        *self.preferences.write() = Some(preferences);
        self
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create(&self, event: TriggerEvent) -> ScannerResult<TriggerEvent> {
        self.events.write().push(event.clone());
        Ok(event)
    }

    async fn list_for_user(
        &self,
        user_id: i64,
        symbol: Option<&str>,
        limit: i64,
    ) -> ScannerResult<Vec<TriggerEvent>> {
        let preferences = self.preferences.read().clone();
        let cleared_until = match preferences {
            Some(prefs) => prefs.get(user_id).await?.cleared_until,
            None => None,
        };

        let events = self.events.read();
        let mut filtered: Vec<_> = events
            .iter()
            .filter(|e| symbol.map(|s| e.symbol.eq_ignore_ascii_case(s)).unwrap_or(true))
            .filter(|e| cleared_until.map(|c| e.triggered_at > c).unwrap_or(true))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        filtered.truncate(limit.max(0) as usize);
        Ok(filtered)
    }

    async fn get(&self, id: Uuid) -> ScannerResult<Option<TriggerEvent>> {
        Ok(self.events.read().iter().find(|e| e.id == id).cloned())
    }

    async fn most_recent_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> ScannerResult<Option<TriggerEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.symbol.eq_ignore_ascii_case(symbol) && e.triggered_at >= cutoff)
            .max_by_key(|e| e.triggered_at)
            .cloned())
    }

    async fn prune_older_than(&self, retention_days: i64) -> ScannerResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.triggered_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
    settings: RwLock<HashMap<i64, UserScannerSettings>>,
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, user_id: i64) -> ScannerResult<UserScannerSettings> {
        let mut map = self.settings.write();
        Ok(map
            .entry(user_id)
            .or_insert_with(|| UserScannerSettings::default_for_user(user_id, Utc::now()))
            .clone())
    }

    async fn update(&self, settings: UserScannerSettings) -> ScannerResult<UserScannerSettings> {
        self.settings.write().insert(settings.user_id, settings.clone());
        Ok(settings)
    }

    async fn clear_until(&self, user_id: i64, until: DateTime<Utc>) -> ScannerResult<()> {
        let mut map = self.settings.write();
        let entry = map
            .entry(user_id)
            .or_insert_with(|| UserScannerSettings::default_for_user(user_id, Utc::now()));
        entry.cleared_until = Some(until);
        Ok(())
    }

    async fn pushover_candidates(&self, triggered_at: DateTime<Utc>) -> ScannerResult<Vec<UserScannerSettings>> {
        Ok(self
            .settings
            .read()
            .values()
            .filter(|s| {
                s.follow_alerts
                    && s.pushover_enabled
                    && !s.pushover_user_key.is_empty()
                    && s.cleared_until.map(|c| c < triggered_at).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn follow_alert_user_ids(&self) -> ScannerResult<Vec<i64>> {
        Ok(self.settings.read().values().filter(|s| s.follow_alerts).map(|s| s.user_id).collect())
    }

    async fn live_feed_user_ids(&self) -> ScannerResult<Vec<i64>> {
        Ok(self.settings.read().values().filter(|s| s.live_feed_enabled).map(|s| s.user_id).collect())
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    tokens: RwLock<HashMap<String, UserIdentity>>,
}

impl MemoryUserDirectory {
    pub fn with_user(self, token: impl Into<String>, identity: UserIdentity) -> Self {
        self.tokens.write().insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn resolve_token(&self, token: &str) -> ScannerResult<Option<UserIdentity>> {
        Ok(self.tokens.read().get(token).cloned())
    }
}
