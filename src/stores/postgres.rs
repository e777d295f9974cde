// =============================================================================
// Postgres-backed store implementations
// =============================================================================
//
// Mirrors the four Django models the scanner app persisted against:
// ScannerConfig (a singleton row), ScannerUniverseTicker, ScannerTriggerEvent
// and UserScannerSettings. Queries are runtime-checked (`sqlx::query`/
// `query_as`) rather than the `query!` macro, since this crate has no
// `DATABASE_URL` available at build time.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{ConfigStore, EventStore, PreferenceStore, UniverseStore, UserDirectory, UserIdentity};
use crate::error::{ScannerError, ScannerResult};
use crate::types::{ScannerConfig, TriggerEvent, UniverseSymbol, UserScannerSettings};

fn db_err(e: sqlx::Error) -> ScannerError {
    ScannerError::Transient(format!("database error: {e}"))
}

// =============================================================================
// ScannerConfig — singleton row, id = 1
// =============================================================================

#[derive(FromRow)]
struct ConfigRow {
    enabled: bool,
    timeframe: String,
    min_vol_1m: f64,
    rvol_1m_threshold: f64,
    rvol_5m_threshold: f64,
    min_pct_change_1m: f64,
    min_pct_change_5m: f64,
    require_green_candle: bool,
    require_hod_break: bool,
    cooldown_minutes: i64,
    realert_on_new_hod: bool,
    rvol_lookback_minutes: i64,
    updated_at: DateTime<Utc>,
}

impl From<ConfigRow> for ScannerConfig {
    fn from(r: ConfigRow) -> Self {
        Self {
            enabled: r.enabled,
            timeframe: r.timeframe,
            min_vol_1m: r.min_vol_1m,
            rvol_1m_threshold: r.rvol_1m_threshold,
            rvol_5m_threshold: r.rvol_5m_threshold,
            min_pct_change_1m: r.min_pct_change_1m,
            min_pct_change_5m: r.min_pct_change_5m,
            require_green_candle: r.require_green_candle,
            require_hod_break: r.require_hod_break,
            cooldown_minutes: r.cooldown_minutes,
            realert_on_new_hod: r.realert_on_new_hod,
            rvol_lookback_minutes: r.rvol_lookback_minutes,
            updated_at: r.updated_at,
        }
    }
}

pub struct PgConfigStore {
    pool: PgPool,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn get(&self) -> ScannerResult<ScannerConfig> {
        let row = sqlx::query_as::<_, ConfigRow>(
            "INSERT INTO scanner_config (id) VALUES (1)
             ON CONFLICT (id) DO UPDATE SET id = 1
             RETURNING enabled, timeframe, min_vol_1m, rvol_1m_threshold, rvol_5m_threshold,
                       min_pct_change_1m, min_pct_change_5m, require_green_candle,
                       require_hod_break, cooldown_minutes, realert_on_new_hod,
                       rvol_lookback_minutes, updated_at",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn update(&self, config: ScannerConfig) -> ScannerResult<ScannerConfig> {
        let row = sqlx::query_as::<_, ConfigRow>(
            "UPDATE scanner_config SET
                enabled = $1, timeframe = $2, min_vol_1m = $3,
                rvol_1m_threshold = $4, rvol_5m_threshold = $5,
                min_pct_change_1m = $6, min_pct_change_5m = $7,
                require_green_candle = $8, require_hod_break = $9,
                cooldown_minutes = $10, realert_on_new_hod = $11,
                rvol_lookback_minutes = $12, updated_at = now()
             WHERE id = 1
             RETURNING enabled, timeframe, min_vol_1m, rvol_1m_threshold, rvol_5m_threshold,
                       min_pct_change_1m, min_pct_change_5m, require_green_candle,
                       require_hod_break, cooldown_minutes, realert_on_new_hod,
                       rvol_lookback_minutes, updated_at",
        )
        .bind(config.enabled)
        .bind(config.timeframe)
        .bind(config.min_vol_1m)
        .bind(config.rvol_1m_threshold)
        .bind(config.rvol_5m_threshold)
        .bind(config.min_pct_change_1m)
        .bind(config.min_pct_change_5m)
        .bind(config.require_green_candle)
        .bind(config.require_hod_break)
        .bind(config.cooldown_minutes)
        .bind(config.realert_on_new_hod)
        .bind(config.rvol_lookback_minutes)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }
}

// =============================================================================
// ScannerUniverseTicker
// =============================================================================

#[derive(FromRow)]
struct UniverseRow {
    symbol: String,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl From<UniverseRow> for UniverseSymbol {
    fn from(r: UniverseRow) -> Self {
        Self { symbol: r.symbol, enabled: r.enabled, created_at: r.created_at }
    }
}

pub struct PgUniverseStore {
    pool: PgPool,
}

impl PgUniverseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UniverseStore for PgUniverseStore {
    async fn list(&self) -> ScannerResult<Vec<UniverseSymbol>> {
        let rows = sqlx::query_as::<_, UniverseRow>(
            "SELECT symbol, enabled, created_at FROM scanner_universe_ticker ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_enabled(&self) -> ScannerResult<Vec<UniverseSymbol>> {
        let rows = sqlx::query_as::<_, UniverseRow>(
            "SELECT symbol, enabled, created_at FROM scanner_universe_ticker
             WHERE enabled = true ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert(&self, symbol: &str, enabled: bool) -> ScannerResult<UniverseSymbol> {
        let symbol = symbol.to_ascii_uppercase().trim().to_string();
        if symbol.is_empty() {
            return Err(ScannerError::Malformed("symbol must not be empty".into()));
        }
        let row = sqlx::query_as::<_, UniverseRow>(
            "INSERT INTO scanner_universe_ticker (symbol, enabled)
             VALUES ($1, $2)
             ON CONFLICT (symbol) DO UPDATE SET enabled = EXCLUDED.enabled
             RETURNING symbol, enabled, created_at",
        )
        .bind(&symbol)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into())
    }

    async fn remove(&self, symbol: &str) -> ScannerResult<()> {
        sqlx::query("DELETE FROM scanner_universe_ticker WHERE symbol = $1")
            .bind(symbol.to_ascii_uppercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// =============================================================================
// ScannerTriggerEvent
// =============================================================================

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    symbol: String,
    triggered_at: DateTime<Utc>,
    reason_tags: serde_json::Value,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    vol_1m: f64,
    vol_5m: f64,
    avg_vol_1m_lookback: f64,
    rvol_1m: f64,
    rvol_5m: f64,
    pct_change_1m: f64,
    pct_change_5m: f64,
    hod: f64,
    broke_hod: bool,
    score: f64,
    config_snapshot: serde_json::Value,
}

impl TryFrom<EventRow> for TriggerEvent {
    type Error = ScannerError;

    fn try_from(r: EventRow) -> Result<Self, Self::Error> {
        let reason_tags = serde_json::from_value(r.reason_tags)
            .map_err(|e| ScannerError::Malformed(format!("reason_tags: {e}")))?;
        let config_snapshot = serde_json::from_value(r.config_snapshot)
            .map_err(|e| ScannerError::Malformed(format!("config_snapshot: {e}")))?;
        Ok(TriggerEvent {
            id: r.id,
            symbol: r.symbol,
            triggered_at: r.triggered_at,
            reason_tags,
            bar: crate::types::Bar { ts: r.triggered_at, o: r.o, h: r.h, l: r.l, c: r.c, v: r.v },
            metrics: crate::types::Metrics {
                vol_1m: r.vol_1m,
                vol_5m: r.vol_5m,
                avg_vol_1m_lookback: r.avg_vol_1m_lookback,
                rvol_1m: r.rvol_1m,
                rvol_5m: r.rvol_5m,
                pct_change_1m: r.pct_change_1m,
                pct_change_5m: r.pct_change_5m,
                hod: r.hod,
                broke_hod: r.broke_hod,
                score: r.score,
            },
            config_snapshot,
        })
    }
}

const EVENT_COLUMNS: &str = "id, symbol, triggered_at, reason_tags, o, h, l, c, v, vol_1m, vol_5m,
    avg_vol_1m_lookback, rvol_1m, rvol_5m, pct_change_1m, pct_change_5m, hod, broke_hod, score,
    config_snapshot";

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn create(&self, event: TriggerEvent) -> ScannerResult<TriggerEvent> {
        let reason_tags = serde_json::to_value(&event.reason_tags)
            .map_err(|e| ScannerError::Malformed(e.to_string()))?;
        let config_snapshot = serde_json::to_value(&event.config_snapshot)
            .map_err(|e| ScannerError::Malformed(e.to_string()))?;

        let query = format!(
            "INSERT INTO scanner_trigger_event
                (id, symbol, triggered_at, reason_tags, o, h, l, c, v, vol_1m, vol_5m,
                 avg_vol_1m_lookback, rvol_1m, rvol_5m, pct_change_1m, pct_change_5m,
                 hod, broke_hod, score, config_snapshot)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
             RETURNING {EVENT_COLUMNS}"
        );

        let row = sqlx::query_as::<_, EventRow>(&query)
            .bind(event.id)
            .bind(&event.symbol)
            .bind(event.triggered_at)
            .bind(reason_tags)
            .bind(event.bar.o)
            .bind(event.bar.h)
            .bind(event.bar.l)
            .bind(event.bar.c)
            .bind(event.bar.v)
            .bind(event.metrics.vol_1m)
            .bind(event.metrics.vol_5m)
            .bind(event.metrics.avg_vol_1m_lookback)
            .bind(event.metrics.rvol_1m)
            .bind(event.metrics.rvol_5m)
            .bind(event.metrics.pct_change_1m)
            .bind(event.metrics.pct_change_5m)
            .bind(event.metrics.hod)
            .bind(event.metrics.broke_hod)
            .bind(event.metrics.score)
            .bind(config_snapshot)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_into()
    }

    async fn list_for_user(
        &self,
        user_id: i64,
        symbol: Option<&str>,
        limit: i64,
    ) -> ScannerResult<Vec<TriggerEvent>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM scanner_trigger_event e
             WHERE ($1::text IS NULL OR e.symbol = $1)
               AND e.triggered_at > COALESCE(
                   (SELECT cleared_until FROM user_scanner_settings WHERE user_id = $2),
                   'epoch'::timestamptz)
             ORDER BY e.triggered_at DESC
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(symbol.map(|s| s.to_ascii_uppercase()))
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get(&self, id: Uuid) -> ScannerResult<Option<TriggerEvent>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM scanner_trigger_event WHERE id = $1");
        let row = sqlx::query_as::<_, EventRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn most_recent_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> ScannerResult<Option<TriggerEvent>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM scanner_trigger_event
             WHERE symbol = $1 AND triggered_at >= $2
             ORDER BY triggered_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, EventRow>(&query)
            .bind(symbol.to_ascii_uppercase())
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn prune_older_than(&self, retention_days: i64) -> ScannerResult<u64> {
        let result = sqlx::query(
            "DELETE FROM scanner_trigger_event
             WHERE triggered_at < now() - ($1 || ' days')::interval",
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// UserScannerSettings
// =============================================================================

#[derive(FromRow)]
struct SettingsRow {
    user_id: i64,
    follow_alerts: bool,
    live_feed_enabled: bool,
    cleared_until: Option<DateTime<Utc>>,
    pushover_enabled: bool,
    pushover_user_key: String,
    pushover_device: Option<String>,
    pushover_sound: Option<String>,
    pushover_priority: i16,
    notify_min_score: Option<f64>,
    notify_only_hod_break: bool,
    updated_at: DateTime<Utc>,
}

impl From<SettingsRow> for UserScannerSettings {
    fn from(r: SettingsRow) -> Self {
        Self {
            user_id: r.user_id,
            follow_alerts: r.follow_alerts,
            live_feed_enabled: r.live_feed_enabled,
            cleared_until: r.cleared_until,
            pushover_enabled: r.pushover_enabled,
            pushover_user_key: r.pushover_user_key,
            pushover_device: r.pushover_device,
            pushover_sound: r.pushover_sound,
            pushover_priority: r.pushover_priority as i8,
            notify_min_score: r.notify_min_score,
            notify_only_hod_break: r.notify_only_hod_break,
            updated_at: r.updated_at,
        }
    }
}

const SETTINGS_COLUMNS: &str = "user_id, follow_alerts, live_feed_enabled, cleared_until,
    pushover_enabled, pushover_user_key, pushover_device, pushover_sound, pushover_priority,
    notify_min_score, notify_only_hod_break, updated_at";

pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn get(&self, user_id: i64) -> ScannerResult<UserScannerSettings> {
        let query = format!(
            "INSERT INTO user_scanner_settings (user_id) VALUES ($1)
             ON CONFLICT (user_id) DO UPDATE SET user_id = $1
             RETURNING {SETTINGS_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SettingsRow>(&query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.into())
    }

    async fn update(&self, settings: UserScannerSettings) -> ScannerResult<UserScannerSettings> {
        let query = format!(
            "UPDATE user_scanner_settings SET
                follow_alerts = $2, live_feed_enabled = $3, cleared_until = $4,
                pushover_enabled = $5, pushover_user_key = $6, pushover_device = $7,
                pushover_sound = $8, pushover_priority = $9, notify_min_score = $10,
                notify_only_hod_break = $11, updated_at = now()
             WHERE user_id = $1
             RETURNING {SETTINGS_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SettingsRow>(&query)
            .bind(settings.user_id)
            .bind(settings.follow_alerts)
            .bind(settings.live_feed_enabled)
            .bind(settings.cleared_until)
            .bind(settings.pushover_enabled)
            .bind(settings.pushover_user_key)
            .bind(settings.pushover_device)
            .bind(settings.pushover_sound)
            .bind(settings.pushover_priority as i16)
            .bind(settings.notify_min_score)
            .bind(settings.notify_only_hod_break)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.into())
    }

    async fn clear_until(&self, user_id: i64, until: DateTime<Utc>) -> ScannerResult<()> {
        sqlx::query(
            "INSERT INTO user_scanner_settings (user_id, cleared_until) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET cleared_until = $2",
        )
        .bind(user_id)
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn pushover_candidates(&self, triggered_at: DateTime<Utc>) -> ScannerResult<Vec<UserScannerSettings>> {
        let query = format!(
            "SELECT {SETTINGS_COLUMNS} FROM user_scanner_settings
             WHERE follow_alerts = true AND pushover_enabled = true
               AND pushover_user_key <> ''
               AND (cleared_until IS NULL OR cleared_until < $1)"
        );
        let rows = sqlx::query_as::<_, SettingsRow>(&query)
            .bind(triggered_at)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn follow_alert_user_ids(&self) -> ScannerResult<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM user_scanner_settings WHERE follow_alerts = true")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn live_feed_user_ids(&self) -> ScannerResult<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM user_scanner_settings WHERE live_feed_enabled = true")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

// =============================================================================
// UserDirectory — resolves a bearer token to the auth-owning app's user row
// =============================================================================

#[derive(FromRow)]
struct UserIdentityRow {
    user_id: i64,
    email: String,
    is_admin: bool,
}

pub struct PgUserDirectory {
    pool: PgPool,
    admin_email: String,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool, admin_email: String) -> Self {
        Self { pool, admin_email: admin_email.to_ascii_lowercase() }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn resolve_token(&self, token: &str) -> ScannerResult<Option<UserIdentity>> {
        let row = sqlx::query_as::<_, UserIdentityRow>(
            "SELECT u.id AS user_id, u.email, u.is_superuser OR u.is_staff AS is_admin
             FROM auth_token t JOIN auth_user u ON u.id = t.user_id
             WHERE t.key = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| UserIdentity {
            user_id: r.user_id,
            is_admin: r.is_admin || r.email.to_ascii_lowercase() == self.admin_email,
            email: r.email,
        }))
    }
}
