// =============================================================================
// Shared domain types — Ignition Scanner
// =============================================================================
//
// Explicit, versioned DTOs for every wire/storage shape the scanner touches.
// Storage types (Redis records, Postgres rows) are converted into these at
// the boundary; nothing upstream of a store/cache module should ever see a
// raw JSON value or SQL row.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Bars & intraday state
// =============================================================================

/// A single immutable 1-minute OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

/// High-of-day bookkeeping for a `(trading_day, symbol)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HodState {
    pub hod: f64,
    pub prev_hod: Option<f64>,
    pub ts: DateTime<Utc>,
}

// =============================================================================
// Config & universe
// =============================================================================

fn default_timeframe() -> String {
    "1m".to_string()
}

/// Singleton scanner configuration. Mutated only by admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub enabled: bool,

    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    pub min_vol_1m: f64,
    pub rvol_1m_threshold: f64,
    pub rvol_5m_threshold: f64,

    pub min_pct_change_1m: f64,
    pub min_pct_change_5m: f64,
    pub require_green_candle: bool,
    pub require_hod_break: bool,

    pub cooldown_minutes: i64,
    pub realert_on_new_hod: bool,

    pub rvol_lookback_minutes: i64,

    pub updated_at: DateTime<Utc>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeframe: default_timeframe(),
            min_vol_1m: 50_000.0,
            rvol_1m_threshold: 4.0,
            rvol_5m_threshold: 2.5,
            min_pct_change_1m: 0.8,
            min_pct_change_5m: 2.0,
            require_green_candle: false,
            require_hod_break: false,
            cooldown_minutes: 15,
            realert_on_new_hod: true,
            rvol_lookback_minutes: 180,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A symbol in the curated universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSymbol {
    pub symbol: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Trigger events
// =============================================================================

/// Subset of threshold-crossing / informational tags a fired event may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonTag {
    #[serde(rename = "RVOL_1M_THR")]
    Rvol1mThreshold,
    #[serde(rename = "RVOL_5M_THR")]
    Rvol5mThreshold,
    #[serde(rename = "PCT_1M_THR")]
    Pct1mThreshold,
    #[serde(rename = "PCT_5M_THR")]
    Pct5mThreshold,
    #[serde(rename = "HOD_BREAK")]
    HodBreak,
    #[serde(rename = "RVOL_1M")]
    Rvol1m,
    #[serde(rename = "RVOL_5M")]
    Rvol5m,
    #[serde(rename = "UP_1M")]
    Up1m,
}

impl std::fmt::Display for ReasonTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rvol1mThreshold => "RVOL_1M_THR",
            Self::Rvol5mThreshold => "RVOL_5M_THR",
            Self::Pct1mThreshold => "PCT_1M_THR",
            Self::Pct5mThreshold => "PCT_5M_THR",
            Self::HodBreak => "HOD_BREAK",
            Self::Rvol1m => "RVOL_1M",
            Self::Rvol5m => "RVOL_5M",
            Self::Up1m => "UP_1M",
        };
        write!(f, "{s}")
    }
}

/// Computed metrics for one symbol at one tick. Not persisted on their own;
/// folded into a `TriggerEvent` when the rule gate passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub vol_1m: f64,
    pub vol_5m: f64,
    pub avg_vol_1m_lookback: f64,
    pub rvol_1m: f64,
    pub rvol_5m: f64,
    pub pct_change_1m: f64,
    pub pct_change_5m: f64,
    pub hod: f64,
    pub broke_hod: bool,
    pub score: f64,
}

/// A durable, append-only trigger event. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: Uuid,
    pub symbol: String,
    pub triggered_at: DateTime<Utc>,
    pub reason_tags: Vec<ReasonTag>,

    pub bar: Bar,
    pub metrics: Metrics,

    pub config_snapshot: ScannerConfig,
}

// =============================================================================
// Per-user settings
// =============================================================================

/// Per-user scanner + push-notification preferences. Owner-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserScannerSettings {
    pub user_id: i64,

    pub follow_alerts: bool,
    pub live_feed_enabled: bool,
    pub cleared_until: Option<DateTime<Utc>>,

    pub pushover_enabled: bool,
    pub pushover_user_key: String,
    pub pushover_device: Option<String>,
    pub pushover_sound: Option<String>,
    pub pushover_priority: i8,

    pub notify_min_score: Option<f64>,
    pub notify_only_hod_break: bool,

    pub updated_at: DateTime<Utc>,
}

impl UserScannerSettings {
    pub fn default_for_user(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            follow_alerts: true,
            live_feed_enabled: true,
            cleared_until: None,
            pushover_enabled: false,
            pushover_user_key: String::new(),
            pushover_device: None,
            pushover_sound: None,
            pushover_priority: 0,
            notify_min_score: None,
            notify_only_hod_break: false,
            updated_at: now,
        }
    }
}

// =============================================================================
// WebSocket envelopes (src/api/ws.rs, src/fanout.rs)
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ScannerWsMessage {
    #[serde(rename = "hello")]
    Hello { user_id: i64 },
    #[serde(rename = "trigger")]
    Trigger(Box<TriggerEventWire>),
    #[serde(rename = "hot5")]
    Hot5 { ts: i64, items: Vec<Hot5Item> },
}

/// `TriggerEvent` flattened for the wire, with the `ts` envelope field every
/// broadcast payload carries alongside its durable fields.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerEventWire {
    pub ts: i64,
    pub id: Uuid,
    pub symbol: String,
    pub triggered_at: DateTime<Utc>,
    pub reason_tags: Vec<ReasonTag>,
    pub bar: Bar,
    pub metrics: Metrics,
    pub config_snapshot: ScannerConfig,
}

impl From<&TriggerEvent> for TriggerEventWire {
    fn from(ev: &TriggerEvent) -> Self {
        Self {
            ts: Utc::now().timestamp(),
            id: ev.id,
            symbol: ev.symbol.clone(),
            triggered_at: ev.triggered_at,
            reason_tags: ev.reason_tags.clone(),
            bar: ev.bar,
            metrics: ev.metrics,
            config_snapshot: ev.config_snapshot.clone(),
        }
    }
}

/// One ranked row of the HOT-5 broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct Hot5Item {
    pub symbol: String,
    pub score: f64,
    pub last_price: f64,
    pub pct_change_1m: f64,
    pub pct_change_5m: f64,
    pub rvol_1m: f64,
    pub rvol_5m: f64,
    pub vol_1m: f64,
    pub vol_5m: f64,
    pub hod: f64,
    pub hod_distance_pct: f64,
    pub broke_hod: bool,
    pub bar_ts: DateTime<Utc>,
    pub reason_tags: Vec<ReasonTag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tag_display_matches_wire_name() {
        assert_eq!(ReasonTag::HodBreak.to_string(), "HOD_BREAK");
        assert_eq!(ReasonTag::Rvol1mThreshold.to_string(), "RVOL_1M_THR");
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = ScannerConfig::default();
        assert!(!cfg.enabled);
        assert_eq!(cfg.timeframe, "1m");
        assert_eq!(cfg.cooldown_minutes, 15);
        assert!(cfg.realert_on_new_hod);
    }

    #[test]
    fn trigger_event_wire_copies_fields() {
        let now = Utc::now();
        let ev = TriggerEvent {
            id: Uuid::new_v4(),
            symbol: "ABC".into(),
            triggered_at: now,
            reason_tags: vec![ReasonTag::HodBreak],
            bar: Bar { ts: now, o: 1.0, h: 1.1, l: 0.9, c: 1.05, v: 100.0 },
            metrics: Metrics {
                vol_1m: 100.0,
                vol_5m: 500.0,
                avg_vol_1m_lookback: 50.0,
                rvol_1m: 2.0,
                rvol_5m: 2.0,
                pct_change_1m: 1.0,
                pct_change_5m: 2.0,
                hod: 1.1,
                broke_hod: true,
                score: 50.0,
            },
            config_snapshot: ScannerConfig::default(),
        };
        let wire = TriggerEventWire::from(&ev);
        assert_eq!(wire.symbol, "ABC");
        assert_eq!(wire.reason_tags, vec![ReasonTag::HodBreak]);
    }
}
