// =============================================================================
// REST API — scanner config, universe, triggers, and preferences
// =============================================================================
//
// Stable URL paths per §6: every handler extracts `State<Arc<AppState>>` and
// either `AuthContext` (any authenticated user) or `AdminContext` (admin
// only), following the router/CORS/state-extraction idiom carried over from
// the teacher's own REST layer.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::api::auth::{AdminContext, AuthContext};
use crate::app_state::AppState;
use crate::error::{ScannerError, ScannerResult};
use crate::rate_limit::RateLimitScope;
use crate::types::{ScannerConfig, UniverseSymbol, UserScannerSettings};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scanner/config/", get(get_config).patch(patch_config))
        .route(
            "/scanner/universe/",
            get(list_universe).post(upsert_universe).put(upsert_universe).delete(delete_universe),
        )
        .route("/scanner/triggers/", get(list_triggers))
        .route("/scanner/triggers/clear/", post(clear_triggers))
        .route("/scanner/preferences/me/", get(get_preferences).patch(patch_preferences))
}

fn check_rate_limit(state: &Arc<AppState>, scope: RateLimitScope, user_id: i64) -> ScannerResult<()> {
    if state.rate_limiter.check(scope, user_id) {
        Ok(())
    } else {
        Err(ScannerError::RateLimited { scope: scope.as_str().to_string() })
    }
}

// =============================================================================
// GET/PATCH /scanner/config/
// =============================================================================

async fn get_config(
    State(state): State<Arc<AppState>>,
    AuthContext(user): AuthContext,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerRead, user.user_id)?;
    let config = state.config_store.get().await?;
    Ok(Json(config))
}

async fn patch_config(
    State(state): State<Arc<AppState>>,
    AdminContext(admin): AdminContext,
    Json(patch): Json<ScannerConfigPatch>,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerWrite, admin.user_id)?;
    let mut config = state.config_store.get().await?;
    patch.apply(&mut config);
    config.updated_at = Utc::now();
    let updated = state.config_store.update(config).await?;
    Ok(Json(updated))
}

/// Partial update body for `PATCH /scanner/config/`. Every field is
/// optional; only the keys present in the request body are changed.
#[derive(Debug, Deserialize, Default)]
struct ScannerConfigPatch {
    enabled: Option<bool>,
    timeframe: Option<String>,
    min_vol_1m: Option<f64>,
    rvol_1m_threshold: Option<f64>,
    rvol_5m_threshold: Option<f64>,
    min_pct_change_1m: Option<f64>,
    min_pct_change_5m: Option<f64>,
    require_green_candle: Option<bool>,
    require_hod_break: Option<bool>,
    cooldown_minutes: Option<i64>,
    realert_on_new_hod: Option<bool>,
    rvol_lookback_minutes: Option<i64>,
}

impl ScannerConfigPatch {
    fn apply(self, config: &mut ScannerConfig) {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = self.timeframe {
            config.timeframe = v;
        }
        if let Some(v) = self.min_vol_1m {
            config.min_vol_1m = v;
        }
        if let Some(v) = self.rvol_1m_threshold {
            config.rvol_1m_threshold = v;
        }
        if let Some(v) = self.rvol_5m_threshold {
            config.rvol_5m_threshold = v;
        }
        if let Some(v) = self.min_pct_change_1m {
            config.min_pct_change_1m = v;
        }
        if let Some(v) = self.min_pct_change_5m {
            config.min_pct_change_5m = v;
        }
        if let Some(v) = self.require_green_candle {
            config.require_green_candle = v;
        }
        if let Some(v) = self.require_hod_break {
            config.require_hod_break = v;
        }
        if let Some(v) = self.cooldown_minutes {
            config.cooldown_minutes = v;
        }
        if let Some(v) = self.realert_on_new_hod {
            config.realert_on_new_hod = v;
        }
        if let Some(v) = self.rvol_lookback_minutes {
            config.rvol_lookback_minutes = v;
        }
    }
}

// =============================================================================
// GET/POST/PUT/DELETE /scanner/universe/
// =============================================================================

#[derive(Debug, Deserialize)]
struct UniverseWrite {
    symbol: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct UniverseDelete {
    symbol: String,
}

async fn list_universe(
    State(state): State<Arc<AppState>>,
    AuthContext(user): AuthContext,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerRead, user.user_id)?;
    let symbols: Vec<UniverseSymbol> = state.universe_store.list().await?;
    Ok(Json(symbols))
}

async fn upsert_universe(
    State(state): State<Arc<AppState>>,
    AdminContext(admin): AdminContext,
    Json(body): Json<UniverseWrite>,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerWrite, admin.user_id)?;
    if body.symbol.trim().is_empty() {
        return Err(ScannerError::Malformed("symbol must not be empty".into()));
    }
    let symbol = state.universe_store.upsert(&body.symbol, body.enabled).await?;
    Ok(Json(symbol))
}

async fn delete_universe(
    State(state): State<Arc<AppState>>,
    AdminContext(admin): AdminContext,
    Json(body): Json<UniverseDelete>,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerWrite, admin.user_id)?;
    state.universe_store.remove(&body.symbol).await?;
    state.bar_store.delete_symbol(&body.symbol).await?;
    Ok(Json(serde_json::json!({ "removed": body.symbol.to_ascii_uppercase() })))
}

// =============================================================================
// GET /scanner/triggers/, POST /scanner/triggers/clear/
// =============================================================================

#[derive(Debug, Deserialize)]
struct TriggersQuery {
    symbol: Option<String>,
    #[serde(default = "default_trigger_limit")]
    limit: i64,
}

fn default_trigger_limit() -> i64 {
    100
}

async fn list_triggers(
    State(state): State<Arc<AppState>>,
    AuthContext(user): AuthContext,
    Query(query): Query<TriggersQuery>,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerTriggers, user.user_id)?;
    let events = state
        .event_store
        .list_for_user(user.user_id, query.symbol.as_deref(), query.limit)
        .await?;
    Ok(Json(events))
}

async fn clear_triggers(
    State(state): State<Arc<AppState>>,
    AuthContext(user): AuthContext,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerWrite, user.user_id)?;
    let now = Utc::now();
    state.preference_store.clear_until(user.user_id, now).await?;
    Ok(Json(serde_json::json!({ "cleared_until": now })))
}

// =============================================================================
// GET/PATCH /scanner/preferences/me/
// =============================================================================

async fn get_preferences(
    State(state): State<Arc<AppState>>,
    AuthContext(user): AuthContext,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerRead, user.user_id)?;
    let settings = state.preference_store.get(user.user_id).await?;
    Ok(Json(settings))
}

#[derive(Debug, Deserialize, Default)]
struct PreferencesPatch {
    follow_alerts: Option<bool>,
    live_feed_enabled: Option<bool>,
    pushover_enabled: Option<bool>,
    pushover_user_key: Option<String>,
    pushover_device: Option<Option<String>>,
    pushover_sound: Option<Option<String>>,
    pushover_priority: Option<i8>,
    notify_min_score: Option<Option<f64>>,
    notify_only_hod_break: Option<bool>,
}

impl PreferencesPatch {
    fn apply(self, settings: &mut UserScannerSettings) {
        if let Some(v) = self.follow_alerts {
            settings.follow_alerts = v;
        }
        if let Some(v) = self.live_feed_enabled {
            settings.live_feed_enabled = v;
        }
        if let Some(v) = self.pushover_enabled {
            settings.pushover_enabled = v;
        }
        if let Some(v) = self.pushover_user_key {
            settings.pushover_user_key = v;
        }
        if let Some(v) = self.pushover_device {
            settings.pushover_device = v;
        }
        if let Some(v) = self.pushover_sound {
            settings.pushover_sound = v;
        }
        if let Some(v) = self.pushover_priority {
            settings.pushover_priority = v;
        }
        if let Some(v) = self.notify_min_score {
            settings.notify_min_score = v;
        }
        if let Some(v) = self.notify_only_hod_break {
            settings.notify_only_hod_break = v;
        }
    }
}

async fn patch_preferences(
    State(state): State<Arc<AppState>>,
    AuthContext(user): AuthContext,
    Json(patch): Json<PreferencesPatch>,
) -> ScannerResult<impl IntoResponse> {
    check_rate_limit(&state, RateLimitScope::ScannerWrite, user.user_id)?;
    let mut settings = state.preference_store.get(user.user_id).await?;
    patch.apply(&mut settings);
    settings.updated_at = Utc::now();
    let updated = state.preference_store.update(settings).await?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_patch_only_touches_provided_fields() {
        let mut config = ScannerConfig::default();
        let before_threshold = config.rvol_5m_threshold;
        let patch = ScannerConfigPatch { enabled: Some(true), ..Default::default() };
        patch.apply(&mut config);
        assert!(config.enabled);
        assert_eq!(config.rvol_5m_threshold, before_threshold);
    }

    #[test]
    fn preferences_patch_can_clear_an_optional_field() {
        let mut settings = UserScannerSettings::default_for_user(1, Utc::now());
        settings.notify_min_score = Some(10.0);
        let patch = PreferencesPatch { notify_min_score: Some(None), ..Default::default() };
        patch.apply(&mut settings);
        assert_eq!(settings.notify_min_score, None);
    }
}
