// =============================================================================
// Scanner engine — metric computation, rule gate, cooldown, tick orchestration
// =============================================================================

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bar_store::BarStore;
use crate::error::ScannerResult;
use crate::stores::{ConfigStore, EventStore, UniverseStore};
use crate::types::{Bar, Metrics, ReasonTag, ScannerConfig, TriggerEvent};

const MIN_BARS_FOR_METRICS: usize = 6;

/// Baseline windows (excluding the current bar) the 1m and 5m relative-volume
/// averages are computed over. Fixed per the source system rather than
/// overridden by `rvol_lookback_minutes`, which instead controls how many
/// bars `BarStore::fetch_bars` retrieves (see DESIGN.md).
const RVOL_1M_BASELINE_BARS: usize = 45;
const RVOL_5M_BASELINE_BARS: usize = 90;

/// Compute metrics for the most recent bar in `bars` (oldest-first). `hod`
/// and `prev_hod` come from the symbol's current `HodState`. Mirrors the
/// informational reason tags (`RVOL_1M`, `RVOL_5M`, `UP_1M`, `HOD_BREAK`)
/// alongside the numeric metrics, separately from the threshold tags the
/// rule gate adds.
pub fn compute_metrics(
    bars: &[Bar],
    hod: f64,
    prev_hod: Option<f64>,
) -> Option<(Metrics, Vec<ReasonTag>)> {
    if bars.len() < MIN_BARS_FOR_METRICS {
        return None;
    }

    let n = bars.len();
    let last = bars[n - 1];
    let prev = bars[n - 2];
    let last5 = &bars[n - 5..];
    let prev5 = bars[n - 6];

    let vol_1m = last.v;
    let vol_5m: f64 = last5.iter().map(|b| b.v).sum();

    // avg_vol_1m: mean volume over the last min(45, n-1) bars excluding the
    // current one.
    let w1 = RVOL_1M_BASELINE_BARS.min(n - 1).max(1);
    let window1 = &bars[n - 1 - w1..n - 1];
    let avg_vol_1m_lookback = window1.iter().map(|b| b.v).sum::<f64>() / window1.len() as f64;
    let rvol_1m = vol_1m / avg_vol_1m_lookback.max(1.0);

    // avg_vol_5m: mean of rolling 5-bar volume sums over the last min(90,
    // n-1) bars excluding the current one.
    let w2 = RVOL_5M_BASELINE_BARS.min(n - 1).max(1);
    let window2 = &bars[n - 1 - w2..n - 1];
    let avg_vol_5m = if window2.len() >= 5 {
        let sums: Vec<f64> = window2.windows(5).map(|w| w.iter().map(|b| b.v).sum()).collect();
        sums.iter().sum::<f64>() / sums.len() as f64
    } else {
        window2.iter().map(|b| b.v).sum()
    };
    let rvol_5m = vol_5m / avg_vol_5m.max(1.0);

    let pct_change_1m = (last.c - prev.c) / prev.c.max(1e-9) * 100.0;
    let pct_change_5m = (last.c - prev5.c) / prev5.c.max(1e-9) * 100.0;

    let broke_hod = match prev_hod {
        Some(prev_hod) => last.h > prev_hod,
        None => false,
    };

    let mut score = 0.0;
    score += rvol_1m.min(20.0) * 5.0;
    score += pct_change_1m.max(0.0).min(10.0) * 4.0;
    if broke_hod {
        score += 20.0;
    }

    let mut reason_tags = Vec::new();
    if rvol_1m >= 1.0 {
        reason_tags.push(ReasonTag::Rvol1m);
    }
    if rvol_5m >= 1.0 {
        reason_tags.push(ReasonTag::Rvol5m);
    }
    if pct_change_1m >= 0.0 {
        reason_tags.push(ReasonTag::Up1m);
    }
    if broke_hod {
        reason_tags.push(ReasonTag::HodBreak);
    }

    Some((
        Metrics {
            vol_1m,
            vol_5m,
            avg_vol_1m_lookback,
            rvol_1m,
            rvol_5m,
            pct_change_1m,
            pct_change_5m,
            hod,
            broke_hod,
            score,
        },
        reason_tags,
    ))
}

/// Apply the ignition rule gate. On success, returns the threshold tags that
/// explain which thresholds the bar cleared.
pub fn should_trigger(bar: &Bar, m: &Metrics, cfg: &ScannerConfig) -> (bool, Vec<ReasonTag>) {
    let mut tags = Vec::new();

    if m.vol_1m < cfg.min_vol_1m {
        return (false, tags);
    }

    if m.rvol_1m < cfg.rvol_1m_threshold && m.rvol_5m < cfg.rvol_5m_threshold {
        return (false, tags);
    }

    let mut price_ok =
        m.pct_change_1m >= cfg.min_pct_change_1m || m.pct_change_5m >= cfg.min_pct_change_5m;
    if cfg.require_hod_break {
        price_ok = price_ok && m.broke_hod;
    }
    if !price_ok {
        return (false, tags);
    }

    if cfg.require_green_candle && bar.c < bar.o {
        return (false, tags);
    }

    if m.rvol_1m >= cfg.rvol_1m_threshold {
        tags.push(ReasonTag::Rvol1mThreshold);
    }
    if m.rvol_5m >= cfg.rvol_5m_threshold {
        tags.push(ReasonTag::Rvol5mThreshold);
    }
    if m.pct_change_1m >= cfg.min_pct_change_1m {
        tags.push(ReasonTag::Pct1mThreshold);
    }
    if m.pct_change_5m >= cfg.min_pct_change_5m {
        tags.push(ReasonTag::Pct5mThreshold);
    }
    if m.broke_hod {
        tags.push(ReasonTag::HodBreak);
    }

    (true, tags)
}

/// Per-tick metrics for one symbol, computed regardless of whether it
/// cleared the rule gate or is in cooldown. Feeds the HOT-5 broadcast, which
/// must reflect the full scanned universe's live scores "regardless of
/// triggering" (§4.4 step 6), not just symbols that produced a `TriggerEvent`.
#[derive(Debug, Clone)]
pub struct ScoredSymbol {
    pub symbol: String,
    pub bar: Bar,
    pub metrics: Metrics,
    pub reason_tags: Vec<ReasonTag>,
}

/// Result of one full tick: the trigger events created, plus a scored entry
/// for every symbol that had enough bars to compute metrics.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub events: Vec<TriggerEvent>,
    pub scored: Vec<ScoredSymbol>,
}

/// Orchestrates one full scanner pass over the enabled universe.
pub struct Engine {
    config_store: Arc<dyn ConfigStore>,
    universe_store: Arc<dyn UniverseStore>,
    event_store: Arc<dyn EventStore>,
    bar_store: Arc<BarStore>,
}

impl Engine {
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        universe_store: Arc<dyn UniverseStore>,
        event_store: Arc<dyn EventStore>,
        bar_store: Arc<BarStore>,
    ) -> Self {
        Self { config_store, universe_store, event_store, bar_store }
    }

    /// Run one full tick, returning the trigger events created plus a scored
    /// entry for every symbol in the universe that had enough bars to
    /// compute metrics — the latter feeds the HOT-5 broadcast regardless of
    /// whether any individual symbol triggered. An empty report is the
    /// common case (disabled, empty universe, no ignitions).
    pub async fn run_once(&self, now: DateTime<Utc>) -> ScannerResult<TickReport> {
        let cfg = self.config_store.get().await?;
        if !cfg.enabled {
            return Ok(TickReport::default());
        }

        let symbols = self.universe_store.list_enabled().await?;
        if symbols.is_empty() {
            return Ok(TickReport::default());
        }

        let mut report = TickReport::default();

        for symbol in symbols {
            match self.evaluate_symbol(&symbol.symbol, &cfg, now).await {
                Ok((event, scored)) => {
                    if let Some(event) = event {
                        report.events.push(event);
                    }
                    if let Some(scored) = scored {
                        report.scored.push(scored);
                    }
                }
                Err(e) => warn!(symbol = %symbol.symbol, error = %e, "failed to evaluate symbol"),
            }
        }

        info!(created = report.events.len(), scored = report.scored.len(), "scanner tick complete");
        Ok(report)
    }

    async fn evaluate_symbol(
        &self,
        symbol: &str,
        cfg: &ScannerConfig,
        now: DateTime<Utc>,
    ) -> ScannerResult<(Option<TriggerEvent>, Option<ScoredSymbol>)> {
        let bars = self.bar_store.fetch_bars(symbol, cfg.rvol_lookback_minutes).await?;
        if bars.len() < MIN_BARS_FOR_METRICS {
            return Ok((None, None));
        }
        let last_bar = bars[bars.len() - 1];

        let current_hod = self.bar_store.get_hod(symbol).await?;
        let hod_state = match current_hod {
            Some(state) if state.ts >= last_bar.ts => state,
            _ => match self.bar_store.rebuild_hod(symbol).await? {
                Some(state) => state,
                None => return Ok((None, None)),
            },
        };

        let Some((metrics, info_tags)) =
            compute_metrics(&bars, hod_state.hod, hod_state.prev_hod)
        else {
            return Ok((None, None));
        };

        let scored = ScoredSymbol {
            symbol: symbol.to_string(),
            bar: last_bar,
            metrics: metrics.clone(),
            reason_tags: info_tags.clone(),
        };

        if self.in_cooldown(symbol, &metrics, cfg, now).await? {
            return Ok((None, Some(scored)));
        }

        let (ok, threshold_tags) = should_trigger(&last_bar, &metrics, cfg);
        if !ok {
            return Ok((None, Some(scored)));
        }

        let mut reason_tags = threshold_tags;
        for tag in info_tags {
            if !reason_tags.contains(&tag) {
                reason_tags.push(tag);
            }
        }

        let event = TriggerEvent {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            triggered_at: now,
            reason_tags,
            bar: last_bar,
            metrics,
            config_snapshot: cfg.clone(),
        };

        let created = self.event_store.create(event).await?;
        Ok((Some(created), Some(scored)))
    }

    /// A symbol is in cooldown if it fired within `cooldown_minutes`, unless
    /// `realert_on_new_hod` is set and the prior event's HOD has since been
    /// broken — a fresh high is allowed to re-alert immediately.
    async fn in_cooldown(
        &self,
        symbol: &str,
        metrics: &Metrics,
        cfg: &ScannerConfig,
        now: DateTime<Utc>,
    ) -> ScannerResult<bool> {
        let cutoff = now - chrono::Duration::minutes(cfg.cooldown_minutes);
        let Some(last_event) = self.event_store.most_recent_since(symbol, cutoff).await? else {
            return Ok(false);
        };

        // A fresh high since the last alert is allowed to bypass cooldown —
        // the symbol is still igniting, not repeating the same move.
        if cfg.realert_on_new_hod && metrics.hod > last_event.metrics.hod {
            return Ok(false);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::stores::memory::{MemoryConfigStore, MemoryEventStore, MemoryUniverseStore};

    fn flat_bars(n: usize, close: f64, vol: f64, start: DateTime<Utc>) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                ts: start + chrono::Duration::minutes(i as i64),
                o: close,
                h: close,
                l: close,
                c: close,
                v: vol,
            })
            .collect()
    }

    #[test]
    fn compute_metrics_requires_minimum_bars() {
        let bars = flat_bars(3, 10.0, 100.0, Utc::now());
        assert!(compute_metrics(&bars, 10.0, Some(9.0)).is_none());
    }

    #[test]
    fn ignition_bar_produces_expected_rvol_and_pct() {
        let start = Utc::now();
        let mut bars = flat_bars(30, 10.0, 10_000.0, start);
        let last_ts = start + chrono::Duration::minutes(30);
        bars.push(Bar { ts: last_ts, o: 10.0, h: 10.5, l: 10.0, c: 10.3, v: 200_000.0 });

        let (metrics, tags) = compute_metrics(&bars, 10.5, Some(10.0)).unwrap();
        assert!(metrics.rvol_1m > 10.0);
        assert!(metrics.pct_change_1m > 2.0);
        assert!(metrics.broke_hod);
        assert!(tags.contains(&ReasonTag::HodBreak));
    }

    #[test]
    fn should_trigger_rejects_below_min_volume() {
        let cfg = ScannerConfig::default();
        let bar = Bar { ts: Utc::now(), o: 10.0, h: 10.5, l: 10.0, c: 10.3, v: 100.0 };
        let metrics = Metrics {
            vol_1m: 100.0,
            vol_5m: 500.0,
            avg_vol_1m_lookback: 100.0,
            rvol_1m: 10.0,
            rvol_5m: 10.0,
            pct_change_1m: 5.0,
            pct_change_5m: 5.0,
            hod: 10.5,
            broke_hod: true,
            score: 90.0,
        };
        let (ok, _) = should_trigger(&bar, &metrics, &cfg);
        assert!(!ok);
    }

    #[test]
    fn should_trigger_requires_hod_break_when_configured() {
        let mut cfg = ScannerConfig::default();
        cfg.require_hod_break = true;
        let bar = Bar { ts: Utc::now(), o: 10.0, h: 10.5, l: 10.0, c: 10.3, v: 100_000.0 };
        let mut metrics = Metrics {
            vol_1m: 100_000.0,
            vol_5m: 500_000.0,
            avg_vol_1m_lookback: 10_000.0,
            rvol_1m: 10.0,
            rvol_5m: 10.0,
            pct_change_1m: 5.0,
            pct_change_5m: 5.0,
            hod: 10.5,
            broke_hod: false,
            score: 90.0,
        };
        let (ok, _) = should_trigger(&bar, &metrics, &cfg);
        assert!(!ok);

        metrics.broke_hod = true;
        let (ok, tags) = should_trigger(&bar, &metrics, &cfg);
        assert!(ok);
        assert!(tags.contains(&ReasonTag::HodBreak));
    }

    #[test]
    fn should_trigger_requires_green_candle_when_configured() {
        let mut cfg = ScannerConfig::default();
        cfg.require_green_candle = true;
        let red_bar = Bar { ts: Utc::now(), o: 10.5, h: 10.6, l: 10.0, c: 10.2, v: 100_000.0 };
        let metrics = Metrics {
            vol_1m: 100_000.0,
            vol_5m: 500_000.0,
            avg_vol_1m_lookback: 10_000.0,
            rvol_1m: 10.0,
            rvol_5m: 10.0,
            pct_change_1m: 5.0,
            pct_change_5m: 5.0,
            hod: 10.6,
            broke_hod: false,
            score: 90.0,
        };
        let (ok, _) = should_trigger(&red_bar, &metrics, &cfg);
        assert!(!ok);
    }

    async fn engine_with_bars(bars: Vec<Bar>, cfg: ScannerConfig) -> (Engine, Arc<dyn EventStore>) {
        let config_store = Arc::new(MemoryConfigStore::default());
        config_store.update(cfg).await.unwrap();
        let universe_store = Arc::new(MemoryUniverseStore::default());
        universe_store.upsert("TEST", true).await.unwrap();
        let event_store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::default());
        let bar_store = Arc::new(BarStore::new(Arc::new(MemoryCacheStore::new())));
        for bar in bars {
            bar_store.push_bar("TEST", bar).await.unwrap();
        }
        (
            Engine::new(config_store, universe_store, event_store.clone(), bar_store),
            event_store,
        )
    }

    #[tokio::test]
    async fn end_to_end_tick_creates_event_on_ignition() {
        let start = Utc::now() - chrono::Duration::minutes(31);
        let mut bars = flat_bars(30, 10.0, 10_000.0, start);
        bars.push(Bar {
            ts: start + chrono::Duration::minutes(30),
            o: 10.0,
            h: 10.5,
            l: 10.0,
            c: 10.3,
            v: 200_000.0,
        });
        let mut cfg = ScannerConfig::default();
        cfg.enabled = true;
        let (engine, _events) = engine_with_bars(bars, cfg).await;

        let report = engine.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].symbol, "TEST");
        assert_eq!(report.scored.len(), 1);
        assert_eq!(report.scored[0].symbol, "TEST");
    }

    #[tokio::test]
    async fn disabled_config_skips_tick_entirely() {
        let start = Utc::now() - chrono::Duration::minutes(31);
        let mut bars = flat_bars(30, 10.0, 10_000.0, start);
        bars.push(Bar {
            ts: start + chrono::Duration::minutes(30),
            o: 10.0,
            h: 10.5,
            l: 10.0,
            c: 10.3,
            v: 200_000.0,
        });
        let cfg = ScannerConfig::default(); // enabled: false
        let (engine, _events) = engine_with_bars(bars, cfg).await;

        let report = engine.run_once(Utc::now()).await.unwrap();
        assert!(report.events.is_empty());
        assert!(report.scored.is_empty());
    }

    #[tokio::test]
    async fn second_tick_within_cooldown_is_suppressed() {
        let start = Utc::now() - chrono::Duration::minutes(31);
        let mut bars = flat_bars(30, 10.0, 10_000.0, start);
        bars.push(Bar {
            ts: start + chrono::Duration::minutes(30),
            o: 10.0,
            h: 10.5,
            l: 10.0,
            c: 10.3,
            v: 200_000.0,
        });
        let mut cfg = ScannerConfig::default();
        cfg.enabled = true;
        cfg.realert_on_new_hod = false;
        let (engine, _events) = engine_with_bars(bars, cfg).await;

        let now = Utc::now();
        let first = engine.run_once(now).await.unwrap();
        assert_eq!(first.events.len(), 1);

        let second = engine.run_once(now + chrono::Duration::minutes(1)).await.unwrap();
        assert!(second.events.is_empty());
        // Still scored for HOT-5 even though suppressed by cooldown.
        assert_eq!(second.scored.len(), 1);
    }
}
