// =============================================================================
// Fan-out — broadcasts trigger events and hotlist snapshots to WS groups
// =============================================================================

use std::sync::Arc;

use crate::engine::ScoredSymbol;
use crate::types::{Hot5Item, ScannerWsMessage, TriggerEvent, TriggerEventWire};
use crate::ws_groups::WsGroups;

pub struct Fanout {
    groups: Arc<WsGroups>,
}

impl Fanout {
    pub fn new(groups: Arc<WsGroups>) -> Self {
        Self { groups }
    }

    /// Broadcast a trigger event to every currently-connected user. Delivery
    /// is fire-and-forget per the `WsGroups` contract: a user with no open
    /// connection simply misses the live push and sees the event later via
    /// the REST history endpoint.
    pub fn publish_trigger_event(&self, event: &TriggerEvent, user_ids: &[i64]) {
        let wire = TriggerEventWire::from(event);
        let msg = ScannerWsMessage::Trigger(Box::new(wire));
        self.groups.send_to_users(user_ids, msg);
    }

    pub fn publish_hotlist(&self, items: Vec<Hot5Item>, user_ids: &[i64]) {
        let msg = ScannerWsMessage::Hot5 { ts: chrono::Utc::now().timestamp(), items };
        self.groups.send_to_users(user_ids, msg);
    }
}

/// Rank the `top_n` symbols by score across `events`, one entry per symbol
/// (the most recent event for that symbol wins ties).
pub fn build_hot5(events: &[TriggerEvent], top_n: usize) -> Vec<Hot5Item> {
    use std::collections::HashMap;

    let mut best: HashMap<&str, &TriggerEvent> = HashMap::new();
    for event in events {
        best.entry(event.symbol.as_str())
            .and_modify(|existing| {
                if event.triggered_at > existing.triggered_at {
                    *existing = event;
                }
            })
            .or_insert(event);
    }

    let mut ranked: Vec<&TriggerEvent> = best.into_values().collect();
    ranked.sort_by(|a, b| b.metrics.score.total_cmp(&a.metrics.score));
    ranked.truncate(top_n);

    ranked
        .into_iter()
        .map(|event| Hot5Item {
            symbol: event.symbol.clone(),
            score: event.metrics.score,
            last_price: event.bar.c,
            pct_change_1m: event.metrics.pct_change_1m,
            pct_change_5m: event.metrics.pct_change_5m,
            rvol_1m: event.metrics.rvol_1m,
            rvol_5m: event.metrics.rvol_5m,
            vol_1m: event.metrics.vol_1m,
            vol_5m: event.metrics.vol_5m,
            hod: event.metrics.hod,
            hod_distance_pct: (event.metrics.hod - event.bar.c) / event.metrics.hod.max(1e-9) * 100.0,
            broke_hod: event.metrics.broke_hod,
            bar_ts: event.bar.ts,
            reason_tags: event.reason_tags.clone(),
        })
        .collect()
}

/// Rank the `top_n` symbols by score from one tick's full-universe scan,
/// regardless of whether any individual symbol triggered (§4.4 step 6) —
/// unlike `build_hot5`, which only sees symbols that produced a persisted
/// `TriggerEvent`.
pub fn build_hot5_from_scored(scored: &[ScoredSymbol], top_n: usize) -> Vec<Hot5Item> {
    let mut ranked: Vec<&ScoredSymbol> = scored.iter().collect();
    ranked.sort_by(|a, b| b.metrics.score.total_cmp(&a.metrics.score));
    ranked.truncate(top_n);

    ranked
        .into_iter()
        .map(|s| Hot5Item {
            symbol: s.symbol.clone(),
            score: s.metrics.score,
            last_price: s.bar.c,
            pct_change_1m: s.metrics.pct_change_1m,
            pct_change_5m: s.metrics.pct_change_5m,
            rvol_1m: s.metrics.rvol_1m,
            rvol_5m: s.metrics.rvol_5m,
            vol_1m: s.metrics.vol_1m,
            vol_5m: s.metrics.vol_5m,
            hod: s.metrics.hod,
            hod_distance_pct: (s.metrics.hod - s.bar.c) / s.metrics.hod.max(1e-9) * 100.0,
            broke_hod: s.metrics.broke_hod,
            bar_ts: s.bar.ts,
            reason_tags: s.reason_tags.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, Metrics, ScannerConfig};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(symbol: &str, score: f64, ts_offset_secs: i64) -> TriggerEvent {
        let now = Utc::now() + chrono::Duration::seconds(ts_offset_secs);
        TriggerEvent {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            triggered_at: now,
            reason_tags: vec![],
            bar: Bar { ts: now, o: 10.0, h: 10.5, l: 9.9, c: 10.3, v: 1000.0 },
            metrics: Metrics {
                vol_1m: 1000.0,
                vol_5m: 5000.0,
                avg_vol_1m_lookback: 100.0,
                rvol_1m: 10.0,
                rvol_5m: 10.0,
                pct_change_1m: 3.0,
                pct_change_5m: 5.0,
                hod: 10.5,
                broke_hod: true,
                score,
            },
            config_snapshot: ScannerConfig::default(),
        }
    }

    #[test]
    fn build_hot5_ranks_by_score_descending() {
        let events = vec![
            sample_event("AAA", 10.0, 0),
            sample_event("BBB", 50.0, 1),
            sample_event("CCC", 30.0, 2),
        ];
        let ranked = build_hot5(&events, 5);
        assert_eq!(ranked[0].symbol, "BBB");
        assert_eq!(ranked[1].symbol, "CCC");
        assert_eq!(ranked[2].symbol, "AAA");
    }

    #[test]
    fn build_hot5_dedups_by_symbol_keeping_latest() {
        let events = vec![sample_event("AAA", 10.0, 0), sample_event("AAA", 50.0, 10)];
        let ranked = build_hot5(&events, 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 50.0);
    }

    #[test]
    fn build_hot5_respects_top_n() {
        let events: Vec<_> = (0..10).map(|i| sample_event(&format!("S{i}"), i as f64, i)).collect();
        let ranked = build_hot5(&events, 3);
        assert_eq!(ranked.len(), 3);
    }

    fn scored_symbol(symbol: &str, score: f64, broke_hod: bool) -> ScoredSymbol {
        ScoredSymbol {
            symbol: symbol.to_string(),
            bar: Bar { ts: Utc::now(), o: 10.0, h: 10.5, l: 9.9, c: 10.3, v: 1000.0 },
            metrics: Metrics {
                vol_1m: 1000.0,
                vol_5m: 5000.0,
                avg_vol_1m_lookback: 100.0,
                rvol_1m: 5.0,
                rvol_5m: 5.0,
                pct_change_1m: 1.0,
                pct_change_5m: 2.0,
                hod: 10.5,
                broke_hod,
                score,
            },
            reason_tags: vec![],
        }
    }

    #[test]
    fn build_hot5_from_scored_includes_symbols_that_never_triggered() {
        // A symbol can have a high live score without ever clearing the rule
        // gate (e.g. in cooldown, or failing `require_green_candle`) — it
        // must still be eligible for HOT-5.
        let scored = vec![scored_symbol("AAA", 90.0, false), scored_symbol("BBB", 10.0, true)];
        let ranked = build_hot5_from_scored(&scored, 5);
        assert_eq!(ranked[0].symbol, "AAA");
        assert_eq!(ranked[0].score, 90.0);
    }

    #[test]
    fn build_hot5_from_scored_respects_top_n() {
        let scored: Vec<_> = (0..10).map(|i| scored_symbol(&format!("S{i}"), i as f64, false)).collect();
        let ranked = build_hot5_from_scored(&scored, 3);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn fanout_isolation_one_user_with_no_connection_does_not_affect_another() {
        let groups = Arc::new(WsGroups::new());
        let fanout = Fanout::new(groups.clone());
        let mut rx = groups.subscribe(2);
        let event = sample_event("AAA", 50.0, 0);
        fanout.publish_trigger_event(&event, &[1, 2]);
        assert!(rx.try_recv().is_ok());
    }
}
