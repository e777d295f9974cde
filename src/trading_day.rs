// =============================================================================
// Trading-day boundary resolution
// =============================================================================
//
// A trading day runs 04:00 America/New_York to the following 04:00, so that
// pre-market activity is attributed to the day it feeds into rather than the
// prior session. All bar/HOD cache keys are scoped by the id this module
// produces, not by UTC calendar date.
// =============================================================================

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

const DAY_START_HOUR: u32 = 4;

/// Half-open `[start_utc, end_utc)` bounds for one trading day, plus the id
/// used to scope cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingDay {
    pub day_id: chrono::NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

impl TradingDay {
    /// `YYYYMMDD`, matching the compatibility-critical cache key layout
    /// (`scanner:bars:{YYYYMMDD}:{SYMBOL}`).
    pub fn id_string(&self) -> String {
        self.day_id.format("%Y%m%d").to_string()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_utc && ts < self.end_utc
    }
}

/// Resolve the trading day that `ts_utc` belongs to.
pub fn trading_day_for_utc(ts_utc: DateTime<Utc>) -> TradingDay {
    let tz: Tz = New_York;
    let local = ts_utc.with_timezone(&tz);
    let boundary = NaiveTime::from_hms_opt(DAY_START_HOUR, 0, 0).expect("valid boundary time");

    let local_date = if local.time() < boundary {
        local.date_naive() - Duration::days(1)
    } else {
        local.date_naive()
    };

    let start_local = tz
        .from_local_datetime(&local_date.and_time(boundary))
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&local_date.and_time(boundary)));
    let end_local = start_local + Duration::days(1);

    TradingDay {
        day_id: local_date,
        start_utc: start_local.with_timezone(&Utc),
        end_utc: end_local.with_timezone(&Utc),
    }
}

/// Convenience wrapper returning just the scoping id for a timestamp.
pub fn trading_day_id(ts_utc: DateTime<Utc>) -> String {
    trading_day_for_utc(ts_utc).id_string()
}

/// The trading day id in effect right now.
pub fn current_trading_day_id() -> String {
    trading_day_id(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pre_market_bar_belongs_to_same_session_as_post_open() {
        // 2024-03-04 03:00 ET (08:00 UTC) is before the 04:00 boundary, so it
        // belongs to the trading day that started the previous calendar day.
        let pre = Utc.with_ymd_and_hms(2024, 3, 4, 7, 30, 0).unwrap();
        let day = trading_day_for_utc(pre);
        assert_eq!(day.day_id.to_string(), "2024-03-03");
    }

    #[test]
    fn bar_just_after_boundary_starts_new_day() {
        let after = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(); // 04:00 ET
        let day = trading_day_for_utc(after);
        assert_eq!(day.day_id.to_string(), "2024-03-04");
        assert!(day.contains(after));
    }

    #[test]
    fn day_bounds_span_exactly_24_hours() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 15, 15, 0, 0).unwrap();
        let day = trading_day_for_utc(ts);
        assert_eq!(day.end_utc - day.start_utc, Duration::days(1));
    }

    #[test]
    fn handles_dst_spring_forward_without_panicking() {
        // 2024-03-10 is the US spring-forward date.
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let day = trading_day_for_utc(ts);
        assert!(day.contains(ts));
    }

    #[test]
    fn current_trading_day_id_is_non_empty() {
        assert!(!current_trading_day_id().is_empty());
    }

    #[test]
    fn id_string_uses_compact_yyyymmdd_for_cache_key_compatibility() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let day = trading_day_for_utc(ts);
        assert_eq!(day.id_string(), "20240304");
    }
}
