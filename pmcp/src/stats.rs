//! API-call accounting and budget enforcement.
//!
//! Counters roll over on clock-hour and clock-day boundaries (UTC). The
//! budget check is deliberately racy-but-monotonic: two perception loops may
//! both pass the check at the edge, so the daily cap is a soft cap with one
//! overshoot tolerated.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use pmcp_config_data::CostControlConfig;

/// Rough per-call cost used for the running estimate when a provider does
/// not report token usage.
pub const DEFAULT_COST_PER_CALL_USD: f64 = 0.01;

#[derive(Debug, Default)]
struct Window {
    hour_key: i64,
    hour_calls: u32,
    day_key: i64,
    day_calls: u32,
    day_cost_usd: f64,
    total_calls: u64,
}

/// Shared call counters for all perception loops.
#[derive(Debug, Default)]
pub struct ApiStats {
    window: Mutex<Window>,
    model_tag: Mutex<String>,
}

/// Snapshot exposed at `/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub calls_this_hour: u32,
    pub calls_today: u32,
    pub estimated_cost_today_usd: f64,
    pub total_calls: u64,
    pub model: String,
    pub hourly_rate_cap: u32,
    pub daily_budget_usd: f64,
    pub budget_exhausted: bool,
}

fn hour_key(now: DateTime<Utc>) -> i64 {
    now.timestamp() / 3600
}

fn day_key(now: DateTime<Utc>) -> i64 {
    i64::from(now.num_days_from_ce())
}

impl ApiStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_model_tag(&self, tag: impl Into<String>) {
        *self.model_tag.lock() = tag.into();
    }

    fn roll(window: &mut Window, now: DateTime<Utc>) {
        let hk = hour_key(now);
        if window.hour_key != hk {
            window.hour_key = hk;
            window.hour_calls = 0;
        }
        let dk = day_key(now);
        if window.day_key != dk {
            window.day_key = dk;
            window.day_calls = 0;
            window.day_cost_usd = 0.0;
        }
    }

    /// Whether another VLM call fits under both caps right now.
    ///
    /// Suppressed calls are skipped, never queued; callers simply try again
    /// next tick and succeed after the window rolls.
    pub fn budget_allows(&self, caps: &CostControlConfig, now: DateTime<Utc>) -> bool {
        let mut window = self.window.lock();
        Self::roll(&mut window, now);
        if caps.hourly_rate_cap > 0 && window.hour_calls >= caps.hourly_rate_cap {
            return false;
        }
        if caps.daily_budget_usd > 0.0 && window.day_cost_usd >= caps.daily_budget_usd {
            return false;
        }
        true
    }

    pub fn record_call(&self, cost_usd: f64, now: DateTime<Utc>) {
        let mut window = self.window.lock();
        Self::roll(&mut window, now);
        window.hour_calls += 1;
        window.day_calls += 1;
        window.day_cost_usd += cost_usd;
        window.total_calls += 1;
    }

    pub fn snapshot(&self, caps: &CostControlConfig, now: DateTime<Utc>) -> StatsSnapshot {
        let mut window = self.window.lock();
        Self::roll(&mut window, now);
        let budget_exhausted = (caps.hourly_rate_cap > 0
            && window.hour_calls >= caps.hourly_rate_cap)
            || (caps.daily_budget_usd > 0.0 && window.day_cost_usd >= caps.daily_budget_usd);
        StatsSnapshot {
            calls_this_hour: window.hour_calls,
            calls_today: window.day_calls,
            estimated_cost_today_usd: window.day_cost_usd,
            total_calls: window.total_calls,
            model: self.model_tag.lock().clone(),
            hourly_rate_cap: caps.hourly_rate_cap,
            daily_budget_usd: caps.daily_budget_usd,
            budget_exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn caps(daily: f64, hourly: u32) -> CostControlConfig {
        CostControlConfig {
            daily_budget_usd: daily,
            hourly_rate_cap: hourly,
        }
    }

    #[test]
    fn hourly_cap_suppresses_then_rolls() {
        let stats = ApiStats::new();
        let caps = caps(100.0, 3);
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        for _ in 0..3 {
            assert!(stats.budget_allows(&caps, t0));
            stats.record_call(DEFAULT_COST_PER_CALL_USD, t0);
        }
        assert!(!stats.budget_allows(&caps, t0));

        // Next hour: the window rolls and calls flow again.
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 1).unwrap();
        assert!(stats.budget_allows(&caps, t1));
    }

    #[test]
    fn daily_budget_suppresses_until_next_day() {
        let stats = ApiStats::new();
        let caps = caps(0.05, 0);
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        for _ in 0..5 {
            stats.record_call(0.01, t0);
        }
        assert!(!stats.budget_allows(&caps, t0));

        let next_day = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 1).unwrap();
        assert!(stats.budget_allows(&caps, next_day));
        let snap = stats.snapshot(&caps, next_day);
        assert_eq!(snap.calls_today, 0);
        assert_eq!(snap.total_calls, 5);
    }

    #[test]
    fn zero_caps_mean_unlimited() {
        let stats = ApiStats::new();
        let caps = caps(0.0, 0);
        let now = Utc::now();
        for _ in 0..100 {
            stats.record_call(1.0, now);
        }
        assert!(stats.budget_allows(&caps, now));
    }
}
