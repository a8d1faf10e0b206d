// src/search/quota.rs
// Billing-period aware monthly/daily usage counters for the search API,
// persisted to a JSON file. `settings.yaml`'s `search` section carries the
// static limits; this module owns only the mutable usage state.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::SearchConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyUsage {
    date: String,
    count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageState {
    period_start: String,
    period_count: u32,
    daily: DailyUsage,
}

impl Default for UsageState {
    fn default() -> Self {
        let today = Utc::now().date_naive();
        Self {
            period_start: today.to_string(),
            period_count: 0,
            daily: DailyUsage {
                date: today.to_string(),
                count: 0,
            },
        }
    }
}

pub struct QuotaLedger {
    config: SearchConfig,
    path: PathBuf,
    state: Mutex<UsageState>,
}

impl QuotaLedger {
    pub fn new(config: SearchConfig, usage_path: impl AsRef<Path>) -> Self {
        let path = usage_path.as_ref().to_path_buf();
        let state = load_state(&path);
        Self {
            config,
            path,
            state: Mutex::new(state),
        }
    }

    /// Check whether one more search call is allowed today, resetting
    /// counters if the billing period has rolled over. Does not consume
    /// quota - callers consume only after a successful HTTP response.
    pub async fn check(&self) -> Result<(), String> {
        let today = Utc::now().date_naive();
        let mut state = self.state.lock().await;
        self.reset_if_new_period(&mut state, today);

        if state.period_count >= self.config.monthly_limit {
            return Err(format!(
                "[Error: search API monthly quota reached ({}/{}).]",
                state.period_count, self.config.monthly_limit
            ));
        }

        if self.config.daily_limit_strategy == "remaining_per_day" {
            let period_start = parse_date(&state.period_start);
            let next_start = next_period_start(period_start, self.config.billing_day);
            let remaining_days = (next_start - today).num_days().max(1) as u32;
            let remaining_monthly = self.config.monthly_limit.saturating_sub(state.period_count);
            let daily_budget = (remaining_monthly as f64 / remaining_days as f64).ceil().max(1.0) as u32;

            let today_count = if state.daily.date == today.to_string() {
                state.daily.count
            } else {
                0
            };

            if today_count >= daily_budget {
                return Err(format!(
                    "[Error: search API daily quota reached ({today_count}/{daily_budget}).]"
                ));
            }
        }

        Ok(())
    }

    /// Record a successful call. Only ever called after a 200 response.
    pub async fn consume(&self) {
        let today = Utc::now().date_naive();
        let mut state = self.state.lock().await;
        self.reset_if_new_period(&mut state, today);

        state.period_count += 1;
        if state.daily.date == today.to_string() {
            state.daily.count += 1;
        } else {
            state.daily = DailyUsage {
                date: today.to_string(),
                count: 1,
            };
        }

        save_state(&self.path, &state);
    }

    fn reset_if_new_period(&self, state: &mut UsageState, today: NaiveDate) {
        let expected_start = period_start_for(today, self.config.billing_day);
        if state.period_start != expected_start.to_string() {
            debug!("search quota period rolled over, resetting counters");
            state.period_start = expected_start.to_string();
            state.period_count = 0;
            state.daily = DailyUsage {
                date: today.to_string(),
                count: 0,
            };
        }
    }
}

/// The start of the billing period containing `today`, clamping
/// `billing_day` to the length of whichever month it falls in.
fn period_start_for(today: NaiveDate, billing_day: u32) -> NaiveDate {
    let this_month_day = clamp_day(today.year(), today.month(), billing_day);
    if today.day() >= this_month_day {
        NaiveDate::from_ymd_opt(today.year(), today.month(), this_month_day).unwrap()
    } else {
        let (year, month) = prev_month(today.year(), today.month());
        let day = clamp_day(year, month, billing_day);
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }
}

fn next_period_start(period_start: NaiveDate, billing_day: u32) -> NaiveDate {
    let (year, month) = next_month(period_start.year(), period_start.month());
    let day = clamp_day(year, month, billing_day);
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn clamp_day(year: i32, month: u32, day: u32) -> u32 {
    let days_in_month = days_in_month(year, month);
    day.clamp(1, days_in_month)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = next_month(year, month);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_else(|_| Utc::now().date_naive())
}

fn load_state(path: &Path) -> UsageState {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn save_state(path: &Path, state: &UsageState) {
    if let Ok(json) = serde_json::to_string_pretty(state) {
        let _ = std::fs::write(path, json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_day_clamps_to_short_months() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
        let start = period_start_for(today, 31);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    }

    #[test]
    fn period_start_before_billing_day_falls_back_a_month() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let start = period_start_for(today, 10);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap());
    }

    #[tokio::test]
    async fn monthly_limit_rejects_without_consuming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        let config = SearchConfig {
            monthly_limit: 1,
            ..SearchConfig::default()
        };
        let ledger = QuotaLedger::new(config, path);

        ledger.check().await.unwrap();
        ledger.consume().await;

        let err = ledger.check().await.unwrap_err();
        assert!(err.contains("monthly quota"));
    }
}
