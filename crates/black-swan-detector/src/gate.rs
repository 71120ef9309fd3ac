//! Alert gate: daily quota and cooldown between dispatched composite events.
//!
//! Checks run in order on every tick that produced at least one raw alert:
//! the daily limit first, then the cooldown. Suppression never touches state;
//! only a dispatch advances `last_alert_time` and the daily counter.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a qualifying tick was not dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    DailyLimit,
    Cooldown,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressionReason::DailyLimit => f.write_str("daily_limit"),
            SuppressionReason::Cooldown => f.write_str("cooldown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Dispatch,
    Suppress(SuppressionReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertGate {
    max_alerts_per_day: u32,
    cooldown: Duration,
    last_alert_time: Option<DateTime<Utc>>,
    alert_count_today: u32,
    reset_date: NaiveDate,
}

impl AlertGate {
    pub fn new(max_alerts_per_day: u32, cooldown: Duration, today: NaiveDate) -> Self {
        Self {
            max_alerts_per_day,
            cooldown,
            last_alert_time: None,
            alert_count_today: 0,
            reset_date: today,
        }
    }

    /// Zero the daily counter once the local date has advanced past the last
    /// reset. Returns true when a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today > self.reset_date {
            self.alert_count_today = 0;
            self.reset_date = today;
            return true;
        }
        false
    }

    /// Read-only: what would happen to a qualifying tick at `now`.
    pub fn evaluate(&self, now: DateTime<Utc>) -> GateDecision {
        if self.alert_count_today >= self.max_alerts_per_day {
            return GateDecision::Suppress(SuppressionReason::DailyLimit);
        }
        if let Some(cooldown_end) = self.cooldown_end() {
            if now < cooldown_end {
                return GateDecision::Suppress(SuppressionReason::Cooldown);
            }
        }
        GateDecision::Dispatch
    }

    pub fn record_dispatch(&mut self, now: DateTime<Utc>) {
        self.last_alert_time = Some(now);
        self.alert_count_today += 1;
    }

    /// End of the cooldown after the last dispatch. A cooldown reaching past
    /// the representable range never ends.
    pub fn cooldown_end(&self) -> Option<DateTime<Utc>> {
        self.last_alert_time.map(|t| {
            t.checked_add_signed(self.cooldown)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    pub fn last_alert_time(&self) -> Option<DateTime<Utc>> {
        self.last_alert_time
    }

    pub fn alert_count_today(&self) -> u32 {
        self.alert_count_today
    }

    pub fn max_alerts_per_day(&self) -> u32 {
        self.max_alerts_per_day
    }

    pub fn reset_date(&self) -> NaiveDate {
        self.reset_date
    }
}
