use anyhow::{Context, Result};
use market_core::Symbol;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::DetectorError;

/// Sleep after an iteration that failed, instead of the normal check interval.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Upper bound on how long `stop_monitoring` waits for the loop to exit.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Composite events kept in memory, oldest evicted first.
pub const MAX_EVENT_HISTORY: usize = 100;

/// Hourly bars requested per symbol on every tick.
pub const RECENT_BAR_LIMIT: usize = 30;

/// Events above this severity count as high severity in the status view.
pub const HIGH_SEVERITY_CUTOFF: f64 = 0.7;

/// Longest accepted cooldown between dispatched events (one year).
pub const MAX_ALERT_COOLDOWN_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    // Signal thresholds
    pub volatility_threshold: f64,   // 3.5x baseline volatility
    pub volume_threshold: f64,       // 5.0x baseline mean volume
    pub correlation_threshold: f64,  // 0.85 => alert above 0.15 mean drift

    // Scheduling
    pub check_interval_seconds: u64, // 300 (5 minutes)

    pub watch_list: Vec<Symbol>,
    pub historical_lookback_days: i64,

    // Informational; the evaluators use fixed history lengths
    pub volatility_window: usize,
    pub volume_window: usize,

    // Alert gate
    pub max_alerts_per_day: u32,
    pub alert_cooldown_minutes: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            volatility_threshold: 3.5,
            volume_threshold: 5.0,
            correlation_threshold: 0.85,
            check_interval_seconds: 300,
            watch_list: default_watch_list(),
            historical_lookback_days: 365,
            volatility_window: 20,
            volume_window: 20,
            max_alerts_per_day: 3,
            alert_cooldown_minutes: 60,
        }
    }
}

fn default_watch_list() -> Vec<Symbol> {
    ["BTC/USDT:USDT", "ETH/USDT:USDT", "BNB/USDT:USDT", "SOL/USDT:USDT"]
        .into_iter()
        .map(Symbol::new)
        .collect()
}

impl DetectorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            volatility_threshold: env_or("BLACK_SWAN_VOLATILITY_THRESHOLD", defaults.volatility_threshold)?,
            volume_threshold: env_or("BLACK_SWAN_VOLUME_THRESHOLD", defaults.volume_threshold)?,
            correlation_threshold: env_or("BLACK_SWAN_CORRELATION_THRESHOLD", defaults.correlation_threshold)?,
            check_interval_seconds: env_or("BLACK_SWAN_CHECK_INTERVAL", defaults.check_interval_seconds)?,

            watch_list: match env::var("BLACK_SWAN_WATCHLIST") {
                Ok(list) => parse_watch_list(&list),
                Err(_) => defaults.watch_list,
            },
            historical_lookback_days: env_or("BLACK_SWAN_LOOKBACK_DAYS", defaults.historical_lookback_days)?,

            volatility_window: env_or("BLACK_SWAN_VOLATILITY_WINDOW", defaults.volatility_window)?,
            volume_window: env_or("BLACK_SWAN_VOLUME_WINDOW", defaults.volume_window)?,

            max_alerts_per_day: env_or("BLACK_SWAN_MAX_ALERTS_PER_DAY", defaults.max_alerts_per_day)?,
            alert_cooldown_minutes: env_or("BLACK_SWAN_ALERT_COOLDOWN_MINUTES", defaults.alert_cooldown_minutes)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DetectorError> {
        if !(self.volatility_threshold > 0.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "volatility_threshold must be positive, got {}",
                self.volatility_threshold
            )));
        }
        if !(self.volume_threshold > 0.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "volume_threshold must be positive, got {}",
                self.volume_threshold
            )));
        }
        if !(self.correlation_threshold > 0.0 && self.correlation_threshold < 1.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "correlation_threshold must be in (0, 1), got {}",
                self.correlation_threshold
            )));
        }
        if self.watch_list.is_empty() {
            return Err(DetectorError::InvalidConfig("watch_list is empty".to_string()));
        }
        if self.check_interval_seconds == 0 {
            return Err(DetectorError::InvalidConfig(
                "check_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.historical_lookback_days <= 0 {
            return Err(DetectorError::InvalidConfig(format!(
                "historical_lookback_days must be positive, got {}",
                self.historical_lookback_days
            )));
        }
        if !(0..=MAX_ALERT_COOLDOWN_MINUTES).contains(&self.alert_cooldown_minutes) {
            return Err(DetectorError::InvalidConfig(format!(
                "alert_cooldown_minutes must be between 0 and {}, got {}",
                MAX_ALERT_COOLDOWN_MINUTES, self.alert_cooldown_minutes
            )));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    /// Negative values count as no cooldown; values too large to represent
    /// saturate.
    pub fn alert_cooldown(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.alert_cooldown_minutes.max(0))
            .unwrap_or(chrono::Duration::MAX)
    }
}

fn parse_watch_list(list: &str) -> Vec<Symbol> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Symbol::new)
        .collect()
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = DetectorConfig::default();
        assert_eq!(config.volatility_threshold, 3.5);
        assert_eq!(config.volume_threshold, 5.0);
        assert_eq!(config.correlation_threshold, 0.85);
        assert_eq!(config.check_interval_seconds, 300);
        assert_eq!(config.historical_lookback_days, 365);
        assert_eq!(config.max_alerts_per_day, 3);
        assert_eq!(config.alert_cooldown_minutes, 60);
        assert_eq!(config.watch_list.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_correlation_threshold() {
        let config = DetectorConfig {
            correlation_threshold: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DetectorError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_empty_watch_list() {
        let config = DetectorConfig {
            watch_list: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_alert_cooldown() {
        let mut config = DetectorConfig {
            alert_cooldown_minutes: MAX_ALERT_COOLDOWN_MINUTES,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.alert_cooldown_minutes = 1_000_000_000_000;
        assert!(matches!(config.validate(), Err(DetectorError::InvalidConfig(_))));
        config.alert_cooldown_minutes = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_alert_cooldown_saturates() {
        let config = DetectorConfig {
            alert_cooldown_minutes: i64::MAX,
            ..Default::default()
        };
        assert_eq!(config.alert_cooldown(), chrono::Duration::MAX);
        assert_eq!(DetectorConfig::default().alert_cooldown(), chrono::Duration::minutes(60));
    }

    #[test]
    fn test_parse_watch_list() {
        let list = parse_watch_list(" BTC/USDT , ETH/USDT:USDT ,,");
        assert_eq!(list, vec![Symbol::new("BTC/USDT"), Symbol::new("ETH/USDT:USDT")]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DetectorConfig =
            serde_json::from_str(r#"{"volume_threshold": 8.0, "watch_list": ["BTC/USDT"]}"#).unwrap();
        assert_eq!(config.volume_threshold, 8.0);
        assert_eq!(config.volatility_threshold, 3.5);
        assert_eq!(config.watch_list, vec![Symbol::new("BTC/USDT")]);
    }
}
