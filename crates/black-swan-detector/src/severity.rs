//! Severity scoring: a linear ramp above each signal's threshold, clipped to [0, 1].
//!
//! The denominators set how quickly each signal saturates: volatility reaches
//! 1.0 at three times its threshold, volume at four times, and correlation
//! drift at a mean change of 1.0.

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub volatility: f64,
    pub volume: f64,
    pub correlation: f64,
}

impl Thresholds {
    /// Mean absolute correlation change above which the correlation evaluator fires.
    pub fn correlation_drift(&self) -> f64 {
        1.0 - self.correlation
    }

    pub fn volatility_severity(&self, ratio: f64) -> f64 {
        clip_unit((ratio - self.volatility) / (2.0 * self.volatility))
    }

    pub fn volume_severity(&self, ratio: f64) -> f64 {
        clip_unit((ratio - self.volume) / (3.0 * self.volume))
    }

    pub fn correlation_severity(&self, change: f64) -> f64 {
        let t = self.correlation_drift();
        clip_unit((change - t) / (1.0 - t))
    }
}

impl From<&DetectorConfig> for Thresholds {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            volatility: config.volatility_threshold,
            volume: config.volume_threshold,
            correlation: config.correlation_threshold,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds::from(&DetectorConfig::default())
    }
}

fn clip_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
