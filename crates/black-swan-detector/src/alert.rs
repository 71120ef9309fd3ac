use chrono::{DateTime, Utc};
use market_core::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use crate::config::MAX_EVENT_HISTORY;

/// Which evaluator produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Volatility,
    Volume,
    Correlation,
}

impl AlertKind {
    pub fn name(&self) -> &'static str {
        match self {
            AlertKind::Volatility => "volatility",
            AlertKind::Volume => "volume",
            AlertKind::Correlation => "correlation",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The measured values that triggered an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertDetails {
    Volatility {
        current_volatility: f64,
        historical_volatility: f64,
        volatility_ratio: f64,
        threshold: f64,
    },
    Volume {
        current_volume: f64,
        historical_avg_volume: f64,
        volume_ratio: f64,
        threshold: f64,
    },
    Correlation {
        correlation_change: f64,
        threshold: f64,
    },
}

/// Raw signal-level alert produced by one evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Absent for correlation alerts, which describe the whole basket
    pub symbol: Option<Symbol>,
    pub timestamp: DateTime<Utc>,
    /// Normalized to [0, 1]
    pub severity: f64,
    pub details: AlertDetails,
}

impl Alert {
    pub fn kind(&self) -> AlertKind {
        match self.details {
            AlertDetails::Volatility { .. } => AlertKind::Volatility,
            AlertDetails::Volume { .. } => AlertKind::Volume,
            AlertDetails::Correlation { .. } => AlertKind::Correlation,
        }
    }

    pub fn summary(&self) -> String {
        let subject = self
            .symbol
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "basket".to_string());
        match &self.details {
            AlertDetails::Volatility {
                volatility_ratio,
                threshold,
                ..
            } => format!(
                "{}: volatility {:.2}x baseline (threshold {:.2}x)",
                subject, volatility_ratio, threshold
            ),
            AlertDetails::Volume {
                volume_ratio,
                threshold,
                ..
            } => format!(
                "{}: volume {:.2}x baseline mean (threshold {:.2}x)",
                subject, volume_ratio, threshold
            ),
            AlertDetails::Correlation {
                correlation_change,
                threshold,
            } => format!(
                "{}: mean correlation change {:.2} (threshold {:.2})",
                subject, correlation_change, threshold
            ),
        }
    }
}

/// How urgently a composite event should be handled downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Normal,
    High,
    /// Severity high enough to warrant an emergency stop of trading
    Critical,
}

impl EventPriority {
    pub fn from_severity(severity: f64) -> Self {
        if severity > 0.8 {
            EventPriority::Critical
        } else if severity > 0.5 {
            EventPriority::High
        } else {
            EventPriority::Normal
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EventPriority::Normal => "NORMAL",
            EventPriority::High => "HIGH",
            EventPriority::Critical => "CRITICAL",
        }
    }
}

/// All raw alerts of one evaluation tick, as dispatched to notification sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeEvent {
    pub title: String,
    pub message: String,
    /// Maximum severity across `alerts`
    pub severity: f64,
    pub timestamp: DateTime<Utc>,
    pub alerts: Vec<Alert>,
}

impl CompositeEvent {
    pub fn from_alerts(alerts: Vec<Alert>, timestamp: DateTime<Utc>) -> Self {
        let severity = alerts.iter().map(|a| a.severity).fold(0.0, f64::max);
        Self {
            title: "Black Swan Event detected".to_string(),
            message: format!(
                "Unusual market activity detected with severity {:.2}",
                severity
            ),
            severity,
            timestamp,
            alerts,
        }
    }

    pub fn priority(&self) -> EventPriority {
        EventPriority::from_severity(self.severity)
    }

    /// De-duplicated symbols named by the constituent alerts.
    pub fn affected_symbols(&self) -> Vec<Symbol> {
        self.alerts
            .iter()
            .filter_map(|a| a.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Bounded FIFO of dispatched composite events
#[derive(Debug, Clone)]
pub struct EventHistory {
    events: VecDeque<CompositeEvent>,
    capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: CompositeEvent) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Oldest first
    pub fn to_vec(&self) -> Vec<CompositeEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn count_above(&self, severity: f64) -> usize {
        self.events.iter().filter(|e| e.severity > severity).count()
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(MAX_EVENT_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_alert(symbol: &str, severity: f64) -> Alert {
        Alert {
            symbol: Some(Symbol::new(symbol)),
            timestamp: Utc::now(),
            severity,
            details: AlertDetails::Volume {
                current_volume: 600.0,
                historical_avg_volume: 100.0,
                volume_ratio: 6.0,
                threshold: 5.0,
            },
        }
    }

    #[test]
    fn test_composite_takes_max_severity() {
        let event = CompositeEvent::from_alerts(
            vec![volume_alert("BTC/USDT", 0.2), volume_alert("ETH/USDT", 0.6)],
            Utc::now(),
        );
        assert_eq!(event.severity, 0.6);
        assert_eq!(event.priority(), EventPriority::High);
        assert!(event.message.contains("0.60"));
    }

    #[test]
    fn test_affected_symbols_deduplicated() {
        let mut alerts = vec![volume_alert("ETH/USDT", 0.1), volume_alert("BTC/USDT", 0.1)];
        alerts.push(volume_alert("ETH/USDT", 0.3));
        alerts.push(Alert {
            symbol: None,
            timestamp: Utc::now(),
            severity: 0.05,
            details: AlertDetails::Correlation {
                correlation_change: 0.2,
                threshold: 0.15,
            },
        });
        let event = CompositeEvent::from_alerts(alerts, Utc::now());
        assert_eq!(
            event.affected_symbols(),
            vec![Symbol::new("BTC/USDT"), Symbol::new("ETH/USDT")]
        );
    }

    #[test]
    fn test_priority_cutoffs() {
        assert_eq!(EventPriority::from_severity(0.5), EventPriority::Normal);
        assert_eq!(EventPriority::from_severity(0.51), EventPriority::High);
        assert_eq!(EventPriority::from_severity(0.8), EventPriority::High);
        assert_eq!(EventPriority::from_severity(0.81), EventPriority::Critical);
    }

    #[test]
    fn test_history_evicts_oldest_first() {
        let mut history = EventHistory::new(100);
        for i in 0..105 {
            let mut event = CompositeEvent::from_alerts(vec![volume_alert("BTC/USDT", 0.1)], Utc::now());
            event.title = format!("event {}", i);
            history.push(event);
        }
        assert_eq!(history.len(), 100);
        let events = history.to_vec();
        assert_eq!(events[0].title, "event 5");
        assert_eq!(events[99].title, "event 104");
    }

    #[test]
    fn test_alert_serializes_with_type_tag() {
        let json = serde_json::to_value(volume_alert("BTC/USDT", 0.1)).unwrap();
        assert_eq!(json["details"]["type"], "volume");
        assert_eq!(json["symbol"], "BTC/USDT");
    }
}
