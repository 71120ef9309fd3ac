//! Black swan detector
//!
//! Compares live intraday bars for a watch list against a historical baseline
//! and raises composite alerts on extreme volatility, volume or correlation
//! breakdown. Alerts pass through a daily quota and cooldown before reaching
//! the registered notification sinks.

pub mod alert;
pub mod baseline;
pub mod config;
pub mod detector;
pub mod error;
pub mod gate;
pub mod severity;
pub mod signals;
pub mod sink;
pub mod stats;


pub use alert::{Alert, AlertDetails, AlertKind, CompositeEvent, EventHistory, EventPriority};
pub use baseline::{Baseline, BaselineStats, BaselineSummary, CorrelationMatrix};
pub use config::DetectorConfig;
pub use detector::{BlackSwanDetector, DetectorStatus, ManualCheckReport, TickOutcome};
pub use error::{DetectorError, SignalError};
pub use gate::{AlertGate, GateDecision, SuppressionReason};
pub use severity::Thresholds;
pub use sink::{CallbackSink, NotificationSink};
