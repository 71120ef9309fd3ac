use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tradable asset identifier, e.g. `BTC/USDT` or `BTC/USDT:USDT`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbol without the settlement suffix (`BTC/USDT:USDT` -> `BTC/USDT`).
    /// Data sources are queried with this form.
    pub fn base(&self) -> &str {
        match self.0.split_once(':') {
            Some((base, _)) => base,
            None => &self.0,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bar size requested from a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn duration(&self) -> Duration {
        match self {
            Interval::OneHour => Duration::hours(1),
            Interval::OneDay => Duration::days(1),
        }
    }

    /// `(multiplier, timespan)` pair used by aggregate-style REST endpoints
    pub fn as_aggregate(&self) -> (u32, &'static str) {
        match self {
            Interval::OneHour => (1, "hour"),
            Interval::OneDay => (1, "day"),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::OneHour => f.write_str("1h"),
            Interval::OneDay => f.write_str("1d"),
        }
    }
}

/// Bars for one symbol, strictly ordered by timestamp with no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Sorts by timestamp. When two bars share a timestamp the later one in
    /// the input wins.
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => deduped.push(bar),
            }
        }
        Self { bars: deduped }
    }

    /// `None` when there are no bars, so callers never branch on an empty sentinel.
    pub fn non_empty(bars: Vec<Bar>) -> Option<Self> {
        let series = Self::new(bars);
        if series.is_empty() {
            None
        } else {
            Some(series)
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// Keep only the most recent `n` bars.
    pub fn tail(&self, n: usize) -> Self {
        let start = self.bars.len().saturating_sub(n);
        Self {
            bars: self.bars[start..].to_vec(),
        }
    }
}

impl<'a> IntoIterator for &'a BarSeries {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}
