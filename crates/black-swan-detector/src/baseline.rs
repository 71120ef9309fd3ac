//! Baseline statistics store.
//!
//! Per-symbol return and volume distributions plus a cross-asset correlation
//! matrix, computed from daily bars over the lookback window. A `Baseline` is
//! immutable once built; the detector swaps whole snapshots on reload.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use market_core::{BarSeries, Interval, MarketDataSource, Symbol};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::stats;

/// Smallest number of daily bars that yields a usable return distribution.
pub const MIN_BASELINE_BARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnPercentiles {
    pub p01: f64,
    pub p05: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumePercentiles {
    pub p95: f64,
    pub p99: f64,
}

/// Historical distribution summary for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean_returns: f64,
    pub std_returns: f64,
    pub mean_volume: f64,
    pub std_volume: f64,
    pub return_percentiles: ReturnPercentiles,
    pub volume_percentiles: VolumePercentiles,
    /// Daily bars the summary was computed from
    pub sample_size: usize,
}

impl BaselineStats {
    /// `None` when the series is too short for a return distribution.
    pub fn from_daily_bars(series: &BarSeries) -> Option<Self> {
        if series.len() < MIN_BASELINE_BARS {
            return None;
        }
        let returns = stats::pct_change(&series.closes());
        let volumes = series.volumes();

        Some(Self {
            mean_returns: stats::mean(&returns)?,
            std_returns: stats::std_dev(&returns)?,
            mean_volume: stats::mean(&volumes)?,
            std_volume: stats::std_dev(&volumes)?,
            return_percentiles: ReturnPercentiles {
                p01: stats::quantile(&returns, 0.01)?,
                p05: stats::quantile(&returns, 0.05)?,
                p95: stats::quantile(&returns, 0.95)?,
                p99: stats::quantile(&returns, 0.99)?,
            },
            volume_percentiles: VolumePercentiles {
                p95: stats::quantile(&volumes, 0.95)?,
                p99: stats::quantile(&volumes, 0.99)?,
            },
            sample_size: series.len(),
        })
    }

    /// Daily return std scaled by sqrt(252) trading days.
    pub fn annualized_volatility(&self) -> f64 {
        self.std_returns * 252.0_f64.sqrt()
    }
}

/// Symmetric matrix of pairwise return correlations with a unit diagonal
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    symbols: Vec<Symbol>,
    values: DMatrix<f64>,
}

impl CorrelationMatrix {
    /// Build from one aligned return column per symbol. Needs at least two
    /// symbols and two return rows.
    pub fn from_returns(symbols: Vec<Symbol>, columns: &[Vec<f64>]) -> Option<Self> {
        let n = symbols.len();
        if n < 2 || columns.len() != n {
            return None;
        }
        let rows = columns[0].len();
        if rows < 2 || columns.iter().any(|c| c.len() != rows) {
            return None;
        }

        let values = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                1.0
            } else {
                stats::pearson(&columns[i], &columns[j])
            }
        });
        Some(Self { symbols, values })
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn get(&self, a: &Symbol, b: &Symbol) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        Some(self.values[(i, j)])
    }

    fn index_of(&self, symbol: &Symbol) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Mean absolute element-wise difference over the symbols both matrices
    /// share. Undefined (NaN) cells are skipped; `None` when nothing is comparable.
    pub fn mean_abs_difference(&self, other: &CorrelationMatrix) -> Option<f64> {
        let shared: Vec<(usize, usize)> = self
            .symbols
            .iter()
            .enumerate()
            .filter_map(|(i, s)| other.index_of(s).map(|j| (i, j)))
            .collect();
        if shared.len() < 2 {
            return None;
        }

        let mut total = 0.0;
        let mut count = 0usize;
        for &(ai, bi) in &shared {
            for &(aj, bj) in &shared {
                let diff = (self.values[(ai, aj)] - other.values[(bi, bj)]).abs();
                if diff.is_finite() {
                    total += diff;
                    count += 1;
                }
            }
        }
        if count == 0 {
            return None;
        }
        Some(total / count as f64)
    }
}

impl Serialize for CorrelationMatrix {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // symbol -> symbol -> value, NaN rendered as null
        let mut nested: BTreeMap<&str, BTreeMap<&str, Option<f64>>> = BTreeMap::new();
        for (i, a) in self.symbols.iter().enumerate() {
            let row = nested.entry(a.as_str()).or_default();
            for (j, b) in self.symbols.iter().enumerate() {
                let v = self.values[(i, j)];
                row.insert(b.as_str(), v.is_finite().then_some(v));
            }
        }
        nested.serialize(serializer)
    }
}

/// Immutable snapshot of every baseline the evaluators read
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub stats: HashMap<Symbol, BaselineStats>,
    /// Absent until a load finds at least two symbols with history
    pub correlation: Option<CorrelationMatrix>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl Baseline {
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&BaselineStats> {
        self.stats.get(symbol)
    }

    /// Compute the snapshot from already-fetched daily history.
    pub fn from_history(history: &BTreeMap<Symbol, BarSeries>, loaded_at: DateTime<Utc>) -> Self {
        let mut usable: BTreeMap<Symbol, BarSeries> = BTreeMap::new();
        let mut stats_by_symbol = HashMap::new();

        for (symbol, series) in history {
            match BaselineStats::from_daily_bars(series) {
                Some(summary) => {
                    stats_by_symbol.insert(symbol.clone(), summary);
                    usable.insert(symbol.clone(), series.clone());
                }
                None => warn!(
                    "Baseline for {} skipped: {} daily bars (need {})",
                    symbol,
                    series.len(),
                    MIN_BASELINE_BARS
                ),
            }
        }

        let correlation = if usable.len() > 1 {
            let (symbols, columns) = stats::aligned_returns(&usable, |b| b.timestamp.date_naive());
            let matrix = CorrelationMatrix::from_returns(symbols, &columns);
            if matrix.is_none() {
                warn!("Not enough overlapping daily history for a correlation matrix");
            }
            matrix
        } else {
            None
        };

        Self {
            stats: stats_by_symbol,
            correlation,
            loaded_at: Some(loaded_at),
        }
    }
}

/// What a baseline reload managed to build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    pub loaded: Vec<Symbol>,
    pub skipped: Vec<Symbol>,
    pub has_correlation: bool,
    pub loaded_at: DateTime<Utc>,
}

/// Fetch daily bars for `[today - lookback_days, today]` and build a snapshot.
/// A symbol without data, or whose fetch fails, is left out of the snapshot.
pub async fn load_baseline(
    source: &dyn MarketDataSource,
    symbols: &[Symbol],
    lookback_days: i64,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> (Baseline, BaselineSummary) {
    let start = today - Duration::days(lookback_days);
    info!("Loading historical reference data {} .. {}", start, today);

    let mut history = BTreeMap::new();
    for symbol in symbols {
        match source
            .fetch_historical_bars(symbol.base(), start, today, Interval::OneDay)
            .await
        {
            Ok(Some(series)) => {
                info!("Historical data for {} loaded: {} bars", symbol, series.len());
                history.insert(symbol.clone(), series);
            }
            Ok(None) => warn!("No historical data available for {}", symbol),
            Err(e) => warn!("Historical data fetch failed for {}: {}", symbol, e),
        }
    }

    let baseline = Baseline::from_history(&history, now);

    let mut loaded: Vec<Symbol> = baseline.stats.keys().cloned().collect();
    loaded.sort();
    let skipped = symbols
        .iter()
        .filter(|s| !baseline.stats.contains_key(*s))
        .cloned()
        .collect();

    let summary = BaselineSummary {
        loaded,
        skipped,
        has_correlation: baseline.correlation.is_some(),
        loaded_at: now,
    };
    (baseline, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use market_core::Bar;

    fn daily(closes: &[f64], volumes: &[f64]) -> BarSeries {
        BarSeries::new(
            closes
                .iter()
                .zip(volumes.iter())
                .enumerate()
                .map(|(i, (&close, &volume))| Bar {
                    timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume,
                })
                .collect(),
        )
    }

    #[test]
    fn test_stats_from_daily_bars() {
        let series = daily(&[100.0, 110.0, 99.0, 108.9], &[10.0, 20.0, 30.0, 40.0]);
        let stats = BaselineStats::from_daily_bars(&series).unwrap();

        // returns: +10%, -10%, +10%
        assert!((stats.mean_returns - 0.1 / 3.0).abs() < 1e-9);
        assert!(stats.std_returns > 0.0);
        assert_eq!(stats.mean_volume, 25.0);
        assert_eq!(stats.sample_size, 4);
        assert!((stats.return_percentiles.p99 - 0.1).abs() < 1e-9);
        // -0.1 + 0.02 * (0.1 - -0.1)
        assert!((stats.return_percentiles.p01 + 0.096).abs() < 1e-9);
        assert!(stats.volume_percentiles.p95 > 38.0);
    }

    #[test]
    fn test_short_history_has_no_stats() {
        assert!(BaselineStats::from_daily_bars(&daily(&[1.0, 2.0], &[1.0, 1.0])).is_none());
    }

    #[test]
    fn test_correlation_matrix_unit_diagonal_and_symmetric() {
        let symbols = vec![Symbol::new("A"), Symbol::new("B"), Symbol::new("C")];
        let columns = vec![
            vec![0.01, -0.02, 0.03, 0.00],
            vec![0.02, -0.04, 0.06, 0.00],
            vec![-0.01, 0.01, -0.02, 0.02],
        ];
        let m = CorrelationMatrix::from_returns(symbols.clone(), &columns).unwrap();
        for s in &symbols {
            assert_eq!(m.get(s, s), Some(1.0));
        }
        assert!((m.get(&symbols[0], &symbols[1]).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(m.get(&symbols[0], &symbols[2]), m.get(&symbols[2], &symbols[0]));
    }

    #[test]
    fn test_mean_abs_difference_over_shared_symbols() {
        let ab = vec![Symbol::new("A"), Symbol::new("B")];
        let up = CorrelationMatrix::from_returns(ab.clone(), &[vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]]).unwrap();
        let down = CorrelationMatrix::from_returns(ab, &[vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]]).unwrap();
        // off-diagonal cells differ by 2, diagonal by 0 => 4 / 4 cells
        assert!((up.mean_abs_difference(&down).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(up.mean_abs_difference(&up), Some(0.0));

        let other = CorrelationMatrix::from_returns(
            vec![Symbol::new("A"), Symbol::new("Z")],
            &[vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]],
        )
        .unwrap();
        assert_eq!(up.mean_abs_difference(&other), None);
    }

    #[test]
    fn test_baseline_from_history_builds_correlation() {
        let mut history = BTreeMap::new();
        history.insert(Symbol::new("A"), daily(&[100.0, 101.0, 99.0, 102.0, 103.0], &[1.0; 5]));
        history.insert(Symbol::new("B"), daily(&[50.0, 51.0, 49.0, 52.0, 51.0], &[2.0; 5]));
        history.insert(Symbol::new("C"), daily(&[1.0, 2.0], &[1.0; 2]));

        let baseline = Baseline::from_history(&history, Utc::now());
        assert_eq!(baseline.stats.len(), 2);
        assert!(baseline.get(&Symbol::new("C")).is_none());
        let corr = baseline.correlation.unwrap();
        assert_eq!(corr.symbols(), &[Symbol::new("A"), Symbol::new("B")]);
    }

    #[test]
    fn test_single_symbol_has_no_correlation() {
        let mut history = BTreeMap::new();
        history.insert(Symbol::new("A"), daily(&[100.0, 101.0, 99.0, 102.0], &[1.0; 4]));
        let baseline = Baseline::from_history(&history, Utc::now());
        assert_eq!(baseline.stats.len(), 1);
        assert!(baseline.correlation.is_none());
    }
}
