//! Signal evaluators.
//!
//! Each evaluator compares live intraday bars against the baseline snapshot and
//! returns the alerts it would raise. They are pure: no detector state is read
//! or written, and a failure for one symbol is logged and skipped without
//! affecting the others.

use chrono::{DateTime, Utc};
use market_core::{BarSeries, Symbol};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertDetails};
use crate::baseline::{Baseline, BaselineStats, CorrelationMatrix};
use crate::error::SignalError;
use crate::severity::Thresholds;
use crate::stats;

/// Hourly periods per day, used to scale intraday volatility.
const HOURS_PER_DAY: f64 = 24.0;

/// Bars needed for two returns, the minimum for a standard deviation.
const MIN_VOLATILITY_BARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolatilityReading {
    pub current_volatility: f64,
    pub historical_volatility: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeReading {
    pub current_volume: f64,
    pub historical_avg_volume: f64,
    pub ratio: f64,
}

/// Std of hourly returns scaled by sqrt(24).
pub fn intraday_volatility(series: &BarSeries) -> Option<f64> {
    let returns = stats::pct_change(&series.closes());
    stats::std_dev(&returns).map(|sd| sd * HOURS_PER_DAY.sqrt())
}

pub fn volatility_reading(
    symbol: &Symbol,
    series: &BarSeries,
    baseline: &BaselineStats,
) -> Result<VolatilityReading, SignalError> {
    if series.len() < MIN_VOLATILITY_BARS {
        return Err(SignalError::TooFewBars {
            symbol: symbol.clone(),
            required: MIN_VOLATILITY_BARS,
            actual: series.len(),
        });
    }
    let current_volatility = intraday_volatility(series).ok_or_else(|| SignalError::NonFinite {
        symbol: symbol.clone(),
        reason: "intraday return deviation".to_string(),
    })?;

    let historical_volatility = baseline.annualized_volatility();
    if !(historical_volatility > 0.0) {
        return Err(SignalError::DegenerateBaseline {
            symbol: symbol.clone(),
            reason: format!("historical volatility {}", historical_volatility),
        });
    }

    Ok(VolatilityReading {
        current_volatility,
        historical_volatility,
        ratio: current_volatility / historical_volatility,
    })
}

pub fn volume_reading(
    symbol: &Symbol,
    series: &BarSeries,
    baseline: &BaselineStats,
) -> Result<VolumeReading, SignalError> {
    let last = series.last().ok_or_else(|| SignalError::TooFewBars {
        symbol: symbol.clone(),
        required: 1,
        actual: 0,
    })?;

    let historical_avg_volume = baseline.mean_volume;
    if !(historical_avg_volume > 0.0) {
        return Err(SignalError::DegenerateBaseline {
            symbol: symbol.clone(),
            reason: format!("mean volume {}", historical_avg_volume),
        });
    }
    if !last.volume.is_finite() {
        return Err(SignalError::NonFinite {
            symbol: symbol.clone(),
            reason: "latest volume".to_string(),
        });
    }

    Ok(VolumeReading {
        current_volume: last.volume,
        historical_avg_volume,
        ratio: last.volume / historical_avg_volume,
    })
}

/// One alert per symbol whose volatility ratio exceeds the threshold.
pub fn check_volatility(
    current: &BTreeMap<Symbol, BarSeries>,
    baseline: &Baseline,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for (symbol, series) in current {
        let Some(stats) = baseline.get(symbol) else {
            debug!("No baseline for {}, volatility check skipped", symbol);
            continue;
        };

        let reading = match volatility_reading(symbol, series, stats) {
            Ok(r) => r,
            Err(e) => {
                warn!("Volatility check failed: {}", e);
                continue;
            }
        };

        if reading.ratio > thresholds.volatility {
            warn!(
                "High volatility detected for {}: ratio = {:.2}x (threshold: {}x)",
                symbol, reading.ratio, thresholds.volatility
            );
            alerts.push(Alert {
                symbol: Some(symbol.clone()),
                timestamp: now,
                severity: thresholds.volatility_severity(reading.ratio),
                details: AlertDetails::Volatility {
                    current_volatility: reading.current_volatility,
                    historical_volatility: reading.historical_volatility,
                    volatility_ratio: reading.ratio,
                    threshold: thresholds.volatility,
                },
            });
        }
    }

    alerts
}

/// One alert per symbol whose latest volume exceeds the threshold multiple of
/// its baseline mean.
pub fn check_volume(
    current: &BTreeMap<Symbol, BarSeries>,
    baseline: &Baseline,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for (symbol, series) in current {
        let Some(stats) = baseline.get(symbol) else {
            debug!("No baseline for {}, volume check skipped", symbol);
            continue;
        };

        let reading = match volume_reading(symbol, series, stats) {
            Ok(r) => r,
            Err(e) => {
                warn!("Volume check failed: {}", e);
                continue;
            }
        };

        if reading.ratio > thresholds.volume {
            warn!(
                "High volume detected for {}: ratio = {:.2}x (threshold: {}x)",
                symbol, reading.ratio, thresholds.volume
            );
            alerts.push(Alert {
                symbol: Some(symbol.clone()),
                timestamp: now,
                severity: thresholds.volume_severity(reading.ratio),
                details: AlertDetails::Volume {
                    current_volume: reading.current_volume,
                    historical_avg_volume: reading.historical_avg_volume,
                    volume_ratio: reading.ratio,
                    threshold: thresholds.volume,
                },
            });
        }
    }

    alerts
}

/// Mean absolute drift between the current intraday correlation structure and
/// the baseline matrix. `None` when either side is unavailable.
pub fn correlation_change(
    current: &BTreeMap<Symbol, BarSeries>,
    baseline: &CorrelationMatrix,
) -> Option<f64> {
    let (symbols, columns) = stats::aligned_returns(current, |b| b.timestamp);
    let current_corr = CorrelationMatrix::from_returns(symbols, &columns)?;
    baseline.mean_abs_difference(&current_corr)
}

/// At most one basket-wide alert per tick. Requires two symbols with current
/// data and a baseline correlation matrix from a completed load.
pub fn check_correlation_breakdown(
    current: &BTreeMap<Symbol, BarSeries>,
    baseline: &Baseline,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> Option<Alert> {
    if current.len() < 2 {
        return None;
    }
    let baseline_corr = baseline.correlation.as_ref()?;

    let Some(change) = correlation_change(current, baseline_corr) else {
        debug!("Correlation check skipped: no comparable intraday correlation");
        return None;
    };

    let drift = thresholds.correlation_drift();
    if change > drift {
        warn!(
            "Significant correlation change detected: change = {:.2} (threshold: {:.2})",
            change, drift
        );
        return Some(Alert {
            symbol: None,
            timestamp: now,
            severity: thresholds.correlation_severity(change),
            details: AlertDetails::Correlation {
                correlation_change: change,
                threshold: drift,
            },
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;
    use crate::baseline::{ReturnPercentiles, VolumePercentiles};
    use chrono::{Duration, TimeZone};
    use market_core::Bar;

    fn stats_with(std_returns: f64, mean_volume: f64) -> BaselineStats {
        BaselineStats {
            mean_returns: 0.0,
            std_returns,
            mean_volume,
            std_volume: 1.0,
            return_percentiles: ReturnPercentiles {
                p01: -0.05,
                p05: -0.03,
                p95: 0.03,
                p99: 0.05,
            },
            volume_percentiles: VolumePercentiles { p95: 150.0, p99: 200.0 },
            sample_size: 365,
        }
    }

    fn hourly(closes: &[f64], volumes: &[f64]) -> BarSeries {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        BarSeries::new(
            closes
                .iter()
                .zip(volumes.iter())
                .enumerate()
                .map(|(i, (&close, &volume))| Bar {
                    timestamp: start + Duration::hours(i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume,
                })
                .collect(),
        )
    }

    /// Closes alternating +r / -r, giving a known hourly return deviation.
    fn zigzag(n: usize, r: f64) -> Vec<f64> {
        let mut closes = vec![100.0];
        for i in 1..n {
            let prev = closes[i - 1];
            let step = if i % 2 == 1 { r } else { -r };
            closes.push(prev * (1.0 + step));
        }
        closes
    }

    fn baseline_for(symbol: &Symbol, stats: BaselineStats) -> Baseline {
        let mut baseline = Baseline::default();
        baseline.stats.insert(symbol.clone(), stats);
        baseline
    }

    #[test]
    fn test_volatility_alert_above_threshold() {
        let symbol = Symbol::new("BTC/USDT");
        let series = hourly(&zigzag(30, 0.05), &[100.0; 30]);
        let current_vol = intraday_volatility(&series).unwrap();

        // choose a baseline so the ratio lands on 4.2
        let std_returns = current_vol / 4.2 / 252.0_f64.sqrt();
        let baseline = baseline_for(&symbol, stats_with(std_returns, 100.0));
        let mut current = BTreeMap::new();
        current.insert(symbol.clone(), series);

        let alerts = check_volatility(&current, &baseline, &Thresholds::default(), Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind(), AlertKind::Volatility);
        assert_eq!(alerts[0].symbol.as_ref(), Some(&symbol));
        assert!((alerts[0].severity - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_below_threshold_no_alert() {
        let symbol = Symbol::new("BTC/USDT");
        let series = hourly(&zigzag(30, 0.001), &[100.0; 30]);
        let baseline = baseline_for(&symbol, stats_with(0.05, 100.0));
        let mut current = BTreeMap::new();
        current.insert(symbol, series);

        assert!(check_volatility(&current, &baseline, &Thresholds::default(), Utc::now()).is_empty());
    }

    #[test]
    fn test_volume_alert_severity() {
        let symbol = Symbol::new("ETH/USDT");
        let mut volumes = vec![100.0; 30];
        volumes[29] = 600.0;
        let series = hourly(&[100.0; 30], &volumes);
        let baseline = baseline_for(&symbol, stats_with(0.01, 100.0));
        let mut current = BTreeMap::new();
        current.insert(symbol, series);

        let alerts = check_volume(&current, &baseline, &Thresholds::default(), Utc::now());
        assert_eq!(alerts.len(), 1);
        assert!((alerts[0].severity - 1.0 / 15.0).abs() < 1e-9);
        match &alerts[0].details {
            AlertDetails::Volume { volume_ratio, .. } => assert!((volume_ratio - 6.0).abs() < 1e-12),
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_volume_exactly_at_threshold_no_alert() {
        let symbol = Symbol::new("ETH/USDT");
        let series = hourly(&[100.0; 5], &[100.0, 100.0, 100.0, 100.0, 500.0]);
        let baseline = baseline_for(&symbol, stats_with(0.01, 100.0));
        let mut current = BTreeMap::new();
        current.insert(symbol, series);

        assert!(check_volume(&current, &baseline, &Thresholds::default(), Utc::now()).is_empty());
    }

    #[test]
    fn test_symbols_without_baseline_are_skipped() {
        let mut current = BTreeMap::new();
        current.insert(Symbol::new("SOL/USDT"), hourly(&zigzag(30, 0.2), &[1e9; 30]));
        let baseline = Baseline::default();

        assert!(check_volatility(&current, &baseline, &Thresholds::default(), Utc::now()).is_empty());
        assert!(check_volume(&current, &baseline, &Thresholds::default(), Utc::now()).is_empty());
    }

    #[test]
    fn test_failing_symbol_does_not_block_others() {
        let good = Symbol::new("BTC/USDT");
        let short = Symbol::new("ETH/USDT");
        let mut baseline = baseline_for(&good, stats_with(1e-6, 100.0));
        baseline.stats.insert(short.clone(), stats_with(1e-6, 100.0));

        let mut current = BTreeMap::new();
        current.insert(good.clone(), hourly(&zigzag(30, 0.05), &[100.0; 30]));
        current.insert(short, hourly(&[100.0, 101.0], &[100.0; 2]));

        let alerts = check_volatility(&current, &baseline, &Thresholds::default(), Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].symbol, Some(good));
    }

    #[test]
    fn test_degenerate_baseline_is_an_error() {
        let symbol = Symbol::new("BTC/USDT");
        let series = hourly(&[100.0; 5], &[100.0; 5]);
        assert!(matches!(
            volume_reading(&symbol, &series, &stats_with(0.01, 0.0)),
            Err(SignalError::DegenerateBaseline { .. })
        ));
    }

    fn basket_baseline(corr_columns: &[Vec<f64>]) -> Baseline {
        let symbols = vec![Symbol::new("A"), Symbol::new("B")];
        let mut baseline = Baseline::default();
        for s in &symbols {
            baseline.stats.insert(s.clone(), stats_with(0.01, 100.0));
        }
        baseline.correlation = CorrelationMatrix::from_returns(symbols, corr_columns);
        baseline
    }

    #[test]
    fn test_correlation_breakdown_single_alert() {
        // baseline: A and B move together
        let baseline = basket_baseline(&[vec![0.01, -0.02, 0.03], vec![0.01, -0.02, 0.03]]);

        // now: B moves against A
        let a = zigzag(30, 0.02);
        let b: Vec<f64> = a.iter().map(|c| 20000.0 / c).collect();
        let mut current = BTreeMap::new();
        current.insert(Symbol::new("A"), hourly(&a, &[100.0; 30]));
        current.insert(Symbol::new("B"), hourly(&b, &[100.0; 30]));

        let alert = check_correlation_breakdown(&current, &baseline, &Thresholds::default(), Utc::now())
            .expect("correlation alert");
        assert_eq!(alert.kind(), AlertKind::Correlation);
        assert!(alert.symbol.is_none());
        assert!(alert.severity > 0.0 && alert.severity <= 1.0);
    }

    #[test]
    fn test_correlation_requires_baseline_matrix() {
        let mut baseline = basket_baseline(&[vec![0.01, -0.02, 0.03], vec![0.01, -0.02, 0.03]]);
        baseline.correlation = None;

        let a = zigzag(30, 0.02);
        let b: Vec<f64> = a.iter().map(|c| 20000.0 / c).collect();
        let mut current = BTreeMap::new();
        current.insert(Symbol::new("A"), hourly(&a, &[100.0; 30]));
        current.insert(Symbol::new("B"), hourly(&b, &[100.0; 30]));

        assert!(check_correlation_breakdown(&current, &baseline, &Thresholds::default(), Utc::now()).is_none());
    }

    #[test]
    fn test_correlation_requires_two_symbols() {
        let baseline = basket_baseline(&[vec![0.01, -0.02, 0.03], vec![0.01, -0.02, 0.03]]);
        let mut current = BTreeMap::new();
        current.insert(Symbol::new("A"), hourly(&zigzag(30, 0.02), &[100.0; 30]));

        assert!(check_correlation_breakdown(&current, &baseline, &Thresholds::default(), Utc::now()).is_none());
    }

    #[test]
    fn test_stable_correlation_no_alert() {
        let baseline = basket_baseline(&[vec![0.01, -0.02, 0.03], vec![0.01, -0.02, 0.03]]);
        let a = zigzag(30, 0.02);
        let b: Vec<f64> = a.iter().map(|c| c * 3.0).collect();
        let mut current = BTreeMap::new();
        current.insert(Symbol::new("A"), hourly(&a, &[100.0; 30]));
        current.insert(Symbol::new("B"), hourly(&b, &[100.0; 30]));

        assert!(check_correlation_breakdown(&current, &baseline, &Thresholds::default(), Utc::now()).is_none());
    }
}
