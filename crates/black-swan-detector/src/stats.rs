//! Pure numeric helpers shared by the baseline store and the evaluators.
//! Stateless functions, no async, no detector state.

use market_core::{Bar, BarSeries, Symbol};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Fractional period-over-period changes. A zero previous value yields no
/// return for that step.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    if values.len() < 2 {
        return Vec::new();
    }
    values
        .windows(2)
        .filter_map(|w| {
            if w[0] != 0.0 {
                Some((w[1] - w[0]) / w[0])
            } else {
                None
            }
        })
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Sample standard deviation (n - 1). Needs at least two values.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let sd = values.iter().std_dev();
    if sd.is_finite() {
        Some(sd)
    } else {
        None
    }
}

/// Quantile with linear interpolation between closest ranks, `q` in [0, 1].
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Pearson correlation. NaN when either side has no variance or the lengths differ.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return f64::NAN;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < 1e-15 {
        return f64::NAN;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

/// Inner-join the closes of several series on a key derived from each bar,
/// then convert every column to returns. Rows where any symbol is missing a
/// value, or any return is not finite, are dropped.
///
/// Returns the symbols (column order) and one return column per symbol.
pub fn aligned_returns<K, F>(series: &BTreeMap<Symbol, BarSeries>, key: F) -> (Vec<Symbol>, Vec<Vec<f64>>)
where
    K: Ord + Clone,
    F: Fn(&Bar) -> K,
{
    let symbols: Vec<Symbol> = series.keys().cloned().collect();
    if symbols.is_empty() {
        return (symbols, Vec::new());
    }

    // key -> one close slot per symbol
    let mut table: BTreeMap<K, Vec<Option<f64>>> = BTreeMap::new();
    for (col, symbol) in symbols.iter().enumerate() {
        for bar in &series[symbol] {
            let row = table
                .entry(key(bar))
                .or_insert_with(|| vec![None; symbols.len()]);
            row[col] = Some(bar.close);
        }
    }

    let rows: Vec<Vec<f64>> = table
        .into_values()
        .filter_map(|row| row.into_iter().collect::<Option<Vec<f64>>>())
        .collect();

    let mut columns = vec![Vec::new(); symbols.len()];
    for pair in rows.windows(2) {
        let step: Vec<f64> = pair[0]
            .iter()
            .zip(pair[1].iter())
            .map(|(prev, next)| (next - prev) / prev)
            .collect();
        if step.iter().all(|r| r.is_finite()) {
            for (col, r) in step.into_iter().enumerate() {
                columns[col].push(r);
            }
        }
    }

    (symbols, columns)
}

/// Average true range over the last `period` bars. The first bar's true range
/// is its high-low span.
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let true_ranges: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let high_low = bar.high - bar.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(prev_close) => high_low
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => high_low,
            }
        })
        .collect();
    let tail = &true_ranges[true_ranges.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(hour: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn test_pct_change() {
        let r = pct_change(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.10).abs() < 1e-12);
        assert!((r[1] + 0.10).abs() < 1e-12);
        assert!(pct_change(&[1.0]).is_empty());
    }

    #[test]
    fn test_std_dev_is_sample() {
        // var = ((1-2.5)^2 + (2-2.5)^2 + (3-2.5)^2 + (4-2.5)^2) / 3 = 5/3
        let sd = std_dev(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((sd - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!(std_dev(&[1.0]).is_none());
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.5), Some(3.0));
        assert!((quantile(&values, 0.95).unwrap() - 4.8).abs() < 1e-12);
        assert!((quantile(&values, 0.01).unwrap() - 1.04).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_pearson_perfect_and_degenerate() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
    }

    #[test]
    fn test_aligned_returns_inner_join() {
        let mut series = BTreeMap::new();
        series.insert(
            Symbol::new("A"),
            BarSeries::new(vec![bar(0, 100.0), bar(1, 110.0), bar(2, 121.0)]),
        );
        // missing hour 1
        series.insert(Symbol::new("B"), BarSeries::new(vec![bar(0, 10.0), bar(2, 12.0)]));

        let (symbols, columns) = aligned_returns(&series, |b| b.timestamp);
        assert_eq!(symbols, vec![Symbol::new("A"), Symbol::new("B")]);
        assert_eq!(columns[0].len(), 1);
        assert!((columns[0][0] - 0.21).abs() < 1e-12);
        assert!((columns[1][0] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_average_true_range() {
        let bars: Vec<Bar> = (0..20).map(|h| bar(h, 100.0)).collect();
        assert!((average_true_range(&bars, 14).unwrap() - 2.0).abs() < 1e-12);
        assert!(average_true_range(&bars[..10], 14).is_none());
    }
}
