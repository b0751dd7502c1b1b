//! Indicator engine: EMA and ATR series over a candle series.
//!
//! Every output has the same length as its input. Cells before an
//! indicator's warm-up point are undefined; internally they hold `NaN`
//! and [`IndicatorOutput::value_at`] exposes them as `None`. Both
//! recursions are strict left-to-right folds over the input, so identical
//! input always produces bit-identical output.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;

use crate::{Candle, Period, Result, OHLCV};

/// Indicator key of the ATR column
pub const ATR_KEY: &str = "atr";

/// Indicator key of an EMA column, e.g. `ema_21`
pub fn ema_key(period: usize) -> String {
    format!("ema_{period}")
}

/// Non-finite input value met while computing a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericAnomaly {
    pub index: usize,
    pub value: f64,
}

/// The series ended before the indicator could be seeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarmupShortfall {
    pub need: usize,
    pub got: usize,
}

/// One computed indicator series
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorOutput {
    pub period: usize,
    values: Vec<f64>,
    /// Set when the series is too short to seed the indicator
    pub insufficient: Option<WarmupShortfall>,
    /// Inputs that were non-finite and forward-filled over
    pub anomalies: Vec<NumericAnomaly>,
}

impl IndicatorOutput {
    /// Raw cells, `NaN` where undefined
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value at `index`, `None` while undefined or out of bounds
    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().filter(|v| v.is_finite())
    }

    /// Index of the first defined cell
    pub fn first_defined(&self) -> Option<usize> {
        self.values.iter().position(|v| v.is_finite())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================
// EMA
// ============================================================

/// Exponential moving average of closes.
///
/// Seeded at `start_index + period - 1` with the simple average of the
/// first `period` closes from `start_index`, then
/// `ema[i] = (close[i] - ema[i-1]) * k + ema[i-1]` with `k = 2 / (period + 1)`.
///
/// A non-finite close carries the previous value forward and is reported in
/// [`IndicatorOutput::anomalies`]. A series too short to seed leaves every cell
/// undefined and sets [`IndicatorOutput::insufficient`].
///
/// # Errors
/// `period == 0`.
pub fn calculate_ema<T: OHLCV>(bars: &[T], period: usize, start_index: usize) -> Result<IndicatorOutput> {
    let period = Period::new(period)?.get();
    let len = bars.len();
    let mut values = vec![f64::NAN; len];
    let mut anomalies = Vec::new();

    if len.saturating_sub(start_index) < period {
        tracing::warn!(period, start_index, bars = len, "EMA warm-up not reached, series left undefined");
        return Ok(IndicatorOutput {
            period,
            values,
            insufficient: Some(WarmupShortfall {
                need: start_index + period,
                got: len,
            }),
            anomalies,
        });
    }

    let seed_end = start_index + period;
    let (sum, count) = bars[start_index..seed_end]
        .iter()
        .enumerate()
        .fold((0.0, 0usize), |(sum, count), (offset, bar)| {
            let close = bar.close();
            if close.is_finite() {
                (sum + close, count + 1)
            } else {
                anomalies.push(NumericAnomaly {
                    index: start_index + offset,
                    value: close,
                });
                (sum, count)
            }
        });

    if count == 0 {
        tracing::warn!(period, start_index, "EMA seed window has no finite close");
        return Ok(IndicatorOutput {
            period,
            values,
            insufficient: None,
            anomalies,
        });
    }

    let seed = sum / count as f64;
    let k = 2.0 / (period as f64 + 1.0);
    values[seed_end - 1] = seed;

    bars[seed_end..]
        .iter()
        .enumerate()
        .fold(seed, |prev, (offset, bar)| {
            let index = seed_end + offset;
            let close = bar.close();
            let ema = if close.is_finite() {
                (close - prev) * k + prev
            } else {
                anomalies.push(NumericAnomaly { index, value: close });
                prev
            };
            values[index] = ema;
            ema
        });

    if let Some(first) = anomalies.first() {
        tracing::warn!(
            period,
            count = anomalies.len(),
            first_index = first.index,
            "non-finite closes forward-filled in EMA"
        );
    }

    Ok(IndicatorOutput {
        period,
        values,
        insufficient: None,
        anomalies,
    })
}

// ============================================================
// ATR
// ============================================================

/// `max(high - low, |high - prev_close|, |low - prev_close|)`, `NaN` on non-finite input
#[inline]
pub fn true_range<T: OHLCV>(bar: &T, prev_close: f64) -> f64 {
    let (high, low) = (bar.high(), bar.low());
    if !(high.is_finite() && low.is_finite() && prev_close.is_finite()) {
        return f64::NAN;
    }
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// Average true range with Wilder smoothing (multiplier `1 / period`).
///
/// Seeded by the first true range (the first bar uses its own close as the
/// previous close), so every cell from the first finite bar on is defined.
/// Non-finite true ranges are forward-filled and reported as anomalies.
///
/// # Errors
/// `period == 0`.
pub fn calculate_atr<T: OHLCV>(bars: &[T], period: usize) -> Result<IndicatorOutput> {
    let period = Period::new(period)?.get();
    let alpha = 1.0 / period as f64;
    let mut values = vec![f64::NAN; bars.len()];
    let mut anomalies = Vec::new();

    let mut prev_atr: Option<f64> = None;
    let mut prev_close: Option<f64> = None;

    for (i, bar) in bars.iter().enumerate() {
        let close = bar.close();
        let tr = true_range(bar, prev_close.unwrap_or(close));
        if close.is_finite() {
            prev_close = Some(close);
        }

        let atr = if tr.is_finite() {
            Some(match prev_atr {
                Some(prev) => (tr - prev) * alpha + prev,
                None => tr,
            })
        } else {
            anomalies.push(NumericAnomaly { index: i, value: tr });
            prev_atr
        };

        if let Some(atr) = atr {
            values[i] = atr;
        }
        prev_atr = atr;
    }

    if !anomalies.is_empty() {
        tracing::warn!(period, count = anomalies.len(), "non-finite true ranges forward-filled in ATR");
    }

    Ok(IndicatorOutput {
        period,
        values,
        insufficient: None,
        anomalies,
    })
}

// ============================================================
// INDICATOR SERIES
// ============================================================

/// EMA series per period plus the ATR series, index-aligned with the candles
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub ema: BTreeMap<usize, IndicatorOutput>,
    pub atr: IndicatorOutput,
}

/// Compute the EMA for every distinct period (in parallel) and the ATR.
pub fn compute_indicators<T: OHLCV + Sync>(
    bars: &[T],
    periods: &[usize],
    atr_period: usize,
) -> Result<IndicatorSeries> {
    let mut distinct = periods.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    let emas = distinct
        .par_iter()
        .map(|&period| calculate_ema(bars, period, 0))
        .collect::<Result<Vec<_>>>()?;

    Ok(IndicatorSeries {
        ema: emas.into_iter().map(|out| (out.period, out)).collect(),
        atr: calculate_atr(bars, atr_period)?,
    })
}

/// Write `ema_<period>` for each period and `atr` into every candle.
///
/// Values are recomputed from OHLC only and overwrite previous columns;
/// undefined cells remove the key. Running it twice equals running it once.
pub fn add_indicators_to_candles(candles: &mut [Candle], periods: &[usize], atr_period: usize) -> Result<()> {
    let series = compute_indicators(&*candles, periods, atr_period)?;

    for (period, output) in &series.ema {
        write_column(candles, &ema_key(*period), output);
    }
    write_column(candles, ATR_KEY, &series.atr);
    Ok(())
}

fn write_column(candles: &mut [Candle], key: &str, output: &IndicatorOutput) {
    for (candle, &value) in candles.iter_mut().zip(output.values()) {
        if !value.is_finite() {
            candle.indicators.remove(key);
        } else if let Some(slot) = candle.indicators.get_mut(key) {
            *slot = value;
        } else {
            candle.indicators.insert(key.to_string(), value);
        }
    }
}

// ============================================================
// WARM-UP
// ============================================================

/// Outcome of a warm-up precondition check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmupValidation {
    pub is_valid: bool,
    pub min_required: usize,
    pub available: usize,
    pub message: String,
}

/// Require `ceil(max_period * factor)` bars, factor 2.5 when strict else 1.5.
pub fn validate_warmup<T>(bars: &[T], max_period: usize, strict: bool) -> WarmupValidation {
    let factor = if strict { 2.5 } else { 1.5 };
    let min_required = (max_period as f64 * factor).ceil() as usize;
    let available = bars.len();
    let is_valid = available >= min_required;

    let message = if is_valid {
        format!("warm-up satisfied: {available} bars available, {min_required} required")
    } else {
        format!(
            "insufficient warm-up: {available} bars available, {min_required} required for period {max_period}"
        )
    };

    WarmupValidation {
        is_valid,
        min_required,
        available,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes(values: &[f64]) -> Vec<Candle> {
        values
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64 * 60, c, c, c, c, 0.0))
            .collect()
    }

    fn ohlc(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, open, high, low, close, 0.0)
    }

    #[test]
    fn test_ema_seed_is_sma() {
        let bars = closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let ema = calculate_ema(&bars, 3, 0).unwrap();

        assert_eq!(ema.len(), 6);
        assert_eq!(ema.value_at(0), None);
        assert_eq!(ema.value_at(1), None);
        assert_eq!(ema.value_at(2), Some(2.0));
        // k = 0.5
        assert_eq!(ema.value_at(3), Some(3.0));
        assert_eq!(ema.value_at(4), Some(4.0));
        assert_eq!(ema.first_defined(), Some(2));
        assert!(ema.insufficient.is_none());
    }

    #[test]
    fn test_ema_start_index() {
        let bars = closes(&[10.0, 20.0, 3.0, 4.0, 5.0, 6.0]);
        let ema = calculate_ema(&bars, 3, 2).unwrap();

        assert_eq!(ema.first_defined(), Some(4));
        assert_eq!(ema.value_at(4), Some(4.0));
        assert_eq!(ema.value_at(5), Some(5.0));
    }

    #[test]
    fn test_ema_insufficient_data() {
        let bars = closes(&[1.0, 2.0]);
        let ema = calculate_ema(&bars, 5, 0).unwrap();

        assert_eq!(ema.len(), 2);
        assert!(ema.values().iter().all(|v| v.is_nan()));
        assert_eq!(ema.insufficient, Some(WarmupShortfall { need: 5, got: 2 }));
    }

    #[test]
    fn test_ema_period_zero_rejected() {
        let bars = closes(&[1.0, 2.0, 3.0]);
        assert!(calculate_ema(&bars, 0, 0).is_err());
        assert!(calculate_atr(&bars, 0).is_err());
    }

    #[test]
    fn test_ema_period_one_matches_close() {
        let bars = closes(&[1.0, 2.0, 3.5, 2.5]);
        let ema = calculate_ema(&bars, 1, 0).unwrap();
        for (bar, value) in bars.iter().zip(ema.values()) {
            assert_eq!(*value, bar.close);
        }
    }

    #[test]
    fn test_ema_forward_fills_non_finite_close() {
        let bars = closes(&[1.0, 2.0, 3.0, f64::NAN, 5.0]);
        let ema = calculate_ema(&bars, 2, 0).unwrap();

        let k = 2.0 / 3.0;
        let e1 = 1.5;
        let e2 = (3.0 - e1) * k + e1;
        assert_eq!(ema.value_at(1), Some(e1));
        assert_eq!(ema.value_at(2), Some(e2));
        assert_eq!(ema.value_at(3), Some(e2));
        assert_eq!(ema.value_at(4), Some((5.0 - e2) * k + e2));
        assert_eq!(ema.anomalies.len(), 1);
        assert_eq!(ema.anomalies[0].index, 3);
    }

    #[test]
    fn test_ema_converges_after_level_shift() {
        let period = 20;
        let mut values = vec![51.0; period];
        values.extend(std::iter::repeat(50.0).take(4 * period));
        let bars = closes(&values);
        let ema = calculate_ema(&bars, period, 0).unwrap();

        let at = period - 1 + 3 * period;
        assert!((ema.value_at(at).unwrap() - 50.0).abs() < 1e-2);
    }

    #[test]
    fn test_ema_is_deterministic() {
        let values: Vec<f64> = (0..500).map(|i| 100.0 + ((i * 37) % 17) as f64 * 0.13).collect();
        let bars = closes(&values);
        let a = calculate_ema(&bars, 21, 0).unwrap();
        let b = calculate_ema(&bars, 21, 0).unwrap();
        let bits = |o: &IndicatorOutput| o.values().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_true_range() {
        // Normal range
        assert_eq!(true_range(&ohlc(100.0, 105.0, 95.0, 102.0), 100.0), 10.0);
        // Gap up
        assert_eq!(true_range(&ohlc(110.0, 115.0, 108.0, 112.0), 100.0), 15.0);
        // Gap down
        assert_eq!(true_range(&ohlc(90.0, 92.0, 85.0, 88.0), 100.0), 15.0);
        assert!(true_range(&ohlc(90.0, f64::NAN, 85.0, 88.0), 100.0).is_nan());
    }

    #[test]
    fn test_atr_seeded_by_first_true_range() {
        let bars = vec![
            ohlc(100.0, 102.0, 98.0, 101.0),  // TR = 4
            ohlc(101.0, 104.0, 99.0, 103.0),  // TR = 5
            ohlc(103.0, 106.0, 101.0, 105.0), // TR = 5
        ];
        let atr = calculate_atr(&bars, 4).unwrap();

        assert_eq!(atr.value_at(0), Some(4.0));
        assert_eq!(atr.value_at(1), Some(4.25));
        assert_eq!(atr.value_at(2), Some(4.4375));
    }

    #[test]
    fn test_atr_forward_fills_non_finite() {
        let bars = vec![
            ohlc(100.0, 102.0, 98.0, 101.0),
            ohlc(101.0, f64::INFINITY, 99.0, 103.0),
            ohlc(103.0, 106.0, 101.0, 105.0),
        ];
        let atr = calculate_atr(&bars, 2).unwrap();

        assert_eq!(atr.value_at(1), Some(4.0));
        assert_eq!(atr.anomalies.len(), 1);
        // prev close stays 103 from bar 1; TR = max(5, 3, 2) = 5
        assert_eq!(atr.value_at(2), Some(4.5));
    }

    #[test]
    fn test_add_indicators_is_idempotent() {
        let values: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let mut once = closes(&values);
        add_indicators_to_candles(&mut once, &[5, 8, 21], 14).unwrap();

        let mut twice = once.clone();
        add_indicators_to_candles(&mut twice, &[5, 8, 21], 14).unwrap();

        assert_eq!(once, twice);
        assert!(once[3].indicators.get("ema_5").is_none());
        assert!(once[4].indicators.get("ema_5").is_some());
        assert!(once[20].indicators.get("ema_21").is_some());
        assert!(once[0].indicators.get(ATR_KEY).is_some());
    }

    #[test]
    fn test_compute_indicators_dedups_periods() {
        let bars = closes(&(0..30).map(|i| i as f64).collect::<Vec<_>>());
        let series = compute_indicators(&bars, &[8, 5, 8], 14).unwrap();
        assert_eq!(series.ema.keys().copied().collect::<Vec<_>>(), vec![5, 8]);
        assert_eq!(series.atr.len(), 30);
    }

    #[test]
    fn test_validate_warmup_factors() {
        let bars = vec![(); 300];
        let lax = validate_warmup(&bars, 200, false);
        assert!(lax.is_valid);
        assert_eq!(lax.min_required, 300);

        let strict = validate_warmup(&bars, 200, true);
        assert!(!strict.is_valid);
        assert_eq!(strict.min_required, 500);

        assert_eq!(validate_warmup(&bars, 15, false).min_required, 23);
    }
}
