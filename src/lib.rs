//! # mtf-hook - multi-timeframe hook pattern detector
//!
//! Trend confirmation and five-stage pattern detection over OHLCV candles on
//! three time resolutions (Low, Mid and High Frame), with retroactive
//! win/loss labelling of every detected occurrence.
//!
//! Pipeline: indicator engine (EMA, ATR) -> COMA trend classifier per frame ->
//! pattern detector (LF series + HF trend) -> outcome labeller.
//!
//! ## Quick Start
//!
//! ```rust
//! use mtf_hook::prelude::*;
//!
//! let engine = EngineBuilder::new().build().unwrap();
//!
//! let mut lf: Vec<Candle> = vec![];
//! let mut hf: Vec<Candle> = vec![];
//! engine.prepare(&mut lf, Timeframe::Low).unwrap();
//! engine.prepare(&mut hf, Timeframe::High).unwrap();
//!
//! // An empty series cannot cover the edge margins
//! assert!(engine.scan(&lf, &hf).is_err());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod coma;
pub mod config;
pub mod detector;
pub mod indicators;
pub mod labeler;
pub mod pattern;

pub mod prelude {
    pub use crate::{
        // Trend classification
        coma::{check_coma, detect_trend, BarTrend, ComaCheck, ComaClassifier, ComaStatus, TrendAnalysis, TrendDirection},
        // Configuration
        config::{DetectorConfig, LabelConfig, ParamMeta, ParamType, TieBreak},
        // Detection
        detector::{HfTrendIndex, PatternDetector},
        // Indicators
        indicators::{add_indicators_to_candles, calculate_atr, calculate_ema, validate_warmup, IndicatorOutput, WarmupValidation},
        // Labelling
        labeler::{LabelSummary, OutcomeLabeler},
        pattern::{Label, LabelDetails, Pattern},
        // Parallel
        scan_parallel,
        Candle,
        Direction,
        EngineBuilder,
        FrameTrends,
        OHLCVExt,
        PatternEngine,
        // Errors
        PatternError,
        Period,
        Ratio,
        Result,
        ScanError,
        ScanResult,
        Timeframe,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors that can occur during indicator computation and pattern detection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Pattern stage order violated: {0}")]
    StructuralViolation(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Indicator period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    /// Bar open time in unix seconds
    fn timestamp(&self) -> Option<i64> {
        None
    }

    /// Precomputed indicator value by key (`ema_21`, `atr`, ...)
    fn indicator(&self, _key: &str) -> Option<f64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.open().max(self.close()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < max(open, close)",
            });
        }
        if self.low() > self.open().min(self.close()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "low > min(open, close)",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// CANDLE
// ============================================================

/// One OHLCV bar with optional indicator columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Unix seconds
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indicators: BTreeMap<String, f64>,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
            indicators: BTreeMap::new(),
        }
    }

    /// Builder-style helper that attaches one indicator value
    pub fn with_indicator(mut self, key: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(key.into(), value);
        self
    }
}

impl OHLCV for Candle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.time)
    }

    fn indicator(&self, key: &str) -> Option<f64> {
        self.indicators.get(key).copied()
    }
}

// ============================================================
// DIRECTION / TIMEFRAME
// ============================================================

/// Trade direction of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    #[inline]
    pub fn is_long(self) -> bool {
        matches!(self, Direction::Long)
    }

    #[inline]
    pub fn is_short(self) -> bool {
        matches!(self, Direction::Short)
    }

    /// +1.0 for Long, -1.0 for Short
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// `a` lies strictly beyond `b` in this direction
    #[inline]
    pub fn beyond(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Long => a > b,
            Direction::Short => a < b,
        }
    }
}

/// Time resolution of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "LF")]
    Low,
    #[serde(rename = "MF")]
    Mid,
    #[serde(rename = "HF")]
    High,
}

// ============================================================
// PATTERN ENGINE
// ============================================================

use coma::{ComaClassifier, TrendAnalysis};
use config::{DetectorConfig, LabelConfig};
use detector::PatternDetector;
use indicators::{add_indicators_to_candles, validate_warmup, WarmupValidation};
use labeler::OutcomeLabeler;
use pattern::Pattern;

/// Trend analysis of all three frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameTrends {
    pub lf: TrendAnalysis,
    pub mf: TrendAnalysis,
    pub hf: TrendAnalysis,
}

impl FrameTrends {
    /// All three frames confirmed in the same direction
    pub fn aligned(&self) -> bool {
        self.lf.confirmed
            && self.mf.confirmed
            && self.hf.confirmed
            && self.lf.direction == self.hf.direction
            && self.mf.direction == self.hf.direction
    }
}

/// Full pipeline: indicator annotation, trend gating, detection, labelling
#[derive(Debug, Clone)]
pub struct PatternEngine {
    detector: PatternDetector,
    labeler: OutcomeLabeler,
    validate_data: bool,
}

impl PatternEngine {
    pub fn config(&self) -> &DetectorConfig {
        self.detector.config()
    }

    pub fn detector(&self) -> &PatternDetector {
        &self.detector
    }

    pub fn labeler(&self) -> &OutcomeLabeler {
        &self.labeler
    }

    /// COMA classifier for one frame, configured with the engine's periods
    pub fn classifier(&self, timeframe: Timeframe) -> ComaClassifier {
        let config = self.config();
        ComaClassifier::new(config.periods_for(timeframe))
            .with_required_bars(config.required_coma_bars)
    }

    /// Check warm-up and write the frame's EMA tuple and ATR into every candle.
    pub fn prepare(&self, candles: &mut [Candle], timeframe: Timeframe) -> Result<WarmupValidation> {
        let config = self.config();
        let periods = config.periods_for(timeframe);
        let max_period = periods.iter().copied().max().unwrap_or(1).max(config.atr_period);

        let warmup = validate_warmup(candles, max_period, config.strict_warmup);
        if warmup.is_valid {
            tracing::info!(?timeframe, bars = candles.len(), "{}", warmup.message);
        } else {
            tracing::warn!(?timeframe, bars = candles.len(), "{}", warmup.message);
        }

        add_indicators_to_candles(candles, periods, config.atr_period)?;
        Ok(warmup)
    }

    /// Series-level COMA trend of one frame
    pub fn trend<T: OHLCV>(&self, bars: &[T], timeframe: Timeframe) -> TrendAnalysis {
        self.classifier(timeframe).detect_trend(bars)
    }

    pub fn frame_trends<T: OHLCV>(&self, lf: &[T], mf: &[T], hf: &[T]) -> FrameTrends {
        FrameTrends {
            lf: self.trend(lf, Timeframe::Low),
            mf: self.trend(mf, Timeframe::Mid),
            hf: self.trend(hf, Timeframe::High),
        }
    }

    /// Detect and label patterns on an indicator-annotated LF/HF pair.
    ///
    /// Returns an empty list when the HF trend is not confirmed.
    pub fn scan<T: OHLCV + Sync>(&self, lf: &[T], hf: &[T]) -> Result<Vec<Pattern>> {
        if self.validate_data {
            validate_bars(lf)?;
            validate_bars(hf)?;
        }
        self.detector.check_length(lf.len())?;

        let hf_trend = self.trend(hf, Timeframe::High);
        if !hf_trend.confirmed {
            tracing::debug!(
                direction = ?hf_trend.direction,
                streak = hf_trend.confirmed_bar_streak,
                required = hf_trend.required,
                "HF trend not confirmed, skipping detection"
            );
            return Ok(Vec::new());
        }

        let patterns = self.detector.detect_parallel(lf, hf)?;
        Ok(self.labeler.label_all(patterns, lf))
    }
}

fn validate_bars<T: OHLCV>(bars: &[T]) -> Result<()> {
    let mut prev_time: Option<i64> = None;
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            PatternError::InvalidOHLCV { reason, .. } => PatternError::InvalidOHLCV { index: i, reason },
            other => other,
        })?;
        if let Some(time) = bar.timestamp() {
            if prev_time.is_some_and(|prev| time <= prev) {
                return Err(PatternError::InvalidOHLCV {
                    index: i,
                    reason: "time not strictly increasing",
                });
            }
            prev_time = Some(time);
        }
    }
    Ok(())
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: DetectorConfig,
    labels: LabelConfig,
    validate_data: bool,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the detector configuration
    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the labeller configuration
    pub fn labels(mut self, labels: LabelConfig) -> Self {
        self.labels = labels;
        self
    }

    pub fn tie_break(mut self, tie_break: config::TieBreak) -> Self {
        self.labels.tie_break = tie_break;
        self
    }

    /// Enable/disable data validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.validate_data = enable;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine> {
        Ok(PatternEngine {
            detector: PatternDetector::new(self.config)?,
            labeler: OutcomeLabeler::new(self.labels),
            validate_data: self.validate_data,
        })
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub patterns: Vec<Pattern>,
}

/// Error from scanning a single instrument
#[derive(Debug)]
pub struct ScanError {
    pub symbol: String,
    pub error: PatternError,
}

/// Parallel scanning of multiple instruments, each given as `(symbol, lf, hf)`
pub fn scan_parallel<'a, T, I>(engine: &PatternEngine, instruments: I) -> (Vec<ScanResult>, Vec<ScanError>)
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T], &'a [T])>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, lf, hf)| {
            engine
                .scan(lf, hf)
                .map(|patterns| ScanResult {
                    symbol: symbol.to_string(),
                    patterns,
                })
                .map_err(|error| ScanError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_series(n: usize, step: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i as i64 * step, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(200).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_candle_ohlcv() {
        let candle = Candle::new(60, 100.0, 110.0, 90.0, 105.0, 10.0).with_indicator("atr", 2.5);
        assert_eq!(candle.range(), 20.0);
        assert_eq!(candle.timestamp(), Some(60));
        assert_eq!(candle.indicator("atr"), Some(2.5));
        assert_eq!(candle.indicator("ema_8"), None);
    }

    #[test]
    fn test_ohlcv_validate() {
        assert!(Candle::new(0, 100.0, 101.0, 99.0, 100.5, 0.0).validate().is_ok());
        assert!(Candle::new(0, 100.0, 99.0, 98.0, 100.5, 0.0).validate().is_err());
        assert!(Candle::new(0, 100.0, 101.0, 100.2, 100.5, 0.0).validate().is_err());
        assert!(Candle::new(0, f64::NAN, 101.0, 99.0, 100.5, 0.0).validate().is_err());
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
        assert!(Direction::Long.beyond(2.0, 1.0));
        assert!(Direction::Short.beyond(1.0, 2.0));
        assert!(!Direction::Short.beyond(1.0, 1.0));
    }

    #[test]
    fn test_timeframe_serde_names() {
        assert_eq!(serde_json::to_string(&Timeframe::Low).unwrap(), "\"LF\"");
        assert_eq!(serde_json::to_string(&Timeframe::High).unwrap(), "\"HF\"");
    }

    #[test]
    fn test_engine_builder_rejects_bad_config() {
        let config = DetectorConfig {
            atr_period: 0,
            ..Default::default()
        };
        assert!(EngineBuilder::new().config(config).build().is_err());
        assert!(EngineBuilder::new().build().is_ok());
    }

    #[test]
    fn test_scan_too_short() {
        let engine = EngineBuilder::new().build().unwrap();
        let lf = flat_series(150, 300);
        let hf = flat_series(20, 3600);
        assert_eq!(
            engine.scan(&lf, &hf).unwrap_err(),
            PatternError::InsufficientData { need: 201, got: 150 }
        );
    }

    #[test]
    fn test_scan_without_hf_trend_is_empty() {
        let engine = EngineBuilder::new().build().unwrap();
        let mut lf = flat_series(400, 300);
        let mut hf = flat_series(400, 3600);
        engine.prepare(&mut lf, Timeframe::Low).unwrap();
        engine.prepare(&mut hf, Timeframe::High).unwrap();

        // flat prices give equal EMAs, which never satisfy strict ordering
        assert!(engine.scan(&lf, &hf).unwrap().is_empty());
    }

    #[test]
    fn test_validate_data_catches_time_order() {
        let engine = EngineBuilder::new().validate_data(true).build().unwrap();
        let mut lf = flat_series(300, 300);
        lf[10].time = lf[9].time;
        let hf = flat_series(30, 3600);
        assert_eq!(
            engine.scan(&lf, &hf).unwrap_err(),
            PatternError::InvalidOHLCV {
                index: 10,
                reason: "time not strictly increasing"
            }
        );
    }

    #[test]
    fn test_prepare_reports_warmup() {
        let engine = EngineBuilder::new().build().unwrap();
        let mut short = flat_series(100, 300);
        let warmup = engine.prepare(&mut short, Timeframe::Low).unwrap();
        assert!(!warmup.is_valid);
        assert_eq!(warmup.min_required, 300);
        assert!(short[0].indicators.contains_key("atr"));
        assert!(!short[99].indicators.contains_key("ema_200"));
        assert!(short[99].indicators.contains_key("ema_50"));
    }

    #[test]
    fn test_frame_trends_flat_not_aligned() {
        let engine = EngineBuilder::new().build().unwrap();
        let mut bars = flat_series(300, 60);
        engine.prepare(&mut bars, Timeframe::High).unwrap();
        let trends = engine.frame_trends(&bars, &bars, &bars);
        assert!(!trends.hf.confirmed);
        assert!(!trends.aligned());
    }

    #[test]
    fn test_parallel_scan() {
        let engine = EngineBuilder::new().build().unwrap();

        let lf_ok = flat_series(300, 300);
        let hf_ok = flat_series(30, 3600);
        let lf_short = flat_series(50, 300);

        let instruments: Vec<(&str, &[Candle], &[Candle])> =
            vec![("EURUSD", &lf_ok, &hf_ok), ("GBPUSD", &lf_short, &hf_ok)];

        let (results, errors) = scan_parallel(&engine, instruments);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "EURUSD");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "GBPUSD");
    }
}
