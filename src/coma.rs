//! COMA ("Correct Order of Moving Averages") trend classifier.
//!
//! A bar is in an uptrend when its EMA tuple, fastest first, is strictly
//! decreasing (`ema8 > ema21 > ema50 > ema200`), in a downtrend when it is
//! strictly increasing. Ties and missing values confirm nothing.
//!
//! The classifier reads EMA values from the bars' indicator columns
//! (`ema_<period>`, see [`crate::indicators::add_indicators_to_candles`]).

use serde::{Deserialize, Serialize};

use crate::{indicators::ema_key, Direction, Timeframe, OHLCV};

/// Default COMA tuple for the Low and Mid Frames
pub const LF_MF_PERIODS: [usize; 4] = [8, 21, 50, 200];
/// Default COMA tuple for the High Frame
pub const HF_PERIODS: [usize; 5] = [5, 8, 21, 50, 200];
/// Default number of consecutive confirming bars
pub const DEFAULT_REQUIRED_BARS: usize = 30;

/// Fast/slow EMA spread (as a fraction of their mean) at which the spread score saturates
const SPREAD_SATURATION: f64 = 0.05;

/// Series-level trend direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    None,
}

impl TrendDirection {
    /// Trade direction that follows this trend
    pub fn to_direction(self) -> Option<Direction> {
        match self {
            TrendDirection::Up => Some(Direction::Long),
            TrendDirection::Down => Some(Direction::Short),
            TrendDirection::None => None,
        }
    }
}

/// Classification of a single bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarTrend {
    Up,
    Down,
    /// All values present but not strictly ordered
    Mixed,
    /// At least one EMA missing or non-finite
    Incomplete,
}

impl BarTrend {
    /// Classify an EMA tuple given fastest first
    pub fn from_emas(values: &[f64]) -> Self {
        classify_ordered(values.iter().map(|&v| Some(v)))
    }

    pub fn direction(self) -> TrendDirection {
        match self {
            BarTrend::Up => TrendDirection::Up,
            BarTrend::Down => TrendDirection::Down,
            BarTrend::Mixed | BarTrend::Incomplete => TrendDirection::None,
        }
    }

    pub fn status(self) -> ComaStatus {
        let uptrend = self == BarTrend::Up;
        let downtrend = self == BarTrend::Down;
        ComaStatus {
            uptrend,
            downtrend,
            confirmed: uptrend || downtrend,
        }
    }
}

fn classify_ordered(values: impl Iterator<Item = Option<f64>>) -> BarTrend {
    let mut prev: Option<f64> = None;
    let mut up = true;
    let mut down = true;

    for value in values {
        let value = match value {
            Some(v) if v.is_finite() => v,
            _ => return BarTrend::Incomplete,
        };
        if let Some(p) = prev {
            up &= p > value;
            down &= p < value;
        }
        prev = Some(value);
    }

    match (up, down) {
        (true, false) => BarTrend::Up,
        (false, true) => BarTrend::Down,
        _ => BarTrend::Mixed,
    }
}

/// Per-bar COMA flags; `confirmed == uptrend || downtrend`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComaStatus {
    pub uptrend: bool,
    pub downtrend: bool,
    pub confirmed: bool,
}

impl ComaStatus {
    pub fn direction(self) -> TrendDirection {
        if self.uptrend {
            TrendDirection::Up
        } else if self.downtrend {
            TrendDirection::Down
        } else {
            TrendDirection::None
        }
    }
}

/// Bar tallies over the whole series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDetails {
    pub total_bars: usize,
    pub uptrend_bars: usize,
    pub downtrend_bars: usize,
    pub mixed_bars: usize,
    pub incomplete_bars: usize,
}

/// Result of [`ComaClassifier::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComaCheck {
    /// A trend run of at least `required_bars` ends at the last bar
    pub is_valid: bool,
    /// Direction of the run ending at the last bar
    pub direction: TrendDirection,
    pub consecutive_bars: usize,
    pub required_bars: usize,
    pub validation_details: ValidationDetails,
}

/// Series-level trend summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub confirmed_bar_streak: usize,
    pub required: usize,
    pub confirmed: bool,
    /// Auxiliary 0.0..=1.0 score from streak length and EMA spread, never a gate
    pub strength: f64,
}

/// COMA classifier for one EMA tuple
#[derive(Debug, Clone)]
pub struct ComaClassifier {
    periods: Vec<usize>,
    keys: Vec<String>,
    required_bars: usize,
}

impl ComaClassifier {
    /// Tuple given fastest period first
    pub fn new(periods: &[usize]) -> Self {
        Self {
            periods: periods.to_vec(),
            keys: periods.iter().map(|&p| ema_key(p)).collect(),
            required_bars: DEFAULT_REQUIRED_BARS,
        }
    }

    /// Classifier with the default tuple of a frame
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::Low | Timeframe::Mid => Self::new(&LF_MF_PERIODS),
            Timeframe::High => Self::new(&HF_PERIODS),
        }
    }

    pub fn with_required_bars(mut self, required_bars: usize) -> Self {
        self.required_bars = required_bars;
        self
    }

    pub fn periods(&self) -> &[usize] {
        &self.periods
    }

    pub fn required_bars(&self) -> usize {
        self.required_bars
    }

    #[inline]
    pub fn classify_bar<T: OHLCV>(&self, bar: &T) -> BarTrend {
        classify_ordered(self.keys.iter().map(|key| bar.indicator(key)))
    }

    #[inline]
    pub fn status_at<T: OHLCV>(&self, bar: &T) -> ComaStatus {
        self.classify_bar(bar).status()
    }

    pub fn classify<T: OHLCV>(&self, bars: &[T]) -> Vec<BarTrend> {
        bars.iter().map(|bar| self.classify_bar(bar)).collect()
    }

    /// Length and direction of the unbroken trend run ending at the last bar.
    pub fn check<T: OHLCV>(&self, bars: &[T]) -> ComaCheck {
        let trends = self.classify(bars);

        let mut details = ValidationDetails {
            total_bars: trends.len(),
            ..Default::default()
        };
        for trend in &trends {
            match trend {
                BarTrend::Up => details.uptrend_bars += 1,
                BarTrend::Down => details.downtrend_bars += 1,
                BarTrend::Mixed => details.mixed_bars += 1,
                BarTrend::Incomplete => details.incomplete_bars += 1,
            }
        }

        let direction = trends
            .last()
            .map_or(TrendDirection::None, |t| t.direction());
        let consecutive_bars = if direction == TrendDirection::None {
            0
        } else {
            trends
                .iter()
                .rev()
                .take_while(|t| t.direction() == direction)
                .count()
        };

        ComaCheck {
            is_valid: direction != TrendDirection::None && consecutive_bars >= self.required_bars,
            direction,
            consecutive_bars,
            required_bars: self.required_bars,
            validation_details: details,
        }
    }

    /// Confirmed when the trailing run is at least `required_bars` long.
    pub fn detect_trend<T: OHLCV>(&self, bars: &[T]) -> TrendAnalysis {
        let check = self.check(bars);
        TrendAnalysis {
            direction: check.direction,
            confirmed_bar_streak: check.consecutive_bars,
            required: self.required_bars,
            confirmed: check.is_valid,
            strength: self.strength(bars, &check),
        }
    }

    fn strength<T: OHLCV>(&self, bars: &[T], check: &ComaCheck) -> f64 {
        if check.direction == TrendDirection::None {
            return 0.0;
        }
        let streak_score =
            (check.consecutive_bars as f64 / (2 * self.required_bars.max(1)) as f64).min(1.0);

        let spread_score = bars
            .last()
            .and_then(|bar| {
                let fast = bar.indicator(self.keys.first()?)?;
                let slow = bar.indicator(self.keys.last()?)?;
                let mean = (fast + slow) / 2.0;
                (mean.abs() > f64::EPSILON).then(|| ((fast - slow).abs() / mean.abs() / SPREAD_SATURATION).min(1.0))
            })
            .unwrap_or(0.0);

        0.6 * streak_score + 0.4 * spread_score
    }
}

/// COMA check with the frame's default tuple and required bar count
pub fn check_coma<T: OHLCV>(bars: &[T], timeframe: Timeframe) -> ComaCheck {
    ComaClassifier::for_timeframe(timeframe).check(bars)
}

/// Trend analysis with the frame's default tuple
pub fn detect_trend<T: OHLCV>(bars: &[T], timeframe: Timeframe, required_bars: usize) -> TrendAnalysis {
    ComaClassifier::for_timeframe(timeframe)
        .with_required_bars(required_bars)
        .detect_trend(bars)
}
