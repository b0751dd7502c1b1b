//! Detector and labeller configuration
//!
//! All tunables of the pipeline live in explicit structs that are passed to the
//! detector and labeller at construction. Nothing here is global, so several
//! detectors with different parameter sets can run side by side (parameter-sweep
//! backtests).
//!
//! The numeric parameters also carry [`ParamMeta`] metadata for grid search:
//!
//! ```rust
//! use mtf_hook::config::DetectorConfig;
//!
//! for param in DetectorConfig::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let sweep = DetectorConfig::grid(&["momentum_atr_multiple"]).unwrap();
//! assert!(sweep.len() > 1);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
  coma::{DEFAULT_REQUIRED_BARS, HF_PERIODS, LF_MF_PERIODS},
  PatternError, Ratio, Result, Timeframe,
};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Fraction in 0.0..=1.0
  Ratio,
  /// Positive real multiple (ATR multiples, offsets)
  Multiple,
  /// Positive integer (bar counts, periods)
  Period,
}

/// Metadata for a single tunable parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Field name in [`DetectorConfig`]
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Range for optimization: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn multiple(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Multiple, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  /// Generate all values for grid search.
  ///
  /// Values are `min + k * step`, so the grid does not accumulate rounding drift.
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    if step <= 0.0 {
      return vec![min];
    }
    let steps = ((max - min) / step + 1e-9).floor() as usize;
    (0..=steps).map(|k| min + k as f64 * step).collect()
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    if !value.is_finite() {
      return Err(PatternError::InvalidValue("parameter must be finite"));
    }
    let (min, max, _) = self.range;
    if value < min - 1e-9 || value > max + 1e-9 {
      return Err(PatternError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Multiple => Ok(()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(PatternError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
    }
  }
}

static PARAMS: [ParamMeta; 9] = [
  ParamMeta::multiple(
    "momentum_atr_multiple",
    1.5,
    (1.0, 3.0, 0.25),
    "Minimum momentum leg size in ATRs",
  ),
  ParamMeta::multiple(
    "test_bar_atr_multiple",
    1.5,
    (1.0, 3.0, 0.25),
    "Minimum test bar range in ATRs",
  ),
  ParamMeta::ratio(
    "touch_tolerance",
    0.1,
    (0.05, 0.25, 0.05),
    "Distance from a consolidation extreme that still counts as a touch, as a fraction of the range",
  ),
  ParamMeta::multiple(
    "entry_atr_offset",
    0.2,
    (0.0, 0.5, 0.1),
    "Entry distance beyond the consolidation base in ATRs",
  ),
  ParamMeta::period("atr_period", 14.0, (7.0, 28.0, 7.0), "ATR smoothing period"),
  ParamMeta::period(
    "required_coma_bars",
    30.0,
    (10.0, 60.0, 10.0),
    "Consecutive COMA bars needed to confirm a trend",
  ),
  ParamMeta::period(
    "min_consolidation_bars",
    20.0,
    (15.0, 40.0, 5.0),
    "Shortest span from momentum end to re-entry",
  ),
  ParamMeta::period(
    "max_consolidation_bars",
    100.0,
    (60.0, 150.0, 10.0),
    "Longest span from momentum end to re-entry",
  ),
  ParamMeta::period("min_swing_touches", 3.0, (2.0, 6.0, 1.0), "Minimum consolidation touches"),
];

// ============================================================
// DETECTOR CONFIG
// ============================================================

/// Upper bound on every bar-count window of [`DetectorConfig`]
pub const MAX_WINDOW_BARS: usize = 100_000;

/// Parameters of the trend classifier and the five-stage detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  /// COMA tuple for the Low Frame, fastest first
  pub lf_periods: Vec<usize>,
  /// COMA tuple for the Mid Frame, fastest first
  pub mf_periods: Vec<usize>,
  /// COMA tuple for the High Frame, fastest first
  pub hf_periods: Vec<usize>,
  pub atr_period: usize,
  pub required_coma_bars: usize,
  /// Warm-up factor 2.5 instead of 1.5
  pub strict_warmup: bool,
  /// Bars skipped at both ends of the LF series
  pub edge_margin: usize,
  /// Maximum distance between an LF bar and its HF bar
  pub hf_tolerance_secs: i64,
  pub momentum_atr_multiple: f64,
  /// Momentum start searched in `[i - lookback_max, i - lookback_min]`
  pub momentum_lookback_max: usize,
  pub momentum_lookback_min: usize,
  /// Minimum bars between momentum start and end
  pub momentum_min_bars: usize,
  /// Momentum end is at most `i - momentum_end_gap`
  pub momentum_end_gap: usize,
  pub min_consolidation_bars: usize,
  pub max_consolidation_bars: usize,
  pub min_swing_touches: usize,
  pub touch_tolerance: Ratio,
  pub test_bar_atr_multiple: f64,
  /// Test bar searched in the last `test_bar_window` bars before `i`
  pub test_bar_window: usize,
  /// Hook searched in the `hook_window` bars after the test bar
  pub hook_window: usize,
  pub entry_atr_offset: f64,
  pub tick_size: f64,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      lf_periods: LF_MF_PERIODS.to_vec(),
      mf_periods: LF_MF_PERIODS.to_vec(),
      hf_periods: HF_PERIODS.to_vec(),
      atr_period: 14,
      required_coma_bars: DEFAULT_REQUIRED_BARS,
      strict_warmup: false,
      edge_margin: 100,
      hf_tolerance_secs: 3600,
      momentum_atr_multiple: 1.5,
      momentum_lookback_max: 50,
      momentum_lookback_min: 20,
      momentum_min_bars: 10,
      momentum_end_gap: 10,
      min_consolidation_bars: 20,
      max_consolidation_bars: 100,
      min_swing_touches: 3,
      touch_tolerance: Ratio::new_const(0.1),
      test_bar_atr_multiple: 1.5,
      test_bar_window: 10,
      hook_window: 10,
      entry_atr_offset: 0.2,
      tick_size: 0.01,
    }
  }
}

impl DetectorConfig {
  /// EMA tuple used for COMA on the given frame
  pub fn periods_for(&self, timeframe: Timeframe) -> &[usize] {
    match timeframe {
      Timeframe::Low => &self.lf_periods,
      Timeframe::Mid => &self.mf_periods,
      Timeframe::High => &self.hf_periods,
    }
  }

  /// Largest EMA period configured across all frames
  pub fn max_period(&self) -> usize {
    self
      .lf_periods
      .iter()
      .chain(&self.mf_periods)
      .chain(&self.hf_periods)
      .copied()
      .max()
      .unwrap_or(0)
      .max(self.atr_period)
  }

  /// Parse a JSON document; missing fields take their defaults.
  pub fn from_json(json: &str) -> Result<Self> {
    let config: Self =
      serde_json::from_str(json).map_err(|e| PatternError::Serialization(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    for (name, periods) in
      [("lf_periods", &self.lf_periods), ("mf_periods", &self.mf_periods), ("hf_periods", &self.hf_periods)]
    {
      if periods.len() < 2 {
        return Err(PatternError::InvalidConfig(format!("{name} needs at least two EMA periods")));
      }
      if periods.contains(&0) {
        return Err(PatternError::InvalidConfig(format!("{name} contains a zero period")));
      }
    }
    if self.atr_period == 0 {
      return Err(PatternError::InvalidValue("atr_period must be > 0"));
    }
    for (name, value) in [
      ("required_coma_bars", self.required_coma_bars),
      ("edge_margin", self.edge_margin),
      ("momentum_lookback_max", self.momentum_lookback_max),
      ("momentum_lookback_min", self.momentum_lookback_min),
      ("momentum_min_bars", self.momentum_min_bars),
      ("momentum_end_gap", self.momentum_end_gap),
      ("min_consolidation_bars", self.min_consolidation_bars),
      ("max_consolidation_bars", self.max_consolidation_bars),
      ("test_bar_window", self.test_bar_window),
      ("hook_window", self.hook_window),
    ] {
      if value > MAX_WINDOW_BARS {
        return Err(PatternError::InvalidConfig(format!(
          "{name} ({value}) exceeds {MAX_WINDOW_BARS} bars"
        )));
      }
    }
    for (name, value) in [
      ("momentum_atr_multiple", self.momentum_atr_multiple),
      ("test_bar_atr_multiple", self.test_bar_atr_multiple),
    ] {
      if !value.is_finite() || value <= 0.0 {
        return Err(PatternError::InvalidConfig(format!("{name} must be positive, got {value}")));
      }
    }
    if !self.entry_atr_offset.is_finite() || self.entry_atr_offset < 0.0 {
      return Err(PatternError::InvalidConfig("entry_atr_offset must be >= 0".into()));
    }
    if !self.tick_size.is_finite() || self.tick_size < 0.0 {
      return Err(PatternError::InvalidConfig("tick_size must be >= 0".into()));
    }
    if self.hf_tolerance_secs < 0 {
      return Err(PatternError::InvalidConfig("hf_tolerance_secs must be >= 0".into()));
    }
    if self.momentum_lookback_min > self.momentum_lookback_max {
      return Err(PatternError::InvalidConfig(
        "momentum_lookback_min must not exceed momentum_lookback_max".into(),
      ));
    }
    if self.momentum_min_bars == 0 || self.momentum_end_gap == 0 {
      return Err(PatternError::InvalidConfig(
        "momentum_min_bars and momentum_end_gap must be > 0".into(),
      ));
    }
    if self.momentum_lookback_min < self.momentum_min_bars + self.momentum_end_gap {
      return Err(PatternError::InvalidConfig(format!(
        "momentum_lookback_min ({}) leaves no room for a {}-bar leg ending {} bars before the trigger",
        self.momentum_lookback_min, self.momentum_min_bars, self.momentum_end_gap
      )));
    }
    if self.min_consolidation_bars > self.max_consolidation_bars {
      return Err(PatternError::InvalidConfig(
        "min_consolidation_bars must not exceed max_consolidation_bars".into(),
      ));
    }
    if self.test_bar_window < 2 || self.hook_window == 0 {
      return Err(PatternError::InvalidConfig(
        "test_bar_window must be >= 2 and hook_window >= 1".into(),
      ));
    }
    if self.min_consolidation_bars <= self.test_bar_window {
      return Err(PatternError::InvalidConfig(format!(
        "min_consolidation_bars ({}) must exceed test_bar_window ({})",
        self.min_consolidation_bars, self.test_bar_window
      )));
    }
    if self.min_swing_touches == 0 {
      return Err(PatternError::InvalidValue("min_swing_touches must be > 0"));
    }
    if self.edge_margin < self.momentum_lookback_max {
      return Err(PatternError::InvalidConfig(format!(
        "edge_margin ({}) must cover momentum_lookback_max ({})",
        self.edge_margin, self.momentum_lookback_max
      )));
    }
    Ok(())
  }

  /// Returns metadata for all sweepable parameters
  pub fn param_meta() -> &'static [ParamMeta] {
    &PARAMS
  }

  /// Defaults overridden by `params`. Unknown keys are rejected.
  pub fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    let mut config = Self::default();
    for (&key, &value) in params {
      config.set_param(key, value)?;
    }
    config.validate()?;
    Ok(config)
  }

  /// Cartesian product of the grids of the named parameters, other fields at defaults.
  ///
  /// Combinations that fail [`DetectorConfig::validate`] are skipped.
  pub fn grid(names: &[&str]) -> Result<Vec<Self>> {
    let mut configs = vec![Self::default()];
    for &name in names {
      let meta = Self::find_param(name)?;
      let values = meta.generate_grid();
      let mut next = Vec::with_capacity(configs.len() * values.len());
      for config in &configs {
        for &value in &values {
          let mut c = config.clone();
          c.set_param(name, value)?;
          next.push(c);
        }
      }
      configs = next;
    }
    Ok(configs.into_iter().filter(|c| c.validate().is_ok()).collect())
  }

  fn find_param(name: &str) -> Result<&'static ParamMeta> {
    PARAMS
      .iter()
      .find(|p| p.name == name)
      .ok_or_else(|| PatternError::InvalidConfig(format!("unknown parameter `{name}`")))
  }

  fn set_param(&mut self, name: &str, value: f64) -> Result<()> {
    Self::find_param(name)?.validate(value)?;
    match name {
      "momentum_atr_multiple" => self.momentum_atr_multiple = value,
      "test_bar_atr_multiple" => self.test_bar_atr_multiple = value,
      "touch_tolerance" => self.touch_tolerance = Ratio::new(value)?,
      "entry_atr_offset" => self.entry_atr_offset = value,
      "atr_period" => self.atr_period = value as usize,
      "required_coma_bars" => self.required_coma_bars = value as usize,
      "min_consolidation_bars" => self.min_consolidation_bars = value as usize,
      "max_consolidation_bars" => self.max_consolidation_bars = value as usize,
      "min_swing_touches" => self.min_swing_touches = value as usize,
      _ => return Err(PatternError::InvalidConfig(format!("unknown parameter `{name}`"))),
    }
    Ok(())
  }
}

// ============================================================
// LABEL CONFIG
// ============================================================

/// Resolution when target and stop are both touched inside the same bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
  /// Count the bar as a stop-out
  #[default]
  StopFirst,
  /// Count the bar as a target hit
  TargetFirst,
}

/// Parameters of the outcome labeller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
  /// Bars scanned after the entry bar
  pub max_forward_bars: usize,
  pub tie_break: TieBreak,
}

impl Default for LabelConfig {
  fn default() -> Self {
    Self { max_forward_bars: 100, tie_break: TieBreak::StopFirst }
  }
}

// ============================================================
// TESTS
// ============================================================
