//! Five-stage hook pattern detector over a Low Frame series.
//!
//! Every candidate index is evaluated independently: HF alignment gate,
//! momentum move, consolidation, test bar, hook, re-entry. Candidates are
//! drawn from `[edge_margin, len - edge_margin)` so that every window fits
//! inside the series.

pub mod stages;

use rayon::prelude::*;

use crate::{
    coma::{ComaClassifier, ComaStatus},
    config::DetectorConfig,
    pattern::{HfTrend, Label, LabelDetails, Pattern},
    PatternError, Result, Timeframe, OHLCV,
};

// ============================================================
// HF ALIGNMENT
// ============================================================

/// HF bar times with their COMA status, for nearest-timestamp lookup.
///
/// HF times are expected in increasing order; bars without a timestamp are
/// left out.
#[derive(Debug, Clone)]
pub struct HfTrendIndex {
    times: Vec<i64>,
    statuses: Vec<ComaStatus>,
    tolerance_secs: i64,
}

impl HfTrendIndex {
    pub fn new<T: OHLCV>(bars: &[T], classifier: &ComaClassifier, tolerance_secs: i64) -> Self {
        let (times, statuses): (Vec<i64>, Vec<ComaStatus>) = bars
            .iter()
            .filter_map(|bar| Some((bar.timestamp()?, classifier.status_at(bar))))
            .unzip();
        Self {
            times,
            statuses,
            tolerance_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// HF bar closest to `time` within the tolerance, as `(bar_time, status)`.
    /// Equidistant neighbours resolve to the earlier bar.
    pub fn nearest(&self, time: i64) -> Option<(i64, ComaStatus)> {
        let after = self.times.partition_point(|&t| t < time);
        let before = after.checked_sub(1);

        let index = match (before, self.times.get(after)) {
            (Some(b), Some(&next)) => {
                if time - self.times[b] <= next - time {
                    b
                } else {
                    after
                }
            }
            (Some(b), None) => b,
            (None, Some(_)) => after,
            (None, None) => return None,
        };

        let bar_time = self.times[index];
        ((bar_time - time).abs() <= self.tolerance_secs).then(|| (bar_time, self.statuses[index]))
    }
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone)]
pub struct PatternDetector {
    config: DetectorConfig,
}

impl PatternDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Series length needed for at least one candidate index
    pub fn min_bars(&self) -> usize {
        self.config.edge_margin.saturating_mul(2).saturating_add(1)
    }

    pub fn check_length(&self, len: usize) -> Result<()> {
        let need = self.min_bars();
        if len < need {
            return Err(PatternError::InsufficientData { need, got: len });
        }
        Ok(())
    }

    /// Build the HF lookup with the detector's HF tuple and tolerance
    pub fn hf_index<T: OHLCV>(&self, hf: &[T]) -> HfTrendIndex {
        let classifier = ComaClassifier::new(self.config.periods_for(Timeframe::High))
            .with_required_bars(self.config.required_coma_bars);
        HfTrendIndex::new(hf, &classifier, self.config.hf_tolerance_secs)
    }

    fn candidates(&self, len: usize) -> std::ops::Range<usize> {
        self.config.edge_margin..len.saturating_sub(self.config.edge_margin)
    }

    /// Scan every candidate index in order.
    pub fn detect<T: OHLCV>(&self, lf: &[T], hf: &[T]) -> Result<Vec<Pattern>> {
        self.check_length(lf.len())?;
        let index = self.hf_index(hf);
        if index.is_empty() {
            tracing::debug!(bars = lf.len(), "no timestamped HF bars, nothing to align");
            return Ok(Vec::new());
        }

        let patterns: Vec<Pattern> = self
            .candidates(lf.len())
            .filter_map(|i| self.detect_at(lf, &index, i))
            .collect();

        self.log_summary(lf.len(), &index, patterns.len());
        Ok(patterns)
    }

    /// Same output as [`detect`](Self::detect), with candidate indices spread over the rayon pool.
    pub fn detect_parallel<T: OHLCV + Sync>(&self, lf: &[T], hf: &[T]) -> Result<Vec<Pattern>> {
        self.check_length(lf.len())?;
        let index = self.hf_index(hf);
        if index.is_empty() {
            tracing::debug!(bars = lf.len(), "no timestamped HF bars, nothing to align");
            return Ok(Vec::new());
        }

        let patterns: Vec<Pattern> = self
            .candidates(lf.len())
            .into_par_iter()
            .filter_map(|i| self.detect_at(lf, &index, i))
            .collect();

        self.log_summary(lf.len(), &index, patterns.len());
        Ok(patterns)
    }

    /// Evaluate the five stages at LF index `i`.
    ///
    /// Returns `None` when any stage fails, and also when the assembled
    /// pattern breaks stage ordering (see [`Pattern::check_stage_order`]).
    pub fn detect_at<T: OHLCV>(&self, lf: &[T], hf: &HfTrendIndex, i: usize) -> Option<Pattern> {
        let config = &self.config;
        let trigger = lf.get(i)?;
        let entry_time = trigger.timestamp()?;

        // cheapest rejection first
        let (bar_time, status) = hf.nearest(entry_time)?;
        if !status.confirmed {
            return None;
        }
        let trend = status.direction();
        let direction = trend.to_direction()?;

        let momentum = stages::momentum_move(lf, i, direction, config)?;
        let consolidation = stages::consolidation(lf, i, &momentum, config)?;
        let test_bar = stages::test_bar(lf, i, direction, &consolidation, config)?;
        let hook = stages::hook(lf, i, direction, &test_bar, config)?;
        let reentry = stages::reentry(lf, i, direction, &consolidation)?;

        let atr = stages::atr_at(trigger)?;
        let sign = direction.sign();
        let entry_price = consolidation.base + sign * config.entry_atr_offset * atr;
        let stop_loss = hook.swing_extreme - sign * config.tick_size;
        let target = entry_price + sign * momentum.size;

        let pattern = Pattern {
            direction,
            entry_time,
            entry_price,
            stop_loss,
            target,
            atr,
            momentum,
            consolidation,
            test_bar,
            hook,
            reentry,
            hf_trend: HfTrend {
                direction: trend,
                confirmed: status.confirmed,
                bar_time,
            },
            label: Label::Unlabeled,
            label_details: LabelDetails::default(),
        };

        match pattern.check_stage_order(config.hook_window) {
            Ok(()) => Some(pattern),
            Err(error) => {
                tracing::error!(index = i, %error, "dropping structurally invalid pattern");
                debug_assert!(false, "{error}");
                None
            }
        }
    }

    fn log_summary(&self, bars: usize, hf: &HfTrendIndex, found: usize) {
        tracing::debug!(
            bars,
            hf_bars = hf.len(),
            candidates = self.candidates(bars).len(),
            patterns = found,
            "pattern scan complete"
        );
    }
}
