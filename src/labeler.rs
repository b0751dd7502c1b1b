//! Retroactive Winner/Loser labelling of detected patterns.
//!
//! From the bar after entry, each forward bar is tested intrabar: the target
//! is touched when the bar's extreme in the trade direction reaches it, the
//! stop when the opposite extreme does. The first bar touching either level
//! decides the label. Patterns that reach neither level inside the window
//! are labelled `Loser` with reason `inconclusive`. A bar whose high or low
//! is not finite touches neither level and is reported with a `warn!` event.

use serde::Serialize;

use crate::{
    config::{LabelConfig, TieBreak},
    pattern::{Label, LabelDetails, LabelReason, Pattern},
    Direction, OHLCV,
};

#[derive(Debug, Clone, Default)]
pub struct OutcomeLabeler {
    config: LabelConfig,
}

impl OutcomeLabeler {
    pub fn new(config: LabelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LabelConfig {
        &self.config
    }

    /// Label one pattern whose trigger bar is `bars[entry_index]`.
    ///
    /// Patterns that already carry a label are returned unchanged.
    pub fn label<T: OHLCV>(&self, mut pattern: Pattern, bars: &[T], entry_index: usize) -> Pattern {
        if pattern.is_labeled() {
            return pattern;
        }

        let window = self
            .config
            .max_forward_bars
            .min(bars.len().saturating_sub(entry_index.saturating_add(1)));

        let outcome = (1..=window).find_map(|offset| {
            let index = entry_index + offset;
            let bar = bars.get(index)?;
            if !bar.high().is_finite() || !bar.low().is_finite() {
                tracing::warn!(index, high = bar.high(), low = bar.low(), "non-finite bar skipped while labelling");
                return None;
            }
            let reason = match self.touches(&pattern, bar) {
                (true, false) => LabelReason::TargetHit,
                (false, true) => LabelReason::StopHit,
                (true, true) => match self.config.tie_break {
                    TieBreak::StopFirst => LabelReason::SameBarStop,
                    TieBreak::TargetFirst => LabelReason::SameBarTarget,
                },
                (false, false) => return None,
            };
            Some((index, offset, bar.timestamp(), reason))
        });

        let (label, details) = match outcome {
            Some((index, offset, time, reason)) => {
                let label = match reason {
                    LabelReason::TargetHit | LabelReason::SameBarTarget => Label::Winner,
                    _ => Label::Loser,
                };
                let details = LabelDetails {
                    hit_index: Some(index),
                    hit_time: time,
                    bars_to_hit: Some(offset),
                    reason: Some(reason),
                };
                (label, details)
            }
            None => (
                Label::Loser,
                LabelDetails {
                    reason: Some(LabelReason::Inconclusive),
                    ..Default::default()
                },
            ),
        };

        pattern.label = label;
        pattern.label_details = details;
        pattern
    }

    /// Label every pattern at its own re-entry index.
    pub fn label_all<T: OHLCV>(&self, patterns: Vec<Pattern>, bars: &[T]) -> Vec<Pattern> {
        let labelled: Vec<Pattern> = patterns
            .into_iter()
            .map(|p| {
                let entry = p.entry_index();
                self.label(p, bars, entry)
            })
            .collect();

        let summary = LabelSummary::from_patterns(&labelled);
        tracing::debug!(
            total = summary.total,
            winners = summary.winners,
            losers = summary.losers,
            inconclusive = summary.inconclusive,
            "labelled patterns"
        );
        labelled
    }

    /// `(target touched, stop touched)` within one bar
    fn touches<T: OHLCV>(&self, pattern: &Pattern, bar: &T) -> (bool, bool) {
        match pattern.direction {
            Direction::Long => (bar.high() >= pattern.target, bar.low() <= pattern.stop_loss),
            Direction::Short => (bar.low() <= pattern.target, bar.high() >= pattern.stop_loss),
        }
    }
}

/// Label tallies for reporting. `losers` includes the inconclusive ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSummary {
    pub total: usize,
    pub winners: usize,
    pub losers: usize,
    pub inconclusive: usize,
    pub unlabeled: usize,
}

impl LabelSummary {
    pub fn from_patterns(patterns: &[Pattern]) -> Self {
        patterns.iter().fold(Self::default(), |mut s, p| {
            s.total += 1;
            match p.label {
                Label::Winner => s.winners += 1,
                Label::Loser => s.losers += 1,
                Label::Unlabeled => s.unlabeled += 1,
            }
            if p.label_details.reason == Some(LabelReason::Inconclusive) {
                s.inconclusive += 1;
            }
            s
        })
    }

    /// Winners over labelled patterns
    pub fn win_rate(&self) -> Option<f64> {
        let labelled = self.winners + self.losers;
        (labelled > 0).then(|| self.winners as f64 / labelled as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pattern::fixtures::pattern, Candle};

    fn quiet(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i as i64 * 300, 100.0, 101.0, 99.0, 100.0, 0.0))
            .collect()
    }

    fn long() -> Pattern {
        pattern(Direction::Long, 100.0, 95.0, 110.0)
    }

    #[test]
    fn test_target_first_is_winner() {
        let mut bars = quiet(150);
        bars[5].high = 110.0;
        bars[8].low = 95.0;

        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.label, Label::Winner);
        assert_eq!(p.bars_to_target(), Some(5));
        assert_eq!(p.label_details.hit_index, Some(5));
        assert_eq!(p.label_details.hit_time, Some(1500));
        assert_eq!(p.label_details.reason, Some(LabelReason::TargetHit));
    }

    #[test]
    fn test_stop_first_is_loser() {
        let mut bars = quiet(150);
        bars[3].low = 95.0;

        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.label, Label::Loser);
        assert_eq!(p.bars_to_stop(), Some(3));
        assert_eq!(p.label_details.reason, Some(LabelReason::StopHit));
    }

    #[test]
    fn test_untouched_is_inconclusive_loser() {
        let bars = quiet(150);
        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.label, Label::Loser);
        assert_eq!(p.label_details.reason, Some(LabelReason::Inconclusive));
        assert_eq!(p.label_details.hit_index, None);
        assert_eq!(p.bars_to_stop(), None);
    }

    #[test]
    fn test_forward_window_is_bounded() {
        let mut bars = quiet(150);
        bars[101].high = 120.0;
        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.label_details.reason, Some(LabelReason::Inconclusive));

        let mut bars = quiet(150);
        bars[100].high = 120.0;
        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.bars_to_target(), Some(100));

        // last bar of the series has nothing ahead of it
        let p = OutcomeLabeler::default().label(long(), &bars, 149);
        assert_eq!(p.label_details.reason, Some(LabelReason::Inconclusive));
    }

    #[test]
    fn test_non_finite_bars_touch_nothing() {
        let mut bars = quiet(20);
        bars[2].low = f64::NAN;
        bars[3].high = f64::INFINITY;
        bars[5].high = 110.0;

        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.label, Label::Winner);
        assert_eq!(p.bars_to_target(), Some(5));

        let mut bars = quiet(4);
        bars[1].high = f64::NAN;
        bars[1].low = 90.0;
        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.label_details.reason, Some(LabelReason::Inconclusive));
    }

    #[test]
    fn test_entry_at_usize_max() {
        let bars = quiet(10);
        let p = OutcomeLabeler::default().label(long(), &bars, usize::MAX);
        assert_eq!(p.label_details.reason, Some(LabelReason::Inconclusive));
    }

    #[test]
    fn test_same_bar_tie_break() {
        let mut bars = quiet(20);
        bars[4].high = 111.0;
        bars[4].low = 94.0;

        let p = OutcomeLabeler::default().label(long(), &bars, 0);
        assert_eq!(p.label, Label::Loser);
        assert_eq!(p.label_details.reason, Some(LabelReason::SameBarStop));
        assert_eq!(p.bars_to_stop(), Some(4));

        let labeler = OutcomeLabeler::new(LabelConfig {
            tie_break: TieBreak::TargetFirst,
            ..Default::default()
        });
        let p = labeler.label(long(), &bars, 0);
        assert_eq!(p.label, Label::Winner);
        assert_eq!(p.label_details.reason, Some(LabelReason::SameBarTarget));
    }

    #[test]
    fn test_short_direction() {
        let mut bars = quiet(20);
        bars[2].low = 90.0;
        let p = OutcomeLabeler::default().label(pattern(Direction::Short, 100.0, 105.0, 90.0), &bars, 0);
        assert_eq!(p.label, Label::Winner);
        assert_eq!(p.bars_to_target(), Some(2));

        let mut bars = quiet(20);
        bars[6].high = 105.5;
        let p = OutcomeLabeler::default().label(pattern(Direction::Short, 100.0, 105.0, 90.0), &bars, 0);
        assert_eq!(p.bars_to_stop(), Some(6));
    }

    #[test]
    fn test_label_once() {
        let mut bars = quiet(20);
        bars[2].high = 110.0;
        let labeler = OutcomeLabeler::default();
        let first = labeler.label(long(), &bars, 0);

        bars[1].low = 90.0;
        let second = labeler.label(first.clone(), &bars, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_label_all_and_summary() {
        let mut bars = quiet(150);
        bars[12].high = 110.0;

        let mut late = long();
        late.reentry.index = 10;
        let patterns = vec![long(), late];

        let labelled = OutcomeLabeler::default().label_all(patterns, &bars);
        assert_eq!(labelled[0].bars_to_target(), Some(12));
        assert_eq!(labelled[1].bars_to_target(), Some(2));

        let mut unresolved = long();
        unresolved.label = Label::Loser;
        unresolved.label_details.reason = Some(LabelReason::Inconclusive);
        let mut all = labelled;
        all.push(unresolved);
        all.push(long());

        let summary = LabelSummary::from_patterns(&all);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.winners, 2);
        assert_eq!(summary.losers, 1);
        assert_eq!(summary.inconclusive, 1);
        assert_eq!(summary.unlabeled, 1);
        assert_eq!(summary.win_rate(), Some(2.0 / 3.0));
    }
}
