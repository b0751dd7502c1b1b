//! Pattern records produced by the detector and completed by the labeller.
//!
//! Field names in the serialized form are part of the interface: downstream
//! feature and report tooling matches on `entryTime`, `stage1_momentumMove`,
//! `labelDetails` and friends.

use serde::{Deserialize, Serialize};

use crate::{coma::TrendDirection, Direction, PatternError, Result};

/// Stage 1: impulsive leg in the trend direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumMove {
    pub start_index: usize,
    pub end_index: usize,
    pub high: f64,
    pub low: f64,
    pub size: f64,
    pub size_in_atr: f64,
}

/// Stage 2: sideways range after the leg
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consolidation {
    pub start_index: usize,
    /// Last bar used to measure the range
    pub end_index: usize,
    /// Midpoint of the range
    pub base: f64,
    /// Bars from the leg's end to the trigger bar
    pub bar_count: usize,
    pub swing_touches: usize,
    pub high: f64,
    pub low: f64,
}

/// Stage 3: outsized bar closing beyond the base
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestBar {
    pub index: usize,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub size_in_atr: f64,
}

/// Stage 4: failed breakout through the test bar's opposite extreme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub index: usize,
    pub swing_extreme: f64,
    pub closes_beyond_test_bar: bool,
}

/// Stage 5: close back beyond the base, the trigger bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reentry {
    pub index: usize,
    pub breaks_consolidation: bool,
}

/// HF bar the pattern was aligned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HfTrend {
    pub direction: TrendDirection,
    pub confirmed: bool,
    pub bar_time: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Winner,
    Loser,
    #[default]
    Unlabeled,
}

/// Why a label was assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelReason {
    TargetHit,
    StopHit,
    /// Both levels inside one bar, resolved as a stop-out
    SameBarStop,
    /// Both levels inside one bar, resolved as a target hit
    SameBarTarget,
    /// Neither level reached inside the forward window
    Inconclusive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDetails {
    pub hit_index: Option<usize>,
    pub hit_time: Option<i64>,
    pub bars_to_hit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<LabelReason>,
}

/// A fully formed five-stage pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub direction: Direction,
    pub entry_time: i64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target: f64,
    pub atr: f64,
    #[serde(rename = "stage1_momentumMove")]
    pub momentum: MomentumMove,
    #[serde(rename = "stage2_consolidation")]
    pub consolidation: Consolidation,
    #[serde(rename = "stage3_testBar")]
    pub test_bar: TestBar,
    #[serde(rename = "stage4_hook")]
    pub hook: Hook,
    #[serde(rename = "stage5_reentry")]
    pub reentry: Reentry,
    pub hf_trend: HfTrend,
    #[serde(default)]
    pub label: Label,
    #[serde(default)]
    pub label_details: LabelDetails,
}

impl Pattern {
    /// LF index of the trigger bar
    #[inline]
    pub fn entry_index(&self) -> usize {
        self.reentry.index
    }

    #[inline]
    pub fn is_labeled(&self) -> bool {
        self.label != Label::Unlabeled
    }

    /// Bars from entry to the target touch, for winners
    pub fn bars_to_target(&self) -> Option<usize> {
        match self.label {
            Label::Winner => self.label_details.bars_to_hit,
            _ => None,
        }
    }

    /// Bars from entry to the stop touch, for resolved losers
    pub fn bars_to_stop(&self) -> Option<usize> {
        match self.label {
            Label::Loser => self.label_details.bars_to_hit,
            _ => None,
        }
    }

    /// Reward over risk measured from the entry price
    pub fn reward_risk(&self) -> Option<f64> {
        let risk = (self.entry_price - self.stop_loss).abs();
        (risk > f64::EPSILON).then(|| (self.target - self.entry_price).abs() / risk)
    }

    /// Check that the stage indices are ordered:
    /// `s1.end <= s2.start`, `s2.end <= s3`, `s3 < s4 <= s3 + hook_window`, `s4 < s5`.
    pub fn check_stage_order(&self, hook_window: usize) -> Result<()> {
        let m = &self.momentum;
        let c = &self.consolidation;
        let (test, hook, reentry) = (self.test_bar.index, self.hook.index, self.reentry.index);

        let violation = if m.start_index > m.end_index {
            Some(format!("momentum start {} after end {}", m.start_index, m.end_index))
        } else if m.end_index > c.start_index {
            Some(format!("momentum end {} after consolidation start {}", m.end_index, c.start_index))
        } else if c.start_index > c.end_index {
            Some(format!("consolidation start {} after end {}", c.start_index, c.end_index))
        } else if c.end_index > test {
            Some(format!("consolidation end {} after test bar {}", c.end_index, test))
        } else if hook <= test || hook > test.saturating_add(hook_window) {
            Some(format!("hook {hook} outside ({test}, {}]", test.saturating_add(hook_window)))
        } else if reentry <= hook {
            Some(format!("re-entry {reentry} not after hook {hook}"))
        } else {
            None
        };

        match violation {
            Some(message) => Err(PatternError::StructuralViolation(message)),
            None => Ok(()),
        }
    }
}

/// Serialize patterns as a JSON array
pub fn patterns_to_json(patterns: &[Pattern]) -> Result<String> {
    serde_json::to_string_pretty(patterns).map_err(|e| PatternError::Serialization(e.to_string()))
}

pub fn patterns_from_json(json: &str) -> Result<Vec<Pattern>> {
    serde_json::from_str(json).map_err(|e| PatternError::Serialization(e.to_string()))
}
