//! The five detection stages as pure queries over index windows.
//!
//! Every function returns `None` when its stage does not match at the
//! candidate index; the detector chains them with `?`.

use crate::{
    config::DetectorConfig,
    indicators::ATR_KEY,
    pattern::{Consolidation, Hook, MomentumMove, Reentry, TestBar},
    Direction, OHLCV, OHLCVExt,
};

/// ATR of a bar when it is present and usable as a divisor
#[inline]
pub fn atr_at<T: OHLCV>(bar: &T) -> Option<f64> {
    bar.indicator(ATR_KEY).filter(|v| v.is_finite() && *v > 0.0)
}

/// Directional excursion of the leg `start..=end`
#[inline]
fn excursion<T: OHLCV>(start: &T, end: &T, direction: Direction) -> f64 {
    match direction {
        Direction::Long => end.high() - start.low(),
        Direction::Short => start.high() - end.low(),
    }
}

/// Highest high and lowest low of a window, `None` if any bar has a non-finite extreme
fn extremes<T: OHLCV>(window: &[T]) -> Option<(f64, f64)> {
    window
        .iter()
        .try_fold((f64::NEG_INFINITY, f64::INFINITY), |(high, low), bar| {
            let (h, l) = (bar.high(), bar.low());
            (h.is_finite() && l.is_finite()).then(|| (high.max(h), low.min(l)))
        })
        .filter(|(high, low)| high.is_finite() && low.is_finite())
}

/// Stage 1: first `(start, end)` pair, in scan order, whose excursion reaches
/// `momentum_atr_multiple * ATR(end)`.
pub fn momentum_move<T: OHLCV>(
    bars: &[T],
    i: usize,
    direction: Direction,
    config: &DetectorConfig,
) -> Option<MomentumMove> {
    let first_start = i.checked_sub(config.momentum_lookback_max)?;
    let last_start = i.checked_sub(config.momentum_lookback_min)?;
    let last_end = i.checked_sub(config.momentum_end_gap)?;

    (first_start..=last_start).find_map(|start| {
        let start_bar = bars.get(start)?;
        (start.saturating_add(config.momentum_min_bars)..=last_end).find_map(|end| {
            let end_bar = bars.get(end)?;
            let atr = atr_at(end_bar)?;
            let size = excursion(start_bar, end_bar, direction);
            if size < config.momentum_atr_multiple * atr {
                return None;
            }
            let (high, low) = extremes(bars.get(start..=end)?)?;
            Some(MomentumMove {
                start_index: start,
                end_index: end,
                high,
                low,
                size,
                size_in_atr: size / atr,
            })
        })
    })
}

/// Stage 2: range from the leg's end up to the bar before the test-bar window.
pub fn consolidation<T: OHLCV>(
    bars: &[T],
    i: usize,
    momentum: &MomentumMove,
    config: &DetectorConfig,
) -> Option<Consolidation> {
    let span = i.checked_sub(momentum.end_index)?;
    if span < config.min_consolidation_bars || span > config.max_consolidation_bars {
        return None;
    }

    let start = momentum.end_index;
    let end = i.checked_sub(config.test_bar_window.checked_add(1)?)?;
    if end < start {
        return None;
    }
    let window = bars.get(start..=end)?;

    let (top, bottom) = extremes(window)?;
    let tolerance = (top - bottom) * config.touch_tolerance.get();

    // a bar touching both extremes still counts once
    let swing_touches = window
        .iter()
        .filter(|bar| bar.high() >= top - tolerance || bar.low() <= bottom + tolerance)
        .count();
    if swing_touches < config.min_swing_touches {
        return None;
    }

    Some(Consolidation {
        start_index: start,
        end_index: end,
        base: (top + bottom) / 2.0,
        bar_count: span,
        swing_touches,
        high: top,
        low: bottom,
    })
}

/// Stage 3: first outsized bar in `[i - window, i - 1]` closing beyond the base.
pub fn test_bar<T: OHLCV>(
    bars: &[T],
    i: usize,
    direction: Direction,
    consolidation: &Consolidation,
    config: &DetectorConfig,
) -> Option<TestBar> {
    let first = i.checked_sub(config.test_bar_window)?;

    (first..i).find_map(|index| {
        let bar = bars.get(index)?;
        let atr = atr_at(bar)?;
        let size = bar.range();
        (size > config.test_bar_atr_multiple * atr && direction.beyond(bar.close(), consolidation.base)).then(|| {
            TestBar {
                index,
                high: bar.high(),
                low: bar.low(),
                close: bar.close(),
                size_in_atr: size / atr,
            }
        })
    })
}

/// Stage 4: first bar after the test bar that trades through its opposite extreme.
pub fn hook<T: OHLCV>(
    bars: &[T],
    i: usize,
    direction: Direction,
    test: &TestBar,
    config: &DetectorConfig,
) -> Option<Hook> {
    let last = test.index.saturating_add(config.hook_window).min(i.checked_sub(1)?);
    let level = match direction {
        Direction::Long => test.low,
        Direction::Short => test.high,
    };

    (test.index + 1..=last).find_map(|index| {
        let bar = bars.get(index)?;
        let extreme = match direction {
            Direction::Long => bar.low(),
            Direction::Short => bar.high(),
        };
        direction.beyond(level, extreme).then(|| Hook {
            index,
            swing_extreme: extreme,
            closes_beyond_test_bar: direction.beyond(level, bar.close()),
        })
    })
}

/// Stage 5: the candidate bar closes back beyond the base.
pub fn reentry<T: OHLCV>(
    bars: &[T],
    i: usize,
    direction: Direction,
    consolidation: &Consolidation,
) -> Option<Reentry> {
    let close = bars.get(i)?.close();
    let far_side = match direction {
        Direction::Long => consolidation.high,
        Direction::Short => consolidation.low,
    };

    direction.beyond(close, consolidation.base).then(|| Reentry {
        index: i,
        breaks_consolidation: direction.beyond(close, far_side),
    })
}
