//! Synthetic series shared by the integration tests.
//!
//! `hook_series` is a 350-bar LF series (5-minute bars, ATR fixed at 1.0)
//! holding exactly one long hook pattern triggered at index 200:
//!
//! - 150..=175: momentum leg, `high[175] - low[150]` = 1.5 ATR
//! - 175..=189: consolidation 100.25..101.25 (base 100.75), three touches (175, 186, 188)
//! - 192: test bar, range 1.75 ATR, close 101.75
//! - 195: hook, low 100.0 under the test bar's low of 100.25
//! - 200: re-entry close 101.0 above the base

#![allow(dead_code)]

use mtf_hook::prelude::*;

pub const LF_STEP: i64 = 300;
pub const HF_STEP: i64 = 3600;
pub const TRIGGER: usize = 200;

const HF_TUPLE: [usize; 5] = [5, 8, 21, 50, 200];

pub fn lf_bar(i: usize, o: f64, h: f64, l: f64, c: f64) -> Candle {
    Candle::new(i as i64 * LF_STEP, o, h, l, c, 1000.0).with_indicator("atr", 1.0)
}

pub fn hook_series() -> Vec<Candle> {
    (0..350)
        .map(|i| {
            let (o, h, l, c) = match i {
                0..=164 | 201..=usize::MAX => (100.0, 100.25, 99.75, 100.0),
                165..=174 => {
                    let c = 100.0 + (i - 164) as f64 * 0.1;
                    (c - 0.05, c + 0.1, c - 0.1, c)
                }
                175 | 200 => (100.75, 101.25, 100.75, 101.0),
                186 | 188 => (100.75, 101.0, 100.25, 100.5),
                192 => (100.75, 102.0, 100.25, 101.75),
                195 => (100.5, 100.75, 100.0, 100.25),
                _ => (100.75, 101.0, 100.5, 100.5),
            };
            lf_bar(i, o, h, l, c)
        })
        .collect()
}

/// Reflect prices around 100, turning the long setup into a short one
pub fn mirror(bars: &[Candle]) -> Vec<Candle> {
    bars.iter()
        .map(|b| {
            let mut m = b.clone();
            m.open = 200.0 - b.open;
            m.high = 200.0 - b.low;
            m.low = 200.0 - b.high;
            m.close = 200.0 - b.close;
            m
        })
        .collect()
}

/// Hourly HF bars whose EMA tuple is in uptrend (or downtrend) order on every bar
pub fn hf_series(n: usize, up: bool) -> Vec<Candle> {
    (0..n)
        .map(|k| {
            HF_TUPLE.iter().enumerate().fold(
                Candle::new(k as i64 * HF_STEP, 100.0, 100.5, 99.5, 100.0, 1000.0),
                |c, (rank, &p)| {
                    let offset = rank as f64;
                    let value = if up { 105.0 - offset } else { 101.0 + offset };
                    c.with_indicator(format!("ema_{p}"), value)
                },
            )
        })
        .collect()
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
