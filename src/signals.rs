//! Multi-candle rejection patterns.
//!
//! Detectors look at the last *closed* candles only: the final entry of the
//! window is the open candle and is never part of a pattern.

use serde::{Deserialize, Serialize};

use crate::candles::Candle;

pub const MIN_PATTERN_CANDLES: usize = 15;
pub const DEFAULT_SCAN_LOOKBACK: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSignal {
    None,
    OneByOneCall,
    OneByOnePut,
    StaircaseCall,
    StaircasePut,
}

impl PatternSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternSignal::None => "NONE",
            PatternSignal::OneByOneCall => "ONE_BY_ONE_CALL",
            PatternSignal::OneByOnePut => "ONE_BY_ONE_PUT",
            PatternSignal::StaircaseCall => "STAIRCASE_CALL",
            PatternSignal::StaircasePut => "STAIRCASE_PUT",
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, PatternSignal::OneByOneCall | PatternSignal::StaircaseCall)
    }

    pub fn is_put(&self) -> bool {
        matches!(self, PatternSignal::OneByOnePut | PatternSignal::StaircasePut)
    }
}

/// Empirically tuned limits for the rejection detectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternThresholds {
    /// EMA36/EMA51 gap (relative to SMA20) below which the market is lateral.
    pub lateral_gap_max: f64,
    /// Minimum EMA gap for a staircase trend.
    pub trend_gap_min: f64,
    /// Max distance of the signal close from SMA20, relative.
    pub near_sma_pct: f64,
    /// Pullback band around EMA36 for staircase entries.
    pub pullback_band: f64,
    pub one_by_one_rsi_call_max: f64,
    pub one_by_one_rsi_put_min: f64,
    pub staircase_rsi_call_max: f64,
    pub staircase_rsi_put_min: f64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            lateral_gap_max: 0.0015,
            trend_gap_min: 0.0002,
            near_sma_pct: 0.007,
            pullback_band: 0.008,
            one_by_one_rsi_call_max: 70.0,
            one_by_one_rsi_put_min: 30.0,
            staircase_rsi_call_max: 85.0,
            staircase_rsi_put_min: 15.0,
        }
    }
}

/// One-by-one (alternating colours near SMA20 in a lateral market) takes
/// precedence over staircase (pullback to EMA36 inside a trend).
pub fn detect_rejection_pattern(
    candles: &[Candle],
    ema36: f64,
    ema51: f64,
    sma20: f64,
    rsi: f64,
    th: &PatternThresholds,
) -> PatternSignal {
    let n = candles.len();
    if n < MIN_PATTERN_CANDLES {
        return PatternSignal::None;
    }
    let signal = candles[n - 2];
    let prev1 = candles[n - 3];
    let prev2 = candles[n - 4];

    let base = if sma20 != 0.0 { sma20 } else { signal.close };
    let ema_gap = if base != 0.0 { (ema36 - ema51).abs() / base } else { 0.0 };

    let one_call = prev2.is_bearish() && prev1.is_bullish() && signal.is_bearish();
    let one_put = prev2.is_bullish() && prev1.is_bearish() && signal.is_bullish();
    if one_call || one_put {
        let near_sma = sma20 != 0.0 && (signal.close - sma20).abs() / sma20 < th.near_sma_pct;
        let lateral = ema_gap < th.lateral_gap_max;
        if near_sma && lateral {
            if one_call && rsi < th.one_by_one_rsi_call_max {
                return PatternSignal::OneByOneCall;
            }
            if one_put && rsi > th.one_by_one_rsi_put_min {
                return PatternSignal::OneByOnePut;
            }
        }
    }

    if ema_gap > th.trend_gap_min {
        let last4 = [candles[n - 5], prev2, prev1, signal];
        if ema36 > ema51 {
            let pullback = last4
                .iter()
                .any(|c| c.is_bearish() && c.low <= ema36 * (1.0 + th.pullback_band));
            if pullback && signal.is_bullish() && rsi < th.staircase_rsi_call_max {
                return PatternSignal::StaircaseCall;
            }
        }
        if ema36 < ema51 {
            let pullback = last4
                .iter()
                .any(|c| c.is_bullish() && c.high >= ema36 * (1.0 - th.pullback_band));
            if pullback && signal.is_bearish() && rsi > th.staircase_rsi_put_min {
                return PatternSignal::StaircasePut;
            }
        }
    }

    PatternSignal::None
}

/// Number of completed three-candle rejections within `lookback` candles.
pub fn scan_pattern_history(candles: &[Candle], lookback: usize) -> usize {
    let n = candles.len();
    let lookback = lookback.min(n);
    if n < 3 {
        return 0;
    }
    (n - lookback..n - 3)
        .filter(|&i| {
            let (h1, h2, h3) = (candles[i], candles[i + 1], candles[i + 2]);
            let call = h1.is_bullish() && h2.is_bearish() && h2.low >= h1.open && h3.is_bullish();
            let put = h1.is_bearish() && h2.is_bullish() && h2.high <= h1.open && h3.is_bearish();
            call || put
        })
        .count()
}
