//! Technical indicators - pure functions over explicit price slices.
//!
//! Every function declares a minimum sample size. Below it the function returns
//! a neutral sentinel (0, 50, 1.0, `None` or a neutral enum variant) instead of
//! failing, so callers can evaluate on a warming-up window without branching.

use serde::{Deserialize, Serialize};

use crate::candles::Candle;

// =============================================================================
// Helpers
// =============================================================================

fn tail(values: &[f64], period: usize) -> &[f64] {
    &values[values.len().saturating_sub(period)..]
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn mean_and_std(window: &[f64]) -> (f64, f64) {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

// =============================================================================
// Moving Averages
// =============================================================================

/// Mean of the last `period` values. Sentinel: 0.
pub fn sma(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return 0.0;
    }
    tail(values, period).iter().sum::<f64>() / period as f64
}

/// EMA seeded with the SMA of the first `period` samples. Sentinel: 0.
pub fn ema(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return 0.0;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut value = values[..period].iter().sum::<f64>() / period as f64;
    for &v in &values[period..] {
        value = v * k + value * (1.0 - k);
    }
    value
}

/// Sentinel: 0 below `period + 1` samples.
pub fn dema(values: &[f64], period: usize) -> f64 {
    if values.len() < period + 1 {
        return 0.0;
    }
    let e1 = ema(values, period);
    let e2 = ema(&values[..values.len() - 1], period);
    2.0 * e1 - e2
}

/// Sentinel: 0 below `period + 2` samples.
pub fn tema(values: &[f64], period: usize) -> f64 {
    if values.len() < period + 2 {
        return 0.0;
    }
    let n = values.len();
    let e1 = ema(values, period);
    let e2 = ema(&values[..n - 1], period);
    let e3 = ema(&values[..n - 2], period);
    3.0 * (e1 - e2) + e3
}

// =============================================================================
// Oscillators
// =============================================================================

/// Wilder RSI. Sentinel: 50 with `period` or fewer samples; 100 when there are no losses.
pub fn rsi(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() <= period {
        return 50.0;
    }
    let p = period as f64;
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let diff = values[i] - values[i - 1];
        if diff > 0.0 {
            gains += diff;
        } else {
            losses -= diff;
        }
    }
    let mut avg_gain = gains / p;
    let mut avg_loss = losses / p;
    for i in period + 1..values.len() {
        let diff = values[i] - values[i - 1];
        let (gain, loss) = if diff > 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Four-stage Laguerre RSI, bounded to [0, 100]. Sentinel: 50.
pub fn rsi_laguerre(values: &[f64], gamma: f64) -> f64 {
    if values.len() < 4 {
        return 50.0;
    }
    let (mut l0, mut l1, mut l2, mut l3) = (values[0], values[0], values[0], values[0]);
    for &price in &values[1..] {
        let (p0, p1, p2, p3) = (l0, l1, l2, l3);
        l0 = (1.0 - gamma) * price + gamma * p0;
        l1 = -gamma * l0 + p0 + gamma * p1;
        l2 = -gamma * l1 + p1 + gamma * p2;
        l3 = -gamma * l2 + p2 + gamma * p3;
    }
    let mut cu = 0.0;
    let mut cd = 0.0;
    for d in [l0 - l1, l1 - l2, l2 - l3] {
        if d >= 0.0 {
            cu += d;
        } else {
            cd -= d;
        }
    }
    let scale = values[values.len() - 1].abs().max(1.0);
    if cu + cd <= 1e-9 * scale {
        return 50.0;
    }
    (100.0 * cu / (cu + cd)).clamp(0.0, 100.0)
}

/// Fisher transform of the position inside the `period` range, saturating near ±1. Sentinel: 0.
pub fn fisher(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return 0.0;
    }
    let window = tail(values, period);
    let (lo, hi) = (min_of(window), max_of(window));
    if hi == lo {
        return 0.0;
    }
    let last = values[values.len() - 1];
    let mut x = 2.0 * ((last - lo) / (hi - lo) - 0.5);
    if x > 0.99 {
        x = 0.999;
    } else if x < -0.99 {
        x = -0.999;
    }
    0.5 * ((1.0 + x) / (1.0 - x)).ln()
}

// =============================================================================
// Volatility / Trend Strength
// =============================================================================

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, c) = (w[0], w[1]);
            (c.high - c.low)
                .max((c.high - prev.close).abs())
                .max((c.low - prev.close).abs())
        })
        .collect()
}

/// Wilder-smoothed average true range. Sentinel: 0 below `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }
    let tr = true_ranges(candles);
    let p = period as f64;
    let mut value = tr[..period].iter().sum::<f64>() / p;
    for &t in &tr[period..] {
        value = (value * (p - 1.0) + t) / p;
    }
    value
}

/// Average directional index. Sentinel: 0 below `2 * period` samples.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let n = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || n < period * 2 {
        return 0.0;
    }
    let p = period as f64;
    let mut tr = Vec::with_capacity(n - 1);
    let mut dm_plus = Vec::with_capacity(n - 1);
    let mut dm_minus = Vec::with_capacity(n - 1);
    for i in 1..n {
        let prev_close = closes[i - 1];
        tr.push(
            (highs[i] - lows[i])
                .max((highs[i] - prev_close).abs())
                .max((lows[i] - prev_close).abs()),
        );
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        dm_plus.push(if up > down && up > 0.0 { up } else { 0.0 });
        dm_minus.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let dx = |plus: f64, minus: f64, range: f64| -> f64 {
        if range == 0.0 {
            return 0.0;
        }
        let di_plus = plus / range * 100.0;
        let di_minus = minus / range * 100.0;
        let sum = di_plus + di_minus;
        if sum == 0.0 {
            0.0
        } else {
            (di_plus - di_minus).abs() / sum * 100.0
        }
    };

    let mut tr_s: f64 = tr[..period].iter().sum();
    let mut plus_s: f64 = dm_plus[..period].iter().sum();
    let mut minus_s: f64 = dm_minus[..period].iter().sum();
    let mut dxs = vec![dx(plus_s, minus_s, tr_s)];
    for i in period..tr.len() {
        tr_s = tr_s - tr_s / p + tr[i];
        plus_s = plus_s - plus_s / p + dm_plus[i];
        minus_s = minus_s - minus_s / p + dm_minus[i];
        dxs.push(dx(plus_s, minus_s, tr_s));
    }
    if dxs.len() < period {
        return 0.0;
    }
    let mut value = dxs[..period].iter().sum::<f64>() / p;
    for &d in &dxs[period..] {
        value = (value * (p - 1.0) + d) / p;
    }
    value
}

/// Parabolic stop-and-reverse over closes. Sentinel: 0 on empty input.
pub fn psar(values: &[f64], step: f64, max_step: f64) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    let mut sar = first;
    let mut ep = first;
    let mut af = step;
    let mut rising = true;
    for &price in &values[1..] {
        sar += af * (ep - sar);
        let breached = if rising { price < sar } else { price > sar };
        if breached {
            rising = !rising;
            sar = ep;
            ep = price;
            af = step;
        } else if (rising && price > ep) || (!rising && price < ep) {
            ep = price;
            af = (af + step).min(max_step);
        }
    }
    sar
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Population-stddev Bollinger bands.
pub fn bollinger(values: &[f64], period: usize, k: f64) -> Option<Bands> {
    if period == 0 || values.len() < period {
        return None;
    }
    let (mean, std) = mean_and_std(tail(values, period));
    Some(Bands { middle: mean, upper: mean + k * std, lower: mean - k * std })
}

/// (last - mean) / stddev over the window. Sentinel: 0, also when stddev is 0.
pub fn z_score(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return 0.0;
    }
    let (mean, std) = mean_and_std(tail(values, period));
    if std == 0.0 {
        return 0.0;
    }
    (values[values.len() - 1] - mean) / std
}

/// Last candle range relative to the mean range. Sentinel: 1.0.
pub fn market_force(highs: &[f64], lows: &[f64], period: usize) -> f64 {
    let n = highs.len().min(lows.len());
    if period == 0 || n < period {
        return 1.0;
    }
    let avg = (n - period..n).map(|i| highs[i] - lows[i]).sum::<f64>() / period as f64;
    if avg > 0.0 {
        (highs[n - 1] - lows[n - 1]) / avg
    } else {
        1.0
    }
}

// =============================================================================
// Levels and Channels
// =============================================================================

/// Midpoint of the last `period` candles minus `factor * ATR`. Sentinel: 0.
pub fn super_trend(candles: &[Candle], period: usize, factor: f64) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }
    let window = &candles[candles.len() - period..];
    let hi = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let lo = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    (hi + lo) / 2.0 - factor * atr(candles, period)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ichimoku {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_b: f64,
}

pub fn ichimoku(highs: &[f64], lows: &[f64], tenkan: usize, kijun: usize, senkou_b: usize) -> Option<Ichimoku> {
    let longest = tenkan.max(kijun).max(senkou_b);
    if longest == 0 || highs.len() < longest || lows.len() < longest {
        return None;
    }
    let mid = |p: usize| (max_of(tail(highs, p)) + min_of(tail(lows, p))) / 2.0;
    Some(Ichimoku { tenkan: mid(tenkan), kijun: mid(kijun), senkou_b: mid(senkou_b) })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Alligator {
    pub jaw: f64,
    pub teeth: f64,
    pub lips: f64,
}

pub fn alligator(values: &[f64], jaw: usize, teeth: usize, lips: usize) -> Option<Alligator> {
    if jaw == 0 || values.len() < jaw.max(teeth).max(lips) {
        return None;
    }
    Some(Alligator { jaw: sma(values, jaw), teeth: sma(values, teeth), lips: sma(values, lips) })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibLevels {
    pub max: f64,
    pub min: f64,
    pub l618: f64,
    pub l500: f64,
    pub l382: f64,
    pub l236: f64,
}

/// Retracement levels measured down from the `period` high.
pub fn fibonacci(highs: &[f64], lows: &[f64], period: usize) -> Option<FibLevels> {
    if period == 0 || highs.len() < period || lows.len() < period {
        return None;
    }
    let max = max_of(tail(highs, period));
    let min = min_of(tail(lows, period));
    let diff = max - min;
    Some(FibLevels {
        max,
        min,
        l618: max - diff * 0.618,
        l500: max - diff * 0.5,
        l382: max - diff * 0.382,
        l236: max - diff * 0.236,
    })
}

pub fn donchian(values: &[f64], period: usize) -> Option<Bands> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = tail(values, period);
    let (upper, lower) = (max_of(window), min_of(window));
    Some(Bands { middle: (upper + lower) / 2.0, upper, lower })
}

// =============================================================================
// Classifiers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crossover {
    Up,
    Down,
}

/// Strict crossing between the previous two samples of each series only.
pub fn detect_crossover(short: &[f64], long: &[f64]) -> Option<Crossover> {
    if short.len() < 2 || long.len() < 2 {
        return None;
    }
    let (s1, s0) = (short[short.len() - 2], short[short.len() - 1]);
    let (l1, l0) = (long[long.len() - 2], long[long.len() - 1]);
    if s1 <= l1 && s0 > l0 {
        Some(Crossover::Up)
    } else if s1 >= l1 && s0 < l0 {
        Some(Crossover::Down)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

/// Direction of the last close-to-close move.
pub fn trend_bias(values: &[f64]) -> TrendBias {
    match values {
        [.., prev, last] if last > prev => TrendBias::Bullish,
        [.., prev, last] if last < prev => TrendBias::Bearish,
        _ => TrendBias::Neutral,
    }
}

/// At least four of the last five moves in one direction. Needs 6 samples.
pub fn run_trend(values: &[f64]) -> TrendBias {
    if values.len() < 6 {
        return TrendBias::Neutral;
    }
    let n = values.len();
    let (mut up, mut down) = (0, 0);
    for i in n - 5..n {
        if values[i] > values[i - 1] {
            up += 1;
        } else if values[i] < values[i - 1] {
            down += 1;
        }
    }
    if up >= 4 {
        TrendBias::Bullish
    } else if down >= 4 {
        TrendBias::Bearish
    } else {
        TrendBias::Neutral
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleForce {
    Bullish,
    Bearish,
    Unclear,
}

pub fn candle_force(c: &Candle) -> CandleForce {
    let body = c.body();
    let (upper, lower) = (c.upper_wick(), c.lower_wick());
    if body > upper && body > lower {
        if c.close > c.open {
            CandleForce::Bullish
        } else {
            CandleForce::Bearish
        }
    } else if upper > body * 0.5 {
        CandleForce::Bearish
    } else if lower > body * 0.5 {
        CandleForce::Bullish
    } else {
        CandleForce::Unclear
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WickRejection {
    None,
    Upper,
    Lower,
}

/// Wick-to-body and wick-to-range limits for a rejection candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WickThresholds {
    pub body_ratio: f64,
    pub range_pct: f64,
}

impl Default for WickThresholds {
    fn default() -> Self {
        Self { body_ratio: 2.5, range_pct: 0.6 }
    }
}

pub fn wick_rejection(c: &Candle, th: &WickThresholds) -> WickRejection {
    let body = c.body().max(1e-6);
    let range = c.range();
    let (upper, lower) = (c.upper_wick(), c.lower_wick());
    let pct = |wick: f64| if range > 0.0 { wick / range } else { 0.0 };
    if upper / body > th.body_ratio || pct(upper) > th.range_pct {
        WickRejection::Upper
    } else if lower / body > th.body_ratio || pct(lower) > th.range_pct {
        WickRejection::Lower
    } else {
        WickRejection::None
    }
}

// =============================================================================
// Tests
// =============================================================================
