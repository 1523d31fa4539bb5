// Strategy API: per-tick indicator snapshot, evaluation context and signals.

use serde::{Deserialize, Serialize};

use crate::candles::Candle;
use crate::indicators::{self, Alligator, Bands, CandleForce, Crossover, FibLevels, Ichimoku, TrendBias, WickRejection, WickThresholds};
use crate::risk::{PatternMemory, PatternSnapshot};
use crate::signals::{self, PatternSignal, PatternThresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Call => "CALL",
            Direction::Put => "PUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CALL" => Some(Direction::Call),
            "PUT" => Some(Direction::Put),
            _ => None,
        }
    }
}

/// One module's opinion for the current tick. Never queued across ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub source: String,
}

impl Signal {
    pub fn new(direction: Direction, source: impl Into<String>) -> Self {
        Self { direction, source: source.into() }
    }

    pub fn call(source: impl Into<String>) -> Self {
        Self::new(Direction::Call, source)
    }

    pub fn put(source: impl Into<String>) -> Self {
        Self::new(Direction::Put, source)
    }
}

// =============================================================================
// Indicator Snapshot
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    /// Candles required before any snapshot is produced.
    pub min_candles: usize,
    pub ema_period: usize,
    pub sma_period: usize,
    pub ema_trend_period: usize,
    pub ema_base_period: usize,
    pub rsi_period: usize,
    pub adx_period: usize,
    pub z_period: usize,
    pub laguerre_gamma: f64,
    pub super_trend_period: usize,
    pub super_trend_factor: f64,
    pub fisher_period: usize,
    pub fib_period: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub psar_step: f64,
    pub psar_max: f64,
    pub donchian_period: usize,
    pub market_force_period: usize,
    pub patterns: PatternThresholds,
    pub wicks: WickThresholds,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            min_candles: 80,
            ema_period: 10,
            sma_period: 20,
            ema_trend_period: 36,
            ema_base_period: 51,
            rsi_period: 14,
            adx_period: 14,
            z_period: 20,
            laguerre_gamma: 0.2,
            super_trend_period: 10,
            super_trend_factor: 3.0,
            fisher_period: 10,
            fib_period: 100,
            bollinger_period: 20,
            bollinger_k: 2.0,
            psar_step: 0.02,
            psar_max: 0.2,
            donchian_period: 20,
            market_force_period: 14,
            patterns: PatternThresholds::default(),
            wicks: WickThresholds::default(),
        }
    }
}

/// Everything the strategy modules read for one tick. Recomputed from the
/// trailing window every time; the last candle is the open one.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub last_price: f64,
    pub last_candle: Candle,
    pub ema: f64,
    pub sma: f64,
    pub ema36: f64,
    pub ema51: f64,
    pub dema: f64,
    pub tema: f64,
    pub z_score: f64,
    pub rsi_laguerre: f64,
    pub super_trend: f64,
    pub trend_bias: TrendBias,
    pub crossover: Option<Crossover>,
    pub rsi: f64,
    pub prev_rsi: f64,
    pub fisher: f64,
    pub fibo: Option<FibLevels>,
    pub run_trend: TrendBias,
    pub bollinger: Option<Bands>,
    pub psar: f64,
    pub ichimoku: Option<Ichimoku>,
    pub alligator: Option<Alligator>,
    pub donchian: Option<Bands>,
    pub candle_force: CandleForce,
    pub wick: WickRejection,
    pub pattern: PatternSignal,
    /// Completed rejection sequences in the recent window.
    pub pattern_history: usize,
    pub market_force: f64,
    pub adx: f64,
}

/// Flat market at 100 with every indicator at its neutral value.
impl Default for IndicatorSnapshot {
    fn default() -> Self {
        Self {
            last_price: 100.0,
            last_candle: Candle::flat(0, 100.0),
            ema: 100.0,
            sma: 100.0,
            ema36: 100.0,
            ema51: 100.0,
            dema: 100.0,
            tema: 100.0,
            z_score: 0.0,
            rsi_laguerre: 50.0,
            super_trend: 100.0,
            trend_bias: TrendBias::Neutral,
            crossover: None,
            rsi: 50.0,
            prev_rsi: 50.0,
            fisher: 0.0,
            fibo: None,
            run_trend: TrendBias::Neutral,
            bollinger: None,
            psar: 100.0,
            ichimoku: None,
            alligator: None,
            donchian: None,
            candle_force: CandleForce::Unclear,
            wick: WickRejection::None,
            pattern: PatternSignal::None,
            pattern_history: 0,
            market_force: 1.0,
            adx: 0.0,
        }
    }
}

impl IndicatorSnapshot {
    /// `None` while the window is still warming up.
    pub fn compute(candles: &[Candle], cfg: &IndicatorConfig) -> Option<Self> {
        let n = candles.len();
        if n < cfg.min_candles.max(2) {
            return None;
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let prev = &closes[..n - 1];
        let last_candle = candles[n - 1];

        let ema = indicators::ema(&closes, cfg.ema_period);
        let sma = indicators::sma(&closes, cfg.sma_period);
        let ema36 = indicators::ema(&closes, cfg.ema_trend_period);
        let ema51 = indicators::ema(&closes, cfg.ema_base_period);
        let rsi = indicators::rsi(&closes, cfg.rsi_period);

        let crossover = indicators::detect_crossover(
            &[indicators::ema(prev, cfg.ema_period), ema],
            &[indicators::sma(prev, cfg.sma_period), sma],
        );

        Some(Self {
            last_price: last_candle.close,
            last_candle,
            ema,
            sma,
            ema36,
            ema51,
            dema: indicators::dema(&closes, cfg.ema_period),
            tema: indicators::tema(&closes, cfg.ema_period),
            z_score: indicators::z_score(&closes, cfg.z_period),
            rsi_laguerre: indicators::rsi_laguerre(&closes, cfg.laguerre_gamma),
            super_trend: indicators::super_trend(candles, cfg.super_trend_period, cfg.super_trend_factor),
            trend_bias: indicators::trend_bias(&closes),
            crossover,
            rsi,
            prev_rsi: indicators::rsi(prev, cfg.rsi_period),
            fisher: indicators::fisher(&closes, cfg.fisher_period),
            fibo: indicators::fibonacci(&highs, &lows, cfg.fib_period),
            run_trend: indicators::run_trend(&closes),
            bollinger: indicators::bollinger(&closes, cfg.bollinger_period, cfg.bollinger_k),
            psar: indicators::psar(&closes, cfg.psar_step, cfg.psar_max),
            ichimoku: indicators::ichimoku(&highs, &lows, 9, 26, 52),
            alligator: indicators::alligator(&closes, 13, 8, 5),
            donchian: indicators::donchian(&closes, cfg.donchian_period),
            candle_force: indicators::candle_force(&last_candle),
            wick: indicators::wick_rejection(&last_candle, &cfg.wicks),
            pattern: signals::detect_rejection_pattern(candles, ema36, ema51, sma, rsi, &cfg.patterns),
            pattern_history: signals::scan_pattern_history(candles, signals::DEFAULT_SCAN_LOOKBACK),
            market_force: indicators::market_force(&highs, &lows, cfg.market_force_period),
            adx: indicators::adx(&highs, &lows, &closes, cfg.adx_period),
        })
    }

    pub fn rsi_slope(&self) -> f64 {
        self.rsi - self.prev_rsi
    }

    /// EMA/SMA separation relative to price.
    pub fn ema_gap(&self) -> f64 {
        if self.last_price == 0.0 {
            return 0.0;
        }
        (self.ema - self.sma).abs() / self.last_price
    }

    pub fn pattern_snapshot(&self, direction: Direction) -> PatternSnapshot {
        PatternSnapshot { rsi: self.rsi, adx: self.adx, gap: self.ema_gap(), direction }
    }
}

// =============================================================================
// Strategy Trait
// =============================================================================

/// Read-only view of the risk controller handed to every module.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub total_selectivity: f64,
    pub memory: &'a PatternMemory,
    pub now_secs: u64,
}

pub trait Strategy: Send {
    fn id(&self) -> &'static str;

    /// Called on every snapshot, including ticks where the shared gates block evaluation.
    fn observe(&mut self, _snap: &IndicatorSnapshot) {}

    fn evaluate(&mut self, snap: &IndicatorSnapshot, ctx: &EvalContext) -> Option<Signal>;

    /// Settlement feedback for locally owned orders.
    fn on_outcome(&mut self, _won: bool, _now_secs: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin();
                Candle { start_time: i as u64 * 60, open: base, high: base + 0.2, low: base - 0.2, close: base + 0.05 }
            })
            .collect()
    }

    #[test]
    fn test_snapshot_requires_warmup() {
        let cfg = IndicatorConfig::default();
        assert!(IndicatorSnapshot::compute(&make_candles(79), &cfg).is_none());
        assert!(IndicatorSnapshot::compute(&make_candles(80), &cfg).is_some());
    }

    #[test]
    fn test_snapshot_fields_are_finite() {
        let snap = IndicatorSnapshot::compute(&make_candles(120), &IndicatorConfig::default()).unwrap();
        for v in [snap.ema, snap.sma, snap.ema36, snap.ema51, snap.rsi, snap.adx, snap.rsi_laguerre, snap.fisher] {
            assert!(v.is_finite(), "expected finite value, got {:?}", v);
        }
        assert!(snap.fibo.is_some());
        assert!(snap.ichimoku.is_some());
        assert_eq!(snap.last_price, snap.last_candle.close);
    }

    #[test]
    fn test_snapshot_counts_pattern_history() {
        let mut candles = make_candles(90);
        let start = candles.len() as u64 * 60;
        // green, red holding above the first open, green
        candles.push(Candle { start_time: start, open: 100.0, high: 100.5, low: 99.9, close: 100.4 });
        candles.push(Candle { start_time: start + 60, open: 100.4, high: 100.45, low: 100.1, close: 100.2 });
        candles.push(Candle { start_time: start + 120, open: 100.2, high: 100.7, low: 100.15, close: 100.6 });
        candles.push(Candle::flat(start + 180, 100.6));
        let cfg = IndicatorConfig::default();
        let snap = IndicatorSnapshot::compute(&candles, &cfg).unwrap();
        assert_eq!(snap.pattern_history, signals::scan_pattern_history(&candles, signals::DEFAULT_SCAN_LOOKBACK));
        assert!(snap.pattern_history >= 1, "expected the appended sequence to count, got {}", snap.pattern_history);
    }

    #[test]
    fn test_pattern_snapshot_uses_ema_gap() {
        let snap = IndicatorSnapshot::compute(&make_candles(100), &IndicatorConfig::default()).unwrap();
        let p = snap.pattern_snapshot(Direction::Put);
        assert_eq!(p.direction, Direction::Put);
        assert_eq!(p.gap, (snap.ema - snap.sma).abs() / snap.last_price);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("call"), Some(Direction::Call));
        assert_eq!(Direction::parse(" PUT "), Some(Direction::Put));
        assert_eq!(Direction::parse("hold"), None);
        assert_eq!(serde_json::to_string(&Direction::Call).unwrap(), "\"CALL\"");
    }
}
