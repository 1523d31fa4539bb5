//! The six signal modules.
//!
//! Every module reads one `IndicatorSnapshot` plus the current total
//! selectivity and yields at most one signal. Higher selectivity tightens
//! each module's numeric thresholds.

use crate::indicators::{Crossover, TrendBias, WickRejection};
use crate::strategy::{Direction, EvalContext, IndicatorSnapshot, Signal, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    EmaCross,
    Giraffa,
    Safari,
    XFast,
    Sniper,
    Olymp,
}

impl StrategyKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ema" | "ema_sma" => Some(Self::EmaCross),
            "giraffa" => Some(Self::Giraffa),
            "safari" => Some(Self::Safari),
            "xfast" | "x-fast" => Some(Self::XFast),
            "sniper" => Some(Self::Sniper),
            "olymp" | "wysetrade" => Some(Self::Olymp),
            _ => None,
        }
    }

    /// Comma list, unknown names skipped, duplicates dropped.
    pub fn parse_list(s: &str) -> Vec<Self> {
        let mut out = Vec::new();
        for kind in s.split(',').filter_map(Self::parse) {
            if !out.contains(&kind) {
                out.push(kind);
            }
        }
        out
    }

    pub fn build(self, sniper: &SniperConfig) -> Box<dyn Strategy> {
        match self {
            Self::EmaCross => Box::new(EmaCross),
            Self::Giraffa => Box::new(Giraffa),
            Self::Safari => Box::new(Safari),
            Self::XFast => Box::new(XFast),
            Self::Sniper => Box::new(Sniper::new(sniper.clone())),
            Self::Olymp => Box::new(Olymp),
        }
    }
}

pub fn build_all(kinds: &[StrategyKind], sniper: &SniperConfig) -> Vec<Box<dyn Strategy>> {
    kinds.iter().map(|k| k.build(sniper)).collect()
}

fn agrees(bias: TrendBias, direction: Direction) -> bool {
    matches!(
        (bias, direction),
        (TrendBias::Bullish, Direction::Call) | (TrendBias::Bearish, Direction::Put)
    )
}

// =============================================================================
// EMA/SMA crossover
// =============================================================================

/// Fast EMA crossing SMA20, confirmed by a breakout beyond the EMA.
pub struct EmaCross;

impl Strategy for EmaCross {
    fn id(&self) -> &'static str {
        "EMA"
    }

    fn evaluate(&mut self, snap: &IndicatorSnapshot, ctx: &EvalContext) -> Option<Signal> {
        let breakout = 0.0001 * ctx.total_selectivity;
        match snap.crossover? {
            Crossover::Up if snap.last_price > snap.ema + breakout && snap.ema > snap.sma => Some(Signal::call(self.id())),
            Crossover::Down if snap.last_price < snap.ema - breakout && snap.ema < snap.sma => Some(Signal::put(self.id())),
            _ => None,
        }
    }
}

// =============================================================================
// Giraffa (61.8% retracement)
// =============================================================================

pub struct Giraffa;

impl Strategy for Giraffa {
    fn id(&self) -> &'static str {
        "GIRAFFA"
    }

    fn evaluate(&mut self, snap: &IndicatorSnapshot, ctx: &EvalContext) -> Option<Signal> {
        let fibo = snap.fibo?;
        let tolerance = 0.005 / ctx.total_selectivity;
        if (snap.last_price - fibo.l618).abs() > (fibo.max - fibo.min) * tolerance {
            return None;
        }
        let direction = if snap.last_price > snap.super_trend { Direction::Call } else { Direction::Put };
        agrees(snap.trend_bias, direction).then(|| Signal::new(direction, self.id()))
    }
}

// =============================================================================
// Safari (run trend + Laguerre)
// =============================================================================

pub struct Safari;

impl Strategy for Safari {
    fn id(&self) -> &'static str {
        "SAFARI"
    }

    fn evaluate(&mut self, snap: &IndicatorSnapshot, ctx: &EvalContext) -> Option<Signal> {
        let kijun = snap.ichimoku?.kijun;
        let gap = (ctx.total_selectivity - 1.0) * 6.0;
        let bullish = snap.run_trend == TrendBias::Bullish && snap.trend_bias == TrendBias::Bullish;
        let bearish = snap.run_trend == TrendBias::Bearish && snap.trend_bias == TrendBias::Bearish;
        if bullish && snap.last_price > kijun && snap.rsi_laguerre > 70.0 + gap {
            Some(Signal::call(self.id()))
        } else if bearish && snap.last_price < kijun && snap.rsi_laguerre < 30.0 - gap {
            Some(Signal::put(self.id()))
        } else {
            None
        }
    }
}

// =============================================================================
// X-Fast (band breakout)
// =============================================================================

pub struct XFast;

impl Strategy for XFast {
    fn id(&self) -> &'static str {
        "XFAST"
    }

    fn evaluate(&mut self, snap: &IndicatorSnapshot, ctx: &EvalContext) -> Option<Signal> {
        let bands = snap.bollinger?;
        let z_threshold = 0.8 + (ctx.total_selectivity - 1.0) * 0.4;
        let green = snap.last_candle.is_bullish();
        if snap.last_price > bands.upper && snap.z_score > z_threshold && green {
            Some(Signal::call(self.id()))
        } else if snap.last_price < bands.lower && snap.z_score < -z_threshold && !green {
            Some(Signal::put(self.id()))
        } else {
            None
        }
    }
}

// =============================================================================
// Sniper
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SniperConfig {
    /// Quiet period after a win.
    pub cooldown_secs: u64,
    /// |price - ema| / price that counts as a pullback.
    pub pullback_tolerance: f64,
    /// Fraction of the band half-width treated as "near" the band.
    pub band_zone: f64,
    pub win_match: f64,
    pub loss_veto: f64,
}

impl Default for SniperConfig {
    fn default() -> Self {
        Self { cooldown_secs: 15, pullback_tolerance: 0.00015, band_zone: 0.4, win_match: 90.0, loss_veto: 85.0 }
    }
}

/// RSI-band momentum entries, wick reversals at the Bollinger edges and
/// pattern-memory matches. After a win it waits out a cooldown and a
/// pullback to the EMA before firing again.
pub struct Sniper {
    cfg: SniperConfig,
    cooldown_until: u64,
    needs_pullback: bool,
}

impl Sniper {
    pub fn new(cfg: SniperConfig) -> Self {
        Self { cfg, cooldown_until: 0, needs_pullback: false }
    }

    pub fn is_waiting(&self, now_secs: u64) -> bool {
        now_secs < self.cooldown_until || self.needs_pullback
    }

    fn wick_reversal(&self, snap: &IndicatorSnapshot) -> Option<Direction> {
        let bands = snap.bollinger?;
        let near_upper = snap.last_price >= bands.upper - (bands.upper - bands.middle) * self.cfg.band_zone;
        let near_lower = snap.last_price <= bands.lower + (bands.middle - bands.lower) * self.cfg.band_zone;
        match snap.wick {
            WickRejection::Lower if near_lower => Some(Direction::Call),
            WickRejection::Upper if near_upper => Some(Direction::Put),
            _ => None,
        }
    }
}

impl Strategy for Sniper {
    fn id(&self) -> &'static str {
        "SNIPER"
    }

    fn observe(&mut self, snap: &IndicatorSnapshot) {
        if self.needs_pullback && (snap.last_price - snap.ema).abs() <= snap.last_price * self.cfg.pullback_tolerance {
            self.needs_pullback = false;
        }
    }

    fn evaluate(&mut self, snap: &IndicatorSnapshot, ctx: &EvalContext) -> Option<Signal> {
        let call_pattern = snap.pattern_snapshot(Direction::Call);
        let put_pattern = snap.pattern_snapshot(Direction::Put);

        let loss_score = ctx.memory.loss_similarity(&call_pattern).max(ctx.memory.loss_similarity(&put_pattern));
        if loss_score > self.cfg.loss_veto {
            return None;
        }
        if self.is_waiting(ctx.now_secs) {
            return None;
        }

        if let Some(direction) = self.wick_reversal(snap) {
            return Some(Signal::new(direction, self.id()));
        }

        let ts = ctx.total_selectivity;
        let rsi = snap.rsi;
        let slope = snap.rsi_slope();
        let rsi_gap = (ts - 1.0) * 8.0;
        let slope_min = 0.05 * ts;
        let green = snap.last_candle.is_bullish();
        let red = snap.last_candle.is_bearish();

        let call_trigger = rsi > 46.0 + rsi_gap
            && rsi < 67.0 - rsi_gap
            && snap.last_price > snap.ema
            && snap.ema > snap.sma
            && slope > slope_min;
        let put_trigger = rsi > 33.0 + rsi_gap
            && rsi < 54.0 - rsi_gap
            && snap.last_price < snap.ema
            && snap.ema < snap.sma
            && slope < -slope_min;

        let call_match = ctx.memory.win_similarity(&call_pattern) > self.cfg.win_match;
        let put_match = ctx.memory.win_similarity(&put_pattern) > self.cfg.win_match;

        if (call_trigger && green) || (call_match && green && slope > 0.0) {
            Some(Signal::call(self.id()))
        } else if (put_trigger && red) || (put_match && red && slope < 0.0) {
            Some(Signal::put(self.id()))
        } else {
            None
        }
    }

    fn on_outcome(&mut self, won: bool, now_secs: u64) {
        if won {
            self.cooldown_until = now_secs + self.cfg.cooldown_secs;
            self.needs_pullback = true;
        }
    }
}

// =============================================================================
// Olymp (rejection patterns)
// =============================================================================

pub struct Olymp;

impl Strategy for Olymp {
    fn id(&self) -> &'static str {
        "OLYMP"
    }

    fn evaluate(&mut self, snap: &IndicatorSnapshot, _ctx: &EvalContext) -> Option<Signal> {
        if snap.pattern.is_call() {
            Some(Signal::call(self.id()))
        } else if snap.pattern.is_put() {
            Some(Signal::put(self.id()))
        } else {
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::Candle;
    use crate::indicators::{Bands, FibLevels, Ichimoku};
    use crate::risk::{PatternMemory, PatternSnapshot};
    use crate::signals::PatternSignal;

    fn make_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot::default()
    }

    fn green_candle() -> Candle {
        Candle { start_time: 0, open: 99.9, high: 100.2, low: 99.8, close: 100.0 }
    }

    fn red_candle() -> Candle {
        Candle { start_time: 0, open: 100.1, high: 100.2, low: 99.8, close: 100.0 }
    }

    fn ctx(memory: &PatternMemory, ts: f64) -> EvalContext<'_> {
        EvalContext { total_selectivity: ts, memory, now_secs: 1_000 }
    }

    #[test]
    fn test_parse_list() {
        let kinds = StrategyKind::parse_list("sniper, ema,bogus,SNIPER,olymp");
        assert_eq!(kinds, vec![StrategyKind::Sniper, StrategyKind::EmaCross, StrategyKind::Olymp]);
        assert!(StrategyKind::parse_list("").is_empty());
    }

    #[test]
    fn test_ema_cross_needs_breakout() {
        let mem = PatternMemory::new(1, 1);
        let mut snap = IndicatorSnapshot {
            crossover: Some(Crossover::Up),
            last_price: 100.5,
            ema: 100.2,
            sma: 100.1,
            ..make_snapshot()
        };
        assert_eq!(EmaCross.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::call("EMA")));

        snap.ema = 100.05; // below sma
        assert_eq!(EmaCross.evaluate(&snap, &ctx(&mem, 1.0)), None);

        snap.crossover = None;
        assert_eq!(EmaCross.evaluate(&snap, &ctx(&mem, 1.0)), None);
    }

    #[test]
    fn test_giraffa_near_golden_level() {
        let mem = PatternMemory::new(1, 1);
        let fibo = FibLevels { max: 110.0, min: 100.0, l618: 103.82, l500: 105.0, l382: 106.18, l236: 107.64 };
        let snap = IndicatorSnapshot {
            fibo: Some(fibo),
            last_price: 103.84,
            super_trend: 103.0,
            trend_bias: TrendBias::Bullish,
            ..make_snapshot()
        };
        assert_eq!(Giraffa.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::call("GIRAFFA")));

        // disagreeing trend bias
        let against = IndicatorSnapshot { trend_bias: TrendBias::Bearish, ..snap.clone() };
        assert_eq!(Giraffa.evaluate(&against, &ctx(&mem, 1.0)), None);

        // too far from the level
        let far = IndicatorSnapshot { last_price: 104.5, ..snap };
        assert_eq!(Giraffa.evaluate(&far, &ctx(&mem, 1.0)), None);
    }

    #[test]
    fn test_safari_threshold_tightens_with_selectivity() {
        let mem = PatternMemory::new(1, 1);
        let snap = IndicatorSnapshot {
            run_trend: TrendBias::Bullish,
            trend_bias: TrendBias::Bullish,
            ichimoku: Some(Ichimoku { tenkan: 99.0, kijun: 99.0, senkou_b: 98.0 }),
            rsi_laguerre: 75.0,
            ..make_snapshot()
        };
        assert_eq!(Safari.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::call("SAFARI")));
        // 70 + 0.7 * 6 = 74.2 still passes; 1.7 -> 74.2, 2.0 -> 76
        assert_eq!(Safari.evaluate(&snap, &ctx(&mem, 2.0)), None);
    }

    #[test]
    fn test_xfast_band_breakout() {
        let mem = PatternMemory::new(1, 1);
        let bands = Bands { middle: 99.0, upper: 99.8, lower: 98.2 };
        let snap = IndicatorSnapshot {
            bollinger: Some(bands),
            z_score: 2.1,
            last_candle: green_candle(),
            ..make_snapshot()
        };
        assert_eq!(XFast.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::call("XFAST")));

        let red = IndicatorSnapshot { last_candle: red_candle(), ..snap };
        assert_eq!(XFast.evaluate(&red, &ctx(&mem, 1.0)), None);
    }

    fn sniper_call_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: 55.0,
            prev_rsi: 54.0,
            last_price: 100.0,
            ema: 99.9,
            sma: 99.8,
            last_candle: green_candle(),
            ..make_snapshot()
        }
    }

    #[test]
    fn test_sniper_rule_trigger() {
        let mem = PatternMemory::new(50, 30);
        let mut sniper = Sniper::new(SniperConfig::default());
        let snap = sniper_call_snapshot();
        assert_eq!(sniper.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::call("SNIPER")));

        // red candle disagrees with the trigger
        let red = IndicatorSnapshot { last_candle: red_candle(), ..snap };
        assert_eq!(sniper.evaluate(&red, &ctx(&mem, 1.0)), None);
    }

    #[test]
    fn test_sniper_loss_veto() {
        let mut mem = PatternMemory::new(50, 30);
        let snap = sniper_call_snapshot();
        mem.record(snap.pattern_snapshot(Direction::Call), false);
        let mut sniper = Sniper::new(SniperConfig::default());
        assert_eq!(sniper.evaluate(&snap, &ctx(&mem, 1.0)), None);
    }

    #[test]
    fn test_sniper_win_match_fires_without_rules() {
        let mut mem = PatternMemory::new(50, 30);
        // rsi outside the rule band, but identical to a stored win
        let snap = IndicatorSnapshot { rsi: 75.0, prev_rsi: 74.0, ..sniper_call_snapshot() };
        mem.record(PatternSnapshot { rsi: 75.0, adx: snap.adx, gap: snap.ema_gap(), direction: Direction::Call }, true);
        let mut sniper = Sniper::new(SniperConfig::default());
        assert_eq!(sniper.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::call("SNIPER")));
    }

    #[test]
    fn test_sniper_cooldown_and_pullback_after_win() {
        let mem = PatternMemory::new(50, 30);
        let mut sniper = Sniper::new(SniperConfig::default());
        let snap = sniper_call_snapshot();
        sniper.on_outcome(true, 990);

        // cooldown active until 1005
        assert_eq!(sniper.evaluate(&snap, &ctx(&mem, 1.0)), None);
        let later = EvalContext { now_secs: 1_010, ..ctx(&mem, 1.0) };
        // cooldown over but no pullback yet: price is 0.1% away from the ema
        assert_eq!(sniper.evaluate(&snap, &later), None);

        sniper.observe(&IndicatorSnapshot { last_price: 100.0, ema: 99.99, ..snap.clone() });
        assert!(!sniper.is_waiting(1_010));
        assert_eq!(sniper.evaluate(&snap, &later), Some(Signal::call("SNIPER")));
    }

    #[test]
    fn test_sniper_wick_reversal_at_lower_band() {
        let mem = PatternMemory::new(50, 30);
        let mut sniper = Sniper::new(SniperConfig::default());
        let snap = IndicatorSnapshot {
            wick: WickRejection::Lower,
            bollinger: Some(Bands { middle: 101.0, upper: 102.0, lower: 99.8 }),
            ..make_snapshot()
        };
        assert_eq!(sniper.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::call("SNIPER")));

        let mid_band = IndicatorSnapshot { bollinger: Some(Bands { middle: 100.0, upper: 101.0, lower: 99.0 }), ..snap };
        assert_eq!(sniper.evaluate(&mid_band, &ctx(&mem, 1.0)), None);
    }

    #[test]
    fn test_olymp_maps_patterns() {
        let mem = PatternMemory::new(1, 1);
        let snap = IndicatorSnapshot { pattern: PatternSignal::StaircasePut, ..make_snapshot() };
        assert_eq!(Olymp.evaluate(&snap, &ctx(&mem, 1.0)), Some(Signal::put("OLYMP")));
        assert_eq!(Olymp.evaluate(&make_snapshot(), &ctx(&mem, 1.0)), None);
    }
}
