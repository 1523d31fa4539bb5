//! Minute candle aggregation over the live tick stream.
//!
//! The aggregator owns every candle. The last entry of the history is the open
//! candle and is updated in place until a tick from a later minute arrives.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const CANDLE_SECS: u64 = 60;
pub const DEFAULT_CANDLE_CAP: usize = 1500;
/// History batches larger than this replace state; smaller ones are heartbeats.
pub const HISTORY_REPLACE_MIN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn flat(start_time: u64, price: f64) -> Self {
        Self { start_time, open: price, high: price, low: price, close: price }
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.close.max(self.open)
    }

    pub fn lower_wick(&self) -> f64 {
        self.close.min(self.open) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Start of the minute bucket that contains `epoch`.
pub fn bucket_of(epoch: u64) -> u64 {
    (epoch / CANDLE_SECS) * CANDLE_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick folded into the open candle.
    Updated,
    /// A new minute started; the previous candle is now immutable.
    Opened { start_time: u64 },
    /// Tick belongs to an already-closed minute and was dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    Replaced(usize),
    Advisory(usize),
}

#[derive(Debug, Clone)]
pub struct CandleAggregator {
    history: VecDeque<Candle>,
    cap: usize,
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CANDLE_CAP)
    }
}

impl CandleAggregator {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { history: VecDeque::with_capacity(cap), cap }
    }

    pub fn on_tick(&mut self, epoch: u64, quote: f64) -> TickOutcome {
        let bucket = bucket_of(epoch);
        match self.history.back_mut() {
            Some(open) if bucket == open.start_time => {
                open.high = open.high.max(quote);
                open.low = open.low.min(quote);
                open.close = quote;
                TickOutcome::Updated
            }
            Some(open) if bucket < open.start_time => TickOutcome::Stale,
            _ => {
                self.history.push_back(Candle::flat(bucket, quote));
                while self.history.len() > self.cap {
                    self.history.pop_front();
                }
                TickOutcome::Opened { start_time: bucket }
            }
        }
    }

    pub fn set_history(&mut self, candles: &[Candle]) -> HistoryOutcome {
        if candles.len() <= HISTORY_REPLACE_MIN {
            return HistoryOutcome::Advisory(candles.len());
        }
        let skip = candles.len().saturating_sub(self.cap);
        self.history = candles[skip..].iter().copied().collect();
        HistoryOutcome::Replaced(candles.len())
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.history.back()
    }

    /// Contiguous copy of the window, oldest first, open candle last.
    pub fn window(&self) -> Vec<Candle> {
        self.history.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::flat(i as u64 * CANDLE_SECS, 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn test_bucket_floors_to_minute() {
        assert_eq!(bucket_of(0), 0);
        assert_eq!(bucket_of(59), 0);
        assert_eq!(bucket_of(60), 60);
        assert_eq!(bucket_of(1_700_000_123), 1_700_000_100);
    }

    #[test]
    fn test_ticks_in_same_minute_update_in_place() {
        let mut agg = CandleAggregator::default();
        assert_eq!(agg.on_tick(120, 10.0), TickOutcome::Opened { start_time: 120 });
        assert_eq!(agg.on_tick(130, 12.0), TickOutcome::Updated);
        assert_eq!(agg.on_tick(170, 9.0), TickOutcome::Updated);
        assert_eq!(agg.on_tick(179, 11.0), TickOutcome::Updated);

        let c = *agg.open_candle().unwrap();
        assert_eq!(agg.len(), 1);
        assert_eq!((c.open, c.high, c.low, c.close), (10.0, 12.0, 9.0, 11.0));
    }

    #[test]
    fn test_new_minute_archives_previous() {
        let mut agg = CandleAggregator::default();
        agg.on_tick(60, 1.0);
        agg.on_tick(119, 2.0);
        agg.on_tick(120, 3.0);

        let w = agg.window();
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].close, 2.0);
        assert_eq!(w[1], Candle::flat(120, 3.0));
    }

    #[test]
    fn test_stale_tick_is_dropped() {
        let mut agg = CandleAggregator::default();
        agg.on_tick(180, 5.0);
        assert_eq!(agg.on_tick(100, 99.0), TickOutcome::Stale);
        assert_eq!(agg.open_candle().unwrap().high, 5.0);
    }

    #[test]
    fn test_history_capped() {
        let mut agg = CandleAggregator::new(3);
        for minute in 0..5u64 {
            agg.on_tick(minute * 60, minute as f64);
        }
        let w = agg.window();
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].start_time, 120);
    }

    #[test]
    fn test_small_history_is_advisory() {
        let mut agg = CandleAggregator::default();
        agg.on_tick(60, 1.0);
        let outcome = agg.set_history(&make_candles(HISTORY_REPLACE_MIN));
        assert_eq!(outcome, HistoryOutcome::Advisory(HISTORY_REPLACE_MIN));
        assert_eq!(agg.len(), 1, "advisory batch must not reset state");
    }

    #[test]
    fn test_large_history_replaces_and_respects_cap() {
        let mut agg = CandleAggregator::new(100);
        agg.on_tick(1_000_000, 1.0);
        let outcome = agg.set_history(&make_candles(300));
        assert_eq!(outcome, HistoryOutcome::Replaced(300));
        assert_eq!(agg.len(), 100);
        assert_eq!(agg.window()[99].close, 399.0);

        // ticks continue on top of the restored history
        agg.on_tick(299 * 60 + 30, 500.0);
        assert_eq!(agg.open_candle().unwrap().high, 500.0);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut agg = CandleAggregator::default();
        agg.set_history(&make_candles(60));
        agg.clear();
        assert!(agg.is_empty());
        assert!(agg.open_candle().is_none());
    }

    #[test]
    fn test_candle_geometry() {
        let c = Candle { start_time: 0, open: 10.0, high: 15.0, low: 8.0, close: 12.0 };
        assert_eq!(c.body(), 2.0);
        assert_eq!(c.upper_wick(), 3.0);
        assert_eq!(c.lower_wick(), 2.0);
        assert_eq!(c.range(), 7.0);
        assert!(c.is_bullish());
    }
}
