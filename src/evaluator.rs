//! Strategy evaluator: shared gates plus the consensus policy.

use std::collections::HashMap;

use crate::candles::bucket_of;
use crate::journal::{DomainEvent, ReasonCode};
use crate::risk::RiskController;
use crate::strategy::{EvalContext, IndicatorSnapshot, Signal, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// First produced signal dispatches.
    Any,
    /// Every enabled module must agree on the direction this tick.
    All,
}

impl Consensus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Some(Self::Any),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub consensus: Consensus,
    /// Per-instrument quiet period after a dispatch.
    pub rest_secs: u64,
    /// Seconds after each minute boundary during which modules may fire.
    pub window_secs: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self { consensus: Consensus::Any, rest_secs: 60, window_secs: 1.5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Blocked(ReasonCode),
    NoSignal,
    Signal(Signal),
}

pub struct Evaluator {
    cfg: EvaluatorConfig,
    strategies: Vec<Box<dyn Strategy>>,
    last_trade: HashMap<String, u64>,
}

impl Evaluator {
    pub fn new(cfg: EvaluatorConfig, strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { cfg, strategies, last_trade: HashMap::new() }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.cfg
    }

    pub fn module_ids(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// One tick. Every module observes the snapshot before any gate runs so
    /// per-module state (pullbacks) keeps tracking while evaluation is blocked.
    pub fn evaluate(
        &mut self,
        instrument: &str,
        epoch: u64,
        snapshot: Option<&IndicatorSnapshot>,
        risk: &RiskController,
        now_ms: u64,
    ) -> (Evaluation, Vec<DomainEvent>) {
        let mut events = Vec::new();
        let verdict = self.run(instrument, epoch, snapshot, risk, now_ms, &mut events);
        match &verdict {
            Evaluation::Blocked(reason) => events.push(DomainEvent::GateBlocked { reason: *reason }),
            Evaluation::Signal(sig) => events.push(DomainEvent::SignalEmitted {
                instrument: instrument.to_string(),
                direction: sig.direction,
                source: sig.source.clone(),
            }),
            Evaluation::NoSignal => {}
        }
        (verdict, events)
    }

    fn run(
        &mut self,
        instrument: &str,
        epoch: u64,
        snapshot: Option<&IndicatorSnapshot>,
        risk: &RiskController,
        now_ms: u64,
        events: &mut Vec<DomainEvent>,
    ) -> Evaluation {
        if self.strategies.is_empty() {
            return Evaluation::Blocked(ReasonCode::NoModules);
        }
        let snap = match snapshot {
            Some(s) => s,
            None => return Evaluation::Blocked(ReasonCode::WarmingUp),
        };
        for s in self.strategies.iter_mut() {
            s.observe(snap);
        }

        if risk.is_paused(now_ms) {
            return Evaluation::Blocked(ReasonCode::CircuitBreaker);
        }
        if self.is_resting(instrument, epoch) {
            return Evaluation::Blocked(ReasonCode::PostTradeRest);
        }
        if (epoch % 60) as f64 > self.cfg.window_secs {
            return Evaluation::Blocked(ReasonCode::OutsideCandleWindow);
        }

        let ctx = EvalContext {
            total_selectivity: risk.total_selectivity(),
            memory: risk.memory(),
            now_secs: now_ms / 1000,
        };

        match self.cfg.consensus {
            Consensus::Any => {
                for s in self.strategies.iter_mut() {
                    if let Some(sig) = s.evaluate(snap, &ctx) {
                        return Evaluation::Signal(sig);
                    }
                }
                Evaluation::NoSignal
            }
            Consensus::All => {
                let signals: Vec<Signal> = self.strategies.iter_mut().filter_map(|s| s.evaluate(snap, &ctx)).collect();
                let required = self.strategies.len();
                let Some(first) = signals.first() else {
                    return Evaluation::NoSignal;
                };
                let direction = first.direction;
                if signals.len() == required && signals.iter().all(|s| s.direction == direction) {
                    let source = signals.iter().map(|s| s.source.as_str()).collect::<Vec<_>>().join("+");
                    Evaluation::Signal(Signal::new(direction, source))
                } else {
                    events.push(DomainEvent::ConsensusMissed { signals: signals.len(), required });
                    Evaluation::NoSignal
                }
            }
        }
    }

    /// Feeds modules without evaluating, for ticks that may not trade.
    pub fn observe(&mut self, snapshot: &IndicatorSnapshot) {
        for s in self.strategies.iter_mut() {
            s.observe(snapshot);
        }
    }

    pub fn is_resting(&self, instrument: &str, epoch: u64) -> bool {
        match self.last_trade.get(instrument) {
            Some(&last) => epoch < last + self.cfg.rest_secs,
            None => false,
        }
    }

    /// Starts the post-trade rest. Keyed by the candle the dispatch fell in.
    pub fn record_trade(&mut self, instrument: &str, epoch: u64) {
        self.last_trade.insert(instrument.to_string(), bucket_of(epoch));
    }

    pub fn on_outcome(&mut self, won: bool, now_secs: u64) {
        for s in self.strategies.iter_mut() {
            s.on_outcome(won, now_secs);
        }
    }
}
