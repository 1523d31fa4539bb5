//! Single-threaded event handler.
//!
//! The engine reacts to one input at a time (inbound venue event, 1 Hz timer,
//! operator action) and answers with an `EngineOutput`: commands for the
//! venue, domain events for the journal and trade records for the sink. It
//! performs no I/O itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::candles::{CandleAggregator, HistoryOutcome};
use crate::clock::Clock;
use crate::config::Config;
use crate::evaluator::{Evaluation, Evaluator};
use crate::events::InboundEvent;
use crate::exchange::Command;
use crate::journal::DomainEvent;
use crate::reconcile::{DispatchRequest, Reconciler, SettlementEvent};
use crate::risk::RiskController;
use crate::storage::TradeRecord;
use crate::strategies::build_all;
use crate::strategy::{Direction, IndicatorSnapshot};

/// Housekeeping ticks between contract polls.
pub const POLL_EVERY_SECS: u64 = 3;
/// Ticks between balance watchdog checks.
pub const BALANCE_CHECK_TICKS: u64 = 30;
pub const BALANCE_STALE_SECS: u64 = 60;
/// Housekeeping ticks between reconciler prunes.
pub const PRUNE_EVERY_SECS: u64 = 60;
pub const MANUAL_SOURCE: &str = "MANUAL";

#[derive(Debug, Default)]
pub struct EngineOutput {
    pub commands: Vec<Command>,
    pub events: Vec<DomainEvent>,
    pub records: Vec<TradeRecord>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.events.is_empty() && self.records.is_empty()
    }

    fn merge(&mut self, other: EngineOutput) {
        self.commands.extend(other.commands);
        self.events.extend(other.events);
        self.records.extend(other.records);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub dispatched: u64,
    pub won: u64,
    pub lost: u64,
}

pub struct Engine {
    cfg: Config,
    clock: Arc<dyn Clock>,
    instrument: String,
    candles: CandleAggregator,
    evaluator: Evaluator,
    reconciler: Reconciler,
    started: bool,
    authorized: bool,
    timer_ticks: u64,
    tick_count: u64,
    last_balance_ms: u64,
    subscribed_contracts: HashSet<String>,
    snapshots: HashMap<String, Value>,
    stats: SessionStats,
}

impl Engine {
    pub fn new(cfg: Config, clock: Arc<dyn Clock>) -> Self {
        let strategies = build_all(&cfg.strategies, &cfg.sniper);
        let evaluator = Evaluator::new(cfg.evaluator.clone(), strategies);
        let reconciler = Reconciler::new(cfg.reconcile.clone(), RiskController::new(cfg.risk.clone()), clock.clone());
        let mut engine = Self {
            instrument: cfg.instrument.clone(),
            candles: CandleAggregator::new(cfg.candle_cap),
            evaluator,
            reconciler,
            started: false,
            authorized: false,
            timer_ticks: 0,
            tick_count: 0,
            last_balance_ms: clock.now_ms(),
            subscribed_contracts: HashSet::new(),
            snapshots: HashMap::new(),
            stats: SessionStats::default(),
            clock,
            cfg,
        };
        // dispatches wait for start()
        engine.reconciler.halt();
        engine
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn modules(&self) -> Vec<&'static str> {
        self.evaluator.module_ids()
    }

    pub fn candles(&self) -> &CandleAggregator {
        &self.candles
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_running(&self) -> bool {
        !self.reconciler.is_halted()
    }

    /// First call also asks the venue to authorize.
    pub fn start(&mut self) -> EngineOutput {
        let mut out = EngineOutput::default();
        self.reconciler.resume();
        out.events.push(DomainEvent::EngineStarted);
        if !self.started {
            self.started = true;
            out.commands.push(Command::Authorize);
        }
        out
    }

    /// Blocks new dispatches. Open orders still settle or time out.
    pub fn stop(&mut self) -> EngineOutput {
        self.reconciler.halt();
        EngineOutput { events: vec![DomainEvent::EngineStopped], ..Default::default() }
    }

    pub fn handle(&mut self, event: InboundEvent) -> EngineOutput {
        match event {
            InboundEvent::Authorized { balance, .. } => self.on_authorized(balance),
            InboundEvent::Balance { balance, .. } => {
                self.reconciler.set_balance(balance);
                self.last_balance_ms = self.clock.now_ms();
                EngineOutput::default()
            }
            InboundEvent::Tick { instrument, epoch, quote } => self.on_tick(&instrument, epoch, quote),
            InboundEvent::History { instrument, candles } => {
                if !instrument.is_empty() && instrument != self.instrument {
                    return EngineOutput::default();
                }
                let event = match self.candles.set_history(&candles) {
                    HistoryOutcome::Replaced(n) => DomainEvent::HistoryReplaced { instrument: self.instrument.clone(), candles: n },
                    HistoryOutcome::Advisory(n) => DomainEvent::HistoryAdvisory { instrument: self.instrument.clone(), candles: n },
                };
                EngineOutput { events: vec![event], ..Default::default() }
            }
            InboundEvent::BuyAccepted { contract_id, buy_price } => {
                let ev = SettlementEvent { buy_price: Some(buy_price), ..SettlementEvent::pending(contract_id) };
                let events = self.reconciler.on_settlement(&ev);
                self.absorb(events)
            }
            InboundEvent::Contract(ev) => {
                let events = self.reconciler.on_settlement(&ev);
                self.absorb(events)
            }
            InboundEvent::VenueError { code, message, .. } => {
                let events = self.reconciler.on_venue_error(&code, &message);
                self.absorb(events)
            }
        }
    }

    /// 1 Hz housekeeping: timeouts every call, contract polls every few.
    pub fn on_timer(&mut self) -> EngineOutput {
        self.timer_ticks += 1;
        let events = self.reconciler.check_timeouts();
        let mut out = self.absorb(events);
        if self.timer_ticks % POLL_EVERY_SECS == 0 {
            for contract_id in self.reconciler.awaiting_ids() {
                out.commands.push(Command::PollContract { contract_id });
            }
        }
        if self.timer_ticks % PRUNE_EVERY_SECS == 0 {
            self.reconciler.prune();
        }
        out
    }

    pub fn switch_instrument(&mut self, instrument: &str) -> EngineOutput {
        let mut out = EngineOutput::default();
        if instrument == self.instrument {
            return out;
        }
        out.events.push(DomainEvent::InstrumentSwitched { from: self.instrument.clone(), to: instrument.to_string() });
        self.instrument = instrument.to_string();
        self.candles.clear();
        out.commands.push(Command::ForgetTicks);
        out.commands.extend(self.market_subscriptions());
        out
    }

    /// Operator trade: skips the strategy gates, not the lock or the breaker.
    pub fn manual_trade(&mut self, direction: Direction) -> EngineOutput {
        let snapshot = IndicatorSnapshot::compute(&self.candles.window(), &self.cfg.indicators);
        let (duration, unit) = (self.cfg.manual_duration, self.cfg.manual_duration_unit.clone());
        self.dispatch(direction, MANUAL_SOURCE.to_string(), duration, unit, snapshot.as_ref())
    }

    fn on_authorized(&mut self, balance: f64) -> EngineOutput {
        self.authorized = true;
        self.reconciler.set_balance(balance);
        self.last_balance_ms = self.clock.now_ms();
        let mut commands = vec![Command::SubscribeBalance, Command::SubscribeContracts];
        commands.extend(self.market_subscriptions());
        EngineOutput { commands, ..Default::default() }
    }

    fn market_subscriptions(&self) -> Vec<Command> {
        vec![
            Command::RequestHistory { instrument: self.instrument.clone(), count: self.cfg.history_count },
            Command::SubscribeTicks { instrument: self.instrument.clone() },
        ]
    }

    fn on_tick(&mut self, instrument: &str, epoch: u64, quote: f64) -> EngineOutput {
        let mut out = EngineOutput::default();
        // late ticks from a forgotten subscription
        if !instrument.is_empty() && instrument != self.instrument {
            return out;
        }
        self.candles.on_tick(epoch, quote);
        self.tick_count += 1;

        if self.tick_count % BALANCE_CHECK_TICKS == 0 {
            let silent_secs = self.clock.now_ms().saturating_sub(self.last_balance_ms) / 1000;
            if silent_secs > BALANCE_STALE_SECS {
                out.events.push(DomainEvent::BalanceStale { silent_secs });
                out.commands.push(Command::SubscribeBalance);
                self.last_balance_ms = self.clock.now_ms();
            }
        }

        let snapshot = IndicatorSnapshot::compute(&self.candles.window(), &self.cfg.indicators);
        if !self.is_running() {
            // modules keep their state current, nothing is journaled
            if let Some(s) = &snapshot {
                self.evaluator.observe(s);
            }
            return out;
        }
        let now_ms = self.clock.now_ms();
        let (verdict, events) = self.evaluator.evaluate(&self.instrument, epoch, snapshot.as_ref(), self.reconciler.risk(), now_ms);
        out.events.extend(events);

        if let Evaluation::Signal(signal) = verdict {
            let (duration, unit) = (self.cfg.auto_duration, self.cfg.auto_duration_unit.clone());
            let dispatched = self.dispatch(signal.direction, signal.source, duration, unit, snapshot.as_ref());
            if dispatched.commands.iter().any(|c| matches!(c, Command::Buy(_))) {
                self.evaluator.record_trade(&self.instrument, epoch);
            }
            out.merge(dispatched);
        }
        out
    }

    fn dispatch(
        &mut self,
        direction: Direction,
        source: String,
        duration: u32,
        duration_unit: String,
        snapshot: Option<&IndicatorSnapshot>,
    ) -> EngineOutput {
        let mut out = EngineOutput::default();
        let req = DispatchRequest {
            instrument: self.instrument.clone(),
            direction,
            source,
            duration,
            duration_unit,
            snapshot: snapshot.map(|s| s.pattern_snapshot(direction)),
        };
        match self.reconciler.dispatch(req) {
            Ok((order, events)) => {
                self.stats.dispatched += 1;
                if let Some(s) = snapshot {
                    self.snapshots.insert(order.local_id.clone(), snapshot_json(s));
                }
                out.events.extend(events);
                out.commands.push(Command::Buy(order));
            }
            Err(e) => out.events.push(DomainEvent::DispatchRefused { reason: e.reason() }),
        }
        out
    }

    /// Follows reconciler events with their side effects: contract
    /// subscriptions, strategy feedback and trade records.
    fn absorb(&mut self, events: Vec<DomainEvent>) -> EngineOutput {
        let mut out = EngineOutput::default();
        let now_secs = self.clock.now_secs();
        for ev in &events {
            match ev {
                DomainEvent::OrderBound { local_id, external_id } => {
                    if self.subscribed_contracts.insert(external_id.clone()) {
                        out.commands.push(Command::SubscribeContract { contract_id: external_id.clone() });
                    }
                    out.records.extend(self.trade_record(local_id));
                }
                DomainEvent::OrderSettled { local_id, external_id, won, .. } => {
                    self.subscribed_contracts.remove(external_id);
                    if *won {
                        self.stats.won += 1;
                    } else {
                        self.stats.lost += 1;
                    }
                    self.evaluator.on_outcome(*won, now_secs);
                    out.records.extend(self.trade_record(local_id));
                    self.snapshots.remove(local_id);
                }
                DomainEvent::OrderRejected { local_id, .. } | DomainEvent::OrderTimedOut { local_id, .. } => {
                    if let Some(external_id) = self.reconciler.order(local_id).and_then(|o| o.external_id.as_ref()) {
                        self.subscribed_contracts.remove(external_id);
                    }
                    out.records.extend(self.trade_record(local_id));
                    self.snapshots.remove(local_id);
                }
                _ => {}
            }
        }
        out.events = events;
        out
    }

    fn trade_record(&self, local_id: &str) -> Option<TradeRecord> {
        let order = self.reconciler.order(local_id)?;
        Some(TradeRecord {
            contract_id: order.external_id.clone().unwrap_or_else(|| order.local_id.clone()),
            local_id: order.local_id.clone(),
            strategy: order.source.clone(),
            instrument: order.instrument.clone(),
            direction: order.direction.as_str().to_string(),
            stake: order.stake,
            profit: order.profit,
            status: order.state.as_str().to_string(),
            indicator_snapshot: self.snapshots.get(local_id).cloned().unwrap_or(Value::Null),
            instance_id: self.cfg.instance_id.clone(),
            device_name: self.cfg.device_name.clone(),
            ts_ms: self.clock.now_ms(),
        })
    }
}

fn snapshot_json(s: &IndicatorSnapshot) -> Value {
    json!({
        "price": s.last_price,
        "ema": s.ema,
        "sma": s.sma,
        "rsi": s.rsi,
        "adx": s.adx,
        "gap": s.ema_gap(),
        "z_score": s.z_score,
        "rsi_laguerre": s.rsi_laguerre,
        "fisher": s.fisher,
        "market_force": s.market_force,
        "trend": s.trend_bias,
        "pattern": s.pattern.as_str(),
        "pattern_history": s.pattern_history,
    })
}
