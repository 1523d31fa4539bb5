//! End-to-end runs of the engine against the offline market, driven by a
//! hand-stepped clock. Commands go straight into `SimMarket::handle` and its
//! replies are fed back into the engine, the same loop main.rs runs.

use std::collections::VecDeque;
use std::sync::Arc;

use traderking::clock::{Clock, ManualClock};
use traderking::config::Config;
use traderking::engine::{Engine, EngineOutput};
use traderking::events::InboundEvent;
use traderking::exchange::sim::SimMarket;
use traderking::exchange::Command;
use traderking::journal::DomainEvent;
use traderking::storage::{SqliteTradeStore, TradeRecord};
use traderking::strategy::Direction;

const START_MS: u64 = 1_700_000_040_000;

struct Harness {
    engine: Engine,
    market: SimMarket,
    clock: ManualClock,
    events: Vec<DomainEvent>,
    records: Vec<TradeRecord>,
    commands: Vec<Command>,
}

impl Harness {
    fn new(cfg: Config) -> Self {
        let clock = ManualClock::new(START_MS);
        Self {
            engine: Engine::new(cfg, Arc::new(clock.clone())),
            market: SimMarket::new(11, 1_000.0, "USD"),
            clock,
            events: Vec::new(),
            records: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Routes commands to the market until no replies are left.
    fn pump(&mut self, out: EngineOutput) {
        let mut pending = VecDeque::from(vec![out]);
        while let Some(out) = pending.pop_front() {
            self.events.extend(out.events);
            self.records.extend(out.records);
            for cmd in out.commands {
                for reply in self.market.handle(&cmd, self.clock.now_secs()) {
                    pending.push_back(self.engine.handle(reply));
                }
                self.commands.push(cmd);
            }
        }
    }

    fn run_secs(&mut self, secs: u64) {
        for _ in 0..secs {
            self.clock.advance_secs(1);
            for ev in self.market.on_clock(self.clock.now_secs()) {
                let out = self.engine.handle(ev);
                self.pump(out);
            }
            let out = self.engine.on_timer();
            self.pump(out);
        }
    }

    fn boot(&mut self) {
        let out = self.engine.start();
        self.pump(out);
    }

    fn count(&self, pred: impl Fn(&DomainEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

fn make_config() -> Config {
    Config { instance_id: "TK-SMOKE0001".into(), strategies: Vec::new(), ..Default::default() }
}

#[test]
fn test_boot_loads_history_and_streams_ticks() {
    let mut h = Harness::new(make_config());
    h.boot();

    let names: Vec<&str> = h.commands.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["authorize", "subscribe_balance", "subscribe_contracts", "request_history", "subscribe_ticks"]);
    assert_eq!(h.engine.reconciler().risk().balance(), Some(10_000.0));
    assert_eq!(h.count(|e| matches!(e, DomainEvent::HistoryReplaced { candles: 300, .. })), 1);

    h.run_secs(90);
    assert!(h.engine.candles().len() >= 300);
    // no modules configured: every tick is gated, nothing dispatched
    assert_eq!(h.engine.stats().dispatched, 0);
    assert_eq!(h.engine.reconciler().open_orders(), 0);
}

#[test]
fn test_manual_trade_settles_end_to_end() {
    let mut h = Harness::new(make_config());
    h.boot();
    h.run_secs(3);

    let out = h.engine.manual_trade(Direction::Call);
    h.pump(out);
    assert!(h.engine.reconciler().in_flight().is_some());
    assert_eq!(h.count(|e| matches!(e, DomainEvent::OrderBound { .. })), 1);

    // a second manual trade is refused while the first is open
    let out = h.engine.manual_trade(Direction::Put);
    assert!(out.commands.is_empty());
    h.pump(out);

    h.run_secs(10);
    let stats = h.engine.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.won + stats.lost, 1);
    assert_eq!(h.engine.reconciler().in_flight(), None);
    assert_eq!(h.count(|e| matches!(e, DomainEvent::OrderSettled { .. })), 1);
    assert_eq!(h.count(|e| matches!(e, DomainEvent::StateHash { .. })), 1);
    assert_eq!(h.count(|e| matches!(e, DomainEvent::ForeignSettlement { .. })), 0);

    let statuses: Vec<&str> = h.records.iter().map(|r| r.status.as_str()).collect();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0], "PENDING");
    assert!(statuses[1] == "WON" || statuses[1] == "LOST", "expected terminal status, got {:?}", statuses[1]);
    assert!(h.records.iter().all(|r| r.instance_id == "TK-SMOKE0001" && r.strategy == "MANUAL"));
    assert!(h.records[0].indicator_snapshot.is_object());
    assert!(h.records[0].indicator_snapshot.get("pattern_history").is_some());

    let store_dir = tempfile::tempdir().unwrap();
    let path = store_dir.path().join("trades.db");
    let store = SqliteTradeStore::new(path.to_str().unwrap()).unwrap();
    for r in &h.records {
        store.upsert_sync(r).unwrap();
    }
    let recent = store.recent("TK-SMOKE0001", 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, statuses[1]);
}

#[test]
fn test_stop_keeps_open_order_alive() {
    let mut h = Harness::new(make_config());
    h.boot();
    let out = h.engine.manual_trade(Direction::Put);
    h.pump(out);

    let out = h.engine.stop();
    h.pump(out);
    assert!(!h.engine.is_running());

    h.run_secs(10);
    assert_eq!(h.engine.stats().won + h.engine.stats().lost, 1);
    assert_eq!(h.engine.reconciler().open_orders(), 0);
}

#[test]
fn test_switch_instrument_resubscribes() {
    let mut h = Harness::new(make_config());
    h.boot();
    h.run_secs(5);

    h.commands.clear();
    let out = h.engine.switch_instrument("R_50");
    h.pump(out);
    let names: Vec<&str> = h.commands.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["forget_ticks", "request_history", "subscribe_ticks"]);
    assert_eq!(h.engine.instrument(), "R_50");
    assert_eq!(h.count(|e| matches!(e, DomainEvent::InstrumentSwitched { .. })), 1);

    h.run_secs(5);
    assert!(!h.engine.candles().is_empty());
}

#[test]
fn test_auto_strategy_run_respects_lock() {
    let mut cfg = make_config();
    cfg.strategies = traderking::strategies::StrategyKind::parse_list("ema,giraffa,safari,xfast,sniper,olymp");
    let mut h = Harness::new(cfg);
    h.boot();

    for _ in 0..30 {
        h.run_secs(60);
        assert!(h.engine.reconciler().open_orders() <= 1);
    }
    let stats = h.engine.stats();
    assert!(stats.won + stats.lost <= stats.dispatched);
    assert!(h.engine.reconciler().risk().ladder_level() <= h.engine.reconciler().risk().config().max_levels());
}
