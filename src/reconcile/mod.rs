//! Order lifecycle reconciler.
//!
//! Owns the order book, the FIFO of dispatched-but-unbound orders, the
//! in-flight lock and the risk controller. Every method is a synchronous
//! state transition that returns the domain events it produced; the engine
//! calls them one at a time from a single task.
//!
//! Binding rule: the first notification for an unseen venue id pops the
//! oldest unbound local order. With nothing to pop, the id is foreign and
//! never touches risk state.

pub mod book;
pub mod order_sm;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::journal::{client_order_id, DomainEvent, ReasonCode};
use crate::risk::{PatternSnapshot, RiskController};
use crate::strategy::Direction;
use book::OrderBook;
use order_sm::{Event, Order, OrderState};

/// Profit at or above this counts as a win when no explicit label is given.
pub const WIN_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// At most one non-terminal order at a time.
    pub sequential: bool,
    pub grace_secs: u64,
    /// Terminal orders and foreign ids are forgotten this long after first sight.
    pub retention_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { sequential: true, grace_secs: 45, retention_secs: 3600 }
    }
}

// =============================================================================
// Settlement Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Won,
    Lost,
    Ambiguous,
}

impl SettlementStatus {
    /// Settled when flagged sold, labelled with a final status, or carrying a
    /// sell price. Unlabelled settlements fall back to the profit sign.
    pub fn infer(is_sold: bool, label: Option<&str>, profit: Option<f64>, buy_price: Option<f64>, sell_price: Option<f64>) -> Self {
        let label = label.map(|s| s.to_ascii_lowercase());
        let settled = is_sold
            || sell_price.is_some()
            || matches!(label.as_deref(), Some("won" | "lost" | "sold" | "expired"));
        if !settled {
            return SettlementStatus::Pending;
        }
        match label.as_deref() {
            Some("won") => return SettlementStatus::Won,
            Some("lost") => return SettlementStatus::Lost,
            _ => {}
        }
        match settled_profit(profit, buy_price, sell_price) {
            Some(p) if p >= WIN_EPSILON => SettlementStatus::Won,
            Some(_) => SettlementStatus::Lost,
            None => SettlementStatus::Ambiguous,
        }
    }
}

/// Reported profit, or sell - buy when the venue reports zero or nothing.
pub fn settled_profit(profit: Option<f64>, buy_price: Option<f64>, sell_price: Option<f64>) -> Option<f64> {
    match (profit, buy_price, sell_price) {
        (Some(p), _, _) if p != 0.0 => Some(p),
        (_, Some(buy), Some(sell)) => Some(sell - buy),
        (Some(p), _, _) => Some(p),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub external_id: String,
    pub status: SettlementStatus,
    pub profit: f64,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
}

impl SettlementEvent {
    pub fn pending(external_id: impl Into<String>) -> Self {
        Self { external_id: external_id.into(), status: SettlementStatus::Pending, profit: 0.0, buy_price: None, sell_price: None }
    }

    pub fn won(external_id: impl Into<String>, profit: f64) -> Self {
        Self { status: SettlementStatus::Won, profit, ..Self::pending(external_id) }
    }

    pub fn lost(external_id: impl Into<String>, profit: f64) -> Self {
        Self { status: SettlementStatus::Lost, profit, ..Self::pending(external_id) }
    }

    pub fn ambiguous(external_id: impl Into<String>) -> Self {
        Self { status: SettlementStatus::Ambiguous, ..Self::pending(external_id) }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub instrument: String,
    pub direction: Direction,
    pub source: String,
    pub duration: u32,
    pub duration_unit: String,
    pub snapshot: Option<PatternSnapshot>,
}

/// What the venue is asked to buy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub local_id: String,
    pub instrument: String,
    pub direction: Direction,
    pub stake: f64,
    pub duration: u32,
    pub duration_unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    InFlight { holder: String },
    Stopped,
    Paused { until_ms: u64 },
    InvalidStake(f64),
}

impl DispatchError {
    pub fn reason(&self) -> ReasonCode {
        match self {
            DispatchError::InFlight { .. } => ReasonCode::InFlightLock,
            DispatchError::Stopped => ReasonCode::EngineStopped,
            DispatchError::Paused { .. } => ReasonCode::CircuitBreaker,
            DispatchError::InvalidStake(_) => ReasonCode::InvalidStake,
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::InFlight { holder } => write!(f, "order {} still in flight", holder),
            DispatchError::Stopped => f.write_str("engine stopped"),
            DispatchError::Paused { until_ms } => write!(f, "circuit breaker engaged until {}", until_ms),
            DispatchError::InvalidStake(s) => write!(f, "invalid stake {}", s),
        }
    }
}

impl std::error::Error for DispatchError {}

// =============================================================================
// Reconciler
// =============================================================================

pub struct Reconciler {
    cfg: ReconcileConfig,
    book: OrderBook,
    /// Dispatched orders not yet bound to a venue id, oldest first.
    unbound: VecDeque<String>,
    /// venue id -> local id
    bindings: HashMap<String, String>,
    /// foreign venue id -> first seen ms
    foreign: HashMap<String, u64>,
    /// venue id -> (local id, terminal state) of pruned orders
    settled: HashMap<String, (String, OrderState)>,
    in_flight: Option<String>,
    risk: RiskController,
    clock: Arc<dyn Clock>,
    seq: u64,
    halted: bool,
}

impl Reconciler {
    pub fn new(cfg: ReconcileConfig, risk: RiskController, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            book: OrderBook::new(),
            unbound: VecDeque::new(),
            bindings: HashMap::new(),
            foreign: HashMap::new(),
            settled: HashMap::new(),
            in_flight: None,
            risk,
            clock,
            seq: 0,
            halted: false,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.cfg
    }

    pub fn risk(&self) -> &RiskController {
        &self.risk
    }

    pub fn set_balance(&mut self, balance: f64) {
        self.risk.set_balance(balance);
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn order(&self, local_id: &str) -> Option<&Order> {
        self.book.get(local_id)
    }

    pub fn local_for(&self, external_id: &str) -> Option<&str> {
        self.bindings.get(external_id).map(String::as_str)
    }

    pub fn is_foreign(&self, external_id: &str) -> bool {
        self.foreign.contains_key(external_id)
    }

    /// Terminal state of a pruned order, by venue id.
    pub fn settled_outcome(&self, external_id: &str) -> Option<OrderState> {
        self.settled.get(external_id).map(|(_, state)| *state)
    }

    /// Orders still held in the book, terminal ones included.
    pub fn book_len(&self) -> usize {
        self.book.len()
    }

    pub fn unbound_len(&self) -> usize {
        self.unbound.len()
    }

    pub fn open_orders(&self) -> usize {
        self.book.open_orders().count()
    }

    /// Blocks new dispatches. Open orders still settle or time out.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn resume(&mut self) {
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Venue ids of bound orders still waiting for a determinate outcome.
    pub fn awaiting_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .book
            .open_orders()
            .filter(|o| o.state == OrderState::AwaitingSettlement)
            .filter_map(|o| o.external_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn dispatch(&mut self, req: DispatchRequest) -> Result<(OrderRequest, Vec<DomainEvent>), DispatchError> {
        let now_ms = self.clock.now_ms();
        if self.halted {
            return Err(DispatchError::Stopped);
        }
        if self.cfg.sequential {
            if let Some(holder) = &self.in_flight {
                return Err(DispatchError::InFlight { holder: holder.clone() });
            }
        }
        if self.risk.is_paused(now_ms) {
            return Err(DispatchError::Paused { until_ms: self.risk.pause_until().unwrap_or(now_ms) });
        }
        let stake = self.risk.stake_for_dispatch();
        if !stake.is_finite() || stake <= 0.0 {
            return Err(DispatchError::InvalidStake(stake));
        }

        let local_id = client_order_id(&req.source, now_ms, self.seq);
        self.seq += 1;

        let mut order = Order::new(local_id.clone(), req.instrument.clone(), req.direction, stake, now_ms);
        order.duration = req.duration;
        order.duration_unit = req.duration_unit.clone();
        order.source = req.source.clone();
        order.snapshot = req.snapshot;
        self.book.insert(order);
        self.unbound.push_back(local_id.clone());
        if self.cfg.sequential {
            self.in_flight = Some(local_id.clone());
        }

        let events = vec![DomainEvent::OrderDispatched {
            local_id: local_id.clone(),
            instrument: req.instrument.clone(),
            direction: req.direction,
            stake,
            duration: req.duration,
            duration_unit: req.duration_unit.clone(),
            source: req.source,
        }];
        let request = OrderRequest {
            local_id,
            instrument: req.instrument,
            direction: req.direction,
            stake,
            duration: req.duration,
            duration_unit: req.duration_unit,
        };
        Ok((request, events))
    }

    pub fn on_settlement(&mut self, ev: &SettlementEvent) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        if self.foreign.contains_key(&ev.external_id) {
            // reported on first sight
            return events;
        }
        if let Some((local_id, _)) = self.settled.get(&ev.external_id) {
            if ev.status != SettlementStatus::Pending {
                events.push(DomainEvent::DuplicateSettlement { local_id: local_id.clone(), external_id: ev.external_id.clone() });
            }
            return events;
        }

        let local_id = match self.bindings.get(&ev.external_id) {
            Some(l) => l.clone(),
            None => match self.bind_oldest(&ev.external_id, &mut events) {
                Some(l) => l,
                None => {
                    self.foreign.insert(ev.external_id.clone(), self.clock.now_ms());
                    events.push(DomainEvent::ForeignSettlement { external_id: ev.external_id.clone() });
                    return events;
                }
            },
        };

        let state = match self.book.get(&local_id) {
            Some(o) => o.state,
            None => return events,
        };
        if state.is_terminal() {
            if ev.status != SettlementStatus::Pending {
                events.push(DomainEvent::DuplicateSettlement { local_id, external_id: ev.external_id.clone() });
            }
            return events;
        }

        match ev.status {
            SettlementStatus::Pending => {}
            SettlementStatus::Ambiguous => {
                events.push(DomainEvent::AmbiguousSettlement {
                    local_id: local_id.clone(),
                    external_id: ev.external_id.clone(),
                });
                self.release_lock(&local_id, &mut events);
            }
            SettlementStatus::Won | SettlementStatus::Lost => {
                let won = ev.status == SettlementStatus::Won;
                let event = if won { Event::SettleWon { profit: ev.profit } } else { Event::SettleLost { profit: ev.profit } };
                if self.book.apply(&local_id, event).is_err() {
                    return events;
                }
                events.push(DomainEvent::OrderSettled {
                    local_id: local_id.clone(),
                    external_id: ev.external_id.clone(),
                    won,
                    profit: ev.profit,
                });
                let snapshot = self.book.get(&local_id).and_then(|o| o.snapshot);
                let now_ms = self.clock.now_ms();
                events.extend(self.risk.apply_outcome(won, ev.profit, snapshot, now_ms));
                self.release_lock(&local_id, &mut events);
                events.push(DomainEvent::StateHash { local_id, hash: self.state_hash() });
            }
        }
        events
    }

    /// Transient venue error correlated with the in-flight request.
    pub fn on_venue_error(&mut self, code: &str, message: &str) -> Vec<DomainEvent> {
        let mut events = vec![DomainEvent::VenueError { code: code.to_string(), message: message.to_string() }];
        let target = match &self.in_flight {
            Some(l) => Some(l.clone()),
            None if !self.cfg.sequential => self.unbound.back().cloned(),
            None => None,
        };
        let Some(local_id) = target else {
            return events;
        };
        match self.book.apply(&local_id, Event::Reject { reason: message.to_string() }) {
            Ok((prev, OrderState::Rejected)) if !prev.is_terminal() => {
                self.unbound.retain(|id| id != &local_id);
                events.push(DomainEvent::OrderRejected { local_id: local_id.clone(), message: message.to_string() });
                self.release_lock(&local_id, &mut events);
                events.push(DomainEvent::StateHash { local_id, hash: self.state_hash() });
            }
            _ => self.release_lock(&local_id, &mut events),
        }
        events
    }

    /// Forces TIMEOUT on every open order past duration + grace.
    pub fn check_timeouts(&mut self) -> Vec<DomainEvent> {
        let now_ms = self.clock.now_ms();
        let grace = self.cfg.grace_secs;
        let mut expired: Vec<(u64, String)> = self
            .book
            .open_orders()
            .filter(|o| now_ms >= o.deadline_ms(grace))
            .map(|o| (o.dispatch_ms, o.local_id.clone()))
            .collect();
        expired.sort();

        let mut events = Vec::new();
        for (_, local_id) in expired {
            if self.book.apply(&local_id, Event::Timeout).is_err() {
                continue;
            }
            self.unbound.retain(|id| id != &local_id);
            let external_id = self.book.get(&local_id).and_then(|o| o.external_id.clone());
            events.push(DomainEvent::OrderTimedOut { local_id: local_id.clone(), external_id });
            events.extend(self.risk.on_timeout());
            self.release_lock(&local_id, &mut events);
            events.push(DomainEvent::StateHash { local_id, hash: self.state_hash() });
        }
        events
    }

    /// Forgets terminal orders and foreign ids older than the retention
    /// window. Pruned venue ids keep their outcome so repeats stay duplicates.
    pub fn prune(&mut self) -> usize {
        let cutoff = self.clock.now_ms().saturating_sub(self.cfg.retention_secs.saturating_mul(1000));
        let removed = self.book.prune_terminal(cutoff);
        for order in &removed {
            if let Some(external_id) = &order.external_id {
                self.bindings.remove(external_id);
                self.settled.insert(external_id.clone(), (order.local_id.clone(), order.state));
            }
        }
        self.foreign.retain(|_, seen_ms| *seen_ms >= cutoff);
        removed.len()
    }

    /// Hex SHA-256 over the serialized risk state.
    pub fn state_hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.risk.state()).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    fn bind_oldest(&mut self, external_id: &str, events: &mut Vec<DomainEvent>) -> Option<String> {
        while let Some(local_id) = self.unbound.pop_front() {
            let bind = Event::Bind { external_id: external_id.to_string() };
            if let Ok((OrderState::Dispatched, OrderState::AwaitingSettlement)) = self.book.apply(&local_id, bind) {
                self.bindings.insert(external_id.to_string(), local_id.clone());
                events.push(DomainEvent::OrderBound { local_id: local_id.clone(), external_id: external_id.to_string() });
                return Some(local_id);
            }
        }
        None
    }

    /// Only the holder's own transition may clear the lock.
    fn release_lock(&mut self, local_id: &str, events: &mut Vec<DomainEvent>) {
        if self.in_flight.as_deref() == Some(local_id) {
            self.in_flight = None;
            events.push(DomainEvent::LockReleased { local_id: local_id.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::risk::RiskConfig;

    fn make_reconciler(sequential: bool) -> (Reconciler, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let rc = Reconciler::new(
            ReconcileConfig { sequential, ..Default::default() },
            RiskController::new(RiskConfig::default()),
            Arc::new(clock.clone()),
        );
        (rc, clock)
    }

    fn make_request(direction: Direction) -> DispatchRequest {
        DispatchRequest {
            instrument: "R_100".to_string(),
            direction,
            source: "SNIPER".to_string(),
            duration: 1,
            duration_unit: "m".to_string(),
            snapshot: None,
        }
    }

    #[test]
    fn test_infer_status() {
        assert_eq!(SettlementStatus::infer(false, Some("open"), Some(0.3), Some(1.0), None), SettlementStatus::Pending);
        assert_eq!(SettlementStatus::infer(true, None, Some(0.95), None, None), SettlementStatus::Won);
        assert_eq!(SettlementStatus::infer(false, Some("sold"), Some(-1.0), None, None), SettlementStatus::Lost);
        assert_eq!(SettlementStatus::infer(false, Some("WON"), None, None, None), SettlementStatus::Won);
        // zero profit falls back to sell - buy
        assert_eq!(SettlementStatus::infer(false, None, Some(0.0), Some(1.0), Some(1.95)), SettlementStatus::Won);
        assert_eq!(SettlementStatus::infer(true, None, Some(0.005), None, None), SettlementStatus::Lost);
        assert_eq!(SettlementStatus::infer(true, None, None, None, None), SettlementStatus::Ambiguous);
    }

    #[test]
    fn test_dispatch_takes_lock() {
        let (mut rc, _clock) = make_reconciler(true);
        let (req, events) = rc.dispatch(make_request(Direction::Call)).unwrap();
        assert_eq!(req.stake, 1.0);
        assert!(req.local_id.starts_with("CID-SNIPER-"));
        assert_eq!(rc.in_flight(), Some(req.local_id.as_str()));
        assert!(matches!(events[0], DomainEvent::OrderDispatched { .. }));

        let err = rc.dispatch(make_request(Direction::Put)).unwrap_err();
        assert_eq!(err.reason(), ReasonCode::InFlightLock);
        assert_eq!(rc.open_orders(), 1);
    }

    #[test]
    fn test_first_notification_binds_fifo() {
        let (mut rc, _clock) = make_reconciler(false);
        let (a, _) = rc.dispatch(make_request(Direction::Call)).unwrap();
        let (b, _) = rc.dispatch(make_request(Direction::Put)).unwrap();
        rc.on_settlement(&SettlementEvent::pending("100"));
        rc.on_settlement(&SettlementEvent::pending("200"));
        assert_eq!(rc.local_for("100"), Some(a.local_id.as_str()));
        assert_eq!(rc.local_for("200"), Some(b.local_id.as_str()));
        assert_eq!(rc.awaiting_ids(), vec!["100".to_string(), "200".to_string()]);
    }

    #[test]
    fn test_foreign_settlement_is_isolated() {
        let (mut rc, _clock) = make_reconciler(true);
        let before = rc.risk().state();
        let events = rc.on_settlement(&SettlementEvent::lost("X", -1.0));
        assert_eq!(events, vec![DomainEvent::ForeignSettlement { external_id: "X".into() }]);
        assert!(rc.is_foreign("X"));
        assert_eq!(rc.risk().state(), before);
        // repeated foreign ids stay quiet
        assert!(rc.on_settlement(&SettlementEvent::lost("X", -1.0)).is_empty());
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let (mut rc, _clock) = make_reconciler(true);
        rc.dispatch(make_request(Direction::Call)).unwrap();
        rc.on_settlement(&SettlementEvent::won("7", 0.95));
        let once = rc.risk().state();
        let events = rc.on_settlement(&SettlementEvent::won("7", 0.95));
        assert!(matches!(events[0], DomainEvent::DuplicateSettlement { .. }));
        assert_eq!(rc.risk().state(), once);
        assert_eq!(rc.in_flight(), None);
    }

    #[test]
    fn test_prune_keeps_settled_ids_idempotent() {
        let (mut rc, clock) = make_reconciler(true);
        let (a, _) = rc.dispatch(make_request(Direction::Call)).unwrap();
        rc.on_settlement(&SettlementEvent::won("7", 0.95));
        rc.on_settlement(&SettlementEvent::lost("X", -1.0));
        let (b, _) = rc.dispatch(make_request(Direction::Put)).unwrap();

        // inside the window nothing goes
        assert_eq!(rc.prune(), 0);
        clock.advance_secs(3_601);
        assert_eq!(rc.prune(), 1);
        assert!(rc.order(&a.local_id).is_none());
        assert!(rc.order(&b.local_id).is_some());
        assert_eq!(rc.local_for("7"), None);
        assert_eq!(rc.settled_outcome("7"), Some(OrderState::Won));
        assert!(!rc.is_foreign("X"));

        // a replay after pruning must not bind to the open order
        let before = rc.risk().state();
        let events = rc.on_settlement(&SettlementEvent::won("7", 0.95));
        assert_eq!(events, vec![DomainEvent::DuplicateSettlement { local_id: a.local_id.clone(), external_id: "7".into() }]);
        assert_eq!(rc.risk().state(), before);
        assert_eq!(rc.in_flight(), Some(b.local_id.as_str()));
        assert_eq!(rc.order(&b.local_id).map(|o| o.state), Some(OrderState::Dispatched));
    }

    #[test]
    fn test_ambiguous_releases_lock_without_risk_change() {
        let (mut rc, _clock) = make_reconciler(true);
        let (a, _) = rc.dispatch(make_request(Direction::Call)).unwrap();
        let before = rc.risk().state();
        let events = rc.on_settlement(&SettlementEvent::ambiguous("7"));
        assert!(events.contains(&DomainEvent::LockReleased { local_id: a.local_id.clone() }));
        assert_eq!(rc.risk().state(), before);
        assert_eq!(rc.order(&a.local_id).map(|o| o.state), Some(OrderState::AwaitingSettlement));

        // a newer order takes the lock; the late outcome of the old one must not release it
        let (b, _) = rc.dispatch(make_request(Direction::Put)).unwrap();
        rc.on_settlement(&SettlementEvent::lost("7", -1.0));
        assert_eq!(rc.in_flight(), Some(b.local_id.as_str()));
        assert_eq!(rc.order(&a.local_id).map(|o| o.state), Some(OrderState::Lost));
    }

    #[test]
    fn test_venue_error_rejects_in_flight() {
        let (mut rc, _clock) = make_reconciler(true);
        let (a, _) = rc.dispatch(make_request(Direction::Call)).unwrap();
        let before = rc.risk().state();
        let events = rc.on_venue_error("RateLimit", "too many requests");
        assert!(events.contains(&DomainEvent::OrderRejected {
            local_id: a.local_id.clone(),
            message: "too many requests".into()
        }));
        assert_eq!(rc.in_flight(), None);
        assert_eq!(rc.unbound_len(), 0);
        assert_eq!(rc.risk().state(), before);
        // the next notification has nothing to bind to
        rc.on_settlement(&SettlementEvent::pending("9"));
        assert!(rc.is_foreign("9"));
    }

    #[test]
    fn test_timeout_after_duration_plus_grace() {
        let (mut rc, clock) = make_reconciler(true);
        let (a, _) = rc.dispatch(make_request(Direction::Call)).unwrap();
        rc.on_settlement(&SettlementEvent::pending("5"));
        clock.advance_secs(104);
        assert!(rc.check_timeouts().is_empty());
        clock.advance_secs(1);
        let events = rc.check_timeouts();
        assert!(events.contains(&DomainEvent::OrderTimedOut { local_id: a.local_id.clone(), external_id: Some("5".into()) }));
        assert_eq!(rc.in_flight(), None);
        assert!((rc.risk().dynamic_selectivity() - 1.1).abs() < 1e-9);
        assert_eq!(rc.risk().ladder_level(), 1);

        // a late outcome is a no-op
        let before = rc.risk().state();
        rc.on_settlement(&SettlementEvent::won("5", 0.95));
        assert_eq!(rc.risk().state(), before);
    }

    #[test]
    fn test_halt_blocks_dispatch_only() {
        let (mut rc, _clock) = make_reconciler(true);
        rc.dispatch(make_request(Direction::Call)).unwrap();
        rc.halt();
        rc.on_settlement(&SettlementEvent::won("1", 0.95));
        assert_eq!(rc.risk().ladder_level(), 2);
        assert_eq!(rc.dispatch(make_request(Direction::Call)).unwrap_err(), DispatchError::Stopped);
    }

    #[test]
    fn test_state_hash_tracks_risk_state() {
        let (mut rc, _clock) = make_reconciler(true);
        let h0 = rc.state_hash();
        assert_eq!(h0.len(), 64);
        rc.dispatch(make_request(Direction::Call)).unwrap();
        assert_eq!(rc.state_hash(), h0);
        rc.on_settlement(&SettlementEvent::won("1", 0.95));
        assert_ne!(rc.state_hash(), h0);
    }
}
