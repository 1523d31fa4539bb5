//! Offline venue: random-walk ticks, candle history and contract settlement
//! at expiry. Used whenever no API token is configured.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use crate::candles::{bucket_of, Candle, CANDLE_SECS};
use crate::clock::Clock;
use crate::config::Config;
use crate::events::InboundEvent;
use crate::exchange::{Command, Venue};
use crate::reconcile::order_sm::duration_secs;
use crate::reconcile::{SettlementEvent, SettlementStatus};
use crate::strategy::Direction;

pub const PAYOUT_RATIO: f64 = 0.95;
const START_BALANCE: f64 = 10_000.0;
/// Settled contracts stay pollable this long past expiry.
const SETTLED_RETENTION_SECS: u64 = 3_600;

#[derive(Debug, Clone)]
struct SimContract {
    id: String,
    direction: Direction,
    stake: f64,
    entry: f64,
    expiry_epoch: u64,
    outcome: Option<SettlementEvent>,
}

pub struct SimMarket {
    rng: StdRng,
    price: f64,
    volatility: f64,
    balance: f64,
    currency: String,
    subscribed: Option<String>,
    next_id: u64,
    contracts: Vec<SimContract>,
}

impl SimMarket {
    pub fn new(seed: u64, start_price: f64, currency: &str) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            price: start_price,
            volatility: 0.0004,
            balance: START_BALANCE,
            currency: currency.to_string(),
            subscribed: None,
            next_id: 1,
            contracts: Vec::new(),
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    fn step(&mut self) -> f64 {
        let shock: f64 = self.rng.gen_range(-1.0..=1.0);
        self.price = (self.price * (1.0 + shock * self.volatility)).max(0.01);
        self.price
    }

    fn balance_event(&self) -> InboundEvent {
        InboundEvent::Balance { balance: self.balance, currency: self.currency.clone() }
    }

    /// Called once per second: one tick, then settlement of expired contracts.
    pub fn on_clock(&mut self, epoch: u64) -> Vec<InboundEvent> {
        let mut out = Vec::new();
        let Some(instrument) = self.subscribed.clone() else {
            return out;
        };
        let quote = self.step();
        out.push(InboundEvent::Tick { instrument, epoch, quote });

        let mut settled_any = false;
        for c in self.contracts.iter_mut().filter(|c| c.outcome.is_none() && epoch >= c.expiry_epoch) {
            let won = match c.direction {
                Direction::Call => quote > c.entry,
                Direction::Put => quote < c.entry,
            };
            let payout = if won { c.stake * (1.0 + PAYOUT_RATIO) } else { 0.0 };
            let profit = payout - c.stake;
            self.balance += payout;
            let ev = SettlementEvent {
                external_id: c.id.clone(),
                status: SettlementStatus::infer(true, Some(if won { "won" } else { "lost" }), Some(profit), Some(c.stake), Some(payout)),
                profit,
                buy_price: Some(c.stake),
                sell_price: Some(payout),
            };
            c.outcome = Some(ev.clone());
            out.push(InboundEvent::Contract(ev));
            settled_any = true;
        }
        if settled_any {
            out.push(self.balance_event());
        }
        self.contracts
            .retain(|c| c.outcome.is_none() || epoch < c.expiry_epoch + SETTLED_RETENTION_SECS);
        out
    }

    fn history(&mut self, count: usize, epoch: u64) -> Vec<Candle> {
        let last_start = bucket_of(epoch);
        let first_start = last_start.saturating_sub(count.saturating_sub(1) as u64 * CANDLE_SECS);
        let mut candles = Vec::with_capacity(count);
        let mut start = first_start;
        while candles.len() < count && start <= last_start {
            let open = self.price;
            let mut c = Candle::flat(start, open);
            for _ in 0..6 {
                let p = self.step();
                c.high = c.high.max(p);
                c.low = c.low.min(p);
                c.close = p;
            }
            candles.push(c);
            start += CANDLE_SECS;
        }
        candles
    }

    fn status_of(&self, contract_id: &str) -> Option<SettlementEvent> {
        let c = self.contracts.iter().find(|c| c.id == contract_id)?;
        Some(match &c.outcome {
            Some(ev) => ev.clone(),
            None => SettlementEvent { buy_price: Some(c.stake), ..SettlementEvent::pending(c.id.clone()) },
        })
    }

    pub fn handle(&mut self, cmd: &Command, epoch: u64) -> Vec<InboundEvent> {
        match cmd {
            Command::Authorize => vec![InboundEvent::Authorized {
                login_id: "VRTC-SIM".to_string(),
                balance: self.balance,
                currency: self.currency.clone(),
            }],
            Command::SubscribeBalance => vec![self.balance_event()],
            Command::SubscribeContracts => Vec::new(),
            Command::RequestHistory { instrument, count } => {
                let candles = self.history(*count, epoch);
                vec![InboundEvent::History { instrument: instrument.clone(), candles }]
            }
            Command::SubscribeTicks { instrument } => {
                self.subscribed = Some(instrument.clone());
                Vec::new()
            }
            Command::ForgetTicks => {
                self.subscribed = None;
                Vec::new()
            }
            Command::Buy(req) => {
                if req.stake > self.balance {
                    return vec![InboundEvent::VenueError {
                        code: "InsufficientBalance".to_string(),
                        message: format!("balance {:.2} below stake {:.2}", self.balance, req.stake),
                        msg_type: "buy".to_string(),
                    }];
                }
                let id = self.next_id.to_string();
                self.next_id += 1;
                self.balance -= req.stake;
                self.contracts.push(SimContract {
                    id: id.clone(),
                    direction: req.direction,
                    stake: req.stake,
                    entry: self.price,
                    expiry_epoch: epoch + duration_secs(req.duration, &req.duration_unit),
                    outcome: None,
                });
                vec![InboundEvent::BuyAccepted { contract_id: id, buy_price: req.stake }, self.balance_event()]
            }
            Command::PollContract { contract_id } | Command::SubscribeContract { contract_id } => {
                self.status_of(contract_id).map(InboundEvent::Contract).into_iter().collect()
            }
        }
    }
}

// =============================================================================
// Venue
// =============================================================================

pub struct SimVenue {
    market: Arc<Mutex<SimMarket>>,
    clock: Arc<dyn Clock>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
}

impl SimVenue {
    pub fn new(market: SimMarket, clock: Arc<dyn Clock>, inbound: mpsc::UnboundedSender<InboundEvent>) -> Self {
        Self { market: Arc::new(Mutex::new(market)), clock, inbound }
    }

    /// Builds the simulator and spawns its 1 Hz ticker.
    pub fn start(cfg: &Config, clock: Arc<dyn Clock>, inbound: mpsc::UnboundedSender<InboundEvent>) -> Self {
        let venue = Self::new(SimMarket::new(clock.now_ms(), 1_000.0, &cfg.currency), clock, inbound);
        let market = venue.market.clone();
        let clock = venue.clock.clone();
        let tx = venue.inbound.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let events = match market.lock() {
                    Ok(mut m) => m.on_clock(clock.now_secs()),
                    Err(_) => break,
                };
                for ev in events {
                    if tx.send(ev).is_err() {
                        return;
                    }
                }
            }
        });
        venue
    }
}

#[async_trait]
impl Venue for SimVenue {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn execute(&self, cmd: &Command) -> Result<()> {
        let events = {
            let mut market = self.market.lock().map_err(|_| anyhow!("sim market lock poisoned"))?;
            market.handle(cmd, self.clock.now_secs())
        };
        for ev in events {
            self.inbound.send(ev).map_err(|_| anyhow!("inbound channel closed"))?;
        }
        Ok(())
    }
}
