//! Adaptive risk controller.
//!
//! Owns the stake ladder, dynamic selectivity, the consecutive-loss breaker
//! and the pattern memory. Mutated only from the settlement path; strategies
//! read it through `EvalContext`.

use serde::{Deserialize, Serialize};

use crate::journal::DomainEvent;
use crate::reliability::circuit::LossBreaker;
use crate::strategy::Direction;

pub const MAX_LADDER_LEVELS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub base_stake: f64,
    pub auto_scale: bool,
    pub compounding: bool,
    pub compound_levels: u32,
    pub safety_circuit: bool,
    pub max_losses: u32,
    pub pause_secs: u64,
    pub selectivity_step: f64,
    pub selectivity_cap: f64,
    pub level_boost: f64,
    pub win_memory: usize,
    pub loss_memory: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_stake: 1.0,
            auto_scale: false,
            compounding: true,
            compound_levels: 3,
            safety_circuit: true,
            max_losses: 2,
            pause_secs: 720,
            selectivity_step: 0.1,
            selectivity_cap: 1.3,
            level_boost: 0.35,
            win_memory: 50,
            loss_memory: 30,
        }
    }
}

impl RiskConfig {
    pub fn max_levels(&self) -> u32 {
        self.compound_levels.clamp(1, MAX_LADDER_LEVELS)
    }
}

// =============================================================================
// Pattern Memory
// =============================================================================

/// Features captured at dispatch time and filed under the order's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub rsi: f64,
    pub adx: f64,
    pub gap: f64,
    pub direction: Direction,
}

impl PatternSnapshot {
    /// 0..=100. Patterns of the other direction never match.
    pub fn similarity(&self, other: &PatternSnapshot) -> f64 {
        if self.direction != other.direction {
            return 0.0;
        }
        let rsi_score = (100.0 - (self.rsi - other.rsi).abs() * 4.0).max(0.0);
        let adx_score = (100.0 - (self.adx - other.adx).abs() * 4.0).max(0.0);
        let gap_score = (100.0 - (self.gap - other.gap).abs() * 1000.0).max(0.0);
        rsi_score * 0.3 + adx_score * 0.3 + gap_score * 0.4
    }
}

/// Fixed-capacity buffer that overwrites its oldest entry.
#[derive(Debug, Clone)]
struct RingBuffer<T: Copy> {
    buf: Vec<T>,
    cap: usize,
    idx: usize,
}

impl<T: Copy> RingBuffer<T> {
    fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { buf: Vec::with_capacity(cap), cap, idx: 0 }
    }

    fn push(&mut self, value: T) -> Option<T> {
        if self.buf.len() < self.cap {
            self.buf.push(value);
            return None;
        }
        let old = self.buf[self.idx];
        self.buf[self.idx] = value;
        self.idx = (self.idx + 1) % self.cap;
        Some(old)
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    /// Oldest first.
    fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.buf.len());
        out.extend_from_slice(&self.buf[self.idx..]);
        out.extend_from_slice(&self.buf[..self.idx]);
        out
    }
}

#[derive(Debug, Clone)]
pub struct PatternMemory {
    wins: RingBuffer<PatternSnapshot>,
    losses: RingBuffer<PatternSnapshot>,
}

impl PatternMemory {
    pub fn new(win_cap: usize, loss_cap: usize) -> Self {
        Self { wins: RingBuffer::new(win_cap), losses: RingBuffer::new(loss_cap) }
    }

    /// Returns the number of patterns now stored for that outcome.
    pub fn record(&mut self, snap: PatternSnapshot, won: bool) -> usize {
        let buf = if won { &mut self.wins } else { &mut self.losses };
        buf.push(snap);
        buf.len()
    }

    pub fn win_similarity(&self, candidate: &PatternSnapshot) -> f64 {
        best_match(self.wins.iter(), candidate)
    }

    pub fn loss_similarity(&self, candidate: &PatternSnapshot) -> f64 {
        best_match(self.losses.iter(), candidate)
    }

    pub fn win_count(&self) -> usize {
        self.wins.len()
    }

    pub fn loss_count(&self) -> usize {
        self.losses.len()
    }
}

fn best_match<'a>(patterns: impl Iterator<Item = &'a PatternSnapshot>, candidate: &PatternSnapshot) -> f64 {
    patterns.map(|p| candidate.similarity(p)).fold(0.0, f64::max)
}

// =============================================================================
// Risk State
// =============================================================================

/// Serializable view of everything the controller owns. Hashed for audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskState {
    pub ladder_level: u32,
    pub active_stake: f64,
    pub dynamic_selectivity: f64,
    pub consecutive_losses: u32,
    pub pause_until_ms: Option<u64>,
    pub balance: Option<f64>,
    pub win_patterns: Vec<PatternSnapshot>,
    pub loss_patterns: Vec<PatternSnapshot>,
}

pub struct RiskController {
    cfg: RiskConfig,
    ladder_level: u32,
    active_stake: f64,
    dynamic_selectivity: f64,
    balance: Option<f64>,
    breaker: LossBreaker,
    memory: PatternMemory,
}

impl RiskController {
    pub fn new(cfg: RiskConfig) -> Self {
        let cooldown_ms = cfg.pause_secs.saturating_mul(1000);
        let breaker = if cfg.safety_circuit {
            LossBreaker::new(cfg.max_losses, cooldown_ms)
        } else {
            LossBreaker::disabled(cfg.max_losses, cooldown_ms)
        };
        let memory = PatternMemory::new(cfg.win_memory, cfg.loss_memory);
        let mut rc = Self {
            ladder_level: 1,
            active_stake: 0.0,
            dynamic_selectivity: 1.0,
            balance: None,
            breaker,
            memory,
            cfg,
        };
        rc.active_stake = rc.base_stake();
        rc
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    pub fn set_balance(&mut self, balance: f64) {
        self.balance = Some(balance);
    }

    pub fn balance(&self) -> Option<f64> {
        self.balance
    }

    /// Manual base, raised to floor(balance / 100) * 10 when auto-scale is on.
    pub fn base_stake(&self) -> f64 {
        let manual = self.cfg.base_stake;
        match self.balance {
            Some(bal) if self.cfg.auto_scale && bal >= 100.0 => manual.max((bal / 100.0).floor() * 10.0),
            _ => manual,
        }
    }

    /// Stake for the next order. Level 1 always re-reads the (possibly scaled) base.
    pub fn stake_for_dispatch(&mut self) -> f64 {
        if !self.cfg.compounding {
            self.ladder_level = 1;
        }
        if self.ladder_level == 1 {
            self.active_stake = self.base_stake();
        }
        self.active_stake
    }

    pub fn ladder_level(&self) -> u32 {
        self.ladder_level
    }

    pub fn active_stake(&self) -> f64 {
        self.active_stake
    }

    pub fn dynamic_selectivity(&self) -> f64 {
        self.dynamic_selectivity
    }

    pub fn total_selectivity(&self) -> f64 {
        self.dynamic_selectivity + (self.ladder_level.saturating_sub(1)) as f64 * self.cfg.level_boost
    }

    pub fn is_paused(&self, now_ms: u64) -> bool {
        !self.breaker.allow(now_ms)
    }

    pub fn pause_until(&self) -> Option<u64> {
        self.breaker.pause_until()
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.breaker.losses
    }

    pub fn memory(&self) -> &PatternMemory {
        &self.memory
    }

    /// Apply one determinate settlement of a local order. Callers guarantee it
    /// runs at most once per order.
    pub fn apply_outcome(
        &mut self,
        won: bool,
        profit: f64,
        snapshot: Option<PatternSnapshot>,
        now_ms: u64,
    ) -> Vec<DomainEvent> {
        let mut events = Vec::new();

        if let Some(snap) = snapshot {
            let stored = self.memory.record(snap, won);
            events.push(DomainEvent::PatternRecorded { won, stored });
        }

        if won {
            self.set_selectivity(1.0, &mut events);
            self.breaker.record_win();
            if self.cfg.compounding && self.ladder_level < self.cfg.max_levels() {
                self.active_stake += profit;
                self.ladder_level += 1;
                events.push(DomainEvent::LadderAdvanced { level: self.ladder_level, stake: self.active_stake });
            } else {
                self.reset_ladder(&mut events);
            }
        } else {
            let bumped = (self.dynamic_selectivity + self.cfg.selectivity_step).min(self.cfg.selectivity_cap);
            self.set_selectivity(bumped, &mut events);
            if let Some(pause_until_ms) = self.breaker.record_loss(now_ms) {
                events.push(DomainEvent::BreakerEngaged { pause_until_ms });
                self.set_selectivity(1.0, &mut events);
            }
            self.reset_ladder(&mut events);
        }
        events
    }

    /// Timeouts tighten selectivity like a loss but leave ladder and breaker alone.
    pub fn on_timeout(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        let bumped = (self.dynamic_selectivity + self.cfg.selectivity_step).min(self.cfg.selectivity_cap);
        self.set_selectivity(bumped, &mut events);
        events
    }

    pub fn state(&self) -> RiskState {
        RiskState {
            ladder_level: self.ladder_level,
            active_stake: self.active_stake,
            dynamic_selectivity: self.dynamic_selectivity,
            consecutive_losses: self.breaker.losses,
            pause_until_ms: self.breaker.pause_until(),
            balance: self.balance,
            win_patterns: self.memory.wins.to_vec(),
            loss_patterns: self.memory.losses.to_vec(),
        }
    }

    fn set_selectivity(&mut self, to: f64, events: &mut Vec<DomainEvent>) {
        let from = self.dynamic_selectivity;
        if (from - to).abs() > f64::EPSILON {
            self.dynamic_selectivity = to;
            events.push(DomainEvent::SelectivityChanged { from, to });
        }
    }

    fn reset_ladder(&mut self, events: &mut Vec<DomainEvent>) {
        self.ladder_level = 1;
        self.active_stake = self.base_stake();
        events.push(DomainEvent::LadderReset { stake: self.active_stake });
    }
}
