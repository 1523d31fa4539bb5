//! Domain event journal.
//!
//! The core never prints. Every transition and anomaly is returned as a
//! `DomainEvent`; the runtime renders each one through `logging` and appends it
//! to `journal.jsonl` so a session can be narrated after the fact.
//!
//! Id format: `CID-<source>-<ts_ms>-<seq>` for locally dispatched orders.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::logging::{Domain, Level};
use crate::strategy::Direction;

/// Client Order ID: CID-<source>-<ts>-<seq>
pub fn client_order_id(source: &str, ts_ms: u64, seq: u64) -> String {
    format!("CID-{}-{}-{}", source, ts_ms, seq)
}

// =============================================================================
// Reason Codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    // Shared evaluation gates
    CircuitBreaker,
    PostTradeRest,
    OutsideCandleWindow,
    WarmingUp,
    NoModules,

    // Dispatch
    InFlightLock,
    EngineStopped,
    InvalidStake,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitBreaker => "circuit_breaker",
            Self::PostTradeRest => "post_trade_rest",
            Self::OutsideCandleWindow => "outside_candle_window",
            Self::WarmingUp => "warming_up",
            Self::NoModules => "no_modules",
            Self::InFlightLock => "in_flight_lock",
            Self::EngineStopped => "engine_stopped",
            Self::InvalidStake => "invalid_stake",
        }
    }
}

// =============================================================================
// Domain Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    // Market
    HistoryReplaced { instrument: String, candles: usize },
    HistoryAdvisory { instrument: String, candles: usize },
    InstrumentSwitched { from: String, to: String },

    // Strategy
    SignalEmitted { instrument: String, direction: Direction, source: String },
    GateBlocked { reason: ReasonCode },
    ConsensusMissed { signals: usize, required: usize },

    // Exec
    OrderDispatched {
        local_id: String,
        instrument: String,
        direction: Direction,
        stake: f64,
        duration: u32,
        duration_unit: String,
        source: String,
    },
    DispatchRefused { reason: ReasonCode },
    OrderRejected { local_id: String, message: String },
    VenueError { code: String, message: String },

    // Settle
    OrderBound { local_id: String, external_id: String },
    ForeignSettlement { external_id: String },
    DuplicateSettlement { local_id: String, external_id: String },
    AmbiguousSettlement { local_id: String, external_id: String },
    OrderSettled { local_id: String, external_id: String, won: bool, profit: f64 },
    OrderTimedOut { local_id: String, external_id: Option<String> },
    LockReleased { local_id: String },

    // Risk
    LadderAdvanced { level: u32, stake: f64 },
    LadderReset { stake: f64 },
    SelectivityChanged { from: f64, to: f64 },
    BreakerEngaged { pause_until_ms: u64 },
    PatternRecorded { won: bool, stored: usize },

    // System
    EngineStarted,
    EngineStopped,
    BalanceStale { silent_secs: u64 },

    // Audit
    StateHash { local_id: String, hash: String },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HistoryReplaced { .. } => "history_replaced",
            Self::HistoryAdvisory { .. } => "history_advisory",
            Self::InstrumentSwitched { .. } => "instrument_switched",
            Self::SignalEmitted { .. } => "signal_emitted",
            Self::GateBlocked { .. } => "gate_blocked",
            Self::ConsensusMissed { .. } => "consensus_missed",
            Self::OrderDispatched { .. } => "order_dispatched",
            Self::DispatchRefused { .. } => "dispatch_refused",
            Self::OrderRejected { .. } => "order_rejected",
            Self::VenueError { .. } => "venue_error",
            Self::OrderBound { .. } => "order_bound",
            Self::ForeignSettlement { .. } => "foreign_settlement",
            Self::DuplicateSettlement { .. } => "duplicate_settlement",
            Self::AmbiguousSettlement { .. } => "ambiguous_settlement",
            Self::OrderSettled { .. } => "order_settled",
            Self::OrderTimedOut { .. } => "order_timed_out",
            Self::LockReleased { .. } => "lock_released",
            Self::LadderAdvanced { .. } => "ladder_advanced",
            Self::LadderReset { .. } => "ladder_reset",
            Self::SelectivityChanged { .. } => "selectivity_changed",
            Self::BreakerEngaged { .. } => "breaker_engaged",
            Self::PatternRecorded { .. } => "pattern_recorded",
            Self::EngineStarted => "engine_started",
            Self::EngineStopped => "engine_stopped",
            Self::BalanceStale { .. } => "balance_stale",
            Self::StateHash { .. } => "state_hash",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Self::HistoryReplaced { .. } | Self::HistoryAdvisory { .. } | Self::InstrumentSwitched { .. } => {
                Domain::Market
            }
            Self::SignalEmitted { .. } | Self::GateBlocked { .. } | Self::ConsensusMissed { .. } => Domain::Strategy,
            Self::OrderDispatched { .. }
            | Self::DispatchRefused { .. }
            | Self::OrderRejected { .. }
            | Self::VenueError { .. } => Domain::Exec,
            Self::OrderBound { .. }
            | Self::ForeignSettlement { .. }
            | Self::DuplicateSettlement { .. }
            | Self::AmbiguousSettlement { .. }
            | Self::OrderSettled { .. }
            | Self::OrderTimedOut { .. }
            | Self::LockReleased { .. } => Domain::Settle,
            Self::LadderAdvanced { .. }
            | Self::LadderReset { .. }
            | Self::SelectivityChanged { .. }
            | Self::BreakerEngaged { .. }
            | Self::PatternRecorded { .. } => Domain::Risk,
            Self::EngineStarted | Self::EngineStopped | Self::BalanceStale { .. } => Domain::System,
            Self::StateHash { .. } => Domain::Audit,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Self::GateBlocked { .. } | Self::ConsensusMissed { .. } | Self::DuplicateSettlement { .. } => Level::Debug,
            Self::OrderRejected { .. }
            | Self::VenueError { .. }
            | Self::AmbiguousSettlement { .. }
            | Self::OrderTimedOut { .. }
            | Self::BreakerEngaged { .. }
            | Self::DispatchRefused { .. }
            | Self::BalanceStale { .. } => Level::Warn,
            _ => Level::Info,
        }
    }
}

// =============================================================================
// Journal Writer
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct JournalRecord {
    pub v: u16,
    pub seq: u64,
    pub ts_ms: u64,
    #[serde(flatten)]
    pub event: DomainEvent,
}

pub struct JournalWriter {
    writer: Mutex<BufWriter<File>>,
    seq: AtomicU64,
}

impl JournalWriter {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: Mutex::new(BufWriter::new(file)), seq: AtomicU64::new(0) })
    }

    pub fn write(&self, ts_ms: u64, event: &DomainEvent) -> std::io::Result<u64> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let record = JournalRecord { v: 1, seq, ts_ms, event: event.clone() };
        let line = serde_json::to_string(&record)?;
        let mut w = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "journal writer lock poisoned"))?;
        writeln!(w, "{}", line)?;
        Ok(seq)
    }

    pub fn flush(&self) -> std::io::Result<()> {
        let mut w = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "journal writer lock poisoned"))?;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_order_id_format() {
        assert_eq!(client_order_id("SNIPER", 1700, 3), "CID-SNIPER-1700-3");
    }

    #[test]
    fn test_event_is_adjacently_tagged() {
        let ev = DomainEvent::OrderBound { local_id: "CID-EMA-1-0".into(), external_id: "42".into() };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "OrderBound");
        assert_eq!(v["data"]["external_id"], "42");
    }

    #[test]
    fn test_event_classification() {
        let ev = DomainEvent::ForeignSettlement { external_id: "x".into() };
        assert_eq!(ev.domain(), Domain::Settle);
        assert_eq!(ev.name(), "foreign_settlement");
        assert_eq!(DomainEvent::BreakerEngaged { pause_until_ms: 1 }.level(), Level::Warn);
        assert_eq!(ReasonCode::PostTradeRest.as_str(), "post_trade_rest");
    }

    #[test]
    fn test_journal_writer_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let writer = JournalWriter::new(&path).unwrap();
        assert_eq!(writer.write(10, &DomainEvent::EngineStarted).unwrap(), 0);
        assert_eq!(writer.write(20, &DomainEvent::LadderReset { stake: 1.0 }).unwrap(), 1);
        writer.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let rec: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(rec["seq"], 1);
        assert_eq!(rec["ts_ms"], 20);
        assert_eq!(rec["type"], "LadderReset");
        assert_eq!(rec["data"]["stake"], 1.0);
    }
}
