use serde::Serialize;

use crate::risk::PatternSnapshot;
use crate::strategy::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Dispatched,
    AwaitingSettlement,
    Won,
    Lost,
    Rejected,
    Timeout,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Won | OrderState::Lost | OrderState::Rejected | OrderState::Timeout)
    }

    /// Status string used on trade records.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Dispatched | OrderState::AwaitingSettlement => "PENDING",
            OrderState::Won => "WON",
            OrderState::Lost => "LOST",
            OrderState::Rejected => "REJECTED",
            OrderState::Timeout => "TIMEOUT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub local_id: String,
    pub external_id: Option<String>,
    pub instrument: String,
    pub direction: Direction,
    pub stake: f64,
    pub duration: u32,
    pub duration_unit: String,
    pub source: String,
    pub dispatch_ms: u64,
    pub state: OrderState,
    pub profit: f64,
    /// Features at dispatch time, filed into pattern memory on settlement.
    pub snapshot: Option<PatternSnapshot>,
}

impl Order {
    pub fn new(local_id: String, instrument: String, direction: Direction, stake: f64, dispatch_ms: u64) -> Self {
        Self {
            local_id,
            external_id: None,
            instrument,
            direction,
            stake,
            duration: 1,
            duration_unit: "m".to_string(),
            source: String::new(),
            dispatch_ms,
            state: OrderState::Dispatched,
            profit: 0.0,
            snapshot: None,
        }
    }

    /// Deadline after which an unsettled order is forced to TIMEOUT.
    pub fn deadline_ms(&self, grace_secs: u64) -> u64 {
        self.dispatch_ms + (duration_secs(self.duration, &self.duration_unit) + grace_secs) * 1000
    }
}

/// Contract length in seconds. Tick durations count one second per tick.
pub fn duration_secs(duration: u32, unit: &str) -> u64 {
    let d = duration as u64;
    match unit {
        "m" => d * 60,
        "h" => d * 3600,
        "d" => d * 86_400,
        _ => d,
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Bind { external_id: String },
    SettleWon { profit: f64 },
    SettleLost { profit: f64 },
    Reject { reason: String },
    Timeout,
}

#[derive(Debug, Clone)]
pub struct TransitionError {
    pub msg: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for TransitionError {}

/// Terminal states absorb every later event.
pub fn apply_event(order: &mut Order, event: Event) -> Result<(), TransitionError> {
    match (&order.state, event) {
        (s, _) if s.is_terminal() => Ok(()),
        (OrderState::Dispatched, Event::Bind { external_id }) => {
            order.external_id = Some(external_id);
            order.state = OrderState::AwaitingSettlement;
            Ok(())
        }
        (OrderState::AwaitingSettlement, Event::SettleWon { profit }) => {
            order.profit = profit;
            order.state = OrderState::Won;
            Ok(())
        }
        (OrderState::AwaitingSettlement, Event::SettleLost { profit }) => {
            order.profit = profit;
            order.state = OrderState::Lost;
            Ok(())
        }
        (_, Event::Reject { .. }) => {
            order.state = OrderState::Rejected;
            Ok(())
        }
        (_, Event::Timeout) => {
            order.state = OrderState::Timeout;
            Ok(())
        }
        (_, Event::Bind { .. }) => Err(TransitionError {
            msg: "order already bound".to_string(),
        }),
        (_, Event::SettleWon { .. }) | (_, Event::SettleLost { .. }) => Err(TransitionError {
            msg: "settlement before binding".to_string(),
        }),
    }
}
