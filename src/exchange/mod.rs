use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::reconcile::OrderRequest;

pub mod deriv;
pub mod retry;
pub mod sim;

pub use deriv::DerivVenue;
pub use sim::SimVenue;

/// Outbound request to the execution venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    Authorize,
    SubscribeBalance,
    /// Updates for every open contract on the account.
    SubscribeContracts,
    RequestHistory { instrument: String, count: usize },
    SubscribeTicks { instrument: String },
    ForgetTicks,
    Buy(OrderRequest),
    PollContract { contract_id: String },
    SubscribeContract { contract_id: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Authorize => "authorize",
            Command::SubscribeBalance => "subscribe_balance",
            Command::SubscribeContracts => "subscribe_contracts",
            Command::RequestHistory { .. } => "request_history",
            Command::SubscribeTicks { .. } => "subscribe_ticks",
            Command::ForgetTicks => "forget_ticks",
            Command::Buy(_) => "buy",
            Command::PollContract { .. } => "poll_contract",
            Command::SubscribeContract { .. } => "subscribe_contract",
        }
    }
}

/// Replies come back asynchronously as `InboundEvent`s on the channel the
/// venue was built with.
#[async_trait]
pub trait Venue: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, cmd: &Command) -> Result<()>;
}
