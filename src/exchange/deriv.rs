use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::Config;
use crate::events::{parse_message, InboundEvent};
use crate::exchange::retry::{retry_async, RetryConfig};
use crate::exchange::{Command, Venue};
use crate::logging::{log, obj, v_str, Domain, Level};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Websocket client for the binary-options venue.
pub struct DerivVenue {
    sink: Mutex<WsSink>,
    token: String,
    currency: String,
}

pub fn endpoint(base: &str, app_id: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().append_pair("app_id", app_id);
    Ok(url)
}

/// Contract ids go out as numbers when they look like one.
fn contract_id_value(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => json!(n),
        Err(_) => json!(id),
    }
}

/// JSON request for one command.
pub fn request_for(cmd: &Command, token: &str, currency: &str) -> Value {
    match cmd {
        Command::Authorize => json!({ "authorize": token }),
        Command::SubscribeBalance => json!({ "balance": 1, "subscribe": 1 }),
        Command::SubscribeContracts => json!({ "proposal_open_contract": 1, "subscribe": 1 }),
        Command::RequestHistory { instrument, count } => json!({
            "ticks_history": instrument,
            "adjust_start_time": 1,
            "count": count,
            "end": "latest",
            "start": 1,
            "style": "candles",
            "granularity": 60
        }),
        Command::SubscribeTicks { instrument } => json!({ "ticks": instrument, "subscribe": 1 }),
        Command::ForgetTicks => json!({ "forget_all": "ticks" }),
        Command::Buy(req) => json!({
            "buy": 1,
            "price": req.stake,
            "parameters": {
                "amount": req.stake,
                "basis": "stake",
                "contract_type": req.direction.as_str(),
                "currency": currency,
                "duration": req.duration,
                "duration_unit": req.duration_unit,
                "symbol": req.instrument
            }
        }),
        Command::PollContract { contract_id } => json!({
            "proposal_open_contract": 1,
            "contract_id": contract_id_value(contract_id)
        }),
        Command::SubscribeContract { contract_id } => json!({
            "proposal_open_contract": 1,
            "contract_id": contract_id_value(contract_id),
            "subscribe": 1
        }),
    }
}

impl DerivVenue {
    /// Connects with backoff and spawns the reader task.
    pub async fn connect(cfg: &Config, token: &str, inbound: mpsc::UnboundedSender<InboundEvent>) -> Result<Self> {
        let url = endpoint(&cfg.venue_url, &cfg.app_id)?;
        let retry_cfg = RetryConfig { max_retries: 5, base_delay_ms: 500, ..Default::default() };
        let target = url.to_string();
        let (ws, _) = retry_async(&retry_cfg, "venue_connect", || {
            let target = target.clone();
            async move { tokio_tungstenite::connect_async(target).await.map_err(|e| anyhow!(e)) }
        })
        .await?;
        log(Level::Info, Domain::System, "venue_connected", obj(&[("url", v_str(url.as_str()))]));

        let (sink, mut stream) = ws.split();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(t)) => t,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        log(Level::Error, Domain::System, "venue_read_error", obj(&[("error", v_str(&e.to_string()))]));
                        break;
                    }
                };
                match parse_message(&text) {
                    Ok(Some(ev)) => {
                        if inbound.send(ev).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log(Level::Warn, Domain::System, "venue_parse_error", obj(&[("error", v_str(&e.to_string()))])),
                }
            }
            log(Level::Warn, Domain::System, "venue_disconnected", obj(&[]));
        });

        Ok(Self { sink: Mutex::new(sink), token: token.to_string(), currency: cfg.currency.clone() })
    }
}

#[async_trait]
impl Venue for DerivVenue {
    fn name(&self) -> &'static str {
        "deriv"
    }

    async fn execute(&self, cmd: &Command) -> Result<()> {
        let body = request_for(cmd, &self.token, &self.currency);
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(body.to_string())).await?;
        Ok(())
    }
}
