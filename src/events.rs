//! Venue message parsing.
//!
//! Every inbound frame is parsed once into an `InboundEvent` before it reaches
//! the engine. Numeric fields are accepted as JSON numbers or numeric strings,
//! contract ids as numbers or strings.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::candles::Candle;
use crate::reconcile::{settled_profit, SettlementEvent, SettlementStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Tick { instrument: String, epoch: u64, quote: f64 },
    History { instrument: String, candles: Vec<Candle> },
    /// Buy acknowledged; the contract id is the first notification for it.
    BuyAccepted { contract_id: String, buy_price: f64 },
    Contract(SettlementEvent),
    Balance { balance: f64, currency: String },
    Authorized { login_id: String, balance: f64, currency: String },
    VenueError { code: String, message: String, msg_type: String },
}

fn num(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_num(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(num)
}

fn field_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 0/1, booleans and "0"/"1" all appear for flag fields.
fn field_flag(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(other) => num(other).map(|n| n != 0.0).unwrap_or(false),
        None => false,
    }
}

/// `Ok(None)` for message types the engine does not handle.
pub fn parse_message(text: &str) -> Result<Option<InboundEvent>> {
    let v: Value = serde_json::from_str(text)?;
    let msg_type = field_str(&v, "msg_type").unwrap_or_default();

    if let Some(err) = v.get("error") {
        return Ok(Some(InboundEvent::VenueError {
            code: field_str(err, "code").unwrap_or_else(|| "Unknown".to_string()),
            message: field_str(err, "message").unwrap_or_default(),
            msg_type,
        }));
    }

    let event = match msg_type.as_str() {
        "tick" => {
            let tick = v.get("tick").ok_or_else(|| anyhow!("tick message without body"))?;
            let epoch = field_num(tick, "epoch").ok_or_else(|| anyhow!("tick without epoch"))?;
            let quote = field_num(tick, "quote").ok_or_else(|| anyhow!("tick without quote"))?;
            InboundEvent::Tick {
                instrument: field_str(tick, "symbol").unwrap_or_default(),
                epoch: epoch as u64,
                quote,
            }
        }
        "candles" => {
            let rows = v.get("candles").and_then(Value::as_array).ok_or_else(|| anyhow!("candles message without rows"))?;
            let candles = rows.iter().filter_map(parse_candle).collect();
            let instrument = v
                .get("echo_req")
                .and_then(|e| field_str(e, "ticks_history"))
                .unwrap_or_default();
            InboundEvent::History { instrument, candles }
        }
        "buy" => {
            let buy = v.get("buy").ok_or_else(|| anyhow!("buy message without body"))?;
            let contract_id = field_str(buy, "contract_id").ok_or_else(|| anyhow!("buy without contract_id"))?;
            InboundEvent::BuyAccepted { contract_id, buy_price: field_num(buy, "buy_price").unwrap_or(0.0) }
        }
        "proposal_open_contract" => {
            // empty bodies arrive when a subscription is acknowledged
            let Some(poc) = v.get("proposal_open_contract").filter(|p| p.get("contract_id").is_some()) else {
                return Ok(None);
            };
            InboundEvent::Contract(parse_contract(poc)?)
        }
        "balance" => {
            let bal = v.get("balance").ok_or_else(|| anyhow!("balance message without body"))?;
            InboundEvent::Balance {
                balance: field_num(bal, "balance").ok_or_else(|| anyhow!("balance without amount"))?,
                currency: field_str(bal, "currency").unwrap_or_default(),
            }
        }
        "authorize" => {
            let auth = v.get("authorize").ok_or_else(|| anyhow!("authorize message without body"))?;
            InboundEvent::Authorized {
                login_id: field_str(auth, "loginid").unwrap_or_default(),
                balance: field_num(auth, "balance").unwrap_or(0.0),
                currency: field_str(auth, "currency").unwrap_or_default(),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn parse_candle(row: &Value) -> Option<Candle> {
    Some(Candle {
        start_time: field_num(row, "epoch")? as u64,
        open: field_num(row, "open")?,
        high: field_num(row, "high")?,
        low: field_num(row, "low")?,
        close: field_num(row, "close")?,
    })
}

fn parse_contract(poc: &Value) -> Result<SettlementEvent> {
    let external_id = field_str(poc, "contract_id").ok_or_else(|| anyhow!("contract without id"))?;
    let profit = field_num(poc, "profit");
    let buy_price = field_num(poc, "buy_price");
    let sell_price = field_num(poc, "sell_price");
    let label = field_str(poc, "status");
    let status = SettlementStatus::infer(field_flag(poc, "is_sold"), label.as_deref(), profit, buy_price, sell_price);
    Ok(SettlementEvent {
        external_id,
        status,
        profit: settled_profit(profit, buy_price, sell_price).unwrap_or(0.0),
        buy_price,
        sell_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tick() {
        let msg = r#"{"msg_type":"tick","tick":{"epoch":1700000001,"quote":"1234.56","symbol":"R_100"}}"#;
        let ev = parse_message(msg).unwrap().unwrap();
        assert_eq!(ev, InboundEvent::Tick { instrument: "R_100".into(), epoch: 1_700_000_001, quote: 1234.56 });
    }

    #[test]
    fn test_parse_history_skips_bad_rows() {
        let msg = r#"{"msg_type":"candles","echo_req":{"ticks_history":"R_50"},
            "candles":[{"epoch":60,"open":1,"high":2,"low":0.5,"close":1.5},{"epoch":120,"open":"x"}]}"#;
        match parse_message(msg).unwrap() {
            Some(InboundEvent::History { instrument, candles }) => {
                assert_eq!(instrument, "R_50");
                assert_eq!(candles.len(), 1);
                assert_eq!(candles[0].close, 1.5);
            }
            other => panic!("expected history, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_contract_numeric_id_and_inference() {
        let msg = r#"{"msg_type":"proposal_open_contract","proposal_open_contract":
            {"contract_id":123456,"is_sold":1,"profit":0,"buy_price":"10","sell_price":"19.5"}}"#;
        match parse_message(msg).unwrap() {
            Some(InboundEvent::Contract(ev)) => {
                assert_eq!(ev.external_id, "123456");
                assert_eq!(ev.status, SettlementStatus::Won);
                assert_eq!(ev.profit, 9.5);
            }
            other => panic!("expected contract, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_open_contract_is_pending() {
        let msg = r#"{"msg_type":"proposal_open_contract","proposal_open_contract":
            {"contract_id":"77","is_sold":0,"status":"open","profit":0.4,"buy_price":1}}"#;
        match parse_message(msg).unwrap() {
            Some(InboundEvent::Contract(ev)) => assert_eq!(ev.status, SettlementStatus::Pending),
            other => panic!("expected contract, got {:?}", other),
        }
        let ack = r#"{"msg_type":"proposal_open_contract","proposal_open_contract":{}}"#;
        assert_eq!(parse_message(ack).unwrap(), None);
    }

    #[test]
    fn test_parse_error_wins_over_body() {
        let msg = r#"{"msg_type":"buy","error":{"code":"RateLimit","message":"slow down"}}"#;
        assert_eq!(
            parse_message(msg).unwrap(),
            Some(InboundEvent::VenueError { code: "RateLimit".into(), message: "slow down".into(), msg_type: "buy".into() })
        );
    }

    #[test]
    fn test_parse_buy_balance_and_unknown() {
        let buy = r#"{"msg_type":"buy","buy":{"contract_id":"42","buy_price":1}}"#;
        assert_eq!(
            parse_message(buy).unwrap(),
            Some(InboundEvent::BuyAccepted { contract_id: "42".into(), buy_price: 1.0 })
        );
        let bal = r#"{"msg_type":"balance","balance":{"balance":"250.5","currency":"USD"}}"#;
        assert_eq!(
            parse_message(bal).unwrap(),
            Some(InboundEvent::Balance { balance: 250.5, currency: "USD".into() })
        );
        assert_eq!(parse_message(r#"{"msg_type":"ping","ping":"pong"}"#).unwrap(), None);
        assert!(parse_message("not json").is_err());
    }
}
