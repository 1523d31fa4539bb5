use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use traderking::clock::{Clock, SystemClock};
use traderking::config::Config;
use traderking::engine::{Engine, EngineOutput};
use traderking::exchange::{DerivVenue, SimVenue, Venue};
use traderking::journal::JournalWriter;
use traderking::logging::{self, log, log_domain_event, log_session_summary, obj, v_num, v_str, Domain, Level};
use traderking::storage::{HttpTradeSink, SqliteTradeStore, TradeSink};
use traderking::strategy::Direction;

struct Runtime {
    venue: Arc<dyn Venue>,
    sinks: Vec<Arc<dyn TradeSink>>,
    journal: Option<JournalWriter>,
    clock: Arc<dyn Clock>,
}

impl Runtime {
    /// Journal and log every event, send commands in order, spawn record writes.
    async fn apply(&self, out: EngineOutput) {
        for ev in &out.events {
            log_domain_event(ev);
            if let Some(journal) = &self.journal {
                if let Err(e) = journal.write(self.clock.now_ms(), ev) {
                    log(Level::Error, Domain::Audit, "journal_write_failed", obj(&[("error", v_str(&e.to_string()))]));
                }
            }
        }
        for cmd in &out.commands {
            if let Err(e) = self.venue.execute(cmd).await {
                log(
                    Level::Error,
                    Domain::Exec,
                    "venue_send_failed",
                    obj(&[("command", v_str(cmd.name())), ("error", v_str(&e.to_string()))]),
                );
            }
        }
        for record in out.records {
            for sink in &self.sinks {
                let sink = sink.clone();
                let record = record.clone();
                tokio::spawn(async move {
                    if let Err(e) = sink.upsert(&record).await {
                        log(
                            Level::Warn,
                            Domain::Settle,
                            "trade_persist_failed",
                            obj(&[("contract_id", v_str(&record.contract_id)), ("error", v_str(&e.to_string()))]),
                        );
                    }
                });
            }
        }
    }
}

fn build_sinks(cfg: &Config) -> Vec<Arc<dyn TradeSink>> {
    let mut sinks: Vec<Arc<dyn TradeSink>> = Vec::new();
    if let Some(path) = &cfg.trades_db {
        match SqliteTradeStore::new(path) {
            Ok(store) => sinks.push(Arc::new(store)),
            Err(e) => log(Level::Error, Domain::System, "trade_store_open_failed", obj(&[("error", v_str(&e.to_string()))])),
        }
    }
    if let Some(url) = &cfg.trades_url {
        match HttpTradeSink::new(url.clone()) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => log(Level::Error, Domain::System, "trade_sink_build_failed", obj(&[("error", v_str(&e.to_string()))])),
        }
    }
    sinks
}

/// Operator console: `call`, `put`, `stop`, `start`, `switch <symbol>`.
fn spawn_console(tx: mpsc::UnboundedSender<String>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line.trim().to_string()).is_err() {
                break;
            }
        }
    });
}

fn operator_action(engine: &mut Engine, line: &str) -> EngineOutput {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("switch"), Some(symbol)) => engine.switch_instrument(symbol),
        (Some("stop"), None) => engine.stop(),
        (Some("start"), None) => engine.start(),
        (Some(word), None) => match Direction::parse(word) {
            Some(direction) => engine.manual_trade(direction),
            None => EngineOutput::default(),
        },
        _ => EngineOutput::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();

    let venue: Arc<dyn Venue> = match &cfg.api_token {
        Some(token) => Arc::new(DerivVenue::connect(&cfg, token, inbound_tx.clone()).await?),
        None => Arc::new(SimVenue::start(&cfg, clock.clone(), inbound_tx.clone())),
    };

    let journal = match JournalWriter::new(&logging::run_dir().join("journal.jsonl")) {
        Ok(j) => Some(j),
        Err(e) => {
            log(Level::Error, Domain::System, "journal_open_failed", obj(&[("error", v_str(&e.to_string()))]));
            None
        }
    };

    let instance_id = cfg.instance_id.clone();
    let runtime = Runtime { venue, sinks: build_sinks(&cfg), journal, clock: clock.clone() };
    let mut engine = Engine::new(cfg, clock.clone());

    log(
        Level::Info,
        Domain::System,
        "boot",
        obj(&[
            ("venue", v_str(runtime.venue.name())),
            ("instrument", v_str(engine.instrument())),
            ("instance_id", v_str(&instance_id)),
            ("modules", v_str(&engine.modules().join(","))),
            ("base_stake", v_num(engine.reconciler().risk().config().base_stake)),
            ("sinks", v_num(runtime.sinks.len() as f64)),
        ]),
    );

    let (console_tx, mut console_rx) = mpsc::unbounded_channel();
    spawn_console(console_tx);

    runtime.apply(engine.start()).await;

    let mut timer = interval(Duration::from_secs(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(ev) = inbound_rx.recv() => {
                let out = engine.handle(ev);
                runtime.apply(out).await;
            }
            Some(line) = console_rx.recv() => {
                let out = operator_action(&mut engine, &line);
                runtime.apply(out).await;
            }
            _ = timer.tick() => {
                let out = engine.on_timer();
                runtime.apply(out).await;
                logging::tick_aggregator();
            }
            _ = &mut shutdown => break,
        }
    }

    runtime.apply(engine.stop()).await;
    let stats = engine.stats();
    log_session_summary(
        stats.dispatched,
        stats.won,
        stats.lost,
        engine.reconciler().risk().balance(),
        &engine.reconciler().state_hash(),
    );
    if let Some(journal) = &runtime.journal {
        let _ = journal.flush();
    }
    logging::flush();
    Ok(())
}
