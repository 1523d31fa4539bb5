//! Structured logging for the trading loop.
//!
//! One JSON object per line on stdout, mirrored into `LOG_DIR/<run_id>/`:
//! info and above go to `events.jsonl`, trace/debug to `trace.jsonl`.
//! Domain events from the core are rendered through `log_domain_event` so that
//! no transition goes unrecorded.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::journal::DomainEvent;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,   // Ticks, candles, history
    Strategy, // Signals and gates
    Risk,     // Ladder, selectivity, breaker
    Exec,     // Dispatch and venue errors
    Settle,   // Settlement binding and terminal transitions
    System,   // Startup, shutdown, connectivity
    Audit,    // State hashes
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Strategy => "strategy",
            Domain::Risk => "risk",
            Domain::Exec => "exec",
            Domain::Settle => "settle",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    run_dir: PathBuf,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_log(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_log(run_dir.join("events.jsonl")),
            trace: open_log(run_dir.join("trace.jsonl")),
            run_id,
            run_dir,
        }
    })
}

/// Directory of the current run, created on first use.
pub fn run_dir() -> PathBuf {
    ensure_run_context().run_dir.clone()
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["token", "authorize", "authorization", "Authorization", "api_token"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["local_id", "external_id", "instrument", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

/// Flush both run files. Called on shutdown.
pub fn flush() {
    let ctx = ensure_run_context();
    for writer in [&ctx.events, &ctx.trace] {
        if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Domain events
// =============================================================================

/// Payload of a domain event as a flat field map.
pub fn event_fields(event: &DomainEvent) -> Map<String, Value> {
    match serde_json::to_value(event) {
        Ok(Value::Object(mut m)) => match m.remove("data") {
            Some(Value::Object(data)) => data,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

pub fn log_domain_event(event: &DomainEvent) {
    let counter = match event {
        DomainEvent::OrderSettled { won: true, .. } => "order_won",
        DomainEvent::OrderSettled { won: false, .. } => "order_lost",
        other => other.name(),
    };
    agg_increment(counter);
    log(event.level(), event.domain(), event.name(), event_fields(event));
}

pub fn log_session_summary(dispatched: u64, won: u64, lost: u64, balance: Option<f64>, state_hash: &str) {
    log(
        Level::Info,
        Domain::System,
        "session_summary",
        obj(&[
            ("dispatched", json!(dispatched)),
            ("won", json!(won)),
            ("lost", json!(lost)),
            ("balance", balance.map(v_num).unwrap_or(Value::Null)),
            ("state_hash", v_str(state_hash)),
        ]),
    );
}

// =============================================================================
// Helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Log Aggregator for Periodic Summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    dispatched: u64,
    won: u64,
    lost: u64,
    timeouts: u64,
    rejected: u64,
    foreign: u64,
}

struct LogAggregator {
    counters: Counters,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            counters: Counters::default(),
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    fn increment(&mut self, event: &str) {
        let c = &mut self.counters;
        match event {
            "order_dispatched" => c.dispatched += 1,
            "order_won" => c.won += 1,
            "order_lost" => c.lost += 1,
            "order_timed_out" => c.timeouts += 1,
            "order_rejected" => c.rejected += 1,
            "foreign_settlement" => c.foreign += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<Counters> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            let result = self.counters;
            self.counters = Counters::default();
            self.last_flush = Instant::now();
            Some(result)
        } else {
            None
        }
    }
}

/// Call periodically to emit aggregated stats
pub fn tick_aggregator() {
    if let Ok(mut agg) = get_aggregator().lock() {
        if let Some(c) = agg.maybe_flush() {
            log(
                Level::Info,
                Domain::System,
                "aggregated_stats",
                obj(&[
                    ("dispatched", json!(c.dispatched)),
                    ("won", json!(c.won)),
                    ("lost", json!(c.lost)),
                    ("timeouts", json!(c.timeouts)),
                    ("rejected", json!(c.rejected)),
                    ("foreign", json!(c.foreign)),
                ]),
            );
        }
    }
}

/// Increment a counter in the aggregator. Settlements count per outcome.
pub fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_secrets_are_redacted() {
        let m = sanitize_fields(obj(&[("token", v_str("abc")), ("stake", v_num(1.0))]));
        assert_eq!(m["token"], "[REDACTED]");
        assert_eq!(m["stake"], 1.0);
    }

    #[test]
    fn test_split_promotes_order_ids() {
        let (top, data) = split_fields(obj(&[("local_id", v_str("CID-X-1-0")), ("profit", v_num(2.0))]));
        assert_eq!(top["local_id"], "CID-X-1-0");
        assert!(data.contains_key("profit"));
        assert!(!data.contains_key("local_id"));
    }

    #[test]
    fn test_event_fields_unwraps_payload() {
        let ev = DomainEvent::LadderAdvanced { level: 2, stake: 3.0 };
        let f = event_fields(&ev);
        assert_eq!(f["level"], 2);
        assert_eq!(f["stake"], 3.0);
        assert!(event_fields(&DomainEvent::EngineStarted).is_empty());
    }

    #[test]
    fn test_aggregator_counts_outcomes() {
        let mut agg = LogAggregator::new();
        agg.increment("order_dispatched");
        agg.increment("order_won");
        agg.increment("foreign_settlement");
        agg.increment("gate_blocked");
        assert_eq!(agg.counters.dispatched, 1);
        assert_eq!(agg.counters.won, 1);
        assert_eq!(agg.counters.foreign, 1);
        agg.flush_interval_secs = 0;
        assert!(agg.maybe_flush().is_some());
        assert_eq!(agg.counters, Counters::default());
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
