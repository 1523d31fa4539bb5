//! Trade record persistence.
//!
//! Records are upserted by contract id: once as PENDING when the order is
//! bound, again on the terminal transition. Last write wins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Venue id, or the local id for orders that never bound.
    pub contract_id: String,
    pub local_id: String,
    pub strategy: String,
    pub instrument: String,
    pub direction: String,
    pub stake: f64,
    pub profit: f64,
    pub status: String,
    pub indicator_snapshot: serde_json::Value,
    pub instance_id: String,
    pub device_name: String,
    pub ts_ms: u64,
}

#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn upsert(&self, record: &TradeRecord) -> Result<()>;
}

// =============================================================================
// SQLite
// =============================================================================

/// Default bound on one HTTP upsert, connect included.
pub const HTTP_SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct SqliteTradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTradeStore {
    pub fn new(path: &str) -> Result<Self> {
        let store = Self { conn: Arc::new(Mutex::new(Connection::open(path)?)) };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("trade store lock poisoned"))
    }

    fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS trades (
                contract_id TEXT PRIMARY KEY,
                local_id TEXT NOT NULL,
                strategy TEXT NOT NULL,
                instrument TEXT NOT NULL,
                direction TEXT NOT NULL,
                stake REAL NOT NULL,
                profit REAL NOT NULL,
                status TEXT NOT NULL,
                indicator_snapshot TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                device_name TEXT NOT NULL,
                ts_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS trades_instance_ts ON trades (instance_id, ts_ms);
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn upsert_sync(&self, r: &TradeRecord) -> Result<()> {
        let snapshot = serde_json::to_string(&r.indicator_snapshot)?;
        self.conn()?.execute(
            "INSERT INTO trades (contract_id, local_id, strategy, instrument, direction, stake, profit, status,
                                 indicator_snapshot, instance_id, device_name, ts_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(contract_id) DO UPDATE SET
                local_id = excluded.local_id,
                strategy = excluded.strategy,
                instrument = excluded.instrument,
                direction = excluded.direction,
                stake = excluded.stake,
                profit = excluded.profit,
                status = excluded.status,
                indicator_snapshot = excluded.indicator_snapshot,
                instance_id = excluded.instance_id,
                device_name = excluded.device_name,
                ts_ms = excluded.ts_ms",
            params![
                r.contract_id,
                r.local_id,
                r.strategy,
                r.instrument,
                r.direction,
                r.stake,
                r.profit,
                r.status,
                snapshot,
                r.instance_id,
                r.device_name,
                r.ts_ms as i64
            ],
        )?;
        Ok(())
    }

    /// Settled trades of one instance, newest first.
    pub fn recent(&self, instance_id: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT contract_id, local_id, strategy, instrument, direction, stake, profit, status,
                    indicator_snapshot, instance_id, device_name, ts_ms
             FROM trades
             WHERE instance_id = ?1 AND status != 'PENDING'
             ORDER BY ts_ms DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![instance_id, limit as i64], |row| {
            let snapshot: String = row.get(8)?;
            let ts_ms: i64 = row.get(11)?;
            Ok(TradeRecord {
                contract_id: row.get(0)?,
                local_id: row.get(1)?,
                strategy: row.get(2)?,
                instrument: row.get(3)?,
                direction: row.get(4)?,
                stake: row.get(5)?,
                profit: row.get(6)?,
                status: row.get(7)?,
                indicator_snapshot: serde_json::from_str(&snapshot).unwrap_or(serde_json::Value::Null),
                instance_id: row.get(9)?,
                device_name: row.get(10)?,
                ts_ms: ts_ms.max(0) as u64,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[async_trait]
impl TradeSink for SqliteTradeStore {
    /// Runs on the blocking pool so a slow disk never stalls the event loop.
    async fn upsert(&self, record: &TradeRecord) -> Result<()> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.upsert_sync(&record)).await?
    }
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpTradeSink {
    client: Client,
    url: String,
}

impl HttpTradeSink {
    pub fn new(url: String) -> Result<Self> {
        Self::with_timeout(url, HTTP_SINK_TIMEOUT)
    }

    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).connect_timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl TradeSink for HttpTradeSink {
    async fn upsert(&self, record: &TradeRecord) -> Result<()> {
        let resp = self.client.post(&self.url).json(record).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("trade upsert failed: {} {}", status, body));
        }
        Ok(())
    }
}
