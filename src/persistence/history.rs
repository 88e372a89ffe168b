//! Analytical time-series store
//!
//! An embedded columnar database for OHLCV bars, independent of the primary
//! store. Opened lazily on first ingestion or query; its transactions never
//! couple to SQLite's. All methods are blocking and must be called from a
//! blocking-work context.

use crate::domain::entities::market::HistoricalBar;
use crate::domain::errors::Result;
use duckdb::Connection;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::info;

pub struct HistoryStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl HistoryStore {
    /// Handle to the store. Nothing is opened until first use.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            conn: Mutex::new(None),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            info!("opening history store at {:?}", self.path);
            let conn = Connection::open(&self.path)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS market_data (
                    symbol VARCHAR NOT NULL,
                    exchange VARCHAR NOT NULL,
                    timeframe VARCHAR NOT NULL,
                    timestamp BIGINT NOT NULL,
                    open DOUBLE NOT NULL,
                    high DOUBLE NOT NULL,
                    low DOUBLE NOT NULL,
                    close DOUBLE NOT NULL,
                    volume BIGINT NOT NULL,
                    PRIMARY KEY (symbol, exchange, timeframe, timestamp)
                );",
            )?;
            *guard = Some(conn);
        }
        f(guard.as_ref().expect("connection opened above"))
    }

    /// Upsert a batch of bars for one (symbol, exchange, timeframe) series
    pub fn ingest(
        &self,
        symbol: &str,
        exchange: &str,
        timeframe: &str,
        bars: &[HistoricalBar],
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO market_data
                    (symbol, exchange, timeframe, timestamp, open, high, low, close, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (symbol, exchange, timeframe, timestamp) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume",
            )?;
            for bar in bars {
                stmt.execute(duckdb::params![
                    symbol,
                    exchange,
                    timeframe,
                    bar.timestamp,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                ])?;
            }
            Ok(bars.len())
        })
    }

    /// Bars in [from, to], ascending by timestamp
    pub fn query(
        &self,
        symbol: &str,
        exchange: &str,
        timeframe: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<HistoricalBar>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, open, high, low, close, volume
                 FROM market_data
                 WHERE symbol = ? AND exchange = ? AND timeframe = ?
                   AND timestamp >= ? AND timestamp <= ?
                 ORDER BY timestamp ASC",
            )?;
            let bars = stmt
                .query_map(duckdb::params![symbol, exchange, timeframe, from, to], |row| {
                    Ok(HistoricalBar {
                        timestamp: row.get(0)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(bars)
        })
    }
}
