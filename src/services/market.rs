//! Market data operations
//!
//! Quotes, depth, historical bars, and everything served from the symbol
//! master: lookup, search, instrument listings, expiries, and the options
//! calculations (synthetic future, chain, greeks).
//!
//! The symbol index is read-mostly: lookups take a cheap clone of the
//! current `Arc`, and a master refresh builds a whole new map and swaps it
//! in one write.

use super::Services;
use crate::domain::entities::market::{HistoricalBar, MarketDepth, Quote};
use crate::domain::entities::symbol::SymbolInfo;
use crate::domain::errors::{CoreError, Result};
use crate::persistence::history::HistoryStore;
use crate::persistence::symbols::SymbolRepository;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Supported bar intervals
pub const INTERVALS: &[&str] = &["1m", "3m", "5m", "10m", "15m", "30m", "1h", "1d"];

/// Copy-on-write index over the symbol master, keyed by (exchange, symbol)
pub struct SymbolIndex {
    map: RwLock<Arc<HashMap<(String, String), SymbolInfo>>>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// O(1) average lookup
    pub fn lookup(&self, exchange: &str, symbol: &str) -> Option<SymbolInfo> {
        let map = self.map.read().clone();
        map.get(&(exchange.to_string(), symbol.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole index in one swap
    pub fn rebuild(&self, symbols: &[SymbolInfo]) {
        let mut fresh = HashMap::with_capacity(symbols.len());
        for s in symbols {
            fresh.insert((s.exchange.clone(), s.symbol.clone()), s.clone());
        }
        *self.map.write() = Arc::new(fresh);
    }
}

impl Default for SymbolIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyntheticFuture {
    pub underlying: String,
    pub exchange: String,
    pub expiry: String,
    pub strike: f64,
    pub call_price: f64,
    pub put_price: f64,
    /// strike + call - put
    pub synthetic_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionChainRow {
    pub strike: f64,
    pub call_symbol: Option<String>,
    pub call_ltp: Option<f64>,
    pub put_symbol: Option<String>,
    pub put_ltp: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

impl Services {
    // ---- quotes and depth ------------------------------------------------

    pub async fn quotes(&self, symbols: Vec<(String, String)>) -> Result<Vec<Quote>> {
        let (broker, session) = self.resolve_active()?;
        self.read_with_retry(|| broker.get_quotes(&session.auth_token, &symbols))
            .await
    }

    pub async fn quote(&self, exchange: &str, symbol: &str) -> Result<Quote> {
        let quotes = self
            .quotes(vec![(exchange.to_string(), symbol.to_string())])
            .await?;
        quotes
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::NotFound(format!("{}:{}", exchange, symbol)))
    }

    pub async fn market_depth(&self, exchange: &str, symbol: &str) -> Result<MarketDepth> {
        let (broker, session) = self.resolve_active()?;
        self.read_with_retry(|| broker.get_market_depth(&session.auth_token, exchange, symbol))
            .await
    }

    // ---- symbol master ---------------------------------------------------

    /// Download the master contract from the active broker, persist it, and
    /// swap the in-memory index.
    pub async fn refresh_symbol_master(&self) -> Result<usize> {
        let (broker, session) = self.resolve_active()?;
        let master = self
            .with_deadline_of(
                self.deadlines.master_download,
                broker.download_master_contract(&session.auth_token),
            )
            .await?;

        SymbolRepository::new(self.pool.clone())
            .replace_all(&master)
            .await?;
        self.symbols.rebuild(&master);

        info!("symbol index rebuilt with {} instruments", master.len());
        Ok(master.len())
    }

    /// Populate the index from the store, e.g. at startup
    pub async fn load_symbol_index(&self) -> Result<usize> {
        let all = SymbolRepository::new(self.pool.clone()).all().await?;
        self.symbols.rebuild(&all);
        Ok(all.len())
    }

    pub fn symbol(&self, exchange: &str, symbol: &str) -> Result<SymbolInfo> {
        self.symbols
            .lookup(exchange, symbol)
            .ok_or_else(|| CoreError::NotFound(format!("symbol {}:{}", exchange, symbol)))
    }

    pub async fn search_symbols(
        &self,
        query: &str,
        exchange: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SymbolInfo>> {
        SymbolRepository::new(self.pool.clone())
            .search(query, exchange, limit)
            .await
    }

    pub async fn instruments(&self, exchange: Option<&str>) -> Result<Vec<SymbolInfo>> {
        let all = SymbolRepository::new(self.pool.clone()).all().await?;
        Ok(match exchange {
            Some(exchange) => all.into_iter().filter(|s| s.exchange == exchange).collect(),
            None => all,
        })
    }

    pub async fn expiry_dates(
        &self,
        symbol: &str,
        exchange: &str,
        instrument_type: &str,
    ) -> Result<Vec<String>> {
        SymbolRepository::new(self.pool.clone())
            .expiry_dates(symbol, exchange, instrument_type)
            .await
    }

    pub fn intervals(&self) -> Vec<String> {
        INTERVALS.iter().map(|s| s.to_string()).collect()
    }

    // ---- history ---------------------------------------------------------

    /// Bars from the analytical store
    pub async fn history(
        &self,
        symbol: &str,
        exchange: &str,
        interval: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<HistoricalBar>> {
        if !INTERVALS.contains(&interval) {
            return Err(CoreError::PayloadInvalid(format!(
                "unsupported interval '{}'",
                interval
            )));
        }
        let store: Arc<HistoryStore> = self.history.clone();
        let (symbol, exchange, interval) =
            (symbol.to_string(), exchange.to_string(), interval.to_string());
        tokio::task::spawn_blocking(move || store.query(&symbol, &exchange, &interval, from, to))
            .await
            .map_err(|e| CoreError::internal(format!("history task failed: {}", e)))?
    }

    pub async fn ingest_history(
        &self,
        symbol: &str,
        exchange: &str,
        interval: &str,
        bars: Vec<HistoricalBar>,
    ) -> Result<usize> {
        let store: Arc<HistoryStore> = self.history.clone();
        let (symbol, exchange, interval) =
            (symbol.to_string(), exchange.to_string(), interval.to_string());
        tokio::task::spawn_blocking(move || store.ingest(&symbol, &exchange, &interval, &bars))
            .await
            .map_err(|e| CoreError::internal(format!("history task failed: {}", e)))?
    }

    // ---- options ---------------------------------------------------------

    /// Resolve the traded option symbol for (underlying, expiry, strike, CE|PE)
    pub async fn option_symbol(
        &self,
        underlying: &str,
        exchange: &str,
        expiry: &str,
        strike: f64,
        option_type: &str,
    ) -> Result<SymbolInfo> {
        let all = SymbolRepository::new(self.pool.clone()).all().await?;
        all.into_iter()
            .find(|s| {
                s.name == underlying
                    && s.exchange == exchange
                    && s.expiry.as_deref() == Some(expiry)
                    && s.strike == Some(strike)
                    && s.option_type.as_deref() == Some(option_type)
            })
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "option {} {} {} {}",
                    underlying, expiry, strike, option_type
                ))
            })
    }

    /// Option chain for one expiry, quotes attached where available
    pub async fn option_chain(
        &self,
        underlying: &str,
        exchange: &str,
        expiry: &str,
    ) -> Result<Vec<OptionChainRow>> {
        let all = SymbolRepository::new(self.pool.clone()).all().await?;
        let options: Vec<SymbolInfo> = all
            .into_iter()
            .filter(|s| {
                s.name == underlying
                    && s.exchange == exchange
                    && s.expiry.as_deref() == Some(expiry)
                    && s.strike.is_some()
            })
            .collect();

        if options.is_empty() {
            return Err(CoreError::NotFound(format!(
                "no options for {} {} {}",
                underlying, exchange, expiry
            )));
        }

        let pairs: Vec<(String, String)> = options
            .iter()
            .map(|s| (s.exchange.clone(), s.symbol.clone()))
            .collect();
        let quotes = self.quotes(pairs).await.unwrap_or_default();
        let ltp_of = |symbol: &str| quotes.iter().find(|q| q.symbol == symbol).map(|q| q.ltp);

        let mut by_strike: HashMap<u64, OptionChainRow> = HashMap::new();
        for option in &options {
            let strike = option.strike.expect("filtered on strike");
            let row = by_strike
                .entry(strike.to_bits())
                .or_insert_with(|| OptionChainRow {
                    strike,
                    call_symbol: None,
                    call_ltp: None,
                    put_symbol: None,
                    put_ltp: None,
                });
            match option.option_type.as_deref() {
                Some("CE") => {
                    row.call_ltp = ltp_of(&option.symbol);
                    row.call_symbol = Some(option.symbol.clone());
                }
                Some("PE") => {
                    row.put_ltp = ltp_of(&option.symbol);
                    row.put_symbol = Some(option.symbol.clone());
                }
                _ => {}
            }
        }

        let mut rows: Vec<OptionChainRow> = by_strike.into_values().collect();
        rows.sort_by(|a, b| a.strike.total_cmp(&b.strike));
        Ok(rows)
    }

    /// Synthetic future at the strike closest to spot: strike + call - put
    pub async fn synthetic_future(
        &self,
        underlying: &str,
        exchange: &str,
        expiry: &str,
    ) -> Result<SyntheticFuture> {
        let spot = self.quote(exchange, underlying).await.map(|q| q.ltp).ok();
        let chain = self.option_chain(underlying, exchange, expiry).await?;

        let complete: Vec<&OptionChainRow> = chain
            .iter()
            .filter(|row| row.call_ltp.is_some() && row.put_ltp.is_some())
            .collect();
        let at_the_money = match spot {
            Some(spot) => complete
                .iter()
                .min_by(|a, b| (a.strike - spot).abs().total_cmp(&(b.strike - spot).abs())),
            None => complete.first(),
        }
        .copied()
        .ok_or_else(|| {
            CoreError::NotFound(format!(
                "no quoted strike pair for {} {} {}",
                underlying, exchange, expiry
            ))
        })?;

        let call_price = at_the_money.call_ltp.expect("filtered");
        let put_price = at_the_money.put_ltp.expect("filtered");
        Ok(SyntheticFuture {
            underlying: underlying.to_string(),
            exchange: exchange.to_string(),
            expiry: expiry.to_string(),
            strike: at_the_money.strike,
            call_price,
            put_price,
            synthetic_price: at_the_money.strike + call_price - put_price,
        })
    }

    /// Black-Scholes greeks for a European option
    pub fn option_greeks(
        &self,
        spot: f64,
        strike: f64,
        days_to_expiry: f64,
        volatility: f64,
        risk_free_rate: f64,
        is_call: bool,
    ) -> Result<OptionGreeks> {
        if spot <= 0.0 || strike <= 0.0 || days_to_expiry <= 0.0 || volatility <= 0.0 {
            return Err(CoreError::PayloadInvalid(
                "spot, strike, expiry and volatility must be positive".to_string(),
            ));
        }
        Ok(black_scholes_greeks(
            spot,
            strike,
            days_to_expiry / 365.0,
            volatility,
            risk_free_rate,
            is_call,
        ))
    }
}

/// Standard normal probability density
fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation
fn norm_cdf(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.2316419 * x.abs());
    let poly = t
        * (0.319381530
            + t * (-0.356563782 + t * (1.781477937 + t * (-1.821255978 + t * 1.330274429))));
    let tail = norm_pdf(x.abs()) * poly;
    if x >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

fn black_scholes_greeks(
    spot: f64,
    strike: f64,
    years: f64,
    volatility: f64,
    rate: f64,
    is_call: bool,
) -> OptionGreeks {
    let sqrt_t = years.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * volatility * volatility) * years)
        / (volatility * sqrt_t);
    let d2 = d1 - volatility * sqrt_t;

    let delta = if is_call {
        norm_cdf(d1)
    } else {
        norm_cdf(d1) - 1.0
    };
    let gamma = norm_pdf(d1) / (spot * volatility * sqrt_t);
    let vega = spot * norm_pdf(d1) * sqrt_t / 100.0;
    let discount = (-rate * years).exp();
    let theta = if is_call {
        (-spot * norm_pdf(d1) * volatility / (2.0 * sqrt_t)
            - rate * strike * discount * norm_cdf(d2))
            / 365.0
    } else {
        (-spot * norm_pdf(d1) * volatility / (2.0 * sqrt_t)
            + rate * strike * discount * norm_cdf(-d2))
            / 365.0
    };
    let rho = if is_call {
        strike * years * discount * norm_cdf(d2) / 100.0
    } else {
        -strike * years * discount * norm_cdf(-d2) / 100.0
    };

    OptionGreeks {
        delta,
        gamma,
        theta,
        vega,
        rho,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::sandbox_services;

    #[test]
    fn test_symbol_index_lookup_and_swap() {
        let index = SymbolIndex::new();
        assert!(index.lookup("NSE", "TCS").is_none());

        index.rebuild(&[
            SymbolInfo::equity("TCS", "NSE", "11536", "Tata Consultancy Services", 1),
            SymbolInfo::equity("RELIANCE", "NSE", "2885", "Reliance Industries", 1),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup("NSE", "TCS").unwrap().token, "11536");
        assert!(index.lookup("BSE", "TCS").is_none());

        // Rebuild fully replaces the previous map.
        index.rebuild(&[SymbolInfo::equity("INFY", "NSE", "1594", "Infosys", 1)]);
        assert_eq!(index.len(), 1);
        assert!(index.lookup("NSE", "TCS").is_none());
    }

    #[test]
    fn test_norm_cdf_symmetry() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-6);
        for x in [0.5, 1.0, 1.96, 3.0] {
            assert!((norm_cdf(x) + norm_cdf(-x) - 1.0).abs() < 1e-6);
        }
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
    }

    #[test]
    fn test_greeks_sanity() {
        // At-the-money call: delta near 0.5, positive gamma/vega, negative theta.
        let greeks = black_scholes_greeks(100.0, 100.0, 30.0 / 365.0, 0.2, 0.06, true);
        assert!(greeks.delta > 0.4 && greeks.delta < 0.7);
        assert!(greeks.gamma > 0.0);
        assert!(greeks.vega > 0.0);
        assert!(greeks.theta < 0.0);

        let put = black_scholes_greeks(100.0, 100.0, 30.0 / 365.0, 0.2, 0.06, false);
        assert!(put.delta < 0.0);
        assert!((greeks.gamma - put.gamma).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_refresh_master_builds_index() {
        let services = sandbox_services().await;
        assert!(services.symbols.is_empty());

        let count = services.refresh_symbol_master().await.unwrap();
        assert!(count >= 5);
        assert_eq!(services.symbols.len(), count);
        assert!(services.symbol("NSE", "RELIANCE").is_ok());
        assert!(services.symbol("NSE", "NOPE").is_err());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let services = sandbox_services().await;
        let bars: Vec<HistoricalBar> = (0..3)
            .map(|i| HistoricalBar {
                timestamp: 1_700_000_000 + i * 60,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 100,
            })
            .collect();

        services
            .ingest_history("TCS", "NSE", "1m", bars)
            .await
            .unwrap();
        let loaded = services
            .history("TCS", "NSE", "1m", 0, i64::MAX)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 3);

        assert!(matches!(
            services.history("TCS", "NSE", "7m", 0, 1).await,
            Err(CoreError::PayloadInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_intervals_listed() {
        let services = sandbox_services().await;
        assert!(services.intervals().contains(&"1d".to_string()));
    }
}
