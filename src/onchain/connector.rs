// =============================================================================
// On-Chain Price Connector — facade with per-symbol exchange-feed failover
// =============================================================================
//
// Wires pool discovery, the multicall price stream, and the per-symbol
// failover machines together. Fallback prices come from C1's snapshot buffer
// (a peer feed, not a downstream consumer). Discovery re-runs on its
// configured interval; `refresh_pools` forces a pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::market_data::MarketDataDriver;
use crate::onchain::failover::{PriceSource, SymbolFailover};
use crate::onchain::pool_discovery::{PoolDiscovery, PoolInfo};
use crate::onchain::price_stream::{next_interval_ms, PriceStreamer};
use crate::runtime_config::OnchainConfig;
use crate::types::{now_ms, SystemStatus};

/// Full price record returned by `get_price_data`.
#[derive(Debug, Clone, Serialize)]
pub struct PriceData {
    pub symbol: String,
    pub price: f64,
    /// "onchain" or "fallback".
    pub source: String,
    pub is_fallback: bool,
    pub timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolInfo>,
    pub anomaly: bool,
}

/// Operator-facing connector status.
#[derive(Debug, Clone, Serialize)]
pub struct OnchainStatus {
    pub status: SystemStatus,
    pub enabled: bool,
    pub pools_discovered: usize,
    pub symbols_on_fallback: Vec<String>,
    pub recovery_attempts: HashMap<String, u32>,
    pub last_round_ms: f64,
    pub last_discovery_ms: i64,
}

/// The C2 on-chain price connector.
pub struct OnchainPriceConnector {
    config: OnchainConfig,
    symbols: Vec<String>,
    discovery: PoolDiscovery,
    streamer: PriceStreamer,
    driver: Arc<MarketDataDriver>,

    pools: RwLock<HashMap<String, PoolInfo>>,
    failover: RwLock<HashMap<String, SymbolFailover>>,
    status: RwLock<SystemStatus>,
    last_round_ms: RwLock<f64>,
    last_discovery_ms: RwLock<i64>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl OnchainPriceConnector {
    pub fn new(
        config: OnchainConfig,
        symbols: Vec<String>,
        driver: Arc<MarketDataDriver>,
    ) -> Result<Arc<Self>> {
        let discovery = PoolDiscovery::new(config.clone())?;
        let streamer = PriceStreamer::new(config.clone())?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut failover = HashMap::new();
        for symbol in &symbols {
            failover.insert(symbol.clone(), SymbolFailover::new());
        }

        Ok(Arc::new(Self {
            config,
            symbols,
            discovery,
            streamer,
            driver,
            pools: RwLock::new(HashMap::new()),
            failover: RwLock::new(failover),
            status: RwLock::new(SystemStatus::Idle),
            last_round_ms: RwLock::new(0.0),
            last_discovery_ms: RwLock::new(0),
            shutdown_tx,
            shutdown_rx,
        }))
    }

    /// Discover pools and launch the streaming + discovery-refresh loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            info!("on-chain connector disabled, all symbols on exchange feed");
            *self.status.write() = SystemStatus::Stopped;
            return Ok(());
        }

        *self.status.write() = SystemStatus::Starting;
        self.refresh_pools().await;

        let connector = self.clone();
        tokio::spawn(async move {
            connector.run_stream_loop().await;
        });

        let connector = self.clone();
        tokio::spawn(async move {
            connector.run_discovery_loop().await;
        });

        *self.status.write() = SystemStatus::Running;
        info!(pools = self.pools.read().len(), "on-chain connector running");
        Ok(())
    }

    pub fn stop(&self) {
        *self.status.write() = SystemStatus::Stopping;
        let _ = self.shutdown_tx.send(true);
        *self.status.write() = SystemStatus::Stopped;
    }

    // -------------------------------------------------------------------------
    // Public price contract
    // -------------------------------------------------------------------------

    /// Current price for a symbol ("BTC" and "BTCUSDT" both accepted).
    pub fn get_price(&self, symbol: &str) -> Option<f64> {
        self.get_price_data(symbol).map(|d| d.price)
    }

    /// Full price record with source attribution.
    pub fn get_price_data(&self, symbol: &str) -> Option<PriceData> {
        let pair = normalize_pair(symbol);

        let on_fallback = self
            .failover
            .read()
            .get(&pair)
            .map(|f| f.is_fallback())
            .unwrap_or(true);

        if !on_fallback {
            if let Some(obs) = self.streamer.cached(&pair) {
                let pool = self.pools.read().get(&pair).cloned();
                return Some(PriceData {
                    symbol: pair,
                    price: obs.price,
                    source: PriceSource::OnchainPrimary.to_string(),
                    is_fallback: false,
                    timestamp_ms: obs.timestamp_ms,
                    pool,
                    anomaly: obs.anomaly,
                });
            }
            // Cache miss while primary — serve the fallback transparently.
            debug!(symbol = %pair, "onchain cache miss, serving exchange feed");
        }

        let snapshot = self.driver.get_latest_snapshot(&pair)?;
        Some(PriceData {
            symbol: pair,
            price: snapshot.price,
            source: PriceSource::Fallback.to_string(),
            is_fallback: true,
            timestamp_ms: snapshot.timestamp,
            pool: None,
            anomaly: snapshot.is_anomaly,
        })
    }

    /// Prices for every tracked symbol that has one available.
    pub fn get_all_prices(&self) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        for symbol in &self.symbols {
            if let Some(price) = self.get_price(symbol) {
                out.insert(symbol.clone(), price);
            }
        }
        out
    }

    /// Force a discovery pass now (also used by the interval loop).
    pub async fn refresh_pools(&self) {
        let discovered = self.discovery.discover_all(&self.symbols).await;
        *self.last_discovery_ms.write() = now_ms();
        if discovered.is_empty() {
            warn!("pool discovery found nothing, relying on exchange feed");
        }
        *self.pools.write() = discovered;
    }

    pub fn get_system_status(&self) -> OnchainStatus {
        let failover = self.failover.read();
        let symbols_on_fallback: Vec<String> = failover
            .iter()
            .filter(|(_, f)| f.is_fallback())
            .map(|(s, _)| s.clone())
            .collect();
        let recovery_attempts = failover
            .iter()
            .map(|(s, f)| (s.clone(), f.recovery_attempts))
            .collect();

        OnchainStatus {
            status: *self.status.read(),
            enabled: self.config.enabled,
            pools_discovered: self.pools.read().len(),
            symbols_on_fallback,
            recovery_attempts,
            last_round_ms: *self.last_round_ms.read(),
            last_discovery_ms: *self.last_discovery_ms.read(),
        }
    }

    // -------------------------------------------------------------------------
    // Loops
    // -------------------------------------------------------------------------

    async fn run_stream_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let round_start = Instant::now();
            let pools = self.pools.read().clone();

            match self.streamer.fetch_round(&pools).await {
                Ok(results) => {
                    let round_ms = round_start.elapsed().as_secs_f64() * 1000.0;
                    self.apply_round(&pools, &results, now_ms(), round_ms);
                }
                Err(e) => {
                    // The whole batch failed — every pooled symbol records a
                    // failure.
                    warn!(error = %e, "multicall round failed");
                    let now = now_ms();
                    let mut failover = self.failover.write();
                    for symbol in pools.keys() {
                        if let Some(state) = failover.get_mut(symbol) {
                            state.on_read_failure(now);
                        }
                    }
                }
            }

            self.run_failover_maintenance(&pools).await;

            let interval = next_interval_ms(*self.last_round_ms.read());
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(interval)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("price stream loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Apply one round of results to the cache and failover machines.
    fn apply_round(
        &self,
        pools: &HashMap<String, PoolInfo>,
        results: &HashMap<String, Option<f64>>,
        now: i64,
        round_ms: f64,
    ) {
        *self.last_round_ms.write() = round_ms;
        let mut failover = self.failover.write();

        for (symbol, result) in results {
            let Some(pool) = pools.get(symbol) else {
                continue;
            };
            let state = failover.entry(symbol.clone()).or_default();
            match result {
                Some(price) => {
                    let obs = self.streamer.record(symbol, pool, *price, now, round_ms);
                    if obs.anomaly {
                        warn!(symbol = %symbol, price = price, "on-chain price flagged anomalous");
                    }
                    state.on_read_success(now);
                }
                None => {
                    state.on_read_failure(now);
                    if state.is_fallback() {
                        warn!(symbol = %symbol, "symbol switched to exchange-feed fallback");
                    }
                }
            }
        }
    }

    /// Staleness checks and recovery probes for every tracked symbol.
    async fn run_failover_maintenance(&self, pools: &HashMap<String, PoolInfo>) {
        let now = now_ms();

        // Staleness pass and probe-candidate collection under one lock.
        let probe_candidates: Vec<String> = {
            let mut failover = self.failover.write();
            for state in failover.values_mut() {
                state.check_staleness(now);
            }
            failover
                .iter()
                .filter(|(symbol, state)| {
                    state.ready_to_probe(now) && pools.contains_key(*symbol)
                })
                .map(|(symbol, _)| symbol.clone())
                .collect()
        };

        for symbol in probe_candidates {
            let Some(pool) = pools.get(&symbol) else {
                continue;
            };
            info!(symbol = %symbol, "probing on-chain recovery");
            let probe = self.streamer.fetch_single(&symbol, pool).await;
            let probe_at = now_ms();

            let mut failover = self.failover.write();
            if let Some(state) = failover.get_mut(&symbol) {
                match probe {
                    Ok(price) => {
                        self.streamer.record(&symbol, pool, price, probe_at, 0.0);
                        state.on_probe_result(probe_at, Some(0));
                        info!(symbol = %symbol, price, "recovered to on-chain source");
                    }
                    Err(e) => {
                        state.on_probe_result(probe_at, None);
                        debug!(symbol = %symbol, error = %e, "recovery probe failed");
                    }
                }
            }
        }
    }

    async fn run_discovery_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let interval = std::time::Duration::from_secs(self.config.pool_discovery_interval_s.max(60));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    info!("interval pool rediscovery");
                    self.refresh_pools().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Test/internal access to the failover map.
    #[cfg(test)]
    pub(crate) fn failover_state(&self, symbol: &str) -> Option<SymbolFailover> {
        self.failover.read().get(symbol).cloned()
    }
}

/// "BTC" → "BTCUSDT"; pairs pass through unchanged.
fn normalize_pair(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    if upper.ends_with("USDT") {
        upper
    } else {
        format!("{upper}USDT")
    }
}

// =============================================================================
// Tests
// =============================================================================
