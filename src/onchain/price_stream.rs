// =============================================================================
// Price Streaming — batched multicall reads with adaptive cadence
// =============================================================================
//
// One aggregate() call per round fetches V2 getReserves() or V3 slot0() for
// every selected pool. Round cadence adapts to observed latency: a fast
// round (< 500 ms) polls again in 2 s, a medium one (< 1 s) in 3 s, anything
// slower backs off to 5 s. New prices deviating more than 50% from the
// recent mean are flagged, never rejected.

use std::collections::{HashMap, VecDeque};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::onchain::pool_discovery::{PoolInfo, PoolVersion};
use crate::onchain::rpc::{self, RpcClient, SEL_GET_RESERVES, SEL_SLOT0};
use crate::runtime_config::OnchainConfig;

/// Anomaly history bounds: at most 100 entries, at most 5 minutes.
const HISTORY_MAX_ENTRIES: usize = 100;

/// A cached on-chain price observation.
#[derive(Debug, Clone, Serialize)]
pub struct OnchainPrice {
    pub symbol: String,
    pub price: f64,
    pub timestamp_ms: i64,
    pub pool_address: String,
    pub version: PoolVersion,
    pub anomaly: bool,
    pub fetch_time_ms: f64,
}

/// Streams prices for the selected pools and keeps the anomaly history.
pub struct PriceStreamer {
    rpc: RpcClient,
    config: OnchainConfig,
    cache: RwLock<HashMap<String, OnchainPrice>>,
    history: RwLock<HashMap<String, VecDeque<(i64, f64)>>>,
}

impl PriceStreamer {
    pub fn new(config: OnchainConfig) -> Result<Self> {
        let endpoints: Vec<String> = config.rpc_endpoints.iter().take(3).cloned().collect();
        let rpc = RpcClient::new(endpoints, config.rpc_timeout_s)?;
        Ok(Self {
            rpc,
            config,
            cache: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        })
    }

    /// Fetch one batched round for all pools. Returns per-symbol results;
    /// `None` marks a failed or unparseable read.
    pub async fn fetch_round(
        &self,
        pools: &HashMap<String, PoolInfo>,
    ) -> Result<HashMap<String, Option<f64>>> {
        if pools.is_empty() {
            return Ok(HashMap::new());
        }

        let mut order: Vec<&String> = pools.keys().collect();
        order.sort(); // Deterministic call order.

        let calls: Vec<(String, Vec<u8>)> = order
            .iter()
            .map(|symbol| {
                let pool = &pools[*symbol];
                let selector = match pool.version {
                    PoolVersion::V2 => SEL_GET_RESERVES.to_vec(),
                    PoolVersion::V3 { .. } => SEL_SLOT0.to_vec(),
                };
                (pool.address.clone(), selector)
            })
            .collect();

        let calldata = rpc::encode_aggregate(&calls)?;
        let ret = self
            .rpc
            .eth_call(&self.config.multicall_address, &calldata)
            .await
            .context("multicall aggregate failed")?;
        let returns = rpc::decode_aggregate(&ret)?;

        let mut out = HashMap::new();
        for (symbol, data) in order.iter().zip(returns.iter()) {
            let pool = &pools[*symbol];
            let price = parse_pool_return(&self.config, pool, symbol, data);
            if price.is_none() {
                debug!(symbol = %symbol, "pool return unparseable this round");
            }
            out.insert((*symbol).clone(), price);
        }
        Ok(out)
    }

    /// Probe a single pool — used by the failover recovery path.
    pub async fn fetch_single(&self, symbol: &str, pool: &PoolInfo) -> Result<f64> {
        let selector = match pool.version {
            PoolVersion::V2 => SEL_GET_RESERVES.to_vec(),
            PoolVersion::V3 { .. } => SEL_SLOT0.to_vec(),
        };
        let ret = self.rpc.eth_call(&pool.address, &selector).await?;
        parse_pool_return(&self.config, pool, symbol, &ret)
            .context("pool return did not yield a price")
    }

    /// Record a fresh observation: anomaly-check it, update history and
    /// cache, and return the stored record.
    pub fn record(
        &self,
        symbol: &str,
        pool: &PoolInfo,
        price: f64,
        now_ms: i64,
        fetch_time_ms: f64,
    ) -> OnchainPrice {
        let anomaly = self.is_anomalous(symbol, price, now_ms);
        self.push_history(symbol, price, now_ms);

        let observation = OnchainPrice {
            symbol: symbol.to_string(),
            price,
            timestamp_ms: now_ms,
            pool_address: pool.address.clone(),
            version: pool.version,
            anomaly,
            fetch_time_ms,
        };
        self.cache
            .write()
            .insert(symbol.to_string(), observation.clone());
        observation
    }

    pub fn cached(&self, symbol: &str) -> Option<OnchainPrice> {
        self.cache.read().get(symbol).cloned()
    }

    pub fn all_cached(&self) -> HashMap<String, OnchainPrice> {
        self.cache.read().clone()
    }

    /// A price deviating more than the configured fraction from the recent
    /// mean is anomalous. Requires at least 3 recent observations.
    pub fn is_anomalous(&self, symbol: &str, price: f64, now_ms: i64) -> bool {
        let history = self.history.read();
        let Some(entries) = history.get(symbol) else {
            return false;
        };
        let cutoff = now_ms - (self.config.price_cache_duration_s as i64) * 1000;
        let recent: Vec<f64> = entries
            .iter()
            .filter(|(ts, _)| *ts > cutoff)
            .map(|(_, p)| *p)
            .collect();
        if recent.len() < 3 {
            return false;
        }
        let mean: f64 = recent.iter().sum::<f64>() / recent.len() as f64;
        if mean <= 0.0 {
            return false;
        }
        (price - mean).abs() / mean > self.config.price_volatility_threshold
    }

    fn push_history(&self, symbol: &str, price: f64, now_ms: i64) {
        let mut history = self.history.write();
        let entries = history.entry(symbol.to_string()).or_default();
        entries.push_back((now_ms, price));

        let cutoff = now_ms - (self.config.price_cache_duration_s as i64) * 1000;
        while entries
            .front()
            .map(|(ts, _)| *ts <= cutoff)
            .unwrap_or(false)
        {
            entries.pop_front();
        }
        while entries.len() > HISTORY_MAX_ENTRIES {
            entries.pop_front();
        }
    }
}

/// Parse a pool's raw return into a price, per its DEX generation.
pub fn parse_pool_return(
    config: &OnchainConfig,
    pool: &PoolInfo,
    symbol: &str,
    data: &[u8],
) -> Option<f64> {
    let base = symbol.strip_suffix("USDT").unwrap_or(symbol);
    match pool.version {
        PoolVersion::V2 => {
            let reserve0 = rpc::decode_u256(data, 0).ok()?;
            let reserve1 = rpc::decode_u256(data, 1).ok()?;
            rpc::v2_price(
                &reserve0,
                &reserve1,
                pool.token0_is_usdt,
                config.decimals(base),
                config.usdt_decimals(),
            )
        }
        PoolVersion::V3 { .. } => {
            let sqrt_price = rpc::decode_u256(data, 0).ok()?;
            rpc::v3_price(&sqrt_price, pool.token0_is_usdt)
        }
    }
}

/// Adaptive round interval from the last round's wall time.
pub fn next_interval_ms(last_round_ms: f64) -> u64 {
    if last_round_ms < 500.0 {
        2_000
    } else if last_round_ms < 1_000.0 {
        3_000
    } else {
        5_000
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn pool_v2(token0_is_usdt: bool) -> PoolInfo {
        PoolInfo {
            address: "0x1111111111111111111111111111111111111111".into(),
            version: PoolVersion::V2,
            token0: "0xaaaa".into(),
            token1: "0xbbbb".into(),
            token0_is_usdt,
            liquidity_usdt: 10_000.0,
            liquidity_score: 0.2,
        }
    }

    fn pool_v3() -> PoolInfo {
        PoolInfo {
            address: "0x2222222222222222222222222222222222222222".into(),
            version: PoolVersion::V3 { fee_tier: 500 },
            token0: "0xaaaa".into(),
            token1: "0xbbbb".into(),
            token0_is_usdt: false,
            liquidity_usdt: 10_000.0,
            liquidity_score: 0.2,
        }
    }

    fn streamer() -> PriceStreamer {
        PriceStreamer::new(OnchainConfig::default()).unwrap()
    }

    fn word(value: &BigUint) -> [u8; 32] {
        let bytes = value.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        out
    }

    #[test]
    fn adaptive_cadence_tiers() {
        assert_eq!(next_interval_ms(100.0), 2_000);
        assert_eq!(next_interval_ms(499.9), 2_000);
        assert_eq!(next_interval_ms(600.0), 3_000);
        assert_eq!(next_interval_ms(999.9), 3_000);
        assert_eq!(next_interval_ms(1_500.0), 5_000);
    }

    #[test]
    fn v2_return_parses_to_price() {
        // 1 BTC vs 60k USDT at 18 decimals, token0 is the token.
        let mut data = Vec::new();
        data.extend_from_slice(&word(&BigUint::from(10u64).pow(18)));
        data.extend_from_slice(&word(
            &(BigUint::from(60_000u64) * BigUint::from(10u64).pow(18)),
        ));
        data.extend_from_slice(&word(&BigUint::from(0u8))); // blockTimestampLast

        let config = OnchainConfig::default();
        let price = parse_pool_return(&config, &pool_v2(false), "BTCUSDT", &data).unwrap();
        assert!((price - 60_000.0).abs() < 1e-6);
    }

    #[test]
    fn v3_return_parses_to_price() {
        let sqrt_price = BigUint::from(1u8) << 96; // price 1.0
        let mut data = Vec::new();
        data.extend_from_slice(&word(&sqrt_price));
        data.extend_from_slice(&word(&BigUint::from(0u8))); // tick etc.

        let config = OnchainConfig::default();
        let price = parse_pool_return(&config, &pool_v3(), "ETHUSDT", &data).unwrap();
        assert!((price - 1.0).abs() < 1e-9);
    }

    #[test]
    fn truncated_return_yields_none() {
        let config = OnchainConfig::default();
        assert!(parse_pool_return(&config, &pool_v2(false), "BTCUSDT", &[0u8; 16]).is_none());
    }

    #[test]
    fn anomaly_flags_large_deviation() {
        let s = streamer();
        let now = 1_700_000_000_000i64;
        let pool = pool_v2(false);
        for i in 0..5 {
            s.record("BTCUSDT", &pool, 100.0, now + i * 1000, 10.0);
        }
        // 160 is 60% above the mean of 100 — beyond the 50% threshold.
        assert!(s.is_anomalous("BTCUSDT", 160.0, now + 6_000));
        // 120 is within bounds.
        assert!(!s.is_anomalous("BTCUSDT", 120.0, now + 6_000));
    }

    #[test]
    fn anomaly_needs_history() {
        let s = streamer();
        assert!(!s.is_anomalous("BTCUSDT", 500.0, 1_700_000_000_000));
    }

    #[test]
    fn history_expires_beyond_cache_duration() {
        let s = streamer();
        let now = 1_700_000_000_000i64;
        let pool = pool_v2(false);
        for i in 0..5 {
            s.record("BTCUSDT", &pool, 100.0, now + i * 1000, 10.0);
        }
        // 6 minutes later the old entries are outside the 5-minute window.
        let later = now + 6 * 60 * 1000;
        assert!(!s.is_anomalous("BTCUSDT", 500.0, later));
    }

    #[test]
    fn record_updates_cache() {
        let s = streamer();
        let pool = pool_v2(false);
        let obs = s.record("BTCUSDT", &pool, 60_000.0, 1_700_000_000_000, 42.0);
        assert!(!obs.anomaly);
        let cached = s.cached("BTCUSDT").unwrap();
        assert!((cached.price - 60_000.0).abs() < f64::EPSILON);
        assert_eq!(cached.pool_address, pool.address);
    }
}
