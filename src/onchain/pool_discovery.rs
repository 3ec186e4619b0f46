// =============================================================================
// Pool Discovery — best V2/V3 pool per symbol by USDT liquidity
// =============================================================================
//
// For each symbol: query the V2 factory for a pair and the V3 factory for a
// pool at every configured fee tier, estimate USDT-equivalent liquidity for
// each candidate, and select the deepest one. Mainstream symbols accept
// liquidity >= 1 000 USDT; others require >= 5 000; the liquidity score
// interpolates linearly to 1.0 at the preferred threshold.
//
// Ownership is single-writer: only the discovery task mutates the pool map.

use std::collections::HashMap;

use anyhow::{Context, Result};
use num_bigint::BigUint;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::onchain::rpc::{
    self, RpcClient, SEL_GET_RESERVES, SEL_SLOT0, SEL_TOKEN0, ZERO_ADDRESS,
};
use crate::runtime_config::OnchainConfig;

/// DEX generation of a discovered pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoolVersion {
    V2,
    V3 { fee_tier: u32 },
}

impl std::fmt::Display for PoolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V2 => write!(f, "V2"),
            Self::V3 { fee_tier } => write!(f, "V3({fee_tier})"),
        }
    }
}

/// A selected pool binding for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct PoolInfo {
    pub address: String,
    pub version: PoolVersion,
    pub token0: String,
    pub token1: String,
    /// True when USDT is token0 — decides the price direction.
    pub token0_is_usdt: bool,
    pub liquidity_usdt: f64,
    /// [0, 1] linear interpolation between the floor and preferred liquidity.
    pub liquidity_score: f64,
}

/// Pool discovery engine. Holds no mutable pool state itself; the connector
/// owns the map and refreshes it on the discovery interval.
pub struct PoolDiscovery {
    rpc: RpcClient,
    config: OnchainConfig,
}

impl PoolDiscovery {
    pub fn new(config: OnchainConfig) -> Result<Self> {
        // Discovery runs across the first three endpoints.
        let endpoints: Vec<String> = config.rpc_endpoints.iter().take(3).cloned().collect();
        let rpc = RpcClient::new(endpoints, config.rpc_timeout_s)?;
        Ok(Self { rpc, config })
    }

    /// Discover the best pool for every supported symbol. Symbols without an
    /// acceptable pool are absent from the result (their prices come from the
    /// exchange-feed fallback).
    pub async fn discover_all(&self, symbols: &[String]) -> HashMap<String, PoolInfo> {
        let mut pools = HashMap::new();

        for pair in symbols {
            let Some(base) = pair.strip_suffix("USDT") else {
                warn!(symbol = %pair, "not a USDT pair, skipping discovery");
                continue;
            };
            match self.discover_symbol(base).await {
                Ok(Some(pool)) => {
                    info!(
                        symbol = %pair,
                        address = %pool.address,
                        version = %pool.version,
                        liquidity_usdt = pool.liquidity_usdt,
                        liquidity_score = pool.liquidity_score,
                        "pool discovered"
                    );
                    pools.insert(pair.clone(), pool);
                }
                Ok(None) => {
                    warn!(symbol = %pair, "no acceptable pool found, will use fallback feed");
                }
                Err(e) => {
                    warn!(symbol = %pair, error = %e, "pool discovery failed");
                }
            }
        }

        info!(discovered = pools.len(), "pool discovery pass complete");
        pools
    }

    /// Discover the best pool for one base symbol ("BTC", "ETH", ...).
    async fn discover_symbol(&self, base: &str) -> Result<Option<PoolInfo>> {
        let token = self
            .config
            .token_address(base)
            .with_context(|| format!("no token address configured for {base}"))?
            .to_string();

        let mut candidates = Vec::new();

        if let Some(v2) = self.find_v2_pool(&token).await? {
            candidates.push(v2);
        }
        if let Some(v3) = self.find_best_v3_pool(&token, base).await? {
            candidates.push(v3);
        }

        let Some(mut best) = candidates
            .into_iter()
            .max_by(|a, b| a.liquidity_usdt.total_cmp(&b.liquidity_usdt))
        else {
            return Ok(None);
        };

        if !self.config.is_liquidity_acceptable(best.liquidity_usdt, base) {
            warn!(
                symbol = %base,
                liquidity_usdt = best.liquidity_usdt,
                "best pool below liquidity floor, rejected"
            );
            return Ok(None);
        }

        best.liquidity_score = self.config.liquidity_score(best.liquidity_usdt);
        Ok(Some(best))
    }

    /// Query the V2 factory and estimate the pair's liquidity from reserves.
    async fn find_v2_pool(&self, token: &str) -> Result<Option<PoolInfo>> {
        let calldata = rpc::encode_get_pair(token, &self.config.usdt_address)?;
        let ret = self
            .rpc
            .eth_call(&self.config.v2_factory_address, &calldata)
            .await?;
        let pair = rpc::decode_address(&ret, 0)?;
        if is_zero_address(&pair) {
            return Ok(None);
        }

        let token0 = self.read_token0(&pair).await?;
        let token0_is_usdt = same_address(&token0, &self.config.usdt_address);
        let token1 = if token0_is_usdt {
            token.to_string()
        } else {
            self.config.usdt_address.clone()
        };

        let reserves = self.rpc.eth_call(&pair, &SEL_GET_RESERVES).await?;
        let reserve0 = rpc::decode_u256(&reserves, 0)?;
        let reserve1 = rpc::decode_u256(&reserves, 1)?;

        let usdt_reserve = if token0_is_usdt { &reserve0 } else { &reserve1 };
        // USDT side doubled approximates total pool value.
        let liquidity_usdt = rpc::raw_to_f64(usdt_reserve, self.config.usdt_decimals()) * 2.0;

        Ok(Some(PoolInfo {
            address: pair,
            version: PoolVersion::V2,
            token0,
            token1,
            token0_is_usdt,
            liquidity_usdt,
            liquidity_score: 0.0,
        }))
    }

    /// Probe every configured V3 fee tier and keep the deepest pool.
    async fn find_best_v3_pool(&self, token: &str, base: &str) -> Result<Option<PoolInfo>> {
        let mut best: Option<PoolInfo> = None;

        for &fee_tier in &self.config.v3_fee_tiers {
            match self.probe_v3_tier(token, fee_tier).await {
                Ok(Some(pool)) => {
                    let deeper = best
                        .as_ref()
                        .map(|b| pool.liquidity_usdt > b.liquidity_usdt)
                        .unwrap_or(true);
                    if deeper {
                        best = Some(pool);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(symbol = %base, fee_tier, error = %e, "V3 tier probe failed");
                }
            }
        }

        Ok(best)
    }

    async fn probe_v3_tier(&self, token: &str, fee_tier: u32) -> Result<Option<PoolInfo>> {
        let calldata = rpc::encode_get_pool(token, &self.config.usdt_address, fee_tier)?;
        let ret = self
            .rpc
            .eth_call(&self.config.v3_factory_address, &calldata)
            .await?;
        let pool = rpc::decode_address(&ret, 0)?;
        if is_zero_address(&pool) {
            return Ok(None);
        }

        // A pool with a zero sqrtPrice is uninitialised.
        let slot0 = self.rpc.eth_call(&pool, &SEL_SLOT0).await?;
        let sqrt_price = rpc::decode_u256(&slot0, 0)?;
        if sqrt_price == BigUint::from(0u8) {
            return Ok(None);
        }

        let token0 = self.read_token0(&pool).await?;
        let token0_is_usdt = same_address(&token0, &self.config.usdt_address);
        let token1 = if token0_is_usdt {
            token.to_string()
        } else {
            self.config.usdt_address.clone()
        };

        // Concentrated liquidity has no flat reserves; the pool's USDT
        // balance doubled is the production estimate.
        let balance_call = rpc::encode_balance_of(&pool)?;
        let balance_ret = self
            .rpc
            .eth_call(&self.config.usdt_address, &balance_call)
            .await?;
        let usdt_balance = rpc::decode_u256(&balance_ret, 0)?;
        let liquidity_usdt = rpc::raw_to_f64(&usdt_balance, self.config.usdt_decimals()) * 2.0;

        Ok(Some(PoolInfo {
            address: pool,
            version: PoolVersion::V3 { fee_tier },
            token0,
            token1,
            token0_is_usdt,
            liquidity_usdt,
            liquidity_score: 0.0,
        }))
    }

    async fn read_token0(&self, pool: &str) -> Result<String> {
        let ret = self.rpc.eth_call(pool, &SEL_TOKEN0).await?;
        rpc::decode_address(&ret, 0)
    }
}

fn is_zero_address(address: &str) -> bool {
    same_address(address, ZERO_ADDRESS)
}

fn same_address(a: &str, b: &str) -> bool {
    strip_hex_prefix(a).eq_ignore_ascii_case(strip_hex_prefix(b))
}

fn strip_hex_prefix(address: &str) -> &str {
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address)
}

// =============================================================================
// Tests
// =============================================================================
