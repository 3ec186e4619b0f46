// =============================================================================
// Runtime Configuration — Sectioned engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Vertex signal core. Loaded once at start
// from a JSON document; file values override embedded defaults. A malformed
// or missing file falls back to full defaults and logs a warning. The
// effective option set is enumerated in the startup log.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
        "ADAUSDT".to_string(),
        "DOGEUSDT".to_string(),
    ]
}

fn default_external_latency_ms() -> u64 {
    50
}

fn default_internal_latency_ms() -> u64 {
    12
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_heartbeat_interval_s() -> u64 {
    30
}

fn default_staleness_threshold_s() -> u64 {
    10
}

fn default_reconnect_delays_s() -> Vec<u64> {
    vec![0, 1, 2, 4, 8]
}

fn default_shutdown_grace_s() -> u64 {
    5
}

fn default_exchanges() -> HashMap<String, ExchangeConfig> {
    let mut map = HashMap::new();
    map.insert(
        "binance".to_string(),
        ExchangeConfig {
            enabled: true,
            weight: 0.7,
            endpoints: HashMap::from([(
                "spot".to_string(),
                "wss://stream.binance.com:9443/ws".to_string(),
            )]),
        },
    );
    map.insert(
        "okx".to_string(),
        ExchangeConfig {
            enabled: true,
            weight: 0.2,
            endpoints: HashMap::from([(
                "spot".to_string(),
                "wss://ws.okx.com:8443/ws/v5/public".to_string(),
            )]),
        },
    );
    map.insert(
        "bybit".to_string(),
        ExchangeConfig {
            enabled: true,
            weight: 0.1,
            endpoints: HashMap::from([(
                "spot".to_string(),
                "wss://stream.bybit.com/v5/public/spot".to_string(),
            )]),
        },
    );
    map
}

fn default_scan_interval_s() -> u64 {
    1
}

fn default_max_concurrent_triggers() -> usize {
    10
}

fn default_momentum_1m_pct() -> f64 {
    0.5
}

fn default_momentum_5m_pct() -> f64 {
    2.0
}

fn default_momentum_15m_pct() -> f64 {
    5.0
}

fn default_minimum_indicators() -> usize {
    3
}

fn default_convergence_threshold() -> f64 {
    0.75
}

fn default_indicator_weights() -> IndicatorWeights {
    IndicatorWeights {
        rsi: 0.25,
        macd: 0.25,
        bollinger: 0.20,
        volume: 0.15,
        support_resistance: 0.15,
    }
}

fn default_high_priority_win_rate() -> f64 {
    0.75
}

fn default_high_priority_min_confidence() -> f64 {
    0.80
}

fn default_observation_win_rate_range() -> (f64, f64) {
    (0.40, 0.75)
}

fn default_high_band_max_per_hour() -> usize {
    5
}

fn default_observation_max_per_hour() -> usize {
    15
}

fn default_usdt_address() -> String {
    "0x55d398326f99059fF775485246999027B3197955".to_string()
}

fn default_v2_factory() -> String {
    "0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73".to_string()
}

fn default_v3_factory() -> String {
    "0x1097053Fd2ea711dad45caCcc45EfF7548fCB362".to_string()
}

fn default_multicall_address() -> String {
    "0xcA11bde05977b3631167028862bE2a173976CA11".to_string()
}

fn default_token_addresses() -> HashMap<String, String> {
    HashMap::from([
        ("BTC".into(), "0x7130d2A12B9BCbFAe4f2634d864A1Ee1Ce3Ead9c".into()),
        ("ETH".into(), "0x2170Ed0880ac9A755fd29B2688956BD959F933F8".into()),
        ("BNB".into(), "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c".into()),
        ("ADA".into(), "0x3EE2200Efb3400fAbB9AacF31297cBdD1d435D47".into()),
        ("DOGE".into(), "0xbA2aE424d960c26247Dd6c32edC70B295c744C43".into()),
        ("XRP".into(), "0x1D2F0da169ceB9fC7B3144628dB156f3F6c60dBE".into()),
        ("SOL".into(), "0x570A5D26f7765Ecb712C0924E4De545B89fD43dF".into()),
    ])
}

fn default_token_decimals() -> HashMap<String, u32> {
    // DOGE is the odd one out at 8 decimals; everything else on this chain
    // (USDT included) is 18.
    HashMap::from([
        ("BTC".into(), 18),
        ("ETH".into(), 18),
        ("BNB".into(), 18),
        ("ADA".into(), 18),
        ("DOGE".into(), 8),
        ("XRP".into(), 18),
        ("SOL".into(), 18),
        ("USDT".into(), 18),
    ])
}

fn default_fee_tiers() -> Vec<u32> {
    vec![500, 3000, 10000, 100]
}

fn default_rpc_endpoints() -> Vec<String> {
    vec![
        "https://bsc-dataseed.binance.org".to_string(),
        "https://bsc-dataseed1.binance.org".to_string(),
        "https://bsc.publicnode.com".to_string(),
    ]
}

fn default_price_update_interval_ms() -> u64 {
    500
}

fn default_pool_discovery_interval_s() -> u64 {
    3600
}

fn default_rpc_timeout_s() -> u64 {
    10
}

fn default_price_volatility_threshold() -> f64 {
    0.5
}

fn default_price_cache_duration_s() -> u64 {
    300
}

fn default_min_liquidity() -> f64 {
    1000.0
}

fn default_preferred_liquidity() -> f64 {
    50_000.0
}

fn default_max_candidates_per_symbol() -> usize {
    5
}

fn default_min_comprehensive_score() -> f64 {
    0.65
}

fn default_dedup_window_s() -> u64 {
    30
}

fn default_dedup_similarity() -> f64 {
    0.8
}

fn default_min_epl_probability() -> f64 {
    0.4
}

fn default_candidate_ttl_s() -> u64 {
    3600
}

fn default_lookback_periods() -> usize {
    100
}

fn default_min_adjusted_confidence() -> f64 {
    0.6
}

// =============================================================================
// Sections
// =============================================================================

/// Per-exchange connection settings for the market data driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub weight: f64,
    /// Endpoint name → WebSocket URL (e.g. "spot").
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
}

/// Market data driver (C1) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// External end-to-end latency target in milliseconds.
    #[serde(default = "default_external_latency_ms")]
    pub target_latency_ms: u64,

    /// Internal byte-receipt → publication budget in milliseconds.
    #[serde(default = "default_internal_latency_ms")]
    pub internal_latency_ms: u64,

    #[serde(default = "default_exchanges")]
    pub exchanges: HashMap<String, ExchangeConfig>,

    /// Ring buffer capacity per symbol.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,

    /// Maximum age of the last published price before a symbol is stale.
    #[serde(default = "default_staleness_threshold_s")]
    pub staleness_threshold_s: u64,

    /// Reconnection delay ladder in seconds; last entry repeats (capped).
    #[serde(default = "default_reconnect_delays_s")]
    pub reconnect_delays_s: Vec<u64>,

    /// Grace window for draining in-flight messages on stop().
    #[serde(default = "default_shutdown_grace_s")]
    pub shutdown_grace_s: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            target_latency_ms: default_external_latency_ms(),
            internal_latency_ms: default_internal_latency_ms(),
            exchanges: default_exchanges(),
            buffer_size: default_buffer_size(),
            heartbeat_interval_s: default_heartbeat_interval_s(),
            staleness_threshold_s: default_staleness_threshold_s(),
            reconnect_delays_s: default_reconnect_delays_s(),
            shutdown_grace_s: default_shutdown_grace_s(),
        }
    }
}

/// Weights for the per-indicator convergence aggregate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndicatorWeights {
    pub rsi: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub volume: f64,
    pub support_resistance: f64,
}

impl Default for IndicatorWeights {
    fn default() -> Self {
        default_indicator_weights()
    }
}

/// Intelligent trigger engine (C3) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_scan_interval_s")]
    pub scan_interval_seconds: u64,

    #[serde(default = "default_true")]
    pub parallel_processing: bool,

    #[serde(default = "default_max_concurrent_triggers")]
    pub max_concurrent_triggers: usize,

    /// Momentum thresholds in percent for the 1m / 5m / 15m windows.
    #[serde(default = "default_momentum_1m_pct")]
    pub momentum_1m_threshold_pct: f64,
    #[serde(default = "default_momentum_5m_pct")]
    pub momentum_5m_threshold_pct: f64,
    #[serde(default = "default_momentum_15m_pct")]
    pub momentum_15m_threshold_pct: f64,

    /// Minimum number of converging indicators for a convergence trigger.
    #[serde(default = "default_minimum_indicators")]
    pub minimum_indicators: usize,

    #[serde(default = "default_convergence_threshold")]
    pub convergence_score_threshold: f64,

    #[serde(default)]
    pub indicator_weights: IndicatorWeights,

    // Classifier bands.
    #[serde(default = "default_high_priority_win_rate")]
    pub high_priority_win_rate_threshold: f64,
    #[serde(default = "default_high_priority_min_confidence")]
    pub high_priority_min_confidence: f64,
    #[serde(default = "default_observation_win_rate_range")]
    pub observation_win_rate_range: (f64, f64),

    // Sliding-hour rate-limit caps per band.
    #[serde(default = "default_high_band_max_per_hour")]
    pub high_priority_max_signals_per_hour: usize,
    #[serde(default = "default_observation_max_per_hour")]
    pub observation_max_signals_per_hour: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: default_scan_interval_s(),
            parallel_processing: true,
            max_concurrent_triggers: default_max_concurrent_triggers(),
            momentum_1m_threshold_pct: default_momentum_1m_pct(),
            momentum_5m_threshold_pct: default_momentum_5m_pct(),
            momentum_15m_threshold_pct: default_momentum_15m_pct(),
            minimum_indicators: default_minimum_indicators(),
            convergence_score_threshold: default_convergence_threshold(),
            indicator_weights: default_indicator_weights(),
            high_priority_win_rate_threshold: default_high_priority_win_rate(),
            high_priority_min_confidence: default_high_priority_min_confidence(),
            observation_win_rate_range: default_observation_win_rate_range(),
            high_priority_max_signals_per_hour: default_high_band_max_per_hour(),
            observation_max_signals_per_hour: default_observation_max_per_hour(),
        }
    }
}

/// On-chain price connector (C2) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_v2_factory")]
    pub v2_factory_address: String,
    #[serde(default = "default_v3_factory")]
    pub v3_factory_address: String,
    #[serde(default = "default_multicall_address")]
    pub multicall_address: String,
    #[serde(default = "default_usdt_address")]
    pub usdt_address: String,

    /// Base-symbol → token contract address.
    #[serde(default = "default_token_addresses")]
    pub token_addresses: HashMap<String, String>,
    /// Base-symbol → token decimals.
    #[serde(default = "default_token_decimals")]
    pub token_decimals: HashMap<String, u32>,

    /// V3 fee tiers probed in priority order.
    #[serde(default = "default_fee_tiers")]
    pub v3_fee_tiers: Vec<u32>,

    #[serde(default = "default_rpc_endpoints")]
    pub rpc_endpoints: Vec<String>,

    #[serde(default = "default_price_update_interval_ms")]
    pub price_update_interval_ms: u64,
    #[serde(default = "default_pool_discovery_interval_s")]
    pub pool_discovery_interval_s: u64,
    #[serde(default = "default_rpc_timeout_s")]
    pub rpc_timeout_s: u64,

    /// Relative deviation from recent mean that flags a price as anomalous.
    #[serde(default = "default_price_volatility_threshold")]
    pub price_volatility_threshold: f64,
    /// Retention window for the anomaly-detection price history.
    #[serde(default = "default_price_cache_duration_s")]
    pub price_cache_duration_s: u64,

    #[serde(default = "default_min_liquidity")]
    pub min_liquidity_threshold: f64,
    #[serde(default = "default_preferred_liquidity")]
    pub preferred_liquidity_threshold: f64,
}

impl Default for OnchainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            v2_factory_address: default_v2_factory(),
            v3_factory_address: default_v3_factory(),
            multicall_address: default_multicall_address(),
            usdt_address: default_usdt_address(),
            token_addresses: default_token_addresses(),
            token_decimals: default_token_decimals(),
            v3_fee_tiers: default_fee_tiers(),
            rpc_endpoints: default_rpc_endpoints(),
            price_update_interval_ms: default_price_update_interval_ms(),
            pool_discovery_interval_s: default_pool_discovery_interval_s(),
            rpc_timeout_s: default_rpc_timeout_s(),
            price_volatility_threshold: default_price_volatility_threshold(),
            price_cache_duration_s: default_price_cache_duration_s(),
            min_liquidity_threshold: default_min_liquidity(),
            preferred_liquidity_threshold: default_preferred_liquidity(),
        }
    }
}

impl OnchainConfig {
    /// Token contract address for a base symbol ("BTC", "ETH", ...).
    pub fn token_address(&self, symbol: &str) -> Option<&str> {
        self.token_addresses.get(symbol).map(String::as_str)
    }

    /// Token decimals for a base symbol; unknown tokens assume 18.
    pub fn decimals(&self, symbol: &str) -> u32 {
        self.token_decimals.get(symbol).copied().unwrap_or(18)
    }

    pub fn usdt_decimals(&self) -> u32 {
        self.token_decimals.get("USDT").copied().unwrap_or(18)
    }

    /// Mainstream symbols accept the base liquidity floor; others need 5x.
    pub fn is_liquidity_acceptable(&self, liquidity_usdt: f64, symbol: &str) -> bool {
        if liquidity_usdt < self.min_liquidity_threshold {
            return false;
        }
        let mainstream = matches!(symbol, "BTC" | "ETH" | "BNB");
        if mainstream {
            liquidity_usdt >= self.min_liquidity_threshold
        } else {
            liquidity_usdt >= self.min_liquidity_threshold * 5.0
        }
    }

    /// Linear liquidity score between the floor and preferred thresholds.
    pub fn liquidity_score(&self, liquidity_usdt: f64) -> f64 {
        if liquidity_usdt <= self.min_liquidity_threshold {
            0.0
        } else if liquidity_usdt >= self.preferred_liquidity_threshold {
            1.0
        } else {
            let ratio = (liquidity_usdt - self.min_liquidity_threshold)
                / (self.preferred_liquidity_threshold - self.min_liquidity_threshold);
            ratio.clamp(0.0, 1.0)
        }
    }
}

/// Unified signal candidate pool (C6) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_candidates_per_symbol")]
    pub max_candidates_per_symbol: usize,

    #[serde(default = "default_min_comprehensive_score")]
    pub min_comprehensive_score: f64,

    #[serde(default = "default_dedup_window_s")]
    pub dedup_window_s: u64,

    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity_threshold: f64,

    #[serde(default = "default_min_epl_probability")]
    pub min_epl_pass_probability: f64,

    /// Candidate lifetime before clear_expired drops it.
    #[serde(default = "default_candidate_ttl_s")]
    pub candidate_ttl_s: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_candidates_per_symbol: default_max_candidates_per_symbol(),
            min_comprehensive_score: default_min_comprehensive_score(),
            dedup_window_s: default_dedup_window_s(),
            dedup_similarity_threshold: default_dedup_similarity(),
            min_epl_pass_probability: default_min_epl_probability(),
            candidate_ttl_s: default_candidate_ttl_s(),
        }
    }
}

/// Phase-1B volatility filter (C5) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityFilterConfig {
    #[serde(default = "default_lookback_periods")]
    pub lookback_periods: usize,

    /// Signals whose adjusted confidence falls below this gate are dropped.
    #[serde(default = "default_min_adjusted_confidence")]
    pub min_adjusted_confidence: f64,
}

impl Default for VolatilityFilterConfig {
    fn default() -> Self {
        Self {
            lookback_periods: default_lookback_periods(),
            min_adjusted_confidence: default_min_adjusted_confidence(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Vertex core.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols the core is tracking.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub market_data: MarketDataConfig,

    #[serde(default)]
    pub trigger: TriggerConfig,

    #[serde(default)]
    pub onchain: OnchainConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub volatility_filter: VolatilityFilterConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            market_data: MarketDataConfig::default(),
            trigger: TriggerConfig::default(),
            onchain: OnchainConfig::default(),
            pool: PoolConfig::default(),
            volatility_filter: VolatilityFilterConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file or malformed JSON falls back to full defaults with a
    /// warning — a config problem must never keep the core from starting,
    /// but it must be visible in the log.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file not readable, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(config) => {
                info!(path = %path.display(), "runtime config loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed config JSON, using defaults");
                Self::default()
            }
        }
    }

    /// Log every effective option so that an operator can confirm what the
    /// core actually runs with after file/default merging.
    pub fn log_effective(&self) {
        info!(symbols = ?self.symbols, "effective: symbols");
        info!(
            target_latency_ms = self.market_data.target_latency_ms,
            internal_latency_ms = self.market_data.internal_latency_ms,
            buffer_size = self.market_data.buffer_size,
            heartbeat_interval_s = self.market_data.heartbeat_interval_s,
            staleness_threshold_s = self.market_data.staleness_threshold_s,
            reconnect_delays_s = ?self.market_data.reconnect_delays_s,
            exchanges = ?self.market_data.exchanges.keys().collect::<Vec<_>>(),
            "effective: market_data"
        );
        info!(
            scan_interval_seconds = self.trigger.scan_interval_seconds,
            parallel_processing = self.trigger.parallel_processing,
            max_concurrent_triggers = self.trigger.max_concurrent_triggers,
            momentum_thresholds_pct = ?(
                self.trigger.momentum_1m_threshold_pct,
                self.trigger.momentum_5m_threshold_pct,
                self.trigger.momentum_15m_threshold_pct
            ),
            convergence_score_threshold = self.trigger.convergence_score_threshold,
            high_priority_max_per_hour = self.trigger.high_priority_max_signals_per_hour,
            observation_max_per_hour = self.trigger.observation_max_signals_per_hour,
            "effective: trigger"
        );
        info!(
            enabled = self.onchain.enabled,
            rpc_endpoints = self.onchain.rpc_endpoints.len(),
            fee_tiers = ?self.onchain.v3_fee_tiers,
            price_update_interval_ms = self.onchain.price_update_interval_ms,
            pool_discovery_interval_s = self.onchain.pool_discovery_interval_s,
            min_liquidity_threshold = self.onchain.min_liquidity_threshold,
            preferred_liquidity_threshold = self.onchain.preferred_liquidity_threshold,
            "effective: onchain"
        );
        info!(
            max_candidates_per_symbol = self.pool.max_candidates_per_symbol,
            min_comprehensive_score = self.pool.min_comprehensive_score,
            dedup_window_s = self.pool.dedup_window_s,
            dedup_similarity_threshold = self.pool.dedup_similarity_threshold,
            min_epl_pass_probability = self.pool.min_epl_pass_probability,
            "effective: pool"
        );
        info!(
            lookback_periods = self.volatility_filter.lookback_periods,
            min_adjusted_confidence = self.volatility_filter.min_adjusted_confidence,
            "effective: volatility_filter"
        );
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
