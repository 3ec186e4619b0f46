// =============================================================================
// Market Data Types — normalized cross-exchange records
// =============================================================================
//
// Inbound exchange messages are parsed into these common shapes in Layer 1,
// enriched in Layer 2, and published in Layer 3. Anomalous records are
// flagged (`anomaly_flag` / `anomaly_type`) and forwarded, never dropped.

use serde::{Deserialize, Serialize};

/// Connection lifecycle for one exchange session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Still retrying, but past the reconnect ladder — health-monitor visible.
    Degraded,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Last-observed tick for one symbol on one exchange.
///
/// Invariants: `price > 0`, `bid <= ask`, timestamp within ±5 min of receipt.
/// Violations set `anomaly_flag` instead of dropping the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataSnapshot {
    pub symbol: String,
    /// Event timestamp, UTC milliseconds.
    pub timestamp: i64,
    pub price: f64,
    pub volume: f64,
    pub bid: f64,
    pub ask: f64,
    pub source_exchange: String,
    /// Byte-receipt → snapshot-creation latency.
    pub ingestion_latency_ms: f64,
    /// [0, 1] — degraded by anomaly flags and missing fields.
    pub data_quality: f64,

    // Derived in Layer 2.
    #[serde(default)]
    pub price_change_pct: f64,
    #[serde(default)]
    pub volume_ratio: f64,
    #[serde(default)]
    pub volatility: f64,
    #[serde(default)]
    pub liquidity_ratio: f64,
    #[serde(default)]
    pub is_anomaly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<String>,
}

/// OHLCV candle for (symbol, timeframe). Mutated on each partial-candle tick,
/// immutable once `is_closed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineData {
    pub symbol: String,
    pub timeframe: String,
    /// Candle open time, UTC milliseconds.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub is_closed: bool,

    // Derived in Layer 2.
    #[serde(default)]
    pub price_momentum: f64,
    #[serde(default)]
    pub price_range_pct: f64,
    #[serde(default)]
    pub volume_anomaly: bool,
    #[serde(default)]
    pub anomaly_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<String>,
}

/// Order book snapshot: bids descending, asks ascending,
/// `asks[0].0 > bids[0].0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub timestamp: i64,
    /// (price, quantity), best first.
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub source_exchange: String,

    // Derived in Layer 2.
    #[serde(default)]
    pub bid_ask_spread: f64,
    #[serde(default)]
    pub book_depth: f64,
    #[serde(default)]
    pub liquidity_ratio: f64,
    #[serde(default)]
    pub depth_imbalance: f64,
    #[serde(default)]
    pub anomaly_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<String>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> f64 {
        self.bids.first().map(|(p, _)| *p).unwrap_or(0.0)
    }

    pub fn best_ask(&self) -> f64 {
        self.asks.first().map(|(p, _)| *p).unwrap_or(0.0)
    }
}

/// A single trade print. `no_trades` marks a filled-in placeholder for a
/// window with no activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeData {
    pub symbol: String,
    pub timestamp: i64,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    pub source_exchange: String,
    #[serde(default)]
    pub no_trades: bool,
    #[serde(default)]
    pub anomaly_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<String>,
}

/// Futures mark price update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPriceData {
    pub symbol: String,
    pub timestamp: i64,
    pub mark_price: f64,
    pub source_exchange: String,
    #[serde(default)]
    pub anomaly_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<String>,
}

/// A normalized market event flowing through the pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    Ticker(MarketDataSnapshot),
    Kline(KlineData),
    OrderBook(OrderBookSnapshot),
    Trade(TradeData),
    MarkPrice(MarkPriceData),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Ticker(s) => &s.symbol,
            Self::Kline(k) => &k.symbol,
            Self::OrderBook(o) => &o.symbol,
            Self::Trade(t) => &t.symbol,
            Self::MarkPrice(m) => &m.symbol,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Ticker(s) => s.timestamp,
            Self::Kline(k) => k.timestamp,
            Self::OrderBook(o) => o.timestamp,
            Self::Trade(t) => t.timestamp,
            Self::MarkPrice(m) => m.timestamp,
        }
    }

    /// Mark this event anomalous without discarding it.
    pub fn flag_anomaly(&mut self, anomaly_type: &str) {
        match self {
            Self::Ticker(s) => {
                s.is_anomaly = true;
                s.anomaly_type = Some(anomaly_type.to_string());
                s.data_quality = (s.data_quality - 0.3).max(0.0);
            }
            Self::Kline(k) => {
                k.anomaly_flag = true;
                k.anomaly_type = Some(anomaly_type.to_string());
            }
            Self::OrderBook(o) => {
                o.anomaly_flag = true;
                o.anomaly_type = Some(anomaly_type.to_string());
            }
            Self::Trade(t) => {
                t.anomaly_flag = true;
                t.anomaly_type = Some(anomaly_type.to_string());
            }
            Self::MarkPrice(m) => {
                m.anomaly_flag = true;
                m.anomaly_type = Some(anomaly_type.to_string());
            }
        }
    }

    pub fn is_anomalous(&self) -> bool {
        match self {
            Self::Ticker(s) => s.is_anomaly,
            Self::Kline(k) => k.anomaly_flag,
            Self::OrderBook(o) => o.anomaly_flag,
            Self::Trade(t) => t.anomaly_flag,
            Self::MarkPrice(m) => m.anomaly_flag,
        }
    }
}

/// Per-layer timing of the last completed pipeline pass, milliseconds.
///
/// Budgets: L0 ≤ 2, L1 ≤ 3, L2 ≤ 4, L3 ≤ 3, total ≤ 12.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessingMetrics {
    pub layer_1_ms: f64,
    pub layer_2_ms: f64,
    pub layer_3_ms: f64,
    pub total_ms: f64,
    /// Messages per second over the last measurement window.
    pub throughput: f64,
}
