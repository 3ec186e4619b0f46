// =============================================================================
// Market Data Driver Module (C1)
// =============================================================================
//
// Four-layer realtime pipeline over multi-exchange WebSocket sessions:
//   L0 connection management — session pool, heartbeats, reconnection
//   L1 ingestion             — parsing, schema validation, anomaly flagging
//   L2 processing            — outliers, cleaning, standardization, metrics
//   L3 distribution          — type-based routing to topic subscribers
//
// Internal budget: ≤ 12 ms byte-receipt → publication. Budget breaches log a
// warning with the stage id; data is never dropped for being slow.

pub mod buffer;
pub mod connection;
pub mod distribution;
pub mod driver;
pub mod health;
pub mod ingest;
pub mod processing;
pub mod types;

pub use buffer::SnapshotBuffer;
pub use distribution::{BusMessage, Distributor, Topic};
pub use driver::MarketDataDriver;
pub use types::{
    ConnectionState, KlineData, MarkPriceData, MarketDataSnapshot, MarketEvent,
    OrderBookSnapshot, ProcessingMetrics, TradeData,
};
