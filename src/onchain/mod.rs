// =============================================================================
// On-Chain Price Connector Module (C2)
// =============================================================================
//
// Discovers the highest-liquidity V2/V3 pool per symbol on the DEX factories,
// streams prices from those pools via batched multicall reads, and fails over
// per-symbol to the exchange feed (C1's snapshot buffer) when on-chain data
// is unavailable or stale.

pub mod connector;
pub mod failover;
pub mod pool_discovery;
pub mod price_stream;
pub mod rpc;

pub use connector::OnchainPriceConnector;
pub use failover::{PriceSource, SymbolFailover};
pub use pool_discovery::{PoolInfo, PoolVersion};
