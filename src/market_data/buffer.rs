// =============================================================================
// Snapshot Buffer — bounded per-symbol ring of market data snapshots
// =============================================================================
//
// Single-producer-per-stage, multi-consumer: the pipeline task writes, any
// subsystem reads. Oldest entries are dropped on overflow and the drop is
// surfaced as a warning metric, never as back-pressure on the exchange
// sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use crate::market_data::types::MarketDataSnapshot;

/// Thread-safe ring buffer that stores the most recent snapshots per symbol.
pub struct SnapshotBuffer {
    buffers: RwLock<HashMap<String, VecDeque<MarketDataSnapshot>>>,
    capacity: usize,
    /// Total snapshots evicted due to overflow.
    dropped_total: AtomicU64,
}

impl SnapshotBuffer {
    /// Create a buffer retaining at most `capacity` snapshots per symbol.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Append a snapshot, evicting the oldest when the ring is full.
    pub fn push(&self, snapshot: MarketDataSnapshot) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(1024)));

        ring.push_back(snapshot);
        while ring.len() > self.capacity {
            ring.pop_front();
            let dropped = self.dropped_total.fetch_add(1, Ordering::Relaxed) + 1;
            // Warn periodically rather than on every evicted message.
            if dropped % 1000 == 1 {
                warn!(dropped_total = dropped, "snapshot buffer overflow, oldest dropped");
            }
        }
    }

    /// The most recent snapshot for `symbol`, if any.
    pub fn latest(&self, symbol: &str) -> Option<MarketDataSnapshot> {
        self.buffers.read().get(symbol).and_then(|r| r.back().cloned())
    }

    /// The most recent snapshot for `symbol` from a specific exchange.
    pub fn latest_from(&self, symbol: &str, exchange: &str) -> Option<MarketDataSnapshot> {
        self.buffers
            .read()
            .get(symbol)
            .and_then(|r| r.iter().rev().find(|s| s.source_exchange == exchange).cloned())
    }

    /// The most recent `count` snapshots (oldest-first order).
    pub fn recent(&self, symbol: &str, count: usize) -> Vec<MarketDataSnapshot> {
        let map = self.buffers.read();
        match map.get(symbol) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Per-symbol occupancy, for the status report.
    pub fn occupancy(&self) -> HashMap<String, usize> {
        self.buffers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }

    /// Total snapshots evicted due to overflow.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Latest price per exchange for one symbol — used by the health monitor
    /// for cross-exchange deviation checks.
    pub fn prices_by_exchange(&self, symbol: &str) -> HashMap<String, f64> {
        let map = self.buffers.read();
        let mut out = HashMap::new();
        if let Some(ring) = map.get(symbol) {
            for snap in ring.iter().rev() {
                out.entry(snap.source_exchange.clone()).or_insert(snap.price);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(symbol: &str, exchange: &str, price: f64, ts: i64) -> MarketDataSnapshot {
        MarketDataSnapshot {
            symbol: symbol.into(),
            timestamp: ts,
            price,
            volume: 1.0,
            bid: price - 0.5,
            ask: price + 0.5,
            source_exchange: exchange.into(),
            ingestion_latency_ms: 0.5,
            data_quality: 1.0,
            price_change_pct: 0.0,
            volume_ratio: 1.0,
            volatility: 0.0,
            liquidity_ratio: 0.0,
            is_anomaly: false,
            anomaly_type: None,
        }
    }

    #[test]
    fn ring_trims_to_capacity_and_counts_drops() {
        let buf = SnapshotBuffer::new(3);
        for i in 0..5 {
            buf.push(snap("BTCUSDT", "binance", 100.0 + i as f64, i));
        }
        let recent = buf.recent("BTCUSDT", 10);
        assert_eq!(recent.len(), 3);
        assert!((recent[0].price - 102.0).abs() < f64::EPSILON);
        assert!((recent[2].price - 104.0).abs() < f64::EPSILON);
        assert_eq!(buf.dropped_total(), 2);
    }

    #[test]
    fn latest_returns_most_recent() {
        let buf = SnapshotBuffer::new(10);
        buf.push(snap("ETHUSDT", "binance", 2000.0, 1));
        buf.push(snap("ETHUSDT", "binance", 2001.0, 2));
        assert!((buf.latest("ETHUSDT").unwrap().price - 2001.0).abs() < f64::EPSILON);
        assert!(buf.latest("XRPUSDT").is_none());
    }

    #[test]
    fn latest_from_filters_by_exchange() {
        let buf = SnapshotBuffer::new(10);
        buf.push(snap("BTCUSDT", "binance", 100.0, 1));
        buf.push(snap("BTCUSDT", "okx", 101.0, 2));
        buf.push(snap("BTCUSDT", "binance", 102.0, 3));
        assert!((buf.latest_from("BTCUSDT", "okx").unwrap().price - 101.0).abs() < f64::EPSILON);
        assert!((buf.latest_from("BTCUSDT", "binance").unwrap().price - 102.0).abs() < f64::EPSILON);
        assert!(buf.latest_from("BTCUSDT", "bybit").is_none());
    }

    #[test]
    fn prices_by_exchange_takes_latest_per_exchange() {
        let buf = SnapshotBuffer::new(10);
        buf.push(snap("BTCUSDT", "binance", 100.0, 1));
        buf.push(snap("BTCUSDT", "binance", 105.0, 2));
        buf.push(snap("BTCUSDT", "okx", 104.0, 3));
        let prices = buf.prices_by_exchange("BTCUSDT");
        assert_eq!(prices.len(), 2);
        assert!((prices["binance"] - 105.0).abs() < f64::EPSILON);
        assert!((prices["okx"] - 104.0).abs() < f64::EPSILON);
    }

    #[test]
    fn occupancy_reports_per_symbol() {
        let buf = SnapshotBuffer::new(10);
        buf.push(snap("BTCUSDT", "binance", 100.0, 1));
        buf.push(snap("ETHUSDT", "binance", 2000.0, 1));
        buf.push(snap("ETHUSDT", "binance", 2001.0, 2));
        let occ = buf.occupancy();
        assert_eq!(occ["BTCUSDT"], 1);
        assert_eq!(occ["ETHUSDT"], 2);
    }
}
