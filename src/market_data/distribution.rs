// =============================================================================
// Layer 3 — Distribution: type-based routing to topic subscribers
// =============================================================================
//
// Each topic is a `tokio::sync::broadcast` channel; subscribers fan out
// asynchronously and a slow subscriber only lags its own receiver, never the
// pipeline. Routing rules:
//
//   klines + trades        → phase1a_feed + indicator_graph_feed
//   orderbook + mark price → phase1b_feed
//   everything             → uscp_feed (and its own per-type topic)

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::market_data::types::MarketEvent;
use crate::types::SystemStatus;

/// Subscription topics: the five wire types, the four logical routes, and the
/// operational channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Ticker,
    Kline,
    OrderBook,
    Trade,
    MarkPrice,
    Phase1aFeed,
    IndicatorGraphFeed,
    Phase1bFeed,
    UscpFeed,
    SystemStatus,
    Error,
}

impl Topic {
    pub const ALL: [Topic; 11] = [
        Topic::Ticker,
        Topic::Kline,
        Topic::OrderBook,
        Topic::Trade,
        Topic::MarkPrice,
        Topic::Phase1aFeed,
        Topic::IndicatorGraphFeed,
        Topic::Phase1bFeed,
        Topic::UscpFeed,
        Topic::SystemStatus,
        Topic::Error,
    ];
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Market(MarketEvent),
    Status(SystemStatus),
    Error(String),
}

/// Per-topic broadcast hub.
pub struct Distributor {
    channels: RwLock<HashMap<Topic, broadcast::Sender<BusMessage>>>,
    capacity: usize,
}

impl Distributor {
    pub fn new(capacity: usize) -> Self {
        let mut channels = HashMap::new();
        for topic in Topic::ALL {
            let (tx, _) = broadcast::channel(capacity.max(16));
            channels.insert(topic, tx);
        }
        Self {
            channels: RwLock::new(channels),
            capacity: capacity.max(16),
        }
    }

    /// Subscribe to a topic. The receiver sees events in arrival order for a
    /// given symbol (the pipeline preserves L1→L2→L3 ordering).
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BusMessage> {
        let mut channels = self.channels.write();
        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    fn send(&self, topic: Topic, msg: BusMessage) {
        // A send error only means there are no subscribers on this topic.
        if let Some(tx) = self.channels.read().get(&topic) {
            let _ = tx.send(msg);
        }
    }

    /// Route one processed market event to its per-type topic and the logical
    /// feeds.
    pub fn publish(&self, event: MarketEvent) {
        let type_topic = match &event {
            MarketEvent::Ticker(_) => Topic::Ticker,
            MarketEvent::Kline(_) => Topic::Kline,
            MarketEvent::OrderBook(_) => Topic::OrderBook,
            MarketEvent::Trade(_) => Topic::Trade,
            MarketEvent::MarkPrice(_) => Topic::MarkPrice,
        };
        self.send(type_topic, BusMessage::Market(event.clone()));

        match &event {
            MarketEvent::Kline(_) | MarketEvent::Trade(_) => {
                self.send(Topic::Phase1aFeed, BusMessage::Market(event.clone()));
                self.send(Topic::IndicatorGraphFeed, BusMessage::Market(event.clone()));
            }
            MarketEvent::OrderBook(_) | MarketEvent::MarkPrice(_) => {
                self.send(Topic::Phase1bFeed, BusMessage::Market(event.clone()));
            }
            MarketEvent::Ticker(_) => {}
        }

        // Everything reaches the unified pool feed.
        self.send(Topic::UscpFeed, BusMessage::Market(event));
    }

    /// Emit a system-status transition.
    pub fn publish_status(&self, status: SystemStatus) {
        self.send(Topic::SystemStatus, BusMessage::Status(status));
    }

    /// Emit an error notification.
    pub fn publish_error(&self, message: impl Into<String>) {
        self.send(Topic::Error, BusMessage::Error(message.into()));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{KlineData, MarketDataSnapshot, OrderBookSnapshot};

    fn kline_event() -> MarketEvent {
        MarketEvent::Kline(KlineData {
            symbol: "BTCUSDT".into(),
            timeframe: "1m".into(),
            timestamp: 1,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            quote_volume: 15.0,
            is_closed: true,
            price_momentum: 0.0,
            price_range_pct: 0.0,
            volume_anomaly: false,
            anomaly_flag: false,
            anomaly_type: None,
        })
    }

    fn book_event() -> MarketEvent {
        MarketEvent::OrderBook(OrderBookSnapshot {
            symbol: "BTCUSDT".into(),
            timestamp: 1,
            bids: vec![(1.0, 1.0)],
            asks: vec![(1.1, 1.0)],
            source_exchange: "binance".into(),
            bid_ask_spread: 0.0,
            book_depth: 0.0,
            liquidity_ratio: 0.0,
            depth_imbalance: 0.0,
            anomaly_flag: false,
            anomaly_type: None,
        })
    }

    fn ticker_event() -> MarketEvent {
        MarketEvent::Ticker(MarketDataSnapshot {
            symbol: "BTCUSDT".into(),
            timestamp: 1,
            price: 1.0,
            volume: 1.0,
            bid: 0.9,
            ask: 1.1,
            source_exchange: "binance".into(),
            ingestion_latency_ms: 0.0,
            data_quality: 1.0,
            price_change_pct: 0.0,
            volume_ratio: 1.0,
            volatility: 0.0,
            liquidity_ratio: 0.0,
            is_anomaly: false,
            anomaly_type: None,
        })
    }

    #[tokio::test]
    async fn kline_routes_to_phase1a_indicator_and_uscp() {
        let dist = Distributor::new(16);
        let mut phase1a = dist.subscribe(Topic::Phase1aFeed);
        let mut indicator = dist.subscribe(Topic::IndicatorGraphFeed);
        let mut phase1b = dist.subscribe(Topic::Phase1bFeed);
        let mut uscp = dist.subscribe(Topic::UscpFeed);

        dist.publish(kline_event());

        assert!(matches!(phase1a.try_recv(), Ok(BusMessage::Market(_))));
        assert!(matches!(indicator.try_recv(), Ok(BusMessage::Market(_))));
        assert!(phase1b.try_recv().is_err(), "klines must not reach phase1b");
        assert!(matches!(uscp.try_recv(), Ok(BusMessage::Market(_))));
    }

    #[tokio::test]
    async fn orderbook_routes_to_phase1b_and_uscp() {
        let dist = Distributor::new(16);
        let mut phase1a = dist.subscribe(Topic::Phase1aFeed);
        let mut phase1b = dist.subscribe(Topic::Phase1bFeed);
        let mut uscp = dist.subscribe(Topic::UscpFeed);

        dist.publish(book_event());

        assert!(phase1a.try_recv().is_err(), "books must not reach phase1a");
        assert!(matches!(phase1b.try_recv(), Ok(BusMessage::Market(_))));
        assert!(matches!(uscp.try_recv(), Ok(BusMessage::Market(_))));
    }

    #[tokio::test]
    async fn ticker_reaches_type_topic_and_uscp_only() {
        let dist = Distributor::new(16);
        let mut ticker = dist.subscribe(Topic::Ticker);
        let mut phase1a = dist.subscribe(Topic::Phase1aFeed);
        let mut phase1b = dist.subscribe(Topic::Phase1bFeed);
        let mut uscp = dist.subscribe(Topic::UscpFeed);

        dist.publish(ticker_event());

        assert!(matches!(ticker.try_recv(), Ok(BusMessage::Market(_))));
        assert!(phase1a.try_recv().is_err());
        assert!(phase1b.try_recv().is_err());
        assert!(matches!(uscp.try_recv(), Ok(BusMessage::Market(_))));
    }

    #[tokio::test]
    async fn status_events_reach_subscribers() {
        let dist = Distributor::new(16);
        let mut status = dist.subscribe(Topic::SystemStatus);
        dist.publish_status(SystemStatus::Running);
        match status.try_recv() {
            Ok(BusMessage::Status(s)) => assert_eq!(s, SystemStatus::Running),
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let dist = Distributor::new(16);
        dist.publish(kline_event());
        dist.publish_error("boom");
    }
}
