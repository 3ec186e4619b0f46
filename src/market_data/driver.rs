// =============================================================================
// Market Data Driver — facade over the four-layer pipeline
// =============================================================================
//
// Owns the session pool, the pipeline task, the snapshot ring buffer, and the
// distribution hub. The pipeline preserves per-symbol arrival order through
// L1 → L2 → L3; stage timings are recorded and budget breaches logged, but
// data is never dropped for being slow.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::market_data::buffer::SnapshotBuffer;
use crate::market_data::connection::{supervise_session, RawInbound, SessionState};
use crate::market_data::distribution::{BusMessage, Distributor, Topic};
use crate::market_data::health::{HealthMonitor, HealthReport};
use crate::market_data::ingest;
use crate::market_data::processing::{Processed, Processor};
use crate::market_data::types::{ConnectionState, MarketDataSnapshot, MarketEvent, ProcessingMetrics};
use crate::runtime_config::MarketDataConfig;
use crate::types::SystemStatus;

/// Stage budgets in milliseconds (internal 12 ms total).
const L1_BUDGET_MS: f64 = 3.0;
const L2_BUDGET_MS: f64 = 4.0;
const L3_BUDGET_MS: f64 = 3.0;
const TOTAL_BUDGET_MS: f64 = 12.0;

/// Operator-facing driver status.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub status: SystemStatus,
    pub uptime_s: u64,
    pub connections: HashMap<String, String>,
    pub messages_total: u64,
    pub messages_per_second: f64,
    pub parse_failures: u64,
    pub duplicates_dropped: u64,
    pub buffer_occupancy: HashMap<String, usize>,
    pub buffer_dropped_total: u64,
    pub metrics: ProcessingMetrics,
    pub health: HealthReport,
}

/// The C1 market data driver.
pub struct MarketDataDriver {
    config: MarketDataConfig,
    symbols: RwLock<Vec<String>>,

    sessions: RwLock<Vec<Arc<SessionState>>>,
    buffer: Arc<SnapshotBuffer>,
    processor: Processor,
    distributor: Distributor,
    health: RwLock<Option<Arc<HealthMonitor>>>,

    status: RwLock<SystemStatus>,
    started_at: RwLock<Option<Instant>>,
    metrics: RwLock<ProcessingMetrics>,
    messages_total: AtomicU64,
    parse_failures: AtomicU64,
    duplicates_dropped: AtomicU64,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MarketDataDriver {
    pub fn new(config: MarketDataConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let buffer = Arc::new(SnapshotBuffer::new(config.buffer_size));
        Arc::new(Self {
            config,
            symbols: RwLock::new(Vec::new()),
            sessions: RwLock::new(Vec::new()),
            buffer,
            processor: Processor::new(),
            distributor: Distributor::new(1024),
            health: RwLock::new(None),
            status: RwLock::new(SystemStatus::Idle),
            started_at: RwLock::new(None),
            metrics: RwLock::new(ProcessingMetrics::default()),
            messages_total: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
        })
    }

    fn set_status(&self, status: SystemStatus) {
        *self.status.write() = status;
        self.distributor.publish_status(status);
        info!(status = %status, "market data driver status");
    }

    /// Open a session per (enabled exchange, endpoint) pair and start the
    /// pipeline. Idempotent while running.
    pub fn start(self: &Arc<Self>, symbols: Vec<String>) -> Result<()> {
        if *self.status.read() == SystemStatus::Running {
            debug!("driver already running, start() is a no-op");
            return Ok(());
        }
        if symbols.is_empty() {
            anyhow::bail!("cannot start market data driver without symbols");
        }

        self.set_status(SystemStatus::Starting);
        *self.symbols.write() = symbols.clone();
        *self.started_at.write() = Some(Instant::now());

        let (raw_tx, raw_rx) = mpsc::channel::<RawInbound>(self.config.buffer_size.max(1024));

        // --- Session pool --------------------------------------------------
        let mut sessions = Vec::new();
        for (exchange, exchange_cfg) in &self.config.exchanges {
            if !exchange_cfg.enabled {
                continue;
            }
            for (endpoint, url) in &exchange_cfg.endpoints {
                let session = SessionState::new(exchange, endpoint, url);
                sessions.push(session.clone());

                tokio::spawn(supervise_session(
                    session,
                    symbols.clone(),
                    raw_tx.clone(),
                    self.shutdown_rx.clone(),
                    self.config.heartbeat_interval_s,
                    self.config.reconnect_delays_s.clone(),
                ));
            }
        }
        drop(raw_tx);

        if sessions.is_empty() {
            self.set_status(SystemStatus::Error);
            anyhow::bail!("no enabled exchange endpoints configured");
        }
        *self.sessions.write() = sessions.clone();
        info!(sessions = sessions.len(), symbols = symbols.len(), "session pool launched");

        // --- Pipeline task --------------------------------------------------
        let driver = self.clone();
        tokio::spawn(async move {
            driver.run_pipeline(raw_rx).await;
        });

        // --- Health monitor -------------------------------------------------
        let monitor = HealthMonitor::new(
            sessions,
            self.buffer.clone(),
            symbols,
            self.config.heartbeat_interval_s,
            self.config.staleness_threshold_s,
        );
        *self.health.write() = Some(monitor.clone());
        tokio::spawn(monitor.run(self.shutdown_rx.clone()));

        self.set_status(SystemStatus::Running);
        Ok(())
    }

    /// Graceful stop: drain in-flight messages within the grace window, then
    /// close sessions.
    pub async fn stop(&self) {
        self.set_status(SystemStatus::Stopping);
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(std::time::Duration::from_secs(
            self.config.shutdown_grace_s.min(30),
        ))
        .await;
        self.set_status(SystemStatus::Stopped);
    }

    /// Subscribe to a topic (wire type, logical route, or operational
    /// channel).
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BusMessage> {
        self.distributor.subscribe(topic)
    }

    /// Latest snapshot for a symbol, if any exchange has published one.
    pub fn get_latest_snapshot(&self, symbol: &str) -> Option<MarketDataSnapshot> {
        self.buffer.latest(symbol)
    }

    pub fn buffer(&self) -> Arc<SnapshotBuffer> {
        self.buffer.clone()
    }

    /// Operator status report.
    pub fn get_status(&self) -> DriverStatus {
        let uptime_s = self
            .started_at
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        let messages_total = self.messages_total.load(Ordering::Relaxed);
        let connections = self
            .sessions
            .read()
            .iter()
            .map(|s| {
                (
                    format!("{}:{}", s.exchange, s.endpoint),
                    s.connection_state().to_string(),
                )
            })
            .collect();
        let health = self
            .health
            .read()
            .as_ref()
            .map(|h| h.report())
            .unwrap_or_default();

        DriverStatus {
            status: *self.status.read(),
            uptime_s,
            connections,
            messages_total,
            messages_per_second: if uptime_s > 0 {
                messages_total as f64 / uptime_s as f64
            } else {
                0.0
            },
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            buffer_occupancy: self.buffer.occupancy(),
            buffer_dropped_total: self.buffer.dropped_total(),
            metrics: *self.metrics.read(),
            health,
        }
    }

    // -------------------------------------------------------------------------
    // Pipeline
    // -------------------------------------------------------------------------

    async fn run_pipeline(&self, mut raw_rx: mpsc::Receiver<RawInbound>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Drain whatever is already queued, then exit.
                        while let Ok(inbound) = raw_rx.try_recv() {
                            self.process_inbound(inbound);
                        }
                        info!("pipeline drained and stopped");
                        return;
                    }
                }
                inbound = raw_rx.recv() => {
                    match inbound {
                        Some(inbound) => self.process_inbound(inbound),
                        None => return, // All sessions gone.
                    }
                }
            }
        }
    }

    /// One L1 → L2 → L3 pass with stage timing.
    fn process_inbound(&self, inbound: RawInbound) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
        let pass_start = Instant::now();

        // --- L1: parse + validate ----------------------------------------
        let l1_start = Instant::now();
        let parsed = ingest::parse_message(&inbound.exchange, &inbound.text, inbound.received_ms);
        let mut event = match parsed {
            Ok(Some(event)) => event,
            Ok(None) => return, // Ack / heartbeat frame.
            Err(e) => {
                self.parse_failures.fetch_add(1, Ordering::Relaxed);
                self.distributor.publish_error(format!(
                    "{}: parse failure: {e:#}",
                    inbound.exchange
                ));
                debug!(exchange = %inbound.exchange, error = %e, "unparseable frame");
                return;
            }
        };

        let symbol = event.symbol().to_string();
        let last_price = self
            .buffer
            .latest_from(&symbol, &inbound.exchange)
            .map(|s| s.price);
        let mut peer_prices = self.buffer.prices_by_exchange(&symbol);
        peer_prices.remove(&inbound.exchange);
        ingest::validate_event(&mut event, inbound.received_ms, last_price, &peer_prices);
        let l1_ms = l1_start.elapsed().as_secs_f64() * 1000.0;

        // --- L2: clean + standardize + compute ----------------------------
        let l2_start = Instant::now();
        let event = match self.processor.process(event) {
            Processed::Event(event) => *event,
            Processed::Duplicate => {
                self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let l2_ms = l2_start.elapsed().as_secs_f64() * 1000.0;

        // --- L3: buffer + route -------------------------------------------
        let l3_start = Instant::now();
        if let MarketEvent::Ticker(snapshot) = &event {
            let mut snapshot = snapshot.clone();
            snapshot.ingestion_latency_ms = inbound.received_at.elapsed().as_secs_f64() * 1000.0;
            self.buffer.push(snapshot);
        }
        self.distributor.publish(event);
        let l3_ms = l3_start.elapsed().as_secs_f64() * 1000.0;

        let total_ms = pass_start.elapsed().as_secs_f64() * 1000.0;

        // Budget accounting: log, never drop.
        if l1_ms > L1_BUDGET_MS {
            warn!(stage = "L1", observed_ms = l1_ms, budget_ms = L1_BUDGET_MS, "stage budget breach");
        }
        if l2_ms > L2_BUDGET_MS {
            warn!(stage = "L2", observed_ms = l2_ms, budget_ms = L2_BUDGET_MS, "stage budget breach");
        }
        if l3_ms > L3_BUDGET_MS {
            warn!(stage = "L3", observed_ms = l3_ms, budget_ms = L3_BUDGET_MS, "stage budget breach");
        }
        if total_ms > TOTAL_BUDGET_MS {
            warn!(observed_ms = total_ms, budget_ms = TOTAL_BUDGET_MS, "pipeline budget breach");
        }

        let uptime_s = self
            .started_at
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        let throughput = if uptime_s > 0 {
            self.messages_total.load(Ordering::Relaxed) as f64 / uptime_s as f64
        } else {
            0.0
        };
        *self.metrics.write() = ProcessingMetrics {
            layer_1_ms: l1_ms,
            layer_2_ms: l2_ms,
            layer_3_ms: l3_ms,
            total_ms,
            throughput,
        };
    }

    /// Inject a pre-formed inbound frame — used by the on-chain connector's
    /// peer feed and by tests.
    pub fn inject_frame(&self, exchange: &str, text: &str) {
        self.process_inbound(RawInbound {
            exchange: exchange.to_string(),
            text: text.to_string(),
            received_ms: crate::types::now_ms(),
            received_at: Instant::now(),
        });
    }

    /// Expose connection states for peers (the on-chain connector's status
    /// report includes them).
    pub fn connection_states(&self) -> HashMap<String, ConnectionState> {
        self.sessions
            .read()
            .iter()
            .map(|s| (s.exchange.clone(), s.connection_state()))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::MarketDataConfig;

    fn driver() -> Arc<MarketDataDriver> {
        MarketDataDriver::new(MarketDataConfig::default())
    }

    fn ticker_frame(symbol: &str, price: f64, ts: i64) -> String {
        format!(
            r#"{{ "e": "24hrTicker", "s": "{symbol}", "E": {ts},
                 "c": "{price}", "v": "100", "b": "{}", "a": "{}", "P": "1.0" }}"#,
            price - 0.5,
            price + 0.5
        )
    }

    #[tokio::test]
    async fn injected_ticker_lands_in_buffer_and_feeds() {
        let driver = driver();
        let mut uscp = driver.subscribe(Topic::UscpFeed);

        let now = crate::types::now_ms();
        driver.inject_frame("binance", &ticker_frame("BTCUSDT", 37000.0, now));

        let snap = driver.get_latest_snapshot("BTCUSDT").expect("snapshot stored");
        assert!((snap.price - 37000.0).abs() < f64::EPSILON);
        assert!(matches!(uscp.try_recv(), Ok(BusMessage::Market(_))));
    }

    #[tokio::test]
    async fn duplicate_timestamp_counted_not_published_twice() {
        let driver = driver();
        let mut uscp = driver.subscribe(Topic::UscpFeed);

        let now = crate::types::now_ms();
        let frame = ticker_frame("BTCUSDT", 37000.0, now);
        driver.inject_frame("binance", &frame);
        driver.inject_frame("binance", &frame);

        assert!(uscp.try_recv().is_ok());
        assert!(uscp.try_recv().is_err(), "duplicate must be suppressed");
        assert_eq!(driver.get_status().duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn parse_failure_counted_and_errored() {
        let driver = driver();
        let mut errors = driver.subscribe(Topic::Error);
        driver.inject_frame("binance", "not json at all");
        assert_eq!(driver.get_status().parse_failures, 1);
        assert!(matches!(errors.try_recv(), Ok(BusMessage::Error(_))));
    }

    #[tokio::test]
    async fn status_reflects_metrics_after_traffic() {
        let driver = driver();
        let now = crate::types::now_ms();
        driver.inject_frame("binance", &ticker_frame("ETHUSDT", 2000.0, now));
        let status = driver.get_status();
        assert_eq!(status.messages_total, 1);
        assert_eq!(status.buffer_occupancy.get("ETHUSDT"), Some(&1));
    }

    #[tokio::test]
    async fn start_requires_symbols() {
        let driver = driver();
        assert!(Arc::clone(&driver).start(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn snapshots_in_buffer_satisfy_invariants() {
        let driver = driver();
        let now = crate::types::now_ms();
        for i in 0..10 {
            driver.inject_frame("binance", &ticker_frame("BTCUSDT", 37000.0 + i as f64, now + i));
        }
        for snap in driver.buffer().recent("BTCUSDT", 100) {
            assert!(snap.price > 0.0);
            assert!(snap.bid <= snap.ask);
            assert!((snap.timestamp - crate::types::now_ms()).abs() <= 5 * 60 * 1000);
        }
    }
}
