// =============================================================================
// Layer 0 — Connection management: session pool, heartbeats, reconnection
// =============================================================================
//
// One task per (exchange, endpoint). A session connects, subscribes to the
// streams for its symbols, and forwards raw text frames into the pipeline
// channel. On disconnect the caller loop walks the reconnection ladder
// [0, 1, 2, 4, 8] s (last entry capped, unlimited retries); beyond the ladder
// the session is flagged degraded for the health monitor. The attempt counter
// resets on a successful heartbeat round-trip.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::market_data::types::ConnectionState;
use crate::types::now_ms;

/// A raw inbound frame handed to the pipeline.
#[derive(Debug)]
pub struct RawInbound {
    pub exchange: String,
    pub text: String,
    /// Wall-clock receipt time, UTC milliseconds.
    pub received_ms: i64,
    /// Monotonic receipt instant for latency accounting.
    pub received_at: std::time::Instant,
}

/// Shared state for one exchange session, readable by the health monitor.
pub struct SessionState {
    pub exchange: String,
    pub endpoint: String,
    pub url: String,
    pub state: RwLock<ConnectionState>,
    pub reconnect_attempt: AtomicU32,
    pub last_heartbeat_ms: AtomicU64,
    pub messages_received: AtomicU64,
    /// Set by the health monitor to request a reconnect (one-way signal).
    pub force_reconnect: AtomicBool,
}

impl SessionState {
    pub fn new(exchange: &str, endpoint: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            exchange: exchange.to_string(),
            endpoint: endpoint.to_string(),
            url: url.to_string(),
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect_attempt: AtomicU32::new(0),
            last_heartbeat_ms: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            force_reconnect: AtomicBool::new(false),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Milliseconds since the last heartbeat (or message), `None` before the
    /// first one.
    pub fn heartbeat_age_ms(&self) -> Option<i64> {
        let last = self.last_heartbeat_ms.load(Ordering::Relaxed);
        if last == 0 {
            None
        } else {
            Some(now_ms() - last as i64)
        }
    }

    fn record_heartbeat(&self) {
        self.last_heartbeat_ms.store(now_ms() as u64, Ordering::Relaxed);
        // Successful round-trip resets the reconnection ladder.
        self.reconnect_attempt.store(0, Ordering::Relaxed);
        if *self.state.read() == ConnectionState::Degraded {
            *self.state.write() = ConnectionState::Connected;
        }
    }
}

/// Reconnection delay for `attempt` (0-based) over the configured ladder;
/// the last entry repeats.
pub fn reconnect_delay_s(delays: &[u64], attempt: u32) -> u64 {
    if delays.is_empty() {
        return 1;
    }
    let idx = (attempt as usize).min(delays.len() - 1);
    delays[idx]
}

/// Build the connect URL and post-connect subscribe frames for a session.
///
/// Binance encodes streams in the URL; OKX and Bybit subscribe after connect.
pub fn subscription_plan(exchange: &str, base_url: &str, symbols: &[String]) -> (String, Vec<String>) {
    match exchange {
        "binance" => {
            let mut streams = Vec::new();
            for symbol in symbols {
                let lower = symbol.to_lowercase();
                streams.push(format!("{lower}@ticker"));
                streams.push(format!("{lower}@kline_1m"));
                streams.push(format!("{lower}@aggTrade"));
                streams.push(format!("{lower}@depth20@100ms"));
            }
            let base = base_url.trim_end_matches('/').replace("/ws", "/stream");
            (format!("{base}?streams={}", streams.join("/")), Vec::new())
        }
        "okx" => {
            let args: Vec<serde_json::Value> = symbols
                .iter()
                .flat_map(|symbol| {
                    let inst = okx_inst_id(symbol);
                    vec![
                        serde_json::json!({ "channel": "tickers", "instId": inst }),
                        serde_json::json!({ "channel": "trades", "instId": inst }),
                    ]
                })
                .collect();
            let sub = serde_json::json!({ "op": "subscribe", "args": args }).to_string();
            (base_url.to_string(), vec![sub])
        }
        "bybit" => {
            let args: Vec<String> = symbols.iter().map(|s| format!("tickers.{s}")).collect();
            let sub = serde_json::json!({ "op": "subscribe", "args": args }).to_string();
            (base_url.to_string(), vec![sub])
        }
        _ => (base_url.to_string(), Vec::new()),
    }
}

/// "BTCUSDT" → "BTC-USDT".
fn okx_inst_id(symbol: &str) -> String {
    match symbol.strip_suffix("USDT") {
        Some(base) => format!("{base}-USDT"),
        None => symbol.to_string(),
    }
}

/// Run one WebSocket session until disconnect or shutdown.
///
/// Returns `Ok(())` on clean shutdown; an error when the caller should walk
/// the reconnection ladder.
pub async fn run_session(
    session: Arc<SessionState>,
    symbols: Vec<String>,
    tx: mpsc::Sender<RawInbound>,
    mut shutdown: watch::Receiver<bool>,
    heartbeat_interval_s: u64,
) -> Result<()> {
    let (url, subscribes) = subscription_plan(&session.exchange, &session.url, &symbols);

    *session.state.write() = ConnectionState::Connecting;
    info!(exchange = %session.exchange, url = %url, "connecting WebSocket session");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to {} WebSocket", session.exchange))?;

    *session.state.write() = ConnectionState::Connected;
    session.record_heartbeat();
    info!(exchange = %session.exchange, "WebSocket session connected");

    let (mut write, mut read) = ws_stream.split();

    for frame in &subscribes {
        write
            .send(Message::Text(frame.clone()))
            .await
            .context("failed to send subscribe frame")?;
        debug!(exchange = %session.exchange, frame = %frame, "subscribe frame sent");
    }

    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(
        heartbeat_interval_s.max(1),
    ));
    heartbeat.tick().await; // First tick completes immediately.

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(exchange = %session.exchange, "session shutdown requested");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
            _ = heartbeat.tick() => {
                if session.force_reconnect.swap(false, Ordering::Relaxed) {
                    warn!(exchange = %session.exchange, "health monitor requested reconnect");
                    anyhow::bail!("reconnect requested by health monitor");
                }
                write
                    .send(Message::Ping(Vec::new()))
                    .await
                    .context("heartbeat ping failed")?;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.messages_received.fetch_add(1, Ordering::Relaxed);
                        session.record_heartbeat();
                        let inbound = RawInbound {
                            exchange: session.exchange.clone(),
                            text,
                            received_ms: now_ms(),
                            received_at: std::time::Instant::now(),
                        };
                        if tx.send(inbound).await.is_err() {
                            // Pipeline gone — shutting down.
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.record_heartbeat();
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        session.record_heartbeat();
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!(exchange = %session.exchange, "WebSocket stream ended");
                        anyhow::bail!("stream closed by peer");
                    }
                    Some(Ok(_)) => {} // Binary frames ignored.
                    Some(Err(e)) => {
                        error!(exchange = %session.exchange, error = %e, "WebSocket read error");
                        return Err(e.into());
                    }
                }
            }
        }
    }
}

/// Supervise one session: reconnect with the ladder until shutdown.
pub async fn supervise_session(
    session: Arc<SessionState>,
    symbols: Vec<String>,
    tx: mpsc::Sender<RawInbound>,
    shutdown: watch::Receiver<bool>,
    heartbeat_interval_s: u64,
    reconnect_delays_s: Vec<u64>,
) {
    loop {
        if *shutdown.borrow() {
            *session.state.write() = ConnectionState::Disconnected;
            return;
        }

        let result = run_session(
            session.clone(),
            symbols.clone(),
            tx.clone(),
            shutdown.clone(),
            heartbeat_interval_s,
        )
        .await;

        if *shutdown.borrow() {
            *session.state.write() = ConnectionState::Disconnected;
            return;
        }

        let attempt = session.reconnect_attempt.fetch_add(1, Ordering::Relaxed);
        let delay = reconnect_delay_s(&reconnect_delays_s, attempt);

        // Past the ladder the session is flagged degraded but keeps retrying.
        let degraded = attempt as usize >= reconnect_delays_s.len().saturating_sub(1);
        *session.state.write() = if degraded {
            ConnectionState::Degraded
        } else {
            ConnectionState::Reconnecting
        };

        match result {
            Ok(()) => return, // Clean shutdown.
            Err(e) => {
                warn!(
                    exchange = %session.exchange,
                    attempt = attempt + 1,
                    delay_s = delay,
                    degraded,
                    error = %e,
                    "session lost, reconnecting"
                );
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
