// =============================================================================
// Vertex Signal Core — Main Entry Point
// =============================================================================
//
// Wires the realtime signal-generation core: market data driver (C1),
// on-chain price connector (C2), trigger engine (C3), Phase-1A generator
// (C4), Phase-1B volatility filter (C5), and the unified candidate pool
// (C6). Candidates flow out over an in-process channel to the downstream
// execution-planning layer.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod indicators;
mod market_data;
mod onchain;
mod pool;
mod runtime_config;
mod signals;
mod trigger;
mod types;

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{basic_to_raw, intelligent_to_raw, volatility_to_raw, CoreState};
use crate::market_data::{BusMessage, MarketEvent, Topic};
use crate::pool::candidate_pool::FusionInputs;
use crate::runtime_config::RuntimeConfig;
use crate::types::now_ms;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Vertex Signal Core — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("vertex_config.json");

    // Override symbols from env if available.
    if let Ok(symbols) = std::env::var("VERTEX_SYMBOLS") {
        let parsed: Vec<String> = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.symbols = parsed;
        }
    }
    config.log_effective();

    // ── 2. Build shared state ────────────────────────────────────────────
    let (state, mut epl_rx) = CoreState::new(config)?;
    let symbols = state.config.symbols.clone();

    // ── 3. Start the market data driver ──────────────────────────────────
    state.driver.start(symbols.clone())?;

    // ── 4. Start the on-chain connector ──────────────────────────────────
    if let Err(e) = state.onchain.start().await {
        // On-chain is an enrichment source; the exchange feed carries on.
        warn!(error = %e, "on-chain connector failed to start, exchange feed only");
    }

    // ── 5. Feed task: driver events → trigger engine + Phase-1A ─────────
    let feed_state = state.clone();
    let mut uscp_feed = state.driver.subscribe(Topic::UscpFeed);
    tokio::spawn(async move {
        loop {
            match uscp_feed.recv().await {
                Ok(BusMessage::Market(event)) => handle_market_event(&feed_state, event),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "feed task lagged behind the driver");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    // ── 6. Periodic trigger scan ─────────────────────────────────────────
    let scan_state = state.clone();
    tokio::spawn(async move {
        let interval_s = scan_state.trigger_engine.scan_interval_seconds().max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_s));
        loop {
            interval.tick().await;
            for signal in scan_state.trigger_engine.periodic_scan(now_ms()) {
                let symbol = signal.symbol.clone();
                scan_state.push_pending(&symbol, intelligent_to_raw(&signal));
            }
        }
    });

    // ── 7. Scoring loop: one candidate-pool pass per symbol ──────────────
    let score_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            for symbol in &score_state.config.symbols {
                run_scoring_pass(&score_state, symbol).await;
            }
        }
    });

    // ── 8. Pool expiry sweep ─────────────────────────────────────────────
    let expiry_state = state.clone();
    tokio::spawn(async move {
        let ttl = expiry_state.config.pool.candidate_ttl_s;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            expiry_state.candidate_pool.clear_expired(ttl);
        }
    });

    // ── 9. EPL boundary consumer ─────────────────────────────────────────
    // In single-binary deployment the execution-planning layer sits on the
    // other end of this channel; here the boundary is logged.
    tokio::spawn(async move {
        while let Some(candidate) = epl_rx.recv().await {
            debug!(
                signal_id = %candidate.signal_id,
                symbol = %candidate.symbol,
                signal_type = %candidate.signal_type,
                priority = candidate.execution_priority,
                "candidate handed to EPL boundary"
            );
        }
    });

    // ── 10. Status API server ────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("VERTEX_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "status API listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "status API server failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind status API"),
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    state.onchain.stop();
    state.driver.stop().await;

    info!("Vertex Signal Core shut down complete.");
    Ok(())
}

/// Route one market event into the trigger engine and Phase-1A generator.
fn handle_market_event(state: &Arc<CoreState>, event: MarketEvent) {
    match event {
        MarketEvent::Ticker(snapshot) => {
            let signals = state.trigger_engine.on_price_update(
                &snapshot.symbol,
                snapshot.price,
                snapshot.volume,
                snapshot.timestamp,
            );
            for signal in signals {
                state.push_pending(&snapshot.symbol, intelligent_to_raw(&signal));
            }
        }
        MarketEvent::Trade(trade) if !trade.no_trades => {
            let signals = state.trigger_engine.on_price_update(
                &trade.symbol,
                trade.price,
                trade.quantity,
                trade.timestamp,
            );
            for signal in signals {
                state.push_pending(&trade.symbol, intelligent_to_raw(&signal));
            }
        }
        MarketEvent::Kline(kline) if kline.is_closed => {
            let signals = state.basic_generator.on_bar(
                &kline.symbol,
                kline.close,
                kline.volume,
                kline.timestamp,
            );
            for signal in signals {
                state.push_pending(&kline.symbol, basic_to_raw(&signal));
            }
        }
        _ => {} // Order books and mark prices feed the pool's context only.
    }
}

/// One unified-pool pass for a symbol: volatility filtering, Phase-1B
/// derivation, fusion, and hand-off to the EPL channel.
async fn run_scoring_pass(state: &Arc<CoreState>, symbol: &str) {
    let now = now_ms();
    let mut raw_signals = state.drain_pending(symbol);

    // Phase-1B: volatility profile from the recent snapshot stream.
    let prices: Vec<f64> = state
        .driver
        .buffer()
        .recent(symbol, 300)
        .iter()
        .map(|s| s.price)
        .collect();
    let metrics = state.volatility_filter.calculate_volatility_metrics(&prices, now);
    raw_signals.extend(volatility_to_raw(symbol, &metrics, now));

    // C5 re-weights confidence by volatility regime and drops gated signals.
    let observations: Vec<crate::signals::volatility_filter::SignalObservation> = raw_signals
        .iter()
        .map(|s| crate::signals::volatility_filter::SignalObservation {
            module: s.source.to_string(),
            value: s.signal_strength,
        })
        .collect();
    let _continuity = state.volatility_filter.analyze_signal_continuity(&observations);

    let filtered: Vec<_> = raw_signals
        .into_iter()
        .filter_map(|mut signal| {
            let adjusted = state
                .volatility_filter
                .filter_confidence(signal.confidence, &metrics)?;
            signal.confidence = adjusted;
            Some(signal)
        })
        .collect();

    if filtered.is_empty() {
        return;
    }

    let inputs = FusionInputs {
        signals: filtered,
        market: state.market_context(symbol),
    };
    let candidates = state.candidate_pool.generate_candidates(symbol, inputs);

    for candidate in candidates {
        if state.epl_tx.send(candidate).await.is_err() {
            warn!("EPL channel closed, dropping candidates");
            return;
        }
    }
}
