// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are read-only: the core exposes
// health and status, never control. CORS is configured permissively for
// development; tighten `allowed_origins` in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::CoreState;

// =============================================================================
// Router construction
// =============================================================================

/// Build the status API router with CORS middleware and shared state.
pub fn router(state: Arc<CoreState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(full_status))
        .route("/api/v1/pool", get(pool_candidates))
        .route("/api/v1/regime", get(regime))
        .route("/api/v1/prices", get(prices))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_s: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<CoreState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        uptime_s: state.uptime_s(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full status snapshot
// =============================================================================

async fn full_status(State(state): State<Arc<CoreState>>) -> impl IntoResponse {
    let snapshot = serde_json::json!({
        "uptime_s": state.uptime_s(),
        "market_data": state.driver.get_status(),
        "onchain": state.onchain.get_system_status(),
        "trigger": state.trigger_engine.stats(),
        "pool": state.candidate_pool.get_performance_report(),
        "volatility_filter_dropped": state.volatility_filter.dropped_total(),
    });
    Json(snapshot)
}

// =============================================================================
// Candidate pool
// =============================================================================

async fn pool_candidates(State(state): State<Arc<CoreState>>) -> impl IntoResponse {
    // Priority 5 includes the whole ranked pool.
    let candidates = state.candidate_pool.get_candidates_by_priority(5);
    Json(candidates)
}

// =============================================================================
// Regime
// =============================================================================

async fn regime(State(state): State<Arc<CoreState>>) -> impl IntoResponse {
    Json(state.candidate_pool.current_regime())
}

// =============================================================================
// Prices (on-chain view with fallback attribution)
// =============================================================================

async fn prices(State(state): State<Arc<CoreState>>) -> impl IntoResponse {
    Json(state.onchain.get_all_prices())
}
