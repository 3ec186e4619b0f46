// =============================================================================
// Trigger Engine — rolling state, ordered checks, classified emission
// =============================================================================
//
// Consumes price updates from the market data driver (or the on-chain
// connector's feed), keeps a bounded per-symbol price deque (capacity 1000),
// recomputes indicator state at >= 50 points, runs the trigger checks in
// order, and emits `IntelligentSignal` records that clear classification and
// the rate limiter. The periodic sweep runs from the engine's scan task.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::trigger::conditions::{
    check_convergence, check_momentum, check_support_resistance, check_volume,
    periodic_condition, IntelligentSignal, PricePoint, TriggerCondition,
};
use crate::trigger::rate_limit::RateLimiter;
use crate::trigger::state::{IndicatorState, MIN_POINTS};
use crate::trigger::winrate;
use crate::runtime_config::TriggerConfig;

/// Price deque capacity per symbol.
const BOOK_CAPACITY: usize = 1000;

/// Emission statistics for the status report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerStats {
    pub emitted_total: u64,
    pub suppressed_total: u64,
    pub symbols_tracked: usize,
}

/// The C3 intelligent trigger engine.
pub struct TriggerEngine {
    config: TriggerConfig,
    books: RwLock<HashMap<String, VecDeque<PricePoint>>>,
    states: RwLock<HashMap<String, IndicatorState>>,
    limiter: RateLimiter,
    emitted_total: AtomicU64,
}

impl TriggerEngine {
    pub fn new(config: TriggerConfig) -> Self {
        let limiter = RateLimiter::new(
            config.high_priority_max_signals_per_hour,
            config.observation_max_signals_per_hour,
        );
        Self {
            config,
            books: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            limiter,
            emitted_total: AtomicU64::new(0),
        }
    }

    /// Feed one price update; returns the signals it fired (possibly none).
    pub fn on_price_update(
        &self,
        symbol: &str,
        price: f64,
        volume: f64,
        now_ms: i64,
    ) -> Vec<IntelligentSignal> {
        if price <= 0.0 {
            return Vec::new();
        }

        // --- Update the rolling deque --------------------------------------
        {
            let mut books = self.books.write();
            let book = books
                .entry(symbol.to_string())
                .or_insert_with(|| VecDeque::with_capacity(BOOK_CAPACITY));
            book.push_back(PricePoint {
                timestamp_ms: now_ms,
                price,
                volume,
            });
            while book.len() > BOOK_CAPACITY {
                book.pop_front();
            }
        }

        // --- Recompute indicator state at sufficient depth ------------------
        let state = {
            let books = self.books.read();
            let book = &books[symbol];
            if book.len() >= MIN_POINTS {
                let closes: Vec<f64> = book.iter().map(|p| p.price).collect();
                let volumes: Vec<f64> = book.iter().map(|p| p.volume).collect();
                IndicatorState::compute(&closes, &volumes, &self.config.indicator_weights)
            } else {
                None
            }
        };
        if let Some(state) = &state {
            self.states.write().insert(symbol.to_string(), state.clone());
        }

        // --- Ordered trigger checks ----------------------------------------
        let mut conditions: Vec<TriggerCondition> = Vec::new();
        {
            let books = self.books.read();
            conditions.extend(check_momentum(
                &books[symbol],
                now_ms,
                (
                    self.config.momentum_1m_threshold_pct,
                    self.config.momentum_5m_threshold_pct,
                    self.config.momentum_15m_threshold_pct,
                ),
            ));
        }
        if let Some(state) = &state {
            if let Some(c) = check_convergence(
                state,
                self.config.convergence_score_threshold,
                self.config.minimum_indicators,
            ) {
                conditions.push(c);
            }
            if let Some(c) = check_volume(state) {
                conditions.push(c);
            }
            if let Some(c) = check_support_resistance(state) {
                conditions.push(c);
            }
        }
        conditions.truncate(self.config.max_concurrent_triggers);

        conditions
            .into_iter()
            .filter_map(|condition| self.finalize(symbol, condition, state.as_ref(), now_ms))
            .collect()
    }

    /// Background sweep: Low-priority periodic signals for symbols whose
    /// overall convergence clears the floor.
    pub fn periodic_scan(&self, now_ms: i64) -> Vec<IntelligentSignal> {
        let states: Vec<(String, IndicatorState)> = self
            .states
            .read()
            .iter()
            .map(|(s, st)| (s.clone(), st.clone()))
            .collect();

        let mut out = Vec::new();
        for (symbol, state) in states {
            if let Some(condition) = periodic_condition(&state) {
                if let Some(signal) = self.finalize(&symbol, condition, Some(&state), now_ms) {
                    out.push(signal);
                }
            }
        }
        out
    }

    /// Classify, rate-limit, and assemble the emitted record.
    fn finalize(
        &self,
        symbol: &str,
        condition: TriggerCondition,
        state: Option<&IndicatorState>,
        now_ms: i64,
    ) -> Option<IntelligentSignal> {
        let overall_convergence = state.map(|s| s.convergence.overall).unwrap_or(0.0);
        let prediction = winrate::predict(condition.reason, condition.confidence, overall_convergence);

        let band = winrate::classify(prediction.win_rate, condition.confidence, &self.config)?;

        if !self
            .limiter
            .try_acquire(symbol, condition.priority, now_ms)
        {
            return None;
        }

        let snapshot = state.cloned().unwrap_or_default();
        let volatility = snapshot
            .bollinger_middle
            .zip(snapshot.bollinger_upper)
            .map(|(mid, upper)| if mid > 0.0 { (upper - mid) / mid / 2.0 } else { 0.0 })
            .unwrap_or(0.0);
        let liquidity_ratio = snapshot.volume_spike_ratio.unwrap_or(1.0);
        let risk_assessment = winrate::assess_risk(condition.reason, volatility, liquidity_ratio);

        let market_conditions = derive_market_conditions(&snapshot);

        let mut metadata = condition.metadata;
        metadata.insert("band".into(), Value::from(format!("{band:?}")));

        self.emitted_total.fetch_add(1, Ordering::Relaxed);
        debug!(
            symbol = %symbol,
            reason = %condition.reason,
            priority = %condition.priority,
            win_rate = prediction.win_rate,
            "trigger emitted"
        );

        Some(IntelligentSignal {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            reason: condition.reason,
            reason_tag: condition.reason.to_string(),
            priority: condition.priority,
            confidence: condition.confidence,
            win_rate: prediction,
            indicator_snapshot: snapshot,
            market_conditions,
            risk_assessment,
            timestamp_ms: now_ms,
            metadata,
        })
    }

    pub fn stats(&self) -> TriggerStats {
        TriggerStats {
            emitted_total: self.emitted_total.load(Ordering::Relaxed),
            suppressed_total: self.limiter.suppressed_total(),
            symbols_tracked: self.books.read().len(),
        }
    }

    pub fn indicator_state(&self, symbol: &str) -> Option<IndicatorState> {
        self.states.read().get(symbol).cloned()
    }

    pub fn scan_interval_seconds(&self) -> u64 {
        self.config.scan_interval_seconds
    }
}

/// Tag the market conditions visible in the indicator snapshot.
fn derive_market_conditions(state: &IndicatorState) -> Vec<String> {
    let mut tags = Vec::new();

    if let (Some(upper), Some(middle), Some(lower)) = (
        state.bollinger_upper,
        state.bollinger_middle,
        state.bollinger_lower,
    ) {
        if middle > 0.0 {
            let width = (upper - lower) / middle;
            if width > 0.05 {
                tags.push("volatile".to_string());
            } else if width < 0.01 {
                tags.push("ranging".to_string());
            }
        }
    }

    if let Some(rsi) = state.rsi {
        if rsi >= 70.0 {
            tags.push("trending_up".to_string());
        } else if rsi <= 30.0 {
            tags.push("trending_down".to_string());
        }
    }

    if state.volume_spike_ratio.map(|r| r >= 2.0).unwrap_or(false) {
        tags.push("high_volume".to_string());
    }

    if tags.is_empty() {
        tags.push("normal".to_string());
    }
    tags
}

// =============================================================================
// Tests
// =============================================================================
