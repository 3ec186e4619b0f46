// =============================================================================
// Central Core State — Vertex Signal Core
// =============================================================================
//
// Ties the explicitly constructed subsystem handles together: the market
// data driver (C1), the on-chain connector (C2), the trigger engine (C3),
// the Phase-1A generator (C4), the Phase-1B filter (C5), and the unified
// candidate pool (C6). The main binary wires them; tests inject fakes.
//
// Thread safety:
//   - Arc handles for subsystems that manage their own interior mutability.
//   - parking_lot locks for the shared pending-signal queues.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::market_data::MarketDataDriver;
use crate::onchain::OnchainPriceConnector;
use crate::pool::candidate_pool::MarketContext;
use crate::pool::{RawSignal, SignalSource, SignalType, StandardizedSignal, UnifiedSignalCandidatePool};
use crate::runtime_config::RuntimeConfig;
use crate::signals::basic_generator::{BasicSignal, BasicSignalGenerator, BasicSignalType};
use crate::signals::volatility_filter::{VolatilityFilter, VolatilityMetrics};
use crate::trigger::conditions::IntelligentSignal;
use crate::trigger::{TriggerEngine, TriggerReason};

/// Capacity of the EPL output channel.
const EPL_CHANNEL_CAPACITY: usize = 1024;

/// Central state shared across all async tasks via `Arc<CoreState>`.
pub struct CoreState {
    pub config: RuntimeConfig,
    pub driver: Arc<MarketDataDriver>,
    pub onchain: Arc<OnchainPriceConnector>,
    pub trigger_engine: Arc<TriggerEngine>,
    pub basic_generator: Arc<BasicSignalGenerator>,
    pub volatility_filter: Arc<VolatilityFilter>,
    pub candidate_pool: Arc<UnifiedSignalCandidatePool>,

    /// Converted signals waiting for the next scoring pass, per symbol.
    pending: Mutex<HashMap<String, Vec<RawSignal>>>,

    /// Downstream EPL boundary (in-process channel in single-binary mode).
    pub epl_tx: mpsc::Sender<StandardizedSignal>,

    start_time: Instant,
}

impl CoreState {
    /// Wire all subsystems from the configuration. Returns the state and the
    /// EPL-side receiver for emitted candidates.
    pub fn new(config: RuntimeConfig) -> Result<(Arc<Self>, mpsc::Receiver<StandardizedSignal>)> {
        let driver = MarketDataDriver::new(config.market_data.clone());
        let onchain = OnchainPriceConnector::new(
            config.onchain.clone(),
            config.symbols.clone(),
            driver.clone(),
        )?;
        let trigger_engine = Arc::new(TriggerEngine::new(config.trigger.clone()));
        let basic_generator = Arc::new(BasicSignalGenerator::new());
        let volatility_filter = Arc::new(VolatilityFilter::new(config.volatility_filter.clone()));
        let candidate_pool = Arc::new(UnifiedSignalCandidatePool::new(config.pool.clone()));

        let (epl_tx, epl_rx) = mpsc::channel(EPL_CHANNEL_CAPACITY);

        let state = Arc::new(Self {
            config,
            driver,
            onchain,
            trigger_engine,
            basic_generator,
            volatility_filter,
            candidate_pool,
            pending: Mutex::new(HashMap::new()),
            epl_tx,
            start_time: Instant::now(),
        });
        Ok((state, epl_rx))
    }

    pub fn uptime_s(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Queue a converted signal for the next scoring pass of its symbol.
    pub fn push_pending(&self, symbol: &str, signal: RawSignal) {
        self.pending
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .push(signal);
    }

    /// Drain the pending queue for one symbol.
    pub fn drain_pending(&self, symbol: &str) -> Vec<RawSignal> {
        self.pending.lock().remove(symbol).unwrap_or_default()
    }

    /// Build the market-context view for one scoring pass from the driver's
    /// snapshot buffer.
    pub fn market_context(&self, symbol: &str) -> MarketContext {
        let recent = self.driver.buffer().recent(symbol, 300);
        let mut context = MarketContext::default();
        let Some(latest) = recent.last() else {
            context.data_completeness = 0.0;
            return context;
        };

        // 5-minute change from the oldest snapshot within the window.
        let cutoff = latest.timestamp - 300_000;
        if let Some(reference) = recent.iter().find(|s| s.timestamp >= cutoff) {
            if reference.price > 0.0 {
                context.five_min_change_pct =
                    (latest.price - reference.price) / reference.price * 100.0;
            }
        }

        context.volume_surge_multiplier = latest.volume_ratio.max(0.0);
        context.volatility_percentile = (latest.volatility * 50.0).clamp(0.0, 1.0);
        context.data_completeness = latest.data_quality;
        context.volume_24h = latest.volume;
        if latest.liquidity_ratio > 0.0 && latest.volume > 0.0 {
            context.orderbook_depth = latest.volume / latest.liquidity_ratio;
        }
        context
    }
}

// =============================================================================
// Signal conversion at the fusion boundary
// =============================================================================

/// Map a trigger-engine signal into the pool's indicator-source form.
///
/// Momentum and periodic triggers map to the RSI (momentum-oscillator)
/// family, convergence to its dominant indicator, volume confirmation to the
/// volume family, and support/resistance events to the band family.
pub fn intelligent_to_raw(signal: &IntelligentSignal) -> RawSignal {
    let signal_type = match signal.reason {
        TriggerReason::VolumeConfirmation => SignalType::VolumeSignal,
        TriggerReason::SupportResistanceEvent => SignalType::BbSignal,
        TriggerReason::IndicatorConvergence => {
            let c = &signal.indicator_snapshot.convergence;
            if c.macd >= c.rsi && c.macd >= c.bollinger {
                SignalType::MacdSignal
            } else if c.rsi >= c.bollinger {
                SignalType::RsiSignal
            } else {
                SignalType::BbSignal
            }
        }
        _ => SignalType::RsiSignal,
    };

    let mut metadata: HashMap<String, Value> = signal.metadata.clone();
    metadata.insert("trigger_reason".into(), Value::from(signal.reason_tag.clone()));
    metadata.insert("priority".into(), Value::from(signal.priority.to_string()));
    metadata.insert(
        "predicted_win_rate".into(),
        Value::from(signal.win_rate.win_rate),
    );

    RawSignal {
        symbol: signal.symbol.clone(),
        signal_type,
        // Strength tracks the predicted edge over a coin flip.
        signal_strength: ((signal.win_rate.win_rate - 0.3) / 0.65).clamp(0.0, 1.0),
        confidence: signal.confidence,
        source: SignalSource::IndicatorGraph,
        quality_score: None,
        stability_score: None,
        tier: None,
        timestamp_ms: signal.timestamp_ms,
        metadata,
    }
}

/// Map a Phase-1A signal into the pool's form.
pub fn basic_to_raw(signal: &BasicSignal) -> RawSignal {
    let signal_type = match signal.signal_type {
        BasicSignalType::PriceBreakout => SignalType::PriceBreakout,
        BasicSignalType::VolumeSurge => SignalType::VolumeSurge,
        BasicSignalType::MomentumShift => SignalType::MomentumShift,
        BasicSignalType::ExtremeEvent => SignalType::ExtremeEvent,
    };
    RawSignal {
        symbol: signal.symbol.clone(),
        signal_type,
        signal_strength: signal.signal_strength,
        confidence: signal.confidence,
        source: SignalSource::Phase1a,
        quality_score: Some(signal.quality_score),
        stability_score: None,
        tier: None,
        timestamp_ms: signal.timestamp_ms,
        metadata: HashMap::new(),
    }
}

/// Derive Phase-1B typed signals from the volatility profile.
pub fn volatility_to_raw(
    symbol: &str,
    metrics: &VolatilityMetrics,
    now_ms: i64,
) -> Vec<RawSignal> {
    let mut out = Vec::new();

    // Expanding volatility at the top of its range: breakout conditions.
    if metrics.volatility_percentile > 0.9 && metrics.volatility_trend > 0.3 {
        out.push(phase1b_raw(
            symbol,
            SignalType::VolatilityBreakout,
            metrics.volatility_percentile,
            metrics.volatility_percentile,
            now_ms,
        ));
    }

    // Unstable regime: the volatility structure itself is shifting.
    if metrics.regime_stability < 0.3 {
        out.push(phase1b_raw(
            symbol,
            SignalType::RegimeChange,
            (1.0 - metrics.regime_stability).clamp(0.0, 1.0),
            (1.0 - metrics.regime_stability).clamp(0.0, 1.0),
            now_ms,
        ));
    }

    // Quiet and stable at the bottom of the range: mean-reversion setup.
    if metrics.volatility_percentile < 0.2 && metrics.regime_stability > 0.7 {
        out.push(phase1b_raw(
            symbol,
            SignalType::MeanReversion,
            1.0 - metrics.volatility_percentile,
            metrics.regime_stability,
            now_ms,
        ));
    }

    out
}

fn phase1b_raw(
    symbol: &str,
    signal_type: SignalType,
    strength: f64,
    stability: f64,
    now_ms: i64,
) -> RawSignal {
    RawSignal {
        symbol: symbol.to_string(),
        signal_type,
        signal_strength: strength.clamp(0.0, 1.0),
        confidence: 0.7,
        source: SignalSource::Phase1b,
        quality_score: None,
        stability_score: Some(stability.clamp(0.0, 1.0)),
        tier: None,
        timestamp_ms: now_ms,
        metadata: HashMap::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::validators;
    use crate::trigger::winrate;
    use crate::types::SignalPriority;

    const T0: i64 = 1_700_000_000_000;

    fn intelligent(reason: TriggerReason, confidence: f64) -> IntelligentSignal {
        IntelligentSignal {
            id: "test".into(),
            symbol: "BTCUSDT".into(),
            reason,
            reason_tag: reason.to_string(),
            priority: SignalPriority::High,
            confidence,
            win_rate: winrate::predict(reason, confidence, 0.5),
            indicator_snapshot: Default::default(),
            market_conditions: vec!["normal".into()],
            risk_assessment: HashMap::new(),
            timestamp_ms: T0,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn trigger_signal_converts_to_valid_indicator_raw() {
        let signal = intelligent(TriggerReason::IndicatorConvergence, 0.85);
        let raw = intelligent_to_raw(&signal);
        assert_eq!(raw.source, SignalSource::IndicatorGraph);
        assert!((0.0..=1.0).contains(&raw.signal_strength));
        assert!(validators::validate(&raw), "converted signal must clear the gate");
        assert_eq!(raw.metadata["trigger_reason"], Value::from("INDICATOR_CONVERGENCE"));
    }

    #[test]
    fn volume_trigger_maps_to_volume_family() {
        let signal = intelligent(TriggerReason::VolumeConfirmation, 0.8);
        let raw = intelligent_to_raw(&signal);
        assert_eq!(raw.signal_type, SignalType::VolumeSignal);
    }

    #[test]
    fn low_confidence_trigger_fails_pool_gate() {
        // Periodic signals carry confidence 0.5 — under the 0.65 indicator
        // gate, the pool drops them at entry.
        let signal = intelligent(TriggerReason::PeriodicCheck, 0.5);
        let raw = intelligent_to_raw(&signal);
        assert!(!validators::validate(&raw));
    }

    #[test]
    fn basic_signal_converts_with_quality() {
        let basic = BasicSignal {
            symbol: "ETHUSDT".into(),
            signal_type: BasicSignalType::VolumeSurge,
            signal_strength: 0.7,
            confidence: 0.75,
            quality_score: 0.8,
            timestamp_ms: T0,
        };
        let raw = basic_to_raw(&basic);
        assert_eq!(raw.source, SignalSource::Phase1a);
        assert_eq!(raw.signal_type, SignalType::VolumeSurge);
        assert!(validators::validate(&raw));
    }

    #[test]
    fn volatility_breakout_derivation() {
        let metrics = VolatilityMetrics {
            current_volatility: 0.8,
            volatility_trend: 0.6,
            volatility_percentile: 0.95,
            regime_stability: 0.6,
            micro_volatility: 0.5,
            intraday_volatility: 0.7,
            timestamp_ms: T0,
        };
        let signals = volatility_to_raw("BTCUSDT", &metrics, T0);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::VolatilityBreakout);
        assert!(validators::validate(&signals[0]));
    }

    #[test]
    fn calm_market_derives_mean_reversion() {
        let metrics = VolatilityMetrics {
            current_volatility: 0.05,
            volatility_trend: -0.1,
            volatility_percentile: 0.1,
            regime_stability: 0.9,
            micro_volatility: 0.2,
            intraday_volatility: 0.1,
            timestamp_ms: T0,
        };
        let signals = volatility_to_raw("BTCUSDT", &metrics, T0);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::MeanReversion);
        assert!(validators::validate(&signals[0]));
    }

    #[test]
    fn mid_range_volatility_derives_nothing() {
        let metrics = VolatilityMetrics {
            current_volatility: 0.3,
            volatility_trend: 0.0,
            volatility_percentile: 0.5,
            regime_stability: 0.6,
            micro_volatility: 0.5,
            intraday_volatility: 0.4,
            timestamp_ms: T0,
        };
        assert!(volatility_to_raw("BTCUSDT", &metrics, T0).is_empty());
    }

    #[tokio::test]
    async fn pending_queue_roundtrip() {
        let (state, _epl_rx) = CoreState::new(RuntimeConfig::default()).unwrap();
        assert!(state.drain_pending("BTCUSDT").is_empty());

        let basic = BasicSignal {
            symbol: "BTCUSDT".into(),
            signal_type: BasicSignalType::PriceBreakout,
            signal_strength: 0.8,
            confidence: 0.8,
            quality_score: 0.7,
            timestamp_ms: T0,
        };
        state.push_pending("BTCUSDT", basic_to_raw(&basic));
        state.push_pending("BTCUSDT", basic_to_raw(&basic));
        assert_eq!(state.drain_pending("BTCUSDT").len(), 2);
        assert!(state.drain_pending("BTCUSDT").is_empty());
    }

    #[tokio::test]
    async fn market_context_defaults_without_data() {
        let (state, _epl_rx) = CoreState::new(RuntimeConfig::default()).unwrap();
        let context = state.market_context("BTCUSDT");
        assert_eq!(context.data_completeness, 0.0);
        assert_eq!(context.five_min_change_pct, 0.0);
    }
}
