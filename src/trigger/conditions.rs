// =============================================================================
// Trigger Conditions — detection checks over the rolling price deque
// =============================================================================
//
// Checks run in order on each inbound price update: momentum (1m / 5m / 15m),
// indicator convergence, volume confirmation, support/resistance events. The
// periodic check is a background sweep owned by the engine.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::trigger::state::IndicatorState;
use crate::trigger::winrate::WinRatePrediction;
use crate::types::SignalPriority;

/// Why a trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TriggerReason {
    PriceMomentum1m,
    PriceMomentum5m,
    PriceMomentum15m,
    IndicatorConvergence,
    VolumeConfirmation,
    SupportResistanceEvent,
    PeriodicCheck,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceMomentum1m => write!(f, "PRICE_MOMENTUM_1MIN"),
            Self::PriceMomentum5m => write!(f, "PRICE_MOMENTUM_5MIN"),
            Self::PriceMomentum15m => write!(f, "PRICE_MOMENTUM_15MIN"),
            Self::IndicatorConvergence => write!(f, "INDICATOR_CONVERGENCE"),
            Self::VolumeConfirmation => write!(f, "VOLUME_CONFIRMATION"),
            Self::SupportResistanceEvent => write!(f, "SUPPORT_RESISTANCE_EVENT"),
            Self::PeriodicCheck => write!(f, "PERIODIC_CHECK"),
        }
    }
}

/// A detected trigger, before classification and rate limiting.
#[derive(Debug, Clone)]
pub struct TriggerCondition {
    pub reason: TriggerReason,
    pub priority: SignalPriority,
    pub confidence: f64,
    pub metadata: HashMap<String, Value>,
}

/// The engine's emitted record: a classified, rate-limited trigger with its
/// win-rate prediction and the indicator snapshot it fired on.
#[derive(Debug, Clone, Serialize)]
pub struct IntelligentSignal {
    pub id: String,
    pub symbol: String,
    pub reason: TriggerReason,
    /// Reason tag in wire form (PRICE_MOMENTUM_1MIN, ...).
    pub reason_tag: String,
    pub priority: SignalPriority,
    pub confidence: f64,
    pub win_rate: WinRatePrediction,
    pub indicator_snapshot: IndicatorState,
    /// Detected market-condition tags (trend / range / volatility).
    pub market_conditions: Vec<String>,
    pub risk_assessment: HashMap<String, f64>,
    pub timestamp_ms: i64,
    pub metadata: HashMap<String, Value>,
}

/// One point in the rolling per-symbol price deque.
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub price: f64,
    pub volume: f64,
}

/// Momentum over one lookback window against the deque (oldest-first).
///
/// The reference sample is the most recent point at least `window_ms` old;
/// returns `None` when the deque does not reach that far back.
pub fn momentum_change_pct(
    points: &std::collections::VecDeque<PricePoint>,
    now_ms: i64,
    window_ms: i64,
) -> Option<f64> {
    let current = points.back()?;
    let cutoff = now_ms - window_ms;
    let reference = points.iter().rev().find(|p| p.timestamp_ms <= cutoff)?;
    if reference.price <= 0.0 {
        return None;
    }
    Some((current.price - reference.price) / reference.price * 100.0)
}

/// Momentum checks for the three windows. Thresholds are percentages;
/// confidence is `min(1, |change| / threshold)`.
pub fn check_momentum(
    points: &std::collections::VecDeque<PricePoint>,
    now_ms: i64,
    thresholds_pct: (f64, f64, f64),
) -> Vec<TriggerCondition> {
    let windows = [
        (60_000i64, thresholds_pct.0, TriggerReason::PriceMomentum1m, SignalPriority::High),
        (300_000, thresholds_pct.1, TriggerReason::PriceMomentum5m, SignalPriority::Critical),
        (900_000, thresholds_pct.2, TriggerReason::PriceMomentum15m, SignalPriority::Medium),
    ];

    let mut out = Vec::new();
    for (window_ms, threshold, reason, priority) in windows {
        if threshold <= 0.0 {
            continue;
        }
        let Some(change) = momentum_change_pct(points, now_ms, window_ms) else {
            continue;
        };
        if change.abs() >= threshold {
            let confidence = (change.abs() / threshold).min(1.0);
            let mut metadata = HashMap::new();
            metadata.insert("price_change_pct".into(), Value::from(change));
            metadata.insert("threshold_pct".into(), Value::from(threshold));
            metadata.insert("window_ms".into(), Value::from(window_ms));
            out.push(TriggerCondition {
                reason,
                priority,
                confidence,
                metadata,
            });
        }
    }
    out
}

/// Indicator-convergence check: fires when the aggregate reaches the
/// threshold and enough indicators participate.
pub fn check_convergence(
    state: &IndicatorState,
    threshold: f64,
    minimum_indicators: usize,
) -> Option<TriggerCondition> {
    let c = &state.convergence;
    if c.overall < threshold || c.converging_count < minimum_indicators {
        return None;
    }
    let mut metadata = HashMap::new();
    metadata.insert("rsi_convergence".into(), Value::from(c.rsi));
    metadata.insert("macd_convergence".into(), Value::from(c.macd));
    metadata.insert("bollinger_convergence".into(), Value::from(c.bollinger));
    metadata.insert("volume_convergence".into(), Value::from(c.volume));
    metadata.insert(
        "support_resistance_convergence".into(),
        Value::from(c.support_resistance),
    );
    metadata.insert("overall_convergence".into(), Value::from(c.overall));
    Some(TriggerCondition {
        reason: TriggerReason::IndicatorConvergence,
        priority: SignalPriority::High,
        confidence: c.overall.clamp(0.0, 1.0),
        metadata,
    })
}

/// Volume-confirmation check: spike ratio >= 2.0 fires at Medium.
pub fn check_volume(state: &IndicatorState) -> Option<TriggerCondition> {
    let ratio = state.volume_spike_ratio?;
    if ratio < 2.0 {
        return None;
    }
    let mut metadata = HashMap::new();
    metadata.insert("volume_spike_ratio".into(), Value::from(ratio));
    Some(TriggerCondition {
        reason: TriggerReason::VolumeConfirmation,
        priority: SignalPriority::Medium,
        confidence: (ratio / 3.0).min(1.0),
        metadata,
    })
}

/// Support/resistance event: SR convergence >= 0.7 fires at High.
pub fn check_support_resistance(state: &IndicatorState) -> Option<TriggerCondition> {
    let sr = state.convergence.support_resistance;
    if sr < 0.7 {
        return None;
    }
    let mut metadata = HashMap::new();
    metadata.insert("sr_convergence".into(), Value::from(sr));
    if let Some(support) = state.support {
        metadata.insert("support".into(), Value::from(support));
    }
    if let Some(resistance) = state.resistance {
        metadata.insert("resistance".into(), Value::from(resistance));
    }
    Some(TriggerCondition {
        reason: TriggerReason::SupportResistanceEvent,
        priority: SignalPriority::High,
        confidence: sr,
        metadata,
    })
}

/// Periodic sweep: a Low-priority heartbeat signal for symbols whose overall
/// convergence is above the floor.
pub fn periodic_condition(state: &IndicatorState) -> Option<TriggerCondition> {
    if state.convergence.overall <= 0.3 {
        return None;
    }
    let mut metadata = HashMap::new();
    metadata.insert(
        "overall_convergence".into(),
        Value::from(state.convergence.overall),
    );
    Some(TriggerCondition {
        reason: TriggerReason::PeriodicCheck,
        priority: SignalPriority::Low,
        confidence: 0.5,
        metadata,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn deque(points: &[(i64, f64)]) -> VecDeque<PricePoint> {
        points
            .iter()
            .map(|&(timestamp_ms, price)| PricePoint {
                timestamp_ms,
                price,
                volume: 1.0,
            })
            .collect()
    }

    const T0: i64 = 1_700_000_000_000;

    /// A 100 → 101 move over 60 s (1%) fires the 1-minute
    /// momentum check at High with confidence capped at 1.0.
    #[test]
    fn one_percent_move_fires_1m_momentum() {
        let points = deque(&[(T0, 100.0), (T0 + 60_000, 101.0)]);
        let conditions = check_momentum(&points, T0 + 60_000, (0.5, 2.0, 5.0));
        assert_eq!(conditions.len(), 1);
        let c = &conditions[0];
        assert_eq!(c.reason, TriggerReason::PriceMomentum1m);
        assert_eq!(c.priority, crate::types::SignalPriority::High);
        assert!((c.confidence - 1.0).abs() < 1e-10, "1% / 0.5% caps at 1.0");
    }

    #[test]
    fn small_move_fires_nothing() {
        let points = deque(&[(T0, 100.0), (T0 + 60_000, 100.1)]);
        let conditions = check_momentum(&points, T0 + 60_000, (0.5, 2.0, 5.0));
        assert!(conditions.is_empty());
    }

    #[test]
    fn five_minute_move_fires_critical() {
        let points = deque(&[
            (T0, 100.0),
            (T0 + 100_000, 100.5),
            (T0 + 300_000, 103.0),
        ]);
        let conditions = check_momentum(&points, T0 + 300_000, (100.0, 2.0, 5.0));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, TriggerReason::PriceMomentum5m);
        assert_eq!(conditions[0].priority, crate::types::SignalPriority::Critical);
        // 3% / 2% = 1.5 capped to 1.0.
        assert!((conditions[0].confidence - 1.0).abs() < 1e-10);
    }

    #[test]
    fn momentum_needs_history_reaching_window() {
        // Only 30 s of history: no 1m reference sample.
        let points = deque(&[(T0, 100.0), (T0 + 30_000, 105.0)]);
        let conditions = check_momentum(&points, T0 + 30_000, (0.5, 2.0, 5.0));
        assert!(conditions.is_empty());
    }

    #[test]
    fn downward_momentum_fires_too() {
        let points = deque(&[(T0, 100.0), (T0 + 60_000, 99.0)]);
        let conditions = check_momentum(&points, T0 + 60_000, (0.5, 2.0, 5.0));
        assert_eq!(conditions.len(), 1);
        assert!((conditions[0].confidence - 1.0).abs() < 1e-10);
    }

    #[test]
    fn convergence_requires_threshold_and_count() {
        let weights = crate::runtime_config::IndicatorWeights::default();
        let strong = IndicatorState::from_readings(
            25.0,
            0.0005,
            0.0,
            (100.4, 95.0, 89.6),
            100.0,
            2.8,
            (Some(99.85), None),
            &weights,
        );
        let condition = check_convergence(&strong, 0.75, 3).unwrap();
        assert_eq!(condition.reason, TriggerReason::IndicatorConvergence);
        assert_eq!(condition.priority, crate::types::SignalPriority::High);
        assert!((condition.confidence - strong.convergence.overall).abs() < 1e-12);
        // Per-dimension convergences land in the metadata.
        assert!(condition.metadata.contains_key("rsi_convergence"));
        assert!(condition.metadata.contains_key("overall_convergence"));

        // Too few participants: only MACD converges.
        let weak = IndicatorState::from_readings(
            50.0,
            0.0005,
            0.0,
            (200.0, 150.0, 100.0),
            150.0,
            1.0,
            (None, None),
            &weights,
        );
        assert!(check_convergence(&weak, 0.75, 3).is_none());
    }

    #[test]
    fn volume_confirmation_at_two_x() {
        let mut state = IndicatorState::default();
        state.volume_spike_ratio = Some(2.4);
        let condition = check_volume(&state).unwrap();
        assert_eq!(condition.priority, crate::types::SignalPriority::Medium);
        assert!((condition.confidence - 0.8).abs() < 1e-10);

        state.volume_spike_ratio = Some(1.5);
        assert!(check_volume(&state).is_none());
    }

    #[test]
    fn support_resistance_event_at_point_seven() {
        let weights = crate::runtime_config::IndicatorWeights::default();
        let state = IndicatorState::from_readings(
            50.0,
            1.0,
            0.0,
            (200.0, 150.0, 100.0),
            100.0,
            1.0,
            (Some(99.85), None), // 0.15% away => 0.9
            &weights,
        );
        let condition = check_support_resistance(&state).unwrap();
        assert_eq!(condition.reason, TriggerReason::SupportResistanceEvent);
        assert!((condition.confidence - 0.9).abs() < 1e-10);
    }

    #[test]
    fn periodic_needs_convergence_floor() {
        let mut state = IndicatorState::default();
        state.convergence.overall = 0.2;
        assert!(periodic_condition(&state).is_none());
        state.convergence.overall = 0.4;
        let condition = periodic_condition(&state).unwrap();
        assert_eq!(condition.reason, TriggerReason::PeriodicCheck);
        assert_eq!(condition.priority, crate::types::SignalPriority::Low);
        assert!((condition.confidence - 0.5).abs() < 1e-10);
    }

    #[test]
    fn reason_wire_tags() {
        assert_eq!(TriggerReason::PriceMomentum1m.to_string(), "PRICE_MOMENTUM_1MIN");
        assert_eq!(TriggerReason::IndicatorConvergence.to_string(), "INDICATOR_CONVERGENCE");
        assert_eq!(TriggerReason::PeriodicCheck.to_string(), "PERIODIC_CHECK");
    }
}
