// =============================================================================
// Win-Rate Prediction, Classification & Risk Assessment
// =============================================================================
//
// Each trigger type carries a base win rate from historical performance.
// The prediction adjusts for the trigger's confidence and the symbol's
// overall indicator convergence, clamped to [0.30, 0.95]. The classifier
// places the (win rate, confidence) pair into one of three bands; triggers
// that land in no band are not emitted.

use std::collections::HashMap;

use serde::Serialize;

use crate::trigger::conditions::TriggerReason;
use crate::runtime_config::TriggerConfig;

/// Prediction clamp bounds.
const WIN_RATE_FLOOR: f64 = 0.30;
const WIN_RATE_CEIL: f64 = 0.95;

/// Heuristic win-rate prediction attached to every emitted signal.
#[derive(Debug, Clone, Serialize)]
pub struct WinRatePrediction {
    pub win_rate: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub sample_size: u32,
    /// Base rates per trigger type, carried for the downstream scorer.
    pub historical_performance: HashMap<String, f64>,
}

/// Classification band for an emitted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalBand {
    HighPriority,
    Observation,
    LowPriority,
}

/// Base win rate per trigger type.
pub fn base_win_rate(reason: TriggerReason) -> f64 {
    match reason {
        TriggerReason::PriceMomentum1m => 0.65,
        TriggerReason::PriceMomentum5m => 0.72,
        TriggerReason::PriceMomentum15m => 0.58,
        TriggerReason::IndicatorConvergence => 0.78,
        TriggerReason::VolumeConfirmation => 0.62,
        TriggerReason::SupportResistanceEvent => 0.68,
        TriggerReason::PeriodicCheck => 0.50,
    }
}

/// Predict the win rate for a trigger.
///
/// `base + (confidence − 0.5)·0.2 + overall_convergence·0.15`, clamped to
/// [0.30, 0.95]. Confidence-interval half-width is `0.1·(1 − confidence)`.
pub fn predict(
    reason: TriggerReason,
    confidence: f64,
    overall_convergence: f64,
) -> WinRatePrediction {
    let base = base_win_rate(reason);
    let adjusted = base + (confidence - 0.5) * 0.2 + overall_convergence * 0.15;
    let win_rate = adjusted.clamp(WIN_RATE_FLOOR, WIN_RATE_CEIL);
    let half_width = 0.1 * (1.0 - confidence.clamp(0.0, 1.0));

    let mut historical_performance = HashMap::new();
    historical_performance.insert(reason.to_string(), base);

    WinRatePrediction {
        win_rate,
        ci_lower: (win_rate - half_width).max(0.0),
        ci_upper: (win_rate + half_width).min(1.0),
        sample_size: 100,
        historical_performance,
    }
}

/// Place a (win rate, confidence) pair into its band, in order of
/// strictness. `None` means the trigger is not emitted.
pub fn classify(win_rate: f64, confidence: f64, config: &TriggerConfig) -> Option<SignalBand> {
    if win_rate >= config.high_priority_win_rate_threshold
        && confidence >= config.high_priority_min_confidence
    {
        return Some(SignalBand::HighPriority);
    }
    let (obs_lo, obs_hi) = config.observation_win_rate_range;
    if (obs_lo..=obs_hi).contains(&win_rate) && confidence >= 0.60 {
        return Some(SignalBand::Observation);
    }
    if win_rate >= obs_lo {
        return Some(SignalBand::LowPriority);
    }
    None
}

/// Risk assessment: base 0.5 plus volatility and liquidity penalties and a
/// per-trigger-type adjustment, clamped to [0.1, 0.9]. Sub-scores returned
/// alongside the total.
pub fn assess_risk(
    reason: TriggerReason,
    volatility: f64,
    liquidity_ratio: f64,
) -> HashMap<String, f64> {
    let volatility_penalty = (volatility * 5.0).clamp(0.0, 0.25);
    let liquidity_penalty = if liquidity_ratio > 0.0 && liquidity_ratio < 0.3 {
        0.15
    } else {
        0.0
    };
    let type_adjustment = match reason {
        TriggerReason::PriceMomentum15m => 0.1, // Slow momentum fades.
        TriggerReason::IndicatorConvergence => -0.1,
        TriggerReason::SupportResistanceEvent => -0.05,
        _ => 0.0,
    };

    let total = (0.5 + volatility_penalty + liquidity_penalty + type_adjustment).clamp(0.1, 0.9);

    let mut scores = HashMap::new();
    scores.insert("base".into(), 0.5);
    scores.insert("volatility_penalty".into(), volatility_penalty);
    scores.insert("liquidity_penalty".into(), liquidity_penalty);
    scores.insert("type_adjustment".into(), type_adjustment);
    scores.insert("total".into(), total);
    scores
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// A 1-minute momentum trigger at full confidence with no
    /// convergence context predicts a win rate inside [0.70, 0.80].
    #[test]
    fn momentum_1m_full_confidence_prediction() {
        let prediction = predict(TriggerReason::PriceMomentum1m, 1.0, 0.0);
        assert!(
            (0.70..=0.80).contains(&prediction.win_rate),
            "got {}",
            prediction.win_rate
        );
        // Full confidence collapses the interval.
        assert!((prediction.ci_upper - prediction.ci_lower).abs() < 1e-10);
    }

    #[test]
    fn prediction_clamps_to_bounds() {
        // Strong everything still caps at 0.95.
        let high = predict(TriggerReason::IndicatorConvergence, 1.0, 1.0);
        assert!(high.win_rate <= 0.95);
        // Weak everything floors at 0.30.
        let low = predict(TriggerReason::PeriodicCheck, 0.0, 0.0);
        assert!(low.win_rate >= 0.30);
    }

    #[test]
    fn ci_half_width_scales_with_confidence() {
        let p = predict(TriggerReason::PriceMomentum5m, 0.5, 0.0);
        // Half width = 0.1 * 0.5 = 0.05.
        assert!((p.ci_upper - p.win_rate - 0.05).abs() < 1e-10);
        assert!((p.win_rate - p.ci_lower - 0.05).abs() < 1e-10);
    }

    #[test]
    fn base_rates_ordering() {
        // Convergence is the strongest base, slow momentum the weakest
        // actionable one.
        assert!(base_win_rate(TriggerReason::IndicatorConvergence) > base_win_rate(TriggerReason::PriceMomentum5m));
        assert!(base_win_rate(TriggerReason::PriceMomentum15m) < base_win_rate(TriggerReason::PriceMomentum1m));
        assert!((base_win_rate(TriggerReason::PriceMomentum5m) - 0.72).abs() < 1e-10);
        assert!((base_win_rate(TriggerReason::PriceMomentum15m) - 0.58).abs() < 1e-10);
        assert!((base_win_rate(TriggerReason::IndicatorConvergence) - 0.78).abs() < 1e-10);
    }

    #[test]
    fn classification_bands() {
        let config = TriggerConfig::default();
        assert_eq!(
            classify(0.80, 0.85, &config),
            Some(SignalBand::HighPriority)
        );
        // High win rate but low confidence drops to low-priority (outside the
        // observation range too).
        assert_eq!(classify(0.80, 0.50, &config), Some(SignalBand::LowPriority));
        assert_eq!(classify(0.60, 0.70, &config), Some(SignalBand::Observation));
        // In-range win rate with weak confidence still clears low-priority.
        assert_eq!(classify(0.60, 0.40, &config), Some(SignalBand::LowPriority));
        // Below 0.40 nothing is emitted.
        assert_eq!(classify(0.35, 0.90, &config), None);
    }

    #[test]
    fn risk_assessment_bounds_and_parts() {
        let calm = assess_risk(TriggerReason::IndicatorConvergence, 0.0, 1.0);
        assert!((calm["total"] - 0.4).abs() < 1e-10);

        let wild = assess_risk(TriggerReason::PriceMomentum15m, 0.2, 0.1);
        // 0.5 + 0.25 (capped) + 0.15 + 0.1 = 1.0 clamped to 0.9.
        assert!((wild["total"] - 0.9).abs() < 1e-10);

        for scores in [&calm, &wild] {
            assert!(scores["total"] >= 0.1 && scores["total"] <= 0.9);
            assert!(scores.contains_key("volatility_penalty"));
            assert!(scores.contains_key("liquidity_penalty"));
            assert!(scores.contains_key("type_adjustment"));
        }
    }
}
