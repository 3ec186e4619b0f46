// =============================================================================
// Seven-Dimensional Scorer
// =============================================================================
//
// Weighted sum over seven quality dimensions, then a model fine-tune in
// [-0.1, +0.1]. Scoring is pure over its inputs: the same signal, context,
// and learner view always produce the same score.

use serde::Serialize;

use crate::pool::learner::AdaptiveLearner;
use crate::pool::types::{RawSignal, SevenDimensionalScore, SignalSource, SignalType};
use crate::pool::validators;
use crate::types::TradingSession;

/// Dimension weights (sum to 1.0).
const W_SIGNAL_STRENGTH: f64 = 0.25;
const W_CONFIDENCE: f64 = 0.20;
const W_DATA_QUALITY: f64 = 0.15;
const W_MARKET_CONSISTENCY: f64 = 0.12;
const W_TIME_EFFECT: f64 = 0.10;
const W_LIQUIDITY_FACTOR: f64 = 0.10;
const W_HISTORICAL_ACCURACY: f64 = 0.08;

/// Market observations the scorer reads; fixed for one scoring pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringContext {
    /// Fraction of upstream feeds that delivered data, [0, 1].
    pub data_completeness: f64,
    /// Correlation of the symbol with the market leader, [0, 1].
    pub btc_correlation: f64,
    pub volume_24h: f64,
    pub orderbook_depth: f64,
    pub session: TradingSession,
}

impl Default for ScoringContext {
    fn default() -> Self {
        Self {
            data_completeness: 0.8,
            btc_correlation: 0.7,
            volume_24h: 0.0,
            orderbook_depth: 1000.0,
            session: TradingSession::American,
        }
    }
}

/// Score one signal. `confidence` is the post-fusion (re-weighted) value.
pub fn score_signal(
    signal: &RawSignal,
    confidence: f64,
    context: &ScoringContext,
    learner: &AdaptiveLearner,
) -> SevenDimensionalScore {
    let signal_strength = signal.signal_strength.clamp(0.0, 1.0);
    let confidence = confidence.clamp(0.0, 1.0);
    let data_quality = data_quality(signal, context);
    let market_consistency = market_consistency(context);
    let time_effect = time_effect(signal, context);
    let liquidity_factor = liquidity_factor(context);
    let historical_accuracy = historical_accuracy(signal.source, learner);

    let comprehensive_score = signal_strength * W_SIGNAL_STRENGTH
        + confidence * W_CONFIDENCE
        + data_quality * W_DATA_QUALITY
        + market_consistency * W_MARKET_CONSISTENCY
        + time_effect * W_TIME_EFFECT
        + liquidity_factor * W_LIQUIDITY_FACTOR
        + historical_accuracy * W_HISTORICAL_ACCURACY;

    let ai_enhancement = ai_enhancement(signal_strength, confidence);

    SevenDimensionalScore {
        signal_strength,
        confidence,
        data_quality,
        market_consistency,
        time_effect,
        liquidity_factor,
        historical_accuracy,
        comprehensive_score,
        ai_enhancement,
    }
}

/// `mean(timestamp_present, upstream_completeness, passes_range_validator)`.
fn data_quality(signal: &RawSignal, context: &ScoringContext) -> f64 {
    let timestamp_present = if signal.timestamp_ms > 0 { 1.0 } else { 0.0 };
    let range_valid = if validators::validate_strength_range(signal) {
        1.0
    } else {
        0.0
    };
    (timestamp_present + context.data_completeness.clamp(0.0, 1.0) + range_valid) / 3.0
}

/// `(btc_correlation + sentiment_alignment) / 2` with sentiment held at its
/// baseline of 0.8 (no sentiment feed in the core).
fn market_consistency(context: &ScoringContext) -> f64 {
    (context.btc_correlation.clamp(0.0, 1.0) + 0.8) / 2.0
}

/// Session boost: indicator signals in the Asian session and volume signals
/// in the American session score 0.9; everything else the 0.8 baseline.
fn time_effect(signal: &RawSignal, context: &ScoringContext) -> f64 {
    match context.session {
        TradingSession::Asian if signal.source == SignalSource::IndicatorGraph => 0.9,
        TradingSession::American
            if matches!(
                signal.signal_type,
                SignalType::VolumeSurge | SignalType::VolumeSignal
            ) =>
        {
            0.9
        }
        _ => 0.8,
    }
}

/// `min(1, volume_24h / orderbook_depth / 10000)` with a 20% penalty below
/// 0.3.
fn liquidity_factor(context: &ScoringContext) -> f64 {
    if context.volume_24h <= 0.0 || context.orderbook_depth <= 0.0 {
        return 0.5;
    }
    let ratio = context.volume_24h / context.orderbook_depth;
    let mut factor = (ratio / 10_000.0).min(1.0);
    if factor < 0.3 {
        factor *= 0.8;
    }
    factor
}

/// Source accuracy with the >80% boost / <60% cut applied.
fn historical_accuracy(source: SignalSource, learner: &AdaptiveLearner) -> f64 {
    let accuracy = learner.contribution(source);
    if accuracy > 0.8 {
        (accuracy * 1.15).min(1.0)
    } else if accuracy < 0.6 {
        (accuracy * 0.75).max(0.0)
    } else {
        accuracy
    }
}

/// +0.1 for a strong signal (strength AND confidence > 0.8), −0.1 for a
/// weak one (either < 0.4), 0 otherwise.
fn ai_enhancement(signal_strength: f64, confidence: f64) -> f64 {
    if signal_strength > 0.8 && confidence > 0.8 {
        0.1
    } else if signal_strength < 0.4 || confidence < 0.4 {
        -0.1
    } else {
        0.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw(strength: f64, confidence: f64) -> RawSignal {
        RawSignal {
            symbol: "BTCUSDT".into(),
            signal_type: SignalType::PriceBreakout,
            signal_strength: strength,
            confidence,
            source: SignalSource::Phase1a,
            quality_score: Some(0.8),
            stability_score: None,
            tier: None,
            timestamp_ms: 1_700_000_000_000,
            metadata: HashMap::new(),
        }
    }

    fn context() -> ScoringContext {
        ScoringContext {
            data_completeness: 1.0,
            btc_correlation: 0.7,
            volume_24h: 1_000_000.0,
            orderbook_depth: 100.0,
            session: TradingSession::European,
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let learner = AdaptiveLearner::new();
        let signal = raw(0.8, 0.75);
        let ctx = context();
        let first = score_signal(&signal, 0.75, &ctx, &learner);
        let second = score_signal(&signal, 0.75, &ctx, &learner);
        assert!((first.comprehensive_score - second.comprehensive_score).abs() < f64::EPSILON);
        assert!((first.ai_enhancement - second.ai_enhancement).abs() < f64::EPSILON);
    }

    #[test]
    fn dimensions_stay_in_unit_range() {
        let learner = AdaptiveLearner::new();
        let signal = raw(0.95, 0.9);
        let score = score_signal(&signal, 0.9, &context(), &learner);
        for v in [
            score.signal_strength,
            score.confidence,
            score.data_quality,
            score.market_consistency,
            score.time_effect,
            score.liquidity_factor,
            score.historical_accuracy,
        ] {
            assert!((0.0..=1.0).contains(&v), "dimension {v} out of range");
        }
        assert!((-0.1..=0.1).contains(&score.ai_enhancement));
    }

    #[test]
    fn known_score_composition() {
        let learner = AdaptiveLearner::new(); // All contributions 0.8.
        let signal = raw(0.8, 0.75);
        let score = score_signal(&signal, 0.75, &context(), &learner);

        // volume_24h / depth / 10000 = 1_000_000/100/10_000 = 1.0.
        assert!((score.liquidity_factor - 1.0).abs() < 1e-10);
        // Contribution 0.8 is in the neutral band — no boost or cut.
        assert!((score.historical_accuracy - 0.8).abs() < 1e-10);
        assert!((score.data_quality - 1.0).abs() < 1e-10);
        assert!((score.market_consistency - 0.75).abs() < 1e-10);
        assert!((score.time_effect - 0.8).abs() < 1e-10);

        let expected = 0.8 * 0.25 + 0.75 * 0.20 + 1.0 * 0.15 + 0.75 * 0.12 + 0.8 * 0.10
            + 1.0 * 0.10 + 0.8 * 0.08;
        assert!((score.comprehensive_score - expected).abs() < 1e-10);
        assert!((score.ai_enhancement - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ai_enhancement_bands() {
        assert!((ai_enhancement(0.85, 0.85) - 0.1).abs() < f64::EPSILON);
        assert!((ai_enhancement(0.3, 0.9) + 0.1).abs() < f64::EPSILON);
        assert!((ai_enhancement(0.9, 0.3) + 0.1).abs() < f64::EPSILON);
        assert!((ai_enhancement(0.6, 0.6) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn session_boosts() {
        let learner = AdaptiveLearner::new();
        let mut ctx = context();

        // Indicator signal in the Asian session.
        let mut indicator = raw(0.7, 0.7);
        indicator.source = SignalSource::IndicatorGraph;
        indicator.signal_type = SignalType::RsiSignal;
        ctx.session = TradingSession::Asian;
        let score = score_signal(&indicator, 0.7, &ctx, &learner);
        assert!((score.time_effect - 0.9).abs() < 1e-10);

        // Volume signal in the American session.
        let mut volume = raw(0.7, 0.7);
        volume.signal_type = SignalType::VolumeSurge;
        ctx.session = TradingSession::American;
        let score = score_signal(&volume, 0.7, &ctx, &learner);
        assert!((score.time_effect - 0.9).abs() < 1e-10);

        // Anything else gets the baseline.
        ctx.session = TradingSession::European;
        let score = score_signal(&raw(0.7, 0.7), 0.7, &ctx, &learner);
        assert!((score.time_effect - 0.8).abs() < 1e-10);
    }

    #[test]
    fn low_liquidity_penalty() {
        let mut ctx = context();
        // ratio/10000 = 0.2 < 0.3 => ×0.8 = 0.16.
        ctx.volume_24h = 200_000.0;
        assert!((liquidity_factor(&ctx) - 0.16).abs() < 1e-10);
        // Missing data falls to the midpoint.
        ctx.volume_24h = 0.0;
        assert!((liquidity_factor(&ctx) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn historical_accuracy_bands() {
        let mut learner = AdaptiveLearner::new();
        // 90% pass-rate source gets the 1.15 boost.
        let decisions: Vec<crate::pool::types::EplDecision> = (0..100)
            .map(|i| crate::pool::types::EplDecision {
                signal_id: format!("s{i}"),
                signal_source: SignalSource::Phase1a,
                epl_passed: i % 10 != 0,
                final_performance: 0.01,
                timestamp_ms: 1_700_000_000_000 + i,
            })
            .collect();
        learner.learn_from_epl_feedback(&decisions);
        let boosted = historical_accuracy(SignalSource::Phase1a, &learner);
        assert!((boosted - (0.9f64 * 1.15).min(1.0)).abs() < 1e-10);
    }
}
