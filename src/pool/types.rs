// =============================================================================
// Candidate Pool Types — signal records crossing the EPL boundary
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upstream producer of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    Phase1a,
    IndicatorGraph,
    Phase1b,
    Phase1c,
}

impl SignalSource {
    pub const ALL: [SignalSource; 4] = [
        Self::Phase1a,
        Self::IndicatorGraph,
        Self::Phase1b,
        Self::Phase1c,
    ];

    /// Base fusion weight before learner adjustment.
    pub fn base_weight(self) -> f64 {
        match self {
            Self::Phase1a => 0.25,
            Self::IndicatorGraph => 0.20,
            Self::Phase1b => 0.25,
            Self::Phase1c => 0.30,
        }
    }
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phase1a => write!(f, "phase1a"),
            Self::IndicatorGraph => write!(f, "indicator_graph"),
            Self::Phase1b => write!(f, "phase1b"),
            Self::Phase1c => write!(f, "phase1c"),
        }
    }
}

/// Closed signal-type set accepted at the fusion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    // Phase-1A
    PriceBreakout,
    VolumeSurge,
    MomentumShift,
    ExtremeEvent,
    // Indicator detectors
    RsiSignal,
    MacdSignal,
    BbSignal,
    VolumeSignal,
    // Phase-1B
    VolatilityBreakout,
    RegimeChange,
    MeanReversion,
    // Phase-1C micro-structure (accepted as opaque inbound)
    LiquidityShock,
    InstitutionalFlow,
    SentimentDivergence,
    LiquidityRegimeChange,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::PriceBreakout => "PRICE_BREAKOUT",
            Self::VolumeSurge => "VOLUME_SURGE",
            Self::MomentumShift => "MOMENTUM_SHIFT",
            Self::ExtremeEvent => "EXTREME_EVENT",
            Self::RsiSignal => "RSI_signals",
            Self::MacdSignal => "MACD_signals",
            Self::BbSignal => "BB_signals",
            Self::VolumeSignal => "Volume_signals",
            Self::VolatilityBreakout => "VOLATILITY_BREAKOUT",
            Self::RegimeChange => "REGIME_CHANGE",
            Self::MeanReversion => "MEAN_REVERSION",
            Self::LiquidityShock => "LIQUIDITY_SHOCK",
            Self::InstitutionalFlow => "INSTITUTIONAL_FLOW",
            Self::SentimentDivergence => "SENTIMENT_DIVERGENCE",
            Self::LiquidityRegimeChange => "LIQUIDITY_REGIME_CHANGE",
        };
        write!(f, "{tag}")
    }
}

/// An inbound signal at the fusion boundary, before standardization.
///
/// Per-source secondary metrics (quality, stability, tier) are optional —
/// the validators require the one matching the signal's source.
#[derive(Debug, Clone, Serialize)]
pub struct RawSignal {
    pub symbol: String,
    pub signal_type: SignalType,
    pub signal_strength: f64,
    pub confidence: f64,
    pub source: SignalSource,
    pub quality_score: Option<f64>,
    pub stability_score: Option<f64>,
    pub tier: Option<String>,
    pub timestamp_ms: i64,
    /// Opaque carry-through (dashboard keys included); never produced here.
    pub metadata: HashMap<String, Value>,
}

/// The seven scoring dimensions plus the weighted total and AI fine-tune.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SevenDimensionalScore {
    pub signal_strength: f64,
    pub confidence: f64,
    pub data_quality: f64,
    pub market_consistency: f64,
    pub time_effect: f64,
    pub liquidity_factor: f64,
    pub historical_accuracy: f64,
    /// Weighted sum of the seven dimensions.
    pub comprehensive_score: f64,
    /// Model fine-tune in [-0.1, +0.1], added on top.
    pub ai_enhancement: f64,
}

/// The EPL-facing candidate record. Immutable once published to the pool.
///
/// Invariants: strength and confidence in [0, 1], execution priority in
/// 1..=5, `expires_at_ms > created_at_ms`.
#[derive(Debug, Clone, Serialize)]
pub struct StandardizedSignal {
    pub signal_id: String,
    pub symbol: String,
    pub signal_type: SignalType,
    pub signal_strength: f64,
    pub confidence: f64,
    pub source: SignalSource,
    pub epl_pass_probability: f64,
    /// Market regime tag at scoring time.
    pub market_context: String,
    pub processing_metadata: HashMap<String, Value>,
    pub risk_assessment: f64,
    /// 1 (highest) .. 5 (lowest).
    pub execution_priority: u8,
    /// Suggested position size as a fraction of capital, (0, 0.1].
    pub position_sizing: f64,
    /// Stop-loss distance as a fraction of entry.
    pub stop_loss_suggestion: f64,
    /// Three take-profit levels, ascending.
    pub take_profit_levels: [f64; 3],
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

/// One downstream execution-planning decision fed back to the learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EplDecision {
    pub signal_id: String,
    pub signal_source: SignalSource,
    pub epl_passed: bool,
    pub final_performance: f64,
    pub timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_weights_sum_to_one() {
        let sum: f64 = SignalSource::ALL.iter().map(|s| s.base_weight()).sum();
        assert!((sum - 1.0).abs() < 1e-10);
    }

    #[test]
    fn source_wire_tags() {
        assert_eq!(SignalSource::Phase1a.to_string(), "phase1a");
        assert_eq!(SignalSource::IndicatorGraph.to_string(), "indicator_graph");
    }

    #[test]
    fn type_wire_tags() {
        assert_eq!(SignalType::PriceBreakout.to_string(), "PRICE_BREAKOUT");
        assert_eq!(SignalType::RsiSignal.to_string(), "RSI_signals");
        assert_eq!(SignalType::LiquidityShock.to_string(), "LIQUIDITY_SHOCK");
    }
}
