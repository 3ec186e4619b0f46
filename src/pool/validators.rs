// =============================================================================
// Signal Quality Validators — per-source gates at fusion entry
// =============================================================================
//
// Every inbound signal must carry a strength in [0, 1] and satisfy its
// source's type set and minimum secondary metric:
//
//   phase1a         breakout/surge/shift/extreme     quality    >= 0.6
//   indicator_graph RSI/MACD/BB/Volume               confidence >= 0.65
//   phase1b         vol-breakout/regime/mean-rev     stability  >= 0.7
//   phase1c         micro-structure types            tier critical/important
//
// A signal failing its gate is dropped at this boundary and counted by the
// caller; it never reaches scoring.

use crate::pool::types::{RawSignal, SignalSource, SignalType};

/// Strength (and confidence) must sit inside the unit interval.
pub fn validate_strength_range(signal: &RawSignal) -> bool {
    (0.0..=1.0).contains(&signal.signal_strength) && (0.0..=1.0).contains(&signal.confidence)
}

/// Full per-source validation.
pub fn validate(signal: &RawSignal) -> bool {
    if !validate_strength_range(signal) {
        return false;
    }
    match signal.source {
        SignalSource::Phase1a => {
            matches!(
                signal.signal_type,
                SignalType::PriceBreakout
                    | SignalType::VolumeSurge
                    | SignalType::MomentumShift
                    | SignalType::ExtremeEvent
            ) && signal.quality_score.unwrap_or(0.0) >= 0.6
        }
        SignalSource::IndicatorGraph => {
            matches!(
                signal.signal_type,
                SignalType::RsiSignal
                    | SignalType::MacdSignal
                    | SignalType::BbSignal
                    | SignalType::VolumeSignal
            ) && signal.confidence >= 0.65
        }
        SignalSource::Phase1b => {
            matches!(
                signal.signal_type,
                SignalType::VolatilityBreakout
                    | SignalType::RegimeChange
                    | SignalType::MeanReversion
            ) && signal.stability_score.unwrap_or(0.0) >= 0.7
        }
        SignalSource::Phase1c => {
            matches!(
                signal.signal_type,
                SignalType::LiquidityShock
                    | SignalType::InstitutionalFlow
                    | SignalType::SentimentDivergence
                    | SignalType::LiquidityRegimeChange
            ) && matches!(signal.tier.as_deref(), Some("critical") | Some("important"))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
