// =============================================================================
// Indicator State — per-symbol rolling view with convergence scoring
// =============================================================================
//
// Recomputed on every price tick once the symbol's deque holds at least 50
// points. Each indicator contributes a convergence score in [0, 1]; the
// aggregate is the configured weighted mean over indicators whose score is
// positive.

use serde::Serialize;

use crate::indicators::bollinger::{bollinger_convergence, calculate_bollinger};
use crate::indicators::macd::{calculate_macd, macd_convergence};
use crate::indicators::rsi::{current_rsi, rsi_convergence};
use crate::indicators::support_resistance::{
    detect_levels, support_resistance_convergence,
};
use crate::indicators::volume::{volume_sma, volume_spike_ratio};
use crate::runtime_config::IndicatorWeights;

/// Minimum deque depth before indicators are computed.
pub const MIN_POINTS: usize = 50;

/// Per-indicator convergence scores plus the weighted aggregate.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConvergenceScores {
    pub rsi: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub volume: f64,
    pub support_resistance: f64,
    /// Weighted mean over indicators with positive convergence.
    pub overall: f64,
    /// How many indicators are converging (score > 0).
    pub converging_count: usize,
}

/// Rolling indicator snapshot for one symbol.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorState {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub volume_sma: Option<f64>,
    pub volume_spike_ratio: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub convergence: ConvergenceScores,
}

impl IndicatorState {
    /// Compute the full state from the rolling close and volume series
    /// (oldest-first, latest last).
    pub fn compute(closes: &[f64], volumes: &[f64], weights: &IndicatorWeights) -> Option<Self> {
        if closes.len() < MIN_POINTS {
            return None;
        }
        let price = *closes.last()?;

        let rsi = current_rsi(closes, 14);
        let macd_result = calculate_macd(closes);
        let bands = calculate_bollinger(closes, 20, 2.0);
        let vol_sma = volume_sma(volumes, 20);
        let spike = volume_spike_ratio(volumes, 20);
        let levels = detect_levels(closes, 3);

        let scores = ConvergenceScores {
            rsi: rsi.map(rsi_convergence).unwrap_or(0.0),
            macd: macd_result
                .as_ref()
                .map(|m| macd_convergence(m.macd, m.signal))
                .unwrap_or(0.0),
            bollinger: bands
                .as_ref()
                .map(|b| bollinger_convergence(b, price))
                .unwrap_or(0.0),
            volume: spike
                .map(crate::indicators::volume::volume_convergence)
                .unwrap_or(0.0),
            support_resistance: support_resistance_convergence(&levels, price),
            overall: 0.0,
            converging_count: 0,
        };
        let scores = aggregate(scores, weights);

        Some(Self {
            rsi,
            macd: macd_result.as_ref().map(|m| m.macd),
            macd_signal: macd_result.as_ref().map(|m| m.signal),
            macd_histogram: macd_result.as_ref().map(|m| m.histogram),
            bollinger_upper: bands.as_ref().map(|b| b.upper),
            bollinger_middle: bands.as_ref().map(|b| b.middle),
            bollinger_lower: bands.as_ref().map(|b| b.lower),
            volume_sma: vol_sma,
            volume_spike_ratio: spike,
            support: levels.support,
            resistance: levels.resistance,
            convergence: scores,
        })
    }

    /// Build a state directly from raw indicator readings — used by the
    /// convergence checks when upstream already holds the values.
    pub fn from_readings(
        rsi: f64,
        macd: f64,
        macd_signal: f64,
        bollinger: (f64, f64, f64),
        price: f64,
        volume_ratio: f64,
        sr_distance_price: (Option<f64>, Option<f64>),
        weights: &IndicatorWeights,
    ) -> Self {
        let bands = crate::indicators::bollinger::BollingerResult {
            upper: bollinger.0,
            middle: bollinger.1,
            lower: bollinger.2,
        };
        let levels = crate::indicators::support_resistance::SupportResistance {
            support: sr_distance_price.0,
            resistance: sr_distance_price.1,
        };

        let scores = ConvergenceScores {
            rsi: rsi_convergence(rsi),
            macd: macd_convergence(macd, macd_signal),
            bollinger: bollinger_convergence(&bands, price),
            volume: crate::indicators::volume::volume_convergence(volume_ratio),
            support_resistance: support_resistance_convergence(&levels, price),
            overall: 0.0,
            converging_count: 0,
        };
        let scores = aggregate(scores, weights);

        Self {
            rsi: Some(rsi),
            macd: Some(macd),
            macd_signal: Some(macd_signal),
            macd_histogram: Some(macd - macd_signal),
            bollinger_upper: Some(bollinger.0),
            bollinger_middle: Some(bollinger.1),
            bollinger_lower: Some(bollinger.2),
            volume_sma: None,
            volume_spike_ratio: Some(volume_ratio),
            support: sr_distance_price.0,
            resistance: sr_distance_price.1,
            convergence: scores,
        }
    }
}

/// Weighted mean over indicators with positive convergence; weights
/// renormalize over the participating set.
fn aggregate(mut scores: ConvergenceScores, weights: &IndicatorWeights) -> ConvergenceScores {
    let pairs = [
        (scores.rsi, weights.rsi),
        (scores.macd, weights.macd),
        (scores.bollinger, weights.bollinger),
        (scores.volume, weights.volume),
        (scores.support_resistance, weights.support_resistance),
    ];

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut count = 0usize;
    for (score, weight) in pairs {
        if score > 0.0 {
            weighted_sum += score * weight;
            weight_total += weight;
            count += 1;
        }
    }

    scores.converging_count = count;
    scores.overall = if weight_total > 0.0 {
        (weighted_sum / weight_total).clamp(0.0, 1.0)
    } else {
        0.0
    };
    scores
}

// =============================================================================
// Tests
// =============================================================================
