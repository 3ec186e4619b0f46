// =============================================================================
// Phase-1B Volatility Filter
// =============================================================================
//
// Computes a volatility profile from log-returns and a continuity profile
// from the recent signal flow, then re-weights inbound signal confidence by
// a volatility-regime factor in [0.7, 1.25]. Signals whose adjusted
// confidence falls below the configured gate are dropped and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::runtime_config::VolatilityFilterConfig;

/// Annualisation factor for minute-cadence returns.
const MINUTES_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

/// Volatility profile for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct VolatilityMetrics {
    /// Annualised and normalised to [0, 1] (200% annualised caps the scale).
    pub current_volatility: f64,
    /// Short-horizon vs long-horizon volatility, [-1, 1].
    pub volatility_trend: f64,
    /// Rank of the current volatility within the rolling history, [0, 1].
    pub volatility_percentile: f64,
    /// 1 − coefficient-of-variation of recent volatility, [0, 1].
    pub regime_stability: f64,
    /// Mean high-frequency move intensity relative to current vol, [0, 1].
    pub micro_volatility: f64,
    /// Recent range over the last 60 samples, scaled, [0, 1].
    pub intraday_volatility: f64,
    pub timestamp_ms: i64,
}

impl VolatilityMetrics {
    /// Conservative defaults for a symbol without enough history.
    fn minimal(now_ms: i64) -> Self {
        Self {
            current_volatility: 0.02,
            volatility_trend: 0.0,
            volatility_percentile: 0.5,
            regime_stability: 0.7,
            micro_volatility: 0.5,
            intraday_volatility: 0.5,
            timestamp_ms: now_ms,
        }
    }
}

/// Continuity profile over the recent signal flow.
#[derive(Debug, Clone, Serialize)]
pub struct SignalContinuityMetrics {
    pub signal_persistence: f64,
    pub signal_divergence: f64,
    pub consensus_strength: f64,
    pub temporal_consistency: f64,
    pub cross_module_correlation: f64,
    pub signal_decay_rate: f64,
}

/// A signal observation fed to the continuity analysis: its source module
/// and directional value.
#[derive(Debug, Clone)]
pub struct SignalObservation {
    pub module: String,
    pub value: f64,
}

/// The C5 volatility-adaptive filter.
pub struct VolatilityFilter {
    config: VolatilityFilterConfig,
    volatility_history: RwLock<VecDeque<f64>>,
    signal_counts: RwLock<VecDeque<usize>>,
    dropped_total: AtomicU64,
}

impl VolatilityFilter {
    pub fn new(config: VolatilityFilterConfig) -> Self {
        Self {
            config,
            volatility_history: RwLock::new(VecDeque::new()),
            signal_counts: RwLock::new(VecDeque::new()),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Compute the volatility profile from a minute-cadence price series
    /// (oldest-first) and record it in the rolling history.
    pub fn calculate_volatility_metrics(
        &self,
        prices: &[f64],
        now_ms: i64,
    ) -> VolatilityMetrics {
        if prices.len() < 20 {
            return VolatilityMetrics::minimal(now_ms);
        }

        let returns: Vec<f64> = prices
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect();
        if returns.len() < 10 {
            return VolatilityMetrics::minimal(now_ms);
        }

        // Current volatility: std over the last 21 returns, annualised, with
        // 200% annualised as the normalisation ceiling.
        let tail = &returns[returns.len().saturating_sub(21)..];
        let raw_vol = std_dev(tail);
        let current_volatility = ((raw_vol * MINUTES_PER_YEAR.sqrt()) / 2.0).min(1.0);

        // Trend: short (10) vs long (50) horizon.
        let volatility_trend = if returns.len() >= 50 {
            let short = std_dev(&returns[returns.len() - 10..]);
            let long = std_dev(&returns[returns.len() - 50..]);
            ((short - long) / (long + 1e-8)).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        // Percentile vs the rolling history.
        let volatility_percentile = {
            let mut history = self.volatility_history.write();
            history.push_back(current_volatility);
            while history.len() > self.config.lookback_periods {
                history.pop_front();
            }
            if history.len() >= 20 {
                let rank = history.iter().filter(|&&v| v <= current_volatility).count();
                rank as f64 / history.len() as f64
            } else {
                0.5
            }
        };

        // Stability: 1 − cv of the last 10 recorded volatilities.
        let regime_stability = {
            let history = self.volatility_history.read();
            if history.len() >= 10 {
                let recent: Vec<f64> = history.iter().rev().take(10).copied().collect();
                let mean = recent.iter().sum::<f64>() / recent.len() as f64;
                (1.0 - std_dev(&recent) / (mean + 1e-8)).clamp(0.0, 1.0)
            } else {
                0.7
            }
        };

        // Micro volatility: mean |r| over the last 10 returns vs current.
        let micro_volatility = {
            let recent = &returns[returns.len() - 10..];
            let mean_abs = recent.iter().map(|r| r.abs()).sum::<f64>() / recent.len() as f64;
            (mean_abs / (raw_vol + 1e-8)).clamp(0.0, 1.0)
        };

        // Intraday range over the last 60 samples, 10% capping the scale.
        let intraday_volatility = if prices.len() >= 60 {
            let hour = &prices[prices.len() - 60..];
            let high = hour.iter().fold(f64::MIN, |a, &p| a.max(p));
            let low = hour.iter().fold(f64::MAX, |a, &p| a.min(p));
            if low > 0.0 {
                (((high - low) / low) * 10.0).min(1.0)
            } else {
                current_volatility
            }
        } else {
            current_volatility
        };

        VolatilityMetrics {
            current_volatility,
            volatility_trend,
            volatility_percentile,
            regime_stability,
            micro_volatility,
            intraday_volatility,
            timestamp_ms: now_ms,
        }
    }

    /// Analyse continuity of the current signal batch against the recent
    /// flow.
    pub fn analyze_signal_continuity(
        &self,
        signals: &[SignalObservation],
    ) -> SignalContinuityMetrics {
        let counts: Vec<usize> = {
            let mut history = self.signal_counts.write();
            history.push_back(signals.len());
            while history.len() > self.config.lookback_periods {
                history.pop_front();
            }
            history.iter().copied().collect()
        };

        if counts.len() < 3 {
            // Not enough flow history — basic assessment from this batch.
            return SignalContinuityMetrics {
                signal_persistence: (signals.len() as f64 / 5.0).min(1.0),
                signal_divergence: 0.3,
                consensus_strength: (signals.len() as f64 / 3.0).min(1.0),
                temporal_consistency: 0.6,
                cross_module_correlation: 0.7,
                signal_decay_rate: 0.3,
            };
        }

        let recent = &counts[counts.len().saturating_sub(10)..];
        let signal_persistence =
            recent.iter().filter(|&&c| c > 0).count() as f64 / recent.len() as f64;

        let values: Vec<f64> = signals.iter().map(|s| s.value).collect();
        let signal_divergence = if values.len() > 1 {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            (std_dev(&values) / (mean.abs() + 1e-8)).min(1.0)
        } else if values.is_empty() {
            1.0 // No signals at all: maximum divergence.
        } else {
            0.0
        };

        let consensus_strength = if !signals.is_empty() {
            let positive = signals.iter().filter(|s| s.value > 0.0).count();
            let negative = signals.iter().filter(|s| s.value < 0.0).count();
            positive.max(negative) as f64 / signals.len() as f64
        } else {
            0.0
        };

        let temporal_consistency = if recent.len() >= 5 {
            let tail: Vec<f64> = recent[recent.len() - 5..].iter().map(|&c| c as f64).collect();
            let mean = tail.iter().sum::<f64>() / tail.len() as f64;
            (1.0 - std_dev(&tail) / (mean + 1e-8)).clamp(0.0, 1.0)
        } else {
            0.6
        };

        let cross_module_correlation = module_correlation(signals);

        let signal_decay_rate = if recent.len() >= 3 {
            let window = &recent[recent.len() - 3..];
            if window[0] > 0 {
                ((window[0] as f64 - window[2] as f64) / window[0] as f64).clamp(0.0, 1.0)
            } else {
                0.5
            }
        } else {
            0.3
        };

        SignalContinuityMetrics {
            signal_persistence,
            signal_divergence,
            consensus_strength,
            temporal_consistency,
            cross_module_correlation,
            signal_decay_rate,
        }
    }

    /// Volatility-regime confidence factor in [0.7, 1.25].
    ///
    /// Stable mid-range volatility amplifies signals; unstable or extreme
    /// volatility attenuates them.
    pub fn regime_factor(metrics: &VolatilityMetrics) -> f64 {
        let mut factor: f64 = 1.0;

        // Extreme volatility percentile attenuates; the calm middle boosts.
        if metrics.volatility_percentile > 0.9 {
            factor *= 0.8;
        } else if metrics.volatility_percentile < 0.2 {
            factor *= 1.1;
        }

        // Unstable regimes attenuate; stable ones boost.
        if metrics.regime_stability < 0.4 {
            factor *= 0.9;
        } else if metrics.regime_stability > 0.8 {
            factor *= 1.1;
        }

        factor.clamp(0.7, 1.25)
    }

    /// Apply the regime factor to one signal's confidence. Returns the
    /// adjusted confidence, or `None` when it falls below the gate.
    pub fn filter_confidence(&self, confidence: f64, metrics: &VolatilityMetrics) -> Option<f64> {
        let adjusted = (confidence * Self::regime_factor(metrics)).min(1.0);
        if adjusted < self.config.min_adjusted_confidence {
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
            debug!(
                confidence,
                adjusted,
                gate = self.config.min_adjusted_confidence,
                "signal dropped by volatility filter"
            );
            return None;
        }
        Some(adjusted)
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Pairwise agreement of per-module mean signal values.
fn module_correlation(signals: &[SignalObservation]) -> f64 {
    use std::collections::HashMap;
    if signals.len() < 2 {
        return 0.5;
    }

    let mut by_module: HashMap<&str, Vec<f64>> = HashMap::new();
    for signal in signals {
        by_module.entry(signal.module.as_str()).or_default().push(signal.value);
    }
    if by_module.len() < 2 {
        return 0.5;
    }

    let means: Vec<f64> = by_module
        .values()
        .map(|v| v.iter().sum::<f64>() / v.len() as f64)
        .collect();

    let mut correlations = Vec::new();
    for i in 0..means.len() {
        for j in i + 1..means.len() {
            correlations.push((1.0 - (means[i] - means[j]).abs() / 2.0).max(0.0));
        }
    }
    correlations.iter().sum::<f64>() / correlations.len() as f64
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn filter() -> VolatilityFilter {
        VolatilityFilter::new(VolatilityFilterConfig::default())
    }

    #[test]
    fn short_series_uses_minimal_metrics() {
        let f = filter();
        let metrics = f.calculate_volatility_metrics(&[100.0; 10], T0);
        assert!((metrics.current_volatility - 0.02).abs() < 1e-10);
        assert!((metrics.volatility_percentile - 0.5).abs() < 1e-10);
    }

    #[test]
    fn flat_series_has_zero_volatility() {
        let f = filter();
        let metrics = f.calculate_volatility_metrics(&vec![100.0; 120], T0);
        assert!(metrics.current_volatility.abs() < 1e-10);
        assert!(metrics.intraday_volatility.abs() < 1e-10);
    }

    #[test]
    fn noisy_series_scores_higher_than_calm() {
        let calm_filter = filter();
        let noisy_filter = filter();
        let calm: Vec<f64> = (0..120).map(|i| 100.0 + (i % 2) as f64 * 0.01).collect();
        let noisy: Vec<f64> = (0..120).map(|i| 100.0 + (i % 2) as f64 * 5.0).collect();
        let calm_metrics = calm_filter.calculate_volatility_metrics(&calm, T0);
        let noisy_metrics = noisy_filter.calculate_volatility_metrics(&noisy, T0);
        assert!(noisy_metrics.current_volatility > calm_metrics.current_volatility);
        assert!(noisy_metrics.intraday_volatility > calm_metrics.intraday_volatility);
    }

    #[test]
    fn metrics_stay_in_declared_ranges() {
        let f = filter();
        let wild: Vec<f64> = (0..200)
            .map(|i| 100.0 * (1.0 + 0.2 * ((i * 7919) % 13) as f64 / 13.0))
            .collect();
        let metrics = f.calculate_volatility_metrics(&wild, T0);
        assert!((0.0..=1.0).contains(&metrics.current_volatility));
        assert!((-1.0..=1.0).contains(&metrics.volatility_trend));
        assert!((0.0..=1.0).contains(&metrics.volatility_percentile));
        assert!((0.0..=1.0).contains(&metrics.regime_stability));
        assert!((0.0..=1.0).contains(&metrics.micro_volatility));
        assert!((0.0..=1.0).contains(&metrics.intraday_volatility));
    }

    #[test]
    fn regime_factor_bounds() {
        let mut metrics = VolatilityMetrics::minimal(T0);
        // Best case: calm percentile + very stable.
        metrics.volatility_percentile = 0.1;
        metrics.regime_stability = 0.9;
        let boost = VolatilityFilter::regime_factor(&metrics);
        assert!(boost > 1.0 && boost <= 1.25);

        // Worst case: extreme percentile + unstable.
        metrics.volatility_percentile = 0.95;
        metrics.regime_stability = 0.2;
        let cut = VolatilityFilter::regime_factor(&metrics);
        assert!((0.7..1.0).contains(&cut));
    }

    #[test]
    fn gate_drops_low_confidence() {
        let f = filter();
        let mut metrics = VolatilityMetrics::minimal(T0);
        metrics.volatility_percentile = 0.95;
        metrics.regime_stability = 0.2;
        // 0.75 * 0.72 = 0.54 < 0.6 gate.
        assert!(f.filter_confidence(0.75, &metrics).is_none());
        assert_eq!(f.dropped_total(), 1);
        // 0.9 * 0.72 = 0.648 clears the gate.
        let adjusted = f.filter_confidence(0.9, &metrics).unwrap();
        assert!(adjusted >= 0.6);
    }

    #[test]
    fn continuity_basic_assessment_on_thin_history() {
        let f = filter();
        let signals = vec![
            SignalObservation { module: "phase1a".into(), value: 0.5 },
            SignalObservation { module: "trigger".into(), value: 0.4 },
        ];
        let metrics = f.analyze_signal_continuity(&signals);
        assert!((metrics.signal_persistence - 0.4).abs() < 1e-10);
        assert!((metrics.consensus_strength - 2.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn continuity_consensus_and_divergence() {
        let f = filter();
        // Build up flow history first.
        for _ in 0..5 {
            f.analyze_signal_continuity(&[SignalObservation {
                module: "phase1a".into(),
                value: 0.5,
            }]);
        }
        let aligned = vec![
            SignalObservation { module: "phase1a".into(), value: 0.5 },
            SignalObservation { module: "trigger".into(), value: 0.5 },
            SignalObservation { module: "phase1b".into(), value: 0.5 },
        ];
        let metrics = f.analyze_signal_continuity(&aligned);
        assert!((metrics.consensus_strength - 1.0).abs() < 1e-10);
        assert!(metrics.signal_divergence.abs() < 1e-6);
        assert!((metrics.signal_persistence - 1.0).abs() < 1e-10);

        let split = vec![
            SignalObservation { module: "phase1a".into(), value: 1.0 },
            SignalObservation { module: "trigger".into(), value: -1.0 },
        ];
        let metrics = f.analyze_signal_continuity(&split);
        assert!((metrics.consensus_strength - 0.5).abs() < 1e-10);
        assert!(metrics.signal_divergence > 0.9);
    }

    #[test]
    fn continuity_ranges() {
        let f = filter();
        for i in 0..20 {
            let n = (i % 4) as usize;
            let signals: Vec<SignalObservation> = (0..n)
                .map(|k| SignalObservation {
                    module: format!("m{k}"),
                    value: if k % 2 == 0 { 0.5 } else { -0.5 },
                })
                .collect();
            let metrics = f.analyze_signal_continuity(&signals);
            for v in [
                metrics.signal_persistence,
                metrics.signal_divergence,
                metrics.consensus_strength,
                metrics.temporal_consistency,
                metrics.cross_module_correlation,
                metrics.signal_decay_rate,
            ] {
                assert!((0.0..=1.0).contains(&v), "metric {v} out of range");
            }
        }
    }
}
