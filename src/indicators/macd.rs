// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line  = EMA(close, fast) - EMA(close, slow)
// Signal     = EMA(MACD line, signal_period)
// Histogram  = MACD line - Signal
//
// Standard parameters are 12 / 26 / 9. A small |MACD - signal| gap marks an
// imminent crossing, which the trigger engine scores as convergence.
// =============================================================================

use crate::indicators::ema::calculate_ema;

/// Result of a MACD calculation (most recent values).
#[derive(Debug, Clone)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Calculate MACD for the given closing prices with the standard 12/26/9
/// parameters.
pub fn calculate_macd(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd_with(closes, 12, 26, 9)
}

/// Calculate MACD with explicit fast / slow / signal periods.
///
/// Returns `None` when:
/// - `fast >= slow` (degenerate parameterisation)
/// - There is not enough data for the slow EMA plus `signal_period` MACD
///   values to seed the signal line.
pub fn calculate_macd_with(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast == 0 || signal_period == 0 || fast >= slow {
        return None;
    }
    if closes.len() < slow + signal_period {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if fast_ema.is_empty() || slow_ema.is_empty() {
        return None;
    }

    // Align the two series on their tails: both end at the latest close.
    let len = fast_ema.len().min(slow_ema.len());
    let fast_tail = &fast_ema[fast_ema.len() - len..];
    let slow_tail = &slow_ema[slow_ema.len() - len..];

    let macd_line: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = calculate_ema(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let macd = *macd_line.last()?;

    if !macd.is_finite() || !signal.is_finite() {
        return None;
    }

    Some(MacdResult {
        macd,
        signal,
        histogram: macd - signal,
    })
}

/// Convergence score for a MACD / signal-line crossing.
///
/// |macd - signal| < 0.001 => 0.8, < 0.005 => 0.6, < 0.01 => 0.4, else 0.
pub fn macd_convergence(macd: f64, signal: f64) -> f64 {
    let diff = (macd - signal).abs();
    if diff < 0.001 {
        0.8
    } else if diff < 0.005 {
        0.6
    } else if diff < 0.01 {
        0.4
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        // Need 26 + 9 = 35 closes for the default parameters.
        assert!(calculate_macd(&closes).is_none());
    }

    #[test]
    fn macd_degenerate_params() {
        let closes = vec![1.0; 100];
        assert!(calculate_macd_with(&closes, 26, 12, 9).is_none());
        assert!(calculate_macd_with(&closes, 0, 26, 9).is_none());
        assert!(calculate_macd_with(&closes, 12, 26, 0).is_none());
    }

    #[test]
    fn macd_flat_market_is_zero() {
        let closes = vec![100.0; 60];
        let result = calculate_macd(&closes).unwrap();
        assert!(result.macd.abs() < 1e-10);
        assert!(result.signal.abs() < 1e-10);
        assert!(result.histogram.abs() < 1e-10);
    }

    #[test]
    fn macd_uptrend_positive() {
        // In a sustained uptrend the fast EMA leads the slow EMA.
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let result = calculate_macd(&closes).unwrap();
        assert!(result.macd > 0.0);
    }

    #[test]
    fn macd_downtrend_negative() {
        let closes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let result = calculate_macd(&closes).unwrap();
        assert!(result.macd < 0.0);
    }

    #[test]
    fn convergence_ladder() {
        assert!((macd_convergence(0.0005, 0.0) - 0.8).abs() < 1e-10);
        assert!((macd_convergence(0.003, 0.0) - 0.6).abs() < 1e-10);
        assert!((macd_convergence(0.008, 0.0) - 0.4).abs() < 1e-10);
        assert_eq!(macd_convergence(0.5, 0.0), 0.0);
    }
}
