// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent values, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `period` values.
// =============================================================================

/// Compute the EMA series for the given `values` slice and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Each output element corresponds to a value starting at index `period - 1`.
///
/// # Edge cases
/// - `period == 0` => empty vec (division by zero guard)
/// - `values.len() < period` => empty vec
/// - Non-finite intermediate values truncate the series.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period + 1) as f64;

    // Seed: SMA of the first `period` values.
    let sma: f64 = values[..period].iter().sum::<f64>() / period as f64;
    if !sma.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(values.len() - period + 1);
    result.push(sma);

    let mut prev_ema = sma;
    for &value in &values[period..] {
        let ema = value * multiplier + prev_ema * (1.0 - multiplier);
        if !ema.is_finite() {
            // Downstream consumers should not trust a broken series.
            break;
        }
        result.push(ema);
        prev_ema = ema;
    }

    result
}

/// Volume-trend ratio: EMA-5 of volume relative to EMA-20 of volume.
///
/// Returns `Some(ratio)` where `ratio > 1.0` means short-horizon volume is
/// running above its longer-horizon baseline (rising volume trend).
///
/// Returns `None` when:
/// - Fewer than 20 data points (EMA-20 not computable).
/// - The EMA-20 baseline is zero (division guard).
/// - The ratio is non-finite.
pub fn ema_volume_trend(volumes: &[f64]) -> Option<f64> {
    if volumes.len() < 20 {
        return None;
    }

    let short = *calculate_ema(volumes, 5).last()?;
    let long = *calculate_ema(volumes, 20).last()?;

    if long == 0.0 {
        return None;
    }

    let ratio = short / long;
    if ratio.is_finite() {
        Some(ratio)
    } else {
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a simple ascending series.
    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    // ---- calculate_ema ---------------------------------------------------

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero() {
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn ema_insufficient_data() {
        assert!(calculate_ema(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn ema_period_equals_length() {
        let values = vec![2.0, 4.0, 6.0];
        let ema = calculate_ema(&values, 3);
        assert_eq!(ema.len(), 1);
        // Should be the SMA = (2+4+6)/3 = 4.0
        assert!((ema[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of [1..10]: SMA of first 5 = 3.0, multiplier = 2/6.
        let values: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&values, 5);
        assert_eq!(ema.len(), 6);

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        let mut expected_vec = vec![expected];
        for &v in &values[5..] {
            expected = v * mult + expected * (1.0 - mult);
            expected_vec.push(expected);
        }
        for (a, b) in ema.iter().zip(expected_vec.iter()) {
            assert!((a - b).abs() < 1e-10, "got {a}, expected {b}");
        }
    }

    #[test]
    fn ema_handles_nan_in_input() {
        let values = vec![1.0, 2.0, 3.0, f64::NAN, 5.0];
        let ema = calculate_ema(&values, 3);
        // SMA of first 3 = 2.0, then NaN truncates the series to the seed.
        assert_eq!(ema.len(), 1);
    }

    // ---- ema_volume_trend -------------------------------------------------

    #[test]
    fn volume_trend_insufficient_data() {
        assert!(ema_volume_trend(&ascending(19)).is_none());
    }

    #[test]
    fn volume_trend_rising_above_one() {
        // Steadily rising volume — EMA-5 tracks the front faster than EMA-20.
        let volumes = ascending(100);
        let ratio = ema_volume_trend(&volumes).unwrap();
        assert!(ratio > 1.0, "expected rising trend, got {ratio}");
    }

    #[test]
    fn volume_trend_falling_below_one() {
        let volumes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let ratio = ema_volume_trend(&volumes).unwrap();
        assert!(ratio < 1.0, "expected falling trend, got {ratio}");
    }

    #[test]
    fn volume_trend_flat_is_one() {
        let volumes = vec![50.0; 100];
        let ratio = ema_volume_trend(&volumes).unwrap();
        assert!((ratio - 1.0).abs() < 1e-10);
    }

    #[test]
    fn volume_trend_zero_baseline_is_none() {
        let volumes = vec![0.0; 30];
        assert!(ema_volume_trend(&volumes).is_none());
    }
}
