// =============================================================================
// Volume SMA & Spike Ratio
// =============================================================================
//
// The spike ratio compares the latest volume against its simple moving
// average. Ratios well above 1 mark bursts of activity; ratios well below 1
// mark drying-up volume. Both extremes carry information.

/// Simple moving average of the last `period` values.
///
/// Returns `None` when fewer than `period` data points are available.
pub fn volume_sma(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period {
        return None;
    }
    let window = &volumes[volumes.len() - period..];
    let sma = window.iter().sum::<f64>() / period as f64;
    if sma.is_finite() {
        Some(sma)
    } else {
        None
    }
}

/// Spike ratio: latest volume over its `period`-SMA (SMA over the values
/// preceding the latest one).
///
/// Returns `None` when there is not enough history or the baseline is zero.
pub fn volume_spike_ratio(volumes: &[f64], period: usize) -> Option<f64> {
    if volumes.len() < period + 1 {
        return None;
    }
    let current = *volumes.last()?;
    let baseline = volume_sma(&volumes[..volumes.len() - 1], period)?;
    if baseline <= 0.0 {
        return None;
    }
    let ratio = current / baseline;
    if ratio.is_finite() {
        Some(ratio)
    } else {
        None
    }
}

/// Convergence score for a volume spike ratio.
///
/// - ratio >= 2.5 => min(1, ratio / 3)  (burst)
/// - ratio <= 0.5 => min(1, (0.5 - ratio) * 2)  (dry-up)
/// - else 0
pub fn volume_convergence(ratio: f64) -> f64 {
    if ratio >= 2.5 {
        (ratio / 3.0).min(1.0)
    } else if ratio <= 0.5 {
        ((0.5 - ratio) * 2.0).min(1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_basic() {
        let volumes = vec![10.0, 20.0, 30.0];
        assert!((volume_sma(&volumes, 3).unwrap() - 20.0).abs() < 1e-10);
    }

    #[test]
    fn sma_insufficient() {
        assert!(volume_sma(&[1.0, 2.0], 3).is_none());
        assert!(volume_sma(&[], 1).is_none());
    }

    #[test]
    fn spike_ratio_basic() {
        // Baseline SMA(20..) over first 5 = 10; latest = 30 => ratio 3.
        let mut volumes = vec![10.0; 5];
        volumes.push(30.0);
        let ratio = volume_spike_ratio(&volumes, 5).unwrap();
        assert!((ratio - 3.0).abs() < 1e-10);
    }

    #[test]
    fn spike_ratio_zero_baseline() {
        let volumes = vec![0.0, 0.0, 0.0, 0.0, 0.0, 10.0];
        assert!(volume_spike_ratio(&volumes, 5).is_none());
    }

    #[test]
    fn convergence_burst_and_dryup() {
        // Burst side.
        assert!((volume_convergence(3.0) - 1.0).abs() < 1e-10);
        assert!((volume_convergence(2.5) - 2.5 / 3.0).abs() < 1e-10);
        // Dry-up side: ratio 0.2 => (0.5-0.2)*2 = 0.6.
        assert!((volume_convergence(0.2) - 0.6).abs() < 1e-10);
        assert!((volume_convergence(0.0) - 1.0).abs() < 1e-10);
        // Neutral band.
        assert_eq!(volume_convergence(1.0), 0.0);
        assert_eq!(volume_convergence(2.0), 0.0);
    }
}
