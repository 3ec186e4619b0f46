// =============================================================================
// Support / Resistance Levels
// =============================================================================
//
// Rolling-window pivot detection over a close series. A local maximum across
// `2 * wing + 1` samples is a resistance pivot, a local minimum a support
// pivot. The most recent support below and resistance above the current
// price are the active levels.

/// The active support / resistance levels around the current price.
#[derive(Debug, Clone, Default)]
pub struct SupportResistance {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

/// Detect the active support and resistance levels for `closes` using pivot
/// points with `wing` samples on each side.
///
/// Returns an empty result when the series is shorter than `2 * wing + 1`.
pub fn detect_levels(closes: &[f64], wing: usize) -> SupportResistance {
    let window = 2 * wing + 1;
    if wing == 0 || closes.len() < window {
        return SupportResistance::default();
    }

    let current = closes[closes.len() - 1];
    let mut support: Option<f64> = None;
    let mut resistance: Option<f64> = None;

    // Walk pivots oldest-first so the most recent valid pivot wins.
    for i in wing..closes.len() - wing {
        let center = closes[i];
        let left = &closes[i - wing..i];
        let right = &closes[i + 1..i + 1 + wing];

        let is_high = left.iter().chain(right.iter()).all(|&v| v <= center);
        let is_low = left.iter().chain(right.iter()).all(|&v| v >= center);

        if is_high && center >= current {
            resistance = Some(center);
        }
        if is_low && center <= current {
            support = Some(center);
        }
    }

    SupportResistance { support, resistance }
}

impl SupportResistance {
    /// Relative distance from `price` to the nearer of the two levels.
    ///
    /// Returns `None` when no level is known or the price is non-positive.
    pub fn nearest_distance(&self, price: f64) -> Option<f64> {
        if price <= 0.0 {
            return None;
        }
        let d_support = self.support.map(|s| (price - s).abs() / price);
        let d_resistance = self.resistance.map(|r| (price - r).abs() / price);
        match (d_support, d_resistance) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

/// Convergence score for proximity to a support/resistance level.
///
/// Distance < 0.2% => 0.9, < 0.5% => 0.7, < 1% => 0.5, else 0.
pub fn support_resistance_convergence(levels: &SupportResistance, price: f64) -> f64 {
    match levels.nearest_distance(price) {
        Some(d) if d < 0.002 => 0.9,
        Some(d) if d < 0.005 => 0.7,
        Some(d) if d < 0.01 => 0.5,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_empty_and_short() {
        assert!(detect_levels(&[], 3).support.is_none());
        assert!(detect_levels(&[1.0, 2.0], 3).resistance.is_none());
    }

    #[test]
    fn detect_v_shape_support() {
        // Price dips to 90 and recovers — 90 is a support pivot below the
        // current price of 100.
        let closes = vec![100.0, 96.0, 93.0, 90.0, 93.0, 96.0, 100.0];
        let levels = detect_levels(&closes, 2);
        assert_eq!(levels.support, Some(90.0));
    }

    #[test]
    fn detect_peak_resistance() {
        // Price spikes to 110 and falls back — 110 is resistance above the
        // current price of 100.
        let closes = vec![100.0, 104.0, 107.0, 110.0, 107.0, 104.0, 100.0];
        let levels = detect_levels(&closes, 2);
        assert_eq!(levels.resistance, Some(110.0));
    }

    #[test]
    fn nearest_distance_picks_closer_level() {
        let levels = SupportResistance {
            support: Some(99.0),
            resistance: Some(110.0),
        };
        // Support is 1 away, resistance 10 away => 1/100.
        let d = levels.nearest_distance(100.0).unwrap();
        assert!((d - 0.01).abs() < 1e-12);
    }

    #[test]
    fn convergence_ladder() {
        let tight = SupportResistance {
            support: Some(99.85),
            resistance: None,
        };
        // 0.15% distance => 0.9 tier.
        assert!((support_resistance_convergence(&tight, 100.0) - 0.9).abs() < 1e-10);

        let near = SupportResistance {
            support: Some(99.6),
            resistance: None,
        };
        // 0.4% => 0.7 tier.
        assert!((support_resistance_convergence(&near, 100.0) - 0.7).abs() < 1e-10);

        let medium = SupportResistance {
            support: Some(99.2),
            resistance: None,
        };
        // 0.8% => 0.5 tier.
        assert!((support_resistance_convergence(&medium, 100.0) - 0.5).abs() < 1e-10);

        let far = SupportResistance {
            support: Some(90.0),
            resistance: None,
        };
        assert_eq!(support_resistance_convergence(&far, 100.0), 0.0);

        let none = SupportResistance::default();
        assert_eq!(support_resistance_convergence(&none, 100.0), 0.0);
    }
}
