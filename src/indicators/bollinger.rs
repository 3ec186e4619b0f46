// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ). The band-distance ratio (distance to the
// nearest band over price) is the metric the trigger engine scores
// convergence on.

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate Bollinger Bands for the given closing prices.
///
/// Returns `Some(BollingerResult)` containing:
/// - `upper`  = SMA + `num_std` * σ
/// - `middle` = SMA
/// - `lower`  = SMA - `num_std` * σ
///
/// Returns `None` when:
/// - Fewer than `period` data points.
/// - Middle band is zero (degenerate input).
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let sum: f64 = window.iter().sum();
    let middle = sum / period as f64;

    if middle == 0.0 || !middle.is_finite() {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;

    if upper.is_finite() && lower.is_finite() {
        Some(BollingerResult { upper, middle, lower })
    } else {
        None
    }
}

impl BollingerResult {
    /// Relative distance from `price` to the nearest band:
    /// `min(|price - upper|, |price - lower|) / price`.
    ///
    /// Returns `None` for non-positive prices.
    pub fn nearest_band_distance(&self, price: f64) -> Option<f64> {
        if price <= 0.0 {
            return None;
        }
        let d_upper = (price - self.upper).abs();
        let d_lower = (price - self.lower).abs();
        Some(d_upper.min(d_lower) / price)
    }
}

/// Convergence score for a price near a Bollinger band: the closer the price
/// is to either band, the stronger the signal.
///
/// Distance < 0.5% => 0.9, < 1% => 0.7, < 2% => 0.5, else 0.
pub fn bollinger_convergence(bands: &BollingerResult, price: f64) -> f64 {
    match bands.nearest_band_distance(price) {
        Some(d) if d < 0.005 => 0.9,
        Some(d) if d < 0.01 => 0.7,
        Some(d) if d < 0.02 => 0.5,
        _ => 0.0,
    }
}
