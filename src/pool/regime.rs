// =============================================================================
// Market Regime State — refreshed at the start of every scoring pass
// =============================================================================
//
// The regime tag drives fusion preferences; the extreme-market flag opens
// the emergency fast-track. The state is refreshed once per pass and never
// mid-pass, so one pass scores against one consistent view.

use serde::Serialize;

use crate::types::TradingSession;

/// High-level regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegimeTag {
    Trending,
    Ranging,
    Volatile,
    Accumulation,
    Normal,
}

impl std::fmt::Display for RegimeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "trending"),
            Self::Ranging => write!(f, "ranging"),
            Self::Volatile => write!(f, "volatile"),
            Self::Accumulation => write!(f, "accumulation"),
            Self::Normal => write!(f, "normal"),
        }
    }
}

/// Snapshot of the market regime for one scoring pass.
#[derive(Debug, Clone, Serialize)]
pub struct MarketRegimeState {
    pub regime: RegimeTag,
    pub five_min_change_pct: f64,
    pub volume_surge_multiplier: f64,
    pub volatility_percentile: f64,
    pub is_extreme_market: bool,
    pub trading_session: TradingSession,
    pub last_update_ms: i64,
}

impl MarketRegimeState {
    pub fn new(now_ms: i64, utc_hour: u32) -> Self {
        Self {
            regime: RegimeTag::Normal,
            five_min_change_pct: 0.0,
            volume_surge_multiplier: 1.0,
            volatility_percentile: 0.5,
            is_extreme_market: false,
            trading_session: TradingSession::from_utc_hour(utc_hour),
            last_update_ms: now_ms,
        }
    }

    /// Refresh from the latest market observations.
    ///
    /// Extreme market: |5-min change| > 3% or volume surge > 8×.
    pub fn refresh(
        &mut self,
        five_min_change_pct: f64,
        volume_surge_multiplier: f64,
        volatility_percentile: f64,
        now_ms: i64,
        utc_hour: u32,
    ) {
        self.five_min_change_pct = five_min_change_pct;
        self.volume_surge_multiplier = volume_surge_multiplier;
        self.volatility_percentile = volatility_percentile;
        self.trading_session = TradingSession::from_utc_hour(utc_hour);
        self.last_update_ms = now_ms;

        self.is_extreme_market =
            five_min_change_pct.abs() > 3.0 || volume_surge_multiplier > 8.0;

        self.regime = classify(
            five_min_change_pct,
            volume_surge_multiplier,
            volatility_percentile,
        );
    }
}

/// Classification, evaluated top-to-bottom; first match wins.
fn classify(change_pct: f64, volume_surge: f64, volatility_percentile: f64) -> RegimeTag {
    if volatility_percentile > 0.8 || change_pct.abs() > 2.0 {
        return RegimeTag::Volatile;
    }
    if change_pct.abs() >= 1.0 {
        return RegimeTag::Trending;
    }
    if volume_surge > 2.0 && change_pct.abs() < 0.5 {
        return RegimeTag::Accumulation;
    }
    if volatility_percentile < 0.3 && change_pct.abs() < 0.5 {
        return RegimeTag::Ranging;
    }
    RegimeTag::Normal
}

// =============================================================================
// Tests
// =============================================================================
