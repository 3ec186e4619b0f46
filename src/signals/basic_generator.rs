// =============================================================================
// Phase-1A Basic Signal Generator
// =============================================================================
//
// Emits discrete typed signals from the raw price/volume stream:
//   PRICE_BREAKOUT  — |price − SMA₁₀| / SMA₁₀ >= 2%
//   VOLUME_SURGE    — current volume > 2 × SMA₁₀ of volume
//   MOMENTUM_SHIFT  — short-MA (5) / long-MA (15) cross vs the previous bar
//   EXTREME_EVENT   — max 5-bar |Δprice| >= 5% or max volume / mean₅ >= 5
//
// Each signal carries strength, confidence, and a quality score in [0, 1].

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

/// Rolling window depth needed by the slowest check (MA-15 plus one bar).
const WINDOW: usize = 16;

/// Closed type set for Phase-1A signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BasicSignalType {
    PriceBreakout,
    VolumeSurge,
    MomentumShift,
    ExtremeEvent,
}

impl std::fmt::Display for BasicSignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceBreakout => write!(f, "PRICE_BREAKOUT"),
            Self::VolumeSurge => write!(f, "VOLUME_SURGE"),
            Self::MomentumShift => write!(f, "MOMENTUM_SHIFT"),
            Self::ExtremeEvent => write!(f, "EXTREME_EVENT"),
        }
    }
}

/// A Phase-1A typed signal.
#[derive(Debug, Clone, Serialize)]
pub struct BasicSignal {
    pub symbol: String,
    pub signal_type: BasicSignalType,
    pub signal_strength: f64,
    pub confidence: f64,
    pub quality_score: f64,
    pub timestamp_ms: i64,
}

#[derive(Default)]
struct SymbolWindow {
    closes: VecDeque<f64>,
    volumes: VecDeque<f64>,
}

/// The C4 basic signal generator.
pub struct BasicSignalGenerator {
    windows: RwLock<HashMap<String, SymbolWindow>>,
}

impl BasicSignalGenerator {
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Feed one bar (close, volume); returns the signals it produced.
    pub fn on_bar(
        &self,
        symbol: &str,
        close: f64,
        volume: f64,
        now_ms: i64,
    ) -> Vec<BasicSignal> {
        if close <= 0.0 {
            return Vec::new();
        }

        let mut windows = self.windows.write();
        let window = windows.entry(symbol.to_string()).or_default();
        window.closes.push_back(close);
        window.volumes.push_back(volume.max(0.0));
        while window.closes.len() > WINDOW {
            window.closes.pop_front();
            window.volumes.pop_front();
        }

        let closes: Vec<f64> = window.closes.iter().copied().collect();
        let volumes: Vec<f64> = window.volumes.iter().copied().collect();
        drop(windows);

        let mut out = Vec::new();
        if let Some(s) = detect_breakout(symbol, &closes, now_ms) {
            out.push(s);
        }
        if let Some(s) = detect_volume_surge(symbol, &volumes, now_ms) {
            out.push(s);
        }
        if let Some(s) = detect_momentum_shift(symbol, &closes, now_ms) {
            out.push(s);
        }
        if let Some(s) = detect_extreme_event(symbol, &closes, &volumes, now_ms) {
            out.push(s);
        }
        out
    }
}

impl Default for BasicSignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Detectors
// =============================================================================

fn sma(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Price deviates >= 2% from its 10-bar SMA (SMA over the preceding bars).
fn detect_breakout(symbol: &str, closes: &[f64], now_ms: i64) -> Option<BasicSignal> {
    if closes.len() < 11 {
        return None;
    }
    let current = *closes.last()?;
    let baseline = sma(&closes[closes.len() - 11..closes.len() - 1])?;
    if baseline <= 0.0 {
        return None;
    }
    let deviation = (current - baseline).abs() / baseline;
    if deviation < 0.02 {
        return None;
    }
    Some(BasicSignal {
        symbol: symbol.to_string(),
        signal_type: BasicSignalType::PriceBreakout,
        signal_strength: (deviation * 25.0).min(1.0),
        confidence: 0.8,
        quality_score: 0.7,
        timestamp_ms: now_ms,
    })
}

/// Current volume exceeds 2 × the 10-bar volume SMA.
fn detect_volume_surge(symbol: &str, volumes: &[f64], now_ms: i64) -> Option<BasicSignal> {
    if volumes.len() < 11 {
        return None;
    }
    let current = *volumes.last()?;
    let baseline = sma(&volumes[volumes.len() - 11..volumes.len() - 1])?;
    if baseline <= 0.0 {
        return None;
    }
    let ratio = current / baseline;
    if ratio <= 2.0 {
        return None;
    }
    Some(BasicSignal {
        symbol: symbol.to_string(),
        signal_type: BasicSignalType::VolumeSurge,
        signal_strength: (ratio / 5.0).min(1.0),
        confidence: 0.75,
        quality_score: 0.8,
        timestamp_ms: now_ms,
    })
}

/// MA-5 / MA-15 cross: the current relation differs from the previous bar's.
fn detect_momentum_shift(symbol: &str, closes: &[f64], now_ms: i64) -> Option<BasicSignal> {
    if closes.len() < 16 {
        return None;
    }
    let n = closes.len();
    let short_now = sma(&closes[n - 5..])?;
    let long_now = sma(&closes[n - 15..])?;
    let short_prev = sma(&closes[n - 6..n - 1])?;
    let long_prev = sma(&closes[n - 16..n - 1])?;
    if long_now <= 0.0 {
        return None;
    }

    let cross_now = short_now > long_now;
    let cross_prev = short_prev > long_prev;
    if cross_now == cross_prev {
        return None;
    }

    let gap = (short_now - long_now).abs() / long_now;
    Some(BasicSignal {
        symbol: symbol.to_string(),
        signal_type: BasicSignalType::MomentumShift,
        signal_strength: (gap * 50.0).min(1.0),
        confidence: 0.7,
        quality_score: 0.75,
        timestamp_ms: now_ms,
    })
}

/// Max 5-bar price change >= 5% or max volume / 5-bar mean >= 5.
fn detect_extreme_event(
    symbol: &str,
    closes: &[f64],
    volumes: &[f64],
    now_ms: i64,
) -> Option<BasicSignal> {
    if closes.len() < 5 || volumes.len() < 5 {
        return None;
    }
    let recent_closes = &closes[closes.len() - 5..];
    let recent_volumes = &volumes[volumes.len() - 5..];

    let max_price_change = recent_closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]).abs() / w[0])
        .fold(0.0f64, f64::max);

    let mean_volume = sma(recent_volumes)?;
    let max_volume_ratio = if mean_volume > 0.0 {
        recent_volumes.iter().fold(0.0f64, |a, &v| a.max(v)) / mean_volume
    } else {
        0.0
    };

    if max_price_change < 0.05 && max_volume_ratio < 5.0 {
        return None;
    }
    Some(BasicSignal {
        symbol: symbol.to_string(),
        signal_type: BasicSignalType::ExtremeEvent,
        signal_strength: (max_price_change * 10.0).max(max_volume_ratio / 10.0).min(1.0),
        confidence: 0.85,
        quality_score: 0.9,
        timestamp_ms: now_ms,
    })
}

// =============================================================================
// Tests
// =============================================================================
