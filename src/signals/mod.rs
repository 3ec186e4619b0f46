// =============================================================================
// Signals Module — Phase-1A basic generation & Phase-1B volatility filtering
// =============================================================================
//
// Phase-1A emits discrete typed signals (breakout, volume surge, momentum
// shift, extreme event) straight from the raw price/volume stream.
// Phase-1B computes volatility and signal-continuity metrics and re-weights
// or drops signals by volatility regime.

pub mod basic_generator;
pub mod volatility_filter;

pub use basic_generator::{BasicSignal, BasicSignalGenerator, BasicSignalType};
pub use volatility_filter::{SignalContinuityMetrics, VolatilityFilter, VolatilityMetrics};
