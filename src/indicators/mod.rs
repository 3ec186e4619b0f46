// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the core technical indicators used
// by the trigger engine.  Every public function returns `Option<T>` or an
// empty series so callers are forced to handle insufficient-data and
// numerical-edge-case scenarios.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod support_resistance;
pub mod volume;
