// =============================================================================
// Unified Signal Candidate Pool Module (C6)
// =============================================================================
//
// Fuses signals from the trigger engine, the Phase-1A generator, the
// Phase-1B filter, and indicator-driven detectors; scores them along seven
// dimensions with weights learned from downstream execution-planning
// feedback; de-duplicates and caps the pool; and emits ranked
// `StandardizedSignal` candidates.

pub mod candidate_pool;
pub mod learner;
pub mod regime;
pub mod scoring;
pub mod types;
pub mod validators;

pub use candidate_pool::{FusionInputs, MarketContext, UnifiedSignalCandidatePool};
pub use learner::AdaptiveLearner;
pub use regime::MarketRegimeState;
pub use types::{EplDecision, RawSignal, SevenDimensionalScore, SignalSource, SignalType, StandardizedSignal};
