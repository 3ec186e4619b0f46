// =============================================================================
// Adaptive Learner — per-source weights from EPL decision feedback
// =============================================================================
//
// Keeps a bounded history of downstream execution-planning decisions
// (capacity 10 000 ≈ 7 days at 1-minute cadence), tracks per-source pass
// rates, and adjusts fusion weights within ±30% of each source's base.
// Feeding this learner is the only path by which EPL influences upstream
// scoring.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info};

use crate::pool::types::{EplDecision, SignalSource};

/// Decision history capacity (~7 days at 1/min).
const HISTORY_CAPACITY: usize = 10_000;

/// Weight adjustment clamp relative to the base weight.
const ADJUSTMENT_FLOOR: f64 = 0.7;
const ADJUSTMENT_CEIL: f64 = 1.3;

/// Linear EPL pass-probability model weights.
const MODEL_STRENGTH: f64 = 0.3;
const MODEL_CONFIDENCE: f64 = 0.25;
const MODEL_SOURCE_RELIABILITY: f64 = 0.2;
const MODEL_MARKET_FEATURES: f64 = 0.15;
const MODEL_TIME_FEATURES: f64 = 0.1;

/// Serializable snapshot of learner state for the performance report.
#[derive(Debug, Clone, Serialize)]
pub struct LearnerSnapshot {
    pub decision_accuracy: f64,
    pub contributions: HashMap<String, f64>,
    pub adjusted_weights: HashMap<String, f64>,
    pub history_len: usize,
    pub last_update_ms: i64,
}

/// The adaptive learning engine. Exclusively owned by the candidate pool;
/// mutated only through `learn_from_epl_feedback`.
pub struct AdaptiveLearner {
    history: VecDeque<EplDecision>,
    /// Pass-rate EMA over recent decisions.
    decision_accuracy: f64,
    contributions: HashMap<SignalSource, f64>,
    adjusted_weights: HashMap<SignalSource, f64>,
    last_update_ms: i64,
}

impl AdaptiveLearner {
    pub fn new() -> Self {
        let mut contributions = HashMap::new();
        let mut adjusted_weights = HashMap::new();
        for source in SignalSource::ALL {
            contributions.insert(source, 0.8);
            adjusted_weights.insert(source, source.base_weight());
        }
        Self {
            history: VecDeque::with_capacity(1024),
            decision_accuracy: 0.8,
            contributions,
            adjusted_weights,
            last_update_ms: 0,
        }
    }

    /// Ingest a batch of EPL decisions and re-derive weights. An empty batch
    /// is a no-op.
    pub fn learn_from_epl_feedback(&mut self, decisions: &[EplDecision]) {
        if decisions.is_empty() {
            return;
        }

        for decision in decisions {
            self.history.push_back(decision.clone());
            while self.history.len() > HISTORY_CAPACITY {
                self.history.pop_front();
            }
            self.last_update_ms = self.last_update_ms.max(decision.timestamp_ms);
        }

        // Accuracy over the last 100 decisions.
        let recent: Vec<&EplDecision> = self.history.iter().rev().take(100).collect();
        if !recent.is_empty() {
            self.decision_accuracy =
                recent.iter().filter(|d| d.epl_passed).count() as f64 / recent.len() as f64;
        }

        self.recompute_contributions();
        self.recompute_weights();

        info!(
            decisions = decisions.len(),
            accuracy = self.decision_accuracy,
            "learner updated from EPL feedback"
        );
    }

    fn recompute_contributions(&mut self) {
        let mut totals: HashMap<SignalSource, (u32, u32)> = HashMap::new();
        for decision in &self.history {
            let entry = totals.entry(decision.signal_source).or_insert((0, 0));
            entry.0 += 1;
            if decision.epl_passed {
                entry.1 += 1;
            }
        }
        for (source, (total, passed)) in totals {
            if total > 0 {
                self.contributions
                    .insert(source, passed as f64 / total as f64);
            }
        }
    }

    /// Contribution > 0.8 boosts the weight by 1.1 + (c − 0.8); contribution
    /// < 0.6 cuts it by 0.9 − (0.6 − c)·0.5. Either way the adjustment stays
    /// within ±30% of the base.
    fn recompute_weights(&mut self) {
        for source in SignalSource::ALL {
            let contribution = self.contributions.get(&source).copied().unwrap_or(0.8);
            let factor = if contribution > 0.8 {
                1.1 + (contribution - 0.8)
            } else if contribution < 0.6 {
                0.9 - (0.6 - contribution) * 0.5
            } else {
                1.0
            };
            let factor = factor.clamp(ADJUSTMENT_FLOOR, ADJUSTMENT_CEIL);
            self.adjusted_weights
                .insert(source, source.base_weight() * factor);
            debug!(source = %source, contribution, factor, "weight adjusted");
        }
    }

    /// Adjusted weight for a source (base when unlearned).
    pub fn adjusted_weight(&self, source: SignalSource) -> f64 {
        self.adjusted_weights
            .get(&source)
            .copied()
            .unwrap_or_else(|| source.base_weight())
    }

    /// Per-source pass-rate contribution.
    pub fn contribution(&self, source: SignalSource) -> f64 {
        self.contributions.get(&source).copied().unwrap_or(0.8)
    }

    pub fn decision_accuracy(&self) -> f64 {
        self.decision_accuracy
    }

    /// Pass-rate over the most recent `n` decisions, if any exist.
    pub fn recent_accuracy(&self, n: usize) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let recent: Vec<&EplDecision> = self.history.iter().rev().take(n).collect();
        Some(recent.iter().filter(|d| d.epl_passed).count() as f64 / recent.len() as f64)
    }

    /// The most recent `n` decisions, oldest-first.
    pub fn recent_decisions(&self, n: usize) -> Vec<EplDecision> {
        let start = self.history.len().saturating_sub(n);
        self.history.iter().skip(start).cloned().collect()
    }

    /// Linear EPL pass-probability model.
    pub fn predict_epl_pass_probability(
        &self,
        signal_strength: f64,
        confidence: f64,
        source: SignalSource,
    ) -> f64 {
        let reliability = self.contribution(source);
        let p = signal_strength * MODEL_STRENGTH
            + confidence * MODEL_CONFIDENCE
            + reliability * MODEL_SOURCE_RELIABILITY
            + 0.7 * MODEL_MARKET_FEATURES
            + 0.8 * MODEL_TIME_FEATURES;
        p.clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> LearnerSnapshot {
        LearnerSnapshot {
            decision_accuracy: self.decision_accuracy,
            contributions: self
                .contributions
                .iter()
                .map(|(s, c)| (s.to_string(), *c))
                .collect(),
            adjusted_weights: self
                .adjusted_weights
                .iter()
                .map(|(s, w)| (s.to_string(), *w))
                .collect(),
            history_len: self.history.len(),
            last_update_ms: self.last_update_ms,
        }
    }
}

impl Default for AdaptiveLearner {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
