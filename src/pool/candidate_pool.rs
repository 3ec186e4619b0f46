// =============================================================================
// Unified Signal Candidate Pool — four-sub-layer fusion & ranking pass
// =============================================================================
//
// One pass per symbol:
//   L0  (3 ms)  unified timestamp, market-regime refresh, extreme-market flag
//   L1 (12 ms)  validation, AI + regime confidence re-weighting, 7-D scoring
//   L2  (8 ms)  EPL-probability filter, score-ordered de-duplication, per-
//               symbol cap, composite floor, standardization, fast-track
//   L-AI (5 ms) deviation-triggered re-learn, final weight application
//
// Budgets are logged on breach, never aborted mid-pass. The pool list is
// guarded by a readers-writer lock; published records are immutable. The
// learner lives behind a short mutex so a pass sees one consistent weight
// snapshot and feedback never interleaves with scoring.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pool::learner::{AdaptiveLearner, LearnerSnapshot};
use crate::pool::regime::MarketRegimeState;
use crate::pool::scoring::{score_signal, ScoringContext};
use crate::pool::types::{EplDecision, RawSignal, SignalSource, StandardizedSignal};
use crate::pool::validators;
use crate::runtime_config::PoolConfig;
use crate::types::now_ms;

/// Sub-layer budgets in milliseconds.
const L0_BUDGET_MS: f64 = 3.0;
const L1_BUDGET_MS: f64 = 12.0;
const L2_BUDGET_MS: f64 = 8.0;
const LAI_BUDGET_MS: f64 = 5.0;
const TOTAL_BUDGET_MS: f64 = 28.0;

/// Accuracy deviation over the last 10 decisions that triggers a re-learn.
const RELEARN_DEVIATION: f64 = 0.2;

/// Similarity weights over (type, strength, source).
const SIM_TYPE_WEIGHT: f64 = 0.4;
const SIM_STRENGTH_WEIGHT: f64 = 0.4;
const SIM_SOURCE_WEIGHT: f64 = 0.2;

/// Market observations for one scoring pass (the L0 snapshot inputs).
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub five_min_change_pct: f64,
    pub volume_surge_multiplier: f64,
    pub volatility_percentile: f64,
    pub data_completeness: f64,
    pub btc_correlation: f64,
    pub volume_24h: f64,
    pub orderbook_depth: f64,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            five_min_change_pct: 0.0,
            volume_surge_multiplier: 1.0,
            volatility_percentile: 0.5,
            data_completeness: 0.8,
            btc_correlation: 0.7,
            volume_24h: 0.0,
            orderbook_depth: 1000.0,
        }
    }
}

/// Everything one pass fuses: the collected signals plus the market view.
#[derive(Debug, Clone, Default)]
pub struct FusionInputs {
    pub signals: Vec<RawSignal>,
    pub market: MarketContext,
}

/// Generation statistics for the performance report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total_generated: u64,
    pub by_source: HashMap<String, u64>,
    pub validation_rejected: u64,
    pub epl_filtered: u64,
    pub dedup_dropped: u64,
    pub quality_filtered: u64,
    pub fast_track_count: u64,
    pub last_layer_0_ms: f64,
    pub last_layer_1_ms: f64,
    pub last_layer_2_ms: f64,
    pub last_layer_ai_ms: f64,
    pub last_total_ms: f64,
}

/// Performance report exposed to the operator API.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub stats: PoolStats,
    pub learner: LearnerSnapshot,
    pub regime: MarketRegimeState,
    pub candidate_pool_size: usize,
}

/// The C6 unified signal candidate pool.
pub struct UnifiedSignalCandidatePool {
    config: PoolConfig,
    learner: Mutex<AdaptiveLearner>,
    regime: RwLock<MarketRegimeState>,
    pool: RwLock<Vec<StandardizedSignal>>,
    stats: Mutex<PoolStats>,
}

struct ScoredSignal {
    raw: RawSignal,
    confidence: f64,
    score: crate::pool::types::SevenDimensionalScore,
    composite: f64,
    epl_pass_probability: f64,
}

impl UnifiedSignalCandidatePool {
    pub fn new(config: PoolConfig) -> Self {
        use chrono::Timelike;
        let now = now_ms();
        let hour = chrono::Utc::now().hour();
        Self {
            config,
            learner: Mutex::new(AdaptiveLearner::new()),
            regime: RwLock::new(MarketRegimeState::new(now, hour)),
            pool: RwLock::new(Vec::new()),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Run one fusion-and-ranking pass for `symbol`.
    pub fn generate_candidates(
        &self,
        symbol: &str,
        inputs: FusionInputs,
    ) -> Vec<StandardizedSignal> {
        use chrono::Timelike;
        let pass_start = Instant::now();
        let now = now_ms();
        let utc_hour = chrono::Utc::now().hour();

        // --- L0: synchronize ------------------------------------------------
        let l0_start = Instant::now();
        {
            let mut regime = self.regime.write();
            regime.refresh(
                inputs.market.five_min_change_pct,
                inputs.market.volume_surge_multiplier,
                inputs.market.volatility_percentile,
                now,
                utc_hour,
            );
            if regime.is_extreme_market {
                warn!(
                    symbol = %symbol,
                    five_min_change_pct = regime.five_min_change_pct,
                    volume_surge = regime.volume_surge_multiplier,
                    "extreme market mode active"
                );
            }
        }
        let regime = self.regime.read().clone();
        let l0_ms = l0_start.elapsed().as_secs_f64() * 1000.0;

        let context = ScoringContext {
            data_completeness: inputs.market.data_completeness,
            btc_correlation: inputs.market.btc_correlation,
            volume_24h: inputs.market.volume_24h,
            orderbook_depth: inputs.market.orderbook_depth,
            session: regime.trading_session,
        };

        // The learner guard is held for the rest of the pass: one consistent
        // weight snapshot, serialized against feedback.
        let mut learner = self.learner.lock();

        // --- L1: multi-source fusion ---------------------------------------
        let l1_start = Instant::now();
        let mut validation_rejected = 0u64;
        let mut scored: Vec<ScoredSignal> = Vec::with_capacity(inputs.signals.len());
        for raw in inputs.signals {
            if !validators::validate(&raw) {
                validation_rejected += 1;
                continue;
            }

            let ai_factor = learner.adjusted_weight(raw.source) / raw.source.base_weight();
            let regime_factor = regime_preference(&regime, raw.source);
            let confidence = (raw.confidence * ai_factor * regime_factor).min(1.0);

            let score = score_signal(&raw, confidence, &context, &learner);
            let composite = score.comprehensive_score + score.ai_enhancement;
            scored.push(ScoredSignal {
                raw,
                confidence,
                score,
                composite,
                epl_pass_probability: 0.0,
            });
        }
        let l1_ms = l1_start.elapsed().as_secs_f64() * 1000.0;

        // --- L2: EPL preprocessing -----------------------------------------
        let l2_start = Instant::now();
        let before_epl = scored.len();
        for signal in &mut scored {
            signal.epl_pass_probability = learner.predict_epl_pass_probability(
                signal.raw.signal_strength,
                signal.confidence,
                signal.raw.source,
            );
        }
        scored.retain(|s| s.epl_pass_probability >= self.config.min_epl_pass_probability);
        let epl_filtered = (before_epl - scored.len()) as u64;

        // Score-ordered de-duplication: the higher-scoring duplicate wins.
        scored.sort_by(|a, b| b.composite.total_cmp(&a.composite));
        let mut kept: Vec<ScoredSignal> = Vec::with_capacity(scored.len());
        let mut dedup_dropped = 0u64;
        let window_ms = (self.config.dedup_window_s as i64) * 1000;
        for candidate in scored {
            let duplicate = kept.iter().any(|existing| {
                (candidate.raw.timestamp_ms - existing.raw.timestamp_ms).abs() <= window_ms
                    && similarity(&candidate.raw, &existing.raw)
                        > self.config.dedup_similarity_threshold
            });
            if duplicate {
                dedup_dropped += 1;
            } else {
                kept.push(candidate);
            }
        }

        // Per-symbol cap, then the composite floor.
        kept.truncate(self.config.max_candidates_per_symbol);
        let before_quality = kept.len();
        kept.retain(|s| s.composite >= self.config.min_comprehensive_score);
        let quality_filtered = (before_quality - kept.len()) as u64;

        // Standardize + fast-track.
        let mut fast_track_count = 0u64;
        let candidates: Vec<StandardizedSignal> = kept
            .iter()
            .map(|s| {
                let mut candidate = standardize(symbol, s, &regime, now);
                if regime.is_extreme_market
                    && (candidate.signal_strength >= 0.8 || candidate.execution_priority <= 2)
                {
                    candidate
                        .processing_metadata
                        .insert("emergency_signal".into(), Value::from(true));
                    candidate
                        .processing_metadata
                        .insert("fast_track_processed".into(), Value::from(true));
                    fast_track_count += 1;
                }
                candidate
            })
            .collect();
        let l2_ms = l2_start.elapsed().as_secs_f64() * 1000.0;

        // --- L-AI: adaptive learning ---------------------------------------
        let lai_start = Instant::now();
        if let Some(recent) = learner.recent_accuracy(10) {
            if (recent - learner.decision_accuracy()).abs() > RELEARN_DEVIATION {
                info!(recent, learned = learner.decision_accuracy(), "deviation re-learn triggered");
                let window = learner.recent_decisions(10);
                learner.learn_from_epl_feedback(&window);
            }
        }
        let mut candidates = candidates;
        for candidate in &mut candidates {
            let factor =
                learner.adjusted_weight(candidate.source) / candidate.source.base_weight();
            candidate.confidence = (candidate.confidence * factor).min(1.0);
        }
        drop(learner);
        let lai_ms = lai_start.elapsed().as_secs_f64() * 1000.0;

        let total_ms = pass_start.elapsed().as_secs_f64() * 1000.0;
        log_budget("L0", l0_ms, L0_BUDGET_MS);
        log_budget("L1", l1_ms, L1_BUDGET_MS);
        log_budget("L2", l2_ms, L2_BUDGET_MS);
        log_budget("L-AI", lai_ms, LAI_BUDGET_MS);
        log_budget("total", total_ms, TOTAL_BUDGET_MS);

        // --- Stats + publish -----------------------------------------------
        {
            let mut stats = self.stats.lock();
            stats.total_generated += candidates.len() as u64;
            stats.validation_rejected += validation_rejected;
            stats.epl_filtered += epl_filtered;
            stats.dedup_dropped += dedup_dropped;
            stats.quality_filtered += quality_filtered;
            stats.fast_track_count += fast_track_count;
            for candidate in &candidates {
                *stats
                    .by_source
                    .entry(candidate.source.to_string())
                    .or_insert(0) += 1;
            }
            stats.last_layer_0_ms = l0_ms;
            stats.last_layer_1_ms = l1_ms;
            stats.last_layer_2_ms = l2_ms;
            stats.last_layer_ai_ms = lai_ms;
            stats.last_total_ms = total_ms;
        }

        self.pool.write().extend(candidates.iter().cloned());
        candidates
    }

    /// Feed EPL decisions to the learner. An empty batch is a no-op.
    pub fn learn_from_epl_feedback(&self, decisions: &[EplDecision]) {
        self.learner.lock().learn_from_epl_feedback(decisions);
    }

    pub fn get_performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            stats: self.stats.lock().clone(),
            learner: self.learner.lock().snapshot(),
            regime: self.regime.read().clone(),
            candidate_pool_size: self.pool.read().len(),
        }
    }

    /// Candidates at or above a priority (1 = highest; `min_priority` is the
    /// weakest rank included).
    pub fn get_candidates_by_priority(&self, min_priority: u8) -> Vec<StandardizedSignal> {
        self.pool
            .read()
            .iter()
            .filter(|c| c.execution_priority <= min_priority)
            .cloned()
            .collect()
    }

    /// Drop expired candidates. With `max_age_s == 0` only the per-signal
    /// expiry applies; otherwise candidates older than `max_age_s` go too.
    pub fn clear_expired(&self, max_age_s: u64) {
        let now = now_ms();
        let max_age_ms = max_age_s as i64 * 1000;
        self.pool.write().retain(|c| {
            c.expires_at_ms > now && (max_age_s == 0 || now - c.created_at_ms <= max_age_ms)
        });
    }

    pub fn pool_len(&self) -> usize {
        self.pool.read().len()
    }

    pub fn current_regime(&self) -> MarketRegimeState {
        self.regime.read().clone()
    }
}

// =============================================================================
// Pass helpers
// =============================================================================

fn log_budget(stage: &str, observed_ms: f64, budget_ms: f64) {
    if observed_ms > budget_ms {
        warn!(stage, observed_ms, budget_ms, "scoring-pass budget breach");
    }
}

/// Regime fusion preference multiplier per source.
fn regime_preference(regime: &MarketRegimeState, source: SignalSource) -> f64 {
    use crate::pool::regime::RegimeTag;
    match regime.regime {
        RegimeTag::Trending if matches!(source, SignalSource::Phase1b | SignalSource::Phase1a) => {
            1.1
        }
        RegimeTag::Ranging
            if matches!(source, SignalSource::IndicatorGraph | SignalSource::Phase1c) =>
        {
            1.15
        }
        RegimeTag::Volatile if matches!(source, SignalSource::Phase1a | SignalSource::Phase1b) => {
            1.25
        }
        _ => 1.0,
    }
}

/// Weighted similarity over (type, strength, source).
fn similarity(a: &RawSignal, b: &RawSignal) -> f64 {
    let type_similarity = if a.signal_type == b.signal_type { 1.0 } else { 0.0 };
    let strength_similarity = 1.0 - (a.signal_strength - b.signal_strength).abs();
    let source_similarity = if a.source == b.source { 1.0 } else { 0.0 };
    type_similarity * SIM_TYPE_WEIGHT
        + strength_similarity * SIM_STRENGTH_WEIGHT
        + source_similarity * SIM_SOURCE_WEIGHT
}

/// Build the immutable EPL-facing record for one scored signal.
fn standardize(
    symbol: &str,
    signal: &ScoredSignal,
    regime: &MarketRegimeState,
    now: i64,
) -> StandardizedSignal {
    let strength = signal.raw.signal_strength.clamp(0.0, 1.0);
    let confidence = signal.confidence.clamp(0.0, 1.0);

    let priority_score = (confidence + strength) / 2.0;
    let execution_priority = if priority_score >= 0.9 {
        1
    } else if priority_score >= 0.8 {
        2
    } else if priority_score >= 0.7 {
        3
    } else if priority_score >= 0.6 {
        4
    } else {
        5
    };

    let risk_assessment = (1.0 - confidence).clamp(0.0, 1.0);
    let position_sizing = (confidence * (1.0 - risk_assessment) * 0.1).clamp(0.01, 0.1);

    let stop_loss = (0.02
        + regime.volatility_percentile * 0.01
        + (1.0 - strength) * 0.005)
        .clamp(0.01, 0.05);

    let base_profit = 0.03 * strength;
    let take_profit_levels = [
        base_profit.max(0.01),
        (base_profit * 2.0).max(0.02),
        (base_profit * 3.0).max(0.03),
    ];

    // Opaque upstream keys (dashboard fields included) carry through.
    let mut processing_metadata = signal.raw.metadata.clone();
    processing_metadata.insert(
        "original_source".into(),
        Value::from(signal.raw.source.to_string()),
    );
    processing_metadata.insert(
        "comprehensive_score".into(),
        Value::from(signal.composite),
    );
    if let Ok(score_value) = serde_json::to_value(signal.score) {
        processing_metadata.insert("seven_dimensional_score".into(), score_value);
    }

    StandardizedSignal {
        signal_id: format!("unified_pool_{}_{}", now, &Uuid::new_v4().to_string()[..8]),
        symbol: symbol.to_string(),
        signal_type: signal.raw.signal_type,
        signal_strength: strength,
        confidence,
        source: signal.raw.source,
        epl_pass_probability: signal.epl_pass_probability,
        market_context: regime.regime.to_string(),
        processing_metadata,
        risk_assessment,
        execution_priority,
        position_sizing,
        stop_loss_suggestion: stop_loss,
        take_profit_levels,
        created_at_ms: now,
        expires_at_ms: now + 3_600_000,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::types::SignalType;
    use std::collections::HashMap;

    fn pool() -> UnifiedSignalCandidatePool {
        UnifiedSignalCandidatePool::new(PoolConfig::default())
    }

    fn phase1a(strength: f64, ts: i64) -> RawSignal {
        RawSignal {
            symbol: "BTCUSDT".into(),
            signal_type: SignalType::PriceBreakout,
            signal_strength: strength,
            confidence: 0.75,
            source: SignalSource::Phase1a,
            quality_score: Some(0.8),
            stability_score: None,
            tier: None,
            timestamp_ms: ts,
            metadata: HashMap::new(),
        }
    }

    fn liquid_market() -> MarketContext {
        MarketContext {
            five_min_change_pct: 0.1,
            volume_surge_multiplier: 1.0,
            volatility_percentile: 0.5,
            data_completeness: 1.0,
            btc_correlation: 0.7,
            volume_24h: 1_000_000.0,
            orderbook_depth: 100.0,
        }
    }

    fn inputs(signals: Vec<RawSignal>) -> FusionInputs {
        FusionInputs {
            signals,
            market: liquid_market(),
        }
    }

    #[test]
    fn single_strong_signal_becomes_candidate() {
        let pool = pool();
        let now = now_ms();
        let candidates = pool.generate_candidates("BTCUSDT", inputs(vec![phase1a(0.8, now)]));
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.symbol, "BTCUSDT");
        assert_eq!(c.signal_type, SignalType::PriceBreakout);
        assert!(c.epl_pass_probability >= 0.4);
        assert!(c.processing_metadata.contains_key("seven_dimensional_score"));
    }

    /// Two PRICE_BREAKOUT/phase1a signals at 0.80 and 0.82
    /// within 10 s de-duplicate to one candidate — the higher-scoring one —
    /// and the dedup counter reflects it.
    #[test]
    fn dedup_keeps_higher_scoring_duplicate() {
        let pool = pool();
        let now = now_ms();
        let candidates = pool.generate_candidates(
            "BTCUSDT",
            inputs(vec![phase1a(0.80, now), phase1a(0.82, now + 10_000)]),
        );
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].signal_strength - 0.82).abs() < 1e-10);
        assert_eq!(pool.get_performance_report().stats.dedup_dropped, 1);
    }

    #[test]
    fn signals_outside_dedup_window_both_survive() {
        let pool = pool();
        let now = now_ms();
        let candidates = pool.generate_candidates(
            "BTCUSDT",
            inputs(vec![phase1a(0.80, now), phase1a(0.82, now + 60_000)]),
        );
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn per_symbol_cap_is_five() {
        let pool = pool();
        let now = now_ms();
        // Distinct types/strengths so dedup keeps them apart.
        let types = [
            SignalType::PriceBreakout,
            SignalType::VolumeSurge,
            SignalType::MomentumShift,
            SignalType::ExtremeEvent,
        ];
        let mut signals = Vec::new();
        for (i, ty) in types.iter().cycle().take(8).enumerate() {
            let mut s = phase1a(0.95 - i as f64 * 0.07, now + i as i64);
            s.signal_type = *ty;
            signals.push(s);
        }
        let candidates = pool.generate_candidates("BTCUSDT", inputs(signals));
        assert!(candidates.len() <= 5, "got {}", candidates.len());
    }

    #[test]
    fn invalid_signals_rejected_and_counted() {
        let pool = pool();
        let now = now_ms();
        let mut bad_quality = phase1a(0.8, now);
        bad_quality.quality_score = Some(0.4);
        let mut out_of_range = phase1a(1.4, now + 1);
        out_of_range.quality_score = Some(0.9);

        let candidates =
            pool.generate_candidates("BTCUSDT", inputs(vec![bad_quality, out_of_range]));
        assert!(candidates.is_empty());
        assert_eq!(pool.get_performance_report().stats.validation_rejected, 2);
    }

    #[test]
    fn weak_signals_fail_composite_floor() {
        let pool = pool();
        let now = now_ms();
        // Low strength and confidence: composite lands well under 0.65 and
        // the AI enhancement is negative.
        let mut weak = phase1a(0.45, now);
        weak.confidence = 0.66;
        let mut market = liquid_market();
        market.volume_24h = 1_000.0; // Thin market drags liquidity down.
        let candidates = pool.generate_candidates(
            "BTCUSDT",
            FusionInputs {
                signals: vec![weak],
                market,
            },
        );
        assert!(candidates.is_empty());
    }

    #[test]
    fn emitted_candidates_satisfy_invariants() {
        let pool = pool();
        let now = now_ms();
        let candidates = pool.generate_candidates(
            "BTCUSDT",
            inputs(vec![phase1a(0.9, now), phase1a(0.7, now + 40_000)]),
        );
        assert!(!candidates.is_empty());
        for c in &candidates {
            assert!((0.0..=1.0).contains(&c.signal_strength));
            assert!((0.0..=1.0).contains(&c.confidence));
            assert!((1..=5).contains(&c.execution_priority));
            assert!(c.expires_at_ms > c.created_at_ms);
            assert!(c.position_sizing > 0.0 && c.position_sizing <= 0.1);
            assert!(c.stop_loss_suggestion > 0.0);
            assert!(c.take_profit_levels[0] <= c.take_profit_levels[1]);
            assert!(c.take_profit_levels[1] <= c.take_profit_levels[2]);
            assert!((0.0..=1.0).contains(&c.risk_assessment));
        }
    }

    #[test]
    fn scoring_is_deterministic_across_passes() {
        let pool = pool();
        let now = now_ms();
        let first = pool.generate_candidates("BTCUSDT", inputs(vec![phase1a(0.8, now)]));
        let second = pool.generate_candidates("BTCUSDT", inputs(vec![phase1a(0.8, now)]));
        let score_of = |c: &StandardizedSignal| {
            c.processing_metadata["comprehensive_score"].as_f64().unwrap()
        };
        assert!((score_of(&first[0]) - score_of(&second[0])).abs() < f64::EPSILON);
    }

    #[test]
    fn extreme_market_fast_tracks_strong_signals() {
        let pool = pool();
        let now = now_ms();
        let mut market = liquid_market();
        market.five_min_change_pct = 4.0; // Extreme move.
        let candidates = pool.generate_candidates(
            "BTCUSDT",
            FusionInputs {
                signals: vec![phase1a(0.9, now)],
                market,
            },
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].processing_metadata.get("emergency_signal"),
            Some(&Value::from(true))
        );
        assert!(pool.get_performance_report().stats.fast_track_count >= 1);
    }

    #[test]
    fn empty_feedback_is_noop_and_clear_expired_zero_keeps_live() {
        let pool = pool();
        let now = now_ms();
        pool.generate_candidates("BTCUSDT", inputs(vec![phase1a(0.8, now)]));
        let before = pool.get_performance_report();

        pool.learn_from_epl_feedback(&[]);
        let after = pool.get_performance_report();
        assert_eq!(before.learner.history_len, after.learner.history_len);
        assert_eq!(before.learner.adjusted_weights, after.learner.adjusted_weights);

        // All candidates expire one hour out — clear_expired(0) keeps them.
        let len_before = pool.pool_len();
        pool.clear_expired(0);
        assert_eq!(pool.pool_len(), len_before);
    }

    #[test]
    fn candidates_by_priority_filters_on_rank() {
        let pool = pool();
        let now = now_ms();
        pool.generate_candidates(
            "BTCUSDT",
            inputs(vec![phase1a(0.95, now), phase1a(0.55, now + 40_000)]),
        );
        let all = pool.get_candidates_by_priority(5);
        let top = pool.get_candidates_by_priority(2);
        assert!(top.len() <= all.len());
        for c in top {
            assert!(c.execution_priority <= 2);
        }
    }

    #[test]
    fn feedback_shifts_weights_and_confidence() {
        let pool = pool();
        let now = now_ms();
        // 90% pass rate for phase1a.
        let decisions: Vec<EplDecision> = (0..100)
            .map(|i| EplDecision {
                signal_id: format!("s{i}"),
                signal_source: SignalSource::Phase1a,
                epl_passed: i % 10 != 0,
                final_performance: 0.01,
                timestamp_ms: now + i,
            })
            .collect();
        pool.learn_from_epl_feedback(&decisions);

        let report = pool.get_performance_report();
        let adjusted = report.learner.adjusted_weights["phase1a"];
        assert!(adjusted > SignalSource::Phase1a.base_weight());

        // The boosted source scores higher confidence than an unlearned run.
        let boosted = pool.generate_candidates("BTCUSDT", inputs(vec![phase1a(0.8, now)]));
        let fresh_pool = UnifiedSignalCandidatePool::new(PoolConfig::default());
        let baseline = fresh_pool.generate_candidates("BTCUSDT", inputs(vec![phase1a(0.8, now)]));
        assert!(boosted[0].confidence > baseline[0].confidence);
    }

    #[test]
    fn opaque_metadata_carries_through() {
        let pool = pool();
        let now = now_ms();
        let mut signal = phase1a(0.8, now);
        signal
            .metadata
            .insert("quality_grade".into(), Value::from("A"));
        signal
            .metadata
            .insert("is_precision_verified".into(), Value::from(true));
        let candidates = pool.generate_candidates("BTCUSDT", inputs(vec![signal]));
        let meta = &candidates[0].processing_metadata;
        assert_eq!(meta.get("quality_grade"), Some(&Value::from("A")));
        assert_eq!(meta.get("is_precision_verified"), Some(&Value::from(true)));
    }
}
