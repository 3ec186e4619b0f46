// =============================================================================
// Per-Symbol Failover State Machine — OnchainPrimary ⇄ Fallback
// =============================================================================
//
// Transitions:
//   OnchainPrimary → Fallback  when (a) >= 3 consecutive read failures within
//                              30 s, or (b) the last successful price is
//                              older than 10 s.
//   Fallback holds for >= 60 s before any recovery probe. A probe that
//   returns a fresh read (age <= 10 s) restores OnchainPrimary and resets
//   counters; a failed probe restarts the 60 s hold.
//
// Time is an explicit parameter on every transition so the machine is fully
// deterministic under test.

use serde::Serialize;

/// Consecutive failures that trip the failover.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;
/// Window within which consecutive failures must land, milliseconds.
const FAILURE_WINDOW_MS: i64 = 30_000;
/// Last-success age beyond which on-chain data is stale, milliseconds.
const STALENESS_MS: i64 = 10_000;
/// Minimum time spent in Fallback before a recovery probe, milliseconds.
const FALLBACK_HOLD_MS: i64 = 60_000;

/// Active price source for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceSource {
    OnchainPrimary,
    Fallback,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnchainPrimary => write!(f, "onchain"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Failover state for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolFailover {
    source: PriceSource,
    consecutive_failures: u32,
    first_failure_ms: Option<i64>,
    last_success_ms: Option<i64>,
    fallback_entered_ms: Option<i64>,
    pub recovery_attempts: u32,
}

impl SymbolFailover {
    pub fn new() -> Self {
        Self {
            source: PriceSource::OnchainPrimary,
            consecutive_failures: 0,
            first_failure_ms: None,
            last_success_ms: None,
            fallback_entered_ms: None,
            recovery_attempts: 0,
        }
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    pub fn is_fallback(&self) -> bool {
        self.source == PriceSource::Fallback
    }

    /// Record a successful on-chain read while primary.
    pub fn on_read_success(&mut self, now_ms: i64) {
        self.last_success_ms = Some(now_ms);
        self.consecutive_failures = 0;
        self.first_failure_ms = None;
    }

    /// Record a failed on-chain read; may trip the failover.
    pub fn on_read_failure(&mut self, now_ms: i64) {
        if self.source == PriceSource::Fallback {
            return;
        }

        // Failures only count while they cluster inside the window.
        match self.first_failure_ms {
            Some(first) if now_ms - first <= FAILURE_WINDOW_MS => {
                self.consecutive_failures += 1;
            }
            _ => {
                self.first_failure_ms = Some(now_ms);
                self.consecutive_failures = 1;
            }
        }

        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            self.enter_fallback(now_ms);
        }
    }

    /// Staleness check while primary: a last success older than 10 s (or
    /// never seen) trips the failover.
    pub fn check_staleness(&mut self, now_ms: i64) {
        if self.source == PriceSource::Fallback {
            return;
        }
        let stale = match self.last_success_ms {
            Some(last) => now_ms - last > STALENESS_MS,
            None => false, // Nothing read yet — failures will trip instead.
        };
        if stale {
            self.enter_fallback(now_ms);
        }
    }

    /// Whether the 60 s fallback hold has elapsed and a probe may run.
    pub fn ready_to_probe(&self, now_ms: i64) -> bool {
        match (self.source, self.fallback_entered_ms) {
            (PriceSource::Fallback, Some(entered)) => now_ms - entered >= FALLBACK_HOLD_MS,
            _ => false,
        }
    }

    /// Apply a recovery-probe outcome. `fresh_read_age_ms` is the age of the
    /// probed price when the probe succeeded.
    pub fn on_probe_result(&mut self, now_ms: i64, fresh_read_age_ms: Option<i64>) {
        if self.source != PriceSource::Fallback {
            return;
        }
        self.recovery_attempts += 1;

        match fresh_read_age_ms {
            Some(age) if age <= STALENESS_MS => {
                // Fresh read — back to primary, counters reset.
                self.source = PriceSource::OnchainPrimary;
                self.consecutive_failures = 0;
                self.first_failure_ms = None;
                self.fallback_entered_ms = None;
                self.last_success_ms = Some(now_ms - age);
                self.recovery_attempts = 0;
            }
            _ => {
                // Failed probe restarts the hold timer.
                self.fallback_entered_ms = Some(now_ms);
            }
        }
    }

    fn enter_fallback(&mut self, now_ms: i64) {
        self.source = PriceSource::Fallback;
        self.fallback_entered_ms = Some(now_ms);
        self.recovery_attempts = 0;
    }
}

impl Default for SymbolFailover {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
