// =============================================================================
// Rate Limiter — sliding-hour caps per (symbol, priority band)
// =============================================================================
//
// Critical and High share the high-priority cap (default 5/hour); Medium and
// Low share the observation cap (default 15/hour). Each (symbol, band) keeps
// a deque of recent emission timestamps (capacity 100); entries older than
// one hour slide out. A rejected trigger increments the suppressed counter
// and is logged at debug level.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::SignalPriority;

/// Sliding window length.
const WINDOW_MS: i64 = 3_600_000;

/// Per-key timestamp deque capacity.
const MAX_TIMESTAMPS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Band {
    HighPriority,
    Observation,
}

impl Band {
    fn of(priority: SignalPriority) -> Self {
        if priority.is_high_band() {
            Self::HighPriority
        } else {
            Self::Observation
        }
    }
}

/// Sliding-hour signal rate limiter.
pub struct RateLimiter {
    high_cap: usize,
    observation_cap: usize,
    windows: Mutex<HashMap<(String, Band), VecDeque<i64>>>,
    suppressed: AtomicU64,
}

impl RateLimiter {
    pub fn new(high_cap: usize, observation_cap: usize) -> Self {
        Self {
            high_cap,
            observation_cap,
            windows: Mutex::new(HashMap::new()),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Try to emit a signal for (symbol, priority) at `now_ms`. Returns false
    /// and counts the suppression when the band's hourly cap is exhausted.
    pub fn try_acquire(&self, symbol: &str, priority: SignalPriority, now_ms: i64) -> bool {
        let band = Band::of(priority);
        let cap = match band {
            Band::HighPriority => self.high_cap,
            Band::Observation => self.observation_cap,
        };

        let mut windows = self.windows.lock();
        let window = windows
            .entry((symbol.to_string(), band))
            .or_insert_with(|| VecDeque::with_capacity(MAX_TIMESTAMPS));

        // Slide out expired entries.
        while window
            .front()
            .map(|&t| now_ms - t >= WINDOW_MS)
            .unwrap_or(false)
        {
            window.pop_front();
        }

        if window.len() >= cap {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(symbol = %symbol, priority = %priority, cap, "signal suppressed by rate limiter");
            return false;
        }

        window.push_back(now_ms);
        while window.len() > MAX_TIMESTAMPS {
            window.pop_front();
        }
        true
    }

    /// Total suppressed signals since start.
    pub fn suppressed_total(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
