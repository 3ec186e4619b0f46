// =============================================================================
// Shared types used across the Vertex signal-generation core
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle state of a subsystem. A `system_status` event is emitted on every
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Priority attached to a trigger condition or emitted signal.
///
/// Ordered so that `Critical < High < Medium < Low` — rate-limit bands and
/// fast-track checks compare against the numeric rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl SignalPriority {
    /// Numeric rank: Critical=1 .. Low=4.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }

    /// Critical and High share the high-priority rate-limit band; Medium and
    /// Low share the observation band.
    pub fn is_high_band(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl std::fmt::Display for SignalPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Trading session derived from the UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingSession {
    Asian,
    European,
    American,
}

impl TradingSession {
    /// Session boundaries: 00–08 UTC asian, 08–16 european, 16–24 american.
    pub fn from_utc_hour(hour: u32) -> Self {
        match hour {
            0..=7 => Self::Asian,
            8..=15 => Self::European,
            _ => Self::American,
        }
    }
}

impl std::fmt::Display for TradingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asian => write!(f, "asian"),
            Self::European => write!(f, "european"),
            Self::American => write!(f, "american"),
        }
    }
}

/// Current UNIX timestamp in UTC milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
