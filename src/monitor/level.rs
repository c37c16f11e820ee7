//! Severity levels and the two-phase classifier: strict threshold
//! comparison, then rate-aware one-step escalation.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::thresholds::ResolvedThresholds;

/// Discrete severity class, totally ordered: `Ok < Notice < … < Kill`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Ok,
    Notice,
    Warn,
    Harsh,
    Pause,
    Stop,
    Kill,
}

impl Level {
    pub const ALL: [Self; 7] = [
        Self::Ok,
        Self::Notice,
        Self::Warn,
        Self::Harsh,
        Self::Pause,
        Self::Stop,
        Self::Kill,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Notice => "notice",
            Self::Warn => "warn",
            Self::Harsh => "harsh",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Kill => "kill",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.name() == raw)
    }

    /// The next stricter level, saturating at `Kill`.
    #[must_use]
    pub const fn escalated(self) -> Self {
        match self {
            Self::Ok => Self::Notice,
            Self::Notice => Self::Warn,
            Self::Warn => Self::Harsh,
            Self::Harsh => Self::Pause,
            Self::Pause => Self::Stop,
            Self::Stop | Self::Kill => Self::Kill,
        }
    }

    /// Adaptive sleep before the next loop iteration.
    #[must_use]
    pub const fn sleep_interval(self) -> Duration {
        let secs = match self {
            Self::Ok => 300,
            Self::Notice => 60,
            Self::Warn => 30,
            Self::Harsh => 10,
            Self::Pause => 3,
            Self::Stop | Self::Kill => 1,
        };
        Duration::from_secs(secs)
    }

    /// Whether `check` treats this level as healthy (exit 0).
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Ok | Self::Notice | Self::Warn)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classifier output: the level plus whether rate escalation raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub level: Level,
    pub escalated: bool,
    /// Minutes until the next stricter threshold at the observed rate, when
    /// finite and relevant to escalation.
    pub minutes_to_next: Option<u64>,
}

/// Base level by strict comparison against the resolved thresholds.
#[must_use]
pub fn base_level(free_gb: u64, t: &ResolvedThresholds) -> Level {
    if free_gb < t.kill {
        Level::Kill
    } else if free_gb < t.stop {
        Level::Stop
    } else if free_gb < t.pause {
        Level::Pause
    } else if free_gb < t.harsh {
        Level::Harsh
    } else if free_gb < t.warn {
        Level::Warn
    } else if free_gb < t.notice {
        Level::Notice
    } else {
        Level::Ok
    }
}

/// Two-phase classification.
///
/// After the threshold comparison, a positive fill rate that would cross the
/// next stricter threshold within `escalate_minutes` raises the level by
/// exactly one step. `escalate_minutes == 0` disables escalation.
#[must_use]
pub fn classify(
    free_gb: u64,
    rate_gb_per_min: u64,
    t: &ResolvedThresholds,
    escalate_minutes: u64,
) -> Classification {
    let base = base_level(free_gb, t);
    if rate_gb_per_min == 0 || escalate_minutes == 0 || base == Level::Kill {
        return Classification {
            level: base,
            escalated: false,
            minutes_to_next: None,
        };
    }

    let Some(next_threshold) = t.next_below(free_gb) else {
        return Classification {
            level: base,
            escalated: false,
            minutes_to_next: None,
        };
    };

    let distance_gb = free_gb.saturating_sub(next_threshold);
    let minutes = distance_gb / rate_gb_per_min;
    if minutes < escalate_minutes {
        Classification {
            level: base.escalated(),
            escalated: true,
            minutes_to_next: Some(minutes),
        }
    } else {
        Classification {
            level: base,
            escalated: false,
            minutes_to_next: Some(minutes),
        }
    }
}
