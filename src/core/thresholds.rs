//! Threshold resolver: maps raw config + measured disk size to the six
//! free-space levels and the resume level, all in whole GB.
//!
//! Auto resolution uses percentage defaults with per-level minima and
//! absolute caps on the action levels, so a 16 TB array does not end up
//! pausing workloads with 300 GB still free.

#![allow(missing_docs)]

use crate::core::config::{GbSetting, ThresholdSpec};
use crate::core::errors::{DwdError, Result};

/// Default auto percentages, in tenths of a percent (kill is 0.5%).
const NOTICE_PERMILLE: u64 = 100;
const WARN_PERMILLE: u64 = 70;
const HARSH_PERMILLE: u64 = 40;
const PAUSE_PERMILLE: u64 = 20;
const STOP_PERMILLE: u64 = 10;
const KILL_PERMILLE: u64 = 5;

/// Absolute caps (GB) on the action thresholds.
pub const MAX_PAUSE_GB: u64 = 30;
pub const MAX_STOP_GB: u64 = 15;
pub const MAX_KILL_GB: u64 = 5;

/// Ceiling for the auto resume threshold (GB).
const RESUME_CEILING_GB: u64 = 50;

/// Fully resolved free-space thresholds in whole GB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedThresholds {
    pub notice: u64,
    pub warn: u64,
    pub harsh: u64,
    pub pause: u64,
    pub stop: u64,
    pub kill: u64,
    pub resume: u64,
}

impl ResolvedThresholds {
    /// Resolve thresholds from the raw spec and the measured disk size.
    ///
    /// Explicit values pass through untouched; `auto` values come from the
    /// percentage defaults, floored at the per-level minima and capped for
    /// the action levels. The resolved set must strictly decrease from
    /// notice down to kill.
    pub fn resolve(
        spec: &ThresholdSpec,
        resume: GbSetting,
        disk_gb: u64,
    ) -> Result<Self> {
        let notice = resolve_one(spec.notice, disk_gb, NOTICE_PERMILLE, 10, None);
        let warn = resolve_one(spec.warn, disk_gb, WARN_PERMILLE, 5, None);
        let harsh = resolve_one(spec.harsh, disk_gb, HARSH_PERMILLE, 3, None);
        let pause = resolve_one(spec.pause, disk_gb, PAUSE_PERMILLE, 2, Some(MAX_PAUSE_GB));
        let stop = resolve_one(spec.stop, disk_gb, STOP_PERMILLE, 1, Some(MAX_STOP_GB));
        let kill = resolve_one(spec.kill, disk_gb, KILL_PERMILLE, 1, Some(MAX_KILL_GB));

        let resolved_resume = match resume {
            GbSetting::Gb(v) => v,
            GbSetting::Auto => harsh.min(RESUME_CEILING_GB),
        };
        // Hysteresis must exist: when the resume level does not clear the
        // pause level, lift it to twice pause.
        let resume = if resolved_resume <= pause {
            pause * 2
        } else {
            resolved_resume
        };

        let resolved = Self {
            notice,
            warn,
            harsh,
            pause,
            stop,
            kill,
            resume,
        };
        resolved.check_ordering()?;
        Ok(resolved)
    }

    fn check_ordering(&self) -> Result<()> {
        let ordered = self.kill < self.stop
            && self.stop < self.pause
            && self.pause < self.harsh
            && self.harsh < self.warn
            && self.warn < self.notice;
        if !ordered {
            return Err(DwdError::InvalidConfig {
                details: format!(
                    "thresholds must strictly decrease notice > warn > harsh > pause > stop > kill, got {self:?}"
                ),
            });
        }
        if self.resume <= self.pause {
            return Err(DwdError::InvalidConfig {
                details: format!(
                    "resume threshold ({} GB) must exceed pause threshold ({} GB)",
                    self.resume, self.pause
                ),
            });
        }
        Ok(())
    }

    /// The threshold a level one step stricter than the given free-space
    /// position would be entered at. Used by rate-aware escalation.
    #[must_use]
    pub const fn next_below(&self, free_gb: u64) -> Option<u64> {
        if free_gb >= self.notice {
            Some(self.notice)
        } else if free_gb >= self.warn {
            Some(self.warn)
        } else if free_gb >= self.harsh {
            Some(self.harsh)
        } else if free_gb >= self.pause {
            Some(self.pause)
        } else if free_gb >= self.stop {
            Some(self.stop)
        } else if free_gb >= self.kill {
            Some(self.kill)
        } else {
            None
        }
    }
}

fn resolve_one(
    setting: GbSetting,
    disk_gb: u64,
    permille: u64,
    min_gb: u64,
    cap_gb: Option<u64>,
) -> u64 {
    match setting {
        GbSetting::Gb(v) => v,
        GbSetting::Auto => {
            let pct = (disk_gb * permille) / 1000;
            let floored = pct.max(min_gb);
            cap_gb.map_or(floored, |cap| floored.min(cap))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{GbSetting, ThresholdSpec};

    fn auto_spec() -> ThresholdSpec {
        ThresholdSpec::default()
    }

    #[test]
    fn auto_thresholds_on_1700_gb_disk() {
        let t = ResolvedThresholds::resolve(&auto_spec(), GbSetting::Auto, 1700)
            .expect("resolution should succeed");
        assert_eq!(t.notice, 170);
        assert_eq!(t.warn, 119);
        assert_eq!(t.harsh, 68);
        assert_eq!(t.pause, 30, "pause capped at 30");
        assert_eq!(t.stop, 15, "stop capped at 15");
        assert_eq!(t.kill, 5, "kill capped at 5");
        assert_eq!(t.resume, 50, "resume = min(harsh, 50)");
    }

    #[test]
    fn small_disk_hits_minima() {
        // 250 GB: percentages land at 25/17/10/5/2/1 with pause below its cap.
        let t = ResolvedThresholds::resolve(&auto_spec(), GbSetting::Auto, 250)
            .expect("resolution should succeed");
        assert_eq!(t.notice, 25);
        assert_eq!(t.warn, 17);
        assert_eq!(t.harsh, 10);
        assert_eq!(t.pause, 5);
        assert_eq!(t.stop, 2);
        assert_eq!(t.kill, 1);
        assert_eq!(t.resume, 10, "resume = min(harsh, 50) = 2*pause");
    }

    #[test]
    fn tiny_disk_fails_ordering() {
        // 60 GB: stop and kill both floor at 1 GB, which violates the strict
        // ordering; the watchdog refuses to start rather than act on a
        // degenerate threshold set.
        let result = ResolvedThresholds::resolve(&auto_spec(), GbSetting::Auto, 60);
        assert!(result.is_err());
    }

    #[test]
    fn resume_bumped_when_hysteresis_missing() {
        // Force resume below pause: pause=20, resume asked at 10.
        let spec = ThresholdSpec {
            notice: GbSetting::Gb(100),
            warn: GbSetting::Gb(70),
            harsh: GbSetting::Gb(40),
            pause: GbSetting::Gb(20),
            stop: GbSetting::Gb(10),
            kill: GbSetting::Gb(5),
        };
        let t = ResolvedThresholds::resolve(&spec, GbSetting::Gb(10), 500)
            .expect("resolution should succeed");
        assert_eq!(t.resume, 40, "resume lifted to 2*pause");
    }

    #[test]
    fn resume_auto_tracks_harsh_on_mid_size_disk() {
        // 1000 GB: harsh=40, pause=20 → resume=min(40,50)=40=2*pause.
        let t = ResolvedThresholds::resolve(&auto_spec(), GbSetting::Auto, 1000)
            .expect("resolution should succeed");
        assert_eq!(t.harsh, 40);
        assert_eq!(t.pause, 20);
        assert_eq!(t.resume, 40);
        assert!(t.resume >= 2 * t.pause);
    }

    #[test]
    fn explicit_values_pass_through() {
        let spec = ThresholdSpec {
            notice: GbSetting::Gb(200),
            warn: GbSetting::Gb(150),
            harsh: GbSetting::Gb(100),
            pause: GbSetting::Gb(28),
            stop: GbSetting::Gb(12),
            kill: GbSetting::Gb(4),
        };
        let t = ResolvedThresholds::resolve(&spec, GbSetting::Auto, 4000)
            .expect("resolution should succeed");
        assert_eq!(t.notice, 200);
        assert_eq!(t.pause, 28);
        assert_eq!(t.kill, 4);
        assert_eq!(t.resume, 50, "auto resume = min(harsh=100, 50)");
    }

    #[test]
    fn explicit_unordered_set_rejected() {
        let spec = ThresholdSpec {
            notice: GbSetting::Gb(50),
            warn: GbSetting::Gb(60), // warn above notice
            harsh: GbSetting::Gb(40),
            pause: GbSetting::Gb(20),
            stop: GbSetting::Gb(10),
            kill: GbSetting::Gb(5),
        };
        assert!(ResolvedThresholds::resolve(&spec, GbSetting::Auto, 1000).is_err());
    }

    #[test]
    fn next_below_walks_the_ladder() {
        let t = ResolvedThresholds::resolve(&auto_spec(), GbSetting::Auto, 1700).unwrap();
        assert_eq!(t.next_below(500), Some(170), "ok → notice boundary");
        assert_eq!(t.next_below(150), Some(119), "notice → warn boundary");
        assert_eq!(t.next_below(70), Some(68), "warn → harsh boundary");
        assert_eq!(t.next_below(40), Some(30), "harsh → pause boundary");
        assert_eq!(t.next_below(20), Some(15), "pause → stop boundary");
        assert_eq!(t.next_below(10), Some(5), "stop → kill boundary");
        assert_eq!(t.next_below(3), None, "already below kill");
    }

    #[test]
    fn kill_percentage_uses_floor() {
        // 0.5% of 900 GB = 4.5 → floor 4 (above the 1 GB minimum, below cap).
        let t = ResolvedThresholds::resolve(&auto_spec(), GbSetting::Auto, 900)
            .expect("resolution should succeed");
        assert_eq!(t.kill, 4);
    }
}
