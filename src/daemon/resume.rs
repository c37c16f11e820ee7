//! Resume manager: unfreezes previously paused processes once free space
//! clears the hysteresis threshold, subject to a per-process cooldown and
//! the hourly strike cap.
//!
//! Record lifecycle rules are strict because PIDs recycle: a record whose
//! process is gone, renamed, or no longer stopped is dropped rather than
//! acted on.

#![allow(missing_docs)]

use nix::sys::signal::Signal;

use crate::daemon::actions::{PausedRecord, SignalSender};
use crate::logger::console;
use crate::platform::proc::{self, ProcessInfo};

/// Records older than this are deleted even if the PID still exists.
pub const STALE_RECORD_SECS: u64 = 7200;

/// Outcome of one resume pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    /// `(pid, comm)` pairs that received SIGCONT.
    pub resumed: Vec<(i32, String)>,
    /// Records dropped (process gone, comm changed, not stopped, delivery failed).
    pub dropped: usize,
    /// Records kept for a later pass (cooldown or strike cap).
    pub held: usize,
}

/// Hysteresis-gated resume engine.
#[derive(Debug, Clone)]
pub struct ResumeManager {
    cooldown_secs: u64,
    max_strikes: u32,
}

impl ResumeManager {
    #[must_use]
    pub const fn new(cooldown_secs: u64, max_strikes: u32) -> Self {
        Self {
            cooldown_secs,
            max_strikes,
        }
    }

    /// Automatic resume pass, run every loop iteration.
    ///
    /// Precondition checks (auto_resume enabled, free space above the resume
    /// threshold) belong to the caller; this method only applies per-record
    /// rules.
    pub fn auto_resume(
        &self,
        paused: &mut Vec<PausedRecord>,
        now_epoch: u64,
        sender: &dyn SignalSender,
    ) -> ResumeReport {
        self.auto_resume_with(paused, now_epoch, sender, &|pid| proc::process_info(pid))
    }

    /// Testable core of [`auto_resume`].
    pub fn auto_resume_with(
        &self,
        paused: &mut Vec<PausedRecord>,
        now_epoch: u64,
        sender: &dyn SignalSender,
        probe: &dyn Fn(i32) -> Option<ProcessInfo>,
    ) -> ResumeReport {
        let mut report = ResumeReport::default();

        paused.retain(|record| {
            let Some(info) = probe(record.pid) else {
                report.dropped += 1;
                return false;
            };
            if info.comm != record.comm {
                report.dropped += 1;
                return false;
            }
            if !info.is_stopped() {
                // Already resumed externally; nothing left to track.
                report.dropped += 1;
                return false;
            }
            if record.strikes >= self.max_strikes {
                report.held += 1;
                return true;
            }
            if now_epoch.saturating_sub(record.paused_at) < self.cooldown_secs {
                report.held += 1;
                return true;
            }
            match sender.send(record.pid, Signal::SIGCONT) {
                Ok(()) => {
                    console::resume(&format!(
                        "resumed pid {} ({}) after {}s paused",
                        record.pid,
                        record.comm,
                        now_epoch.saturating_sub(record.paused_at)
                    ));
                    report.resumed.push((record.pid, record.comm.clone()));
                    false
                }
                Err(details) => {
                    console::warning(&format!(
                        "SIGCONT to pid {} ({}) failed: {details}",
                        record.pid, record.comm
                    ));
                    report.dropped += 1;
                    false
                }
            }
        });

        report
    }

    /// Delete records older than [`STALE_RECORD_SECS`] regardless of process
    /// state. Returns how many were removed.
    pub fn cleanup_stale(paused: &mut Vec<PausedRecord>, now_epoch: u64) -> usize {
        let before = paused.len();
        paused.retain(|r| now_epoch.saturating_sub(r.paused_at) <= STALE_RECORD_SECS);
        before - paused.len()
    }

    /// Manual resume (`dwd resume`): SIGCONT every record still stopped,
    /// ignoring cooldown and strikes. The caller truncates the file.
    pub fn manual_resume(
        paused: &[PausedRecord],
        sender: &dyn SignalSender,
    ) -> ResumeReport {
        Self::manual_resume_with(paused, sender, &|pid| proc::process_info(pid))
    }

    /// Testable core of [`manual_resume`].
    pub fn manual_resume_with(
        paused: &[PausedRecord],
        sender: &dyn SignalSender,
        probe: &dyn Fn(i32) -> Option<ProcessInfo>,
    ) -> ResumeReport {
        let mut report = ResumeReport::default();
        for record in paused {
            let still_stopped = probe(record.pid)
                .is_some_and(|info| info.comm == record.comm && info.is_stopped());
            if !still_stopped {
                report.dropped += 1;
                continue;
            }
            match sender.send(record.pid, Signal::SIGCONT) {
                Ok(()) => {
                    console::resume(&format!("resumed pid {} ({})", record.pid, record.comm));
                    report.resumed.push((record.pid, record.comm.clone()));
                }
                Err(details) => {
                    console::warning(&format!(
                        "SIGCONT to pid {} ({}) failed: {details}",
                        record.pid, record.comm
                    ));
                    report.dropped += 1;
                }
            }
        }
        report
    }
}
