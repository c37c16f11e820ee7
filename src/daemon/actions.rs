//! Action executor: sends the level-appropriate signal to the top-N ranked
//! writers and keeps the pause bookkeeping that resume tracking needs.
//!
//! A process is re-inspected immediately before delivery: if its comm no
//! longer matches what the detector saw, the PID was recycled and the signal
//! is withheld. Strikes count pauses of the same `(pid, comm)` within a
//! rolling hour; the window resetting is what lets a well-behaved process
//! earn back its resume eligibility.

#![allow(missing_docs)]

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::detect::writers::WriterCandidate;
use crate::logger::console;
use crate::monitor::level::Level;
use crate::platform::proc;

/// Strike window: a repeat pause inside this many seconds increments the
/// counter instead of resetting it.
pub const STRIKE_WINDOW_SECS: u64 = 3600;

/// A process the watchdog has SIGSTOPped (or would have, in dry-run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausedRecord {
    pub pid: i32,
    pub comm: String,
    /// Wall-clock epoch seconds; informational, survives restarts.
    pub paused_at: u64,
    pub strikes: u32,
}

/// Outcome of one action pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionReport {
    /// `(pid, comm)` pairs that were signalled (or simulated in dry-run).
    pub signalled: Vec<(i32, String)>,
    /// Candidates skipped because they vanished or their comm changed.
    pub skipped: usize,
}

/// Signal sender abstraction so tests can observe deliveries.
pub trait SignalSender {
    fn send(&self, pid: i32, signal: Signal) -> std::result::Result<(), String>;
}

/// Real kernel delivery via `kill(2)`.
pub struct KernelSignals;

impl SignalSender for KernelSignals {
    fn send(&self, pid: i32, signal: Signal) -> std::result::Result<(), String> {
        kill(Pid::from_raw(pid), signal).map_err(|e| e.to_string())
    }
}

/// Executes graduated responses against ranked writer candidates.
pub struct ActionExecutor {
    dry_run: bool,
}

impl ActionExecutor {
    #[must_use]
    pub const fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// How many candidates a level acts on.
    #[must_use]
    pub const fn candidate_budget(level: Level) -> usize {
        match level {
            Level::Pause | Level::Stop => 5,
            Level::Kill => 10,
            _ => 0,
        }
    }

    /// The signal a level sends.
    #[must_use]
    pub const fn signal_for(level: Level) -> Option<Signal> {
        match level {
            Level::Pause => Some(Signal::SIGSTOP),
            Level::Stop => Some(Signal::SIGTERM),
            Level::Kill => Some(Signal::SIGKILL),
            _ => None,
        }
    }

    /// Act on the ranked candidates for `level`.
    ///
    /// Only `pause` updates the paused records; `stop` and `kill` targets
    /// are expected to exit, so there is nothing to resume. In dry-run mode
    /// no signal is sent but pause records are still written so resume
    /// behavior can be exercised.
    pub fn execute(
        &self,
        level: Level,
        candidates: &[WriterCandidate],
        paused: &mut Vec<PausedRecord>,
        now_epoch: u64,
        sender: &dyn SignalSender,
    ) -> ActionReport {
        let Some(signal) = Self::signal_for(level) else {
            return ActionReport::default();
        };
        let budget = Self::candidate_budget(level);
        let mut report = ActionReport::default();

        for candidate in candidates.iter().take(budget) {
            // Re-inspect: the PID may have been recycled since detection.
            match proc::comm_of(candidate.pid) {
                Some(comm) if comm == candidate.comm => {}
                Some(_) | None => {
                    console::warning(&format!(
                        "skipping pid {} ({}): gone or comm changed since detection",
                        candidate.pid, candidate.comm
                    ));
                    report.skipped += 1;
                    continue;
                }
            }

            if self.dry_run {
                console::dry_run(&format!(
                    "would send {signal:?} to pid {} ({})",
                    candidate.pid, candidate.comm
                ));
            } else if let Err(details) = sender.send(candidate.pid, signal) {
                console::warning(&format!(
                    "signal {signal:?} to pid {} ({}) failed: {details}",
                    candidate.pid, candidate.comm
                ));
                report.skipped += 1;
                continue;
            } else {
                console::action(&format!(
                    "sent {signal:?} to pid {} ({}, {} bytes in window)",
                    candidate.pid, candidate.comm, candidate.bytes
                ));
            }

            if level == Level::Pause {
                record_pause(paused, candidate, now_epoch);
            }
            report
                .signalled
                .push((candidate.pid, candidate.comm.clone()));
        }

        report
    }
}

/// Upsert a pause record, incrementing the strike inside the rolling window
/// and resetting it outside.
fn record_pause(paused: &mut Vec<PausedRecord>, candidate: &WriterCandidate, now_epoch: u64) {
    if let Some(record) = paused
        .iter_mut()
        .find(|r| r.pid == candidate.pid && r.comm == candidate.comm)
    {
        if now_epoch.saturating_sub(record.paused_at) < STRIKE_WINDOW_SECS {
            record.strikes = record.strikes.saturating_add(1);
        } else {
            record.strikes = 1;
        }
        record.paused_at = now_epoch;
        return;
    }
    paused.push(PausedRecord {
        pid: candidate.pid,
        comm: candidate.comm.clone(),
        paused_at: now_epoch,
        strikes: 1,
    });
}
