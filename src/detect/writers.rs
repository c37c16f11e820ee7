//! Writer selection: cross-checked tracer samples, the persisted
//! recently-seen-writers table, and the ranked merge the action executor
//! consumes.
//!
//! The table exists to bridge sampling gaps: a writer that bursts between
//! trace windows stays rankable until its PID dies, its comm changes, or
//! its entry ages out.

#![allow(missing_docs)]

use std::time::Duration;

use regex::Regex;

use crate::core::errors::Result;
use crate::detect::tracer::{BlockIoTracer, TraceSample};
use crate::platform::proc::{self, ProcessInfo};

/// Ranked writer lists are capped at this many entries.
pub const MAX_RANKED_WRITERS: usize = 10;

/// Table entries not re-observed for this long are pruned.
pub const TABLE_ENTRY_TTL: Duration = Duration::from_secs(600);

/// Processes that must never be signalled, whatever they write.
///
/// Matching is anchored to the full comm. The list covers init and service
/// supervision, sessions and policy, display servers, package managers, the
/// audio/bluetooth/print stacks, and the watchdog itself; additions come
/// from the config.
const DEFAULT_PROTECTED: &[&str] = &[
    "init",
    "systemd",
    "systemd-.*",
    "kthreadd",
    "dbus-daemon",
    "dbus-broker",
    "polkitd",
    "logind",
    "NetworkManager",
    "wpa_supplicant",
    "sshd",
    "login",
    "a?getty",
    "Xorg",
    "Xwayland",
    "gnome-shell",
    "gnome-session-.*",
    "plasmashell",
    "kwin_.*",
    "gdm.*",
    "sddm.*",
    "lightdm.*",
    "pipewire.*",
    "wireplumber",
    "pulseaudio",
    "bluetoothd",
    "cupsd",
    "packagekitd",
    "apt.*",
    "dpkg",
    "dnf.*",
    "yum",
    "rpm",
    "pacman",
    "zypper",
    "snapd",
    "flatpak",
    "fwupd",
    "udevd",
    "auditd",
    "journald",
    "dwd",
];

/// Full-comm matcher compiled from a pattern list.
#[derive(Debug, Clone)]
pub struct CommMatcher {
    regex: Regex,
}

impl CommMatcher {
    /// Compile a list of patterns into one anchored alternation.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let joined = patterns
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!("^(?:{joined})$"))?;
        Ok(Self { regex })
    }

    /// The built-in protected set plus config additions.
    pub fn protected(extra: &[String]) -> Result<Self> {
        let mut patterns: Vec<String> =
            DEFAULT_PROTECTED.iter().map(ToString::to_string).collect();
        patterns.extend_from_slice(extra);
        Self::compile(&patterns)
    }

    #[must_use]
    pub fn matches(&self, comm: &str) -> bool {
        self.regex.is_match(comm)
    }
}

/// A tracked writer, persisted across loop iterations.
///
/// `bytes` are trace-window bytes (the latest window's aggregate), not a
/// cumulative counter. Timestamps are wall-clock epoch seconds: they are
/// informational and must survive daemon restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterCandidate {
    pub pid: i32,
    pub comm: String,
    pub bytes: u64,
    pub first_seen: u64,
    pub last_seen: u64,
}

/// Persisted recently-seen-writers table.
#[derive(Debug, Clone, Default)]
pub struct WritersTable {
    entries: Vec<WriterCandidate>,
}

impl WritersTable {
    #[must_use]
    pub fn new(entries: Vec<WriterCandidate>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[WriterCandidate] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or refresh a writer. `first_seen` is preserved for a PID whose
    /// comm is unchanged; a recycled PID (different comm) starts over.
    pub fn upsert(&mut self, sample: &TraceSample, now_epoch: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.pid == sample.pid) {
            if entry.comm == sample.comm {
                entry.bytes = sample.bytes;
                entry.last_seen = now_epoch;
                return;
            }
            entry.comm = sample.comm.clone();
            entry.bytes = sample.bytes;
            entry.first_seen = now_epoch;
            entry.last_seen = now_epoch;
            return;
        }
        self.entries.push(WriterCandidate {
            pid: sample.pid,
            comm: sample.comm.clone(),
            bytes: sample.bytes,
            first_seen: now_epoch,
            last_seen: now_epoch,
        });
    }

    /// Drop entries whose PID is gone, whose comm changed, or that have not
    /// been re-observed within the TTL.
    pub fn prune(&mut self, now_epoch: u64) {
        self.prune_with(now_epoch, &|pid| proc::comm_of(pid));
    }

    /// Testable core of [`prune`]: the probe returns the live comm for a PID
    /// or `None` when it is gone.
    pub fn prune_with(&mut self, now_epoch: u64, live_comm: &dyn Fn(i32) -> Option<String>) {
        let ttl = TABLE_ENTRY_TTL.as_secs();
        self.entries.retain(|entry| {
            if now_epoch.saturating_sub(entry.last_seen) > ttl {
                return false;
            }
            match live_comm(entry.pid) {
                Some(comm) => comm == entry.comm,
                None => false,
            }
        });
    }

    /// Byte-descending ranked view, capped at [`MAX_RANKED_WRITERS`].
    #[must_use]
    pub fn ranked(&self) -> Vec<WriterCandidate> {
        let mut out = self.entries.clone();
        out.sort_by(|a, b| b.bytes.cmp(&a.bytes).then(a.pid.cmp(&b.pid)));
        out.truncate(MAX_RANKED_WRITERS);
        out
    }
}

/// Cross-check raw tracer samples: the PID must still exist, its owner must
/// match the configured user (when set), and its comm must not be protected.
///
/// The probe indirection keeps this testable without live processes.
#[must_use]
pub fn select_writers(
    samples: Vec<TraceSample>,
    protected: &CommMatcher,
    user_uid: Option<u32>,
    probe: &dyn Fn(i32) -> Option<ProcessInfo>,
) -> Vec<TraceSample> {
    samples
        .into_iter()
        .filter(|sample| {
            let Some(info) = probe(sample.pid) else {
                return false;
            };
            if let Some(uid) = user_uid {
                if info.uid != uid {
                    return false;
                }
            }
            !protected.matches(&info.comm)
        })
        .collect()
}

/// A writer from the `/proc` fallback scan. `write_bytes` is a *cumulative*
/// per-process counter, a different unit from trace-window bytes, so it is
/// never merged into the writers table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackWriter {
    pub pid: i32,
    pub comm: String,
    pub write_bytes: u64,
}

/// Writer detection engine: tracer window + cross-checks + table merge.
pub struct WriterDetector {
    tracer: BlockIoTracer,
    protected: CommMatcher,
    targets: CommMatcher,
    user_uid: Option<u32>,
    heavy_writer_min_bytes: u64,
}

impl WriterDetector {
    pub fn new(
        tracer: BlockIoTracer,
        protected_extra: &[String],
        target_patterns: &[String],
        user_uid: Option<u32>,
        heavy_writer_min_bytes: u64,
    ) -> Result<Self> {
        Ok(Self {
            tracer,
            protected: CommMatcher::protected(protected_extra)?,
            targets: CommMatcher::compile(target_patterns)?,
            user_uid,
            heavy_writer_min_bytes,
        })
    }

    #[must_use]
    pub fn tracer(&self) -> &BlockIoTracer {
        &self.tracer
    }

    #[must_use]
    pub fn protected(&self) -> &CommMatcher {
        &self.protected
    }

    /// One detection pass: trace window, cross-checks, table upsert, ranked
    /// merge of window and table de-duplicated by PID.
    pub fn detect(
        &self,
        device: &str,
        table: &mut WritersTable,
        now_epoch: u64,
    ) -> Result<Vec<WriterCandidate>> {
        let raw = self.tracer.sample_window(device)?;
        let selected = select_writers(raw, &self.protected, self.user_uid, &|pid| {
            proc::process_info(pid)
        });
        for sample in &selected {
            table.upsert(sample, now_epoch);
        }
        Ok(table.ranked())
    }

    /// Degraded-path scan for ad-hoc subcommands when the tracer is absent:
    /// target-pattern processes with cumulative write volume above the
    /// heavy-writer threshold.
    #[must_use]
    pub fn proc_scan_fallback(&self) -> Vec<FallbackWriter> {
        let mut out = Vec::new();
        for pid in proc::all_pids() {
            let Some(info) = proc::process_info(pid) else {
                continue;
            };
            if !self.targets.matches(&info.comm) || self.protected.matches(&info.comm) {
                continue;
            }
            if let Some(uid) = self.user_uid {
                if info.uid != uid {
                    continue;
                }
            }
            let Some(write_bytes) = proc::write_bytes_of(pid) else {
                continue;
            };
            if write_bytes < self.heavy_writer_min_bytes {
                continue;
            }
            out.push(FallbackWriter {
                pid,
                comm: info.comm,
                write_bytes,
            });
        }
        out.sort_by(|a, b| b.write_bytes.cmp(&a.write_bytes).then(a.pid.cmp(&b.pid)));
        out.truncate(MAX_RANKED_WRITERS);
        out
    }
}
