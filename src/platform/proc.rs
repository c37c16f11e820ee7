//! `/proc/<pid>` probing: comm, kernel state, owner, cumulative write bytes.
//!
//! All functions are read-only and return `None` when the PID has vanished.
//! Processes disappear between detection and inspection all the time, and
//! callers treat that as an ordinary outcome rather than an error.

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use crate::core::errors::{DwdError, Result};

/// Snapshot of a process at observation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    /// Kernel-truncated command name (≤ 15 bytes).
    pub comm: String,
    /// Single-character kernel state (`R`, `S`, `D`, `T`, `Z`, …).
    pub state: char,
    pub uid: u32,
}

impl ProcessInfo {
    /// Whether the process is stopped by job control or a signal.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self.state, 'T' | 't')
    }
}

/// Whether a PID currently exists.
#[must_use]
pub fn pid_alive(pid: i32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Kernel command name for a PID, newline-trimmed.
#[must_use]
pub fn comm_of(pid: i32) -> Option<String> {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|raw| raw.trim_end().to_string())
}

/// Kernel state character from `/proc/<pid>/stat`.
///
/// The state field follows the parenthesized comm, which may itself contain
/// spaces and parentheses, so parsing anchors on the *last* `)`.
#[must_use]
pub fn state_of(pid: i32) -> Option<char> {
    let raw = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after = raw.rsplit_once(')')?.1;
    after.split_whitespace().next()?.chars().next()
}

/// Owner uid of a PID.
#[must_use]
pub fn uid_of(pid: i32) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(format!("/proc/{pid}")).ok().map(|m| m.uid())
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Full snapshot; `None` when the PID vanished mid-read.
#[must_use]
pub fn process_info(pid: i32) -> Option<ProcessInfo> {
    Some(ProcessInfo {
        pid,
        comm: comm_of(pid)?,
        state: state_of(pid)?,
        uid: uid_of(pid)?,
    })
}

/// Cumulative bytes the process has caused to be written to storage
/// (`write_bytes` from `/proc/<pid>/io`). Needs same-user or root.
#[must_use]
pub fn write_bytes_of(pid: i32) -> Option<u64> {
    let raw = fs::read_to_string(format!("/proc/{pid}/io")).ok()?;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("write_bytes:") {
            return rest.trim().parse().ok();
        }
    }
    None
}

/// All live PIDs.
#[must_use]
pub fn all_pids() -> Vec<i32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().to_string_lossy().parse::<i32>().ok())
        .collect()
}

/// Resolve a user name to a uid.
pub fn uid_for_user(name: &str) -> Result<u32> {
    let user = nix::unistd::User::from_name(name)
        .map_err(|e| DwdError::Runtime {
            details: format!("user lookup for {name:?} failed: {e}"),
        })?
        .ok_or_else(|| DwdError::InvalidConfig {
            details: format!("unknown user {name:?}"),
        })?;
    Ok(user.uid.as_raw())
}
