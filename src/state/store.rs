//! Persisted daemon state: small plain-text files in a private 0700
//! directory, rewritten atomically (write temp, then rename).
//!
//! The daemon owns every file here; read-only subcommands parse but never
//! mutate them, except `resume` which rewrites the paused-records file
//! atomically. Records are TAB-separated because comm may contain colons.
//! Reads tolerate missing files and skip malformed lines: state files are
//! advisory, and a half-written line must never take the watchdog down.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::errors::{DwdError, Result};
use crate::daemon::actions::PausedRecord;
use crate::detect::writers::WriterCandidate;
use crate::monitor::level::Level;

const STATE_FILE: &str = "state";
const RATE_FILE: &str = "rate";
const WRITERS_FILE: &str = "known_writers";
const PAUSED_FILE: &str = "paused_pids";

/// File-backed state store rooted at the private state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) the state directory with 0700 permissions.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| DwdError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(dir, perms).map_err(|source| DwdError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write-temp-then-rename so readers never observe a torn file.
    fn atomic_write(&self, name: &str, contents: &str) -> Result<()> {
        let target = self.path(name);
        let tmp = self.path(&format!(".{name}.tmp"));
        {
            let mut opts = OpenOptions::new();
            opts.create(true).write(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            let mut file = opts.open(&tmp).map_err(|e| DwdError::io(&tmp, e))?;
            file.write_all(contents.as_bytes())
                .map_err(|e| DwdError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &target).map_err(|e| DwdError::io(&target, e))?;
        Ok(())
    }

    // ──────────────────── level ────────────────────

    pub fn write_level(&self, level: Level) -> Result<()> {
        self.atomic_write(STATE_FILE, &format!("{}\n", level.name()))
    }

    #[must_use]
    pub fn read_level(&self) -> Option<Level> {
        let raw = fs::read_to_string(self.path(STATE_FILE)).ok()?;
        Level::parse(raw.trim())
    }

    // ──────────────────── rate sample ────────────────────

    /// Persist the last sample as `free_bytes wall_time` (epoch seconds).
    pub fn write_rate_sample(&self, free_bytes: u64, wall_time: u64) -> Result<()> {
        self.atomic_write(RATE_FILE, &format!("{free_bytes} {wall_time}\n"))
    }

    #[must_use]
    pub fn read_rate_sample(&self) -> Option<(u64, u64)> {
        let raw = fs::read_to_string(self.path(RATE_FILE)).ok()?;
        let mut parts = raw.split_whitespace();
        let free = parts.next()?.parse().ok()?;
        let at = parts.next()?.parse().ok()?;
        Some((free, at))
    }

    // ──────────────────── writers table ────────────────────

    pub fn write_writers(&self, writers: &[WriterCandidate]) -> Result<()> {
        let mut out = String::new();
        for w in writers {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                w.pid, w.comm, w.bytes, w.first_seen, w.last_seen
            ));
        }
        self.atomic_write(WRITERS_FILE, &out)
    }

    #[must_use]
    pub fn read_writers(&self) -> Vec<WriterCandidate> {
        let Ok(raw) = fs::read_to_string(self.path(WRITERS_FILE)) else {
            return Vec::new();
        };
        raw.lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() != 5 {
                    return None;
                }
                Some(WriterCandidate {
                    pid: fields[0].parse().ok()?,
                    comm: fields[1].to_string(),
                    bytes: fields[2].parse().ok()?,
                    first_seen: fields[3].parse().ok()?,
                    last_seen: fields[4].parse().ok()?,
                })
            })
            .collect()
    }

    // ──────────────────── paused records ────────────────────

    pub fn write_paused(&self, records: &[PausedRecord]) -> Result<()> {
        let mut out = String::new();
        for r in records {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                r.pid, r.comm, r.paused_at, r.strikes
            ));
        }
        self.atomic_write(PAUSED_FILE, &out)
    }

    #[must_use]
    pub fn read_paused(&self) -> Vec<PausedRecord> {
        let Ok(raw) = fs::read_to_string(self.path(PAUSED_FILE)) else {
            return Vec::new();
        };
        raw.lines()
            .filter_map(|line| {
                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() != 4 {
                    return None;
                }
                Some(PausedRecord {
                    pid: fields[0].parse().ok()?,
                    comm: fields[1].to_string(),
                    paused_at: fields[2].parse().ok()?,
                    strikes: fields[3].parse().ok()?,
                })
            })
            .collect()
    }

    // ──────────────────── notification stamps ────────────────────

    pub fn write_notify_stamp(&self, level: Level, wall_time: u64) -> Result<()> {
        self.atomic_write(&format!("notify_{}", level.name()), &format!("{wall_time}\n"))
    }

    #[must_use]
    pub fn read_notify_stamp(&self, level: Level) -> Option<u64> {
        let raw = fs::read_to_string(self.path(&format!("notify_{}", level.name()))).ok()?;
        raw.trim().parse().ok()
    }

    /// Clear all per-level stamps (on recovery to `ok`).
    pub fn clear_notify_stamps(&self) {
        for level in Level::ALL {
            let _ = fs::remove_file(self.path(&format!("notify_{}", level.name())));
        }
    }
}
