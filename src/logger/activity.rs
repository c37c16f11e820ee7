//! JSONL activity log: append-only line-delimited JSON of watchdog events.
//!
//! Each line is a self-contained JSON object assembled in memory and written
//! with a single `write_all` so a concurrent `tail -f` never sees a partial
//! line. When the file exceeds the configured cap it is rotated once to
//! `<name>.1` (rename); deeper rotation belongs to the host's logrotate.
//! Logging failures never propagate; the watchdog must not die for its log.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log event types matching the watchdog activity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        mount: String,
        disk_gb: u64,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    LevelChanged {
        from: String,
        to: String,
        free_gb: u64,
        rate_gb_per_min: u64,
    },
    ActionTaken {
        level: String,
        signalled: Vec<String>,
        dry_run: bool,
    },
    WritersResumed {
        count: usize,
        free_gb: u64,
    },
    ConfigReloaded {
        ok: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

/// A single JSONL record: UTC timestamp plus the event payload.
#[derive(Debug, Serialize)]
struct ActivityRecord<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a ActivityEvent,
}

/// Size-capped append-only activity log.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
    max_size_bytes: u64,
}

impl ActivityLog {
    #[must_use]
    pub fn new(path: PathBuf, max_size_bytes: u64) -> Self {
        Self {
            path,
            max_size_bytes,
        }
    }

    /// Append one event. Best-effort: all failures are swallowed.
    pub fn append(&self, event: &ActivityEvent) {
        let record = ActivityRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            event,
        };
        let Ok(mut line) = serde_json::to_string(&record) else {
            return;
        };
        line.push('\n');

        self.maybe_rotate();

        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let file = {
            let mut opts = OpenOptions::new();
            opts.create(true).append(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
        };
        if let Ok(mut f) = file {
            let _ = f.write_all(line.as_bytes());
        }
    }

    fn maybe_rotate(&self) {
        if self.max_size_bytes == 0 {
            return;
        }
        let Ok(meta) = fs::metadata(&self.path) else {
            return;
        };
        if meta.len() >= self.max_size_bytes {
            let mut rotated = self.path.as_os_str().to_owned();
            rotated.push(".1");
            let _ = fs::rename(&self.path, PathBuf::from(rotated));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let log = ActivityLog::new(path.clone(), 1_048_576);

        log.append(&ActivityEvent::DaemonStarted {
            version: "0.4.2".to_string(),
            mount: "/data".to_string(),
            disk_gb: 1700,
        });
        log.append(&ActivityEvent::LevelChanged {
            from: "ok".to_string(),
            to: "notice".to_string(),
            free_gb: 160,
            rate_gb_per_min: 0,
        });

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("ts").is_some());
            assert!(parsed.get("event").is_some());
        }
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "level_changed");
        assert_eq!(second["to"], "notice");
    }

    #[test]
    fn append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("activity.jsonl");
        let log = ActivityLog::new(path.clone(), 1_048_576);
        log.append(&ActivityEvent::ConfigReloaded { ok: true });
        assert!(path.exists());
    }

    #[test]
    fn oversized_log_rotates_to_dot_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let log = ActivityLog::new(path.clone(), 64);

        log.append(&ActivityEvent::Error {
            code: "DWD-3900".to_string(),
            message: "x".repeat(100),
        });
        // First file now exceeds the cap; next append rotates it away.
        log.append(&ActivityEvent::ConfigReloaded { ok: false });

        let rotated = dir.path().join("activity.jsonl.1");
        assert!(rotated.exists(), "rotated file should exist");
        let fresh = fs::read_to_string(&path).unwrap();
        assert_eq!(fresh.lines().count(), 1);
    }

    #[test]
    fn logging_to_unwritable_path_is_silent() {
        let log = ActivityLog::new(PathBuf::from("/proc/dwd-cannot-write-here"), 1024);
        // Must not panic.
        log.append(&ActivityEvent::ConfigReloaded { ok: true });
    }
}
