//! PID file with an exclusive advisory lock held for the daemon lifetime.
//!
//! The lock is what enforces single-instance; the decimal PID inside the
//! file is for humans and for `dwd stop`. Acquisition is non-blocking:
//! a second instance fails startup immediately instead of queueing.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::errors::{DwdError, Result};
use crate::platform::proc;

/// Held PID-file lock. Dropping releases the flock; `release()` also
/// removes the file for a clean shutdown.
#[derive(Debug)]
pub struct PidFile {
    lock: nix::fcntl::Flock<File>,
    path: PathBuf,
}

impl PidFile {
    /// Acquire the exclusive lock and write our PID, failing fast when
    /// another instance holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DwdError::io(parent, e))?;
        }
        let file = {
            let mut opts = OpenOptions::new();
            opts.read(true).write(true).create(true).truncate(false);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            opts.open(path).map_err(|e| DwdError::io(path, e))?
        };

        #[allow(deprecated)]
        let mut lock = nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusiveNonblock)
            .map_err(|(_file, _errno)| DwdError::AlreadyRunning {
                path: path.to_path_buf(),
            })?;

        lock.set_len(0).map_err(|e| DwdError::io(path, e))?;
        writeln!(*lock, "{}", std::process::id()).map_err(|e| DwdError::io(path, e))?;
        lock.flush().map_err(|e| DwdError::io(path, e))?;

        Ok(Self {
            lock,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file and release the lock (clean shutdown).
    pub fn release(self) {
        let _ = fs::remove_file(&self.path);
        drop(self.lock);
    }
}

/// Read the decimal PID from a PID file, if present and parseable.
#[must_use]
pub fn read_pid(path: &Path) -> Option<i32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}

/// Remove the PID file when its recorded process no longer exists.
/// Returns whether a stale file was removed.
#[must_use]
pub fn remove_if_stale(path: &Path) -> bool {
    match read_pid(path) {
        Some(pid) if proc::pid_alive(pid) => false,
        Some(_) | None if path.exists() => {
            let _ = fs::remove_file(path);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwd.pid");
        let pidfile = PidFile::acquire(&path).expect("lock should acquire");
        let pid = read_pid(&path).expect("pid should parse");
        assert_eq!(pid, std::process::id() as i32);
        pidfile.release();
        assert!(!path.exists(), "release removes the file");
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwd.pid");
        let held = PidFile::acquire(&path).expect("first lock acquires");
        let err = PidFile::acquire(&path).expect_err("second lock must fail");
        assert_eq!(err.code(), "DWD-3001");
        held.release();
    }

    #[test]
    fn lock_is_reacquirable_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwd.pid");
        PidFile::acquire(&path).expect("first").release();
        PidFile::acquire(&path).expect("second after release").release();
    }

    #[test]
    fn read_pid_handles_missing_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwd.pid");
        assert_eq!(read_pid(&path), None);
        fs::write(&path, "not a pid\n").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn stale_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwd.pid");
        // A PID that cannot exist.
        fs::write(&path, "-1\n").unwrap();
        assert!(remove_if_stale(&path));
        assert!(!path.exists());
    }

    #[test]
    fn live_pid_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dwd.pid");
        fs::write(&path, format!("{}\n", std::process::id())).unwrap();
        assert!(!remove_if_stale(&path));
        assert!(path.exists());
    }
}
