//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Result of one CLI invocation.
pub struct CliResult {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run the built `dwd` binary with the given arguments.
pub fn run_cli(args: &[&str]) -> CliResult {
    let output: Output = Command::new(env!("CARGO_BIN_EXE_dwd"))
        .args(args)
        .env_remove("DISK_WATCHDOG_MOUNT_POINT")
        .output()
        .expect("dwd binary should execute");
    CliResult {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

/// A scratch environment with a config file pointing state into a temp dir.
pub struct TestEnv {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestEnv {
    /// Write a config with sane explicit thresholds and private temp paths.
    /// `extra` lines are appended verbatim.
    pub fn new(extra: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join("state");
        let pid_file = dir.path().join("dwd.pid");
        let config_path = dir.path().join("dwd.conf");
        let config = format!(
            "mount_point=/\n\
             notice_gb=6\n\
             warn_gb=5\n\
             harsh_gb=4\n\
             pause_gb=3\n\
             stop_gb=2\n\
             kill_gb=1\n\
             state_dir={}\n\
             pid_file={}\n\
             {extra}\n",
            state_dir.display(),
            pid_file.display(),
        );
        std::fs::write(&config_path, config).expect("config writes");
        Self { dir, config_path }
    }

    pub fn config_arg(&self) -> String {
        self.config_path.display().to_string()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
