//! Supervisor unit lifecycle for `dwd uninstall`: stop and disable the
//! systemd unit, remove the unit file and the installed binary, and leave
//! config, logs, and state untouched.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use crate::core::errors::{DwdError, Result};
use crate::logger::console;

const SYSTEMD_UNIT_NAME: &str = "dwd.service";

/// What `uninstall` actually did, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub unit_stopped: bool,
    pub unit_disabled: bool,
    pub unit_file_removed: Option<PathBuf>,
    pub binary_removed: Option<PathBuf>,
}

/// Drives `systemctl` for the watchdog unit.
#[derive(Debug, Clone)]
pub struct SystemdServiceManager {
    user_scope: bool,
}

impl SystemdServiceManager {
    #[must_use]
    pub const fn new(user_scope: bool) -> Self {
        Self { user_scope }
    }

    /// Directory the unit file lives in.
    #[must_use]
    pub fn unit_dir(&self) -> PathBuf {
        if self.user_scope {
            let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
            home.join(".config/systemd/user")
        } else {
            PathBuf::from("/etc/systemd/system")
        }
    }

    /// Full path of the unit file.
    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir().join(SYSTEMD_UNIT_NAME)
    }

    fn systemctl(&self, args: &[&str]) -> bool {
        let mut cmd = Command::new("systemctl");
        if self.user_scope {
            cmd.arg("--user");
        }
        cmd.args(args)
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Stop/disable the unit, remove unit file and binary. Config, logs,
    /// and persisted state are preserved deliberately: a reinstall should
    /// pick up where the old install left off.
    pub fn uninstall(&self) -> Result<UninstallReport> {
        let mut report = UninstallReport {
            unit_stopped: self.systemctl(&["stop", SYSTEMD_UNIT_NAME]),
            unit_disabled: self.systemctl(&["disable", SYSTEMD_UNIT_NAME]),
            ..UninstallReport::default()
        };

        let unit_path = self.unit_path();
        if unit_path.exists() {
            fs::remove_file(&unit_path).map_err(|e| DwdError::io(&unit_path, e))?;
            report.unit_file_removed = Some(unit_path);
            let _ = self.systemctl(&["daemon-reload"]);
        }

        let binary = env::current_exe().map_err(|e| DwdError::Runtime {
            details: format!("cannot resolve own binary path: {e}"),
        })?;
        match fs::remove_file(&binary) {
            Ok(()) => report.binary_removed = Some(binary),
            Err(e) => {
                console::warning(&format!(
                    "could not remove binary {}: {e}",
                    binary.display()
                ));
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_scope_unit_path() {
        let mgr = SystemdServiceManager::new(false);
        assert_eq!(
            mgr.unit_path(),
            PathBuf::from("/etc/systemd/system/dwd.service")
        );
    }

    #[test]
    fn user_scope_unit_path_is_under_home() {
        let mgr = SystemdServiceManager::new(true);
        let path = mgr.unit_path();
        assert!(path.ends_with(".config/systemd/user/dwd.service"));
    }
}
