//! Configuration system: key=value file + `DISK_WATCHDOG_*` env overrides + validation.
//!
//! The config file is deliberately plain (one `key=value` per line, `#`
//! comments) so it can be edited by hand and sourced by shell tooling.
//! Load pipeline: defaults → file → environment → validate.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{DwdError, Result};
use crate::logger::console;

/// A threshold that is either resolved automatically from disk size or pinned
/// to an explicit whole-GB value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GbSetting {
    Auto,
    Gb(u64),
}

impl GbSetting {
    fn parse(key: &str, raw: &str) -> Result<Self> {
        if raw.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        match raw.parse::<u64>() {
            Ok(v) if v > 0 => Ok(Self::Gb(v)),
            _ => Err(DwdError::InvalidConfig {
                details: format!("{key} must be a positive integer (GB) or \"auto\", got {raw:?}"),
            }),
        }
    }
}

/// Raw (pre-resolution) free-space thresholds, one per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSpec {
    pub notice: GbSetting,
    pub warn: GbSetting,
    pub harsh: GbSetting,
    pub pause: GbSetting,
    pub stop: GbSetting,
    pub kill: GbSetting,
}

impl Default for ThresholdSpec {
    fn default() -> Self {
        Self {
            notice: GbSetting::Auto,
            warn: GbSetting::Auto,
            harsh: GbSetting::Auto,
            pause: GbSetting::Auto,
            stop: GbSetting::Auto,
            kill: GbSetting::Auto,
        }
    }
}

/// Notification channel switches and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub desktop: bool,
    pub broadcast: bool,
    pub email: bool,
    pub email_to: String,
    pub webhook: bool,
    pub webhook_url: String,
    /// Seconds between repeated alerts of the same level.
    pub cooldown_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            desktop: true,
            broadcast: false,
            email: false,
            email_to: String::new(),
            webhook: false,
            webhook_url: String::new(),
            cooldown_secs: 300,
        }
    }
}

/// Full watchdog configuration, immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub mount_point: PathBuf,
    /// Only signal processes owned by this user. Empty = all users.
    pub user: Option<String>,
    pub thresholds: ThresholdSpec,
    pub auto_resume: bool,
    pub resume_threshold: GbSetting,
    pub resume_cooldown_secs: u64,
    pub resume_max_strikes: u32,
    pub rate_warn_gb_per_min: u64,
    pub rate_escalate_minutes: u64,
    /// When false: no rate estimation and no rate-aware escalation.
    pub smart_mode: bool,
    pub tracer_cmd: String,
    /// Minimum bytes written inside one trace window to count as a writer.
    pub tracer_min_bytes: u64,
    /// Minimum cumulative `/proc/<pid>/io` write_bytes for the fallback scan.
    pub heavy_writer_min_bytes: u64,
    pub target_patterns: Vec<String>,
    /// Additional protected-process patterns, on top of the built-in set.
    pub protected_patterns: Vec<String>,
    pub notify: NotifyConfig,
    pub dry_run: bool,
    pub max_log_size: u64,
    pub state_dir: PathBuf,
    pub pid_file: PathBuf,
    /// Path the config was loaded from (for reload).
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/"),
            user: None,
            thresholds: ThresholdSpec::default(),
            auto_resume: true,
            resume_threshold: GbSetting::Auto,
            resume_cooldown_secs: 300,
            resume_max_strikes: 3,
            rate_warn_gb_per_min: 2,
            rate_escalate_minutes: 10,
            smart_mode: true,
            tracer_cmd: "biosnoop".to_string(),
            tracer_min_bytes: 1_048_576,
            heavy_writer_min_bytes: 104_857_600,
            target_patterns: default_target_patterns(),
            protected_patterns: Vec::new(),
            notify: NotifyConfig::default(),
            dry_run: false,
            max_log_size: 1_048_576,
            state_dir: default_state_dir(),
            pid_file: default_pid_file(),
            config_file: None,
        }
    }
}

fn default_target_patterns() -> Vec<String> {
    [
        "rsync", "dd", "cp", "mv", "tar", "curl", "wget", "git", "cargo", "make", "ninja",
        "rustc", "gcc", "ld", "ffmpeg", "qemu.*", "docker.*", "podman.*", "pip3?", "npm", "node",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_state_dir() -> PathBuf {
    if is_root() {
        return PathBuf::from("/var/lib/dwd");
    }
    home_dir().join(".local").join("share").join("dwd")
}

fn default_pid_file() -> PathBuf {
    if is_root() {
        return PathBuf::from("/run/dwd.pid");
    }
    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join("dwd.pid")
}

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if is_root() {
            return PathBuf::from("/etc/dwd.conf");
        }
        home_dir().join(".config").join("dwd").join("dwd.conf")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// A missing file is only an error when the path was given explicitly;
    /// otherwise defaults apply. A world-writable config file produces a
    /// security warning but is not fatal.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit = path.is_some();

        let mut cfg = Self::default();
        if path_buf.exists() {
            warn_if_world_writable(&path_buf);
            let raw = fs::read_to_string(&path_buf).map_err(|source| DwdError::Io {
                path: path_buf.clone(),
                source,
            })?;
            cfg.apply_file(&raw)?;
            cfg.config_file = Some(path_buf);
        } else if is_explicit {
            return Err(DwdError::MissingConfig { path: path_buf });
        }

        cfg.apply_env_overrides(|name| {
            env::var(name).ok().filter(|raw| !raw.trim().is_empty())
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse file contents on top of the current values.
    pub fn apply_file(&mut self, raw: &str) -> Result<()> {
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(DwdError::ConfigParse {
                    context: "file",
                    details: format!("line {}: expected key=value, got {line:?}", lineno + 1),
                });
            };
            self.apply_pair(key.trim(), value.trim())?;
        }
        Ok(())
    }

    /// Apply `DISK_WATCHDOG_<KEY>` environment overrides.
    ///
    /// Takes a lookup closure so tests can inject variables without touching
    /// the process environment.
    pub fn apply_env_overrides<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        for key in KNOWN_KEYS {
            let env_name = format!("DISK_WATCHDOG_{}", key.to_ascii_uppercase());
            if let Some(raw) = lookup(&env_name) {
                self.apply_pair(key, &raw)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn apply_pair(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "mount_point" => self.mount_point = PathBuf::from(value),
            "user" => {
                self.user = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "notice_gb" => self.thresholds.notice = GbSetting::parse(key, value)?,
            "warn_gb" => self.thresholds.warn = GbSetting::parse(key, value)?,
            "harsh_gb" => self.thresholds.harsh = GbSetting::parse(key, value)?,
            "pause_gb" => self.thresholds.pause = GbSetting::parse(key, value)?,
            "stop_gb" => self.thresholds.stop = GbSetting::parse(key, value)?,
            "kill_gb" => self.thresholds.kill = GbSetting::parse(key, value)?,
            "auto_resume" => self.auto_resume = parse_bool(key, value)?,
            "resume_threshold" => self.resume_threshold = GbSetting::parse(key, value)?,
            "resume_cooldown" => self.resume_cooldown_secs = parse_u64(key, value)?,
            "resume_max_strikes" => {
                self.resume_max_strikes =
                    u32::try_from(parse_u64(key, value)?).map_err(|_| DwdError::InvalidConfig {
                        details: format!("{key} out of range: {value}"),
                    })?;
            }
            "rate_warn_gb_per_min" => self.rate_warn_gb_per_min = parse_u64(key, value)?,
            "rate_escalate_minutes" => self.rate_escalate_minutes = parse_u64(key, value)?,
            "smart_mode" => self.smart_mode = parse_bool(key, value)?,
            "tracer_cmd" => self.tracer_cmd = value.to_string(),
            "tracer_min_bytes" => self.tracer_min_bytes = parse_u64(key, value)?,
            "heavy_writer_min_bytes" => self.heavy_writer_min_bytes = parse_u64(key, value)?,
            "target_patterns" => self.target_patterns = parse_patterns(value),
            "protected_patterns" => self.protected_patterns = parse_patterns(value),
            "notify_desktop" => self.notify.desktop = parse_bool(key, value)?,
            "notify_broadcast" => self.notify.broadcast = parse_bool(key, value)?,
            "notify_email" => self.notify.email = parse_bool(key, value)?,
            "email_to" => self.notify.email_to = value.to_string(),
            "notify_webhook" => self.notify.webhook = parse_bool(key, value)?,
            "webhook_url" => self.notify.webhook_url = value.to_string(),
            "notify_cooldown" => self.notify.cooldown_secs = parse_u64(key, value)?,
            "dry_run" => self.dry_run = parse_bool(key, value)?,
            "max_log_size" => self.max_log_size = parse_u64(key, value)?,
            "state_dir" => self.state_dir = PathBuf::from(value),
            "pid_file" => self.pid_file = PathBuf::from(value),
            other => {
                console::warning(&format!("ignoring unknown config key {other:?}"));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.mount_point.as_os_str().is_empty() {
            return Err(DwdError::InvalidConfig {
                details: "mount_point must not be empty".to_string(),
            });
        }
        if self.resume_cooldown_secs == 0 {
            return Err(DwdError::InvalidConfig {
                details: "resume_cooldown must be a positive integer".to_string(),
            });
        }
        if self.resume_max_strikes == 0 {
            return Err(DwdError::InvalidConfig {
                details: "resume_max_strikes must be a positive integer".to_string(),
            });
        }
        if self.notify.cooldown_secs == 0 {
            return Err(DwdError::InvalidConfig {
                details: "notify_cooldown must be a positive integer".to_string(),
            });
        }
        if self.tracer_cmd.is_empty() {
            return Err(DwdError::InvalidConfig {
                details: "tracer_cmd must not be empty".to_string(),
            });
        }
        if self.notify.email && self.notify.email_to.is_empty() {
            return Err(DwdError::InvalidConfig {
                details: "notify_email=true requires email_to".to_string(),
            });
        }
        if self.notify.webhook && self.notify.webhook_url.is_empty() {
            return Err(DwdError::InvalidConfig {
                details: "notify_webhook=true requires webhook_url".to_string(),
            });
        }
        // Patterns must compile; the full anchored set is built later by the
        // detector, but an unparseable fragment should fail load, not runtime.
        for pattern in self.target_patterns.iter().chain(&self.protected_patterns) {
            regex::Regex::new(pattern)?;
        }
        Ok(())
    }
}

/// All keys recognized in the config file; env overrides mirror this list.
const KNOWN_KEYS: &[&str] = &[
    "mount_point",
    "user",
    "notice_gb",
    "warn_gb",
    "harsh_gb",
    "pause_gb",
    "stop_gb",
    "kill_gb",
    "auto_resume",
    "resume_threshold",
    "resume_cooldown",
    "resume_max_strikes",
    "rate_warn_gb_per_min",
    "rate_escalate_minutes",
    "smart_mode",
    "tracer_cmd",
    "tracer_min_bytes",
    "heavy_writer_min_bytes",
    "target_patterns",
    "protected_patterns",
    "notify_desktop",
    "notify_broadcast",
    "notify_email",
    "email_to",
    "notify_webhook",
    "webhook_url",
    "notify_cooldown",
    "dry_run",
    "max_log_size",
    "state_dir",
    "pid_file",
];

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(DwdError::ConfigParse {
            context: "bool",
            details: format!("{key}={raw:?}"),
        }),
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| DwdError::ConfigParse {
        context: "int",
        details: format!("{key}={raw:?}: {error}"),
    })
}

fn parse_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(unix)]
fn warn_if_world_writable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        if meta.permissions().mode() & 0o002 != 0 {
            console::warning(&format!(
                "config file {} is world-writable; fix with chmod o-w",
                path.display()
            ));
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_writable(_path: &Path) {}
