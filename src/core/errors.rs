//! DWD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DwdError>;

/// Top-level error type for the disk watchdog.
#[derive(Debug, Error)]
pub enum DwdError {
    #[error("[DWD-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DWD-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DWD-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DWD-2001] mount unavailable at {path}: {details}")]
    MountUnavailable { path: PathBuf, details: String },

    #[error("[DWD-2002] mount table parse failure: {details}")]
    MountParse { details: String },

    #[error("[DWD-2101] block-I/O tracer not available: {command}")]
    TracerUnavailable { command: String },

    #[error("[DWD-2102] tracer window failure: {details}")]
    TracerWindow { details: String },

    #[error("[DWD-2201] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DWD-3001] another instance holds the PID file lock at {path}")]
    AlreadyRunning { path: PathBuf },

    #[error("[DWD-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DWD-3101] signal delivery to pid {pid} failed: {details}")]
    SignalDelivery { pid: i32, details: String },

    #[error("[DWD-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DwdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DWD-1001",
            Self::MissingConfig { .. } => "DWD-1002",
            Self::ConfigParse { .. } => "DWD-1003",
            Self::MountUnavailable { .. } => "DWD-2001",
            Self::MountParse { .. } => "DWD-2002",
            Self::TracerUnavailable { .. } => "DWD-2101",
            Self::TracerWindow { .. } => "DWD-2102",
            Self::Serialization { .. } => "DWD-2201",
            Self::AlreadyRunning { .. } => "DWD-3001",
            Self::Io { .. } => "DWD-3002",
            Self::SignalDelivery { .. } => "DWD-3101",
            Self::Runtime { .. } => "DWD-3900",
        }
    }

    /// Whether the control loop may continue after this failure.
    ///
    /// Startup-fatal classes (config, lock, tracer availability) are not
    /// retryable; everything that can happen mid-iteration is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::MountUnavailable { .. }
                | Self::TracerWindow { .. }
                | Self::SignalDelivery { .. }
                | Self::Serialization { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for DwdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<regex::Error> for DwdError {
    fn from(value: regex::Error) -> Self {
        Self::InvalidConfig {
            details: format!("bad process pattern: {value}"),
        }
    }
}
