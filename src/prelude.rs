//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use disk_watchdog::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, GbSetting, ThresholdSpec};
pub use crate::core::errors::{DwdError, Result};
pub use crate::core::thresholds::ResolvedThresholds;

// Monitor
pub use crate::monitor::level::{Classification, Level, base_level, classify};
pub use crate::monitor::rate::FillRateEstimator;
pub use crate::monitor::sampler::{SpaceSample, SpaceSampler};

// Detection
pub use crate::detect::tracer::{BlockIoTracer, TracerConfig};
pub use crate::detect::writers::{WriterCandidate, WriterDetector, WritersTable};

// Daemon
pub use crate::daemon::actions::{ActionExecutor, PausedRecord};
pub use crate::daemon::loop_main::WatchdogDaemon;
pub use crate::daemon::resume::ResumeManager;

// State
pub use crate::state::pidfile::PidFile;
pub use crate::state::store::StateStore;
