#![forbid(unsafe_code)]

//! Disk Watchdog (dwd) — adaptive disk-space watchdog for a single host.
//!
//! Watches free space on one configured mount and applies a graduated
//! response to the processes actively writing to its backing device:
//! 1. **Pause** — SIGSTOP the heaviest writers, with automatic resumption
//!    once space recovers past the hysteresis threshold
//! 2. **Terminate** — SIGTERM when space keeps shrinking
//! 3. **Force-kill** — SIGKILL as the last line before a full disk
//!
//! Polling frequency and response severity both adapt to current free
//! space and the observed fill rate.

pub mod core;
pub mod daemon;
pub mod detect;
pub mod logger;
pub mod monitor;
pub mod platform;
pub mod prelude;
pub mod state;
