//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! and the supervisor watchdog heartbeat.
//!
//! Uses the `signal-hook` crate for safe signal registration. The control
//! loop polls `SignalHandler` flags each iteration rather than blocking on
//! signals, so a termination request takes effect at the next sleep boundary.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Thread-safe signal state shared between the OS handler and the loop.
///
/// Flags use `Ordering::Relaxed`: the loop polls them every iteration and
/// no ordering with other atomics is required.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a new handler and register OS signal hooks.
    ///
    /// SIGTERM/SIGINT -> shutdown, SIGHUP -> reload. Registration is
    /// best-effort; failures are logged to stderr but not fatal.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// Handler without OS hooks, for tests and subcommands.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check whether a shutdown has been requested.
    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether a config reload has been requested.
    #[must_use]
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Programmatically request shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    /// Programmatically request a config reload.
    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[WARNING] failed to register SIGTERM handler: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[WARNING] failed to register SIGINT handler: {e}");
        }
        #[cfg(unix)]
        {
            use signal_hook::consts::SIGHUP;
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[WARNING] failed to register SIGHUP handler: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── watchdog heartbeat ────────────────────

/// Supervisor liveness heartbeat.
///
/// When the supervisor communicates a watchdog timeout via `WATCHDOG_USEC`,
/// the loop calls `maybe_notify()` once per iteration; a beat is sent at
/// half the timeout so one missed iteration does not trigger a restart.
pub struct WatchdogHeartbeat {
    interval: Duration,
    last_beat: Option<Instant>,
    enabled: bool,
}

impl WatchdogHeartbeat {
    /// Build from the supervisor environment (`WATCHDOG_USEC`).
    #[must_use]
    pub fn from_env() -> Self {
        let usec = std::env::var("WATCHDOG_USEC")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);
        if usec == 0 {
            return Self::disabled();
        }
        Self {
            interval: Duration::from_micros(usec / 2),
            last_beat: None,
            enabled: true,
        }
    }

    /// Heartbeat disabled (no supervisor watchdog).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::from_secs(30),
            last_beat: None,
            enabled: false,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send a beat when the half-interval has elapsed. Returns whether a
    /// notification was sent.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(last) = self.last_beat {
            if last.elapsed() < self.interval {
                return false;
            }
        }
        self.last_beat = Some(Instant::now());
        sd_notify_watchdog(status);
        true
    }
}

/// Send `WATCHDOG=1` + `STATUS=<msg>` to the supervisor notify socket.
/// No-op when `NOTIFY_SOCKET` is unset.
fn sd_notify_watchdog(status: &str) {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::net::UnixDatagram;

        let socket_path = match std::env::var("NOTIFY_SOCKET") {
            Ok(p) if !p.is_empty() => p,
            _ => return,
        };
        let msg = format!("WATCHDOG=1\nSTATUS={status}\n");
        let Ok(sock) = UnixDatagram::unbound() else {
            return;
        };
        let _ = sock.send_to(msg.as_bytes(), &socket_path);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = status;
    }
}
