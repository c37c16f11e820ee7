//! Multi-channel notification fan-out: desktop, broadcast, email, webhook.
//!
//! Every channel is fire-and-forget and independently best-effort; a dead
//! webhook must never stall the control loop. All external programs are
//! spawned as argv lists; process names and free-space figures are data,
//! never shell text. Webhook payloads are built with `serde_json`, so any
//! bytes a process manages to put in its comm arrive escaped.

#![allow(missing_docs)]

use std::io::Write;
use std::process::{Command, Stdio};

use crate::core::config::NotifyConfig;
use crate::logger::console;
use crate::monitor::level::Level;
use crate::state::store::StateStore;

/// One rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub level: Level,
    pub title: String,
    pub body: String,
}

/// A notification channel that can dispatch rendered content.
trait Channel: Send {
    fn name(&self) -> &'static str;
    fn send(&self, content: &NotificationContent);
}

// ──── Desktop (notify-send) ────

struct DesktopChannel;

impl Channel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn send(&self, content: &NotificationContent) {
        let urgency = match content.level {
            Level::Ok | Level::Notice => "low",
            Level::Warn => "normal",
            _ => "critical",
        };
        let _ = Command::new("notify-send")
            .arg("--urgency")
            .arg(urgency)
            .arg("--app-name=dwd")
            .arg(&content.title)
            .arg(&content.body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

// ──── Broadcast (wall, all logged-in sessions) ────

struct BroadcastChannel;

impl Channel for BroadcastChannel {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn send(&self, content: &NotificationContent) {
        let message = format!("{}: {}", content.title, content.body);
        let _ = Command::new("wall")
            .arg(&message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

// ──── Email (mail(1), body on stdin) ────

struct EmailChannel {
    to: String,
}

impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn send(&self, content: &NotificationContent) {
        let child = Command::new("mail")
            .arg("-s")
            .arg(&content.title)
            .arg(&self.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Ok(mut child) = child {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(content.body.as_bytes());
                let _ = stdin.write_all(b"\n");
            }
            // Don't block the loop on the MTA; the child is left to finish.
        }
    }
}

// ──── Webhook (curl, JSON POST) ────

struct WebhookChannel {
    url: String,
}

impl WebhookChannel {
    /// JSON payload via serde_json so process names cannot break out of the
    /// document.
    fn render_body(content: &NotificationContent) -> String {
        serde_json::json!({
            "source": "dwd",
            "level": content.level.name(),
            "title": content.title,
            "body": content.body,
        })
        .to_string()
    }
}

impl Channel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send(&self, content: &NotificationContent) {
        if self.url.is_empty() {
            return;
        }
        let body = Self::render_body(content);
        let _ = Command::new("curl")
            .arg("--silent")
            .arg("--max-time")
            .arg("5")
            .arg("--header")
            .arg("Content-Type: application/json")
            .arg("--data")
            .arg(&body)
            .arg(&self.url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

// ──────────────────── dispatcher ────────────────────

/// Fan-out coordinator with per-level cooldown.
///
/// `warn` and `harsh` alerts are gated by the cooldown; `pause`, `stop`, and
/// `kill` are always emitted. By the time the watchdog is signalling
/// processes, a duplicate alert beats a missing one.
pub struct NotificationDispatcher {
    channels: Vec<Box<dyn Channel>>,
    cooldown_secs: u64,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        if config.desktop {
            channels.push(Box::new(DesktopChannel));
        }
        if config.broadcast {
            channels.push(Box::new(BroadcastChannel));
        }
        if config.email && !config.email_to.is_empty() {
            channels.push(Box::new(EmailChannel {
                to: config.email_to.clone(),
            }));
        }
        if config.webhook && !config.webhook_url.is_empty() {
            channels.push(Box::new(WebhookChannel {
                url: config.webhook_url.clone(),
            }));
        }
        Self {
            channels,
            cooldown_secs: config.cooldown_secs,
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Whether the cooldown applies to this level.
    #[must_use]
    pub const fn is_cooldown_gated(level: Level) -> bool {
        matches!(level, Level::Warn | Level::Harsh)
    }

    /// Cooldown-gated dispatch. Returns whether the notification was
    /// actually emitted; the stamp is only advanced on emission.
    pub fn notify(
        &self,
        level: Level,
        title: &str,
        body: &str,
        store: &StateStore,
        now_epoch: u64,
    ) -> bool {
        if Self::is_cooldown_gated(level) {
            if let Some(stamp) = store.read_notify_stamp(level) {
                if now_epoch.saturating_sub(stamp) < self.cooldown_secs {
                    return false;
                }
            }
        }
        self.dispatch(level, title, body);
        if let Err(e) = store.write_notify_stamp(level, now_epoch) {
            console::warning(&format!("could not persist notification stamp: {e}"));
        }
        true
    }

    /// Unconditional dispatch (recovery notices, `dwd test`).
    pub fn dispatch(&self, level: Level, title: &str, body: &str) {
        let content = NotificationContent {
            level,
            title: title.to_string(),
            body: body.to_string(),
        };
        for channel in &self.channels {
            channel.send(&content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(desktop: bool, webhook_url: &str) -> NotifyConfig {
        NotifyConfig {
            desktop,
            broadcast: false,
            email: false,
            email_to: String::new(),
            webhook: !webhook_url.is_empty(),
            webhook_url: webhook_url.to_string(),
            cooldown_secs: 300,
        }
    }

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(&dir.path().join("dwd")).unwrap();
        (dir, store)
    }

    #[test]
    fn channels_follow_config_switches() {
        let d = NotificationDispatcher::from_config(&config(true, ""));
        assert_eq!(d.channel_names(), vec!["desktop"]);

        let d = NotificationDispatcher::from_config(&config(false, "https://example.test/hook"));
        assert_eq!(d.channel_names(), vec!["webhook"]);

        let d = NotificationDispatcher::from_config(&config(false, ""));
        assert_eq!(d.channel_count(), 0);
    }

    #[test]
    fn email_without_recipient_is_not_built() {
        let cfg = NotifyConfig {
            email: true,
            email_to: String::new(),
            desktop: false,
            ..NotifyConfig::default()
        };
        let d = NotificationDispatcher::from_config(&cfg);
        assert_eq!(d.channel_count(), 0);
    }

    #[test]
    fn cooldown_gates_warn_and_harsh_only() {
        assert!(NotificationDispatcher::is_cooldown_gated(Level::Warn));
        assert!(NotificationDispatcher::is_cooldown_gated(Level::Harsh));
        assert!(!NotificationDispatcher::is_cooldown_gated(Level::Pause));
        assert!(!NotificationDispatcher::is_cooldown_gated(Level::Stop));
        assert!(!NotificationDispatcher::is_cooldown_gated(Level::Kill));
        assert!(!NotificationDispatcher::is_cooldown_gated(Level::Ok));
    }

    #[test]
    fn warn_is_suppressed_inside_cooldown() {
        let (_guard, store) = store();
        let d = NotificationDispatcher::from_config(&config(false, ""));

        assert!(d.notify(Level::Warn, "t", "b", &store, 1000));
        assert!(
            !d.notify(Level::Warn, "t", "b", &store, 1100),
            "second warn inside 300 s cooldown is suppressed"
        );
        assert!(
            d.notify(Level::Warn, "t", "b", &store, 1300),
            "warn after cooldown elapses is emitted"
        );
    }

    #[test]
    fn cooldown_is_tracked_per_level() {
        let (_guard, store) = store();
        let d = NotificationDispatcher::from_config(&config(false, ""));

        assert!(d.notify(Level::Warn, "t", "b", &store, 1000));
        assert!(
            d.notify(Level::Harsh, "t", "b", &store, 1010),
            "harsh has its own stamp"
        );
    }

    #[test]
    fn pause_is_always_emitted() {
        let (_guard, store) = store();
        let d = NotificationDispatcher::from_config(&config(false, ""));

        assert!(d.notify(Level::Pause, "t", "b", &store, 1000));
        assert!(d.notify(Level::Pause, "t", "b", &store, 1001));
    }

    #[test]
    fn webhook_body_escapes_hostile_process_names() {
        let content = NotificationContent {
            level: Level::Pause,
            title: "disk watchdog".to_string(),
            body: "paused \"evil\"; $(rm -rf /) \n backtick`".to_string(),
        };
        let body = WebhookChannel::render_body(&content);
        let parsed: serde_json::Value =
            serde_json::from_str(&body).expect("payload must stay valid JSON");
        assert_eq!(parsed["level"], "pause");
        assert!(parsed["body"].as_str().unwrap().contains("$(rm -rf /)"));
    }

    #[test]
    fn suppressed_notification_does_not_advance_stamp() {
        let (_guard, store) = store();
        let d = NotificationDispatcher::from_config(&config(false, ""));

        assert!(d.notify(Level::Warn, "t", "b", &store, 1000));
        assert!(!d.notify(Level::Warn, "t", "b", &store, 1299));
        // Had the suppressed attempt advanced the stamp, this would still be
        // inside the window.
        assert!(d.notify(Level::Warn, "t", "b", &store, 1301));
    }
}
