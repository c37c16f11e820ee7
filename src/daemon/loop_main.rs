//! The control loop: a single cooperative loop ordering sample → rate →
//! classify → resume-check → gated action → notify → persist → adaptive
//! sleep.
//!
//! There are no worker threads. Suspension points are the inter-iteration
//! sleep, the tracer child's bounded window, and short state-file I/O.
//! Actions taken in iteration `i` become observable to the classifier in
//! iteration `i+1`.

#![allow(missing_docs)]

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::thresholds::ResolvedThresholds;
use crate::daemon::actions::{ActionExecutor, KernelSignals, PausedRecord};
use crate::daemon::notifications::NotificationDispatcher;
use crate::daemon::resume::ResumeManager;
use crate::daemon::signals::{SignalHandler, WatchdogHeartbeat};
use crate::detect::tracer::{BlockIoTracer, TracerConfig};
use crate::detect::writers::{WriterDetector, WritersTable};
use crate::logger::activity::{ActivityEvent, ActivityLog};
use crate::logger::console;
use crate::monitor::level::{Level, classify};
use crate::monitor::rate::FillRateEstimator;
use crate::monitor::sampler::{SpaceSample, SpaceSampler};
use crate::platform::proc;
use crate::state::pidfile::PidFile;
use crate::state::store::StateStore;

/// Back-off after a sampling failure.
const SAMPLER_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Minimum interval between writers-table prunes.
const TABLE_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// What a level transition requires of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Force-kill top writers.
    ActKill,
    /// Terminate top writers.
    ActStop,
    /// Pause top writers and record them.
    ActPause,
    /// Rate-limited critical warning with a top-writer snippet.
    WarnHarsh,
    /// Desktop notice.
    WarnDesktop,
    /// Log only.
    LogNotice,
    /// Recovery notice; clear per-level notification cooldowns.
    Recovery,
}

/// The transition gating table. Actions fire only when entering a stricter
/// level from a looser one; recovery transitions between non-`ok` levels do
/// nothing.
#[must_use]
pub fn transition_action(prev: Level, next: Level) -> Option<TransitionAction> {
    match next {
        Level::Kill if prev != Level::Kill => Some(TransitionAction::ActKill),
        Level::Stop if prev < Level::Stop => Some(TransitionAction::ActStop),
        Level::Pause if prev < Level::Pause => Some(TransitionAction::ActPause),
        Level::Harsh if prev < Level::Harsh => Some(TransitionAction::WarnHarsh),
        Level::Warn if prev < Level::Warn => Some(TransitionAction::WarnDesktop),
        Level::Notice if prev < Level::Notice => Some(TransitionAction::LogNotice),
        Level::Ok if prev != Level::Ok => Some(TransitionAction::Recovery),
        _ => None,
    }
}

/// The long-running watchdog daemon.
pub struct WatchdogDaemon {
    config: Config,
    thresholds: ResolvedThresholds,
    sampler: SpaceSampler,
    rate: FillRateEstimator,
    detector: WriterDetector,
    executor: ActionExecutor,
    resume: ResumeManager,
    dispatcher: NotificationDispatcher,
    store: StateStore,
    activity: ActivityLog,
    signals: SignalHandler,
    watchdog: WatchdogHeartbeat,
    pidfile: Option<PidFile>,
    last_level: Level,
    last_prune: Instant,
    start: Instant,
    disk_gb: u64,
}

impl WatchdogDaemon {
    /// Build and initialize the daemon. Every failure here is startup-fatal:
    /// missing mount, unusable state directory, tracer not installed, or the
    /// PID lock held by another instance.
    pub fn init(config: Config) -> Result<Self> {
        let store = StateStore::open(&config.state_dir)?;
        let pidfile = PidFile::acquire(&config.pid_file)?;

        let sampler = SpaceSampler::new(&config.mount_point);
        let initial = sampler.sample()?;

        let tracer = BlockIoTracer::new(TracerConfig::new(
            &config.tracer_cmd,
            config.tracer_min_bytes,
        ));
        tracer.require_available()?;

        let thresholds = ResolvedThresholds::resolve(
            &config.thresholds,
            config.resume_threshold,
            initial.total_gb(),
        )?;

        let user_uid = config
            .user
            .as_deref()
            .map(proc::uid_for_user)
            .transpose()?;
        let detector = WriterDetector::new(
            tracer,
            &config.protected_patterns,
            &config.target_patterns,
            user_uid,
            config.heavy_writer_min_bytes,
        )?;

        let executor = ActionExecutor::new(config.dry_run);
        let resume = ResumeManager::new(config.resume_cooldown_secs, config.resume_max_strikes);
        let dispatcher = NotificationDispatcher::from_config(&config.notify);
        let activity = ActivityLog::new(
            config.state_dir.join("activity.jsonl"),
            config.max_log_size,
        );
        let rate = FillRateEstimator::new(config.rate_warn_gb_per_min);
        let last_level = store.read_level().unwrap_or(Level::Ok);
        let disk_gb = initial.total_gb();

        Ok(Self {
            config,
            thresholds,
            sampler,
            rate,
            detector,
            executor,
            resume,
            dispatcher,
            store,
            activity,
            signals: SignalHandler::new(),
            watchdog: WatchdogHeartbeat::from_env(),
            pidfile: Some(pidfile),
            last_level,
            last_prune: Instant::now(),
            start: Instant::now(),
            disk_gb,
        })
    }

    /// Run until a termination request arrives.
    pub fn run(&mut self) -> Result<()> {
        console::info(&format!(
            "watchdog started on {} ({} GB disk): thresholds notice={} warn={} harsh={} pause={} stop={} kill={} resume={}",
            self.config.mount_point.display(),
            self.disk_gb,
            self.thresholds.notice,
            self.thresholds.warn,
            self.thresholds.harsh,
            self.thresholds.pause,
            self.thresholds.stop,
            self.thresholds.kill,
            self.thresholds.resume,
        ));
        self.activity.append(&ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mount: self.config.mount_point.display().to_string(),
            disk_gb: self.disk_gb,
        });

        loop {
            if self.signals.should_shutdown() {
                console::info("termination requested");
                break;
            }
            if self.signals.should_reload() {
                self.handle_reload();
            }

            let sample = match self.sampler.sample() {
                Ok(sample) => sample,
                Err(e) => {
                    console::error(&format!("sampling failed: {e}"));
                    self.activity.append(&ActivityEvent::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                    self.sleep_interruptible(SAMPLER_RETRY_DELAY);
                    continue;
                }
            };
            self.iterate(&sample);
        }

        self.shutdown();
        Ok(())
    }

    /// One loop iteration after a successful sample.
    fn iterate(&mut self, sample: &SpaceSample) {
        let now = Instant::now();
        let now_epoch = wall_epoch();

        // Rate.
        let rate = if self.config.smart_mode {
            self.rate.observe(sample.free_bytes, now)
        } else {
            0
        };
        if rate > 0 {
            console::rate(&format!(
                "filling at {rate} GB/min ({} GB free)",
                sample.free_gb()
            ));
        }

        // Classify.
        let escalate_window = if self.config.smart_mode {
            self.config.rate_escalate_minutes
        } else {
            0
        };
        let classification = classify(sample.free_gb(), rate, &self.thresholds, escalate_window);
        if classification.escalated {
            console::escalate(&format!(
                "level raised to {} ({} min to next threshold at {rate} GB/min)",
                classification.level,
                classification.minutes_to_next.unwrap_or(0),
            ));
        }
        let level = classification.level;

        // Resume check.
        let mut paused = self.store.read_paused();
        ResumeManager::cleanup_stale(&mut paused, now_epoch);
        if self.config.auto_resume
            && sample.free_gb() >= self.thresholds.resume
            && !paused.is_empty()
        {
            let report = self.resume.auto_resume(&mut paused, now_epoch, &KernelSignals);
            if !report.resumed.is_empty() {
                self.dispatcher.dispatch(
                    Level::Ok,
                    "dwd: processes resumed",
                    &format!(
                        "{} paused process(es) resumed at {} GB free",
                        report.resumed.len(),
                        sample.free_gb()
                    ),
                );
                self.activity.append(&ActivityEvent::WritersResumed {
                    count: report.resumed.len(),
                    free_gb: sample.free_gb(),
                });
            }
        }

        // Writers table upkeep.
        let mut table = WritersTable::new(self.store.read_writers());
        if self.last_prune.elapsed() >= TABLE_PRUNE_INTERVAL {
            table.prune(now_epoch);
            self.last_prune = now;
        }

        // Gated transition handling. A failed action attempt leaves
        // `last_level` untouched so the transition re-fires next iteration.
        let mut transition_consumed = true;
        if level != self.last_level {
            self.activity.append(&ActivityEvent::LevelChanged {
                from: self.last_level.name().to_string(),
                to: level.name().to_string(),
                free_gb: sample.free_gb(),
                rate_gb_per_min: rate,
            });
            transition_consumed =
                self.apply_transition(level, sample, rate, &mut table, &mut paused, now_epoch);
        }
        if transition_consumed {
            self.last_level = level;
        }

        // Persist.
        self.persist(level, sample, table.entries(), &paused, now_epoch);

        // Heartbeat.
        self.watchdog.maybe_notify(&format!(
            "level={} free={}GB rate={}GB/min",
            level,
            sample.free_gb(),
            rate
        ));

        self.sleep_interruptible(level.sleep_interval());
    }

    /// Execute the consequence of a level transition. Returns whether the
    /// transition was consumed (an action that could not obtain candidates
    /// is retried next iteration).
    fn apply_transition(
        &mut self,
        level: Level,
        sample: &SpaceSample,
        rate: u64,
        table: &mut WritersTable,
        paused: &mut Vec<PausedRecord>,
        now_epoch: u64,
    ) -> bool {
        let Some(action) = transition_action(self.last_level, level) else {
            return true;
        };

        match action {
            TransitionAction::ActKill | TransitionAction::ActStop | TransitionAction::ActPause => {
                let candidates = match self.detector.detect(&sample.device, table, now_epoch) {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        console::error(&format!("writer detection failed: {e}"));
                        self.activity.append(&ActivityEvent::Error {
                            code: e.code().to_string(),
                            message: e.to_string(),
                        });
                        return false;
                    }
                };

                console::emergency(&format!(
                    "entering {level} at {} GB free (rate {rate} GB/min)",
                    sample.free_gb()
                ));
                let report =
                    self.executor
                        .execute(level, &candidates, paused, now_epoch, &KernelSignals);
                self.activity.append(&ActivityEvent::ActionTaken {
                    level: level.name().to_string(),
                    signalled: report
                        .signalled
                        .iter()
                        .map(|(pid, comm)| format!("{pid}:{comm}"))
                        .collect(),
                    dry_run: self.config.dry_run,
                });

                let verb = match level {
                    Level::Pause => "paused",
                    Level::Stop => "terminated",
                    _ => "killed",
                };
                let body = if report.signalled.is_empty() {
                    format!("no eligible writers found at {} GB free", sample.free_gb())
                } else {
                    let names: Vec<String> = report
                        .signalled
                        .iter()
                        .map(|(pid, comm)| format!("{comm}({pid})"))
                        .collect();
                    format!(
                        "{verb} {} at {} GB free",
                        names.join(", "),
                        sample.free_gb()
                    )
                };
                self.dispatcher.notify(
                    level,
                    &format!("dwd: {level} level reached"),
                    &body,
                    &self.store,
                    now_epoch,
                );
            }
            TransitionAction::WarnHarsh => {
                let snippet = table.ranked().first().map_or_else(
                    || "no tracked writers".to_string(),
                    |top| format!("top writer: {}({})", top.comm, top.pid),
                );
                console::critical(&format!(
                    "harsh: {} GB free, {snippet}",
                    sample.free_gb()
                ));
                self.dispatcher.notify(
                    Level::Harsh,
                    "dwd: disk space critically low",
                    &format!("{} GB free on {}; {snippet}", sample.free_gb(), sample.device),
                    &self.store,
                    now_epoch,
                );
            }
            TransitionAction::WarnDesktop => {
                console::warning(&format!("warn: {} GB free", sample.free_gb()));
                self.dispatcher.notify(
                    Level::Warn,
                    "dwd: disk space low",
                    &format!("{} GB free on {}", sample.free_gb(), sample.device),
                    &self.store,
                    now_epoch,
                );
            }
            TransitionAction::LogNotice => {
                console::notice(&format!("notice: {} GB free", sample.free_gb()));
            }
            TransitionAction::Recovery => {
                console::info(&format!(
                    "recovered to ok at {} GB free",
                    sample.free_gb()
                ));
                self.store.clear_notify_stamps();
                self.dispatcher.dispatch(
                    Level::Ok,
                    "dwd: disk space recovered",
                    &format!("{} GB free on {}", sample.free_gb(), sample.device),
                );
            }
        }
        true
    }

    fn persist(
        &self,
        level: Level,
        sample: &SpaceSample,
        writers: &[crate::detect::writers::WriterCandidate],
        paused: &[PausedRecord],
        now_epoch: u64,
    ) {
        for result in [
            self.store.write_level(level),
            self.store.write_rate_sample(sample.free_bytes, now_epoch),
            self.store.write_writers(writers),
            self.store.write_paused(paused),
        ] {
            if let Err(e) = result {
                console::error(&format!("state persistence failed: {e}"));
            }
        }
    }

    /// Reload configuration, retaining the previous config and thresholds
    /// when the new file does not validate.
    fn handle_reload(&mut self) {
        console::info("config reload requested");
        let path = self.config.config_file.clone();
        let loaded = Config::load(path.as_deref()).and_then(|new_config| {
            let thresholds = ResolvedThresholds::resolve(
                &new_config.thresholds,
                new_config.resume_threshold,
                self.disk_gb,
            )?;
            let user_uid = new_config
                .user
                .as_deref()
                .map(proc::uid_for_user)
                .transpose()?;
            let tracer = BlockIoTracer::new(TracerConfig::new(
                &new_config.tracer_cmd,
                new_config.tracer_min_bytes,
            ));
            tracer.require_available()?;
            let detector = WriterDetector::new(
                tracer,
                &new_config.protected_patterns,
                &new_config.target_patterns,
                user_uid,
                new_config.heavy_writer_min_bytes,
            )?;
            Ok((new_config, thresholds, detector))
        });

        match loaded {
            Ok((new_config, thresholds, detector)) => {
                self.thresholds = thresholds;
                self.detector = detector;
                self.executor = ActionExecutor::new(new_config.dry_run);
                self.resume = ResumeManager::new(
                    new_config.resume_cooldown_secs,
                    new_config.resume_max_strikes,
                );
                self.dispatcher = NotificationDispatcher::from_config(&new_config.notify);
                self.rate.set_warn_floor(new_config.rate_warn_gb_per_min);
                self.sampler = SpaceSampler::new(&new_config.mount_point);
                self.config = new_config;
                console::info("config reloaded");
                self.activity.append(&ActivityEvent::ConfigReloaded { ok: true });
            }
            Err(e) => {
                console::error(&format!(
                    "config reload failed, keeping previous thresholds: {e}"
                ));
                self.activity.append(&ActivityEvent::ConfigReloaded { ok: false });
            }
        }
    }

    /// Sleep in short slices so a termination request takes effect at the
    /// next boundary instead of after a full ok-level interval.
    fn sleep_interruptible(&self, total: Duration) {
        let mut remaining = total;
        let slice = Duration::from_secs(1);
        while !remaining.is_zero() {
            if self.signals.should_shutdown() {
                return;
            }
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }

    fn shutdown(&mut self) {
        let uptime_secs = self.start.elapsed().as_secs();
        if let Some(pidfile) = self.pidfile.take() {
            pidfile.release();
        }
        self.activity.append(&ActivityEvent::DaemonStopped {
            reason: "clean shutdown".to_string(),
            uptime_secs,
        });
        console::info(&format!("shutdown complete (uptime {uptime_secs}s)"));
    }
}

fn wall_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
