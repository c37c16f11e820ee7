//! Top-level CLI definition and dispatch.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::json;

use disk_watchdog::core::config::Config;
use disk_watchdog::core::errors::Result;
use disk_watchdog::core::thresholds::ResolvedThresholds;
use disk_watchdog::daemon::actions::KernelSignals;
use disk_watchdog::daemon::loop_main::WatchdogDaemon;
use disk_watchdog::daemon::notifications::NotificationDispatcher;
use disk_watchdog::daemon::resume::ResumeManager;
use disk_watchdog::daemon::service::SystemdServiceManager;
use disk_watchdog::detect::tracer::{BlockIoTracer, TracerConfig};
use disk_watchdog::detect::writers::{WriterDetector, WritersTable};
use disk_watchdog::logger::console;
use disk_watchdog::monitor::level::{Level, classify};
use disk_watchdog::monitor::sampler::{BYTES_PER_GB, SpaceSampler};
use disk_watchdog::platform::proc;
use disk_watchdog::state::pidfile;
use disk_watchdog::state::store::StateStore;

/// dwd — adaptive disk-space watchdog.
#[derive(Debug, Parser)]
#[command(
    name = "dwd",
    author,
    version,
    about = "Adaptive disk-space watchdog: pauses, terminates, and resumes heavy writers",
    long_about = None
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the monitored mount point.
    #[arg(long, global = true, value_name = "PATH")]
    mount: Option<PathBuf>,
    /// Only act on processes owned by this user.
    #[arg(long, global = true, value_name = "NAME")]
    user: Option<String>,
    /// Log intended actions without signalling anything.
    #[arg(long, global = true)]
    dry_run: bool,
    /// Machine-readable JSON output for read-only subcommands.
    #[arg(long, global = true)]
    json: bool,
    /// Subcommand to execute (defaults to `run`).
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Start the control loop (default).
    Run,
    /// Signal the running daemon to stop; remove the PID file if stale.
    Stop,
    /// Show mount, thresholds, level, paused processes, and top writers.
    Status,
    /// Compute the level once; exit 0 for ok/notice/warn, 1 otherwise.
    Check,
    /// Print top writers with formatted byte counts.
    Writers,
    /// Manually resume all tracked paused processes still stopped.
    Resume,
    /// Drive notification fan-out for a chosen level without acting.
    Test(TestArgs),
    /// Stop/disable the service unit and remove the binary; keep config,
    /// logs, and state.
    Uninstall(UninstallArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct TestArgs {
    /// Level to exercise (all levels when omitted).
    #[arg(value_name = "LEVEL")]
    level: Option<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct UninstallArgs {
    /// Operate on the user-scope service unit.
    #[arg(long)]
    user_scope: bool,
}

/// Dispatch the parsed CLI. Returns the process exit code.
pub fn run(cli: &Cli) -> Result<i32> {
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(mount) = &cli.mount {
        config.mount_point.clone_from(mount);
    }
    if let Some(user) = &cli.user {
        config.user = if user.is_empty() {
            None
        } else {
            Some(user.clone())
        };
    }
    if cli.dry_run {
        config.dry_run = true;
    }

    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => cmd_run(config),
        Command::Stop => cmd_stop(&config),
        Command::Status => cmd_status(&config, cli.json),
        Command::Check => cmd_check(&config, cli.json),
        Command::Writers => cmd_writers(&config, cli.json),
        Command::Resume => cmd_resume(&config),
        Command::Test(args) => cmd_test(&config, &args),
        Command::Uninstall(args) => cmd_uninstall(&args),
    }
}

// ──────────────────── run / stop ────────────────────

fn cmd_run(config: Config) -> Result<i32> {
    let mut daemon = WatchdogDaemon::init(config)?;
    daemon.run()?;
    Ok(0)
}

fn cmd_stop(config: &Config) -> Result<i32> {
    match pidfile::read_pid(&config.pid_file) {
        Some(pid) if proc::pid_alive(pid) => {
            nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGTERM,
            )
            .map_err(|e| disk_watchdog::core::errors::DwdError::SignalDelivery {
                pid,
                details: e.to_string(),
            })?;
            console::info(&format!("sent SIGTERM to daemon (pid {pid})"));
            Ok(0)
        }
        _ => {
            if pidfile::remove_if_stale(&config.pid_file) {
                console::info("removed stale PID file");
            } else {
                console::info("no running daemon");
            }
            Ok(0)
        }
    }
}

// ──────────────────── status / check ────────────────────

/// Fill rate from the persisted sample, for one-shot subcommands that have
/// no in-memory history. Wall-clock based and therefore approximate.
fn saved_rate(store: &StateStore, free_bytes_now: u64, warn_floor: u64) -> u64 {
    let Some((prev_free, prev_at)) = store.read_rate_sample() else {
        return 0;
    };
    let now = wall_epoch();
    if now <= prev_at || free_bytes_now >= prev_free {
        return 0;
    }
    #[allow(clippy::cast_precision_loss)]
    let gb_per_min = ((prev_free - free_bytes_now) as f64 / (now - prev_at) as f64) * 60.0
        / BYTES_PER_GB as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let truncated = gb_per_min as u64;
    if truncated < warn_floor { 0 } else { truncated }
}

fn resolve_for(config: &Config, disk_gb: u64) -> Result<ResolvedThresholds> {
    ResolvedThresholds::resolve(&config.thresholds, config.resume_threshold, disk_gb)
}

fn cmd_status(config: &Config, json: bool) -> Result<i32> {
    let sample = SpaceSampler::new(&config.mount_point).sample()?;
    let thresholds = resolve_for(config, sample.total_gb())?;
    let store = StateStore::open(&config.state_dir)?;

    let rate = saved_rate(&store, sample.free_bytes, config.rate_warn_gb_per_min);
    let escalate = if config.smart_mode {
        config.rate_escalate_minutes
    } else {
        0
    };
    let current = classify(sample.free_gb(), rate, &thresholds, escalate).level;
    let saved = store.read_level();
    let paused = store.read_paused();
    let table = WritersTable::new(store.read_writers());
    let daemon_running = pidfile::read_pid(&config.pid_file)
        .map(proc::pid_alive)
        .unwrap_or(false);

    if json {
        let doc = json!({
            "mount": config.mount_point,
            "device": sample.device,
            "disk_gb": sample.total_gb(),
            "free_gb": sample.free_gb(),
            "free_pct": sample.free_pct(),
            "level": current.name(),
            "saved_level": saved.map(Level::name),
            "rate_gb_per_min": rate,
            "next_interval_secs": current.sleep_interval().as_secs(),
            "daemon_running": daemon_running,
            "thresholds": {
                "notice": thresholds.notice,
                "warn": thresholds.warn,
                "harsh": thresholds.harsh,
                "pause": thresholds.pause,
                "stop": thresholds.stop,
                "kill": thresholds.kill,
                "resume": thresholds.resume,
            },
            "paused": paused.iter().map(|r| json!({
                "pid": r.pid,
                "comm": r.comm,
                "paused_at": r.paused_at,
                "strikes": r.strikes,
            })).collect::<Vec<_>>(),
            "writers": table.ranked().iter().take(5).map(|w| json!({
                "pid": w.pid,
                "comm": w.comm,
                "bytes": w.bytes,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(0);
    }

    println!("{}", "disk watchdog status".bold());
    println!(
        "  mount:      {} ({} on {})",
        config.mount_point.display(),
        sample.device,
        format_bytes(sample.total_bytes)
    );
    println!(
        "  free:       {} GB ({:.1}%)",
        sample.free_gb(),
        sample.free_pct()
    );
    println!("  level:      {}", colored_level(current));
    println!(
        "  saved:      {}",
        saved.map_or("none", Level::name)
    );
    if rate > 0 {
        println!("  rate:       {rate} GB/min");
    }
    println!(
        "  interval:   {}s",
        current.sleep_interval().as_secs()
    );
    println!(
        "  daemon:     {}",
        if daemon_running { "running" } else { "not running" }
    );
    println!(
        "  thresholds: notice={} warn={} harsh={} pause={} stop={} kill={} resume={}",
        thresholds.notice,
        thresholds.warn,
        thresholds.harsh,
        thresholds.pause,
        thresholds.stop,
        thresholds.kill,
        thresholds.resume,
    );
    if paused.is_empty() {
        println!("  paused:     none");
    } else {
        println!("  paused:");
        for record in &paused {
            println!(
                "    {} ({}) strikes={} paused_at={}",
                record.pid, record.comm, record.strikes, record.paused_at
            );
        }
    }
    let top = table.ranked();
    if top.is_empty() {
        println!("  writers:    none tracked");
    } else {
        println!("  writers:");
        for writer in top.iter().take(5) {
            println!(
                "    {:>8}  {} ({})",
                format_bytes(writer.bytes),
                writer.comm,
                writer.pid
            );
        }
    }
    Ok(0)
}

fn cmd_check(config: &Config, json: bool) -> Result<i32> {
    let sample = SpaceSampler::new(&config.mount_point).sample()?;
    let thresholds = resolve_for(config, sample.total_gb())?;
    let store = StateStore::open(&config.state_dir)?;
    let rate = saved_rate(&store, sample.free_bytes, config.rate_warn_gb_per_min);
    let escalate = if config.smart_mode {
        config.rate_escalate_minutes
    } else {
        0
    };
    let level = classify(sample.free_gb(), rate, &thresholds, escalate).level;

    if json {
        println!(
            "{}",
            json!({
                "level": level.name(),
                "free_gb": sample.free_gb(),
                "healthy": level.is_healthy(),
            })
        );
    } else {
        println!("{} ({} GB free)", colored_level(level), sample.free_gb());
    }
    Ok(i32::from(!level.is_healthy()))
}

// ──────────────────── writers ────────────────────

fn cmd_writers(config: &Config, json: bool) -> Result<i32> {
    let sample = SpaceSampler::new(&config.mount_point).sample()?;
    let store = StateStore::open(&config.state_dir)?;
    let user_uid = config
        .user
        .as_deref()
        .map(proc::uid_for_user)
        .transpose()?;
    let tracer = BlockIoTracer::new(TracerConfig::new(
        &config.tracer_cmd,
        config.tracer_min_bytes,
    ));
    let tracer_available = tracer.available();
    let detector = WriterDetector::new(
        tracer,
        &config.protected_patterns,
        &config.target_patterns,
        user_uid,
        config.heavy_writer_min_bytes,
    )?;

    // Read-only: the in-memory table absorbs the fresh window, but nothing
    // is written back. The table files belong to the daemon.
    let mut table = WritersTable::new(store.read_writers());

    if tracer_available {
        let ranked = detector.detect(&sample.device, &mut table, wall_epoch())?;
        if json {
            let doc = ranked
                .iter()
                .map(|w| json!({"pid": w.pid, "comm": w.comm, "bytes": w.bytes}))
                .collect::<Vec<_>>();
            println!("{}", serde_json::to_string_pretty(&doc)?);
        } else if ranked.is_empty() {
            println!("no writers above threshold on {}", sample.device);
        } else {
            for writer in &ranked {
                println!(
                    "{:>10}  {} ({})",
                    format_bytes(writer.bytes),
                    writer.comm,
                    writer.pid
                );
            }
        }
        return Ok(0);
    }

    // Degraded path: cumulative /proc counters for target-pattern processes.
    console::warning(&format!(
        "tracer {} unavailable; falling back to cumulative /proc counters",
        config.tracer_cmd
    ));
    let fallback = detector.proc_scan_fallback();
    if json {
        let doc = fallback
            .iter()
            .map(|w| json!({
                "pid": w.pid,
                "comm": w.comm,
                "cumulative_write_bytes": w.write_bytes,
            }))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else if fallback.is_empty() {
        println!("unavailable");
    } else {
        for writer in &fallback {
            println!(
                "{:>10}  {} ({}) [cumulative]",
                format_bytes(writer.write_bytes),
                writer.comm,
                writer.pid
            );
        }
    }
    Ok(0)
}

// ──────────────────── resume / test / uninstall ────────────────────

fn cmd_resume(config: &Config) -> Result<i32> {
    let store = StateStore::open(&config.state_dir)?;
    let paused = store.read_paused();
    if paused.is_empty() {
        console::info("no paused processes tracked");
        return Ok(0);
    }
    let report = ResumeManager::manual_resume(&paused, &KernelSignals);
    console::resume(&format!(
        "resumed {} process(es), {} record(s) were gone",
        report.resumed.len(),
        report.dropped
    ));
    // Truncate: every record was either resumed or found dead.
    store.write_paused(&[])?;
    Ok(0)
}

fn cmd_test(config: &Config, args: &TestArgs) -> Result<i32> {
    let dispatcher = NotificationDispatcher::from_config(&config.notify);
    if dispatcher.channel_count() == 0 {
        console::warning("no notification channels enabled");
    }
    let levels: Vec<Level> = match &args.level {
        Some(raw) => match Level::parse(raw) {
            Some(level) => vec![level],
            None => {
                console::error(&format!("unknown level {raw:?}"));
                return Ok(1);
            }
        },
        None => Level::ALL.to_vec(),
    };
    for level in levels {
        console::info(&format!("dispatching test notification for {level}"));
        dispatcher.dispatch(
            level,
            &format!("dwd test: {level}"),
            "this is a watchdog notification test; no action was taken",
        );
    }
    Ok(0)
}

fn cmd_uninstall(args: &UninstallArgs) -> Result<i32> {
    let report = SystemdServiceManager::new(args.user_scope).uninstall()?;
    if report.unit_stopped {
        console::info("service unit stopped");
    }
    if report.unit_disabled {
        console::info("service unit disabled");
    }
    if let Some(path) = &report.unit_file_removed {
        console::info(&format!("removed unit file {}", path.display()));
    }
    if let Some(path) = &report.binary_removed {
        console::info(&format!("removed binary {}", path.display()));
    }
    console::info("config, logs, and state were preserved");
    Ok(0)
}

// ──────────────────── helpers ────────────────────

/// Human byte formatting: GB/MB/KB with one decimal.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let b = bytes as f64;
    if bytes >= 1 << 30 {
        format!("{:.1} GB", b / f64::from(1u32 << 30))
    } else if bytes >= 1 << 20 {
        format!("{:.1} MB", b / f64::from(1u32 << 20))
    } else {
        format!("{:.1} KB", b / 1024.0)
    }
}

fn colored_level(level: Level) -> String {
    let name = level.name();
    match level {
        Level::Ok => name.green().to_string(),
        Level::Notice | Level::Warn => name.yellow().to_string(),
        Level::Harsh => name.red().to_string(),
        Level::Pause | Level::Stop | Level::Kill => name.red().bold().to_string(),
    }
}

fn wall_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_subcommand_is_run() {
        let cli = Cli::parse_from(["dwd"]);
        assert!(cli.command.is_none(), "bare invocation defaults to run");
    }

    #[test]
    fn global_flags_parse_with_subcommands() {
        let cli = Cli::parse_from([
            "dwd",
            "--config",
            "/etc/dwd.conf",
            "--mount",
            "/data",
            "--user",
            "builder",
            "--dry-run",
            "status",
        ]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/dwd.conf")));
        assert_eq!(cli.mount.as_deref(), Some(std::path::Path::new("/data")));
        assert_eq!(cli.user.as_deref(), Some("builder"));
        assert!(cli.dry_run);
    }

    #[test]
    fn unknown_flag_is_a_parse_error() {
        assert!(Cli::try_parse_from(["dwd", "--frobnicate"]).is_err());
    }

    #[test]
    fn test_subcommand_accepts_level() {
        let cli = Cli::parse_from(["dwd", "test", "harsh"]);
        match cli.command {
            Some(Command::Test(args)) => assert_eq!(args.level.as_deref(), Some("harsh")),
            other => panic!("expected test subcommand, got {other:?}"),
        }
    }

    #[test]
    fn format_bytes_one_decimal_per_unit() {
        assert_eq!(format_bytes(1_310_720), "1.3 MB");
        assert_eq!(format_bytes(2 * (1 << 30)), "2.0 GB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(0), "0.0 KB");
        assert_eq!(format_bytes((1 << 30) + (1 << 29)), "1.5 GB");
    }
}
