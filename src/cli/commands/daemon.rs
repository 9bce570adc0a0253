//! `bd daemon` - daemon control.

use std::time::Duration;

use crate::cli::DaemonArgs;
use crate::config;
use crate::daemon::{self, DaemonOptions};
use crate::error::Result;
use crate::logging;

/// Execute `bd daemon`.
///
/// With no control flag, runs the daemon in the foreground until stopped.
///
/// # Errors
///
/// Returns an error if the workspace is missing, the lock is contended by
/// a compatible daemon, or RPC control fails.
pub fn execute(args: &DaemonArgs, json: bool) -> Result<()> {
    let beads_dir = config::discover_beads_dir(None)?;

    if args.stop {
        daemon::stop(&beads_dir)?;
        if !json {
            println!("daemon stopping");
        }
        return Ok(());
    }

    if args.status {
        let info = daemon::read_lock_info(&beads_dir)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            match info {
                Some(info) => println!(
                    "daemon running: pid {} version {} started {}",
                    info.pid, info.version, info.started_at
                ),
                None => println!("daemon not running"),
            }
        }
        return Ok(());
    }

    if args.health {
        let health = daemon::health(&beads_dir)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&health)?);
        } else {
            println!(
                "status {} version {} uptime {}s compatible {}",
                health.status, health.version, health.uptime_secs, health.compatible
            );
        }
        return Ok(());
    }

    // Foreground run; logs go to the daemon log file.
    let paths = config::resolve_paths(&beads_dir, None)?;
    let log_path = args
        .log
        .clone()
        .unwrap_or_else(|| paths.daemon_log_path());
    let _ = logging::init_logging(1, false, Some(&log_path));

    let options = DaemonOptions {
        interval: args
            .interval
            .map_or(daemon::DEFAULT_POLL_INTERVAL, Duration::from_secs),
        mode: None,
        register_global: args.global,
        log_path: Some(log_path),
    };

    daemon::run(&beads_dir, &options)
}
