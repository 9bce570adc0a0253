//! `bd sync` - the synchronization front-end.
//!
//! When a daemon is listening on the workspace socket, the sync request is
//! sent there so all mutations stay behind the single writer. If the
//! daemon cannot serve it, the command transparently falls back to direct
//! mode and reports the degradation reason.

use std::path::PathBuf;

use serde_json::json;

use crate::cli::SyncArgs;
use crate::config;
use crate::daemon::DaemonClient;
use crate::error::{BeadsError, Result};
use crate::sync::{SyncOptions, SyncReport};

/// Execute `bd sync`.
///
/// # Errors
///
/// Propagates engine errors; daemon unavailability is not an error (the
/// command falls back to direct mode).
pub fn execute(args: &SyncArgs, json: bool, db: Option<&PathBuf>, no_daemon: bool) -> Result<()> {
    let beads_dir = config::discover_beads_dir(None)?;

    if args.status {
        return execute_status(&beads_dir, db, json);
    }

    let options = SyncOptions {
        dry_run: args.dry_run,
        flush_only: args.flush_only,
        import_only: args.import_only,
        merge_only: args.merge,
        no_pull: args.no_pull,
        no_push: args.no_push,
        message: args.message.clone(),
        rename_on_import: args.rename_on_import,
        ..Default::default()
    };

    // Prefer the daemon when one is listening
    if !no_daemon {
        let paths = config::resolve_paths(&beads_dir, db.map(PathBuf::as_path))?;
        let socket = paths.socket_path();

        // Opt-in auto-start: launch a detached daemon for next time and
        // serve this invocation directly.
        if !socket.exists() {
            let engine_config = config::EngineConfig::resolve(&beads_dir)?;
            if engine_config.auto_start_daemon {
                spawn_detached_daemon(&paths);
            }
        }

        if socket.exists() {
            let mut client = DaemonClient::new(&socket);
            let params = json!({
                "dry_run": options.dry_run,
                "flush_only": options.flush_only,
                "import_only": options.import_only,
                "no_pull": options.no_pull,
                "no_push": options.no_push,
                "message": options.message,
            });
            match client.call("sync", params) {
                Ok(result) => {
                    print_report_value(&result, json);
                    return Ok(());
                }
                Err(BeadsError::DaemonUnavailable { reason }) => {
                    tracing::warn!(
                        reason = %reason,
                        "Daemon unavailable; degraded to direct mode"
                    );
                }
                Err(other) => return Err(other),
            }
        }
    }

    let ctx = config::open_workspace(&beads_dir, db.map(PathBuf::as_path))?;
    let result = ctx.sync(&options);
    ctx.shutdown();
    let report = result?;
    print_report(&report, json);
    Ok(())
}

/// Best-effort launch of a background daemon; failures only log.
fn spawn_detached_daemon(paths: &config::WorkspacePaths) {
    let Ok(exe) = std::env::current_exe() else {
        return;
    };
    let log = paths.daemon_log_path();
    let result = std::process::Command::new(exe)
        .arg("daemon")
        .arg("--log")
        .arg(&log)
        .current_dir(&paths.workspace_root)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    match result {
        Ok(child) => {
            tracing::debug!(pid = child.id(), "Auto-started daemon");
        }
        Err(e) => tracing::warn!(error = %e, "Failed to auto-start daemon"),
    }
}

fn execute_status(beads_dir: &std::path::Path, db: Option<&PathBuf>, json: bool) -> Result<()> {
    let ctx = config::open_workspace(beads_dir, db.map(PathBuf::as_path))?;
    let mirror = ctx.mirror_path.clone();
    let status = ctx.with_store(|storage| crate::sync::status(storage, &mirror));
    ctx.shutdown();
    let status = status?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("dirty issues:    {}", status.dirty_count);
        println!("mirror present:  {}", status.mirror_exists);
        println!(
            "in sync:         {}",
            if status.mirror_matches_store { "yes" } else { "no" }
        );
        if let Some(time) = status.last_import_time {
            println!("last import:     {time}");
        }
    }
    Ok(())
}

fn print_report(report: &SyncReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("warning: failed to render report: {e}"),
        }
        return;
    }

    for step in &report.steps {
        println!("  - {step}");
    }
    println!(
        "synced: {} exported, {} created, {} updated, {} deleted{}",
        report.exported,
        report.imported_created,
        report.imported_updated,
        report.deletions_applied.len(),
        if report.remapped > 0 {
            format!(", {} remapped", report.remapped)
        } else {
            String::new()
        }
    );
}

fn print_report_value(value: &serde_json::Value, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        );
    } else if let Ok(report) = serde_json::from_value::<SyncReport>(value.clone()) {
        print_report(&report, false);
    } else {
        println!("{value}");
    }
}
