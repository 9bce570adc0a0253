//! `bd doctor` - workspace health checks.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::cli::DoctorArgs;
use crate::config;
use crate::error::Result;
use crate::jsonl;
use crate::storage::METADATA_LAST_IMPORT_HASH;
use crate::sync::{SnapshotManager, scan_conflict_markers};
use crate::validation::validate_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    status: CheckStatus,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u128>,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    checks: Vec<Check>,
    healthy: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fixes_applied: Vec<String>,
}

struct Doctor {
    checks: Vec<Check>,
    perf: bool,
}

impl Doctor {
    fn run(
        &mut self,
        name: &'static str,
        f: impl FnOnce() -> (CheckStatus, String),
    ) {
        let start = Instant::now();
        let (status, detail) = f();
        self.checks.push(Check {
            name,
            status,
            detail,
            elapsed_ms: self.perf.then(|| start.elapsed().as_millis()),
        });
    }
}

/// Execute `bd doctor`.
///
/// Exit is 0 only when every check passes.
///
/// # Errors
///
/// Returns an error only on unrecoverable I/O problems; findings are
/// reported, not raised.
#[allow(clippy::too_many_lines)]
pub fn execute(args: &DoctorArgs, json: bool, db: Option<&PathBuf>) -> Result<bool> {
    let mut doctor = Doctor {
        checks: Vec::new(),
        perf: args.perf,
    };
    let mut fixes_applied = Vec::new();

    let beads_dir = match config::discover_beads_dir(None) {
        Ok(dir) => dir,
        Err(e) => {
            doctor.run("workspace", || (CheckStatus::Fail, e.to_string()));
            return finish(doctor.checks, fixes_applied, json);
        }
    };
    doctor.run("workspace", || {
        (CheckStatus::Ok, beads_dir.display().to_string())
    });

    let ctx = match config::open_workspace(&beads_dir, db.map(PathBuf::as_path)) {
        Ok(ctx) => ctx,
        Err(e) => {
            doctor.run("store", || (CheckStatus::Fail, e.to_string()));
            return finish(doctor.checks, fixes_applied, json);
        }
    };
    doctor.run("store", || (CheckStatus::Ok, "opens cleanly".to_string()));

    let mirror = ctx.mirror_path.clone();

    // Mirror parse + conflict markers
    doctor.run("mirror", || {
        if !mirror.exists() {
            return (CheckStatus::Warn, "mirror not yet exported".to_string());
        }
        match jsonl::read_issues(&mirror) {
            Ok(records) => (CheckStatus::Ok, format!("{} record(s)", records.len())),
            Err(e) => (CheckStatus::Fail, e.to_string()),
        }
    });
    doctor.run("conflict-markers", || {
        if !mirror.exists() {
            return (CheckStatus::Ok, "no mirror".to_string());
        }
        match scan_conflict_markers(&mirror) {
            Ok(markers) if markers.is_empty() => (CheckStatus::Ok, "none".to_string()),
            Ok(markers) => (
                CheckStatus::Fail,
                format!("{} marker(s); resolve the git conflict", markers.len()),
            ),
            Err(e) => (CheckStatus::Fail, e.to_string()),
        }
    });

    // Store-side checks
    let store_result = ctx.with_store(|storage| {
        let dirty = storage.get_dirty_issue_ids()?.len();
        let report = validate_store(storage)?;
        let in_sync = if mirror.exists() {
            let current = jsonl::hash_file(&mirror)?;
            storage.get_metadata(METADATA_LAST_IMPORT_HASH)?.as_deref()
                == Some(current.as_str())
        } else {
            storage.count_issues()? == 0
        };
        Ok((dirty, report, in_sync))
    });

    match store_result {
        Ok((dirty, report, in_sync)) => {
            doctor.run("dirty-set", || {
                if dirty == 0 {
                    (CheckStatus::Ok, "empty".to_string())
                } else {
                    (CheckStatus::Warn, format!("{dirty} issue(s) pending flush"))
                }
            });
            doctor.run("mirror-sync", || {
                if in_sync {
                    (CheckStatus::Ok, "mirror matches last import".to_string())
                } else {
                    (
                        CheckStatus::Warn,
                        "mirror differs from last import; run bd sync".to_string(),
                    )
                }
            });
            doctor.run("orphaned-dependencies", || {
                if report.orphaned_dependencies.is_empty() {
                    (CheckStatus::Ok, "none".to_string())
                } else {
                    (
                        CheckStatus::Warn,
                        format!("{} orphan(s)", report.orphaned_dependencies.len()),
                    )
                }
            });
            doctor.run("invariants", || {
                if report.invalid_issues.is_empty() {
                    (CheckStatus::Ok, "all records valid".to_string())
                } else {
                    (
                        CheckStatus::Fail,
                        format!("{} invalid record(s)", report.invalid_issues.len()),
                    )
                }
            });
            doctor.run("dependency-cycles", || {
                if report.cycles.is_empty() {
                    (CheckStatus::Ok, "none".to_string())
                } else {
                    (
                        CheckStatus::Fail,
                        format!(
                            "{} cycle(s), e.g. {}",
                            report.cycles.len(),
                            report.cycles[0].join(" -> ")
                        ),
                    )
                }
            });

            if args.fix && !report.orphaned_dependencies.is_empty() {
                let removed = ctx.with_store(|storage| {
                    crate::validation::fix_orphaned_dependencies(storage, "doctor")
                })?;
                fixes_applied.push(format!("removed {removed} orphaned dependencies"));
            }
        }
        Err(e) => {
            doctor.run("store-checks", || (CheckStatus::Fail, e.to_string()));
        }
    }

    // Snapshot consistency
    doctor.run("snapshots", || {
        let snaps = SnapshotManager::new(&mirror);
        match snaps.validate() {
            Ok(()) => (CheckStatus::Ok, "consistent".to_string()),
            Err(e) => (CheckStatus::Warn, e.to_string()),
        }
    });

    // Daemon reachability (only when a socket is present)
    let socket = ctx.beads_dir.join("bd.sock");
    if socket.exists() {
        doctor.run("daemon", || {
            let mut client = crate::daemon::DaemonClient::new(&socket);
            match client.health() {
                Ok(health) => (
                    CheckStatus::Ok,
                    format!("version {} up {}s", health.version, health.uptime_secs),
                ),
                Err(e) => (CheckStatus::Warn, e.to_string()),
            }
        });
    }

    if args.fix {
        ctx.flush.mark_dirty_full_export();
        ctx.flush.flush()?;
        fixes_applied.push("full mirror export".to_string());
    }

    ctx.shutdown();
    finish(doctor.checks, fixes_applied, json)
}

fn finish(checks: Vec<Check>, fixes_applied: Vec<String>, json: bool) -> Result<bool> {
    let healthy = checks.iter().all(|c| c.status == CheckStatus::Ok);
    let report = DoctorReport {
        checks,
        healthy,
        fixes_applied,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for check in &report.checks {
            let marker = match check.status {
                CheckStatus::Ok => "ok  ",
                CheckStatus::Warn => "warn",
                CheckStatus::Fail => "FAIL",
            };
            let timing = check
                .elapsed_ms
                .map(|ms| format!(" ({ms}ms)"))
                .unwrap_or_default();
            println!("[{marker}] {:<24} {}{timing}", check.name, check.detail);
        }
        for fix in &report.fixes_applied {
            println!("fixed: {fix}");
        }
    }

    Ok(report.healthy)
}
