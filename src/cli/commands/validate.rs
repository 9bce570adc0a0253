//! `bd validate` - orphan/duplicate/pollution/conflict checks.

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::ValidateArgs;
use crate::config;
use crate::error::Result;
use crate::jsonl;
use crate::sync::scan_conflict_markers;
use crate::validation::{find_duplicate_ids, fix_orphaned_dependencies, validate_store};

#[derive(Debug, Default, Serialize)]
struct ValidateOutput {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    orphaned_dependencies: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    duplicate_mirror_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflict_marker_lines: Vec<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    invalid_issues: Vec<(String, Vec<String>)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cycles: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fixes_applied: Vec<String>,
    clean: bool,
}

fn enabled(args: &ValidateArgs, check: &str) -> bool {
    args.checks.is_empty() || args.checks.iter().any(|c| c == check)
}

/// Execute `bd validate`. Returns whether everything came back clean.
///
/// # Errors
///
/// Returns an error if the workspace cannot be opened.
pub fn execute(args: &ValidateArgs, json: bool, db: Option<&PathBuf>) -> Result<bool> {
    let beads_dir = config::discover_beads_dir(None)?;
    let ctx = config::open_workspace(&beads_dir, db.map(PathBuf::as_path))?;
    let mirror = ctx.mirror_path.clone();

    let mut output = ValidateOutput::default();

    if enabled(args, "orphans") || enabled(args, "invariants") || enabled(args, "cycles") {
        let report = ctx.with_store(|storage| validate_store(storage))?;
        if enabled(args, "orphans") {
            output.orphaned_dependencies = report.orphaned_dependencies;
        }
        if enabled(args, "invariants") {
            output.invalid_issues = report.invalid_issues;
        }
        if enabled(args, "cycles") {
            output.cycles = report.cycles;
        }
    }

    if enabled(args, "duplicates") && mirror.exists() {
        let records = jsonl::read_issues_lenient(&mirror)?;
        output.duplicate_mirror_ids = find_duplicate_ids(&records);
    }

    if enabled(args, "conflicts") && mirror.exists() {
        output.conflict_marker_lines = scan_conflict_markers(&mirror)?
            .into_iter()
            .map(|m| m.line)
            .collect();
    }

    if args.fix_all && !output.orphaned_dependencies.is_empty() {
        let removed =
            ctx.with_store(|storage| fix_orphaned_dependencies(storage, "validate"))?;
        output
            .fixes_applied
            .push(format!("removed {removed} orphaned dependencies"));
        output.orphaned_dependencies.clear();
    }

    ctx.shutdown();

    output.clean = output.orphaned_dependencies.is_empty()
        && output.duplicate_mirror_ids.is_empty()
        && output.conflict_marker_lines.is_empty()
        && output.invalid_issues.is_empty()
        && output.cycles.is_empty();

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        if output.clean {
            println!("validate: all checks passed");
        }
        for (from, to) in &output.orphaned_dependencies {
            println!("orphaned dependency: {from} -> {to}");
        }
        for id in &output.duplicate_mirror_ids {
            println!("duplicate mirror ID: {id}");
        }
        for line in &output.conflict_marker_lines {
            println!("conflict marker at mirror line {line}");
        }
        for (id, problems) in &output.invalid_issues {
            println!("invalid issue {id}: {}", problems.join(", "));
        }
        for cycle in &output.cycles {
            println!("dependency cycle: {}", cycle.join(" -> "));
        }
        for fix in &output.fixes_applied {
            println!("fixed: {fix}");
        }
    }

    Ok(output.clean)
}
