//! Git subprocess helpers for the sync engine.
//!
//! All version-control work shells out to `git` in the workspace root.
//! Failures carry the operation name and git's stderr so preflight errors
//! stay actionable.

use std::path::Path;
use std::process::Command;

use crate::error::{BeadsError, Result};

fn run(dir: &Path, op: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| BeadsError::git(op, format!("failed to invoke git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(BeadsError::git(op, stderr));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn probe(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether `dir` is inside a git working tree.
#[must_use]
pub fn is_work_tree(dir: &Path) -> bool {
    probe(dir, &["rev-parse", "--is-inside-work-tree"]).as_deref() == Some("true")
}

/// Whether the repository has unresolved merge entries.
///
/// # Errors
///
/// Returns an error if git cannot be invoked.
pub fn has_unresolved_merge(dir: &Path) -> Result<bool> {
    let unmerged = run(dir, "ls-files", &["ls-files", "-u"])?;
    Ok(!unmerged.is_empty())
}

/// Current branch name.
///
/// # Errors
///
/// Returns an error if HEAD cannot be resolved (e.g. unborn branch).
pub fn current_branch(dir: &Path) -> Result<String> {
    run(dir, "rev-parse", &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// The upstream ref configured for a branch, if any.
#[must_use]
pub fn upstream(dir: &Path, branch: &str) -> Option<String> {
    probe(
        dir,
        &["rev-parse", "--abbrev-ref", &format!("{branch}@{{upstream}}")],
    )
}

/// Whether any remote is configured.
#[must_use]
pub fn has_remote(dir: &Path) -> bool {
    probe(dir, &["remote"]).is_some_and(|out| !out.is_empty())
}

/// Whether `path` differs from its committed state (or is untracked).
///
/// # Errors
///
/// Returns an error if git cannot be invoked.
pub fn is_file_modified(dir: &Path, path: &Path) -> Result<bool> {
    let rel = path.strip_prefix(dir).unwrap_or(path);
    let status = run(
        dir,
        "status",
        &["status", "--porcelain", "--", &rel.to_string_lossy()],
    )?;
    Ok(!status.is_empty())
}

/// Stage the given paths and commit them with `message`.
///
/// A no-op when nothing ends up staged.
///
/// # Errors
///
/// Returns an error if staging or committing fails.
pub fn stage_and_commit(dir: &Path, paths: &[&Path], message: &str) -> Result<bool> {
    let mut args = vec!["add", "--"];
    let rels: Vec<String> = paths
        .iter()
        .map(|p| p.strip_prefix(dir).unwrap_or(p).to_string_lossy().to_string())
        .collect();
    args.extend(rels.iter().map(String::as_str));
    run(dir, "add", &args)?;

    // Nothing staged means nothing to commit.
    let staged = Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(dir)
        .status()
        .map_err(|e| BeadsError::git("diff", e.to_string()))?;
    if staged.success() {
        return Ok(false);
    }

    run(dir, "commit", &["commit", "-m", message])?;
    Ok(true)
}

/// Pull from the configured upstream.
///
/// # Errors
///
/// Returns an error if the pull fails (including merge conflicts).
pub fn pull(dir: &Path) -> Result<()> {
    run(dir, "pull", &["pull", "--no-edit"])?;
    Ok(())
}

/// Push to the configured upstream.
///
/// # Errors
///
/// Returns an error if the push fails.
pub fn push(dir: &Path) -> Result<()> {
    run(dir, "push", &["push"])?;
    Ok(())
}
