//! Repository and clone identity fingerprints.
//!
//! The repository ID is a stable content-derived fingerprint of the
//! version-control root (first commit plus the origin URL when present), so
//! a daemon can detect that it is attached to the wrong repository after a
//! directory move. The clone ID is a random per-clone identifier minted at
//! init and used for collision suffixes and audit.

use std::path::Path;
use std::process::Command;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Metadata key for the repository fingerprint.
pub const METADATA_REPO_ID: &str = "repo_id";
/// Metadata key for the clone identifier.
pub const METADATA_CLONE_ID: &str = "clone_id";

/// Compute the repository fingerprint for the workspace containing `dir`.
///
/// Inputs, in order: the root commit hash and the `origin` remote URL. If
/// the directory is not a git repository, the canonical path stands in so
/// mirror-only workspaces still get a stable identity.
///
/// # Errors
///
/// Returns an error only if the fallback path cannot be canonicalized.
pub fn repo_id(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    let first_commit = git_stdout(dir, &["rev-list", "--max-parents=0", "HEAD"]);
    let origin_url = git_stdout(dir, &["remote", "get-url", "origin"]);

    match (first_commit, origin_url) {
        (None, None) => {
            let canonical = dir.canonicalize()?;
            hasher.update(canonical.to_string_lossy().as_bytes());
        }
        (commit, url) => {
            hasher.update(commit.unwrap_or_default().as_bytes());
            hasher.update(b"\x00");
            hasher.update(url.unwrap_or_default().as_bytes());
        }
    }

    Ok(format!("{:x}", hasher.finalize())[..16].to_string())
}

/// Mint a fresh clone identifier.
///
/// Derived from the wall clock, the process ID, and the workspace path, so
/// two clones created in the same instant still diverge.
#[must_use]
pub fn new_clone_id(dir: &Path) -> String {
    let mut hasher = Sha256::new();
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(dir.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

/// The path-only fingerprint used for workspaces with no git history.
///
/// A repository gains its real fingerprint with its first commit; callers
/// compare against this value to recognize that transition instead of
/// reporting a mismatch.
///
/// # Errors
///
/// Returns an error if the path cannot be canonicalized.
pub fn path_id(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let canonical = dir.canonicalize()?;
    hasher.update(canonical.to_string_lossy().as_bytes());
    Ok(format!("{:x}", hasher.finalize())[..16].to_string())
}

fn git_stdout(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}
