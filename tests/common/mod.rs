//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use beads::model::Issue;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

/// An issue with pinned timestamps so serialization is reproducible.
pub fn fixed_issue(id: &str, title: &str) -> Issue {
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut issue = Issue::new(id, title);
    issue.created_at = at;
    issue.updated_at = at;
    issue
}

/// A temp workspace with `.beads/` initialized (store + config).
pub fn init_workspace(prefix: &str) -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let paths = beads::config::init_workspace(temp.path(), prefix, false, None).unwrap();
    let beads_dir = paths.beads_dir;
    (temp, beads_dir)
}

/// Run a git command in `dir`, asserting success.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        status.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&status.stderr)
    );
}

/// Initialize a git repository with identity configured.
pub fn git_init(dir: &Path) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
}

/// The `bd` binary pointed at a working directory.
pub fn bd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("bd").unwrap();
    cmd.current_dir(dir);
    cmd.env("BEADS_ACTOR", "tester");
    cmd.env("BEADS_NO_DAEMON", "1");
    cmd.env_remove("BEADS_DB");
    cmd.env_remove("BEADS_DIR");
    cmd
}
