//! Base/left snapshot management for 3-way reconciliation.
//!
//! Two sibling mirrors live next to the JSONL file: `<stem>.base.jsonl`
//! (the mirror content the local store last consumed) and
//! `<stem>.left.jsonl` (the mirror this process exported immediately
//! before a pull). Neither is committed to version control.
//!
//! Without `left` we cannot distinguish "remote deleted" from "local never
//! had it"; without `base` we cannot detect deletion at all.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BeadsError, Result};
use crate::jsonl;
use crate::model::Issue;

/// Manages the `base` and `left` snapshot mirrors for one workspace.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    mirror_path: PathBuf,
    base_path: PathBuf,
    left_path: PathBuf,
}

impl SnapshotManager {
    /// Create a manager for the given mirror path.
    #[must_use]
    pub fn new(mirror_path: &Path) -> Self {
        let stem = mirror_path
            .file_stem()
            .map_or_else(|| "issues".to_string(), |s| s.to_string_lossy().to_string());
        let base_path = mirror_path.with_file_name(format!("{stem}.base.jsonl"));
        let left_path = mirror_path.with_file_name(format!("{stem}.left.jsonl"));
        Self {
            mirror_path: mirror_path.to_path_buf(),
            base_path,
            left_path,
        }
    }

    /// Path of the `base` snapshot.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the `left` snapshot.
    #[must_use]
    pub fn left_path(&self) -> &Path {
        &self.left_path
    }

    /// Seed `base` from the current mirror if it does not exist yet.
    ///
    /// No-op when `base` already exists or when there is no mirror. Used on
    /// first daemon start to bootstrap 3-way merge.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn initialize(&self) -> Result<()> {
        if self.base_path.exists() || !self.mirror_path.exists() {
            return Ok(());
        }
        fs::copy(&self.mirror_path, &self.base_path)?;
        tracing::debug!(base = %self.base_path.display(), "Seeded base snapshot from mirror");
        Ok(())
    }

    /// Copy the current mirror to `left`. Mandatory immediately before a pull.
    ///
    /// A missing mirror captures an empty left side.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn capture_left(&self) -> Result<()> {
        if self.mirror_path.exists() {
            fs::copy(&self.mirror_path, &self.left_path)?;
        } else {
            fs::write(&self.left_path, b"")?;
        }
        Ok(())
    }

    /// Write `left` directly from an in-memory record set.
    ///
    /// Used by merge-only cycles, where the mirror already holds external
    /// changes and the local view has to come from the store instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_left(&self, records: &[Issue]) -> Result<()> {
        crate::jsonl::write_atomic(&self.left_path, records)?;
        Ok(())
    }

    /// Copy the current (post-import) mirror to `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn update_base(&self) -> Result<()> {
        if self.mirror_path.exists() {
            fs::copy(&self.mirror_path, &self.base_path)?;
        } else {
            fs::write(&self.base_path, b"")?;
        }
        Ok(())
    }

    /// Check that the snapshots are internally consistent.
    ///
    /// `left` without `base` means a previous cycle died between capture
    /// and update; an unparsable snapshot means the file was truncated or
    /// corrupted. Either way callers must discard the snapshots and skip
    /// deletion handling for this cycle.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotInvalid` describing the inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.left_path.exists() && !self.base_path.exists() {
            return Err(BeadsError::SnapshotInvalid {
                reason: "left snapshot exists without a base snapshot".to_string(),
            });
        }
        for path in [&self.base_path, &self.left_path] {
            if path.exists() {
                jsonl::read_issues(path).map_err(|e| BeadsError::SnapshotInvalid {
                    reason: format!("{} is unreadable: {e}", path.display()),
                })?;
            }
        }
        Ok(())
    }

    /// Compute accepted deletions against a merged mirror.
    ///
    /// An accepted deletion is an ID that was present in `base`, is absent
    /// from the merged mirror, and whose canonical serialization in `left`
    /// equals that in `base` (the local side did not touch it).
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three files cannot be read.
    pub fn compute_accepted_deletions(&self, merged_path: &Path) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(vec![]);
        }

        let base = load_map(&self.base_path)?;
        let left = if self.left_path.exists() {
            load_map(&self.left_path)?
        } else {
            HashMap::new()
        };
        let merged: std::collections::HashSet<String> =
            jsonl::read_ids(merged_path)?.into_iter().collect();

        let mut accepted = Vec::new();
        for (id, base_issue) in &base {
            if merged.contains(id) {
                continue;
            }
            let unchanged = match left.get(id) {
                Some(left_issue) => {
                    jsonl::canonical_line(left_issue)? == jsonl::canonical_line(base_issue)?
                }
                None => false,
            };
            if unchanged {
                accepted.push(id.clone());
            }
        }

        accepted.sort();
        Ok(accepted)
    }

    /// Discard both snapshots (recovery path after `validate` fails).
    ///
    /// # Errors
    ///
    /// Returns an error if an unlink fails for a reason other than absence.
    pub fn discard(&self) -> Result<()> {
        for path in [&self.base_path, &self.left_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BeadsError::Io(e)),
            }
        }
        Ok(())
    }

    /// Unlink the per-cycle snapshot (`left`) after a successful cycle.
    ///
    /// `base` persists; it is the anchor for the next cycle's deletion
    /// detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlink fails for a reason other than absence.
    pub fn cleanup(&self) -> Result<()> {
        match fs::remove_file(&self.left_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BeadsError::Io(e)),
        }
    }
}

fn load_map(path: &Path) -> Result<HashMap<String, Issue>> {
    Ok(jsonl::read_issues(path)?
        .into_iter()
        .map(|i| (i.id.clone(), i))
        .collect())
}
