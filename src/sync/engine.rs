//! The sync orchestration: export, capture, pull, merge, prune, import,
//! re-export, push.
//!
//! One cycle walks the full pipeline in order. Every step after the left
//! capture leaves the workspace in a state where the next `bd sync` can
//! resume safely: snapshots are only cleaned up after a fully successful
//! cycle.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BeadsError, Result};
use crate::jsonl;
use crate::model::Issue;
use crate::storage::{METADATA_LAST_IMPORT_HASH, SqliteStorage};
use crate::sync::export::{collect_all_records, export_full};
use crate::sync::git;
use crate::sync::import::{ImportOptions, ImportReport, ensure_no_conflict_markers, import_records};
use crate::sync::merge::{ConflictResolution, MergeContext, three_way_merge};
use crate::sync::snapshot::SnapshotManager;
use crate::util::time::local_iso_timestamp;
use crate::validation::find_duplicate_ids;

/// Caller-selected sync behavior.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncOptions {
    /// Log each step's intent without side effects.
    pub dry_run: bool,
    /// Export only (step 2) and stop.
    pub flush_only: bool,
    /// Import only (step 7) and stop.
    pub import_only: bool,
    /// Run the merge/prune/import pipeline against an externally-updated
    /// mirror, without any git network action and without the pre-export.
    pub merge_only: bool,
    /// Skip the pull even when an upstream exists.
    pub no_pull: bool,
    /// Skip the push even when an upstream exists.
    pub no_push: bool,
    /// Commit message override for the auto-commit.
    pub message: Option<String>,
    /// Rewrite foreign-prefix IDs during import.
    pub rename_on_import: bool,
    /// Conflict strategy for the embedded merge.
    pub strategy: ConflictResolution,
}

/// What a sync cycle did.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SyncReport {
    pub exported: usize,
    pub imported_created: usize,
    pub imported_updated: usize,
    pub imported_skipped: usize,
    pub remapped: usize,
    pub deletions_applied: Vec<String>,
    pub committed: bool,
    pub pulled: bool,
    pub pushed: bool,
    pub reexported: bool,
    /// Human-readable trace of steps taken (or planned, under dry-run).
    pub steps: Vec<String>,
}

impl SyncReport {
    fn step(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(step = %text, "sync");
        self.steps.push(text);
    }
}

/// Run one sync cycle over the given store and mirror.
///
/// `workspace_root` is the directory git commands run in (the repository
/// root containing `.beads/`).
///
/// # Errors
///
/// Returns an error when a preflight check fails, a git operation fails,
/// applying accepted deletions fails (the cycle aborts with snapshots
/// retained), or the post-import sanity check trips.
#[allow(clippy::too_many_lines)]
pub fn sync(
    storage: &mut SqliteStorage,
    workspace_root: &Path,
    mirror_path: &Path,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let snapshots = SnapshotManager::new(mirror_path);

    if options.import_only {
        report.step("import mirror into store");
        if !options.dry_run {
            let import = run_import(storage, mirror_path, options)?;
            report.record_import(&import);
        }
        return Ok(report);
    }

    // Step 1: preflight
    let in_git = git::is_work_tree(workspace_root);
    let wants_network =
        !options.flush_only && !options.merge_only && (!options.no_pull || !options.no_push);
    if wants_network && in_git && git::has_unresolved_merge(workspace_root)? {
        return Err(BeadsError::git(
            "preflight",
            "repository has unresolved merge entries; resolve them before syncing",
        ));
    }
    let upstream = if in_git {
        git::current_branch(workspace_root)
            .ok()
            .and_then(|branch| git::upstream(workspace_root, &branch))
    } else {
        None
    };
    let can_pull = wants_network && !options.no_pull && upstream.is_some();
    let can_push = wants_network && !options.no_push && upstream.is_some();

    // A configured sync branch is advisory: warn when syncing elsewhere.
    if in_git {
        let configured = std::env::var("BEADS_SYNC_BRANCH")
            .ok()
            .filter(|v| !v.is_empty())
            .or(storage.get_config("sync.branch")?);
        if let Some(configured) = configured {
            if let Ok(current) = git::current_branch(workspace_root) {
                if current != configured {
                    tracing::warn!(
                        current = %current,
                        configured = %configured,
                        "Syncing on a branch other than the configured sync branch"
                    );
                }
            }
        }
    }

    report.step(format!(
        "preflight ok (git: {in_git}, upstream: {})",
        upstream.as_deref().unwrap_or("none")
    ));

    // Step 2: export with pre-export integrity checks. A merge-only cycle
    // skips this: the mirror already holds external content that the
    // export would clobber.
    if options.merge_only {
        report.step("export skipped (merge-only)");
    } else {
        report.step("full export to mirror");
        if !options.dry_run {
            preexport_checks(storage, mirror_path)?;
            let outcome = export_full(storage, mirror_path)?;
            report.exported = outcome.written_ids.len();
        }
    }

    if options.flush_only {
        return Ok(report);
    }

    // Step 3: capture left before any network action. In merge-only mode
    // the local view comes from the store, not the mirror.
    report.step("capture left snapshot");
    if !options.dry_run {
        snapshots.initialize()?;
        if options.merge_only {
            snapshots.write_left(&collect_all_records(storage)?)?;
        } else {
            snapshots.capture_left()?;
        }
    }

    // Step 4: auto-commit the mirror
    if in_git && !options.merge_only {
        report.step("commit mirror if changed");
        if !options.dry_run && git::is_file_modified(workspace_root, mirror_path)? {
            let message = options
                .message
                .clone()
                .unwrap_or_else(|| format!("bd sync: {}", local_iso_timestamp()));
            let config_path = mirror_path
                .parent()
                .map(|p| p.join("config.yaml"))
                .filter(|p| p.exists());
            let mut paths: Vec<&Path> = vec![mirror_path];
            if let Some(ref config) = config_path {
                paths.push(config);
            }
            report.committed = git::stage_and_commit(workspace_root, &paths, &message)?;
        }
    }

    // Step 5: pull (no upstream configured means local-only mode)
    if can_pull {
        report.step("pull from upstream");
        if !options.dry_run {
            git::pull(workspace_root)?;
            report.pulled = true;
        }
    } else {
        report.step("pull skipped (local-only)");
    }

    // Step 6: three-way merge and deletion reconciliation
    report.step("reconcile deletions via 3-way merge");
    if !options.dry_run {
        reconcile_deletions(storage, mirror_path, &snapshots, options, &mut report)?;
    }

    // Step 7: import the merged mirror
    report.step("import merged mirror");
    let pre_import_count = storage.count_issues()?;
    if !options.dry_run {
        let import = run_import(storage, mirror_path, options)?;
        report.record_import(&import);

        let post_import_count = storage.count_issues()?;
        if pre_import_count > 1 && post_import_count * 2 < pre_import_count {
            return Err(BeadsError::ImportLoss {
                before: pre_import_count,
                after: post_import_count,
            });
        }
    }

    // Step 8: reconciliation re-export when the store diverged from the mirror
    if !options.dry_run {
        let dirty = storage.get_dirty_issue_ids()?;
        if !dirty.is_empty() {
            report.step("re-export store changes after import");
            export_full(storage, mirror_path)?;
            report.reexported = true;
            if in_git && git::is_file_modified(workspace_root, mirror_path)? {
                git::stage_and_commit(
                    workspace_root,
                    &[mirror_path],
                    "bd sync: apply DB changes after import",
                )?;
            }
        }
    }

    // Step 9: update base, clean up per-cycle snapshots
    report.step("update base snapshot");
    if !options.dry_run {
        snapshots.update_base()?;
        snapshots.cleanup()?;
    }

    // Step 10: push
    if can_push {
        report.step("push to upstream");
        if !options.dry_run {
            git::push(workspace_root)?;
            report.pushed = true;
        }
    } else {
        report.step("push skipped (local-only)");
    }

    Ok(report)
}

impl SyncReport {
    fn record_import(&mut self, import: &ImportReport) {
        self.imported_created = import.created;
        self.imported_updated = import.updated;
        self.imported_skipped = import.skipped;
        self.remapped = import.remapped.len();
    }
}

fn preexport_checks(storage: &SqliteStorage, mirror_path: &Path) -> Result<()> {
    if mirror_path.exists() {
        let existing = jsonl::read_issues_lenient(mirror_path)?;
        let duplicates = find_duplicate_ids(&existing);
        if !duplicates.is_empty() {
            return Err(BeadsError::Config(format!(
                "mirror contains duplicate IDs: {}",
                duplicates.join(", ")
            )));
        }

        // An empty store must not clobber a populated mirror; this only
        // arises when auto-import is disabled or failed.
        if storage.count_issues()? == 0 && !existing.is_empty() {
            return Err(BeadsError::Config(format!(
                "Refusing to export an empty store over a mirror with {} issue(s).\n\
                 1. Run 'bd sync --import-only' to load the mirror first, or\n\
                 2. Remove the mirror if it is genuinely stale.",
                existing.len()
            )));
        }
    }
    let orphans = storage.find_orphaned_dependencies()?;
    if !orphans.is_empty() {
        tracing::warn!(
            count = orphans.len(),
            "Orphaned dependencies present; run 'bd validate --fix' to remove them"
        );
    }
    Ok(())
}

fn run_import(
    storage: &mut SqliteStorage,
    mirror_path: &Path,
    options: &SyncOptions,
) -> Result<ImportReport> {
    if !mirror_path.exists() {
        return Ok(ImportReport::default());
    }
    ensure_no_conflict_markers(mirror_path)?;
    let records = jsonl::read_issues(mirror_path)?;

    storage.clear_all_export_hashes()?;
    let prefix = storage.get_config("issue_prefix")?;
    let report = import_records(
        storage,
        records,
        &ImportOptions {
            dry_run: false,
            expected_prefix: prefix,
            lenient_prefix: !options.rename_on_import,
            rename_on_import: options.rename_on_import,
        },
    )?;

    let file_hash = jsonl::hash_file(mirror_path)?;
    storage.set_metadata(METADATA_LAST_IMPORT_HASH, &file_hash)?;

    Ok(report)
}

/// Merge base/left/right, write `<mirror>.merged`, rename it over the
/// mirror, and prune accepted deletions from the store.
fn reconcile_deletions(
    storage: &mut SqliteStorage,
    mirror_path: &Path,
    snapshots: &SnapshotManager,
    options: &SyncOptions,
    report: &mut SyncReport,
) -> Result<()> {
    if let Err(e) = snapshots.validate() {
        tracing::warn!(error = %e, "Discarding snapshots; deletion handling skipped this cycle");
        snapshots.discard()?;
        return Ok(());
    }
    if !snapshots.base_path().exists() || !mirror_path.exists() {
        return Ok(());
    }

    let base = load_issue_map(snapshots.base_path())?;
    let left = load_issue_map(snapshots.left_path())?;
    let right = load_issue_map(mirror_path)?;

    let merge = three_way_merge(&MergeContext::new(base, left, right), options.strategy);
    for (id, note) in &merge.notes {
        tracing::debug!(id = %id, note = %note, "merge note");
    }

    let merged_path = merged_path_for(mirror_path);
    jsonl::write_atomic(&merged_path, &merge.kept)?;

    let accepted = snapshots.compute_accepted_deletions(&merged_path)?;

    // The rename is the linearization point for the merged mirror.
    fs::rename(&merged_path, mirror_path)?;

    let mut failures = Vec::new();
    for id in &accepted {
        if !storage.id_exists(id)? {
            continue;
        }
        if let Err(e) = storage.delete_issue(id, "sync") {
            failures.push((id.clone(), e.to_string()));
        }
    }

    if !failures.is_empty() {
        // Snapshots are retained so the next sync can retry.
        return Err(BeadsError::DeletionApplyFailed { failures });
    }

    report.deletions_applied = accepted;
    Ok(())
}

fn merged_path_for(mirror_path: &Path) -> PathBuf {
    let file_name = mirror_path.file_name().map_or_else(
        || "issues.jsonl".to_string(),
        |n| n.to_string_lossy().to_string(),
    );
    mirror_path.with_file_name(format!("{file_name}.merged"))
}

fn load_issue_map(path: &Path) -> Result<HashMap<String, Issue>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    Ok(jsonl::read_issues(path)?
        .into_iter()
        .map(|i| (i.id.clone(), i))
        .collect())
}

/// Snapshot of sync-relevant state for `bd sync --status`.
#[derive(Debug, serde::Serialize)]
pub struct SyncStatus {
    pub dirty_count: usize,
    pub mirror_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_import_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_import_hash: Option<String>,
    pub mirror_matches_store: bool,
}

/// Gather `bd sync --status` information without side effects.
///
/// # Errors
///
/// Returns an error if a database query fails.
pub fn status(storage: &SqliteStorage, mirror_path: &Path) -> Result<SyncStatus> {
    let dirty_count = storage.get_dirty_issue_ids()?.len();
    let mirror_exists = mirror_path.exists();
    let last_import_hash = storage.get_metadata(METADATA_LAST_IMPORT_HASH)?;
    let last_import_time = storage.get_metadata(crate::storage::METADATA_LAST_IMPORT_TIME)?;

    let mirror_matches_store = if mirror_exists {
        let current = jsonl::hash_file(mirror_path)?;
        last_import_hash.as_deref() == Some(current.as_str()) && dirty_count == 0
    } else {
        storage.count_issues()? == 0
    };

    Ok(SyncStatus {
        dirty_count,
        mirror_exists,
        last_import_time,
        last_import_hash,
        mirror_matches_store,
    })
}

/// Round-trip check used by property tests and doctor: the mirror,
/// re-imported into a fresh store, serializes identically to the current
/// store's full export.
///
/// # Errors
///
/// Returns an error if either side cannot be serialized.
pub fn mirror_round_trips(storage: &SqliteStorage, mirror_path: &Path) -> Result<bool> {
    let ours = collect_all_records(storage)?;
    let mut fresh = SqliteStorage::open_memory()?;
    let records = jsonl::read_issues(mirror_path)?;
    import_records(&mut fresh, records, &ImportOptions::default())?;
    let theirs = collect_all_records(&fresh)?;

    if ours.len() != theirs.len() {
        return Ok(false);
    }
    for (a, b) in ours.iter().zip(theirs.iter()) {
        if jsonl::canonical_line(a)? != jsonl::canonical_line(b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn fixed_issue(id: &str, title: &str) -> Issue {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut issue = Issue::new(id, title);
        issue.created_at = at;
        issue.updated_at = at;
        issue
    }

    fn local_options() -> SyncOptions {
        SyncOptions {
            no_pull: true,
            no_push: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_local_sync_exports_and_updates_base() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join(".beads").join("issues.jsonl");
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .create_issue(&fixed_issue("a-1", "One"), "t")
            .unwrap();

        let report = sync(&mut storage, temp.path(), &mirror, &local_options()).unwrap();
        assert_eq!(report.exported, 1);
        assert!(!report.pulled);
        assert!(!report.pushed);

        // After sync, base equals the current mirror and left is gone
        let snaps = SnapshotManager::new(&mirror);
        assert_eq!(
            std::fs::read(&mirror).unwrap(),
            std::fs::read(snaps.base_path()).unwrap()
        );
        assert!(!snaps.left_path().exists());
    }

    #[test]
    fn test_merge_only_accepts_remote_deletion() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join(".beads").join("issues.jsonl");
        let mut storage = SqliteStorage::open_memory().unwrap();

        for (id, title) in [("a-1", "One"), ("a-2", "Two"), ("a-3", "Three")] {
            storage.create_issue(&fixed_issue(id, title), "t").unwrap();
        }

        // First cycle: base == mirror == store with all three
        sync(&mut storage, temp.path(), &mirror, &local_options()).unwrap();

        // A remote deletion of a-2 lands in the mirror (e.g. via git pull
        // performed outside of bd).
        let survivors: Vec<Issue> = jsonl::read_issues(&mirror)
            .unwrap()
            .into_iter()
            .filter(|i| i.id != "a-2")
            .collect();
        jsonl::write_atomic(&mirror, &survivors).unwrap();

        let mut options = local_options();
        options.merge_only = true;
        let report = sync(&mut storage, temp.path(), &mirror, &options).unwrap();

        assert_eq!(report.deletions_applied, vec!["a-2"]);
        assert!(storage.get_issue("a-2").unwrap().is_none());
        assert!(storage.get_issue("a-1").unwrap().is_some());
        assert!(storage.get_issue("a-3").unwrap().is_some());

        // Base was refreshed to the merged mirror
        let snaps = SnapshotManager::new(&mirror);
        let base_ids = jsonl::read_ids(snaps.base_path()).unwrap();
        assert_eq!(base_ids, vec!["a-1", "a-3"]);
    }

    #[test]
    fn test_merge_only_keeps_locally_modified_issue() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join(".beads").join("issues.jsonl");
        let mut storage = SqliteStorage::open_memory().unwrap();

        storage
            .create_issue(&fixed_issue("a-1", "One"), "t")
            .unwrap();
        sync(&mut storage, temp.path(), &mirror, &local_options()).unwrap();

        // Local edit after the last cycle
        storage
            .update_issue(
                "a-1",
                &crate::storage::IssueUpdate {
                    title: Some("One edited".to_string()),
                    ..Default::default()
                },
                "t",
            )
            .unwrap();

        // Remote deleted a-1
        jsonl::write_atomic(&mirror, &[]).unwrap();

        let mut options = local_options();
        options.merge_only = true;
        let report = sync(&mut storage, temp.path(), &mirror, &options).unwrap();

        assert!(report.deletions_applied.is_empty());
        assert_eq!(
            storage.get_issue("a-1").unwrap().unwrap().title,
            "One edited"
        );
        // The re-export step restored the surviving record to the mirror
        assert!(report.reexported);
        assert_eq!(jsonl::read_ids(&mirror).unwrap(), vec!["a-1"]);
    }

    #[test]
    fn test_dry_run_has_no_side_effects() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join(".beads").join("issues.jsonl");
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .create_issue(&fixed_issue("a-1", "One"), "t")
            .unwrap();

        let mut options = local_options();
        options.dry_run = true;
        let report = sync(&mut storage, temp.path(), &mirror, &options).unwrap();

        assert!(!report.steps.is_empty());
        assert!(!mirror.exists());
        assert_eq!(storage.get_dirty_issue_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_flush_only_stops_after_export() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join(".beads").join("issues.jsonl");
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .create_issue(&fixed_issue("a-1", "One"), "t")
            .unwrap();

        let mut options = local_options();
        options.flush_only = true;
        let report = sync(&mut storage, temp.path(), &mirror, &options).unwrap();

        assert_eq!(report.exported, 1);
        let snaps = SnapshotManager::new(&mirror);
        assert!(!snaps.base_path().exists());
        assert!(!snaps.left_path().exists());
    }

    #[test]
    fn test_import_only_applies_mirror() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join(".beads").join("issues.jsonl");
        jsonl::write_atomic(&mirror, &[fixed_issue("a-1", "External")]).unwrap();

        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut options = local_options();
        options.import_only = true;
        let report = sync(&mut storage, temp.path(), &mirror, &options).unwrap();

        assert_eq!(report.imported_created, 1);
        assert_eq!(
            storage.get_issue("a-1").unwrap().unwrap().title,
            "External"
        );
    }

    #[test]
    fn test_sync_roundtrip_property() {
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join(".beads").join("issues.jsonl");
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut issue = fixed_issue("a-1", "One");
        issue.labels = vec!["b".to_string(), "a".to_string()];
        storage.create_issue(&issue, "t").unwrap();
        storage.add_label("a-1", "b", "t").ok();
        storage.add_label("a-1", "a", "t").ok();

        sync(&mut storage, temp.path(), &mirror, &local_options()).unwrap();
        assert!(mirror_round_trips(&storage, &mirror).unwrap());
    }
}
