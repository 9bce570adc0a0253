//! Mirror export paths: full and incremental.
//!
//! Both paths end in an atomic mirror write followed by the same
//! finalization: dirty flags cleared for what was flushed, per-line export
//! hashes recorded, and `last_import_hash` / `jsonl_file_hash` persisted so
//! the auto-importer recognizes self-writes and the next flush can verify
//! integrity.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::jsonl;
use crate::model::Issue;
use crate::storage::{METADATA_LAST_IMPORT_HASH, SqliteStorage};
use crate::util::progress::Progress;
use crate::util::sha256_hex;

/// Outcome of an export.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    /// IDs written to the mirror (file order). Empty when skipped.
    pub written_ids: Vec<String>,
    /// Content hash of the written mirror (empty when skipped).
    pub content_hash: String,
    /// True when the write was skipped because nothing would change.
    pub skipped: bool,
}

/// Load every issue with its relations populated, sorted by ID.
///
/// Relations come from bulk queries to avoid N+1 lookups on large stores.
///
/// # Errors
///
/// Returns an error if a database query fails.
pub fn collect_all_records(storage: &SqliteStorage) -> Result<Vec<Issue>> {
    let mut issues = storage.get_all_issues_for_export()?;
    let mut deps = storage.get_all_dependency_records()?;
    let mut labels = storage.get_all_labels()?;
    let mut comments = storage.get_all_comments()?;

    for issue in &mut issues {
        issue.dependencies = deps.remove(&issue.id).unwrap_or_default();
        issue.labels = labels.remove(&issue.id).unwrap_or_default();
        issue.comments = comments.remove(&issue.id).unwrap_or_default();
    }

    Ok(issues)
}

fn collect_records_by_ids(storage: &SqliteStorage, ids: &[String]) -> Result<Vec<Issue>> {
    let mut issues = storage.get_issues_by_ids(ids)?;
    for issue in &mut issues {
        issue.dependencies = storage.get_dependency_records(&issue.id)?;
        issue.labels = storage.get_labels(&issue.id)?;
        issue.comments = storage.get_issue_comments(&issue.id)?;
    }
    Ok(issues)
}

/// Export the complete store to the mirror.
///
/// # Errors
///
/// Returns an error if the export or finalization fails.
pub fn export_full(storage: &mut SqliteStorage, mirror_path: &Path) -> Result<ExportOutcome> {
    let records = collect_all_records(storage)?;
    let dirty_ids = storage.get_dirty_issue_ids()?;

    let progress = Progress::spinner("Writing mirror");
    let result = jsonl::write_atomic(mirror_path, &records)?;
    progress.done("mirror written");
    finalize(storage, &records, &dirty_ids, &result)?;

    tracing::debug!(
        exported = result.written_ids.len(),
        hash = %result.content_hash,
        "Full mirror export complete"
    );

    Ok(ExportOutcome {
        written_ids: result.written_ids,
        content_hash: result.content_hash,
        skipped: false,
    })
}

/// Export only what changed, merged over the existing mirror.
///
/// Dirty records are overlaid onto the parsed mirror; records the store no
/// longer has are omitted; unparsable mirror lines are treated as missing
/// entries. When every dirty record would serialize identically to its last
/// export and nothing needs dropping, the write is skipped entirely and
/// only the dirty flags are cleared.
///
/// # Errors
///
/// Returns an error if the export or finalization fails.
pub fn export_incremental(
    storage: &mut SqliteStorage,
    mirror_path: &Path,
) -> Result<ExportOutcome> {
    let dirty_ids = storage.get_dirty_issue_ids()?;
    if dirty_ids.is_empty() {
        return Ok(ExportOutcome {
            skipped: true,
            ..Default::default()
        });
    }

    let store_ids: std::collections::HashSet<String> =
        storage.get_all_ids()?.into_iter().collect();

    let existing = jsonl::read_issues_lenient(mirror_path)?;
    let mut merged: BTreeMap<String, Issue> = existing
        .into_iter()
        .filter(|issue| store_ids.contains(&issue.id))
        .map(|issue| (issue.id.clone(), issue))
        .collect();
    let dropped_any = merged.len() != jsonl::read_ids(mirror_path).unwrap_or_default().len();

    let dirty_records = collect_records_by_ids(storage, &dirty_ids)?;

    // Skip-on-no-change: every dirty record already serialized identically
    // and no stale mirror entries need dropping.
    if !dropped_any && mirror_path.exists() {
        let mut all_unchanged = true;
        for record in &dirty_records {
            let line_hash = sha256_hex(jsonl::canonical_line(record)?.as_bytes());
            if storage.get_export_hash(&record.id)?.as_deref() != Some(line_hash.as_str()) {
                all_unchanged = false;
                break;
            }
        }
        if all_unchanged {
            storage.clear_dirty_issues(&dirty_ids)?;
            tracing::debug!(
                dirty = dirty_ids.len(),
                "Incremental export skipped; no serialized change"
            );
            return Ok(ExportOutcome {
                skipped: true,
                ..Default::default()
            });
        }
    }

    for record in dirty_records {
        merged.insert(record.id.clone(), record);
    }

    let records: Vec<Issue> = merged.into_values().collect();
    let result = jsonl::write_atomic(mirror_path, &records)?;
    finalize(storage, &records, &dirty_ids, &result)?;

    tracing::debug!(
        exported = result.written_ids.len(),
        dirty = dirty_ids.len(),
        "Incremental mirror export complete"
    );

    Ok(ExportOutcome {
        written_ids: result.written_ids,
        content_hash: result.content_hash,
        skipped: false,
    })
}

fn finalize(
    storage: &mut SqliteStorage,
    records: &[Issue],
    dirty_ids: &[String],
    result: &jsonl::WriteResult,
) -> Result<()> {
    // Clear dirty flags only for IDs that actually reached the mirror (or
    // that the store no longer has, which the write implicitly flushed).
    let written: std::collections::HashSet<&str> =
        result.written_ids.iter().map(String::as_str).collect();
    let clear: Vec<String> = dirty_ids
        .iter()
        .filter(|id| written.contains(id.as_str()) || !records.iter().any(|r| &r.id == *id))
        .cloned()
        .collect();
    storage.clear_dirty_issues(&clear)?;

    let mut export_hashes = Vec::with_capacity(records.len());
    for record in records {
        export_hashes.push((
            record.id.clone(),
            sha256_hex(jsonl::canonical_line(record)?.as_bytes()),
        ));
    }
    storage.set_export_hashes(&export_hashes)?;

    storage.set_metadata(METADATA_LAST_IMPORT_HASH, &result.content_hash)?;
    storage.set_jsonl_file_hash(&result.content_hash)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyType, Issue};
    use tempfile::TempDir;

    fn setup() -> (SqliteStorage, TempDir, std::path::PathBuf) {
        let storage = SqliteStorage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("issues.jsonl");
        (storage, temp, mirror)
    }

    #[test]
    fn test_full_export_writes_sorted_mirror_and_clears_dirty() {
        let (mut storage, _temp, mirror) = setup();
        storage.create_issue(&Issue::new("bd-2", "B"), "t").unwrap();
        storage.create_issue(&Issue::new("bd-1", "A"), "t").unwrap();

        let outcome = export_full(&mut storage, &mirror).unwrap();
        assert_eq!(outcome.written_ids, vec!["bd-1", "bd-2"]);
        assert!(storage.get_dirty_issue_ids().unwrap().is_empty());
        assert_eq!(
            storage.get_jsonl_file_hash().unwrap().unwrap(),
            outcome.content_hash
        );
        assert_eq!(
            storage
                .get_metadata(METADATA_LAST_IMPORT_HASH)
                .unwrap()
                .unwrap(),
            outcome.content_hash
        );
    }

    #[test]
    fn test_full_export_embeds_relations() {
        let (mut storage, _temp, mirror) = setup();
        storage.create_issue(&Issue::new("bd-1", "A"), "t").unwrap();
        storage.create_issue(&Issue::new("bd-2", "B"), "t").unwrap();
        storage
            .add_dependency("bd-2", "bd-1", &DependencyType::Blocks, "t")
            .unwrap();
        storage.add_label("bd-2", "infra", "t").unwrap();
        storage.add_comment("bd-2", "t", "note").unwrap();

        export_full(&mut storage, &mirror).unwrap();

        let loaded = jsonl::read_issues(&mirror).unwrap();
        let b = loaded.iter().find(|i| i.id == "bd-2").unwrap();
        assert_eq!(b.dependencies.len(), 1);
        assert_eq!(b.labels, vec!["infra"]);
        assert_eq!(b.comments.len(), 1);
    }

    #[test]
    fn test_incremental_no_dirty_is_noop() {
        let (mut storage, _temp, mirror) = setup();
        let outcome = export_incremental(&mut storage, &mirror).unwrap();
        assert!(outcome.skipped);
        assert!(!mirror.exists());
    }

    #[test]
    fn test_incremental_merges_over_existing_mirror() {
        let (mut storage, _temp, mirror) = setup();
        storage.create_issue(&Issue::new("bd-1", "A"), "t").unwrap();
        storage.create_issue(&Issue::new("bd-2", "B"), "t").unwrap();
        export_full(&mut storage, &mirror).unwrap();

        // Only bd-2 changes; bd-1's line must survive untouched.
        storage
            .update_issue(
                "bd-2",
                &crate::storage::IssueUpdate {
                    title: Some("B renamed".to_string()),
                    ..Default::default()
                },
                "t",
            )
            .unwrap();

        let outcome = export_incremental(&mut storage, &mirror).unwrap();
        assert!(!outcome.skipped);
        assert_eq!(outcome.written_ids, vec!["bd-1", "bd-2"]);

        let loaded = jsonl::read_issues(&mirror).unwrap();
        assert_eq!(
            loaded.iter().find(|i| i.id == "bd-2").unwrap().title,
            "B renamed"
        );
    }

    #[test]
    fn test_incremental_omits_deleted_records() {
        let (mut storage, _temp, mirror) = setup();
        storage.create_issue(&Issue::new("bd-1", "A"), "t").unwrap();
        storage.create_issue(&Issue::new("bd-2", "B"), "t").unwrap();
        export_full(&mut storage, &mirror).unwrap();

        storage.delete_issue("bd-2", "pruner").unwrap();
        storage.mark_issue_dirty("bd-1").unwrap();

        export_incremental(&mut storage, &mirror).unwrap();
        assert_eq!(jsonl::read_ids(&mirror).unwrap(), vec!["bd-1"]);
    }

    #[test]
    fn test_incremental_skips_when_nothing_would_change() {
        let (mut storage, _temp, mirror) = setup();
        storage.create_issue(&Issue::new("bd-1", "A"), "t").unwrap();
        export_full(&mut storage, &mirror).unwrap();
        let before = std::fs::metadata(&mirror).unwrap().modified().unwrap();

        // Dirty mark without a serialized change
        storage.mark_issue_dirty("bd-1").unwrap();
        let outcome = export_incremental(&mut storage, &mirror).unwrap();
        assert!(outcome.skipped);
        assert!(storage.get_dirty_issue_ids().unwrap().is_empty());
        assert_eq!(
            std::fs::metadata(&mirror).unwrap().modified().unwrap(),
            before
        );
    }
}
