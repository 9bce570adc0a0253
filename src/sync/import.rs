//! Hash-gated auto-import and the collision-tolerant core import.
//!
//! The auto-importer runs on every store open (unless disabled). It is
//! gated on the mirror's SHA-256 against `last_import_hash`, scans for git
//! conflict markers on raw lines before any JSON decoding, and replays the
//! mirror into the store. Incoming IDs that collide with a different
//! content lineage are remapped to `<prefix>-<content-hash-suffix>` IDs
//! with cross-references rewritten.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::Utc;

use crate::error::{BeadsError, Result};
use crate::jsonl;
use crate::model::Issue;
use crate::storage::{
    METADATA_LAST_IMPORT_HASH, METADATA_LAST_IMPORT_TIME, SqliteStorage,
};
use crate::sync::flush::FlushController;
use crate::util::progress::Progress;
use crate::util::{collision_remap_id, content_hash, parse_id, validate_prefix};
use crate::util::time::to_rfc3339;
use crate::validation::IssueValidator;

/// Issues applied per transaction during import. A poison record aborts
/// only its batch; earlier batches stay committed.
const IMPORT_BATCH_SIZE: usize = 100;

/// Kind of git conflict marker found in the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictMarkerKind {
    Start,
    Separator,
    End,
}

/// A detected merge conflict marker within the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    pub line: usize,
    pub kind: ConflictMarkerKind,
}

/// Scan a file for git merge conflict markers.
///
/// Operates on raw bytes line-by-line, before any JSON decoding, and only
/// matches whole lines (exactly `=======` after trimming, or lines starting
/// with `<<<<<<< ` / `>>>>>>> `), so JSON-escaped occurrences inside a
/// field are never false positives.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn scan_conflict_markers(path: &Path) -> Result<Vec<ConflictMarker>> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(jsonl::READ_BUFFER_SIZE, file);
    let mut markers = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);

        let kind = if line.trim() == "=======" {
            Some(ConflictMarkerKind::Separator)
        } else if line.starts_with("<<<<<<< ") {
            Some(ConflictMarkerKind::Start)
        } else if line.starts_with(">>>>>>> ") {
            Some(ConflictMarkerKind::End)
        } else {
            None
        };

        if let Some(kind) = kind {
            markers.push(ConflictMarker { line: line_no, kind });
        }
    }

    Ok(markers)
}

/// Fail with a two-path resolution block if the mirror holds conflict markers.
///
/// # Errors
///
/// Returns `ConflictMarkers` naming the path and marker count.
pub fn ensure_no_conflict_markers(path: &Path) -> Result<()> {
    let markers = scan_conflict_markers(path)?;
    if markers.is_empty() {
        return Ok(());
    }
    Err(BeadsError::ConflictMarkers {
        path: path.to_path_buf(),
        count: markers.len(),
    })
}

/// Options for the core import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Report what would happen without touching the store.
    pub dry_run: bool,
    /// Expected issue prefix; `None` skips prefix validation entirely.
    pub expected_prefix: Option<String>,
    /// Tolerate foreign prefixes instead of failing (auto-import default).
    pub lenient_prefix: bool,
    /// Rewrite foreign-prefix IDs to the expected prefix.
    pub rename_on_import: bool,
}

/// Result of a core import.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Old ID -> new ID remappings applied for collisions and renames.
    pub remapped: Vec<(String, String)>,
}

impl ImportReport {
    /// True when the store was changed at all.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.created > 0 || self.updated > 0 || !self.remapped.is_empty()
    }
}

/// Outcome of an auto-import attempt.
#[derive(Debug)]
pub enum AutoImportOutcome {
    /// No mirror on disk; nothing to import.
    NoMirror,
    /// Mirror hash equals `last_import_hash`; no-op.
    UpToDate,
    /// The mirror was imported.
    Imported(ImportReport),
}

/// Replay the mirror into the store if its content hash is new.
///
/// Called on every store open unless disabled by configuration. After a
/// successful import, a full flush is scheduled when IDs were remapped
/// (cross-references may have moved) and an incremental flush when records
/// merely changed.
///
/// # Errors
///
/// Returns an error on conflict markers, parse failures (store unchanged),
/// or database failures.
pub fn auto_import(
    storage: &mut SqliteStorage,
    mirror_path: &Path,
    flush: Option<&FlushController>,
) -> Result<AutoImportOutcome> {
    if !mirror_path.exists() {
        return Ok(AutoImportOutcome::NoMirror);
    }

    let file_hash = jsonl::hash_file(mirror_path)?;
    if storage.get_metadata(METADATA_LAST_IMPORT_HASH)?.as_deref() == Some(file_hash.as_str()) {
        tracing::debug!("Auto-import: mirror unchanged, skipping");
        return Ok(AutoImportOutcome::UpToDate);
    }

    ensure_no_conflict_markers(mirror_path)?;

    // Parse everything up front; a poison line aborts with the store untouched.
    let spinner = Progress::spinner("Reading mirror");
    let records = jsonl::read_issues(mirror_path)?;
    spinner.done("mirror read");

    // Import invalidates any cached emitter state.
    storage.clear_all_export_hashes()?;

    let prefix = storage.get_config("issue_prefix")?;
    let report = import_records(
        storage,
        records,
        &ImportOptions {
            dry_run: false,
            expected_prefix: prefix,
            lenient_prefix: true,
            rename_on_import: false,
        },
    )?;

    if let Some(flush) = flush {
        if !report.remapped.is_empty() {
            flush.mark_dirty_full_export();
        } else if report.changed() {
            flush.mark_dirty();
        }
    }

    if let Err(e) = storage.set_metadata(METADATA_LAST_IMPORT_HASH, &file_hash) {
        tracing::warn!(error = %e, "Failed to persist import hash; auto-import will retry on next invocation");
    } else {
        storage.set_metadata(METADATA_LAST_IMPORT_TIME, &to_rfc3339(Utc::now()))?;
    }

    tracing::info!(
        created = report.created,
        updated = report.updated,
        skipped = report.skipped,
        remapped = report.remapped.len(),
        "Auto-import complete"
    );

    Ok(AutoImportOutcome::Imported(report))
}

/// Normalize an incoming record: recompute the content hash and repair the
/// closed-status invariant client-side.
fn normalize_issue(issue: &mut Issue) {
    if issue.status.is_closed() && issue.closed_at.is_none() {
        issue.closed_at = Some(Utc::now());
    }
    if !issue.status.is_closed() {
        issue.closed_at = None;
    }
    issue.content_hash = Some(content_hash(issue));
}

/// What the scan phase decided for one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportAction {
    Insert,
    Update,
    Skip,
}

/// Core import: upsert incoming records, remapping colliding IDs.
///
/// For each incoming ID: an existing record with identical content is
/// skipped; identical lineage (same `created_at`) with different content is
/// updated; a different lineage is a collision and the incoming record is
/// remapped to a fresh `<prefix>-<content-hash-suffix>` ID. Remappings are
/// applied to every cross-reference in the batch before anything executes.
///
/// # Errors
///
/// Returns an error on validation failure or database failure. Batches are
/// transactional: a poison record aborts its own batch with context, while
/// earlier batches remain applied.
#[allow(clippy::too_many_lines)]
pub fn import_records(
    storage: &mut SqliteStorage,
    mut records: Vec<Issue>,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for record in &mut records {
        normalize_issue(record);
    }

    for record in &records {
        if let Err(findings) = IssueValidator::validate(record) {
            let details = findings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(BeadsError::validation(
                "import",
                format!("issue {}: {details}", record.id),
            ));
        }
    }

    // Prefix validation
    if let Some(ref expected) = options.expected_prefix {
        if !options.lenient_prefix && !options.rename_on_import {
            for record in &records {
                validate_prefix(&record.id, expected, &[])?;
            }
        }
    }

    // Phase 1: scan and resolve IDs
    let mut renames: HashMap<String, String> = HashMap::new();
    let mut actions: Vec<(Issue, ImportAction)> = Vec::with_capacity(records.len());
    let mut batch_ids: HashSet<String> = HashSet::new();

    let scan_progress = Progress::records(records.len() as u64, "Scanning records");
    for mut record in records {
        // Foreign-prefix rename (explicit opt-in)
        if options.rename_on_import {
            if let Some(ref expected) = options.expected_prefix {
                if validate_prefix(&record.id, expected, &[]).is_err() {
                    let hash = record.content_hash.clone().unwrap_or_default();
                    let fresh = collision_remap_id(expected, &hash, |candidate| {
                        storage.id_exists(candidate).unwrap_or(false)
                            || batch_ids.contains(candidate)
                    });
                    renames.insert(record.id.clone(), fresh.clone());
                    record.id = fresh;
                }
            }
        }

        let action = match storage.get_issue(&record.id)? {
            None => {
                if batch_ids.contains(&record.id) {
                    // Same ID twice within one mirror: second occurrence is
                    // a foreign record that must be remapped.
                    remap_collision(storage, &mut record, &batch_ids, &mut renames);
                }
                ImportAction::Insert
            }
            Some(existing) => {
                if existing.content_hash == record.content_hash {
                    ImportAction::Skip
                } else if existing.created_at == record.created_at {
                    // Same lineage, new content: field-merge policy is
                    // delegated to the store's upsert (last write wins).
                    ImportAction::Update
                } else {
                    remap_collision(storage, &mut record, &batch_ids, &mut renames);
                    ImportAction::Insert
                }
            }
        };

        batch_ids.insert(record.id.clone());
        actions.push((record, action));
        scan_progress.tick();
    }
    scan_progress.done("scan complete");

    // Phase 2: rewrite cross-references for remapped IDs
    if !renames.is_empty() {
        for (record, _) in &mut actions {
            for dep in &mut record.dependencies {
                if let Some(new_target) = renames.get(&dep.depends_on_id) {
                    dep.depends_on_id.clone_from(new_target);
                }
                if let Some(new_source) = renames.get(&dep.issue_id) {
                    dep.issue_id.clone_from(new_source);
                }
            }
            for comment in &mut record.comments {
                if let Some(new_id) = renames.get(&comment.issue_id) {
                    comment.issue_id.clone_from(new_id);
                }
            }
        }
        for (old, new) in &renames {
            report.remapped.push((old.clone(), new.clone()));
        }
        report.remapped.sort();
    }

    if options.dry_run {
        for (_, action) in &actions {
            match action {
                ImportAction::Insert => report.created += 1,
                ImportAction::Update => report.updated += 1,
                ImportAction::Skip => report.skipped += 1,
            }
        }
        return Ok(report);
    }

    // Phase 3: execute in transactional batches
    let apply_progress = Progress::records(actions.len() as u64, "Applying records");
    for (batch_no, batch) in actions.chunks(IMPORT_BATCH_SIZE).enumerate() {
        let applied = storage.mutate("import_batch", "import", |tx, _ctx| {
            let mut applied = Vec::new();
            for (record, action) in batch {
                if *action == ImportAction::Skip {
                    continue;
                }
                upsert_in_tx(tx, record).map_err(|e| {
                    BeadsError::validation(
                        "import",
                        format!(
                            "batch {} aborted at issue {}: {e}",
                            batch_no + 1,
                            record.id
                        ),
                    )
                })?;
                applied.push(record.id.clone());
            }
            Ok(applied)
        })?;

        for (record, action) in batch {
            match action {
                ImportAction::Insert => report.created += 1,
                ImportAction::Update => report.updated += 1,
                ImportAction::Skip => report.skipped += 1,
            }
            // Imported content now differs from what the mirror may hold
            // (repairs, remaps), so mark applied records for the next flush.
            if applied.contains(&record.id) {
                storage.mark_issue_dirty(&record.id)?;
            }
            apply_progress.tick();
        }
    }
    apply_progress.done("import complete");

    Ok(report)
}

fn remap_collision(
    storage: &SqliteStorage,
    record: &mut Issue,
    batch_ids: &HashSet<String>,
    renames: &mut HashMap<String, String>,
) {
    let prefix = parse_id(&record.id)
        .map(|p| p.prefix)
        .unwrap_or_else(|_| "bd".to_string());
    let hash = record.content_hash.clone().unwrap_or_default();
    let fresh = collision_remap_id(&prefix, &hash, |candidate| {
        storage.id_exists(candidate).unwrap_or(false) || batch_ids.contains(candidate)
    });
    tracing::debug!(old = %record.id, new = %fresh, "Import collision remapped");
    renames.insert(record.id.clone(), fresh.clone());
    record.id = fresh;
}

fn upsert_in_tx(tx: &rusqlite::Transaction<'_>, issue: &Issue) -> Result<()> {
    tx.execute(
        "INSERT OR REPLACE INTO issues (
            id, content_hash, title, description, design, acceptance_criteria, notes,
            status, priority, issue_type, assignee, external_ref, source_repo,
            created_at, created_by, updated_at, closed_at,
            compaction_level, original_size, compacted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            issue.id,
            issue.content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            issue.priority.0,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.external_ref,
            issue.source_repo,
            to_rfc3339(issue.created_at),
            issue.created_by,
            to_rfc3339(issue.updated_at),
            issue.closed_at.map(to_rfc3339),
            issue.compaction_level,
            issue.original_size,
            issue.compacted_at.map(to_rfc3339),
        ],
    )?;

    tx.execute("DELETE FROM labels WHERE issue_id = ?", [&issue.id])?;
    for label in &issue.labels {
        tx.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
            rusqlite::params![issue.id, label],
        )?;
    }

    tx.execute("DELETE FROM dependencies WHERE issue_id = ?", [&issue.id])?;
    for dep in &issue.dependencies {
        tx.execute(
            "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
             VALUES (?, ?, ?, ?, ?)",
            rusqlite::params![
                issue.id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                to_rfc3339(dep.created_at),
                dep.created_by.as_deref().unwrap_or("import"),
            ],
        )?;
    }

    tx.execute("DELETE FROM comments WHERE issue_id = ?", [&issue.id])?;
    for comment in &issue.comments {
        tx.execute(
            "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
            rusqlite::params![
                issue.id,
                comment.author,
                comment.body,
                to_rfc3339(comment.created_at)
            ],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependency, DependencyType, Status};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn fixed_issue(id: &str, title: &str) -> Issue {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut issue = Issue::new(id, title);
        issue.created_at = at;
        issue.updated_at = at;
        issue
    }

    #[test]
    fn test_marker_scan_detects_whole_lines_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        // An escaped ======= inside a JSON string must not trip the scan
        std::fs::write(
            &path,
            "{\"id\":\"a-1\",\"title\":\"has ======= inside\"}\n=======\n<<<<<<< HEAD\n>>>>>>> theirs\n",
        )
        .unwrap();

        let markers = scan_conflict_markers(&path).unwrap();
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0].line, 2);
        assert_eq!(markers[0].kind, ConflictMarkerKind::Separator);
        assert_eq!(markers[1].kind, ConflictMarkerKind::Start);
        assert_eq!(markers[2].kind, ConflictMarkerKind::End);
    }

    #[test]
    fn test_auto_import_no_mirror() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let outcome =
            auto_import(&mut storage, &temp.path().join("issues.jsonl"), None).unwrap();
        assert!(matches!(outcome, AutoImportOutcome::NoMirror));
    }

    #[test]
    fn test_auto_import_hash_gate() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("issues.jsonl");
        jsonl::write_atomic(&mirror, &[fixed_issue("bd-1", "A")]).unwrap();

        let hash = jsonl::hash_file(&mirror).unwrap();
        storage
            .set_metadata(METADATA_LAST_IMPORT_HASH, &hash)
            .unwrap();

        let outcome = auto_import(&mut storage, &mirror, None).unwrap();
        assert!(matches!(outcome, AutoImportOutcome::UpToDate));
        assert_eq!(storage.count_issues().unwrap(), 0);
        assert!(storage.get_dirty_issue_ids().unwrap().is_empty());
    }

    #[test]
    fn test_auto_import_aborts_on_conflict_markers() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("issues.jsonl");
        let line = jsonl::canonical_line(&fixed_issue("bd-1", "A")).unwrap();
        std::fs::write(&mirror, format!("{line}\n=======\n{line}\n")).unwrap();

        let err = auto_import(&mut storage, &mirror, None).unwrap_err();
        assert!(matches!(err, BeadsError::ConflictMarkers { .. }));
        assert_eq!(storage.count_issues().unwrap(), 0);
    }

    #[test]
    fn test_auto_import_parse_error_leaves_store_unchanged() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("issues.jsonl");
        let line = jsonl::canonical_line(&fixed_issue("bd-1", "A")).unwrap();
        std::fs::write(&mirror, format!("{line}\n{{broken\n")).unwrap();

        let err = auto_import(&mut storage, &mirror, None).unwrap_err();
        assert!(matches!(err, BeadsError::JsonlParse { line: 2, .. }));
        assert_eq!(storage.count_issues().unwrap(), 0);
    }

    #[test]
    fn test_auto_import_creates_and_repairs_invariant() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("issues.jsonl");

        let mut closed = fixed_issue("bd-1", "Closed without stamp");
        closed.status = Status::Closed;
        // Serialize with the invariant violated (no closed_at)
        let line = serde_json::to_string(&closed).unwrap();
        std::fs::write(&mirror, format!("{line}\n")).unwrap();

        let outcome = auto_import(&mut storage, &mirror, None).unwrap();
        let AutoImportOutcome::Imported(report) = outcome else {
            panic!("expected import");
        };
        assert_eq!(report.created, 1);

        let loaded = storage.get_issue("bd-1").unwrap().unwrap();
        assert!(loaded.closed_at.is_some());
        assert_eq!(
            storage.get_metadata(METADATA_LAST_IMPORT_HASH).unwrap(),
            Some(jsonl::hash_file(&mirror).unwrap())
        );
        assert!(storage
            .get_metadata(METADATA_LAST_IMPORT_TIME)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_import_skips_identical_content() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let issue = fixed_issue("bd-1", "Same");
        storage.create_issue(&issue, "t").unwrap();

        let report = import_records(&mut storage, vec![issue], &ImportOptions::default()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created + report.updated, 0);
    }

    #[test]
    fn test_import_updates_same_lineage() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let issue = fixed_issue("bd-1", "Original");
        storage.create_issue(&issue, "t").unwrap();
        storage.clear_dirty_issues(&["bd-1".to_string()]).unwrap();

        let mut incoming = issue.clone();
        incoming.title = "Edited elsewhere".to_string();
        incoming.updated_at = incoming.updated_at + Duration::minutes(5);

        let report =
            import_records(&mut storage, vec![incoming], &ImportOptions::default()).unwrap();
        assert_eq!(report.updated, 1);
        assert!(report.remapped.is_empty());
        assert_eq!(
            storage.get_issue("bd-1").unwrap().unwrap().title,
            "Edited elsewhere"
        );
        assert_eq!(storage.get_dirty_issue_ids().unwrap(), vec!["bd-1"]);
    }

    #[test]
    fn test_import_collision_remaps_and_preserves_references() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        // Existing record with a different lineage under the same ID
        let mut existing = fixed_issue("bd-1", "Mine");
        existing.created_at = existing.created_at - Duration::days(10);
        existing.updated_at = existing.created_at;
        storage.create_issue(&existing, "t").unwrap();

        let incoming = fixed_issue("bd-1", "Theirs");
        let mut blocker = fixed_issue("bd-2", "Blocked by theirs");
        blocker.dependencies = vec![Dependency {
            issue_id: "bd-2".to_string(),
            depends_on_id: "bd-1".to_string(),
            dep_type: DependencyType::Blocks,
            created_at: incoming.created_at,
            created_by: None,
        }];

        let report = import_records(
            &mut storage,
            vec![incoming, blocker],
            &ImportOptions::default(),
        )
        .unwrap();

        assert_eq!(report.remapped.len(), 1);
        let (old, new) = &report.remapped[0];
        assert_eq!(old, "bd-1");
        assert!(new.starts_with("bd-"));
        assert_ne!(new, "bd-1");

        // The original local record is untouched
        assert_eq!(storage.get_issue("bd-1").unwrap().unwrap().title, "Mine");
        // The remapped record exists
        assert_eq!(storage.get_issue(new).unwrap().unwrap().title, "Theirs");
        // The cross-reference now points at the remapped ID
        let deps = storage.get_dependency_records("bd-2").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(&deps[0].depends_on_id, new);
    }

    #[test]
    fn test_import_dry_run_touches_nothing() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let report = import_records(
            &mut storage,
            vec![fixed_issue("bd-1", "A")],
            &ImportOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(storage.count_issues().unwrap(), 0);
    }

    #[test]
    fn test_import_strict_prefix_rejects_foreign() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let err = import_records(
            &mut storage,
            vec![fixed_issue("xx-1", "Foreign")],
            &ImportOptions {
                expected_prefix: Some("bd".to_string()),
                lenient_prefix: false,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, BeadsError::PrefixMismatch { .. }));
    }

    #[test]
    fn test_import_rename_on_import_rewrites_prefix() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let report = import_records(
            &mut storage,
            vec![fixed_issue("xx-1", "Foreign")],
            &ImportOptions {
                expected_prefix: Some("bd".to_string()),
                lenient_prefix: false,
                rename_on_import: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(report.remapped.len(), 1);
        assert!(report.remapped[0].1.starts_with("bd-"));
    }
}
