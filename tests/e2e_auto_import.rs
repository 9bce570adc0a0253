//! End-to-end auto-import scenarios: hash gating, marker aborts, and
//! collision remapping with cross-reference rewrites.

mod common;

use common::{fixed_issue, init_workspace};

use beads::jsonl;
use beads::model::{Dependency, DependencyType};
use beads::storage::{METADATA_LAST_IMPORT_HASH, SqliteStorage};
use beads::sync::{AutoImportOutcome, auto_import, export_full};

#[test]
fn auto_import_is_noop_for_self_written_mirror() {
    let (_temp, beads_dir) = init_workspace("t");
    let mirror = beads_dir.join("issues.jsonl");
    let mut storage = SqliteStorage::open(&beads_dir.join("beads.db")).unwrap();

    storage.create_issue(&fixed_issue("t-1", "One"), "t").unwrap();
    export_full(&mut storage, &mirror).unwrap();

    // Rewrite the mirror to the byte-identical serialization the engine
    // itself just produced
    let records = jsonl::read_issues(&mirror).unwrap();
    jsonl::write_atomic(&mirror, &records).unwrap();

    let outcome = auto_import(&mut storage, &mirror, None).unwrap();
    assert!(matches!(outcome, AutoImportOutcome::UpToDate));
    assert!(storage.get_dirty_issue_ids().unwrap().is_empty());
}

#[test]
fn auto_import_picks_up_external_edits() {
    let (_temp, beads_dir) = init_workspace("t");
    let mirror = beads_dir.join("issues.jsonl");
    let mut storage = SqliteStorage::open(&beads_dir.join("beads.db")).unwrap();

    storage.create_issue(&fixed_issue("t-1", "One"), "t").unwrap();
    export_full(&mut storage, &mirror).unwrap();

    // A collaborator edited the title (same lineage, same created_at)
    let mut records = jsonl::read_issues(&mirror).unwrap();
    records[0].title = "One, edited remotely".to_string();
    records[0].updated_at = records[0].updated_at + chrono::Duration::minutes(1);
    jsonl::write_atomic(&mirror, &records).unwrap();

    let outcome = auto_import(&mut storage, &mirror, None).unwrap();
    let AutoImportOutcome::Imported(report) = outcome else {
        panic!("expected an import");
    };
    assert_eq!(report.updated, 1);
    assert_eq!(
        storage.get_issue("t-1").unwrap().unwrap().title,
        "One, edited remotely"
    );
    // The gate is now set to the imported content
    assert_eq!(
        storage.get_metadata(METADATA_LAST_IMPORT_HASH).unwrap(),
        Some(jsonl::hash_file(&mirror).unwrap())
    );
}

#[test]
fn merge_marker_aborts_without_store_mutation() {
    let (_temp, beads_dir) = init_workspace("t");
    let mirror = beads_dir.join("issues.jsonl");
    let mut storage = SqliteStorage::open(&beads_dir.join("beads.db")).unwrap();

    let line_a = jsonl::canonical_line(&fixed_issue("t-1", "A")).unwrap();
    let line_b = jsonl::canonical_line(&fixed_issue("t-2", "B")).unwrap();
    std::fs::write(&mirror, format!("{line_a}\n=======\n{line_b}\n")).unwrap();

    let err = auto_import(&mut storage, &mirror, None).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("issues.jsonl"));

    // Two resolution paths offered
    let hint = err.suggestion().unwrap();
    assert!(hint.contains("1."));
    assert!(hint.contains("2."));

    assert_eq!(storage.count_issues().unwrap(), 0);
    assert!(storage.get_dirty_issue_ids().unwrap().is_empty());
}

#[test]
fn collision_remap_preserves_cross_references_through_reexport() {
    let (_temp, beads_dir) = init_workspace("t");
    let mirror = beads_dir.join("issues.jsonl");
    let mut storage = SqliteStorage::open(&beads_dir.join("beads.db")).unwrap();

    // Local record under t-1 with a different lineage than the incoming one
    let mut mine = fixed_issue("t-1", "Mine");
    mine.created_at = mine.created_at - chrono::Duration::days(7);
    mine.updated_at = mine.created_at;
    storage.create_issue(&mine, "t").unwrap();
    storage.clear_dirty_issues(&["t-1".to_string()]).unwrap();

    // Incoming mirror: foreign t-1 plus a record blocked by it
    let theirs = fixed_issue("t-1", "Theirs");
    let mut blocked = fixed_issue("t-2", "Blocked by theirs");
    blocked.dependencies = vec![Dependency {
        issue_id: "t-2".to_string(),
        depends_on_id: "t-1".to_string(),
        dep_type: DependencyType::Blocks,
        created_at: blocked.created_at,
        created_by: None,
    }];
    jsonl::write_atomic(&mirror, &[theirs, blocked]).unwrap();

    let outcome = auto_import(&mut storage, &mirror, None).unwrap();
    let AutoImportOutcome::Imported(report) = outcome else {
        panic!("expected an import");
    };
    assert_eq!(report.remapped.len(), 1);
    let (old, new) = report.remapped[0].clone();
    assert_eq!(old, "t-1");
    assert!(new.starts_with("t-"));

    // Both records live with referential integrity intact
    assert_eq!(storage.get_issue("t-1").unwrap().unwrap().title, "Mine");
    assert_eq!(storage.get_issue(&new).unwrap().unwrap().title, "Theirs");
    let deps = storage.get_dependency_records("t-2").unwrap();
    assert_eq!(deps[0].depends_on_id, new);

    // A subsequent full export reflects the remap in the mirror
    export_full(&mut storage, &mirror).unwrap();
    let ids = jsonl::read_ids(&mirror).unwrap();
    assert!(ids.contains(&"t-1".to_string()));
    assert!(ids.contains(&new));
    assert!(ids.contains(&"t-2".to_string()));
    let reloaded = jsonl::read_issues(&mirror).unwrap();
    let blocked = reloaded.iter().find(|i| i.id == "t-2").unwrap();
    assert_eq!(blocked.dependencies[0].depends_on_id, new);
}
