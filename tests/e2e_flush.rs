//! End-to-end flush pipeline scenarios against a file-backed workspace.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fixed_issue, init_workspace};

use beads::jsonl;
use beads::storage::SqliteStorage;
use beads::sync::{FlushController, shared_store};

#[test]
fn debounced_flush_coalesces_bursts() {
    let (_temp, beads_dir) = init_workspace("t");
    let mirror = beads_dir.join("issues.jsonl");

    let store = shared_store(SqliteStorage::open(&beads_dir.join("beads.db")).unwrap());
    let controller = FlushController::new(
        Arc::clone(&store),
        &mirror,
        Duration::from_millis(400),
        true,
    );

    // Five creations inside the debounce window
    for i in 1..=5 {
        store
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .create_issue(&fixed_issue(&format!("t-{i}"), &format!("Issue {i}")), "t")
            .unwrap();
        controller.mark_dirty();
        std::thread::sleep(Duration::from_millis(40));
    }

    // Wait well past the quiet interval
    std::thread::sleep(Duration::from_millis(1500));

    // Exactly one flush, five lines in ID order
    assert_eq!(controller.completed_flushes(), 1);
    let ids = jsonl::read_ids(&mirror).unwrap();
    assert_eq!(ids, vec!["t-1", "t-2", "t-3", "t-4", "t-5"]);

    // No intermediate temp file remains
    let leftovers: Vec<_> = std::fs::read_dir(&beads_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty(), "stale temp files: {leftovers:?}");

    controller.shutdown();
}

#[test]
fn integrity_mismatch_triggers_full_export() {
    let (_temp, beads_dir) = init_workspace("t");
    let mirror = beads_dir.join("issues.jsonl");

    let store = shared_store(SqliteStorage::open(&beads_dir.join("beads.db")).unwrap());
    let controller =
        FlushController::new(Arc::clone(&store), &mirror, Duration::from_secs(60), true);

    for i in 1..=3 {
        store
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .create_issue(&fixed_issue(&format!("t-{i}"), &format!("Issue {i}")), "t")
            .unwrap();
    }
    controller.flush().unwrap();
    let clean_hash = {
        let guard = store.lock().unwrap();
        guard.as_ref().unwrap().get_jsonl_file_hash().unwrap().unwrap()
    };

    // Corrupt the mirror by truncating the last line
    let content = std::fs::read_to_string(&mirror).unwrap();
    std::fs::write(&mirror, &content[..content.len() - 20]).unwrap();
    assert_ne!(jsonl::hash_file(&mirror).unwrap(), clean_hash);

    controller.flush().unwrap();

    // Full 3-record set restored and the integrity baseline updated
    let ids = jsonl::read_ids(&mirror).unwrap();
    assert_eq!(ids, vec!["t-1", "t-2", "t-3"]);
    let guard = store.lock().unwrap();
    let storage = guard.as_ref().unwrap();
    assert_eq!(
        storage.get_jsonl_file_hash().unwrap().unwrap(),
        jsonl::hash_file(&mirror).unwrap()
    );
    drop(guard);

    controller.shutdown();
}

#[test]
fn deleted_record_disappears_on_next_flush() {
    let (_temp, beads_dir) = init_workspace("t");
    let mirror = beads_dir.join("issues.jsonl");

    let store = shared_store(SqliteStorage::open(&beads_dir.join("beads.db")).unwrap());
    let controller =
        FlushController::new(Arc::clone(&store), &mirror, Duration::from_secs(60), true);

    {
        let mut guard = store.lock().unwrap();
        let storage = guard.as_mut().unwrap();
        storage.create_issue(&fixed_issue("t-1", "One"), "t").unwrap();
        storage.create_issue(&fixed_issue("t-2", "Two"), "t").unwrap();
    }
    controller.flush().unwrap();

    {
        let mut guard = store.lock().unwrap();
        let storage = guard.as_mut().unwrap();
        storage.delete_issue("t-2", "admin").unwrap();
        storage.mark_issue_dirty("t-1").unwrap();
    }
    controller.flush().unwrap();

    // Any ID in the store is in the mirror; t-2 is in neither
    assert_eq!(jsonl::read_ids(&mirror).unwrap(), vec!["t-1"]);

    controller.shutdown();
}
