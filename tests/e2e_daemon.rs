//! Daemon lifecycle end-to-end: start, health over RPC, stop.

mod common;

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use common::{bd, fixed_issue, git_init};

use beads::daemon::DaemonClient;
use beads::jsonl;
use beads::storage::SqliteStorage;
use serde_json::json;
use tempfile::TempDir;

fn wait_for<F: FnMut() -> bool>(what: &str, timeout: Duration, mut f: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn daemon_serves_health_and_mutations_then_stops() {
    let temp = TempDir::new().unwrap();
    git_init(temp.path());
    bd(temp.path()).args(["init", "--prefix", "t"]).assert().success();

    let bin = assert_cmd::cargo::cargo_bin("bd");
    let mut child = Command::new(bin)
        .args(["daemon"])
        .current_dir(temp.path())
        .env("BEADS_ACTOR", "daemon-test")
        .env("BEADS_FLUSH_DEBOUNCE", "200ms")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let socket = temp.path().join(".beads/bd.sock");
    wait_for("daemon socket", Duration::from_secs(10), || socket.exists());

    // Health over RPC
    let mut client = DaemonClient::new(&socket);
    wait_for("daemon health", Duration::from_secs(5), || {
        client.health().is_ok()
    });
    let health = client.health().unwrap();
    assert_eq!(health.status, "ok");
    assert!(health.compatible);
    assert_eq!(health.version, beads::BD_VERSION);

    // Mutations through the daemon reach the store and, after the
    // debounce, the mirror
    let issue = fixed_issue("t-1", "Created via RPC");
    client
        .call("create-issue", serde_json::to_value(&issue).unwrap())
        .unwrap();

    let fetched = client.call("get-issue", json!({"id": "t-1"})).unwrap();
    assert_eq!(fetched["title"], "Created via RPC");

    let mirror = temp.path().join(".beads/issues.jsonl");
    wait_for("debounced flush", Duration::from_secs(10), || {
        jsonl::read_ids(&mirror).map(|ids| ids == vec!["t-1"]).unwrap_or(false)
    });

    // Status shows the lock holder
    bd(temp.path())
        .args(["daemon", "--status"])
        .assert()
        .success()
        .stdout(predicates::str::contains("daemon running"));

    // Graceful stop
    bd(temp.path()).args(["daemon", "--stop"]).assert().success();
    wait_for("daemon exit", Duration::from_secs(10), || {
        matches!(child.try_wait(), Ok(Some(_)))
    });

    // The store is consistent after shutdown
    let storage = SqliteStorage::open(&temp.path().join(".beads/beads.db")).unwrap();
    assert!(storage.get_issue("t-1").unwrap().is_some());
    assert!(storage.get_dirty_issue_ids().unwrap().is_empty());
}

#[test]
fn second_daemon_refuses_to_start() {
    let temp = TempDir::new().unwrap();
    bd(temp.path()).args(["init", "--prefix", "t"]).assert().success();

    let bin = assert_cmd::cargo::cargo_bin("bd");
    let mut child = Command::new(&bin)
        .args(["daemon"])
        .current_dir(temp.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let socket = temp.path().join(".beads/bd.sock");
    wait_for("daemon socket", Duration::from_secs(10), || socket.exists());

    // A second daemon on the same workspace exits with guidance
    bd(temp.path())
        .args(["daemon"])
        .timeout(Duration::from_secs(20))
        .assert()
        .failure()
        .stderr(predicates::str::contains("already running"));

    bd(temp.path()).args(["daemon", "--stop"]).assert().success();
    wait_for("daemon exit", Duration::from_secs(10), || {
        matches!(child.try_wait(), Ok(Some(_)))
    });
}
