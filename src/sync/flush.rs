//! Debounced flush controller.
//!
//! Converts a stream of mutation notifications into at most one coalesced
//! mirror update. A single background scheduler thread owns a restartable
//! deadline; `mark_dirty` resets it, and when the quiet interval elapses
//! the flush runs. At most one flush is in flight at a time because the
//! store lock serializes them and the "capture work" step is atomic with
//! "clear dirty".
//!
//! The state mutex is held only for state snapshots; all I/O happens
//! outside it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::jsonl;
use crate::storage::SqliteStorage;
use crate::sync::export::{export_full, export_incremental};

/// Default quiet interval before a flush fires.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Consecutive-failure threshold for the escalation warning.
const FAILURE_ESCALATION: u32 = 3;

/// The store handle shared between the CLI/daemon front-end and the flush
/// controller. `None` means the process is shutting down and the store has
/// been released.
pub type SharedStore = Arc<Mutex<Option<SqliteStorage>>>;

/// Wrap a storage handle for sharing with the controller.
#[must_use]
pub fn shared_store(storage: SqliteStorage) -> SharedStore {
    Arc::new(Mutex::new(Some(storage)))
}

#[derive(Debug, Default)]
struct FlushState {
    enabled: bool,
    dirty: bool,
    needs_full_export: bool,
    failure_count: u32,
    last_error: Option<String>,
}

enum TimerEvent {
    Arm,
    Cancel,
    Shutdown,
}

struct FlushCore {
    state: Mutex<FlushState>,
    store: SharedStore,
    mirror_path: PathBuf,
    flushes: AtomicU64,
}

/// Debounced exporter driven by a monotonic dirty flag.
pub struct FlushController {
    core: Arc<FlushCore>,
    tx: mpsc::Sender<TimerEvent>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    debounce: Duration,
}

impl FlushController {
    /// Create a controller over a shared store handle.
    ///
    /// `enabled = false` disables the background timer entirely; explicit
    /// [`flush`](Self::flush) calls still work.
    #[must_use]
    pub fn new(
        store: SharedStore,
        mirror_path: &Path,
        debounce: Duration,
        enabled: bool,
    ) -> Self {
        let core = Arc::new(FlushCore {
            state: Mutex::new(FlushState {
                enabled,
                ..Default::default()
            }),
            store,
            mirror_path: mirror_path.to_path_buf(),
            flushes: AtomicU64::new(0),
        });

        let (tx, rx) = mpsc::channel();
        let worker_core = Arc::clone(&core);
        let worker = thread::Builder::new()
            .name("beads-flush".to_string())
            .spawn(move || scheduler_loop(&worker_core, &rx, debounce))
            .expect("spawn flush scheduler");

        Self {
            core,
            tx,
            worker: Mutex::new(Some(worker)),
            debounce,
        }
    }

    /// The configured quiet interval.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Record pending work and (re)arm the debounce timer.
    pub fn mark_dirty(&self) {
        {
            let mut state = self.core.state.lock().expect("flush state");
            if !state.enabled {
                return;
            }
            state.dirty = true;
        }
        let _ = self.tx.send(TimerEvent::Arm);
    }

    /// Like [`mark_dirty`](Self::mark_dirty), and force the next flush to
    /// rewrite the full mirror (ID-changing operations).
    pub fn mark_dirty_full_export(&self) {
        {
            let mut state = self.core.state.lock().expect("flush state");
            if !state.enabled {
                return;
            }
            state.dirty = true;
            state.needs_full_export = true;
        }
        let _ = self.tx.send(TimerEvent::Arm);
    }

    /// Cancel the timer and reset counters.
    pub fn clear(&self) {
        {
            let mut state = self.core.state.lock().expect("flush state");
            state.dirty = false;
            state.needs_full_export = false;
            state.failure_count = 0;
            state.last_error = None;
        }
        let _ = self.tx.send(TimerEvent::Cancel);
    }

    /// Run the flush synchronously (exit path, `sync --flush-only`, tests).
    ///
    /// # Errors
    ///
    /// Returns the underlying export error; the failure counter has already
    /// been updated.
    pub fn flush(&self) -> Result<()> {
        run_flush(&self.core)
    }

    /// Number of flushes that have completed successfully.
    #[must_use]
    pub fn completed_flushes(&self) -> u64 {
        self.core.flushes.load(Ordering::SeqCst)
    }

    /// Last recorded flush error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.core.state.lock().expect("flush state").last_error.clone()
    }

    /// Drain the timer and run a final synchronous flush.
    ///
    /// Called from the process's terminal handler before the store is
    /// released, so no pending work is dropped on normal termination.
    pub fn shutdown(&self) {
        let _ = self.tx.send(TimerEvent::Shutdown);
        if let Some(handle) = self.worker.lock().expect("flush worker").take() {
            let _ = handle.join();
        }
        let pending = {
            let state = self.core.state.lock().expect("flush state");
            state.dirty || state.needs_full_export
        };
        if pending {
            if let Err(e) = run_flush(&self.core) {
                tracing::warn!(error = %e, "Final flush on shutdown failed");
            }
        }
    }
}

fn scheduler_loop(core: &Arc<FlushCore>, rx: &mpsc::Receiver<TimerEvent>, debounce: Duration) {
    let mut deadline: Option<Instant> = None;

    loop {
        match deadline {
            None => match rx.recv() {
                Ok(TimerEvent::Arm) => deadline = Some(Instant::now() + debounce),
                Ok(TimerEvent::Cancel) => {}
                Ok(TimerEvent::Shutdown) | Err(_) => break,
            },
            Some(when) => {
                let timeout = when.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    // Each mark resets the deadline; bursts coalesce.
                    Ok(TimerEvent::Arm) => deadline = Some(Instant::now() + debounce),
                    Ok(TimerEvent::Cancel) => deadline = None,
                    Ok(TimerEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        deadline = None;
                        if let Err(e) = run_flush(core) {
                            tracing::debug!(error = %e, "Scheduled flush failed");
                        }
                    }
                }
            }
        }
    }
}

#[allow(clippy::significant_drop_tightening)]
fn run_flush(core: &FlushCore) -> Result<()> {
    let mut store_guard = match core.store.lock() {
        Ok(guard) => guard,
        Err(_) => return Ok(()), // poisoned during shutdown
    };
    let Some(storage) = store_guard.as_mut() else {
        // Store released; the process is shutting down.
        return Ok(());
    };

    let mut force_full = match integrity_check(storage, &core.mirror_path) {
        Ok(force) => force,
        Err(e) => return record_outcome(core, Err(e)),
    };

    // Snapshot pending work atomically with clearing it.
    {
        let mut state = core.state.lock().expect("flush state");
        force_full = force_full || state.needs_full_export;
        state.dirty = false;
        state.needs_full_export = false;
    }

    let result = if force_full {
        export_full(storage, &core.mirror_path).map(|_| ())
    } else {
        export_incremental(storage, &core.mirror_path).map(|_| ())
    };

    record_outcome(core, result)
}

/// Compare the recorded mirror hash against the file on disk. A mismatch
/// (or a missing mirror with a recorded hash) clears the export-hash table
/// and forces a full export; a missing mirror is not a flush-level failure.
fn integrity_check(storage: &mut SqliteStorage, mirror_path: &Path) -> Result<bool> {
    let Some(recorded) = storage.get_jsonl_file_hash()? else {
        return Ok(false);
    };

    if !mirror_path.exists() {
        tracing::debug!("Mirror missing with recorded hash; forcing full export");
        storage.clear_all_export_hashes()?;
        return Ok(true);
    }

    let actual = jsonl::hash_file(mirror_path)?;
    if actual != recorded {
        tracing::warn!(
            recorded = %recorded,
            actual = %actual,
            "Mirror hash mismatch; clearing export hashes and forcing full export"
        );
        storage.clear_all_export_hashes()?;
        return Ok(true);
    }

    Ok(false)
}

fn record_outcome(core: &FlushCore, result: Result<()>) -> Result<()> {
    let mut state = core.state.lock().expect("flush state");
    match result {
        Ok(()) => {
            state.failure_count = 0;
            state.last_error = None;
            drop(state);
            core.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        Err(e) => {
            state.failure_count += 1;
            state.last_error = Some(e.to_string());
            if state.failure_count >= FAILURE_ESCALATION {
                tracing::error!(
                    failures = state.failure_count,
                    error = %e,
                    "Flush has failed repeatedly; run 'bd sync --flush-only' to export manually"
                );
            }
            Err(e)
        }
    }
}

impl std::fmt::Debug for FlushController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock().expect("flush state");
        f.debug_struct("FlushController")
            .field("mirror_path", &self.core.mirror_path)
            .field("debounce", &self.debounce)
            .field("dirty", &state.dirty)
            .field("needs_full_export", &state.needs_full_export)
            .field("failure_count", &state.failure_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use tempfile::TempDir;

    fn controller(debounce_ms: u64) -> (FlushController, SharedStore, TempDir, PathBuf) {
        let store = shared_store(SqliteStorage::open_memory().unwrap());
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("issues.jsonl");
        let controller = FlushController::new(
            Arc::clone(&store),
            &mirror,
            Duration::from_millis(debounce_ms),
            true,
        );
        (controller, store, temp, mirror)
    }

    fn create(store: &SharedStore, id: &str) {
        store
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .create_issue(&Issue::new(id, format!("Issue {id}")), "t")
            .unwrap();
    }

    #[test]
    fn test_burst_coalesces_into_one_flush() {
        let (controller, store, _temp, mirror) = controller(300);

        for i in 1..=5 {
            create(&store, &format!("t-{i}"));
            controller.mark_dirty();
            thread::sleep(Duration::from_millis(20));
        }

        // Still inside the debounce window: nothing flushed yet
        assert_eq!(controller.completed_flushes(), 0);

        thread::sleep(Duration::from_millis(1200));
        assert_eq!(controller.completed_flushes(), 1);
        assert_eq!(jsonl::read_ids(&mirror).unwrap().len(), 5);
        assert!(store
            .lock()
            .unwrap()
            .as_ref()
            .unwrap()
            .get_dirty_issue_ids()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_clear_cancels_pending_flush() {
        let (controller, store, _temp, mirror) = controller(100);
        create(&store, "t-1");
        controller.mark_dirty();
        controller.clear();

        thread::sleep(Duration::from_millis(400));
        assert_eq!(controller.completed_flushes(), 0);
        assert!(!mirror.exists());
    }

    #[test]
    fn test_flush_with_released_store_is_noop() {
        let (controller, store, _temp, _mirror) = controller(50);
        store.lock().unwrap().take();
        assert!(controller.flush().is_ok());
    }

    #[test]
    fn test_integrity_mismatch_forces_full_export() {
        let (controller, store, _temp, mirror) = controller(5000);
        create(&store, "t-1");
        create(&store, "t-2");
        create(&store, "t-3");
        controller.flush().unwrap();

        // Corrupt the mirror by truncating the last line
        let content = std::fs::read_to_string(&mirror).unwrap();
        let truncated = &content[..content.len() - 10];
        std::fs::write(&mirror, truncated).unwrap();

        controller.flush().unwrap();

        let ids = jsonl::read_ids(&mirror).unwrap();
        assert_eq!(ids, vec!["t-1", "t-2", "t-3"]);
        let guard = store.lock().unwrap();
        let storage = guard.as_ref().unwrap();
        assert_eq!(
            storage.get_jsonl_file_hash().unwrap().unwrap(),
            jsonl::hash_file(&mirror).unwrap()
        );
    }

    #[test]
    fn test_missing_mirror_with_hash_is_not_a_failure() {
        let (controller, store, _temp, mirror) = controller(5000);
        create(&store, "t-1");
        controller.flush().unwrap();
        std::fs::remove_file(&mirror).unwrap();

        store
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .mark_issue_dirty("t-1")
            .unwrap();
        controller.flush().unwrap();
        assert!(mirror.exists());
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn test_shutdown_flushes_pending_work() {
        let (controller, store, _temp, mirror) = controller(60_000);
        create(&store, "t-1");
        controller.mark_dirty();

        // Debounce is a minute out; shutdown must not drop the work
        controller.shutdown();
        assert_eq!(jsonl::read_ids(&mirror).unwrap(), vec!["t-1"]);
    }

    #[test]
    fn test_disabled_controller_ignores_marks() {
        let store = shared_store(SqliteStorage::open_memory().unwrap());
        let temp = TempDir::new().unwrap();
        let mirror = temp.path().join("issues.jsonl");
        let controller =
            FlushController::new(Arc::clone(&store), &mirror, Duration::from_millis(50), false);

        create(&store, "t-1");
        controller.mark_dirty();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(controller.completed_flushes(), 0);
        controller.shutdown();
        assert!(!mirror.exists());
    }
}
