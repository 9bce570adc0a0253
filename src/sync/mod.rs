//! The synchronization engine binding the store to the JSONL mirror and to
//! git peers.
//!
//! - [`export`] - full and incremental mirror exports
//! - [`import`] - hash-gated auto-import with collision remapping
//! - [`flush`] - debounced flush controller
//! - [`merge`] - three-way merge of issue sets
//! - [`snapshot`] - base/left snapshot management
//! - [`git`] - git subprocess helpers
//! - [`engine`] - the `bd sync` orchestration

pub mod engine;
pub mod export;
pub mod flush;
pub mod git;
pub mod import;
pub mod merge;
pub mod snapshot;

pub use engine::{SyncOptions, SyncReport, SyncStatus, mirror_round_trips, status, sync};
pub use export::{ExportOutcome, collect_all_records, export_full, export_incremental};
pub use flush::{DEFAULT_DEBOUNCE, FlushController, SharedStore, shared_store};
pub use import::{
    AutoImportOutcome, ConflictMarker, ConflictMarkerKind, ImportOptions, ImportReport,
    auto_import, ensure_no_conflict_markers, import_records, scan_conflict_markers,
};
pub use merge::{ConflictResolution, MergeContext, MergeReport, MergeResult, three_way_merge};
pub use snapshot::SnapshotManager;

use std::path::{Path, PathBuf};

use crate::error::{BeadsError, Result};
use crate::storage::SqliteStorage;

/// Per-process bundle of the store handle, flush controller, and workspace
/// paths, threaded through commands instead of process-wide mutables.
pub struct SyncContext {
    pub store: SharedStore,
    pub flush: FlushController,
    pub workspace_root: PathBuf,
    pub beads_dir: PathBuf,
    pub mirror_path: PathBuf,
    pub actor: String,
}

impl SyncContext {
    /// Run a closure against the store, failing if it was already released.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` when the store handle is gone, or the
    /// closure's error.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut SqliteStorage) -> Result<R>) -> Result<R> {
        let mut guard = self
            .store
            .lock()
            .map_err(|_| BeadsError::Config("store mutex poisoned".to_string()))?;
        let storage = guard.as_mut().ok_or(BeadsError::NotInitialized)?;
        f(storage)
    }

    /// Run a sync cycle with this context's paths.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn sync(&self, options: &SyncOptions) -> Result<SyncReport> {
        let root = self.workspace_root.clone();
        let mirror = self.mirror_path.clone();
        self.with_store(|storage| engine::sync(storage, &root, &mirror, options))
    }

    /// Terminal hook: drain the flush timer, run a final flush, release the
    /// store.
    pub fn shutdown(self) {
        self.flush.shutdown();
        if let Ok(mut guard) = self.store.lock() {
            guard.take();
        }
    }

    /// Mirror path as a `&Path` convenience.
    #[must_use]
    pub fn mirror(&self) -> &Path {
        &self.mirror_path
    }
}
