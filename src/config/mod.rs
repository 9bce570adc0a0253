//! Workspace discovery, configuration layering, and store opening.
//!
//! Configuration merges three layers, later wins:
//! 1. `.beads/config.yaml` (non-secret project config)
//! 2. `BEADS_*` environment variables
//! 3. CLI flags
//!
//! Opening a workspace performs the version handshake, the repository
//! fingerprint check, and the hash-gated auto-import, then hands back a
//! [`SyncContext`] ready for commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BeadsError, Result};
use crate::storage::{METADATA_BD_VERSION, SqliteStorage};
use crate::sync::{DEFAULT_DEBOUNCE, FlushController, SyncContext, auto_import, shared_store};
use crate::util::fingerprint::{self, METADATA_CLONE_ID, METADATA_REPO_ID};

/// Name of the workspace directory.
pub const BEADS_DIR_NAME: &str = ".beads";
/// Default store filename.
pub const DEFAULT_DB_FILE: &str = "beads.db";
/// Default mirror filename.
pub const DEFAULT_MIRROR_FILE: &str = "issues.jsonl";

/// Resolved filesystem layout for one workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    /// Directory containing `.beads/`.
    pub workspace_root: PathBuf,
    /// The `.beads/` directory itself.
    pub beads_dir: PathBuf,
    /// The SQLite store.
    pub db_path: PathBuf,
    /// The JSONL mirror.
    pub mirror_path: PathBuf,
}

impl WorkspacePaths {
    /// Daemon socket path.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.beads_dir.join("bd.sock")
    }

    /// Daemon lock/PID file.
    #[must_use]
    pub fn daemon_pid_path(&self) -> PathBuf {
        self.beads_dir.join("daemon.pid")
    }

    /// Daemon log file.
    #[must_use]
    pub fn daemon_log_path(&self) -> PathBuf {
        self.beads_dir.join("daemon.log")
    }

    /// Daemon crash report file.
    #[must_use]
    pub fn daemon_error_path(&self) -> PathBuf {
        self.beads_dir.join("daemon-error")
    }
}

/// `.beads/config.yaml` contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Issue ID prefix (e.g. "bd").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Sync settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfigSection>,
    /// Disable the debounced background flush.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_auto_flush: bool,
    /// Disable auto-import on open.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_auto_import: bool,
}

/// `sync:` section of config.yaml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl ConfigFile {
    /// Load `.beads/config.yaml`, defaulting when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(beads_dir: &Path) -> Result<Self> {
        let path = beads_dir.join("config.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Write `.beads/config.yaml`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, beads_dir: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self)?;
        std::fs::write(beads_dir.join("config.yaml"), text)?;
        Ok(())
    }
}

/// Effective engine settings after layering config.yaml, environment, and
/// CLI flags.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub actor: String,
    pub debounce: Duration,
    pub auto_flush: bool,
    pub auto_import: bool,
    pub auto_start_daemon: bool,
    pub daemon_mode: DaemonMode,
    pub sync_branch: Option<String>,
    pub ignore_repo_mismatch: bool,
    pub ignore_version_mismatch: bool,
}

/// Scheduler style for the daemon's background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaemonMode {
    /// Fixed-interval polling.
    Poll,
    /// Mirror-watch driven (default).
    #[default]
    Events,
}

impl EngineConfig {
    /// Resolve the effective configuration for a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if config.yaml is malformed.
    pub fn resolve(beads_dir: &Path) -> Result<Self> {
        let file = ConfigFile::load(beads_dir)?;

        let actor = std::env::var("BEADS_ACTOR")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("USER").ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "unknown".to_string());

        let debounce = std::env::var("BEADS_FLUSH_DEBOUNCE")
            .ok()
            .and_then(|v| parse_debounce(&v))
            .unwrap_or(DEFAULT_DEBOUNCE);

        let daemon_mode = match std::env::var("BEADS_DAEMON_MODE").as_deref() {
            Ok("poll") => DaemonMode::Poll,
            Ok("events") => DaemonMode::Events,
            _ => DaemonMode::default(),
        };

        let sync_branch = std::env::var("BEADS_SYNC_BRANCH")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| file.sync.as_ref().and_then(|s| s.branch.clone()));

        Ok(Self {
            actor,
            debounce,
            auto_flush: !file.no_auto_flush,
            auto_import: !file.no_auto_import,
            auto_start_daemon: env_flag("BEADS_AUTO_START_DAEMON"),
            daemon_mode,
            sync_branch,
            ignore_repo_mismatch: env_flag("BEADS_IGNORE_REPO_MISMATCH"),
            ignore_version_mismatch: env_flag("BEADS_IGNORE_VERSION_MISMATCH"),
        })
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Parse a debounce spec: plain integers are seconds, an `ms` suffix gives
/// milliseconds (useful for tests).
#[must_use]
pub fn parse_debounce(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Walk up from `start` to find the directory containing `.beads/`.
///
/// `BEADS_DIR` overrides discovery with an explicit `.beads` directory.
///
/// # Errors
///
/// Returns `NotInitialized` when no workspace is found.
pub fn discover_beads_dir(start: Option<&Path>) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("BEADS_DIR") {
        if !dir.is_empty() {
            let path = PathBuf::from(dir);
            if path.is_dir() {
                return Ok(path);
            }
            return Err(BeadsError::Config(format!(
                "BEADS_DIR points to a missing directory: {}",
                path.display()
            )));
        }
    }

    let start = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };

    let mut current = start.as_path();
    loop {
        let candidate = current.join(BEADS_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return Err(BeadsError::NotInitialized),
        }
    }
}

/// Resolve the full path layout for a discovered `.beads` directory.
///
/// `BEADS_DB` overrides the store path; `metadata.json` may carry a custom
/// store filename.
///
/// # Errors
///
/// Returns an error if metadata.json is malformed.
pub fn resolve_paths(beads_dir: &Path, db_override: Option<&Path>) -> Result<WorkspacePaths> {
    let workspace_root = beads_dir
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let db_path = if let Some(path) = db_override {
        path.to_path_buf()
    } else if let Ok(env_db) = std::env::var("BEADS_DB") {
        if env_db.is_empty() {
            beads_dir.join(custom_db_file(beads_dir)?)
        } else {
            PathBuf::from(env_db)
        }
    } else {
        beads_dir.join(custom_db_file(beads_dir)?)
    };

    Ok(WorkspacePaths {
        workspace_root,
        beads_dir: beads_dir.to_path_buf(),
        db_path,
        mirror_path: beads_dir.join(DEFAULT_MIRROR_FILE),
    })
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspaceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    db_file: Option<String>,
}

fn custom_db_file(beads_dir: &Path) -> Result<String> {
    let path = beads_dir.join("metadata.json");
    if !path.exists() {
        return Ok(DEFAULT_DB_FILE.to_string());
    }
    let text = std::fs::read_to_string(&path)?;
    let meta: WorkspaceMetadata = serde_json::from_str(&text)?;
    Ok(meta.db_file.unwrap_or_else(|| DEFAULT_DB_FILE.to_string()))
}

/// How long a CLI invocation waits on the SQLite write lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Open a workspace into a [`SyncContext`].
///
/// Performs, in order: store open (with busy timeout), version handshake,
/// fingerprint check, hash-gated auto-import, flush-controller setup.
///
/// # Errors
///
/// Returns an error when the store cannot be opened, the fingerprint
/// mismatches without an override, or auto-import fails.
pub fn open_workspace(beads_dir: &Path, db_override: Option<&Path>) -> Result<SyncContext> {
    let paths = resolve_paths(beads_dir, db_override)?;
    let config = EngineConfig::resolve(beads_dir)?;

    let mut storage = SqliteStorage::open_with_timeout(&paths.db_path, Some(DEFAULT_LOCK_TIMEOUT_MS))?;

    version_handshake(&mut storage, &config)?;
    fingerprint_check(&mut storage, &paths.workspace_root, &config)?;

    let store = shared_store(storage);
    let flush = FlushController::new(
        Arc::clone(&store),
        &paths.mirror_path,
        config.debounce,
        config.auto_flush,
    );

    if config.auto_import {
        let mut guard = store
            .lock()
            .map_err(|_| BeadsError::Config("store mutex poisoned".to_string()))?;
        if let Some(storage) = guard.as_mut() {
            auto_import(storage, &paths.mirror_path, Some(&flush))?;
        }
        drop(guard);
    }

    Ok(SyncContext {
        store,
        flush,
        workspace_root: paths.workspace_root,
        beads_dir: paths.beads_dir,
        mirror_path: paths.mirror_path,
        actor: config.actor,
    })
}

/// `bd_version` handshake: absent means stamp ours; different means a
/// forward migration to ours (overridable for emergencies).
fn version_handshake(storage: &mut SqliteStorage, config: &EngineConfig) -> Result<()> {
    match storage.get_metadata(METADATA_BD_VERSION)? {
        None => storage.set_metadata(METADATA_BD_VERSION, crate::BD_VERSION),
        Some(stored) if stored == crate::BD_VERSION => Ok(()),
        Some(stored) => {
            if config.ignore_version_mismatch {
                tracing::warn!(
                    stored = %stored,
                    ours = crate::BD_VERSION,
                    "Version mismatch ignored by BEADS_IGNORE_VERSION_MISMATCH"
                );
                return Ok(());
            }
            let stored_version = semver::Version::parse(&stored).ok();
            let ours = semver::Version::parse(crate::BD_VERSION).ok();
            if let (Some(stored_version), Some(ours)) = (stored_version, ours) {
                if stored_version > ours {
                    return Err(BeadsError::SchemaMismatch {
                        expected: crate::BD_VERSION.to_string(),
                        found: stored,
                    });
                }
            }
            tracing::info!(from = %stored, to = crate::BD_VERSION, "Upgrading store version");
            storage.set_metadata(METADATA_BD_VERSION, crate::BD_VERSION)
        }
    }
}

fn fingerprint_check(
    storage: &mut SqliteStorage,
    workspace_root: &Path,
    config: &EngineConfig,
) -> Result<()> {
    let actual = fingerprint::repo_id(workspace_root)?;
    let path_fallback = fingerprint::path_id(workspace_root)?;
    match storage.get_metadata(METADATA_REPO_ID)? {
        None => {
            storage.set_metadata(METADATA_REPO_ID, &actual)?;
        }
        Some(stored) if stored == actual => {}
        // A repo that gained its first commit (or a remote) graduates from
        // the path-derived fingerprint; re-stamp instead of failing.
        Some(stored) if stored == path_fallback => {
            storage.set_metadata(METADATA_REPO_ID, &actual)?;
        }
        Some(stored) => {
            if config.ignore_repo_mismatch {
                tracing::warn!(
                    stored = %stored,
                    actual = %actual,
                    "Repository fingerprint mismatch ignored by BEADS_IGNORE_REPO_MISMATCH"
                );
            } else {
                return Err(BeadsError::RepoMismatch { stored, actual });
            }
        }
    }

    if storage.get_metadata(METADATA_CLONE_ID)?.is_none() {
        let clone_id = fingerprint::new_clone_id(workspace_root);
        storage.set_metadata(METADATA_CLONE_ID, &clone_id)?;
    }

    Ok(())
}

/// Entries `.beads/.gitignore` must carry so ephemeral siblings stay out of
/// version control while the mirror stays tracked.
const GITIGNORE_ENTRIES: &[&str] = &[
    "*.db",
    "*.db-wal",
    "*.db-shm",
    "*.base.jsonl",
    "*.left.jsonl",
    "*.jsonl.tmp.*",
    "*.jsonl.merged",
    "bd.sock",
    "daemon.pid",
    "daemon.log",
    "daemon-error",
];

/// Create or update `.beads/.gitignore` with the ephemeral patterns.
///
/// Existing custom entries are preserved; missing managed entries are
/// appended.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written.
pub fn ensure_gitignore(beads_dir: &Path) -> Result<()> {
    let path = beads_dir.join(".gitignore");
    let existing = if path.exists() {
        std::fs::read_to_string(&path)?
    } else {
        String::new()
    };

    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    for entry in GITIGNORE_ENTRIES {
        if !lines.iter().any(|l| l.trim() == *entry) {
            lines.push((*entry).to_string());
        }
    }

    std::fs::write(&path, format!("{}\n", lines.join("\n")))?;
    Ok(())
}

/// Initialize a fresh workspace for `bd init`.
///
/// Creates `.beads/`, the store (unless `no_db`), config.yaml, and the
/// managed `.gitignore`, and stamps prefix, version, and identity metadata.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if a store already exists, or any
/// filesystem/database error.
pub fn init_workspace(
    workspace_root: &Path,
    prefix: &str,
    no_db: bool,
    branch: Option<&str>,
) -> Result<WorkspacePaths> {
    let beads_dir = workspace_root.join(BEADS_DIR_NAME);
    let paths = WorkspacePaths {
        workspace_root: workspace_root.to_path_buf(),
        beads_dir: beads_dir.clone(),
        db_path: beads_dir.join(DEFAULT_DB_FILE),
        mirror_path: beads_dir.join(DEFAULT_MIRROR_FILE),
    };

    if paths.db_path.exists() {
        return Err(BeadsError::AlreadyInitialized {
            path: paths.db_path.clone(),
        });
    }

    std::fs::create_dir_all(&beads_dir)?;
    ensure_gitignore(&beads_dir)?;

    let config = ConfigFile {
        prefix: Some(prefix.to_string()),
        sync: branch.map(|b| SyncConfigSection {
            branch: Some(b.to_string()),
        }),
        ..Default::default()
    };
    config.save(&beads_dir)?;

    if !no_db {
        let mut storage = SqliteStorage::open(&paths.db_path)?;
        storage.set_config("issue_prefix", prefix)?;
        if let Some(branch) = branch {
            storage.set_config("sync.branch", branch)?;
        }
        storage.set_metadata(METADATA_BD_VERSION, crate::BD_VERSION)?;
        storage.set_metadata(METADATA_REPO_ID, &fingerprint::repo_id(workspace_root)?)?;
        storage.set_metadata(
            METADATA_CLONE_ID,
            &fingerprint::new_clone_id(workspace_root),
        )?;
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_debounce() {
        assert_eq!(parse_debounce("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_debounce("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_debounce("abc"), None);
    }

    #[test]
    fn test_discover_walks_up() {
        let temp = TempDir::new().unwrap();
        let beads = temp.path().join(BEADS_DIR_NAME);
        std::fs::create_dir_all(&beads).unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = discover_beads_dir(Some(&nested)).unwrap();
        assert_eq!(found.canonicalize().unwrap(), beads.canonicalize().unwrap());
    }

    #[test]
    fn test_discover_fails_outside_workspace() {
        let temp = TempDir::new().unwrap();
        let err = discover_beads_dir(Some(temp.path())).unwrap_err();
        assert!(matches!(err, BeadsError::NotInitialized));
    }

    #[test]
    fn test_init_workspace_creates_layout() {
        let temp = TempDir::new().unwrap();
        let paths = init_workspace(temp.path(), "bd", false, Some("main")).unwrap();

        assert!(paths.db_path.exists());
        assert!(paths.beads_dir.join("config.yaml").exists());
        assert!(paths.beads_dir.join(".gitignore").exists());

        let config = ConfigFile::load(&paths.beads_dir).unwrap();
        assert_eq!(config.prefix.as_deref(), Some("bd"));
        assert_eq!(
            config.sync.and_then(|s| s.branch).as_deref(),
            Some("main")
        );

        let storage = SqliteStorage::open(&paths.db_path).unwrap();
        assert_eq!(
            storage.get_config("issue_prefix").unwrap().as_deref(),
            Some("bd")
        );
        assert!(storage.get_metadata(METADATA_REPO_ID).unwrap().is_some());
        assert!(storage.get_metadata(METADATA_CLONE_ID).unwrap().is_some());
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = TempDir::new().unwrap();
        init_workspace(temp.path(), "bd", false, None).unwrap();
        let err = init_workspace(temp.path(), "bd", false, None).unwrap_err();
        assert!(matches!(err, BeadsError::AlreadyInitialized { .. }));
    }

    #[test]
    fn test_gitignore_preserves_custom_lines() {
        let temp = TempDir::new().unwrap();
        let beads = temp.path().join(BEADS_DIR_NAME);
        std::fs::create_dir_all(&beads).unwrap();
        std::fs::write(beads.join(".gitignore"), "custom-entry\n").unwrap();

        ensure_gitignore(&beads).unwrap();
        let content = std::fs::read_to_string(beads.join(".gitignore")).unwrap();
        assert!(content.contains("custom-entry"));
        assert!(content.contains("bd.sock"));
        assert!(content.contains("*.base.jsonl"));

        // Idempotent
        ensure_gitignore(&beads).unwrap();
        let again = std::fs::read_to_string(beads.join(".gitignore")).unwrap();
        assert_eq!(content, again);
    }

    #[test]
    fn test_custom_db_file_from_metadata() {
        let temp = TempDir::new().unwrap();
        let beads = temp.path().join(BEADS_DIR_NAME);
        std::fs::create_dir_all(&beads).unwrap();
        std::fs::write(
            beads.join("metadata.json"),
            "{\"db_file\": \"custom.db\"}",
        )
        .unwrap();

        let paths = resolve_paths(&beads, None).unwrap();
        assert_eq!(paths.db_path.file_name().unwrap(), "custom.db");
    }
}
