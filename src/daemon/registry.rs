//! User-scoped daemon registry for discovery.
//!
//! A best-effort JSON file under `~/.beads/registry.json` listing running
//! daemons. Entries are written with a temp-file rename; stale entries are
//! pruned on read by PID liveness.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BeadsError, Result};

/// One registered daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryEntry {
    pub workspace: PathBuf,
    pub socket: PathBuf,
    pub db: PathBuf,
    pub pid: u32,
    pub version: String,
    pub started_at: String,
}

/// Resolve the registry path (override via `BEADS_REGISTRY` for tests).
///
/// # Errors
///
/// Returns an error when no home directory can be determined.
pub fn registry_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("BEADS_REGISTRY") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = std::env::var("HOME")
        .map_err(|_| BeadsError::Config("HOME is not set; cannot locate registry".to_string()))?;
    Ok(Path::new(&home).join(".beads").join("registry.json"))
}

fn load(path: &Path) -> Vec<RegistryEntry> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str(&text).unwrap_or_default()
}

fn save(path: &Path, entries: &[RegistryEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension(format!("tmp.{}", std::process::id()));
    std::fs::write(&temp, serde_json::to_vec_pretty(entries)?)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

/// Add or replace this workspace's entry.
///
/// # Errors
///
/// Returns an error if the registry file cannot be written.
pub fn register(entry: &RegistryEntry) -> Result<()> {
    let path = registry_path()?;
    let mut entries = load(&path);
    entries.retain(|e| e.workspace != entry.workspace);
    entries.push(entry.clone());
    save(&path, &entries)
}

/// Remove this workspace's entry.
///
/// # Errors
///
/// Returns an error if the registry file cannot be written.
pub fn unregister(workspace: &Path) -> Result<()> {
    let path = registry_path()?;
    let mut entries = load(&path);
    entries.retain(|e| e.workspace != workspace);
    save(&path, &entries)
}

/// List live entries, pruning dead PIDs.
///
/// # Errors
///
/// Returns an error if the registry path cannot be resolved.
pub fn list_live() -> Result<Vec<RegistryEntry>> {
    let path = registry_path()?;
    let entries = load(&path);
    Ok(entries
        .into_iter()
        .filter(|e| super::pid_alive(e.pid))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_registry<R>(f: impl FnOnce() -> R) -> R {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("registry.json");
        // Serialize access: env var is process-global
        unsafe { std::env::set_var("BEADS_REGISTRY", &path) };
        let out = f();
        unsafe { std::env::remove_var("BEADS_REGISTRY") };
        out
    }

    fn entry(workspace: &str, pid: u32) -> RegistryEntry {
        RegistryEntry {
            workspace: PathBuf::from(workspace),
            socket: PathBuf::from(format!("{workspace}/.beads/bd.sock")),
            db: PathBuf::from(format!("{workspace}/.beads/beads.db")),
            pid,
            version: crate::BD_VERSION.to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_register_list_unregister() {
        with_registry(|| {
            let me = entry("/tmp/ws1", std::process::id());
            register(&me).unwrap();

            let live = list_live().unwrap();
            assert_eq!(live.len(), 1);
            assert_eq!(live[0].workspace, PathBuf::from("/tmp/ws1"));

            // Dead PIDs are pruned from listings
            register(&entry("/tmp/ws2", u32::MAX - 1)).unwrap();
            let live = list_live().unwrap();
            assert_eq!(live.len(), 1);

            unregister(Path::new("/tmp/ws1")).unwrap();
            assert!(list_live().unwrap().is_empty());
        });
    }
}
