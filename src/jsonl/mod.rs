//! JSONL codec and atomic mirror writer.
//!
//! The mirror is JSON-per-line, one record per line, records sorted by ID
//! ascending, each line in deterministic canonical form with a terminating
//! newline. Canonical form means: fields in declaration order, zero-valued
//! optionals omitted, RFC-3339 nanosecond timestamps, labels sorted
//! lexicographically, dependencies in insertion order, comments by creation
//! time. Identical stores therefore serialize to byte-identical files.
//!
//! Writes go through a sibling temp file (`<path>.tmp.<pid>`) and land with
//! an atomic rename; the rename is the linearization point for concurrent
//! readers. On any intermediate failure the temp file is unlinked and the
//! original mirror is untouched.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{BeadsError, Result};
use crate::model::Issue;

/// Line-read buffer size; sized for large descriptions.
pub const READ_BUFFER_SIZE: usize = 2 * 1024 * 1024;

const SNIPPET_LEN: usize = 80;

/// Outcome of an atomic mirror write.
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// IDs actually written, in file order.
    pub written_ids: Vec<String>,
    /// SHA-256 over the written content (per line plus newline).
    pub content_hash: String,
}

/// Serialize one issue into its canonical mirror line (no trailing newline).
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn canonical_line(issue: &Issue) -> Result<String> {
    let mut record = issue.clone();
    record.labels.sort();
    Ok(serde_json::to_string(&record)?)
}

/// Write the full record set to `path` atomically.
///
/// Records are sorted by ID before writing; the temp file is created
/// exclusively as `<path>.tmp.<pid>`, fsynced, then renamed over the
/// target. Permissions are normalized to `rw-r--r--` after the rename;
/// a permission-set failure at that point is tolerated.
///
/// # Errors
///
/// Returns an error if serialization or any file operation before the
/// rename fails; the temp file is removed in that case.
pub fn write_atomic(path: &Path, records: &[Issue]) -> Result<WriteResult> {
    let parent = path
        .parent()
        .ok_or_else(|| BeadsError::Config(format!("invalid mirror path: {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let temp_path = temp_path_for(path);

    // The guard unlinks the temp file on error or unwind; only a
    // successful rename disarms it.
    let mut guard = TempGuard {
        path: temp_path.clone(),
        armed: true,
    };

    let (written_ids, content_hash) = write_to_temp(&temp_path, records)?;

    fs::rename(&temp_path, path)?;
    guard.armed = false;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o644));
    }

    Ok(WriteResult {
        written_ids,
        content_hash,
    })
}

struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "mirror".to_string(), |n| n.to_string_lossy().to_string());
    path.with_file_name(format!("{file_name}.tmp.{}", std::process::id()))
}

fn write_to_temp(temp_path: &Path, records: &[Issue]) -> Result<(Vec<String>, String)> {
    let mut sorted: Vec<&Issue> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)?;
    let mut writer = BufWriter::new(file);

    let mut hasher = Sha256::new();
    let mut written_ids = Vec::with_capacity(sorted.len());

    for issue in sorted {
        let line = canonical_line(issue)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        written_ids.push(issue.id.clone());
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| BeadsError::Io(e.into_error()))?
        .sync_all()?;

    Ok((written_ids, format!("{:x}", hasher.finalize())))
}

/// Read all issues from a mirror file.
///
/// Blank lines are tolerated. A parse error reports the line number and an
/// 80-character snippet; callers decide policy (import aborts, flush treats
/// unparsable lines as missing entries).
///
/// # Errors
///
/// Returns `JsonlParse` on malformed lines, or an I/O error.
pub fn read_issues(path: &Path) -> Result<Vec<Issue>> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut issues = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let issue: Issue = serde_json::from_str(&line).map_err(|e| BeadsError::JsonlParse {
            line: idx + 1,
            reason: e.to_string(),
            snippet: snippet(&line),
        })?;
        issues.push(issue);
    }

    Ok(issues)
}

/// Read issues, skipping unparsable lines instead of failing.
///
/// Used by the incremental flush path, which merges the store's view over
/// the existing mirror and treats bad lines as missing entries.
///
/// # Errors
///
/// Returns an error only on I/O failure.
pub fn read_issues_lenient(path: &Path) -> Result<Vec<Issue>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(BeadsError::Io(e)),
    };
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut issues = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Issue>(&line) {
            Ok(issue) => issues.push(issue),
            Err(e) => {
                tracing::warn!(
                    line = idx + 1,
                    error = %e,
                    snippet = %snippet(&line),
                    "Skipping unparsable mirror line"
                );
            }
        }
    }

    Ok(issues)
}

/// SHA-256 of a mirror file's content, hashed per line plus newline.
///
/// Matches the hash the writer computes, so a file the engine itself wrote
/// hashes identically whether measured in memory or from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();

    for line in reader.lines() {
        let line = line?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Extract just the `id` field from each line of a mirror file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is not JSON.
pub fn read_ids(path: &Path) -> Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(BeadsError::Io(e)),
    };
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut ids = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(&line).map_err(|e| BeadsError::JsonlParse {
                line: idx + 1,
                reason: e.to_string(),
                snippet: snippet(&line),
            })?;
        if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
            ids.push(id.to_string());
        }
    }

    Ok(ids)
}

fn snippet(line: &str) -> String {
    line.chars().take(SNIPPET_LEN).collect()
}
