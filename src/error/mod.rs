//! Error types and handling for beads.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration at the edges
//! - Provides recovery hints for user-facing errors
//! - Provides structured JSON output for AI coding agents
//!
//! Every failure kind the engine distinguishes (parse errors, conflict
//! markers, integrity mismatches, lock contention, daemon fallback, ...)
//! is a dedicated variant so call sites enumerate them exhaustively.

mod structured;

pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Reason a command fell back from the daemon to direct mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackReason {
    /// The daemon does not implement the requested operation.
    DaemonUnsupported,
    /// Daemon major/minor version differs from the client.
    VersionMismatch,
    /// Nothing is listening on the socket.
    ConnectionRefused,
    /// Connect or request deadline expired.
    Timeout,
}

impl FallbackReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DaemonUnsupported => "daemon-unsupported",
            Self::VersionMismatch => "version-mismatch",
            Self::ConnectionRefused => "connection-refused",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary error type for beads operations.
#[derive(Error, Debug)]
pub enum BeadsError {
    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// Database is locked by another process.
    #[error("Database is busy: locked by pid {holder_pid}")]
    DatabaseLocked { path: PathBuf, holder_pid: u32 },

    /// Database schema version doesn't match expected.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Issue Errors ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Attempted to create an issue with an ID that already exists.
    #[error("Issue ID collision: {id}")]
    IdCollision { id: String },

    /// Issue ID format is invalid.
    #[error("Invalid issue ID format: {id}")]
    InvalidId { id: String },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Invalid issue type value.
    #[error("Invalid issue type: {issue_type}")]
    InvalidType { issue_type: String },

    /// Priority out of valid range (0-4).
    #[error("Priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    // === Mirror (JSONL) Errors ===
    /// Failed to parse a line in the mirror file.
    #[error("JSONL parse error at line {line}: {reason}\n  {snippet}")]
    JsonlParse {
        line: usize,
        reason: String,
        snippet: String,
    },

    /// Git merge conflict markers present in the mirror.
    #[error("Merge conflict markers detected in {path} ({count} marker(s))")]
    ConflictMarkers { path: PathBuf, count: usize },

    /// Issue prefix doesn't match expected prefix.
    #[error("Prefix mismatch: expected '{expected}', found '{found}'")]
    PrefixMismatch { expected: String, found: String },

    /// Stored mirror hash disagrees with the file on disk.
    #[error("Mirror integrity mismatch: recorded {recorded}, actual {actual}")]
    IntegrityMismatch { recorded: String, actual: String },

    // === Dependency Errors ===
    /// Adding the dependency would create a cycle.
    #[error("Cycle detected in dependencies: {path}")]
    DependencyCycle { path: String },

    /// Self-referential dependency.
    #[error("Issue cannot depend on itself: {id}")]
    SelfDependency { id: String },

    /// Dependency target not found.
    #[error("Dependency target not found: {id}")]
    DependencyNotFound { id: String },

    /// Duplicate dependency.
    #[error("Dependency already exists: {from} -> {to}")]
    DuplicateDependency { from: String, to: String },

    // === Sync Errors ===
    /// Git subprocess failed or preflight check rejected the working tree.
    #[error("Git {op} failed: {detail}")]
    Git { op: String, detail: String },

    /// Snapshot metadata is internally inconsistent.
    #[error("Sync snapshots are invalid: {reason}")]
    SnapshotInvalid { reason: String },

    /// Applying accepted deletions failed partway through.
    #[error("Database may be inconsistent: {} deletion(s) failed to apply", failures.len())]
    DeletionApplyFailed { failures: Vec<(String, String)> },

    /// Post-import count check tripped (lost more than half the records).
    #[error("Import sanity check failed: {before} issues before, {after} after")]
    ImportLoss { before: usize, after: usize },

    // === Daemon Errors ===
    /// Daemon could not serve the request; caller should go direct.
    #[error("Daemon unavailable ({reason})")]
    DaemonUnavailable { reason: FallbackReason },

    /// Daemon attached to a different repository.
    #[error("Repository fingerprint mismatch: store has {stored}, repo is {actual}")]
    RepoMismatch { stored: String, actual: String },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Beads workspace not initialized.
    #[error("Beads not initialized: run 'bd init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error for edges that don't need a variant.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BeadsError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::NotInitialized
                | Self::IssueNotFound { .. }
                | Self::Validation { .. }
                | Self::InvalidStatus { .. }
                | Self::InvalidType { .. }
                | Self::InvalidPriority { .. }
                | Self::PrefixMismatch { .. }
                | Self::ConflictMarkers { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run: bd init".to_string()),
            Self::DatabaseNotFound { .. } => Some("Check path or run: bd init".to_string()),
            Self::DatabaseLocked { holder_pid, .. } => Some(format!(
                "Another process (pid {holder_pid}) holds the store; retry or stop it"
            )),
            Self::ConflictMarkers { path, .. } => Some(format!(
                "Resolve the git conflict first. Either:\n\
                 1. Edit {} and remove conflict markers, then re-run\n\
                 2. Run 'git checkout --theirs {}' (or --ours) and re-run",
                path.display(),
                path.display()
            )),
            Self::SnapshotInvalid { .. } => {
                Some("Snapshots will be discarded; deletion handling is skipped this cycle".into())
            }
            Self::DeletionApplyFailed { .. } => {
                Some("Run 'bd doctor' and re-run 'bd sync'; snapshots were retained".into())
            }
            Self::IntegrityMismatch { .. } => {
                Some("The next flush rewrites the full mirror automatically".into())
            }
            Self::DependencyCycle { .. } => {
                Some("Remove one dependency to break the cycle".into())
            }
            Self::SelfDependency { .. } => Some("An issue cannot depend on itself".into()),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize".into()),
            Self::InvalidPriority { .. } => {
                Some("Use a priority between 0 (critical) and 4 (backlog)".into())
            }
            Self::InvalidStatus { .. } => {
                Some("Valid statuses: open, in_progress, blocked, closed".into())
            }
            Self::InvalidType { .. } => {
                Some("Valid types: bug, feature, task, epic, chore".into())
            }
            _ => None,
        }
    }

    /// Get the exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a git subprocess error.
    #[must_use]
    pub fn git(op: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Git {
            op: op.into(),
            detail: detail.into(),
        }
    }
}

/// Result type using `BeadsError`.
pub type Result<T> = std::result::Result<T, BeadsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BeadsError::IssueNotFound {
            id: "bd-abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Issue not found: bd-abc123");
    }

    #[test]
    fn test_validation_error() {
        let err = BeadsError::validation("title", "cannot be empty");
        assert_eq!(err.to_string(), "Validation failed: title: cannot be empty");
    }

    #[test]
    fn test_conflict_marker_suggestion_has_two_paths() {
        let err = BeadsError::ConflictMarkers {
            path: PathBuf::from(".beads/issues.jsonl"),
            count: 3,
        };
        let hint = err.suggestion().unwrap();
        assert!(hint.contains("1."));
        assert!(hint.contains("2."));
    }

    #[test]
    fn test_fallback_reason_serialization() {
        let json = serde_json::to_string(&FallbackReason::ConnectionRefused).unwrap();
        assert_eq!(json, "\"connection-refused\"");
        assert_eq!(FallbackReason::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_user_recoverable() {
        assert!(BeadsError::NotInitialized.is_user_recoverable());
        let not_recoverable = BeadsError::DaemonUnavailable {
            reason: FallbackReason::Timeout,
        };
        assert!(!not_recoverable.is_user_recoverable());
    }
}
