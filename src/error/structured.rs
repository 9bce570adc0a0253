//! Structured error output for AI coding agents.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags

use crate::error::BeadsError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
/// Format: `SCREAMING_SNAKE_CASE` for easy parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Database Errors (exit code 2) ===
    DatabaseNotFound,
    DatabaseLocked,
    SchemaMismatch,
    DatabaseError,
    NotInitialized,
    AlreadyInitialized,

    // === Issue Errors (exit code 3) ===
    IssueNotFound,
    IdCollision,
    InvalidId,

    // === Validation Errors (exit code 4) ===
    ValidationFailed,
    InvalidStatus,
    InvalidType,
    InvalidPriority,

    // === Dependency Errors (exit code 5) ===
    CycleDetected,
    DependencyNotFound,
    SelfDependency,
    DuplicateDependency,

    // === Sync Errors (exit code 6) ===
    JsonlParseError,
    PrefixMismatch,
    ConflictMarkers,
    IntegrityMismatch,
    GitError,
    SnapshotInvalid,
    DeletionApplyFailed,
    ImportLoss,

    // === Daemon Errors (exit code 2) ===
    DaemonUnavailable,
    RepoMismatch,

    // === Config Errors (exit code 7) ===
    ConfigError,

    // === I/O Errors (exit code 8) ===
    IoError,
    JsonError,
    YamlError,

    // === Internal Errors (exit code 1) ===
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseLocked => "DATABASE_LOCKED",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::IdCollision => "ID_COLLISION",
            Self::InvalidId => "INVALID_ID",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::InvalidType => "INVALID_TYPE",
            Self::InvalidPriority => "INVALID_PRIORITY",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::DependencyNotFound => "DEPENDENCY_NOT_FOUND",
            Self::SelfDependency => "SELF_DEPENDENCY",
            Self::DuplicateDependency => "DUPLICATE_DEPENDENCY",
            Self::JsonlParseError => "JSONL_PARSE_ERROR",
            Self::PrefixMismatch => "PREFIX_MISMATCH",
            Self::ConflictMarkers => "CONFLICT_MARKERS",
            Self::IntegrityMismatch => "INTEGRITY_MISMATCH",
            Self::GitError => "GIT_ERROR",
            Self::SnapshotInvalid => "SNAPSHOT_INVALID",
            Self::DeletionApplyFailed => "DELETION_APPLY_FAILED",
            Self::ImportLoss => "IMPORT_LOSS",
            Self::DaemonUnavailable => "DAEMON_UNAVAILABLE",
            Self::RepoMismatch => "REPO_MISMATCH",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is potentially retryable.
    ///
    /// Retryable means the agent might succeed if it waits and retries
    /// (e.g., database locked) or fixes the input and retries.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::DatabaseLocked
                | Self::ValidationFailed
                | Self::InvalidStatus
                | Self::InvalidType
                | Self::InvalidPriority
                | Self::DaemonUnavailable
        )
    }

    /// Get the exit code for this error category.
    ///
    /// - 1: internal/unknown, 2: database/daemon, 3: issue, 4: validation,
    ///   5: dependency, 6: sync, 7: config, 8: I/O
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::DatabaseNotFound
            | Self::DatabaseLocked
            | Self::SchemaMismatch
            | Self::DatabaseError
            | Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::DaemonUnavailable
            | Self::RepoMismatch => 2,
            Self::IssueNotFound | Self::IdCollision | Self::InvalidId => 3,
            Self::ValidationFailed
            | Self::InvalidStatus
            | Self::InvalidType
            | Self::InvalidPriority => 4,
            Self::CycleDetected
            | Self::DependencyNotFound
            | Self::SelfDependency
            | Self::DuplicateDependency => 5,
            Self::JsonlParseError
            | Self::PrefixMismatch
            | Self::ConflictMarkers
            | Self::IntegrityMismatch
            | Self::GitError
            | Self::SnapshotInvalid
            | Self::DeletionApplyFailed
            | Self::ImportLoss => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `BeadsError`.
    #[must_use]
    pub fn from_error(err: &BeadsError) -> Self {
        let (code, context) = extract_code_and_context(err);

        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion(),
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Serialize for JSON error output on stderr.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Render for human consumption: one line, then a remediation block.
    #[must_use]
    pub fn to_human(&self) -> String {
        let mut out = format!("error: {}", self.message);
        if let Some(ref hint) = self.hint {
            out.push('\n');
            out.push_str(hint);
        }
        out
    }
}

fn extract_code_and_context(err: &BeadsError) -> (ErrorCode, Option<Value>) {
    match err {
        BeadsError::DatabaseNotFound { path } => (
            ErrorCode::DatabaseNotFound,
            Some(json!({"path": path.display().to_string()})),
        ),
        BeadsError::DatabaseLocked { path, holder_pid } => (
            ErrorCode::DatabaseLocked,
            Some(json!({"path": path.display().to_string(), "holder_pid": holder_pid})),
        ),
        BeadsError::SchemaMismatch { expected, found } => (
            ErrorCode::SchemaMismatch,
            Some(json!({"expected": expected, "found": found})),
        ),
        BeadsError::Database(_) => (ErrorCode::DatabaseError, None),
        BeadsError::IssueNotFound { id } => {
            (ErrorCode::IssueNotFound, Some(json!({"id": id})))
        }
        BeadsError::IdCollision { id } => (ErrorCode::IdCollision, Some(json!({"id": id}))),
        BeadsError::InvalidId { id } => (ErrorCode::InvalidId, Some(json!({"id": id}))),
        BeadsError::Validation { field, reason } => (
            ErrorCode::ValidationFailed,
            Some(json!({"field": field, "reason": reason})),
        ),
        BeadsError::InvalidStatus { status } => {
            (ErrorCode::InvalidStatus, Some(json!({"provided": status})))
        }
        BeadsError::InvalidType { issue_type } => {
            (ErrorCode::InvalidType, Some(json!({"provided": issue_type})))
        }
        BeadsError::InvalidPriority { priority } => (
            ErrorCode::InvalidPriority,
            Some(json!({"provided": priority})),
        ),
        BeadsError::JsonlParse { line, snippet, .. } => (
            ErrorCode::JsonlParseError,
            Some(json!({"line": line, "snippet": snippet})),
        ),
        BeadsError::ConflictMarkers { path, count } => (
            ErrorCode::ConflictMarkers,
            Some(json!({"path": path.display().to_string(), "count": count})),
        ),
        BeadsError::PrefixMismatch { expected, found } => (
            ErrorCode::PrefixMismatch,
            Some(json!({"expected": expected, "found": found})),
        ),
        BeadsError::IntegrityMismatch { recorded, actual } => (
            ErrorCode::IntegrityMismatch,
            Some(json!({"recorded": recorded, "actual": actual})),
        ),
        BeadsError::DependencyCycle { path } => {
            (ErrorCode::CycleDetected, Some(json!({"cycle_path": path})))
        }
        BeadsError::SelfDependency { id } => {
            (ErrorCode::SelfDependency, Some(json!({"id": id})))
        }
        BeadsError::DependencyNotFound { id } => {
            (ErrorCode::DependencyNotFound, Some(json!({"id": id})))
        }
        BeadsError::DuplicateDependency { from, to } => (
            ErrorCode::DuplicateDependency,
            Some(json!({"from": from, "to": to})),
        ),
        BeadsError::Git { op, detail } => {
            (ErrorCode::GitError, Some(json!({"op": op, "detail": detail})))
        }
        BeadsError::SnapshotInvalid { reason } => {
            (ErrorCode::SnapshotInvalid, Some(json!({"reason": reason})))
        }
        BeadsError::DeletionApplyFailed { failures } => (
            ErrorCode::DeletionApplyFailed,
            Some(json!({
                "failures": failures
                    .iter()
                    .map(|(id, msg)| json!({"id": id, "error": msg}))
                    .collect::<Vec<_>>()
            })),
        ),
        BeadsError::ImportLoss { before, after } => (
            ErrorCode::ImportLoss,
            Some(json!({"before": before, "after": after})),
        ),
        BeadsError::DaemonUnavailable { reason } => (
            ErrorCode::DaemonUnavailable,
            Some(json!({"reason": reason.as_str()})),
        ),
        BeadsError::RepoMismatch { stored, actual } => (
            ErrorCode::RepoMismatch,
            Some(json!({"stored": stored, "actual": actual})),
        ),
        BeadsError::Config(_) => (ErrorCode::ConfigError, None),
        BeadsError::NotInitialized => (ErrorCode::NotInitialized, None),
        BeadsError::AlreadyInitialized { path } => (
            ErrorCode::AlreadyInitialized,
            Some(json!({"path": path.display().to_string()})),
        ),
        BeadsError::Io(_) => (ErrorCode::IoError, None),
        BeadsError::Json(_) => (ErrorCode::JsonError, None),
        BeadsError::Yaml(_) => (ErrorCode::YamlError, None),
        BeadsError::Other(_) => (ErrorCode::InternalError, None),
    }
}
