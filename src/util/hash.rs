//! Content hashing for issue deduplication and sync.
//!
//! Uses SHA256 over stable ordered fields with null separators. Timestamps
//! are deliberately excluded so that a record's hash is stable across
//! import/export cycles.

use sha2::{Digest, Sha256};

use crate::model::Issue;

/// Trait for types that can produce a deterministic content hash.
pub trait ContentHashable {
    /// Compute the content hash for this value.
    fn content_hash(&self) -> String;
}

impl ContentHashable for Issue {
    fn content_hash(&self) -> String {
        content_hash(self)
    }
}

/// Compute SHA256 content hash for an issue.
///
/// Fields included (stable order with null separators):
/// - title, description, design, `acceptance_criteria`, notes
/// - status, priority, `issue_type`
/// - assignee, `external_ref`, `source_repo`
///
/// Fields excluded:
/// - id, `content_hash` (circular)
/// - labels, dependencies, comments, events (separate entities)
/// - timestamps (`created_at`, `updated_at`, `closed_at`, `compacted_at`)
/// - compaction bookkeeping
#[must_use]
pub fn content_hash(issue: &Issue) -> String {
    let mut hasher = Sha256::new();

    let mut add_field = |value: &str| {
        if value.contains('\0') {
            hasher.update(value.replace('\0', " ").as_bytes());
        } else {
            hasher.update(value.as_bytes());
        }
        hasher.update(b"\x00");
    };

    add_field(&issue.title);
    add_field(issue.description.as_deref().unwrap_or(""));
    add_field(issue.design.as_deref().unwrap_or(""));
    add_field(issue.acceptance_criteria.as_deref().unwrap_or(""));
    add_field(issue.notes.as_deref().unwrap_or(""));
    add_field(issue.status.as_str());
    add_field(&format!("P{}", issue.priority.0));
    add_field(issue.issue_type.as_str());
    add_field(issue.assignee.as_deref().unwrap_or(""));
    add_field(issue.external_ref.as_deref().unwrap_or(""));
    add_field(issue.source_repo.as_deref().unwrap_or(""));

    format!("{:x}", hasher.finalize())
}

/// SHA256 of raw bytes, hex-encoded.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Issue;
    use chrono::Utc;

    fn make_test_issue() -> Issue {
        let mut issue = Issue::new("bd-test123", "Test Issue");
        issue.description = Some("A test description".to_string());
        issue
    }

    #[test]
    fn test_content_hash_deterministic() {
        let issue = make_test_issue();
        assert_eq!(content_hash(&issue), content_hash(&issue));
    }

    #[test]
    fn test_content_hash_is_hex() {
        let hash = content_hash(&make_test_issue());
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_content_hash_changes_with_title() {
        let mut issue = make_test_issue();
        let hash1 = content_hash(&issue);
        issue.title = "Different Title".to_string();
        assert_ne!(hash1, content_hash(&issue));
    }

    #[test]
    fn test_content_hash_ignores_timestamps() {
        let mut issue = make_test_issue();
        let hash1 = content_hash(&issue);
        issue.updated_at = Utc::now() + chrono::Duration::hours(1);
        issue.closed_at = Some(Utc::now());
        assert_eq!(hash1, content_hash(&issue));
    }

    #[test]
    fn test_content_hash_ignores_id() {
        let mut issue = make_test_issue();
        let hash1 = content_hash(&issue);
        issue.id = "bd-other".to_string();
        assert_eq!(hash1, content_hash(&issue));
    }

    #[test]
    fn test_sha256_hex() {
        // Known SHA256 of empty input
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
