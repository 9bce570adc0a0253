//! Issue validation and store-level consistency checks.
//!
//! The validator enforces the record-level invariants on every import path;
//! the scan helpers back `bd validate` and `bd doctor`.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::Issue;
use crate::storage::SqliteStorage;
use crate::util::{id_depth, is_valid_id_format};

/// A single validation finding for an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Record-level validator applied to issues entering the store.
pub struct IssueValidator;

impl IssueValidator {
    /// Validate a single issue against the record invariants.
    ///
    /// # Errors
    ///
    /// Returns the list of findings when any invariant is violated.
    pub fn validate(issue: &Issue) -> std::result::Result<(), Vec<ValidationIssue>> {
        let mut findings = Vec::new();

        if !is_valid_id_format(&issue.id) {
            findings.push(ValidationIssue {
                field: "id".to_string(),
                message: format!("invalid ID format: {}", issue.id),
            });
        } else if id_depth(&issue.id) > crate::util::id::MAX_CHILD_DEPTH {
            findings.push(ValidationIssue {
                field: "id".to_string(),
                message: "hierarchical ID exceeds maximum depth".to_string(),
            });
        }

        if issue.title.is_empty() || issue.title.len() > 500 {
            findings.push(ValidationIssue {
                field: "title".to_string(),
                message: "must be 1-500 characters".to_string(),
            });
        }

        if !(0..=4).contains(&issue.priority.0) {
            findings.push(ValidationIssue {
                field: "priority".to_string(),
                message: format!("out of range: {}", issue.priority.0),
            });
        }

        // closed_at present exactly when status is closed
        if issue.status.is_closed() != issue.closed_at.is_some() {
            findings.push(ValidationIssue {
                field: "closed_at".to_string(),
                message: "must be set exactly when status is closed".to_string(),
            });
        }

        if issue.created_at > issue.updated_at {
            findings.push(ValidationIssue {
                field: "updated_at".to_string(),
                message: "precedes created_at".to_string(),
            });
        }
        if let Some(closed_at) = issue.closed_at {
            if issue.updated_at < closed_at {
                findings.push(ValidationIssue {
                    field: "closed_at".to_string(),
                    message: "after updated_at".to_string(),
                });
            }
        }

        if !(0..=2).contains(&issue.compaction_level) {
            findings.push(ValidationIssue {
                field: "compaction_level".to_string(),
                message: format!("out of range: {}", issue.compaction_level),
            });
        }

        if findings.is_empty() {
            Ok(())
        } else {
            Err(findings)
        }
    }
}

/// Duplicate IDs among a parsed record set (mirror-side check).
#[must_use]
pub fn find_duplicate_ids(issues: &[Issue]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for issue in issues {
        *counts.entry(issue.id.as_str()).or_default() += 1;
    }
    let mut dups: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id.to_string())
        .collect();
    dups.sort();
    dups
}

/// Report for `bd validate`.
#[derive(Debug, Default, serde::Serialize)]
pub struct ValidationReport {
    pub orphaned_dependencies: Vec<(String, String)>,
    pub invalid_issues: Vec<(String, Vec<String>)>,
    pub cycles: Vec<Vec<String>>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphaned_dependencies.is_empty()
            && self.invalid_issues.is_empty()
            && self.cycles.is_empty()
    }
}

/// Run the orphan/invariant/cycle checks against a store.
///
/// # Errors
///
/// Returns an error if a database query fails.
pub fn validate_store(storage: &SqliteStorage) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    for dep in storage.find_orphaned_dependencies()? {
        report
            .orphaned_dependencies
            .push((dep.issue_id, dep.depends_on_id));
    }

    for issue in storage.get_all_issues_for_export()? {
        if let Err(findings) = IssueValidator::validate(&issue) {
            report.invalid_issues.push((
                issue.id.clone(),
                findings.iter().map(ToString::to_string).collect(),
            ));
        }
    }

    report.cycles = storage.detect_all_cycles(100)?;

    Ok(report)
}

/// Remove orphaned dependencies (the `validate --fix` path).
///
/// # Errors
///
/// Returns an error if a database update fails.
pub fn fix_orphaned_dependencies(storage: &mut SqliteStorage, actor: &str) -> Result<usize> {
    let orphans = storage.find_orphaned_dependencies()?;
    let mut removed = 0;
    for dep in orphans {
        if storage.remove_dependency(&dep.issue_id, &dep.depends_on_id, actor)? {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;
    use chrono::Utc;

    #[test]
    fn test_valid_issue_passes() {
        let issue = Issue::new("bd-1", "Fine");
        assert!(IssueValidator::validate(&issue).is_ok());
    }

    #[test]
    fn test_closed_without_closed_at_fails() {
        let mut issue = Issue::new("bd-1", "Broken");
        issue.status = Status::Closed;
        let findings = IssueValidator::validate(&issue).unwrap_err();
        assert!(findings.iter().any(|f| f.field == "closed_at"));
    }

    #[test]
    fn test_closed_at_on_open_fails() {
        let mut issue = Issue::new("bd-1", "Broken");
        issue.closed_at = Some(Utc::now());
        assert!(IssueValidator::validate(&issue).is_err());
    }

    #[test]
    fn test_bad_id_fails() {
        let issue = Issue::new("no dash", "Title");
        let findings = IssueValidator::validate(&issue).unwrap_err();
        assert!(findings.iter().any(|f| f.field == "id"));
    }

    #[test]
    fn test_find_duplicate_ids() {
        let issues = vec![
            Issue::new("bd-1", "A"),
            Issue::new("bd-2", "B"),
            Issue::new("bd-1", "C"),
        ];
        assert_eq!(find_duplicate_ids(&issues), vec!["bd-1"]);
    }

    #[test]
    fn test_validate_store_reports_orphans() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .create_issue(&Issue::new("bd-1", "A"), "t")
            .unwrap();
        storage
            .add_dependency("bd-1", "bd-missing", &crate::model::DependencyType::Blocks, "t")
            .unwrap();

        let report = validate_store(&storage).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.orphaned_dependencies.len(), 1);

        let removed = fix_orphaned_dependencies(&mut storage, "t").unwrap();
        assert_eq!(removed, 1);
        assert!(validate_store(&storage).unwrap().is_clean());
    }
}
