//! Three-way merge of issue sets.
//!
//! Reconciles `base` (last common state), `left` (local, pre-pull), and
//! `right` (external, post-pull) per issue. Change detection uses content
//! hashes so timestamp churn alone never counts as a modification.

use std::collections::{HashMap, HashSet};

use crate::model::Issue;
use crate::util::content_hash;

/// How an unresolvable difference was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// Issue was modified on one side but deleted on the other.
    DeleteVsModify,
    /// Issue was created on both sides with different content.
    ConvergentCreation,
}

/// Result of merging a single issue across base, left, and right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// No action needed (issue doesn't exist in any source).
    NoAction,
    /// Keep the specified issue.
    Keep(Issue),
    /// Keep the specified issue with a note about the merge decision.
    KeepWithNote(Issue, String),
    /// Delete the issue.
    Delete,
    /// A conflict was detected that requires manual resolution.
    Conflict(ConflictType),
}

/// Strategy for resolving conflicts during merge.
///
/// The field-merge policy between two records that both changed is
/// deliberately a pluggable value rather than hard-wired behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Always keep the local version.
    PreferLocal,
    /// Always keep the external version.
    PreferExternal,
    /// Use `updated_at` to determine the winner.
    #[default]
    PreferNewer,
    /// Report the conflict without auto-resolving.
    Manual,
}

/// Context for performing a 3-way merge operation.
#[derive(Debug, Default)]
pub struct MergeContext {
    /// Base state (last known common state).
    pub base: HashMap<String, Issue>,
    /// Left state (local changes).
    pub left: HashMap<String, Issue>,
    /// Right state (external changes).
    pub right: HashMap<String, Issue>,
}

impl MergeContext {
    /// Create a merge context, normalizing content hashes on all three sides.
    #[must_use]
    pub fn new(
        base: HashMap<String, Issue>,
        left: HashMap<String, Issue>,
        right: HashMap<String, Issue>,
    ) -> Self {
        let mut ctx = Self { base, left, right };
        for map in [&mut ctx.base, &mut ctx.left, &mut ctx.right] {
            for issue in map.values_mut() {
                if issue.content_hash.is_none() {
                    issue.content_hash = Some(content_hash(issue));
                }
            }
        }
        ctx
    }

    /// All unique issue IDs across the three states.
    #[must_use]
    pub fn all_issue_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        ids.extend(self.base.keys().cloned());
        ids.extend(self.left.keys().cloned());
        ids.extend(self.right.keys().cloned());
        ids
    }
}

/// Report of a 3-way merge operation.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Issues that survive the merge (created or updated).
    pub kept: Vec<Issue>,
    /// Issue IDs deleted by the merge.
    pub deleted: Vec<String>,
    /// Conflicts detected under the `Manual` strategy.
    pub conflicts: Vec<(String, ConflictType)>,
    /// Notes about non-obvious merge decisions.
    pub notes: Vec<(String, String)>,
}

impl MergeReport {
    /// Returns true if there were any conflicts.
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Merge a single issue given its state in base, left, and right.
///
/// - New issues on either side are kept
/// - A deletion wins only when the other side is unchanged since base
/// - Both-modified goes to the configured strategy
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn merge_issue(
    base: Option<&Issue>,
    left: Option<&Issue>,
    right: Option<&Issue>,
    strategy: ConflictResolution,
) -> MergeResult {
    match (base, left, right) {
        // Deleted on both sides
        (Some(_), None, None) => MergeResult::Delete,

        // New local issue
        (None, Some(l), None) => MergeResult::Keep(l.clone()),

        // New external issue
        (None, None, Some(r)) => MergeResult::Keep(r.clone()),

        // Deleted externally
        (Some(b), Some(l), None) => {
            if l.content_hash == b.content_hash {
                // Local untouched since base; accept the deletion
                MergeResult::Delete
            } else {
                match strategy {
                    ConflictResolution::PreferLocal | ConflictResolution::PreferNewer => {
                        MergeResult::KeepWithNote(
                            l.clone(),
                            "local modified, external deleted; kept local".to_string(),
                        )
                    }
                    ConflictResolution::PreferExternal => MergeResult::Delete,
                    ConflictResolution::Manual => {
                        MergeResult::Conflict(ConflictType::DeleteVsModify)
                    }
                }
            }
        }

        // Deleted locally
        (Some(b), None, Some(r)) => {
            if r.content_hash == b.content_hash {
                MergeResult::Delete
            } else {
                match strategy {
                    ConflictResolution::PreferExternal | ConflictResolution::PreferNewer => {
                        MergeResult::KeepWithNote(
                            r.clone(),
                            "external modified, local deleted; kept external".to_string(),
                        )
                    }
                    ConflictResolution::PreferLocal => MergeResult::Delete,
                    ConflictResolution::Manual => {
                        MergeResult::Conflict(ConflictType::DeleteVsModify)
                    }
                }
            }
        }

        // Present everywhere
        (Some(b), Some(l), Some(r)) => {
            let left_changed = l.content_hash != b.content_hash;
            let right_changed = r.content_hash != b.content_hash;

            match (left_changed, right_changed) {
                (_, false) => MergeResult::Keep(l.clone()),
                (false, true) => MergeResult::Keep(r.clone()),
                (true, true) => resolve_both_modified(l, r, strategy),
            }
        }

        // Created on both sides, no base
        (None, Some(l), Some(r)) => {
            if l.content_hash == r.content_hash {
                MergeResult::Keep(l.clone())
            } else {
                match strategy {
                    ConflictResolution::PreferLocal => MergeResult::KeepWithNote(
                        l.clone(),
                        "convergent creation; kept local".to_string(),
                    ),
                    ConflictResolution::PreferExternal => MergeResult::KeepWithNote(
                        r.clone(),
                        "convergent creation; kept external".to_string(),
                    ),
                    ConflictResolution::PreferNewer => {
                        let (winner, side) = if l.updated_at >= r.updated_at {
                            (l, "local")
                        } else {
                            (r, "external")
                        };
                        MergeResult::KeepWithNote(
                            winner.clone(),
                            format!("convergent creation; kept {side} (newer)"),
                        )
                    }
                    ConflictResolution::Manual => {
                        MergeResult::Conflict(ConflictType::ConvergentCreation)
                    }
                }
            }
        }

        (None, None, None) => MergeResult::NoAction,
    }
}

fn resolve_both_modified(l: &Issue, r: &Issue, strategy: ConflictResolution) -> MergeResult {
    match strategy {
        ConflictResolution::PreferLocal => {
            MergeResult::KeepWithNote(l.clone(), "both modified; kept local".to_string())
        }
        ConflictResolution::PreferExternal => {
            MergeResult::KeepWithNote(r.clone(), "both modified; kept external".to_string())
        }
        ConflictResolution::PreferNewer => {
            let (winner, side) = if l.updated_at >= r.updated_at {
                (l, "local")
            } else {
                (r, "external")
            };
            MergeResult::KeepWithNote(winner.clone(), format!("both modified; kept {side} (newer)"))
        }
        ConflictResolution::Manual => {
            // Even manual needs a working result; keep newer and flag for review
            let (winner, side) = if l.updated_at >= r.updated_at {
                (l, "local")
            } else {
                (r, "external")
            };
            MergeResult::KeepWithNote(
                winner.clone(),
                format!("both modified; kept {side} (newer), review recommended"),
            )
        }
    }
}

/// Perform a 3-way merge across all issues in the context.
#[must_use]
pub fn three_way_merge(context: &MergeContext, strategy: ConflictResolution) -> MergeReport {
    let mut report = MergeReport::default();

    let mut ids: Vec<String> = context.all_issue_ids().into_iter().collect();
    ids.sort();

    for id in ids {
        let result = merge_issue(
            context.base.get(&id),
            context.left.get(&id),
            context.right.get(&id),
            strategy,
        );

        match result {
            MergeResult::NoAction => {}
            MergeResult::Keep(issue) => report.kept.push(issue),
            MergeResult::KeepWithNote(issue, note) => {
                report.notes.push((issue.id.clone(), note));
                report.kept.push(issue);
            }
            MergeResult::Delete => report.deleted.push(id),
            MergeResult::Conflict(kind) => report.conflicts.push((id, kind)),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn issue_at(id: &str, title: &str, minutes: i64) -> Issue {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut issue = Issue::new(id, title);
        issue.created_at = base;
        issue.updated_at = base + Duration::minutes(minutes);
        issue.content_hash = Some(content_hash(&issue));
        issue
    }

    fn map(issues: &[Issue]) -> HashMap<String, Issue> {
        issues.iter().map(|i| (i.id.clone(), i.clone())).collect()
    }

    #[test]
    fn test_remote_delete_of_untouched_issue_is_accepted() {
        let a = issue_at("a-1", "One", 0);
        let result = merge_issue(Some(&a), Some(&a), None, ConflictResolution::PreferNewer);
        assert_eq!(result, MergeResult::Delete);
    }

    #[test]
    fn test_remote_delete_of_modified_issue_keeps_local() {
        let base = issue_at("a-1", "One", 0);
        let local = issue_at("a-1", "One edited", 5);
        let result = merge_issue(
            Some(&base),
            Some(&local),
            None,
            ConflictResolution::PreferNewer,
        );
        assert!(matches!(result, MergeResult::KeepWithNote(ref i, _) if i.title == "One edited"));
    }

    #[test]
    fn test_only_right_changed_takes_external() {
        let base = issue_at("a-1", "One", 0);
        let remote = issue_at("a-1", "One remote", 3);
        let result = merge_issue(
            Some(&base),
            Some(&base),
            Some(&remote),
            ConflictResolution::PreferNewer,
        );
        assert_eq!(result, MergeResult::Keep(remote));
    }

    #[test]
    fn test_both_modified_newer_wins() {
        let base = issue_at("a-1", "One", 0);
        let local = issue_at("a-1", "Local edit", 10);
        let remote = issue_at("a-1", "Remote edit", 20);
        let result = merge_issue(
            Some(&base),
            Some(&local),
            Some(&remote),
            ConflictResolution::PreferNewer,
        );
        assert!(matches!(result, MergeResult::KeepWithNote(ref i, _) if i.title == "Remote edit"));
    }

    #[test]
    fn test_timestamp_only_change_is_not_a_modification() {
        let base = issue_at("a-1", "One", 0);
        let mut touched = base.clone();
        touched.updated_at = touched.updated_at + Duration::hours(1);
        touched.content_hash = Some(content_hash(&touched));

        // Same content, different updated_at: remote deletion still wins
        let result = merge_issue(
            Some(&base),
            Some(&touched),
            None,
            ConflictResolution::PreferNewer,
        );
        assert_eq!(result, MergeResult::Delete);
    }

    #[test]
    fn test_convergent_identical_creation_dedupes() {
        let l = issue_at("a-1", "Same", 0);
        let r = issue_at("a-1", "Same", 9);
        let result = merge_issue(None, Some(&l), Some(&r), ConflictResolution::PreferNewer);
        assert_eq!(result, MergeResult::Keep(l));
    }

    #[test]
    fn test_manual_strategy_reports_delete_vs_modify() {
        let base = issue_at("a-1", "One", 0);
        let local = issue_at("a-1", "Edited", 5);
        let result = merge_issue(Some(&base), Some(&local), None, ConflictResolution::Manual);
        assert_eq!(result, MergeResult::Conflict(ConflictType::DeleteVsModify));
    }

    #[test]
    fn test_three_way_merge_accepted_deletion_scenario() {
        // base: a-1, a-2, a-3; left == base; right lost a-2
        let issues = vec![
            issue_at("a-1", "One", 0),
            issue_at("a-2", "Two", 0),
            issue_at("a-3", "Three", 0),
        ];
        let base = map(&issues);
        let left = base.clone();
        let right = map(&[issues[0].clone(), issues[2].clone()]);

        let report = three_way_merge(
            &MergeContext::new(base, left, right),
            ConflictResolution::PreferNewer,
        );
        assert_eq!(report.deleted, vec!["a-2"]);
        assert_eq!(report.kept.len(), 2);
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_context_normalizes_missing_hashes() {
        let mut no_hash = issue_at("a-1", "One", 0);
        no_hash.content_hash = None;
        let ctx = MergeContext::new(map(&[no_hash]), HashMap::new(), HashMap::new());
        assert!(ctx.base["a-1"].content_hash.is_some());
    }
}
