//! `SQLite` storage implementation.

use crate::error::{BeadsError, Result};
use crate::model::{Comment, Dependency, DependencyType, Event, EventType, Issue, IssueType, Priority, Status};
use crate::storage::schema::apply_schema;
use crate::util::content_hash;
use crate::util::time::to_rfc3339;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Metadata key for the engine version stamped into the store.
pub const METADATA_BD_VERSION: &str = "bd_version";
/// Metadata key for the content hash of the last imported/exported mirror.
pub const METADATA_LAST_IMPORT_HASH: &str = "last_import_hash";
/// Metadata key for the time of the last successful import.
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";
/// Metadata key for the hash of the mirror this store last wrote (integrity baseline).
pub const METADATA_JSONL_FILE_HASH: &str = "jsonl_file_hash";

const ISSUE_COLUMNS: &str = "id, content_hash, title, description, design, acceptance_criteria, \
     notes, status, priority, issue_type, assignee, external_ref, source_repo, created_at, \
     created_by, updated_at, closed_at, compaction_level, original_size, compacted_at";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    path: Option<PathBuf>,
}

/// Context for a mutation operation, tracking side effects.
pub struct MutationContext {
    pub op_name: String,
    pub actor: String,
    pub events: Vec<Event>,
    pub dirty_ids: HashSet<String>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
            dirty_ids: HashSet::new(),
        }
    }

    pub fn record_event(&mut self, event_type: EventType, issue_id: &str, details: Option<String>) {
        self.events.push(Event {
            id: 0, // placeholder, DB assigns auto-inc ID
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value: None,
            new_value: None,
            comment: details,
            created_at: Utc::now(),
        });
    }

    /// Record a field change event with old and new values.
    pub fn record_field_change(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(Event {
            id: 0,
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value,
            new_value,
            comment: None,
            created_at: Utc::now(),
        });
    }

    pub fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }
}

/// Partial-field update for [`SqliteStorage::update_issue`].
///
/// `Option<Option<T>>` fields distinguish "leave unchanged" (outer `None`)
/// from "clear" (inner `None`).
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub design: Option<Option<String>>,
    pub acceptance_criteria: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<Option<String>>,
    pub external_ref: Option<Option<String>>,
    pub source_repo: Option<Option<String>>,
}

impl IssueUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.external_ref.is_none()
            && self.source_repo.is_none()
    }
}

/// Search/list filters for issues.
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub status: Option<Status>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub label: Option<String>,
    pub source_repo: Option<String>,
    pub limit: Option<usize>,
}

impl SqliteStorage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Path this store was opened at, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// The closure does its work against the transaction and records events
    /// and dirty marks on the context; both are committed atomically with
    /// the mutation. On any error the transaction rolls back and neither
    /// the audit log nor the dirty set is touched.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in ctx.events {
            tx.execute(
                "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    event.issue_id,
                    event.event_type.as_str(),
                    event.actor,
                    event.old_value,
                    event.new_value,
                    event.comment,
                    to_rfc3339(event.created_at)
                ],
            )?;
        }

        for id in ctx.dirty_ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                rusqlite::params![id, to_rfc3339(Utc::now())],
            )?;
        }

        tx.commit()?;

        Ok(result)
    }

    // =========================================================================
    // Issue CRUD
    // =========================================================================

    /// Create a new issue.
    ///
    /// Initializes the content hash if unset and adds the ID to the dirty
    /// set atomically with the insert.
    ///
    /// # Errors
    ///
    /// Returns `IdCollision` if the ID already exists, validation errors on
    /// bad fields, or a database error.
    pub fn create_issue(&mut self, issue: &Issue, actor: &str) -> Result<()> {
        if issue.title.is_empty() || issue.title.len() > 500 {
            return Err(BeadsError::validation("title", "must be 1-500 characters"));
        }
        if !(0..=4).contains(&issue.priority.0) {
            return Err(BeadsError::InvalidPriority {
                priority: issue.priority.0,
            });
        }
        if issue.status.is_closed() != issue.closed_at.is_some() {
            return Err(BeadsError::validation(
                "closed_at",
                "must be set exactly when status is closed",
            ));
        }

        let hash = issue
            .content_hash
            .clone()
            .unwrap_or_else(|| content_hash(issue));

        self.mutate("create_issue", actor, |tx, ctx| {
            let inserted = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO issues ({ISSUE_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                rusqlite::params![
                    issue.id,
                    hash,
                    issue.title,
                    issue.description,
                    issue.design,
                    issue.acceptance_criteria,
                    issue.notes,
                    issue.status.as_str(),
                    issue.priority.0,
                    issue.issue_type.as_str(),
                    issue.assignee,
                    issue.external_ref,
                    issue.source_repo,
                    to_rfc3339(issue.created_at),
                    issue.created_by,
                    to_rfc3339(issue.updated_at),
                    issue.closed_at.map(to_rfc3339),
                    issue.compaction_level,
                    issue.original_size,
                    issue.compacted_at.map(to_rfc3339),
                ],
            )?;

            if inserted == 0 {
                return Err(BeadsError::IdCollision {
                    id: issue.id.clone(),
                });
            }

            ctx.record_event(
                EventType::Created,
                &issue.id,
                Some(format!("Created issue: {}", issue.title)),
            );
            ctx.mark_dirty(&issue.id);

            Ok(())
        })
    }

    /// Update an issue's fields.
    ///
    /// Manages the closed-status invariant: transitioning to closed stamps
    /// `closed_at`, transitioning away clears it. Bumps `updated_at`,
    /// recomputes the content hash, and marks the issue dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the update fails.
    #[allow(clippy::too_many_lines)]
    pub fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        if updates.is_empty() {
            return Ok(issue);
        }

        let was_closed = issue.status.is_closed();

        self.mutate("update_issue", actor, |tx, ctx| {
            if let Some(ref title) = updates.title {
                if title.is_empty() || title.len() > 500 {
                    return Err(BeadsError::validation("title", "must be 1-500 characters"));
                }
                let old = std::mem::replace(&mut issue.title, title.clone());
                ctx.record_field_change(EventType::Updated, id, Some(old), Some(title.clone()));
            }
            if let Some(ref val) = updates.description {
                issue.description.clone_from(val);
            }
            if let Some(ref val) = updates.design {
                issue.design.clone_from(val);
            }
            if let Some(ref val) = updates.acceptance_criteria {
                issue.acceptance_criteria.clone_from(val);
            }
            if let Some(ref val) = updates.notes {
                issue.notes.clone_from(val);
            }
            if let Some(ref status) = updates.status {
                let old = issue.status.as_str().to_string();
                issue.status = status.clone();
                ctx.record_field_change(
                    EventType::StatusChanged,
                    id,
                    Some(old),
                    Some(status.as_str().to_string()),
                );
            }
            if let Some(priority) = updates.priority {
                if !(0..=4).contains(&priority.0) {
                    return Err(BeadsError::InvalidPriority {
                        priority: priority.0,
                    });
                }
                let old = issue.priority;
                issue.priority = priority;
                if old != priority {
                    ctx.record_field_change(
                        EventType::PriorityChanged,
                        id,
                        Some(old.to_string()),
                        Some(priority.to_string()),
                    );
                }
            }
            if let Some(ref issue_type) = updates.issue_type {
                issue.issue_type = issue_type.clone();
            }
            if let Some(ref assignee) = updates.assignee {
                let old = issue.assignee.clone();
                issue.assignee.clone_from(assignee);
                if old != *assignee {
                    ctx.record_field_change(
                        EventType::AssigneeChanged,
                        id,
                        old,
                        assignee.clone(),
                    );
                }
            }
            if let Some(ref val) = updates.external_ref {
                issue.external_ref.clone_from(val);
            }
            if let Some(ref val) = updates.source_repo {
                issue.source_repo.clone_from(val);
            }

            // Closed-status invariant: closed_at present exactly when closed
            let now = Utc::now();
            if issue.status.is_closed() {
                if issue.closed_at.is_none() {
                    issue.closed_at = Some(now);
                }
                if !was_closed {
                    ctx.record_event(EventType::Closed, id, None);
                }
            } else {
                if was_closed {
                    ctx.record_event(EventType::Reopened, id, None);
                }
                issue.closed_at = None;
            }

            issue.updated_at = now;
            issue.content_hash = Some(content_hash(&issue));

            tx.execute(
                "UPDATE issues SET
                    content_hash = ?, title = ?, description = ?, design = ?,
                    acceptance_criteria = ?, notes = ?, status = ?, priority = ?,
                    issue_type = ?, assignee = ?, external_ref = ?, source_repo = ?,
                    updated_at = ?, closed_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    issue.content_hash,
                    issue.title,
                    issue.description,
                    issue.design,
                    issue.acceptance_criteria,
                    issue.notes,
                    issue.status.as_str(),
                    issue.priority.0,
                    issue.issue_type.as_str(),
                    issue.assignee,
                    issue.external_ref,
                    issue.source_repo,
                    to_rfc3339(issue.updated_at),
                    issue.closed_at.map(to_rfc3339),
                    id,
                ],
            )?;

            ctx.mark_dirty(id);

            Ok(())
        })?;

        Ok(issue)
    }

    /// Get an issue by ID (base row only; relations load separately).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        let result = self.conn.query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"),
            [id],
            issue_from_row,
        );
        match result {
            Ok(issue) => Ok(Some(issue)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BeadsError::Database(e)),
        }
    }

    /// Search issues by free-text query over title/description/notes plus
    /// structured filters.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn search_issues(&self, query: &str, filters: &ListFilters) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !query.is_empty() {
            sql.push_str(
                " AND (title LIKE '%'||?||'%' OR description LIKE '%'||?||'%' OR notes LIKE '%'||?||'%')",
            );
            params.push(Box::new(query.to_string()));
            params.push(Box::new(query.to_string()));
            params.push(Box::new(query.to_string()));
        }
        if let Some(ref status) = filters.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }
        if let Some(ref issue_type) = filters.issue_type {
            sql.push_str(" AND issue_type = ?");
            params.push(Box::new(issue_type.as_str().to_string()));
        }
        if let Some(priority) = filters.priority {
            sql.push_str(" AND priority = ?");
            params.push(Box::new(priority.0));
        }
        if let Some(ref assignee) = filters.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Box::new(assignee.clone()));
        }
        if let Some(ref source_repo) = filters.source_repo {
            sql.push_str(" AND source_repo = ?");
            params.push(Box::new(source_repo.clone()));
        }
        if let Some(ref label) = filters.label {
            sql.push_str(" AND id IN (SELECT issue_id FROM labels WHERE label = ?)");
            params.push(Box::new(label.clone()));
        }

        sql.push_str(" ORDER BY priority, updated_at DESC");
        if let Some(limit) = filters.limit {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let issues = stmt
            .query_map(params_refs.as_slice(), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    /// Hard-delete an issue, cascading dependencies and labels.
    ///
    /// Used by accepted-deletion pruning and administrative deletes only;
    /// normal workflows close issues instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the delete fails.
    pub fn delete_issue(&mut self, id: &str, actor: &str) -> Result<()> {
        if self.get_issue(id)?.is_none() {
            return Err(BeadsError::IssueNotFound { id: id.to_string() });
        }

        self.mutate("delete_issue", actor, |tx, _ctx| {
            // Dependencies have no FK; remove both directions explicitly.
            tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? OR depends_on_id = ?",
                rusqlite::params![id, id],
            )?;
            tx.execute("DELETE FROM dirty_issues WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM export_hashes WHERE issue_id = ?", [id])?;
            tx.execute("DELETE FROM child_counters WHERE parent_id = ?", [id])?;
            tx.execute("DELETE FROM events WHERE issue_id = ?", [id])?;
            // Labels and comments cascade via FK.
            tx.execute("DELETE FROM issues WHERE id = ?", [id])?;
            Ok(())
        })?;

        tracing::debug!(id, actor, "Deleted issue");
        Ok(())
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    /// Add a dependency between two issues.
    ///
    /// Rejects self-dependencies, duplicates, and blocking cycles. For
    /// `parent-child` edges whose child carries a hierarchical suffix, the
    /// parent's child counter is advanced past the suffix.
    ///
    /// # Errors
    ///
    /// Returns an error on validation failure or database failure.
    pub fn add_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
        actor: &str,
    ) -> Result<()> {
        if issue_id == depends_on_id {
            return Err(BeadsError::SelfDependency {
                id: issue_id.to_string(),
            });
        }
        if self.get_issue(issue_id)?.is_none() {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        if self.dependency_exists_between(issue_id, depends_on_id)? {
            return Err(BeadsError::DuplicateDependency {
                from: issue_id.to_string(),
                to: depends_on_id.to_string(),
            });
        }
        if dep_type.is_blocking() && self.would_create_cycle(issue_id, depends_on_id)? {
            return Err(BeadsError::DependencyCycle {
                path: format!("{issue_id} -> {depends_on_id} -> ... -> {issue_id}"),
            });
        }

        let child_suffix = if *dep_type == DependencyType::ParentChild {
            crate::util::parse_id(issue_id)
                .ok()
                .and_then(|p| p.child_path.last().copied())
        } else {
            None
        };

        self.mutate("add_dependency", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    issue_id,
                    depends_on_id,
                    dep_type.as_str(),
                    to_rfc3339(Utc::now()),
                    actor,
                ],
            )?;

            if let Some(n) = child_suffix {
                tx.execute(
                    "INSERT INTO child_counters (parent_id, next_child_number) VALUES (?1, ?2)
                     ON CONFLICT(parent_id) DO UPDATE
                     SET next_child_number = MAX(next_child_number, ?2)",
                    rusqlite::params![depends_on_id, n + 1],
                )?;
            }

            ctx.record_event(
                EventType::DependencyAdded,
                issue_id,
                Some(format!("{dep_type} {depends_on_id}")),
            );
            ctx.mark_dirty(issue_id);

            Ok(())
        })
    }

    /// Remove a dependency.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<bool> {
        self.mutate("remove_dependency", actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
                rusqlite::params![issue_id, depends_on_id],
            )?;
            if removed > 0 {
                ctx.record_event(
                    EventType::DependencyRemoved,
                    issue_id,
                    Some(depends_on_id.to_string()),
                );
                ctx.mark_dirty(issue_id);
            }
            Ok(removed > 0)
        })
    }

    /// Get outgoing dependency records for one issue, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by
             FROM dependencies WHERE issue_id = ?
             ORDER BY created_at, depends_on_id",
        )?;
        let deps = stmt
            .query_map([issue_id], dependency_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    /// Get all dependency records grouped by source issue (bulk export path).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_dependency_records(&self) -> Result<HashMap<String, Vec<Dependency>>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by
             FROM dependencies ORDER BY issue_id, created_at, depends_on_id",
        )?;
        let deps = stmt
            .query_map([], dependency_from_row)?
            .collect::<std::result::Result<Vec<Dependency>, _>>()?;

        let mut map: HashMap<String, Vec<Dependency>> = HashMap::new();
        for dep in deps {
            map.entry(dep.issue_id.clone()).or_default().push(dep);
        }
        Ok(map)
    }

    fn dependency_exists_between(&self, issue_id: &str, depends_on_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM dependencies WHERE issue_id = ? AND depends_on_id = ?",
            rusqlite::params![issue_id, depends_on_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check if adding a dependency would create a cycle among blocking edges.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn would_create_cycle(&self, issue_id: &str, depends_on_id: &str) -> Result<bool> {
        // If A depends on B, a cycle exists if A is reachable from B.
        let exists: bool = self
            .conn
            .query_row(
                r"
                WITH RECURSIVE transitive_deps(id) AS (
                    SELECT depends_on_id FROM dependencies
                    WHERE issue_id = ?1 AND type IN ('blocks', 'parent-child')
                    UNION
                    SELECT d.depends_on_id
                    FROM dependencies d
                    JOIN transitive_deps td ON d.issue_id = td.id
                    WHERE d.type IN ('blocks', 'parent-child')
                )
                SELECT 1 FROM transitive_deps WHERE id = ?2 LIMIT 1;
                ",
                rusqlite::params![depends_on_id, issue_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        Ok(exists)
    }

    /// Detect all cycles in the dependency graph.
    ///
    /// Recursive traversal with path tracking and a depth bound; used by
    /// doctor, not on the flush/sync hot path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn detect_all_cycles(&self, max_depth: usize) -> Result<Vec<Vec<String>>> {
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, depends_on_id FROM dependencies ORDER BY issue_id, depends_on_id")?;

        let edges = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for edge in edges {
            let (from, to) = edge?;
            graph.entry(from).or_default().push(to);
        }

        let mut cycles = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut keys: Vec<_> = graph.keys().cloned().collect();
        keys.sort();

        for node in keys {
            if visited.contains(&node) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path: HashSet<String> = HashSet::new();
            walk_cycles(
                &graph,
                &node,
                max_depth,
                &mut path,
                &mut on_path,
                &mut visited,
                &mut cycles,
            );
        }

        Ok(cycles)
    }

    /// Find dependencies whose target no longer resolves to an issue.
    ///
    /// Orphans are non-fatal during export; `validate` reports them and the
    /// `--fix` path removes them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_orphaned_dependencies(&self) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.issue_id, d.depends_on_id, d.type, d.created_at, d.created_by
             FROM dependencies d
             WHERE NOT EXISTS (SELECT 1 FROM issues i WHERE i.id = d.depends_on_id)
             ORDER BY d.issue_id, d.depends_on_id",
        )?;
        let deps = stmt
            .query_map([], dependency_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(deps)
    }

    /// Next free child number for a parent (I5 bookkeeping).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn next_child_number(&self, parent_id: &str) -> Result<u32> {
        let n: Option<i64> = self
            .conn
            .query_row(
                "SELECT next_child_number FROM child_counters WHERE parent_id = ?",
                [parent_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(u32::try_from(n.unwrap_or(1)).unwrap_or(1))
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Add a label to an issue. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the insert fails.
    pub fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        if self.get_issue(issue_id)?.is_none() {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }
        self.mutate("add_label", actor, |tx, ctx| {
            let added = tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
            if added > 0 {
                ctx.record_event(EventType::LabelAdded, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(added > 0)
        })
    }

    /// Remove a label from an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool> {
        self.mutate("remove_label", actor, |tx, ctx| {
            let removed = tx.execute(
                "DELETE FROM labels WHERE issue_id = ? AND label = ?",
                rusqlite::params![issue_id, label],
            )?;
            if removed > 0 {
                ctx.record_event(EventType::LabelRemoved, issue_id, Some(label.to_string()));
                ctx.mark_dirty(issue_id);
            }
            Ok(removed > 0)
        })
    }

    /// Get labels for an issue, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ? ORDER BY label")?;
        let labels = stmt
            .query_map([issue_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    /// All labels grouped by issue, each sorted (bulk export path).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_labels(&self) -> Result<HashMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id, label FROM labels ORDER BY issue_id, label")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (issue_id, label) in rows {
            map.entry(issue_id).or_default().push(label);
        }
        Ok(map)
    }

    // =========================================================================
    // Comments
    // =========================================================================

    /// Append a comment to an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist or the insert fails.
    pub fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        if self.get_issue(issue_id)?.is_none() {
            return Err(BeadsError::IssueNotFound {
                id: issue_id.to_string(),
            });
        }

        let created_at = Utc::now();
        let comment_id = self.mutate("add_comment", author, |tx, ctx| {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![issue_id, author, text, to_rfc3339(created_at)],
            )?;
            let comment_id = tx.last_insert_rowid();
            ctx.record_event(EventType::Commented, issue_id, None);
            ctx.mark_dirty(issue_id);
            Ok(comment_id)
        })?;

        Ok(Comment {
            id: comment_id,
            issue_id: issue_id.to_string(),
            author: author.to_string(),
            body: text.to_string(),
            created_at,
        })
    }

    /// Comments for one issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments
             WHERE issue_id = ? ORDER BY created_at, id",
        )?;
        let comments = stmt
            .query_map([issue_id], comment_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    /// All comments grouped by issue (bulk export path).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at FROM comments
             ORDER BY issue_id, created_at, id",
        )?;
        let comments = stmt
            .query_map([], comment_from_row)?
            .collect::<std::result::Result<Vec<Comment>, _>>()?;

        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        for comment in comments {
            map.entry(comment.issue_id.clone()).or_default().push(comment);
        }
        Ok(map)
    }

    // =========================================================================
    // Dirty tracking
    // =========================================================================

    /// IDs whose mirror representation is stale, oldest mark first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dirty_issue_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Clear dirty flags for the given issue IDs after a successful export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn clear_dirty_issues(&mut self, issue_ids: &[String]) -> Result<usize> {
        if issue_ids.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<&str> = issue_ids.iter().map(|_| "?").collect();
        let sql = format!(
            "DELETE FROM dirty_issues WHERE issue_id IN ({})",
            placeholders.join(",")
        );
        let params: Vec<&dyn rusqlite::ToSql> = issue_ids
            .iter()
            .map(|s| s as &dyn rusqlite::ToSql)
            .collect();

        let count = self.conn.execute(&sql, params.as_slice())?;
        Ok(count)
    }

    /// Mark a single issue's mirror representation stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn mark_issue_dirty(&mut self, issue_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
            rusqlite::params![issue_id, to_rfc3339(Utc::now())],
        )?;
        Ok(())
    }

    // =========================================================================
    // Export hashes
    // =========================================================================

    /// Get the stored export hash for an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT content_hash FROM export_hashes WHERE issue_id = ?",
            [issue_id],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BeadsError::Database(e)),
        }
    }

    /// Batch record export hashes after a successful export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_export_hashes(&mut self, exports: &[(String, String)]) -> Result<usize> {
        if exports.is_empty() {
            return Ok(0);
        }
        let now = to_rfc3339(Utc::now());
        let mut stmt = self.conn.prepare(
            "INSERT OR REPLACE INTO export_hashes (issue_id, content_hash, exported_at) VALUES (?, ?, ?)",
        )?;
        let mut count = 0;
        for (issue_id, hash) in exports {
            stmt.execute(rusqlite::params![issue_id, hash, now])?;
            count += 1;
        }
        Ok(count)
    }

    /// Clear all export hashes (before import, or on integrity failure).
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn clear_all_export_hashes(&mut self) -> Result<usize> {
        let count = self.conn.execute("DELETE FROM export_hashes", [])?;
        Ok(count)
    }

    // =========================================================================
    // Config & metadata
    // =========================================================================

    /// Get a config value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BeadsError::Database(e)),
        }
    }

    /// Set a config value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// All config key/value pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_config(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }

    /// Get a metadata value by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BeadsError::Database(e)),
        }
    }

    /// Set a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// The integrity baseline: hash of the mirror this store last wrote.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_jsonl_file_hash(&self) -> Result<Option<String>> {
        self.get_metadata(METADATA_JSONL_FILE_HASH)
    }

    /// Record the hash of the mirror this store just wrote.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_jsonl_file_hash(&mut self, hash: &str) -> Result<()> {
        self.set_metadata(METADATA_JSONL_FILE_HASH, hash)
    }

    // =========================================================================
    // Export & import support
    // =========================================================================

    /// Count issues in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_issues(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM issues", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// All issue IDs, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM issues ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Check whether an ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn id_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issues WHERE id = ?",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All issues sorted by ID with relations unpopulated (the export path
    /// fills them from the bulk queries).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_all_issues_for_export(&self) -> Result<Vec<Issue>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id"))?;
        let issues = stmt
            .query_map([], issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    /// Fetch a batch of issues by ID (incremental export path).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({}) ORDER BY id",
            placeholders.join(",")
        );
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let issues = stmt
            .query_map(params.as_slice(), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    /// Upsert an issue (create or update) for import operations.
    ///
    /// Does NOT trigger dirty tracking or events; the importer decides what
    /// to flush afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_issue_for_import(&mut self, issue: &Issue) -> Result<bool> {
        let rows = self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO issues ({ISSUE_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            rusqlite::params![
                issue.id,
                issue.content_hash,
                issue.title,
                issue.description,
                issue.design,
                issue.acceptance_criteria,
                issue.notes,
                issue.status.as_str(),
                issue.priority.0,
                issue.issue_type.as_str(),
                issue.assignee,
                issue.external_ref,
                issue.source_repo,
                to_rfc3339(issue.created_at),
                issue.created_by,
                to_rfc3339(issue.updated_at),
                issue.closed_at.map(to_rfc3339),
                issue.compaction_level,
                issue.original_size,
                issue.compacted_at.map(to_rfc3339),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Sync labels for an issue (remove existing, add new).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_labels_for_import(&mut self, issue_id: &str, labels: &[String]) -> Result<()> {
        self.conn
            .execute("DELETE FROM labels WHERE issue_id = ?", [issue_id])?;
        for label in labels {
            self.conn.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)",
                rusqlite::params![issue_id, label],
            )?;
        }
        Ok(())
    }

    /// Sync dependencies for an issue (remove existing, add new).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_dependencies_for_import(
        &mut self,
        issue_id: &str,
        dependencies: &[Dependency],
    ) -> Result<()> {
        self.conn
            .execute("DELETE FROM dependencies WHERE issue_id = ?", [issue_id])?;
        for dep in dependencies {
            self.conn.execute(
                "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at, created_by)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![
                    issue_id,
                    dep.depends_on_id,
                    dep.dep_type.as_str(),
                    to_rfc3339(dep.created_at),
                    dep.created_by.as_deref().unwrap_or("import"),
                ],
            )?;
        }
        Ok(())
    }

    /// Sync comments for an issue (remove existing, add new).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sync_comments_for_import(&mut self, issue_id: &str, comments: &[Comment]) -> Result<()> {
        self.conn
            .execute("DELETE FROM comments WHERE issue_id = ?", [issue_id])?;
        for comment in comments {
            self.conn.execute(
                "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?, ?, ?, ?)",
                rusqlite::params![
                    issue_id,
                    comment.author,
                    comment.body,
                    to_rfc3339(comment.created_at)
                ],
            )?;
        }
        Ok(())
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Closed issues eligible for compaction to the next level.
    ///
    /// Candidates are closed at least `min_age_days` ago and below the
    /// maximum compaction level.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn compaction_candidates(&self, min_age_days: i64) -> Result<Vec<Issue>> {
        let cutoff = to_rfc3339(Utc::now() - chrono::Duration::days(min_age_days));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues
             WHERE status = 'closed' AND compaction_level < 2 AND closed_at <= ?
             ORDER BY closed_at"
        ))?;
        let issues = stmt
            .query_map([cutoff], issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    /// Replace an issue's long-form content with a summary and bump its
    /// compaction level, recording the original size and an audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the issue doesn't exist, is already at the
    /// maximum level, or the update fails.
    pub fn apply_compaction(&mut self, id: &str, summary: &str, actor: &str) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;

        if issue.compaction_level >= 2 {
            return Err(BeadsError::validation(
                "compaction_level",
                "already at maximum compaction level",
            ));
        }

        let original_size = i32::try_from(
            issue.description.as_deref().map_or(0, str::len)
                + issue.design.as_deref().map_or(0, str::len)
                + issue.notes.as_deref().map_or(0, str::len),
        )
        .unwrap_or(i32::MAX);

        self.mutate("apply_compaction", actor, |tx, ctx| {
            issue.description = Some(summary.to_string());
            issue.design = None;
            issue.notes = None;
            issue.compaction_level += 1;
            if issue.original_size.is_none() {
                issue.original_size = Some(original_size);
            }
            issue.compacted_at = Some(Utc::now());
            issue.updated_at = Utc::now();
            issue.content_hash = Some(content_hash(&issue));

            tx.execute(
                "UPDATE issues SET
                    content_hash = ?, description = ?, design = NULL, notes = NULL,
                    compaction_level = ?, original_size = ?, compacted_at = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    issue.content_hash,
                    issue.description,
                    issue.compaction_level,
                    issue.original_size,
                    issue.compacted_at.map(to_rfc3339),
                    to_rfc3339(issue.updated_at),
                    id,
                ],
            )?;

            ctx.record_event(
                EventType::Compacted,
                id,
                Some(format!("level {}", issue.compaction_level)),
            );
            ctx.mark_dirty(id);

            Ok(())
        })?;

        Ok(issue)
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_cycles(
    graph: &HashMap<String, Vec<String>>,
    node: &str,
    depth_left: usize,
    path: &mut Vec<String>,
    on_path: &mut HashSet<String>,
    visited: &mut HashSet<String>,
    cycles: &mut Vec<Vec<String>>,
) {
    if depth_left == 0 {
        return;
    }
    visited.insert(node.to_string());
    on_path.insert(node.to_string());
    path.push(node.to_string());

    if let Some(neighbors) = graph.get(node) {
        for next in neighbors {
            if on_path.contains(next) {
                if let Some(start) = path.iter().position(|x| x == next) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next.clone());
                    cycles.push(cycle);
                }
            } else if !visited.contains(next) {
                walk_cycles(graph, next, depth_left - 1, path, on_path, visited, cycles);
            }
        }
    }

    path.pop();
    on_path.remove(node);
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        design: row.get(4)?,
        acceptance_criteria: row.get(5)?,
        notes: row.get(6)?,
        status: row
            .get::<_, String>(7)?
            .parse()
            .unwrap_or(Status::Open),
        priority: Priority(row.get::<_, Option<i32>>(8)?.unwrap_or(2)),
        issue_type: row
            .get::<_, String>(9)?
            .parse()
            .unwrap_or(IssueType::Task),
        assignee: row.get(10)?,
        external_ref: row.get(11)?,
        source_repo: row.get(12)?,
        created_at: parse_datetime(&row.get::<_, String>(13)?),
        created_by: row.get(14)?,
        updated_at: parse_datetime(&row.get::<_, String>(15)?),
        closed_at: row
            .get::<_, Option<String>>(16)?
            .as_deref()
            .map(parse_datetime),
        compaction_level: row.get::<_, Option<i32>>(17)?.unwrap_or(0),
        original_size: row.get(18)?,
        compacted_at: row
            .get::<_, Option<String>>(19)?
            .as_deref()
            .map(parse_datetime),
        labels: vec![],       // loaded separately if needed
        dependencies: vec![], // loaded separately if needed
        comments: vec![],     // loaded separately if needed
    })
}

fn dependency_from_row(row: &rusqlite::Row) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        issue_id: row.get(0)?,
        depends_on_id: row.get(1)?,
        dep_type: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(DependencyType::Related),
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        created_by: row.get(4)?,
    })
}

fn comment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}
