//! Audit event queries.

use rusqlite::Connection;

use crate::error::Result;
use crate::model::Event;
use crate::util::time::parse_rfc3339;

/// Fetch the most recent events for an issue, newest first.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_events(conn: &Connection, issue_id: &str, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
         FROM events WHERE issue_id = ?
         ORDER BY created_at DESC, id DESC
         LIMIT ?",
    )?;

    let events = stmt
        .query_map(
            rusqlite::params![issue_id, i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(events.len());
    for (id, issue_id, event_type, actor, old_value, new_value, comment, created_at) in events {
        out.push(Event {
            id,
            issue_id,
            event_type: serde_json::from_value(serde_json::Value::String(event_type))?,
            actor,
            old_value,
            new_value,
            comment,
            created_at: parse_rfc3339(&created_at, "created_at")?,
        });
    }
    Ok(out)
}
