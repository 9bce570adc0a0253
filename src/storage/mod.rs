//! Persistent storage for beads.
//!
//! The `SQLite` database is the authoritative operational store; the JSONL
//! mirror is derived from it by the sync engine. All mutations run through
//! [`SqliteStorage::mutate`], which commits audit events and dirty marks
//! atomically with the change itself.

mod events;
pub mod schema;
mod sqlite;

pub use events::get_events;
pub use sqlite::{
    IssueUpdate, ListFilters, METADATA_BD_VERSION, METADATA_JSONL_FILE_HASH,
    METADATA_LAST_IMPORT_HASH, METADATA_LAST_IMPORT_TIME, MutationContext, SqliteStorage,
};
