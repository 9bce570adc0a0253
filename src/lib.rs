//! Beads: a local-first issue tracker for software agents.
//!
//! The library is organized around the synchronization engine that keeps the
//! embedded SQLite store and the git-tracked JSONL mirror equivalent:
//!
//! - [`storage`] - transactional issue store with dirty tracking
//! - [`jsonl`] - deterministic codec and atomic mirror writer
//! - [`sync`] - flush controller, auto-importer, 3-way merge, sync engine
//! - [`daemon`] - single-writer daemon and RPC front-end
//! - [`cli`] - the `bd` command surface

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod jsonl;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;
pub mod validation;

pub use error::{BeadsError, Result, StructuredError};

/// Engine version, written to the store as `bd_version` and carried by every
/// RPC response.
pub const BD_VERSION: &str = env!("CARGO_PKG_VERSION");
