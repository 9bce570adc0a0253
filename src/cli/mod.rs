//! The `bd` command-line surface.

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Local-first issue tracker for software agents.
#[derive(Debug, Parser)]
#[command(name = "bd", version, about, disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit machine-readable JSON output.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Override the store path.
    #[arg(long, global = true, env = "BEADS_DB")]
    pub db: Option<PathBuf>,

    /// Never talk to a daemon; operate on the store directly.
    #[arg(long, global = true, env = "BEADS_NO_DAEMON")]
    pub no_daemon: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create `.beads/` and initialize the store and mirror.
    Init(InitArgs),
    /// Synchronize the store, the mirror, and git peers.
    Sync(SyncArgs),
    /// Run health checks over the workspace.
    Doctor(DoctorArgs),
    /// Run orphan/duplicate/conflict/invariant checks.
    Validate(ValidateArgs),
    /// Workspace and engine introspection.
    Info(InfoArgs),
    /// Control the background daemon.
    Daemon(DaemonArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Issue ID prefix (e.g. "bd" for bd-1).
    #[arg(long, default_value = "bd")]
    pub prefix: String,

    /// Initialize mirror-only (no SQLite store).
    #[arg(long)]
    pub no_db: bool,

    /// Sync branch recorded in config.
    #[arg(long, env = "BEADS_SYNC_BRANCH")]
    pub branch: Option<String>,

    /// Skip configuring the git merge attribute for the mirror.
    #[arg(long)]
    pub skip_merge_driver: bool,
}

#[derive(Debug, Args, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncArgs {
    /// Log each step without side effects.
    #[arg(long)]
    pub dry_run: bool,

    /// Export dirty state to the mirror and stop.
    #[arg(long)]
    pub flush_only: bool,

    /// Import the mirror into the store and stop.
    #[arg(long)]
    pub import_only: bool,

    /// Show sync state without changing anything.
    #[arg(long)]
    pub status: bool,

    /// Merge an externally-updated mirror (no git network actions).
    #[arg(long)]
    pub merge: bool,

    /// Skip the git pull.
    #[arg(long)]
    pub no_pull: bool,

    /// Skip the git push.
    #[arg(long)]
    pub no_push: bool,

    /// Commit message for the mirror auto-commit.
    #[arg(long, short)]
    pub message: Option<String>,

    /// Rewrite foreign-prefix IDs during import.
    #[arg(long)]
    pub rename_on_import: bool,
}

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Apply safe fixes (orphan removal, full re-export).
    #[arg(long)]
    pub fix: bool,

    /// Include per-check timings.
    #[arg(long)]
    pub perf: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Apply every available fix.
    #[arg(long)]
    pub fix_all: bool,

    /// Comma-separated checks to run (orphans,duplicates,conflicts,invariants,cycles).
    #[arg(long, value_delimiter = ',')]
    pub checks: Vec<String>,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Print the JSON schema of the issue record.
    #[arg(long)]
    pub schema: bool,

    /// Show recent engine changes.
    #[arg(long)]
    pub whats_new: bool,
}

#[derive(Debug, Args)]
pub struct DaemonArgs {
    /// Stop the running daemon.
    #[arg(long)]
    pub stop: bool,

    /// Show daemon status from the lock file.
    #[arg(long)]
    pub status: bool,

    /// Query daemon health over RPC.
    #[arg(long)]
    pub health: bool,

    /// Poll interval in seconds (poll mode).
    #[arg(long)]
    pub interval: Option<u64>,

    /// Register in the user-scoped global registry.
    #[arg(long)]
    pub global: bool,

    /// Log file path (defaults to .beads/daemon.log).
    #[arg(long)]
    pub log: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
