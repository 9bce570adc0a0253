//! `bd init` - workspace initialization.

use std::path::Path;

use crate::cli::InitArgs;
use crate::config;
use crate::error::{BeadsError, Result};
use crate::util::is_valid_prefix;

/// Execute `bd init` in the current directory.
///
/// # Errors
///
/// Returns an error if the workspace is already initialized, the prefix is
/// invalid, or filesystem operations fail.
pub fn execute(args: &InitArgs, quiet: bool) -> Result<()> {
    if !is_valid_prefix(&args.prefix) {
        return Err(BeadsError::validation(
            "prefix",
            "must be 1-12 lowercase letters (e.g. 'bd')",
        ));
    }

    let root = std::env::current_dir()?;
    let paths = config::init_workspace(&root, &args.prefix, args.no_db, args.branch.as_deref())?;

    if !args.skip_merge_driver {
        configure_merge_attribute(&root)?;
    }

    if !quiet {
        println!("Initialized beads workspace in {}", paths.beads_dir.display());
        println!("  prefix: {}", args.prefix);
        if args.no_db {
            println!("  mode: mirror-only (no store)");
        } else {
            println!("  store: {}", paths.db_path.display());
        }
    }

    Ok(())
}

/// Point git's line-union merge driver at the mirror so textual merges
/// never mangle record lines. The engine's own 3-way reconciliation still
/// runs on top during sync.
fn configure_merge_attribute(root: &Path) -> Result<()> {
    let attributes_path = root.join(".gitattributes");
    let entry = "/.beads/issues.jsonl merge=union";

    let existing = if attributes_path.exists() {
        std::fs::read_to_string(&attributes_path)?
    } else {
        String::new()
    };

    if existing.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&attributes_path, content)?;

    Ok(())
}
