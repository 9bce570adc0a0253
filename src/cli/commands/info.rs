//! `bd info` - workspace and engine introspection.

use std::path::PathBuf;

use serde_json::json;

use crate::cli::InfoArgs;
use crate::config;
use crate::error::Result;
use crate::model::Issue;
use crate::util::fingerprint::{METADATA_CLONE_ID, METADATA_REPO_ID};

const WHATS_NEW: &str = "\
0.4: hash-gated auto-import, three-way deletion reconciliation,
     debounced flush controller, daemon RPC front-end.
0.3: incremental mirror export with per-line export hashes.
0.2: atomic mirror writes, conflict-marker detection.
";

/// Execute `bd info`.
///
/// # Errors
///
/// Returns an error if the workspace cannot be opened (except for
/// `--schema` and `--whats-new`, which need no workspace).
pub fn execute(args: &InfoArgs, json: bool, db: Option<&PathBuf>) -> Result<()> {
    if args.schema {
        let schema = schemars::schema_for!(Issue);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    if args.whats_new {
        print!("{WHATS_NEW}");
        return Ok(());
    }

    let beads_dir = config::discover_beads_dir(None)?;
    let ctx = config::open_workspace(&beads_dir, db.map(PathBuf::as_path))?;

    let info = ctx.with_store(|storage| {
        Ok(json!({
            "version": crate::BD_VERSION,
            "workspace": ctx.workspace_root,
            "db": storage.path(),
            "mirror": ctx.mirror_path,
            "issues": storage.count_issues()?,
            "dirty": storage.get_dirty_issue_ids()?.len(),
            "prefix": storage.get_config("issue_prefix")?,
            "repo_id": storage.get_metadata(METADATA_REPO_ID)?,
            "clone_id": storage.get_metadata(METADATA_CLONE_ID)?,
            "bd_version": storage.get_metadata(crate::storage::METADATA_BD_VERSION)?,
            "last_import_time": storage.get_metadata(crate::storage::METADATA_LAST_IMPORT_TIME)?,
        }))
    });
    ctx.shutdown();
    let info = info?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("beads {}", crate::BD_VERSION);
        println!("  workspace:  {}", info["workspace"].as_str().unwrap_or("?"));
        println!("  store:      {}", info["db"].as_str().unwrap_or("?"));
        println!("  mirror:     {}", info["mirror"].as_str().unwrap_or("?"));
        println!("  issues:     {}", info["issues"]);
        println!("  dirty:      {}", info["dirty"]);
        if let Some(prefix) = info["prefix"].as_str() {
            println!("  prefix:     {prefix}");
        }
        if let Some(repo_id) = info["repo_id"].as_str() {
            println!("  repo id:    {repo_id}");
        }
        if let Some(clone_id) = info["clone_id"].as_str() {
            println!("  clone id:   {clone_id}");
        }
    }

    Ok(())
}
