//! Logging initialization for the `bd` binary and daemon.

use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Initialize tracing output for a CLI invocation.
///
/// Verbosity: `-v` enables debug, `-vv` trace; `--quiet` drops to errors
/// only. `RUST_LOG` overrides everything.
///
/// # Errors
///
/// Returns an error if a log file is requested but cannot be opened.
pub fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("beads={default_level}")));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .try_init()
                .ok();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .ok();
        }
    }

    Ok(())
}
