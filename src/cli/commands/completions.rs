//! `bd completions` - shell completion generation.

use clap::CommandFactory;

use crate::cli::{Cli, CompletionsArgs};
use crate::error::Result;

/// Execute `bd completions`.
///
/// # Errors
///
/// Infallible in practice; the signature matches the other commands.
pub fn execute(args: &CompletionsArgs) -> Result<()> {
    let mut command = Cli::command();
    clap_complete::generate(args.shell, &mut command, "bd", &mut std::io::stdout());
    Ok(())
}
