use beads::cli::commands;
use beads::cli::{Cli, Commands};
use beads::logging::init_logging;
use beads::{BeadsError, StructuredError};
use clap::Parser;
use std::io::{self, IsTerminal};

fn main() {
    let cli = Cli::parse();

    // A foreground daemon run owns its own file logging; everything else
    // logs to stderr here.
    let daemon_foreground = matches!(
        &cli.command,
        Commands::Daemon(args) if !args.stop && !args.status && !args.health
    );
    if !daemon_foreground {
        if let Err(e) = init_logging(cli.verbose, cli.quiet, None) {
            eprintln!("Failed to initialize logging: {e}");
        }
    }

    let db = cli.db.clone();
    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(&args, cli.quiet),
        Commands::Sync(args) => {
            commands::sync::execute(&args, cli.json, db.as_ref(), cli.no_daemon)
        }
        Commands::Doctor(args) => {
            match commands::doctor::execute(&args, cli.json, db.as_ref()) {
                Ok(healthy) => {
                    if !healthy {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Commands::Validate(args) => {
            match commands::validate::execute(&args, cli.json, db.as_ref()) {
                Ok(clean) => {
                    if !clean {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Commands::Info(args) => commands::info::execute(&args, cli.json, db.as_ref()),
        Commands::Daemon(args) => commands::daemon::execute(&args, cli.json),
        Commands::Completions(args) => commands::completions::execute(&args),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

/// Render errors for humans or machines and exit with the mapped code.
fn handle_error(err: &BeadsError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    let use_json = json_mode || !io::stdout().is_terminal();
    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        eprintln!("{}", structured.to_human());
    }

    std::process::exit(exit_code);
}
