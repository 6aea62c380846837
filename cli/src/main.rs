//! burrow CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use burrow_cli::commands::{dispatch, Cli};

fn main() {
    let cli = Cli::parse();

    let default_directive = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {hint}");
            }
            e.exit.code()
        }
    };
    std::process::exit(code);
}
