//! `burrow run` command.

use burrow_core::{BurrowError, Container, ExitCode, ImageReference, ResourceLimits, RuntimeConfig};
use burrow_runtime::{default_backend, ContainerEngine, ReexecCommand, TeardownPolicy};
use clap::Args;
use nix::unistd::Uid;
use tokio::signal::unix::{signal, SignalKind};

use super::{open_image_service, CliError, CliResult};
use crate::output::parse_memory;

/// Longest accepted container id; it doubles as the sandbox hostname.
const MAX_ID_LEN: usize = 64;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image reference (e.g., "alpine", "alpine:3.19", "ghcr.io/org/app:1.0")
    pub image: String,

    /// Container id (default: 12 random hex characters)
    #[arg(long)]
    pub id: Option<String>,

    /// Remove the container as soon as the command exits
    #[arg(short, long)]
    pub yes: bool,

    /// Memory limit (e.g., "512m", "2g"). Recorded, not enforced
    #[arg(long, value_parser = parse_memory)]
    pub memory: Option<u32>,

    /// Memory plus swap limit (e.g., "1g"). Recorded, not enforced
    #[arg(long, value_parser = parse_memory)]
    pub memory_swap: Option<u32>,

    /// Maximum number of processes. Recorded, not enforced
    #[arg(long)]
    pub pids: Option<u32>,

    /// Number of CPUs. Recorded, not enforced
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Command and arguments (default: the image's Cmd)
    #[arg(last = true)]
    pub cmd: Vec<String>,
}

pub async fn execute(args: RunArgs, config: &RuntimeConfig, verbose: bool) -> CliResult<()> {
    if !Uid::effective().is_root() {
        return Err(CliError::new(
            ExitCode::SandboxSetup,
            BurrowError::SandboxError("burrow run must be executed as root".to_string()),
        ));
    }
    if let Some(id) = &args.id {
        validate_id(id)?;
    }

    let images = open_image_service(config)?;
    let reference = images
        .resolve(&ImageReference::parse(&args.image))
        .await
        .map_err(|e| CliError::new(ExitCode::ImageResolution, e))?;

    let limits = ResourceLimits {
        memory_mb: args.memory,
        swap_mb: args.memory_swap,
        pids: args.pids,
        cpus: args.cpus,
    };
    let container = Container::new(args.id, reference, args.cmd).with_limits(limits);
    tracing::info!(container = %container.id, image = %container.image, "Starting container");

    let backend = default_backend(ReexecCommand::current_exe(child_mode_args(config, verbose)));
    let engine = ContainerEngine::new(config, backend);
    let policy = if args.yes {
        TeardownPolicy::Auto
    } else {
        TeardownPolicy::Confirm
    };

    engine
        .run(&container, &container.args, policy, shutdown_signal())
        .await
        .map_err(|e| {
            let exit = match e {
                BurrowError::CommandFailed { .. } => ExitCode::CommandFailed,
                _ => ExitCode::SandboxSetup,
            };
            CliError::new(exit, e)
        })
}

/// Leading argv of the re-executed child: global flags, then `child-mode`.
fn child_mode_args(config: &RuntimeConfig, verbose: bool) -> Vec<String> {
    let mut argv = vec![
        "burrow".to_string(),
        "--home".to_string(),
        config.home.display().to_string(),
    ];
    if verbose {
        argv.push("--verbose".to_string());
    }
    argv.push("child-mode".to_string());
    argv
}

/// Container ids name a directory and the sandbox hostname.
fn validate_id(id: &str) -> CliResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.starts_with('.')
        && !id.starts_with('-')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(BurrowError::ConfigError(format!(
            "invalid container id {id:?}: use up to {MAX_ID_LEN} letters, digits, '-', '_' or '.'"
        ))
        .into())
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("web-1").is_ok());
        assert!(validate_id("0123abcd4567").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id(".hidden").is_err());
        assert!(validate_id(&"x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_child_mode_args() {
        let config = RuntimeConfig {
            home: PathBuf::from("/srv/burrow"),
            ..RuntimeConfig::default()
        };
        assert_eq!(
            child_mode_args(&config, false),
            vec!["burrow", "--home", "/srv/burrow", "child-mode"]
        );
        assert_eq!(
            child_mode_args(&config, true),
            vec!["burrow", "--home", "/srv/burrow", "--verbose", "child-mode"]
        );
    }
}
