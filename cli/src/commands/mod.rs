//! CLI command definitions and dispatch.

mod child;
mod images;
mod pull;
mod run;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use burrow_core::config::default_home;
use burrow_core::{BurrowError, ExitCode, RuntimeConfig};
use burrow_runtime::{ImageService, OciRegistryClient};
use clap::{Parser, Subcommand};

/// burrow - run commands in throwaway containers built from registry images.
#[derive(Parser, Debug)]
#[command(name = "burrow", version, about)]
pub struct Cli {
    /// Root directory for images and containers [default: $BURROW_HOME or ~/.burrow]
    #[arg(long, global = true, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a new container
    Run(run::RunArgs),
    /// Pull and unpack an image without running it
    Pull(pull::PullArgs),
    /// List cached images
    Images(images::ImagesArgs),
    /// Internal: sandbox setup inside fresh namespaces
    #[command(hide = true)]
    ChildMode(child::ChildArgs),
}

/// A command failure and the process exit code it maps to.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct CliError {
    pub exit: ExitCode,
    pub source: BurrowError,
}

impl CliError {
    pub fn new(exit: ExitCode, source: BurrowError) -> Self {
        Self { exit, source }
    }

    pub fn hint(&self) -> Option<&str> {
        self.source.hint()
    }
}

impl From<BurrowError> for CliError {
    fn from(source: BurrowError) -> Self {
        Self::new(ExitCode::General, source)
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;

/// Load configuration from `--home`, `$BURROW_HOME` or `~/.burrow`, in that order.
pub(crate) fn load_config(home: Option<PathBuf>) -> CliResult<RuntimeConfig> {
    let config = RuntimeConfig::load(home.unwrap_or_else(default_home))?;
    config.layout().ensure()?;
    Ok(config)
}

/// Image service backed by the configured registry.
pub(crate) fn open_image_service(config: &RuntimeConfig) -> CliResult<ImageService> {
    let registry = Arc::new(OciRegistryClient::new(config));
    ImageService::new(&config.layout(), registry)
        .map_err(|e| CliError::new(ExitCode::ImageResolution, e))
}

/// Dispatch a parsed CLI and return the process exit status.
///
/// `child-mode` runs without a tokio runtime; everything else runs on one.
pub fn dispatch(cli: Cli) -> CliResult<i32> {
    let config = load_config(cli.home)?;

    match cli.command {
        Command::ChildMode(args) => return Ok(child::execute(args, &config)),
        Command::Run(args) => block_on(run::execute(args, &config, cli.verbose))?,
        Command::Pull(args) => block_on(pull::execute(args, &config))?,
        Command::Images(args) => images::execute(args, &config)?,
    }
    Ok(ExitCode::Success.code())
}

fn block_on<F>(future: F) -> CliResult<()>
where
    F: Future<Output = CliResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BurrowError::from)?;
    runtime.block_on(future)
}
