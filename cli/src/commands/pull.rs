//! `burrow pull` command.

use burrow_core::{ExitCode, ImageReference, RuntimeConfig};
use clap::Args;

use super::{open_image_service, CliError, CliResult};

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference (e.g., "alpine:latest", "ghcr.io/org/image:tag")
    pub image: String,

    /// Only print the content digest
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PullArgs, config: &RuntimeConfig) -> CliResult<()> {
    let images = open_image_service(config)?;

    if !args.quiet {
        println!("Pulling {}...", args.image);
    }
    let resolved = images
        .resolve(&ImageReference::parse(&args.image))
        .await
        .map_err(|e| CliError::new(ExitCode::ImageResolution, e))?;

    let digest = resolved.digest().unwrap_or_default();
    if args.quiet {
        println!("{digest}");
    } else {
        println!("Pulled: {}:{} ({})", resolved.name, resolved.tag, digest);
    }
    Ok(())
}
