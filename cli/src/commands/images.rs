//! `burrow images` command.

use burrow_core::RuntimeConfig;
use burrow_runtime::image::{ImageLayout, LayerStore};
use clap::Args;

use super::CliResult;
use crate::output;

#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Only show image references (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn execute(args: ImagesArgs, config: &RuntimeConfig) -> CliResult<()> {
    let layout = ImageLayout::new(&config.layout());
    let store = LayerStore::open(layout.store_path())?;
    let entries = store.entries()?;

    if args.quiet {
        for (name, entry) in &entries {
            println!("{name}:{}", entry.tag);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["NAME", "TAG", "DIGEST"]);
    for (name, entry) in &entries {
        table.add_row([name.as_str(), entry.tag.as_str(), entry.hash.as_str()]);
    }
    println!("{table}");
    Ok(())
}
