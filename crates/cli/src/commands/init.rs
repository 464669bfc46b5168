//! `readygate init`: write a default configuration file

use anyhow::{bail, Context};
use clap::Args;
use std::path::Path;

use readygate_harness::HarnessConfig;

use crate::output;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: InitArgs, path: &Path) -> anyhow::Result<()> {
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    HarnessConfig::default()
        .save(path)
        .with_context(|| format!("cannot write {}", path.display()))?;

    output::print_success(format_args!("Wrote default configuration to {}", path.display()));
    Ok(())
}
