use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use super::Refusal;
use crate::context::{Context, absolute};

#[derive(ClapArgs)]
pub struct Args {
    /// Encrypted file or shadow
    pub file: PathBuf,
}

/// Print the other side of the pair.
#[instrument(level = "info", name = "cmd::toggle", skip_all, fields(file = %args.file.display()))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let path = absolute(&args.file)?;
    match ctx.session().toggle(&path) {
        Some(counterpart) => {
            println!("{}", counterpart.display());
            Ok(())
        }
        None => Err(Refusal::NoCounterpart(path).into()),
    }
}
