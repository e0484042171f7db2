use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use sops_shadow_core::SaveOutcome;
use tracing::instrument;

use crate::context::{Context, absolute};

#[derive(ClapArgs)]
pub struct Args {
    /// Saved shadow, or a plain file to encrypt when --create is set
    pub file: PathBuf,
}

#[instrument(level = "info", name = "cmd::save", skip_all, fields(file = %args.file.display(), create = ctx.settings.creation_enabled))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let path = absolute(&args.file)?;
    let outcome = ctx.with_tracked_session(|session| Ok(session.save(&path)?))?;

    match outcome {
        SaveOutcome::Unchanged => eprintln!("No changes to encrypt."),
        SaveOutcome::OriginalUpdated => {
            eprintln!("Encrypted changes into the original of {}", path.display());
        }
        SaveOutcome::Created { original, .. } => println!("{original}"),
        SaveOutcome::NoMatchingRule => {
            eprintln!("No creation rule in .sops.yaml covers {}; left as is.", path.display());
        }
        SaveOutcome::Skipped => eprintln!("Nothing to do for {}", path.display()),
    }
    Ok(())
}
