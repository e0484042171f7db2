use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use sops_shadow_core::lifecycle::delete_shadow;
use sops_shadow_core::{CleanupAction, CloseOutcome, Identity, OsFileSystem};
use tracing::instrument;

use crate::context::{Context, absolute};

#[derive(ClapArgs)]
pub struct Args {
    /// Encrypted file or its shadow
    pub file: PathBuf,

    /// Delete the shadow even if it was not opened by sops-shadow
    #[arg(short, long)]
    pub force: bool,
}

#[instrument(level = "info", name = "cmd::close", skip_all, fields(file = %args.file.display(), force = args.force))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let path = absolute(&args.file)?;
    let outcome = ctx.with_tracked_session(|session| Ok(session.close(&path)))?;

    match outcome {
        CloseOutcome::Cleaned(result) => {
            if result.action == CleanupAction::Deleted {
                eprintln!("Deleted {}", result.shadow);
            }
        }
        CloseOutcome::StillOpen(count) => {
            eprintln!("Still open ({count} remaining)");
        }
        CloseOutcome::NotTracked if args.force => {
            if let Some(identity) = Identity::classify(&path) {
                let result = delete_shadow(&OsFileSystem, &identity.shadow());
                if let CleanupAction::Failed { reason } = &result.action {
                    eprintln!("Warning: could not delete {}: {reason}", result.shadow);
                }
            }
        }
        CloseOutcome::NotTracked => {
            eprintln!("{} is not open", path.display());
        }
    }
    Ok(())
}
