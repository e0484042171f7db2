//! Open command - materialize the decrypted shadow of an encrypted file.
//!
//! Prints the shadow path on stdout so it can be handed to an editor:
//!
//! ```bash
//! $EDITOR "$(sops-shadow open secrets/prod.yaml)"
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use sops_shadow_core::OpenOutcome;
use tracing::instrument;

use super::{describe, opened_shadow};
use crate::context::{Context, absolute};

#[derive(ClapArgs)]
pub struct Args {
    /// Encrypted file (or an existing shadow)
    pub file: PathBuf,
}

#[instrument(level = "info", name = "cmd::open", skip_all, fields(file = %args.file.display()))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let path = absolute(&args.file)?;
    let outcome = ctx.with_tracked_session(|session| Ok(session.open(&path)?))?;

    match &outcome {
        OpenOutcome::Opened { sync, .. } => {
            tracing::info!("{}", describe(sync.decision));
        }
        OpenOutcome::AlreadyOpen(shadow) => {
            tracing::info!("{} is already open", shadow);
        }
        _ => {}
    }

    let shadow = opened_shadow(
        &outcome,
        path,
        ctx.settings_path.clone(),
        ctx.settings.enabled,
    )?;
    println!("{}", shadow.display());
    Ok(())
}
