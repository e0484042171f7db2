use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;
use sops_shadow_core::{Engine, OriginalPath, SyncError};
use tracing::instrument;

use super::Refusal;
use crate::context::{Context, absolute};

#[derive(ClapArgs)]
pub struct Args {
    /// Encrypted file
    pub file: PathBuf,
}

/// Print the plaintext of an encrypted file without creating a shadow.
#[instrument(level = "info", name = "cmd::decrypt", skip_all, fields(file = %args.file.display()))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let path = absolute(&args.file)?;
    let Some(original) = OriginalPath::new(&path) else {
        return Err(Refusal::Unsupported(path).into());
    };
    let session = ctx.session();
    let Some(format) = session.resolver().resolve(original.as_path()) else {
        return Err(Refusal::Unsupported(path).into());
    };

    if !session.reconciler().detect(&original, format)? {
        return Err(Refusal::NotEncrypted(path).into());
    }

    let ciphertext = std::fs::read(original.as_path())
        .with_context(|| format!("Failed to read {original}"))?;
    let plaintext = ctx
        .engine()
        .decrypt(&ciphertext, original.as_path(), format)
        .map_err(SyncError::from)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&plaintext)?;
    stdout.flush()?;
    Ok(())
}
