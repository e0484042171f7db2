//! Edit command - open, edit and re-encrypt in one process.
//!
//! The shadow exists only while the editor runs. It is released afterwards
//! whether the editor succeeded, failed, or the user pressed Ctrl-C, and
//! deleted unless an earlier `open` still holds it.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context as _, Result, bail};
use clap::Args as ClapArgs;
use sops_shadow_core::{CleanupAction, CloseOutcome, SaveOutcome};
use tracing::instrument;

use super::opened_shadow;
use crate::context::{CliSession, Context, absolute};

#[derive(ClapArgs)]
pub struct Args {
    /// Encrypted file to edit
    pub file: PathBuf,

    /// Editor command (defaults to $VISUAL, then $EDITOR, then vi)
    #[arg(long, value_name = "COMMAND")]
    pub editor: Option<String>,
}

#[instrument(level = "info", name = "cmd::edit", skip_all, fields(file = %args.file.display()))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let path = absolute(&args.file)?;
    let editor = args.editor.clone().unwrap_or_else(default_editor);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let shadow = ctx.with_tracked_session(|session| {
        let outcome = session.open(&path)?;
        Ok(opened_shadow(
            &outcome,
            path.clone(),
            ctx.settings_path.clone(),
            ctx.settings.enabled,
        )?)
    })?;

    // The state lock is not held while the editor runs.
    let result = edit_and_save(&mut ctx.session(), &editor, &shadow, &interrupted);

    let released = ctx.with_tracked_session(|session| Ok(session.close(&path)));
    match released {
        Ok(CloseOutcome::Cleaned(cleaned)) if cleaned.action == CleanupAction::Deleted => {
            tracing::debug!("Deleted {}", cleaned.shadow);
        }
        Ok(CloseOutcome::StillOpen(count)) => {
            tracing::info!("{} stays open ({} remaining)", shadow.display(), count);
        }
        Ok(_) => {}
        Err(e) if result.is_ok() => return Err(e),
        Err(e) => tracing::warn!("Failed to release {}: {:#}", shadow.display(), e),
    }
    result
}

fn edit_and_save(
    session: &mut CliSession,
    editor: &str,
    shadow: &Path,
    interrupted: &AtomicBool,
) -> Result<()> {
    let status = editor_command(editor, shadow)?
        .status()
        .with_context(|| format!("Failed to run editor: {editor}"))?;

    if interrupted.load(Ordering::SeqCst) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "edit cancelled; changes were not encrypted",
        )
        .into());
    }
    if !status.success() {
        bail!("Editor exited with {status}; changes were not encrypted");
    }

    match session.save(shadow)? {
        SaveOutcome::OriginalUpdated => eprintln!("Encrypted changes."),
        SaveOutcome::Unchanged => eprintln!("No changes."),
        other => tracing::debug!("Save outcome: {:?}", other),
    }
    Ok(())
}

fn default_editor() -> String {
    ["VISUAL", "EDITOR"]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "vi".to_owned())
}

/// Split an editor setting such as `code --wait` into a command.
fn editor_command(editor: &str, file: &Path) -> Result<Command> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("Editor command is empty");
    };
    let mut command = Command::new(program);
    command.args(parts).arg(file);
    Ok(command)
}
