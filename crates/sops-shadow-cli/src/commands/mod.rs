pub mod cleanup;
pub mod close;
pub mod completions;
pub mod decrypt;
pub mod edit;
pub mod info;
pub mod open;
pub mod save;
pub mod status;
pub mod toggle;

use std::path::PathBuf;

use sops_shadow_core::{OpenOutcome, SyncDecision};
use thiserror::Error;

/// A command declined to act on the file it was given.
#[derive(Debug, Error)]
pub enum Refusal {
    #[error("tracking is disabled in {}", .0.display())]
    Disabled(PathBuf),

    #[error("unsupported file type: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("not a SOPS-encrypted file: {}", .0.display())]
    NotEncrypted(PathBuf),

    #[error("no decrypted or encrypted counterpart exists for {}", .0.display())]
    NoCounterpart(PathBuf),
}

/// Turn an open result into the shadow path, or the reason there is none.
pub fn opened_shadow(
    outcome: &OpenOutcome,
    path: PathBuf,
    settings_path: PathBuf,
    enabled: bool,
) -> Result<PathBuf, Refusal> {
    match outcome {
        OpenOutcome::Ignored if !enabled => Err(Refusal::Disabled(settings_path)),
        OpenOutcome::Ignored => Err(Refusal::Unsupported(path)),
        OpenOutcome::NotEncrypted => Err(Refusal::NotEncrypted(path)),
        other => other
            .shadow()
            .map(|shadow| shadow.as_path().to_path_buf())
            .ok_or(Refusal::Unsupported(path)),
    }
}

/// Short human description of a reconciliation decision.
pub fn describe(decision: SyncDecision) -> &'static str {
    match decision {
        SyncDecision::NoOp => "in sync",
        SyncDecision::RefreshShadowFromOriginal => "decrypted original into shadow",
        SyncDecision::RefreshOriginalFromShadow => "re-encrypted original from shadow",
        SyncDecision::Conflict => "both changed with identical timestamps; left untouched",
    }
}
