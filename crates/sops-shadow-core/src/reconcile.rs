//! Reconciliation between an encrypted original and its decrypted shadow.
//!
//! The comparison is always made on plaintext: the original is decrypted and
//! its fingerprint compared with the shadow's. Only when they differ do
//! modification times pick a direction. Writing never happens when the
//! fingerprints match, so running reconciliation twice performs no writes the
//! second time.
//!
//! | plaintext equal | mtimes                | state           | decision                    |
//! |-----------------|-----------------------|-----------------|-----------------------------|
//! | yes             | any                   | `InSync`        | `NoOp`                      |
//! | no              | original newer        | `ShadowStale`   | `RefreshShadowFromOriginal` |
//! | no              | shadow newer          | `OriginalStale` | `RefreshOriginalFromShadow` |
//! | no              | equal                 | `Unsynced`      | `Conflict` (no write)       |

use std::path::Path;
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::error::SyncError;
use crate::fingerprint::Fingerprint;
use crate::format::{self, FileFormat};
use crate::fs::{FileSystem, OsFileSystem};
use crate::shadow::{Identity, OriginalPath, ShadowPath};

/// Relationship between the two sides of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No shadow yet, or a tie that could not be resolved.
    Unsynced,
    /// The original changed after the shadow was written.
    ShadowStale,
    /// The shadow was edited after the original was written.
    OriginalStale,
    /// Both sides hold the same plaintext.
    InSync,
}

/// Action taken for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    /// Nothing to do.
    NoOp,
    /// Decrypt the original over the shadow.
    RefreshShadowFromOriginal,
    /// Re-encrypt the shadow into the original.
    RefreshOriginalFromShadow,
    /// Content differs but timestamps are equal; nothing is written.
    Conflict,
}

/// Observed state and the decision taken for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// State before acting.
    pub state: SyncState,
    /// What was done.
    pub decision: SyncDecision,
}

impl SyncOutcome {
    /// State of the pair after the decision was carried out.
    pub fn resulting_state(&self) -> SyncState {
        match self.decision {
            SyncDecision::NoOp => self.state,
            SyncDecision::RefreshShadowFromOriginal | SyncDecision::RefreshOriginalFromShadow => {
                SyncState::InSync
            }
            SyncDecision::Conflict => SyncState::Unsynced,
        }
    }

    /// Returns true if either file was written.
    pub fn wrote(&self) -> bool {
        matches!(
            self.decision,
            SyncDecision::RefreshShadowFromOriginal | SyncDecision::RefreshOriginalFromShadow
        )
    }
}

/// Decide what to do for a pair whose both sides exist.
pub fn decide(
    original_plaintext: Fingerprint,
    shadow: Fingerprint,
    original_modified: SystemTime,
    shadow_modified: SystemTime,
) -> SyncOutcome {
    let (state, decision) = if original_plaintext == shadow {
        (SyncState::InSync, SyncDecision::NoOp)
    } else if original_modified > shadow_modified {
        (SyncState::ShadowStale, SyncDecision::RefreshShadowFromOriginal)
    } else if original_modified < shadow_modified {
        (SyncState::OriginalStale, SyncDecision::RefreshOriginalFromShadow)
    } else {
        (SyncState::Unsynced, SyncDecision::Conflict)
    };
    SyncOutcome { state, decision }
}

/// Result of propagating a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The saved plaintext already matches the original.
    Unchanged,
    /// The original was re-encrypted from the saved shadow.
    OriginalUpdated,
    /// A new encrypted original was created and its shadow reconciled.
    Created {
        /// The new encrypted file.
        original: OriginalPath,
        /// Reconciliation run on it afterwards.
        sync: SyncOutcome,
    },
    /// Creation was attempted but no creation rule covers the file.
    NoMatchingRule,
    /// Nothing applies to this file.
    Skipped,
}

/// Read-only snapshot of a pair, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairStatus {
    /// The original side.
    #[serde(serialize_with = "serialize_display")]
    pub original: OriginalPath,
    /// The shadow side.
    #[serde(serialize_with = "serialize_display")]
    pub shadow: ShadowPath,
    /// Format used for detection and the engine.
    pub format: FileFormat,
    /// Whether the original exists.
    pub original_exists: bool,
    /// Whether the shadow exists.
    pub shadow_exists: bool,
    /// Whether the original is SOPS-encrypted.
    pub encrypted: bool,
    /// Fingerprint of the decrypted original.
    #[serde(serialize_with = "serialize_opt_display")]
    pub original_fingerprint: Option<Fingerprint>,
    /// Fingerprint of the shadow.
    #[serde(serialize_with = "serialize_opt_display")]
    pub shadow_fingerprint: Option<Fingerprint>,
    /// What reconciliation would do, if both sides exist.
    pub pending: Option<SyncOutcome>,
}

fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn serialize_opt_display<T: std::fmt::Display, S: serde::Serializer>(
    value: &Option<T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => serializer.collect_str(value),
        None => serializer.serialize_none(),
    }
}

/// Drives the engine and the filesystem to keep pairs in sync.
#[derive(Debug, Clone)]
pub struct Reconciler<E, F = OsFileSystem> {
    engine: E,
    fs: F,
}

impl<E: Engine> Reconciler<E> {
    /// Reconciler on the real filesystem.
    pub fn new(engine: E) -> Self {
        Self::with_fs(engine, OsFileSystem)
    }
}

impl<E: Engine, F: FileSystem> Reconciler<E, F> {
    /// Reconciler on a custom filesystem.
    pub fn with_fs(engine: E, fs: F) -> Self {
        Self { engine, fs }
    }

    /// The engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The filesystem.
    pub fn fs(&self) -> &F {
        &self.fs
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, SyncError> {
        self.fs.read(path).map_err(|e| SyncError::fs("read", path, e))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), SyncError> {
        self.fs
            .write(path, contents)
            .map_err(|e| SyncError::fs("write", path, e))
    }

    fn modified(&self, path: &Path) -> Result<SystemTime, SyncError> {
        self.fs
            .modified(path)
            .map_err(|e| SyncError::fs("stat", path, e))
    }

    /// Whether `original` holds SOPS-encrypted content.
    ///
    /// Empty files are not encrypted; unparseable ones are a [`SyncError::Parse`].
    pub fn detect(&self, original: &OriginalPath, format: FileFormat) -> Result<bool, SyncError> {
        let content = self.read(original.as_path())?;
        Ok(format::detect(&content, format)?)
    }

    /// Make sure the shadow of `original` exists and matches it.
    pub fn ensure_shadow(
        &self,
        original: &OriginalPath,
        format: FileFormat,
    ) -> Result<SyncOutcome, SyncError> {
        let shadow = original.shadow();
        let ciphertext = self.read(original.as_path())?;
        let plaintext = self
            .engine
            .decrypt(&ciphertext, original.as_path(), format)?;

        if !self.fs.exists(shadow.as_path()) {
            self.write(shadow.as_path(), &plaintext)?;
            info!("Decrypted {} to {}", original, shadow);
            return Ok(SyncOutcome {
                state: SyncState::Unsynced,
                decision: SyncDecision::RefreshShadowFromOriginal,
            });
        }

        let shadow_content = self.read(shadow.as_path())?;
        let original_fp = Fingerprint::of(&plaintext);
        let shadow_fp = Fingerprint::of(&shadow_content);
        let outcome = decide(
            original_fp,
            shadow_fp,
            self.modified(original.as_path())?,
            self.modified(shadow.as_path())?,
        );
        debug!(
            "Reconciling {}: original {} shadow {} -> {:?}",
            original, original_fp, shadow_fp, outcome
        );

        match outcome.decision {
            SyncDecision::NoOp => {}
            SyncDecision::RefreshShadowFromOriginal => {
                self.write(shadow.as_path(), &plaintext)?;
                info!("Refreshed stale shadow {}", shadow);
            }
            SyncDecision::RefreshOriginalFromShadow => {
                let encrypted = self.engine.encrypt_in_place(
                    &shadow_content,
                    &ciphertext,
                    original.as_path(),
                    format,
                )?;
                self.write(original.as_path(), &encrypted)?;
                info!("Re-encrypted {} from newer shadow", original);
            }
            SyncDecision::Conflict => {
                warn!(
                    "{} and {} differ but have identical modification times; leaving both untouched",
                    original, shadow
                );
            }
        }
        Ok(outcome)
    }

    /// Propagate a save of `path`, which may be a shadow or a plain file.
    pub fn propagate_save(
        &self,
        path: &Path,
        format: FileFormat,
        creation_enabled: bool,
    ) -> Result<SaveOutcome, SyncError> {
        match Identity::classify(path) {
            Some(Identity::Shadow(shadow)) => {
                self.propagate_shadow(&shadow, format, creation_enabled)
            }
            Some(Identity::Original(original)) if creation_enabled => {
                self.create_from_plain(&original, format)
            }
            _ => Ok(SaveOutcome::Skipped),
        }
    }

    fn propagate_shadow(
        &self,
        shadow: &ShadowPath,
        format: FileFormat,
        creation_enabled: bool,
    ) -> Result<SaveOutcome, SyncError> {
        let original = shadow.original();
        let saved = self.read(shadow.as_path())?;

        if self.fs.exists(original.as_path()) {
            let ciphertext = self.read(original.as_path())?;
            let current = self
                .engine
                .decrypt(&ciphertext, original.as_path(), format)?;
            if Fingerprint::of(&current) == Fingerprint::of(&saved) {
                debug!("Saved shadow {} matches {}", shadow, original);
                return Ok(SaveOutcome::Unchanged);
            }
            let encrypted =
                self.engine
                    .encrypt_in_place(&saved, &ciphertext, original.as_path(), format)?;
            self.write(original.as_path(), &encrypted)?;
            info!("Encrypted {} into {}", shadow, original);
            return Ok(SaveOutcome::OriginalUpdated);
        }

        if !creation_enabled {
            debug!("No original for {} and creation is disabled", shadow);
            return Ok(SaveOutcome::Skipped);
        }

        let Some(encrypted) = self.try_encrypt_new(&saved, original.as_path(), format)? else {
            return Ok(SaveOutcome::NoMatchingRule);
        };
        self.write(original.as_path(), &encrypted)?;
        info!("Created encrypted {} from {}", original, shadow);
        let sync = self.ensure_shadow(&original, format)?;
        Ok(SaveOutcome::Created { original, sync })
    }

    fn create_from_plain(
        &self,
        original: &OriginalPath,
        format: FileFormat,
    ) -> Result<SaveOutcome, SyncError> {
        if self.fs.exists(original.shadow().as_path()) {
            return Ok(SaveOutcome::Skipped);
        }
        let content = self.read(original.as_path())?;
        if content.is_empty() {
            return Ok(SaveOutcome::Skipped);
        }
        // Content that does not parse may still be encryptable as-is.
        if format::detect(&content, format).unwrap_or(false) {
            debug!("{} is already encrypted", original);
            return Ok(SaveOutcome::Skipped);
        }

        let Some(encrypted) = self.try_encrypt_new(&content, original.as_path(), format)? else {
            return Ok(SaveOutcome::NoMatchingRule);
        };
        self.write(original.as_path(), &encrypted)?;
        info!("Encrypted plain file {} in place", original);
        let sync = self.ensure_shadow(original, format)?;
        Ok(SaveOutcome::Created {
            original: original.clone(),
            sync,
        })
    }

    fn try_encrypt_new(
        &self,
        plaintext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Option<Vec<u8>>, SyncError> {
        match self.engine.encrypt_new(plaintext, target, format) {
            Ok(encrypted) => Ok(Some(encrypted)),
            Err(EngineError::NoMatchingRule { .. }) => {
                debug!("No creation rule matches {}", target.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Describe a pair without writing anything.
    ///
    /// The original is decrypted only when it is encrypted and a shadow exists
    /// to compare against.
    pub fn inspect(
        &self,
        original: &OriginalPath,
        format: FileFormat,
    ) -> Result<PairStatus, SyncError> {
        let shadow = original.shadow();
        let original_exists = self.fs.is_file(original.as_path());
        let shadow_exists = self.fs.is_file(shadow.as_path());

        let mut status = PairStatus {
            original: original.clone(),
            shadow: shadow.clone(),
            format,
            original_exists,
            shadow_exists,
            encrypted: false,
            original_fingerprint: None,
            shadow_fingerprint: None,
            pending: None,
        };

        let shadow_content = if shadow_exists {
            let content = self.read(shadow.as_path())?;
            status.shadow_fingerprint = Some(Fingerprint::of(&content));
            Some(content)
        } else {
            None
        };

        if !original_exists {
            return Ok(status);
        }
        let ciphertext = self.read(original.as_path())?;
        status.encrypted = format::detect(&ciphertext, format).unwrap_or(false);
        if !status.encrypted || shadow_content.is_none() {
            return Ok(status);
        }

        let plaintext = self
            .engine
            .decrypt(&ciphertext, original.as_path(), format)?;
        let original_fp = Fingerprint::of(&plaintext);
        status.original_fingerprint = Some(original_fp);
        if let Some(shadow_fp) = status.shadow_fingerprint {
            status.pending = Some(decide(
                original_fp,
                shadow_fp,
                self.modified(original.as_path())?,
                self.modified(shadow.as_path())?,
            ));
        }
        Ok(status)
    }
}
