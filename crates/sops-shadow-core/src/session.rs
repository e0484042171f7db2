//! Routing of editor events to reconciliation and cleanup.
//!
//! A [`Session`] is the context object a front end owns for as long as it is
//! editing files. It receives four kinds of events (open, focus, save, close),
//! runs each to completion, and keeps the set of shadows it materialized so
//! they can be deleted once nothing needs them.
//!
//! Errors come back from the individual operations as [`SyncError`].
//! [`Session::dispatch`] is the fire-and-forget entry point: it reports errors
//! through the session's [`Notifier`] and keeps silent kinds (unparseable
//! files, files no creation rule covers) out of it.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::SyncError;
use crate::format::FormatResolver;
use crate::fs::{FileSystem, OsFileSystem};
use crate::lifecycle::{CleanupAction, CleanupResult, OpenShadowSet, Release, delete_shadow};
use crate::reconcile::{PairStatus, Reconciler, SaveOutcome, SyncOutcome};
use crate::settings::Settings;
use crate::shadow::{Identity, ShadowPath};

/// User-facing message sink.
pub trait Notifier {
    /// Informational message.
    fn info(&self, message: &str);
    /// Something went wrong but the operation carried on.
    fn warn(&self, message: &str);
    /// An operation failed.
    fn error(&self, message: &str);
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn info(&self, message: &str) {
        (**self).info(message);
    }

    fn warn(&self, message: &str) {
        (**self).warn(message);
    }

    fn error(&self, message: &str) {
        (**self).error(message);
    }
}

/// [`Notifier`] that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        info!("{}", message);
    }

    fn warn(&self, message: &str) {
        warn!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }
}

/// An editor event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A file was opened.
    Opened(PathBuf),
    /// A file became the active one.
    Focused(PathBuf),
    /// A file was saved.
    Saved(PathBuf),
    /// A file was closed.
    Closed(PathBuf),
}

/// Result of opening a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Unsupported format, no usable name, or the session is disabled.
    Ignored,
    /// The file is not SOPS-encrypted.
    NotEncrypted,
    /// Its shadow was already open; one more reference was taken.
    AlreadyOpen(ShadowPath),
    /// The shadow was materialized or reconciled.
    Opened {
        /// The shadow now open.
        shadow: ShadowPath,
        /// Reconciliation performed.
        sync: SyncOutcome,
    },
    /// A shadow itself was opened and is now tracked.
    ShadowTracked(ShadowPath),
}

impl OpenOutcome {
    /// The shadow the caller should show, if any.
    pub fn shadow(&self) -> Option<&ShadowPath> {
        match self {
            OpenOutcome::AlreadyOpen(shadow)
            | OpenOutcome::Opened { shadow, .. }
            | OpenOutcome::ShadowTracked(shadow) => Some(shadow),
            OpenOutcome::Ignored | OpenOutcome::NotEncrypted => None,
        }
    }
}

/// Result of a focus change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusOutcome {
    /// Shadows cleaned up because focus left every secret pair.
    pub cleaned: Vec<CleanupResult>,
    /// Open handling run for the focused file.
    pub opened: Option<OpenOutcome>,
}

/// Result of closing a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing was tracked for this file.
    NotTracked,
    /// Other openers still reference the shadow.
    StillOpen(usize),
    /// The last reference was released and deletion attempted.
    Cleaned(CleanupResult),
}

/// Result of [`Session::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The session is disabled.
    Ignored,
    /// An open event was handled.
    Open(OpenOutcome),
    /// A focus event was handled.
    Focus(FocusOutcome),
    /// A save event was handled.
    Save(SaveOutcome),
    /// A close event was handled.
    Close(CloseOutcome),
    /// The event failed; the error was logged and, unless silent, notified.
    Failed,
}

/// Editing session over a set of secret pairs.
pub struct Session<E, F = OsFileSystem, N = TracingNotifier> {
    reconciler: Reconciler<E, F>,
    resolver: FormatResolver,
    notifier: N,
    enabled: bool,
    creation_enabled: bool,
    open: OpenShadowSet,
    last_focused: Option<PathBuf>,
}

impl<E: Engine, N: Notifier> Session<E, OsFileSystem, N> {
    /// Session on the real filesystem.
    pub fn new(engine: E, settings: &Settings, notifier: N) -> Self {
        Self::with_fs(engine, OsFileSystem, settings, notifier)
    }
}

impl<E: Engine, F: FileSystem, N: Notifier> Session<E, F, N> {
    /// Session on a custom filesystem.
    pub fn with_fs(engine: E, fs: F, settings: &Settings, notifier: N) -> Self {
        Self {
            reconciler: Reconciler::with_fs(engine, fs),
            resolver: FormatResolver::new(&settings.associations),
            notifier,
            enabled: settings.enabled,
            creation_enabled: settings.creation_enabled,
            open: OpenShadowSet::new(),
            last_focused: None,
        }
    }

    /// The reconciler driving this session.
    pub fn reconciler(&self) -> &Reconciler<E, F> {
        &self.reconciler
    }

    /// Format resolver built from the settings.
    pub fn resolver(&self) -> &FormatResolver {
        &self.resolver
    }

    /// Shadows currently tracked.
    pub fn open_shadows(&self) -> &OpenShadowSet {
        &self.open
    }

    /// Whether events are handled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Path of the last focus event.
    pub fn last_focused(&self) -> Option<&Path> {
        self.last_focused.as_deref()
    }

    /// Re-establish bookkeeping for a shadow opened by an earlier session.
    pub fn restore(&mut self, shadow: ShadowPath, references: usize) {
        for _ in 0..references {
            self.open.track(shadow.clone());
        }
    }

    /// Handle a file being opened.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<OpenOutcome, SyncError> {
        if !self.enabled {
            return Ok(OpenOutcome::Ignored);
        }
        let path = path.as_ref();
        let original = match Identity::classify(path) {
            Some(Identity::Shadow(shadow)) => {
                self.open.track(shadow.clone());
                return Ok(OpenOutcome::ShadowTracked(shadow));
            }
            Some(Identity::Original(original)) => original,
            None => return Ok(OpenOutcome::Ignored),
        };
        let Some(format) = self.resolver.resolve(original.as_path()) else {
            debug!("Ignoring {}: unsupported format", original);
            return Ok(OpenOutcome::Ignored);
        };

        let shadow = original.shadow();
        if self.open.contains(&shadow) {
            let count = self.open.track(shadow.clone());
            debug!("{} already open ({} references)", shadow, count);
            return Ok(OpenOutcome::AlreadyOpen(shadow));
        }

        if !self.reconciler.detect(&original, format)? {
            debug!("{} is not SOPS-encrypted", original);
            return Ok(OpenOutcome::NotEncrypted);
        }

        let sync = self.reconciler.ensure_shadow(&original, format)?;
        self.open.track(shadow.clone());
        Ok(OpenOutcome::Opened { shadow, sync })
    }

    /// Handle focus moving to `path`.
    ///
    /// Leaving every secret pair deletes all tracked shadows.
    pub fn focus(&mut self, path: impl AsRef<Path>) -> Result<FocusOutcome, SyncError> {
        if !self.enabled {
            return Ok(FocusOutcome::default());
        }
        let path = path.as_ref();
        self.last_focused = Some(path.to_path_buf());

        let mut outcome = FocusOutcome::default();
        let identity = Identity::classify(path);
        if let Some(Identity::Shadow(shadow)) = &identity {
            self.open.ensure_tracked(shadow.clone());
            return Ok(outcome);
        }

        let shadow_exists = identity
            .as_ref()
            .is_some_and(|identity| self.reconciler.fs().exists(identity.shadow().as_path()));
        if !shadow_exists {
            outcome.cleaned = self.cleanup_all();
        }

        let supported = self.resolver.resolve(path).is_some();
        if identity.is_some() && supported && !shadow_exists {
            outcome.opened = Some(self.open(path)?);
        }
        Ok(outcome)
    }

    /// Handle a file being saved.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<SaveOutcome, SyncError> {
        if !self.enabled {
            return Ok(SaveOutcome::Skipped);
        }
        let path = path.as_ref();
        let Some(format) = self.resolver.resolve(path) else {
            return Ok(SaveOutcome::Skipped);
        };

        let outcome = self
            .reconciler
            .propagate_save(path, format, self.creation_enabled)?;
        if let SaveOutcome::Created { original, .. } = &outcome {
            self.open.ensure_tracked(original.shadow());
            self.notifier
                .info(&format!("Created encrypted file {original}"));
        }
        Ok(outcome)
    }

    /// Handle a file being closed. Works for either side of a pair.
    pub fn close(&mut self, path: impl AsRef<Path>) -> CloseOutcome {
        if !self.enabled {
            return CloseOutcome::NotTracked;
        }
        let Some(identity) = Identity::classify(path.as_ref()) else {
            return CloseOutcome::NotTracked;
        };
        let shadow = identity.shadow();
        match self.open.release(&shadow) {
            Release::NotTracked => CloseOutcome::NotTracked,
            Release::StillReferenced(count) => CloseOutcome::StillOpen(count),
            Release::Unreferenced => CloseOutcome::Cleaned(self.cleanup(&shadow)),
        }
    }

    /// The existing counterpart of `path`: its shadow if present, otherwise
    /// its original if present.
    pub fn toggle(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let identity = Identity::classify(path.as_ref())?;
        let fs = self.reconciler.fs();
        match identity {
            Identity::Original(original) => {
                let shadow = original.shadow();
                fs.exists(shadow.as_path()).then(|| shadow.into_path_buf())
            }
            Identity::Shadow(shadow) => {
                let original = shadow.original();
                fs.exists(original.as_path()).then(|| original.into_path_buf())
            }
        }
    }

    /// Describe the pair `path` belongs to without writing anything.
    pub fn status(&self, path: impl AsRef<Path>) -> Result<Option<PairStatus>, SyncError> {
        let Some(identity) = Identity::classify(path.as_ref()) else {
            return Ok(None);
        };
        let original = identity.original();
        let Some(format) = self.resolver.resolve(original.as_path()) else {
            return Ok(None);
        };
        self.reconciler.inspect(&original, format).map(Some)
    }

    /// Delete every tracked shadow.
    pub fn shutdown(&mut self) -> Vec<CleanupResult> {
        self.cleanup_all()
    }

    fn cleanup_all(&mut self) -> Vec<CleanupResult> {
        self.open
            .drain()
            .iter()
            .map(|shadow| self.cleanup(shadow))
            .collect()
    }

    fn cleanup(&self, shadow: &ShadowPath) -> CleanupResult {
        let result = delete_shadow(self.reconciler.fs(), shadow);
        if let CleanupAction::Failed { reason } = &result.action {
            self.notifier
                .warn(&format!("Could not delete decrypted file {shadow}: {reason}"));
        }
        result
    }

    /// Route an event, reporting failures through the notifier.
    pub fn dispatch(&mut self, event: SessionEvent) -> EventOutcome {
        if !self.enabled {
            return EventOutcome::Ignored;
        }
        let (path, result) = match event {
            SessionEvent::Opened(path) => {
                let result = self.open(&path).map(EventOutcome::Open);
                (path, result)
            }
            SessionEvent::Focused(path) => {
                let result = self.focus(&path).map(EventOutcome::Focus);
                (path, result)
            }
            SessionEvent::Saved(path) => {
                let result = self.save(&path).map(EventOutcome::Save);
                (path, result)
            }
            SessionEvent::Closed(path) => {
                let outcome = EventOutcome::Close(self.close(&path));
                (path, Ok(outcome))
            }
        };

        result.unwrap_or_else(|e| {
            if e.is_silent() {
                debug!("Ignoring {}: {}", path.display(), e);
            } else {
                self.notifier
                    .error(&format!("SOPS operation failed for {}: {e}", path.display()));
            }
            EventOutcome::Failed
        })
    }
}

impl<E, F, N> std::fmt::Debug for Session<E, F, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("enabled", &self.enabled)
            .field("creation_enabled", &self.creation_enabled)
            .field("open", &self.open)
            .field("last_focused", &self.last_focused)
            .finish_non_exhaustive()
    }
}
