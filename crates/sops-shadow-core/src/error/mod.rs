//! Error type for reconciliation and session operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;
use crate::format::ParseError;

/// Failure while keeping a file pair in sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Content is not parseable as its declared format.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The encryption engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Reading or writing one side of the pair failed.
    #[error("failed to {action} {}: {source}", path.display())]
    FileSystem {
        /// What was being attempted.
        action: &'static str,
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    pub(crate) fn fs(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::FileSystem {
            action,
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors that should not be shown to the user.
    ///
    /// Unparseable files are usually just not structured data, and a file no
    /// creation rule covers is not meant to be encrypted.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            SyncError::Parse(_) | SyncError::Engine(EngineError::NoMatchingRule { .. })
        )
    }

    /// Returns true if the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::FileSystem { source, .. } => source.kind() == io::ErrorKind::NotFound,
            SyncError::Engine(EngineError::Execution { source, .. }) => {
                source.kind() == io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
