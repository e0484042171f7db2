//! Naming convention between encrypted originals and decrypted shadows.
//!
//! A shadow lives in the same directory as its original and carries the
//! reserved [`DECRYPTED_PREFIX`] in front of the original's base name:
//!
//! ```text
//! config/secret.yaml  <->  config/.decrypted~secret.yaml
//! ```
//!
//! This naming is an on-disk contract that other tools may rely on, so it must
//! stay stable. All functions here are pure: no filesystem access.
//!
//! # Identities
//!
//! [`OriginalPath`] and [`ShadowPath`] are the two halves of the mapping. A
//! file name is either a shadow name (it bears the marker) or an original name,
//! never both, which makes the mapping a bijection:
//!
//! ```
//! use sops_shadow_core::shadow::{to_original, to_shadow};
//! use std::path::Path;
//!
//! let shadow = to_shadow(Path::new("config/secret.yaml"));
//! assert_eq!(shadow, Path::new("config/.decrypted~secret.yaml"));
//! assert_eq!(to_original(&shadow).unwrap(), Path::new("config/secret.yaml"));
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

/// Reserved file-name marker identifying a decrypted shadow.
pub const DECRYPTED_PREFIX: &str = ".decrypted~";

/// Normalize path separators so identities built with `\` and `/` compare equal.
///
/// Only Windows treats `\` as a separator; elsewhere it is an ordinary
/// file-name character and the path is returned unchanged.
pub fn normalize_path(path: &Path) -> PathBuf {
    if cfg!(windows)
        && let Some(s) = path.to_str().filter(|s| s.contains('\\'))
    {
        return PathBuf::from(s.replace('\\', "/"));
    }
    path.to_path_buf()
}

/// Returns true if the file name of `path` bears the shadow marker.
pub fn is_shadow(path: &Path) -> bool {
    normalize_path(path)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(DECRYPTED_PREFIX))
}

/// Map an encrypted original to its decrypted shadow.
///
/// Meant for names that do not already bear the marker; see [`OriginalPath`]
/// for the checked variant.
pub fn to_shadow(encrypted: &Path) -> PathBuf {
    let path = normalize_path(encrypted);
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{DECRYPTED_PREFIX}{name}"))
}

/// Map a decrypted shadow back to its encrypted original.
///
/// Returns `None` if the file name does not bear the marker or nothing
/// remains after stripping it.
pub fn to_original(decrypted: &Path) -> Option<PathBuf> {
    let path = normalize_path(decrypted);
    let original = path
        .file_name()?
        .to_str()?
        .strip_prefix(DECRYPTED_PREFIX)
        .filter(|rest| !rest.is_empty())?
        .to_owned();
    Some(path.with_file_name(original))
}

/// An encrypted (or plain) file identity. Never bears the shadow marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginalPath(PathBuf);

impl OriginalPath {
    /// Wrap `path` if it names a file and is not itself a shadow.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = normalize_path(path.as_ref());
        if path.file_name().is_none() || is_shadow(&path) {
            return None;
        }
        Some(Self(path))
    }

    /// The shadow this original maps to.
    pub fn shadow(&self) -> ShadowPath {
        ShadowPath(to_shadow(&self.0))
    }

    /// Borrow the underlying path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Consume into the underlying path.
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

/// A decrypted shadow identity. Always bears the shadow marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowPath(PathBuf);

impl ShadowPath {
    /// Wrap `path` if it is a shadow with a non-empty original name.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = normalize_path(path.as_ref());
        to_original(&path)?;
        Some(Self(path))
    }

    /// The original this shadow belongs to.
    pub fn original(&self) -> OriginalPath {
        let name = self
            .0
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(DECRYPTED_PREFIX))
            .unwrap_or_default();
        OriginalPath(self.0.with_file_name(name))
    }

    /// Borrow the underlying path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Consume into the underlying path.
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for OriginalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ShadowPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for OriginalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl fmt::Display for ShadowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Either side of an original/shadow pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A file that is not a shadow.
    Original(OriginalPath),
    /// A decrypted shadow.
    Shadow(ShadowPath),
}

impl Identity {
    /// Classify a path. Returns `None` for paths without a usable file name.
    pub fn classify(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        if is_shadow(path) {
            ShadowPath::new(path).map(Identity::Shadow)
        } else {
            OriginalPath::new(path).map(Identity::Original)
        }
    }

    /// The original of the pair this identity belongs to.
    pub fn original(&self) -> OriginalPath {
        match self {
            Identity::Original(original) => original.clone(),
            Identity::Shadow(shadow) => shadow.original(),
        }
    }

    /// The shadow of the pair this identity belongs to.
    pub fn shadow(&self) -> ShadowPath {
        match self {
            Identity::Original(original) => original.shadow(),
            Identity::Shadow(shadow) => shadow.clone(),
        }
    }
}
