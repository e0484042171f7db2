//! Bookkeeping for materialized shadows and their cleanup.
//!
//! A shadow is plaintext on disk, so it should exist only while something has
//! it open. [`OpenShadowSet`] counts openers per shadow; once the count drops
//! to zero the shadow is deleted with [`delete_shadow`].
//!
//! Deletion is best-effort. A failure is reported as a [`CleanupAction::Failed`]
//! result for the caller to surface as a warning, never as an error.

use std::collections::HashMap;
use std::io;

use tracing::{debug, warn};

use crate::fs::FileSystem;
use crate::shadow::ShadowPath;

/// Shadows currently materialized, with their number of openers.
#[derive(Debug, Clone, Default)]
pub struct OpenShadowSet {
    refs: HashMap<ShadowPath, usize>,
}

/// Result of releasing one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The shadow was not tracked.
    NotTracked,
    /// Other openers remain.
    StillReferenced(usize),
    /// The last reference is gone; the shadow should be deleted.
    Unreferenced,
}

impl OpenShadowSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference. Returns the new count.
    pub fn track(&mut self, shadow: ShadowPath) -> usize {
        let count = self.refs.entry(shadow).or_insert(0);
        *count += 1;
        *count
    }

    /// Track `shadow` with a single reference unless it is already tracked.
    ///
    /// Returns true if it was newly added.
    pub fn ensure_tracked(&mut self, shadow: ShadowPath) -> bool {
        if self.refs.contains_key(&shadow) {
            return false;
        }
        self.refs.insert(shadow, 1);
        true
    }

    /// Drop one reference.
    pub fn release(&mut self, shadow: &ShadowPath) -> Release {
        let Some(count) = self.refs.get_mut(shadow) else {
            return Release::NotTracked;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return Release::StillReferenced(*count);
        }
        self.refs.remove(shadow);
        Release::Unreferenced
    }

    /// Stop tracking `shadow` regardless of its count.
    pub fn forget(&mut self, shadow: &ShadowPath) -> Option<usize> {
        self.refs.remove(shadow)
    }

    /// Whether `shadow` is tracked.
    pub fn contains(&self, shadow: &ShadowPath) -> bool {
        self.refs.contains_key(shadow)
    }

    /// Reference count of `shadow`, zero if untracked.
    pub fn references(&self, shadow: &ShadowPath) -> usize {
        self.refs.get(shadow).copied().unwrap_or(0)
    }

    /// Number of tracked shadows.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Remove and return every tracked shadow, sorted by path.
    pub fn drain(&mut self) -> Vec<ShadowPath> {
        let mut shadows: Vec<ShadowPath> = self.refs.drain().map(|(shadow, _)| shadow).collect();
        shadows.sort();
        shadows
    }

    /// Tracked shadows and their counts, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&ShadowPath, usize)> {
        self.refs.iter().map(|(shadow, count)| (shadow, *count))
    }
}

/// What happened to one shadow during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    /// The file was deleted.
    Deleted,
    /// The file was already gone.
    AlreadyGone,
    /// Deleting failed; the file may still exist.
    Failed {
        /// Error message.
        reason: String,
    },
}

/// Result of cleaning up a single shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupResult {
    /// The shadow that was processed.
    pub shadow: ShadowPath,
    /// What happened.
    pub action: CleanupAction,
}

impl CleanupResult {
    /// Returns true unless deletion failed.
    pub fn is_ok(&self) -> bool {
        !matches!(self.action, CleanupAction::Failed { .. })
    }
}

/// Delete `shadow` from disk, never failing.
pub fn delete_shadow<F: FileSystem + ?Sized>(fs: &F, shadow: &ShadowPath) -> CleanupResult {
    let action = match fs.remove(shadow.as_path()) {
        Ok(()) => {
            debug!("Deleted shadow {}", shadow);
            CleanupAction::Deleted
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => CleanupAction::AlreadyGone,
        Err(e) => {
            warn!("Failed to delete shadow {}: {}", shadow, e);
            CleanupAction::Failed {
                reason: e.to_string(),
            }
        }
    };
    CleanupResult {
        shadow: shadow.clone(),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFileSystem;

    fn shadow(name: &str) -> ShadowPath {
        ShadowPath::new(format!("/w/.decrypted~{name}")).unwrap()
    }

    #[test]
    fn test_reference_counting() {
        let mut set = OpenShadowSet::new();
        let a = shadow("a.yaml");

        assert_eq!(set.track(a.clone()), 1);
        assert_eq!(set.track(a.clone()), 2);
        assert_eq!(set.references(&a), 2);

        assert_eq!(set.release(&a), Release::StillReferenced(1));
        assert!(set.contains(&a));
        assert_eq!(set.release(&a), Release::Unreferenced);
        assert!(!set.contains(&a));
        assert_eq!(set.release(&a), Release::NotTracked);
    }

    #[test]
    fn test_ensure_tracked_does_not_add_references() {
        let mut set = OpenShadowSet::new();
        let a = shadow("a.json");
        assert!(set.ensure_tracked(a.clone()));
        assert!(!set.ensure_tracked(a.clone()));
        assert_eq!(set.references(&a), 1);
    }

    #[test]
    fn test_drain_is_sorted_and_empties() {
        let mut set = OpenShadowSet::new();
        set.track(shadow("b.ini"));
        set.track(shadow("a.ini"));
        let drained = set.drain();
        assert_eq!(drained, vec![shadow("a.ini"), shadow("b.ini")]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_delete_shadow_outcomes() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(".decrypted~secret.yaml");
        std::fs::write(&path, "a: 1\n").unwrap();
        let shadow = ShadowPath::new(&path).unwrap();

        let result = delete_shadow(&OsFileSystem, &shadow);
        assert_eq!(result.action, CleanupAction::Deleted);
        assert!(!path.exists());

        let result = delete_shadow(&OsFileSystem, &shadow);
        assert_eq!(result.action, CleanupAction::AlreadyGone);
        assert!(result.is_ok());
    }

    #[test]
    fn test_delete_shadow_failure_is_reported() {
        let temp = tempfile::TempDir::new().unwrap();
        // A directory cannot be removed with remove_file.
        let path = temp.path().join(".decrypted~dir.yaml");
        std::fs::create_dir(&path).unwrap();
        let shadow = ShadowPath::new(&path).unwrap();

        let result = delete_shadow(&OsFileSystem, &shadow);
        assert!(matches!(result.action, CleanupAction::Failed { .. }));
        assert!(!result.is_ok());
    }
}
