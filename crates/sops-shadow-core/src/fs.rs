//! Filesystem access used by reconciliation and cleanup.
//!
//! Everything that touches disk goes through [`FileSystem`] so tests can count
//! or fail operations. [`OsFileSystem`] is the real implementation.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;

/// Name of the engine's per-directory configuration file.
pub const ENGINE_CONFIG_FILENAME: &str = ".sops.yaml";

/// Minimal file operations needed to keep a pair in sync.
pub trait FileSystem {
    /// Read the whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the file's content. Readers never observe a partial write.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Returns true if something exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if `path` is a regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Last modification time.
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;

    /// Delete the file.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Device the path lives on, if the platform exposes it.
    fn device_id(&self, _path: &Path) -> Option<u64> {
        None
    }
}

impl<F: FileSystem + ?Sized> FileSystem for &F {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        (**self).write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        (**self).is_file(path)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        (**self).modified(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        (**self).remove(path)
    }

    fn device_id(&self, path: &Path) -> Option<u64> {
        (**self).device_id(path)
    }
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Stage next to the target so the final rename stays on one filesystem.
        let mut staged = tempfile::Builder::new()
            .prefix(".sops-shadow-")
            .tempfile_in(dir)?;
        staged.write_all(contents)?;
        staged.as_file().sync_all()?;
        keep_permissions(path, &staged)?;
        staged.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    #[cfg(unix)]
    fn device_id(&self, path: &Path) -> Option<u64> {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(path).ok().map(|metadata| metadata.dev())
    }
}

/// Carry the target's existing permissions over to the staged file.
///
/// New files keep the temp file's owner-only mode.
fn keep_permissions(target: &Path, staged: &NamedTempFile) -> io::Result<()> {
    match fs::metadata(target) {
        Ok(metadata) => staged.as_file().set_permissions(metadata.permissions()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Search `start_dir` and its ancestors for a file called `name`.
///
/// The walk stops at the filesystem root or where the device changes, so it
/// never wanders across mount points.
pub fn find_upwards<F: FileSystem + ?Sized>(
    fs: &F,
    start_dir: &Path,
    name: &str,
) -> Option<PathBuf> {
    let start_device = fs.device_id(start_dir);

    for dir in start_dir.ancestors() {
        if dir.as_os_str().is_empty() {
            break;
        }
        if start_device.is_some() && fs.device_id(dir) != start_device {
            tracing::trace!("Stopping search for {} at device boundary {}", name, dir.display());
            break;
        }
        let candidate = dir.join(name);
        if fs.is_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Nearest engine configuration file governing `file`.
///
/// Relative paths are resolved against the current directory first, so the
/// walk reaches the filesystem root and any match is absolute.
pub fn find_engine_config<F: FileSystem + ?Sized>(fs: &F, file: &Path) -> Option<PathBuf> {
    let file = resolve(file);
    let dir = file.parent()?;
    find_upwards(fs, dir, ENGINE_CONFIG_FILENAME)
}

/// Absolute form of `path` with `.` and `..` folded lexically.
///
/// Falls back to `path` unchanged if the current directory is unavailable.
pub fn resolve(path: &Path) -> PathBuf {
    let Ok(absolute) = std::path::absolute(path) else {
        return path.to_path_buf();
    };
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved.parent().is_some() {
                    resolved.pop();
                }
            }
            other => resolved.push(other),
        }
    }
    resolved
}
