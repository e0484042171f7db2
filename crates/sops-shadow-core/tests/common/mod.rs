//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sops_shadow_core::{Engine, EngineError, FileFormat, FileSystem, Notifier, OsFileSystem};

/// Key id written by `encrypt_new`; `encrypt_in_place` keeps the existing one.
pub const NEW_KEY: &str = "fresh";

/// Build fake ciphertext: YAML carrying hex plaintext, a key id and a sops block.
pub fn seal(plaintext: &[u8], key: &str) -> Vec<u8> {
    format!(
        "data: {}\nkey: {}\nsops:\n    version: 3.8.1\n",
        hex::encode(plaintext),
        key
    )
    .into_bytes()
}

fn field<'a>(ciphertext: &'a str, name: &str) -> Option<&'a str> {
    ciphertext
        .lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(": "))
}

/// Recover the plaintext of fake ciphertext.
pub fn open_sealed(ciphertext: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(ciphertext).ok()?;
    hex::decode(field(text, "data")?).ok()
}

/// Key id of fake ciphertext.
pub fn key_of(ciphertext: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(ciphertext).ok()?;
    field(text, "key").map(str::to_owned)
}

/// In-process engine that counts its invocations.
///
/// `encrypt_new` reports a missing creation rule for any target whose file name
/// contains "plain".
#[derive(Debug, Default)]
pub struct FakeEngine {
    pub decrypts: Cell<usize>,
    pub in_place: Cell<usize>,
    pub created: Cell<usize>,
    pub fail_decrypt: Cell<bool>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.decrypts.get() + self.in_place.get() + self.created.get()
    }
}

impl Engine for FakeEngine {
    fn decrypt(
        &self,
        ciphertext: &[u8],
        target: &Path,
        _format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        self.decrypts.set(self.decrypts.get() + 1);
        if self.fail_decrypt.get() {
            return Err(EngineError::Output {
                path: target.to_path_buf(),
                code: Some(128),
                stderr: "Failed to get the data key required to decrypt the SOPS file.".into(),
            });
        }
        open_sealed(ciphertext).ok_or_else(|| EngineError::EmptyResult {
            path: target.to_path_buf(),
            stderr: String::new(),
        })
    }

    fn encrypt_in_place(
        &self,
        plaintext: &[u8],
        ciphertext: &[u8],
        target: &Path,
        _format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        self.in_place.set(self.in_place.get() + 1);
        let key = key_of(ciphertext).ok_or_else(|| EngineError::EmptyResult {
            path: target.to_path_buf(),
            stderr: String::new(),
        })?;
        Ok(seal(plaintext, &key))
    }

    fn encrypt_new(
        &self,
        plaintext: &[u8],
        target: &Path,
        _format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        self.created.set(self.created.get() + 1);
        let name = target.file_name().unwrap_or_default().to_string_lossy();
        if name.contains("plain") {
            return Err(EngineError::NoMatchingRule {
                path: target.to_path_buf(),
            });
        }
        Ok(seal(plaintext, NEW_KEY))
    }
}

/// Notifier that records every message.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub messages: RefCell<Vec<(&'static str, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self, level: &str) -> usize {
        self.messages
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.messages.borrow_mut().push(("info", message.to_owned()));
    }

    fn warn(&self, message: &str) {
        self.messages.borrow_mut().push(("warn", message.to_owned()));
    }

    fn error(&self, message: &str) {
        self.messages.borrow_mut().push(("error", message.to_owned()));
    }
}

/// Real filesystem whose `remove` fails for chosen paths and counts writes.
#[derive(Debug, Default)]
pub struct FlakyFs {
    pub locked: RefCell<HashSet<PathBuf>>,
    pub writes: Cell<usize>,
}

impl FlakyFs {
    pub fn lock(&self, path: &Path) {
        self.locked.borrow_mut().insert(path.to_path_buf());
    }
}

impl FileSystem for FlakyFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        OsFileSystem.read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.writes.set(self.writes.get() + 1);
        OsFileSystem.write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        OsFileSystem.exists(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        OsFileSystem.is_file(path)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        OsFileSystem.modified(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.locked.borrow().contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is locked",
            ));
        }
        OsFileSystem.remove(path)
    }
}

/// Set the modification time of `path` to `secs` after an arbitrary base.
pub fn set_mtime(path: &Path, secs: u64) {
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let time = filetime::FileTime::from_system_time(base + Duration::from_secs(secs));
    filetime::set_file_mtime(path, time).unwrap();
}
