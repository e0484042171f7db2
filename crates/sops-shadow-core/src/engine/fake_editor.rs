//! Throwaway "editor" used to drive the engine's edit mode non-interactively.
//!
//! The engine's edit flow decrypts into a temp file, runs `$EDITOR <file>`,
//! then re-encrypts whatever the editor left behind while keeping the data key
//! and metadata of the existing ciphertext. Pointing `EDITOR` at a script that
//! copies our plaintext over its argument turns that flow into "re-encrypt
//! this plaintext in place".

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::Path;

use tempfile::TempPath;

/// Environment variable naming the plaintext the script copies from.
pub const DECRYPTED_FILE_ENV: &str = "SOPS_SHADOW_DECRYPTED_FILE_PATH";

#[cfg(not(windows))]
const SCRIPT: &str = "#!/bin/sh\ncat \"$SOPS_SHADOW_DECRYPTED_FILE_PATH\" > \"$1\"\n";

#[cfg(windows)]
const SCRIPT: &str = "@echo off\r\ncopy /Y \"%SOPS_SHADOW_DECRYPTED_FILE_PATH%\" \"%~1\" >NUL\r\n";

#[cfg(not(windows))]
const SCRIPT_SUFFIX: &str = "";

#[cfg(windows)]
const SCRIPT_SUFFIX: &str = ".cmd";

/// Editor script plus the plaintext it copies. Both files are deleted on drop.
#[derive(Debug)]
pub struct FakeEditor {
    script: TempPath,
    plaintext: TempPath,
}

impl FakeEditor {
    /// Stage `plaintext` in an owner-only temp file and write the script.
    pub fn create(plaintext: &[u8]) -> io::Result<Self> {
        let mut staged = tempfile::Builder::new()
            .prefix("sops-shadow-plain-")
            .tempfile()?;
        staged.write_all(plaintext)?;
        staged.as_file().sync_all()?;

        let mut script = tempfile::Builder::new()
            .prefix("sops-shadow-editor-")
            .suffix(SCRIPT_SUFFIX)
            .tempfile()?;
        script.write_all(SCRIPT.as_bytes())?;
        script.as_file().sync_all()?;
        make_executable(script.as_file())?;

        // Close both handles: executing a file that is still open for
        // writing fails with ETXTBSY on Linux.
        Ok(Self {
            script: script.into_temp_path(),
            plaintext: staged.into_temp_path(),
        })
    }

    /// Path of the editor script.
    pub fn script_path(&self) -> &Path {
        &self.script
    }

    /// Path of the staged plaintext.
    pub fn plaintext_path(&self) -> &Path {
        &self.plaintext
    }

    /// Value for `EDITOR`: forward slashes, quoted when it contains spaces.
    pub fn editor_command(&self) -> String {
        let path = self.script.to_string_lossy().replace('\\', "/");
        if path.contains(char::is_whitespace) {
            format!("\"{path}\"")
        } else {
            path
        }
    }

    /// Environment overlay for the engine's edit mode.
    pub fn env(&self) -> Vec<(&'static str, OsString)> {
        vec![
            ("EDITOR", self.editor_command().into()),
            (DECRYPTED_FILE_ENV, self.plaintext.as_os_str().to_owned()),
        ]
    }
}

#[cfg(unix)]
fn make_executable(file: &std::fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_file: &std::fs::File) -> io::Result<()> {
    Ok(())
}
