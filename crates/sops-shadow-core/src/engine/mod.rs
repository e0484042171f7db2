//! The encryption engine seam and its subprocess implementation.
//!
//! [`Engine`] is everything reconciliation needs from the outside world's
//! cryptography: turn ciphertext into plaintext, re-encrypt plaintext into an
//! existing ciphertext, and encrypt a brand new file. [`SopsEngine`] implements
//! it by running the `sops` binary.

pub mod fake_editor;
mod process;
pub mod sops;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use thiserror::Error;

use crate::format::FileFormat;

pub use fake_editor::{DECRYPTED_FILE_ENV, FakeEditor};
pub use sops::SopsEngine;

/// Errors from an engine invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be started.
    #[error("failed to run engine binary {}: {source}", binary.display())]
    Execution {
        /// Binary that failed to start.
        binary: PathBuf,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// The engine exited unsuccessfully or only wrote diagnostics.
    #[error("engine failed for {} ({}): {}", path.display(), describe_exit(*code), stderr.trim())]
    Output {
        /// File the engine was working on.
        path: PathBuf,
        /// Exit code, `None` if killed by a signal.
        code: Option<i32>,
        /// Engine diagnostics.
        stderr: String,
    },

    /// The engine reported success but produced nothing.
    #[error("engine produced no output for {}", path.display())]
    EmptyResult {
        /// File the engine was working on.
        path: PathBuf,
        /// Engine diagnostics, possibly empty.
        stderr: String,
    },

    /// No creation rule in the engine configuration covers the file.
    #[error("no matching creation rules for {}", path.display())]
    NoMatchingRule {
        /// File that no rule matched.
        path: PathBuf,
    },

    /// The engine ran longer than the configured timeout and was killed.
    #[error("engine timed out after {} for {}", humantime::format_duration(*after), path.display())]
    Timeout {
        /// File the engine was working on.
        path: PathBuf,
        /// Configured timeout.
        after: Duration,
    },

    /// Staging temporary files for the engine failed.
    #[error("failed to {action} for {}: {source}", path.display())]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// File the engine was working on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// External encryption engine.
///
/// `target` is the real-tree path the content belongs to; it selects the
/// engine configuration and creation rules. Implementations never write to
/// `target` themselves.
pub trait Engine {
    /// Decrypt `ciphertext` belonging to `target`.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError>;

    /// Re-encrypt `plaintext` into the existing `ciphertext` of `target`,
    /// keeping its data key and metadata.
    fn encrypt_in_place(
        &self,
        plaintext: &[u8],
        ciphertext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError>;

    /// Encrypt `plaintext` as a new file at `target`.
    fn encrypt_new(
        &self,
        plaintext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError>;
}

impl<E: Engine + ?Sized> Engine for &E {
    fn decrypt(
        &self,
        ciphertext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        (**self).decrypt(ciphertext, target, format)
    }

    fn encrypt_in_place(
        &self,
        plaintext: &[u8],
        ciphertext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        (**self).encrypt_in_place(plaintext, ciphertext, target, format)
    }

    fn encrypt_new(
        &self,
        plaintext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        (**self).encrypt_new(plaintext, target, format)
    }
}

/// A fully described engine call.
#[derive(Debug, Clone, Default)]
pub struct EngineInvocation {
    /// Binary to run.
    pub binary: PathBuf,
    /// Arguments, in order.
    pub args: Vec<OsString>,
    /// Environment overlay on top of the inherited environment.
    pub env: Vec<(OsString, OsString)>,
    /// Working directory, or inherited when `None`.
    pub working_dir: Option<PathBuf>,
}

impl EngineInvocation {
    /// Start describing a call to `binary`.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Add one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env.push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Add several environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Run the call to completion.
    ///
    /// Returns `Ok(None)` when `timeout` expired and the process was killed.
    pub fn run(&self, timeout: Option<Duration>) -> io::Result<Option<InvocationOutput>> {
        let mut command = Command::new(&self.binary);
        command.args(&self.args);
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        Ok(process::run(command, timeout)?.map(|captured| InvocationOutput {
            status: captured.status,
            stdout: captured.stdout,
            stderr: captured.stderr,
        }))
    }
}

impl fmt::Display for EngineInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What an engine call left behind.
#[derive(Debug, Clone)]
pub struct InvocationOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl InvocationOutput {
    /// Exit code, `None` if terminated by a signal.
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Standard error as lossy UTF-8 with surrounding whitespace removed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display() {
        let invocation = EngineInvocation::new("sops")
            .args(["--output-type", "yaml"])
            .arg("--decrypt")
            .arg("/tmp/x.yaml")
            .env("SOPS_AGE_KEY_FILE", "/keys.txt");
        assert_eq!(
            invocation.to_string(),
            "sops --output-type yaml --decrypt /tmp/x.yaml"
        );
        assert_eq!(invocation.env.len(), 1);
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::Output {
            path: PathBuf::from("/a/secret.yaml"),
            code: Some(128),
            stderr: "Error getting data key\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "engine failed for /a/secret.yaml (exit code 128): Error getting data key"
        );

        let err = EngineError::Timeout {
            path: PathBuf::from("/a/secret.yaml"),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "engine timed out after 30s for /a/secret.yaml");
    }
}
