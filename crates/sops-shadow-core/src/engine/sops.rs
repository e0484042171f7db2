//! [`Engine`] implementation that shells out to the `sops` binary.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, warn};

use super::{Engine, EngineError, EngineInvocation, FakeEditor, InvocationOutput};
use crate::format::FileFormat;
use crate::fs::{OsFileSystem, find_engine_config, resolve};
use crate::run_control::EngineOptions;
use crate::settings::Settings;

/// Binary looked up on `PATH` when no explicit path is configured.
pub const DEFAULT_BINARY: &str = "sops";

/// Diagnostic the engine prints when no creation rule covers a file.
pub const NO_MATCHING_RULES: &str = "no matching creation rules found";

/// Exit code of the engine's edit mode when the file did not change.
pub const FILE_NOT_MODIFIED_EXIT: i32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Decrypt,
    Encrypt,
    Edit,
}

impl Operation {
    fn flag(self) -> Option<&'static str> {
        match self {
            Operation::Decrypt => Some("--decrypt"),
            Operation::Encrypt => Some("--encrypt"),
            Operation::Edit => None,
        }
    }
}

/// Runs the `sops` binary for every engine operation.
///
/// Credentials and run control are resolved again on each call; nothing is
/// cached between invocations.
#[derive(Debug, Clone)]
pub struct SopsEngine {
    settings: Settings,
    roots: Vec<PathBuf>,
    fs: OsFileSystem,
}

impl SopsEngine {
    /// Engine for `settings`, resolving run control under `workspace_roots`.
    pub fn new(settings: Settings, workspace_roots: Vec<PathBuf>) -> Self {
        Self {
            settings,
            roots: workspace_roots,
            fs: OsFileSystem,
        }
    }

    /// Binary that will be executed.
    pub fn binary(&self) -> PathBuf {
        self.settings
            .bin_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY))
    }

    /// Workspace roots used for run-control lookup.
    pub fn workspace_roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Settings this engine was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Engine configuration governing `target`, if any.
    pub fn config_for(&self, target: &Path) -> Option<PathBuf> {
        find_engine_config(&self.fs, target)
    }

    fn invocation(
        &self,
        operation: Operation,
        config: Option<&Path>,
        format: FileFormat,
        file: &Path,
    ) -> EngineInvocation {
        let options = EngineOptions::resolve(&self.settings, &self.roots);
        let format = format.engine_type();

        let config_args = config.into_iter().flat_map(|config| [Path::new("--config"), config]);
        EngineInvocation::new(self.binary())
            .args(&options.args)
            .args(config_args)
            .args(["--output-type", format, "--input-type", format])
            .args(operation.flag())
            .arg(file)
            .envs(options.env)
            .current_dir(home_dir())
    }

    fn execute(
        &self,
        invocation: &EngineInvocation,
        target: &Path,
    ) -> Result<InvocationOutput, EngineError> {
        debug!("Running engine: {}", invocation);
        let timeout = self.settings.engine_timeout;
        let output = invocation
            .run(timeout)
            .map_err(|source| EngineError::Execution {
                binary: invocation.binary.clone(),
                source,
            })?;

        let Some(output) = output else {
            return Err(EngineError::Timeout {
                path: target.to_path_buf(),
                after: timeout.unwrap_or_default(),
            });
        };

        let stderr = output.stderr_text();
        if !stderr.is_empty() {
            warn!("Engine stderr for {}: {}", target.display(), stderr);
        }
        debug!(
            "Engine exited with {:?} ({} bytes stdout)",
            output.code(),
            output.stdout.len()
        );
        Ok(output)
    }

    /// Interpret a run whose result is on stdout.
    fn stdout_result(
        output: InvocationOutput,
        operation: Operation,
        target: &Path,
    ) -> Result<Vec<u8>, EngineError> {
        let stderr = output.stderr_text();
        if operation != Operation::Decrypt && stderr.contains(NO_MATCHING_RULES) {
            return Err(EngineError::NoMatchingRule {
                path: target.to_path_buf(),
            });
        }
        if !output.status.success() || (output.stdout.is_empty() && !stderr.is_empty()) {
            return Err(EngineError::Output {
                path: target.to_path_buf(),
                code: output.code(),
                stderr,
            });
        }
        if output.stdout.is_empty() {
            return Err(EngineError::EmptyResult {
                path: target.to_path_buf(),
                stderr,
            });
        }
        Ok(output.stdout)
    }
}

impl Engine for SopsEngine {
    fn decrypt(
        &self,
        ciphertext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        let staged = stage(ciphertext, format).map_err(|source| EngineError::Io {
            action: "stage ciphertext",
            path: target.to_path_buf(),
            source,
        })?;

        let config = self.config_for(target);
        let invocation = self.invocation(Operation::Decrypt, config.as_deref(), format, &staged);
        let output = self.execute(&invocation, target)?;
        Self::stdout_result(output, Operation::Decrypt, target)
    }

    fn encrypt_in_place(
        &self,
        plaintext: &[u8],
        ciphertext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        let io_error = |action: &'static str| {
            move |source: io::Error| EngineError::Io {
                action,
                path: target.to_path_buf(),
                source,
            }
        };

        let staged = stage(ciphertext, format).map_err(io_error("stage ciphertext"))?;
        let editor = FakeEditor::create(plaintext).map_err(io_error("create editor script"))?;

        let config = self.config_for(target);
        let invocation = self
            .invocation(Operation::Edit, config.as_deref(), format, &staged)
            .envs(editor.env());
        let output = self.execute(&invocation, target)?;

        let code = output.code();
        if !output.status.success() && code != Some(FILE_NOT_MODIFIED_EXIT) {
            let stderr = output.stderr_text();
            if stderr.contains(NO_MATCHING_RULES) {
                return Err(EngineError::NoMatchingRule {
                    path: target.to_path_buf(),
                });
            }
            return Err(EngineError::Output {
                path: target.to_path_buf(),
                code,
                stderr,
            });
        }

        let encrypted = std::fs::read(&staged).map_err(io_error("read re-encrypted file"))?;
        if encrypted.is_empty() {
            return Err(EngineError::EmptyResult {
                path: target.to_path_buf(),
                stderr: output.stderr_text(),
            });
        }
        Ok(encrypted)
    }

    fn encrypt_new(
        &self,
        plaintext: &[u8],
        target: &Path,
        format: FileFormat,
    ) -> Result<Vec<u8>, EngineError> {
        let io_error = |action: &'static str| {
            move |source: io::Error| EngineError::Io {
                action,
                path: target.to_path_buf(),
                source,
            }
        };

        let staging = tempfile::Builder::new()
            .prefix("sops-shadow-new-")
            .tempdir()
            .map_err(io_error("create staging directory"))?;

        let file_name = target.file_name().map(PathBuf::from).unwrap_or_default();
        let resolved = resolve(target);
        let config = self.config_for(&resolved);
        let (staged_file, staged_config) = match &config {
            Some(config) => {
                // Creation rules match on the path relative to the config file.
                let relative = config
                    .parent()
                    .and_then(|dir| resolved.strip_prefix(dir).ok())
                    .map_or_else(|| file_name.clone(), Path::to_path_buf);
                let config_name = config.file_name().map(PathBuf::from).unwrap_or_default();
                let staged_config = staging.path().join(config_name);
                std::fs::copy(config, &staged_config).map_err(io_error("copy engine config"))?;
                (staging.path().join(relative), Some(staged_config))
            }
            None => (staging.path().join(&file_name), None),
        };

        if let Some(parent) = staged_file.parent() {
            std::fs::create_dir_all(parent).map_err(io_error("create staging directory"))?;
        }
        write_private(&staged_file, plaintext).map_err(io_error("stage plaintext"))?;

        let invocation = self.invocation(
            Operation::Encrypt,
            staged_config.as_deref(),
            format,
            &staged_file,
        );
        let output = self.execute(&invocation, target)?;
        Self::stdout_result(output, Operation::Encrypt, target)
    }
}

/// Write `contents` to an owner-only temp file and close it.
fn stage(contents: &[u8], format: FileFormat) -> io::Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("sops-shadow-")
        .suffix(&format!(".{}", format.engine_type()))
        .tempfile()?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    Ok(file.into_temp_path())
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?.write_all(contents)
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}
