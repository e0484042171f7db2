//! Per-workspace run control (`.sopsrc`) and engine option resolution.
//!
//! Run control is read again for every engine invocation, so edits to the file
//! take effect on the next call without any reload step.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::settings::Settings;

/// Default run-control file name, looked up under each workspace root.
pub const RUN_CONTROL_FILENAME: &str = ".sopsrc";

/// Environment variable pointing the engine at Google credentials.
pub const GCP_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
/// Environment variable pointing the engine at an age key file.
pub const AGE_KEY_FILE_ENV: &str = "SOPS_AGE_KEY_FILE";
/// Environment variable naming the AWS profile.
pub const AWS_PROFILE_ENV: &str = "AWS_PROFILE";

/// Contents of a run-control file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunControl {
    /// AWS profile name.
    pub aws_profile: Option<String>,
    /// Google application credentials file.
    pub gcp_credentials_path: Option<PathBuf>,
    /// age private key file.
    pub age_key_file: Option<PathBuf>,
}

/// Candidate run-control files in lookup order.
pub fn candidates(settings: &Settings, roots: &[PathBuf]) -> Vec<PathBuf> {
    match settings.config_path.as_deref().filter(|p| !p.is_empty()) {
        Some(configured) if Path::new(configured).is_absolute() => vec![PathBuf::from(configured)],
        Some(configured) => roots.iter().map(|root| root.join(configured)).collect(),
        None => roots.iter().map(|root| root.join(RUN_CONTROL_FILENAME)).collect(),
    }
}

/// Load the first existing, parseable run-control candidate.
///
/// Returns the path it came from alongside the parsed content.
pub fn load(settings: &Settings, roots: &[PathBuf]) -> Option<(PathBuf, RunControl)> {
    for candidate in candidates(settings, roots) {
        let content = match std::fs::read_to_string(&candidate) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!("Cannot read run control {}: {}", candidate.display(), e);
                continue;
            }
        };
        if content.trim().is_empty() {
            return Some((candidate, RunControl::default()));
        }
        match serde_norway::from_str::<Option<RunControl>>(&content) {
            Ok(rc) => return Some((candidate, rc.unwrap_or_default())),
            Err(e) => {
                tracing::warn!("Ignoring unparseable run control {}: {}", candidate.display(), e);
            }
        }
    }
    None
}

/// Extra arguments and environment for one engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// General arguments placed before the operation arguments.
    pub args: Vec<OsString>,
    /// Environment overlay.
    pub env: Vec<(&'static str, OsString)>,
}

impl EngineOptions {
    /// Resolve options from settings defaults overridden by run control.
    pub fn resolve(settings: &Settings, roots: &[PathBuf]) -> Self {
        let rc = load(settings, roots).map(|(_, rc)| rc).unwrap_or_default();
        Self::merge(settings, &rc, roots)
    }

    /// Merge settings defaults with an already loaded run control.
    pub fn merge(settings: &Settings, rc: &RunControl, roots: &[PathBuf]) -> Self {
        let defaults = &settings.defaults;
        let mut options = Self::default();

        let aws_profile = rc
            .aws_profile
            .as_ref()
            .or(defaults.aws_profile.as_ref())
            .filter(|profile| !profile.is_empty());
        if let Some(profile) = aws_profile {
            options.args.push("--aws-profile".into());
            options.args.push(profile.into());
            options.env.push((AWS_PROFILE_ENV, profile.into()));
        }

        let gcp = rc
            .gcp_credentials_path
            .as_ref()
            .or(defaults.gcp_credentials_path.as_ref());
        if let Some(path) = gcp {
            options
                .env
                .push((GCP_CREDENTIALS_ENV, resolve_against_roots(path, roots).into()));
        }

        let age = rc.age_key_file.as_ref().or(defaults.age_key_file.as_ref());
        if let Some(path) = age {
            options
                .env
                .push((AGE_KEY_FILE_ENV, resolve_against_roots(path, roots).into()));
        }

        options
    }
}

/// Resolve a relative path against the first root where it exists.
///
/// Absolute paths and paths found under no root are returned unchanged.
pub fn resolve_against_roots(path: &Path, roots: &[PathBuf]) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    roots
        .iter()
        .map(|root| root.join(path))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}
