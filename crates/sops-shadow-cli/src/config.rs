//! Settings file handling.
//!
//! Settings live in `config.toml` under the platform config directory
//! (`~/.config/sops-shadow/` on Linux). `SOPS_SHADOW_CONFIG_DIR` moves the
//! whole directory, which also holds the session state file.
//!
//! ```toml
//! creation_enabled = true
//! bin_path = "/usr/local/bin/sops"
//! engine_timeout = "30s"
//!
//! [defaults]
//! aws_profile = "dev"
//!
//! [associations]
//! "*.conf" = "ini"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sops_shadow_core::Settings;

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "SOPS_SHADOW_CONFIG_DIR";

/// Settings file name inside the config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Directory holding the settings and session state.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let dirs = directories::ProjectDirs::from("", "", "sops-shadow")
        .context("Failed to determine config directory")?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Path of the settings file.
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILENAME))
}

/// Load settings, falling back to defaults when the file does not exist.
pub fn load_settings() -> Result<(PathBuf, Settings)> {
    let path = config_path()?;
    let settings = read_settings(&path)?;
    Ok((path, settings))
}

fn read_settings(path: &Path) -> Result<Settings> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read settings file: {}", path.display()));
        }
    };
    parse_settings(&contents)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}

fn parse_settings(contents: &str) -> Result<Settings> {
    Ok(toml::from_str(contents)?)
}
