//! User-facing settings consumed by the engine and the session.
//!
//! Loading is the front end's job; this module only defines the shape, which
//! deserializes from any serde format with every field optional.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::format::FileFormat;

/// Engine and session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch. A disabled session ignores every event.
    pub enabled: bool,

    /// Encrypt saved files that have no encrypted original yet.
    pub creation_enabled: bool,

    /// Engine binary. Defaults to `sops` on `PATH`.
    pub bin_path: Option<PathBuf>,

    /// Run-control file, absolute or relative to each workspace root.
    pub config_path: Option<String>,

    /// Kill the engine if a single invocation runs longer than this.
    #[serde(with = "humantime_serde")]
    pub engine_timeout: Option<Duration>,

    /// Credential defaults, overridden by run control.
    pub defaults: EngineDefaults,

    /// File-name glob to format overrides.
    pub associations: BTreeMap<String, FileFormat>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            creation_enabled: false,
            bin_path: None,
            config_path: None,
            engine_timeout: None,
            defaults: EngineDefaults::default(),
            associations: BTreeMap::new(),
        }
    }
}

/// Credential defaults passed to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineDefaults {
    /// AWS profile name.
    pub aws_profile: Option<String>,
    /// Google application credentials file.
    pub gcp_credentials_path: Option<PathBuf>,
    /// age private key file.
    pub age_key_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.enabled);
        assert!(!settings.creation_enabled);
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "enabled": false,
            "creation_enabled": true,
            "bin_path": "/opt/sops/bin/sops",
            "config_path": "ops/.sopsrc",
            "engine_timeout": "45s",
            "defaults": { "aws_profile": "dev", "age_key_file": "keys.txt" },
            "associations": { "*.conf": "ini" }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert!(!settings.enabled);
        assert!(settings.creation_enabled);
        assert_eq!(settings.engine_timeout, Some(Duration::from_secs(45)));
        assert_eq!(settings.defaults.aws_profile.as_deref(), Some("dev"));
        assert_eq!(settings.defaults.gcp_credentials_path, None);
        assert_eq!(settings.associations.get("*.conf"), Some(&FileFormat::Ini));
    }
}
