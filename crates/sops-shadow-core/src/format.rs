//! Supported file formats and SOPS encryption detection.
//!
//! Each [`FileFormat`] selects one parser from a fixed table. Parsers turn file
//! content into a [`serde_json::Value`], which is all detection needs: a file is
//! SOPS-encrypted iff its (first) document is an object carrying either a
//! `sops` object with a string `version`, or a top-level string `sops_version`
//! (the flat layout used for dotenv files).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::shadow::{DECRYPTED_PREFIX, normalize_path};

/// Serialization format of a managed file.
///
/// The discriminant order matches [`PARSERS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// YAML, possibly with several documents.
    Yaml,
    /// JSON.
    Json,
    /// INI with optional sections.
    Ini,
    /// `KEY=value` dotenv files.
    Dotenv,
    /// Any other text file, handled by the engine as opaque data.
    Plaintext,
    /// Arbitrary bytes, handled by the engine as opaque data.
    Binary,
}

impl FileFormat {
    /// All formats in table order.
    pub const ALL: [FileFormat; 6] = [
        FileFormat::Yaml,
        FileFormat::Json,
        FileFormat::Ini,
        FileFormat::Dotenv,
        FileFormat::Plaintext,
        FileFormat::Binary,
    ];

    /// Name of the format.
    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Yaml => "yaml",
            FileFormat::Json => "json",
            FileFormat::Ini => "ini",
            FileFormat::Dotenv => "dotenv",
            FileFormat::Plaintext => "plaintext",
            FileFormat::Binary => "binary",
        }
    }

    /// Value passed to the engine's `--input-type` / `--output-type`.
    ///
    /// The engine has no plaintext store; it treats such files as binary.
    pub fn engine_type(self) -> &'static str {
        match self {
            FileFormat::Plaintext => "binary",
            other => other.as_str(),
        }
    }

    /// Infer the format from a file name, looking through the shadow marker.
    pub fn from_path(path: &Path) -> Option<Self> {
        let path = normalize_path(path);
        let name = path.file_name()?.to_str()?;
        let name = name.strip_prefix(DECRYPTED_PREFIX).unwrap_or(name);

        if name == ".env" || name.starts_with(".env.") {
            return Some(FileFormat::Dotenv);
        }

        let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "yaml" | "yml" => Some(FileFormat::Yaml),
            "json" => Some(FileFormat::Json),
            "ini" => Some(FileFormat::Ini),
            "env" => Some(FileFormat::Dotenv),
            _ => None,
        }
    }

    /// Parse `content` into a structured value.
    ///
    /// YAML always yields an array with one element per document.
    pub fn parse(self, content: &str) -> Result<Value, ParseError> {
        PARSERS[self as usize](content).map_err(|reason| ParseError {
            format: self,
            reason,
        })
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown format name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown file format: {0}")]
pub struct ParseFormatError(String);

impl FromStr for FileFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileFormat::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseFormatError(s.to_owned()))
    }
}

/// Content could not be parsed as the declared format.
///
/// Usually means the file is simply not structured data, so callers keep this
/// out of user-visible notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse content as {format}: {reason}")]
pub struct ParseError {
    /// The format the content was parsed as.
    pub format: FileFormat,
    /// Parser message.
    pub reason: String,
}

type ParseFn = fn(&str) -> Result<Value, String>;

/// Parser table indexed by `FileFormat as usize`.
const PARSERS: [ParseFn; 6] = [
    parse_yaml,
    parse_json,
    parse_ini,
    parse_dotenv,
    parse_json,
    parse_json,
];

fn parse_yaml(content: &str) -> Result<Value, String> {
    let mut documents = Vec::new();
    for document in serde_norway::Deserializer::from_str(content) {
        documents.push(Value::deserialize(document).map_err(|e| e.to_string())?);
    }
    Ok(Value::Array(documents))
}

fn parse_json(content: &str) -> Result<Value, String> {
    serde_json::from_str(content).map_err(|e| e.to_string())
}

fn parse_ini(content: &str) -> Result<Value, String> {
    let ini = ini::Ini::load_from_str(content).map_err(|e| e.to_string())?;
    let mut root = Map::new();
    for (section, properties) in &ini {
        let entries: Map<String, Value> = properties
            .iter()
            .map(|(key, value)| (key.to_owned(), Value::String(value.to_owned())))
            .collect();
        match section {
            None => root.extend(entries),
            Some(name) => {
                root.insert(name.to_owned(), Value::Object(entries));
            }
        }
    }
    Ok(Value::Object(root))
}

fn parse_dotenv(content: &str) -> Result<Value, String> {
    let mut root = Map::new();
    for entry in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, value) = entry.map_err(|e| e.to_string())?;
        root.insert(key, Value::String(value));
    }
    Ok(Value::Object(root))
}

/// Returns true if `value` looks like a SOPS-encrypted document.
///
/// Arrays (multi-document YAML) are judged by their first element only.
pub fn is_sops_encrypted(value: &Value) -> bool {
    let document = match value {
        Value::Array(documents) => match documents.first() {
            Some(first) => first,
            None => return false,
        },
        other => other,
    };
    let Value::Object(map) = document else {
        return false;
    };

    let nested = map
        .get("sops")
        .and_then(Value::as_object)
        .and_then(|sops| sops.get("version"))
        .is_some_and(Value::is_string);
    let flat = map.get("sops_version").is_some_and(Value::is_string);

    nested || flat
}

/// Detect whether raw file bytes are SOPS-encrypted content of `format`.
///
/// Empty content is never encrypted. Content that is not UTF-8 or does not
/// parse yields a [`ParseError`].
pub fn detect(content: &[u8], format: FileFormat) -> Result<bool, ParseError> {
    if content.is_empty() {
        return Ok(false);
    }
    let text = std::str::from_utf8(content).map_err(|e| ParseError {
        format,
        reason: format!("content is not valid UTF-8: {e}"),
    })?;
    Ok(is_sops_encrypted(&format.parse(text)?))
}

/// Resolves the format of a path from user associations and file extensions.
///
/// Associations map a file-name glob (`*.conf`, `secrets`) to a format and win
/// over the extension rules of [`FileFormat::from_path`].
#[derive(Debug, Clone, Default)]
pub struct FormatResolver {
    associations: Vec<(glob::Pattern, FileFormat)>,
}

impl FormatResolver {
    /// Build a resolver. Invalid glob patterns are logged and skipped.
    pub fn new(associations: &BTreeMap<String, FileFormat>) -> Self {
        let associations = associations
            .iter()
            .filter_map(|(pattern, format)| match glob::Pattern::new(pattern) {
                Ok(compiled) => Some((compiled, *format)),
                Err(e) => {
                    tracing::warn!("Ignoring invalid file association '{}': {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { associations }
    }

    /// Format for `path`, or `None` if the file is not a supported format.
    pub fn resolve(&self, path: &Path) -> Option<FileFormat> {
        let path = normalize_path(path);
        let name = path.file_name()?.to_str()?;
        let name = name.strip_prefix(DECRYPTED_PREFIX).unwrap_or(name);

        self.associations
            .iter()
            .find(|(pattern, _)| pattern.matches(name))
            .map(|(_, format)| *format)
            .or_else(|| FileFormat::from_path(&path))
    }
}
