//! Migration script files: naming, discovery and persistence.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::command::MigrationCommand;
use crate::errors::DriftError;

/// `YYYYMMDD_HHMMSS_<slug>` without the `.json` extension.
pub static FILENAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}_\d{6}_[A-Za-z0-9_]+$").expect("filename pattern is valid"));

pub const SCRIPT_EXTENSION: &str = "json";

/// Contents of a migration script file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationScript {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub from_hash: String,
    #[serde(default)]
    pub to_hash: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub up: Vec<MigrationCommand>,
    pub down: Vec<MigrationCommand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MigrationScript {
    pub fn filename(&self) -> String {
        script_filename(&self.name)
    }
}

pub fn script_filename(name: &str) -> String {
    format!("{name}.{SCRIPT_EXTENSION}")
}

/// Accept `20240101_120000_add_phone` or `20240101_120000_add_phone.json`.
pub fn normalize_filename(name: &str) -> String {
    if name.ends_with(&format!(".{SCRIPT_EXTENSION}")) {
        name.to_string()
    } else {
        script_filename(name)
    }
}

/// A script found on disk, not yet validated.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    pub filename: String,
    pub stem: String,
    pub path: PathBuf,
    pub checksum: String,
    pub content: String,
}

/// SHA-256 hex digest of script content.
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// List every `*.json` script in `dir`, sorted by filename (timestamp order).
///
/// Names are checked later by validation so that a misnamed file fails the
/// whole batch instead of being silently skipped.
pub fn discover(dir: &Path) -> Result<Vec<ScriptFile>, DriftError> {
    let mut scripts = Vec::new();
    if !dir.exists() {
        return Ok(scripts);
    }

    let entries = std::fs::read_dir(dir).map_err(|err| DriftError::io(dir, err))?;
    for entry in entries {
        let path = entry.map_err(|err| DriftError::io(dir, err))?.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != SCRIPT_EXTENSION) {
            continue;
        }
        let (Some(filename), Some(stem)) = (
            path.file_name().and_then(|n| n.to_str()),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if filename.starts_with('.') {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|err| DriftError::io(&path, err))?;
        scripts.push(ScriptFile {
            filename: filename.to_string(),
            stem: stem.to_string(),
            checksum: calculate_checksum(&content),
            path,
            content,
        });
    }

    scripts.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(scripts)
}

/// Write a script as pretty JSON; refuses to overwrite an existing file.
pub fn write_script(dir: &Path, script: &MigrationScript) -> Result<PathBuf, DriftError> {
    std::fs::create_dir_all(dir).map_err(|err| DriftError::io(dir, err))?;
    let path = dir.join(script.filename());
    let content = serde_json::to_string_pretty(script).map_err(|err| DriftError::Other {
        message: format!("failed to serialize migration script: {err}").into(),
    })?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|err| DriftError::io(&path, err))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|err| DriftError::io(&path, err))?;
    Ok(path)
}
