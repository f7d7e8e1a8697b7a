//! Snapshot loading utilities.

use std::collections::BTreeMap;
use std::path::Path;

use super::Snapshot;
use crate::errors::DriftError;

/// Load a single snapshot JSON file.
pub fn load_snapshot(path: &Path) -> Result<Snapshot, DriftError> {
    let content = std::fs::read_to_string(path).map_err(|err| DriftError::io(path, err))?;
    Snapshot::from_json(&content).map_err(|err| match err {
        DriftError::MalformedSnapshot { reason, .. } => DriftError::malformed(path.display().to_string(), reason),
        other => other,
    })
}

/// Load every `*.json` snapshot in a directory, keyed by file stem.
///
/// A missing directory yields an empty map.
pub fn load_snapshots(dir: &Path) -> Result<BTreeMap<String, Snapshot>, DriftError> {
    let mut snapshots = BTreeMap::new();
    if !dir.exists() {
        return Ok(snapshots);
    }

    let entries = std::fs::read_dir(dir).map_err(|err| DriftError::io(dir, err))?;
    for entry in entries {
        let path = entry.map_err(|err| DriftError::io(dir, err))?.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        snapshots.insert(stem.to_string(), load_snapshot(&path)?);
    }
    Ok(snapshots)
}

/// Write a snapshot as pretty-printed JSON, creating parent directories.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), DriftError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| DriftError::io(parent, err))?;
    }
    let content = serde_json::to_string_pretty(snapshot).map_err(|err| DriftError::Other {
        message: format!("failed to serialize snapshot: {err}").into(),
    })?;
    std::fs::write(path, content).map_err(|err| DriftError::io(path, err))
}
