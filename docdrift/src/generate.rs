//! Turning a diff into a named migration script.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::diff::{ChangeCounts, DiffOptions, DiffResult, diff_with};
use crate::errors::DriftError;
use crate::executor::{MigrationScript, write_script};
use crate::ledger::{Ledger, MigrationRecord};
use crate::snapshot::{Snapshot, seal};
use crate::store::DocumentStore;

const FALLBACK_SLUG: &str = "schema_update";

/// A script written by [`generate`].
#[derive(Debug, Clone)]
pub struct GeneratedMigration {
    pub path: PathBuf,
    pub script: MigrationScript,
    pub diff: DiffResult,
}

/// `YYYYMMDD_HHMMSS_<slug>`
pub fn migration_name(slug: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", at.format("%Y%m%d_%H%M%S"), sanitize_slug(slug))
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to `_`.
pub fn sanitize_slug(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Slug describing a change set when none was given.
pub fn default_slug(changes: &ChangeCounts) -> String {
    fn only(items: &[String]) -> Option<String> {
        if items.len() == 1 { items.first().cloned() } else { None }
    }
    let single_kind = [
        changes.collections.added.len(),
        changes.collections.removed.len(),
        changes.fields.added.len(),
        changes.fields.removed.len(),
        changes.fields.renamed.len(),
        changes.indexes.added.len(),
        changes.indexes.removed.len(),
    ]
    .iter()
    .filter(|n| **n > 0)
    .count()
        == 1;

    if single_kind {
        if let Some(name) = only(&changes.collections.added) {
            return sanitize_slug(&format!("create_{name}"));
        }
        if let Some(name) = only(&changes.collections.removed) {
            return sanitize_slug(&format!("drop_{name}"));
        }
        if let Some(path) = only(&changes.fields.added) {
            return sanitize_slug(&format!("add_{path}"));
        }
        if let Some(path) = only(&changes.fields.removed) {
            return sanitize_slug(&format!("remove_{path}"));
        }
        if let [rename] = changes.fields.renamed.as_slice() {
            return sanitize_slug(&format!("rename_{}_to_{}", rename.from, rename.to));
        }
    }
    FALLBACK_SLUG.to_string()
}

/// Build the script for `diff` between two sealed snapshots.
pub fn build_script(name: &str, diff: &DiffResult, from: &Snapshot, to: &Snapshot) -> MigrationScript {
    MigrationScript {
        name: name.to_string(),
        from_hash: from.hash.clone(),
        to_hash: to.hash.clone(),
        created_at: Utc::now(),
        up: diff.up.clone(),
        down: diff.down.clone(),
        warnings: diff.warnings.clone(),
    }
}

/// Diff `observed` against `declared` and write the script into `dir`.
///
/// Returns `None` when there is nothing to migrate.
pub fn generate(
    observed: Snapshot,
    declared: Snapshot,
    options: &DiffOptions,
    dir: &Path,
    slug: Option<&str>,
) -> Result<Option<GeneratedMigration>, DriftError> {
    let observed = seal(observed)?;
    let declared = seal(declared)?;
    if observed.hash == declared.hash {
        info!("snapshots match ({}); nothing to generate", short(&declared.hash));
        return Ok(None);
    }

    let diff = diff_with(&observed, &declared, options);
    if !diff.has_changes() {
        info!("no structural changes between snapshots");
        return Ok(None);
    }
    for warning in &diff.warnings {
        warn!("{warning}");
    }

    let slug = match slug {
        Some(slug) => sanitize_slug(slug),
        None => default_slug(&diff.metadata),
    };
    let name = migration_name(&slug, Utc::now());
    let script = build_script(&name, &diff, &observed, &declared);
    let path = write_script(dir, &script)?;
    info!(
        "wrote {} ({} up, {} down command(s))",
        path.display(),
        script.up.len(),
        script.down.len()
    );

    Ok(Some(GeneratedMigration { path, script, diff }))
}

/// Record a freshly generated script in the ledger as unapplied.
pub async fn record<S: DocumentStore>(
    store: &mut S,
    ledger: &Ledger,
    script: &MigrationScript,
) -> Result<MigrationRecord, DriftError> {
    ledger.initialize(store).await?;
    ledger
        .create_record(
            store,
            &script.filename(),
            &script.from_hash,
            &script.to_hash,
            &script.up,
            &script.down,
        )
        .await
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{discover, validate_scripts};
    use crate::snapshot::{CollectionStructure, FieldDefinition, TypeTag};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn users(with_phone: bool) -> Snapshot {
        let mut users = CollectionStructure::new().field("email", FieldDefinition::new(TypeTag::String));
        if with_phone {
            users = users.field("phone", FieldDefinition::new(TypeTag::String).required(true));
        }
        Snapshot::new().with_collection("users", users)
    }

    #[test]
    fn test_slugs_are_sanitized() {
        assert_eq!(sanitize_slug("Add Phone!"), "add_phone");
        assert_eq!(sanitize_slug("--"), "schema_update");
        assert_eq!(sanitize_slug("users.profile.bio"), "users_profile_bio");
    }

    #[test]
    fn test_migration_name_uses_timestamp_prefix() {
        let at = Utc.with_ymd_and_hms(2024, 12, 28, 10, 0, 0).unwrap();
        assert_eq!(migration_name("add phone", at), "20241228_100000_add_phone");
    }

    #[test]
    fn test_identical_snapshots_generate_nothing() {
        let dir = TempDir::new().unwrap();
        let result = generate(users(true), users(true), &DiffOptions::default(), dir.path(), None).unwrap();
        assert!(result.is_none());
        assert!(discover(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_generated_script_validates() {
        let dir = TempDir::new().unwrap();
        let generated = generate(users(false), users(true), &DiffOptions::default(), dir.path(), None)
            .unwrap()
            .unwrap();
        assert!(generated.script.name.ends_with("_add_phone"));
        assert_ne!(generated.script.from_hash, generated.script.to_hash);

        let validated = validate_scripts(discover(dir.path()).unwrap()).unwrap();
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].script.up, generated.script.up);
    }

    #[tokio::test]
    async fn recording_creates_an_unapplied_record() {
        let dir = TempDir::new().unwrap();
        let generated = generate(users(false), users(true), &DiffOptions::default(), dir.path(), Some("phone"))
            .unwrap()
            .unwrap();
        let mut store = MemoryStore::new();
        let ledger = Ledger::default();
        let record = record(&mut store, &ledger, &generated.script).await.unwrap();
        assert!(!record.is_applied);
        assert_eq!(record.filename, generated.script.filename());
    }
}
