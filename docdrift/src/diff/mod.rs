//! Structural diff between an observed and a declared snapshot.
//!
//! The declared snapshot is the source of truth: `up` moves storage toward
//! it and `down` undoes `up`. Each detected change contributes a group of up
//! commands and the group of commands that reverses it; `down` is the
//! reversed sequence of those inverse groups.

mod fields;
mod indexes;
mod rename;
mod summary;

pub use fields::flatten_fields;
pub use rename::{RenameCandidate, confidence, infer_renames};
pub use summary::{
    ChangeCounts, CollectionChanges, FieldChanges, FieldModification, FieldRename, IndexChanges, SafetyTally,
    summarize,
};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{CommandOp, MigrationCommand, SafetyLevel};
use crate::snapshot::{CollectionStructure, Snapshot};

/// How to resolve a removed field that matches several added fields equally well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenameTieBreak {
    /// Pick the lexicographically smallest added path.
    #[default]
    Lexicographic,
    /// Treat the fields as a plain removal and addition.
    Refuse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffOptions {
    /// A rename is accepted only when confidence is strictly greater than this
    pub rename_threshold: f64,
    /// Maximum number of path segments produced when flattening nested fields
    pub max_depth: usize,
    /// Field names excluded from comparison at any depth
    pub managed_fields: Vec<String>,
    pub rename_ties: RenameTieBreak,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            rename_threshold: 0.7,
            max_depth: 5,
            managed_fields: vec!["_id".to_string(), "__v".to_string()],
            rename_ties: RenameTieBreak::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub up: Vec<MigrationCommand>,
    pub down: Vec<MigrationCommand>,
    pub warnings: Vec<String>,
    pub metadata: ChangeCounts,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !self.up.is_empty() || !self.down.is_empty()
    }

    /// Up commands that are left out of the transactional batch.
    pub fn manual_commands(&self) -> impl Iterator<Item = &MigrationCommand> {
        self.up.iter().filter(|c| c.is_manual())
    }
}

/// Diff with default options.
pub fn diff(observed: &Snapshot, declared: &Snapshot) -> DiffResult {
    diff_with(observed, declared, &DiffOptions::default())
}

pub fn diff_with(observed: &Snapshot, declared: &Snapshot, options: &DiffOptions) -> DiffResult {
    let mut plan = Plan::new(options, Utc::now());

    let names: BTreeSet<&String> = observed.collections.keys().chain(declared.collections.keys()).collect();
    for name in names {
        match (observed.collections.get(name), declared.collections.get(name)) {
            (None, Some(wanted)) => plan.add_collection(name, wanted),
            (Some(existing), None) => plan.remove_collection(name, existing),
            (Some(existing), Some(wanted)) => plan.modify_collection(name, existing, wanted),
            (None, None) => {}
        }
    }

    plan.finish()
}

/// Accumulates change groups, warnings and metadata while diffing.
pub(crate) struct Plan<'o> {
    pub(crate) options: &'o DiffOptions,
    pub(crate) now: DateTime<Utc>,
    groups: Vec<(Vec<MigrationCommand>, Vec<MigrationCommand>)>,
    pub(crate) warnings: Vec<String>,
    pub(crate) metadata: ChangeCounts,
}

impl<'o> Plan<'o> {
    fn new(options: &'o DiffOptions, now: DateTime<Utc>) -> Self {
        Self {
            options,
            now,
            groups: Vec::new(),
            warnings: Vec::new(),
            metadata: ChangeCounts::default(),
        }
    }

    /// Record a change and the commands that reverse it.
    pub(crate) fn push(&mut self, up: Vec<MigrationCommand>, down: Vec<MigrationCommand>) {
        self.groups.push((up, down));
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn add_collection(&mut self, name: &str, wanted: &CollectionStructure) {
        let mut up = vec![MigrationCommand::new(
            CommandOp::CreateCollection {
                collection: name.to_string(),
            },
            format!("Create collection {name}"),
            SafetyLevel::Safe,
        )];
        up.extend(indexes::create_all(name, &wanted.indexes));
        if let Some(validator) = &wanted.validator {
            up.push(MigrationCommand::new(
                CommandOp::ModifyValidator {
                    collection: name.to_string(),
                    validator: Some(validator.clone()),
                },
                format!("Apply validator to {name}"),
                SafetyLevel::Warning,
            ));
        }
        let down = vec![drop_collection(name)];
        self.push(up, down);
        self.metadata.collections.added.push(name.to_string());
    }

    fn remove_collection(&mut self, name: &str, existing: &CollectionStructure) {
        self.warn(format!(
            "Collection {name} exists in storage but is not declared; dropping it deletes all of its documents"
        ));
        let mut down = vec![MigrationCommand::new(
            CommandOp::CreateCollection {
                collection: name.to_string(),
            },
            format!("Recreate collection {name}"),
            SafetyLevel::Safe,
        )];
        down.extend(indexes::create_all(name, &existing.indexes));
        if let Some(validator) = &existing.validator {
            down.push(MigrationCommand::new(
                CommandOp::ModifyValidator {
                    collection: name.to_string(),
                    validator: Some(validator.clone()),
                },
                format!("Restore validator on {name}"),
                SafetyLevel::Warning,
            ));
        }
        self.push(vec![drop_collection(name)], down);
        self.metadata.collections.removed.push(name.to_string());
    }

    fn modify_collection(&mut self, name: &str, existing: &CollectionStructure, wanted: &CollectionStructure) {
        let before = self.groups.len();
        let modified_fields = self.metadata.fields.modified.len();

        if existing.is_empty || wanted.is_empty {
            log::debug!("skipping field diff for empty collection {name}");
        } else {
            fields::diff_fields(self, name, existing, wanted);
        }
        indexes::diff_indexes(self, name, &existing.indexes, &wanted.indexes);
        self.diff_validator(name, existing, wanted);

        if self.groups.len() > before || self.metadata.fields.modified.len() > modified_fields {
            self.metadata.collections.modified.push(name.to_string());
        }
    }

    fn diff_validator(&mut self, name: &str, existing: &CollectionStructure, wanted: &CollectionStructure) {
        if existing.validator == wanted.validator {
            return;
        }
        let up = MigrationCommand::new(
            CommandOp::ModifyValidator {
                collection: name.to_string(),
                validator: wanted.validator.clone(),
            },
            format!("Update validator on {name}"),
            SafetyLevel::Warning,
        );
        let down = MigrationCommand::new(
            CommandOp::ModifyValidator {
                collection: name.to_string(),
                validator: existing.validator.clone(),
            },
            format!("Restore previous validator on {name}"),
            SafetyLevel::Warning,
        );
        self.push(vec![up], vec![down]);
    }

    fn finish(self) -> DiffResult {
        let mut up = Vec::new();
        let mut down = Vec::new();
        for (group_up, _) in &self.groups {
            up.extend(group_up.iter().cloned());
        }
        for (_, group_down) in self.groups.into_iter().rev() {
            down.extend(group_down);
        }
        DiffResult {
            up,
            down,
            warnings: self.warnings,
            metadata: self.metadata,
        }
    }
}

fn drop_collection(name: &str) -> MigrationCommand {
    MigrationCommand::new(
        CommandOp::DropCollection {
            collection: name.to_string(),
        },
        format!("Drop collection {name}"),
        SafetyLevel::Dangerous,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FieldDefinition, IndexDefinition, IndexDirection, TypeTag};
    use serde_json::json;

    fn users(fields: &[(&str, FieldDefinition)]) -> Snapshot {
        let mut collection = CollectionStructure::new();
        for (name, def) in fields {
            collection = collection.field(*name, def.clone());
        }
        Snapshot::new().with_collection("users", collection)
    }

    #[test]
    fn test_identical_snapshots_produce_nothing() {
        let snapshot = users(&[("name", FieldDefinition::new(TypeTag::String))]);
        let result = diff(&snapshot, &snapshot);
        assert!(!result.has_changes());
        assert!(result.warnings.is_empty());
        assert!(result.metadata.is_empty());
    }

    #[test]
    fn test_new_collection_creates_collection_and_indexes() {
        let declared = Snapshot::new().with_collection(
            "orders",
            CollectionStructure::new()
                .field("total", FieldDefinition::new(TypeTag::Number))
                .index(IndexDefinition::on("total", IndexDirection::Descending)),
        );
        let result = diff(&Snapshot::new(), &declared);
        assert_eq!(result.up.len(), 2);
        assert!(matches!(result.up[0].command, CommandOp::CreateCollection { .. }));
        assert!(matches!(result.up[1].command, CommandOp::CreateIndex { .. }));
        assert!(result.up.iter().all(|c| c.safety_level == SafetyLevel::Safe));
        assert_eq!(result.down.len(), 1);
        assert_eq!(result.down[0].safety_level, SafetyLevel::Dangerous);
        assert!(result.down[0].is_manual());
        assert_eq!(result.metadata.collections.added, vec!["orders".to_string()]);
    }

    #[test]
    fn test_undeclared_collection_is_dropped_manually_with_warning() {
        let observed = Snapshot::new().with_collection(
            "legacy",
            CollectionStructure::new().index(IndexDefinition::on("code", IndexDirection::Ascending)),
        );
        let result = diff(&observed, &Snapshot::new());
        assert_eq!(result.up.len(), 1);
        assert_eq!(result.up[0].safety_level, SafetyLevel::Dangerous);
        assert!(result.up[0].is_manual());
        assert_eq!(result.down.len(), 2);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_empty_collection_skips_fields_but_not_indexes() {
        let observed = Snapshot::new().with_collection("users", CollectionStructure::new().empty());
        let declared = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new()
                .field("email", FieldDefinition::new(TypeTag::String))
                .index(IndexDefinition::on("email", IndexDirection::Ascending)),
        );
        let result = diff(&observed, &declared);
        assert_eq!(result.up.len(), 1);
        assert!(matches!(result.up[0].command, CommandOp::CreateIndex { .. }));
        assert!(result.metadata.fields.added.is_empty());
    }

    #[test]
    fn test_validator_change_emits_coll_mod_both_ways() {
        let observed = Snapshot::new().with_collection("users", CollectionStructure::new());
        let declared = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new().validator(json!({"$jsonSchema": {"required": ["email"]}})),
        );
        let result = diff(&observed, &declared);
        assert_eq!(result.up.len(), 1);
        assert_eq!(
            result.down[0].command,
            CommandOp::ModifyValidator {
                collection: "users".into(),
                validator: None
            }
        );
        assert_eq!(result.metadata.collections.modified, vec!["users".to_string()]);
    }

    #[test]
    fn test_down_reverses_group_order() {
        let observed = users(&[("name", FieldDefinition::new(TypeTag::String))]);
        let declared = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new()
                .field("name", FieldDefinition::new(TypeTag::String))
                .field("age", FieldDefinition::new(TypeTag::Number).nullable(true))
                .index(IndexDefinition::on("name", IndexDirection::Ascending)),
        );
        let result = diff(&observed, &declared);
        assert_eq!(result.up.len(), 2);
        assert!(matches!(result.up[0].command, CommandOp::SetField { .. }));
        assert!(matches!(result.up[1].command, CommandOp::CreateIndex { .. }));
        assert!(matches!(result.down[0].command, CommandOp::DropIndex { .. }));
        assert!(matches!(result.down[1].command, CommandOp::UnsetField { .. }));
    }
}
