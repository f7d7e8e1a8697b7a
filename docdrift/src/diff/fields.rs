use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use super::rename::infer_renames;
use super::{FieldModification, FieldRename, Plan};
use crate::command::{CommandOp, MigrationCommand, SafetyLevel};
use crate::snapshot::{CollectionStructure, FieldDefinition};

/// Flatten nested field definitions into dotted paths.
///
/// Paths deeper than `max_depth` segments are not produced, and any field
/// whose name is in `managed` is skipped together with its children.
pub fn flatten_fields(
    fields: &BTreeMap<String, FieldDefinition>,
    max_depth: usize,
    managed: &[String],
) -> BTreeMap<String, FieldDefinition> {
    let mut flat = BTreeMap::new();
    flatten_into(fields, "", 1, max_depth, managed, &mut flat);
    flat
}

fn flatten_into(
    fields: &BTreeMap<String, FieldDefinition>,
    prefix: &str,
    depth: usize,
    max_depth: usize,
    managed: &[String],
    out: &mut BTreeMap<String, FieldDefinition>,
) {
    if depth > max_depth {
        return;
    }
    for (name, definition) in fields {
        if managed.iter().any(|m| m == name) {
            continue;
        }
        // an unfolded `a.b` key sits as deep as its nested equivalent
        let level = depth + name.matches('.').count();
        if level > max_depth {
            continue;
        }
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        if let Some(nested) = &definition.nested_fields {
            flatten_into(nested, &path, level + 1, max_depth, managed, out);
        }
        out.insert(path, definition.shallow());
    }
}

/// True when some proper ancestor of `path` is in `set`.
fn has_ancestor_in(path: &str, set: &BTreeSet<&str>) -> bool {
    path.match_indices('.').any(|(i, _)| set.contains(&path[..i]))
}

pub(crate) fn diff_fields(plan: &mut Plan<'_>, collection: &str, existing: &CollectionStructure, wanted: &CollectionStructure) {
    let options = plan.options;
    let observed = flatten_fields(&existing.fields, options.max_depth, &options.managed_fields);
    let declared = flatten_fields(&wanted.fields, options.max_depth, &options.managed_fields);

    let added_all: BTreeSet<&str> = declared
        .keys()
        .filter(|p| !observed.contains_key(*p))
        .map(String::as_str)
        .collect();
    let removed_all: BTreeSet<&str> = observed
        .keys()
        .filter(|p| !declared.contains_key(*p))
        .map(String::as_str)
        .collect();

    // Children of an added or removed parent ride along with the parent.
    let added: Vec<(&str, &FieldDefinition)> = added_all
        .iter()
        .filter(|p| !has_ancestor_in(p, &added_all))
        .map(|p| (*p, &declared[*p]))
        .collect();
    let removed: Vec<(&str, &FieldDefinition)> = removed_all
        .iter()
        .filter(|p| !has_ancestor_in(p, &removed_all))
        .map(|p| (*p, &observed[*p]))
        .collect();

    let (renames, rename_warnings) = infer_renames(&removed, &added, options.rename_threshold, options.rename_ties);
    for warning in rename_warnings {
        plan.warn(format!("{collection}: {warning}"));
    }
    let renamed_from: BTreeSet<&str> = renames.iter().map(|r| r.from.as_str()).collect();
    let renamed_to: BTreeSet<&str> = renames.iter().map(|r| r.to.as_str()).collect();

    for rename in &renames {
        let metadata = json!({ "confidence": rename.confidence });
        let up = MigrationCommand::new(
            CommandOp::RenameField {
                collection: collection.to_string(),
                from: rename.from.clone(),
                to: rename.to.clone(),
            },
            format!("Rename {collection}.{} to {}", rename.from, rename.to),
            SafetyLevel::Safe,
        )
        .with_metadata(metadata.clone());
        let down = MigrationCommand::new(
            CommandOp::RenameField {
                collection: collection.to_string(),
                from: rename.to.clone(),
                to: rename.from.clone(),
            },
            format!("Rename {collection}.{} back to {}", rename.to, rename.from),
            SafetyLevel::Safe,
        )
        .with_metadata(metadata);
        plan.warn(format!(
            "Field {collection}.{} looks renamed to {} (confidence {:.2}); review before applying",
            rename.from, rename.to, rename.confidence
        ));
        plan.push(vec![up], vec![down]);
        plan.metadata.fields.renamed.push(FieldRename {
            collection: collection.to_string(),
            from: rename.from.clone(),
            to: rename.to.clone(),
            confidence: rename.confidence,
        });
    }

    for (path, definition) in added.iter().filter(|(p, _)| !renamed_to.contains(p)) {
        let value = initial_value(plan, collection, path, definition);
        let up = MigrationCommand::new(
            CommandOp::SetField {
                collection: collection.to_string(),
                path: path.to_string(),
                value,
            },
            format!("Add field {collection}.{path} to documents missing it"),
            SafetyLevel::Safe,
        );
        let down = MigrationCommand::new(
            CommandOp::UnsetField {
                collection: collection.to_string(),
                path: path.to_string(),
            },
            format!("Remove field {collection}.{path}"),
            SafetyLevel::Warning,
        );
        plan.push(vec![up], vec![down]);
        plan.metadata.fields.added.push(path.to_string());
    }

    for (path, _) in removed.iter().filter(|(p, _)| !renamed_from.contains(p)) {
        plan.warn(format!(
            "Field {collection}.{path} exists in storage but is not declared; its values will be removed"
        ));
        let up = MigrationCommand::new(
            CommandOp::UnsetField {
                collection: collection.to_string(),
                path: path.to_string(),
            },
            format!("Remove undeclared field {collection}.{path}"),
            SafetyLevel::Warning,
        );
        let down = MigrationCommand::new(
            CommandOp::SetField {
                collection: collection.to_string(),
                path: path.to_string(),
                value: Value::Null,
            },
            format!("Restore field {collection}.{path} as null"),
            SafetyLevel::Safe,
        );
        plan.push(vec![up], vec![down]);
        plan.metadata.fields.removed.push(path.to_string());
    }

    for (path, before) in &observed {
        let Some(after) = declared.get(path) else {
            continue;
        };
        let attributes = changed_attributes(before, after);
        if attributes.is_empty() {
            continue;
        }
        if before.field_type != after.field_type {
            plan.warn(format!(
                "Field {collection}.{path} changed type from {} to {}; existing data needs a manual migration",
                before.field_type, after.field_type
            ));
            let up = MigrationCommand::new(
                CommandOp::ReviewTypeChange {
                    collection: collection.to_string(),
                    path: path.clone(),
                    from: before.field_type,
                    to: after.field_type,
                },
                format!("Review type change of {collection}.{path}"),
                SafetyLevel::Warning,
            );
            let down = MigrationCommand::new(
                CommandOp::ReviewTypeChange {
                    collection: collection.to_string(),
                    path: path.clone(),
                    from: after.field_type,
                    to: before.field_type,
                },
                format!("Review reverting type of {collection}.{path}"),
                SafetyLevel::Warning,
            );
            plan.push(vec![up], vec![down]);
        }
        plan.metadata.fields.modified.push(FieldModification {
            collection: collection.to_string(),
            path: path.clone(),
            attributes,
        });
    }
}

/// Value written into documents missing a newly declared field.
fn initial_value(plan: &mut Plan<'_>, collection: &str, path: &str, definition: &FieldDefinition) -> Value {
    if let Some(default) = &definition.default {
        return default.clone();
    }
    if definition.nullable || !definition.required {
        return Value::Null;
    }
    match definition.field_type.zero_value(plan.now) {
        Some(zero) => {
            plan.warn(format!("Generated default {zero} for required field {collection}.{path}"));
            zero
        }
        None => {
            plan.warn(format!(
                "No zero value for {} field {collection}.{path}; documents get null",
                definition.field_type
            ));
            Value::Null
        }
    }
}

fn changed_attributes(before: &FieldDefinition, after: &FieldDefinition) -> Vec<String> {
    let mut changed = Vec::new();
    if before.field_type != after.field_type {
        changed.push("type".to_string());
    }
    if before.nullable != after.nullable {
        changed.push("nullable".to_string());
    }
    if before.required != after.required {
        changed.push("required".to_string());
    }
    if before.default != after.default {
        changed.push("default".to_string());
    }
    if !super::rename::same_enum_set(before, after) {
        changed.push("enum".to_string());
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffOptions, diff, diff_with};
    use crate::snapshot::{Snapshot, TypeTag};

    fn users(collection: CollectionStructure) -> Snapshot {
        Snapshot::new().with_collection("users", collection)
    }

    #[test]
    fn test_flatten_respects_depth_and_managed_fields() {
        let fields = CollectionStructure::new()
            .field("_id", FieldDefinition::new(TypeTag::ObjectId))
            .field(
                "profile",
                FieldDefinition::new(TypeTag::Object)
                    .nested("city", FieldDefinition::new(TypeTag::String))
                    .nested("__v", FieldDefinition::new(TypeTag::Number))
                    .nested(
                        "geo",
                        FieldDefinition::new(TypeTag::Object).nested("lat", FieldDefinition::new(TypeTag::Number)),
                    ),
            )
            .fields;
        let managed = DiffOptions::default().managed_fields;

        let flat = flatten_fields(&fields, 5, &managed);
        let paths: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["profile", "profile.city", "profile.geo", "profile.geo.lat"]);

        let shallow = flatten_fields(&fields, 2, &managed);
        assert!(!shallow.contains_key("profile.geo.lat"));
        assert!(shallow.contains_key("profile.geo"));

        let dotted = CollectionStructure::new()
            .field("profile.geo", FieldDefinition::new(TypeTag::Object))
            .field("profile.geo.lat", FieldDefinition::new(TypeTag::Number))
            .fields;
        let shallow = flatten_fields(&dotted, 2, &managed);
        assert_eq!(shallow.keys().map(String::as_str).collect::<Vec<_>>(), vec!["profile.geo"]);
    }

    #[test]
    fn test_children_of_added_parent_get_no_command() {
        let observed = users(CollectionStructure::new().field("name", FieldDefinition::new(TypeTag::String)));
        let declared = users(
            CollectionStructure::new()
                .field("name", FieldDefinition::new(TypeTag::String))
                .field(
                    "address",
                    FieldDefinition::new(TypeTag::Object)
                        .nested("street", FieldDefinition::new(TypeTag::String))
                        .nested("zip", FieldDefinition::new(TypeTag::Number)),
                ),
        );
        let result = diff(&observed, &declared);
        assert_eq!(result.up.len(), 1);
        assert_eq!(result.metadata.fields.added, vec!["address".to_string()]);
    }

    #[test]
    fn test_managed_fields_are_ignored() {
        let observed = users(
            CollectionStructure::new()
                .field("_id", FieldDefinition::new(TypeTag::ObjectId))
                .field("__v", FieldDefinition::new(TypeTag::Number)),
        );
        let declared = users(CollectionStructure::new());
        assert!(!diff(&observed, &declared).has_changes());
    }

    #[test]
    fn test_removed_field_is_unset_with_null_restore() {
        let observed = users(
            CollectionStructure::new()
                .field("name", FieldDefinition::new(TypeTag::String))
                .field("legacy", FieldDefinition::new(TypeTag::Boolean)),
        );
        let declared = users(CollectionStructure::new().field("name", FieldDefinition::new(TypeTag::String)));
        let result = diff(&observed, &declared);

        assert_eq!(result.up.len(), 1);
        assert_eq!(result.up[0].safety_level, SafetyLevel::Warning);
        assert!(matches!(&result.up[0].command, CommandOp::UnsetField { path, .. } if path == "legacy"));
        assert!(matches!(
            &result.down[0].command,
            CommandOp::SetField { value: Value::Null, .. }
        ));
        assert_eq!(result.down[0].safety_level, SafetyLevel::Safe);
        assert_eq!(result.metadata.fields.removed, vec!["legacy".to_string()]);
        assert!(result.warnings.iter().any(|w| w.contains("users.legacy")));
    }

    #[test]
    fn test_added_field_values() {
        let observed = users(CollectionStructure::new());
        let declared = users(
            CollectionStructure::new()
                .field("tier", FieldDefinition::new(TypeTag::String).with_default(json!("free")))
                .field("nickname", FieldDefinition::new(TypeTag::String))
                .field("owner", FieldDefinition::new(TypeTag::ObjectId).required(true))
                .field("score", FieldDefinition::new(TypeTag::Number).required(true)),
        );
        let result = diff(&observed, &declared);
        let value_of = |wanted: &str| {
            result.up.iter().find_map(|c| match &c.command {
                CommandOp::SetField { path, value, .. } if path == wanted => Some(value.clone()),
                _ => None,
            })
        };
        assert_eq!(value_of("tier"), Some(json!("free")));
        assert_eq!(value_of("nickname"), Some(Value::Null));
        assert_eq!(value_of("owner"), Some(Value::Null));
        assert_eq!(value_of("score"), Some(json!(0)));
        assert!(result.warnings.iter().any(|w| w.contains("No zero value for ObjectId")));
        assert!(result.warnings.iter().any(|w| w.contains("Generated default 0")));
    }

    #[test]
    fn test_type_change_is_manual_review_only() {
        let observed = users(CollectionStructure::new().field("age", FieldDefinition::new(TypeTag::String)));
        let declared = users(CollectionStructure::new().field("age", FieldDefinition::new(TypeTag::Number)));
        let result = diff(&observed, &declared);

        assert_eq!(result.up.len(), 1);
        assert!(result.up[0].is_manual());
        assert!(!result.up[0].is_executable());
        assert_eq!(result.up[0].safety_level, SafetyLevel::Warning);
        assert_eq!(
            result.down[0].command,
            CommandOp::ReviewTypeChange {
                collection: "users".into(),
                path: "age".into(),
                from: TypeTag::Number,
                to: TypeTag::String,
            }
        );
        assert_eq!(result.metadata.fields.modified[0].attributes, vec!["type".to_string()]);
    }

    #[test]
    fn test_attribute_only_changes_are_metadata_only() {
        let observed = users(CollectionStructure::new().field("email", FieldDefinition::new(TypeTag::String)));
        let declared = users(
            CollectionStructure::new().field("email", FieldDefinition::new(TypeTag::String).required(true)),
        );
        let result = diff_with(&observed, &declared, &DiffOptions::default());
        assert!(!result.has_changes());
        assert_eq!(result.metadata.fields.modified.len(), 1);
        assert_eq!(result.metadata.collections.modified, vec!["users".to_string()]);
    }
}
