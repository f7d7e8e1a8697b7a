use std::collections::BTreeMap;
use std::ops::Deref;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{FieldDefinition, IndexDefinition, Snapshot, TypeTag};
use crate::errors::DriftError;

/// A snapshot whose collections, fields, indexes and enum values are in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSnapshot(Snapshot);

impl NormalizedSnapshot {
    pub fn as_snapshot(&self) -> &Snapshot {
        &self.0
    }

    pub fn into_inner(self) -> Snapshot {
        self.0
    }
}

impl Deref for NormalizedSnapshot {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.0
    }
}

/// Put a snapshot into canonical order and check its structural invariants.
///
/// Collections and fields are keyed by `BTreeMap` and therefore already
/// sorted; this pass folds dotted field paths into nested fields, sorts
/// indexes by signature and enum values, and rejects empty names and
/// keyless indexes.
pub fn normalize(mut snapshot: Snapshot) -> Result<NormalizedSnapshot, DriftError> {
    for (name, collection) in snapshot.collections.iter_mut() {
        if name.trim().is_empty() {
            return Err(DriftError::malformed("collections", "collection name is empty"));
        }
        normalize_fields(name, &mut collection.fields)?;

        for index in &collection.indexes {
            if index.fields.is_empty() {
                return Err(DriftError::malformed(
                    format!("{name}.indexes"),
                    "index declares no fields",
                ));
            }
            if index.fields.iter().any(|f| f.name.trim().is_empty()) {
                return Err(DriftError::malformed(
                    format!("{name}.indexes"),
                    "index field name is empty",
                ));
            }
        }

        let mut keyed: Vec<(String, IndexDefinition)> = collection
            .indexes
            .drain(..)
            .map(|index| (index.signature(), index))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        collection.indexes = keyed.into_iter().map(|(_, index)| index).collect();
    }
    Ok(NormalizedSnapshot(snapshot))
}

fn normalize_fields(scope: &str, fields: &mut BTreeMap<String, FieldDefinition>) -> Result<(), DriftError> {
    fold_dotted_paths(scope, fields)?;
    for (name, field) in fields.iter_mut() {
        if name.trim().is_empty() {
            return Err(DriftError::malformed(scope, "field name is empty"));
        }
        if let Some(values) = field.enum_values.as_mut() {
            values.sort();
            values.dedup();
        }
        if let Some(nested) = field.nested_fields.as_mut() {
            normalize_fields(&format!("{scope}.{name}"), nested)?;
        }
    }
    Ok(())
}

/// Move flattened `parent.child` keys into the parent's `nestedFields`, so a
/// sampled snapshot and a declared one with nesting hash alike. A parent that
/// is not listed becomes an `Object` field.
fn fold_dotted_paths(scope: &str, fields: &mut BTreeMap<String, FieldDefinition>) -> Result<(), DriftError> {
    let dotted: Vec<String> = fields.keys().filter(|name| name.contains('.')).cloned().collect();
    for path in dotted {
        let (Some(definition), Some((parent, child))) = (fields.remove(&path), path.split_once('.')) else {
            continue;
        };
        if parent.trim().is_empty() || child.split('.').any(|segment| segment.trim().is_empty()) {
            return Err(DriftError::malformed(
                format!("{scope}.{path}"),
                "field path has an empty segment",
            ));
        }

        let holder = fields
            .entry(parent.to_string())
            .or_insert_with(|| FieldDefinition::new(TypeTag::Object));
        if !matches!(holder.field_type, TypeTag::Object | TypeTag::Array | TypeTag::Map | TypeTag::Mixed) {
            return Err(DriftError::malformed(
                format!("{scope}.{path}"),
                format!("parent `{parent}` is {} and cannot hold fields", holder.field_type),
            ));
        }

        let nested = holder.nested_fields.get_or_insert_with(BTreeMap::new);
        match nested.get(child) {
            Some(existing) if *existing != definition => {
                return Err(DriftError::malformed(
                    format!("{scope}.{path}"),
                    "declared both flattened and nested with different definitions",
                ));
            }
            Some(_) => {}
            None => {
                nested.insert(child.to_string(), definition);
            }
        }
    }
    Ok(())
}

/// SHA-256 hex digest of the canonical `{version, collections}` serialization.
pub fn hash(normalized: &NormalizedSnapshot) -> String {
    let content = serde_json::json!({
        "version": normalized.version,
        "collections": serde_json::to_value(&normalized.collections).unwrap_or(Value::Null),
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the content hash and compare it to the stored one.
pub fn verify(snapshot: &Snapshot) -> Result<bool, DriftError> {
    if snapshot.hash.is_empty() {
        return Ok(false);
    }
    let normalized = normalize(snapshot.clone())?;
    Ok(hash(&normalized) == snapshot.hash)
}

/// Normalize and stamp the content hash.
pub fn seal(snapshot: Snapshot) -> Result<Snapshot, DriftError> {
    let normalized = normalize(snapshot)?;
    let digest = hash(&normalized);
    let mut sealed = normalized.into_inner();
    sealed.hash = digest;
    Ok(sealed)
}

/// Compact JSON with object keys written in sorted order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CollectionStructure, IndexDirection};
    use serde_json::json;

    fn users() -> Snapshot {
        Snapshot::new().with_collection(
            "users",
            CollectionStructure::new()
                .field("email", FieldDefinition::new(TypeTag::String).required(true))
                .field(
                    "role",
                    FieldDefinition::new(TypeTag::String).with_enum(["user", "admin", "user"]),
                )
                .index(IndexDefinition::on("email", IndexDirection::Ascending).unique())
                .index(IndexDefinition::on("createdAt", IndexDirection::Descending)),
        )
    }

    #[test]
    fn test_normalize_sorts_and_dedups_enum_values() {
        let normalized = normalize(users()).unwrap();
        let role = &normalized.collections["users"].fields["role"];
        assert_eq!(role.enum_values.as_deref(), Some(&["admin".to_string(), "user".to_string()][..]));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(users()).unwrap();
        let twice = normalize(once.clone().into_inner()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_index_order_does_not_affect_hash() {
        let mut reordered = users();
        reordered.collections.get_mut("users").unwrap().indexes.reverse();
        assert_eq!(hash(&normalize(users()).unwrap()), hash(&normalize(reordered).unwrap()));
    }

    #[test]
    fn test_hash_ignores_created_at_and_changes_with_content() {
        let a = users();
        let mut b = users();
        b.created_at = a.created_at - chrono::Duration::days(3);
        assert_eq!(hash(&normalize(a.clone()).unwrap()), hash(&normalize(b).unwrap()));

        let mut c = users();
        c.collections
            .get_mut("users")
            .unwrap()
            .fields
            .get_mut("email")
            .unwrap()
            .nullable = true;
        assert_ne!(hash(&normalize(a).unwrap()), hash(&normalize(c).unwrap()));
    }

    #[test]
    fn test_seal_then_verify() {
        let sealed = seal(users()).unwrap();
        assert_eq!(sealed.hash.len(), 64);
        assert!(verify(&sealed).unwrap());

        let mut tampered = sealed.clone();
        tampered.collections.remove("users");
        assert!(!verify(&tampered).unwrap());
    }

    #[test]
    fn test_empty_hash_never_verifies() {
        assert!(!verify(&users()).unwrap());
    }

    #[test]
    fn test_dotted_paths_hash_like_nested_fields() {
        let flattened = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new()
                .field("address", FieldDefinition::new(TypeTag::Object))
                .field("address.city", FieldDefinition::new(TypeTag::String))
                .field("address.geo.lat", FieldDefinition::new(TypeTag::Number)),
        );
        let nested = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new().field(
                "address",
                FieldDefinition::new(TypeTag::Object)
                    .nested("city", FieldDefinition::new(TypeTag::String))
                    .nested(
                        "geo",
                        FieldDefinition::new(TypeTag::Object).nested("lat", FieldDefinition::new(TypeTag::Number)),
                    ),
            ),
        );
        let folded = normalize(flattened).unwrap();
        assert_eq!(folded.collections, normalize(nested.clone()).unwrap().collections);
        assert_eq!(hash(&folded), hash(&normalize(nested).unwrap()));
    }

    #[test]
    fn test_conflicting_dotted_paths_are_malformed() {
        let scalar_parent = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new()
                .field("address", FieldDefinition::new(TypeTag::String))
                .field("address.city", FieldDefinition::new(TypeTag::String)),
        );
        assert!(matches!(normalize(scalar_parent), Err(DriftError::MalformedSnapshot { .. })));

        let both_shapes = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new()
                .field(
                    "address",
                    FieldDefinition::new(TypeTag::Object).nested("city", FieldDefinition::new(TypeTag::String)),
                )
                .field("address.city", FieldDefinition::new(TypeTag::Number)),
        );
        assert!(matches!(normalize(both_shapes), Err(DriftError::MalformedSnapshot { .. })));

        let empty_segment = Snapshot::new().with_collection(
            "users",
            CollectionStructure::new().field("address.", FieldDefinition::new(TypeTag::String)),
        );
        assert!(matches!(normalize(empty_segment), Err(DriftError::MalformedSnapshot { .. })));
    }

    #[test]
    fn test_rejects_keyless_indexes() {
        let mut keyless = IndexDefinition::on("email", IndexDirection::Ascending);
        keyless.fields.clear();
        let snapshot = Snapshot::new().with_collection("users", CollectionStructure::new().index(keyless));
        assert!(matches!(normalize(snapshot), Err(DriftError::MalformedSnapshot { .. })));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [ {"y": true, "x": null} ]}, "a": "s"});
        assert_eq!(canonical_json(&value), r#"{"a":"s","b":{"a":[{"x":null,"y":true}],"z":1}}"#);
    }
}
