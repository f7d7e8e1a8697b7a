//! Snapshot types describing the structure of a document store.
//!
//! A snapshot is produced either from declared models or by sampling live
//! documents. This module provides:
//! - The snapshot data model (collections, fields, indexes)
//! - Normalization and content hashing (`normalize`)
//! - Loading snapshots from disk (`loader`)

mod loader;
mod normalize;

pub use loader::{load_snapshot, load_snapshots, write_snapshot};
pub use normalize::{NormalizedSnapshot, canonical_json, hash, normalize, seal, verify};

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::DriftError;

/// Snapshot format version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Point-in-time structural description of a set of collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Content digest; empty until the snapshot is sealed
    #[serde(default)]
    pub hash: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    pub collections: BTreeMap<String, CollectionStructure>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            hash: String::new(),
            created_at: Utc::now(),
            collections: BTreeMap::new(),
        }
    }

    pub fn with_collection(mut self, name: impl Into<String>, collection: CollectionStructure) -> Self {
        self.collections.insert(name.into(), collection);
        self
    }

    /// Parse a snapshot from JSON text.
    ///
    /// Missing structural keys are reported as [`DriftError::MalformedSnapshot`].
    pub fn from_json(text: &str) -> Result<Self, DriftError> {
        serde_json::from_str(text).map_err(|err| DriftError::malformed("snapshot", err.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, DriftError> {
        serde_json::from_value(value).map_err(|err| DriftError::malformed("snapshot", err.to_string()))
    }
}

/// Structure of a single collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStructure {
    pub fields: BTreeMap<String, FieldDefinition>,

    pub indexes: Vec<IndexDefinition>,

    /// Set by samplers when no documents were found; skips field diffing
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_empty: bool,

    /// Schema-constraint document enforced by the store, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Value>,
}

impl CollectionStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.insert(name.into(), definition);
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn empty(mut self) -> Self {
        self.is_empty = true;
        self
    }

    pub fn validator(mut self, validator: Value) -> Self {
        self.validator = Some(validator);
        self
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Declared or observed definition of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: TypeTag,

    #[serde(default)]
    pub nullable: bool,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_fields: Option<BTreeMap<String, FieldDefinition>>,
}

impl FieldDefinition {
    pub fn new(field_type: TypeTag) -> Self {
        Self {
            field_type,
            nullable: false,
            required: false,
            default: None,
            enum_values: None,
            nested_fields: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn nested(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.nested_fields
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), definition);
        self
    }

    /// Copy of this definition without its nested children.
    pub fn shallow(&self) -> Self {
        Self {
            nested_fields: None,
            ..self.clone()
        }
    }
}

/// Storage-level type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Array,
    Object,
    Map,
    Buffer,
    Decimal128,
    Mixed,
}

impl TypeTag {
    /// Type-appropriate zero value, or `None` when the type has no sensible zero.
    pub fn zero_value(&self, now: DateTime<Utc>) -> Option<Value> {
        match self {
            TypeTag::String => Some(Value::String(String::new())),
            TypeTag::Number | TypeTag::Decimal128 => Some(serde_json::json!(0)),
            TypeTag::Boolean => Some(Value::Bool(false)),
            TypeTag::Date => Some(Value::String(now.to_rfc3339())),
            TypeTag::Array => Some(serde_json::json!([])),
            TypeTag::Object | TypeTag::Map => Some(serde_json::json!({})),
            TypeTag::ObjectId | TypeTag::Buffer | TypeTag::Mixed => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::String => "String",
            TypeTag::Number => "Number",
            TypeTag::Boolean => "Boolean",
            TypeTag::Date => "Date",
            TypeTag::ObjectId => "ObjectId",
            TypeTag::Array => "Array",
            TypeTag::Object => "Object",
            TypeTag::Map => "Map",
            TypeTag::Buffer => "Buffer",
            TypeTag::Decimal128 => "Decimal128",
            TypeTag::Mixed => "Mixed",
        };
        f.write_str(name)
    }
}

/// Index definition as declared or observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub fields: Vec<IndexField>,

    #[serde(default)]
    pub unique: bool,

    #[serde(default)]
    pub sparse: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_filter_expression: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IndexDefinition {
    /// Start a single-field index definition.
    pub fn on(field: impl Into<String>, direction: IndexDirection) -> Self {
        Self {
            fields: vec![IndexField {
                name: field.into(),
                direction,
            }],
            unique: false,
            sparse: false,
            partial_filter_expression: None,
            ttl_seconds: None,
            collation: None,
            name: None,
        }
    }

    /// Append another key to a compound index.
    pub fn and(mut self, field: impl Into<String>, direction: IndexDirection) -> Self {
        self.fields.push(IndexField {
            name: field.into(),
            direction,
        });
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl_seconds = Some(seconds);
        self
    }

    pub fn partial(mut self, filter: Value) -> Self {
        self.partial_filter_expression = Some(filter);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_ttl(&self) -> bool {
        self.ttl_seconds.is_some()
    }

    pub fn is_text(&self) -> bool {
        self.fields.iter().any(|f| f.direction == IndexDirection::Text)
    }

    /// Canonical signature used for set comparison.
    ///
    /// The name is excluded so that an unnamed declared index matches the
    /// same observed index carrying a store-assigned name.
    pub fn signature(&self) -> String {
        let unnamed = Self {
            name: None,
            ..self.clone()
        };
        match serde_json::to_value(&unnamed) {
            Ok(value) => canonical_json(&value),
            Err(_) => String::new(),
        }
    }

    /// Name derived from keys and options: `email_1_age_-1`, `body_text`, `phone_1_unique`.
    pub fn derived_name(&self) -> String {
        let mut parts = Vec::with_capacity(self.fields.len() * 2);
        for field in &self.fields {
            parts.push(field.name.clone());
            if field.direction != IndexDirection::Text {
                parts.push(field.direction.suffix().to_string());
            }
        }
        let mut name = parts.join("_");
        if self.is_ttl() {
            name.push_str("_ttl");
        } else if self.is_text() {
            name.push_str("_text");
        } else if self.unique {
            name.push_str("_unique");
        }
        name
    }

    /// Explicit name if present, otherwise the derived one.
    pub fn resolved_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.derived_name())
    }

    /// Key document in declaration order, e.g. `{"email":1,"createdAt":-1}`.
    pub fn key_spec(&self) -> String {
        let keys = self
            .fields
            .iter()
            .map(|field| format!("{}:{}", Value::String(field.name.clone()), field.direction.to_value()))
            .collect::<Vec<_>>();
        format!("{{{}}}", keys.join(","))
    }
}

/// One key of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub direction: IndexDirection,
}

/// Key direction or special index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexDirection {
    Ascending,
    Descending,
    Text,
    Hashed,
    Geo2dSphere,
}

impl IndexDirection {
    pub fn to_value(self) -> Value {
        match self {
            IndexDirection::Ascending => serde_json::json!(1),
            IndexDirection::Descending => serde_json::json!(-1),
            IndexDirection::Text => Value::String("text".into()),
            IndexDirection::Hashed => Value::String("hashed".into()),
            IndexDirection::Geo2dSphere => Value::String("2dsphere".into()),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            IndexDirection::Ascending => "1",
            IndexDirection::Descending => "-1",
            IndexDirection::Text => "text",
            IndexDirection::Hashed => "hashed",
            IndexDirection::Geo2dSphere => "2dsphere",
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) if v > 0.0 => Some(IndexDirection::Ascending),
                Some(v) if v < 0.0 => Some(IndexDirection::Descending),
                _ => None,
            },
            Value::String(s) => match s.as_str() {
                "text" => Some(IndexDirection::Text),
                "hashed" => Some(IndexDirection::Hashed),
                "2dsphere" => Some(IndexDirection::Geo2dSphere),
                "asc" | "ascending" => Some(IndexDirection::Ascending),
                "desc" | "descending" => Some(IndexDirection::Descending),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Serialize for IndexDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IndexDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        IndexDirection::from_value(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid index direction {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_fields_key_is_malformed() {
        let err = Snapshot::from_value(json!({
            "collections": { "users": { "indexes": [] } }
        }))
        .unwrap_err();
        assert!(matches!(err, DriftError::MalformedSnapshot { .. }));
        assert!(err.to_string().contains("fields"));
    }

    #[test]
    fn test_missing_collections_is_malformed() {
        let err = Snapshot::from_json(r#"{"version": 1}"#).unwrap_err();
        assert!(matches!(err, DriftError::MalformedSnapshot { .. }));
    }

    #[test]
    fn test_unknown_type_tag_is_malformed() {
        let err = Snapshot::from_value(json!({
            "collections": {
                "users": { "fields": { "name": { "type": "Strng" } }, "indexes": [] }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, DriftError::MalformedSnapshot { .. }));
    }

    #[test]
    fn test_field_flags_default_to_false() {
        let snapshot = Snapshot::from_value(json!({
            "collections": {
                "users": { "fields": { "phone": { "type": "String", "required": true } }, "indexes": [] }
            }
        }))
        .unwrap();
        let phone = &snapshot.collections["users"].fields["phone"];
        assert!(!phone.nullable);
        assert!(phone.required);
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn test_index_direction_round_trips_through_json() {
        let index = IndexDefinition::on("body", IndexDirection::Text).and("score", IndexDirection::Descending);
        let value = serde_json::to_value(&index).unwrap();
        assert_eq!(value["fields"][0]["direction"], json!("text"));
        assert_eq!(value["fields"][1]["direction"], json!(-1));
        let parsed: IndexDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_derived_index_names() {
        assert_eq!(
            IndexDefinition::on("phone", IndexDirection::Ascending).unique().sparse().derived_name(),
            "phone_1_unique"
        );
        assert_eq!(
            IndexDefinition::on("email", IndexDirection::Ascending)
                .and("createdAt", IndexDirection::Descending)
                .derived_name(),
            "email_1_createdAt_-1"
        );
        assert_eq!(
            IndexDefinition::on("expiresAt", IndexDirection::Ascending).ttl(3600).derived_name(),
            "expiresAt_1_ttl"
        );
        assert_eq!(IndexDefinition::on("body", IndexDirection::Text).derived_name(), "body_text");
    }

    #[test]
    fn test_signature_ignores_name_but_not_options() {
        let plain = IndexDefinition::on("email", IndexDirection::Ascending);
        let named = plain.clone().named("email_1");
        assert_eq!(plain.signature(), named.signature());
        assert_ne!(plain.signature(), plain.clone().unique().signature());
        assert_ne!(
            plain.signature(),
            plain.clone().partial(json!({ "active": true })).signature()
        );
    }

    #[test]
    fn test_key_spec_keeps_declaration_order() {
        let index = IndexDefinition::on("zeta", IndexDirection::Ascending).and("alpha", IndexDirection::Descending);
        assert_eq!(index.key_spec(), r#"{"zeta":1,"alpha":-1}"#);
    }

    #[test]
    fn test_zero_values() {
        let now = Utc::now();
        assert_eq!(TypeTag::String.zero_value(now), Some(json!("")));
        assert_eq!(TypeTag::Number.zero_value(now), Some(json!(0)));
        assert_eq!(TypeTag::Boolean.zero_value(now), Some(json!(false)));
        assert_eq!(TypeTag::Date.zero_value(now), Some(json!(now.to_rfc3339())));
        assert_eq!(TypeTag::Array.zero_value(now), Some(json!([])));
        assert_eq!(TypeTag::Object.zero_value(now), Some(json!({})));
        assert_eq!(TypeTag::ObjectId.zero_value(now), None);
    }
}
