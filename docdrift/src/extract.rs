//! Producers of snapshots.
//!
//! The diff engine only sees [`Snapshot`] values. Declared snapshots usually
//! come from a [`ModelRegistry`] filled in by application code; observed
//! snapshots come from whatever samples the live store, often persisted as a
//! [`SnapshotFile`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::DriftError;
use crate::snapshot::{CollectionStructure, FieldDefinition, IndexDefinition, Snapshot, load_snapshot, seal};

/// Anything that can produce a snapshot.
pub trait SnapshotSource {
    fn snapshot(&self) -> Result<Snapshot, DriftError>;
}

impl SnapshotSource for Snapshot {
    fn snapshot(&self) -> Result<Snapshot, DriftError> {
        seal(self.clone())
    }
}

/// A snapshot JSON file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSource for SnapshotFile {
    fn snapshot(&self) -> Result<Snapshot, DriftError> {
        seal(load_snapshot(&self.path)?)
    }
}

/// Declared structure of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub collection: String,
    pub fields: BTreeMap<String, FieldDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub validator: Option<Value>,
}

impl ModelDefinition {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: BTreeMap::new(),
            indexes: Vec::new(),
            validator: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.insert(name.into(), definition);
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn validator(mut self, validator: Value) -> Self {
        self.validator = Some(validator);
        self
    }

    fn structure(&self) -> CollectionStructure {
        CollectionStructure {
            fields: self.fields.clone(),
            indexes: self.indexes.clone(),
            is_empty: false,
            validator: self.validator.clone(),
        }
    }
}

/// Explicit set of declared models. Each registry is independent.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDefinition>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. A collection can be registered once.
    pub fn register(&mut self, model: ModelDefinition) -> Result<(), DriftError> {
        if model.collection.trim().is_empty() {
            return Err(DriftError::malformed("models", "model has an empty collection name"));
        }
        if self.models.contains_key(&model.collection) {
            return Err(DriftError::malformed(
                model.collection.clone(),
                "collection is registered by more than one model",
            ));
        }
        self.models.insert(model.collection.clone(), model);
        Ok(())
    }

    pub fn with(mut self, model: ModelDefinition) -> Result<Self, DriftError> {
        self.register(model)?;
        Ok(self)
    }

    pub fn get(&self, collection: &str) -> Option<&ModelDefinition> {
        self.models.get(collection)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl SnapshotSource for ModelRegistry {
    fn snapshot(&self) -> Result<Snapshot, DriftError> {
        let snapshot = self
            .models
            .values()
            .fold(Snapshot::new(), |snapshot, model| {
                snapshot.with_collection(model.collection.clone(), model.structure())
            });
        seal(snapshot)
    }
}
