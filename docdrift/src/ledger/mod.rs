//! Migration ledger: the persisted record of generated and applied migrations.
//!
//! Records live in their own collection, one document per migration, with the
//! filename as document id. That id is what keeps a filename unique.

mod record;

pub use record::MigrationRecord;

use log::{debug, info};
use serde_json::{Value, json};

use crate::command::{CommandOp, MigrationCommand};
use crate::errors::DriftError;
use crate::snapshot::{IndexDefinition, IndexDirection};
use crate::store::{DocumentStore, SessionId, StoreError};

pub const DEFAULT_RECORDS_COLLECTION: &str = "_docdrift_migrations";
pub const DEFAULT_CONFIG_COLLECTION: &str = "_docdrift_config";

const INITIALIZED_FLAG: &str = "initialized";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    records_collection: String,
    config_collection: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_RECORDS_COLLECTION, DEFAULT_CONFIG_COLLECTION)
    }
}

impl Ledger {
    pub fn new(records_collection: impl Into<String>, config_collection: impl Into<String>) -> Self {
        Self {
            records_collection: records_collection.into(),
            config_collection: config_collection.into(),
        }
    }

    pub fn records_collection(&self) -> &str {
        &self.records_collection
    }

    fn record_indexes() -> [IndexDefinition; 4] {
        [
            IndexDefinition::on("filename", IndexDirection::Ascending).unique(),
            IndexDefinition::on("fromHash", IndexDirection::Ascending),
            IndexDefinition::on("toHash", IndexDirection::Ascending),
            IndexDefinition::on("createdAt", IndexDirection::Descending),
        ]
    }

    /// Create the records collection, its indexes and the `initialized` flag.
    ///
    /// Returns `false` when everything was already in place.
    pub async fn initialize<S: DocumentStore>(&self, store: &mut S) -> Result<bool, DriftError> {
        let mut changed = false;

        if !store.collection_exists(&self.records_collection).await? {
            store
                .execute(
                    &CommandOp::CreateCollection {
                        collection: self.records_collection.clone(),
                    },
                    None,
                )
                .await?;
            changed = true;
        }

        for index in Self::record_indexes() {
            let name = index.resolved_name();
            if store.index_exists(&self.records_collection, &name).await? {
                continue;
            }
            debug!("creating ledger index {name}");
            store
                .execute(
                    &CommandOp::CreateIndex {
                        collection: self.records_collection.clone(),
                        index,
                    },
                    None,
                )
                .await?;
            changed = true;
        }

        if self.get_flag(store, INITIALIZED_FLAG).await? != Some(Value::Bool(true)) {
            self.set_flag(store, INITIALIZED_FLAG, Value::Bool(true)).await?;
            changed = true;
        }

        if changed {
            info!("initialized migration ledger in {}", self.records_collection);
        }
        Ok(changed)
    }

    /// Create or refresh the record for `filename`.
    ///
    /// An unapplied record is replaced in place and keeps its `createdAt`. An
    /// applied record is returned unchanged when the hashes match and is a
    /// [`DriftError::LedgerConflict`] otherwise.
    pub async fn create_record<S: DocumentStore>(
        &self,
        store: &mut S,
        filename: &str,
        from_hash: &str,
        to_hash: &str,
        up: &[MigrationCommand],
        down: &[MigrationCommand],
    ) -> Result<MigrationRecord, DriftError> {
        let mut record = MigrationRecord::new(filename, from_hash, to_hash, up.to_vec(), down.to_vec());

        if let Some(existing) = self.get(store, filename).await? {
            if existing.is_applied {
                if existing.same_hashes(from_hash, to_hash) {
                    return Ok(existing);
                }
                return Err(DriftError::LedgerConflict {
                    filename: filename.to_string(),
                    message: format!(
                        "already applied as {} -> {}; generate a new migration instead",
                        short(&existing.from_hash),
                        short(&existing.to_hash)
                    ),
                });
            }
            record.created_at = existing.created_at;
            record.execution_time_ms = existing.execution_time_ms;
            record.reverted_at = existing.reverted_at;
            record.applied_at = existing.applied_at;
        }

        self.write(store, &record, None).await?;
        Ok(record)
    }

    /// Record the applied or reverted state of a migration.
    ///
    /// Written through `session` when given so it commits with the migration.
    pub async fn set_applied<S: DocumentStore>(
        &self,
        store: &mut S,
        filename: &str,
        is_applied: bool,
        execution_time_ms: Option<u64>,
        session: Option<&SessionId>,
    ) -> Result<MigrationRecord, DriftError> {
        let mut record = match self.get(store, filename).await? {
            Some(record) => record,
            None => MigrationRecord::new(filename, "", "", Vec::new(), Vec::new()),
        };
        if is_applied {
            record.mark_applied(execution_time_ms);
        } else {
            record.mark_reverted(execution_time_ms);
        }
        self.write(store, &record, session).await?;
        Ok(record)
    }

    pub async fn get<S: DocumentStore>(
        &self,
        store: &mut S,
        filename: &str,
    ) -> Result<Option<MigrationRecord>, DriftError> {
        match store.find_document(&self.records_collection, filename).await? {
            Some(doc) => Ok(Some(parse_record(doc)?)),
            None => Ok(None),
        }
    }

    /// Applied records, oldest application first.
    pub async fn list_applied<S: DocumentStore>(&self, store: &mut S) -> Result<Vec<MigrationRecord>, DriftError> {
        let mut applied: Vec<MigrationRecord> = self
            .load_all(store)
            .await?
            .into_iter()
            .filter(|r| r.is_applied)
            .collect();
        applied.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then_with(|| a.filename.cmp(&b.filename)));
        Ok(applied)
    }

    /// Every record, newest first.
    pub async fn list_all<S: DocumentStore>(&self, store: &mut S) -> Result<Vec<MigrationRecord>, DriftError> {
        let mut records = self.load_all(store).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.filename.cmp(&a.filename)));
        Ok(records)
    }

    pub async fn get_flag<S: DocumentStore>(&self, store: &mut S, name: &str) -> Result<Option<Value>, DriftError> {
        let doc = store.find_document(&self.config_collection, name).await?;
        Ok(doc.and_then(|d| d.get("value").cloned()))
    }

    pub async fn set_flag<S: DocumentStore>(&self, store: &mut S, name: &str, value: Value) -> Result<(), DriftError> {
        let doc = json!({ "name": name, "value": value });
        store.upsert_document(&self.config_collection, name, &doc, None).await?;
        Ok(())
    }

    async fn load_all<S: DocumentStore>(&self, store: &mut S) -> Result<Vec<MigrationRecord>, DriftError> {
        store
            .list_documents(&self.records_collection)
            .await?
            .into_iter()
            .map(parse_record)
            .collect()
    }

    async fn write<S: DocumentStore>(
        &self,
        store: &mut S,
        record: &MigrationRecord,
        session: Option<&SessionId>,
    ) -> Result<(), DriftError> {
        let doc = serde_json::to_value(record).map_err(StoreError::from)?;
        store
            .upsert_document(&self.records_collection, &record.filename, &doc, session)
            .await?;
        Ok(())
    }
}

fn parse_record(doc: Value) -> Result<MigrationRecord, DriftError> {
    serde_json::from_value(doc).map_err(|err| DriftError::Store(StoreError::from(err)))
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
