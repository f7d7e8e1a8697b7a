use std::collections::{BTreeMap, HashMap};

use log::debug;
use serde_json::Value;

use super::document::{apply_update, get_path, matches_filter};
use super::{DocumentStore, SessionId, StoreError};
use crate::command::CommandOp;
use crate::snapshot::IndexDefinition;

#[derive(Debug, Clone, Default)]
struct CollectionState {
    documents: BTreeMap<String, Value>,
    indexes: BTreeMap<String, IndexDefinition>,
    validator: Option<Value>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    collections: BTreeMap<String, CollectionState>,
}

/// In-process document store.
///
/// A session copies the committed state on start; its writes go to that
/// working copy, which replaces the committed state on commit.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    committed: StoreState,
    sessions: HashMap<SessionId, StoreState>,
    transactions: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            committed: StoreState::default(),
            sessions: HashMap::new(),
            transactions: true,
        }
    }

    /// A store that rejects sessions, like a standalone deployment.
    pub fn without_transactions() -> Self {
        Self {
            transactions: false,
            ..Self::new()
        }
    }

    /// Insert a committed document directly, creating the collection.
    pub fn insert(&mut self, collection: &str, id: &str, document: Value) {
        self.committed
            .collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .insert(id.to_string(), document);
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.committed
            .collections
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.committed.collections.keys().cloned().collect()
    }

    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.committed
            .collections
            .get(collection)
            .map(|c| c.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn validator(&self, collection: &str) -> Option<Value> {
        self.committed.collections.get(collection)?.validator.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn state_mut(&mut self, session: Option<&SessionId>) -> Result<&mut StoreState, StoreError> {
        match session {
            Some(id) => self
                .sessions
                .get_mut(id)
                .ok_or_else(|| StoreError::UnknownSession(id.clone())),
            None => Ok(&mut self.committed),
        }
    }
}

fn apply(state: &mut StoreState, op: &CommandOp) -> Result<u64, StoreError> {
    match op {
        CommandOp::CreateCollection { collection } => {
            state.collections.entry(collection.clone()).or_default();
            Ok(0)
        }
        CommandOp::DropCollection { collection } => Ok(state
            .collections
            .remove(collection)
            .map(|c| c.documents.len() as u64)
            .unwrap_or(0)),
        CommandOp::SetField { collection, .. }
        | CommandOp::UnsetField { collection, .. }
        | CommandOp::RenameField { collection, .. } => {
            let Some(target) = state.collections.get_mut(collection) else {
                return Ok(0);
            };
            let mut modified = 0;
            for doc in target.documents.values_mut() {
                if apply_update(op, doc)? {
                    modified += 1;
                }
            }
            Ok(modified)
        }
        CommandOp::CreateIndex { collection, index } => {
            let target = state.collections.entry(collection.clone()).or_default();
            if index.unique {
                check_unique(collection, target, index)?;
            }
            target.indexes.insert(index.resolved_name(), index.clone());
            Ok(0)
        }
        CommandOp::DropIndex { collection, name } => {
            if let Some(target) = state.collections.get_mut(collection)
                && target.indexes.remove(name).is_none()
            {
                debug!("index {collection}.{name} not present; nothing to drop");
            }
            Ok(0)
        }
        CommandOp::ModifyValidator { collection, validator } => {
            let target = state
                .collections
                .get_mut(collection)
                .ok_or_else(|| StoreError::other(format!("collection `{collection}` does not exist")))?;
            target.validator = validator.clone();
            Ok(0)
        }
        CommandOp::DeleteMany { collection, filter } => {
            let Some(target) = state.collections.get_mut(collection) else {
                return Ok(0);
            };
            let before = target.documents.len();
            target.documents.retain(|_, doc| !matches_filter(doc, filter));
            Ok((before - target.documents.len()) as u64)
        }
        CommandOp::ReviewTypeChange { collection, path, .. } => Err(StoreError::other(format!(
            "type review for {collection}.{path} is not executable"
        ))),
    }
}

fn check_unique(collection: &str, target: &CollectionState, index: &IndexDefinition) -> Result<(), StoreError> {
    let mut seen = Vec::new();
    for doc in target.documents.values() {
        let key: Vec<Option<&Value>> = index.fields.iter().map(|f| get_path(doc, &f.name)).collect();
        if index.sparse && key.iter().all(Option::is_none) {
            continue;
        }
        if seen.contains(&key) {
            return Err(StoreError::other(format!(
                "duplicate key while building unique index `{}` on `{collection}`",
                index.resolved_name()
            )));
        }
        seen.push(key);
    }
    Ok(())
}

impl DocumentStore for MemoryStore {
    async fn start_session(&mut self) -> Result<SessionId, StoreError> {
        if !self.transactions {
            return Err(StoreError::TransactionUnsupported {
                message: "in-memory store configured without transaction support".into(),
            });
        }
        let id = SessionId::generate();
        self.sessions.insert(id.clone(), self.committed.clone());
        debug!("started session {id}");
        Ok(id)
    }

    async fn commit_session(&mut self, session: &SessionId) -> Result<(), StoreError> {
        let state = self
            .sessions
            .remove(session)
            .ok_or_else(|| StoreError::UnknownSession(session.clone()))?;
        self.committed = state;
        debug!("committed session {session}");
        Ok(())
    }

    async fn abort_session(&mut self, session: &SessionId) -> Result<(), StoreError> {
        if self.sessions.remove(session).is_some() {
            debug!("aborted session {session}");
        }
        Ok(())
    }

    async fn execute(&mut self, op: &CommandOp, session: Option<&SessionId>) -> Result<u64, StoreError> {
        let state = self.state_mut(session)?;
        apply(state, op)
    }

    async fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.committed.collections.contains_key(collection))
    }

    async fn index_exists(&mut self, collection: &str, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .committed
            .collections
            .get(collection)
            .is_some_and(|c| c.indexes.contains_key(name)))
    }

    async fn upsert_document(
        &mut self,
        collection: &str,
        id: &str,
        document: &Value,
        session: Option<&SessionId>,
    ) -> Result<(), StoreError> {
        let state = self.state_mut(session)?;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn find_document(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .committed
            .collections
            .get(collection)
            .and_then(|c| c.documents.get(id))
            .cloned())
    }

    async fn list_documents(&mut self, collection: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self.documents(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::IndexDirection;
    use serde_json::json;

    fn set_phone() -> CommandOp {
        CommandOp::SetField {
            collection: "users".into(),
            path: "phone".into(),
            value: json!(""),
        }
    }

    #[tokio::test]
    async fn session_writes_are_invisible_until_commit() {
        let mut store = MemoryStore::new();
        store.insert("users", "1", json!({"name": "Ada"}));

        let session = store.start_session().await.unwrap();
        assert_eq!(store.execute(&set_phone(), Some(&session)).await.unwrap(), 1);
        assert!(store.documents("users")[0].get("phone").is_none());

        store.commit_session(&session).await.unwrap();
        assert_eq!(store.documents("users")[0]["phone"], json!(""));
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn aborted_sessions_leave_no_trace() {
        let mut store = MemoryStore::new();
        store.insert("users", "1", json!({"name": "Ada"}));
        let session = store.start_session().await.unwrap();
        store.execute(&set_phone(), Some(&session)).await.unwrap();
        store.abort_session(&session).await.unwrap();

        assert!(store.documents("users")[0].get("phone").is_none());
        assert!(matches!(
            store.commit_session(&session).await,
            Err(StoreError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn store_without_transactions_refuses_sessions() {
        let mut store = MemoryStore::without_transactions();
        let err = store.start_session().await.unwrap_err();
        assert!(err.is_transaction_capability());
        assert_eq!(store.execute(&set_phone(), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blocked_rename_fails_without_losing_the_value() {
        let mut store = MemoryStore::new();
        store.insert("users", "1", json!({"nick": "ada", "profile": "flat"}));
        let op = CommandOp::RenameField {
            collection: "users".into(),
            from: "nick".into(),
            to: "profile.nick".into(),
        };

        let session = store.start_session().await.unwrap();
        assert!(store.execute(&op, Some(&session)).await.is_err());
        store.abort_session(&session).await.unwrap();

        assert!(store.execute(&op, None).await.is_err());
        assert_eq!(store.documents("users"), vec![json!({"nick": "ada", "profile": "flat"})]);
    }

    #[tokio::test]
    async fn unique_index_rejects_existing_duplicates() {
        let mut store = MemoryStore::new();
        store.insert("users", "1", json!({"email": "a@x"}));
        store.insert("users", "2", json!({"email": "a@x"}));
        let op = CommandOp::CreateIndex {
            collection: "users".into(),
            index: IndexDefinition::on("email", IndexDirection::Ascending).unique(),
        };
        assert!(store.execute(&op, None).await.is_err());
        assert!(!store.index_exists("users", "email_1_unique").await.unwrap());
    }

    #[tokio::test]
    async fn delete_many_counts_removed_documents() {
        let mut store = MemoryStore::new();
        store.insert("users", "1", json!({"status": "archived"}));
        store.insert("users", "2", json!({"status": "active"}));
        let op = CommandOp::DeleteMany {
            collection: "users".into(),
            filter: json!({"status": "archived"}),
        };
        assert_eq!(store.execute(&op, None).await.unwrap(), 1);
        assert_eq!(store.documents("users").len(), 1);
    }
}
