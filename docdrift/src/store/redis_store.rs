//! RedisJSON-backed document store.
//!
//! Documents live at `<prefix>:<collection>:<id>` as JSON values, so
//! collection names may not contain `:`. Collection names, index definitions
//! and validators are kept in metadata keys (see [`KeyContext`]). A session
//! buffers every write into a `MULTI/EXEC` pipeline that runs on commit;
//! reads inside a session see its buffered documents first.

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};
use redis::aio::ConnectionManager;
use serde_json::Value;

use super::document::{apply_update, matches_filter};
use super::{DocumentStore, KeyContext, SessionId, StoreError};
use crate::command::CommandOp;

const SCAN_COUNT: usize = 100;

#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    pub prefix: String,
    /// When false, sessions are refused as if the deployment had no transactions
    pub transactions: bool,
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            prefix: "docdrift".to_string(),
            transactions: true,
        }
    }
}

struct SessionBuffer {
    pipeline: redis::Pipeline,
    documents: HashMap<String, Option<Value>>,
}

impl SessionBuffer {
    fn new() -> Self {
        let mut pipeline = redis::pipe();
        pipeline.atomic();
        Self {
            pipeline,
            documents: HashMap::new(),
        }
    }
}

pub struct RedisStore {
    conn: ConnectionManager,
    options: RedisStoreOptions,
    sessions: HashMap<SessionId, SessionBuffer>,
    cluster: Option<bool>,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, options: RedisStoreOptions) -> Self {
        Self {
            conn,
            options,
            sessions: HashMap::new(),
            cluster: None,
        }
    }

    pub async fn connect(url: &str, options: RedisStoreOptions) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, options))
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.options.prefix)
    }

    async fn is_cluster(&mut self) -> Result<bool, StoreError> {
        if let Some(cluster) = self.cluster {
            return Ok(cluster);
        }
        let info: String = redis::cmd("INFO").arg("cluster").query_async(&mut self.conn).await?;
        let cluster = info.lines().any(|line| line.trim() == "cluster_enabled:1");
        self.cluster = Some(cluster);
        Ok(cluster)
    }

    fn buffer(&mut self, session: &SessionId) -> Result<&mut SessionBuffer, StoreError> {
        self.sessions
            .get_mut(session)
            .ok_or_else(|| StoreError::UnknownSession(session.clone()))
    }

    /// Run a write now, or queue it on the session pipeline.
    async fn run(&mut self, session: Option<&SessionId>, command: redis::Cmd) -> Result<(), StoreError> {
        match session {
            Some(id) => {
                self.buffer(id)?.pipeline.add_command(command).ignore();
            }
            None => {
                let _: () = command.query_async(&mut self.conn).await?;
            }
        }
        Ok(())
    }

    async fn read_doc(&mut self, session: Option<&SessionId>, key: &str) -> Result<Option<Value>, StoreError> {
        if let Some(id) = session
            && let Some(pending) = self.buffer(id)?.documents.get(key)
        {
            return Ok(pending.clone());
        }
        let raw: Option<String> = redis::cmd("JSON.GET").arg(key).query_async(&mut self.conn).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write_doc(&mut self, session: Option<&SessionId>, key: &str, doc: &Value) -> Result<(), StoreError> {
        let mut command = redis::cmd("JSON.SET");
        command.arg(key).arg("$").arg(serde_json::to_string(doc)?);
        self.run(session, command).await?;
        if let Some(id) = session {
            self.buffer(id)?.documents.insert(key.to_string(), Some(doc.clone()));
        }
        Ok(())
    }

    async fn delete_doc(&mut self, session: Option<&SessionId>, key: &str) -> Result<(), StoreError> {
        let mut command = redis::cmd("DEL");
        command.arg(key);
        self.run(session, command).await?;
        if let Some(id) = session {
            self.buffer(id)?.documents.insert(key.to_string(), None);
        }
        Ok(())
    }

    async fn register_collection(&mut self, session: Option<&SessionId>, collection: &str) -> Result<(), StoreError> {
        let mut command = redis::cmd("SADD");
        command.arg(self.keys().collections()).arg(collection);
        self.run(session, command).await
    }

    /// Document keys of a collection, including documents written in the session.
    async fn collection_keys(
        &mut self,
        session: Option<&SessionId>,
        collection: &str,
    ) -> Result<Vec<String>, StoreError> {
        let pattern = self.keys().document_pattern(collection);
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut self.conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if let Some(id) = session {
            let prefix = self.keys().document(collection, "");
            for (key, pending) in &self.buffer(id)?.documents {
                if !key.starts_with(&prefix) {
                    continue;
                }
                if pending.is_some() {
                    keys.insert(key.clone());
                } else {
                    keys.remove(key);
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn update_documents(&mut self, op: &CommandOp, session: Option<&SessionId>) -> Result<u64, StoreError> {
        let keys = self.collection_keys(session, op.collection()).await?;
        let mut modified = 0;
        for key in keys {
            let Some(mut doc) = self.read_doc(session, &key).await? else {
                continue;
            };
            if apply_update(op, &mut doc)? {
                self.write_doc(session, &key, &doc).await?;
                modified += 1;
            }
        }
        Ok(modified)
    }
}

impl DocumentStore for RedisStore {
    async fn start_session(&mut self) -> Result<SessionId, StoreError> {
        if !self.options.transactions {
            return Err(StoreError::TransactionUnsupported {
                message: "transactions disabled by configuration".into(),
            });
        }
        if self.is_cluster().await? {
            return Err(StoreError::TransactionUnsupported {
                message: "redis cluster cannot run multi-key transactions".into(),
            });
        }
        let id = SessionId::generate();
        self.sessions.insert(id.clone(), SessionBuffer::new());
        debug!("started redis session {id}");
        Ok(id)
    }

    async fn commit_session(&mut self, session: &SessionId) -> Result<(), StoreError> {
        let buffer = self
            .sessions
            .remove(session)
            .ok_or_else(|| StoreError::UnknownSession(session.clone()))?;
        let _: () = buffer.pipeline.query_async(&mut self.conn).await?;
        debug!("committed redis session {session}");
        Ok(())
    }

    async fn abort_session(&mut self, session: &SessionId) -> Result<(), StoreError> {
        if self.sessions.remove(session).is_some() {
            debug!("discarded redis session {session}");
        }
        Ok(())
    }

    async fn execute(&mut self, op: &CommandOp, session: Option<&SessionId>) -> Result<u64, StoreError> {
        KeyContext::validate_collection(op.collection())?;
        match op {
            CommandOp::CreateCollection { collection } => {
                self.register_collection(session, collection).await?;
                Ok(0)
            }
            CommandOp::DropCollection { collection } => {
                let keys = self.collection_keys(session, collection).await?;
                for key in &keys {
                    self.delete_doc(session, key).await?;
                }
                let mut srem = redis::cmd("SREM");
                srem.arg(self.keys().collections()).arg(collection);
                self.run(session, srem).await?;
                let mut del = redis::cmd("DEL");
                del.arg(self.keys().indexes(collection));
                self.run(session, del).await?;
                let mut hdel = redis::cmd("HDEL");
                hdel.arg(self.keys().validators()).arg(collection);
                self.run(session, hdel).await?;
                Ok(keys.len() as u64)
            }
            CommandOp::SetField { .. } | CommandOp::UnsetField { .. } | CommandOp::RenameField { .. } => {
                self.update_documents(op, session).await
            }
            CommandOp::CreateIndex { collection, index } => {
                self.register_collection(session, collection).await?;
                let mut hset = redis::cmd("HSET");
                hset.arg(self.keys().indexes(collection))
                    .arg(index.resolved_name())
                    .arg(serde_json::to_string(index)?);
                self.run(session, hset).await?;
                Ok(0)
            }
            CommandOp::DropIndex { collection, name } => {
                let mut hdel = redis::cmd("HDEL");
                hdel.arg(self.keys().indexes(collection)).arg(name);
                self.run(session, hdel).await?;
                Ok(0)
            }
            CommandOp::ModifyValidator { collection, validator } => {
                let command = match validator {
                    Some(document) => {
                        let mut hset = redis::cmd("HSET");
                        hset.arg(self.keys().validators())
                            .arg(collection)
                            .arg(serde_json::to_string(document)?);
                        hset
                    }
                    None => {
                        let mut hdel = redis::cmd("HDEL");
                        hdel.arg(self.keys().validators()).arg(collection);
                        hdel
                    }
                };
                self.run(session, command).await?;
                Ok(0)
            }
            CommandOp::DeleteMany { collection, filter } => {
                if filter.as_object().is_some_and(|f| f.is_empty()) || filter.is_null() {
                    warn!("deleting every document in `{collection}`");
                }
                let keys = self.collection_keys(session, collection).await?;
                let mut removed = 0;
                for key in keys {
                    let Some(doc) = self.read_doc(session, &key).await? else {
                        continue;
                    };
                    if matches_filter(&doc, filter) {
                        self.delete_doc(session, &key).await?;
                        removed += 1;
                    }
                }
                Ok(removed)
            }
            CommandOp::ReviewTypeChange { collection, path, .. } => Err(StoreError::other(format!(
                "type review for {collection}.{path} is not executable"
            ))),
        }
    }

    async fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError> {
        let exists: bool = redis::cmd("SISMEMBER")
            .arg(self.keys().collections())
            .arg(collection)
            .query_async(&mut self.conn)
            .await?;
        Ok(exists)
    }

    async fn index_exists(&mut self, collection: &str, name: &str) -> Result<bool, StoreError> {
        let exists: bool = redis::cmd("HEXISTS")
            .arg(self.keys().indexes(collection))
            .arg(name)
            .query_async(&mut self.conn)
            .await?;
        Ok(exists)
    }

    async fn upsert_document(
        &mut self,
        collection: &str,
        id: &str,
        document: &Value,
        session: Option<&SessionId>,
    ) -> Result<(), StoreError> {
        KeyContext::validate_collection(collection)?;
        let key = self.keys().document(collection, id);
        self.register_collection(session, collection).await?;
        self.write_doc(session, &key, document).await
    }

    async fn find_document(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        KeyContext::validate_collection(collection)?;
        let key = self.keys().document(collection, id);
        self.read_doc(None, &key).await
    }

    async fn list_documents(&mut self, collection: &str) -> Result<Vec<Value>, StoreError> {
        KeyContext::validate_collection(collection)?;
        let keys = self.collection_keys(None, collection).await?;
        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.read_doc(None, &key).await? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }
}
