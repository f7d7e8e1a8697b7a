//! Document storage seam used by the ledger and the executor.

pub mod document;
mod keys;
mod memory;
mod redis_store;

pub use keys::KeyContext;
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreOptions};

use std::fmt;

use nanoid::nanoid;
use serde_json::Value;
use thiserror::Error;

use crate::command::CommandOp;

const SESSION_ID_ALPHABET: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const SESSION_ID_LENGTH: usize = 16;

/// Handle for an open storage session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(nanoid!(SESSION_ID_LENGTH, SESSION_ID_ALPHABET))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The deployment cannot run multi-document transactions.
    #[error("transactions unsupported: {message}")]
    TransactionUnsupported { message: String },

    #[error("unknown session `{0}`")]
    UnknownSession(SessionId),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{message}")]
    Other { message: String },
}

impl StoreError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    pub fn is_transaction_capability(&self) -> bool {
        match self {
            StoreError::TransactionUnsupported { .. } => true,
            StoreError::Redis(err) => err.kind() == redis::ErrorKind::CrossSlot,
            _ => false,
        }
    }
}

/// Async storage operations needed to apply migrations and keep the ledger.
///
/// Writes take an optional session; a write with `Some(session)` becomes
/// visible only when that session commits. Reads always see committed state.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    async fn start_session(&mut self) -> Result<SessionId, StoreError>;

    async fn commit_session(&mut self, session: &SessionId) -> Result<(), StoreError>;

    /// Discard a session. Aborting an unknown session is a no-op.
    async fn abort_session(&mut self, session: &SessionId) -> Result<(), StoreError>;

    /// Apply one operation and return the number of affected documents.
    async fn execute(&mut self, op: &CommandOp, session: Option<&SessionId>) -> Result<u64, StoreError>;

    async fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError>;

    async fn index_exists(&mut self, collection: &str, name: &str) -> Result<bool, StoreError>;

    async fn upsert_document(
        &mut self,
        collection: &str,
        id: &str,
        document: &Value,
        session: Option<&SessionId>,
    ) -> Result<(), StoreError>;

    async fn find_document(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn list_documents(&mut self, collection: &str) -> Result<Vec<Value>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_use_the_alphabet() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), SESSION_ID_LENGTH);
        assert!(a.as_str().chars().all(|c| SESSION_ID_ALPHABET.contains(&c)));
    }

    #[test]
    fn only_unsupported_transactions_are_capability_errors() {
        assert!(
            StoreError::TransactionUnsupported {
                message: "standalone".into()
            }
            .is_transaction_capability()
        );
        assert!(!StoreError::other("boom").is_transaction_capability());
        assert!(!StoreError::UnknownSession(SessionId::from("x")).is_transaction_capability());
    }
}
