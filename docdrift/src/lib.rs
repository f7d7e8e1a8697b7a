//! docdrift core library.
//!
//! Detects structural drift between a declared data model and the live
//! structure of a document store, and produces reversible, safety-classified
//! migration scripts that reconcile them.
//!
//! - [`snapshot`]: snapshot model, normalization and hashing
//! - [`diff`]: structural diff engine with rename inference
//! - [`command`]: typed migration commands
//! - [`ledger`]: persisted record of generated and applied migrations
//! - [`executor`]: transactional apply and rollback of migration scripts
//! - [`store`]: storage seam with in-memory and Redis implementations

pub mod command;
pub mod config;
pub mod diff;
pub mod errors;
pub mod executor;
pub mod extract;
pub mod generate;
pub mod ledger;
pub mod snapshot;
pub mod store;

pub use command::{CommandOp, CommandOptions, Execution, MigrationCommand, SafetyLevel};
pub use config::DriftConfig;
pub use diff::{DiffOptions, DiffResult, RenameTieBreak, diff, diff_with};
pub use errors::*;
pub use executor::{BatchReport, Direction, Executor, ExecutorOptions, MigrationOutcome, MigrationScript, Phase};
pub use extract::{ModelDefinition, ModelRegistry, SnapshotFile, SnapshotSource};
pub use ledger::{Ledger, MigrationRecord};
pub use snapshot::{
    CollectionStructure, FieldDefinition, IndexDefinition, IndexDirection, IndexField, NormalizedSnapshot, Snapshot,
    TypeTag, hash, normalize, seal, verify,
};
pub use store::{DocumentStore, MemoryStore, RedisStore, RedisStoreOptions, SessionId, StoreError};

pub use redis;
