//! Integration tests for the migration executor.
//!
//! These tests verify the complete execution workflow including:
//! - Generating a script from snapshots and applying it
//! - Fallback to non-transactional execution on capability errors
//! - Fail-fast validation and partial-failure reporting
//! - Rollback ordering with and without a target

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use docdrift::generate::generate;
use docdrift::store::DocumentStore;
use docdrift::{
    CollectionStructure, CommandOp, DiffOptions, DriftError, Executor, ExecutorOptions, FieldDefinition, Ledger,
    MemoryStore, MigrationCommand, MigrationScript, Phase, SafetyLevel, SessionId, Snapshot, StoreError, TypeTag,
};
use serde_json::{Value, json};
use tempfile::TempDir;

// ============ Test Store ============

/// Memory store whose first commit fails as if the deployment had no transactions.
struct FlakyCommitStore {
    inner: MemoryStore,
    commit_failures: usize,
    sessions_started: usize,
}

impl FlakyCommitStore {
    fn new(inner: MemoryStore, commit_failures: usize) -> Self {
        Self {
            inner,
            commit_failures,
            sessions_started: 0,
        }
    }
}

impl DocumentStore for FlakyCommitStore {
    async fn start_session(&mut self) -> Result<SessionId, StoreError> {
        self.sessions_started += 1;
        self.inner.start_session().await
    }

    async fn commit_session(&mut self, session: &SessionId) -> Result<(), StoreError> {
        if self.commit_failures > 0 {
            self.commit_failures -= 1;
            return Err(StoreError::TransactionUnsupported {
                message: "Transaction numbers are only allowed on a replica set member".into(),
            });
        }
        self.inner.commit_session(session).await
    }

    async fn abort_session(&mut self, session: &SessionId) -> Result<(), StoreError> {
        self.inner.abort_session(session).await
    }

    async fn execute(&mut self, op: &CommandOp, session: Option<&SessionId>) -> Result<u64, StoreError> {
        self.inner.execute(op, session).await
    }

    async fn collection_exists(&mut self, collection: &str) -> Result<bool, StoreError> {
        self.inner.collection_exists(collection).await
    }

    async fn index_exists(&mut self, collection: &str, name: &str) -> Result<bool, StoreError> {
        self.inner.index_exists(collection, name).await
    }

    async fn upsert_document(
        &mut self,
        collection: &str,
        id: &str,
        document: &Value,
        session: Option<&SessionId>,
    ) -> Result<(), StoreError> {
        self.inner.upsert_document(collection, id, document, session).await
    }

    async fn find_document(&mut self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.find_document(collection, id).await
    }

    async fn list_documents(&mut self, collection: &str) -> Result<Vec<Value>, StoreError> {
        self.inner.list_documents(collection).await
    }
}

// ============ Helper Functions ============

fn options() -> ExecutorOptions {
    ExecutorOptions {
        settle_delay: Duration::from_millis(1),
        ..ExecutorOptions::default()
    }
}

fn set(collection: &str, path: &str, value: Value) -> MigrationCommand {
    MigrationCommand::new(
        CommandOp::SetField {
            collection: collection.into(),
            path: path.into(),
            value,
        },
        format!("Add field {collection}.{path}"),
        SafetyLevel::Safe,
    )
}

fn unset(collection: &str, path: &str) -> MigrationCommand {
    MigrationCommand::new(
        CommandOp::UnsetField {
            collection: collection.into(),
            path: path.into(),
        },
        format!("Remove field {collection}.{path}"),
        SafetyLevel::Warning,
    )
}

fn create(collection: &str) -> MigrationCommand {
    MigrationCommand::new(
        CommandOp::CreateCollection {
            collection: collection.into(),
        },
        format!("Create collection {collection}"),
        SafetyLevel::Safe,
    )
}

fn validator(collection: &str) -> MigrationCommand {
    MigrationCommand::new(
        CommandOp::ModifyValidator {
            collection: collection.into(),
            validator: Some(json!({ "required": ["name"] })),
        },
        format!("Apply validator to {collection}"),
        SafetyLevel::Warning,
    )
}

fn write(dir: &Path, name: &str, up: Vec<MigrationCommand>, down: Vec<MigrationCommand>) -> String {
    let script = MigrationScript {
        name: name.to_string(),
        from_hash: format!("{name}-from"),
        to_hash: format!("{name}-to"),
        created_at: Utc::now(),
        up,
        down,
        warnings: Vec::new(),
    };
    docdrift::executor::write_script(dir, &script).expect("script is written");
    script.filename()
}

/// Three scripts that each add one numbered field to `users`.
fn field_series(dir: &Path) -> Vec<String> {
    (1..=3)
        .map(|n| {
            write(
                dir,
                &format!("2024010{n}_000000_add_f{n}"),
                vec![set("users", &format!("f{n}"), json!(n))],
                vec![unset("users", &format!("f{n}"))],
            )
        })
        .collect()
}

fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert("users", "alice", json!({ "name": "Alice" }));
    store.insert("users", "bob", json!({ "name": "Bob" }));
    store
}

fn has_field(store: &MemoryStore, field: &str) -> bool {
    store.documents("users").iter().all(|doc| doc.get(field).is_some())
}

// ============ Tests: Generate & Apply ============

#[tokio::test]
async fn generated_script_applies_and_rolls_back() {
    let dir = TempDir::new().expect("temp dir");
    let observed = Snapshot::new().with_collection(
        "users",
        CollectionStructure::new().field("name", FieldDefinition::new(TypeTag::String).required(true)),
    );
    let declared = Snapshot::new().with_collection(
        "users",
        CollectionStructure::new()
            .field("name", FieldDefinition::new(TypeTag::String).required(true))
            .field("phone", FieldDefinition::new(TypeTag::String).nullable(true)),
    );

    let generated = generate(observed, declared, &DiffOptions::default(), dir.path(), None)
        .expect("generate")
        .expect("changes detected");
    assert!(generated.script.name.ends_with("_add_phone"));

    let mut store = seeded_store();
    let mut executor = Executor::new(&mut store, Ledger::default(), options());
    let report = executor.migrate_up(dir.path()).await.expect("migrate up");
    assert!(report.is_success());
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.outcomes[0].documents_affected, 2);
    assert!(has_field(&store, "phone"));

    let mut executor = Executor::new(&mut store, Ledger::default(), options());
    let report = executor.rollback(dir.path(), None).await.expect("rollback");
    assert_eq!(report.succeeded, 1);
    assert!(store.documents("users").iter().all(|doc| doc.get("phone").is_none()));

    let record = Ledger::default()
        .get(&mut store, &generated.script.filename())
        .await
        .expect("ledger read")
        .expect("record exists");
    assert!(!record.is_applied);
    assert!(record.reverted_at.is_some());
}

#[tokio::test]
async fn second_run_has_nothing_to_apply() {
    let dir = TempDir::new().expect("temp dir");
    field_series(dir.path());
    let mut store = seeded_store();

    let first = Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("first run");
    assert_eq!(first.succeeded, 3);

    let second = Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("second run");
    assert!(second.outcomes.is_empty());
    assert!(second.is_success());
}

// ============ Tests: Transaction Fallback ============

#[tokio::test]
async fn capability_error_retries_without_a_session() {
    let dir = TempDir::new().expect("temp dir");
    let filename = write(
        dir.path(),
        "20240101_000000_add_active",
        vec![set("users", "active", json!(true))],
        vec![unset("users", "active")],
    );
    let mut store = FlakyCommitStore::new(seeded_store(), 1);

    let report = Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("migrate up");

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.phase, Phase::Committed);
    assert!(!outcome.transactional);
    assert_eq!(outcome.documents_affected, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(store.sessions_started, 1);
    assert_eq!(store.inner.open_sessions(), 0);
    assert!(has_field(&store.inner, "active"));

    let record = Ledger::default()
        .get(&mut store, &filename)
        .await
        .expect("ledger read")
        .expect("record exists");
    assert!(record.is_applied);
}

#[tokio::test]
async fn store_without_transactions_runs_every_migration_directly() {
    let dir = TempDir::new().expect("temp dir");
    field_series(dir.path());
    let mut store = MemoryStore::without_transactions();
    store.insert("users", "alice", json!({ "name": "Alice" }));

    let report = Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("migrate up");

    assert_eq!(report.succeeded, 3);
    assert!(report.outcomes.iter().all(|o| !o.transactional && o.phase == Phase::Committed));
    assert!(has_field(&store, "f1") && has_field(&store, "f2") && has_field(&store, "f3"));
}

// ============ Tests: Validation & Failure ============

#[tokio::test]
async fn invalid_script_stops_the_batch_before_anything_runs() {
    let dir = TempDir::new().expect("temp dir");
    field_series(dir.path());
    std::fs::write(dir.path().join("notes.json"), "{}").expect("stray file");
    let mut store = seeded_store();

    let err = Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect_err("validation fails");

    let validation = match err {
        DriftError::ValidationFailure(validation) => validation,
        other => panic!("expected a validation failure, got {other}"),
    };
    assert!(validation.issues.iter().any(|issue| issue.field == "notes.json"));
    assert_eq!(store.collection_names(), vec!["users".to_string()]);
    assert!(!has_field(&store, "f1"));
}

#[tokio::test]
async fn failing_migration_rolls_back_its_own_writes_and_reports_progress() {
    let dir = TempDir::new().expect("temp dir");
    let first = write(
        dir.path(),
        "20240101_000000_add_f1",
        vec![set("users", "f1", json!(1))],
        vec![unset("users", "f1")],
    );
    let broken = write(
        dir.path(),
        "20240102_000000_orders",
        vec![create("orders"), validator("ghosts")],
        Vec::new(),
    );
    write(
        dir.path(),
        "20240103_000000_add_f3",
        vec![set("users", "f3", json!(3))],
        vec![unset("users", "f3")],
    );
    let mut store = seeded_store();

    let report = Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("batch report");

    assert!(!report.is_success());
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[1].phase, Phase::Failed);

    let failure = report.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.migration, broken);
    assert!(failure.remedy.contains("docdrift migrate down"), "{}", failure.remedy);

    assert!(has_field(&store, "f1"));
    assert!(!has_field(&store, "f3"));
    assert!(!store.collection_names().contains(&"orders".to_string()));

    let ledger = Ledger::default();
    let applied: Vec<String> = ledger
        .list_applied(&mut store)
        .await
        .expect("ledger read")
        .into_iter()
        .map(|r| r.filename)
        .collect();
    assert_eq!(applied, vec![first]);
    let pending = ledger.get(&mut store, &broken).await.expect("ledger read").expect("record");
    assert!(!pending.is_applied);

    let err = report.into_result().expect_err("failed batch is an error");
    assert!(matches!(err, DriftError::ExecutionFailure { succeeded: 1, .. }));
}

#[tokio::test]
async fn drop_without_execution_options_is_listed_not_run() {
    let dir = TempDir::new().expect("temp dir");
    let script = json!({
        "name": "20240101_000000_drop_legacy",
        "fromHash": "a",
        "toHash": "b",
        "createdAt": "2024-01-01T00:00:00Z",
        "up": [{
            "command": {"op": "dropCollection", "collection": "legacy"},
            "description": "Drop collection legacy",
            "safetyLevel": "dangerous"
        }],
        "down": [{
            "command": {"op": "createCollection", "collection": "legacy"},
            "description": "Create collection legacy",
            "safetyLevel": "safe"
        }]
    });
    std::fs::write(
        dir.path().join("20240101_000000_drop_legacy.json"),
        serde_json::to_string_pretty(&script).expect("json"),
    )
    .expect("write script");

    let mut store = seeded_store();
    store.insert("legacy", "old", json!({ "kept": true }));

    let report = Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("migrate up");

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.phase, Phase::Committed);
    assert_eq!(outcome.commands_run, 0);
    assert_eq!(outcome.manual.len(), 1);
    assert!(!outcome.manual_executed);
    assert_eq!(store.documents("legacy"), vec![json!({ "kept": true })]);
}

// ============ Tests: Rollback ============

#[tokio::test]
async fn rollback_to_target_reverts_later_migrations_newest_first() {
    let dir = TempDir::new().expect("temp dir");
    let files = field_series(dir.path());
    let mut store = seeded_store();

    Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("migrate up");

    let report = Executor::new(&mut store, Ledger::default(), options())
        .rollback(dir.path(), Some("20240101_000000_add_f1"))
        .await
        .expect("rollback");

    let reverted: Vec<&str> = report.outcomes.iter().map(|o| o.filename.as_str()).collect();
    assert_eq!(reverted, vec![files[2].as_str(), files[1].as_str()]);
    assert_eq!(report.succeeded, 2);
    assert!(has_field(&store, "f1"));
    assert!(!has_field(&store, "f2"));
    assert!(!has_field(&store, "f3"));

    let applied = Ledger::default().list_applied(&mut store).await.expect("ledger read");
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].filename, files[0]);
}

#[tokio::test]
async fn rollback_to_unknown_target_is_an_error() {
    let dir = TempDir::new().expect("temp dir");
    field_series(dir.path());
    let mut store = seeded_store();

    Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("migrate up");

    let err = Executor::new(&mut store, Ledger::default(), options())
        .rollback(dir.path(), Some("20991231_000000_never"))
        .await
        .expect_err("unknown target");
    assert!(err.to_string().contains("20991231_000000_never.json"));
    assert!(has_field(&store, "f3"));
}

#[tokio::test]
async fn rollback_uses_ledger_commands_when_the_file_is_gone() {
    let dir = TempDir::new().expect("temp dir");
    let files = field_series(dir.path());
    let mut store = seeded_store();

    Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("migrate up");
    std::fs::remove_file(dir.path().join(&files[2])).expect("remove script");

    let report = Executor::new(&mut store, Ledger::default(), options())
        .rollback(dir.path(), None)
        .await
        .expect("rollback");

    assert_eq!(report.outcomes[0].filename, files[2]);
    assert_eq!(report.outcomes[0].phase, Phase::Committed);
    assert!(!has_field(&store, "f3"));
    assert!(has_field(&store, "f2"));
}

#[tokio::test]
async fn dry_run_rollback_leaves_everything_applied() {
    let dir = TempDir::new().expect("temp dir");
    field_series(dir.path());
    let mut store = seeded_store();

    Executor::new(&mut store, Ledger::default(), options())
        .migrate_up(dir.path())
        .await
        .expect("migrate up");

    let dry = ExecutorOptions {
        dry_run: true,
        ..options()
    };
    let report = Executor::new(&mut store, Ledger::default(), dry)
        .rollback(dir.path(), None)
        .await
        .expect("dry run");

    assert!(report.dry_run);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].commands_run, 1);
    assert_eq!(report.succeeded, 0);
    assert!(has_field(&store, "f3"));
    assert_eq!(Ledger::default().list_applied(&mut store).await.expect("ledger").len(), 3);
}
