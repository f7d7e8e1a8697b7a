//! Migration execution engine.
//!
//! This module provides:
//! - Script files and their discovery (`script`)
//! - Fail-fast structural validation (`validate`)
//! - The transactional runner with non-transactional fallback (`runner`)

mod runner;
pub mod script;
pub mod validate;

pub use runner::Executor;
pub use script::{MigrationScript, ScriptFile, calculate_checksum, discover, normalize_filename, write_script};
pub use validate::{ValidatedScript, validate_script, validate_scripts};

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::DriftError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Pause after a non-transactional retry before recording it in the ledger
    pub settle_delay: Duration,
    /// Run manual commands outside any session once the migration commits
    pub run_manual: bool,
    pub dry_run: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            run_manual: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Lifecycle of a single migration within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Validating,
    Applying,
    FailedRetrying,
    Committed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Pending => "pending",
            Phase::Validating => "validating",
            Phase::Applying => "applying",
            Phase::FailedRetrying => "retrying without transaction",
            Phase::Committed => "committed",
            Phase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// What happened to one migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub filename: String,
    pub direction: Direction,
    pub phase: Phase,
    /// False when the migration ran without a session after a capability error
    pub transactional: bool,
    pub commands_run: usize,
    pub documents_affected: u64,
    /// Rendered manual commands; run only when `run_manual` is set
    pub manual: Vec<String>,
    pub manual_executed: bool,
    pub warnings: Vec<String>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationOutcome {
    pub(crate) fn new(filename: &str, direction: Direction) -> Self {
        Self {
            filename: filename.to_string(),
            direction,
            phase: Phase::Pending,
            transactional: true,
            commands_run: 0,
            documents_affected: 0,
            manual: Vec::new(),
            manual_executed: false,
            warnings: Vec::new(),
            execution_time_ms: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub migration: String,
    pub message: String,
    pub remedy: String,
}

/// Result of an up or down batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub direction: Direction,
    pub dry_run: bool,
    pub outcomes: Vec<MigrationOutcome>,
    /// Migrations committed before the batch stopped
    pub succeeded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<BatchFailure>,
}

impl BatchReport {
    pub(crate) fn new(direction: Direction, dry_run: bool) -> Self {
        Self {
            direction,
            dry_run,
            outcomes: Vec::new(),
            succeeded: 0,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Turn a stopped batch into [`DriftError::ExecutionFailure`].
    pub fn into_result(self) -> Result<BatchReport, DriftError> {
        match &self.failure {
            None => Ok(self),
            Some(failure) => Err(DriftError::ExecutionFailure {
                migration: failure.migration.clone(),
                succeeded: self.succeeded,
                message: failure.message.clone(),
                remedy: failure.remedy.clone(),
            }),
        }
    }
}

/// Applied state of one migration, from the scripts on disk and the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub filename: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
    /// False when the ledger knows the migration but the file is gone
    pub file_present: bool,
    pub checksum: Option<String>,
}
