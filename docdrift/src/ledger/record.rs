use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::MigrationCommand;

/// Persisted history of one migration, keyed by its filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub filename: String,
    pub from_hash: String,
    pub to_hash: String,
    #[serde(default)]
    pub up_commands: Vec<MigrationCommand>,
    #[serde(default)]
    pub down_commands: Vec<MigrationCommand>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    pub fn new(
        filename: impl Into<String>,
        from_hash: impl Into<String>,
        to_hash: impl Into<String>,
        up_commands: Vec<MigrationCommand>,
        down_commands: Vec<MigrationCommand>,
    ) -> Self {
        Self {
            filename: filename.into(),
            from_hash: from_hash.into(),
            to_hash: to_hash.into(),
            up_commands,
            down_commands,
            created_at: Utc::now(),
            is_applied: false,
            applied_at: None,
            execution_time_ms: None,
            reverted_at: None,
        }
    }

    pub fn same_hashes(&self, from_hash: &str, to_hash: &str) -> bool {
        self.from_hash == from_hash && self.to_hash == to_hash
    }

    pub fn mark_applied(&mut self, execution_time_ms: Option<u64>) {
        self.is_applied = true;
        self.applied_at = Some(Utc::now());
        self.reverted_at = None;
        if execution_time_ms.is_some() {
            self.execution_time_ms = execution_time_ms;
        }
    }

    pub fn mark_reverted(&mut self, execution_time_ms: Option<u64>) {
        self.is_applied = false;
        self.reverted_at = Some(Utc::now());
        if execution_time_ms.is_some() {
            self.execution_time_ms = execution_time_ms;
        }
    }
}
