//! Change metadata aggregated across a diff, plus reporting helpers.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DiffResult;
use crate::command::SafetyLevel;

/// Per-category record of what a diff found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub collections: CollectionChanges,
    pub fields: FieldChanges,
    pub indexes: IndexChanges,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldChanges {
    /// Field paths declared but not observed
    pub added: Vec<String>,
    /// Field paths observed but not declared
    pub removed: Vec<String>,
    pub modified: Vec<FieldModification>,
    pub renamed: Vec<FieldRename>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldModification {
    pub collection: String,
    pub path: String,
    /// Attributes that differ: any of `type`, `nullable`, `required`, `default`, `enum`
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRename {
    pub collection: String,
    pub from: String,
    pub to: String,
    pub confidence: f64,
}

/// Index names, qualified by collection (`users.phone_1_unique`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeCounts {
    pub fn is_empty(&self) -> bool {
        self.collections.added.is_empty()
            && self.collections.removed.is_empty()
            && self.collections.modified.is_empty()
            && self.fields.added.is_empty()
            && self.fields.removed.is_empty()
            && self.fields.modified.is_empty()
            && self.fields.renamed.is_empty()
            && self.indexes.added.is_empty()
            && self.indexes.removed.is_empty()
    }
}

/// Counts of up commands by safety level and execution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SafetyTally {
    pub safe: usize,
    pub warning: usize,
    pub dangerous: usize,
    pub manual: usize,
}

impl SafetyTally {
    pub fn of(result: &DiffResult) -> Self {
        let mut tally = Self::default();
        for command in &result.up {
            match command.safety_level {
                SafetyLevel::Safe => tally.safe += 1,
                SafetyLevel::Warning => tally.warning += 1,
                SafetyLevel::Dangerous => tally.dangerous += 1,
            }
            if command.is_manual() {
                tally.manual += 1;
            }
        }
        tally
    }
}

impl fmt::Display for SafetyTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} safe, {} warning, {} dangerous ({} manual)",
            self.safe, self.warning, self.dangerous, self.manual
        )
    }
}

/// One-line description of the changes, e.g. `+1 collection, +2 fields, ~1 renamed`.
pub fn summarize(counts: &ChangeCounts) -> String {
    let parts = [
        (counts.collections.added.len(), "+", "collection"),
        (counts.collections.removed.len(), "-", "collection"),
        (counts.fields.added.len(), "+", "field"),
        (counts.fields.removed.len(), "-", "field"),
        (counts.fields.renamed.len(), "~", "renamed field"),
        (counts.fields.modified.len(), "*", "modified field"),
        (counts.indexes.added.len(), "+", "index"),
        (counts.indexes.removed.len(), "-", "index"),
    ];
    let rendered: Vec<String> = parts
        .iter()
        .filter(|(n, _, _)| *n > 0)
        .map(|(n, sign, noun)| {
            let plural = match (*n, *noun) {
                (1, _) => noun.to_string(),
                (_, "index") => "indexes".to_string(),
                _ => format!("{noun}s"),
            };
            format!("{sign}{n} {plural}")
        })
        .collect();
    if rendered.is_empty() {
        "no changes".to_string()
    } else {
        rendered.join(", ")
    }
}
