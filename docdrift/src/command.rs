use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::snapshot::{IndexDefinition, TypeTag, canonical_json};
use crate::store::SessionId;

/// Risk classification attached to every generated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Warning,
    Dangerous,
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyLevel::Safe => f.write_str("safe"),
            SafetyLevel::Warning => f.write_str("warning"),
            SafetyLevel::Dangerous => f.write_str("dangerous"),
        }
    }
}

/// Whether a command joins the transactional batch or must be run by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    #[default]
    Transactional,
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOptions {
    #[serde(default)]
    pub execution: Execution,

    /// Session bound at execution time; never persisted
    #[serde(skip)]
    pub session: Option<SessionId>,
}

/// Typed storage operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum CommandOp {
    CreateCollection {
        collection: String,
    },
    DropCollection {
        collection: String,
    },
    /// Set `path` to `value` on every document that lacks it.
    SetField {
        collection: String,
        path: String,
        value: Value,
    },
    UnsetField {
        collection: String,
        path: String,
    },
    RenameField {
        collection: String,
        from: String,
        to: String,
    },
    CreateIndex {
        collection: String,
        index: IndexDefinition,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    ModifyValidator {
        collection: String,
        #[serde(default)]
        validator: Option<Value>,
    },
    DeleteMany {
        collection: String,
        #[serde(default)]
        filter: Value,
    },
    /// Marker for a type change that needs a human decision. Never executes.
    ReviewTypeChange {
        collection: String,
        path: String,
        from: TypeTag,
        to: TypeTag,
    },
}

impl CommandOp {
    pub fn collection(&self) -> &str {
        match self {
            CommandOp::CreateCollection { collection }
            | CommandOp::DropCollection { collection }
            | CommandOp::SetField { collection, .. }
            | CommandOp::UnsetField { collection, .. }
            | CommandOp::RenameField { collection, .. }
            | CommandOp::CreateIndex { collection, .. }
            | CommandOp::DropIndex { collection, .. }
            | CommandOp::ModifyValidator { collection, .. }
            | CommandOp::DeleteMany { collection, .. }
            | CommandOp::ReviewTypeChange { collection, .. } => collection,
        }
    }

    /// Collection drops, index drops and type reviews are never run inside a session.
    pub fn default_execution(&self) -> Execution {
        match self {
            CommandOp::DropCollection { .. } | CommandOp::DropIndex { .. } | CommandOp::ReviewTypeChange { .. } => {
                Execution::Manual
            }
            _ => Execution::Transactional,
        }
    }

    pub fn is_executable(&self) -> bool {
        !matches!(self, CommandOp::ReviewTypeChange { .. })
    }

    /// Name of the dangerous pattern this operation matches, if any.
    pub fn dangerous_pattern(&self) -> Option<&'static str> {
        match self {
            CommandOp::DropCollection { .. } => Some("collection drop"),
            CommandOp::DropIndex { .. } => Some("index drop"),
            CommandOp::UnsetField { .. } => Some("field unset"),
            CommandOp::DeleteMany { filter, .. } if is_empty_filter(filter) => Some("unconditional delete"),
            _ => None,
        }
    }

    fn render(&self, session: bool) -> String {
        let trailing = if session { ", { session }" } else { "" };
        match self {
            CommandOp::CreateCollection { collection } => {
                format!("db.createCollection({}{trailing})", quote(collection))
            }
            CommandOp::DropCollection { collection } => {
                format!("{}.drop()", handle(collection))
            }
            CommandOp::SetField {
                collection,
                path,
                value,
            } => format!(
                "{}.updateMany({}, {}{trailing})",
                handle(collection),
                canonical_json(&json!({ path.as_str(): { "$exists": false } })),
                canonical_json(&json!({ "$set": { path.as_str(): value } })),
            ),
            CommandOp::UnsetField { collection, path } => format!(
                "{}.updateMany({}, {}{trailing})",
                handle(collection),
                canonical_json(&json!({ path.as_str(): { "$exists": true } })),
                canonical_json(&json!({ "$unset": { path.as_str(): "" } })),
            ),
            CommandOp::RenameField { collection, from, to } => format!(
                "{}.updateMany({}, {}{trailing})",
                handle(collection),
                canonical_json(&json!({ from.as_str(): { "$exists": true } })),
                canonical_json(&json!({ "$rename": { from.as_str(): to } })),
            ),
            CommandOp::CreateIndex { collection, index } => format!(
                "{}.createIndex({}, {}{trailing})",
                handle(collection),
                index.key_spec(),
                canonical_json(&index_options(index)),
            ),
            CommandOp::DropIndex { collection, name } => {
                format!("{}.dropIndex({})", handle(collection), quote(name))
            }
            CommandOp::ModifyValidator { collection, validator } => format!(
                "db.runCommand({}{trailing})",
                canonical_json(&json!({
                    "collMod": collection,
                    "validator": validator.clone().unwrap_or_else(|| json!({})),
                })),
            ),
            CommandOp::DeleteMany { collection, filter } => {
                let filter = if filter.is_null() { json!({}) } else { filter.clone() };
                format!("{}.deleteMany({}{trailing})", handle(collection), canonical_json(&filter))
            }
            CommandOp::ReviewTypeChange {
                collection,
                path,
                from,
                to,
            } => format!("// review type change {collection}.{path}: {from} -> {to}"),
        }
    }
}

fn is_empty_filter(filter: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn handle(collection: &str) -> String {
    format!("db.getCollection({})", quote(collection))
}

/// Options document passed alongside the key spec when creating an index.
pub fn index_options(index: &IndexDefinition) -> Value {
    let mut options = Map::new();
    options.insert("name".into(), Value::String(index.resolved_name()));
    if index.unique {
        options.insert("unique".into(), Value::Bool(true));
    }
    if index.sparse {
        options.insert("sparse".into(), Value::Bool(true));
    }
    if let Some(filter) = &index.partial_filter_expression {
        options.insert("partialFilterExpression".into(), filter.clone());
    }
    if let Some(ttl) = index.ttl_seconds {
        options.insert("expireAfterSeconds".into(), json!(ttl));
    }
    if let Some(collation) = &index.collation {
        options.insert("collation".into(), collation.clone());
    }
    Value::Object(options)
}

impl fmt::Display for CommandOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

/// A typed operation plus its description, risk level and execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCommand {
    pub command: CommandOp,
    pub description: String,
    pub safety_level: SafetyLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub options: CommandOptions,
}

impl MigrationCommand {
    pub fn new(command: CommandOp, description: impl Into<String>, safety_level: SafetyLevel) -> Self {
        let execution = command.default_execution();
        Self {
            command,
            description: description.into(),
            safety_level,
            metadata: None,
            options: CommandOptions {
                execution,
                session: None,
            },
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Manual if the script marks it so or the operation kind always is.
    /// A persisted `transactional` never overrides a drop.
    pub fn is_manual(&self) -> bool {
        self.options.execution == Execution::Manual || self.command.default_execution() == Execution::Manual
    }

    pub fn is_executable(&self) -> bool {
        self.command.is_executable()
    }

    /// Attach the executing session. Manual commands are left unbound.
    pub fn bind_session(&mut self, session: &SessionId) {
        if !self.is_manual() {
            self.options.session = Some(session.clone());
        }
    }

    pub fn clear_session(&mut self) {
        self.options.session = None;
    }
}

impl fmt::Display for MigrationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_manual() && self.command.is_executable() {
            write!(f, "// execute manually: {}", self.command.render(false))
        } else {
            f.write_str(&self.command.render(self.options.session.is_some()))
        }
    }
}
