//! Dotted-path access and per-document update semantics shared by the stores.

use serde_json::{Map, Value};

use super::StoreError;
use crate::command::CommandOp;

pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

/// Set a dotted path, creating intermediate objects. Returns `false` when an
/// intermediate segment holds a non-object value.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return false;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return true;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

pub fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parent, leaf)) => {
            let parent = path_mut(doc, parent)?;
            parent.as_object_mut()?.remove(leaf)
        }
        None => doc.as_object_mut()?.remove(path),
    }
}

fn path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object_mut()?.get_mut(segment))
}

/// Match a document against a filter of equality and `$exists`/`$eq`/`$ne`/`$in` clauses.
pub fn matches_filter(doc: &Value, filter: &Value) -> bool {
    let Some(clauses) = filter.as_object() else {
        return filter.is_null();
    };
    clauses.iter().all(|(path, condition)| {
        let actual = get_path(doc, path);
        match condition.as_object() {
            Some(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                ops.iter().all(|(op, operand)| match op.as_str() {
                    "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
                    "$eq" => actual == Some(operand),
                    "$ne" => actual != Some(operand),
                    "$in" => operand
                        .as_array()
                        .is_some_and(|items| actual.is_some_and(|value| items.contains(value))),
                    _ => false,
                })
            }
            _ => actual == Some(condition),
        }
    })
}

/// Apply a field-level update to one document. Returns `true` if it changed.
///
/// `SetField` only touches documents missing the path, so re-running it is a no-op.
/// A target path blocked by a non-object parent is an error and leaves the
/// document as it was.
pub fn apply_update(op: &CommandOp, doc: &mut Value) -> Result<bool, StoreError> {
    match op {
        CommandOp::SetField { collection, path, value } => {
            if get_path(doc, path).is_some() {
                return Ok(false);
            }
            if !set_path(doc, path, value.clone()) {
                return Err(blocked(collection, path));
            }
            Ok(true)
        }
        CommandOp::UnsetField { path, .. } => Ok(remove_path(doc, path).is_some()),
        CommandOp::RenameField { collection, from, to } => {
            let Some(value) = remove_path(doc, from) else {
                return Ok(false);
            };
            if set_path(doc, to, value.clone()) {
                return Ok(true);
            }
            // set_path fails before creating anything, so only the removal needs undoing
            set_path(doc, from, value);
            Err(blocked(collection, to))
        }
        _ => Ok(false),
    }
}

fn blocked(collection: &str, path: &str) -> StoreError {
    StoreError::other(format!(
        "cannot write {collection}.{path}: a parent of the path is not an object"
    ))
}
