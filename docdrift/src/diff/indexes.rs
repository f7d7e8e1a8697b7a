use std::collections::BTreeMap;

use super::Plan;
use crate::command::{CommandOp, MigrationCommand, SafetyLevel};
use crate::snapshot::IndexDefinition;

pub(crate) fn create_index(collection: &str, index: &IndexDefinition) -> MigrationCommand {
    MigrationCommand::new(
        CommandOp::CreateIndex {
            collection: collection.to_string(),
            index: index.clone(),
        },
        format!("Create index {} on {collection}", index.resolved_name()),
        SafetyLevel::Safe,
    )
}

pub(crate) fn drop_index(collection: &str, index: &IndexDefinition) -> MigrationCommand {
    MigrationCommand::new(
        CommandOp::DropIndex {
            collection: collection.to_string(),
            name: index.resolved_name(),
        },
        format!("Drop index {} on {collection}", index.resolved_name()),
        SafetyLevel::Warning,
    )
}

pub(crate) fn create_all(collection: &str, indexes: &[IndexDefinition]) -> Vec<MigrationCommand> {
    by_signature(indexes)
        .values()
        .map(|index| create_index(collection, index))
        .collect()
}

fn by_signature(indexes: &[IndexDefinition]) -> BTreeMap<String, &IndexDefinition> {
    indexes.iter().map(|index| (index.signature(), index)).collect()
}

/// Set difference of index signatures.
pub(crate) fn diff_indexes(
    plan: &mut Plan<'_>,
    collection: &str,
    observed: &[IndexDefinition],
    declared: &[IndexDefinition],
) {
    let observed = by_signature(observed);
    let declared = by_signature(declared);

    for (signature, index) in &declared {
        if observed.contains_key(signature) {
            continue;
        }
        plan.push(vec![create_index(collection, index)], vec![drop_index(collection, index)]);
        plan.metadata
            .indexes
            .added
            .push(format!("{collection}.{}", index.resolved_name()));
    }

    for (signature, index) in &observed {
        if declared.contains_key(signature) {
            continue;
        }
        let name = index.resolved_name();
        if let Some(ttl) = index.ttl_seconds {
            plan.warn(format!(
                "Dropping TTL index {collection}.{name} stops expiry after {ttl}s; documents will no longer be removed automatically"
            ));
        } else {
            plan.warn(format!("Index {collection}.{name} is not declared and will be dropped"));
        }
        plan.push(vec![drop_index(collection, index)], vec![create_index(collection, index)]);
        plan.metadata.indexes.removed.push(format!("{collection}.{name}"));
    }
}
