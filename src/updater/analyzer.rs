//! Classification of row changes into entity ids to delete and join keys to
//! resolve.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::db::SourceDb;
use crate::dependencies::DependencyGraph;
use crate::error::UpdaterError;
use crate::replication::tuple::Row;
use crate::replication::{ChangeRecord, Operation, ReplicationPacket};

/// Accumulated effect of the changes classified so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Head ids whose row was deleted.
    pub deleted: BTreeSet<i64>,
    /// Join-key values per changed table, head table included.
    pub table_keys: BTreeMap<String, BTreeSet<i64>>,
    pub analyzed: usize,
    pub skipped: usize,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.deleted.is_empty() || self.table_keys.values().any(|k| !k.is_empty())
    }

    fn add_keys(&mut self, table: &str, keys: impl IntoIterator<Item = i64>) {
        self.table_keys
            .entry(table.to_string())
            .or_default()
            .extend(keys);
    }
}

/// Entity ids to act on once a change set has been resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affected {
    pub to_delete: BTreeSet<i64>,
    pub to_reindex: BTreeSet<i64>,
}

/// Folds every change of `packet` newer than `last_change` into `changes`.
pub fn classify_packet(
    graph: &DependencyGraph,
    packet: &ReplicationPacket,
    last_change: Option<i64>,
    mut changes: ChangeSet,
) -> Result<ChangeSet, UpdaterError> {
    for change in &packet.changes {
        if last_change.is_some_and(|last| change.id <= last) {
            debug!(index = graph.entity(), change = change.id, "skipping change already applied");
            changes.skipped += 1;
            continue;
        }
        changes = classify_change(graph, change, changes)?;
    }
    Ok(changes)
}

pub fn classify_change(
    graph: &DependencyGraph,
    change: &ChangeRecord,
    mut changes: ChangeSet,
) -> Result<ChangeSet, UpdaterError> {
    let Some(relation) = graph.relation(&change.table) else {
        return Ok(changes);
    };
    changes.analyzed += 1;

    if relation.is_head() {
        let id_column = graph.id_column();
        match change.operation {
            Operation::Delete => {
                changes.deleted.extend(key_of(change, &change.before, id_column)?);
            }
            Operation::Insert => {
                let keys = key_of(change, &change.after, id_column)?;
                changes.add_keys(&change.table, keys);
            }
            Operation::Update => {
                let old = key_of(change, &change.before, id_column)?;
                let new = key_of(change, &change.after, id_column)?;
                changes.add_keys(&change.table, old.into_iter().chain(new));
            }
        }
        debug!(index = graph.entity(), change = change.id, table = %change.table, op = %change.operation, "head row changed");
        return Ok(changes);
    }

    let Some(join_field) = relation.join_field() else {
        return Ok(changes);
    };

    let keys: BTreeSet<i64> = match change.operation {
        Operation::Insert => key_of(change, &change.after, join_field)?.into_iter().collect(),
        Operation::Delete => key_of(change, &change.before, join_field)?.into_iter().collect(),
        Operation::Update => {
            if !relation.used_fields.is_empty() {
                let changed = change.changed_fields();
                if relation.used_fields.is_disjoint(&changed) {
                    debug!(
                        index = graph.entity(),
                        change = change.id,
                        table = %change.table,
                        "no indexed column changed"
                    );
                    return Ok(changes);
                }
            }
            let old = key_of(change, &change.before, join_field)?;
            let new = key_of(change, &change.after, join_field)?;
            old.into_iter().chain(new).collect()
        }
    };
    debug!(
        index = graph.entity(),
        change = change.id,
        table = %change.table,
        op = %change.operation,
        keys = ?keys,
        "dependent row changed"
    );
    changes.add_keys(&change.table, keys);
    Ok(changes)
}

/// Integer value of `column` in `image`; empty when the column is NULL.
fn key_of(change: &ChangeRecord, image: &Row, column: &str) -> Result<Option<i64>, UpdaterError> {
    let value = image.get(column).ok_or_else(|| UpdaterError::InvalidChange {
        change_id: change.id,
        message: format!(
            "{} on {} does not carry column '{}'; packets must include full row images",
            change.operation, change.table, column
        ),
    })?;
    match value {
        None => Ok(None),
        Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| UpdaterError::InvalidChange {
            change_id: change.id,
            message: format!("{}.{} is not an integer key: '{}'", change.table, column, raw),
        }),
    }
}

/// Maps accumulated join keys to head ids. Deleted ids pass through unchanged.
pub fn resolve(
    graph: &DependencyGraph,
    db: &dyn SourceDb,
    changes: &ChangeSet,
) -> Result<Affected, UpdaterError> {
    let mut to_reindex = BTreeSet::new();
    for (table, keys) in &changes.table_keys {
        to_reindex.extend(graph.resolve(db, table, keys)?);
    }
    Ok(Affected {
        to_delete: changes.deleted.clone(),
        to_reindex,
    })
}
