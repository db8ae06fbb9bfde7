use std::collections::BTreeSet;
use std::fmt;

use crate::error::UpdaterError;

use super::tuple::Row;

/// Row-level operation recorded by the replication trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Parses the one-letter op code used in pending tables (`i`, `u`, `d`).
    pub fn from_code(code: &str) -> Result<Self, UpdaterError> {
        match code.trim() {
            "i" => Ok(Operation::Insert),
            "u" => Ok(Operation::Update),
            "d" => Ok(Operation::Delete),
            other => Err(UpdaterError::MalformedPacket(format!(
                "unknown operation code '{}'",
                other
            ))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Operation::Insert => "i",
            Operation::Update => "u",
            Operation::Delete => "d",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// One row mutation from the change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub id: i64,
    pub schema: Option<String>,
    pub table: String,
    pub operation: Operation,
    /// Row image before the change (UPDATE, DELETE).
    pub before: Row,
    /// Row image after the change (INSERT, UPDATE).
    pub after: Row,
}

impl ChangeRecord {
    pub fn new(id: i64, table: impl Into<String>, operation: Operation) -> Self {
        Self {
            id,
            schema: None,
            table: table.into(),
            operation,
            before: Row::new(),
            after: Row::new(),
        }
    }

    /// Columns present in both images whose values differ.
    ///
    /// Two NULLs compare equal. A column missing from either image is not
    /// reported, since a partial image says nothing about that column.
    pub fn changed_fields(&self) -> BTreeSet<String> {
        self.before
            .iter()
            .filter_map(|(column, old)| match self.after.get(column) {
                Some(new) if new != old => Some(column.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stores a decoded tuple payload on the image that `operation` implies.
    ///
    /// `is_new_image` is the pending-data sub-opcode (`t` = new image,
    /// `f` = old image) and only matters for updates.
    pub fn attach_image(&mut self, is_new_image: bool, values: Row) {
        match self.operation {
            Operation::Insert => self.after = values,
            Operation::Delete => self.before = values,
            Operation::Update if is_new_image => self.after = values,
            Operation::Update => self.before = values,
        }
    }
}

/// Splits a `"schema"."table"` (or bare `"table"`) pending-table name.
pub fn split_table_name(raw: &str) -> (Option<String>, String) {
    let raw = raw.trim();
    let (schema, table) = match raw.rsplit_once("\".\"") {
        Some((schema, table)) => (Some(schema), table),
        None => match raw.rsplit_once('.') {
            Some((schema, table)) if !raw.starts_with('"') || schema.ends_with('"') => {
                (Some(schema), table)
            }
            _ => (None, raw),
        },
    };
    let unquote = |s: &str| s.trim_matches('"').to_string();
    (schema.map(unquote), unquote(table))
}
