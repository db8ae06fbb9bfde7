//! Read access to the source database.
//!
//! The updater only reads: entity resolution queries, document queries and
//! the pending-change log. The bundled implementation targets an SQLite
//! mirror through `rusqlite`.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};

use crate::error::UpdaterError;
use crate::replication::tuple::Row;

/// One joined row of the pending-change log.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChangeRow {
    pub seq_id: i64,
    pub table_name: String,
    pub op: String,
    /// `true` when `data` is the new row image of an update.
    pub is_key: bool,
    pub data: Option<String>,
    pub schema_sequence: u32,
    pub replication_sequence: u64,
}

pub trait SourceDb {
    /// Runs `sql` and returns the integer first column of every row.
    fn query_ids(&self, sql: &str) -> Result<Vec<i64>, UpdaterError>;

    /// Runs `sql` with `id` bound to `?1` and returns each row as a column map.
    fn query_rows(&self, sql: &str, id: i64) -> Result<Vec<Row>, UpdaterError>;

    /// Pending changes with a sequence id above `after`, ordered by id.
    fn pending_changes(&self, after: i64) -> Result<Vec<PendingChangeRow>, UpdaterError>;

    /// Number of rows in `table`.
    fn count_rows(&self, table: &str) -> Result<u64, UpdaterError>;
}

const PENDING_CHANGES_SQL: &str = "SELECT p.seqid, p.tablename, p.op, pd.iskey, pd.data, \
            r.current_schema_sequence, r.current_replication_sequence \
     FROM dbmirror_pending p \
     JOIN dbmirror_pendingdata pd ON (p.seqid = pd.seqid) \
     CROSS JOIN replication_control r \
     WHERE p.seqid > ?1 \
     ORDER BY p.seqid, pd.iskey";

impl SourceDb for Connection {
    fn query_ids(&self, sql: &str) -> Result<Vec<i64>, UpdaterError> {
        let mut stmt = self.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn query_rows(&self, sql: &str, id: i64) -> Result<Vec<Row>, UpdaterError> {
        let mut stmt = self.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut rows = stmt.query(params![id])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Row::new();
            for (i, name) in names.iter().enumerate() {
                values.insert(name.clone(), value_to_string(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn pending_changes(&self, after: i64) -> Result<Vec<PendingChangeRow>, UpdaterError> {
        let mut stmt = self.prepare(PENDING_CHANGES_SQL)?;
        let rows = stmt
            .query_map(params![after], |row| {
                Ok(PendingChangeRow {
                    seq_id: row.get(0)?,
                    table_name: row.get(1)?,
                    op: row.get(2)?,
                    is_key: value_to_flag(row.get_ref(3)?),
                    data: value_to_string(row.get_ref(4)?),
                    schema_sequence: row.get(5)?,
                    replication_sequence: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count_rows(&self, table: &str) -> Result<u64, UpdaterError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = self.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Renders a column value as text, `None` for NULL. Blobs are not indexable.
fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Accepts the boolean spellings a mirrored `iskey` column may carry.
fn value_to_flag(value: ValueRef<'_>) -> bool {
    match value {
        ValueRef::Integer(i) => i != 0,
        ValueRef::Text(t) => matches!(t, b"t" | b"true" | b"1"),
        _ => false,
    }
}
