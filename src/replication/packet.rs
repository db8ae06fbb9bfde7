use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

use bzip2::read::BzDecoder;

use crate::error::UpdaterError;

use super::change::{split_table_name, ChangeRecord, Operation};
use super::tuple;

/// Ordered batch of row changes with its position in the replication stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationPacket {
    pub replication_sequence: u64,
    pub schema_sequence: u32,
    /// Changes in ascending change id order.
    pub changes: Vec<ChangeRecord>,
}

impl ReplicationPacket {
    /// Highest change id in the packet, `None` when it holds no changes.
    pub fn max_change_id(&self) -> Option<i64> {
        self.changes.iter().map(|c| c.id).max()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Decodes a bzip2-compressed tar archive as published by the packet
    /// repository.
    pub fn from_archive<R: Read>(input: R) -> Result<Self, UpdaterError> {
        let mut archive = tar::Archive::new(BzDecoder::new(input));

        let mut replication_sequence = None;
        let mut schema_sequence = None;
        let mut pending = String::new();
        let mut pending_data = String::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let target = match name.trim_start_matches("./") {
                "REPLICATION_SEQUENCE" => Member::ReplicationSequence,
                "SCHEMA_SEQUENCE" => Member::SchemaSequence,
                "mbdump/dbmirror_pending" | "mbdump/Pending" => Member::Pending,
                "mbdump/dbmirror_pendingdata" | "mbdump/PendingData" => Member::PendingData,
                _ => continue,
            };

            let mut content = String::new();
            entry.read_to_string(&mut content)?;

            match target {
                Member::ReplicationSequence => {
                    replication_sequence = Some(parse_sequence(&content, &name)?)
                }
                Member::SchemaSequence => schema_sequence = Some(parse_sequence(&content, &name)?),
                Member::Pending => pending = content,
                Member::PendingData => pending_data = content,
            }
        }

        let replication_sequence = replication_sequence.ok_or_else(|| {
            UpdaterError::MalformedPacket("archive has no REPLICATION_SEQUENCE member".into())
        })?;
        let schema_sequence = schema_sequence.ok_or_else(|| {
            UpdaterError::MalformedPacket("archive has no SCHEMA_SEQUENCE member".into())
        })?;

        // Data rows are routed by the operation of their change, so every
        // pending row must be known first regardless of member order.
        let mut builder = PacketBuilder::default();
        for line in pending.lines() {
            builder.add_pending_line(line)?;
        }
        for line in pending_data.lines() {
            builder.add_data_line(line)?;
        }
        Ok(builder.finish(replication_sequence, schema_sequence))
    }
}

enum Member {
    ReplicationSequence,
    SchemaSequence,
    Pending,
    PendingData,
}

fn parse_sequence<T: FromStr>(content: &str, member: &str) -> Result<T, UpdaterError> {
    let line = content.lines().next().unwrap_or("").trim();
    line.parse().map_err(|_| {
        UpdaterError::MalformedPacket(format!("{} holds '{}', expected an integer", member, line))
    })
}

/// Accumulates pending and pending-data rows into change records.
///
/// Shared by the archive decoder and the live database feed, which both see
/// the same two-table layout.
#[derive(Debug, Default)]
pub struct PacketBuilder {
    changes: BTreeMap<i64, ChangeRecord>,
}

impl PacketBuilder {
    /// Registers a change from its pending row. Repeated ids keep the first
    /// registration.
    pub fn add_pending(
        &mut self,
        id: i64,
        raw_table: &str,
        op_code: &str,
    ) -> Result<(), UpdaterError> {
        if self.changes.contains_key(&id) {
            return Ok(());
        }
        let operation = Operation::from_code(op_code)?;
        let (schema, table) = split_table_name(raw_table);
        let mut change = ChangeRecord::new(id, table, operation);
        change.schema = schema;
        self.changes.insert(id, change);
        Ok(())
    }

    /// Attaches a tuple-log payload to an already registered change.
    pub fn add_data(&mut self, id: i64, is_new_image: bool, payload: &str) -> Result<(), UpdaterError> {
        let change = self.changes.get_mut(&id).ok_or_else(|| {
            UpdaterError::MalformedPacket(format!("pending data for unknown change #{}", id))
        })?;
        let values = tuple::decode(payload)?;
        change.attach_image(is_new_image, values);
        Ok(())
    }

    /// Parses one tab-separated pending row: change id, table name, op code.
    pub fn add_pending_line(&mut self, line: &str) -> Result<(), UpdaterError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let mut cols = line.split('\t');
        let id = parse_change_id(cols.next(), line)?;
        let (table, op) = match (cols.next(), cols.next()) {
            (Some(table), Some(op)) => (table, op),
            _ => {
                return Err(UpdaterError::MalformedPacket(format!(
                    "pending row has too few columns: '{}'",
                    line
                )))
            }
        };
        self.add_pending(id, table, op)
    }

    /// Parses one tab-separated pending-data row: change id, `t`/`f`, payload.
    pub fn add_data_line(&mut self, line: &str) -> Result<(), UpdaterError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let mut cols = line.splitn(3, '\t');
        let id = parse_change_id(cols.next(), line)?;
        let is_new_image = match cols.next().map(str::trim) {
            Some("t") => true,
            Some("f") => false,
            other => {
                return Err(UpdaterError::MalformedPacket(format!(
                    "pending data row #{} has key flag {:?}, expected 't' or 'f'",
                    id, other
                )))
            }
        };
        // `\N` is the dump's NULL marker: no column values at all.
        let payload = match cols.next() {
            Some("\\N") | None => "",
            Some(payload) => payload,
        };
        self.add_data(id, is_new_image, payload)
    }

    pub fn finish(self, replication_sequence: u64, schema_sequence: u32) -> ReplicationPacket {
        ReplicationPacket {
            replication_sequence,
            schema_sequence,
            changes: self.changes.into_values().collect(),
        }
    }
}

fn parse_change_id(col: Option<&str>, line: &str) -> Result<i64, UpdaterError> {
    col.and_then(|c| c.trim().parse().ok()).ok_or_else(|| {
        UpdaterError::MalformedPacket(format!("row does not start with a change id: '{}'", line))
    })
}
