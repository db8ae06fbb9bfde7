use std::fmt;

use serde::Serialize;

use crate::replication::ReplicationPacket;

/// How far replay has progressed for one index.
///
/// Ordering compares schema sequence, then replication sequence, then the
/// last applied change id, with a missing change id sorting first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Watermark {
    pub schema_sequence: u32,
    pub replication_sequence: u64,
    pub last_change_sequence: Option<i64>,
}

impl Watermark {
    pub fn new(schema_sequence: u32, replication_sequence: u64) -> Self {
        Self {
            schema_sequence,
            replication_sequence,
            last_change_sequence: None,
        }
    }

    /// Whether change `id` is already reflected in the index.
    pub fn covers(&self, change_id: i64) -> bool {
        self.last_change_sequence.is_some_and(|last| change_id <= last)
    }

    /// Position after fully applying `packet`. A packet without changes keeps
    /// the previous change id, and the replication sequence never moves back.
    pub fn advanced_past(&self, packet: &ReplicationPacket) -> Self {
        Self {
            schema_sequence: packet.schema_sequence,
            replication_sequence: self.replication_sequence.max(packet.replication_sequence),
            last_change_sequence: match (self.last_change_sequence, packet.max_change_id()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "schema_sequence={}, replication_sequence={}, change_sequence=",
            self.schema_sequence, self.replication_sequence
        )?;
        match self.last_change_sequence {
            Some(c) => write!(f, "{}", c),
            None => Ok(()),
        }
    }
}
