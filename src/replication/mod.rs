//! Replication change log: tuple payloads, change records, packets and the
//! places packets come from.

pub mod change;
pub mod packet;
pub mod source;
pub mod tuple;

pub use change::{ChangeRecord, Operation};
pub use packet::ReplicationPacket;
pub use source::{LiveFeed, Location, PacketCache, PacketSource, Repository};
