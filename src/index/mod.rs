//! Tantivy side of the updater: per-entity schema, document building and the
//! on-disk index with its replication metadata record.

pub mod entity;
pub mod schema;
pub mod store;

pub use entity::{EntityIndex, SqlEntity};
pub use store::IndexStore;
