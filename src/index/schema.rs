use tantivy::schema::{Field, Schema, INDEXED, STORED, STRING, TEXT};

use crate::error::UpdaterError;

/// Entity identifier, untokenized so it can be used for `delete_term`.
pub const ID_FIELD: &str = "_id";
/// Marker field present only on the replication metadata record.
pub const META_FIELD: &str = "_meta";
pub const META_VALUE: &str = "1";
pub const SCHEMA_SEQUENCE_FIELD: &str = "_schema_sequence";
pub const REPLICATION_SEQUENCE_FIELD: &str = "_replication_sequence";
pub const LAST_CHANGE_SEQUENCE_FIELD: &str = "_last_change_sequence";

/// Builds the tantivy schema of an entity index.
///
/// Fields:
/// - `_id`: entity id as text, untokenized and stored
/// - `_meta`, `_schema_sequence`, `_replication_sequence`,
///   `_last_change_sequence`: set only on the metadata record
/// - one tokenized, stored text field per entry of `text_fields`
pub fn build_schema<'a>(text_fields: impl IntoIterator<Item = &'a str>) -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field(ID_FIELD, STRING | STORED);

    builder.add_text_field(META_FIELD, STRING);
    builder.add_u64_field(SCHEMA_SEQUENCE_FIELD, STORED);
    builder.add_u64_field(REPLICATION_SEQUENCE_FIELD, STORED);
    builder.add_i64_field(LAST_CHANGE_SEQUENCE_FIELD, STORED | INDEXED);

    for name in text_fields {
        builder.add_text_field(name, TEXT | STORED);
    }

    builder.build()
}

/// Handles of the fields every entity index carries.
#[derive(Debug, Clone, Copy)]
pub struct CoreFields {
    pub id: Field,
    pub meta: Field,
    pub schema_sequence: Field,
    pub replication_sequence: Field,
    pub last_change_sequence: Field,
}

impl CoreFields {
    pub fn resolve(schema: &Schema) -> Result<Self, UpdaterError> {
        Ok(Self {
            id: schema.get_field(ID_FIELD)?,
            meta: schema.get_field(META_FIELD)?,
            schema_sequence: schema.get_field(SCHEMA_SEQUENCE_FIELD)?,
            replication_sequence: schema.get_field(REPLICATION_SEQUENCE_FIELD)?,
            last_change_sequence: schema.get_field(LAST_CHANGE_SEQUENCE_FIELD)?,
        })
    }
}
