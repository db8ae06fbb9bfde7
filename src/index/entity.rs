use tantivy::schema::Schema;
use tantivy::TantivyDocument;

use crate::config::IndexConfig;
use crate::db::SourceDb;
use crate::error::UpdaterError;
use crate::index::schema::{build_schema, ID_FIELD};

/// An indexable entity type.
pub trait EntityIndex {
    fn name(&self) -> &str;

    /// Table whose primary key is the entity id.
    fn head_table(&self) -> &str;

    fn identifier_field(&self) -> &str {
        ID_FIELD
    }

    fn schema(&self) -> Schema;

    /// Builds the document of entity `id` from the source database, or
    /// `None` when the entity no longer exists.
    fn build_document(
        &self,
        db: &dyn SourceDb,
        schema: &Schema,
        id: i64,
    ) -> Result<Option<TantivyDocument>, UpdaterError>;
}

/// Entity type described entirely by configuration queries.
#[derive(Debug, Clone)]
pub struct SqlEntity {
    config: IndexConfig,
}

impl SqlEntity {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }
}

impl EntityIndex for SqlEntity {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn head_table(&self) -> &str {
        &self.config.head_table
    }

    fn schema(&self) -> Schema {
        build_schema(
            self.config
                .fields
                .iter()
                .map(|f| f.name.as_str())
                .chain(self.config.multi_fields.iter().map(|f| f.name.as_str())),
        )
    }

    fn build_document(
        &self,
        db: &dyn SourceDb,
        schema: &Schema,
        id: i64,
    ) -> Result<Option<TantivyDocument>, UpdaterError> {
        let rows = db.query_rows(&self.config.document_query, id)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let mut doc = TantivyDocument::default();
        doc.add_text(schema.get_field(self.identifier_field())?, &id.to_string());

        for field in &self.config.fields {
            let value = row.get(&field.name).ok_or_else(|| {
                UpdaterError::InvalidConfig(format!(
                    "index '{}': document query has no column '{}'",
                    self.config.name, field.name
                ))
            })?;
            let Some(value) = value else { continue };
            let text = field.lookup.get(value).unwrap_or(value);
            doc.add_text(schema.get_field(&field.name)?, text);
        }

        for multi in &self.config.multi_fields {
            let target = schema.get_field(&multi.name)?;
            for values in db.query_rows(&multi.query, id)? {
                if values.len() != 1 {
                    return Err(UpdaterError::InvalidConfig(format!(
                        "index '{}': query of '{}' must return exactly one column",
                        self.config.name, multi.name
                    )));
                }
                if let Some(Some(value)) = values.into_values().next() {
                    doc.add_text(target, &value);
                }
            }
        }

        Ok(Some(doc))
    }
}
