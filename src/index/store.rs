use std::fs;
use std::path::{Path, PathBuf};

use tantivy::collector::DocSetCollector;
use tantivy::query::TermQuery;
use tantivy::schema::{IndexRecordOption, Schema, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::UpdaterError;
use crate::index::schema::{CoreFields, META_VALUE};
use crate::updater::Watermark;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A tantivy index holding one entity type plus its replication metadata
/// record.
///
/// Mutations are buffered in the writer until [`IndexStore::commit`]; the
/// watermark is written through the same writer so both become visible in a
/// single commit. Dropping the store without committing discards them.
pub struct IndexStore {
    path: PathBuf,
    index: Index,
    fields: CoreFields,
    writer: Option<IndexWriter>,
}

impl IndexStore {
    /// Creates an empty index at `dir` whose metadata record holds `watermark`.
    pub fn create(dir: &Path, schema: Schema, watermark: &Watermark) -> Result<Self, UpdaterError> {
        fs::create_dir_all(dir)?;
        let index = Index::create_in_dir(dir, schema)?;
        let mut store = Self::from_index(dir, index)?;
        store.write_watermark(watermark)?;
        store.commit()?;
        Ok(store)
    }

    pub fn open(dir: &Path) -> Result<Self, UpdaterError> {
        let index = Index::open_in_dir(dir)?;
        Self::from_index(dir, index)
    }

    /// Whether `dir` holds a tantivy index.
    pub fn exists(dir: &Path) -> bool {
        dir.join("meta.json").is_file()
    }

    fn from_index(dir: &Path, index: Index) -> Result<Self, UpdaterError> {
        let fields = CoreFields::resolve(&index.schema())
            .map_err(|_| UpdaterError::IncompatibleIndex(format!("{} is not an entity index", dir.display())))?;
        Ok(Self {
            path: dir.to_path_buf(),
            index,
            fields,
            writer: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> Schema {
        self.index.schema()
    }

    /// Fails unless every field of `expected` exists on disk with the same
    /// options.
    pub fn ensure_schema(&self, expected: &Schema) -> Result<(), UpdaterError> {
        let actual = self.index.schema();
        for (_, entry) in expected.fields() {
            let same = actual
                .get_field(entry.name())
                .map(|f| actual.get_field_entry(f) == entry)
                .unwrap_or(false);
            if !same {
                return Err(UpdaterError::IncompatibleIndex(format!(
                    "field '{}' is missing or was built with other options",
                    entry.name()
                )));
            }
        }
        Ok(())
    }

    fn reader(&self) -> Result<IndexReader, UpdaterError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(reader)
    }

    fn writer(&mut self) -> Result<&mut IndexWriter, UpdaterError> {
        let writer: IndexWriter = match self.writer.take() {
            Some(writer) => writer,
            None => self.index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?,
        };
        Ok(self.writer.insert(writer))
    }

    /// Reads the committed metadata record. Exactly one must exist.
    pub fn read_watermark(&self) -> Result<Watermark, UpdaterError> {
        let searcher = self.reader()?.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.meta, META_VALUE),
            IndexRecordOption::Basic,
        );
        let addresses = searcher.search(&query, &DocSetCollector)?;
        let address = match addresses.len() {
            0 => return Err(UpdaterError::MissingMetadata),
            1 => addresses.into_iter().next().ok_or(UpdaterError::MissingMetadata)?,
            n => return Err(UpdaterError::DuplicateMetadata(n)),
        };

        let doc: TantivyDocument = searcher.doc(address)?;
        let schema_sequence = doc
            .get_first(self.fields.schema_sequence)
            .and_then(|v| v.as_u64())
            .ok_or(UpdaterError::MissingMetadata)?;
        let replication_sequence = doc
            .get_first(self.fields.replication_sequence)
            .and_then(|v| v.as_u64())
            .ok_or(UpdaterError::MissingMetadata)?;
        let last_change_sequence = doc
            .get_first(self.fields.last_change_sequence)
            .and_then(|v| v.as_i64());

        Ok(Watermark {
            schema_sequence: u32::try_from(schema_sequence).map_err(|_| {
                UpdaterError::IncompatibleIndex(format!("schema sequence {} out of range", schema_sequence))
            })?,
            replication_sequence,
            last_change_sequence,
        })
    }

    /// Replaces the metadata record. Visible after the next commit.
    pub fn write_watermark(&mut self, watermark: &Watermark) -> Result<(), UpdaterError> {
        let fields = self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(fields.meta, META_VALUE);
        doc.add_u64(fields.schema_sequence, u64::from(watermark.schema_sequence));
        doc.add_u64(fields.replication_sequence, watermark.replication_sequence);
        if let Some(change) = watermark.last_change_sequence {
            doc.add_i64(fields.last_change_sequence, change);
        }

        let writer = self.writer()?;
        writer.delete_term(Term::from_field_text(fields.meta, META_VALUE));
        writer.add_document(doc)?;
        Ok(())
    }

    /// Removes every document of entity `id`.
    pub fn delete_entity(&mut self, id: i64) -> Result<(), UpdaterError> {
        let id_f = self.fields.id;
        self.writer()?
            .delete_term(Term::from_field_text(id_f, &id.to_string()));
        Ok(())
    }

    pub fn add_document(&mut self, doc: TantivyDocument) -> Result<(), UpdaterError> {
        self.writer()?.add_document(doc)?;
        Ok(())
    }

    /// Makes buffered mutations visible. A no-op when nothing was buffered.
    pub fn commit(&mut self) -> Result<(), UpdaterError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.commit()?;
        }
        Ok(())
    }

    /// Drops buffered mutations and releases the writer lock.
    pub fn rollback(&mut self) -> Result<(), UpdaterError> {
        if let Some(mut writer) = self.writer.take() {
            writer.rollback()?;
        }
        Ok(())
    }

    /// Committed entity documents, excluding the metadata record.
    pub fn num_entities(&self) -> Result<u64, UpdaterError> {
        let searcher = self.reader()?.searcher();
        let meta = TermQuery::new(
            Term::from_field_text(self.fields.meta, META_VALUE),
            IndexRecordOption::Basic,
        );
        let meta_docs = searcher.search(&meta, &DocSetCollector)?.len() as u64;
        Ok(searcher.num_docs().saturating_sub(meta_docs))
    }

    /// Committed documents of entity `id`.
    pub fn documents(&self, id: i64) -> Result<Vec<TantivyDocument>, UpdaterError> {
        let searcher = self.reader()?.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.id, &id.to_string()),
            IndexRecordOption::Basic,
        );
        let mut docs = Vec::new();
        for address in searcher.search(&query, &DocSetCollector)? {
            docs.push(searcher.doc(address)?);
        }
        Ok(docs)
    }
}
