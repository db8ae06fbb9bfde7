//! Declarative description of the indexed entity types: where their documents
//! come from and which tables they depend on.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::UpdaterError;

/// Configuration shipped with the binary, covering the core MusicBrainz
/// entity types.
pub const MUSICBRAINZ_CONFIG: &str = include_str!("../config/musicbrainz.toml");

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "index", default)]
    pub indexes: Vec<IndexConfig>,
}

/// One entity type.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    pub name: String,
    pub head_table: String,
    /// Primary key column of the head table.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Single-row query producing the document's scalar fields; `?1` is the
    /// entity id.
    pub document_query: String,
    #[serde(rename = "field", default)]
    pub fields: Vec<FieldConfig>,
    #[serde(rename = "multi_field", default)]
    pub multi_fields: Vec<MultiFieldConfig>,
    #[serde(rename = "path", default)]
    pub paths: Vec<PathConfig>,
}

/// A column of `document_query` copied into the document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    /// Stored ordinal → display name, for columns holding enum ordinals.
    #[serde(default)]
    pub lookup: BTreeMap<String, String>,
}

/// A field filled from every row of its own query; `?1` is the entity id.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiFieldConfig {
    pub name: String,
    pub query: String,
}

/// A chain of joins from the head table down to a leaf table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    pub head: Option<String>,
    /// Ordered from the table next to the head down to the leaf.
    #[serde(rename = "join", default)]
    pub joins: Vec<JoinConfig>,
}

/// `table.join_field = previous.parent_field`, where `previous` is the head
/// for the first join of a path.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinConfig {
    pub table: String,
    pub join_field: Option<String>,
    pub parent_field: Option<String>,
    /// Columns of `table` that feed the index; empty means all of them.
    #[serde(default)]
    pub used_fields: Vec<String>,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, UpdaterError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, UpdaterError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn musicbrainz() -> Result<Self, UpdaterError> {
        Self::from_toml(MUSICBRAINZ_CONFIG)
    }

    pub fn index(&self, name: &str) -> Result<&IndexConfig, UpdaterError> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| UpdaterError::UnknownEntity(name.to_string()))
    }

    /// Indexes named in `names`, in the order given; all indexes when empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<&IndexConfig>, UpdaterError> {
        if names.is_empty() {
            return Ok(self.indexes.iter().collect());
        }
        names.iter().map(|n| self.index(n)).collect()
    }

    fn validate(&self) -> Result<(), UpdaterError> {
        let mut seen = std::collections::HashSet::new();
        for index in &self.indexes {
            if !seen.insert(index.name.as_str()) {
                return Err(UpdaterError::InvalidConfig(format!(
                    "index '{}' is declared twice",
                    index.name
                )));
            }
            let field_names = index
                .fields
                .iter()
                .map(|f| f.name.as_str())
                .chain(index.multi_fields.iter().map(|f| f.name.as_str()));
            let mut names = std::collections::HashSet::new();
            for name in field_names {
                if name.starts_with('_') {
                    return Err(UpdaterError::InvalidConfig(format!(
                        "index '{}': field names starting with '_' are reserved ({})",
                        index.name, name
                    )));
                }
                if !names.insert(name) {
                    return Err(UpdaterError::InvalidConfig(format!(
                        "index '{}': field '{}' is declared twice",
                        index.name, name
                    )));
                }
            }
        }
        Ok(())
    }
}
