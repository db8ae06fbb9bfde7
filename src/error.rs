use std::fmt;

/// Structured error type for index update operations.
///
/// Callers distinguish expected stops (never represented here: a missing
/// packet is `Ok(None)`) from structural, consistency and I/O failures so the
/// driver can report one entity type as failed while the others proceed.
#[derive(Debug)]
pub enum UpdaterError {
    /// File system I/O failure (packet archive, index directory).
    Io(std::io::Error),
    /// Remote packet repository failure other than "not found".
    Http(reqwest::Error),
    /// Source database query failure.
    Database(rusqlite::Error),
    /// Tantivy index operation failure (open, create, search, commit).
    Tantivy(tantivy::TantivyError),
    /// Configuration document could not be parsed.
    Config(toml::de::Error),
    /// Configuration parsed but describes an unusable index.
    InvalidConfig(String),
    /// The index on disk was built with different fields than configured.
    IncompatibleIndex(String),
    /// A tuple-log payload could not be decoded.
    TupleLog { position: usize, message: String },
    /// A replication packet is missing a member or holds an unparseable row.
    MalformedPacket(String),
    /// A dependency path declaration is incomplete or inconsistent.
    InvalidDependency(String),
    /// A change lacks the information needed to classify it.
    InvalidChange { change_id: i64, message: String },
    /// A packet was produced against another database schema than the index.
    SchemaChanged {
        index: String,
        found: u32,
        expected: u32,
    },
    /// The index carries no replication metadata record.
    MissingMetadata,
    /// The index carries more than one replication metadata record.
    DuplicateMetadata(usize),
    /// An entity type was requested that the configuration does not declare.
    UnknownEntity(String),
}

impl fmt::Display for UpdaterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterError::Io(e) => write!(f, "{}", e),
            UpdaterError::Http(e) => write!(f, "packet repository error: {}", e),
            UpdaterError::Database(e) => write!(f, "database error: {}", e),
            UpdaterError::Tantivy(e) => write!(f, "{}", e),
            UpdaterError::Config(e) => write!(f, "configuration error: {}", e),
            UpdaterError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            UpdaterError::IncompatibleIndex(msg) => {
                write!(f, "index does not match its configuration: {}", msg)
            }
            UpdaterError::TupleLog { position, message } => {
                write!(f, "malformed tuple data at offset {}: {}", position, message)
            }
            UpdaterError::MalformedPacket(msg) => write!(f, "malformed replication packet: {}", msg),
            UpdaterError::InvalidDependency(msg) => write!(f, "invalid dependency declaration: {}", msg),
            UpdaterError::InvalidChange { change_id, message } => {
                write!(f, "change #{}: {}", change_id, message)
            }
            UpdaterError::SchemaChanged {
                index,
                found,
                expected,
            } => write!(
                f,
                "index {} is at schema sequence {} but packet has {}; rebuild or migrate the index",
                index, expected, found
            ),
            UpdaterError::MissingMetadata => {
                write!(f, "index has no replication metadata; was it built with replication info?")
            }
            UpdaterError::DuplicateMetadata(count) => {
                write!(f, "index has {} replication metadata records, expected exactly one", count)
            }
            UpdaterError::UnknownEntity(name) => write!(f, "unknown index: {}", name),
        }
    }
}

impl std::error::Error for UpdaterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdaterError::Io(e) => Some(e),
            UpdaterError::Http(e) => Some(e),
            UpdaterError::Database(e) => Some(e),
            UpdaterError::Tantivy(e) => Some(e),
            UpdaterError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for UpdaterError {
    fn from(e: std::io::Error) -> Self {
        UpdaterError::Io(e)
    }
}

impl From<reqwest::Error> for UpdaterError {
    fn from(e: reqwest::Error) -> Self {
        UpdaterError::Http(e)
    }
}

impl From<rusqlite::Error> for UpdaterError {
    fn from(e: rusqlite::Error) -> Self {
        UpdaterError::Database(e)
    }
}

impl From<tantivy::TantivyError> for UpdaterError {
    fn from(e: tantivy::TantivyError) -> Self {
        UpdaterError::Tantivy(e)
    }
}

impl From<toml::de::Error> for UpdaterError {
    fn from(e: toml::de::Error) -> Self {
        UpdaterError::Config(e)
    }
}
