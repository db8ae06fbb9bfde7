use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use reqwest::StatusCode;
use tracing::debug;

use crate::db::SourceDb;
use crate::error::UpdaterError;

use super::packet::{PacketBuilder, ReplicationPacket};

/// Something that can hand out archived packets by replication sequence.
pub trait PacketSource {
    /// Fetches packet `replication_sequence`. `Ok(None)` means the packet does
    /// not exist (yet), which ends replay normally.
    fn fetch(&self, replication_sequence: u64) -> Result<Option<ReplicationPacket>, UpdaterError>;
}

/// File name of an archived packet.
pub fn packet_file_name(replication_sequence: u64) -> String {
    format!("replication-{}.tar.bz2", replication_sequence)
}

/// Where archived packets live.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Dir(PathBuf),
    Url(String),
}

impl Location {
    /// `http://` and `https://` prefixes select a remote repository, anything
    /// else is a local directory.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Location::Url(raw.trim_end_matches('/').to_string())
        } else {
            Location::Dir(PathBuf::from(raw))
        }
    }
}

/// Archived packet repository, local or remote.
pub struct Repository {
    backend: Backend,
    token: Option<String>,
}

enum Backend {
    Dir(PathBuf),
    Http {
        base: String,
        client: reqwest::blocking::Client,
    },
}

impl Repository {
    /// `token` is sent as the `token` query parameter to remote repositories.
    pub fn new(location: Location, token: Option<String>) -> Result<Self, UpdaterError> {
        let backend = match location {
            Location::Dir(dir) => Backend::Dir(dir),
            Location::Url(base) => Backend::Http {
                base,
                client: reqwest::blocking::Client::builder()
                    .user_agent(concat!("mbindex/", env!("CARGO_PKG_VERSION")))
                    .build()?,
            },
        };
        Ok(Self { backend, token })
    }

    fn fetch_local(&self, dir: &Path, seq: u64) -> Result<Option<ReplicationPacket>, UpdaterError> {
        let path = dir.join(packet_file_name(seq));
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "packet not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        ReplicationPacket::from_archive(BufReader::new(file)).map(Some)
    }

    fn fetch_remote(
        &self,
        client: &reqwest::blocking::Client,
        base: &str,
        seq: u64,
    ) -> Result<Option<ReplicationPacket>, UpdaterError> {
        let url = format!("{}/{}", base, packet_file_name(seq));
        let mut request = client.get(&url);
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }
        let response = request.send()?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%url, "packet not found");
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes()?;
        ReplicationPacket::from_archive(Cursor::new(bytes)).map(Some)
    }
}

impl PacketSource for Repository {
    fn fetch(&self, replication_sequence: u64) -> Result<Option<ReplicationPacket>, UpdaterError> {
        match &self.backend {
            Backend::Dir(dir) => self.fetch_local(dir, replication_sequence),
            Backend::Http { base, client } => self.fetch_remote(client, base, replication_sequence),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.backend {
            Backend::Dir(dir) => write!(f, "{}", dir.display()),
            Backend::Http { base, .. } => f.write_str(base),
        }
    }
}

/// Remembers decoded packets so several entity types replaying the same range
/// download and decode each packet once.
pub struct PacketCache<S> {
    inner: S,
    packets: Mutex<HashMap<u64, ReplicationPacket>>,
}

impl<S: PacketSource> PacketCache<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            packets: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: PacketSource> PacketSource for PacketCache<S> {
    fn fetch(&self, replication_sequence: u64) -> Result<Option<ReplicationPacket>, UpdaterError> {
        if let Ok(packets) = self.packets.lock() {
            if let Some(packet) = packets.get(&replication_sequence) {
                return Ok(Some(packet.clone()));
            }
        }
        let fetched = self.inner.fetch(replication_sequence)?;
        if let Some(packet) = &fetched {
            if let Ok(mut packets) = self.packets.lock() {
                packets.insert(replication_sequence, packet.clone());
            }
        }
        Ok(fetched)
    }
}

/// Changes committed in the source database but not yet packaged.
pub struct LiveFeed<'a> {
    db: &'a dyn SourceDb,
}

impl<'a> LiveFeed<'a> {
    pub fn new(db: &'a dyn SourceDb) -> Self {
        Self { db }
    }

    /// Builds a packet from every pending change newer than `last_change_id`.
    /// Its sequence numbers are the database's current replication control
    /// values. Returns `None` when nothing is pending.
    pub fn fetch_since(&self, last_change_id: i64) -> Result<Option<ReplicationPacket>, UpdaterError> {
        let rows = self.db.pending_changes(last_change_id)?;
        let (schema_sequence, replication_sequence) = match rows.first() {
            Some(first) => (first.schema_sequence, first.replication_sequence),
            None => return Ok(None),
        };

        let mut builder = PacketBuilder::default();
        for row in &rows {
            builder.add_pending(row.seq_id, &row.table_name, &row.op)?;
            builder.add_data(row.seq_id, row.is_key, row.data.as_deref().unwrap_or(""))?;
        }
        Ok(Some(builder.finish(replication_sequence, schema_sequence)))
    }
}
