#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use bzip2::write::BzEncoder;
use bzip2::Compression;
use rusqlite::Connection;
use tantivy::schema::Value;

use mbindex::config::{Config, IndexConfig};
use mbindex::db::SourceDb;
use mbindex::index::{EntityIndex, IndexStore, SqlEntity};
use mbindex::replication::source::packet_file_name;
use mbindex::replication::tuple::{self, Row};
use mbindex::updater::Watermark;

pub const SCHEMA: u32 = 26;

/// Two small entity types: artists (with aliases and tags two hops away)
/// and labels.
pub const CONFIG: &str = r#"
[[index]]
name = "artist"
head_table = "artist"
document_query = "SELECT name, type FROM artist WHERE id = ?1"

[[index.field]]
name = "name"
[[index.field]]
name = "type"
lookup = { "1" = "Person", "2" = "Group" }

[[index.multi_field]]
name = "alias"
query = "SELECT name FROM artist_alias WHERE artist = ?1 ORDER BY name"
[[index.multi_field]]
name = "tag"
query = "SELECT t.name FROM artist_tag at JOIN tag t ON t.id = at.tag WHERE at.artist = ?1 ORDER BY t.name"

[[index.path]]
head = "artist"
[[index.path.join]]
table = "artist_alias"
join_field = "artist"
parent_field = "id"
used_fields = ["name"]

[[index.path]]
head = "artist"
[[index.path.join]]
table = "artist_tag"
join_field = "artist"
parent_field = "id"
[[index.path.join]]
table = "tag"
join_field = "id"
parent_field = "tag"
used_fields = ["name"]

[[index]]
name = "label"
head_table = "label"
document_query = "SELECT name FROM label WHERE id = ?1"

[[index.field]]
name = "name"
"#;

pub fn config() -> Config {
    Config::from_toml(CONFIG).expect("test config should parse")
}

pub fn index_config(name: &str) -> IndexConfig {
    config().index(name).expect("index should exist").clone()
}

/// Source database after packet 10: artists 7 and 42, one label.
pub fn source_db() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    conn.execute_batch(
        "CREATE TABLE artist (id INTEGER PRIMARY KEY, name TEXT, type INTEGER);
         CREATE TABLE artist_alias (id INTEGER PRIMARY KEY, artist INTEGER, name TEXT, edits_pending INTEGER);
         CREATE TABLE tag (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE artist_tag (artist INTEGER, tag INTEGER);
         CREATE TABLE label (id INTEGER PRIMARY KEY, name TEXT);

         CREATE TABLE dbmirror_pending (seqid INTEGER PRIMARY KEY, tablename TEXT, op TEXT, xid INTEGER);
         CREATE TABLE dbmirror_pendingdata (seqid INTEGER, iskey TEXT, data TEXT);
         CREATE TABLE replication_control (current_schema_sequence INTEGER, current_replication_sequence INTEGER);
         INSERT INTO replication_control VALUES (26, 11);

         INSERT INTO artist VALUES (7, 'Seven', 2), (42, 'Old Name', 1);
         INSERT INTO artist_alias VALUES (1, 7, 'The Sevens', 0);
         INSERT INTO tag VALUES (3, 'rock'), (4, 'jazz');
         INSERT INTO artist_tag VALUES (7, 3), (42, 4);
         INSERT INTO label VALUES (1, 'Warp');",
    )
    .expect("fixture schema");
    conn
}

pub fn row(pairs: &[(&str, Option<&str>)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
        .collect()
}

/// One change of a packet under construction.
pub struct Change {
    pub id: i64,
    pub table: &'static str,
    pub op: &'static str,
    pub before: Option<Row>,
    pub after: Option<Row>,
}

impl Change {
    pub fn insert(id: i64, table: &'static str, after: Row) -> Self {
        Self { id, table, op: "i", before: None, after: Some(after) }
    }

    pub fn update(id: i64, table: &'static str, before: Row, after: Row) -> Self {
        Self { id, table, op: "u", before: Some(before), after: Some(after) }
    }

    pub fn delete(id: i64, table: &'static str, before: Row) -> Self {
        Self { id, table, op: "d", before: Some(before), after: None }
    }
}

/// Writes `replication-<seq>.tar.bz2` into `repo`.
pub fn write_packet(repo: &Path, seq: u64, schema: u32, changes: &[Change]) -> PathBuf {
    let mut pending = String::new();
    let mut data = String::new();
    for c in changes {
        pending.push_str(&format!("{}\t\"musicbrainz\".\"{}\"\t{}\n", c.id, c.table, c.op));
        if let Some(before) = &c.before {
            data.push_str(&format!("{}\tf\t{}\n", c.id, tuple::encode(before)));
        }
        if let Some(after) = &c.after {
            data.push_str(&format!("{}\tt\t{}\n", c.id, tuple::encode(after)));
        }
    }

    let members = [
        ("REPLICATION_SEQUENCE", format!("{}\n", seq)),
        ("SCHEMA_SEQUENCE", format!("{}\n", schema)),
        ("mbdump/dbmirror_pending", pending),
        ("mbdump/dbmirror_pendingdata", data),
    ];

    let encoder = BzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in &members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, content.as_bytes())
            .expect("append member");
    }
    let bytes = builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish bzip2");

    fs::create_dir_all(repo).expect("create repo dir");
    let path = repo.join(packet_file_name(seq));
    fs::write(&path, bytes).expect("write packet");
    path
}

/// Creates the index of `name` under `indexes_dir` at `watermark` and
/// indexes every current head row, as a bulk build would.
pub fn build_index(db: &Connection, indexes_dir: &Path, name: &str, watermark: Watermark) -> IndexStore {
    let entity = SqlEntity::new(index_config(name));
    let schema = entity.schema();
    let dir = indexes_dir.join(name);
    let mut store = IndexStore::create(&dir, schema.clone(), &watermark).expect("create index");

    let ids = db
        .query_ids(&format!("SELECT id FROM {} ORDER BY id", entity.head_table()))
        .expect("head ids");
    for id in ids {
        if let Some(doc) = entity.build_document(db, &schema, id).expect("build document") {
            store.add_document(doc).expect("add document");
        }
    }
    store.commit().expect("commit bulk build");
    store
}

/// Stored values of `field` on the documents of entity `id`, one inner list
/// per document.
pub fn stored(store: &IndexStore, id: i64, field: &str) -> Vec<Vec<String>> {
    let schema = store.schema();
    let f = schema.get_field(field).expect("field exists");
    store
        .documents(id)
        .expect("read documents")
        .iter()
        .map(|doc| {
            doc.get_all(f)
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .collect()
}

/// Records `change` in the database's pending-change log.
pub fn add_pending(db: &Connection, change: &Change) {
    db.execute(
        "INSERT INTO dbmirror_pending VALUES (?1, ?2, ?3, 1)",
        rusqlite::params![change.id, format!("\"musicbrainz\".\"{}\"", change.table), change.op],
    )
    .expect("insert pending");
    for (flag, image) in [("f", &change.before), ("t", &change.after)] {
        if let Some(values) = image {
            db.execute(
                "INSERT INTO dbmirror_pendingdata VALUES (?1, ?2, ?3)",
                rusqlite::params![change.id, flag, tuple::encode(values)],
            )
            .expect("insert pending data");
        }
    }
}
