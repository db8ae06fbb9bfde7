mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{row, Change, SCHEMA};
use mbindex::cmd::init::init_index;
use mbindex::cmd::status::index_status;
use mbindex::cmd::update::update_index;
use mbindex::error::UpdaterError;
use mbindex::index::IndexStore;
use mbindex::replication::{Location, PacketCache, PacketSource, ReplicationPacket, Repository};
use mbindex::updater::{UpdateOptions, Watermark};

/// Counts fetches reaching the repository.
struct Counting {
    inner: Repository,
    fetches: Arc<AtomicUsize>,
}

impl PacketSource for Counting {
    fn fetch(&self, seq: u64) -> Result<Option<ReplicationPacket>, UpdaterError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(seq)
    }
}

#[test]
fn indexes_share_cached_packets_and_fail_independently() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    let indexes = tmp.path().join("indexes");
    let db = common::source_db();
    drop(common::build_index(&db, &indexes, "artist", Watermark::new(SCHEMA, 10)));
    drop(common::build_index(&db, &indexes, "label", Watermark::new(SCHEMA, 10)));

    db.execute_batch(
        "UPDATE artist SET name = 'New Name' WHERE id = 42;
         UPDATE label SET name = 'Warp Records' WHERE id = 1;",
    )
    .unwrap();
    common::write_packet(
        &repo,
        11,
        SCHEMA,
        &[
            Change::update(
                100,
                "artist",
                row(&[("id", Some("42")), ("name", Some("Old Name")), ("type", Some("1"))]),
                row(&[("id", Some("42")), ("name", Some("New Name")), ("type", Some("1"))]),
            ),
            Change::update(
                101,
                "label",
                row(&[("id", Some("1")), ("name", Some("Warp"))]),
                row(&[("id", Some("1")), ("name", Some("Warp Records"))]),
            ),
        ],
    );

    let fetches = Arc::new(AtomicUsize::new(0));
    let packets = PacketCache::new(Counting {
        inner: Repository::new(Location::Dir(repo.clone()), None).unwrap(),
        fetches: fetches.clone(),
    });
    let options = UpdateOptions::default();
    let config = common::config();

    let artist = update_index(config.index("artist").unwrap(), &db, &packets, &indexes, &options).unwrap();
    let label = update_index(config.index("label").unwrap(), &db, &packets, &indexes, &options).unwrap();
    assert_eq!(artist.reindexed, 1);
    assert_eq!(label.reindexed, 1);

    // a missing index fails on its own
    let mut ghost = config.index("label").unwrap().clone();
    ghost.name = "ghost".to_string();
    assert!(update_index(&ghost, &db, &packets, &indexes, &options).is_err());
    // packet 11 once, then the missing packet 12 once per index
    assert_eq!(fetches.load(Ordering::SeqCst), 3);

    let status = index_status(&indexes, "label");
    assert_eq!(status.watermark.map(|w| w.replication_sequence), Some(11));
    assert_eq!(status.documents, Some(1));
    let store = IndexStore::open(&indexes.join("label")).unwrap();
    assert_eq!(common::stored(&store, 1, "name"), vec![vec!["Warp Records".to_string()]]);
}

#[test]
fn init_creates_empty_index_once() {
    let tmp = tempfile::tempdir().unwrap();
    let indexes = tmp.path().join("indexes");
    let config = common::config();
    let label = config.index("label").unwrap();
    let wm = Watermark {
        last_change_sequence: Some(5),
        ..Watermark::new(SCHEMA, 3)
    };

    init_index(label, &indexes, &wm).unwrap();
    let status = index_status(&indexes, "label");
    assert_eq!(status.watermark, Some(wm));
    assert_eq!(status.documents, Some(0));
    assert!(status.error.is_none());

    assert!(init_index(label, &indexes, &wm).is_err());
}

#[test]
fn status_of_missing_index() {
    let tmp = tempfile::tempdir().unwrap();
    let status = index_status(tmp.path(), "artist");
    assert!(status.watermark.is_none());
    assert_eq!(status.error.as_deref(), Some("not initialized"));
}

#[test]
fn update_rejects_index_built_with_other_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let indexes = tmp.path().join("indexes");
    let db = common::source_db();
    drop(common::build_index(&db, &indexes, "label", Watermark::new(SCHEMA, 10)));

    let mut changed = common::index_config("label");
    changed.document_query = "SELECT name, name AS sort_name FROM label WHERE id = ?1".to_string();
    changed.fields.push(mbindex::config::FieldConfig {
        name: "sort_name".to_string(),
        lookup: Default::default(),
    });

    let packets = Repository::new(Location::Dir(tmp.path().join("repo")), None).unwrap();
    let err = update_index(&changed, &db, &packets, &indexes, &UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, UpdaterError::IncompatibleIndex(_)));
}
