use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::{error, info};

use crate::cmd::{index_dir, load_target, UpdateArgs};
use crate::config::IndexConfig;
use crate::db::SourceDb;
use crate::dependencies::DependencyGraph;
use crate::error::UpdaterError;
use crate::index::{EntityIndex, IndexStore, SqlEntity};
use crate::replication::{Location, PacketCache, PacketSource, Repository};
use crate::updater::{IncrementalUpdater, UpdateOptions, UpdateStats};

#[derive(Serialize)]
struct IndexReport<'a> {
    index: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a UpdateStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(args: &UpdateArgs) {
    let config = load_target(&args.target);
    let selected = match config.select(&args.target.index) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    let db = match Connection::open_with_flags(&args.database, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("error: cannot open database {}: {}", args.database.display(), err);
            std::process::exit(1);
        }
    };

    let repository = match Repository::new(Location::parse(&args.repository), args.token.clone()) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };
    info!("using packet repository {}", repository);
    let packets = PacketCache::new(repository);

    let options = UpdateOptions {
        live: args.live,
        max_packets: args.max_packets,
        cancel: None,
    };

    // indexes are independent: one failing does not stop the others
    let mut results = Vec::new();
    for index in &selected {
        let result = update_index(index, &db, &packets, &args.target.indexes_dir, &options);
        if let Err(err) = &result {
            error!(index = %index.name, "update failed: {}", err);
        }
        results.push((index.name.as_str(), result));
    }

    if args.json {
        let reports: Vec<IndexReport> = results
            .iter()
            .map(|(name, result)| IndexReport {
                index: name,
                stats: result.as_ref().ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .collect();
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(err) => eprintln!("error: failed to serialize results: {}", err),
        }
    } else {
        for (name, result) in &results {
            match result {
                Ok(stats) => eprintln!("{}", summary(name, stats)),
                Err(err) => eprintln!("{}: failed: {}", name, err),
            }
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        eprintln!("error: {} of {} indexes failed", failed, results.len());
        std::process::exit(1);
    }
}

/// Runs one update cycle for the index of `config` under `indexes_dir`.
pub fn update_index(
    config: &IndexConfig,
    db: &dyn SourceDb,
    packets: &dyn PacketSource,
    indexes_dir: &Path,
    options: &UpdateOptions,
) -> Result<UpdateStats, UpdaterError> {
    let graph = DependencyGraph::from_config(config)?;
    let entity = SqlEntity::new(config.clone());
    let mut store = IndexStore::open(&index_dir(indexes_dir, entity.name()))?;
    store.ensure_schema(&entity.schema())?;

    info!(index = entity.name(), "started updating index");
    let stats = IncrementalUpdater::new(&entity, &graph, db, packets).run(&mut store, options)?;
    info!(
        index = entity.name(),
        elapsed_ms = stats.elapsed_ms,
        "finished updating index"
    );
    Ok(stats)
}

fn summary(name: &str, stats: &UpdateStats) -> String {
    match &stats.committed {
        Some(wm) => format!(
            "{}: {} packets, {} live batches, {} changes ({} already applied), {} deleted, {} reindexed in {} ms; now at {}",
            name,
            stats.packets,
            stats.live_batches,
            stats.changes_analyzed,
            stats.changes_skipped,
            stats.deleted,
            stats.reindexed,
            stats.elapsed_ms,
            wm
        ),
        None => format!("{}: up to date", name),
    }
}
