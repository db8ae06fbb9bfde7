use std::path::Path;

use serde::Serialize;

use crate::cmd::{index_dir, load_target, StatusArgs};
use crate::error::UpdaterError;
use crate::index::IndexStore;
use crate::updater::Watermark;

#[derive(Debug, Serialize)]
pub struct IndexStatus {
    pub index: String,
    pub watermark: Option<Watermark>,
    pub documents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn run(args: &StatusArgs) {
    let config = load_target(&args.target);
    let selected = match config.select(&args.target.index) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    let statuses: Vec<IndexStatus> = selected
        .iter()
        .map(|index| index_status(&args.target.indexes_dir, &index.name))
        .collect();

    if args.json {
        match serde_json::to_string_pretty(&statuses) {
            Ok(json) => println!("{}", json),
            Err(err) => {
                eprintln!("error: failed to serialize status: {}", err);
                std::process::exit(1);
            }
        }
        return;
    }

    println!("mbindex status ({})", args.target.indexes_dir.display());
    for status in &statuses {
        match (&status.watermark, status.documents, &status.error) {
            (Some(wm), Some(docs), _) => println!(
                "  {:<14} schema {:>3}  packet {:>8}  change {:>10}  {:>9} docs",
                status.index,
                wm.schema_sequence,
                wm.replication_sequence,
                wm.last_change_sequence.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                docs
            ),
            (_, _, Some(err)) => println!("  {:<14} {}", status.index, err),
            _ => println!("  {:<14} unknown", status.index),
        }
    }
}

/// Reads the replication position and document count of one index.
pub fn index_status(indexes_dir: &Path, name: &str) -> IndexStatus {
    let dir = index_dir(indexes_dir, name);
    if !IndexStore::exists(&dir) {
        return IndexStatus {
            index: name.to_string(),
            watermark: None,
            documents: None,
            error: Some("not initialized".to_string()),
        };
    }

    let read = || -> Result<(Watermark, u64), UpdaterError> {
        let store = IndexStore::open(&dir)?;
        Ok((store.read_watermark()?, store.num_entities()?))
    };
    match read() {
        Ok((watermark, documents)) => IndexStatus {
            index: name.to_string(),
            watermark: Some(watermark),
            documents: Some(documents),
            error: None,
        },
        Err(err) => IndexStatus {
            index: name.to_string(),
            watermark: None,
            documents: None,
            error: Some(err.to_string()),
        },
    }
}
