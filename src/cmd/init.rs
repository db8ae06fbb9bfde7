use std::path::Path;

use tracing::info;

use crate::cmd::{index_dir, load_target, InitArgs};
use crate::config::IndexConfig;
use crate::error::UpdaterError;
use crate::index::{EntityIndex, IndexStore, SqlEntity};
use crate::updater::Watermark;

pub fn run(args: &InitArgs) {
    let config = load_target(&args.target);
    let selected = match config.select(&args.target.index) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    let watermark = Watermark {
        schema_sequence: args.schema_sequence,
        replication_sequence: args.replication_sequence,
        last_change_sequence: args.change_sequence,
    };

    let mut failed = false;
    for index in selected {
        match init_index(index, &args.target.indexes_dir, &watermark) {
            Ok(()) => eprintln!("{}: created at {}", index.name, watermark),
            Err(err) => {
                eprintln!("error: {}: {}", index.name, err);
                failed = true;
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
}

/// Creates an empty index for `config` whose metadata record holds
/// `watermark`. An existing index is left alone.
pub fn init_index(config: &IndexConfig, indexes_dir: &Path, watermark: &Watermark) -> Result<(), UpdaterError> {
    let dir = index_dir(indexes_dir, &config.name);
    if IndexStore::exists(&dir) {
        return Err(UpdaterError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("index already exists at {}", dir.display()),
        )));
    }
    let entity = SqlEntity::new(config.clone());
    IndexStore::create(&dir, entity.schema(), watermark)?;
    info!(index = entity.name(), "created index at {}", dir.display());
    Ok(())
}
