pub mod init;
pub mod status;
pub mod update;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::UpdaterError;

pub const DEFAULT_REPOSITORY: &str = "http://ftp.musicbrainz.org/pub/musicbrainz/data/replication";

#[derive(Parser)]
#[command(
    name = "mbindex",
    about = "Keeps MusicBrainz search indexes up to date from replication packets",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter used when RUST_LOG is unset
    #[arg(long = "log", global = true, default_value = "info")]
    pub log: String,

    /// Shorthand for --log debug
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay replication packets into the selected indexes
    Update(UpdateArgs),
    /// Show replication position and size of each index
    Status(StatusArgs),
    /// Create an empty index positioned at a given replication packet
    Init(InitArgs),
}

#[derive(Parser)]
pub struct Target {
    /// Entity configuration (default: built-in MusicBrainz configuration)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Directory holding one index directory per entity type
    #[arg(long = "indexes-dir", default_value = "indexes")]
    pub indexes_dir: PathBuf,

    /// Comma-separated entity types (default: all configured)
    #[arg(long = "index", value_delimiter = ',')]
    pub index: Vec<String>,
}

#[derive(Parser)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub target: Target,

    /// SQLite mirror of the source database
    #[arg(long = "database")]
    pub database: PathBuf,

    /// Packet repository: local directory or http(s) URL
    #[arg(long = "repository", env = "MBINDEX_REPOSITORY", default_value = DEFAULT_REPOSITORY)]
    pub repository: String,

    /// Access token for the packet repository
    #[arg(long = "token", env = "MBINDEX_ACCESS_TOKEN")]
    pub token: Option<String>,

    /// Also apply changes still pending in the database
    #[arg(long = "live")]
    pub live: bool,

    /// Stop after this many packets
    #[arg(long = "max-packets")]
    pub max_packets: Option<usize>,

    /// Print per-index results as JSON
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Parser)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: Target,

    /// Output as JSON
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Parser)]
pub struct InitArgs {
    #[command(flatten)]
    pub target: Target,

    /// Schema sequence of the database the index was built from
    #[arg(long = "schema-sequence")]
    pub schema_sequence: u32,

    /// Last replication packet reflected in the index
    #[arg(long = "replication-sequence")]
    pub replication_sequence: u64,

    /// Last pending change reflected in the index
    #[arg(long = "change-sequence")]
    pub change_sequence: Option<i64>,
}

pub fn load_config(path: Option<&Path>) -> Result<Config, UpdaterError> {
    match path {
        Some(path) => Config::load(path),
        None => Config::musicbrainz(),
    }
}

/// Directory of the index for entity type `name`.
pub fn index_dir(indexes_dir: &Path, name: &str) -> PathBuf {
    indexes_dir.join(name)
}

/// Loads the configuration named by `target`, exiting on error.
fn load_target(target: &Target) -> Config {
    match load_config(target.config.as_deref()) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}
