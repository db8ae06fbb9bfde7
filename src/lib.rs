pub mod cmd;
pub mod config;
pub mod db;
pub mod dependencies;
pub mod error;
pub mod index;
pub mod replication;
pub mod updater;
