//! Incremental update of one entity index from replication packets.
//!
//! A run reads the watermark stored in the index, replays archived packets
//! in sequence order, optionally catches up on the live pending-change log,
//! and applies the resulting deletes and reindexes. Archived replay and the
//! live tail are committed separately, each together with its watermark.

pub mod analyzer;
pub mod watermark;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::SourceDb;
use crate::dependencies::DependencyGraph;
use crate::error::UpdaterError;
use crate::index::{EntityIndex, IndexStore};
use crate::replication::{LiveFeed, PacketSource, ReplicationPacket};

pub use analyzer::{Affected, ChangeSet};
pub use watermark::Watermark;

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Query the live pending-change log once archived packets run out.
    pub live: bool,
    /// Stop after this many archived packets.
    pub max_packets: Option<usize>,
    /// Checked between packets; replay stops once set.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl UpdateOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Outcome of one run, serializable for `--json` style reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateStats {
    pub packets: usize,
    pub live_batches: usize,
    pub changes_analyzed: usize,
    pub changes_skipped: usize,
    pub deleted: usize,
    pub reindexed: usize,
    pub start: Option<Watermark>,
    /// Last committed watermark; `None` when nothing was committed.
    pub committed: Option<Watermark>,
    pub elapsed_ms: u64,
}

pub struct IncrementalUpdater<'a> {
    entity: &'a dyn EntityIndex,
    graph: &'a DependencyGraph,
    db: &'a dyn SourceDb,
    packets: &'a dyn PacketSource,
}

impl<'a> IncrementalUpdater<'a> {
    pub fn new(
        entity: &'a dyn EntityIndex,
        graph: &'a DependencyGraph,
        db: &'a dyn SourceDb,
        packets: &'a dyn PacketSource,
    ) -> Self {
        Self {
            entity,
            graph,
            db,
            packets,
        }
    }

    /// Runs one update cycle against `store`.
    ///
    /// On error, mutations not yet committed are rolled back; an archived
    /// phase that already committed stays committed.
    pub fn run(&self, store: &mut IndexStore, options: &UpdateOptions) -> Result<UpdateStats, UpdaterError> {
        let start = Instant::now();
        let mut stats = UpdateStats::default();
        let result = self.replay(store, options, &mut stats);
        stats.elapsed_ms = start.elapsed().as_millis() as u64;

        if let Err(err) = result {
            if let Err(rollback) = store.rollback() {
                warn!(index = self.entity.name(), "rollback failed: {}", rollback);
            }
            return Err(err);
        }
        Ok(stats)
    }

    fn replay(
        &self,
        store: &mut IndexStore,
        options: &UpdateOptions,
        stats: &mut UpdateStats,
    ) -> Result<(), UpdaterError> {
        let name = self.entity.name();
        let mut watermark = store.read_watermark()?;
        stats.start = Some(watermark);
        info!(index = name, "current index properties: {}", watermark);

        let mut changes = ChangeSet::default();
        loop {
            if options.max_packets.is_some_and(|max| stats.packets >= max) {
                info!(index = name, "packet limit reached");
                break;
            }
            if options.cancelled() {
                info!(index = name, "cancelled, stopping after packet #{}", watermark.replication_sequence);
                break;
            }

            let sequence = watermark.replication_sequence + 1;
            let Some(packet) = self.packets.fetch(sequence)? else {
                debug!(index = name, "packet #{} not available", sequence);
                break;
            };
            info!(
                index = name,
                changes = packet.changes.len(),
                "loaded packet #{}",
                packet.replication_sequence
            );

            self.check_schema(&packet, &watermark)?;
            changes = analyzer::classify_packet(self.graph, &packet, watermark.last_change_sequence, changes)?;
            watermark = watermark.advanced_past(&packet);
            stats.packets += 1;
        }

        if stats.packets > 0 {
            self.apply(store, &changes, stats)?;
            self.commit(store, &watermark, stats)?;
        }

        let live_eligible = stats.packets > 0 || watermark.last_change_sequence.is_some();
        if options.live && live_eligible {
            self.replay_live_tail(store, watermark, stats)?;
        }
        Ok(())
    }

    fn replay_live_tail(
        &self,
        store: &mut IndexStore,
        watermark: Watermark,
        stats: &mut UpdateStats,
    ) -> Result<(), UpdaterError> {
        let name = self.entity.name();
        let after = watermark.last_change_sequence.unwrap_or(0);
        let Some(packet) = LiveFeed::new(self.db).fetch_since(after)? else {
            debug!(index = name, "no pending changes after #{}", after);
            return Ok(());
        };
        info!(
            index = name,
            changes = packet.changes.len(),
            "loaded live changes after #{}",
            after
        );

        self.check_schema(&packet, &watermark)?;
        let changes = analyzer::classify_packet(
            self.graph,
            &packet,
            watermark.last_change_sequence,
            ChangeSet::default(),
        )?;
        let watermark = watermark.advanced_past(&packet);
        stats.live_batches += 1;

        self.apply(store, &changes, stats)?;
        self.commit(store, &watermark, stats)
    }

    fn check_schema(&self, packet: &ReplicationPacket, watermark: &Watermark) -> Result<(), UpdaterError> {
        if packet.schema_sequence == watermark.schema_sequence {
            return Ok(());
        }
        warn!(
            index = self.entity.name(),
            "packet #{} has schema sequence {}, index has {}",
            packet.replication_sequence,
            packet.schema_sequence,
            watermark.schema_sequence
        );
        Err(UpdaterError::SchemaChanged {
            index: self.entity.name().to_string(),
            found: packet.schema_sequence,
            expected: watermark.schema_sequence,
        })
    }

    /// Resolves `changes` and buffers the resulting index mutations. Deletes
    /// go first; a reindexed id always ends up reflecting the database.
    fn apply(&self, store: &mut IndexStore, changes: &ChangeSet, stats: &mut UpdateStats) -> Result<(), UpdaterError> {
        stats.changes_analyzed += changes.analyzed;
        stats.changes_skipped += changes.skipped;

        let affected = analyzer::resolve(self.graph, self.db, changes)?;
        info!(
            index = self.entity.name(),
            deletes = affected.to_delete.len(),
            reindexes = affected.to_reindex.len(),
            "applying changes"
        );

        for id in &affected.to_delete {
            store.delete_entity(*id)?;
        }
        stats.deleted += affected.to_delete.len();

        let schema = store.schema();
        for &id in &affected.to_reindex {
            store.delete_entity(id)?;
            match self.entity.build_document(self.db, &schema, id)? {
                Some(doc) => store.add_document(doc)?,
                None => debug!(index = self.entity.name(), id, "entity no longer exists"),
            }
        }
        stats.reindexed += affected.to_reindex.len();
        Ok(())
    }

    fn commit(&self, store: &mut IndexStore, watermark: &Watermark, stats: &mut UpdateStats) -> Result<(), UpdaterError> {
        store.write_watermark(watermark)?;
        store.commit()?;
        stats.committed = Some(*watermark);
        info!(index = self.entity.name(), "committed {}", watermark);

        // informational only: the source table may have moved on since
        match (self.db.count_rows(self.entity.head_table()), store.num_entities()) {
            (Ok(rows), Ok(docs)) => info!(
                index = self.entity.name(),
                "{} rows in {}, {} documents indexed",
                rows,
                self.entity.head_table(),
                docs
            ),
            (Err(e), _) | (_, Err(e)) => debug!(index = self.entity.name(), "count unavailable: {}", e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let options = UpdateOptions {
            cancel: Some(flag.clone()),
            ..UpdateOptions::default()
        };
        assert!(!options.cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(options.cancelled());
        assert!(!UpdateOptions::default().cancelled());
    }
}
