//! Table dependency graph of one entity type.
//!
//! Every tracked table points at most one hop closer to the entity's head
//! table. A change on any tracked table is mapped back to head-table ids by a
//! join query synthesized from that chain.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::config::{IndexConfig, JoinConfig};
use crate::db::SourceDb;
use crate::error::UpdaterError;

/// Number of keys placed in a single `IN (...)` list.
pub const RESOLVE_BATCH_SIZE: usize = 500;

/// `source.source_field = target_table.target_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source_field: String,
    pub target_table: String,
    pub target_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRelation {
    pub table: String,
    /// `None` for the head table.
    pub edge: Option<Edge>,
    /// Columns whose changes matter to the index; empty means all.
    pub used_fields: BTreeSet<String>,
}

impl TableRelation {
    pub fn head(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            edge: None,
            used_fields: BTreeSet::new(),
        }
    }

    pub fn is_head(&self) -> bool {
        self.edge.is_none()
    }

    /// Column of this table that carries the join key.
    pub fn join_field(&self) -> Option<&str> {
        self.edge.as_ref().map(|e| e.source_field.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    entity: String,
    id_column: String,
    head: Option<String>,
    tables: BTreeMap<String, TableRelation>,
}

impl DependencyGraph {
    pub fn new(entity: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id_column: id_column.into(),
            head: None,
            tables: BTreeMap::new(),
        }
    }

    /// Builds the graph from every path declared for an index.
    pub fn from_config(config: &IndexConfig) -> Result<Self, UpdaterError> {
        let mut graph = Self::new(&config.name, &config.id_column);
        for (i, path) in config.paths.iter().enumerate() {
            let head = path.head.as_deref().ok_or_else(|| {
                UpdaterError::InvalidDependency(format!(
                    "{}: path #{} does not name its head table",
                    config.name,
                    i + 1
                ))
            })?;
            graph.add_path(head, &path.joins)?;
        }
        // an index without paths still tracks its head table
        if graph.head.is_none() {
            graph.add_path(&config.head_table, &[])?;
        }
        if graph.head.as_deref() != Some(config.head_table.as_str()) {
            return Err(UpdaterError::InvalidDependency(format!(
                "{}: paths lead to '{}' but the index head table is '{}'",
                config.name,
                graph.head.as_deref().unwrap_or(""),
                config.head_table
            )));
        }
        debug!(index = %config.name, "dependencies: {}", graph);
        Ok(graph)
    }

    /// Registers a path given head-first. Each join hangs its table below the
    /// previous table of the path.
    pub fn add_path(&mut self, head: &str, joins: &[JoinConfig]) -> Result<(), UpdaterError> {
        match &self.head {
            None => self.head = Some(head.to_string()),
            Some(existing) if existing != head => {
                return Err(UpdaterError::InvalidDependency(format!(
                    "{}: path head '{}' differs from root table '{}'",
                    self.entity, head, existing
                )))
            }
            Some(_) => {}
        }

        let mut chain = vec![TableRelation::head(head)];
        let mut parent = head;
        for join in joins {
            let missing = |attr: &str| {
                UpdaterError::InvalidDependency(format!(
                    "{}: join from '{}' to '{}' has no {}",
                    self.entity, join.table, parent, attr
                ))
            };
            let source_field = join.join_field.clone().ok_or_else(|| missing("join_field"))?;
            let target_field = join.parent_field.clone().ok_or_else(|| missing("parent_field"))?;
            chain.push(TableRelation {
                table: join.table.clone(),
                edge: Some(Edge {
                    source_field,
                    target_table: parent.to_string(),
                    target_field,
                }),
                used_fields: join.used_fields.iter().cloned().collect(),
            });
            parent = &join.table;
        }

        // register from the leaf up so interior tables are tracked too
        for relation in chain.into_iter().rev() {
            self.register(relation)?;
        }
        Ok(())
    }

    fn register(&mut self, relation: TableRelation) -> Result<(), UpdaterError> {
        match self.tables.get_mut(&relation.table) {
            None => {
                self.tables.insert(relation.table.clone(), relation);
            }
            Some(existing) if existing.edge == relation.edge => {
                existing.used_fields.extend(relation.used_fields);
            }
            Some(existing) => {
                return Err(UpdaterError::InvalidDependency(format!(
                    "{}: table '{}' is joined in two different ways ({} / {})",
                    self.entity,
                    relation.table,
                    describe_edge(existing.edge.as_ref()),
                    describe_edge(relation.edge.as_ref())
                )))
            }
        }
        Ok(())
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn head_table(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn relation(&self, table: &str) -> Option<&TableRelation> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|t| t.as_str())
    }

    /// Relations from `table` up to and including the head.
    pub fn path_to_head(&self, table: &str) -> Vec<&TableRelation> {
        let mut path = Vec::new();
        let mut current = self.tables.get(table);
        while let Some(relation) = current {
            path.push(relation);
            if path.len() > self.tables.len() {
                break;
            }
            current = relation
                .edge
                .as_ref()
                .and_then(|e| self.tables.get(&e.target_table));
        }
        path
    }

    /// Query mapping join keys of `table` to head ids.
    ///
    /// `keys` are values of `table`'s join field. The changed table itself is
    /// never joined; the filter applies to the matching column one hop up.
    /// Returns `None` for the head table (keys are ids already), for untracked
    /// tables and for an empty key set.
    pub fn resolution_sql(&self, table: &str, keys: &BTreeSet<i64>) -> Option<String> {
        let head = self.head.as_deref()?;
        let edge = self.tables.get(table)?.edge.as_ref()?;
        if keys.is_empty() {
            return None;
        }

        let mut sql = format!("SELECT {}.{} FROM {}", head, self.id_column, head);

        // intermediate tables between the changed table and the head, joined
        // head side first
        let intermediates = self.path_to_head(&edge.target_table);
        for relation in intermediates.iter().rev() {
            if let Some(e) = &relation.edge {
                sql.push_str(&format!(
                    " JOIN {} ON ({}.{} = {}.{})",
                    relation.table, relation.table, e.source_field, e.target_table, e.target_field
                ));
            }
        }

        let list: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        sql.push_str(&format!(
            " WHERE {}.{} IN ({})",
            edge.target_table,
            edge.target_field,
            list.join(",")
        ));
        Some(sql)
    }

    /// Head ids affected by changes to `table` rows carrying `keys`.
    pub fn resolve(
        &self,
        db: &dyn SourceDb,
        table: &str,
        keys: &BTreeSet<i64>,
    ) -> Result<BTreeSet<i64>, UpdaterError> {
        let relation = match self.tables.get(table) {
            Some(r) => r,
            None => return Ok(BTreeSet::new()),
        };
        if relation.is_head() {
            return Ok(keys.clone());
        }

        let mut ids = BTreeSet::new();
        let keys: Vec<i64> = keys.iter().copied().collect();
        for chunk in keys.chunks(RESOLVE_BATCH_SIZE) {
            let batch: BTreeSet<i64> = chunk.iter().copied().collect();
            if let Some(sql) = self.resolution_sql(table, &batch) {
                debug!(index = %self.entity, %table, %sql, "resolving affected ids");
                ids.extend(db.query_ids(&sql)?);
            }
        }
        Ok(ids)
    }
}

fn describe_edge(edge: Option<&Edge>) -> String {
    match edge {
        Some(e) => format!("{} = {}.{}", e.source_field, e.target_table, e.target_field),
        None => "head".to_string(),
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for relation in self.tables.values().filter(|r| !r.is_head()) {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            let path: Vec<String> = self
                .path_to_head(&relation.table)
                .iter()
                .map(|r| match r.join_field() {
                    Some(field) => format!("{}({})", r.table, field),
                    None => r.table.clone(),
                })
                .collect();
            f.write_str(&path.join(" -> "))?;
        }
        if first {
            f.write_str(self.head.as_deref().unwrap_or("<empty>"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rusqlite::Connection;

    use crate::config::Config;

    fn join(table: &str, join_field: &str, parent_field: &str) -> JoinConfig {
        JoinConfig {
            table: table.into(),
            join_field: Some(join_field.into()),
            parent_field: Some(parent_field.into()),
            used_fields: Vec::new(),
        }
    }

    fn keys(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    fn work_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new("work", "id");
        graph.add_path("work", &[join("work_alias", "work", "id")]).unwrap();
        graph.add_path("work", &[join("work_tag", "work", "id")]).unwrap();
        graph
            .add_path(
                "work",
                &[
                    join("artist_credit_name", "artist_credit", "artist_credit"),
                    join("artist", "id", "artist"),
                ],
            )
            .unwrap();
        graph
    }

    #[test]
    fn interior_tables_are_registered() {
        let graph = work_graph();
        assert_eq!(graph.head_table(), Some("work"));
        for table in ["work", "work_alias", "work_tag", "artist_credit_name", "artist"] {
            assert!(graph.contains(table), "{} should be tracked", table);
        }
        assert!(graph.relation("work").unwrap().is_head());
        assert!(!graph.relation("artist_credit_name").unwrap().is_head());
        assert!(!graph.contains("recording"));
    }

    #[test]
    fn single_hop_sql() {
        let mut graph = DependencyGraph::new("label", "id");
        graph.add_path("label", &[join("label_alias", "A", "B")]).unwrap();
        assert_eq!(
            graph.resolution_sql("label_alias", &keys(&[9, 5])).unwrap(),
            "SELECT label.id FROM label WHERE label.B IN (5,9)"
        );
    }

    #[test]
    fn multi_hop_sql_joins_head_first() {
        let graph = work_graph();
        assert_eq!(
            graph.resolution_sql("artist", &keys(&[1, 2, 3])).unwrap(),
            "SELECT work.id FROM work \
             JOIN artist_credit_name ON (artist_credit_name.artist_credit = work.artist_credit) \
             WHERE artist_credit_name.artist IN (1,2,3)"
        );
        assert_eq!(
            graph.resolution_sql("artist_credit_name", &keys(&[1])).unwrap(),
            "SELECT work.id FROM work WHERE work.artist_credit IN (1)"
        );
    }

    #[test]
    fn three_hop_sql_orders_joins_from_head_to_leaf() {
        let mut graph = DependencyGraph::new("recording", "id");
        graph
            .add_path(
                "recording",
                &[
                    join("track", "recording", "id"),
                    join("medium", "id", "medium"),
                    join("release", "id", "release"),
                    join("release_label", "release", "id"),
                ],
            )
            .unwrap();
        assert_eq!(
            graph.resolution_sql("release_label", &keys(&[7])).unwrap(),
            "SELECT recording.id FROM recording \
             JOIN track ON (track.recording = recording.id) \
             JOIN medium ON (medium.id = track.medium) \
             JOIN release ON (release.id = medium.release) \
             WHERE release.id IN (7)"
        );
    }

    #[test]
    fn head_and_untracked_need_no_sql() {
        let graph = work_graph();
        assert!(graph.resolution_sql("work", &keys(&[1])).is_none());
        assert!(graph.resolution_sql("label", &keys(&[1])).is_none());
        assert!(graph.resolution_sql("work_alias", &keys(&[])).is_none());
    }

    #[test]
    fn conflicting_head_is_rejected() {
        let mut graph = work_graph();
        let err = graph
            .add_path("recording", &[join("isrc", "recording", "id")])
            .unwrap_err();
        assert!(matches!(err, UpdaterError::InvalidDependency(_)));
    }

    #[test]
    fn incomplete_join_is_rejected() {
        let mut graph = DependencyGraph::new("label", "id");
        let mut broken = join("label_alias", "label", "id");
        broken.parent_field = None;
        assert!(matches!(
            graph.add_path("label", &[broken]),
            Err(UpdaterError::InvalidDependency(_))
        ));
        let mut broken = join("label_alias", "label", "id");
        broken.join_field = None;
        assert!(graph.add_path("label", &[broken]).is_err());
    }

    #[test]
    fn conflicting_edge_is_rejected() {
        let mut graph = work_graph();
        assert!(graph.add_path("work", &[join("work_alias", "other", "id")]).is_err());
        // the same edge again is fine and merges used fields
        let mut again = join("work_alias", "work", "id");
        again.used_fields = vec!["name".into()];
        graph.add_path("work", &[again]).unwrap();
        assert!(graph.relation("work_alias").unwrap().used_fields.contains("name"));
    }

    #[test]
    fn config_head_must_match_paths() {
        let config = Config::from_toml(
            r#"
            [[index]]
            name = "label"
            head_table = "label"
            document_query = "SELECT name FROM label WHERE id = ?1"
            [[index.path]]
            head = "artist"
            [[index.path.join]]
            table = "artist_alias"
            join_field = "artist"
            parent_field = "id"
            "#,
        )
        .unwrap();
        assert!(DependencyGraph::from_config(&config.indexes[0]).is_err());
    }

    #[test]
    fn config_path_without_head_is_rejected() {
        let config = Config::from_toml(
            r#"
            [[index]]
            name = "label"
            head_table = "label"
            document_query = "SELECT name FROM label WHERE id = ?1"
            [[index.path]]
            [[index.path.join]]
            table = "label_alias"
            join_field = "label"
            parent_field = "id"
            "#,
        )
        .unwrap();
        assert!(matches!(
            DependencyGraph::from_config(&config.indexes[0]),
            Err(UpdaterError::InvalidDependency(_))
        ));
    }

    #[test]
    fn builtin_config_builds_graphs() {
        let config = Config::musicbrainz().unwrap();
        for index in &config.indexes {
            let graph = DependencyGraph::from_config(index)
                .unwrap_or_else(|e| panic!("{}: {}", index.name, e));
            assert_eq!(graph.head_table(), Some(index.head_table.as_str()));
        }
    }

    #[test]
    fn resolve_runs_batched_queries() {
        let db = Connection::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE work (id INTEGER PRIMARY KEY, artist_credit INTEGER);
             CREATE TABLE artist_credit_name (artist_credit INTEGER, artist INTEGER);
             INSERT INTO work VALUES (1, 10), (2, 20), (3, 30);
             INSERT INTO artist_credit_name VALUES (10, 100), (20, 100), (30, 300);",
        )
        .unwrap();
        let graph = work_graph();

        assert_eq!(graph.resolve(&db, "artist", &keys(&[100])).unwrap(), keys(&[1, 2]));
        assert_eq!(graph.resolve(&db, "work", &keys(&[8, 9])).unwrap(), keys(&[8, 9]));
        assert!(graph.resolve(&db, "label", &keys(&[1])).unwrap().is_empty());

        let many: BTreeSet<i64> = (0..(RESOLVE_BATCH_SIZE as i64 * 2 + 10)).chain([300]).collect();
        assert_eq!(graph.resolve(&db, "artist", &many).unwrap(), keys(&[1, 2, 3]));
    }
}
