//! `SQLite` storage for the entity property graph.
//!
//! `SQLite` is the source of truth for all persisted analysis results: nodes,
//! their tags, properties and metrics, typed edges, and the unit run ledger
//! that makes re-runs idempotent.
//!
//! ## Module Structure
//!
//! - `schema` - Database schema (DDL)
//! - `helpers` - Row conversion and column lists
//! - `nodes` - Node upserts, lookups and deletion
//! - `tags` - Tag predicate queries (any-of, all-of)
//! - `edges` - Idempotent edge creation and traversal lookups
//! - `runs` - Unit run ledger
//!
//! ## Storage Layout
//!
//! | Concept | Storage |
//! |---------|---------|
//! | Tags | Normalized `tags` table indexed on `tag` |
//! | Properties, metrics | JSON blobs, queried with `json_extract`/`json_each` |
//! | Edge identity | `UNIQUE (source, target, type)` |
//!
//! Callers never manage locks or transactions: every operation takes the
//! connection mutex for its own duration.

mod edges;
mod helpers;
mod nodes;
mod runs;
mod schema;
mod tags;

use schema::SCHEMA;
use tags::TagMatch;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{Edge, GraphStats, Node, UnitRun};

/// Persistence contract used by the scheduler, the decorator commit and the
/// query surface.
///
/// Implementations must be safe to share across worker threads; a merge of
/// the same id from two threads must never produce two rows.
pub trait GraphStore: Send + Sync {
    // === Nodes ===

    /// Insert or update a node by id, replacing its properties, metrics and tags.
    fn merge_node(&self, node: &Node) -> Result<()>;

    /// Merge a batch of nodes in one transaction. Returns the number written.
    fn merge_nodes(&self, nodes: &[Node]) -> Result<usize>;

    /// Look up a node by id.
    fn find_node_by_id(&self, id: &str) -> Result<Option<Node>>;

    /// Whether a node with this id exists.
    fn contains_node(&self, id: &str) -> Result<bool>;

    /// All nodes of a type, ordered by id.
    fn find_nodes_by_type(&self, node_type: &str) -> Result<Vec<Node>>;

    /// Nodes whose property at a dotted path equals `value`.
    fn find_nodes_by_property(&self, path: &str, value: &Value) -> Result<Vec<Node>>;

    /// Every node, ordered by id.
    fn all_nodes(&self) -> Result<Vec<Node>>;

    /// Delete a node together with its tags, edges and ledger rows.
    ///
    /// Returns `false` if no such node existed.
    fn delete_node(&self, id: &str) -> Result<bool>;

    // === Tags ===

    /// Nodes carrying `tag`.
    fn find_nodes_by_tag(&self, tag: &str) -> Result<Vec<Node>>;

    /// Nodes carrying at least one of `tags`. Empty input matches nothing.
    fn find_nodes_by_any_tags(&self, tags: &[&str]) -> Result<Vec<Node>>;

    /// Nodes carrying every one of `tags`. Empty input matches every node.
    fn find_nodes_by_all_tags(&self, tags: &[&str]) -> Result<Vec<Node>>;

    /// Nodes of a type carrying at least one of `tags`.
    fn find_nodes_by_type_and_any_tags(&self, node_type: &str, tags: &[&str])
        -> Result<Vec<Node>>;

    /// Nodes of a type carrying every one of `tags`.
    fn find_nodes_by_type_and_all_tags(&self, node_type: &str, tags: &[&str])
        -> Result<Vec<Node>>;

    // === Edges ===

    /// Create an edge unless `(source, target, type)` already exists.
    ///
    /// Returns whether a row was created.
    fn create_edge(&self, edge: &Edge) -> Result<bool>;

    /// Create a batch of edges in one transaction. Returns how many were new.
    fn create_edges(&self, edges: &[Edge]) -> Result<usize>;

    /// Edges leaving a node.
    fn find_outgoing_edges(&self, id: &str) -> Result<Vec<Edge>>;

    /// Edges arriving at a node.
    fn find_incoming_edges(&self, id: &str) -> Result<Vec<Edge>>;

    /// Edges of a type.
    fn find_edges_by_type(&self, edge_type: &str) -> Result<Vec<Edge>>;

    // === Whole store ===

    /// Node, edge and tag counts.
    fn get_statistics(&self) -> Result<GraphStats>;

    /// Monotone fact counter: nodes, tag assignments, top-level properties,
    /// metrics and edges.
    fn fact_count(&self) -> Result<u64>;

    /// Remove every node, edge, tag and ledger row.
    fn clear_all(&self) -> Result<()>;

    // === Ledger ===

    /// Record completed (unit, entity) pairs. Returns the number recorded.
    fn record_unit_runs(&self, runs: &[UnitRun]) -> Result<usize>;

    /// Every completed (unit, entity) pair.
    fn completed_unit_runs(&self) -> Result<Vec<UnitRun>>;

    /// Forget all completions so every unit runs again.
    fn reset_unit_runs(&self) -> Result<()>;
}

/// `SQLite`-backed graph store.
///
/// The connection is wrapped in a `Mutex` so the store can be shared across
/// the scheduler's worker threads. The database path is kept to support
/// [`reset`](Self::reset), which deletes and recreates the file.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraphStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteGraphStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::configure(&conn)?;

        debug!(path = %path.display(), "Opened graph store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Acquire the connection lock.
    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            Error::Internal(format!(
                "database connection mutex poisoned (a thread panicked while holding the lock): {e}"
            ))
        })
    }

    /// Delete the database file and reopen with a fresh schema.
    ///
    /// In-memory stores are cleared instead.
    pub fn reset(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return self.clear_all();
        };
        info!(path = %path.display(), "Resetting graph store");

        // Swap in a placeholder to release SQLite file locks before deleting
        let mut conn = self.connection()?;
        *conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("failed to create temporary connection: {e}")))?;
        drop(conn);

        // Sidecars are named by appending to the full file name
        remove_file_if_exists(&path)?;
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            remove_file_if_exists(Path::new(&sidecar))?;
        }

        *self = Self::open(&path)?;
        debug!(path = %path.display(), "Graph store reset complete");
        Ok(())
    }

    /// Update `SQLite` query planner statistics after bulk writes.
    pub fn optimize(&self) -> Result<()> {
        self.connection()?.execute_batch("ANALYZE")?;
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats> {
        let conn = self.connection()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or(0))
        };

        Ok(GraphStats {
            node_count: count("SELECT COUNT(*) FROM nodes")?,
            edge_count: count("SELECT COUNT(*) FROM edges")?,
            tag_count: count("SELECT COUNT(*) FROM tags")?,
            distinct_tag_count: count("SELECT COUNT(DISTINCT tag) FROM tags")?,
        })
    }

    fn count_facts(&self) -> Result<u64> {
        let conn = self.connection()?;
        let total: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM nodes)
                  + (SELECT COUNT(*) FROM tags)
                  + (SELECT COUNT(*) FROM nodes n, json_each(n.properties))
                  + (SELECT COUNT(*) FROM nodes n, json_each(n.metrics))
                  + (SELECT COUNT(*) FROM edges)",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    fn clear(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM unit_runs;
             DELETE FROM edges;
             DELETE FROM tags;
             DELETE FROM nodes;",
        )?;
        tx.commit()?;
        debug!("Cleared graph store");
        Ok(())
    }
}

/// Remove a file, ignoring `NotFound`.
fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to delete {}: {e}", path.display()),
        ))),
    }
}

impl GraphStore for SqliteGraphStore {
    fn merge_node(&self, node: &Node) -> Result<()> {
        self.upsert_nodes(std::slice::from_ref(node)).map(|_| ())
    }

    fn merge_nodes(&self, nodes: &[Node]) -> Result<usize> {
        self.upsert_nodes(nodes)
    }

    fn find_node_by_id(&self, id: &str) -> Result<Option<Node>> {
        self.node_by_id(id)
    }

    fn contains_node(&self, id: &str) -> Result<bool> {
        self.node_exists(id)
    }

    fn find_nodes_by_type(&self, node_type: &str) -> Result<Vec<Node>> {
        self.nodes_of_type(node_type)
    }

    fn find_nodes_by_property(&self, path: &str, value: &Value) -> Result<Vec<Node>> {
        self.nodes_with_property(path, value)
    }

    fn all_nodes(&self) -> Result<Vec<Node>> {
        self.every_node()
    }

    fn delete_node(&self, id: &str) -> Result<bool> {
        self.remove_node(id)
    }

    fn find_nodes_by_tag(&self, tag: &str) -> Result<Vec<Node>> {
        self.nodes_by_tags(None, &[tag], TagMatch::Any)
    }

    fn find_nodes_by_any_tags(&self, tags: &[&str]) -> Result<Vec<Node>> {
        self.nodes_by_tags(None, tags, TagMatch::Any)
    }

    fn find_nodes_by_all_tags(&self, tags: &[&str]) -> Result<Vec<Node>> {
        self.nodes_by_tags(None, tags, TagMatch::All)
    }

    fn find_nodes_by_type_and_any_tags(
        &self,
        node_type: &str,
        tags: &[&str],
    ) -> Result<Vec<Node>> {
        self.nodes_by_tags(Some(node_type), tags, TagMatch::Any)
    }

    fn find_nodes_by_type_and_all_tags(
        &self,
        node_type: &str,
        tags: &[&str],
    ) -> Result<Vec<Node>> {
        self.nodes_by_tags(Some(node_type), tags, TagMatch::All)
    }

    fn create_edge(&self, edge: &Edge) -> Result<bool> {
        self.insert_edges(std::slice::from_ref(edge)).map(|n| n == 1)
    }

    fn create_edges(&self, edges: &[Edge]) -> Result<usize> {
        self.insert_edges(edges)
    }

    fn find_outgoing_edges(&self, id: &str) -> Result<Vec<Edge>> {
        self.edges_where("source = ?1 ORDER BY target, type", id)
    }

    fn find_incoming_edges(&self, id: &str) -> Result<Vec<Edge>> {
        self.edges_where("target = ?1 ORDER BY source, type", id)
    }

    fn find_edges_by_type(&self, edge_type: &str) -> Result<Vec<Edge>> {
        self.edges_where("type = ?1 ORDER BY source, target", edge_type)
    }

    fn get_statistics(&self) -> Result<GraphStats> {
        self.stats()
    }

    fn fact_count(&self) -> Result<u64> {
        self.count_facts()
    }

    fn clear_all(&self) -> Result<()> {
        self.clear()
    }

    fn record_unit_runs(&self, runs: &[UnitRun]) -> Result<usize> {
        self.insert_unit_runs(runs)
    }

    fn completed_unit_runs(&self) -> Result<Vec<UnitRun>> {
        self.unit_runs()
    }

    fn reset_unit_runs(&self) -> Result<()> {
        self.delete_unit_runs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_db() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("should create temp directory");
        let path = dir.path().join("graph.db");
        (dir, path)
    }

    #[test]
    fn open_creates_database_and_schema() {
        let (_dir, path) = temp_db();

        let store = SqliteGraphStore::open(&path).expect("failed to open database");
        let conn = store.connection().expect("should get connection");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<std::result::Result<Vec<_>, _>>()
            .expect("collect");

        assert_eq!(tables, vec!["edges", "nodes", "tags", "unit_runs"]);
    }

    #[test]
    fn fact_count_includes_properties_metrics_and_edges() {
        let store = SqliteGraphStore::open_in_memory().expect("open");
        store
            .merge_node(
                &Node::new("a", "file")
                    .with_tag("text")
                    .with_property("name", "a")
                    .with_metric("lines", 3.0),
            )
            .expect("merge a");
        store.merge_node(&Node::new("b", "file")).expect("merge b");
        store
            .create_edge(&Edge::new("a", "b", "contains"))
            .expect("edge");

        // 2 nodes + 1 tag + 1 property + 1 metric + 1 edge
        assert_eq!(store.fact_count().expect("count"), 6);
    }

    #[test]
    fn clear_all_empties_every_table() {
        let store = SqliteGraphStore::open_in_memory().expect("open");
        store
            .merge_node(&Node::new("a", "file").with_tag("t"))
            .expect("merge");
        store
            .record_unit_runs(&[UnitRun {
                unit: "u".to_string(),
                node_id: "a".to_string(),
                outcome: crate::types::Outcome::Ran,
                pass: 1,
                message: None,
            }])
            .expect("record");

        store.clear_all().expect("clear");

        assert_eq!(store.get_statistics().expect("stats"), GraphStats::default());
        assert!(store.completed_unit_runs().expect("runs").is_empty());
    }

    #[test]
    fn reset_deletes_database_and_recreates_schema() {
        let (_dir, path) = temp_db();
        let mut store = SqliteGraphStore::open(&path).expect("should open database");
        store
            .merge_node(&Node::new("a", "file"))
            .expect("should merge");

        store.reset().expect("reset should succeed");

        assert!(store.find_node_by_id("a").expect("lookup").is_none());
        store
            .merge_node(&Node::new("b", "file"))
            .expect("should merge after reset");
        assert!(path.exists(), "database file should be recreated");
    }
}
