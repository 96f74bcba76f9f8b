//! Node upserts, lookups and deletion.

use std::collections::BTreeMap;

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::{trace, warn};

use super::helpers::{row_to_node, NODE_COLUMNS};
use super::SqliteGraphStore;
use crate::error::Result;
use crate::types::Node;

/// Metrics with non-finite values removed; JSON cannot carry them.
fn finite_metrics(node: &Node) -> BTreeMap<&str, f64> {
    node.metrics
        .iter()
        .filter_map(|(key, value)| {
            if value.is_finite() {
                Some((key.as_str(), *value))
            } else {
                warn!(node = %node.id, metric = %key, "Dropping non-finite metric");
                None
            }
        })
        .collect()
}

impl SqliteGraphStore {
    /// Run a node query and collect the rows.
    pub(super) fn query_nodes<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Node>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let nodes = stmt
            .query_map(params, row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Upsert nodes in one transaction, replacing each node's tag set.
    pub(super) fn upsert_nodes(&self, nodes: &[Node]) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO nodes (id, type, display_label, properties, metrics)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    type = excluded.type,
                    display_label = excluded.display_label,
                    properties = excluded.properties,
                    metrics = excluded.metrics",
            )?;
            let mut clear_tags = tx.prepare_cached("DELETE FROM tags WHERE node_id = ?1")?;
            let mut insert_tag =
                tx.prepare_cached("INSERT OR IGNORE INTO tags (node_id, tag) VALUES (?1, ?2)")?;

            for node in nodes {
                let properties = serde_json::to_string(&node.properties)?;
                let metrics = serde_json::to_string(&finite_metrics(node))?;
                upsert.execute(params![
                    node.id,
                    node.node_type,
                    node.display_label,
                    properties,
                    metrics
                ])?;

                clear_tags.execute([&node.id])?;
                for tag in &node.tags {
                    insert_tag.execute(params![node.id, tag])?;
                }
            }
        }
        tx.commit()?;

        trace!(count = nodes.len(), "Merged nodes");
        Ok(nodes.len())
    }

    pub(super) fn node_by_id(&self, id: &str) -> Result<Option<Node>> {
        let conn = self.connection()?;

        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.id = ?1"),
            [id],
            row_to_node,
        )
        .optional()
        .map_err(Into::into)
    }

    pub(super) fn node_exists(&self, id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let found = conn
            .query_row("SELECT 1 FROM nodes WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub(super) fn nodes_of_type(&self, node_type: &str) -> Result<Vec<Node>> {
        self.query_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.type = ?1 ORDER BY n.id"),
            [node_type],
        )
    }

    pub(super) fn every_node(&self) -> Result<Vec<Node>> {
        self.query_nodes(&format!("SELECT {NODE_COLUMNS} FROM nodes n ORDER BY n.id"), [])
    }

    /// Property lookup by dotted path.
    ///
    /// `SQLite` narrows the candidates to nodes that have either the literal key
    /// or the first path segment; the exact comparison uses
    /// [`Node::property_at`] so both sides agree on path semantics.
    pub(super) fn nodes_with_property(&self, path: &str, value: &Value) -> Result<Vec<Node>> {
        let candidates = if path.contains('"') {
            self.every_node()?
        } else {
            let first = path.split('.').next().unwrap_or(path);
            self.query_nodes(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes n
                     WHERE json_type(n.properties, ?1) IS NOT NULL
                        OR json_type(n.properties, ?2) IS NOT NULL
                     ORDER BY n.id"
                ),
                [format!("$.\"{path}\""), format!("$.\"{first}\"")],
            )?
        };

        Ok(candidates
            .into_iter()
            .filter(|node| node.property_at(path) == Some(value))
            .collect())
    }

    /// Delete a node; tags, edges and ledger rows cascade.
    pub(super) fn remove_node(&self, id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let deleted = conn.execute("DELETE FROM nodes WHERE id = ?1", [id])?;
        if deleted > 0 {
            trace!(node = %id, "Deleted node");
        }
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::{GraphStore, SqliteGraphStore};
    use crate::types::{Edge, Node};
    use serde_json::json;

    fn store() -> SqliteGraphStore {
        SqliteGraphStore::open_in_memory().expect("should open in-memory store")
    }

    #[test]
    fn merge_replaces_values_and_keeps_one_row() {
        let store = store();
        store
            .merge_node(&Node::new("a", "file").with_tag("old").with_property("size", 1))
            .expect("first merge");
        store
            .merge_node(&Node::new("a", "file").with_tag("new").with_property("size", 2))
            .expect("second merge");

        let node = store.find_node_by_id("a").expect("lookup").expect("exists");
        assert_eq!(node.properties["size"], json!(2));
        assert!(node.has_tag("new"));
        assert!(!node.has_tag("old"), "merge_node replaces the tag set");
        assert_eq!(store.get_statistics().expect("stats").node_count, 1);
    }

    #[test]
    fn round_trips_properties_tags_and_metrics() {
        let store = store();
        let node = Node::new("file:/a/b.rs", "file")
            .with_label("b.rs")
            .with_tag("text")
            .with_tag("resource")
            .with_property("manifest", json!({ "version": "1.0", "deps": [1, 2] }))
            .with_metric("lines", 42.0);

        store.merge_node(&node).expect("merge");

        assert_eq!(
            store.find_node_by_id("file:/a/b.rs").expect("lookup"),
            Some(node)
        );
    }

    #[test]
    fn non_finite_metrics_are_not_persisted() {
        let store = store();
        let mut node = Node::new("a", "file").with_metric("ok", 1.0);
        node.metrics.insert("bad".to_string(), f64::NAN);

        store.merge_node(&node).expect("merge");

        let stored = store.find_node_by_id("a").expect("lookup").expect("exists");
        assert!(stored.metrics.contains_key("ok"));
        assert!(!stored.metrics.contains_key("bad"));
    }

    #[test]
    fn find_by_property_walks_dotted_paths() {
        let store = store();
        store
            .merge_nodes(&[
                Node::new("a", "archive").with_property("manifest", json!({ "main": "App" })),
                Node::new("b", "archive").with_property("manifest", json!({ "main": "Other" })),
                Node::new("c", "file").with_property("lines.total", 3),
            ])
            .expect("merge");

        let hits = store
            .find_nodes_by_property("manifest.main", &json!("App"))
            .expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        let literal = store
            .find_nodes_by_property("lines.total", &json!(3))
            .expect("query");
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].id, "c");
    }

    #[test]
    fn delete_node_cascades_to_tags_and_edges() {
        let store = store();
        store
            .merge_nodes(&[
                Node::new("a", "directory").with_tag("resource"),
                Node::new("b", "file").with_tag("resource"),
            ])
            .expect("merge");
        store
            .create_edge(&Edge::new("a", "b", "contains"))
            .expect("edge");

        assert!(store.delete_node("b").expect("delete"));
        assert!(!store.delete_node("b").expect("second delete"));

        let stats = store.get_statistics().expect("stats");
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.edge_count, 0);
        assert_eq!(stats.tag_count, 1);
    }

    #[test]
    fn find_by_type_is_ordered_by_id() {
        let store = store();
        store
            .merge_nodes(&[
                Node::new("c", "file"),
                Node::new("a", "file"),
                Node::new("b", "directory"),
            ])
            .expect("merge");

        let files: Vec<_> = store
            .find_nodes_by_type("file")
            .expect("query")
            .into_iter()
            .map(|n| n.id)
            .collect();

        assert_eq!(files, vec!["a", "c"]);
        assert!(store.contains_node("b").expect("contains"));
        assert!(!store.contains_node("z").expect("contains"));
    }
}
