//! Edge creation and lookups.

use rusqlite::{params, OptionalExtension};
use tracing::trace;

use super::helpers::{row_to_edge, EDGE_COLUMNS};
use super::SqliteGraphStore;
use crate::error::{Error, Result};
use crate::types::Edge;

impl SqliteGraphStore {
    /// Insert edges in one transaction, ignoring ones that already exist.
    ///
    /// Both endpoints must exist; a dangling edge fails the whole batch.
    pub(super) fn insert_edges(&self, edges: &[Edge]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let mut created = 0;
        {
            let mut exists = tx.prepare_cached("SELECT 1 FROM nodes WHERE id = ?1")?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO edges (source, target, type, metadata)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(source, target, type) DO NOTHING",
            )?;

            for edge in edges {
                for endpoint in [&edge.source, &edge.target] {
                    if exists.query_row([endpoint], |_| Ok(())).optional()?.is_none() {
                        return Err(Error::NotFound(format!(
                            "edge endpoint '{endpoint}' ({} -[{}]-> {})",
                            edge.source, edge.target, edge.edge_type
                        )));
                    }
                }

                let metadata = edge
                    .metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                created += insert.execute(params![
                    edge.source,
                    edge.target,
                    edge.edge_type,
                    metadata
                ])?;
            }
        }
        tx.commit()?;

        trace!(requested = edges.len(), created, "Created edges");
        Ok(created)
    }

    /// Select edges matching a single-parameter condition.
    pub(super) fn edges_where(&self, condition: &str, value: &str) -> Result<Vec<Edge>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!("SELECT {EDGE_COLUMNS} FROM edges WHERE {condition}"))?;
        let edges = stmt
            .query_map([value], row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}
