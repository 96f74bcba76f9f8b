//! Tag predicate queries.
//!
//! Any-of uses `IN (...)` over the tag index; all-of groups the matching tag
//! rows per node and keeps nodes that matched every distinct requested tag.

use std::collections::BTreeSet;

use rusqlite::params_from_iter;

use super::helpers::{placeholders, NODE_COLUMNS};
use super::SqliteGraphStore;
use crate::error::Result;
use crate::types::Node;

/// How a set of tags is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TagMatch {
    /// At least one tag (OR)
    Any,
    /// Every tag (AND)
    All,
}

impl SqliteGraphStore {
    pub(super) fn nodes_by_tags(
        &self,
        node_type: Option<&str>,
        tags: &[&str],
        mode: TagMatch,
    ) -> Result<Vec<Node>> {
        let tags: BTreeSet<&str> = tags.iter().copied().collect();

        if tags.is_empty() {
            return match (mode, node_type) {
                (TagMatch::Any, _) => Ok(Vec::new()),
                (TagMatch::All, Some(node_type)) => self.nodes_of_type(node_type),
                (TagMatch::All, None) => self.every_node(),
            };
        }

        let tag_list = placeholders(1, tags.len());
        let subquery = match mode {
            TagMatch::Any => format!("SELECT node_id FROM tags WHERE tag IN ({tag_list})"),
            TagMatch::All => format!(
                "SELECT node_id FROM tags WHERE tag IN ({tag_list})
                 GROUP BY node_id HAVING COUNT(DISTINCT tag) = {}",
                tags.len()
            ),
        };

        let mut sql = format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.id IN ({subquery})");
        let mut values: Vec<&str> = tags.into_iter().collect();
        if let Some(node_type) = node_type {
            sql.push_str(&format!(" AND n.type = ?{}", values.len() + 1));
            values.push(node_type);
        }
        sql.push_str(" ORDER BY n.id");

        self.query_nodes(&sql, params_from_iter(values))
    }
}
