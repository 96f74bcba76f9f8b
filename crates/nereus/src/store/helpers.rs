//! Row conversion helpers and shared column lists.

use std::collections::BTreeSet;

use rusqlite::types::Type;
use serde_json::{Map, Value};

use crate::types::{Edge, Node, Outcome, UnitRun};

/// SQL column list for nodes (aliased `n`), tags folded into a JSON array.
///
/// Use with `row_to_node` for consistent column ordering.
pub(crate) const NODE_COLUMNS: &str = "n.id, n.type, n.display_label, n.properties, n.metrics, \
     (SELECT json_group_array(t.tag) FROM tags t WHERE t.node_id = n.id)";

/// SQL column list for edges.
///
/// Use with `row_to_edge` for consistent column ordering.
pub(crate) const EDGE_COLUMNS: &str = "source, target, type, metadata";

/// SQL column list for the unit run ledger.
pub(crate) const RUN_COLUMNS: &str = "unit, node_id, outcome, pass, message";

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn parse_json<T: serde::de::DeserializeOwned>(index: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        conversion_error(
            index,
            format!("Malformed JSON in column {index}: {e}. Database may be corrupted."),
        )
    })
}

/// Convert a row selected with [`NODE_COLUMNS`] into a `Node`.
pub(crate) fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let properties: Map<String, Value> = parse_json(3, &row.get::<_, String>(3)?)?;
    let metrics = parse_json(4, &row.get::<_, String>(4)?)?;
    let tags: BTreeSet<String> = parse_json(5, &row.get::<_, String>(5)?)?;

    Ok(Node {
        id: row.get(0)?,
        node_type: row.get(1)?,
        display_label: row.get(2)?,
        properties,
        tags,
        metrics,
    })
}

/// Convert a row selected with [`EDGE_COLUMNS`] into an `Edge`.
pub(crate) fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    let metadata = row
        .get::<_, Option<String>>(3)?
        .map(|raw| parse_json::<Value>(3, &raw))
        .transpose()?;

    Ok(Edge {
        source: row.get(0)?,
        target: row.get(1)?,
        edge_type: row.get(2)?,
        metadata,
    })
}

/// Convert a row selected with [`RUN_COLUMNS`] into a `UnitRun`.
pub(crate) fn row_to_unit_run(row: &rusqlite::Row) -> rusqlite::Result<UnitRun> {
    let outcome_str: String = row.get(2)?;
    let outcome = Outcome::parse(&outcome_str).ok_or_else(|| {
        conversion_error(
            2,
            format!("Unknown outcome '{outcome_str}' in database. Database may be corrupted or from a newer version."),
        )
    })?;

    Ok(UnitRun {
        unit: row.get(0)?,
        node_id: row.get(1)?,
        outcome,
        pass: row.get(3)?,
        message: row.get(4)?,
    })
}

/// Build `?1, ?2, ...` placeholders starting at `first`.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
