//! End-of-pass commit of buffered decorator writes.
//!
//! Work items of a pass run against the snapshot taken at pass start and
//! return their writes instead of applying them. This module folds those
//! writes onto the stored state and persists them:
//!
//! ```text
//! results ── sort by (unit position, entity) ──┐
//!                                              ▼
//!   observed nodes ── absorb onto stored ──> staged nodes ── merge_nodes (batch_size per tx)
//!   node deltas ───── apply onto staged ───┘
//!   edges ─────────── drop dangling ───────> create_edges (batch_size per tx)
//!   outcomes ──────────────────────────────> record_unit_runs
//! ```
//!
//! The fixed sort order is what makes last-writer-wins deterministic when two
//! units write the same key on the same entity.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::decorator::Writes;
use crate::error::Result;
use crate::store::GraphStore;
use crate::types::{Edge, Node, Outcome, UnitRun};

/// What one (unit, entity) work item produced.
#[derive(Debug)]
pub(crate) struct WorkResult {
    /// Registration position of the unit
    pub unit_position: usize,
    pub unit: String,
    pub entity: String,
    pub outcome: Outcome,
    pub writes: Writes,
    /// Failure message for [`Outcome::Error`]
    pub message: Option<String>,
}

/// Statistics about one commit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitStats {
    /// Nodes written (created or updated)
    pub nodes_written: usize,
    /// Node and edge transactions committed
    pub batches_committed: usize,
    /// Edges that did not exist before
    pub edges_created: usize,
    /// Edges dropped because an endpoint does not exist
    pub edges_dropped: usize,
    /// Ledger rows written
    pub runs_recorded: usize,
    /// Updates dropped because their target node does not exist
    pub targets_missing: usize,
    /// Work items that ran but wrote nothing
    pub idle_runs: usize,
}

/// Persist the outcome of one pass.
///
/// Errors come only from the store; a failed transaction leaves earlier
/// batches of this pass committed and the ledger untouched, so the affected
/// pairs run again next time.
pub(crate) fn commit_pass(
    store: &dyn GraphStore,
    mut results: Vec<WorkResult>,
    pass: u32,
    batch_size: usize,
) -> Result<CommitStats> {
    results.sort_by(|a, b| {
        a.unit_position
            .cmp(&b.unit_position)
            .then_with(|| a.entity.cmp(&b.entity))
    });

    let mut stats = CommitStats::default();
    let mut staged: BTreeMap<String, Node> = BTreeMap::new();
    let mut edges: Vec<Edge> = Vec::new();
    let mut runs: Vec<UnitRun> = Vec::with_capacity(results.len());

    for result in results {
        let WorkResult {
            unit,
            entity,
            outcome,
            writes,
            message,
            ..
        } = result;

        if writes.is_empty() {
            stats.idle_runs += 1;
        }

        for observed in writes.observed {
            match staged_node(store, &mut staged, &observed.id)? {
                Some(node) => node.absorb(observed),
                None => {
                    staged.insert(observed.id.clone(), observed);
                }
            }
        }

        for (target, delta) in writes.updates {
            match staged_node(store, &mut staged, &target)? {
                Some(node) => delta.apply_to(node),
                None => {
                    warn!(unit = %unit, target = %target, "Dropping writes to a node that does not exist");
                    stats.targets_missing += 1;
                }
            }
        }

        edges.extend(writes.edges);
        runs.push(UnitRun {
            unit,
            node_id: entity,
            outcome,
            pass,
            message,
        });
    }

    let batch_size = batch_size.max(1);
    let nodes: Vec<Node> = staged.into_values().collect();
    for chunk in nodes.chunks(batch_size) {
        trace!(batch_size = chunk.len(), "Writing node batch");
        stats.nodes_written += store.merge_nodes(chunk)?;
        stats.batches_committed += 1;
    }

    let mut live = Vec::with_capacity(edges.len());
    for edge in edges {
        if store.contains_node(&edge.source)? && store.contains_node(&edge.target)? {
            live.push(edge);
        } else {
            warn!(
                source = %edge.source,
                target = %edge.target,
                edge_type = %edge.edge_type,
                "Dropping edge with a missing endpoint"
            );
            stats.edges_dropped += 1;
        }
    }
    for chunk in live.chunks(batch_size) {
        stats.edges_created += store.create_edges(chunk)?;
        stats.batches_committed += 1;
    }

    stats.runs_recorded = store.record_unit_runs(&runs)?;

    debug!(
        pass,
        nodes = stats.nodes_written,
        edges = stats.edges_created,
        runs = stats.runs_recorded,
        idle = stats.idle_runs,
        "Committed pass"
    );
    Ok(stats)
}

/// The staged copy of a node, loading it from the store on first touch.
fn staged_node<'a>(
    store: &dyn GraphStore,
    staged: &'a mut BTreeMap<String, Node>,
    id: &str,
) -> Result<Option<&'a mut Node>> {
    if !staged.contains_key(id) {
        match store.find_node_by_id(id)? {
            Some(node) => {
                staged.insert(id.to_string(), node);
            }
            None => return Ok(None),
        }
    }
    Ok(staged.get_mut(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorator::Decorator;
    use crate::store::SqliteGraphStore;
    use serde_json::json;

    fn result(
        position: usize,
        unit: &str,
        entity: &Node,
        build: impl FnOnce(&mut Decorator<'_>),
    ) -> WorkResult {
        let mut decorator = Decorator::new(unit, entity);
        build(&mut decorator);
        WorkResult {
            unit_position: position,
            unit: unit.to_string(),
            entity: entity.id.clone(),
            outcome: Outcome::Ran,
            writes: decorator.into_writes(),
            message: None,
        }
    }

    #[test]
    fn later_registered_unit_wins_regardless_of_completion_order() {
        let store = SqliteGraphStore::open_in_memory().expect("open store");
        let entity = Node::new("n", "file").with_tag("keep");
        store.merge_node(&entity).expect("seed");

        let results = vec![
            result(1, "second", &entity, |d| d.set_property("kind", "second")),
            result(0, "first", &entity, |d| {
                d.set_property("kind", "first");
                d.enable_tag("t");
            }),
        ];

        let stats = commit_pass(&store, results, 1, 16).expect("commit");

        let node = store.find_node_by_id("n").expect("query").expect("exists");
        assert_eq!(node.properties["kind"], json!("second"));
        assert!(node.has_tag("keep") && node.has_tag("t"));
        assert_eq!(stats.nodes_written, 1);
        assert_eq!(stats.runs_recorded, 2);
    }

    #[test]
    fn observed_nodes_and_edges_are_written_and_dangling_edges_dropped() {
        let store = SqliteGraphStore::open_in_memory().expect("open store");
        let root = Node::new("root", "directory");
        store.merge_node(&root).expect("seed");

        let results = vec![result(0, "collector", &root, |d| {
            d.observe_node(Node::new("root/a", "file"));
            d.create_edge("root", "root/a", "contains", None);
            d.create_edge("root", "ghost", "contains", None);
        })];

        let stats = commit_pass(&store, results, 1, 1).expect("commit");

        assert!(store.contains_node("root/a").expect("query"));
        assert_eq!(stats.edges_created, 1);
        assert_eq!(stats.edges_dropped, 1);
        assert_eq!(store.find_outgoing_edges("root").expect("query").len(), 1);
    }

    #[test]
    fn runs_without_writes_are_recorded_as_idle() {
        let store = SqliteGraphStore::open_in_memory().expect("open store");
        let a = Node::new("a", "file");
        let b = Node::new("b", "file");
        store.merge_nodes(&[a.clone(), b.clone()]).expect("seed");

        let results = vec![
            result(0, "checker", &a, |_| {}),
            result(0, "checker", &b, |d| d.enable_tag("checked")),
        ];

        let stats = commit_pass(&store, results, 1, 8).expect("commit");

        assert_eq!(stats.idle_runs, 1);
        assert_eq!(stats.runs_recorded, 2);
        assert_eq!(stats.nodes_written, 1);
        assert_eq!(store.completed_unit_runs().expect("ledger").len(), 2);
    }

    #[test]
    fn sums_accumulate_across_work_items() {
        let store = SqliteGraphStore::open_in_memory().expect("open store");
        let dir = Node::new("dir", "directory");
        let a = Node::new("dir/a", "file");
        let b = Node::new("dir/b", "file");
        store
            .merge_nodes(&[dir, a.clone(), b.clone()])
            .expect("seed");

        let results = vec![
            result(0, "counter", &a, |d| d.aggregate_sum_to("dir", "lines", 3.0)),
            result(0, "counter", &b, |d| d.aggregate_sum_to("dir", "lines", 4.0)),
            result(0, "counter", &a, |d| d.aggregate_sum_to("missing", "lines", 1.0)),
        ];

        let stats = commit_pass(&store, results, 1, 8).expect("commit");

        let dir = store.find_node_by_id("dir").expect("query").expect("exists");
        assert!((dir.metrics["lines"] - 7.0).abs() < f64::EPSILON);
        assert_eq!(dir.properties["lines_count"], json!(2));
        assert_eq!(stats.targets_missing, 1);
    }
}
