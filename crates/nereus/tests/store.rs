//! Tests for the `SQLite` graph store: merge-upsert, tag predicates, edges and
//! sharing across threads.

use std::collections::BTreeSet;

use nereus::{Edge, GraphStore, Node, Outcome, SqliteGraphStore, UnitRun};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

const TAG_POOL: &[&str] = &["a", "b", "c", "d", "e"];
const TYPE_POOL: &[&str] = &["file", "directory"];

fn open_store() -> SqliteGraphStore {
    SqliteGraphStore::open_in_memory().expect("open in-memory store")
}

fn ids(nodes: &[Node]) -> BTreeSet<String> {
    nodes.iter().map(|n| n.id.clone()).collect()
}

// === Merge-upsert ===

#[test]
fn merging_the_same_id_twice_keeps_one_row_with_the_latest_values() {
    let store = open_store();

    store
        .merge_node(&Node::new("n", "file").with_property("size", 1).with_tag("old"))
        .expect("first merge");
    store
        .merge_node(&Node::new("n", "file").with_property("size", 2).with_tag("new"))
        .expect("second merge");

    let stats = store.get_statistics().expect("stats");
    assert_eq!(stats.node_count, 1);
    let node = store.find_node_by_id("n").expect("query").expect("exists");
    assert_eq!(node.properties["size"], json!(2));
    assert_eq!(node.tags, BTreeSet::from(["new".to_string()]));
}

#[test]
fn nested_properties_are_queryable_by_dotted_path() {
    let store = open_store();
    store
        .merge_nodes(&[
            Node::new("a", "file").with_property("manifest", json!({ "version": "1.0" })),
            Node::new("b", "file").with_property("manifest", json!({ "version": "2.0" })),
            Node::new("c", "file"),
        ])
        .expect("seed");

    let found = store
        .find_nodes_by_property("manifest.version", &json!("2.0"))
        .expect("query");

    assert_eq!(ids(&found), BTreeSet::from(["b".to_string()]));
}

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("graph.db");

    {
        let store = SqliteGraphStore::open(&path).expect("open");
        store
            .merge_node(&Node::new("n", "file").with_metric("lines", 4.0))
            .expect("merge");
        store
            .record_unit_runs(&[UnitRun {
                unit: "u".to_string(),
                node_id: "n".to_string(),
                outcome: Outcome::Ran,
                pass: 1,
                message: None,
            }])
            .expect("ledger");
    }

    let store = SqliteGraphStore::open(&path).expect("reopen");
    let node = store.find_node_by_id("n").expect("query").expect("exists");
    assert!((node.metrics["lines"] - 4.0).abs() < f64::EPSILON);
    assert_eq!(store.completed_unit_runs().expect("ledger").len(), 1);
}

#[test]
fn reset_removes_everything_on_disk() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("graph.db");
    let mut store = SqliteGraphStore::open(&path).expect("open");
    store.merge_node(&Node::new("n", "file")).expect("merge");

    store.reset().expect("reset");

    assert_eq!(store.get_statistics().expect("stats").node_count, 0);
    assert!(path.exists(), "reset reopens a fresh database");
}

// === Edges ===

#[test]
fn duplicate_edge_creation_yields_one_row() {
    let store = open_store();
    store
        .merge_nodes(&[Node::new("x", "file"), Node::new("y", "file")])
        .expect("seed");

    let edge = Edge::new("x", "y", "contains");
    assert!(store.create_edge(&edge).expect("first create"));
    assert!(!store.create_edge(&edge).expect("second create"));

    assert_eq!(store.find_outgoing_edges("x").expect("query"), vec![edge]);
    assert_eq!(store.get_statistics().expect("stats").edge_count, 1);
}

#[test]
fn deleting_a_node_removes_its_edges() {
    let store = open_store();
    store
        .merge_nodes(&[Node::new("x", "file"), Node::new("y", "file")])
        .expect("seed");
    store
        .create_edge(&Edge::new("x", "y", "contains"))
        .expect("edge");

    assert!(store.delete_node("y").expect("delete"));

    assert!(store.find_outgoing_edges("x").expect("query").is_empty());
    assert!(!store.delete_node("y").expect("second delete"));
}

// === Concurrency ===

#[test]
fn concurrent_merges_of_the_same_ids_never_duplicate_rows() {
    let store = open_store();

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let store = &store;
            scope.spawn(move || {
                for i in 0..20 {
                    let node = Node::new(format!("n{i}"), "file").with_tag(format!("w{worker}"));
                    store.merge_node(&node).expect("merge");
                }
            });
        }
    });

    assert_eq!(store.get_statistics().expect("stats").node_count, 20);
}

// === Tag predicate algebra ===

fn arb_nodes() -> impl Strategy<Value = Vec<Node>> {
    vec(
        (
            btree_set(prop::sample::select(TAG_POOL), 0..4),
            prop::sample::select(TYPE_POOL),
        ),
        1..25,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (tags, node_type))| {
                let mut node = Node::new(format!("n{i:02}"), node_type);
                node.tags = tags.into_iter().map(String::from).collect();
                node
            })
            .collect()
    })
}

fn arb_query() -> impl Strategy<Value = Vec<&'static str>> {
    vec(prop::sample::select(TAG_POOL), 0..4)
}

proptest! {
    /// Any-of is the union of the single-tag results.
    #[test]
    fn any_of_is_union_of_single_tag_queries(nodes in arb_nodes(), query in arb_query()) {
        let store = open_store();
        store.merge_nodes(&nodes).expect("seed");

        let any = ids(&store.find_nodes_by_any_tags(&query).expect("any"));
        let mut union = BTreeSet::new();
        for tag in &query {
            union.extend(ids(&store.find_nodes_by_tag(tag).expect("tag")));
        }

        prop_assert_eq!(any, union);
    }

    /// All-of is the intersection of the single-tag results; the empty query
    /// matches every node.
    #[test]
    fn all_of_is_intersection_of_single_tag_queries(nodes in arb_nodes(), query in arb_query()) {
        let store = open_store();
        store.merge_nodes(&nodes).expect("seed");

        let all = ids(&store.find_nodes_by_all_tags(&query).expect("all"));
        let mut intersection = ids(&nodes);
        for tag in &query {
            let with_tag = ids(&store.find_nodes_by_tag(tag).expect("tag"));
            intersection = intersection.intersection(&with_tag).cloned().collect();
        }

        prop_assert_eq!(all, intersection);
    }

    /// Typed variants equal the untyped result filtered by type.
    #[test]
    fn typed_queries_filter_untyped_results(
        nodes in arb_nodes(),
        query in arb_query(),
        node_type in prop::sample::select(TYPE_POOL),
    ) {
        let store = open_store();
        store.merge_nodes(&nodes).expect("seed");

        let of_type = ids(&store.find_nodes_by_type(node_type).expect("type"));
        let any = ids(&store.find_nodes_by_any_tags(&query).expect("any"));
        let all = ids(&store.find_nodes_by_all_tags(&query).expect("all"));

        let typed_any = ids(&store.find_nodes_by_type_and_any_tags(node_type, &query).expect("typed any"));
        let typed_all = ids(&store.find_nodes_by_type_and_all_tags(node_type, &query).expect("typed all"));

        prop_assert_eq!(typed_any, any.intersection(&of_type).cloned().collect::<BTreeSet<_>>());
        prop_assert_eq!(typed_all, all.intersection(&of_type).cloned().collect::<BTreeSet<_>>());
    }
}
