//! Producer/consumer dependency graph over registered units.
//!
//! Edges point from a unit to the units that depend on it:
//!
//! - `producer -> consumer` for every tag the consumer consumes
//! - `needed -> unit` for every hard `needs` entry
//!
//! Ordering is a topological sort that prefers registration order among
//! ready units. Cycles are not fatal: strongly connected components are
//! found with Tarjan's algorithm, reported, and ordered as a block (members
//! in registration order). The pass loop resolves whatever the order cannot.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::{debug, warn};

use crate::capability::Capabilities;
use crate::error::{Diagnostic, DiagnosticKind};

/// Why one unit is ordered before another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// The source produces a tag the target consumes
    Tag(String),
    /// The target declares it needs the source
    Needs,
}

/// A set of units that depend on each other in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Participating units, in registration order
    pub units: Vec<String>,
    /// Tags flowing along the cycle's edges
    pub tags: BTreeSet<String>,
}

/// Dependency graph with a best-effort execution order.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<String, Dependency>,
    order: Vec<usize>,
    cycles: Vec<CycleReport>,
    depth: usize,
    producers: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from `(name, capabilities)` in registration order.
    #[must_use]
    pub fn build(declarations: &[(String, Capabilities)]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = declarations
            .iter()
            .map(|(name, _)| graph.add_node(name.clone()))
            .collect();

        let mut producers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut producer_nodes: BTreeMap<&str, Vec<NodeIndex>> = BTreeMap::new();
        for ((name, caps), node) in declarations.iter().zip(&nodes) {
            for tag in &caps.produces {
                producers.entry(tag.clone()).or_default().push(name.clone());
                producer_nodes.entry(tag.as_str()).or_default().push(*node);
            }
        }

        for ((_, caps), &consumer) in declarations.iter().zip(&nodes) {
            for tag in &caps.consumes {
                for &producer in producer_nodes.get(tag.as_str()).into_iter().flatten() {
                    graph.add_edge(producer, consumer, Dependency::Tag(tag.clone()));
                }
            }
            for needed in &caps.needs {
                if let Some(position) = declarations.iter().position(|(n, _)| n == needed) {
                    graph.add_edge(nodes[position], consumer, Dependency::Needs);
                }
            }
        }

        let (order, cycles, depth) = Self::order_components(&graph);

        if cycles.is_empty() {
            debug!(units = order.len(), depth, "Dependency graph is acyclic");
        } else {
            for cycle in &cycles {
                warn!(
                    units = ?cycle.units,
                    tags = ?cycle.tags,
                    "Cycle in unit dependencies; ordering as a block"
                );
            }
        }

        Self {
            graph,
            order,
            cycles,
            depth,
            producers,
        }
    }

    /// Condense SCCs, then run Kahn's algorithm over the condensation,
    /// releasing ready components lowest registration index first.
    fn order_components(graph: &DiGraph<String, Dependency>) -> (Vec<usize>, Vec<CycleReport>, usize) {
        let mut components: Vec<Vec<usize>> = algo::tarjan_scc(graph)
            .into_iter()
            .map(|scc| {
                let mut members: Vec<usize> = scc.into_iter().map(NodeIndex::index).collect();
                members.sort_unstable();
                members
            })
            .collect();
        components.sort_by_key(|members| members[0]);

        let mut component_of = vec![0; graph.node_count()];
        for (c, members) in components.iter().enumerate() {
            for &m in members {
                component_of[m] = c;
            }
        }

        let mut cycles = Vec::new();
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
        let mut in_degree = vec![0usize; components.len()];
        let mut internal_tags: Vec<BTreeSet<String>> = vec![BTreeSet::new(); components.len()];
        let mut self_loop = vec![false; components.len()];

        for edge in graph.edge_references() {
            let from = component_of[edge.source().index()];
            let to = component_of[edge.target().index()];
            if from == to {
                if edge.source() == edge.target() {
                    self_loop[from] = true;
                }
                if let Dependency::Tag(tag) = edge.weight() {
                    internal_tags[from].insert(tag.clone());
                }
            } else if successors[from].insert(to) {
                in_degree[to] += 1;
            }
        }

        for (c, members) in components.iter().enumerate() {
            if members.len() > 1 || self_loop[c] {
                cycles.push(CycleReport {
                    units: members.iter().map(|&m| graph[NodeIndex::new(m)].clone()).collect(),
                    tags: std::mem::take(&mut internal_tags[c]),
                });
            }
        }

        // Components are numbered by lowest member, so the heap key doubles
        // as registration priority
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(c, _)| Reverse(c))
            .collect();
        let mut depth_of = vec![0usize; components.len()];
        let mut order = Vec::with_capacity(graph.node_count());

        while let Some(Reverse(c)) = ready.pop() {
            depth_of[c] += components[c].len();
            order.extend(&components[c]);
            for &next in &successors[c] {
                depth_of[next] = depth_of[next].max(depth_of[c]);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        let depth = depth_of.into_iter().max().unwrap_or(0);
        (order, cycles, depth)
    }

    /// Registration positions in execution order.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Unit names in execution order.
    #[must_use]
    pub fn ordered_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.graph[NodeIndex::new(i)].as_str())
            .collect()
    }

    #[must_use]
    pub fn cycles(&self) -> &[CycleReport] {
        &self.cycles
    }

    #[must_use]
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Longest dependency chain, counted in units.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Units declaring that they produce `tag`, in registration order.
    #[must_use]
    pub fn producers_of(&self, tag: &str) -> &[String] {
        self.producers.get(tag).map_or(&[][..], Vec::as_slice)
    }

    /// Units that `unit` directly depends on.
    #[must_use]
    pub fn dependencies_of(&self, unit: &str) -> Vec<&str> {
        let Some(node) = self.graph.node_indices().find(|&n| self.graph[n] == unit) else {
            return Vec::new();
        };
        let upstream: BTreeSet<&str> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| self.graph[edge.source()].as_str())
            .collect();
        upstream.into_iter().collect()
    }

    /// One `CycleDetected` diagnostic per cycle.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.cycles
            .iter()
            .map(|cycle| {
                let tags = if cycle.tags.is_empty() {
                    "needs".to_string()
                } else {
                    cycle.tags.iter().cloned().collect::<Vec<_>>().join(", ")
                };
                Diagnostic::new(
                    DiagnosticKind::CycleDetected,
                    format!("units {} form a cycle via {tags}", cycle.units.join(", ")),
                )
            })
            .collect()
    }
}
