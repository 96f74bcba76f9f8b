//! Domain types for the Nereus property graph.
//!
//! These types represent the core domain model:
//! - **Entities**: `Node`, `Edge` (stored in the graph store)
//! - **Ledger**: `UnitRun`, `Outcome` (which unit completed on which entity)
//! - **Results**: `GraphStats` (query results)
//!
//! ## Design Decisions
//!
//! | Decision | Choice | Rationale |
//! |----------|--------|-----------|
//! | Node id | String | Normalized URI or qualified name, stable across runs |
//! | Tags | `BTreeSet` | Deterministic iteration, cheap membership checks |
//! | Properties | JSON object | Heterogeneous and sparse per node type |
//! | Metrics | `BTreeMap<String, f64>` | Numeric roll-ups, kept apart from properties |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Nodes
// ============================================================================

/// An addressable unit of analysis: a file, a symbol, a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique, stable identifier
    pub id: String,
    /// Node type (e.g. `file`, `directory`, `class`)
    #[serde(rename = "type")]
    pub node_type: String,
    /// Human-readable label
    pub display_label: String,
    /// Structured, path-addressable properties
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Boolean markers used for unit applicability and queries
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Numeric measurements
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl Node {
    /// Create a node with no properties, tags or metrics.
    ///
    /// The display label defaults to the id.
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_label: id.clone(),
            id,
            node_type: node_type.into(),
            properties: Map::new(),
            tags: BTreeSet::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Set the display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.display_label = label.into();
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set a top-level property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set a metric. Non-finite values are ignored.
    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        if value.is_finite() {
            self.metrics.insert(key.into(), value);
        }
        self
    }

    /// Whether the node carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether the node carries every tag in `tags`.
    pub fn has_all_tags<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        tags.into_iter().all(|t| self.tags.contains(t))
    }

    /// Look up a property by dotted path (`a.b.c`).
    ///
    /// A top-level key containing dots is matched before the path is split.
    #[must_use]
    pub fn property_at(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.properties.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.properties.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Fold another observation of the same entity into this node.
    ///
    /// Tags are unioned and properties/metrics overlaid; nothing already present
    /// is removed. Type and label follow the newer observation.
    pub fn absorb(&mut self, other: Node) {
        debug_assert_eq!(self.id, other.id, "absorb requires matching ids");
        self.node_type = other.node_type;
        self.display_label = other.display_label;
        self.tags.extend(other.tags);
        self.properties.extend(other.properties);
        self.metrics.extend(other.metrics);
    }

    /// Number of facts this node contributes to the monotone counter.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        1 + self.tags.len() + self.properties.len() + self.metrics.len()
    }
}

// ============================================================================
// Edges
// ============================================================================

/// A typed relationship between two nodes.
///
/// Identity is the `(source, target, edge_type)` triple; metadata is not part
/// of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Relationship type (e.g. `contains`, `imports`)
    #[serde(rename = "type")]
    pub edge_type: String,
    /// Optional structured metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Edge {
    /// Create an edge without metadata.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            edge_type: edge_type.into(),
            metadata: None,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ============================================================================
// Unit runs
// ============================================================================

/// Outcome of one (unit, entity) work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The unit inspected the entity
    Ran,
    /// The unit was not applicable (type, missing tags, `supports` or an
    /// explicit not-applicable return)
    SkippedNotApplicable,
    /// The unit failed or panicked on the entity
    Error,
}

impl Outcome {
    /// Stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ran => "ran",
            Self::SkippedNotApplicable => "skipped_not_applicable",
            Self::Error => "error",
        }
    }

    /// Parse the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ran" => Some(Self::Ran),
            "skipped_not_applicable" => Some(Self::SkippedNotApplicable),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed (unit, entity) pair in the run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRun {
    /// Unit name
    pub unit: String,
    /// Entity (node id) the unit completed on
    pub node_id: String,
    /// How it completed
    pub outcome: Outcome,
    /// Pass number (1-based) in which it completed
    pub pass: u32,
    /// Error message for failed runs
    pub message: Option<String>,
}

// ============================================================================
// Results
// ============================================================================

/// Store-wide counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Number of nodes
    pub node_count: usize,
    /// Number of edges
    pub edge_count: usize,
    /// Number of tag assignments (node, tag)
    pub tag_count: usize,
    /// Number of distinct tag names
    pub distinct_tag_count: usize,
}
