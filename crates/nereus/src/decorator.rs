//! The mutation surface handed to a unit for one work item.
//!
//! A `Decorator` never touches the store. It buffers what the unit wants to
//! add: tags, properties, metrics, sums, observed nodes and edges. The
//! scheduler collects the buffers of a whole pass and commits them together
//! in a fixed order, so units inside one pass only ever see the snapshot taken
//! at pass start.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::warn;

use crate::types::{Edge, Node};

/// Tag added to every entity a unit failed on.
pub const ERROR_TAG: &str = "error";

/// Tag and property key recording that `unit` failed on an entity.
#[must_use]
pub fn error_key(unit: &str) -> String {
    format!("{ERROR_TAG}:{unit}")
}

/// Suffix of the counter property paired with an aggregated metric.
pub const COUNT_SUFFIX: &str = "_count";

/// A running sum contributed by one or more `aggregate_sum` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Sum {
    pub total: f64,
    pub count: u64,
}

/// Buffered additions to one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct NodeDelta {
    pub tags: BTreeSet<String>,
    pub properties: Map<String, Value>,
    pub metrics: BTreeMap<String, f64>,
    pub sums: BTreeMap<String, Sum>,
}

impl NodeDelta {
    /// Fold this delta onto a node: tags unioned, values overlaid, sums
    /// added to the existing metric with the paired counter incremented.
    pub(crate) fn apply_to(self, node: &mut Node) {
        node.tags.extend(self.tags);
        node.properties.extend(self.properties);
        node.metrics.extend(self.metrics);

        for (key, sum) in self.sums {
            *node.metrics.entry(key.clone()).or_insert(0.0) += sum.total;
            let count_key = format!("{key}{COUNT_SUFFIX}");
            let previous = node
                .properties
                .get(&count_key)
                .and_then(Value::as_u64)
                .unwrap_or(0);
            node.properties
                .insert(count_key, Value::from(previous + sum.count));
        }
    }
}

/// Everything one work item asked to write.
#[derive(Debug, Default)]
pub(crate) struct Writes {
    pub observed: Vec<Node>,
    pub updates: BTreeMap<String, NodeDelta>,
    pub edges: Vec<Edge>,
    pub errors: Vec<String>,
}

impl Writes {
    pub(crate) fn is_empty(&self) -> bool {
        self.observed.is_empty()
            && self.updates.is_empty()
            && self.edges.is_empty()
            && self.errors.is_empty()
    }
}

/// Write handle for one (unit, entity) work item.
#[derive(Debug)]
pub struct Decorator<'a> {
    unit: &'a str,
    entity: &'a str,
    writes: Writes,
}

impl<'a> Decorator<'a> {
    /// Decorator for `unit` working on `entity`.
    #[must_use]
    pub fn new(unit: &'a str, entity: &'a Node) -> Self {
        Self {
            unit,
            entity: &entity.id,
            writes: Writes::default(),
        }
    }

    /// Name of the unit this decorator writes for.
    #[must_use]
    pub fn unit(&self) -> &str {
        self.unit
    }

    /// Id of the entity under inspection.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        self.entity
    }

    fn delta(&mut self, id: &str) -> &mut NodeDelta {
        self.writes.updates.entry(id.to_string()).or_default()
    }

    /// Set a property on the entity, overwriting any previous value.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let entity = self.entity;
        self.delta(entity)
            .properties
            .insert(key.into(), value.into());
    }

    /// Add a tag to the entity.
    pub fn enable_tag(&mut self, tag: impl Into<String>) {
        let entity = self.entity;
        self.delta(entity).tags.insert(tag.into());
    }

    /// Set a metric on the entity. Non-finite values are dropped.
    pub fn set_metric(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        if !value.is_finite() {
            warn!(unit = %self.unit, entity = %self.entity, metric = %key, "Dropping non-finite metric");
            return;
        }
        let entity = self.entity;
        self.delta(entity).metrics.insert(key, value);
    }

    /// Add `value` to the entity's metric `key` and count the contribution
    /// in the property `<key>_count`.
    pub fn aggregate_sum(&mut self, key: impl Into<String>, value: f64) {
        let entity = self.entity;
        self.aggregate_sum_to(entity, key, value);
    }

    /// Roll `value` up onto another entity, typically the container.
    ///
    /// Sums onto an entity that does not exist at commit time are dropped.
    pub fn aggregate_sum_to(&mut self, target: &str, key: impl Into<String>, value: f64) {
        let key = key.into();
        if !value.is_finite() {
            warn!(unit = %self.unit, target = %target, metric = %key, "Dropping non-finite sum");
            return;
        }
        let sum = self.delta(target).sums.entry(key).or_default();
        sum.total += value;
        sum.count += 1;
    }

    /// Report a node; it is merged with any existing node of the same id.
    pub fn observe_node(&mut self, node: Node) {
        self.writes.observed.push(node);
    }

    /// Relate two nodes. Duplicate `(source, target, type)` edges are ignored.
    pub fn create_edge(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: impl Into<String>,
        metadata: Option<Value>,
    ) {
        self.writes.edges.push(Edge {
            source: source.into(),
            target: target.into(),
            edge_type: edge_type.into(),
            metadata,
        });
    }

    /// Record a failure on the entity without aborting the unit.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        let key = error_key(self.unit);
        let entity = self.entity;
        let delta = self.delta(entity);
        delta.tags.insert(ERROR_TAG.to_string());
        delta.tags.insert(key.clone());
        delta.properties.insert(key, Value::String(message.clone()));
        self.writes.errors.push(message);
    }

    /// Whether [`error`](Self::error) was called.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.writes.errors.is_empty()
    }

    pub(crate) fn into_writes(self) -> Writes {
        self.writes
    }
}

/// Writes recording only a failure, used when a unit's own writes are
/// discarded.
pub(crate) fn failure_writes(unit: &str, entity: &Node, message: &str) -> Writes {
    let mut decorator = Decorator::new(unit, entity);
    decorator.error(message);
    decorator.into_writes()
}
