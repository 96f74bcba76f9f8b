//! Static capability declarations.
//!
//! A declaration is plain data: the tags a unit needs before it can run
//! (`consumes`), the tags it may add (`produces`), and units that must be
//! ordered before it regardless of tags (`needs`).

use std::collections::BTreeSet;

use serde::Serialize;

/// What a unit consumes, produces and needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Tags that must all be present on an entity before the unit applies
    pub consumes: BTreeSet<String>,
    /// Tags the unit may add
    pub produces: BTreeSet<String>,
    /// Units that must be ordered before this one
    pub needs: BTreeSet<String>,
}

impl Capabilities {
    /// Empty declaration: consumes nothing, produces nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn consumes(mut self, tag: impl Into<String>) -> Self {
        self.consumes.insert(tag.into());
        self
    }

    #[must_use]
    pub fn produces(mut self, tag: impl Into<String>) -> Self {
        self.produces.insert(tag.into());
        self
    }

    #[must_use]
    pub fn needs(mut self, unit: impl Into<String>) -> Self {
        self.needs.insert(unit.into());
        self
    }

    /// Whether the unit can run on an entity without any prior tags.
    #[must_use]
    pub fn is_collector(&self) -> bool {
        self.consumes.is_empty()
    }
}
