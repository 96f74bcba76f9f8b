//! Explicit registry of analysis units.
//!
//! Units are registered in code, in a fixed order. Registration order is the
//! tie-breaker everywhere: dependency ordering, commit order and
//! last-writer-wins for duplicate producers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::capability::Capabilities;
use crate::error::{Diagnostic, DiagnosticKind, Error, Result};
use crate::unit::AnalysisUnit;

/// Ordered set of uniquely named units.
#[derive(Default)]
pub struct UnitRegistry {
    units: Vec<Box<dyn AnalysisUnit>>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("units", &self.names())
            .finish()
    }
}

impl UnitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit. Names must be unique.
    pub fn register(&mut self, unit: Box<dyn AnalysisUnit>) -> Result<()> {
        let name = unit.name().to_string();
        if name.is_empty() {
            return Err(Error::Config("unit name must not be empty".to_string()));
        }
        if self.by_name.contains_key(&name) {
            return Err(Error::Config(format!("unit '{name}' is registered twice")));
        }

        debug!(unit = %name, position = self.units.len(), "Registered unit");
        self.by_name.insert(name, self.units.len());
        self.units.push(unit);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, unit: impl AnalysisUnit + 'static) -> Result<Self> {
        self.register(Box::new(unit))?;
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit at a registration position.
    #[must_use]
    pub fn unit(&self, position: usize) -> Option<&dyn AnalysisUnit> {
        self.units.get(position).map(|unit| -> &dyn AnalysisUnit { unit.as_ref() })
    }

    /// Look up a unit by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn AnalysisUnit> {
        self.position(name).and_then(|i| self.unit(i))
    }

    /// Registration position of a unit.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Units in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn AnalysisUnit> {
        self.units.iter().map(|unit| -> &dyn AnalysisUnit { unit.as_ref() })
    }

    /// Unit names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|unit| unit.name()).collect()
    }

    /// `(name, capabilities)` per unit, in registration order.
    #[must_use]
    pub fn declarations(&self) -> Vec<(String, Capabilities)> {
        self.iter()
            .map(|u| (u.name().to_string(), u.capabilities()))
            .collect()
    }

    /// Check the declarations once, before a run.
    ///
    /// Nothing here is fatal: consumed tags without a producer and `needs`
    /// naming unknown units are unresolved dependencies, and tags with more
    /// than one producer are duplicate producers.
    #[must_use]
    pub fn validate(&self) -> Vec<Diagnostic> {
        let declarations = self.declarations();
        let mut diagnostics = Vec::new();

        let mut producers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, caps) in &declarations {
            for tag in &caps.produces {
                producers.entry(tag.as_str()).or_default().push(name.as_str());
            }
        }

        for (name, caps) in &declarations {
            let missing: BTreeSet<&str> = caps
                .consumes
                .iter()
                .map(String::as_str)
                .filter(|tag| !producers.contains_key(tag))
                .collect();
            if !missing.is_empty() {
                diagnostics.push(Diagnostic::unresolved(
                    name,
                    format!(
                        "consumes tags no unit produces: {}",
                        missing.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                ));
            }

            for needed in &caps.needs {
                if !self.by_name.contains_key(needed) {
                    diagnostics.push(Diagnostic::unresolved(
                        name,
                        format!("needs unknown unit '{needed}'"),
                    ));
                }
            }
        }

        for (tag, units) in producers {
            if units.len() > 1 {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::DuplicateProducer,
                    format!(
                        "tag '{tag}' is produced by {}; the last registered writer wins",
                        units.join(", ")
                    ),
                ));
            }
        }

        diagnostics
    }
}
