//! The analysis unit SPI.
//!
//! A unit is a self-contained analysis step. It declares what it consumes and
//! produces, and inspects one entity at a time through a [`Decorator`], which
//! is the only way it can change the graph.

use thiserror::Error;

use crate::capability::Capabilities;
use crate::context::RunContext;
use crate::decorator::Decorator;
use crate::error::Error;
use crate::types::Node;

/// Result of one `inspect` call.
pub type UnitResult = std::result::Result<(), UnitFailure>;

/// Why a unit did not finish its work on an entity.
#[derive(Debug, Error)]
pub enum UnitFailure {
    /// The unit looked at the entity and decided it has nothing to do.
    ///
    /// The pair is marked complete; this is not an error.
    #[error("not applicable")]
    NotApplicable,

    /// The unit failed on this entity
    #[error("{0}")]
    Failed(String),

    /// A store or resolver operation failed underneath the unit
    #[error(transparent)]
    Infrastructure(#[from] Error),

    /// Reading content failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UnitFailure {
    /// Shorthand for [`UnitFailure::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A pluggable analysis step run by the pass scheduler.
///
/// Units are shared across worker threads and must not keep per-entity state
/// in `self`. Everything they learn goes through the [`Decorator`].
pub trait AnalysisUnit: Send + Sync {
    /// Unique name, used in diagnostics, the run ledger and `needs`.
    fn name(&self) -> &str;

    /// Entity types this unit inspects. Empty means every type.
    fn target_types(&self) -> &[&str] {
        &[]
    }

    /// Static declaration of consumed and produced tags.
    fn capabilities(&self) -> Capabilities;

    /// Called once per run before any pass.
    ///
    /// An error disables the unit for the whole run.
    fn initialize(&self, _context: &RunContext) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Entity-level applicability check beyond type and tags.
    ///
    /// Returning `false` leaves the pair pending so it is re-evaluated in
    /// later passes.
    fn supports(&self, _entity: &Node) -> bool {
        true
    }

    /// Inspect one entity and record findings through `decorator`.
    fn inspect(
        &self,
        entity: &Node,
        context: &RunContext,
        decorator: &mut Decorator<'_>,
    ) -> UnitResult;

    /// Whether this unit targets entities of `node_type`.
    fn targets(&self, node_type: &str) -> bool {
        let targets = self.target_types();
        targets.is_empty() || targets.contains(&node_type)
    }
}
