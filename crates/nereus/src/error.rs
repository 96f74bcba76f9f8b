//! Error types for Nereus operations.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - **`Error`**: infrastructure failures (store writes, I/O, archive decoding)
//!   returned to the caller of the specific operation that failed
//! - **`Diagnostic`**: per-run findings (unit failures, unresolved dependencies,
//!   cycles) that are collected into the run report and never abort the run
//!
//! ## Error Philosophy
//!
//! Analysis is "best effort":
//! - A unit failing on one entity must not prevent any other work item
//! - Declaration problems are reported, not rejected
//! - Only cancellation, the pass ceiling, or a failing store commit end a run early
//!
//! ## Diagnostic Categorization
//!
//! `DiagnosticKind` separates failures (something ran and broke) from warnings
//! (the run completed but a declaration or bound was not satisfied).

use std::fmt;

use thiserror::Error;

/// Result type for Nereus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Nereus operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Store operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive could not be opened or decoded
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Structured value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No resolver is registered for the location's scheme
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// A URI or path could not be turned into a resource location
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// Requested node, entry or resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration or arguments
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violated (poisoned lock, worker panic)
    #[error("internal error: {0}")]
    Internal(String),
}

/// A finding recorded during a run.
///
/// Diagnostics are collected in the run report. None of them aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Category of the finding
    pub kind: DiagnosticKind,
    /// Unit the finding is about, if any
    pub unit: Option<String>,
    /// Entity (node id) the finding is about, if any
    pub entity: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(unit) = &self.unit {
            write!(f, " [{unit}]")?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " on {entity}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Categorization of run diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticKind {
    // === Failures ===
    /// A unit raised (or panicked) while inspecting an entity
    UnitError,

    /// A unit could not initialize and is disabled for the whole run
    ConfigurationError,

    // === Warnings ===
    /// A consumed tag or needed unit is never provided
    UnresolvedDependency,

    /// The declared dependency graph contains a cycle
    CycleDetected,

    /// More than one unit declares the same produced tag
    DuplicateProducer,

    /// The run stopped at the configured pass ceiling before converging
    PassCeilingReached,

    /// The run stopped because cancellation was requested
    Cancelled,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnitError => write!(f, "unit error"),
            Self::ConfigurationError => write!(f, "configuration error"),
            Self::UnresolvedDependency => write!(f, "unresolved dependency"),
            Self::CycleDetected => write!(f, "cycle detected"),
            Self::DuplicateProducer => write!(f, "duplicate producer"),
            Self::PassCeilingReached => write!(f, "pass ceiling reached"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl DiagnosticKind {
    /// Returns `true` if something ran and failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::UnitError | Self::ConfigurationError)
    }

    /// Returns `true` if the run completed but a declaration or bound was not met.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        !self.is_failure()
    }
}

impl Diagnostic {
    /// Create a new diagnostic.
    #[must_use]
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            unit: None,
            entity: None,
            message: message.into(),
        }
    }

    /// Attach the unit the diagnostic is about.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attach the entity the diagnostic is about.
    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// A unit failed on a specific entity.
    #[must_use]
    pub fn unit_error(unit: &str, entity: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::UnitError, message)
            .with_unit(unit)
            .with_entity(entity)
    }

    /// A unit failed to initialize.
    #[must_use]
    pub fn configuration_error(unit: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::ConfigurationError, message).with_unit(unit)
    }

    /// A unit consumes a tag (or needs a unit) that nothing provides.
    #[must_use]
    pub fn unresolved(unit: &str, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::UnresolvedDependency, message).with_unit(unit)
    }
}
