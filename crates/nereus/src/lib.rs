//! # Nereus: Fixed-Point Analysis over a Shared Property Graph
//!
//! Nereus runs pluggable analysis units over a graph of entities (files,
//! directories, archive entries, anything with a stable id) until no unit has
//! anything left to add. Units declare which tags they consume and produce;
//! the scheduler orders them, runs them in passes, and persists everything
//! they find in `SQLite`.
//!
//! ## Design Philosophy
//!
//! - **Best effort** - a unit failing on one entity never stops the others
//! - **Fixed point, not pipeline** - cycles and late producers are resolved by
//!   running more passes, not by rejecting the declaration
//! - **Deterministic** - same inputs, same graph: ordering, commits and
//!   last-writer-wins all follow registration order
//! - **Idempotent** - a ledger of completed (unit, entity) pairs makes re-runs
//!   add nothing
//!
//! ## Quick Start
//!
//! ```no_run
//! use nereus::{GraphStore, Nereus};
//! use std::path::Path;
//!
//! let nereus = Nereus::new(Path::new("/path/to/workspace"))?;
//!
//! let report = nereus.analyze(None)?;
//! println!("{} passes, stopped: {}", report.pass_count(), report.stop_reason);
//!
//! for node in nereus.store().find_nodes_by_all_tags(&["text", "measured"])? {
//!     println!("{} {:?}", node.id, node.metrics.get("lines"));
//! }
//! # Ok::<(), nereus::Error>(())
//! ```
//!
//! ## Writing a unit
//!
//! Implement [`AnalysisUnit`], register it in a [`UnitRegistry`], and record
//! findings through the [`Decorator`] handed to `inspect`.

pub mod builtin;
mod cancel;
mod capability;
mod commit;
mod config;
mod context;
mod decorator;
mod dependency;
mod error;
mod location;
mod registry;
pub mod resolver;
mod scheduler;
pub mod store;
mod types;
mod unit;

pub use cancel::CancellationToken;
pub use capability::Capabilities;
pub use commit::CommitStats;
pub use config::{Config, CONFIG_FILE_NAME, DEFAULT_BATCH_SIZE, DEFAULT_MAX_PASSES, NEREUS_DIR_NAME};
pub use context::RunContext;
pub use decorator::{error_key, Decorator, COUNT_SUFFIX, ERROR_TAG};
pub use dependency::{CycleReport, Dependency, DependencyGraph};
pub use error::{Diagnostic, DiagnosticKind, Error, Result};
pub use location::{ResourceLocation, ARCHIVE_SCHEME, FILE_SCHEME, NESTING_SEPARATOR};
pub use registry::UnitRegistry;
pub use resolver::{ContentResolver, CompositeResolver};
pub use scheduler::{PassRecord, PassScheduler, RunReport, SchedulerConfig, StopReason, UnresolvedUnit};
pub use store::{GraphStore, SqliteGraphStore};
pub use types::{Edge, GraphStats, Node, Outcome, UnitRun};
pub use unit::{AnalysisUnit, UnitFailure, UnitResult};

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info};

/// A workspace with its configuration, graph store and unit registry.
///
/// `Nereus` is the entry point for running analyses. Each call to
/// [`analyze`](Self::analyze) creates a fresh [`RunContext`], seeds the root
/// node, runs the scheduler and closes the context again.
pub struct Nereus {
    workspace_root: PathBuf,
    config: Config,
    db_path: PathBuf,
    store: SqliteGraphStore,
    registry: UnitRegistry,
}

impl std::fmt::Debug for Nereus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nereus")
            .field("workspace_root", &self.workspace_root)
            .field("db_path", &self.db_path)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::missing_errors_doc)]
impl Nereus {
    /// Open a workspace with its configuration file and the built-in units.
    ///
    /// Uses convention-based defaults when `.nereus/config.yaml` is absent:
    /// database at `.nereus/graph.db`, `.git`, `target`, `node_modules` and
    /// `.nereus` excluded from collection.
    pub fn new(workspace_root: &Path) -> Result<Self> {
        let workspace_root = canonical_root(workspace_root)?;
        let config = Config::load(&workspace_root)?;
        Self::open(workspace_root, config)
    }

    /// Open a workspace with an explicit configuration.
    pub fn with_config(workspace_root: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        Self::open(canonical_root(workspace_root)?, config)
    }

    fn open(workspace_root: PathBuf, config: Config) -> Result<Self> {
        let db_path = config.database_path(&workspace_root);
        let store = SqliteGraphStore::open(&db_path)?;
        let registry = builtin::units()?;
        debug!(root = %workspace_root.display(), db = %db_path.display(), "Opened workspace");

        Ok(Self {
            workspace_root,
            config,
            db_path,
            store,
            registry,
        })
    }

    /// Replace the unit registry.
    #[must_use]
    pub fn with_registry(mut self, registry: UnitRegistry) -> Self {
        self.registry = registry;
        self
    }

    // === Analysis ===

    /// Analyze `target` (the workspace root when `None`) to a fixed point.
    pub fn analyze(&self, target: Option<&Path>) -> Result<RunReport> {
        self.analyze_with(target, &self.config, CancellationToken::new())
    }

    /// Analyze with per-run overrides and a cancellation token.
    pub fn analyze_with(
        &self,
        target: Option<&Path>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        config.validate()?;
        let start = Instant::now();
        let target = match target {
            Some(path) if path.is_relative() => self.workspace_root.join(path),
            Some(path) => path.to_path_buf(),
            None => self.workspace_root.clone(),
        };
        let location = ResourceLocation::file(&target);

        let mut context = RunContext::with_defaults(config.clone());
        builtin::seed_root(&self.store, context.resolver(), &location)?;

        let outcome = PassScheduler::new(&self.store, &self.registry)
            .with_config(SchedulerConfig::from(config))
            .with_cancellation(cancel)
            .run(&context);
        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                error!(root = %location, error = %e, "Analysis run aborted");
                context.close()?;
                return Err(e);
            }
        };

        context.close()?;
        self.store.optimize()?;

        info!(
            root = %location,
            passes = report.pass_count(),
            stop_reason = %report.stop_reason,
            elapsed_ms = start.elapsed().as_millis(),
            "Analysis complete"
        );
        Ok(report)
    }

    /// Drop every stored fact and ledger entry, then analyze from scratch.
    pub fn rebuild(&self, target: Option<&Path>) -> Result<RunReport> {
        info!(db = %self.db_path.display(), "Clearing graph before rebuild");
        self.store.clear_all()?;
        self.analyze(target)
    }

    // === Accessors ===

    /// The graph store, for queries.
    #[must_use]
    pub fn store(&self) -> &SqliteGraphStore {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Path of the `SQLite` database.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn canonical_root(workspace_root: &Path) -> Result<PathBuf> {
    workspace_root.canonicalize().map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("workspace root not found: {}", workspace_root.display()),
        ))
    })
}
