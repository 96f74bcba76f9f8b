//! Fixed-point pass scheduler.
//!
//! A run repeats passes over the entity graph until nothing changes:
//!
//! ```text
//! validate + order units ─> initialize units ─> load ledger
//!        │
//!        ▼
//!  ┌──> cancelled? ──────────────────────────────> stop (Cancelled)
//!  │    snapshot nodes, collect pending pairs
//!  │    nothing pending? ───────────────────────> stop (Converged)
//!  │    ceiling reached? ───────────────────────> stop (PassCeiling)
//!  │    run pairs against the snapshot (rayon)
//!  │    commit buffered writes + ledger
//!  │    fact counter unchanged? ────────────────> stop (NoProgress)
//!  └────┘
//! ```
//!
//! A pair `(unit, entity)` is pending when the unit targets the entity's type
//! and the ledger has no completion for it. A pending pair runs when the
//! entity carries every consumed tag and `supports` accepts it; otherwise it
//! stays pending and is looked at again next pass.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::cancel::CancellationToken;
use crate::capability::Capabilities;
use crate::commit::{commit_pass, CommitStats, WorkResult};
use crate::config::{Config, DEFAULT_BATCH_SIZE, DEFAULT_MAX_PASSES};
use crate::context::RunContext;
use crate::decorator::{failure_writes, Decorator, Writes};
use crate::dependency::DependencyGraph;
use crate::error::{Diagnostic, DiagnosticKind, Error, Result};
use crate::registry::UnitRegistry;
use crate::store::GraphStore;
use crate::types::{Node, Outcome};
use crate::unit::{AnalysisUnit, UnitFailure};

/// Scheduler settings, usually taken from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on passes
    pub max_passes: u32,
    /// Run the work items of a pass on a rayon pool
    pub parallel: bool,
    /// Dedicated pool size (`None` = rayon's global pool)
    pub threads: Option<usize>,
    /// Nodes per commit transaction
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            parallel: true,
            threads: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_passes: config.max_passes,
            parallel: config.parallel,
            threads: config.threads,
            batch_size: config.batch_size,
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No pending work was left before a pass
    Converged,
    /// A pass added no facts
    NoProgress,
    /// The pass ceiling was reached with work still pending
    PassCeiling,
    /// Cancellation was requested
    Cancelled,
}

impl StopReason {
    /// Whether the run reached its fixed point.
    #[must_use]
    pub fn is_fixed_point(&self) -> bool {
        matches!(self, Self::Converged | Self::NoProgress)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Converged => "converged",
            Self::NoProgress => "no progress",
            Self::PassCeiling => "pass ceiling reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassRecord {
    /// 1-based pass number
    pub pass: u32,
    /// Fact counter before the pass
    pub facts_before: u64,
    /// Fact counter after the commit
    pub facts_after: u64,
    /// Pairs that ran
    pub ran: usize,
    /// Pairs the unit declared not applicable
    pub skipped: usize,
    /// Pairs that failed
    pub errors: usize,
    /// Pairs left pending
    pub deferred: usize,
    /// What the commit wrote
    pub commit: CommitStats,
}

/// A unit that never completed on anything because tags it consumes were
/// never produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedUnit {
    /// Unit name
    pub unit: String,
    /// Consumed tags carried by no node at the end of the run
    pub missing_tags: Vec<String>,
}

/// Result of a scheduler run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One record per executed pass
    pub passes: Vec<PassRecord>,
    /// Why the run ended
    pub stop_reason: StopReason,
    /// Everything found along the way, in discovery order
    pub diagnostics: Vec<Diagnostic>,
    /// Active units in execution order
    pub order: Vec<String>,
    /// Consumers that never ran for lack of input
    pub unresolved: Vec<UnresolvedUnit>,
}

impl RunReport {
    /// Number of passes executed.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Diagnostics for things that ran and failed.
    pub fn failures(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.kind.is_failure())
    }

    /// Diagnostics for unmet declarations and bounds.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.kind.is_warning())
    }

    /// Diagnostics of one kind.
    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    /// Total facts added over the run.
    #[must_use]
    pub fn facts_added(&self) -> u64 {
        match (self.passes.first(), self.passes.last()) {
            (Some(first), Some(last)) => last.facts_after.saturating_sub(first.facts_before),
            _ => 0,
        }
    }
}

/// A unit that takes part in the run.
struct ActiveUnit<'r> {
    position: usize,
    unit: &'r dyn AnalysisUnit,
    capabilities: Capabilities,
}

/// Outcome of evaluating one pending pair.
enum Evaluation {
    /// Not applicable yet; look again next pass
    Deferred,
    Done(WorkResult, Option<Diagnostic>),
}

/// Drives registered units over the store until a fixed point.
pub struct PassScheduler<'a> {
    store: &'a dyn GraphStore,
    registry: &'a UnitRegistry,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl<'a> PassScheduler<'a> {
    #[must_use]
    pub fn new(store: &'a dyn GraphStore, registry: &'a UnitRegistry) -> Self {
        Self {
            store,
            registry,
            config: SchedulerConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a token that another thread may cancel.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run passes until convergence, the pass ceiling or cancellation.
    ///
    /// Unit failures end up in the report. The only errors returned are store
    /// failures and an unbuildable thread pool.
    pub fn run(&self, context: &RunContext) -> Result<RunReport> {
        let mut diagnostics = self.registry.validate();
        let graph = DependencyGraph::build(&self.registry.declarations());
        diagnostics.extend(graph.diagnostics());

        for diagnostic in &diagnostics {
            warn!(%diagnostic, "Unit declaration problem");
        }

        let units = self.activate(&graph, context, &mut diagnostics);
        let order: Vec<String> = units.iter().map(|u| u.unit.name().to_string()).collect();
        info!(units = ?order, max_passes = self.config.max_passes, "Starting analysis run");

        let pool = self.build_pool()?;

        let mut completed: HashSet<(String, String)> = self
            .store
            .completed_unit_runs()?
            .into_iter()
            .map(|run| (run.unit, run.node_id))
            .collect();
        debug!(completed = completed.len(), "Loaded unit run ledger");

        let mut passes: Vec<PassRecord> = Vec::new();
        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::Cancelled,
                    format!("run cancelled after {} passes", passes.len()),
                ));
                break StopReason::Cancelled;
            }

            let snapshot = self.store.all_nodes()?;
            let pending = pending_pairs(&units, &snapshot, &completed);
            if pending.is_empty() {
                break StopReason::Converged;
            }

            let pass = u32::try_from(passes.len() + 1).unwrap_or(u32::MAX);
            if pass > self.config.max_passes {
                warn!(
                    max_passes = self.config.max_passes,
                    pending = pending.len(),
                    "Pass ceiling reached; keeping partial results"
                );
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::PassCeilingReached,
                    format!(
                        "stopped after {} passes with {} pairs pending",
                        self.config.max_passes,
                        pending.len()
                    ),
                ));
                break StopReason::PassCeiling;
            }

            let facts_before = self.store.fact_count()?;
            debug!(pass, pending = pending.len(), facts = facts_before, "Starting pass");

            let run_pair =
                |pair: &(&ActiveUnit<'_>, &Node)| evaluate(pair.0, pair.1, context);
            let evaluations: Vec<Evaluation> = match (&pool, self.config.parallel) {
                (Some(pool), true) => pool.install(|| pending.par_iter().map(run_pair).collect()),
                (None, true) => pending.par_iter().map(run_pair).collect(),
                (_, false) => pending.iter().map(run_pair).collect(),
            };

            let mut record = PassRecord {
                pass,
                facts_before,
                ..PassRecord::default()
            };
            let mut results = Vec::new();
            for evaluation in evaluations {
                match evaluation {
                    Evaluation::Deferred => record.deferred += 1,
                    Evaluation::Done(result, diagnostic) => {
                        match result.outcome {
                            Outcome::Ran => record.ran += 1,
                            Outcome::SkippedNotApplicable => record.skipped += 1,
                            Outcome::Error => record.errors += 1,
                        }
                        if let Some(diagnostic) = diagnostic {
                            warn!(%diagnostic, "Unit failed");
                            diagnostics.push(diagnostic);
                        }
                        completed.insert((result.unit.clone(), result.entity.clone()));
                        results.push(result);
                    }
                }
            }

            record.commit = commit_pass(self.store, results, pass, self.config.batch_size)?;
            record.facts_after = self.store.fact_count()?;
            debug!(
                pass,
                ran = record.ran,
                skipped = record.skipped,
                errors = record.errors,
                deferred = record.deferred,
                facts = record.facts_after,
                "Finished pass"
            );

            let unchanged = record.facts_after == record.facts_before;
            passes.push(record);
            if unchanged {
                break StopReason::NoProgress;
            }
        };

        let unresolved = self.unresolved_units(&units, &completed)?;
        for entry in &unresolved {
            diagnostics.push(Diagnostic::unresolved(
                &entry.unit,
                format!("never ran; no entity carries {}", entry.missing_tags.join(", ")),
            ));
        }

        info!(
            passes = passes.len(),
            stop_reason = %stop_reason,
            diagnostics = diagnostics.len(),
            "Analysis run finished"
        );

        Ok(RunReport {
            passes,
            stop_reason,
            diagnostics,
            order,
            unresolved,
        })
    }

    /// Units in dependency order, minus disabled ones and ones whose
    /// initialization fails.
    fn activate(
        &self,
        graph: &DependencyGraph,
        context: &RunContext,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<ActiveUnit<'a>> {
        let mut active = Vec::with_capacity(graph.order().len());
        for &position in graph.order() {
            let Some(unit) = self.registry.unit(position) else {
                continue;
            };
            let name = unit.name();
            if context.config().is_unit_disabled(name) {
                debug!(unit = %name, "Unit disabled by configuration");
                continue;
            }

            let initialized = panic::catch_unwind(AssertUnwindSafe(|| unit.initialize(context)))
                .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));
            if let Err(message) = initialized {
                warn!(unit = %name, error = %message, "Unit failed to initialize; disabled for this run");
                diagnostics.push(Diagnostic::configuration_error(name, message));
                continue;
            }

            active.push(ActiveUnit {
                position,
                unit,
                capabilities: unit.capabilities(),
            });
        }
        active
    }

    fn build_pool(&self) -> Result<Option<rayon::ThreadPool>> {
        match (self.config.parallel, self.config.threads) {
            (true, Some(threads)) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("nereus-worker-{i}"))
                .build()
                .map(Some)
                .map_err(|e| Error::Internal(format!("failed to build thread pool: {e}"))),
            _ => Ok(None),
        }
    }

    /// Consumers without a single completion whose consumed tags are missing
    /// from every node.
    fn unresolved_units(
        &self,
        units: &[ActiveUnit<'_>],
        completed: &HashSet<(String, String)>,
    ) -> Result<Vec<UnresolvedUnit>> {
        let ran: HashSet<&str> = completed.iter().map(|(unit, _)| unit.as_str()).collect();
        let mut unresolved = Vec::new();

        for active in units {
            let name = active.unit.name();
            if active.capabilities.consumes.is_empty() || ran.contains(name) {
                continue;
            }
            let mut missing = Vec::new();
            for tag in &active.capabilities.consumes {
                if self.store.find_nodes_by_tag(tag)?.is_empty() {
                    missing.push(tag.clone());
                }
            }
            if !missing.is_empty() {
                unresolved.push(UnresolvedUnit {
                    unit: name.to_string(),
                    missing_tags: missing,
                });
            }
        }
        Ok(unresolved)
    }
}

/// Pairs without a ledger entry, in unit order then entity id order.
fn pending_pairs<'u, 'r, 'n>(
    units: &'u [ActiveUnit<'r>],
    snapshot: &'n [Node],
    completed: &HashSet<(String, String)>,
) -> Vec<(&'u ActiveUnit<'r>, &'n Node)> {
    let mut pending = Vec::new();
    for unit in units {
        let name = unit.unit.name();
        for entity in snapshot {
            if unit.unit.targets(&entity.node_type)
                && !completed.contains(&(name.to_string(), entity.id.clone()))
            {
                pending.push((unit, entity));
            }
        }
    }
    pending
}

/// Decide applicability and run one pair, isolating failures and panics.
fn evaluate(active: &ActiveUnit<'_>, entity: &Node, context: &RunContext) -> Evaluation {
    let unit = active.unit;
    let name = unit.name();

    if !entity.has_all_tags(&active.capabilities.consumes) {
        return Evaluation::Deferred;
    }

    match panic::catch_unwind(AssertUnwindSafe(|| unit.supports(entity))) {
        Ok(true) => {}
        Ok(false) => return Evaluation::Deferred,
        Err(payload) => {
            let message = format!("panicked in supports: {}", panic_message(payload.as_ref()));
            return failed(active, entity, message);
        }
    }

    trace!(unit = %name, entity = %entity.id, "Inspecting");
    let mut decorator = Decorator::new(name, entity);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        unit.inspect(entity, context, &mut decorator)
    }));

    match outcome {
        Ok(Ok(())) => {
            let writes = decorator.into_writes();
            if writes.errors.is_empty() {
                return done(active, entity, Outcome::Ran, writes, None);
            }
            let message = writes.errors.join("; ");
            let diagnostic = Diagnostic::unit_error(name, &entity.id, message.clone());
            Evaluation::Done(
                work_result(active, entity, Outcome::Error, writes, Some(message)),
                Some(diagnostic),
            )
        }
        Ok(Err(UnitFailure::NotApplicable)) => {
            done(active, entity, Outcome::SkippedNotApplicable, Writes::default(), None)
        }
        Ok(Err(failure)) => failed(active, entity, failure.to_string()),
        Err(payload) => {
            let message = format!("panicked: {}", panic_message(payload.as_ref()));
            failed(active, entity, message)
        }
    }
}

fn done(
    active: &ActiveUnit<'_>,
    entity: &Node,
    outcome: Outcome,
    writes: Writes,
    message: Option<String>,
) -> Evaluation {
    Evaluation::Done(work_result(active, entity, outcome, writes, message), None)
}

/// Discard the unit's writes and record only the failure.
fn failed(active: &ActiveUnit<'_>, entity: &Node, message: String) -> Evaluation {
    let name = active.unit.name();
    let writes = failure_writes(name, entity, &message);
    let diagnostic = Diagnostic::unit_error(name, &entity.id, message.clone());
    Evaluation::Done(
        work_result(active, entity, Outcome::Error, writes, Some(message)),
        Some(diagnostic),
    )
}

fn work_result(
    active: &ActiveUnit<'_>,
    entity: &Node,
    outcome: Outcome,
    writes: Writes,
    message: Option<String>,
) -> WorkResult {
    WorkResult {
        unit_position: active.position,
        unit: active.unit.name().to_string(),
        entity: entity.id.clone(),
        outcome,
        writes,
        message,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteGraphStore;
    use crate::unit::UnitResult;

    struct Tagger {
        name: &'static str,
        consumes: Option<&'static str>,
        produces: &'static str,
    }

    impl AnalysisUnit for Tagger {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> Capabilities {
            let caps = Capabilities::new().produces(self.produces);
            match self.consumes {
                Some(tag) => caps.consumes(tag),
                None => caps,
            }
        }

        fn inspect(&self, _: &Node, _: &RunContext, decorator: &mut Decorator<'_>) -> UnitResult {
            decorator.enable_tag(self.produces);
            Ok(())
        }
    }

    #[test]
    fn chained_units_converge_without_an_extra_pass() {
        let store = SqliteGraphStore::open_in_memory().expect("open store");
        store.merge_node(&Node::new("e", "file")).expect("seed");
        let registry = UnitRegistry::new()
            .with(Tagger {
                name: "second",
                consumes: Some("t1"),
                produces: "t2",
            })
            .and_then(|r| {
                r.with(Tagger {
                    name: "first",
                    consumes: None,
                    produces: "t1",
                })
            })
            .expect("registration");
        let context = RunContext::with_defaults(Config::default());

        let report = PassScheduler::new(&store, &registry)
            .run(&context)
            .expect("run");

        assert_eq!(report.stop_reason, StopReason::Converged);
        assert_eq!(report.pass_count(), 2);
        assert_eq!(report.order, vec!["first", "second"]);
        assert_eq!(report.passes[0].deferred, 1);
    }

    fn panic_with<P: std::any::Any + Send>(payload: P) {
        panic::panic_any(payload)
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let from_str = panic::catch_unwind(|| panic_with("static")).expect_err("should panic");
        let from_string = panic::catch_unwind(|| panic_with(String::from("owned")))
            .expect_err("should panic");

        assert_eq!(panic_message(from_str.as_ref()), "static");
        assert_eq!(panic_message(from_string.as_ref()), "owned");
    }

    #[test]
    fn scheduler_config_follows_workspace_config() {
        let config = Config {
            max_passes: 3,
            parallel: false,
            threads: Some(2),
            ..Config::default()
        };

        let scheduler = SchedulerConfig::from(&config);

        assert_eq!(scheduler.max_passes, 3);
        assert!(!scheduler.parallel);
        assert_eq!(scheduler.threads, Some(2));
        assert_eq!(scheduler.batch_size, DEFAULT_BATCH_SIZE);
    }
}
