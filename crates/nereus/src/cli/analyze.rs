//! `nereus analyze` command implementation.

use std::path::{Path, PathBuf};

use colored::Colorize;
use nereus::{CancellationToken, GraphStore, Nereus, StopReason};

use super::display::print_diagnostics;

/// Options for one analysis run.
pub struct AnalyzeArgs {
    pub path: Option<PathBuf>,
    pub rebuild: bool,
    pub max_passes: Option<u32>,
    pub sequential: bool,
}

/// Run the analyze command.
pub fn run(workspace: &Path, args: &AnalyzeArgs) -> Result<(), nereus::Error> {
    let nereus = Nereus::new(workspace)?;
    let target = args.path.as_deref();
    println!(
        "{} {}...",
        "Analyzing".cyan().bold(),
        target.unwrap_or(nereus.workspace_root()).display()
    );

    if args.rebuild {
        println!("{}", "Rebuilding graph from scratch".yellow());
        nereus.store().clear_all()?;
    }

    let mut config = nereus.config().clone();
    if let Some(max_passes) = args.max_passes {
        config.max_passes = max_passes;
    }
    if args.sequential {
        config.parallel = false;
    }

    let report = nereus.analyze_with(target, &config, CancellationToken::new())?;

    println!();
    let status = match report.stop_reason {
        StopReason::Converged | StopReason::NoProgress => report.stop_reason.to_string().green(),
        StopReason::PassCeiling | StopReason::Cancelled => report.stop_reason.to_string().yellow(),
    };
    println!(
        "{} after {} passes ({}), {} facts added",
        "Finished".green().bold(),
        report.pass_count(),
        status,
        report.facts_added()
    );

    for pass in &report.passes {
        println!(
            "  {} {}: {} ran, {} skipped, {} failed, {} deferred, {} nodes written",
            "pass".dimmed(),
            pass.pass,
            pass.ran,
            pass.skipped,
            pass.errors,
            pass.deferred,
            pass.commit.nodes_written
        );
    }

    let stats = nereus.store().get_statistics()?;
    println!(
        "{}: {} nodes, {} edges, {} distinct tags",
        "Graph".dimmed(),
        stats.node_count,
        stats.edge_count,
        stats.distinct_tag_count
    );

    let failures: Vec<_> = report.failures().collect();
    let warnings: Vec<_> = report.warnings().collect();
    print_diagnostics("Errors", &failures);
    print_diagnostics("Warnings", &warnings);

    Ok(())
}
