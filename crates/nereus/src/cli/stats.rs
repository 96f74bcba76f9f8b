//! `nereus stats` command implementation.

use std::collections::BTreeMap;
use std::path::Path;

use colored::Colorize;
use nereus::{GraphStore, Nereus, Outcome};

use super::display::format_size;

/// Run the stats command.
pub fn run(workspace: &Path) -> Result<(), nereus::Error> {
    let nereus = Nereus::new(workspace)?;
    let store = nereus.store();

    let db_path = nereus.db_path();
    let db_size_str = match std::fs::metadata(db_path) {
        Ok(meta) => format_size(meta.len()),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to get database file size");
            "size unknown".to_string()
        }
    };

    let stats = store.get_statistics()?;

    println!("{}", "Nereus Graph Statistics".cyan().bold());
    println!();
    println!(
        "  {}: {} ({})",
        "Database".white().bold(),
        db_path.display(),
        db_size_str
    );
    println!();
    println!(
        "  {}: {}",
        "Nodes".white().bold(),
        stats.node_count.to_string().green()
    );
    println!(
        "  {}: {}",
        "Edges".white().bold(),
        stats.edge_count.to_string().green()
    );
    println!(
        "  {}: {} assignments, {} distinct",
        "Tags".white().bold(),
        stats.tag_count.to_string().green(),
        stats.distinct_tag_count
    );
    println!(
        "  {}: {}",
        "Facts".white().bold(),
        store.fact_count()?.to_string().green()
    );

    // unit -> (ran, skipped, errors)
    let mut per_unit: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
    for run in store.completed_unit_runs()? {
        let counts = per_unit.entry(run.unit).or_default();
        match run.outcome {
            Outcome::Ran => counts.0 += 1,
            Outcome::SkippedNotApplicable => counts.1 += 1,
            Outcome::Error => counts.2 += 1,
        }
    }

    if !per_unit.is_empty() {
        println!();
        println!("  {}:", "Unit runs".white().bold());
        for (unit, (ran, skipped, errors)) in per_unit {
            let errors = if errors > 0 {
                errors.to_string().red()
            } else {
                errors.to_string().dimmed()
            };
            println!(
                "    {}: {ran} ran, {skipped} skipped, {errors} errors",
                unit.dimmed()
            );
        }
    }

    Ok(())
}
