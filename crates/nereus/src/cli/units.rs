//! `nereus units` command implementation.

use std::path::Path;

use colored::Colorize;
use nereus::{DependencyGraph, Nereus};

use super::display::print_diagnostics;

/// Run the units command.
pub fn run(workspace: &Path) -> Result<(), nereus::Error> {
    let nereus = Nereus::new(workspace)?;
    let registry = nereus.registry();
    let graph = DependencyGraph::build(&registry.declarations());

    println!(
        "{} ({} registered, depth {})",
        "Units".cyan().bold(),
        registry.len(),
        graph.depth()
    );
    println!();

    for name in graph.ordered_names() {
        let Some(unit) = registry.get(name) else {
            continue;
        };
        let caps = unit.capabilities();
        let disabled = nereus.config().is_unit_disabled(name);
        let label = if disabled {
            format!("{name} (disabled)").dimmed()
        } else {
            name.white().bold()
        };
        println!("  {label}");

        let targets = unit.target_types();
        println!(
            "    {}: {}",
            "targets".dimmed(),
            if targets.is_empty() {
                "*".to_string()
            } else {
                targets.join(", ")
            }
        );
        print_set("consumes", caps.consumes.iter());
        print_set("produces", caps.produces.iter());
        print_set("needs", caps.needs.iter());
    }

    let mut diagnostics = registry.validate();
    diagnostics.extend(graph.diagnostics());
    let diagnostics: Vec<_> = diagnostics.iter().collect();
    print_diagnostics("Warnings", &diagnostics);
    Ok(())
}

fn print_set<'a>(label: &str, values: impl Iterator<Item = &'a String>) {
    let values: Vec<&str> = values.map(String::as_str).collect();
    if !values.is_empty() {
        println!("    {}: {}", label.dimmed(), values.join(", "));
    }
}
