//! `nereus query` command implementation.

use std::path::Path;

use colored::Colorize;
use nereus::{GraphStore, Nereus};

use super::display::print_node;

/// Run the query command.
pub fn run(
    workspace: &Path,
    tags: &[String],
    all: bool,
    node_type: Option<&str>,
) -> Result<(), nereus::Error> {
    let nereus = Nereus::new(workspace)?;
    let store = nereus.store();
    let tags: Vec<&str> = tags.iter().map(String::as_str).collect();

    let nodes = match (node_type, tags.is_empty(), all) {
        (Some(t), true, _) => store.find_nodes_by_type(t)?,
        (Some(t), false, true) => store.find_nodes_by_type_and_all_tags(t, &tags)?,
        (Some(t), false, false) => store.find_nodes_by_type_and_any_tags(t, &tags)?,
        (None, true, _) => store.all_nodes()?,
        (None, false, true) => store.find_nodes_by_all_tags(&tags)?,
        (None, false, false) => store.find_nodes_by_any_tags(&tags)?,
    };

    if nodes.is_empty() {
        println!("No nodes found");
        if store.get_statistics()?.node_count == 0 {
            println!(
                "\n{}: The graph is empty. Run '{}' first.",
                "hint".dimmed(),
                "nereus analyze".cyan()
            );
        }
        return Ok(());
    }

    println!("Found {} nodes:", nodes.len().to_string().green().bold());
    println!();
    for node in &nodes {
        print_node(node);
    }
    Ok(())
}
