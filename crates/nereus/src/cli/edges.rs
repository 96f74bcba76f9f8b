//! `nereus edges` command implementation.

use std::path::Path;

use colored::Colorize;
use nereus::{GraphStore, Nereus};

use super::display::{print_edge, print_node};

/// Run the edges command.
pub fn run(workspace: &Path, id: &str, incoming: bool) -> Result<(), nereus::Error> {
    let nereus = Nereus::new(workspace)?;
    let store = nereus.store();

    let node = store
        .find_node_by_id(id)?
        .ok_or_else(|| nereus::Error::NotFound(format!("node '{id}'")))?;
    print_node(&node);

    let edges = if incoming {
        store.find_incoming_edges(id)?
    } else {
        store.find_outgoing_edges(id)?
    };

    if edges.is_empty() {
        println!("    {}", "no edges".dimmed());
        return Ok(());
    }
    for edge in &edges {
        print_edge(edge, incoming);
    }
    Ok(())
}
