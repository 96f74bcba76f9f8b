//! Common display utilities for CLI commands.

use colored::Colorize;
use nereus::{Diagnostic, Edge, Node};

const MAX_DISPLAY_ITEMS: usize = 10;

/// One line per node: id, type and tags, then metrics when present.
pub fn print_node(node: &Node) {
    let tags: Vec<&str> = node.tags.iter().map(String::as_str).collect();
    println!(
        "  {} {} {}",
        node.id.white().bold(),
        format!("({})", node.node_type).dimmed(),
        format!("[{}]", tags.join(", ")).cyan()
    );
    if !node.metrics.is_empty() {
        let metrics: Vec<String> = node
            .metrics
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        println!("    {}", metrics.join(" ").dimmed());
    }
}

/// An edge as seen from the queried node.
pub fn print_edge(edge: &Edge, incoming: bool) {
    let other = if incoming { &edge.source } else { &edge.target };
    let arrow = if incoming { "<-" } else { "->" };
    println!(
        "  {} {} {}",
        arrow.dimmed(),
        edge.edge_type.cyan(),
        other
    );
}

/// Diagnostics with truncation, failures in red and warnings in yellow.
pub fn print_diagnostics(title: &str, diagnostics: &[&Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    println!();
    println!("{} ({}):", title.bold(), diagnostics.len());
    for diagnostic in diagnostics.iter().take(MAX_DISPLAY_ITEMS) {
        let bullet = if diagnostic.kind.is_failure() {
            "•".red()
        } else {
            "•".yellow()
        };
        println!("  {bullet} {diagnostic}");
    }
    if diagnostics.len() > MAX_DISPLAY_ITEMS {
        println!(
            "  {} ... and {} more",
            "•".dimmed(),
            diagnostics.len() - MAX_DISPLAY_ITEMS
        );
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
