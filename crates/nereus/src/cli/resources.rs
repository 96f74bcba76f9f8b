//! `nereus ls` and `nereus cat` command implementations.
//!
//! Both go straight to the resolvers; the graph is not consulted.

use std::io::Write;
use std::path::Path;

use colored::Colorize;
use nereus::{CompositeResolver, ContentResolver, ResourceLocation};

use super::display::format_size;

/// Accept full URIs, or paths relative to the workspace.
fn locate(workspace: &Path, uri: &str) -> Result<ResourceLocation, nereus::Error> {
    if uri.contains(':') {
        ResourceLocation::parse(uri)
    } else {
        Ok(ResourceLocation::file(workspace.join(uri)))
    }
}

/// Run the ls command.
pub fn ls(workspace: &Path, uri: &str) -> Result<(), nereus::Error> {
    let resolver = CompositeResolver::with_defaults();
    let mut location = locate(workspace, uri)?;
    if location.looks_like_archive() {
        if let Some(root) = location.nested_root() {
            location = root;
        }
    }

    let children = resolver.list_children(&location)?;
    println!("{} ({} entries)", location.to_string().white().bold(), children.len());
    for child in &children {
        let meta = resolver.metadata(child)?;
        if meta.is_directory {
            println!("  {}/", child.file_name().cyan());
        } else {
            println!(
                "  {} {}",
                child.file_name(),
                format_size(meta.size).dimmed()
            );
        }
    }
    resolver.shutdown()
}

/// Run the cat command.
pub fn cat(workspace: &Path, uri: &str) -> Result<(), nereus::Error> {
    let resolver = CompositeResolver::with_defaults();
    let location = locate(workspace, uri)?;

    let mut stream = resolver.open_stream(&location)?;
    let mut stdout = std::io::stdout().lock();
    std::io::copy(&mut stream, &mut stdout)?;
    stdout.flush()?;
    drop(stream);
    resolver.shutdown()
}
