//! Built-in analysis units.
//!
//! | Unit | Targets | Consumes | Produces |
//! |------|---------|----------|----------|
//! | `resource-collector` | `directory`, `archive` | - | `resource` |
//! | `content-sniffer` | `file` | `resource` | `text`, `binary` |
//! | `line-counter` | `file` | `text` | `measured` |
//!
//! Node ids are resource URIs. Every collected node records the id of its
//! container in the `parent` property, which is where roll-ups go.

mod collector;
mod content;
mod lines;

pub use collector::ResourceCollector;
pub use content::ContentSniffer;
pub use lines::LineCounter;

use tracing::debug;

use crate::error::Result;
use crate::location::ResourceLocation;
use crate::registry::UnitRegistry;
use crate::resolver::{ContentResolver, ResourceMetadata};
use crate::store::GraphStore;
use crate::types::Node;

/// Node type of listable filesystem or archive directories
pub const DIRECTORY: &str = "directory";

/// Node type of zip-family archives
pub const ARCHIVE: &str = "archive";

/// Node type of everything else
pub const FILE: &str = "file";

/// Tag carried by every node backed by resolvable content
pub const RESOURCE_TAG: &str = "resource";

/// Tag for content that decodes as UTF-8 text
pub const TEXT_TAG: &str = "text";

/// Tag for content that does not
pub const BINARY_TAG: &str = "binary";

/// Tag for nodes whose lines were counted
pub const MEASURED_TAG: &str = "measured";

/// Edge type from a container to its direct children
pub const CONTAINS: &str = "contains";

/// Property holding the container's node id
pub const PARENT_PROPERTY: &str = "parent";

/// Registry with every built-in unit, in dependency order.
pub fn units() -> Result<UnitRegistry> {
    UnitRegistry::new()
        .with(ResourceCollector)
        .and_then(|r| r.with(ContentSniffer))
        .and_then(|r| r.with(LineCounter))
}

/// Node type for a resolved location.
pub(crate) fn node_type_for(location: &ResourceLocation, metadata: &ResourceMetadata) -> &'static str {
    if metadata.is_directory {
        DIRECTORY
    } else if location.looks_like_archive() {
        ARCHIVE
    } else {
        FILE
    }
}

/// Resource node for a location, without a parent.
pub(crate) fn resource_node(location: &ResourceLocation, metadata: &ResourceMetadata) -> Node {
    let mut node = Node::new(location.uri(), node_type_for(location, metadata))
        .with_label(location.file_name())
        .with_tag(RESOURCE_TAG)
        .with_property("name", location.file_name())
        .with_property("size", metadata.size);
    if let Some(content_type) = &metadata.content_type {
        node = node.with_property("content_type", content_type.as_str());
    }
    if let Some(modified) = metadata.modified {
        node = node.with_property("modified", modified.to_rfc3339());
    }
    node
}

/// Create (or refresh) the root node a run starts from.
///
/// Anything units already recorded on an existing root is kept.
pub fn seed_root(
    store: &dyn GraphStore,
    resolver: &dyn ContentResolver,
    location: &ResourceLocation,
) -> Result<Node> {
    let metadata = resolver.metadata(location)?;
    let fresh = resource_node(location, &metadata);

    let root = match store.find_node_by_id(&fresh.id)? {
        Some(mut existing) => {
            existing.absorb(fresh);
            existing
        }
        None => fresh,
    };
    store.merge_node(&root)?;
    debug!(root = %root.id, node_type = %root.node_type, "Seeded root node");
    Ok(root)
}
