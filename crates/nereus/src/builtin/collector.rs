use tracing::{debug, trace, warn};

use crate::capability::Capabilities;
use crate::context::RunContext;
use crate::decorator::Decorator;
use crate::location::ResourceLocation;
use crate::resolver::ContentResolver;
use crate::types::Node;
use crate::unit::{AnalysisUnit, UnitFailure, UnitResult};

use super::{resource_node, ARCHIVE, CONTAINS, DIRECTORY, PARENT_PROPERTY, RESOURCE_TAG};

/// Expands containers into their direct children.
///
/// Directories are listed as they are; archives are opened and their root
/// listed, so nested archives unfold one level per pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceCollector;

impl AnalysisUnit for ResourceCollector {
    fn name(&self) -> &str {
        "resource-collector"
    }

    fn target_types(&self) -> &[&str] {
        &[DIRECTORY, ARCHIVE]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new().produces(RESOURCE_TAG)
    }

    fn inspect(
        &self,
        entity: &Node,
        context: &RunContext,
        decorator: &mut Decorator<'_>,
    ) -> UnitResult {
        let location = ResourceLocation::parse(&entity.id)?;
        let listed = if entity.node_type == ARCHIVE {
            location.nested_root().ok_or_else(|| {
                UnitFailure::failed(format!("{location} cannot be opened as an archive"))
            })?
        } else {
            location
        };

        let resolver = context.resolver();
        let mut collected = 0usize;
        for child in resolver.list_children(&listed)? {
            if context.config().is_excluded(child.file_name()) {
                trace!(child = %child, "Excluded");
                continue;
            }
            let metadata = match resolver.metadata(&child) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(child = %child, error = %e, "Skipping unreadable child");
                    decorator.error(format!("{child}: {e}"));
                    continue;
                }
            };
            let node = resource_node(&child, &metadata).with_property(PARENT_PROPERTY, entity.id.as_str());
            decorator.create_edge(entity.id.as_str(), node.id.as_str(), CONTAINS, None);
            decorator.observe_node(node);
            collected += 1;
        }

        debug!(container = %entity.id, children = collected, "Collected children");
        Ok(())
    }
}
