use crate::capability::Capabilities;
use crate::context::RunContext;
use crate::decorator::Decorator;
use crate::location::ResourceLocation;
use crate::resolver::ContentResolver;
use crate::types::Node;
use crate::unit::{AnalysisUnit, UnitResult};

use super::{FILE, MEASURED_TAG, PARENT_PROPERTY, TEXT_TAG};

/// Metric name for line counts
pub const LINES_METRIC: &str = "lines";

/// Counts lines of text files and rolls the count up onto the container.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCounter;

impl AnalysisUnit for LineCounter {
    fn name(&self) -> &str {
        "line-counter"
    }

    fn target_types(&self) -> &[&str] {
        &[FILE]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new().consumes(TEXT_TAG).produces(MEASURED_TAG)
    }

    fn inspect(
        &self,
        entity: &Node,
        context: &RunContext,
        decorator: &mut Decorator<'_>,
    ) -> UnitResult {
        let location = ResourceLocation::parse(&entity.id)?;
        let content = context.resolver().read_to_vec(&location)?;

        #[allow(clippy::cast_precision_loss)]
        let lines = count_lines(&content) as f64;
        decorator.set_metric(LINES_METRIC, lines);
        decorator.enable_tag(MEASURED_TAG);

        if let Some(parent) = entity.properties.get(PARENT_PROPERTY).and_then(|p| p.as_str()) {
            decorator.aggregate_sum_to(parent, LINES_METRIC, lines);
        }
        Ok(())
    }
}

/// Newline count, plus one for a final line without a terminator.
fn count_lines(content: &[u8]) -> usize {
    let newlines = content.iter().filter(|&&b| b == b'\n').count();
    match content.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}
