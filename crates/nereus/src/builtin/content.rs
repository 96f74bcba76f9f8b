use std::io::Read;

use crate::capability::Capabilities;
use crate::context::RunContext;
use crate::decorator::Decorator;
use crate::location::ResourceLocation;
use crate::resolver::ContentResolver;
use crate::types::Node;
use crate::unit::{AnalysisUnit, UnitResult};

use super::{BINARY_TAG, FILE, RESOURCE_TAG, TEXT_TAG};

/// Bytes read to decide between text and binary
pub const SNIFF_LIMIT: u64 = 8 * 1024;

/// Tags files as `text` or `binary` from their leading bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentSniffer;

impl AnalysisUnit for ContentSniffer {
    fn name(&self) -> &str {
        "content-sniffer"
    }

    fn target_types(&self) -> &[&str] {
        &[FILE]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
            .consumes(RESOURCE_TAG)
            .produces(TEXT_TAG)
            .produces(BINARY_TAG)
    }

    fn inspect(
        &self,
        entity: &Node,
        context: &RunContext,
        decorator: &mut Decorator<'_>,
    ) -> UnitResult {
        let location = ResourceLocation::parse(&entity.id)?;
        let mut head = Vec::new();
        context
            .resolver()
            .open_stream(&location)?
            .take(SNIFF_LIMIT)
            .read_to_end(&mut head)?;

        if looks_like_text(&head) {
            decorator.enable_tag(TEXT_TAG);
        } else {
            decorator.enable_tag(BINARY_TAG);
        }
        Ok(())
    }
}

/// No NUL bytes, and valid UTF-8 apart from a sequence cut off at the end.
fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}
