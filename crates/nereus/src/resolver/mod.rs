//! Content resolution across plain files, archive entries and nested archives.
//!
//! Units never touch the filesystem directly; they ask the run's
//! [`CompositeResolver`] for content by [`ResourceLocation`].
//!
//! ## Module Structure
//!
//! - `file` - `file:` scheme backed by the local filesystem
//! - `archive` - `archive:` scheme backed by cached zip handles
//! - `composite` - dispatch by scheme

mod archive;
mod composite;
mod file;

pub use archive::ArchiveResolver;
pub use composite::CompositeResolver;
pub use file::FileResolver;

use std::io::Read;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::location::ResourceLocation;

/// A readable byte stream handed out by a resolver.
pub type ByteStream = Box<dyn Read + Send>;

/// Metadata about a resolved resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceMetadata {
    /// Uncompressed size in bytes (0 for directories)
    pub size: u64,
    /// Last modification time, when the backing store records one
    pub modified: Option<DateTime<Utc>>,
    /// Whether the location can be listed
    pub is_directory: bool,
    /// Content type guessed from the name
    pub content_type: Option<String>,
}

/// Read access to content addressed by [`ResourceLocation`].
///
/// Implementations must be shareable across the scheduler's worker threads.
pub trait ContentResolver: Send + Sync {
    /// The scheme this resolver serves.
    fn scheme(&self) -> &str;

    /// Open the content for reading.
    fn open_stream(&self, location: &ResourceLocation) -> Result<ByteStream>;

    /// Whether the location exists.
    fn exists(&self, location: &ResourceLocation) -> Result<bool>;

    /// Direct children of a directory-like location, sorted by URI.
    ///
    /// Never recursive: callers decide how deep to descend.
    fn list_children(&self, location: &ResourceLocation) -> Result<Vec<ResourceLocation>>;

    /// Size, modification time, kind and content type.
    fn metadata(&self, location: &ResourceLocation) -> Result<ResourceMetadata>;

    /// Release cached handles. Called once at the end of a run.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Read the whole content into memory.
    fn read_to_vec(&self, location: &ResourceLocation) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.open_stream(location)?.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

/// Guess a content type from a file extension.
#[must_use]
pub fn content_type_for(location: &ResourceLocation) -> Option<String> {
    let ext = location.extension()?;
    let content_type = match ext.as_str() {
        "zip" => "application/zip",
        "jar" | "war" | "ear" => "application/java-archive",
        "class" => "application/java-vm",
        "java" => "text/x-java",
        "rs" => "text/x-rust",
        "cs" => "text/x-csharp",
        "py" => "text/x-python",
        "js" | "mjs" => "text/javascript",
        "ts" => "text/x-typescript",
        "json" => "application/json",
        "xml" | "pom" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "properties" => "text/x-java-properties",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "txt" | "mf" => "text/plain",
        _ => return None,
    };
    Some(content_type.to_string())
}
