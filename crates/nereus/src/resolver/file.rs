//! `file:` scheme resolver backed by the local filesystem.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::trace;

use super::{content_type_for, ByteStream, ContentResolver, ResourceMetadata};
use crate::error::{Error, Result};
use crate::location::{ResourceLocation, FILE_SCHEME};

/// Resolves plain files and directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileResolver;

impl FileResolver {
    /// Create a new filesystem resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn local_path(location: &ResourceLocation) -> Result<PathBuf> {
        location.to_file_path().ok_or_else(|| {
            Error::UnsupportedScheme(format!(
                "{} (file resolver cannot read {})",
                location.scheme(),
                location.uri()
            ))
        })
    }
}

impl ContentResolver for FileResolver {
    fn scheme(&self) -> &str {
        FILE_SCHEME
    }

    fn open_stream(&self, location: &ResourceLocation) -> Result<ByteStream> {
        let path = Self::local_path(location)?;
        trace!(path = %path.display(), "Opening file");
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(location.uri().to_string()),
            kind => Error::Io(std::io::Error::new(
                kind,
                format!("failed to open {}: {e}", path.display()),
            )),
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn exists(&self, location: &ResourceLocation) -> Result<bool> {
        Ok(Self::local_path(location)?.exists())
    }

    fn list_children(&self, location: &ResourceLocation) -> Result<Vec<ResourceLocation>> {
        let path = Self::local_path(location)?;
        if !path.is_dir() {
            return Ok(Vec::new());
        }

        let mut children = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let name = entry.file_name();
            children.push(location.join(&name.to_string_lossy()));
        }
        children.sort();
        Ok(children)
    }

    fn metadata(&self, location: &ResourceLocation) -> Result<ResourceMetadata> {
        let path = Self::local_path(location)?;
        let meta = fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(location.uri().to_string()),
            _ => Error::Io(e),
        })?;

        Ok(ResourceMetadata {
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            is_directory: meta.is_dir(),
            content_type: if meta.is_dir() {
                None
            } else {
                content_type_for(location)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn reads_lists_and_describes_files() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        fs::create_dir_all(dir.path().join("src/nested")).expect("should create dirs");
        fs::write(dir.path().join("src/lib.rs"), "pub fn a() {}\n").expect("should write");
        fs::write(dir.path().join("src/nested/deep.rs"), "").expect("should write");

        let resolver = FileResolver::new();
        let src = ResourceLocation::file(dir.path().join("src"));

        let children = resolver.list_children(&src).expect("list should succeed");
        let names: Vec<_> = children.iter().map(ResourceLocation::file_name).collect();
        assert_eq!(names, vec!["lib.rs", "nested"], "only direct children, sorted");

        let lib = src.join("lib.rs");
        let mut content = String::new();
        resolver
            .open_stream(&lib)
            .expect("open should succeed")
            .read_to_string(&mut content)
            .expect("read should succeed");
        assert_eq!(content, "pub fn a() {}\n");

        let meta = resolver.metadata(&lib).expect("metadata should succeed");
        assert_eq!(meta.size, 14);
        assert!(!meta.is_directory);
        assert_eq!(meta.content_type.as_deref(), Some("text/x-rust"));
        assert!(meta.modified.is_some());

        assert!(resolver.metadata(&src).expect("dir metadata").is_directory);
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let resolver = FileResolver::new();
        let missing = ResourceLocation::file(dir.path().join("nope.txt"));

        assert!(!resolver.exists(&missing).expect("exists should succeed"));
        assert!(matches!(
            resolver.metadata(&missing),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            resolver.open_stream(&missing),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn listing_a_file_returns_no_children() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        fs::write(dir.path().join("a.txt"), "x").expect("should write");

        let children = FileResolver::new()
            .list_children(&ResourceLocation::file(dir.path().join("a.txt")))
            .expect("list should succeed");

        assert!(children.is_empty());
    }
}
