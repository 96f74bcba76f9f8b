//! `archive:` scheme resolver backed by cached zip handles.
//!
//! ## Handle Cache
//!
//! Opening a zip archive parses its central directory, so one handle per
//! archive path is opened lazily and reused for every entry read. The cache
//! map sits behind an `RwLock` (many readers, one inserter) and each handle
//! behind a `Mutex`, because reading an entry needs exclusive access to the
//! underlying file cursor.
//!
//! ## Nested Archives
//!
//! `archive:/a.zip!/lib/b.jar!/C.class` is resolved in two steps: the bytes of
//! `lib/b.jar` are copied out of `a.zip` into a scratch file, then `C.class` is
//! read from that file like from any other archive. Scratch files are named by
//! a hash of the prefix URI and live until [`ContentResolver::shutdown`].

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use tempfile::TempDir;
use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;
use zip::result::ZipError;
use zip::ZipArchive;

use super::{content_type_for, ByteStream, ContentResolver, ResourceMetadata};
use crate::error::{Error, Result};
use crate::location::{ResourceLocation, ARCHIVE_SCHEME};

type ArchiveHandle = Arc<Mutex<ZipArchive<BufReader<File>>>>;

/// Resolves entries of zip-family archives, including nested ones.
#[derive(Default)]
pub struct ArchiveResolver {
    /// Open archives keyed by their (possibly scratch) path.
    handles: RwLock<HashMap<PathBuf, ArchiveHandle>>,
    /// Prefix URI of a nested archive -> scratch file holding its bytes.
    materialized: Mutex<HashMap<String, PathBuf>>,
    /// Scratch directory, created on first nested read.
    scratch: Mutex<Option<TempDir>>,
}

impl std::fmt::Debug for ArchiveResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.handles.read().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("ArchiveResolver")
            .field("cached_handles", &cached)
            .finish()
    }
}

/// What an entry path inside an archive refers to.
enum EntryKind {
    File {
        size: u64,
        modified: Option<DateTime<Utc>>,
    },
    Directory {
        modified: Option<DateTime<Utc>>,
    },
    Missing,
}

impl ArchiveResolver {
    /// Create a resolver with an empty handle cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of archive handles currently cached.
    pub fn cached_handles(&self) -> Result<usize> {
        Ok(self
            .handles
            .read()
            .map_err(|e| Error::Internal(format!("archive cache lock poisoned: {e}")))?
            .len())
    }

    /// Get (or open and cache) the handle for an archive file.
    fn handle(&self, path: &Path) -> Result<ArchiveHandle> {
        {
            let handles = self
                .handles
                .read()
                .map_err(|e| Error::Internal(format!("archive cache lock poisoned: {e}")))?;
            if let Some(handle) = handles.get(path) {
                return Ok(Arc::clone(handle));
            }
        }

        trace!(path = %path.display(), "Opening archive");
        let file = File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open archive {}: {e}", path.display()),
            ))
        })?;
        let archive = ZipArchive::new(BufReader::new(file))?;

        let mut handles = self
            .handles
            .write()
            .map_err(|e| Error::Internal(format!("archive cache lock poisoned: {e}")))?;
        // Another thread may have opened it meanwhile; keep the first handle
        let handle = handles
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(archive)));
        Ok(Arc::clone(handle))
    }

    fn lock(handle: &ArchiveHandle) -> Result<MutexGuard<'_, ZipArchive<BufReader<File>>>> {
        handle
            .lock()
            .map_err(|e| Error::Internal(format!("archive handle mutex poisoned: {e}")))
    }

    /// Walk the nesting levels of `location` down to the innermost archive.
    ///
    /// Returns the handle of the innermost archive and the entry path inside it.
    fn resolve(&self, location: &ResourceLocation) -> Result<(ArchiveHandle, String)> {
        if location.scheme() != ARCHIVE_SCHEME {
            return Err(Error::UnsupportedScheme(format!(
                "{} (archive resolver cannot read {})",
                location.scheme(),
                location.uri()
            )));
        }

        let segments = location.entry_segments();
        let (inner, outer_levels) = segments
            .split_last()
            .map_or(("", &[][..]), |(last, rest)| (*last, rest));

        let mut archive_path = PathBuf::from(location.path());
        for (depth, level) in outer_levels.iter().enumerate() {
            let prefix = location.entry_prefix(depth + 1);
            archive_path = self.materialize(&prefix, &archive_path, level)?;
        }

        Ok((self.handle(&archive_path)?, inner.to_string()))
    }

    fn scratch_paths(&self) -> Result<MutexGuard<'_, HashMap<String, PathBuf>>> {
        self.materialized
            .lock()
            .map_err(|e| Error::Internal(format!("scratch map mutex poisoned: {e}")))
    }

    /// Copy a nested archive out of its parent into the scratch directory.
    ///
    /// The scratch map is only locked for the lookup and the final insert, so
    /// unrelated nested archives materialize in parallel.
    fn materialize(
        &self,
        prefix: &ResourceLocation,
        parent_archive: &Path,
        entry: &str,
    ) -> Result<PathBuf> {
        if let Some(path) = self.scratch_paths()?.get(prefix.uri()) {
            return Ok(path.clone());
        }

        let bytes = {
            let handle = self.handle(parent_archive)?;
            let mut archive = Self::lock(&handle)?;
            let mut file = archive
                .by_name(entry)
                .map_err(|e| not_found_or(e, prefix))?;
            let mut bytes = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut bytes)?;
            bytes
        };

        let dir = {
            let mut scratch = self
                .scratch
                .lock()
                .map_err(|e| Error::Internal(format!("scratch dir mutex poisoned: {e}")))?;
            if scratch.is_none() {
                *scratch = Some(tempfile::Builder::new().prefix("nereus-").tempdir()?);
            }
            scratch
                .as_ref()
                .map(|dir| dir.path().to_path_buf())
                .ok_or_else(|| Error::Internal("scratch directory missing".to_string()))?
        };

        // Racing threads write identical bytes under the same name; the first
        // insert wins
        let path = dir.join(format!("{:016x}.zip", xxh3_64(prefix.uri().as_bytes())));
        let staging = tempfile::NamedTempFile::new_in(&dir)?;
        fs::write(staging.path(), &bytes)?;
        staging
            .persist(&path)
            .map_err(|e| Error::Io(e.error))?;
        debug!(
            nested = %prefix,
            scratch = %path.display(),
            bytes = bytes.len(),
            "Materialized nested archive"
        );

        let path = self
            .scratch_paths()?
            .entry(prefix.uri().to_string())
            .or_insert(path)
            .clone();
        Ok(path)
    }

    /// Classify an entry path, accounting for implied directories.
    fn classify(archive: &mut ZipArchive<BufReader<File>>, entry: &str) -> EntryKind {
        if entry.is_empty() {
            return EntryKind::Directory { modified: None };
        }

        if let Ok(file) = archive.by_name(entry) {
            let modified = file.last_modified().and_then(zip_time_to_utc);
            return if file.is_dir() {
                EntryKind::Directory { modified }
            } else {
                EntryKind::File {
                    size: file.size(),
                    modified,
                }
            };
        }

        let dir_name = format!("{entry}/");
        if let Ok(dir) = archive.by_name(&dir_name) {
            return EntryKind::Directory {
                modified: dir.last_modified().and_then(zip_time_to_utc),
            };
        }

        // Archives written without directory records still imply them
        if archive
            .file_names()
            .any(|name| normalize_entry_name(name).starts_with(&dir_name))
        {
            return EntryKind::Directory { modified: None };
        }

        EntryKind::Missing
    }
}

impl ContentResolver for ArchiveResolver {
    fn scheme(&self) -> &str {
        ARCHIVE_SCHEME
    }

    /// Entries are decompressed fully into memory before the stream is
    /// returned, so the archive lock is never held by a caller.
    fn open_stream(&self, location: &ResourceLocation) -> Result<ByteStream> {
        let (handle, entry) = self.resolve(location)?;
        let mut archive = Self::lock(&handle)?;

        if entry.is_empty() {
            return Err(Error::InvalidLocation(format!(
                "{location} is an archive root, not a readable entry"
            )));
        }

        let mut file = archive
            .by_name(&entry)
            .map_err(|e| not_found_or(e, location))?;
        if file.is_dir() {
            return Err(Error::InvalidLocation(format!("{location} is a directory")));
        }

        let mut bytes = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut bytes)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn exists(&self, location: &ResourceLocation) -> Result<bool> {
        if !Path::new(location.path()).exists() {
            return Ok(false);
        }
        let (handle, entry) = match self.resolve(location) {
            Ok(resolved) => resolved,
            Err(Error::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let mut archive = Self::lock(&handle)?;
        Ok(!matches!(
            Self::classify(&mut archive, &entry),
            EntryKind::Missing
        ))
    }

    fn list_children(&self, location: &ResourceLocation) -> Result<Vec<ResourceLocation>> {
        let (handle, entry) = self.resolve(location)?;
        let archive = Self::lock(&handle)?;

        let prefix = if entry.is_empty() {
            String::new()
        } else {
            format!("{entry}/")
        };

        let names: BTreeSet<String> = archive
            .file_names()
            .filter_map(|name| {
                let name = normalize_entry_name(name);
                let rest = name.strip_prefix(&prefix)?;
                rest.split('/')
                    .next()
                    .filter(|first| !first.is_empty())
                    .map(str::to_string)
            })
            .collect();

        Ok(names.iter().map(|name| location.join(name)).collect())
    }

    fn metadata(&self, location: &ResourceLocation) -> Result<ResourceMetadata> {
        let (handle, entry) = self.resolve(location)?;
        let mut archive = Self::lock(&handle)?;

        match Self::classify(&mut archive, &entry) {
            EntryKind::File { size, modified } => Ok(ResourceMetadata {
                size,
                modified,
                is_directory: false,
                content_type: content_type_for(location),
            }),
            EntryKind::Directory { modified } => Ok(ResourceMetadata {
                size: 0,
                modified,
                is_directory: true,
                content_type: None,
            }),
            EntryKind::Missing => Err(Error::NotFound(location.uri().to_string())),
        }
    }

    fn shutdown(&self) -> Result<()> {
        let closed = {
            let mut handles = self
                .handles
                .write()
                .map_err(|e| Error::Internal(format!("archive cache lock poisoned: {e}")))?;
            let count = handles.len();
            handles.clear();
            count
        };

        self.scratch_paths()?.clear();

        let scratch = self
            .scratch
            .lock()
            .map_err(|e| Error::Internal(format!("scratch dir mutex poisoned: {e}")))?
            .take();
        if let Some(dir) = scratch {
            dir.close()?;
        }

        debug!(closed, "Archive resolver shut down");
        Ok(())
    }
}

/// Map a zip lookup failure to `NotFound` when the entry simply is not there.
fn not_found_or(error: ZipError, location: &ResourceLocation) -> Error {
    match error {
        ZipError::FileNotFound => Error::NotFound(location.uri().to_string()),
        other => Error::Archive(other),
    }
}

/// Entry names written on Windows may use backslashes.
fn normalize_entry_name(name: &str) -> String {
    name.replace('\\', "/")
}

fn zip_time_to_utc(time: zip::DateTime) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )
    .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .expect("should add directory");
            } else {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .expect("should start file");
                writer.write_all(content).expect("should write entry");
            }
        }
        writer.finish().expect("should finish zip").into_inner()
    }

    fn write_zip(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, zip_bytes(entries)).expect("should write zip");
        path
    }

    #[test]
    fn reads_entries_and_reuses_the_cached_handle() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = write_zip(
            dir.path(),
            "app.zip",
            &[("a.txt", b"alpha"), ("b/c.txt", b"gamma")],
        );
        let resolver = ArchiveResolver::new();

        let a = resolver
            .read_to_vec(&ResourceLocation::archive(&path, "a.txt"))
            .expect("read a");
        let c = resolver
            .read_to_vec(&ResourceLocation::archive(&path, "b/c.txt"))
            .expect("read c");

        assert_eq!(a, b"alpha");
        assert_eq!(c, b"gamma");
        assert_eq!(resolver.cached_handles().expect("count"), 1);
    }

    #[test]
    fn lists_direct_children_including_implied_directories() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = write_zip(
            dir.path(),
            "app.zip",
            &[
                ("readme.txt", b"r"),
                ("src/main/App.java", b"class App {}"),
                ("src/main/util/Str.java", b"class Str {}"),
            ],
        );
        let resolver = ArchiveResolver::new();

        let root = ResourceLocation::archive(&path, "");
        let top: Vec<_> = resolver
            .list_children(&root)
            .expect("list root")
            .iter()
            .map(|l| l.file_name().to_string())
            .collect();
        assert_eq!(top, vec!["readme.txt", "src"]);

        let main = resolver
            .list_children(&ResourceLocation::archive(&path, "src/main"))
            .expect("list src/main");
        let names: Vec<_> = main.iter().map(ResourceLocation::file_name).collect();
        assert_eq!(names, vec!["App.java", "util"]);

        let meta = resolver
            .metadata(&ResourceLocation::archive(&path, "src"))
            .expect("implied dir metadata");
        assert!(meta.is_directory);
    }

    #[test]
    fn resolves_entries_of_nested_archives() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let inner = zip_bytes(&[("com/Foo.class", b"\xCA\xFE\xBA\xBE")]);
        let path = write_zip(
            dir.path(),
            "app.war",
            &[("WEB-INF/", b""), ("WEB-INF/lib/core.jar", inner.as_slice())],
        );
        let resolver = ArchiveResolver::new();

        let class = ResourceLocation::archive(&path, "WEB-INF/lib/core.jar!/com/Foo.class");
        assert!(resolver.exists(&class).expect("exists"));
        assert_eq!(
            resolver.read_to_vec(&class).expect("read nested"),
            b"\xCA\xFE\xBA\xBE"
        );

        let nested_root = ResourceLocation::archive(&path, "WEB-INF/lib/core.jar!/");
        let children = resolver.list_children(&nested_root).expect("list nested");
        assert_eq!(children, vec![nested_root.join("com")]);

        resolver.shutdown().expect("shutdown");
        assert_eq!(resolver.cached_handles().expect("count"), 0);
    }

    #[test]
    fn bang_in_entry_names_is_not_a_nesting_separator() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let jar = zip_bytes(&[("a.txt", b"inner")]);
        let path = write_zip(
            dir.path(),
            "dist.zip",
            &[
                ("release!/notes.txt", b"notes"),
                ("libs!/x.jar", jar.as_slice()),
            ],
        );
        let resolver = ArchiveResolver::new();
        let root = ResourceLocation::archive(&path, "");

        let release = root.join("release!");
        assert!(resolver.metadata(&release).expect("implied dir").is_directory);
        let notes = resolver.list_children(&release).expect("list release!");
        assert_eq!(notes, vec![release.join("notes.txt")]);
        assert_eq!(resolver.read_to_vec(&notes[0]).expect("read notes"), b"notes");

        let nested = root
            .join("libs!")
            .join("x.jar")
            .nested_root()
            .expect("jar opens")
            .join("a.txt");
        assert_eq!(resolver.read_to_vec(&nested).expect("read nested"), b"inner");

        let reparsed = ResourceLocation::parse(nested.uri()).expect("parse");
        assert_eq!(resolver.read_to_vec(&reparsed).expect("read reparsed"), b"inner");
    }

    #[test]
    fn nested_archives_materialize_once_under_parallel_reads() {
        use rayon::prelude::*;

        let dir = tempfile::tempdir().expect("should create temp dir");
        let jars: Vec<(String, Vec<u8>)> = (0..4)
            .map(|i| {
                let content = format!("jar {i}");
                (format!("lib/{i}.jar"), zip_bytes(&[("data.txt", content.as_bytes())]))
            })
            .collect();
        let entries: Vec<(&str, &[u8])> = jars
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
            .collect();
        let path = write_zip(dir.path(), "app.zip", &entries);
        let resolver = ArchiveResolver::new();

        let reads: Vec<(usize, Vec<u8>)> = (0..32)
            .into_par_iter()
            .map(|n| {
                let i = n % 4;
                let location = ResourceLocation::archive(&path, &format!("lib/{i}.jar!/data.txt"));
                (i, resolver.read_to_vec(&location).expect("read nested"))
            })
            .collect();

        for (i, bytes) in reads {
            assert_eq!(bytes, format!("jar {i}").as_bytes());
        }
        assert_eq!(resolver.scratch_paths().expect("scratch map").len(), 4);
        // outer archive plus one handle per nested jar
        assert_eq!(resolver.cached_handles().expect("count"), 5);
    }

    #[test]
    fn missing_entries_are_not_found() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = write_zip(dir.path(), "app.zip", &[("a.txt", b"alpha")]);
        let resolver = ArchiveResolver::new();
        let missing = ResourceLocation::archive(&path, "nope.txt");

        assert!(!resolver.exists(&missing).expect("exists"));
        assert!(matches!(resolver.metadata(&missing), Err(Error::NotFound(_))));
        assert!(matches!(resolver.open_stream(&missing), Err(Error::NotFound(_))));

        let missing_archive = ResourceLocation::archive(dir.path().join("none.zip"), "a.txt");
        assert!(!resolver.exists(&missing_archive).expect("exists"));
    }

    #[test]
    fn archive_root_is_not_readable_as_a_stream() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = write_zip(dir.path(), "app.zip", &[("a.txt", b"alpha")]);

        let result = ArchiveResolver::new().open_stream(&ResourceLocation::archive(&path, ""));

        assert!(matches!(result, Err(Error::InvalidLocation(_))));
    }
}
