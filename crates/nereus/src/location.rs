//! Resource locations: one address format for plain files, archive entries and
//! archives nested inside archives.
//!
//! ## URI Format
//!
//! ```text
//! file:/abs/path/to/file.txt
//! archive:/abs/outer.zip!/                        (root of an archive)
//! archive:/abs/outer.zip!/dir/inner.jar!/a/B.class (entry of a nested archive)
//! ```
//!
//! The part after the first `!/` is the entry path. Every further `!/` opens
//! one more level of archive nesting. A literal `!` or `%` in a name is
//! percent-encoded (`%21`, `%25`) in the URI, so names like `release!/` never
//! read as a nesting separator. Paths are normalized lexically when a location
//! is built, so two spellings of the same resource compare equal.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scheme for plain filesystem locations.
pub const FILE_SCHEME: &str = "file";

/// Scheme for locations inside (possibly nested) archives.
pub const ARCHIVE_SCHEME: &str = "archive";

/// Separator between an archive and the entry path inside it.
pub const NESTING_SEPARATOR: &str = "!/";

/// Bytes escaped in path and entry names when rendered into a URI.
const NAME_ESCAPES: &AsciiSet = &CONTROLS.add(b'%').add(b'!');

/// File extensions treated as zip-family archives.
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "jar", "war", "ear"];

/// An immutable address of a piece of content.
///
/// Equality, ordering and hashing use the normalized URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceLocation {
    scheme: String,
    /// Decoded outermost path
    path: String,
    /// Entry in URI syntax (names escaped, levels joined by `!/`)
    entry: Option<String>,
    /// Decoded entry path of each nesting level
    levels: Vec<String>,
    uri: String,
}

impl ResourceLocation {
    /// Build a location from its parts, normalizing them.
    ///
    /// `path` is a plain path; `entry` uses URI syntax (see
    /// [`archive`](Self::archive)).
    pub fn new(scheme: &str, path: &str, entry: Option<&str>) -> Result<Self> {
        let scheme = scheme.to_ascii_lowercase();
        if !is_valid_scheme(&scheme) {
            return Err(Error::InvalidLocation(format!("invalid scheme '{scheme}'")));
        }
        if path.is_empty() {
            return Err(Error::InvalidLocation("empty path".to_string()));
        }

        let entry = match (scheme.as_str(), entry) {
            (FILE_SCHEME, Some(e)) => {
                return Err(Error::InvalidLocation(format!(
                    "file locations cannot carry an entry path: '{e}'"
                )));
            }
            (ARCHIVE_SCHEME, None) => Some(String::new()),
            (_, e) => e.map(normalize_entry),
        };

        Ok(Self::from_normalized(scheme, normalize_path(path), entry))
    }

    /// Location of a plain file or directory.
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = normalize_path(&path.as_ref().to_string_lossy());
        Self::from_normalized(FILE_SCHEME.to_string(), path, None)
    }

    /// Location of an entry inside an archive file.
    ///
    /// An empty `entry` addresses the archive root. `entry` may contain `!/`
    /// to address content of nested archives; a literal `!` in a name is
    /// written `%21`.
    pub fn archive(archive: impl AsRef<Path>, entry: &str) -> Self {
        let path = normalize_path(&archive.as_ref().to_string_lossy());
        Self::from_normalized(ARCHIVE_SCHEME.to_string(), path, Some(normalize_entry(entry)))
    }

    /// Parse a URI such as `archive:/a/b.zip!/c.txt`.
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once(':')
            .filter(|(scheme, _)| scheme.len() > 1)
            .ok_or_else(|| Error::InvalidLocation(format!("missing scheme in '{uri}'")))?;

        // file:///abs and file:/abs are the same location
        let rest = rest.strip_prefix("//").filter(|r| r.starts_with('/')).unwrap_or(rest);

        match rest.split_once(NESTING_SEPARATOR) {
            Some((path, entry)) => Self::new(scheme, &unescape(path), Some(entry)),
            None => Self::new(scheme, &unescape(rest), None),
        }
    }

    fn from_normalized(scheme: String, path: String, entry: Option<String>) -> Self {
        let escaped_path = escape(&path);
        let (uri, levels) = match &entry {
            Some(entry) => (
                format!("{scheme}:{escaped_path}{NESTING_SEPARATOR}{entry}"),
                entry
                    .split(NESTING_SEPARATOR)
                    .map(|level| unescape(level).into_owned())
                    .collect(),
            ),
            None => (format!("{scheme}:{escaped_path}"), Vec::new()),
        };
        Self {
            scheme,
            path,
            entry,
            levels,
            uri,
        }
    }

    /// The scheme (`file`, `archive`, ...).
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The outermost path (the file, or the outermost archive).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The entry path inside the archive in URI syntax, including nesting
    /// separators.
    #[must_use]
    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// The normalized URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Decoded entry path, one segment per nesting level.
    ///
    /// `archive:/a.zip!/lib/b.jar!/C.class` yields `["lib/b.jar", "C.class"]`.
    #[must_use]
    pub fn entry_segments(&self) -> Vec<&str> {
        self.levels.iter().map(String::as_str).collect()
    }

    /// Location of this entry cut down to its first `levels` nesting levels.
    ///
    /// For `archive:/a.zip!/lib/b.jar!/C.class`, one level is
    /// `archive:/a.zip!/lib/b.jar`.
    pub(crate) fn entry_prefix(&self, levels: usize) -> Self {
        let entry = self
            .entry
            .as_deref()
            .unwrap_or("")
            .split(NESTING_SEPARATOR)
            .take(levels)
            .collect::<Vec<_>>()
            .join(NESTING_SEPARATOR);
        Self::from_normalized(self.scheme.clone(), self.path.clone(), Some(entry))
    }

    /// The local path for `file` locations.
    #[must_use]
    pub fn to_file_path(&self) -> Option<PathBuf> {
        (self.scheme == FILE_SCHEME).then(|| PathBuf::from(&self.path))
    }

    /// Whether this addresses the root directory of an archive.
    #[must_use]
    pub fn is_archive_root(&self) -> bool {
        self.scheme == ARCHIVE_SCHEME
            && self
                .entry
                .as_deref()
                .is_some_and(|e| e.is_empty() || e.ends_with(NESTING_SEPARATOR))
    }

    /// Last path component of the innermost path.
    ///
    /// For an archive root this is the archive's own file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        let innermost = self
            .levels
            .iter()
            .rev()
            .find(|s| !s.is_empty())
            .unwrap_or(&self.path);
        innermost.rsplit('/').find(|c| !c.is_empty()).unwrap_or(innermost)
    }

    /// Lowercased extension of [`file_name`](Self::file_name), if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        name.rsplit_once('.')
            .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }

    /// Whether the resource's name marks it as a zip-family archive.
    #[must_use]
    pub fn looks_like_archive(&self) -> bool {
        !self.is_archive_root()
            && self
                .extension()
                .is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Location of the root directory inside this resource, read as an archive.
    ///
    /// Returns `None` for locations that are already archive roots or whose
    /// scheme cannot be nested.
    #[must_use]
    pub fn nested_root(&self) -> Option<Self> {
        match self.scheme.as_str() {
            FILE_SCHEME => Some(Self::archive(&self.path, "")),
            ARCHIVE_SCHEME if !self.is_archive_root() => {
                let entry = format!("{}{NESTING_SEPARATOR}", self.entry.as_deref().unwrap_or(""));
                Some(Self::from_normalized(
                    self.scheme.clone(),
                    self.path.clone(),
                    Some(entry),
                ))
            }
            _ => None,
        }
    }

    /// Location of a direct child named `name` of this directory-like location.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        match &self.entry {
            Some(entry) => {
                let mut segments: Vec<&str> = entry.split(NESTING_SEPARATOR).collect();
                let last = segments.pop().unwrap_or("");
                let joined = normalize_segment(&format!("{last}/{}", escape(name)));
                segments.push(&joined);
                Self::from_normalized(
                    self.scheme.clone(),
                    self.path.clone(),
                    Some(segments.join(NESTING_SEPARATOR)),
                )
            }
            None => Self::from_normalized(
                self.scheme.clone(),
                normalize_path(&format!("{}/{name}", self.path)),
                None,
            ),
        }
    }

    /// The containing location.
    ///
    /// The parent of an archive root is the archive itself (a file, or an entry
    /// of the enclosing archive). Returns `None` at the filesystem root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match &self.entry {
            Some(entry) => {
                let mut segments: Vec<&str> = entry.split(NESTING_SEPARATOR).collect();
                let last = segments.pop().unwrap_or("");
                if last.is_empty() {
                    // Archive root: step out to the archive resource itself
                    if segments.is_empty() {
                        return Some(Self::file(&self.path));
                    }
                    return Some(Self::from_normalized(
                        self.scheme.clone(),
                        self.path.clone(),
                        Some(segments.join(NESTING_SEPARATOR)),
                    ));
                }
                let parent = last.rsplit_once('/').map_or("", |(p, _)| p);
                segments.push(parent);
                Some(Self::from_normalized(
                    self.scheme.clone(),
                    self.path.clone(),
                    Some(segments.join(NESTING_SEPARATOR)),
                ))
            }
            None => {
                let trimmed = self.path.trim_end_matches('/');
                let (parent, _) = trimmed.rsplit_once('/')?;
                let parent = if parent.is_empty() { "/" } else { parent };
                Some(Self::from_normalized(
                    self.scheme.clone(),
                    parent.to_string(),
                    None,
                ))
            }
        }
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl FromStr for ResourceLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceLocation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceLocation> for String {
    fn from(location: ResourceLocation) -> Self {
        location.uri
    }
}

impl PartialEq for ResourceLocation {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for ResourceLocation {}

impl Hash for ResourceLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

impl PartialOrd for ResourceLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uri.cmp(&other.uri)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Normalize a filesystem-style path lexically.
///
/// Backslashes become `/`, `.` segments and duplicate or trailing slashes are
/// removed, `..` pops the previous segment where one exists.
fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match stack.last() {
                Some(&last) if last != ".." => {
                    stack.pop();
                }
                _ if absolute => {}
                _ => stack.push(".."),
            },
            s => stack.push(s),
        }
    }

    let joined = stack.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Normalize one entry segment: always relative, never escapes the archive.
fn normalize_segment(segment: &str) -> String {
    let segment = segment.replace('\\', "/");
    let mut stack: Vec<&str> = Vec::new();
    for part in segment.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    stack.join("/")
}

/// Normalize a full entry path, keeping the nesting separators.
///
/// Empty intermediate levels are dropped; only the innermost level may be
/// empty (addressing an archive root). Names come out canonically escaped.
fn normalize_entry(entry: &str) -> String {
    let levels: Vec<String> = entry
        .split(NESTING_SEPARATOR)
        .map(|level| escape(&normalize_segment(&unescape(level))).into_owned())
        .collect();
    let last_index = levels.len().saturating_sub(1);
    levels
        .into_iter()
        .enumerate()
        .filter(|(i, level)| *i == last_index || !level.is_empty())
        .map(|(_, level)| level)
        .collect::<Vec<_>>()
        .join(NESTING_SEPARATOR)
}

fn escape(name: &str) -> Cow<'_, str> {
    utf8_percent_encode(name, NAME_ESCAPES).into()
}

fn unescape(name: &str) -> Cow<'_, str> {
    percent_decode_str(name).decode_utf8_lossy()
}
