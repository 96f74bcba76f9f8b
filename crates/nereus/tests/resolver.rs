//! Tests for content resolution across plain files, archives and nested
//! archives.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use nereus::{CompositeResolver, ContentResolver, Error, ResourceLocation};
use proptest::prelude::*;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(content).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write file");
    path
}

#[test]
fn unsupported_schemes_are_reported_by_name() {
    let resolver = CompositeResolver::with_defaults();
    let location = ResourceLocation::parse("http:/example.com/a.txt").expect("parse");

    let result = resolver.open_stream(&location);

    assert!(matches!(result, Err(Error::UnsupportedScheme(ref s)) if s == "http"));
}

#[test]
fn three_levels_of_nesting_resolve() {
    let dir = TempDir::new().expect("create temp dir");
    let innermost = zip_bytes(&[("deep.txt", b"bottom")]);
    let middle = zip_bytes(&[("lib/inner.jar", innermost.as_slice())]);
    let outer = write_file(
        dir.path(),
        "outer.ear",
        &zip_bytes(&[("modules/app.war", middle.as_slice())]),
    );
    let resolver = CompositeResolver::with_defaults();

    let uri = format!(
        "archive:{}!/modules/app.war!/lib/inner.jar!/deep.txt",
        outer.display()
    );
    let location = ResourceLocation::parse(&uri).expect("parse");

    assert_eq!(resolver.read_to_vec(&location).expect("read"), b"bottom");
    let meta = resolver.metadata(&location).expect("metadata");
    assert_eq!(meta.size, 6);
    assert!(!meta.is_directory);

    resolver.shutdown().expect("shutdown");
}

#[test]
fn walking_parents_leads_back_out_of_archives() {
    let location = ResourceLocation::parse("archive:/w/app.war!/lib/core.jar!/com/Foo.class")
        .expect("parse");

    let chain: Vec<String> = std::iter::successors(Some(location), ResourceLocation::parent)
        .map(|l| l.uri().to_string())
        .collect();

    assert_eq!(
        chain,
        vec![
            "archive:/w/app.war!/lib/core.jar!/com/Foo.class",
            "archive:/w/app.war!/lib/core.jar!/com",
            "archive:/w/app.war!/lib/core.jar!/",
            "archive:/w/app.war!/lib/core.jar",
            "archive:/w/app.war!/lib",
            "archive:/w/app.war!/",
            "file:/w/app.war",
            "file:/w",
            "file:/",
        ]
    );
}

#[test]
fn listing_a_plain_directory_is_sorted_and_shallow() {
    let dir = TempDir::new().expect("create temp dir");
    fs::create_dir_all(dir.path().join("b/nested")).expect("create dirs");
    write_file(dir.path(), "c.txt", b"c");
    write_file(dir.path(), "a.txt", b"a");
    let resolver = CompositeResolver::with_defaults();

    let children = resolver
        .list_children(&ResourceLocation::file(dir.path()))
        .expect("list");

    let names: Vec<&str> = children.iter().map(ResourceLocation::file_name).collect();
    assert_eq!(names, vec!["a.txt", "b", "c.txt"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The same bytes read the same whether stored plainly, in an archive, or
    /// in an archive inside an archive.
    #[test]
    fn content_is_identical_across_storage_forms(content in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let dir = TempDir::new().expect("create temp dir");
        let plain = write_file(dir.path(), "data.bin", &content);
        let inner = zip_bytes(&[("data.bin", content.as_slice())]);
        let outer = write_file(
            dir.path(),
            "outer.zip",
            &zip_bytes(&[("data.bin", content.as_slice()), ("inner.jar", inner.as_slice())]),
        );
        let resolver = CompositeResolver::with_defaults();

        let from_file = resolver.read_to_vec(&ResourceLocation::file(&plain)).expect("file");
        let from_archive = resolver
            .read_to_vec(&ResourceLocation::archive(&outer, "data.bin"))
            .expect("archive");
        let from_nested = resolver
            .read_to_vec(&ResourceLocation::archive(&outer, "inner.jar!/data.bin"))
            .expect("nested");

        prop_assert_eq!(&from_file, &content);
        prop_assert_eq!(&from_archive, &content);
        prop_assert_eq!(&from_nested, &content);
        resolver.shutdown().expect("shutdown");
    }
}
