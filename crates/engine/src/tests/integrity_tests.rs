use std::fs::OpenOptions;
use std::io::Write;

use rusqlite::Connection;
use tempfile::tempdir;

use super::helpers::*;
use crate::{Error, Index};

#[test]
fn metadata_records_the_build_provenance() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("m.gz");
    let idx = dir.path().join("m.gz.zipline");
    write_gzip(&gz, b"a\nb\n");
    build(&gz, &idx, 64);

    let index = load(&gz, &idx);
    let meta = index.metadata();
    assert_eq!(meta.get("version").map(String::as_str), Some("1"));
    assert_eq!(
        meta.get("compressedFile").map(String::as_str),
        Some(gz.display().to_string().as_str())
    );
    let size: u64 = meta.get("compressedSize").unwrap().parse().unwrap();
    assert_eq!(size, std::fs::metadata(&gz).unwrap().len());
    assert!(meta.contains_key("compressedModTime"));
}

#[test]
fn unknown_metadata_keys_are_preserved() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("u.gz");
    let idx = dir.path().join("u.gz.zipline");
    write_gzip(&gz, b"a\n");
    build(&gz, &idx, 64);

    let conn = Connection::open(&idx).unwrap();
    conn.execute(
        "INSERT INTO Metadata VALUES('builtBy', 'somebody-else')",
        [],
    )
    .unwrap();
    drop(conn);

    let index = load(&gz, &idx);
    assert_eq!(
        index.metadata().get("builtBy").map(String::as_str),
        Some("somebody-else")
    );
}

#[test]
fn size_change_fails_the_load_unless_forced() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("s.gz");
    let idx = dir.path().join("s.gz.zipline");
    write_gzip(&gz, b"apple\nbanana\n");
    build(&gz, &idx, 64);

    // Appending does not disturb the indexed compressed bytes.
    let mut f = OpenOptions::new().append(true).open(&gz).unwrap();
    f.write_all(b"junk").unwrap();
    drop(f);

    let err = Index::load(&gz, &idx, false).unwrap_err();
    assert!(matches!(err, Error::Integrity(_)), "got {err:?}");

    let mut index = Index::load(&gz, &idx, true).unwrap();
    assert_eq!(fetch(&mut index, 2).unwrap(), b"banana");
}

#[test]
fn mtime_change_fails_the_load_unless_forced() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("t.gz");
    let idx = dir.path().join("t.gz.zipline");
    write_gzip(&gz, b"apple\nbanana\n");
    build(&gz, &idx, 64);

    let conn = Connection::open(&idx).unwrap();
    conn.execute(
        "UPDATE Metadata SET value = '123456' WHERE key = 'compressedModTime'",
        [],
    )
    .unwrap();
    drop(conn);

    let err = Index::load(&gz, &idx, false).unwrap_err();
    assert!(matches!(err, Error::Integrity(_)), "got {err:?}");

    let mut index = Index::load(&gz, &idx, true).unwrap();
    assert_eq!(fetch(&mut index, 1).unwrap(), b"apple");
}

#[test]
fn missing_metadata_keys_are_accepted() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("old.gz");
    let idx = dir.path().join("old.gz.zipline");
    write_gzip(&gz, b"apple\nbanana\n");
    build(&gz, &idx, 64);

    let conn = Connection::open(&idx).unwrap();
    conn.execute(
        "DELETE FROM Metadata WHERE key IN ('compressedSize', 'compressedModTime')",
        [],
    )
    .unwrap();
    drop(conn);

    let mut index = Index::load(&gz, &idx, false).unwrap();
    assert_eq!(fetch(&mut index, 2).unwrap(), b"banana");
}

#[test]
fn implausible_line_length_is_an_integrity_error() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("c.gz");
    let idx = dir.path().join("c.gz.zipline");
    write_gzip(&gz, b"apple\nbanana\ncherry\n");
    build(&gz, &idx, 64);

    let conn = Connection::open(&idx).unwrap();
    conn.execute(
        "UPDATE LineOffsets SET length = 1000000000000 WHERE line = 2",
        [],
    )
    .unwrap();
    drop(conn);

    let mut index = Index::load(&gz, &idx, false).unwrap();
    let mut sink = Collect::default();
    let err = index.get_line(2, &mut sink).unwrap_err();
    assert!(matches!(err, Error::Integrity(_)), "got {err:?}");
    assert!(sink.lines.is_empty());
}

#[test]
fn corrupt_window_blob_is_a_compression_error() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("w.gz");
    let idx = dir.path().join("w.gz.zipline");
    // Two checkpoint spans, so line fetches in the second span need its
    // window.
    let data = numbered_lines(60_000);
    write_gzip_flushed(&gz, &data, 64 * 1024);
    build(&gz, &idx, 128 * 1024);

    let conn = Connection::open(&idx).unwrap();
    conn.execute(
        "UPDATE AccessPoints SET window = x'0102' WHERE uncompressedOffset > 0",
        [],
    )
    .unwrap();
    drop(conn);

    let mut index = Index::load(&gz, &idx, false).unwrap();
    let mut sink = Collect::default();
    let err = index.get_line(59_000, &mut sink).unwrap_err();
    assert!(matches!(err, Error::Compression(_)), "got {err:?}");
}

#[test]
fn missing_sidecar_is_an_error() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("no.gz");
    write_gzip(&gz, b"a\n");
    let err = Index::load(&gz, &dir.path().join("absent.zipline"), false).unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "got {err:?}");
}
