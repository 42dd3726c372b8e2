//! End-to-end tests that drive the `zipline` binary the way a user would.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;

fn write_gzip(path: &Path, data: &[u8]) {
    let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap();
}

fn zipline(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "--quiet", "-p", "cli", "--"])
        .args(args)
        .output()
        .expect("failed to run zipline")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn build_then_fetch_lines() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("fruit.gz");
    write_gzip(&gz, b"apple\nbanana\ncherry\n");
    let gz = gz.to_str().unwrap();

    let built = zipline(&["build", gz, "--index-every", "64"]);
    assert!(built.status.success(), "{built:?}");

    let out = zipline(&["line", gz, "2"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "banana\n");

    let out = zipline(&["line", gz, "3", "1"]);
    assert_eq!(stdout(&out), "cherry\napple\n");
}

#[test]
fn missing_line_exits_zero_with_no_output() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("short.gz");
    write_gzip(&gz, b"only\n");
    let gz = gz.to_str().unwrap();

    assert!(zipline(&["build", gz]).status.success());
    let out = zipline(&["line", gz, "42"]);
    assert!(out.status.success());
    assert!(stdout(&out).is_empty());
}

#[test]
fn numeric_field_index_query() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("nums.gz");
    let data: Vec<u8> = (1..=500)
        .flat_map(|i| format!("line-{i}\n").into_bytes())
        .collect();
    write_gzip(&gz, &data);
    let gz = gz.to_str().unwrap();

    let built = zipline(&[
        "build", gz, "--field", "2", "--delimiter", "-", "--numeric", "--name", "nums",
    ]);
    assert!(built.status.success(), "{built:?}");

    let out = zipline(&["query", gz, "nums", "137"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "line-137\n");

    let out = zipline(&["query", gz, "nums", "999"]);
    assert!(out.status.success());
    assert!(stdout(&out).is_empty());
}

#[test]
fn metadata_dump_includes_version_and_source() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("meta.gz");
    write_gzip(&gz, b"a\n");
    let gz = gz.to_str().unwrap();

    assert!(zipline(&["build", gz]).status.success());
    let out = zipline(&["metadata", gz]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("version = 1"), "{text}");
    assert!(text.contains("compressedFile ="), "{text}");
    assert!(text.contains("compressedSize ="), "{text}");
}

#[test]
fn stale_sidecar_fails_without_force() {
    let dir = tempdir().unwrap();
    let gz = dir.path().join("stale.gz");
    write_gzip(&gz, b"apple\nbanana\n");
    let path = gz.to_str().unwrap();

    assert!(zipline(&["build", path]).status.success());
    let mut f = std::fs::OpenOptions::new().append(true).open(&gz).unwrap();
    f.write_all(b"junk").unwrap();
    drop(f);

    let out = zipline(&["line", path, "1"]);
    assert!(!out.status.success());

    let out = zipline(&["line", path, "1", "--force"]);
    assert!(out.status.success(), "{out:?}");
    assert_eq!(stdout(&out), "apple\n");
}

#[test]
fn build_failure_exits_nonzero() {
    let dir = tempdir().unwrap();
    let bogus = dir.path().join("bogus.gz");
    std::fs::write(&bogus, b"definitely not deflate").unwrap();

    let out = zipline(&["build", bogus.to_str().unwrap()]);
    assert!(!out.status.success());
}
