// Content-addressed block-processing engine.
//! Drives the `bpe` manifest-generator binary end to end against a real
//! zip archive.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn build_test_zip(path: &std::path::Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    writer.start_file("readme.txt", options).unwrap();
    writer.write_all(b"hello from the archive").unwrap();
    writer.start_file("nested/data.bin", options).unwrap();
    writer.write_all(&[7u8; 40]).unwrap();
    writer.finish().unwrap();
}

#[test]
fn generates_a_manifest_to_stdout() {
    let dir = assert_fs::TempDir::new().unwrap();
    let zip_path = dir.path().join("build.zip");
    build_test_zip(&zip_path);

    Command::cargo_bin("bpe")
        .unwrap()
        .arg("--input")
        .arg(&zip_path)
        .arg("--chunk-size")
        .arg("16")
        .assert()
        .success()
        .stdout(predicate::str::contains("readme.txt -> "))
        .stdout(predicate::str::contains("nested/data.bin -> "));
}

#[test]
fn writes_the_manifest_to_the_requested_output_file() {
    let dir = assert_fs::TempDir::new().unwrap();
    let zip_path = dir.path().join("build.zip");
    build_test_zip(&zip_path);
    let out_path = dir.path().join("manifest.txt");

    Command::cargo_bin("bpe")
        .unwrap()
        .arg("--input")
        .arg(&zip_path)
        .arg("--output")
        .arg(&out_path)
        .assert()
        .success();

    let text = std::fs::read_to_string(&out_path).unwrap();
    assert!(text.contains("readme.txt -> "));
}

#[test]
fn fails_on_missing_input() {
    let dir = assert_fs::TempDir::new().unwrap();
    Command::cargo_bin("bpe")
        .unwrap()
        .arg("--input")
        .arg(dir.path().join("nope.zip"))
        .assert()
        .failure();
}
