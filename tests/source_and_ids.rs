// Content-addressed block-processing engine.
//! Table-driven checks for `BuildId` encoding and directory-source path
//! normalization (S6, S8).

use std::fs;
use std::io::Write;

use blockpipe::source::{BlockSource, DirectoryWalkSource};
use blockpipe::BuildId;
use rstest::rstest;
use tokio_util::sync::CancellationToken;

#[rstest]
#[case(BuildId::new(0x0102030405060708, 0x0A0B, [0x11, 0x22, 0x33, 0x44], 0x0505),
    [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0A, 0x0B, 0x11, 0x22, 0x33, 0x44, 0x05, 0x05])]
#[case(BuildId::new(0, 0, [0, 0, 0, 0], 0), [0u8; 16])]
#[case(BuildId::new(u64::MAX, u16::MAX, [0xff, 0xff, 0xff, 0xff], u16::MAX), [0xff; 16])]
fn build_id_encodes_fields_big_endian(#[case] id: BuildId, #[case] expected: [u8; 16]) {
    assert_eq!(id.to_bytes(), expected);
    assert_eq!(BuildId::from_bytes(&expected), id);
}

#[rstest]
#[case("sub/x.bin")]
#[case("a/b/c/d.bin")]
#[case("top.bin")]
fn directory_source_emits_posix_relative_paths(#[case] relative: &str) {
    let dir = tempfile::tempdir().unwrap();
    let full_path = dir.path().join(relative);
    fs::create_dir_all(full_path.parent().unwrap()).unwrap();
    fs::File::create(&full_path)
        .unwrap()
        .write_all(b"x")
        .unwrap();

    let rt = tokio::runtime::Runtime::new().unwrap();
    let emitted_path = rt.block_on(async move {
        let mut rx = DirectoryWalkSource::new(dir.path()).spawn(4096, CancellationToken::new());
        let item = rx.recv().await.unwrap().unwrap();
        item.path().to_string()
    });
    assert_eq!(emitted_path, relative);
    assert!(!emitted_path.contains('\\'));
    assert!(!emitted_path.starts_with('/'));
}
