//! On-disk layout written through BlockFile

use blockfile::{BlockFile, BlockFileConfig, FileMedium, Medium, OpenMode};
use tempfile::tempdir;

#[test]
fn test_blocks_are_contiguous_without_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("layout.blocks");
    let file = BlockFile::open(&path, 3).unwrap();

    for payload in [&b"abc"[..], b"de", b"fghij"] {
        file.write(payload).unwrap();
    }
    file.close().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"abcde\0fgh");
}

#[test]
fn test_with_medium_accepts_opened_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("explicit.blocks");
    let medium = FileMedium::open(&path, OpenMode::Truncate).unwrap();
    let file = BlockFile::with_medium(medium, BlockFileConfig::new(2)).unwrap();

    file.write(b"ok").unwrap();
    assert_eq!(file.read().unwrap().data, b"ok");
    file.close().unwrap();

    let medium = FileMedium::open(&path, OpenMode::Resume).unwrap();
    assert_eq!(medium.extent().unwrap(), 2);
    medium.close().unwrap();
}
