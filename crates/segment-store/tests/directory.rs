//! Integration tests for the directory-backed segment store

use bytes::Bytes;
use segment_store::{DirectoryStore, SegmentStore, SegmentStoreConfig};

#[test]
fn test_write_read_list() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirectoryStore::new(dir.path()).unwrap();

    let stream = "aff4://0f1e2d3c/image.dd";
    for bevy in 0..3 {
        let name = format!("{}/{:08}", stream, bevy);
        store
            .write_segment(&name, Bytes::from(vec![bevy as u8; 16]))
            .unwrap();
        store
            .write_segment(&format!("{}.index", name), Bytes::from_static(b"idx"))
            .unwrap();
    }
    store
        .write_segment("aff4://0f1e2d3c/information.json", Bytes::from_static(b"{}"))
        .unwrap();

    let listed = store.list_segments(stream).unwrap();
    assert_eq!(listed.len(), 6);
    assert_eq!(listed[0], format!("{}/00000000", stream));
    assert_eq!(listed[1], format!("{}/00000000.index", stream));

    let data = store.read_segment(&format!("{}/00000002", stream)).unwrap();
    assert_eq!(data.as_ref(), &[2u8; 16]);
}

#[test]
fn test_reopen_sees_previous_segments() {
    let dir = tempfile::tempdir().unwrap();
    let config = SegmentStoreConfig::Directory {
        path: dir.path().join("volume"),
    };

    {
        let store = config.open().unwrap();
        store
            .write_segment("aff4://v/a", Bytes::from_static(b"first"))
            .unwrap();
        store
            .write_segment("aff4://v/a", Bytes::from_static(b"second"))
            .unwrap();
    }

    let store = config.open().unwrap();
    assert!(store.has_segment("aff4://v/a").unwrap());
    assert_eq!(
        store.read_segment("aff4://v/a").unwrap(),
        Bytes::from_static(b"second")
    );
    assert!(store.read_segment("aff4://v/b").unwrap_err().is_not_found());
}
