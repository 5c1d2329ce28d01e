//! Integration tests for encrypted image streams and their key bags

mod common;

use std::collections::HashSet;
use std::io::SeekFrom;

use ::common::config::ImageConfig;
use ::common::crypto::{derive_iv, CipherId, ContentKey, KeyBag, KeyBagError};
use ::common::image::{data_segment_name, EncryptedStream, ImageError, ImageStream};
use ::common::lexicon;
use ::common::resolver::Graph;
use ::common::testkit;

const ALL_CIPHERS: [CipherId; 3] = [
    CipherId::ChaCha20Poly1305,
    CipherId::Aes256Gcm,
    CipherId::ChaCha20,
];

fn encrypted(chunk_size: u64, chunks_per_segment: u64, cipher: CipherId) -> ImageConfig {
    ImageConfig {
        cipher: Some(cipher),
        ..common::config(chunk_size, chunks_per_segment)
    }
}

/// 137 distinct-looking bytes
fn message() -> Vec<u8> {
    (0..137u32).map(|i| b'!' + (i * 7 % 90) as u8).collect()
}

#[test]
fn test_concrete_scenario() {
    let vol = common::setup_volume();
    let msg = message();
    assert_eq!(msg.len(), 137);

    let mut stream = vol.create("encrypted", encrypted(512, 1024, CipherId::default()));
    stream.set_password("password", common::fast_kdf()).unwrap();
    for _ in 0..100 {
        stream.write(&msg).unwrap();
    }
    stream.close().unwrap();

    let mut stream = vol.open("encrypted");
    assert_eq!(stream.size(), 13700);
    stream.unlock("password").unwrap();

    assert_eq!(stream.read(137).unwrap(), msg);
    stream.seek_read(SeekFrom::Start(137)).unwrap();
    assert_eq!(stream.read(137).unwrap(), msg);
    // inside the second chunk
    stream.seek_read(SeekFrom::Start(548)).unwrap();
    assert_eq!(stream.read(137).unwrap(), msg);
}

#[test]
fn test_round_trip_all_ciphers() {
    let vol = common::setup_volume();
    let data = common::mixed(9000, 20);

    for cipher in ALL_CIPHERS {
        for (chunk_size, chunks_per_segment) in [(64, 3), (1000, 1), (4096, 8)] {
            let name = format!("{}-{}-{}", cipher, chunk_size, chunks_per_segment);
            let mut stream = vol.create(&name, encrypted(chunk_size, chunks_per_segment, cipher));
            stream.set_password("correct horse", common::fast_kdf()).unwrap();
            stream.write(&data).unwrap();
            stream.close().unwrap();

            let mut stream = vol.open(&name);
            assert!(stream.is_encrypted());
            stream.unlock("correct horse").unwrap();
            assert_eq!(stream.read_all().unwrap(), data, "{}", name);
        }
    }
}

#[test]
fn test_ciphertext_hides_plaintext() {
    let vol = common::setup_volume();
    let data = common::text(4096);
    let mut stream = vol.create("hidden", encrypted(1024, 4, CipherId::Aes256Gcm));
    stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(&data).unwrap();
    stream.close().unwrap();

    let stored = vol
        .store
        .read_segment(&data_segment_name(&vol.stream_urn("hidden"), 0))
        .unwrap();
    let needle = &data[..32];
    assert!(!stored.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn test_wrong_password_rejected() {
    let vol = common::setup_volume();
    let mut stream = vol.create("locked", encrypted(512, 4, CipherId::default()));
    stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(&common::noise(3000, 21)).unwrap();
    stream.close().unwrap();

    let mut stream = vol.open("locked");
    for wrong in ["passwor", "Password", "password1", ""] {
        let err = stream.unlock(wrong).unwrap_err();
        assert!(err.is_bad_password(), "{}: {:?}", wrong, err);
    }
    // still locked: no plaintext, no garbage
    assert!(matches!(stream.read(10), Err(ImageError::Configuration(_))));
}

#[test]
fn test_wrong_key_fails_authentication() {
    let vol = common::setup_volume();
    let data = common::noise(2000, 22);
    for cipher in [CipherId::ChaCha20Poly1305, CipherId::Aes256Gcm] {
        let name = cipher.as_str();
        let mut stream = vol.create(name, encrypted(512, 2, cipher));
        stream.set_key(ContentKey::generate().unwrap()).unwrap();
        stream.write(&data).unwrap();
        stream.close().unwrap();

        let mut stream = vol.open(name);
        stream.set_key(ContentKey::generate().unwrap()).unwrap();
        let err = stream.read(10).unwrap_err();
        assert!(err.is_authentication(), "{:?}", err);
    }
}

#[test]
fn test_unauthenticated_cipher_never_reproduces_data_under_wrong_key() {
    let vol = common::setup_volume();
    let data = common::noise(2000, 23);
    let mut stream = vol.create("stream", encrypted(512, 2, CipherId::ChaCha20));
    stream.set_key(ContentKey::generate().unwrap()).unwrap();
    stream.set_compression(::common::image::CompressionMethod::None).unwrap();
    stream.write(&data).unwrap();
    stream.close().unwrap();

    let mut stream = vol.open("stream");
    assert!(!stream.encryption().unwrap().integrity());
    stream.set_key(ContentKey::generate().unwrap()).unwrap();
    assert_ne!(stream.read_all().unwrap(), data);
}

#[test]
fn test_tampered_chunk_detected() {
    let vol = common::setup_volume();
    let data = common::noise(4096, 24);
    // one chunk per bevy so the untouched chunk stays readable
    let mut stream = vol.create("tamper", encrypted(1024, 1, CipherId::default()));
    stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(&data).unwrap();
    stream.close().unwrap();

    let segment = data_segment_name(&vol.stream_urn("tamper"), 1);
    testkit::flip_bit(vol.store.as_ref(), &segment, 100).unwrap();

    let mut stream = vol.open("tamper");
    stream.unlock("password").unwrap();
    assert_eq!(stream.read(1024).unwrap(), &data[..1024]);
    let err = stream.read(1).unwrap_err();
    assert!(err.is_authentication(), "{:?}", err);

    // the rest of the stream is still there
    stream.seek_read(SeekFrom::Start(2048)).unwrap();
    assert_eq!(stream.read_all().unwrap(), &data[2048..]);
}

#[test]
fn test_tampered_revision_header_detected() {
    let vol = common::setup_volume();
    let mut stream = vol.create("header", encrypted(256, 2, CipherId::Aes256Gcm));
    stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(&common::noise(300, 25)).unwrap();
    stream.close().unwrap();

    testkit::flip_bit(
        vol.store.as_ref(),
        &data_segment_name(&vol.stream_urn("header"), 0),
        0,
    )
    .unwrap();
    let mut stream = vol.open("header");
    stream.unlock("password").unwrap();
    assert!(stream.read(1).unwrap_err().is_authentication());
}

#[test]
fn test_declared_integrity_must_match_cipher() {
    let vol = common::setup_volume();
    let mut stream = vol.create("integrity", encrypted(512, 2, CipherId::ChaCha20));
    stream.set_key(ContentKey::generate().unwrap()).unwrap();
    stream.write(b"data").unwrap();
    stream.close().unwrap();

    let urn = vol.stream_urn("integrity");
    assert!(!vol.resolver.get_bool(&urn, &lexicon::CHUNK_INTEGRITY).unwrap());

    vol.resolver
        .set(Graph::Persisted, &urn, &lexicon::CHUNK_INTEGRITY, true);
    let result = ImageStream::open(vol.resolver.clone(), vol.store.clone(), urn);
    assert!(matches!(result, Err(ImageError::Configuration(_))));
}

#[test]
fn test_iv_uniqueness_across_stream() {
    let vol = common::setup_volume();
    let msg = message();
    let mut stream = vol.create("ivs", encrypted(512, 8, CipherId::default()));
    stream.set_password("password", common::fast_kdf()).unwrap();
    for _ in 0..100 {
        stream.write(&msg).unwrap();
    }
    let bevies = stream.bevy_count();
    stream.close().unwrap();

    let mut seen = HashSet::new();
    let mut chunk = 0u64;
    for bevy in 0..bevies {
        for stored in vol.stored_chunks("ivs", bevy) {
            let revision = EncryptedStream::revision_of(chunk, &stored).unwrap();
            assert!(seen.insert(derive_iv(chunk, revision)), "iv reused at chunk {}", chunk);
            chunk += 1;
        }
    }
    assert_eq!(chunk, 27);
}

#[test]
fn test_rewrite_moves_to_fresh_iv() {
    let vol = common::setup_volume();
    let data = common::noise(2048, 26);
    let mut stream = vol.create("rewrite", encrypted(512, 4, CipherId::default()));
    stream.set_key(ContentKey::generate().unwrap()).unwrap();
    stream.write(&data).unwrap();
    let before = vol.stored_chunks("rewrite", 0);

    // same bytes written again over a flushed chunk
    stream.seek_write(SeekFrom::Start(0)).unwrap();
    stream.write(&data[..512]).unwrap();
    stream.flush().unwrap();
    let after = vol.stored_chunks("rewrite", 0);

    assert_ne!(before[0], after[0]);
    assert_eq!(EncryptedStream::revision_of(0, &after[0]).unwrap(), 1);
    assert_eq!(before[1..], after[1..]);

    stream.seek_read(SeekFrom::Start(0)).unwrap();
    assert_eq!(stream.read_all().unwrap(), data);
    stream.close().unwrap();
}

#[test]
fn test_overwrite_after_flush_encrypted() {
    let vol = common::setup_volume();
    let mut stream = vol.create("overwrite", encrypted(512, 2, CipherId::Aes256Gcm));
    stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(&[b'a'; 512]).unwrap();
    stream.write(&[b'b'; 512]).unwrap();
    stream.seek_write(SeekFrom::Start(0)).unwrap();
    stream.write(&[b'c'; 512]).unwrap();
    stream.close().unwrap();

    let mut stream = vol.open("overwrite");
    stream.unlock("password").unwrap();
    let mut expected = vec![b'c'; 512];
    expected.extend_from_slice(&[b'b'; 512]);
    assert_eq!(stream.read_all().unwrap(), expected);
}

#[test]
fn test_truncate_continues_stale_revisions() {
    let vol = common::setup_volume();
    let key = ContentKey::generate().unwrap();
    let data = common::noise(1024, 27);

    let mut stream = vol.create("stale", encrypted(256, 4, CipherId::default()));
    stream.set_key(key.clone()).unwrap();
    stream.write(&data).unwrap();
    stream.close().unwrap();

    // same key, same bytes, same positions: must not reuse the old IVs
    let mut stream = vol.create("stale", encrypted(256, 4, CipherId::default()));
    assert_eq!(stream.size(), 0);
    stream.set_key(key).unwrap();
    stream.write(&data[..512]).unwrap();
    stream.close().unwrap();

    let chunks = vol.stored_chunks("stale", 0);
    assert_eq!(chunks.len(), 2);
    for (slot, stored) in chunks.iter().enumerate() {
        assert_eq!(EncryptedStream::revision_of(slot as u64, stored).unwrap(), 1);
    }

    let mut stream = vol.open("stale");
    stream
        .set_key(ContentKey::from_slice(&[0u8; 32]).unwrap())
        .unwrap();
    assert!(stream.read(1).unwrap_err().is_authentication());
}

#[test]
fn test_repeated_truncates_never_reuse_ivs() {
    let vol = common::setup_volume();
    let key = ContentKey::generate().unwrap();
    let data = common::noise(1024, 28);
    let mut seen = HashSet::new();

    // 4 chunks, then 1, then 4 again: the dropped slots must not restart
    for len in [1024, 256, 1024] {
        let mut stream = vol.create("shrinking", encrypted(256, 4, CipherId::ChaCha20));
        stream.set_key(key.clone()).unwrap();
        stream.write(&data[..len]).unwrap();
        stream.close().unwrap();

        for (slot, stored) in vol.stored_chunks("shrinking", 0).iter().enumerate() {
            let chunk = slot as u64;
            let revision = EncryptedStream::revision_of(chunk, stored).unwrap();
            assert!(
                seen.insert((chunk, revision)),
                "chunk {} revision {} written twice",
                chunk,
                revision
            );
        }
    }
    assert_eq!(
        vol.resolver
            .get_u64(&vol.stream_urn("shrinking"), &lexicon::MAX_REVISION)
            .unwrap(),
        2
    );

    let mut stream = vol.open("shrinking");
    stream.set_key(key).unwrap();
    assert_eq!(stream.read_all().unwrap(), data);
}

#[test]
fn test_random_access_encrypted() {
    let vol = common::setup_volume();
    let data = common::mixed(7 * 1024 + 13, 29);
    let mut stream = vol.create("random", encrypted(512, 3, CipherId::Aes256Gcm));
    stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(&data).unwrap();
    stream.close().unwrap();

    let mut stream = vol.open("random");
    stream.unlock("password").unwrap();
    let size = data.len() as u64;
    for (offset, len) in [
        (0u64, 1usize),
        (511, 2),
        (1535, 2),
        (1536, 100),
        (1000, 3000),
        (3071, 1026),
        (size - 13, 500),
        (size - 1, 1),
        (size, 10),
        (4097, 0),
        (5, 7),
    ] {
        stream.seek_read(SeekFrom::Start(offset)).unwrap();
        let got = stream.read(len).unwrap();
        let end = (offset as usize + len).min(data.len());
        assert_eq!(got, &data[offset as usize..end], "offset {} len {}", offset, len);
        assert_eq!(stream.read_offset(), end as u64);
    }
}

#[test]
fn test_append_requires_unlock() {
    let vol = common::setup_volume();
    let mut stream = vol.create("append", encrypted(128, 2, CipherId::default()));
    stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(b"first half, ").unwrap();
    stream.close().unwrap();

    vol.resolver
        .set(Graph::Transient, &vol.volume, &lexicon::STREAM_WRITE_MODE, "append");
    let mut stream = vol.create("append", ImageConfig::default());
    assert!(stream.is_encrypted());
    assert!(matches!(stream.write(b"x"), Err(ImageError::Configuration(_))));
    stream.unlock("password").unwrap();
    stream.write(b"second half").unwrap();
    stream.close().unwrap();

    let mut stream = vol.open("append");
    stream.unlock("password").unwrap();
    assert_eq!(stream.read_all().unwrap(), b"first half, second half");
}

#[test]
fn test_key_bag_facts_persisted() {
    let vol = common::setup_volume();
    let mut stream = vol.create("facts", encrypted(512, 4, CipherId::Aes256Gcm));
    let bag = stream.set_password("password", common::fast_kdf()).unwrap();
    stream.write(b"x").unwrap();
    stream.close().unwrap();

    let urn = vol.stream_urn("facts");
    let r = &vol.resolver;
    assert_eq!(r.get_urn(&urn, &lexicon::TYPE).unwrap(), lexicon::ENCRYPTED_STREAM_TYPE);
    assert_eq!(r.get_string(&urn, &lexicon::ENCRYPTION_CIPHER).unwrap(), "aes-256-gcm");
    assert!(r.get_bool(&urn, &lexicon::CHUNK_INTEGRITY).unwrap());
    assert_eq!(r.get_urn(&urn, &lexicon::KEY_BAG).unwrap(), *bag.urn());

    assert_eq!(r.get_urn(bag.urn(), &lexicon::TYPE).unwrap(), lexicon::KEY_BAG_TYPE);
    assert_eq!(r.get_urn(bag.urn(), &lexicon::STORED).unwrap(), vol.volume);
    assert_eq!(r.get_u64(bag.urn(), &lexicon::ITERATIONS).unwrap(), 1);
    assert_eq!(r.get_bytes(bag.urn(), &lexicon::SALT).unwrap().len(), 16);

    let loaded = KeyBag::load_from_resolver(r, &vol.volume, bag.urn()).unwrap();
    assert!(matches!(loaded.unwrap_key("nope"), Err(KeyBagError::BadPassword)));
}

#[test]
fn test_default_kdf_costs() {
    let vol = common::setup_volume();
    let bag = KeyBag::create("password").unwrap();
    let key = bag.unwrap_key("password").unwrap();

    let mut stream = vol.create("default-kdf", encrypted(512, 4, CipherId::default()));
    stream.set_key_bag(&bag).unwrap();
    stream.set_key(key).unwrap();
    stream.write(&message()).unwrap();
    stream.close().unwrap();

    let mut stream = vol.open("default-kdf");
    stream.unlock("password").unwrap();
    assert_eq!(stream.read_all().unwrap(), message());
}

#[test]
fn test_plain_stream_has_no_key_operations() {
    let vol = common::setup_volume();
    let mut stream = vol.create("plain", common::config(512, 4));
    assert!(matches!(
        stream.set_key(ContentKey::generate().unwrap()),
        Err(ImageError::Configuration(_))
    ));
    assert!(matches!(stream.unlock("password"), Err(ImageError::Configuration(_))));
    stream.close().unwrap();
}
