use keyhold::{ClientId, Error, KeyRef, KeyType, Keystore};

fn mac_key(store: &Keystore, id: &str, key_type: KeyType, size: u32) -> KeyRef {
    let client = ClientId::new("app").unwrap();
    let key = store.create_key_with_type(&client, id, key_type, size).unwrap();
    store.gen_key_value(key, None).unwrap();
    key
}

#[test]
fn test_done_requires_a_processed_chunk() {
    let store = Keystore::in_memory();
    for (id, key_type, size) in [
        ("h", KeyType::HmacSha256, 32),
        ("c", KeyType::AesCmac, 16),
    ] {
        let key = mac_key(&store, id, key_type, size);
        let session = store.create_session(key).unwrap();

        let mut tag = [0u8; 64];
        assert_eq!(
            store.mac_done(session, &mut tag).err(),
            Some(Error::SequenceViolation)
        );
        assert_eq!(
            store.mac_verify(session, &[0u8; 16]).err(),
            Some(Error::SequenceViolation)
        );
    }
}

#[test]
fn test_session_is_single_use() {
    let store = Keystore::in_memory();
    let key = mac_key(&store, "h", KeyType::HmacSha256, 17);
    let session = store.create_session(key).unwrap();

    store.mac_process(session, b"part one ").unwrap();
    let mut tag = [0u8; 32];
    store.mac_done(session, &mut tag).unwrap();

    // Finalized means finished: no more chunks, no second tag.
    assert_eq!(
        store.mac_process(session, b"more").err(),
        Some(Error::SequenceViolation)
    );
    assert_eq!(
        store.mac_done(session, &mut tag).err(),
        Some(Error::SequenceViolation)
    );
    assert_eq!(
        store.mac_verify(session, &tag).err(),
        Some(Error::SequenceViolation)
    );

    // A fresh session over the same key starts clean.
    store.delete_session(session).unwrap();
    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"part one ").unwrap();
    store.mac_verify(session, &tag).unwrap();
}

#[test]
fn test_chunking_is_transparent() {
    let store = Keystore::in_memory();
    for (id, key_type, size, tag_len) in [
        ("h256", KeyType::HmacSha256, 32, 32usize),
        ("h512", KeyType::HmacSha512, 64, 64),
        ("cmac", KeyType::AesCmac, 32, 16),
    ] {
        let key = mac_key(&store, id, key_type, size);

        let split = store.create_session(key).unwrap();
        store.mac_process(split, b"Do not go gentle ").unwrap();
        store.mac_process(split, b"into that good night.").unwrap();
        let mut split_tag = [0u8; 64];
        let split_len = store.mac_done(split, &mut split_tag).unwrap();

        let whole = store.create_session(key).unwrap();
        store
            .mac_process(whole, b"Do not go gentle into that good night.")
            .unwrap();
        let mut whole_tag = [0u8; 64];
        let whole_len = store.mac_done(whole, &mut whole_tag).unwrap();

        assert_eq!(split_len, tag_len);
        assert_eq!(whole_len, tag_len);
        assert_eq!(&split_tag[..split_len], &whole_tag[..whole_len]);
    }
}

#[test]
fn test_verify_matches_and_finalizes() {
    let store = Keystore::in_memory();
    let key = mac_key(&store, "c", KeyType::AesCmac, 16);

    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"message").unwrap();
    let mut tag = [0u8; 16];
    store.mac_done(session, &mut tag).unwrap();

    // Recompute and verify, full tag and a truncated prefix.
    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"message").unwrap();
    store.mac_verify(session, &tag).unwrap();

    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"message").unwrap();
    store.mac_verify(session, &tag[..10]).unwrap();

    // A mismatch is reported and still finalizes the session.
    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"message").unwrap();
    let mut wrong = tag;
    wrong[0] ^= 1;
    assert_eq!(
        store.mac_verify(session, &wrong).err(),
        Some(Error::Unauthorized)
    );
    assert_eq!(
        store.mac_process(session, b"late").err(),
        Some(Error::SequenceViolation)
    );

    // An empty or oversized expected tag is a caller error.
    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"message").unwrap();
    assert_eq!(store.mac_verify(session, &[]).err(), Some(Error::InvalidArgument));
    assert_eq!(
        store.mac_verify(session, &[0u8; 17]).err(),
        Some(Error::InvalidArgument)
    );
}

#[test]
fn test_short_buffer_leaves_session_usable() {
    let store = Keystore::in_memory();
    let key = mac_key(&store, "h", KeyType::HmacSha256, 32);

    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"data").unwrap();

    // Results are rejected, never truncated; the accumulation survives.
    let mut short = [0u8; 10];
    assert_eq!(
        store.mac_done(session, &mut short).err(),
        Some(Error::Overflow)
    );
    assert_eq!(short, [0u8; 10]);

    let mut tag = [0u8; 32];
    let len = store.mac_done(session, &mut tag).unwrap();
    assert_eq!(len, 32);
}

#[test]
fn test_type_dispatch_is_enforced() {
    let store = Keystore::in_memory();
    let client = ClientId::new("app").unwrap();

    let gcm = store
        .create_key_with_type(&client, "gcm", KeyType::AesGcm, 16)
        .unwrap();
    store.gen_key_value(gcm, None).unwrap();
    let session = store.create_session(gcm).unwrap();
    assert_eq!(
        store.mac_process(session, b"data").err(),
        Some(Error::InvalidArgument)
    );

    // Sessions require a value, and never exist for non-session types.
    let empty = store
        .create_key_with_type(&client, "empty", KeyType::HmacSha256, 32)
        .unwrap();
    assert_eq!(store.create_session(empty).err(), Some(Error::NotFound));

    let update = store
        .create_key_with_type(&client, "upd", KeyType::KeyUpdate, 32)
        .unwrap();
    assert_eq!(
        store.create_session(update).err(),
        Some(Error::InvalidArgument)
    );
}

#[test]
fn test_oversized_chunk_rejected() {
    let store = Keystore::in_memory();
    let key = mac_key(&store, "h", KeyType::HmacSha256, 32);
    let session = store.create_session(key).unwrap();

    let oversized = vec![0u8; keyhold::MAX_PACKET_LEN + 1];
    assert_eq!(
        store.mac_process(session, &oversized).err(),
        Some(Error::RangeViolation)
    );

    // The failed chunk contributed nothing.
    store.mac_process(session, b"only this").unwrap();
    let mut tag = [0u8; 32];
    store.mac_done(session, &mut tag).unwrap();

    let reference = store.create_session(key).unwrap();
    store.mac_process(reference, b"only this").unwrap();
    store.mac_verify(reference, &tag).unwrap();
}
