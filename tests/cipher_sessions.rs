use keyhold::{ClientId, Error, KeyRef, KeyType, Keystore, SessionRef};

fn cipher_session(store: &Keystore, id: &str, key_type: KeyType, size: u32) -> (KeyRef, SessionRef) {
    let client = ClientId::new("app").unwrap();
    let key = store.create_key_with_type(&client, id, key_type, size).unwrap();
    store.gen_key_value(key, None).unwrap();
    let session = store.create_session(key).unwrap();
    (key, session)
}

const TWO_BLOCKS: &[u8] = b"0123456789abcdef0123456789abcdef";

#[test]
fn test_cbc_roundtrip_with_chaining() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "cbc", KeyType::AesCbc, 24);

    let iv = [0u8; 16];
    store.cbc_start_encrypt(session, &iv).unwrap();
    let ct1 = store.cbc_encrypt(session, TWO_BLOCKS).unwrap();
    let ct2 = store.cbc_encrypt(session, TWO_BLOCKS).unwrap();

    assert_ne!(&ct1[..], TWO_BLOCKS);
    // Chaining: the same plaintext later in the stream encrypts differently.
    assert_ne!(ct1, ct2);

    // Decrypt the whole stream back under the same IV, chunked the same way.
    store.cbc_start_decrypt(session, &iv).unwrap();
    assert_eq!(store.cbc_decrypt(session, &ct1).unwrap(), TWO_BLOCKS);
    assert_eq!(store.cbc_decrypt(session, &ct2).unwrap(), TWO_BLOCKS);
}

#[test]
fn test_cbc_iv_separates_ciphertexts() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "cbc", KeyType::AesCbc, 16);

    store.cbc_start_encrypt(session, &[0u8; 16]).unwrap();
    let ct1 = store.cbc_encrypt(session, TWO_BLOCKS).unwrap();

    // Restarting installs a fresh IV and discards the chain.
    let mut iv2 = [0u8; 16];
    iv2[2] = 8;
    store.cbc_start_encrypt(session, &iv2).unwrap();
    let ct2 = store.cbc_encrypt(session, TWO_BLOCKS).unwrap();

    assert_ne!(ct1, ct2);
}

#[test]
fn test_cbc_direction_and_start_enforced() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "cbc", KeyType::AesCbc, 32);

    // No direction installed yet.
    assert_eq!(
        store.cbc_encrypt(session, TWO_BLOCKS).err(),
        Some(Error::SequenceViolation)
    );
    assert_eq!(
        store.cbc_decrypt(session, TWO_BLOCKS).err(),
        Some(Error::SequenceViolation)
    );

    store.cbc_start_encrypt(session, &[0u8; 16]).unwrap();
    let ct = store.cbc_encrypt(session, TWO_BLOCKS).unwrap();

    // Wrong direction for the current state.
    assert_eq!(
        store.cbc_decrypt(session, &ct).err(),
        Some(Error::SequenceViolation)
    );

    store.cbc_start_decrypt(session, &[0u8; 16]).unwrap();
    assert_eq!(store.cbc_decrypt(session, &ct).unwrap(), TWO_BLOCKS);
    assert_eq!(
        store.cbc_encrypt(session, TWO_BLOCKS).err(),
        Some(Error::SequenceViolation)
    );
}

#[test]
fn test_cbc_rejects_partial_blocks_without_damage() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "cbc", KeyType::AesCbc, 16);

    let iv = [7u8; 16];
    store.cbc_start_encrypt(session, &iv).unwrap();

    // 33 bytes: one byte over two blocks.
    let ragged = &b"0123456789abcdef0123456789abcdef!"[..];
    assert_eq!(
        store.cbc_encrypt(session, ragged).err(),
        Some(Error::RangeViolation)
    );
    let oversized = vec![0u8; keyhold::MAX_PACKET_LEN + 16];
    assert_eq!(
        store.cbc_encrypt(session, &oversized).err(),
        Some(Error::RangeViolation)
    );

    // The failed calls must not have advanced the chain: the ciphertext
    // matches a restarted stream over the same IV.
    let ct = store.cbc_encrypt(session, TWO_BLOCKS).unwrap();
    store.cbc_start_encrypt(session, &iv).unwrap();
    let clean = store.cbc_encrypt(session, TWO_BLOCKS).unwrap();
    assert_eq!(ct, clean);

    // An empty chunk is a zero-length multiple of the block size.
    assert!(store.cbc_encrypt(session, &[]).unwrap().is_empty());
}

#[test]
fn test_cbc_iv_must_be_one_block() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "cbc", KeyType::AesCbc, 16);
    assert_eq!(
        store.cbc_start_encrypt(session, &[0u8; 12]).err(),
        Some(Error::InvalidArgument)
    );
}

#[test]
fn test_gcm_packet_roundtrip() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "gcm", KeyType::AesGcm, 16);

    let aad = b"I thank whatever gods may be";
    let msg = b"Black as the Pit from pole to pole";

    let packet = store.gcm_encrypt_packet(session, aad, msg).unwrap();
    assert_eq!(packet.ciphertext.len(), msg.len());
    assert_ne!(&packet.ciphertext[..], &msg[..]);

    let plaintext = store
        .gcm_decrypt_packet(session, &packet.nonce, aad, &packet.ciphertext, &packet.tag)
        .unwrap();
    assert_eq!(plaintext, msg);
}

#[test]
fn test_gcm_fresh_nonce_per_packet() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "gcm", KeyType::AesGcm, 32);

    let a = store.gcm_encrypt_packet(session, b"", b"same message").unwrap();
    let b = store.gcm_encrypt_packet(session, b"", b"same message").unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn test_gcm_tamper_detection() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "gcm", KeyType::AesGcm, 16);

    let aad = b"header";
    let packet = store.gcm_encrypt_packet(session, aad, b"payload").unwrap();

    // Flipped tag byte.
    let mut bad_tag = packet.tag;
    bad_tag[0] ^= 1;
    assert_eq!(
        store
            .gcm_decrypt_packet(session, &packet.nonce, aad, &packet.ciphertext, &bad_tag)
            .err(),
        Some(Error::Unauthorized)
    );

    // Flipped ciphertext byte.
    let mut bad_ct = packet.ciphertext.clone();
    bad_ct[0] ^= 1;
    assert_eq!(
        store
            .gcm_decrypt_packet(session, &packet.nonce, aad, &bad_ct, &packet.tag)
            .err(),
        Some(Error::Unauthorized)
    );

    // Different associated data.
    assert_eq!(
        store
            .gcm_decrypt_packet(session, &packet.nonce, b"other", &packet.ciphertext, &packet.tag)
            .err(),
        Some(Error::Unauthorized)
    );

    // The original packet still opens.
    store
        .gcm_decrypt_packet(session, &packet.nonce, aad, &packet.ciphertext, &packet.tag)
        .unwrap();
}

#[test]
fn test_gcm_parameter_checks() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "gcm", KeyType::AesGcm, 16);

    let packet = store.gcm_encrypt_packet(session, b"", b"data").unwrap();
    assert_eq!(
        store
            .gcm_decrypt_packet(session, &packet.nonce[..8], b"", &packet.ciphertext, &packet.tag)
            .err(),
        Some(Error::InvalidArgument)
    );
    assert_eq!(
        store
            .gcm_decrypt_packet(session, &packet.nonce, b"", &packet.ciphertext, &packet.tag[..8])
            .err(),
        Some(Error::InvalidArgument)
    );

    let oversized = vec![0u8; keyhold::MAX_PACKET_LEN + 1];
    assert_eq!(
        store.gcm_encrypt_packet(session, b"", &oversized).err(),
        Some(Error::RangeViolation)
    );

    // GCM keys do not drive the CBC machine.
    assert_eq!(
        store.cbc_start_encrypt(session, &[0u8; 16]).err(),
        Some(Error::InvalidArgument)
    );
}

#[test]
fn test_gcm_empty_plaintext_authenticates_aad() {
    let store = Keystore::in_memory();
    let (_, session) = cipher_session(&store, "gcm", KeyType::AesGcm, 16);

    let packet = store.gcm_encrypt_packet(session, b"aad only", b"").unwrap();
    assert!(packet.ciphertext.is_empty());
    let plaintext = store
        .gcm_decrypt_packet(session, &packet.nonce, b"aad only", &[], &packet.tag)
        .unwrap();
    assert!(plaintext.is_empty());
}
