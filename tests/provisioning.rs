use keyhold::provision::wrap_value;
use keyhold::storage::FileStorage;
use keyhold::{ClientId, Error, KeyType, Keystore, SPKI_LEN};

fn client() -> ClientId {
    ClientId::new("app").unwrap()
}

fn provisioning_key(store: &Keystore) -> Vec<u8> {
    let mut buf = [0u8; SPKI_LEN];
    let len = store.provisioning_key(&mut buf).unwrap();
    buf[..len].to_vec()
}

#[test]
fn test_provisioning_key_export() {
    let store = Keystore::in_memory();

    let first = provisioning_key(&store);
    assert_eq!(first.len(), SPKI_LEN);

    // The pair is created once and never replaced.
    assert_eq!(provisioning_key(&store), first);

    let mut short = [0u8; 16];
    assert_eq!(store.provisioning_key(&mut short).err(), Some(Error::Overflow));
}

#[test]
fn test_provisioning_key_survives_reload() {
    let dir = tempfile::tempdir().unwrap();

    let first = {
        let store = Keystore::open(Box::new(FileStorage::new(dir.path()).unwrap())).unwrap();
        provisioning_key(&store)
    };

    let store = Keystore::open(Box::new(FileStorage::new(dir.path()).unwrap())).unwrap();
    assert_eq!(provisioning_key(&store), first);

    // A value wrapped before the restart still provisions after it.
    let package = wrap_value(&first, &[0x11; 16]).unwrap();
    let key = store
        .create_key_with_type(&client(), "carried", KeyType::AesCmac, 16)
        .unwrap();
    store.provision_key_value(key, &package).unwrap();
    assert!(store.has_key_value(key).unwrap());
}

#[test]
fn test_wrapped_symmetric_provisioning() {
    let store = Keystore::in_memory();
    let spki = provisioning_key(&store);

    let key = store
        .create_key_with_type(&client(), "cmac", KeyType::AesCmac, 16)
        .unwrap();

    let package = wrap_value(&spki, &[0xa5; 16]).unwrap();
    store.provision_key_value(key, &package).unwrap();
    assert!(store.has_key_value(key).unwrap());

    // The provisioned key is immediately usable.
    let session = store.create_session(key).unwrap();
    store.mac_process(session, b"check").unwrap();
    let mut tag = [0u8; 16];
    store.mac_done(session, &mut tag).unwrap();
}

#[test]
fn test_provisioning_rejects_bad_packages() {
    let store = Keystore::in_memory();
    let spki = provisioning_key(&store);

    let key = store
        .create_key_with_type(&client(), "cmac", KeyType::AesCmac, 16)
        .unwrap();

    // Symmetric values never arrive in plaintext.
    assert_eq!(
        store.provision_key_value(key, &[0xa5; 16]).err(),
        Some(Error::InvalidArgument)
    );

    // A value wrapped for a different store fails authentication.
    let stranger = Keystore::in_memory();
    let foreign = wrap_value(&provisioning_key(&stranger), &[0xa5; 16]).unwrap();
    assert_eq!(
        store.provision_key_value(key, &foreign).err(),
        Some(Error::Unauthorized)
    );

    // A wrapped value of the wrong length does not match the declared size.
    let wrong_size = wrap_value(&spki, &[0xa5; 24]).unwrap();
    assert_eq!(
        store.provision_key_value(key, &wrong_size).err(),
        Some(Error::InvalidArgument)
    );

    assert!(!store.has_key_value(key).unwrap());
}

#[test]
fn test_update_key_provisioned_in_plaintext() {
    let store = Keystore::in_memory();
    let authority = keyhold::UpdateAuthority::generate();

    let update = store
        .create_key_with_type(&client(), "upd", KeyType::KeyUpdate, 32)
        .unwrap();
    store
        .provision_key_value(update, &authority.public_key_bytes())
        .unwrap();
    assert!(store.has_key_value(update).unwrap());

    // Wrong length for a verification key.
    let other = store
        .create_key_with_type(&client(), "upd2", KeyType::KeyUpdate, 32)
        .unwrap();
    assert_eq!(
        store.provision_key_value(other, &[0u8; 16]).err(),
        Some(Error::InvalidArgument)
    );
}

#[test]
fn test_digest_provisioning_bounds() {
    let store = Keystore::in_memory();
    let digest = store.create_digest(&client(), "d", 8).unwrap();

    assert_eq!(store.provision_digest(digest, &[]).err(), Some(Error::InvalidArgument));
    assert_eq!(
        store.provision_digest(digest, &[0u8; 9]).err(),
        Some(Error::InvalidArgument)
    );

    store.provision_digest(digest, &[1, 2, 3]).unwrap();
    assert!(store.has_digest_value(digest).unwrap());

    let mut buf = [0u8; 8];
    assert_eq!(store.digest_value(digest, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], &[1, 2, 3]);

    // Reads reject short buffers rather than truncating.
    let mut short = [0u8; 2];
    assert_eq!(store.digest_value(digest, &mut short).err(), Some(Error::Overflow));

    // Declared maximum is a hard cap on digest creation too.
    assert!(store
        .create_digest(&client(), "too-big", keyhold::MAX_DIGEST_LEN as u32 + 1)
        .is_err());
    assert!(store.create_digest(&client(), "zero", 0).is_err());
}

#[test]
fn test_challenge_requires_valued_update_key() {
    let store = Keystore::in_memory();
    let mut buf = [0u8; keyhold::CHALLENGE_LEN];

    let update = store
        .create_key_with_type(&client(), "upd", KeyType::KeyUpdate, 32)
        .unwrap();
    assert_eq!(
        store.update_auth_challenge(update, &mut buf).err(),
        Some(Error::NotFound)
    );

    let gcm = store
        .create_key_with_type(&client(), "gcm", KeyType::AesGcm, 16)
        .unwrap();
    store.gen_key_value(gcm, None).unwrap();
    assert_eq!(
        store.update_auth_challenge(gcm, &mut buf).err(),
        Some(Error::InvalidArgument)
    );

    let mut short = [0u8; 8];
    let authority = keyhold::UpdateAuthority::generate();
    store
        .provision_key_value(update, &authority.public_key_bytes())
        .unwrap();
    assert_eq!(
        store.update_auth_challenge(update, &mut short).err(),
        Some(Error::Overflow)
    );
    assert_eq!(
        store.update_auth_challenge(update, &mut buf).unwrap(),
        keyhold::CHALLENGE_LEN
    );
}
