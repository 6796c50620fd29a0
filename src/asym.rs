//! Asymmetric operations: update-command signatures and the provisioning
//! key agreement.
//!
//! This is the second of exactly two modules permitted to import primitive
//! crates directly (the other is `crypto`). Update commands are signed with
//! Ed25519; wrapped values are received over X25519 + HKDF-SHA256, with the
//! symmetric opening done by `crypto`.
//!
//! ## Wrap key derivation
//!
//! ```text
//! HKDF-SHA256(
//!     ikm  = X25519(ephemeral, store_static),
//!     salt = None,
//!     info = "keyhold.provision.v1"
//! )
//! ```
//!
//! The sender performs the same derivation with its ephemeral secret and the
//! store's exported public key, so both sides arrive at one single-use
//! AES-256-GCM wrapping key per package.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ring::hkdf;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Length of an Ed25519 or X25519 raw public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of an RFC 8410 SubjectPublicKeyInfo for either curve.
pub const SPKI_LEN: usize = 44;

/// HKDF info string binding derived wrap keys to this protocol.
const WRAP_INFO: &[u8] = b"keyhold.provision.v1";

// DER prefixes for the two RFC 8410 algorithm identifiers. The encoding is a
// fixed 12-byte header followed by the raw 32-byte key.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];
const X25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

fn spki_encode(prefix: &[u8; 12], key: &[u8; PUBLIC_KEY_LEN]) -> [u8; SPKI_LEN] {
    let mut out = [0u8; SPKI_LEN];
    out[..12].copy_from_slice(prefix);
    out[12..].copy_from_slice(key);
    out
}

fn spki_decode(prefix: &[u8; 12], der: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN]> {
    if der.len() != SPKI_LEN || &der[..12] != prefix {
        return Err(Error::InvalidArgument);
    }
    let mut key = [0u8; PUBLIC_KEY_LEN];
    key.copy_from_slice(&der[12..]);
    Ok(key)
}

// ---------------------------------------------------------------------------
// Ed25519 — update-command signatures
// ---------------------------------------------------------------------------

/// Verify an Ed25519 signature over `message` with a raw 32-byte public key.
pub fn ed25519_verify(public: &[u8; PUBLIC_KEY_LEN], message: &[u8], signature: &[u8]) -> Result<()> {
    let key = VerifyingKey::from_bytes(public).map_err(|_| Error::Unauthorized)?;
    let signature: [u8; SIGNATURE_LEN] = signature.try_into().map_err(|_| Error::Unauthorized)?;
    key.verify_strict(message, &Signature::from_bytes(&signature))
        .map_err(|_| Error::Unauthorized)
}

/// Encode a raw Ed25519 public key as a DER SubjectPublicKeyInfo.
pub fn ed25519_spki(public: &[u8; PUBLIC_KEY_LEN]) -> [u8; SPKI_LEN] {
    spki_encode(&ED25519_SPKI_PREFIX, public)
}

/// An Ed25519 signing half. Held by the remote update authority, never by the
/// store itself; exposed so callers and tests can play the authority side.
pub struct CommandKey {
    key: SigningKey,
}

impl CommandKey {
    /// Generate a fresh signing pair.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// The raw verification half, suitable for provisioning into an
    /// update key.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign a message, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(message).to_bytes()
    }
}

// ---------------------------------------------------------------------------
// X25519 — provisioning key agreement
// ---------------------------------------------------------------------------

/// The store's provisioning pair. The secret half never leaves the crate;
/// only the DER-encoded public half is exported.
pub struct ProvisionPair {
    secret: StaticSecret,
}

impl ProvisionPair {
    /// Generate a fresh provisioning pair.
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Rebuild a pair from a persisted secret.
    pub(crate) fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// The secret half, for the persistence layer only.
    pub(crate) fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// The public half as a DER SubjectPublicKeyInfo.
    pub fn public_spki(&self) -> [u8; SPKI_LEN] {
        spki_encode(&X25519_SPKI_PREFIX, PublicKey::from(&self.secret).as_bytes())
    }

    /// Derive the wrap key for a package sent under `ephemeral_public`.
    pub(crate) fn wrap_key(&self, ephemeral_public: &[u8; PUBLIC_KEY_LEN]) -> Result<Zeroizing<[u8; 32]>> {
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(*ephemeral_public));
        derive_wrap_key(shared.as_bytes())
    }
}

/// Sender side of the agreement: generate an ephemeral pair against the
/// store's exported DER public key and derive the same wrap key the store
/// will derive on receipt.
pub(crate) fn sender_wrap_key(
    store_spki: &[u8],
) -> Result<([u8; PUBLIC_KEY_LEN], Zeroizing<[u8; 32]>)> {
    let store_public = spki_decode(&X25519_SPKI_PREFIX, store_spki)?;
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&PublicKey::from(store_public));
    Ok((ephemeral_public, derive_wrap_key(shared.as_bytes())?))
}

/// HKDF-SHA256 extract-and-expand from the raw shared secret.
fn derive_wrap_key(shared: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
    // Extract phase: empty salt, which HKDF treats as a zero-filled salt of
    // the hash output length.
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(shared);

    let info_slices = [WRAP_INFO];
    let okm = prk
        .expand(&info_slices, hkdf::HKDF_SHA256)
        .map_err(|_| Error::Internal)?;

    let mut key = Zeroizing::new([0u8; 32]);
    okm.fill(key.as_mut()).map_err(|_| Error::Internal)?;
    Ok(key)
}
