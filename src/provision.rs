//! Provisioning packages.
//!
//! Secret values enter the store wrapped: the sender derives a single-use
//! AES-256-GCM key from an ephemeral X25519 exchange against the store's
//! exported provisioning key, and ships the ephemeral public half alongside
//! the sealed value. Public values (update-key verification halves, digest
//! values) travel in plaintext; the authenticated envelope, when the target
//! is bound to an update key, wraps around either form.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::asym::{self, ProvisionPair, PUBLIC_KEY_LEN};
use crate::crypto::{self, GCM_NONCE_LEN, GCM_TAG_LEN};
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize)]
struct WrappedValue {
    /// Sender's ephemeral X25519 public key.
    epk: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

/// Wrap a secret value for provisioning into the store that exported
/// `store_spki`.
///
/// This is the sender side; it uses only the store's public half. External
/// parties without this crate can interoperate by performing the same
/// X25519 + HKDF-SHA256 + AES-256-GCM construction.
pub fn wrap_value(store_spki: &[u8], value: &[u8]) -> Result<Vec<u8>> {
    let (epk, wrap_key) = asym::sender_wrap_key(store_spki)?;
    let (nonce, ciphertext, tag) = crypto::gcm_seal(wrap_key.as_ref(), &[], value)?;

    serde_json::to_vec(&WrappedValue {
        epk: epk.to_vec(),
        nonce: nonce.to_vec(),
        ciphertext,
        tag: tag.to_vec(),
    })
    .map_err(|_| Error::Internal)
}

/// Unwrap a provisioning package with the store's private half.
///
/// Malformed structure is `InvalidArgument`; a failed open (wrong store,
/// tampered package) is `Unauthorized`. No plaintext escapes on failure.
pub(crate) fn unwrap_value(pair: &ProvisionPair, package: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let wrapped: WrappedValue =
        serde_json::from_slice(package).map_err(|_| Error::InvalidArgument)?;

    let epk: [u8; PUBLIC_KEY_LEN] = wrapped
        .epk
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidArgument)?;
    let nonce: [u8; GCM_NONCE_LEN] = wrapped
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidArgument)?;
    let tag: [u8; GCM_TAG_LEN] = wrapped
        .tag
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidArgument)?;

    let wrap_key = pair.wrap_key(&epk)?;
    let plaintext = crypto::gcm_open(wrap_key.as_ref(), &nonce, &[], &wrapped.ciphertext, &tag)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let pair = ProvisionPair::generate();
        let package = wrap_value(&pair.public_spki(), b"sixteen byte key").unwrap();
        let value = unwrap_value(&pair, &package).unwrap();
        assert_eq!(value.as_slice(), b"sixteen byte key");
    }

    #[test]
    fn test_unwrap_rejects_wrong_store() {
        let pair = ProvisionPair::generate();
        let other = ProvisionPair::generate();
        let package = wrap_value(&pair.public_spki(), b"sixteen byte key").unwrap();
        assert_eq!(
            unwrap_value(&other, &package).err(),
            Some(Error::Unauthorized)
        );
    }

    #[test]
    fn test_unwrap_rejects_malformed_package() {
        let pair = ProvisionPair::generate();
        assert_eq!(
            unwrap_value(&pair, b"{\"epk\":[1,2,3]}").err(),
            Some(Error::InvalidArgument)
        );
        assert_eq!(
            unwrap_value(&pair, b"plain bytes, no structure").err(),
            Some(Error::InvalidArgument)
        );
    }
}
