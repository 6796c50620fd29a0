//! Low-level symmetric cryptographic operations.
//!
//! This module is one of exactly two places in the crate that import
//! primitive crates directly (the other is `asym`). All other modules perform
//! MAC, cipher and block operations exclusively through the types and
//! functions exposed here.
//!
//! Primitive choices:
//! - **Authenticated cipher**: AES-128/256-GCM via `ring`
//! - **Streaming MAC**: HMAC-SHA256/512 via `ring`, AES-CMAC via `cmac`
//! - **Block chaining**: AES-128/192/256-CBC via `cbc`
//! - **Nonce**: 96-bit (12 bytes), generated fresh per packet via `SystemRandom`

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use cmac::{Cmac, Mac};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{constant_time, hmac};

use crate::error::{Error, Result};

/// Size of an AES block in bytes. CBC inputs must be a multiple of this.
pub const AES_BLOCK_LEN: usize = 16;

/// Size of an AES-GCM nonce in bytes (96 bits).
pub const GCM_NONCE_LEN: usize = 12;

/// Size of an AES-GCM authentication tag in bytes.
pub const GCM_TAG_LEN: usize = 16;

/// Upper bound on a single data chunk or packet fed to a session.
pub const MAX_PACKET_LEN: usize = 4096;

/// Fill a buffer with cryptographically secure random bytes.
///
/// Uses `ring::rand::SystemRandom`. Nonces, challenges and generated key
/// values all come from here.
pub fn random_bytes(buf: &mut [u8]) -> Result<()> {
    let rng = SystemRandom::new();
    rng.fill(buf).map_err(|_| Error::Internal)
}

// ---------------------------------------------------------------------------
// AES-GCM packets
// ---------------------------------------------------------------------------

fn gcm_algorithm(key: &[u8]) -> Result<&'static aead::Algorithm> {
    match key.len() {
        16 => Ok(&AES_128_GCM),
        32 => Ok(&AES_256_GCM),
        _ => Err(Error::InvalidArgument),
    }
}

/// Encrypt and integrity-protect one packet with AES-GCM.
///
/// A fresh random nonce is generated per call and returned alongside the
/// ciphertext and tag. The three parts travel separately; nothing is
/// concatenated for the caller.
pub fn gcm_seal(
    key: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; GCM_NONCE_LEN], Vec<u8>, [u8; GCM_TAG_LEN])> {
    let unbound = UnboundKey::new(gcm_algorithm(key)?, key).map_err(|_| Error::InvalidArgument)?;
    let sealing = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; GCM_NONCE_LEN];
    random_bytes(&mut nonce_bytes)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    let tag = sealing
        .seal_in_place_separate_tag(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| Error::Internal)?;

    let mut tag_bytes = [0u8; GCM_TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok((nonce_bytes, in_out, tag_bytes))
}

/// Decrypt one packet with AES-GCM and verify its tag.
///
/// On tag failure no plaintext is produced.
pub fn gcm_open(
    key: &[u8],
    nonce: &[u8; GCM_NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; GCM_TAG_LEN],
) -> Result<Vec<u8>> {
    let unbound = UnboundKey::new(gcm_algorithm(key)?, key).map_err(|_| Error::InvalidArgument)?;
    let opening = LessSafeKey::new(unbound);

    let nonce = Nonce::assume_unique_for_key(*nonce);

    // ring expects ciphertext || tag contiguously.
    let mut in_out = Vec::with_capacity(ciphertext.len() + tag.len());
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext = opening
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| Error::Unauthorized)?;

    Ok(plaintext.to_vec())
}

// ---------------------------------------------------------------------------
// Streaming MAC
// ---------------------------------------------------------------------------

/// A running MAC computation. Chunks are fed incrementally; `finalize`
/// consumes the context and emits the tag.
pub enum MacContext {
    HmacSha256(hmac::Context),
    HmacSha512(hmac::Context),
    CmacAes128(Cmac<Aes128>),
    CmacAes192(Cmac<Aes192>),
    CmacAes256(Cmac<Aes256>),
}

impl MacContext {
    /// Start an HMAC-SHA256 computation. Any key length is accepted.
    pub fn hmac_sha256(key: &[u8]) -> Self {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        Self::HmacSha256(hmac::Context::with_key(&key))
    }

    /// Start an HMAC-SHA512 computation.
    pub fn hmac_sha512(key: &[u8]) -> Self {
        let key = hmac::Key::new(hmac::HMAC_SHA512, key);
        Self::HmacSha512(hmac::Context::with_key(&key))
    }

    /// Start an AES-CMAC computation. The key must be 16, 24 or 32 bytes.
    pub fn cmac_aes(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Ok(Self::CmacAes128(
                Cmac::new_from_slice(key).map_err(|_| Error::InvalidArgument)?,
            )),
            24 => Ok(Self::CmacAes192(
                Cmac::new_from_slice(key).map_err(|_| Error::InvalidArgument)?,
            )),
            32 => Ok(Self::CmacAes256(
                Cmac::new_from_slice(key).map_err(|_| Error::InvalidArgument)?,
            )),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Size of the tag `finalize` will emit.
    pub fn tag_len(&self) -> usize {
        match self {
            Self::HmacSha256(_) => 32,
            Self::HmacSha512(_) => 64,
            Self::CmacAes128(_) | Self::CmacAes192(_) | Self::CmacAes256(_) => AES_BLOCK_LEN,
        }
    }

    /// Feed one chunk into the running computation.
    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::HmacSha256(ctx) | Self::HmacSha512(ctx) => ctx.update(chunk),
            Self::CmacAes128(mac) => mac.update(chunk),
            Self::CmacAes192(mac) => mac.update(chunk),
            Self::CmacAes256(mac) => mac.update(chunk),
        }
    }

    /// Complete the computation and emit the tag.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::HmacSha256(ctx) | Self::HmacSha512(ctx) => ctx.sign().as_ref().to_vec(),
            Self::CmacAes128(mac) => mac.finalize().into_bytes().to_vec(),
            Self::CmacAes192(mac) => mac.finalize().into_bytes().to_vec(),
            Self::CmacAes256(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// AES-CBC chaining
// ---------------------------------------------------------------------------

/// A running CBC encryption stream. Chaining state carries across calls, so
/// repeated `process` calls act as one logical message.
pub enum CbcEncrypt {
    Aes128(cbc::Encryptor<Aes128>),
    Aes192(cbc::Encryptor<Aes192>),
    Aes256(cbc::Encryptor<Aes256>),
}

/// A running CBC decryption stream.
pub enum CbcDecrypt {
    Aes128(cbc::Decryptor<Aes128>),
    Aes192(cbc::Decryptor<Aes192>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl CbcEncrypt {
    /// Install a key and IV. The key must be 16, 24 or 32 bytes; the IV must
    /// be exactly one block.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        if iv.len() != AES_BLOCK_LEN {
            return Err(Error::InvalidArgument);
        }
        match key.len() {
            16 => Ok(Self::Aes128(
                cbc::Encryptor::new_from_slices(key, iv).map_err(|_| Error::InvalidArgument)?,
            )),
            24 => Ok(Self::Aes192(
                cbc::Encryptor::new_from_slices(key, iv).map_err(|_| Error::InvalidArgument)?,
            )),
            32 => Ok(Self::Aes256(
                cbc::Encryptor::new_from_slices(key, iv).map_err(|_| Error::InvalidArgument)?,
            )),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Encrypt `data` in place. The length must already be validated as a
    /// multiple of the block size.
    pub fn process(&mut self, data: &mut [u8]) {
        debug_assert!(data.len() % AES_BLOCK_LEN == 0);
        for block in data.chunks_exact_mut(AES_BLOCK_LEN) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(enc) => enc.encrypt_block_mut(block),
                Self::Aes192(enc) => enc.encrypt_block_mut(block),
                Self::Aes256(enc) => enc.encrypt_block_mut(block),
            }
        }
    }
}

impl CbcDecrypt {
    /// Install a key and IV for decryption.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        if iv.len() != AES_BLOCK_LEN {
            return Err(Error::InvalidArgument);
        }
        match key.len() {
            16 => Ok(Self::Aes128(
                cbc::Decryptor::new_from_slices(key, iv).map_err(|_| Error::InvalidArgument)?,
            )),
            24 => Ok(Self::Aes192(
                cbc::Decryptor::new_from_slices(key, iv).map_err(|_| Error::InvalidArgument)?,
            )),
            32 => Ok(Self::Aes256(
                cbc::Decryptor::new_from_slices(key, iv).map_err(|_| Error::InvalidArgument)?,
            )),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Decrypt `data` in place. The length must already be validated as a
    /// multiple of the block size.
    pub fn process(&mut self, data: &mut [u8]) {
        debug_assert!(data.len() % AES_BLOCK_LEN == 0);
        for block in data.chunks_exact_mut(AES_BLOCK_LEN) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(dec) => dec.decrypt_block_mut(block),
                Self::Aes192(dec) => dec.decrypt_block_mut(block),
                Self::Aes256(dec) => dec.decrypt_block_mut(block),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Raw AES block
// ---------------------------------------------------------------------------

/// Encrypt a single block with AES-128. Used by the Milenage function set,
/// which builds its derivations from the bare block cipher.
pub fn aes128_encrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    use aes::cipher::{BlockEncrypt, KeyInit};

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// Constant-time equality of two byte slices of equal length.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && constant_time::verify_slices_are_equal(a, b).is_ok()
}
