//! Cryptographic sessions.
//!
//! A session binds one symmetric key to a set of per-algorithm state
//! machines. The key material is snapshotted at creation, so a running
//! session never re-enters the registry.
//!
//! Dispatch is by the key's type tag: MAC keys drive the streaming
//! Empty → Accumulating → Finalized machine, CBC keys the direction +
//! chaining machine, and GCM keys the per-packet operations, which carry no
//! state between calls.

use std::collections::HashMap;
use std::num::NonZeroU64;

use zeroize::Zeroizing;

use crate::crypto::{
    self, CbcDecrypt, CbcEncrypt, MacContext, AES_BLOCK_LEN, GCM_NONCE_LEN, GCM_TAG_LEN,
    MAX_PACKET_LEN,
};
use crate::error::{Error, Result};
use crate::object::{KeyRef, KeyType};
use crate::registry::Keystore;

/// Opaque handle to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionRef(pub(crate) NonZeroU64);

/// One encrypted packet: nonce, ciphertext and tag travel separately.
pub struct GcmPacket {
    pub nonce: [u8; GCM_NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; GCM_TAG_LEN],
}

struct MacState {
    /// `None` once finalized; the context is consumed by the finalizer.
    ctx: Option<MacContext>,
    finalized: bool,
}

enum SessionState {
    /// Nothing processed yet.
    Idle,
    Mac(MacState),
    CbcEncrypt(CbcEncrypt),
    CbcDecrypt(CbcDecrypt),
}

struct Session {
    key_ref: KeyRef,
    key_type: KeyType,
    key: Zeroizing<Vec<u8>>,
    state: SessionState,
}

pub(crate) struct SessionTable {
    next_ref: u64,
    sessions: HashMap<u64, Session>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self {
            next_ref: 1,
            sessions: HashMap::new(),
        }
    }

    /// True if any open session is bound to `key`. Deletion of a key is
    /// refused while this holds.
    pub(crate) fn is_key_busy(&self, key: KeyRef) -> bool {
        self.sessions.values().any(|s| s.key_ref == key)
    }

    fn get_mut(&mut self, session: SessionRef) -> Result<&mut Session> {
        self.sessions
            .get_mut(&session.0.get())
            .ok_or(Error::InvalidReference)
    }
}

fn new_mac_context(key_type: KeyType, key: &[u8]) -> Result<MacContext> {
    match key_type {
        KeyType::HmacSha256 => Ok(MacContext::hmac_sha256(key)),
        KeyType::HmacSha512 => Ok(MacContext::hmac_sha512(key)),
        KeyType::AesCmac => MacContext::cmac_aes(key),
        _ => Err(Error::InvalidArgument),
    }
}

fn is_mac_type(key_type: KeyType) -> bool {
    matches!(
        key_type,
        KeyType::HmacSha256 | KeyType::HmacSha512 | KeyType::AesCmac
    )
}

impl Keystore {
    /// Create a session against a key that has a value. The key must be a
    /// session-capable symmetric type.
    pub fn create_session(&self, key: KeyRef) -> Result<SessionRef> {
        // Lock order: sessions before registry.
        let mut sessions = self.sessions.lock();
        let (key_type, material) = self.registry.read().session_snapshot(key)?;

        let handle = NonZeroU64::new(sessions.next_ref).ok_or(Error::Internal)?;
        sessions.next_ref += 1;
        sessions.sessions.insert(
            handle.get(),
            Session {
                key_ref: key,
                key_type,
                key: material,
                state: SessionState::Idle,
            },
        );
        Ok(SessionRef(handle))
    }

    /// Delete a session, discarding all running state.
    pub fn delete_session(&self, session: SessionRef) -> Result<()> {
        self.sessions
            .lock()
            .sessions
            .remove(&session.0.get())
            .map(|_| ())
            .ok_or(Error::InvalidReference)
    }

    // -----------------------------------------------------------------------
    // Streaming MAC
    // -----------------------------------------------------------------------

    /// Feed one message chunk into the session's MAC computation.
    pub fn mac_process(&self, session: SessionRef, chunk: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if !is_mac_type(sess.key_type) {
            return Err(Error::InvalidArgument);
        }
        if chunk.len() > MAX_PACKET_LEN {
            return Err(Error::RangeViolation);
        }

        match &mut sess.state {
            SessionState::Idle => {
                let mut ctx = new_mac_context(sess.key_type, &sess.key)?;
                ctx.update(chunk);
                sess.state = SessionState::Mac(MacState {
                    ctx: Some(ctx),
                    finalized: false,
                });
                Ok(())
            }
            SessionState::Mac(mac) => match mac.ctx.as_mut() {
                Some(ctx) if !mac.finalized => {
                    ctx.update(chunk);
                    Ok(())
                }
                _ => Err(Error::SequenceViolation),
            },
            _ => Err(Error::SequenceViolation),
        }
    }

    /// Complete the MAC computation and emit the tag. Fails if no chunk was
    /// ever processed; once done, the session is finished until deleted and
    /// recreated.
    pub fn mac_done(&self, session: SessionRef, buf: &mut [u8]) -> Result<usize> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if !is_mac_type(sess.key_type) {
            return Err(Error::InvalidArgument);
        }

        match &mut sess.state {
            SessionState::Mac(mac) if !mac.finalized => {
                let tag_len = match mac.ctx.as_ref() {
                    Some(ctx) => ctx.tag_len(),
                    None => return Err(Error::SequenceViolation),
                };
                // A short buffer leaves the accumulation intact; the caller
                // may retry with a larger one.
                if buf.len() < tag_len {
                    return Err(Error::Overflow);
                }
                let ctx = mac.ctx.take().ok_or(Error::SequenceViolation)?;
                let tag = ctx.finalize();
                mac.finalized = true;
                buf[..tag.len()].copy_from_slice(&tag);
                Ok(tag.len())
            }
            _ => Err(Error::SequenceViolation),
        }
    }

    /// Complete the MAC computation and compare it against an expected tag.
    /// The comparison is constant-time; a truncated expected tag (at least
    /// one byte) is compared against the tag's prefix. The session is
    /// finished afterwards whether or not the tags matched.
    pub fn mac_verify(&self, session: SessionRef, expected: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if !is_mac_type(sess.key_type) {
            return Err(Error::InvalidArgument);
        }
        if expected.is_empty() {
            return Err(Error::InvalidArgument);
        }

        match &mut sess.state {
            SessionState::Mac(mac) if !mac.finalized => {
                let tag_len = match mac.ctx.as_ref() {
                    Some(ctx) => ctx.tag_len(),
                    None => return Err(Error::SequenceViolation),
                };
                if expected.len() > tag_len {
                    return Err(Error::InvalidArgument);
                }
                let ctx = mac.ctx.take().ok_or(Error::SequenceViolation)?;
                let tag = ctx.finalize();
                mac.finalized = true;
                if crypto::ct_eq(&tag[..expected.len()], expected) {
                    Ok(())
                } else {
                    Err(Error::Unauthorized)
                }
            }
            _ => Err(Error::SequenceViolation),
        }
    }

    // -----------------------------------------------------------------------
    // AES-CBC
    // -----------------------------------------------------------------------

    /// Install an IV and put the session into encryption mode, discarding
    /// any previous chaining state. May be called at any time.
    pub fn cbc_start_encrypt(&self, session: SessionRef, iv: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if sess.key_type != KeyType::AesCbc {
            return Err(Error::InvalidArgument);
        }
        sess.state = SessionState::CbcEncrypt(CbcEncrypt::new(&sess.key, iv)?);
        Ok(())
    }

    /// Install an IV and put the session into decryption mode.
    pub fn cbc_start_decrypt(&self, session: SessionRef, iv: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if sess.key_type != KeyType::AesCbc {
            return Err(Error::InvalidArgument);
        }
        sess.state = SessionState::CbcDecrypt(CbcDecrypt::new(&sess.key, iv)?);
        Ok(())
    }

    /// Encrypt a chunk, chaining from the previous one. The chunk must be a
    /// multiple of the block size; a non-conforming chunk fails without
    /// disturbing the chaining state.
    pub fn cbc_encrypt(&self, session: SessionRef, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if sess.key_type != KeyType::AesCbc {
            return Err(Error::InvalidArgument);
        }
        check_cbc_chunk(plaintext)?;

        match &mut sess.state {
            SessionState::CbcEncrypt(enc) => {
                let mut out = plaintext.to_vec();
                enc.process(&mut out);
                Ok(out)
            }
            _ => Err(Error::SequenceViolation),
        }
    }

    /// Decrypt a chunk, chaining from the previous one.
    pub fn cbc_decrypt(&self, session: SessionRef, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if sess.key_type != KeyType::AesCbc {
            return Err(Error::InvalidArgument);
        }
        check_cbc_chunk(ciphertext)?;

        match &mut sess.state {
            SessionState::CbcDecrypt(dec) => {
                let mut out = ciphertext.to_vec();
                dec.process(&mut out);
                Ok(out)
            }
            _ => Err(Error::SequenceViolation),
        }
    }

    // -----------------------------------------------------------------------
    // AES-GCM packets
    // -----------------------------------------------------------------------

    /// Encrypt and integrity-protect one packet. A fresh nonce is generated
    /// per call; nothing is carried between packets.
    pub fn gcm_encrypt_packet(
        &self,
        session: SessionRef,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<GcmPacket> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if sess.key_type != KeyType::AesGcm {
            return Err(Error::InvalidArgument);
        }
        if aad.len() > MAX_PACKET_LEN || plaintext.len() > MAX_PACKET_LEN {
            return Err(Error::RangeViolation);
        }

        let (nonce, ciphertext, tag) = crypto::gcm_seal(&sess.key, aad, plaintext)?;
        Ok(GcmPacket {
            nonce,
            ciphertext,
            tag,
        })
    }

    /// Decrypt one packet and verify its tag. On tag failure no plaintext is
    /// produced.
    pub fn gcm_decrypt_packet(
        &self,
        session: SessionRef,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>> {
        let mut sessions = self.sessions.lock();
        let sess = sessions.get_mut(session)?;
        if sess.key_type != KeyType::AesGcm {
            return Err(Error::InvalidArgument);
        }
        let nonce: [u8; GCM_NONCE_LEN] = nonce.try_into().map_err(|_| Error::InvalidArgument)?;
        let tag: [u8; GCM_TAG_LEN] = tag.try_into().map_err(|_| Error::InvalidArgument)?;
        if aad.len() > MAX_PACKET_LEN || ciphertext.len() > MAX_PACKET_LEN {
            return Err(Error::RangeViolation);
        }

        crypto::gcm_open(&sess.key, &nonce, aad, ciphertext, &tag)
    }
}

fn check_cbc_chunk(data: &[u8]) -> Result<()> {
    if data.len() > MAX_PACKET_LEN {
        return Err(Error::RangeViolation);
    }
    if data.len() % AES_BLOCK_LEN != 0 {
        return Err(Error::RangeViolation);
    }
    Ok(())
}
