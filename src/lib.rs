//! # keyhold
//!
//! Embedded secure key and digest store.
//!
//! Keys and digests are created per caller namespace, gain values by
//! internal generation or by provisioning (secret values arrive wrapped
//! under the store's provisioning key), and can be placed under an update
//! key, after which every mutation requires a signed, challenge-bound
//! command from the update authority. Stateful sessions drive the
//! per-algorithm machines — streaming HMAC/CMAC, chained AES-CBC,
//! per-packet AES-GCM — and the Milenage function set derives SIM
//! authentication vectors from stored keys.
//!
//! ## Public API
//!
//! The public surface of this crate is intentionally narrow. `Keystore` is
//! the single entry point; the types re-exported here are everything a
//! caller needs. Everything else is `pub(crate)` at most.

// Module declarations.
pub(crate) mod asym;
pub mod audit;
pub mod auth;
pub(crate) mod crypto;
pub mod error;
pub(crate) mod milenage;
pub(crate) mod object;
pub mod provision;
pub(crate) mod registry;
pub(crate) mod session;
pub mod storage;

pub use auth::{CommandOp, UpdateAuthority, CHALLENGE_LEN};
pub use error::{Error, Result};
pub use milenage::{
    MilenageKeys, AK_LEN, AMF_LEN, CK_LEN, IK_LEN, MAC_LEN, RAND_LEN, RES_LEN, SQN_LEN,
};
pub use object::{ClientId, DigestRef, KeyRef, KeyType, KeyUsage, MAX_DIGEST_LEN, MAX_ID_LEN};
pub use registry::Keystore;
pub use session::{GcmPacket, SessionRef};

/// Sizes a caller needs to allocate buffers for packet operations.
pub use crypto::{AES_BLOCK_LEN, GCM_NONCE_LEN, GCM_TAG_LEN, MAX_PACKET_LEN};

/// Length of a DER-encoded exported public key.
pub use asym::SPKI_LEN;
