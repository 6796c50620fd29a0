//! Key and digest objects: types, identifiers, sizes and value material.
//!
//! The registry owns every object defined here. Value material is held in
//! types that are zeroised on drop, and symmetric bytes never leave the
//! crate; only public halves are exportable.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::asym::PUBLIC_KEY_LEN;
use crate::error::{Error, Result};

/// Maximum length of a full namespaced identifier, in bytes.
pub const MAX_ID_LEN: usize = 127;

/// Maximum declared size of a digest value, in bytes.
pub const MAX_DIGEST_LEN: usize = 64;

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Opaque handle to a key held by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRef(pub(crate) NonZeroU64);

/// Opaque handle to a digest held by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DigestRef(pub(crate) NonZeroU64);

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A validated caller identity. Object identifiers are namespaced as
/// `<client>.<suffix>` before any lookup or creation, so two clients can use
/// the same suffix without colliding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    /// Validate a client name: ASCII alphanumerics, `_` and `-` only.
    pub fn new(name: &str) -> Result<Self> {
        if !is_valid_id_component(name) {
            return Err(Error::InvalidArgument);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// True if `s` is non-empty and contains only identifier characters.
fn is_valid_id_component(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Module identities use the same charset as object identifiers but are not
/// namespaced: there is one per store.
pub(crate) fn is_valid_module_id(s: &str) -> bool {
    is_valid_id_component(s) && s.len() <= MAX_ID_LEN
}

/// Build the full namespaced identifier for a caller-supplied suffix.
pub(crate) fn namespaced_id(client: &ClientId, suffix: &str) -> Result<String> {
    if !is_valid_id_component(suffix) {
        return Err(Error::InvalidArgument);
    }
    let full_len = client.as_str().len() + 1 + suffix.len();
    if full_len > MAX_ID_LEN {
        return Err(Error::InvalidArgument);
    }
    Ok(format!("{}.{}", client.as_str(), suffix))
}

// ---------------------------------------------------------------------------
// Key types and usages
// ---------------------------------------------------------------------------

/// The type of a stored key. Drives size validation, what a value looks
/// like, and which session operations the key supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// HMAC with SHA-256.
    HmacSha256,
    /// HMAC with SHA-512.
    HmacSha512,
    /// AES in CMAC mode.
    AesCmac,
    /// AES in CBC mode.
    AesCbc,
    /// AES in GCM mode.
    AesGcm,
    /// Milenage subscriber key K.
    MilenageK,
    /// Milenage operator constant OPc.
    MilenageOpc,
    /// Update key: holds the verification half of the authority's signing
    /// pair and authorises mutation of objects bound to it.
    KeyUpdate,
}

impl KeyType {
    /// Check a declared size against the type's accepted range.
    pub fn is_size_valid(self, size: u32) -> bool {
        match self {
            Self::HmacSha256 => (8..=64).contains(&size),
            Self::HmacSha512 => (8..=128).contains(&size),
            Self::AesCmac | Self::AesCbc => matches!(size, 16 | 24 | 32),
            // The AEAD backend implements AES-128-GCM and AES-256-GCM only.
            Self::AesGcm => matches!(size, 16 | 32),
            Self::MilenageK | Self::MilenageOpc => size == 16,
            Self::KeyUpdate => size == PUBLIC_KEY_LEN as u32,
        }
    }

    /// True if the key's value is public material. Public values are
    /// provisioned in plaintext, exportable, and can never be generated
    /// internally.
    pub fn is_public(self) -> bool {
        matches!(self, Self::KeyUpdate)
    }

    /// True if sessions can be created against keys of this type.
    pub(crate) fn is_session_capable(self) -> bool {
        matches!(
            self,
            Self::HmacSha256 | Self::HmacSha512 | Self::AesCmac | Self::AesCbc | Self::AesGcm
        )
    }
}

/// Convenience usage classes for key creation. Each maps to a default type
/// and size that satisfies the usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    /// Message authentication.
    Mac,
    /// Packet encryption.
    Cipher,
    /// Authenticated updates of other objects.
    Update,
}

impl KeyUsage {
    pub(crate) fn default_type(self) -> (KeyType, u32) {
        match self {
            Self::Mac => (KeyType::HmacSha256, 32),
            Self::Cipher => (KeyType::AesGcm, 16),
            Self::Update => (KeyType::KeyUpdate, PUBLIC_KEY_LEN as u32),
        }
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// A key's value material.
#[derive(Clone)]
pub(crate) enum KeyMaterial {
    /// Secret symmetric bytes, zeroised on drop.
    Symmetric(Zeroizing<Vec<u8>>),
    /// An Ed25519 verification key.
    PublicEd25519([u8; PUBLIC_KEY_LEN]),
}

/// A key as held by the registry.
pub(crate) struct KeyObject {
    pub id: String,
    pub key_type: KeyType,
    pub size: u32,
    pub material: Option<KeyMaterial>,
    /// Non-owning back-reference, resolved by id at authorisation time.
    pub update_key_id: Option<String>,
    pub saved: bool,
}

impl KeyObject {
    pub fn new(id: String, key_type: KeyType, size: u32) -> Self {
        Self {
            id,
            key_type,
            size,
            material: None,
            update_key_id: None,
            saved: false,
        }
    }
}

/// A digest as held by the registry: an opaque reference value with a
/// declared maximum size.
pub(crate) struct DigestObject {
    pub id: String,
    pub size: u32,
    pub value: Option<Vec<u8>>,
    pub update_key_id: Option<String>,
    pub saved: bool,
}

impl DigestObject {
    pub fn new(id: String, size: u32) -> Self {
        Self {
            id,
            size,
            value: None,
            update_key_id: None,
            saved: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence records
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub(crate) enum MaterialRecord {
    Symmetric(Vec<u8>),
    PublicEd25519(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
pub(crate) struct KeyRecord {
    pub id: String,
    pub key_type: KeyType,
    pub size: u32,
    pub material: Option<MaterialRecord>,
    pub update_key_id: Option<String>,
}

impl KeyRecord {
    pub fn from_object(obj: &KeyObject) -> Self {
        Self {
            id: obj.id.clone(),
            key_type: obj.key_type,
            size: obj.size,
            material: obj.material.as_ref().map(|m| match m {
                KeyMaterial::Symmetric(bytes) => MaterialRecord::Symmetric(bytes.to_vec()),
                KeyMaterial::PublicEd25519(pk) => MaterialRecord::PublicEd25519(pk.to_vec()),
            }),
            update_key_id: obj.update_key_id.clone(),
        }
    }

    pub fn into_object(self) -> Result<KeyObject> {
        let material = match self.material {
            None => None,
            Some(MaterialRecord::Symmetric(bytes)) => {
                Some(KeyMaterial::Symmetric(Zeroizing::new(bytes)))
            }
            Some(MaterialRecord::PublicEd25519(bytes)) => {
                let pk: [u8; PUBLIC_KEY_LEN] =
                    bytes.as_slice().try_into().map_err(|_| Error::Internal)?;
                Some(KeyMaterial::PublicEd25519(pk))
            }
        };
        Ok(KeyObject {
            id: self.id,
            key_type: self.key_type,
            size: self.size,
            material,
            update_key_id: self.update_key_id,
            saved: true,
        })
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct DigestRecord {
    pub id: String,
    pub size: u32,
    pub value: Option<Vec<u8>>,
    pub update_key_id: Option<String>,
}

impl DigestRecord {
    pub fn from_object(obj: &DigestObject) -> Self {
        Self {
            id: obj.id.clone(),
            size: obj.size,
            value: obj.value.clone(),
            update_key_id: obj.update_key_id.clone(),
        }
    }

    pub fn into_object(self) -> DigestObject {
        DigestObject {
            id: self.id,
            size: self.size,
            value: self.value,
            update_key_id: self.update_key_id,
            saved: true,
        }
    }
}
