//! Authenticated update commands.
//!
//! Any mutation of an object bound to an update key must arrive as a signed
//! command envelope. The envelope carries the exact byte encoding of the
//! command body plus an Ed25519 signature over those bytes, so verification
//! never depends on re-serialisation being canonical.
//!
//! The challenge inside the body must match the single-use nonce most
//! recently issued for that update key. Issuing a new challenge stales the
//! previous one; a challenge is consumed only by a fully validated command.
//! This binds each signed command to one store instance and one moment,
//! which is what defeats replay across stores or across time.

use serde::{Deserialize, Serialize};

use crate::asym::{self, CommandKey, PUBLIC_KEY_LEN};
use crate::crypto;
use crate::error::{Error, Result};

/// Size of an update authentication challenge, in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// The protected operations a command can authorise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOp {
    /// Generate a fresh value for the target key.
    GenerateValue,
    /// Install the value carried in the command payload.
    ProvisionValue,
    /// Delete the target key or digest.
    Delete,
    /// Delete the module identity.
    DeleteModuleId,
}

#[derive(Serialize, Deserialize)]
struct CommandBody {
    op: CommandOp,
    target_id: String,
    challenge: Vec<u8>,
    payload: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    body: Vec<u8>,
    signature: Vec<u8>,
}

/// The outcome of successful validation. The payload, if present, is the
/// inner provisioning package for the target.
pub(crate) struct VerifiedCommand {
    pub payload: Option<Vec<u8>>,
}

/// Validate a command envelope against the resolved update key, the
/// outstanding challenge, and the operation the caller is attempting.
///
/// Everything is checked before the registry mutates anything; a failure
/// here leaves the challenge outstanding and the target untouched.
pub(crate) fn verify_command(
    envelope: &[u8],
    verifying_key: &[u8; PUBLIC_KEY_LEN],
    outstanding_challenge: Option<&[u8; CHALLENGE_LEN]>,
    expected_op: CommandOp,
    expected_target: &str,
) -> Result<VerifiedCommand> {
    let envelope: Envelope =
        serde_json::from_slice(envelope).map_err(|_| Error::Unauthorized)?;

    // Signature first: an attacker learns nothing about challenge state from
    // an unsigned probe.
    asym::ed25519_verify(verifying_key, &envelope.body, &envelope.signature)?;

    let body: CommandBody =
        serde_json::from_slice(&envelope.body).map_err(|_| Error::Unauthorized)?;

    let challenge = outstanding_challenge.ok_or(Error::Unauthorized)?;
    if !crypto::ct_eq(challenge, &body.challenge) {
        return Err(Error::Unauthorized);
    }

    if body.op != expected_op || body.target_id != expected_target {
        return Err(Error::Unauthorized);
    }

    Ok(VerifiedCommand {
        payload: body.payload,
    })
}

// ---------------------------------------------------------------------------
// Authority side
// ---------------------------------------------------------------------------

/// The remote authority's half of the protocol: holds the signing key whose
/// verification half is provisioned into an update key, and constructs
/// signed command envelopes offline.
///
/// The store itself never holds this type. It ships in-crate so tooling and
/// tests can produce well-formed commands.
pub struct UpdateAuthority {
    key: CommandKey,
}

impl UpdateAuthority {
    /// Generate a fresh authority signing pair.
    pub fn generate() -> Self {
        Self {
            key: CommandKey::generate(),
        }
    }

    /// The verification half, to be provisioned into a `KeyUpdate` key.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.public_bytes()
    }

    /// Build a signed command envelope.
    ///
    /// `target_id` is the full namespaced identifier of the object being
    /// mutated; `challenge` is the nonce obtained from
    /// `Keystore::update_auth_challenge`; `payload` carries the inner
    /// provisioning package for `ProvisionValue` and is absent otherwise.
    pub fn command(
        &self,
        op: CommandOp,
        target_id: &str,
        challenge: &[u8],
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(&CommandBody {
            op,
            target_id: target_id.to_string(),
            challenge: challenge.to_vec(),
            payload: payload.map(|p| p.to_vec()),
        })
        .map_err(|_| Error::Internal)?;

        let signature = self.key.sign(&body).to_vec();
        serde_json::to_vec(&Envelope { body, signature }).map_err(|_| Error::Internal)
    }
}
