//! The object registry.
//!
//! The `Keystore` owns every key and digest, their metadata and value
//! material, the outstanding update challenges, the module identity and the
//! provisioning pair. All methods take `&self`; interior locks provide the
//! concurrency contract: a mutation is validated completely, then applied
//! under the write lock, so readers never observe a half-updated object.
//!
//! Lock order where two locks are held: sessions before registry.

use std::collections::HashMap;
use std::num::NonZeroU64;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::asym::{self, ProvisionPair, PUBLIC_KEY_LEN, SPKI_LEN};
use crate::audit::{AuditLog, AuditOp, AuditRecord, AuditSink};
use crate::auth::{self, CommandOp, CHALLENGE_LEN};
use crate::crypto;
use crate::error::{Error, Result};
use crate::object::{
    namespaced_id, is_valid_module_id, ClientId, DigestObject, DigestRecord, DigestRef, KeyMaterial,
    KeyObject, KeyRecord, KeyRef, KeyType, KeyUsage, MAX_DIGEST_LEN,
};
use crate::provision;
use crate::session::SessionTable;
use crate::storage::{ObjectKind, Storage};

/// Identifier of the module-identity record in the meta store.
const MODULE_ID_RECORD: &str = "module_id";

/// Identifier of the provisioning-secret record in the meta store.
const PROVISION_KEY_RECORD: &str = "provision_key";

#[derive(Serialize, Deserialize)]
struct ModuleIdRecord {
    id: String,
    update_key_id: Option<String>,
}

/// The embedded key and digest store.
pub struct Keystore {
    pub(crate) sessions: Mutex<SessionTable>,
    pub(crate) registry: RwLock<Registry>,
    audit: Mutex<AuditLog>,
}

pub(crate) struct Registry {
    next_ref: u64,
    keys: HashMap<u64, KeyObject>,
    key_ids: HashMap<String, u64>,
    digests: HashMap<u64, DigestObject>,
    digest_ids: HashMap<String, u64>,
    /// Outstanding single-use challenges, keyed by update-key reference.
    challenges: HashMap<u64, [u8; CHALLENGE_LEN]>,
    module_id: Option<ModuleIdRecord>,
    provision_pair: Option<ProvisionPair>,
    storage: Box<dyn Storage>,
}

impl Keystore {
    /// Create a store over a persistence backend, reloading every object the
    /// backend holds.
    pub fn open(storage: Box<dyn Storage>) -> Result<Self> {
        let mut registry = Registry::new(storage);
        registry.load()?;

        Ok(Self {
            sessions: Mutex::new(SessionTable::new()),
            registry: RwLock::new(registry),
            audit: Mutex::new(AuditLog::new()),
        })
    }

    /// Create a store with a volatile in-memory backend.
    pub fn in_memory() -> Self {
        Self {
            sessions: Mutex::new(SessionTable::new()),
            registry: RwLock::new(Registry::new(Box::new(
                crate::storage::MemoryStorage::new(),
            ))),
            audit: Mutex::new(AuditLog::new()),
        }
    }

    fn audit(&self, op: AuditOp, object_id: &str) {
        self.audit.lock().append(AuditRecord::now(op, object_id));
    }

    /// Attach a sink that receives a copy of every audit record.
    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.audit.lock().add_forward_sink(sink);
    }

    /// Snapshot the audit log.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.lock().iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Create a key for a usage class, with a default type and size that
    /// satisfies it. The new key has no value and is not persisted.
    pub fn create_key(&self, client: &ClientId, id: &str, usage: KeyUsage) -> Result<KeyRef> {
        let (key_type, size) = usage.default_type();
        self.create_key_with_type(client, id, key_type, size)
    }

    /// Create a key of a specific type and size. Fails if the id is taken,
    /// malformed, or the size is invalid for the type.
    pub fn create_key_with_type(
        &self,
        client: &ClientId,
        id: &str,
        key_type: KeyType,
        size: u32,
    ) -> Result<KeyRef> {
        let full_id = namespaced_id(client, id)?;
        if !key_type.is_size_valid(size) {
            return Err(Error::InvalidArgument);
        }

        let mut reg = self.registry.write();
        if reg.key_ids.contains_key(&full_id) {
            return Err(Error::InvalidArgument);
        }

        let handle = reg.alloc_ref()?;
        reg.keys
            .insert(handle.get(), KeyObject::new(full_id.clone(), key_type, size));
        reg.key_ids.insert(full_id.clone(), handle.get());
        drop(reg);

        self.audit(AuditOp::KeyCreated, &full_id);
        Ok(KeyRef(handle))
    }

    /// Look up a key by identifier.
    pub fn get_key(&self, client: &ClientId, id: &str) -> Result<KeyRef> {
        let full_id = namespaced_id(client, id)?;
        let reg = self.registry.read();
        let raw = *reg.key_ids.get(&full_id).ok_or(Error::NotFound)?;
        Ok(KeyRef(NonZeroU64::new(raw).ok_or(Error::Internal)?))
    }

    /// The key's type.
    pub fn key_type(&self, key: KeyRef) -> Result<KeyType> {
        Ok(self.registry.read().key(key)?.key_type)
    }

    /// The key's declared size in bytes.
    pub fn key_size(&self, key: KeyRef) -> Result<u32> {
        Ok(self.registry.read().key(key)?.size)
    }

    /// Whether the key currently has a value.
    pub fn has_key_value(&self, key: KeyRef) -> Result<bool> {
        Ok(self.registry.read().key(key)?.material.is_some())
    }

    /// Bind an update key to a key. After this, generation, provisioning and
    /// deletion all require a command signed by the update authority; the
    /// binding itself is immutable.
    pub fn set_key_update_key(&self, key: KeyRef, update_key: KeyRef) -> Result<()> {
        let mut reg = self.registry.write();

        let target = reg.key(key)?;
        if target.update_key_id.is_some() {
            return Err(Error::InvalidArgument);
        }
        let update_key_id = reg.checked_update_key_id(update_key)?;

        let target = reg.key_mut(key)?;
        target.update_key_id = Some(update_key_id);
        let target_id = target.id.clone();
        let saved = target.saved;
        if saved {
            reg.persist_key(key)?;
        }
        drop(reg);

        self.audit(AuditOp::UpdateKeyBound, &target_id);
        Ok(())
    }

    /// Generate a fresh random value for a symmetric key, replacing any
    /// previous value. Public-material types cannot be generated; they must
    /// be provisioned. If the key is bound to an update key, `auth_command`
    /// must carry a valid `GenerateValue` command.
    pub fn gen_key_value(&self, key: KeyRef, auth_command: Option<&[u8]>) -> Result<()> {
        let mut reg = self.registry.write();

        let obj = reg.key(key)?;
        if obj.key_type.is_public() {
            return Err(Error::InvalidArgument);
        }
        let size = obj.size as usize;
        let target_id = obj.id.clone();
        let saved = obj.saved;

        let consumed = match obj.update_key_id.clone() {
            Some(update_key_id) => Some(
                reg.authorize(&target_id, &update_key_id, CommandOp::GenerateValue, auth_command)?
                    .0,
            ),
            None => None,
        };

        let mut value = Zeroizing::new(vec![0u8; size]);
        crypto::random_bytes(&mut value)?;

        if let Some(update_ref) = consumed {
            reg.challenges.remove(&update_ref);
        }
        reg.key_mut(key)?.material = Some(KeyMaterial::Symmetric(value));
        if saved {
            reg.persist_key(key)?;
        }
        drop(reg);

        self.audit(AuditOp::ValueGenerated, &target_id);
        Ok(())
    }

    /// Provision a key value.
    ///
    /// Without a bound update key, `package` is the provisioning package
    /// itself: wrapped bytes for symmetric types, a plaintext verification
    /// key for public types. With a bound update key, `package` is a signed
    /// command envelope whose payload is that inner package.
    pub fn provision_key_value(&self, key: KeyRef, package: &[u8]) -> Result<()> {
        let mut reg = self.registry.write();

        let obj = reg.key(key)?;
        let key_type = obj.key_type;
        let size = obj.size as usize;
        let target_id = obj.id.clone();
        let saved = obj.saved;

        let (consumed, inner) = match obj.update_key_id.clone() {
            Some(update_key_id) => {
                let (update_ref, payload) = reg.authorize(
                    &target_id,
                    &update_key_id,
                    CommandOp::ProvisionValue,
                    Some(package),
                )?;
                (Some(update_ref), payload.ok_or(Error::Unauthorized)?)
            }
            None => (None, package.to_vec()),
        };

        let material = if key_type.is_public() {
            let public: [u8; PUBLIC_KEY_LEN] =
                inner.as_slice().try_into().map_err(|_| Error::InvalidArgument)?;
            KeyMaterial::PublicEd25519(public)
        } else {
            reg.ensure_provision_pair()?;
            let pair = reg.provision_pair.as_ref().ok_or(Error::Internal)?;
            let value = provision::unwrap_value(pair, &inner)?;
            if value.len() != size {
                return Err(Error::InvalidArgument);
            }
            KeyMaterial::Symmetric(value)
        };

        if let Some(update_ref) = consumed {
            reg.challenges.remove(&update_ref);
        }
        reg.key_mut(key)?.material = Some(material);
        if saved {
            reg.persist_key(key)?;
        }
        drop(reg);

        self.audit(AuditOp::ValueProvisioned, &target_id);
        Ok(())
    }

    /// Persist a key. Saving an already-saved key is an error: callers are
    /// expected to track persistence themselves. Later mutations of a saved
    /// key write through automatically.
    pub fn save_key(&self, key: KeyRef) -> Result<()> {
        let mut reg = self.registry.write();
        let obj = reg.key(key)?;
        if obj.saved {
            return Err(Error::InvalidArgument);
        }
        let target_id = obj.id.clone();
        reg.persist_key(key)?;
        reg.key_mut(key)?.saved = true;
        drop(reg);

        self.audit(AuditOp::Saved, &target_id);
        Ok(())
    }

    /// Delete a key. Requires a valid `Delete` command when an update key is
    /// bound. Refused while any session is bound to the key.
    pub fn delete_key(&self, key: KeyRef, auth_command: Option<&[u8]>) -> Result<()> {
        // Sessions lock first, held across the registry mutation so a
        // session cannot appear between the check and the removal.
        let sessions = self.sessions.lock();
        if sessions.is_key_busy(key) {
            return Err(Error::InvalidArgument);
        }

        let mut reg = self.registry.write();
        let obj = reg.key(key)?;
        let target_id = obj.id.clone();
        let saved = obj.saved;

        let consumed = match obj.update_key_id.clone() {
            Some(update_key_id) => Some(
                reg.authorize(&target_id, &update_key_id, CommandOp::Delete, auth_command)?
                    .0,
            ),
            None => None,
        };

        if let Some(update_ref) = consumed {
            reg.challenges.remove(&update_ref);
        }
        reg.keys.remove(&key.0.get());
        reg.key_ids.remove(&target_id);
        // Any challenge issued for this key (as an update key) dies with it.
        reg.challenges.remove(&key.0.get());
        if saved {
            reg.storage
                .remove(ObjectKind::Key, &target_id)
                .map_err(|_| Error::Internal)?;
        }
        drop(reg);
        drop(sessions);

        self.audit(AuditOp::Deleted, &target_id);
        Ok(())
    }

    /// Export the public half of an asymmetric key as a DER
    /// SubjectPublicKeyInfo. Symmetric values are never readable.
    pub fn pub_key_value(&self, key: KeyRef, buf: &mut [u8]) -> Result<usize> {
        let reg = self.registry.read();
        let obj = reg.key(key)?;
        if !obj.key_type.is_public() {
            return Err(Error::InvalidArgument);
        }
        let public = match &obj.material {
            Some(KeyMaterial::PublicEd25519(pk)) => pk,
            _ => return Err(Error::NotFound),
        };
        let der = asym::ed25519_spki(public);
        if buf.len() < der.len() {
            return Err(Error::Overflow);
        }
        buf[..der.len()].copy_from_slice(&der);
        Ok(der.len())
    }

    // -----------------------------------------------------------------------
    // Digests
    // -----------------------------------------------------------------------

    /// Create a digest with a declared maximum size. The new digest has no
    /// value and is not persisted.
    pub fn create_digest(&self, client: &ClientId, id: &str, size: u32) -> Result<DigestRef> {
        let full_id = namespaced_id(client, id)?;
        if size == 0 || size as usize > MAX_DIGEST_LEN {
            return Err(Error::InvalidArgument);
        }

        let mut reg = self.registry.write();
        if reg.digest_ids.contains_key(&full_id) {
            return Err(Error::InvalidArgument);
        }

        let handle = reg.alloc_ref()?;
        reg.digests
            .insert(handle.get(), DigestObject::new(full_id.clone(), size));
        reg.digest_ids.insert(full_id.clone(), handle.get());
        drop(reg);

        self.audit(AuditOp::DigestCreated, &full_id);
        Ok(DigestRef(handle))
    }

    /// Look up a digest by identifier.
    pub fn get_digest(&self, client: &ClientId, id: &str) -> Result<DigestRef> {
        let full_id = namespaced_id(client, id)?;
        let reg = self.registry.read();
        let raw = *reg.digest_ids.get(&full_id).ok_or(Error::NotFound)?;
        Ok(DigestRef(NonZeroU64::new(raw).ok_or(Error::Internal)?))
    }

    /// The digest's declared maximum size in bytes.
    pub fn digest_size(&self, digest: DigestRef) -> Result<u32> {
        Ok(self.registry.read().digest(digest)?.size)
    }

    /// Whether the digest currently has a value.
    pub fn has_digest_value(&self, digest: DigestRef) -> Result<bool> {
        Ok(self.registry.read().digest(digest)?.value.is_some())
    }

    /// Bind an update key to a digest. Same contract as for keys.
    pub fn set_digest_update_key(&self, digest: DigestRef, update_key: KeyRef) -> Result<()> {
        let mut reg = self.registry.write();

        let target = reg.digest(digest)?;
        if target.update_key_id.is_some() {
            return Err(Error::InvalidArgument);
        }
        let update_key_id = reg.checked_update_key_id(update_key)?;

        let target = reg.digest_mut(digest)?;
        target.update_key_id = Some(update_key_id);
        let target_id = target.id.clone();
        let saved = target.saved;
        if saved {
            reg.persist_digest(digest)?;
        }
        drop(reg);

        self.audit(AuditOp::UpdateKeyBound, &target_id);
        Ok(())
    }

    /// Provision a digest value. Digest values are plaintext; with a bound
    /// update key the package is a signed envelope carrying the value.
    pub fn provision_digest(&self, digest: DigestRef, package: &[u8]) -> Result<()> {
        let mut reg = self.registry.write();

        let obj = reg.digest(digest)?;
        let max = obj.size as usize;
        let target_id = obj.id.clone();
        let saved = obj.saved;

        let (consumed, inner) = match obj.update_key_id.clone() {
            Some(update_key_id) => {
                let (update_ref, payload) = reg.authorize(
                    &target_id,
                    &update_key_id,
                    CommandOp::ProvisionValue,
                    Some(package),
                )?;
                (Some(update_ref), payload.ok_or(Error::Unauthorized)?)
            }
            None => (None, package.to_vec()),
        };

        if inner.is_empty() || inner.len() > max {
            return Err(Error::InvalidArgument);
        }

        if let Some(update_ref) = consumed {
            reg.challenges.remove(&update_ref);
        }
        reg.digest_mut(digest)?.value = Some(inner);
        if saved {
            reg.persist_digest(digest)?;
        }
        drop(reg);

        self.audit(AuditOp::ValueProvisioned, &target_id);
        Ok(())
    }

    /// Persist a digest. Same contract as `save_key`.
    pub fn save_digest(&self, digest: DigestRef) -> Result<()> {
        let mut reg = self.registry.write();
        let obj = reg.digest(digest)?;
        if obj.saved {
            return Err(Error::InvalidArgument);
        }
        let target_id = obj.id.clone();
        reg.persist_digest(digest)?;
        reg.digest_mut(digest)?.saved = true;
        drop(reg);

        self.audit(AuditOp::Saved, &target_id);
        Ok(())
    }

    /// Delete a digest. Requires a valid `Delete` command when an update key
    /// is bound.
    pub fn delete_digest(&self, digest: DigestRef, auth_command: Option<&[u8]>) -> Result<()> {
        let mut reg = self.registry.write();
        let obj = reg.digest(digest)?;
        let target_id = obj.id.clone();
        let saved = obj.saved;

        let consumed = match obj.update_key_id.clone() {
            Some(update_key_id) => Some(
                reg.authorize(&target_id, &update_key_id, CommandOp::Delete, auth_command)?
                    .0,
            ),
            None => None,
        };

        if let Some(update_ref) = consumed {
            reg.challenges.remove(&update_ref);
        }
        reg.digests.remove(&digest.0.get());
        reg.digest_ids.remove(&target_id);
        if saved {
            reg.storage
                .remove(ObjectKind::Digest, &target_id)
                .map_err(|_| Error::Internal)?;
        }
        drop(reg);

        self.audit(AuditOp::Deleted, &target_id);
        Ok(())
    }

    /// Read a digest value back. Digests are reference values, not secrets.
    pub fn digest_value(&self, digest: DigestRef, buf: &mut [u8]) -> Result<usize> {
        let reg = self.registry.read();
        let obj = reg.digest(digest)?;
        let value = obj.value.as_ref().ok_or(Error::NotFound)?;
        if buf.len() < value.len() {
            return Err(Error::Overflow);
        }
        buf[..value.len()].copy_from_slice(value);
        Ok(value.len())
    }

    // -----------------------------------------------------------------------
    // Challenges and the provisioning key
    // -----------------------------------------------------------------------

    /// Issue a fresh single-use challenge for an update key, replacing (and
    /// thereby staling) any previously issued one. The challenge must appear
    /// in the next signed command for that update key.
    pub fn update_auth_challenge(&self, update_key: KeyRef, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < CHALLENGE_LEN {
            return Err(Error::Overflow);
        }

        let mut reg = self.registry.write();
        let obj = reg.key(update_key)?;
        if obj.key_type != KeyType::KeyUpdate {
            return Err(Error::InvalidArgument);
        }
        if obj.material.is_none() {
            return Err(Error::NotFound);
        }

        let mut challenge = [0u8; CHALLENGE_LEN];
        crypto::random_bytes(&mut challenge)?;
        reg.challenges.insert(update_key.0.get(), challenge);

        buf[..CHALLENGE_LEN].copy_from_slice(&challenge);
        Ok(CHALLENGE_LEN)
    }

    /// Export the store's provisioning public key as a DER
    /// SubjectPublicKeyInfo. The pair is created on first use and persisted;
    /// it can never be deleted or replaced through this API.
    pub fn provisioning_key(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < SPKI_LEN {
            return Err(Error::Overflow);
        }
        let mut reg = self.registry.write();
        reg.ensure_provision_pair()?;
        let pair = reg.provision_pair.as_ref().ok_or(Error::Internal)?;
        let der = pair.public_spki();
        buf[..der.len()].copy_from_slice(&der);
        Ok(der.len())
    }

    // -----------------------------------------------------------------------
    // Module identity
    // -----------------------------------------------------------------------

    /// Set the module identity, optionally bound to an update key. Without
    /// one the identity is one-time-programmable: it can never be deleted.
    pub fn set_module_id(&self, id: &str, update_key: Option<KeyRef>) -> Result<()> {
        if !is_valid_module_id(id) {
            return Err(Error::InvalidArgument);
        }

        let mut reg = self.registry.write();
        if reg.module_id.is_some() {
            return Err(Error::InvalidArgument);
        }
        let update_key_id = match update_key {
            Some(handle) => Some(reg.checked_update_key_id(handle)?),
            None => None,
        };

        let record = ModuleIdRecord {
            id: id.to_string(),
            update_key_id,
        };
        let bytes = serde_json::to_vec(&record).map_err(|_| Error::Internal)?;
        reg.storage
            .put(ObjectKind::Meta, MODULE_ID_RECORD, &bytes)
            .map_err(|_| Error::Internal)?;
        reg.module_id = Some(record);
        drop(reg);

        self.audit(AuditOp::ModuleIdSet, id);
        Ok(())
    }

    /// Read the module identity.
    pub fn module_id(&self, buf: &mut [u8]) -> Result<usize> {
        let reg = self.registry.read();
        let record = reg.module_id.as_ref().ok_or(Error::NotFound)?;
        let id = record.id.as_bytes();
        if buf.len() < id.len() {
            return Err(Error::Overflow);
        }
        buf[..id.len()].copy_from_slice(id);
        Ok(id.len())
    }

    /// Delete the module identity. Always requires a valid authenticated
    /// command; if no update key was bound at set time the identity is
    /// one-time-programmable and this fails.
    pub fn delete_module_id(&self, auth_command: &[u8]) -> Result<()> {
        let mut reg = self.registry.write();
        let record = reg.module_id.as_ref().ok_or(Error::NotFound)?;
        let target_id = record.id.clone();
        let update_key_id = record.update_key_id.clone().ok_or(Error::Unauthorized)?;

        let (update_ref, _) = reg.authorize(
            &target_id,
            &update_key_id,
            CommandOp::DeleteModuleId,
            Some(auth_command),
        )?;

        reg.challenges.remove(&update_ref);
        reg.module_id = None;
        reg.storage
            .remove(ObjectKind::Meta, MODULE_ID_RECORD)
            .map_err(|_| Error::Internal)?;
        drop(reg);

        self.audit(AuditOp::ModuleIdDeleted, &target_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry internals
// ---------------------------------------------------------------------------

impl Registry {
    fn new(storage: Box<dyn Storage>) -> Self {
        Self {
            next_ref: 1,
            keys: HashMap::new(),
            key_ids: HashMap::new(),
            digests: HashMap::new(),
            digest_ids: HashMap::new(),
            challenges: HashMap::new(),
            module_id: None,
            provision_pair: None,
            storage,
        }
    }

    fn alloc_ref(&mut self) -> Result<NonZeroU64> {
        let handle = NonZeroU64::new(self.next_ref).ok_or(Error::Internal)?;
        self.next_ref += 1;
        Ok(handle)
    }

    pub(crate) fn key(&self, key: KeyRef) -> Result<&KeyObject> {
        self.keys.get(&key.0.get()).ok_or(Error::InvalidReference)
    }

    fn key_mut(&mut self, key: KeyRef) -> Result<&mut KeyObject> {
        self.keys
            .get_mut(&key.0.get())
            .ok_or(Error::InvalidReference)
    }

    fn digest(&self, digest: DigestRef) -> Result<&DigestObject> {
        self.digests
            .get(&digest.0.get())
            .ok_or(Error::InvalidReference)
    }

    fn digest_mut(&mut self, digest: DigestRef) -> Result<&mut DigestObject> {
        self.digests
            .get_mut(&digest.0.get())
            .ok_or(Error::InvalidReference)
    }

    /// Snapshot what a session needs from a key: its type and symmetric
    /// material. Sessions never re-enter the registry afterwards.
    pub(crate) fn session_snapshot(&self, key: KeyRef) -> Result<(KeyType, Zeroizing<Vec<u8>>)> {
        let obj = self.key(key)?;
        if !obj.key_type.is_session_capable() {
            return Err(Error::InvalidArgument);
        }
        match &obj.material {
            Some(KeyMaterial::Symmetric(bytes)) => Ok((obj.key_type, bytes.clone())),
            _ => Err(Error::NotFound),
        }
    }

    /// Fetch the two Milenage inputs: K and OPc, both 16 bytes.
    pub(crate) fn milenage_pair(
        &self,
        k: KeyRef,
        opc: KeyRef,
    ) -> Result<([u8; 16], [u8; 16])> {
        let fetch = |handle: KeyRef, wanted: KeyType| -> Result<[u8; 16]> {
            let obj = self.key(handle)?;
            if obj.key_type != wanted {
                return Err(Error::InvalidArgument);
            }
            match &obj.material {
                Some(KeyMaterial::Symmetric(bytes)) => bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidArgument),
                _ => Err(Error::NotFound),
            }
        };
        Ok((fetch(k, KeyType::MilenageK)?, fetch(opc, KeyType::MilenageOpc)?))
    }

    /// Resolve and vet an update-key handle for binding: it must be a
    /// `KeyUpdate` key that already has a value.
    fn checked_update_key_id(&self, update_key: KeyRef) -> Result<String> {
        let obj = self.key(update_key)?;
        if obj.key_type != KeyType::KeyUpdate || obj.material.is_none() {
            return Err(Error::InvalidArgument);
        }
        Ok(obj.id.clone())
    }

    /// Validate an authenticated command against the target's bound update
    /// key. Returns the update key's raw reference (for challenge
    /// consumption) and the command payload. Nothing is consumed here.
    fn authorize(
        &self,
        target_id: &str,
        update_key_id: &str,
        op: CommandOp,
        command: Option<&[u8]>,
    ) -> Result<(u64, Option<Vec<u8>>)> {
        let command = command.ok_or(Error::Unauthorized)?;

        // The back-reference is non-owning: the update key may have been
        // deleted since binding, which leaves the target non-updatable.
        let update_ref = *self.key_ids.get(update_key_id).ok_or(Error::Unauthorized)?;
        let update_key = self.keys.get(&update_ref).ok_or(Error::Unauthorized)?;
        let verifying = match &update_key.material {
            Some(KeyMaterial::PublicEd25519(pk)) => pk,
            _ => return Err(Error::Unauthorized),
        };

        let verified = auth::verify_command(
            command,
            verifying,
            self.challenges.get(&update_ref),
            op,
            target_id,
        )?;
        Ok((update_ref, verified.payload))
    }

    fn persist_key(&mut self, key: KeyRef) -> Result<()> {
        let obj = self.key(key)?;
        let record = KeyRecord::from_object(obj);
        let bytes = serde_json::to_vec(&record).map_err(|_| Error::Internal)?;
        let id = obj.id.clone();
        self.storage
            .put(ObjectKind::Key, &id, &bytes)
            .map_err(|_| Error::Internal)
    }

    fn persist_digest(&mut self, digest: DigestRef) -> Result<()> {
        let obj = self.digest(digest)?;
        let record = DigestRecord::from_object(obj);
        let bytes = serde_json::to_vec(&record).map_err(|_| Error::Internal)?;
        let id = obj.id.clone();
        self.storage
            .put(ObjectKind::Digest, &id, &bytes)
            .map_err(|_| Error::Internal)
    }

    fn ensure_provision_pair(&mut self) -> Result<()> {
        if self.provision_pair.is_some() {
            return Ok(());
        }
        let pair = ProvisionPair::generate();
        let secret = pair.secret_bytes();
        let bytes = serde_json::to_vec(&secret.to_vec()).map_err(|_| Error::Internal)?;
        self.storage
            .put(ObjectKind::Meta, PROVISION_KEY_RECORD, &bytes)
            .map_err(|_| Error::Internal)?;
        self.provision_pair = Some(pair);
        Ok(())
    }

    /// Reload everything the backend holds.
    fn load(&mut self) -> Result<()> {
        let key_records = self
            .storage
            .load_all(ObjectKind::Key)
            .map_err(|_| Error::Internal)?;
        for (_, bytes) in key_records {
            let record: KeyRecord =
                serde_json::from_slice(&bytes).map_err(|_| Error::Internal)?;
            let obj = record.into_object()?;
            let handle = self.alloc_ref()?;
            self.key_ids.insert(obj.id.clone(), handle.get());
            self.keys.insert(handle.get(), obj);
        }

        let digest_records = self
            .storage
            .load_all(ObjectKind::Digest)
            .map_err(|_| Error::Internal)?;
        for (_, bytes) in digest_records {
            let record: DigestRecord =
                serde_json::from_slice(&bytes).map_err(|_| Error::Internal)?;
            let obj = record.into_object();
            let handle = self.alloc_ref()?;
            self.digest_ids.insert(obj.id.clone(), handle.get());
            self.digests.insert(handle.get(), obj);
        }

        let meta = self
            .storage
            .load_all(ObjectKind::Meta)
            .map_err(|_| Error::Internal)?;
        for (id, bytes) in meta {
            match id.as_str() {
                MODULE_ID_RECORD => {
                    self.module_id =
                        Some(serde_json::from_slice(&bytes).map_err(|_| Error::Internal)?);
                }
                PROVISION_KEY_RECORD => {
                    let secret: Vec<u8> =
                        serde_json::from_slice(&bytes).map_err(|_| Error::Internal)?;
                    let secret: [u8; 32] =
                        secret.as_slice().try_into().map_err(|_| Error::Internal)?;
                    self.provision_pair = Some(ProvisionPair::from_secret_bytes(secret));
                }
                _ => {}
            }
        }

        Ok(())
    }
}
