//! Milenage authentication-vector derivation (3GPP TS 35.205/35.206).
//!
//! The f1/f1* network and re-synchronisation codes and the f2–f5/f5* key
//! derivations, built from the bare AES-128 block cipher over a subscriber
//! key K and an operator constant OPc. Both live in the registry as
//! dedicated key types; the functions here are one-shot — there is no
//! session state.
//!
//! OPc is provisioned directly; derivation from OP is the operator's
//! concern and happens off-device.

use crate::crypto::aes128_encrypt_block;
use crate::error::{Error, Result};
use crate::object::KeyRef;
use crate::registry::Keystore;

/// RAND challenge length.
pub const RAND_LEN: usize = 16;
/// Authentication management field length.
pub const AMF_LEN: usize = 2;
/// Sequence number length.
pub const SQN_LEN: usize = 6;
/// MAC-A / MAC-S length.
pub const MAC_LEN: usize = 8;
/// Authentication response length.
pub const RES_LEN: usize = 8;
/// Confidentiality key length.
pub const CK_LEN: usize = 16;
/// Integrity key length.
pub const IK_LEN: usize = 16;
/// Anonymity key length.
pub const AK_LEN: usize = 6;

/// The outputs of the f2–f5 derivation for one challenge.
pub struct MilenageKeys {
    /// Authentication response RES.
    pub res: [u8; RES_LEN],
    /// Confidentiality key CK.
    pub ck: [u8; CK_LEN],
    /// Integrity key IK.
    pub ik: [u8; IK_LEN],
    /// Anonymity key AK (f5).
    pub ak: [u8; AK_LEN],
}

fn xor16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Cyclic left rotation by a whole number of bytes. The standard's rotation
/// amounts r1..r5 are all multiples of 8 bits.
fn rot16(x: &[u8; 16], bytes: usize) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = x[(i + bytes) % 16];
    }
    out
}

/// OUT-n for n in 2..=5: E_K[rot(TEMP ⊕ OPc, r_n) ⊕ c_n] ⊕ OPc, with c_n
/// being zero except for a single low-order bit in the last byte.
fn out_n(k: &[u8; 16], opc: &[u8; 16], temp: &[u8; 16], rot_bytes: usize, c_last: u8) -> [u8; 16] {
    let mut block = rot16(&xor16(temp, opc), rot_bytes);
    block[15] ^= c_last;
    xor16(&aes128_encrypt_block(k, &block), opc)
}

/// f1 and f1*: the network (MAC-A) and re-synchronisation (MAC-S)
/// authentication codes, computed together as the two halves of OUT1.
fn f1_set(
    k: &[u8; 16],
    opc: &[u8; 16],
    rand: &[u8; 16],
    sqn: &[u8; SQN_LEN],
    amf: &[u8; AMF_LEN],
) -> ([u8; MAC_LEN], [u8; MAC_LEN]) {
    let temp = aes128_encrypt_block(k, &xor16(rand, opc));

    // IN1 = SQN || AMF || SQN || AMF
    let mut in1 = [0u8; 16];
    in1[0..6].copy_from_slice(sqn);
    in1[6..8].copy_from_slice(amf);
    in1[8..14].copy_from_slice(sqn);
    in1[14..16].copy_from_slice(amf);

    // OUT1 = E_K[TEMP ⊕ rot(IN1 ⊕ OPc, r1) ⊕ c1] ⊕ OPc, r1 = 64 bits, c1 = 0.
    let block = xor16(&temp, &rot16(&xor16(&in1, opc), 8));
    let out1 = xor16(&aes128_encrypt_block(k, &block), opc);

    let mut mac_a = [0u8; MAC_LEN];
    let mut mac_s = [0u8; MAC_LEN];
    mac_a.copy_from_slice(&out1[..8]);
    mac_s.copy_from_slice(&out1[8..]);
    (mac_a, mac_s)
}

/// f2–f5: RES, CK, IK and AK from one challenge.
fn f2345(k: &[u8; 16], opc: &[u8; 16], rand: &[u8; 16]) -> MilenageKeys {
    let temp = aes128_encrypt_block(k, &xor16(rand, opc));

    let out2 = out_n(k, opc, &temp, 0, 1); // r2 = 0,  c2 = ...01
    let out3 = out_n(k, opc, &temp, 4, 2); // r3 = 32, c3 = ...02
    let out4 = out_n(k, opc, &temp, 8, 4); // r4 = 64, c4 = ...04

    let mut keys = MilenageKeys {
        res: [0u8; RES_LEN],
        ck: out3,
        ik: out4,
        ak: [0u8; AK_LEN],
    };
    keys.res.copy_from_slice(&out2[8..]);
    keys.ak.copy_from_slice(&out2[..6]);
    keys
}

/// f5*: the anonymity key for re-synchronisation messages.
fn f5_star(k: &[u8; 16], opc: &[u8; 16], rand: &[u8; 16]) -> [u8; AK_LEN] {
    let temp = aes128_encrypt_block(k, &xor16(rand, opc));
    let out5 = out_n(k, opc, &temp, 12, 8); // r5 = 96, c5 = ...08
    let mut ak = [0u8; AK_LEN];
    ak.copy_from_slice(&out5[..6]);
    ak
}

fn check_inputs<'a>(
    rand: &'a [u8],
    amf: &'a [u8],
    sqn: &'a [u8],
) -> Result<(&'a [u8; RAND_LEN], &'a [u8; AMF_LEN], &'a [u8; SQN_LEN])> {
    let rand: &[u8; RAND_LEN] = rand.try_into().map_err(|_| Error::InvalidArgument)?;
    let amf: &[u8; AMF_LEN] = amf.try_into().map_err(|_| Error::InvalidArgument)?;
    let sqn: &[u8; SQN_LEN] = sqn.try_into().map_err(|_| Error::InvalidArgument)?;
    Ok((rand, amf, sqn))
}

impl Keystore {
    /// The network authentication code MAC-A for one challenge.
    pub fn milenage_mac_a(
        &self,
        k: KeyRef,
        opc: KeyRef,
        rand: &[u8],
        amf: &[u8],
        sqn: &[u8],
    ) -> Result<[u8; MAC_LEN]> {
        let (rand, amf, sqn) = check_inputs(rand, amf, sqn)?;
        let (k, opc) = self.registry.read().milenage_pair(k, opc)?;
        Ok(f1_set(&k, &opc, rand, sqn, amf).0)
    }

    /// The re-synchronisation authentication code MAC-S.
    pub fn milenage_mac_s(
        &self,
        k: KeyRef,
        opc: KeyRef,
        rand: &[u8],
        amf: &[u8],
        sqn: &[u8],
    ) -> Result<[u8; MAC_LEN]> {
        let (rand, amf, sqn) = check_inputs(rand, amf, sqn)?;
        let (k, opc) = self.registry.read().milenage_pair(k, opc)?;
        Ok(f1_set(&k, &opc, rand, sqn, amf).1)
    }

    /// The authentication response and derived keys for one challenge.
    pub fn milenage_keys(&self, k: KeyRef, opc: KeyRef, rand: &[u8]) -> Result<MilenageKeys> {
        let rand: &[u8; RAND_LEN] = rand.try_into().map_err(|_| Error::InvalidArgument)?;
        let (k, opc) = self.registry.read().milenage_pair(k, opc)?;
        Ok(f2345(&k, &opc, rand))
    }

    /// The anonymity key for a re-synchronisation message (f5*).
    pub fn milenage_resync_ak(&self, k: KeyRef, opc: KeyRef, rand: &[u8]) -> Result<[u8; AK_LEN]> {
        let rand: &[u8; RAND_LEN] = rand.try_into().map_err(|_| Error::InvalidArgument)?;
        let (k, opc) = self.registry.read().milenage_pair(k, opc)?;
        Ok(f5_star(&k, &opc, rand))
    }
}
