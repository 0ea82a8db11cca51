//! Master-key wrap/unwrap: encrypts a dataset's
//! master key + HMAC key under a wrapping key derived from the user's
//! passphrase/keyfile, so it can be stored on disk or sent over the
//! network without ever exposing the raw key material.

use crate::crypto::suite::Suite;
use crate::crypto::{CryptoError, CryptoKey, Session};
use rand::RngCore;

/// A wrapped master-key record: `(crypto-suite, version,
/// wrapping IV, MAC, wrapped-master-bytes, wrapped-HMAC-bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub suite: Suite,
    pub version: u32,
    pub guid: u64,
    pub iv: [u8; 12],
    pub mac: [u8; 16],
    pub wrapped_master: Vec<u8>,
    pub wrapped_hmac: Vec<u8>,
}

fn wrap_aad(guid: u64, suite: Suite, version: u32) -> [u8; 24] {
    let mut aad = [0u8; 24];
    aad[0..8].copy_from_slice(&guid.to_le_bytes());
    aad[8..16].copy_from_slice(&suite.as_u64().to_le_bytes());
    aad[16..24].copy_from_slice(&(version as u64).to_le_bytes());
    aad
}

/// `key_wrap(wrapping_key, key)`.
pub fn wrap_key(wrapping_key: &[u8], key: &CryptoKey) -> Result<WrappedKey, CryptoError> {
    let session = Session::open(key.suite(), wrapping_key)?;
    let mut iv = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut iv);
    let aad = wrap_aad(key.guid(), key.suite(), key.version());

    let mut plaintext = Vec::with_capacity(key.master_key().len() + key.hmac_key().len());
    plaintext.extend_from_slice(key.master_key());
    plaintext.extend_from_slice(key.hmac_key());

    let mac = session.encrypt_detached(&iv, &aad, &mut plaintext)?;
    let master_len = key.master_key().len();
    let wrapped_master = plaintext[..master_len].to_vec();
    let wrapped_hmac = plaintext[master_len..].to_vec();

    Ok(WrappedKey { suite: key.suite(), version: key.version(), guid: key.guid(), iv, mac, wrapped_master, wrapped_hmac })
}

/// `key_unwrap`: the inverse of [`wrap_key`]. Rejects
/// any record whose version isn't 0 or 1; version 0 is
/// the legacy on-disk encoding and is accepted but not rewritten (see
/// DESIGN.md's decision on the matching open question).
pub fn unwrap_key(wrapping_key: &[u8], wrapped: &WrappedKey, max_salt_uses: u64) -> Result<CryptoKey, CryptoError> {
    if wrapped.version != 0 && wrapped.version != 1 {
        return Err(CryptoError::BadWrapVersion(wrapped.version as u64));
    }
    let session = Session::open(wrapped.suite, wrapping_key)?;
    let aad = wrap_aad(wrapped.guid, wrapped.suite, wrapped.version);

    let mut ciphertext = Vec::with_capacity(wrapped.wrapped_master.len() + wrapped.wrapped_hmac.len());
    ciphertext.extend_from_slice(&wrapped.wrapped_master);
    ciphertext.extend_from_slice(&wrapped.wrapped_hmac);

    session.decrypt_detached(&wrapped.iv, &aad, &mut ciphertext, &wrapped.mac)?;

    let master_len = wrapped.wrapped_master.len();
    let master_key = &ciphertext[..master_len];
    CryptoKey::from_unwrapped(wrapped.guid, wrapped.suite, wrapped.version, master_key, &ciphertext[master_len..], max_salt_uses)
}
