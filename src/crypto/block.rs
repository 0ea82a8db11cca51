//! Per-block encryption: `do_crypt` partitions a
//! block's bytes into an authenticated-only region (AAD) and a
//! ciphertext region according to its object type, then drives one AEAD
//! call over them.
//!
//! The real DMU/ZIL/dnode wire layouts are external collaborators;
//! record and slot boundaries are supplied by the caller (the ZVOL
//! engine's ZIL path, or the object-set layer) rather than parsed from
//! raw bytes here.

use crate::crypto::{CryptoError, CryptoKey};
use crate::pool::context::PoolContext;
use rand::RngCore;

/// One intent-log record's boundaries within the block, after the
/// 128-byte chain header (the first 128 bytes are authenticated-only).
/// `header_len` bytes of AAD precede `payload_len` bytes of ciphertext;
/// `trailer_len` further bytes (embedded block pointers, for
/// `TX_WRITE`/`TX_CLONE_RANGE`) are AAD again.
#[derive(Debug, Clone, Copy)]
pub struct LogRecordLayout {
    pub header_len: usize,
    pub payload_len: usize,
    pub trailer_len: usize,
}

impl LogRecordLayout {
    pub fn total_len(&self) -> usize { self.header_len + self.payload_len + self.trailer_len }
}

/// One dnode slot's layout: the first 64 bytes and all block-pointer
/// slots are AAD; the bonus buffer is encrypted.
#[derive(Debug, Clone, Copy)]
pub struct DnodeSlotLayout {
    pub core_len: usize,
    pub bptrs_len: usize,
    pub bonus_len: usize,
    pub bonus_encrypted: bool,
    pub allocated: bool,
}

impl DnodeSlotLayout {
    pub fn total_len(&self) -> usize { self.core_len + self.bptrs_len + self.bonus_len }
}

/// `dn_flags`'s offset and width within the core, and the mask of bits
/// that survive a raw send (everything else is a local accounting flag
/// and must not be authenticated).
const DNODE_FLAGS_OFFSET: usize = 8;
const DNODE_CRYPT_PORTABLE_FLAGS_MASK: u8 = 0b0000_0100; // DNODE_FLAG_SPILL_BLKPTR

/// `dn_used`'s offset and width within the core: local space accounting,
/// zeroed before authentication so it can't pin the dnode block's MAC to
/// a point-in-time usage count.
const DNODE_USED_OFFSET: usize = 32;
const DNODE_USED_LEN: usize = 8;

/// Masks `dn_flags` down to its portable bits and zeroes `dn_used` in a
/// scratch copy of a slot's core bytes, leaving the caller's buffer
/// untouched.
fn masked_dnode_core(core: &[u8]) -> Vec<u8> {
    let mut masked = core.to_vec();
    if let Some(flags) = masked.get_mut(DNODE_FLAGS_OFFSET) {
        *flags &= DNODE_CRYPT_PORTABLE_FLAGS_MASK;
    }
    if masked.len() >= DNODE_USED_OFFSET + DNODE_USED_LEN {
        masked[DNODE_USED_OFFSET..DNODE_USED_OFFSET + DNODE_USED_LEN].fill(0);
    }
    masked
}

/// Which partitioning rule this block's object type applies.
pub enum ObjectType {
    /// Entire payload encrypted, no AAD.
    Ordinary,
    /// Intent-log block: `header_len` bytes of chain-header AAD followed
    /// by a sequence of records.
    IntentLog { chain_header_len: usize, records: Vec<LogRecordLayout> },
    /// Dnode block: a sequence of fixed-size slots.
    Dnode { slots: Vec<DnodeSlotLayout> },
}

struct Partition {
    aad: Vec<u8>,
    /// Byte ranges of `data` that are ciphertext, in order. Concatenated
    /// they form the one contiguous buffer handed to the AEAD call.
    cipher_ranges: Vec<std::ops::Range<usize>>,
}

fn partition(object_type: &ObjectType, data: &[u8]) -> Partition {
    match object_type {
        ObjectType::Ordinary => Partition { aad: Vec::new(), cipher_ranges: vec![0..data.len()] },
        ObjectType::IntentLog { chain_header_len, records } => {
            let mut aad = Vec::new();
            let mut cipher_ranges = Vec::new();
            let mut offset = 0usize;
            aad.extend_from_slice(&data[offset..offset + chain_header_len]);
            offset += chain_header_len;
            for rec in records {
                aad.extend_from_slice(&data[offset..offset + rec.header_len]);
                offset += rec.header_len;
                if rec.payload_len > 0 {
                    cipher_ranges.push(offset..offset + rec.payload_len);
                }
                offset += rec.payload_len;
                aad.extend_from_slice(&data[offset..offset + rec.trailer_len]);
                offset += rec.trailer_len;
            }
            Partition { aad, cipher_ranges }
        },
        ObjectType::Dnode { slots } => {
            let mut aad = Vec::new();
            let mut cipher_ranges = Vec::new();
            let mut offset = 0usize;
            for slot in slots {
                aad.extend_from_slice(&masked_dnode_core(&data[offset..offset + slot.core_len]));
                let bptrs_start = offset + slot.core_len;
                aad.extend_from_slice(&data[bptrs_start..bptrs_start + slot.bptrs_len]);
                let bonus_start = bptrs_start + slot.bptrs_len;
                if slot.allocated && slot.bonus_encrypted && slot.bonus_len > 0 {
                    cipher_ranges.push(bonus_start..bonus_start + slot.bonus_len);
                }
                offset += slot.total_len();
            }
            Partition { aad, cipher_ranges }
        },
    }
}

fn gather(data: &[u8], ranges: &[std::ops::Range<usize>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ranges.iter().map(|r| r.len()).sum());
    for r in ranges {
        buf.extend_from_slice(&data[r.clone()]);
    }
    buf
}

fn scatter(data: &mut [u8], ranges: &[std::ops::Range<usize>], buf: &[u8]) {
    let mut pos = 0;
    for r in ranges {
        let len = r.len();
        data[r.clone()].copy_from_slice(&buf[pos..pos + len]);
        pos += len;
    }
}

/// `do_crypt`. On encrypt, `salt`/`iv`/`mac` are filled
/// in as out-parameters (salt from [`CryptoKey::get_salt`], IV randomly
/// generated); on decrypt they are supplied by the caller from the block
/// pointer. Returns `was_noop = true` when there was no ciphertext to
/// produce (e.g. a dnode block with every slot unallocated, or a ZIL
/// block that was entirely AAD).
pub fn do_crypt(
    ctx: &PoolContext,
    key: &CryptoKey,
    encrypt: bool,
    object_type: &ObjectType,
    salt: &mut [u8; 8],
    iv: &mut [u8; 12],
    mac: &mut [u8; 16],
    data: &mut [u8],
) -> Result<bool, CryptoError> {
    let part = partition(object_type, data);

    if encrypt {
        *salt = key.get_salt();
        rand::thread_rng().fill_bytes(iv);
    }

    if part.cipher_ranges.is_empty() {
        if encrypt {
            *mac = [0u8; 16];
        }
        return Ok(true);
    }

    let session = key.session_for_salt(salt)?;

    if encrypt {
        let mut scratch = gather(data, &part.cipher_ranges);
        let tag = session.encrypt_detached(iv, &part.aad, &mut scratch)?;
        scatter(data, &part.cipher_ranges, &scratch);
        *mac = tag;
        Ok(false)
    } else {
        let mut scratch = gather(data, &part.cipher_ranges);
        match session.decrypt_detached(iv, &part.aad, &mut scratch, mac) {
            Ok(()) => {
                scatter(data, &part.cipher_ranges, &scratch);
                Ok(false)
            },
            Err(e) => {
                ctx.record_failed_decrypt(&scratch);
                Err(e)
            },
        }
    }
}
