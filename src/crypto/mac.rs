//! Object-set authentication and the indirect-block MAC
//! tree. Both portable and local MACs are HMAC-SHA-512
//! truncated to 32 bytes; the indirect-block tree uses plain SHA-512 so
//! it can be verified without the master key.

use crate::crypto::CryptoKey;
use hmac::{Hmac, Mac as HmacTrait};
use sha2::{Digest, Sha512};

type HmacSha512 = Hmac<Sha512>;

/// Bits of `os_flags` that travel with `zfs send`.
pub const OS_PORTABLE_FLAGS_MASK: u64 = 0x0000_0000_FFFF_FFFF;
/// The complement: accounting-related flags, local only.
pub const OS_LOCAL_FLAGS_MASK: u64 = !OS_PORTABLE_FLAGS_MASK;

fn hmac_truncated32(key: &[u8], segments: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts any key length");
    for seg in segments {
        mac.update(seg);
    }
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&full[..32]);
    out
}

/// One block pointer's contribution to a meta-dnode's portable MAC
/// input: its stored MAC plus the portable subset of `blk_prop`.
#[derive(Debug, Clone)]
pub struct BlockPointerMacInput {
    pub mac: [u8; 16],
    pub portable_blk_prop: u64,
}

/// The fields of an object-set phys block the portable/local MACs
/// authenticate. The real meta-dnode/accounting-dnode
/// layouts are out of scope; only the byte material that
/// feeds the MAC is modeled.
#[derive(Debug, Clone)]
pub struct ObjectSetMeta {
    pub os_type: u64,
    pub os_flags: u64,
    /// The meta-dnode's "core" fields (everything but block pointers).
    pub meta_dnode_core: Vec<u8>,
    pub meta_dnode_bps: Vec<BlockPointerMacInput>,
    /// Accounting dnodes (user/group/project) actually allocated.
    pub accounting_dnodes: Vec<Vec<u8>>,
    /// If user-accounting is marked incomplete, the local MAC is zero,
    /// and likewise if the required dnodes are absent for the advertised
    /// version.
    pub accounting_complete: bool,
}

/// Portable MAC: sendable with `zfs send`.
pub fn portable_mac(key: &CryptoKey, meta: &ObjectSetMeta) -> [u8; 32] {
    let os_type = meta.os_type.to_le_bytes();
    let flags = (meta.os_flags & OS_PORTABLE_FLAGS_MASK).to_le_bytes();
    let mut segments: Vec<&[u8]> = vec![&os_type, &flags, &meta.meta_dnode_core];
    let mut bp_bufs = Vec::with_capacity(meta.meta_dnode_bps.len());
    for bp in &meta.meta_dnode_bps {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&bp.mac);
        buf.extend_from_slice(&bp.portable_blk_prop.to_le_bytes());
        bp_bufs.push(buf);
    }
    for buf in &bp_bufs {
        segments.push(buf);
    }
    hmac_truncated32(key.hmac_key(), &segments)
}

/// Local MAC: never sent, covers user/group/project
/// accounting. Zero if accounting is incomplete.
pub fn local_mac(key: &CryptoKey, meta: &ObjectSetMeta) -> [u8; 32] {
    if !meta.accounting_complete {
        return [0u8; 32];
    }
    let flags = (meta.os_flags & OS_LOCAL_FLAGS_MASK).to_le_bytes();
    let mut segments: Vec<&[u8]> = vec![&flags];
    for dn in &meta.accounting_dnodes {
        segments.push(dn);
    }
    hmac_truncated32(key.hmac_key(), &segments)
}

/// One non-leaf (indirect) block's children, for the indirect-block MAC
/// tree: authenticated by plain SHA-512 over the
/// children's MACs plus their portable `blk_prop` bits, so it can be
/// verified without the master key.
pub fn indirect_block_mac(children: &[BlockPointerMacInput]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    for child in children {
        hasher.update(child.mac);
        hasher.update(child.portable_blk_prop.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::suite::Suite;

    fn key() -> CryptoKey { CryptoKey::key_init(Suite::Aes256Gcm, &[3u8; 32], 400_000_000).unwrap() }

    fn sample_meta(complete: bool) -> ObjectSetMeta {
        ObjectSetMeta {
            os_type: 2,
            os_flags: 0xFFFF_FFFF_0000_0001,
            meta_dnode_core: vec![0xAB; 64],
            meta_dnode_bps: vec![BlockPointerMacInput { mac: [1u8; 16], portable_blk_prop: 0x1234 }],
            accounting_dnodes: vec![vec![0xCD; 32]],
            accounting_complete: complete,
        }
    }

    #[test]
    fn portable_mac_is_deterministic_and_order_sensitive() {
        let key = key();
        let meta = sample_meta(true);
        let a = portable_mac(&key, &meta);
        let b = portable_mac(&key, &meta);
        assert_eq!(a, b);

        let mut meta2 = meta.clone();
        meta2.os_type = 3;
        assert_ne!(portable_mac(&key, &meta), portable_mac(&key, &meta2));
    }

    #[test]
    fn local_mac_excludes_portable_flag_bits() {
        let key = key();
        let mut meta = sample_meta(true);
        // Flipping a portable-only bit must not change the local MAC.
        let base = local_mac(&key, &meta);
        meta.os_flags ^= 0x0000_0000_0000_0002;
        assert_eq!(local_mac(&key, &meta), base);
    }

    #[test]
    fn incomplete_accounting_yields_zero_local_mac() {
        let key = key();
        let meta = sample_meta(false);
        assert_eq!(local_mac(&key, &meta), [0u8; 32]);
    }

    #[test]
    fn indirect_block_mac_does_not_need_the_key() {
        let children =
            vec![BlockPointerMacInput { mac: [9u8; 16], portable_blk_prop: 7 }, BlockPointerMacInput { mac: [8u8; 16], portable_blk_prop: 9 }];
        let a = indirect_block_mac(&children);
        let b = indirect_block_mac(&children);
        assert_eq!(a, b);
    }
}
