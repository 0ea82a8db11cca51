//! Block-pointer encoding of crypto metadata: an
//! encrypted block's salt, IV and MAC ride along in fields a plaintext
//! block pointer would otherwise use for the third DVA and the upper
//! checksum words. All of it is fixed little-endian on disk, independent
//! of host byte order.

/// The subset of a block pointer's words this module rewrites. The real
/// block-pointer layout (DVAs, birth txg, level, type, ...) is an
/// external collaborator; only the crypto-relevant words
/// are modeled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CryptoBlockPointerWords {
    /// `DVA[2].word[0]`: the salt.
    pub dva2_word0: u64,
    /// `DVA[2].word[1]`: the low 8 bytes of the IV.
    pub dva2_word1: u64,
    /// `blk_fill`'s upper 32 bits carry the IV's remaining 4 bytes; the
    /// lower 32 bits keep their ordinary fill-count meaning.
    pub blk_fill: u64,
    /// `checksum.word[2]` and `checksum.word[3]`: the 16-byte MAC.
    pub checksum_word2: u64,
    pub checksum_word3: u64,
}

/// Packs salt/IV/MAC into block-pointer words.
pub fn encode(salt: &[u8; 8], iv: &[u8; 12], mac: &[u8; 16], fill_count: u32) -> CryptoBlockPointerWords {
    let dva2_word0 = u64::from_le_bytes(*salt);
    let mut iv_lo = [0u8; 8];
    iv_lo.copy_from_slice(&iv[0..8]);
    let dva2_word1 = u64::from_le_bytes(iv_lo);
    let mut iv_hi = [0u8; 4];
    iv_hi.copy_from_slice(&iv[8..12]);
    let iv_hi = u32::from_le_bytes(iv_hi);
    let blk_fill = (u64::from(iv_hi) << 32) | u64::from(fill_count);

    let mut mac_lo = [0u8; 8];
    mac_lo.copy_from_slice(&mac[0..8]);
    let mut mac_hi = [0u8; 8];
    mac_hi.copy_from_slice(&mac[8..16]);

    CryptoBlockPointerWords {
        dva2_word0,
        dva2_word1,
        blk_fill,
        checksum_word2: u64::from_le_bytes(mac_lo),
        checksum_word3: u64::from_le_bytes(mac_hi),
    }
}

/// The inverse of [`encode`]: recovers salt/IV/MAC plus the plain fill
/// count that was packed alongside the IV's upper bytes.
pub fn decode(words: &CryptoBlockPointerWords) -> ([u8; 8], [u8; 12], [u8; 16], u32) {
    let salt = words.dva2_word0.to_le_bytes();

    let mut iv = [0u8; 12];
    iv[0..8].copy_from_slice(&words.dva2_word1.to_le_bytes());
    let iv_hi = (words.blk_fill >> 32) as u32;
    iv[8..12].copy_from_slice(&iv_hi.to_le_bytes());
    let fill_count = words.blk_fill as u32;

    let mut mac = [0u8; 16];
    mac[0..8].copy_from_slice(&words.checksum_word2.to_le_bytes());
    mac[8..16].copy_from_slice(&words.checksum_word3.to_le_bytes());

    (salt, iv, mac, fill_count)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_salt_iv_mac_and_fill_count() {
        let salt = [1, 2, 3, 4, 5, 6, 7, 8];
        let iv = [10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21];
        let mac = [0xAAu8; 16];
        let fill_count = 0x0102_0304u32;

        let words = encode(&salt, &iv, &mac, fill_count);
        let (d_salt, d_iv, d_mac, d_fill) = decode(&words);

        assert_eq!(d_salt, salt);
        assert_eq!(d_iv, iv);
        assert_eq!(d_mac, mac);
        assert_eq!(d_fill, fill_count);
    }

    #[test]
    fn fill_count_and_iv_high_bytes_share_blk_fill_without_colliding() {
        let words = encode(&[0u8; 8], &[0xFFu8; 12], &[0u8; 16], 0xFFFF_FFFF);
        let (_, iv, _, fill_count) = decode(&words);
        assert_eq!(iv, [0xFFu8; 12]);
        assert_eq!(fill_count, 0xFFFF_FFFF);
    }

    #[test]
    fn encoding_is_independent_of_host_byte_order_representation() {
        // The packed words are defined purely in terms of to_le_bytes /
        // from_le_bytes, so the same inputs always produce the same
        // words regardless of the host's native endianness.
        let words_a = encode(&[9u8; 8], &[7u8; 12], &[5u8; 16], 42);
        let words_b = encode(&[9u8; 8], &[7u8; 12], &[5u8; 16], 42);
        assert_eq!(words_a, words_b);
    }
}
