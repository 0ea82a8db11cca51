//! The AEAD suite table: three master-key sizes, two
//! modes each, all with a 96-bit IV and a 128-bit tag.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{Aes128Gcm, Aes192Gcm, Aes256Gcm};
use ccm::consts::{U12, U16};
use ccm::Ccm;

pub type Aes128Ccm = Ccm<Aes128, U16, U12>;
pub type Aes192Ccm = Ccm<Aes192, U16, U12>;
pub type Aes256Ccm = Ccm<Aes256, U16, U12>;

/// Every suite uses this IV and tag length.
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// HMAC-SHA-512 key length used for the non-encrypted-metadata
/// authentication tag.
pub const HMAC_KEY_LEN: usize = 64;

/// Crypto suite id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suite {
    Aes128Ccm,
    Aes128Gcm,
    Aes192Ccm,
    Aes192Gcm,
    Aes256Ccm,
    Aes256Gcm,
}

impl Suite {
    pub fn key_len(self) -> usize {
        match self {
            Suite::Aes128Ccm | Suite::Aes128Gcm => 16,
            Suite::Aes192Ccm | Suite::Aes192Gcm => 24,
            Suite::Aes256Ccm | Suite::Aes256Gcm => 32,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Suite::Aes128Ccm => 0,
            Suite::Aes128Gcm => 1,
            Suite::Aes192Ccm => 2,
            Suite::Aes192Gcm => 3,
            Suite::Aes256Ccm => 4,
            Suite::Aes256Gcm => 5,
        }
    }

    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Suite::Aes128Ccm),
            1 => Some(Suite::Aes128Gcm),
            2 => Some(Suite::Aes192Ccm),
            3 => Some(Suite::Aes192Gcm),
            4 => Some(Suite::Aes256Ccm),
            5 => Some(Suite::Aes256Gcm),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn suite_id_round_trips() {
        for s in [
            Suite::Aes128Ccm,
            Suite::Aes128Gcm,
            Suite::Aes192Ccm,
            Suite::Aes192Gcm,
            Suite::Aes256Ccm,
            Suite::Aes256Gcm,
        ] {
            assert_eq!(Suite::from_u64(s.as_u64()), Some(s));
        }
        assert_eq!(Suite::from_u64(99), None);
    }

    #[test]
    fn key_lengths_match_suite_table() {
        assert_eq!(Suite::Aes128Gcm.key_len(), 16);
        assert_eq!(Suite::Aes192Ccm.key_len(), 24);
        assert_eq!(Suite::Aes256Gcm.key_len(), 32);
    }
}
