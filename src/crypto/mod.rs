//! The block encryption + authentication engine: a
//! per-dataset master-key hierarchy with HKDF-derived session keys, salt
//! rotation, AEAD encryption of leaf blocks, and a hierarchical MAC tree
//! rooted at each object-set that permits raw replication without key
//! material.

pub mod blkptr;
pub mod block;
pub mod mac;
pub mod suite;
pub mod wrap;

use aead::generic_array::GenericArray;
use aead::{AeadInPlace, KeyInit};
use aead::consts::{U12, U16};
use aes_gcm::{Aes128Gcm, Aes192Gcm, Aes256Gcm};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha512;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use suite::{Aes128Ccm, Aes192Ccm, Aes256Ccm, Suite, HMAC_KEY_LEN, IV_LEN, TAG_LEN};
use zeroize::Zeroizing;

quick_error::quick_error! {
    #[derive(Debug, PartialEq, Eq, Clone)]
    pub enum CryptoError {
        UnsupportedSuite {
            display("unsupported crypto suite")
        }
        InvalidKeyLength(expected: usize, got: usize) {
            display("invalid key length: expected {} bytes, got {}", expected, got)
        }
        Checksum {
            display("authentication failed (ECKSUM)")
        }
        Io {
            display("AEAD driver I/O error")
        }
        RandomSourceFailed {
            display("random source failed")
        }
        BadWrapVersion(v: u64) {
            display("wrapped-key record has unsupported version {}", v)
        }
    }
}

/// ZFS's `ECKSUM` isn't a POSIX errno `libc` carries; this mirrors the
/// value OpenZFS itself assigns it.
pub const ECKSUM: i32 = 50;

impl CryptoError {
    /// Maps each variant to a POSIX-ish code.
    pub fn as_errno(&self) -> i32 {
        match self {
            CryptoError::UnsupportedSuite => libc::ENOTSUP,
            CryptoError::InvalidKeyLength(..) => libc::EINVAL,
            CryptoError::Checksum => ECKSUM,
            CryptoError::Io => libc::EIO,
            CryptoError::RandomSourceFailed => libc::EIO,
            CryptoError::BadWrapVersion(_) => libc::EINVAL,
        }
    }
}

/// One opened AEAD session. Each
/// variant pairs the suite's cipher with its mode; all share the 96-bit
/// IV / 128-bit tag convention from [`suite`].
#[derive(Clone)]
pub enum Session {
    Aes128Gcm(Box<Aes128Gcm>),
    Aes192Gcm(Box<Aes192Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    Aes128Ccm(Box<Aes128Ccm>),
    Aes192Ccm(Box<Aes192Ccm>),
    Aes256Ccm(Box<Aes256Ccm>),
}

impl Session {
    pub fn open(suite: Suite, key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != suite.key_len() {
            return Err(CryptoError::InvalidKeyLength(suite.key_len(), key.len()));
        }
        Ok(match suite {
            Suite::Aes128Gcm => {
                Session::Aes128Gcm(Box::new(Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::UnsupportedSuite)?))
            },
            Suite::Aes192Gcm => {
                Session::Aes192Gcm(Box::new(Aes192Gcm::new_from_slice(key).map_err(|_| CryptoError::UnsupportedSuite)?))
            },
            Suite::Aes256Gcm => {
                Session::Aes256Gcm(Box::new(Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::UnsupportedSuite)?))
            },
            Suite::Aes128Ccm => {
                Session::Aes128Ccm(Box::new(Aes128Ccm::new_from_slice(key).map_err(|_| CryptoError::UnsupportedSuite)?))
            },
            Suite::Aes192Ccm => {
                Session::Aes192Ccm(Box::new(Aes192Ccm::new_from_slice(key).map_err(|_| CryptoError::UnsupportedSuite)?))
            },
            Suite::Aes256Ccm => {
                Session::Aes256Ccm(Box::new(Aes256Ccm::new_from_slice(key).map_err(|_| CryptoError::UnsupportedSuite)?))
            },
        })
    }

    /// Encrypt `buffer` in place, returning the 16-byte tag.
    pub fn encrypt_detached(&self, iv: &[u8; IV_LEN], aad: &[u8], buffer: &mut [u8]) -> Result<[u8; TAG_LEN], CryptoError> {
        let nonce = GenericArray::<u8, U12>::from_slice(iv);
        let tag = match self {
            Session::Aes128Gcm(c) => encrypt_with(c.as_ref(), nonce, aad, buffer),
            Session::Aes192Gcm(c) => encrypt_with(c.as_ref(), nonce, aad, buffer),
            Session::Aes256Gcm(c) => encrypt_with(c.as_ref(), nonce, aad, buffer),
            Session::Aes128Ccm(c) => encrypt_with(c.as_ref(), nonce, aad, buffer),
            Session::Aes192Ccm(c) => encrypt_with(c.as_ref(), nonce, aad, buffer),
            Session::Aes256Ccm(c) => encrypt_with(c.as_ref(), nonce, aad, buffer),
        }
        .map_err(|_| CryptoError::Io)?;
        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Decrypt `buffer` in place, verifying `tag`. On failure, `buffer`
    /// is left untouched conceptually: callers must not surface it as
    /// plaintext on `Err`.
    pub fn decrypt_detached(&self, iv: &[u8; IV_LEN], aad: &[u8], buffer: &mut [u8], tag: &[u8; TAG_LEN]) -> Result<(), CryptoError> {
        let nonce = GenericArray::<u8, U12>::from_slice(iv);
        let tag = GenericArray::<u8, U16>::from_slice(tag);
        let result = match self {
            Session::Aes128Gcm(c) => decrypt_with(c.as_ref(), nonce, aad, buffer, tag),
            Session::Aes192Gcm(c) => decrypt_with(c.as_ref(), nonce, aad, buffer, tag),
            Session::Aes256Gcm(c) => decrypt_with(c.as_ref(), nonce, aad, buffer, tag),
            Session::Aes128Ccm(c) => decrypt_with(c.as_ref(), nonce, aad, buffer, tag),
            Session::Aes192Ccm(c) => decrypt_with(c.as_ref(), nonce, aad, buffer, tag),
            Session::Aes256Ccm(c) => decrypt_with(c.as_ref(), nonce, aad, buffer, tag),
        };
        result.map_err(|_| CryptoError::Checksum)
    }
}

/// Every suite used here shares the same nonce/tag sizes — a 96-bit IV
/// and a 128-bit tag — so one generic helper dispatches the actual AEAD
/// call regardless of mode.
fn encrypt_with<C: AeadInPlace<NonceSize = U12, TagSize = U16>>(
    cipher: &C,
    nonce: &GenericArray<u8, U12>,
    aad: &[u8],
    buffer: &mut [u8],
) -> aead::Result<GenericArray<u8, U16>> {
    cipher.encrypt_in_place_detached(nonce, aad, buffer)
}

fn decrypt_with<C: AeadInPlace<NonceSize = U12, TagSize = U16>>(
    cipher: &C,
    nonce: &GenericArray<u8, U12>,
    aad: &[u8],
    buffer: &mut [u8],
    tag: &GenericArray<u8, U16>,
) -> aead::Result<()> {
    cipher.decrypt_in_place_detached(nonce, aad, buffer, tag)
}

/// HKDF-SHA512 derivation of a session key from a master key and salt:
/// `HKDF-SHA512(master, salt=salt, info="")`.
pub fn hkdf_derive_session_key(master: &[u8], salt: &[u8], out_len: usize) -> Zeroizing<Vec<u8>> {
    let hk = Hkdf::<Sha512>::new(Some(salt), master);
    let mut okm = Zeroizing::new(vec![0u8; out_len]);
    hk.expand(b"", &mut okm).expect("HKDF output length is always valid for AES key sizes");
    okm
}

struct SaltMaterial {
    salt: [u8; 8],
    derived_key: Zeroizing<Vec<u8>>,
    session: Session,
}

/// Per-encrypted-dataset master-key hierarchy.
pub struct CryptoKey {
    guid: u64,
    suite: Suite,
    version: u32,
    master_key: Zeroizing<Vec<u8>>,
    hmac_key: Zeroizing<Vec<u8>>,
    max_salt_uses: u64,
    salt_use_count: AtomicU64,
    salt: RwLock<SaltMaterial>,
}

pub const CURRENT_KEY_VERSION: u32 = 1;

impl CryptoKey {
    /// `key_init(suite, key)`.
    pub fn key_init(suite: Suite, master_key: &[u8], max_salt_uses: u64) -> Result<Self, CryptoError> {
        if master_key.len() != suite.key_len() {
            return Err(CryptoError::InvalidKeyLength(suite.key_len(), master_key.len()));
        }
        let mut rng = rand::thread_rng();
        let guid = rng.next_u64();
        let mut hmac_key = vec![0u8; HMAC_KEY_LEN];
        rng.fill_bytes(&mut hmac_key);
        let mut salt = [0u8; 8];
        rng.fill_bytes(&mut salt);

        let derived = hkdf_derive_session_key(master_key, &salt, suite.key_len());
        let session = Session::open(suite, &derived)?;

        Ok(CryptoKey {
            guid,
            suite,
            version: CURRENT_KEY_VERSION,
            master_key: Zeroizing::new(master_key.to_vec()),
            hmac_key: Zeroizing::new(hmac_key),
            max_salt_uses,
            salt_use_count: AtomicU64::new(0),
            salt: RwLock::new(SaltMaterial { salt, derived_key: derived, session }),
        })
    }

    /// Rebuilds a [`CryptoKey`] from material recovered by
    /// [`wrap::unwrap_key`]: a fresh salt is drawn immediately rather than
    /// reusing whatever salt was active when the key was wrapped.
    pub fn from_unwrapped(
        guid: u64,
        suite: Suite,
        version: u32,
        master_key: &[u8],
        hmac_key: &[u8],
        max_salt_uses: u64,
    ) -> Result<Self, CryptoError> {
        if master_key.len() != suite.key_len() {
            return Err(CryptoError::InvalidKeyLength(suite.key_len(), master_key.len()));
        }
        let mut salt = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut salt);
        let derived = hkdf_derive_session_key(master_key, &salt, suite.key_len());
        let session = Session::open(suite, &derived)?;

        Ok(CryptoKey {
            guid,
            suite,
            version,
            master_key: Zeroizing::new(master_key.to_vec()),
            hmac_key: Zeroizing::new(hmac_key.to_vec()),
            max_salt_uses,
            salt_use_count: AtomicU64::new(0),
            salt: RwLock::new(SaltMaterial { salt, derived_key: derived, session }),
        })
    }

    pub fn guid(&self) -> u64 { self.guid }

    pub fn suite(&self) -> Suite { self.suite }

    pub fn version(&self) -> u32 { self.version }

    pub fn hmac_key(&self) -> &[u8] { &self.hmac_key }

    pub fn master_key(&self) -> &[u8] { &self.master_key }

    pub fn current_salt(&self) -> [u8; 8] { self.salt.read().unwrap().salt }

    pub fn salt_use_count(&self) -> u64 { self.salt_use_count.load(Ordering::Acquire) }

    /// `key_get_salt`: atomically read the current salt
    /// and bump the use counter; rotate to a fresh salt once the bound is
    /// reached so the *next* caller observes a new salt.
    pub fn get_salt(&self) -> [u8; 8] {
        let salt = self.salt.read().unwrap().salt;
        let count = self.salt_use_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.max_salt_uses {
            self.rotate_salt();
        }
        salt
    }

    fn rotate_salt(&self) {
        let mut guard = self.salt.write().unwrap();
        let mut salt = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut salt);
        let derived = hkdf_derive_session_key(&self.master_key, &salt, self.suite.key_len());
        let session = match Session::open(self.suite, &derived) {
            Ok(s) => s,
            Err(_) => return, // suite/key length already validated at key_init time
        };
        *guard = SaltMaterial { salt, derived_key: derived, session };
        self.salt_use_count.store(0, Ordering::Release);
    }

    /// Session for a given salt: the cached
    /// session if it matches, otherwise a one-shot derivation.
    fn session_for_salt(&self, salt: &[u8; 8]) -> Result<Session, CryptoError> {
        let guard = self.salt.read().unwrap();
        if guard.salt == *salt {
            return Ok(guard.session.clone());
        }
        drop(guard);
        let derived = hkdf_derive_session_key(&self.master_key, salt, self.suite.key_len());
        Session::open(self.suite, &derived)
    }
}
