//! Crate-level error aggregation. Each engine keeps its own error enum
//! (`trim::TrimError`, `zvol::ZvolError`, `crypto::CryptoError`), the way
//! `zfs::Error` and `zpool::ZpoolError` stay separate in libzetta; this
//! unifies them for callers that span more than one engine, the way
//! `delegating.rs` unifies `zfs`/`zpool` results.

use crate::crypto::CryptoError;
use crate::trim::TrimError;
use crate::zvol::ZvolError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

quick_error::quick_error! {
    #[derive(Debug, PartialEq, Eq, Clone)]
    pub enum Error {
        Trim(err: TrimError) {
            display("trim engine error: {}", err)
            from()
        }
        Zvol(err: ZvolError) {
            display("zvol engine error: {}", err)
            from()
        }
        Crypto(err: CryptoError) {
            display("crypto engine error: {}", err)
            from()
        }
    }
}

impl Error {
    /// POSIX-ish code surfaced at the API.
    pub fn as_errno(&self) -> i32 {
        match self {
            Error::Trim(e) => e.as_errno(),
            Error::Zvol(e) => e.as_errno(),
            Error::Crypto(e) => e.as_errno(),
        }
    }
}
