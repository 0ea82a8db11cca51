//! The process-wide context object the design notes call
//! for in place of free-floating mutable globals like the original's
//! `g_fd`, `g_refcount`, or `failed_decrypt_buf`. Every engine is handed
//! an `Arc<PoolContext>` at construction instead of reaching for statics.

use crate::log::Logger as GlobalLogger;
use crate::pool::events::EventLog;
use crate::pool::txg::TxgManager;
use crate::tunables::Tunables;
use slog::Logger;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct PoolContext {
    pub name: String,
    pub tunables: Tunables,
    pub txg: TxgManager,
    pub events: EventLog,
    pub logger: Logger,
    guid_seq: AtomicU64,
    /// Debug buffer for the last failed decrypt attempt: copies the
    /// ciphertext into a best-effort single slot, replacing a
    /// free-floating global.
    failed_decrypt_buf: Mutex<Option<Vec<u8>>>,
}

impl PoolContext {
    pub fn new(name: impl Into<String>, tunables: Tunables) -> Self {
        let name = name.into();
        let logger = GlobalLogger::global().new(slog::o!("pool" => name.clone()));
        PoolContext {
            name,
            tunables,
            txg: TxgManager::new(),
            events: EventLog::new(),
            logger,
            guid_seq: AtomicU64::new(1),
            failed_decrypt_buf: Mutex::new(None),
        }
    }

    /// Deterministic-for-tests GUID allocator; real pools draw these from
    /// a CSPRNG, which is a concern of the (out-of-scope) pool substrate.
    pub fn next_guid(&self) -> u64 { self.guid_seq.fetch_add(1, Ordering::Relaxed) }

    pub fn record_failed_decrypt(&self, ciphertext: &[u8]) {
        *self.failed_decrypt_buf.lock().unwrap() = Some(ciphertext.to_vec());
    }

    pub fn last_failed_decrypt(&self) -> Option<Vec<u8>> {
        self.failed_decrypt_buf.lock().unwrap().clone()
    }
}
