//! Stand-in for the pool's sysevent stream: the TRIM and
//! crypto engines post one event per state transition plus a one-line
//! `slog` history record. The real kernel event mechanism is out of
//! scope; this is just enough structure for callers and
//! tests to observe that a transition happened.

use slog::{info, Logger};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TrimStateChanged { leaf_guid: u64, from: String, to: String },
    SaltRotated { dataset_guid: u64, use_count: u64 },
    KeyInitialized { dataset_guid: u64 },
}

/// A process-wide (per `PoolContext`) append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self { EventLog::default() }

    pub fn push(&self, logger: &Logger, event: Event) {
        info!(logger, "state transition"; "event" => format!("{:?}", event));
        self.events.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> { self.events.lock().unwrap().clone() }
}
