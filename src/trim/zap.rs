//! Per-leaf ZAP persistence. `TrimPersistentState` is the
//! in-memory mirror of the six keys the TRIM engine commits through a
//! transaction; `persist`/`load` must round-trip as the identity on
//! `{last_offset, rate, partial, secure, action_time, state}`.

use crate::pool::leaf::{Leaf, TrimState};

pub const KEY_LAST_OFFSET: &str = "vdev_trim_last_offset";
pub const KEY_RATE: &str = "vdev_trim_rate";
pub const KEY_PARTIAL: &str = "vdev_trim_partial";
pub const KEY_SECURE: &str = "vdev_trim_secure";
pub const KEY_ACTION_TIME: &str = "vdev_trim_action_time";
pub const KEY_STATE: &str = "vdev_trim_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimPersistentState {
    pub last_offset: u64,
    pub rate: u64,
    pub partial: bool,
    pub secure: bool,
    pub action_time: u64,
    pub state: TrimState,
}

impl TrimPersistentState {
    pub fn from_leaf(leaf: &Leaf) -> Self {
        TrimPersistentState {
            last_offset: leaf.last_offset(),
            rate: leaf.rate(),
            partial: leaf.partial(),
            secure: leaf.secure(),
            action_time: leaf.action_time(),
            state: leaf.trim_state(),
        }
    }

    /// Write this snapshot to the leaf's ZAP object. Called from a
    /// sync-context callback scheduled to run at sync time.
    pub fn persist(&self, leaf: &Leaf) {
        let zap = leaf.zap();
        zap.set(KEY_LAST_OFFSET, self.last_offset);
        zap.set(KEY_RATE, self.rate);
        zap.set(KEY_PARTIAL, self.partial as u64);
        zap.set(KEY_SECURE, self.secure as u64);
        zap.set(KEY_ACTION_TIME, self.action_time);
        zap.set(KEY_STATE, self.state.as_u64());
    }

    /// Reload from the leaf's ZAP object. A missing `last_offset` key (0)
    /// means "restart".
    pub fn load(leaf: &Leaf) -> Self {
        TrimPersistentState {
            last_offset: leaf.zap().get(KEY_LAST_OFFSET).unwrap_or(0),
            rate: leaf.zap().get(KEY_RATE).unwrap_or(0),
            partial: leaf.zap().get(KEY_PARTIAL).unwrap_or(0) != 0,
            secure: leaf.zap().get(KEY_SECURE).unwrap_or(0) != 0,
            action_time: leaf.zap().get(KEY_ACTION_TIME).unwrap_or(0),
            state: TrimState::from_u64(leaf.zap().get(KEY_STATE).unwrap_or(0)),
        }
    }

    /// Apply this state back onto the leaf's in-memory fields, completing
    /// the round trip: `persist -> reload -> in-memory state` is the
    /// identity.
    pub fn apply_to(&self, leaf: &Leaf) {
        leaf.set_last_offset(self.last_offset);
        leaf.set_rate(self.rate);
        leaf.set_partial(self.partial);
        leaf.set_secure(self.secure);
        leaf.set_action_time(self.action_time);
        leaf.set_trim_state(self.state);
    }
}
