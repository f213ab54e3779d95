//! The `Arena` entity: name, lifecycle state, its own scoped broker, and
//! the per-arena flags the registry's tick and reaper consult.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use zone_broker::{Broker, ExtraDataSlots};

use crate::arena_state::ArenaState;

pub struct Arena {
    pub name: String,
    pub state: Mutex<ArenaState>,
    holds: AtomicI32,
    pub keep_alive: AtomicBool,
    /// Set by the reaper when a player is mid-entry into an arena that is
    /// closing: the arena re-creates (returns to `DoInit0`) instead of
    /// being destroyed outright.
    pub recreate_on_destroy: AtomicBool,
    pub player_count: AtomicUsize,
    pub broker: Arc<Broker>,
    pub extra: Mutex<ExtraDataSlots>,
}

impl Arena {
    pub fn new(name: impl Into<String>, global_broker: &Arc<Broker>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ArenaState::Uninitialized),
            holds: AtomicI32::new(0),
            keep_alive: AtomicBool::new(false),
            recreate_on_destroy: AtomicBool::new(false),
            player_count: AtomicUsize::new(0),
            broker: global_broker.new_child(),
            extra: Mutex::new(ExtraDataSlots::new()),
        }
    }

    pub fn add_hold(&self) {
        self.holds.fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove_hold(&self) -> bool {
        let prev = self.holds.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "remove_hold called with no outstanding holds");
        prev - 1 == 0
    }

    pub fn holds(&self) -> i32 {
        self.holds.load(Ordering::Acquire)
    }

    pub fn is_empty_of_players(&self) -> bool {
        self.player_count.load(Ordering::Acquire) == 0
    }
}
