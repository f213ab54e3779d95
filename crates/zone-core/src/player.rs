//! The `Player` entity: identity, lifecycle state, and the extra-data
//! slots external components attach scratch storage to.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use zone_broker::ExtraDataSlots;
use zone_proto::PlayerFlags;

use crate::player_state::PlayerState;

pub type PlayerId = u32;

/// Maximum encoded length of a name or squad, including the null
/// terminator, in the default (non-Unicode) wire encoding.
pub const MAX_NAME_LEN: usize = 24;

pub struct Player {
    pub id: PlayerId,
    pub endpoint: SocketAddr,
    pub name: Mutex<Option<String>>,
    pub squad: Mutex<Option<String>>,
    pub state: Mutex<PlayerState>,
    pub arena: Mutex<Option<String>>,
    holds: AtomicI32,
    flags: Mutex<PlayerFlags>,
    pub extra: Mutex<ExtraDataSlots>,
}

impl Player {
    pub fn new(id: PlayerId, endpoint: SocketAddr) -> Self {
        Self {
            id,
            endpoint,
            name: Mutex::new(None),
            squad: Mutex::new(None),
            state: Mutex::new(PlayerState::Uninitialized),
            arena: Mutex::new(None),
            holds: AtomicI32::new(0),
            flags: Mutex::new(PlayerFlags::empty()),
            extra: Mutex::new(ExtraDataSlots::new()),
        }
    }

    pub fn flags(&self) -> PlayerFlags {
        *self.flags.lock()
    }

    pub fn set_flag(&self, flag: PlayerFlags) {
        self.flags.lock().insert(flag);
    }

    pub fn clear_flag(&self, flag: PlayerFlags) {
        self.flags.lock().remove(flag);
    }

    pub fn has_flag(&self, flag: PlayerFlags) -> bool {
        self.flags.lock().contains(flag)
    }

    pub fn add_hold(&self) {
        self.holds.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one hold. Returns `true` if the hold count reached zero as a
    /// result — the caller should check whether the player's current state
    /// is hold-gated and advance it if so.
    pub fn remove_hold(&self) -> bool {
        let prev = self.holds.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "remove_hold called with no outstanding holds");
        prev - 1 == 0
    }

    pub fn holds(&self) -> i32 {
        self.holds.load(Ordering::Acquire)
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let mut name = name.into();
        name.truncate(MAX_NAME_LEN - 1);
        *self.name.lock() = Some(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 7000)
    }

    #[test]
    fn holds_reach_zero_only_after_every_add_is_matched() {
        let player = Player::new(1, addr());
        player.add_hold();
        player.add_hold();
        assert!(!player.remove_hold());
        assert!(player.remove_hold());
    }

    #[test]
    fn long_names_are_truncated_to_the_encoded_limit() {
        let player = Player::new(1, addr());
        player.set_name("x".repeat(100));
        assert_eq!(player.name.lock().as_ref().unwrap().len(), MAX_NAME_LEN - 1);
    }

    #[test]
    fn flags_start_clear_and_toggle_independently() {
        let player = Player::new(1, addr());
        assert!(!player.has_flag(PlayerFlags::IS_DEAD));
        player.set_flag(PlayerFlags::IS_DEAD);
        player.set_flag(PlayerFlags::AUTHENTICATED);
        assert!(player.has_flag(PlayerFlags::IS_DEAD));
        player.clear_flag(PlayerFlags::IS_DEAD);
        assert!(!player.has_flag(PlayerFlags::IS_DEAD));
        assert!(player.has_flag(PlayerFlags::AUTHENTICATED));
    }
}
