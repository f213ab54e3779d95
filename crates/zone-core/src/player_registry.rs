//! Player Registry (C4): stable id allocation, reused only after
//! `TimeWait` clearance, plus the read-lock iteration API components use
//! to scan connected players.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use zone_broker::SlotRegistry;

use crate::player::{Player, PlayerId};
use crate::player_state::PlayerState;

/// Owns every player's identity and lifecycle state. State transitions are
/// performed by the connection orchestrator, which is expected to hold
/// this registry's write lock only for the create/destroy/transition
/// moment itself, never across a callback.
pub struct PlayerRegistry {
    slots: RwLock<Vec<Option<Arc<Player>>>>,
    free_ids: parking_lot::Mutex<Vec<PlayerId>>,
    pub extra_slots: Arc<SlotRegistry>,
}

impl PlayerRegistry {
    pub fn new(extra_slots: Arc<SlotRegistry>) -> Self {
        Self { slots: RwLock::new(Vec::new()), free_ids: parking_lot::Mutex::new(Vec::new()), extra_slots }
    }

    /// Allocate a fresh player for `endpoint`, reusing the lowest recycled
    /// id if one is available.
    pub fn allocate(&self, endpoint: SocketAddr) -> Arc<Player> {
        let recycled = self.free_ids.lock().pop();

        let mut slots = self.slots.write();
        let id = recycled.unwrap_or(slots.len() as PlayerId);
        let player = Arc::new(Player::new(id, endpoint));
        self.extra_slots.populate(&mut player.extra.lock());

        if (id as usize) < slots.len() {
            slots[id as usize] = Some(player.clone());
        } else {
            slots.push(Some(player.clone()));
        }
        player
    }

    /// Called once a player reaches `TimeWait` for a full tick: removes it
    /// from the live table and releases its id back to the free pool.
    pub fn retire(&self, id: PlayerId) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(id as usize) {
            if slot.take().is_some() {
                self.free_ids.lock().push(id);
            }
        }
    }

    pub fn get(&self, id: PlayerId) -> Option<Arc<Player>> {
        self.slots.read().get(id as usize).and_then(|slot| slot.clone())
    }

    pub fn find_by_endpoint(&self, endpoint: &SocketAddr) -> Option<Arc<Player>> {
        self.slots.read().iter().flatten().find(|p| &p.endpoint == endpoint).cloned()
    }

    /// Read-lock, iterate, unlock: the only sanctioned way to scan all
    /// connected players. `f` receives a borrowed `Arc` per player.
    pub fn for_each<F: FnMut(&Arc<Player>)>(&self, mut f: F) {
        for player in self.slots.read().iter().flatten() {
            f(player);
        }
    }

    pub fn count_in_state(&self, state: PlayerState) -> usize {
        self.slots.read().iter().flatten().filter(|p| *p.state.lock() == state).count()
    }

    pub fn len(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port)
    }

    #[test]
    fn ids_are_reused_only_after_retire() {
        let registry = PlayerRegistry::new(Arc::new(SlotRegistry::new()));
        let a = registry.allocate(addr(1));
        let b = registry.allocate(addr(2));
        assert_ne!(a.id, b.id);

        registry.retire(a.id);
        let c = registry.allocate(addr(3));
        assert_eq!(c.id, a.id, "retired id should be recycled before minting a new one");
    }

    #[test]
    fn find_by_endpoint_locates_the_right_player() {
        let registry = PlayerRegistry::new(Arc::new(SlotRegistry::new()));
        registry.allocate(addr(1));
        let target = registry.allocate(addr(2));
        let found = registry.find_by_endpoint(&addr(2)).unwrap();
        assert_eq!(found.id, target.id);
        assert!(registry.find_by_endpoint(&addr(99)).is_none());
    }

    #[test]
    fn retired_player_is_no_longer_iterated() {
        let registry = PlayerRegistry::new(Arc::new(SlotRegistry::new()));
        let a = registry.allocate(addr(1));
        registry.retire(a.id);
        let mut seen = 0;
        registry.for_each(|_| seen += 1);
        assert_eq!(seen, 0);
    }
}
