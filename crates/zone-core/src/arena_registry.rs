//! Arena Registry & Scheduler (C5): find-or-create by name, the periodic
//! state tick that drives every arena's lifecycle one step at a time, and
//! the reaper that closes empty arenas (with "resurrect" support for an
//! arena a player is mid-entry into).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use zone_broker::{Broker, SlotRegistry};

use crate::arena::Arena;
use crate::arena_state::{ArenaAction, ArenaState};

pub struct ArenaRegistry {
    arenas: RwLock<HashMap<String, Arc<Arena>>>,
    global_broker: Arc<Broker>,
    pub extra_slots: Arc<SlotRegistry>,
}

impl ArenaRegistry {
    pub fn new(global_broker: Arc<Broker>, extra_slots: Arc<SlotRegistry>) -> Self {
        Self { arenas: RwLock::new(HashMap::new()), global_broker, extra_slots }
    }

    /// Look up an arena by its full name (base + number, per
    /// `zone_proto::create_arena_name`), creating it in `Uninitialized` if
    /// it doesn't exist yet. The scheduler's tick drives it through
    /// `DoInit0` onward on subsequent ticks.
    pub fn find_or_create(&self, full_name: &str) -> Arc<Arena> {
        if let Some(arena) = self.arenas.read().get(full_name) {
            return arena.clone();
        }
        let mut table = self.arenas.write();
        table
            .entry(full_name.to_string())
            .or_insert_with(|| {
                let arena = Arc::new(Arena::new(full_name, &self.global_broker));
                self.extra_slots.populate(&mut arena.extra.lock());
                *arena.state.lock() = ArenaState::DoInit0;
                arena
            })
            .clone()
    }

    pub fn find(&self, full_name: &str) -> Option<Arc<Arena>> {
        self.arenas.read().get(full_name).cloned()
    }

    pub fn for_each<F: FnMut(&Arc<Arena>)>(&self, mut f: F) {
        for arena in self.arenas.read().values() {
            f(arena);
        }
    }

    /// Advance every arena one lifecycle step. Called by the mainloop at
    /// its arena-tick interval (default 20 ms).
    pub fn tick_all(&self) {
        let arenas: Vec<Arc<Arena>> = self.arenas.read().values().cloned().collect();
        for arena in arenas {
            self.step(&arena);
        }
        self.collect_destroyed();
    }

    fn step(&self, arena: &Arc<Arena>) {
        let current = *arena.state.lock();
        let next = match current {
            ArenaState::DoInit0 => {
                arena.broker.invoke_callback(&ArenaAction::PreCreate);
                Some(ArenaState::WaitHolds0)
            }
            ArenaState::WaitHolds0 => {
                if arena.holds() == 0 {
                    debug!(arena = %arena.name, "attaching configured modules");
                    Some(ArenaState::DoInit1)
                } else {
                    None
                }
            }
            ArenaState::DoInit1 => {
                arena.broker.invoke_callback(&ArenaAction::Create);
                Some(ArenaState::WaitHolds1)
            }
            ArenaState::WaitHolds1 => {
                if arena.holds() == 0 {
                    Some(ArenaState::DoInit2)
                } else {
                    None
                }
            }
            // No persistence backend is wired into this build, so the
            // optional sync waits complete on the tick after entry.
            ArenaState::DoInit2 => Some(ArenaState::Running),
            ArenaState::WaitSync1 => Some(ArenaState::Running),
            ArenaState::Running => None,
            ArenaState::Closing => Some(ArenaState::DoWriteData),
            ArenaState::DoWriteData => Some(ArenaState::DoDestroy1),
            ArenaState::WaitSync2 => Some(ArenaState::DoDestroy1),
            ArenaState::DoDestroy1 => {
                arena.broker.invoke_callback(&ArenaAction::Destroy);
                Some(ArenaState::WaitHolds2)
            }
            ArenaState::WaitHolds2 => {
                if arena.holds() == 0 {
                    Some(ArenaState::DoDestroy2)
                } else {
                    None
                }
            }
            ArenaState::DoDestroy2 => {
                arena.broker.invoke_callback(&ArenaAction::PostDestroy);
                if arena.recreate_on_destroy.swap(false, std::sync::atomic::Ordering::AcqRel) {
                    info!(arena = %arena.name, "recycling arena back to DoInit0");
                    Some(ArenaState::DoInit0)
                } else {
                    Some(ArenaState::Destroyed)
                }
            }
            ArenaState::Destroyed | ArenaState::Uninitialized => None,
        };
        if let Some(next) = next {
            *arena.state.lock() = next;
        }
    }

    fn collect_destroyed(&self) {
        let destroyed: Vec<String> = self
            .arenas
            .read()
            .iter()
            .filter(|(_, a)| *a.state.lock() == ArenaState::Destroyed)
            .map(|(name, _)| name.clone())
            .collect();
        if destroyed.is_empty() {
            return;
        }
        let mut table = self.arenas.write();
        for name in destroyed {
            table.remove(&name);
        }
    }

    /// Mark empty, non-`keep_alive` arenas for teardown. A player currently
    /// mid-entry into a closing arena "resurrects" it: the arena is
    /// flagged to return to `DoInit0` once `DoDestroy2` completes instead
    /// of being destroyed outright.
    pub fn reap(&self, arena_has_entering_player: impl Fn(&str) -> bool) {
        let arenas: Vec<Arc<Arena>> = self.arenas.read().values().cloned().collect();
        for arena in arenas {
            let mut state = arena.state.lock();
            if *state == ArenaState::Running
                && arena.is_empty_of_players()
                && !arena.keep_alive.load(std::sync::atomic::Ordering::Acquire)
            {
                *state = ArenaState::Closing;
                info!(arena = %arena.name, "reaper closing idle arena");
            }
            let closing_or_later = matches!(
                *state,
                ArenaState::Closing
                    | ArenaState::DoWriteData
                    | ArenaState::WaitSync2
                    | ArenaState::DoDestroy1
                    | ArenaState::WaitHolds2
                    | ArenaState::DoDestroy2
            );
            if closing_or_later && arena_has_entering_player(&arena.name) {
                arena.recreate_on_destroy.store(true, std::sync::atomic::Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ArenaRegistry {
        ArenaRegistry::new(Broker::new_global(), Arc::new(SlotRegistry::new()))
    }

    #[test]
    fn new_arena_reaches_running_after_enough_ticks() {
        let registry = registry();
        let arena = registry.find_or_create("duel3");
        for _ in 0..8 {
            registry.tick_all();
        }
        assert_eq!(*arena.state.lock(), ArenaState::Running);
    }

    #[test]
    fn wait_holds0_blocks_progress_until_hold_released() {
        let registry = registry();
        let arena = registry.find_or_create("duel3");
        registry.tick_all(); // DoInit0 -> WaitHolds0
        assert_eq!(*arena.state.lock(), ArenaState::WaitHolds0);
        arena.add_hold();
        registry.tick_all();
        assert_eq!(*arena.state.lock(), ArenaState::WaitHolds0, "must not advance while held");
        arena.remove_hold();
        registry.tick_all();
        assert_eq!(*arena.state.lock(), ArenaState::DoInit1);
    }

    #[test]
    fn reaper_closes_empty_non_keep_alive_arena() {
        let registry = registry();
        let arena = registry.find_or_create("duel3");
        *arena.state.lock() = ArenaState::Running;
        registry.reap(|_| false);
        assert_eq!(*arena.state.lock(), ArenaState::Closing);
    }

    #[test]
    fn keep_alive_arena_survives_the_reaper() {
        let registry = registry();
        let arena = registry.find_or_create("(public)0");
        *arena.state.lock() = ArenaState::Running;
        arena.keep_alive.store(true, std::sync::atomic::Ordering::Release);
        registry.reap(|_| false);
        assert_eq!(*arena.state.lock(), ArenaState::Running);
    }

    #[test]
    fn entering_player_resurrects_a_closing_arena() {
        let registry = registry();
        let arena = registry.find_or_create("duel3");
        *arena.state.lock() = ArenaState::Closing;
        registry.reap(|name| name == "duel3");
        assert!(arena.recreate_on_destroy.load(std::sync::atomic::Ordering::Acquire));

        for _ in 0..5 {
            registry.tick_all();
        }
        assert_eq!(*arena.state.lock(), ArenaState::DoInit0, "arena recycles instead of being destroyed");
        assert!(registry.find("duel3").is_some(), "recycled arena is not removed from the table");
    }
}
