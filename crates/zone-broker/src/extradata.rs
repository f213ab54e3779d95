//! Typed extra-data slots, shared by the player registry and the arena
//! registry: storage indexed by slot id with a type witness at the call
//! site, so unrelated modules can attach their own per-player or per-arena
//! data without a central struct listing every field.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A typed handle to one slot. Carries no data of its own — `T` only marks
/// what [`ExtraDataSlots::get`]/`get_mut` should downcast to.
pub struct Key<T> {
    id: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Key<T> {}

impl<T> Key<T> {
    fn new(id: u32) -> Self {
        Self { id, _marker: PhantomData }
    }
}

/// Per-entity storage: one slot per live [`Key`], densely indexed by slot
/// id. Every player and every arena owns one of these.
#[derive(Default)]
pub struct ExtraDataSlots {
    slots: Vec<Option<Box<dyn Any + Send + Sync>>>,
}

impl ExtraDataSlots {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn get<T: 'static>(&self, key: Key<T>) -> Option<&T> {
        self.slots.get(key.id as usize)?.as_ref()?.downcast_ref::<T>()
    }

    pub fn get_mut<T: 'static>(&mut self, key: Key<T>) -> Option<&mut T> {
        self.slots.get_mut(key.id as usize)?.as_mut()?.downcast_mut::<T>()
    }

    fn ensure_len(&mut self, len: usize) {
        while self.slots.len() < len {
            self.slots.push(None);
        }
    }

    fn set(&mut self, id: u32, value: Box<dyn Any + Send + Sync>) {
        self.ensure_len(id as usize + 1);
        self.slots[id as usize] = Some(value);
    }

    fn clear(&mut self, id: u32) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = None;
        }
    }
}

type Ctor = Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

struct SlotEntry {
    ctor: Ctor,
}

/// Tracks which slot ids are live and how to default-construct each one.
/// Shared by every entity of a given kind (all players, or all arenas);
/// each entity's own data lives in its own [`ExtraDataSlots`].
pub struct SlotRegistry {
    entries: Mutex<Vec<Option<SlotEntry>>>,
    free_ids: Mutex<Vec<u32>>,
    next_id: AtomicU32,
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()), free_ids: Mutex::new(Vec::new()), next_id: AtomicU32::new(0) }
    }

    /// Allocate a new slot for `T`, back-filling every currently-live entity
    /// in `existing` with a freshly constructed default value.
    pub fn allocate<'a, T, I>(&self, existing: I) -> Key<T>
    where
        T: Default + Send + Sync + 'static,
        I: IntoIterator<Item = &'a mut ExtraDataSlots>,
    {
        let id = {
            let mut free = self.free_ids.lock();
            free.pop().unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::Relaxed))
        };
        let ctor: Ctor = Arc::new(|| Box::new(T::default()) as Box<dyn Any + Send + Sync>);

        let mut entries = self.entries.lock();
        while entries.len() <= id as usize {
            entries.push(None);
        }
        entries[id as usize] = Some(SlotEntry { ctor: ctor.clone() });
        drop(entries);

        for slots in existing {
            slots.set(id, ctor());
        }

        Key::new(id)
    }

    /// Remove the slot from every live entity and recycle its id. Dropping
    /// each boxed value runs that value's destructor exactly once.
    pub fn free<'a, T, I>(&self, key: Key<T>, existing: I)
    where
        T: 'static,
        I: IntoIterator<Item = &'a mut ExtraDataSlots>,
    {
        {
            let mut entries = self.entries.lock();
            if let Some(slot) = entries.get_mut(key.id as usize) {
                *slot = None;
            }
        }
        self.free_ids.lock().push(key.id);
        for slots in existing {
            slots.clear(key.id);
        }
    }

    /// Populate a freshly created entity's slots with default values for
    /// every slot currently allocated.
    pub fn populate(&self, slots: &mut ExtraDataSlots) {
        let entries = self.entries.lock();
        for (id, entry) in entries.iter().enumerate() {
            if let Some(entry) = entry {
                slots.set(id as u32, (entry.ctor)());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, PartialEq, Debug)]
    struct Score(u32);

    #[test]
    fn allocate_backfills_existing_entities() {
        let registry = SlotRegistry::new();
        let mut alice = ExtraDataSlots::new();
        let mut bob = ExtraDataSlots::new();

        let key = registry.allocate::<Score, _>([&mut alice, &mut bob]);
        assert_eq!(alice.get(key), Some(&Score(0)));
        assert_eq!(bob.get(key), Some(&Score(0)));
    }

    #[test]
    fn populate_fills_new_entity_with_live_slots() {
        let registry = SlotRegistry::new();
        let key = registry.allocate::<Score, _>(std::iter::empty());

        let mut charlie = ExtraDataSlots::new();
        registry.populate(&mut charlie);
        assert_eq!(charlie.get(key), Some(&Score(0)));

        if let Some(slot) = charlie.get_mut(key) {
            slot.0 = 7;
        }
        assert_eq!(charlie.get(key), Some(&Score(7)));
    }

    #[test]
    fn free_removes_slot_from_every_entity_and_recycles_id() {
        let registry = SlotRegistry::new();
        let mut alice = ExtraDataSlots::new();
        let key = registry.allocate::<Score, _>([&mut alice]);
        registry.free(key, [&mut alice]);
        assert_eq!(alice.get(key), None);

        #[derive(Default)]
        struct Other(u8);
        let key2 = registry.allocate::<Other, _>(std::iter::empty());
        // ids are dense/recycled: the freed Score slot's id comes back.
        let mut dana = ExtraDataSlots::new();
        registry.populate(&mut dana);
        assert!(dana.get(key2).is_some());
    }
}
