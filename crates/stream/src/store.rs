use mapstream_common::LocalOffset;

use crate::coords::{self, RingSlot};

/// Fixed-capacity 3D ring of window slots.
///
/// Always holds exactly `size^3` slots. An empty slot is the absence
/// sentinel: the portion is out of the map, not loaded yet, or evicted.
/// Addressing with an offset beyond the radius is a programming error and
/// panics.
#[derive(Debug, Clone)]
pub struct PortionStore<T> {
    limit: u32,
    slots: Vec<Option<T>>,
}

impl<T> PortionStore<T> {
    /// Create an empty store for a window of radius `limit`.
    pub fn new(limit: u32) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(coords::window_capacity(limit), || None);
        Self { limit, slots }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// `size^3`, independent of how many slots are occupied.
    pub fn total_capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a value.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn get(&self, offset: LocalOffset) -> Option<&T> {
        self.slots[self.index(offset)].as_ref()
    }

    pub fn get_mut(&mut self, offset: LocalOffset) -> Option<&mut T> {
        let index = self.index(offset);
        self.slots[index].as_mut()
    }

    /// Overwrite a slot, returning what it held before.
    pub fn set(&mut self, offset: LocalOffset, value: Option<T>) -> Option<T> {
        let index = self.index(offset);
        std::mem::replace(&mut self.slots[index], value)
    }

    /// Empty a slot, returning what it held.
    pub fn take(&mut self, offset: LocalOffset) -> Option<T> {
        let index = self.index(offset);
        self.slots[index].take()
    }

    /// Move the content of `from` into `to`, leaving `from` empty.
    /// Whatever `to` held is returned.
    pub fn slide(&mut self, from: LocalOffset, to: LocalOffset) -> Option<T> {
        let moved = self.take(from);
        self.set(to, moved)
    }

    /// Occupied slots with their offsets, in ring-slot order.
    pub fn iter(&self) -> impl Iterator<Item = (LocalOffset, &T)> {
        let limit = self.limit;
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            let value = slot.as_ref()?;
            let offset = coords::from_ring_slot(RingSlot(i), limit)?;
            Some((offset, value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (LocalOffset, &mut T)> {
        let limit = self.limit;
        self.slots.iter_mut().enumerate().filter_map(move |(i, slot)| {
            let value = slot.as_mut()?;
            let offset = coords::from_ring_slot(RingSlot(i), limit)?;
            Some((offset, value))
        })
    }

    /// Empty every slot, returning the values that were held.
    pub fn drain(&mut self) -> Vec<(LocalOffset, T)> {
        let limit = self.limit;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| {
                let value = slot.take()?;
                let offset = coords::from_ring_slot(RingSlot(i), limit)?;
                Some((offset, value))
            })
            .collect()
    }

    fn index(&self, offset: LocalOffset) -> usize {
        match coords::to_ring_slot(offset, self.limit) {
            Ok(slot) => slot.0,
            Err(e) => panic!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_is_full_of_absence() {
        let store: PortionStore<u32> = PortionStore::new(1);
        assert_eq!(store.total_capacity(), 27);
        assert_eq!(store.occupied(), 0);
        assert!(store.get(LocalOffset::ZERO).is_none());
    }

    #[test]
    fn set_get_and_replace() {
        let mut store = PortionStore::new(2);
        let at = LocalOffset::new(-2, 1, 2);
        assert_eq!(store.set(at, Some("a")), None);
        assert_eq!(store.get(at), Some(&"a"));
        assert_eq!(store.set(at, None), Some("a"));
        assert_eq!(store.total_capacity(), 125);
        assert_eq!(store.occupied(), 0);
    }

    #[test]
    fn slide_moves_and_leaves_source_empty() {
        let mut store = PortionStore::new(1);
        let from = LocalOffset::new(1, 0, 0);
        let to = LocalOffset::new(0, 0, 0);
        store.set(from, Some(10));
        store.set(to, Some(20));
        assert_eq!(store.slide(from, to), Some(20));
        assert_eq!(store.get(to), Some(&10));
        assert!(store.get(from).is_none());
    }

    #[test]
    fn iter_reports_offsets() {
        let mut store = PortionStore::new(1);
        store.set(LocalOffset::new(1, 1, 1), Some('z'));
        store.set(LocalOffset::new(-1, -1, -1), Some('a'));
        let items: Vec<_> = store.iter().collect();
        assert_eq!(
            items,
            vec![
                (LocalOffset::new(-1, -1, -1), &'a'),
                (LocalOffset::new(1, 1, 1), &'z')
            ]
        );
        let drained = store.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(store.occupied(), 0);
    }

    #[test]
    #[should_panic(expected = "exceeds streaming radius")]
    fn out_of_radius_access_fails_fast() {
        let store: PortionStore<u8> = PortionStore::new(1);
        store.get(LocalOffset::new(2, 0, 0));
    }
}
