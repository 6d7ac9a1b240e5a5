//! Generational slab allocator for tree nodes.
//!
//! Slots are recycled through a freelist like a classic slab, but every slot
//! carries a generation counter that is bumped on removal. A [`NodeId`] only
//! resolves while the generation it was issued under is still current, which
//! lets queued read jobs detect that their target directory was deleted.

use std::fmt;
use std::mem;
use std::ops::{Index, IndexMut};

use super::entry::Entry;
use super::index_types::NodeId;

/// Heap-backed slab with stable, generation-checked handles.
pub struct Slab<T> {
    entries: Vec<Entry<T>>,

    /// Logical element count (occupied slots only).
    len: usize,

    /// Head of the freelist (index of the next available slot).
    next: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    /// Creates a new empty slab.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            len: 0,
            next: 0,
        }
    }

    /// Inserts a value, returning its handle.
    pub fn insert(&mut self, value: T) -> NodeId {
        let key = self.next;
        let generation = if key == self.entries.len() {
            // Appending to end
            self.entries.push(Entry::Occupied {
                generation: 0,
                value,
            });
            self.next = self.entries.len();
            0
        } else {
            // Reusing a vacant slot from the freelist
            let entry = &mut self.entries[key];
            let (next_free, generation) = match *entry {
                Entry::Vacant {
                    next_free,
                    generation,
                } => (next_free, generation),
                Entry::Occupied { .. } => unreachable!("freelist points at an occupied slot"),
            };
            *entry = Entry::Occupied { generation, value };
            self.next = next_free;
            generation
        };
        self.len += 1;
        NodeId::new(key, generation)
    }

    /// Gets a reference to the value behind `id`, if it is still alive.
    pub fn get(&self, id: NodeId) -> Option<&T> {
        match self.entries.get(id.index())? {
            Entry::Occupied { generation, value } if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    /// Gets a mutable reference to the value behind `id`, if it is still alive.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        match self.entries.get_mut(id.index())? {
            Entry::Occupied { generation, value } if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    /// Returns true if `id` still resolves.
    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Removes the value behind `id` if it is alive, returning it.
    pub fn try_remove(&mut self, id: NodeId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let vacant = Entry::Vacant {
            next_free: self.next,
            generation: id.generation().wrapping_add(1),
        };
        match mem::replace(&mut self.entries[id.index()], vacant) {
            Entry::Occupied { value, .. } => {
                self.len -= 1;
                self.next = id.index();
                Some(value)
            }
            Entry::Vacant { .. } => unreachable!("slot checked as occupied"),
        }
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the slab is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns an iterator over occupied entries.
    pub fn iter(&self) -> SlabIter<'_, T> {
        SlabIter {
            slab: self,
            index: 0,
        }
    }
}

impl<T> Index<NodeId> for Slab<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &Self::Output {
        self.get(id).expect("stale node handle")
    }
}

impl<T> IndexMut<NodeId> for Slab<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut Self::Output {
        self.get_mut(id).expect("stale node handle")
    }
}

impl<T> fmt::Debug for Slab<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("len", &self.len)
            .field("next", &self.next)
            .field("slots", &self.entries.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Slab Iterator
// ---------------------------------------------------------------------------

/// Iterator over occupied entries in a Slab.
pub struct SlabIter<'a, T> {
    slab: &'a Slab<T>,
    index: usize,
}

impl<'a, T> Iterator for SlabIter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(entry) = self.slab.entries.get(self.index) {
            let idx = self.index;
            self.index += 1;
            if let Entry::Occupied { generation, value } = entry {
                return Some((NodeId::new(idx, *generation), value));
            }
        }
        None
    }
}

impl<'a, T> IntoIterator for &'a Slab<T> {
    type Item = (NodeId, &'a T);
    type IntoIter = SlabIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_basic_operations() {
        let mut slab = Slab::<i32>::new();
        assert!(slab.is_empty());

        let idx0 = slab.insert(10);
        let idx1 = slab.insert(20);
        let idx2 = slab.insert(30);

        assert_eq!(slab.len(), 3);
        assert_eq!(slab.get(idx0), Some(&10));
        assert_eq!(slab.get(idx1), Some(&20));
        assert_eq!(slab.get(idx2), Some(&30));

        assert_eq!(slab.try_remove(idx1), Some(20));
        assert_eq!(slab.len(), 2);
        assert_eq!(slab.get(idx1), None);
        assert_eq!(slab.try_remove(idx1), None);
    }

    #[test]
    fn reused_slot_does_not_resurrect_stale_handle() {
        let mut slab = Slab::<&str>::new();
        let old = slab.insert("old");
        slab.try_remove(old);

        let new = slab.insert("new");
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert_eq!(slab.get(old), None);
        assert_eq!(slab[new], "new");
    }

    #[test]
    fn slab_iteration_skips_vacant_slots() {
        let mut slab = Slab::<i32>::new();
        let a = slab.insert(1);
        let b = slab.insert(2);
        let c = slab.insert(3);
        slab.try_remove(b);

        let items: Vec<_> = slab.iter().collect();
        assert_eq!(items, vec![(a, &1), (c, &3)]);
    }

    #[test]
    fn slab_index_access() {
        let mut slab = Slab::<&str>::new();
        let idx = slab.insert("hello");

        assert_eq!(slab[idx], "hello");
        slab[idx] = "world";
        assert_eq!(slab[idx], "world");
    }
}
