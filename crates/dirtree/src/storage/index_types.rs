//! Node handle types.

use std::fmt;

/// A stable handle to a node in a [`super::Slab`].
///
/// The slot index is paired with the generation of the slot at insertion
/// time. Once a node is removed its slot generation is bumped, so handles
/// kept by observers or queued jobs stop resolving even if the slot is
/// reused for a new node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Creates a handle from a slot index and generation.
    ///
    /// # Panics
    /// Panics if `index >= u32::MAX`.
    #[inline]
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        assert!(
            index < u32::MAX as usize,
            "node index must be less than u32::MAX"
        );
        Self {
            index: index as u32,
            generation,
        }
    }

    /// Returns the slot index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Returns the slot generation this handle was issued for.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_slot_and_generation() {
        let a = NodeId::new(7, 0);
        let b = NodeId::new(7, 1);
        assert_ne!(a, b);
        assert_eq!(a.index(), b.index());
        assert_eq!(format!("{b:?}"), "NodeId(7v1)");
    }
}
