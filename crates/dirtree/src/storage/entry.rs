//! Entry enum for slab slots.

/// Internal entry representation for slab slots.
#[derive(Debug, Clone)]
pub enum Entry<T> {
    /// Slot is free; stores the next free slot and the generation the next
    /// occupant will receive.
    Vacant { next_free: usize, generation: u32 },
    /// Slot is occupied by a value issued under `generation`.
    Occupied { generation: u32, value: T },
}
