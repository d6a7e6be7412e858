/// Allocates and recycles generation-checked `u32` slot indices.
///
/// Backs every handle-indexed registry. Freed indices are recycled on
/// subsequent allocations, and each free bumps the slot's generation so a
/// handle minted before the free no longer validates.
///
/// # Example
///
/// ```ignore
/// let mut alloc = SlotAllocator::with_capacity(16);
/// let a = alloc.alloc()?;        // index 0, generation 0
/// alloc.free(a.index);           // generation of slot 0 becomes 1
/// let b = alloc.alloc()?;        // index 0, generation 1
/// assert!(!alloc.is_live(a));
/// ```
pub struct SlotAllocator {
    free_list: Vec<u32>,
    generations: Vec<u32>,
    live: Vec<bool>,
    len: u32,
    capacity: u32,
}

/// An allocated slot: index plus the generation it was allocated under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub index: u32,
    pub generation: u32,
}

impl SlotAllocator {
    /// Create an allocator that hands out at most `capacity` live slots
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            free_list: Vec::new(),
            generations: Vec::new(),
            live: Vec::new(),
            len: 0,
            capacity,
        }
    }

    /// Allocate the next available slot index
    ///
    /// Returns `None` when `capacity` slots are already live.
    pub fn alloc(&mut self) -> Option<SlotId> {
        if self.len >= self.capacity {
            return None;
        }
        self.len += 1;

        let index = self.free_list.pop().unwrap_or_else(|| {
            self.generations.push(0);
            self.live.push(false);
            (self.generations.len() - 1) as u32
        });
        self.live[index as usize] = true;

        Some(SlotId {
            index,
            generation: self.generations[index as usize],
        })
    }

    /// Return a slot index to the pool for reuse
    pub fn free(&mut self, index: u32) {
        let i = index as usize;
        debug_assert!(i < self.live.len() && self.live[i], "freeing an unallocated slot: {}", index);
        if i >= self.live.len() || !self.live[i] {
            return;
        }
        self.live[i] = false;
        self.generations[i] = self.generations[i].wrapping_add(1);
        self.len -= 1;
        self.free_list.push(index);
    }

    /// Whether `slot` is still the live occupant of its index
    pub fn is_live(&self, slot: SlotId) -> bool {
        let i = slot.index as usize;
        i < self.live.len() && self.live[i] && self.generations[i] == slot.generation
    }

    /// Highest index ever allocated + 1.
    ///
    /// This is the minimum length the backing storage must have
    /// to accommodate all allocated indices.
    pub fn high_water_mark(&self) -> u32 {
        self.generations.len() as u32
    }

    /// Number of currently allocated slots
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether no slots are currently allocated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::with_capacity(u32::MAX)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "slot_allocator_tests.rs"]
mod tests;
