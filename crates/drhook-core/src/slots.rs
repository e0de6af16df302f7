//! Hardware breakpoint slot allocator
//!
//! Slot 0 is permanently reserved for debugger/host use and never handed
//! out. Allocation always picks the lowest free index so behavior is
//! deterministic.

use crate::dr7::SLOT_COUNT;
use drhook_common::{Error, Result, SlotIndex};

/// First slot available to user hooks; slot 0 stays reserved
pub const FIRST_USER_SLOT: SlotIndex = 1;

/// Allocator for the non-reserved hardware breakpoint slots
#[derive(Debug)]
pub struct SlotAllocator {
    in_use: [bool; SLOT_COUNT],
    capacity: usize,
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotAllocator {
    /// Allocator over all non-reserved slots (1..=3)
    pub fn new() -> Self {
        Self::with_capacity(SLOT_COUNT - FIRST_USER_SLOT as usize)
    }

    /// Allocator limited to the first `capacity` non-reserved slots
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(SLOT_COUNT - FIRST_USER_SLOT as usize);
        Self {
            in_use: [false; SLOT_COUNT],
            capacity,
        }
    }

    /// Number of allocatable slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently allocated
    pub fn allocated(&self) -> usize {
        self.in_use.iter().filter(|&&used| used).count()
    }

    /// Allocate the lowest free slot
    pub fn allocate(&mut self) -> Result<SlotIndex> {
        let first = FIRST_USER_SLOT as usize;
        for slot in first..first + self.capacity {
            if !self.in_use[slot] {
                self.in_use[slot] = true;
                return Ok(slot as SlotIndex);
            }
        }
        Err(Error::CapacityExceeded)
    }

    /// Release a slot. Releasing a free or reserved slot is a no-op.
    pub fn release(&mut self, slot: SlotIndex) {
        let slot = slot as usize;
        if slot >= FIRST_USER_SLOT as usize && slot < SLOT_COUNT {
            self.in_use[slot] = false;
        }
    }
}
