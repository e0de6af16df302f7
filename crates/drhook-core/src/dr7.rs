//! DR7 debug control word manipulation
//!
//! DR7 encodes, per slot n: a local-enable bit at `2n`, a 2-bit trigger
//! condition at `16 + 4n` and a 2-bit watch length at `18 + 4n`. All writes
//! go through [`Dr7::program_slot`] / [`Dr7::clear_slot`], which clear the
//! five bits owned by the target slot before setting new values. Bits of
//! other slots are never touched.

use drhook_common::{BreakCondition, SlotIndex, WatchLength};

/// Number of hardware breakpoint slots (DR0-DR3)
pub const SLOT_COUNT: usize = 4;

/// DR7 debug control register value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dr7(pub u64);

impl Dr7 {
    fn local_enable_bit(slot: SlotIndex) -> u64 {
        1 << (2 * slot as u32)
    }

    fn control_shift(slot: SlotIndex) -> u32 {
        16 + 4 * slot as u32
    }

    /// Mask covering the condition, length and local-enable bits of one slot
    fn slot_mask(slot: SlotIndex) -> u64 {
        (0b1111 << Self::control_shift(slot)) | Self::local_enable_bit(slot)
    }

    /// Clear the condition, length and enable bits of `slot`
    pub fn clear_slot(&mut self, slot: SlotIndex) {
        debug_assert!((slot as usize) < SLOT_COUNT);
        self.0 &= !Self::slot_mask(slot);
    }

    /// Arm `slot` with the given condition and length (clear-then-set)
    pub fn program_slot(&mut self, slot: SlotIndex, condition: BreakCondition, length: WatchLength) {
        debug_assert!((slot as usize) < SLOT_COUNT);
        self.clear_slot(slot);
        let shift = Self::control_shift(slot);
        self.0 |= condition.to_dr7_rw() << shift;
        self.0 |= length.to_dr7_len() << (shift + 2);
        self.0 |= Self::local_enable_bit(slot);
    }

    /// Whether `slot` is locally enabled
    pub fn is_enabled(&self, slot: SlotIndex) -> bool {
        self.0 & Self::local_enable_bit(slot) != 0
    }

    /// Trigger condition currently encoded for `slot`
    pub fn condition(&self, slot: SlotIndex) -> BreakCondition {
        BreakCondition::from_dr7_rw(self.0 >> Self::control_shift(slot))
    }

    /// Watch length currently encoded for `slot`
    pub fn length(&self, slot: SlotIndex) -> WatchLength {
        WatchLength::from_dr7_len(self.0 >> (Self::control_shift(slot) + 2))
    }

    pub fn bits(&self) -> u64 {
        self.0
    }
}
