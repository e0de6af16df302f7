//! Shared types for drhook

pub mod hook;
pub mod registers;
pub mod trap;

pub use hook::{BreakCondition, HookId, HookInfo, SlotIndex, WatchLength};
pub use registers::Registers;
pub use trap::TrapContext;
