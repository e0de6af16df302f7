//! Register Accessor
//!
//! The only component that touches a thread's debug-register state. Every
//! operation is a fresh read or write of the OS-owned snapshot; nothing is
//! cached between calls. Arm/disarm helpers perform the slot-granular
//! read-modify-write so callers never manipulate DR7 bits directly.

use crate::dr7::{Dr7, SLOT_COUNT};
use drhook_common::{BreakCondition, Result, SlotIndex, WatchLength};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;

/// Copy of one thread's debug-register state (DR0-DR3 + DR7)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugRegisters {
    /// Breakpoint address slots DR0-DR3
    pub dr: [u64; SLOT_COUNT],
    /// Debug control word
    pub dr7: Dr7,
}

/// Access to a thread's debug-register snapshot.
///
/// Implementations resolve the thread id per call and must release any
/// acquired handle on every exit path. No internal retries; callers decide
/// retry policy.
pub trait DebugRegisterAccess: Send + Sync {
    /// Read a fresh copy of the thread's debug registers
    fn read(&self, thread_id: u32) -> Result<DebugRegisters>;

    /// Write the thread's debug registers
    fn write(&self, thread_id: u32, regs: &DebugRegisters) -> Result<()>;
}

/// Arm one slot on `thread_id` with a breakpoint at `address`.
///
/// Read-modify-write at slot granularity: the slot's condition, length and
/// enable bits are cleared before the new values are OR-ed in, so other
/// slots' bits are never disturbed.
pub fn arm_slot(
    accessor: &dyn DebugRegisterAccess,
    thread_id: u32,
    slot: SlotIndex,
    address: u64,
    condition: BreakCondition,
    length: WatchLength,
) -> Result<()> {
    let mut regs = accessor.read(thread_id)?;
    regs.dr[slot as usize] = address;
    regs.dr7.program_slot(slot, condition, length);
    accessor.write(thread_id, &regs)?;
    trace!(
        thread_id,
        slot,
        address = format!("{:#x}", address),
        "Armed breakpoint slot"
    );
    Ok(())
}

/// Disarm one slot on `thread_id`, clearing its address and enable bit.
pub fn disarm_slot(
    accessor: &dyn DebugRegisterAccess,
    thread_id: u32,
    slot: SlotIndex,
) -> Result<()> {
    let mut regs = accessor.read(thread_id)?;
    regs.dr[slot as usize] = 0;
    regs.dr7.clear_slot(slot);
    accessor.write(thread_id, &regs)?;
    trace!(thread_id, slot, "Disarmed breakpoint slot");
    Ok(())
}

/// In-memory debug-register store keyed by thread id.
///
/// Stands in for the OS thread context in tests and on non-Windows hosts;
/// threads that were never written read back as all-zero registers.
#[derive(Default)]
pub struct InMemoryAccessor {
    threads: Mutex<HashMap<u32, DebugRegisters>>,
}

impl InMemoryAccessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebugRegisterAccess for InMemoryAccessor {
    fn read(&self, thread_id: u32) -> Result<DebugRegisters> {
        let threads = self
            .threads
            .lock()
            .map_err(|e| drhook_common::Error::Internal(format!("Lock error: {}", e)))?;
        Ok(threads.get(&thread_id).copied().unwrap_or_default())
    }

    fn write(&self, thread_id: u32, regs: &DebugRegisters) -> Result<()> {
        let mut threads = self
            .threads
            .lock()
            .map_err(|e| drhook_common::Error::Internal(format!("Lock error: {}", e)))?;
        threads.insert(thread_id, *regs);
        Ok(())
    }
}

#[cfg(all(windows, target_arch = "x86_64"))]
pub use os::ThreadContextAccessor;

#[cfg(all(windows, target_arch = "x86_64"))]
mod os {
    use super::{DebugRegisterAccess, DebugRegisters};
    use crate::dr7::Dr7;
    use drhook_common::{Error, Result};
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::{
        GetThreadContext, SetThreadContext, CONTEXT, CONTEXT_FLAGS,
    };
    use windows::Win32::System::Threading::{
        GetCurrentThread, GetCurrentThreadId, OpenThread, THREAD_ALL_ACCESS,
    };

    /// CONTEXT_DEBUG_REGISTERS for AMD64
    const CONTEXT_DEBUG_REGISTERS: u32 = 0x0010_0000 | 0x0000_0010;

    /// Thread handle that is closed on drop.
    ///
    /// The pseudo-handle for the calling thread is not owned and never closed.
    struct ThreadHandle {
        handle: HANDLE,
        owned: bool,
    }

    impl ThreadHandle {
        fn open(thread_id: u32) -> Result<Self> {
            if thread_id == unsafe { GetCurrentThreadId() } {
                return Ok(Self {
                    handle: unsafe { GetCurrentThread() },
                    owned: false,
                });
            }

            let handle = unsafe { OpenThread(THREAD_ALL_ACCESS, false, thread_id) }.map_err(
                |e| Error::HandleAcquisition {
                    thread_id,
                    message: e.to_string(),
                },
            )?;
            Ok(Self {
                handle,
                owned: true,
            })
        }

        fn raw(&self) -> HANDLE {
            self.handle
        }
    }

    impl Drop for ThreadHandle {
        fn drop(&mut self) {
            if self.owned {
                unsafe {
                    let _ = CloseHandle(self.handle);
                }
            }
        }
    }

    /// Accessor backed by GetThreadContext/SetThreadContext with the
    /// debug-registers context subset.
    pub struct ThreadContextAccessor;

    impl DebugRegisterAccess for ThreadContextAccessor {
        fn read(&self, thread_id: u32) -> Result<DebugRegisters> {
            let handle = ThreadHandle::open(thread_id)?;

            let mut context = CONTEXT {
                ContextFlags: CONTEXT_FLAGS(CONTEXT_DEBUG_REGISTERS),
                ..Default::default()
            };
            unsafe { GetThreadContext(handle.raw(), &mut context) }.map_err(|e| {
                Error::ContextRead {
                    thread_id,
                    message: e.to_string(),
                }
            })?;

            Ok(DebugRegisters {
                dr: [context.Dr0, context.Dr1, context.Dr2, context.Dr3],
                dr7: Dr7(context.Dr7),
            })
        }

        fn write(&self, thread_id: u32, regs: &DebugRegisters) -> Result<()> {
            let handle = ThreadHandle::open(thread_id)?;

            // Only the debug-register subset is written; Dr6 is reset so a
            // stale breakpoint status cannot leak into the next trap.
            let mut context = CONTEXT {
                ContextFlags: CONTEXT_FLAGS(CONTEXT_DEBUG_REGISTERS),
                ..Default::default()
            };
            context.Dr0 = regs.dr[0];
            context.Dr1 = regs.dr[1];
            context.Dr2 = regs.dr[2];
            context.Dr3 = regs.dr[3];
            context.Dr6 = 0;
            context.Dr7 = regs.dr7.bits();

            unsafe { SetThreadContext(handle.raw(), &context) }.map_err(|e| {
                Error::ContextWrite {
                    thread_id,
                    message: e.to_string(),
                }
            })?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_read_unknown_thread_is_zeroed() {
        let accessor = InMemoryAccessor::new();
        let regs = accessor.read(42).unwrap();
        assert_eq!(regs, DebugRegisters::default());
    }

    #[test]
    fn test_in_memory_write_then_read() {
        let accessor = InMemoryAccessor::new();
        let mut regs = DebugRegisters::default();
        regs.dr[1] = 0xDEAD_BEEF;
        regs.dr7.program_slot(1, BreakCondition::ReadWrite, WatchLength::Dword);
        accessor.write(7, &regs).unwrap();
        assert_eq!(accessor.read(7).unwrap(), regs);
        // Other threads unaffected
        assert_eq!(accessor.read(8).unwrap(), DebugRegisters::default());
    }

    #[test]
    fn test_arm_slot_writes_address_and_control() {
        let accessor = InMemoryAccessor::new();
        arm_slot(
            &accessor,
            1,
            2,
            0x140001000,
            BreakCondition::ReadWrite,
            WatchLength::Dword,
        )
        .unwrap();

        let regs = accessor.read(1).unwrap();
        assert_eq!(regs.dr[2], 0x140001000);
        assert!(regs.dr7.is_enabled(2));
        assert_eq!(regs.dr7.condition(2), BreakCondition::ReadWrite);
        assert_eq!(regs.dr7.length(2), WatchLength::Dword);
    }

    #[test]
    fn test_disarm_slot_full_round_trip() {
        let accessor = InMemoryAccessor::new();
        arm_slot(
            &accessor,
            1,
            1,
            0x401000,
            BreakCondition::ReadWrite,
            WatchLength::Dword,
        )
        .unwrap();
        disarm_slot(&accessor, 1, 1).unwrap();

        // No residual bits after the round trip
        let regs = accessor.read(1).unwrap();
        assert_eq!(regs, DebugRegisters::default());
    }

    #[test]
    fn test_arm_preserves_other_slots() {
        let accessor = InMemoryAccessor::new();
        arm_slot(
            &accessor,
            1,
            1,
            0x1000,
            BreakCondition::ReadWrite,
            WatchLength::Dword,
        )
        .unwrap();
        arm_slot(
            &accessor,
            1,
            2,
            0x2000,
            BreakCondition::Write,
            WatchLength::Byte,
        )
        .unwrap();
        disarm_slot(&accessor, 1, 2).unwrap();

        let regs = accessor.read(1).unwrap();
        assert_eq!(regs.dr[1], 0x1000);
        assert!(regs.dr7.is_enabled(1));
        assert_eq!(regs.dr[2], 0);
        assert!(!regs.dr7.is_enabled(2));
    }
}
