//! Exception dispatcher
//!
//! Classifies hardware traps, matches them to registered hooks and drives
//! the disarm → invoke → re-arm protocol. [`dispatch_trap`] is the full
//! state machine over a captured [`TrapFrame`]; the Windows half installs a
//! process-wide vectored exception handler that feeds it.

use crate::registry::{DispatchCompletion, HookRegistry};
use drhook_common::{Registers, TrapContext};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace, warn};

/// Exception code for CPU single-step / hardware breakpoint traps
pub const EXCEPTION_SINGLE_STEP: u32 = 0x8000_0004;

/// Resume flag (RF) in RFLAGS. Set in the saved context so the OS does not
/// immediately re-raise the instruction breakpoint when execution resumes.
pub const RFLAGS_RESUME_FLAG: u64 = 1 << 16;

/// Trap state captured from the OS exception record and thread context
#[derive(Debug, Clone)]
pub struct TrapFrame {
    pub exception_code: u32,
    pub thread_id: u32,
    /// Instruction pointer at trap time; matched against hook addresses
    pub instruction_pointer: u64,
    /// Faulting address from the exception record
    pub exception_address: u64,
    /// Exception-specific parameter count
    pub parameter_count: u32,
    /// Saved register snapshot; the resume flag is set here on a handled trap
    pub registers: Registers,
}

/// How the dispatcher answered a trap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapDisposition {
    /// A hook matched and was dispatched; suppress further exception search
    Handled,
    /// Not ours; let the OS continue the handler search
    PassedThrough,
}

/// Dispatch one trap against the registry.
///
/// Unrelated exception codes and unmatched traps pass through with every
/// hook's slot state untouched. On a match the hook's slot is disarmed
/// before the callback runs, so a recursive hit on the same address inside
/// the callback finds nothing and passes through. The trap is reported
/// handled whenever a match was dispatched, regardless of callback outcome.
pub fn dispatch_trap(registry: &HookRegistry, frame: &mut TrapFrame) -> TrapDisposition {
    if frame.exception_code != EXCEPTION_SINGLE_STEP {
        return TrapDisposition::PassedThrough;
    }

    // Fast read-locked classification; the expected path for unrelated
    // single-step traps and not an error.
    if registry
        .find_by_trap(frame.thread_id, frame.instruction_pointer)
        .is_none()
    {
        trace!(
            thread_id = frame.thread_id,
            ip = format!("{:#x}", frame.instruction_pointer),
            "Single-step trap matched no hook"
        );
        return TrapDisposition::PassedThrough;
    }

    // Revalidates under the write lock and disarms the slot. Losing the race
    // with a concurrent unregister demotes the trap to unmatched.
    let Some(ticket) = registry.begin_dispatch(frame.thread_id, frame.instruction_pointer) else {
        return TrapDisposition::PassedThrough;
    };

    debug!(
        hook = %ticket.id(),
        thread_id = frame.thread_id,
        ip = format!("{:#x}", frame.instruction_pointer),
        "Dispatching hook callback"
    );

    let context = TrapContext {
        thread_id: frame.thread_id,
        address: ticket.address(),
        exception_address: frame.exception_address,
        parameter_count: frame.parameter_count,
        registers: frame.registers.clone(),
    };

    // The registry lock is not held here; a long callback cannot block
    // other threads' registrations or dispatches.
    let callback = ticket.callback();
    if catch_unwind(AssertUnwindSafe(|| callback(&context))).is_err() {
        error!(hook = %ticket.id(), "Hook callback panicked");
    }

    frame.registers.rflags |= RFLAGS_RESUME_FLAG;

    match registry.finish_dispatch(ticket) {
        DispatchCompletion::Rearmed => {}
        DispatchCompletion::Removed => {
            debug!("Hook removed during its own dispatch");
        }
        DispatchCompletion::RearmFailed(e) => {
            warn!("Hook not re-armed after dispatch: {}", e);
        }
    }

    TrapDisposition::Handled
}

#[cfg(all(windows, target_arch = "x86_64"))]
pub use veh::{install_dispatcher, uninstall_dispatcher, DispatcherToken};

#[cfg(all(windows, target_arch = "x86_64"))]
mod veh {
    use super::{dispatch_trap, TrapDisposition, TrapFrame};
    use crate::registry::HookRegistry;
    use drhook_common::{Error, Registers, Result};
    use std::ffi::c_void;
    use std::sync::{Arc, RwLock};
    use tracing::info;
    use windows::Win32::System::Diagnostics::Debug::{
        AddVectoredExceptionHandler, RemoveVectoredExceptionHandler, CONTEXT, EXCEPTION_POINTERS,
    };
    use windows::Win32::System::Threading::GetCurrentThreadId;

    const EXCEPTION_CONTINUE_EXECUTION: i32 = -1;
    const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

    /// Registry the process-wide handler routes traps to.
    ///
    /// Published by install, cleared by uninstall; the handler itself holds
    /// no state beyond this slot.
    static ACTIVE_REGISTRY: RwLock<Option<Arc<HookRegistry>>> = RwLock::new(None);

    /// Token returned by [`install_dispatcher`]; required for teardown
    pub struct DispatcherToken {
        handle: *mut c_void,
    }

    // The VEH cookie is only consumed by RemoveVectoredExceptionHandler and
    // may cross threads.
    unsafe impl Send for DispatcherToken {}

    /// Install the process-wide exception dispatcher routing traps to
    /// `registry`. Refused if a dispatcher is already installed.
    pub fn install_dispatcher(registry: Arc<HookRegistry>) -> Result<DispatcherToken> {
        let mut active = ACTIVE_REGISTRY
            .write()
            .map_err(|e| Error::Internal(format!("Lock error: {}", e)))?;
        if active.is_some() {
            return Err(Error::Dispatcher("Dispatcher already installed".into()));
        }

        // First handler in the chain, so hook traps are seen before any
        // other vectored handler.
        let handle = unsafe { AddVectoredExceptionHandler(1, Some(veh_handler)) };
        if handle.is_null() {
            return Err(Error::Dispatcher(
                "AddVectoredExceptionHandler failed".into(),
            ));
        }

        *active = Some(registry);
        info!("Exception dispatcher installed");
        Ok(DispatcherToken { handle })
    }

    /// Remove the process-wide handler and detach the registry.
    pub fn uninstall_dispatcher(token: DispatcherToken) -> Result<()> {
        unsafe {
            RemoveVectoredExceptionHandler(token.handle);
        }
        let mut active = ACTIVE_REGISTRY
            .write()
            .map_err(|e| Error::Internal(format!("Lock error: {}", e)))?;
        *active = None;
        info!("Exception dispatcher uninstalled");
        Ok(())
    }

    fn context_to_registers(ctx: &CONTEXT) -> Registers {
        Registers {
            rax: ctx.Rax,
            rbx: ctx.Rbx,
            rcx: ctx.Rcx,
            rdx: ctx.Rdx,
            rsi: ctx.Rsi,
            rdi: ctx.Rdi,
            rbp: ctx.Rbp,
            rsp: ctx.Rsp,
            r8: ctx.R8,
            r9: ctx.R9,
            r10: ctx.R10,
            r11: ctx.R11,
            r12: ctx.R12,
            r13: ctx.R13,
            r14: ctx.R14,
            r15: ctx.R15,
            rip: ctx.Rip,
            rflags: ctx.EFlags as u64,
        }
    }

    /// VEH entry point: captures a [`TrapFrame`], runs the dispatcher and
    /// writes the resume flag back into the saved context on a handled trap.
    unsafe extern "system" fn veh_handler(exception_info: *mut EXCEPTION_POINTERS) -> i32 {
        if exception_info.is_null() {
            return EXCEPTION_CONTINUE_SEARCH;
        }

        let record = (*exception_info).ExceptionRecord;
        let context = (*exception_info).ContextRecord;
        if record.is_null() || context.is_null() {
            return EXCEPTION_CONTINUE_SEARCH;
        }

        let registry = match ACTIVE_REGISTRY.read() {
            Ok(guard) => (*guard).clone(),
            Err(_) => None,
        };
        let Some(registry) = registry else {
            return EXCEPTION_CONTINUE_SEARCH;
        };

        let mut frame = TrapFrame {
            exception_code: (*record).ExceptionCode.0 as u32,
            thread_id: GetCurrentThreadId(),
            instruction_pointer: (*context).Rip,
            exception_address: (*record).ExceptionAddress as u64,
            parameter_count: (*record).NumberParameters,
            registers: context_to_registers(&*context),
        };

        match dispatch_trap(&registry, &mut frame) {
            TrapDisposition::Handled => {
                // Only the resume flag is carried back; the callback cannot
                // redirect execution.
                (*context).EFlags = frame.registers.rflags as u32;
                EXCEPTION_CONTINUE_EXECUTION
            }
            TrapDisposition::PassedThrough => EXCEPTION_CONTINUE_SEARCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::InMemoryAccessor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const TID: u32 = 77;

    fn frame(code: u32, thread_id: u32, ip: u64) -> TrapFrame {
        TrapFrame {
            exception_code: code,
            thread_id,
            instruction_pointer: ip,
            exception_address: ip,
            parameter_count: 0,
            registers: Registers {
                rip: ip,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_non_single_step_passes_through() {
        let registry = HookRegistry::new(Arc::new(InMemoryAccessor::new()));
        let mut frame = frame(0x8000_0003, TID, 0x401000);
        assert_eq!(
            dispatch_trap(&registry, &mut frame),
            TrapDisposition::PassedThrough
        );
        assert_eq!(frame.registers.rflags & RFLAGS_RESUME_FLAG, 0);
    }

    #[test]
    fn test_unmatched_trap_passes_through() {
        let registry = HookRegistry::new(Arc::new(InMemoryAccessor::new()));
        let mut frame = frame(EXCEPTION_SINGLE_STEP, TID, 0x401000);
        assert_eq!(
            dispatch_trap(&registry, &mut frame),
            TrapDisposition::PassedThrough
        );
    }

    #[test]
    fn test_matched_trap_invokes_callback_once_and_sets_resume_flag() {
        let accessor = Arc::new(InMemoryAccessor::new());
        let registry = HookRegistry::new(accessor.clone());

        let hits = Arc::new(AtomicU32::new(0));
        let hits_cb = hits.clone();
        registry
            .register(
                0x401000,
                TID,
                Arc::new(move |ctx| {
                    assert_eq!(ctx.address, 0x401000);
                    assert_eq!(ctx.thread_id, TID);
                    hits_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let mut frame = frame(EXCEPTION_SINGLE_STEP, TID, 0x401000);
        assert_eq!(
            dispatch_trap(&registry, &mut frame),
            TrapDisposition::Handled
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_ne!(frame.registers.rflags & RFLAGS_RESUME_FLAG, 0);

        // Slot re-armed after dispatch
        use crate::accessor::DebugRegisterAccess;
        let regs = accessor.read(TID).unwrap();
        assert!(regs.dr7.is_enabled(1));
        assert_eq!(regs.dr[1], 0x401000);
    }

    #[test]
    fn test_wrong_thread_passes_through() {
        let registry = HookRegistry::new(Arc::new(InMemoryAccessor::new()));
        registry
            .register(0x401000, TID, Arc::new(|_| panic!("must not run")))
            .unwrap();

        let mut frame = frame(EXCEPTION_SINGLE_STEP, TID + 1, 0x401000);
        assert_eq!(
            dispatch_trap(&registry, &mut frame),
            TrapDisposition::PassedThrough
        );
    }

    #[test]
    fn test_callback_sees_slot_disarmed() {
        use crate::accessor::DebugRegisterAccess;

        let accessor = Arc::new(InMemoryAccessor::new());
        let registry = HookRegistry::new(accessor.clone());

        let accessor_cb = accessor.clone();
        registry
            .register(
                0x401000,
                TID,
                Arc::new(move |_| {
                    let regs = accessor_cb.read(TID).unwrap();
                    assert!(!regs.dr7.is_enabled(1));
                    assert_eq!(regs.dr[1], 0);
                }),
            )
            .unwrap();

        let mut frame = frame(EXCEPTION_SINGLE_STEP, TID, 0x401000);
        assert_eq!(
            dispatch_trap(&registry, &mut frame),
            TrapDisposition::Handled
        );
    }

    #[test]
    fn test_callback_panic_is_contained_and_hook_rearmed() {
        use crate::accessor::DebugRegisterAccess;

        let accessor = Arc::new(InMemoryAccessor::new());
        let registry = HookRegistry::new(accessor.clone());
        registry
            .register(0x401000, TID, Arc::new(|_| panic!("callback bug")))
            .unwrap();

        let mut frame = frame(EXCEPTION_SINGLE_STEP, TID, 0x401000);
        // Handled despite the panic; the breakpoint stays live
        assert_eq!(
            dispatch_trap(&registry, &mut frame),
            TrapDisposition::Handled
        );
        assert!(accessor.read(TID).unwrap().dr7.is_enabled(1));
    }
}
