//! drhook Core Library
//!
//! Function-call interception through CPU hardware breakpoints: hooks are
//! armed by writing a target thread's debug registers, and a process-wide
//! vectored exception handler routes the resulting single-step traps to
//! user callbacks. No code patching takes place.
//!
//! ```
//! use drhook_core::{HookRegistry, InMemoryAccessor};
//! use std::sync::Arc;
//!
//! let registry = HookRegistry::new(Arc::new(InMemoryAccessor::new()));
//! let hook = registry
//!     .register(0x1400_0100, 1234, Arc::new(|ctx| {
//!         println!("intercepted call at {:#x}", ctx.address);
//!     }))
//!     .unwrap();
//! registry.unregister(hook).unwrap();
//! ```
//!
//! On Windows, construct the registry over `ThreadContextAccessor` and
//! activate trap routing with `install_dispatcher`.

pub mod accessor;
pub mod dispatcher;
pub mod dr7;
pub mod registry;
pub mod slots;

pub use accessor::{arm_slot, disarm_slot, DebugRegisterAccess, DebugRegisters, InMemoryAccessor};
pub use dispatcher::{dispatch_trap, TrapDisposition, TrapFrame};
pub use dr7::{Dr7, SLOT_COUNT};
pub use drhook_common::{Error, Result};
pub use registry::{DispatchCompletion, HookCallback, HookRegistry};
pub use slots::SlotAllocator;

#[cfg(all(windows, target_arch = "x86_64"))]
pub use accessor::ThreadContextAccessor;
#[cfg(all(windows, target_arch = "x86_64"))]
pub use dispatcher::{install_dispatcher, uninstall_dispatcher, DispatcherToken};
