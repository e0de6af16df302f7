//! Hook registry
//!
//! Owns the mapping from installed hooks to breakpoint slots and threads.
//! All mutation serializes on one registry-wide lock; trap lookups take the
//! read side so concurrent traps on different threads classify in parallel.
//! The lock is never held across a hook callback: the dispatcher brackets
//! the callback with [`HookRegistry::begin_dispatch`] and
//! [`HookRegistry::finish_dispatch`].

use crate::accessor::{arm_slot, disarm_slot, DebugRegisterAccess};
use crate::slots::SlotAllocator;
use drhook_common::{
    BreakCondition, Error, HookId, HookInfo, Result, SlotIndex, TrapContext, WatchLength,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

/// Callback invoked synchronously on the trapping thread
pub type HookCallback = Arc<dyn Fn(&TrapContext) + Send + Sync>;

/// Trigger condition used for call interception
const INTERCEPT_CONDITION: BreakCondition = BreakCondition::ReadWrite;
/// Watch length used for call interception
const INTERCEPT_LENGTH: WatchLength = WatchLength::Dword;

/// Counter for generating unique hook IDs
static HOOK_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Generate a new unique hook ID
fn next_hook_id() -> HookId {
    HookId(HOOK_COUNTER.fetch_add(1, Ordering::SeqCst))
}

struct HookEntry {
    id: HookId,
    address: u64,
    slot: SlotIndex,
    thread_id: u32,
    condition: BreakCondition,
    length: WatchLength,
    callback: HookCallback,
    /// Slot is armed in the thread snapshot iff this is set
    enabled: bool,
    /// A dispatch for this hook is in flight on the owning thread
    dispatching: bool,
    /// Unregistered mid-dispatch; the dispatcher finalizes removal
    pending_removal: bool,
    hit_count: u64,
}

impl HookEntry {
    fn info(&self) -> HookInfo {
        HookInfo {
            id: self.id,
            address: self.address,
            slot: self.slot,
            thread_id: self.thread_id,
            condition: self.condition,
            length: self.length,
            enabled: self.enabled,
            hit_count: self.hit_count,
        }
    }
}

struct RegistryState {
    slots: SlotAllocator,
    entries: Vec<HookEntry>,
}

/// Capacity-bounded registry of installed hardware breakpoint hooks
pub struct HookRegistry {
    accessor: Arc<dyn DebugRegisterAccess>,
    state: RwLock<RegistryState>,
}

/// Handle to an in-flight dispatch, produced by [`HookRegistry::begin_dispatch`]
pub struct DispatchTicket {
    id: HookId,
    address: u64,
    thread_id: u32,
    callback: HookCallback,
}

impl DispatchTicket {
    pub fn id(&self) -> HookId {
        self.id
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn callback(&self) -> HookCallback {
        self.callback.clone()
    }
}

/// Outcome of [`HookRegistry::finish_dispatch`]
#[derive(Debug)]
pub enum DispatchCompletion {
    /// Slot re-armed, hook live again
    Rearmed,
    /// Hook was unregistered during the callback; removal finalized
    Removed,
    /// Re-arm write was refused; the hook stays registered but disarmed
    RearmFailed(Error),
}

impl HookRegistry {
    /// Registry over all non-reserved hardware slots (capacity 3)
    pub fn new(accessor: Arc<dyn DebugRegisterAccess>) -> Self {
        Self::with_capacity(accessor, SlotAllocator::new().capacity())
    }

    /// Registry bounded to `capacity` hooks (clamped to the hardware limit)
    pub fn with_capacity(accessor: Arc<dyn DebugRegisterAccess>, capacity: usize) -> Self {
        Self {
            accessor,
            state: RwLock::new(RegistryState {
                slots: SlotAllocator::with_capacity(capacity),
                entries: Vec::with_capacity(capacity),
            }),
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|e| Error::Internal(format!("Lock error: {}", e)))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|e| Error::Internal(format!("Lock error: {}", e)))
    }

    /// Register a hook on `address` for `thread_id`.
    ///
    /// Allocates a slot, stores the entry enabled and arms the breakpoint in
    /// the thread's debug registers. On any failure after allocation the slot
    /// is released and nothing is stored.
    pub fn register(&self, address: u64, thread_id: u32, callback: HookCallback) -> Result<HookId> {
        let mut state = self.write_state()?;
        let slot = state.slots.allocate()?;

        if let Err(e) = arm_slot(
            self.accessor.as_ref(),
            thread_id,
            slot,
            address,
            INTERCEPT_CONDITION,
            INTERCEPT_LENGTH,
        ) {
            state.slots.release(slot);
            warn!(
                thread_id,
                address = format!("{:#x}", address),
                "Hook registration failed: {}",
                e
            );
            return Err(e);
        }

        let id = next_hook_id();
        state.entries.push(HookEntry {
            id,
            address,
            slot,
            thread_id,
            condition: INTERCEPT_CONDITION,
            length: INTERCEPT_LENGTH,
            callback,
            enabled: true,
            dispatching: false,
            pending_removal: false,
            hit_count: 0,
        });

        debug!(
            hook = %id,
            thread_id,
            slot,
            address = format!("{:#x}", address),
            "Hook registered"
        );
        Ok(id)
    }

    /// Unregister a hook, disarming its slot.
    ///
    /// Safe to call from inside the hook's own callback: the slot is already
    /// disarmed at that point, so the entry is only marked for removal and
    /// the dispatcher finalizes it after the callback returns.
    pub fn unregister(&self, id: HookId) -> Result<()> {
        let mut state = self.write_state()?;
        let idx = state
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(Error::InvalidHandle(id))?;

        if state.entries[idx].pending_removal {
            // Duplicate unregister of a hook already going away
            return Err(Error::InvalidHandle(id));
        }

        if state.entries[idx].dispatching {
            state.entries[idx].pending_removal = true;
            debug!(hook = %id, "Unregister deferred until dispatch completes");
            return Ok(());
        }

        let (thread_id, slot) = (state.entries[idx].thread_id, state.entries[idx].slot);
        disarm_slot(self.accessor.as_ref(), thread_id, slot)?;

        let entry = state.entries.remove(idx);
        state.slots.release(entry.slot);
        debug!(hook = %id, thread_id, slot, "Hook unregistered");
        Ok(())
    }

    /// Unregister every hook, best effort. Returns the number removed.
    pub fn unregister_all(&self) -> usize {
        let ids: Vec<HookId> = self.list().iter().map(|info| info.id).collect();
        let mut removed = 0;
        for id in ids {
            match self.unregister(id) {
                Ok(()) => removed += 1,
                Err(e) => warn!(hook = %id, "Failed to unregister: {}", e),
            }
        }
        removed
    }

    /// Find the enabled hook matching a trap on `thread_id` at `ip`.
    ///
    /// Read-locked; used by the dispatcher to classify traps. O(active
    /// hooks), which is bounded by the slot count.
    pub fn find_by_trap(&self, thread_id: u32, ip: u64) -> Option<HookInfo> {
        let state = self.read_state().ok()?;
        state
            .entries
            .iter()
            .find(|e| e.enabled && e.thread_id == thread_id && e.address == ip)
            .map(|e| e.info())
    }

    /// Start dispatching a trap: revalidate the match, disable the entry and
    /// disarm its slot so neither the callback nor the resume step can
    /// re-enter the same trap.
    ///
    /// Returns `None` if the hook vanished in the meantime or the disarm
    /// write was refused; the caller then treats the trap as unmatched.
    pub fn begin_dispatch(&self, thread_id: u32, ip: u64) -> Option<DispatchTicket> {
        let mut state = self.write_state().ok()?;
        let idx = state
            .entries
            .iter()
            .position(|e| e.enabled && !e.dispatching && e.thread_id == thread_id && e.address == ip)?;

        let (slot, owner) = (state.entries[idx].slot, state.entries[idx].thread_id);
        if let Err(e) = disarm_slot(self.accessor.as_ref(), owner, slot) {
            error!(
                hook = %state.entries[idx].id,
                slot,
                "Failed to disarm slot for dispatch, passing trap through: {}",
                e
            );
            return None;
        }

        let entry = &mut state.entries[idx];
        entry.enabled = false;
        entry.dispatching = true;
        entry.hit_count += 1;

        Some(DispatchTicket {
            id: entry.id,
            address: entry.address,
            thread_id: entry.thread_id,
            callback: entry.callback.clone(),
        })
    }

    /// Finish a dispatch: re-arm the slot, or finalize a removal requested
    /// from inside the callback.
    pub fn finish_dispatch(&self, ticket: DispatchTicket) -> DispatchCompletion {
        let mut state = match self.write_state() {
            Ok(state) => state,
            Err(e) => return DispatchCompletion::RearmFailed(e),
        };

        let Some(idx) = state.entries.iter().position(|e| e.id == ticket.id) else {
            // Entry can only disappear through finish_dispatch itself
            return DispatchCompletion::RearmFailed(Error::InvalidHandle(ticket.id));
        };

        state.entries[idx].dispatching = false;

        if state.entries[idx].pending_removal {
            let entry = state.entries.remove(idx);
            state.slots.release(entry.slot);
            debug!(hook = %ticket.id, "Deferred unregister finalized");
            return DispatchCompletion::Removed;
        }

        let entry = &state.entries[idx];
        match arm_slot(
            self.accessor.as_ref(),
            entry.thread_id,
            entry.slot,
            entry.address,
            entry.condition,
            entry.length,
        ) {
            Ok(()) => {
                state.entries[idx].enabled = true;
                DispatchCompletion::Rearmed
            }
            Err(e) => {
                warn!(
                    hook = %ticket.id,
                    "Failed to re-arm slot after dispatch; hook left disarmed: {}",
                    e
                );
                DispatchCompletion::RearmFailed(e)
            }
        }
    }

    /// Information about every registered hook
    pub fn list(&self) -> Vec<HookInfo> {
        match self.read_state() {
            Ok(state) => state.entries.iter().map(|e| e.info()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Number of registered hooks
    pub fn active_count(&self) -> usize {
        self.read_state().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Maximum number of hooks this registry can hold
    pub fn capacity(&self) -> usize {
        self.read_state().map(|s| s.slots.capacity()).unwrap_or(0)
    }
}
