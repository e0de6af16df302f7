//! Trap context passed to hook callbacks

use super::Registers;
use serde::{Deserialize, Serialize};

/// Snapshot of a hardware breakpoint trap, handed to the hook callback.
///
/// The callback runs synchronously on the trapping thread, inside the
/// exception dispatch. It may inspect everything here but cannot redirect
/// execution; no calling-convention emulation is provided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapContext {
    /// Thread that hit the breakpoint
    pub thread_id: u32,
    /// Instruction pointer the breakpoint was armed on
    pub address: u64,
    /// Faulting address reported by the exception record
    pub exception_address: u64,
    /// Parameter count from the exception record
    pub parameter_count: u32,
    /// Full register snapshot at trap time
    pub registers: Registers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_context_serialization() {
        let ctx = TrapContext {
            thread_id: 1234,
            address: 0x140001000,
            exception_address: 0x140001000,
            parameter_count: 0,
            registers: Registers::default(),
        };
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: TrapContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.thread_id, 1234);
        assert_eq!(parsed.address, 0x140001000);
    }
}
