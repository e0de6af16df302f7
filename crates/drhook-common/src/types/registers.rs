//! CPU register snapshot types

use serde::{Deserialize, Serialize};

/// CPU registers (x64) captured at trap time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_default_is_zeroed() {
        let regs = Registers::default();
        assert_eq!(regs.rax, 0);
        assert_eq!(regs.rip, 0);
        assert_eq!(regs.rflags, 0);
    }

    #[test]
    fn test_registers_serialization() {
        let regs = Registers {
            rip: 0x140001000,
            rflags: 0x246,
            ..Default::default()
        };
        let json = serde_json::to_string(&regs).unwrap();
        let parsed: Registers = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rip, 0x140001000);
        assert_eq!(parsed.rflags, 0x246);
    }
}
