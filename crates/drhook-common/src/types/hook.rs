//! Hook and breakpoint-slot types

use serde::{Deserialize, Serialize};

/// Index of a hardware breakpoint slot (DR0-DR3)
pub type SlotIndex = u8;

/// Unique identifier for an installed hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HookId(pub u32);

impl std::fmt::Display for HookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hook_{}", self.0)
    }
}

/// Trigger condition for a hardware breakpoint (DR7 R/W field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakCondition {
    /// Break on instruction execution
    Execute,
    /// Break on data write
    Write,
    /// Break on I/O read or write
    IoReadWrite,
    /// Break on data read or write
    ReadWrite,
}

impl BreakCondition {
    /// Two-bit DR7 R/W field encoding
    pub fn to_dr7_rw(self) -> u64 {
        match self {
            Self::Execute => 0b00,
            Self::Write => 0b01,
            Self::IoReadWrite => 0b10,
            Self::ReadWrite => 0b11,
        }
    }

    pub fn from_dr7_rw(bits: u64) -> Self {
        match bits & 0b11 {
            0b00 => Self::Execute,
            0b01 => Self::Write,
            0b10 => Self::IoReadWrite,
            _ => Self::ReadWrite,
        }
    }
}

/// Watch length for a hardware breakpoint (DR7 LEN field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchLength {
    Byte,
    Word,
    Dword,
    Qword,
}

impl WatchLength {
    pub fn from_size(size: usize) -> Option<Self> {
        match size {
            1 => Some(Self::Byte),
            2 => Some(Self::Word),
            4 => Some(Self::Dword),
            8 => Some(Self::Qword),
            _ => None,
        }
    }

    /// Two-bit DR7 LEN field encoding
    pub fn to_dr7_len(self) -> u64 {
        match self {
            Self::Byte => 0b00,
            Self::Word => 0b01,
            Self::Dword => 0b11,
            Self::Qword => 0b10,
        }
    }

    pub fn from_dr7_len(bits: u64) -> Self {
        match bits & 0b11 {
            0b00 => Self::Byte,
            0b01 => Self::Word,
            0b11 => Self::Dword,
            _ => Self::Qword,
        }
    }
}

/// Information about an installed hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookInfo {
    pub id: HookId,
    pub address: u64,
    pub slot: SlotIndex,
    pub thread_id: u32,
    pub condition: BreakCondition,
    pub length: WatchLength,
    pub enabled: bool,
    pub hit_count: u64,
}
