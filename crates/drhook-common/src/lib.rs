//! drhook Common Types
//!
//! Shared types, error taxonomy and logging configuration used by the
//! drhook hardware-breakpoint hooking crates.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::{init_debug_logging, init_in_process_logging, init_logging, LogConfig};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
