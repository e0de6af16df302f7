//! Error types for drhook

use crate::types::HookId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to acquire handle for thread {thread_id}: {message}")]
    HandleAcquisition { thread_id: u32, message: String },

    #[error("Failed to read debug registers of thread {thread_id}: {message}")]
    ContextRead { thread_id: u32, message: String },

    #[error("Failed to write debug registers of thread {thread_id}: {message}")]
    ContextWrite { thread_id: u32, message: String },

    #[error("No free hardware breakpoint slot")]
    CapacityExceeded,

    #[error("Unknown hook handle: {0}")]
    InvalidHandle(HookId),

    #[error("Dispatcher error: {0}")]
    Dispatcher(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_acquisition_error_display() {
        let err = Error::HandleAcquisition {
            thread_id: 4242,
            message: "Access denied".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("4242"));
        assert!(msg.contains("Access denied"));
    }

    #[test]
    fn test_context_read_error_display() {
        let err = Error::ContextRead {
            thread_id: 1,
            message: "GetThreadContext failed".to_string(),
        };
        assert!(format!("{}", err).contains("GetThreadContext failed"));
    }

    #[test]
    fn test_context_write_error_display() {
        let err = Error::ContextWrite {
            thread_id: 1,
            message: "SetThreadContext failed".to_string(),
        };
        assert!(format!("{}", err).contains("SetThreadContext failed"));
    }

    #[test]
    fn test_capacity_exceeded_error_display() {
        let msg = format!("{}", Error::CapacityExceeded);
        assert!(msg.contains("No free hardware breakpoint slot"));
    }

    #[test]
    fn test_invalid_handle_error_display() {
        let err = Error::InvalidHandle(HookId(7));
        assert!(format!("{}", err).contains("hook_7"));
    }

    #[test]
    fn test_dispatcher_error_display() {
        let err = Error::Dispatcher("already installed".to_string());
        assert!(format!("{}", err).contains("already installed"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }
        fn returns_err() -> Result<i32> {
            Err(Error::CapacityExceeded)
        }
        assert_eq!(returns_ok().unwrap(), 42);
        assert!(returns_err().is_err());
    }
}
