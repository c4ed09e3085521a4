//! Network-specific error helpers

use crate::error::{EngineError, EngineResult};

/// Type alias for network-specific results
pub type NetworkResult<T> = EngineResult<T>;

/// Create a protocol error
pub fn protocol_error(message: impl Into<String>) -> EngineError {
    EngineError::Protocol {
        message: message.into(),
    }
}

/// Create a transport error
pub fn transport_error(message: impl Into<String>) -> EngineError {
    EngineError::Transport {
        message: message.into(),
    }
}
