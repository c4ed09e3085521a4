//! Crate-wide error type
//!
//! Every subsystem funnels into `EngineError`. The type is `Clone` because a
//! single fetch result is shared by every waiter that joined it.

use crate::world::{CellPos, SpaceToken};

/// Result alias used across the crate
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Tile set {source_ref} is not registered")]
    UnknownTileSet { source_ref: i32 },

    #[error("Tile set {source_ref} has no assigned atlas slot")]
    AtlasSlotNotFound { source_ref: i32 },

    #[error("Atlas coordinates ({atlas_x}, {atlas_y}) do not fit in one byte per axis")]
    AtlasOutOfRange { atlas_x: i32, atlas_y: i32 },

    #[error("Position ({x}, {y}) on layer {layer} is outside the cell")]
    OutOfBounds { layer: usize, x: i32, y: i32 },

    #[error("Space token {token:?} does not resolve to a known space")]
    UnknownSpace { token: SpaceToken },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Disconnected before cell {coords:?} arrived")]
    Disconnected { coords: CellPos },

    #[error("Timed out waiting for cell {coords:?}")]
    TimedOut { coords: CellPos },

    #[error("Request for cell {coords:?} failed on the remote host")]
    RequestFailed { coords: CellPos },

    #[error("Background task failed: {message}")]
    TaskFailed { message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl From<crate::persistence::PersistenceError> for EngineError {
    fn from(err: crate::persistence::PersistenceError) -> Self {
        EngineError::Persistence {
            message: err.to_string(),
        }
    }
}

impl From<crate::persistence::CodecError> for EngineError {
    fn from(err: crate::persistence::CodecError) -> Self {
        EngineError::Persistence {
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::TaskFailed {
            message: err.to_string(),
        }
    }
}
