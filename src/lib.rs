//! Tile Streamer
//!
//! Streams fixed-size cells of a tiled 2D world to consumers. A `CellHost`
//! owns the resident cells of every space and loads, generates and stores
//! them on demand. Consumers keep a window of cells around a reference
//! position through a `WindowManager`, fed either from an in-process host or
//! from a remote one over the cell protocol.

pub mod config;
pub mod error;
pub mod host;
pub mod network;
pub mod persistence;
pub mod streaming;
pub mod world;

pub use config::StreamerConfig;
pub use error::{EngineError, EngineResult};
pub use host::{CellHost, CellKey, ConsumerId};
pub use network::{CellResponder, LocalTransport, RequestCorrelator};
pub use persistence::CellCodec;
pub use streaming::{CellEvent, CellSource, LocalCellSource, RemoteCellSource, WindowManager, WindowState};
pub use world::{Cell, CellDims, CellPos, LocalPos, SharedCell, SpaceToken, Tile, TileSetRegistry, WorldPos};
