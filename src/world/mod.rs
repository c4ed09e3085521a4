//! World model: positions, tiles, cells, tile sets and spaces

pub mod cell;
pub mod generation;
pub mod position;
pub mod space;
pub mod tile;
pub mod tileset;

pub use cell::{Cell, SharedCell};
pub use generation::{CellGenerator, CheckerboardGenerator};
pub use position::{CellDims, CellPos, LocalPos, WorldPos};
pub use space::{Space, SpaceResolver, SpaceToken, StorageBackend, WorldSpace, WorldSpaceResolver};
pub use tile::{Tile, TileStamp, TileUpdate, EMPTY_TILE, MAX_ATLAS_COORD};
pub use tileset::{AtlasSlot, TileDataLookup, TileSetRegistry};
