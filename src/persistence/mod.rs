//! Persistence for cells: bit packing, the cell byte format, compression and
//! storage backends

pub mod bit_codec;
pub mod cell_codec;
pub mod cell_store;
pub mod compression;
pub mod error;

pub use bit_codec::{convert_between_codes, representative_bits, CodecError};
pub use cell_codec::{CellCodec, SourceGroup};
pub use cell_store::{CellStorage, FileCellStore, MemoryCellStore, CELL_FILE_MAGIC};
pub use compression::{CompressionLevel, CompressionType, Compressor};
pub use error::{atomic_write, corrupted_data, PersistenceError, PersistenceResult};
