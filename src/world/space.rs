//! Spaces: named partitions of the world, each with its own storage
//!
//! A `SpaceToken` is the value-typed name of a space. It is half of every
//! cell key, so two tokens are the same space exactly when they compare
//! equal.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::{StreamerConfig, GROUND_TILESET};
use crate::error::{EngineError, EngineResult};
use crate::persistence::{CellCodec, CellStorage, CompressionType, FileCellStore, MemoryCellStore};
use crate::world::generation::test_building;
use crate::world::{Cell, CellDims, CellGenerator, CellPos, CheckerboardGenerator, TileDataLookup, TileSetRegistry};

/// Tag byte for named world spaces
const WORLD_SPACE_TAG: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpaceToken {
    World { name: String },
}

impl SpaceToken {
    pub fn world(name: impl Into<String>) -> Self {
        SpaceToken::World { name: name.into() }
    }

    /// `[tag][utf-8 name]`
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SpaceToken::World { name } => {
                let mut out = Vec::with_capacity(1 + name.len());
                out.push(WORLD_SPACE_TAG);
                out.extend_from_slice(name.as_bytes());
                out
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        match tag {
            WORLD_SPACE_TAG => std::str::from_utf8(rest).ok().map(SpaceToken::world),
            _ => None,
        }
    }
}

impl fmt::Display for SpaceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceToken::World { name } => write!(f, "world:{}", name),
        }
    }
}

/// A source of cells for one space
pub trait Space: Send + Sync {
    fn token(&self) -> &SpaceToken;

    fn codec(&self) -> CellCodec;

    /// Stored cell if one exists, otherwise a freshly generated one.
    /// Either way the returned cell is clean. May block on IO.
    fn load(&self, coords: CellPos) -> EngineResult<Cell>;

    fn store_bytes(&self, coords: CellPos, bytes: &[u8]) -> EngineResult<()>;

    fn store(&self, coords: CellPos, cell: &Cell) -> EngineResult<()> {
        let bytes = self.codec().encode(cell)?;
        self.store_bytes(coords, &bytes)
    }
}

/// A named world space: persisted cells with procedural fallback
pub struct WorldSpace {
    token: SpaceToken,
    storage: Arc<dyn CellStorage>,
    generator: Arc<dyn CellGenerator>,
    lookup: Arc<dyn TileDataLookup>,
    codec: CellCodec,
}

impl WorldSpace {
    pub fn new(
        token: SpaceToken,
        dims: CellDims,
        storage: Arc<dyn CellStorage>,
        generator: Arc<dyn CellGenerator>,
        lookup: Arc<dyn TileDataLookup>,
    ) -> Self {
        Self {
            token,
            storage,
            generator,
            lookup,
            codec: CellCodec::new(dims),
        }
    }
}

impl Space for WorldSpace {
    fn token(&self) -> &SpaceToken {
        &self.token
    }

    fn codec(&self) -> CellCodec {
        self.codec
    }

    fn load(&self, coords: CellPos) -> EngineResult<Cell> {
        if let Some(bytes) = self.storage.read(coords)? {
            log::debug!("[space::load] {} cell {:?} loaded from storage", self.token, coords);
            return self.codec.decode(&bytes, self.lookup.clone());
        }

        let mut cell = Cell::new(self.codec.dims(), self.lookup.clone());
        self.generator.generate(coords, &mut cell)?;
        cell.settle();
        log::debug!("[space::load] {} cell {:?} generated", self.token, coords);
        Ok(cell)
    }

    fn store_bytes(&self, coords: CellPos, bytes: &[u8]) -> EngineResult<()> {
        self.storage.write(coords, bytes)?;
        Ok(())
    }
}

/// Turns tokens into concrete spaces
pub trait SpaceResolver: Send + Sync {
    fn resolve(&self, token: &SpaceToken) -> EngineResult<Arc<dyn Space>>;
}

/// Where resolved world spaces keep their cells
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Files {
        save_dir: PathBuf,
        compression: CompressionType,
    },
    Memory,
}

/// Builds a `WorldSpace` for any validly named world token
pub struct WorldSpaceResolver {
    dims: CellDims,
    lookup: Arc<dyn TileDataLookup>,
    generator: Arc<dyn CellGenerator>,
    backend: StorageBackend,
    memory_stores: Mutex<FxHashMap<String, Arc<MemoryCellStore>>>,
}

impl WorldSpaceResolver {
    pub fn new(
        dims: CellDims,
        lookup: Arc<dyn TileDataLookup>,
        generator: Arc<dyn CellGenerator>,
        backend: StorageBackend,
    ) -> Self {
        Self {
            dims,
            lookup,
            generator,
            backend,
            memory_stores: Mutex::new(FxHashMap::default()),
        }
    }

    /// Checkerboard generation over the `Forest` tile set, with the test
    /// building from `Elf_Buildings` at the origin when that set is registered
    pub fn from_config(config: &StreamerConfig, registry: Arc<TileSetRegistry>, backend: StorageBackend) -> EngineResult<Self> {
        let forest = registry.tile_set_code(GROUND_TILESET).ok_or_else(|| EngineError::Config {
            message: format!("world generation needs a tile set named {}", GROUND_TILESET),
        })?;
        let mut generator = CheckerboardGenerator::new(forest);
        if let Some(buildings) = registry.tile_set_code("Elf_Buildings") {
            generator = generator.with_structure(test_building(buildings));
        }

        Ok(Self::new(config.world.dims(), registry, Arc::new(generator), backend))
    }

    /// Backing store of a memory-backed space that has been resolved
    pub fn memory_store(&self, name: &str) -> Option<Arc<MemoryCellStore>> {
        self.memory_stores.lock().get(name).cloned()
    }

    fn storage_for(&self, name: &str) -> EngineResult<Arc<dyn CellStorage>> {
        match &self.backend {
            StorageBackend::Files { save_dir, compression } => {
                Ok(Arc::new(FileCellStore::open(save_dir, name, *compression)?))
            }
            StorageBackend::Memory => {
                let store = self
                    .memory_stores
                    .lock()
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(MemoryCellStore::new()))
                    .clone();
                Ok(store)
            }
        }
    }
}

impl SpaceResolver for WorldSpaceResolver {
    fn resolve(&self, token: &SpaceToken) -> EngineResult<Arc<dyn Space>> {
        let SpaceToken::World { name } = token;
        // The name doubles as a directory name
        let usable = !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != "..";
        if !usable {
            return Err(EngineError::UnknownSpace { token: token.clone() });
        }

        let storage = self.storage_for(name)?;
        log::info!("[space::resolve] opened {}", token);
        Ok(Arc::new(WorldSpace::new(
            token.clone(),
            self.dims,
            storage,
            self.generator.clone(),
            self.lookup.clone(),
        )))
    }
}
