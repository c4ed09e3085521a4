//! Streamer configuration
//!
//! Every section has defaults so a config file only needs the fields it
//! changes.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};
use crate::persistence::CompressionType;
use crate::world::CellDims;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub world: WorldConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub tilesets: Vec<TileSetDef>,
}

/// Cell geometry and the window kept around a consumer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub cell_width: usize,
    pub cell_height: usize,
    pub layers: usize,
    pub space_name: String,
    /// Window half-width in cells; 1 gives a 3x3 window
    pub window_radius: i32,
}

/// Residency bounds for the cell cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub min_resident: usize,
    pub max_resident: usize,
    /// Resident cells allowed for each connected consumer
    pub per_consumer: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub save_dir: PathBuf,
    pub compression: CompressionType,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub cells_channel: u8,
}

/// Tile set world generation draws its ground from
pub const GROUND_TILESET: &str = "Forest";

/// A tile-set source and the atlas coordinates of its solid tiles
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TileSetDef {
    pub name: String,
    pub source_ref: i32,
    #[serde(default)]
    pub solid: Vec<[u8; 2]>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
            tilesets: default_tilesets(),
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cell_width: 64,
            cell_height: 64,
            layers: 3,
            space_name: "Overworld".to_string(),
            window_radius: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_resident: 10,
            max_resident: 1000,
            per_consumer: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("saves/world"),
            compression: CompressionType::Gzip,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { cells_channel: 1 }
    }
}

/// Tile sets known to a fresh world
pub fn default_tilesets() -> Vec<TileSetDef> {
    vec![
        TileSetDef {
            name: GROUND_TILESET.to_string(),
            source_ref: 1,
            solid: Vec::new(),
        },
        TileSetDef {
            name: "Elf_Buildings".to_string(),
            source_ref: 2,
            solid: vec![[0, 0], [1, 0], [2, 0], [0, 1], [2, 1]],
        },
    ]
}

impl WorldConfig {
    pub fn dims(&self) -> CellDims {
        CellDims::new(self.cell_width, self.cell_height, self.layers)
    }
}

impl CacheConfig {
    /// Target residency for the given number of connected consumers. An
    /// inverted range resolves to `max_resident`.
    pub fn capacity_for(&self, consumers: usize) -> usize {
        consumers
            .saturating_mul(self.per_consumer)
            .max(self.min_resident)
            .min(self.max_resident)
    }
}

impl StreamerConfig {
    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        let config: StreamerConfig = toml::from_str(raw).map_err(|e| EngineError::Config {
            message: e.to_string(),
        })?;
        let config = config.with_default_tilesets();
        config.validate()?;
        Ok(config)
    }

    /// Add each default tile set whose name and ref are both unused
    pub fn with_default_tilesets(mut self) -> Self {
        for def in default_tilesets() {
            let taken = self
                .tilesets
                .iter()
                .any(|other| other.name == def.name || other.source_ref == def.source_ref);
            if !taken {
                self.tilesets.push(def);
            }
        }
        self
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |message: String| Err(EngineError::Config { message });

        if self.world.cell_width == 0 || self.world.cell_height == 0 || self.world.layers == 0 {
            return invalid(format!(
                "cell dimensions must be non-zero, got {}x{}x{}",
                self.world.cell_width, self.world.cell_height, self.world.layers
            ));
        }
        if self.world.window_radius < 1 {
            return invalid(format!("window radius must be at least 1, got {}", self.world.window_radius));
        }
        if self.cache.min_resident > self.cache.max_resident {
            return invalid(format!(
                "cache min_resident {} exceeds max_resident {}",
                self.cache.min_resident, self.cache.max_resident
            ));
        }
        for (i, def) in self.tilesets.iter().enumerate() {
            if self.tilesets[..i].iter().any(|other| other.source_ref == def.source_ref) {
                return invalid(format!("tile set ref {} is registered twice", def.source_ref));
            }
        }
        if !self.tilesets.iter().any(|def| def.name == GROUND_TILESET) {
            return invalid(format!(
                "no tile set named {}; world generation draws its ground from it",
                GROUND_TILESET
            ));
        }
        Ok(())
    }
}
