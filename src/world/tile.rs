use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::world::LocalPos;

/// Largest atlas coordinate the cell format can persist on either axis
pub const MAX_ATLAS_COORD: i32 = u8::MAX as i32;

/// A tile identified by its tile-set source and atlas coordinate.
///
/// Equality and hashing cover all three fields; solidity is looked up
/// separately and never takes part in comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tile {
    pub source_ref: i32,
    pub atlas_x: i32,
    pub atlas_y: i32,
}

/// Sentinel for an unoccupied slot, always palette code 0
pub const EMPTY_TILE: Tile = Tile {
    source_ref: -1,
    atlas_x: -1,
    atlas_y: -1,
};

impl Tile {
    pub const fn new(source_ref: i32, atlas_x: i32, atlas_y: i32) -> Self {
        Self {
            source_ref,
            atlas_x,
            atlas_y,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == EMPTY_TILE
    }

    /// Atlas coordinates must fit the single-byte fields of the cell format
    pub fn check_atlas_range(&self) -> EngineResult<()> {
        let in_range = |v: i32| (0..=MAX_ATLAS_COORD).contains(&v);
        if in_range(self.atlas_x) && in_range(self.atlas_y) {
            Ok(())
        } else {
            Err(EngineError::AtlasOutOfRange {
                atlas_x: self.atlas_x,
                atlas_y: self.atlas_y,
            })
        }
    }
}

impl Default for Tile {
    fn default() -> Self {
        EMPTY_TILE
    }
}

/// A placement recorded by a cell, drained by whoever draws it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileUpdate {
    pub layer: usize,
    pub pos: LocalPos,
    pub tile: Tile,
}

/// A rectangular block of tiles that can be stamped onto a cell.
/// `None` entries leave the target untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileStamp {
    width: usize,
    height: usize,
    layers: usize,
    tiles: Vec<Option<Tile>>,
}

impl TileStamp {
    pub fn new(width: usize, height: usize, layers: usize) -> Self {
        Self {
            width,
            height,
            layers,
            tiles: vec![None; width * height * layers],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn layers(&self) -> usize {
        self.layers
    }

    fn index(&self, x: usize, y: usize, layer: usize) -> Option<usize> {
        if x < self.width && y < self.height && layer < self.layers {
            Some((layer * self.width + x) * self.height + y)
        } else {
            None
        }
    }

    pub fn get(&self, x: usize, y: usize, layer: usize) -> Option<Tile> {
        self.index(x, y, layer).and_then(|i| self.tiles[i])
    }

    pub fn set(&mut self, x: usize, y: usize, layer: usize, tile: Tile) {
        if let Some(i) = self.index(x, y, layer) {
            self.tiles[i] = Some(tile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tile_equality_is_structural() {
        let mut set = HashSet::new();
        set.insert(Tile::new(1, 2, 3));
        assert!(set.contains(&Tile::new(1, 2, 3)));
        assert!(!set.contains(&Tile::new(1, 3, 2)));
        assert!(Tile::default().is_empty());
    }

    #[test]
    fn test_atlas_range() {
        assert!(Tile::new(1, 255, 0).check_atlas_range().is_ok());
        assert_eq!(
            Tile::new(1, 256, 0).check_atlas_range(),
            Err(EngineError::AtlasOutOfRange { atlas_x: 256, atlas_y: 0 })
        );
        assert!(Tile::new(1, 0, -1).check_atlas_range().is_err());
    }

    #[test]
    fn test_stamp_ignores_out_of_range() {
        let mut stamp = TileStamp::new(2, 2, 1);
        stamp.set(1, 1, 0, Tile::new(2, 4, 4));
        stamp.set(5, 5, 0, Tile::new(2, 4, 4));
        assert_eq!(stamp.get(1, 1, 0), Some(Tile::new(2, 4, 4)));
        assert_eq!(stamp.get(0, 0, 0), None);
        assert_eq!(stamp.get(5, 5, 0), None);
    }
}
