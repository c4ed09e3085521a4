//! Procedural generation for cells that have never been stored

use crate::error::EngineResult;
use crate::world::{Cell, CellPos, LocalPos, Tile, TileStamp};

/// Fills a freshly created cell with deterministic content
pub trait CellGenerator: Send + Sync {
    fn generate(&self, coords: CellPos, cell: &mut Cell) -> EngineResult<()>;
}

/// Alternates two ground tiles by cell parity, with an optional structure
/// stamped at the origin cell.
#[derive(Debug, Clone)]
pub struct CheckerboardGenerator {
    even: Tile,
    odd: Tile,
    structure: Option<TileStamp>,
}

impl CheckerboardGenerator {
    /// Ground from `source_ref`: atlas (0,0) on even cells, (2,1) on odd cells
    pub fn new(source_ref: i32) -> Self {
        Self {
            even: Tile::new(source_ref, 0, 0),
            odd: Tile::new(source_ref, 2, 1),
            structure: None,
        }
    }

    /// Stamp `structure` onto layers 1.. of cell (0,0)
    pub fn with_structure(mut self, structure: TileStamp) -> Self {
        self.structure = Some(structure);
        self
    }

    /// Ground tile used for a cell
    pub fn fill_for(&self, coords: CellPos) -> Tile {
        if (coords.x + coords.y).rem_euclid(2) == 0 {
            self.even
        } else {
            self.odd
        }
    }
}

impl CellGenerator for CheckerboardGenerator {
    fn generate(&self, coords: CellPos, cell: &mut Cell) -> EngineResult<()> {
        let fill = self.fill_for(coords);
        let dims = cell.dims();
        for x in 0..dims.width as i32 {
            for y in 0..dims.height as i32 {
                cell.place(0, LocalPos::new(x, y), fill)?;
            }
        }

        if coords == CellPos::new(0, 0) {
            if let Some(structure) = &self.structure {
                cell.place_all(1, LocalPos::new(0, 0), structure)?;
            }
        }
        Ok(())
    }
}

/// A small two-layer building: walls on the lower layer, roof on the upper
pub fn test_building(source_ref: i32) -> TileStamp {
    let mut stamp = TileStamp::new(3, 2, 2);
    for x in 0..3 {
        stamp.set(x, 0, 0, Tile::new(source_ref, x as i32, 0));
    }
    stamp.set(0, 1, 0, Tile::new(source_ref, 0, 1));
    stamp.set(2, 1, 0, Tile::new(source_ref, 2, 1));
    for x in 0..3 {
        stamp.set(x, 0, 1, Tile::new(source_ref, x as i32, 2));
    }
    stamp
}
