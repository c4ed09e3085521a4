//! Cell storage
//!
//! A cell is a fixed `width x height x layers` grid of palette codes. Each
//! distinct tile placed into the cell gets a code on first use; code 0 is
//! always the empty tile. A per-column solidity bitmap is kept alongside the
//! grid and recomputed whenever a column changes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bit_vec::BitVec;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{EngineError, EngineResult};
use crate::world::{AtlasSlot, CellDims, LocalPos, Tile, TileDataLookup, TileStamp, TileUpdate, EMPTY_TILE};

/// A cell shared between the host, the window and any in-flight requests
pub type SharedCell = Arc<RwLock<Cell>>;

#[derive(Debug, Clone, Copy)]
struct PaletteEntry {
    tile: Tile,
    solid: bool,
}

pub struct Cell {
    dims: CellDims,
    /// Palette codes indexed by `(layer * width + x) * height + y`
    codes: Vec<u32>,
    /// Column solidity indexed by `x * height + y`
    solid: BitVec,
    palette: Vec<PaletteEntry>,
    codes_by_tile: FxHashMap<Tile, u32>,
    tickets: FxHashMap<i32, AtlasSlot>,
    updates: VecDeque<TileUpdate>,
    dirty: bool,
    lookup: Arc<dyn TileDataLookup>,
}

impl Cell {
    pub fn new(dims: CellDims, lookup: Arc<dyn TileDataLookup>) -> Self {
        let mut codes_by_tile = FxHashMap::default();
        codes_by_tile.insert(EMPTY_TILE, 0);

        Self {
            dims,
            codes: vec![0; dims.volume()],
            solid: BitVec::from_elem(dims.area(), false),
            palette: vec![PaletteEntry {
                tile: EMPTY_TILE,
                solid: false,
            }],
            codes_by_tile,
            tickets: FxHashMap::default(),
            updates: VecDeque::new(),
            dirty: false,
            lookup,
        }
    }

    pub fn into_shared(self) -> SharedCell {
        Arc::new(RwLock::new(self))
    }

    pub fn dims(&self) -> CellDims {
        self.dims
    }

    pub fn lookup(&self) -> &Arc<dyn TileDataLookup> {
        &self.lookup
    }

    fn index(&self, layer: usize, pos: LocalPos) -> Option<usize> {
        if layer < self.dims.layers && self.dims.contains(pos) {
            let (x, y) = (pos.x as usize, pos.y as usize);
            Some((layer * self.dims.width + x) * self.dims.height + y)
        } else {
            None
        }
    }

    fn column(&self, pos: LocalPos) -> Option<usize> {
        if self.dims.contains(pos) {
            Some(pos.x as usize * self.dims.height + pos.y as usize)
        } else {
            None
        }
    }

    /// Place a tile, allocating a palette code and an atlas ticket on first use.
    /// Placing the empty tile clears the position.
    pub fn place(&mut self, layer: usize, pos: LocalPos, tile: Tile) -> EngineResult<()> {
        let index = self.index(layer, pos).ok_or(EngineError::OutOfBounds {
            layer,
            x: pos.x,
            y: pos.y,
        })?;

        let code = self.code_for(tile)?;
        self.codes[index] = code;
        self.refresh_column(pos);
        self.updates.push_back(TileUpdate { layer, pos, tile });
        self.dirty = true;
        Ok(())
    }

    fn code_for(&mut self, tile: Tile) -> EngineResult<u32> {
        if let Some(&code) = self.codes_by_tile.get(&tile) {
            return Ok(code);
        }

        tile.check_atlas_range()?;
        if !self.tickets.contains_key(&tile.source_ref) {
            let slot = self.lookup.acquire_slot(tile.source_ref)?;
            self.tickets.insert(tile.source_ref, slot);
        }

        let code = self.palette.len() as u32;
        self.palette.push(PaletteEntry {
            tile,
            solid: self.lookup.is_solid(&tile),
        });
        self.codes_by_tile.insert(tile, code);
        Ok(code)
    }

    fn refresh_column(&mut self, pos: LocalPos) {
        let Some(column) = self.column(pos) else {
            return;
        };
        let solid = (0..self.dims.layers).any(|layer| {
            let index = (layer * self.dims.width + pos.x as usize) * self.dims.height + pos.y as usize;
            self.palette[self.codes[index] as usize].solid
        });
        self.solid.set(column, solid);
    }

    /// Stamp a block of tiles with its corner at `origin`, starting at
    /// `start_layer`. Unset stamp entries and entries falling outside the cell
    /// are skipped.
    pub fn place_all(&mut self, start_layer: usize, origin: LocalPos, stamp: &TileStamp) -> EngineResult<()> {
        for layer in 0..stamp.layers() {
            let target_layer = start_layer + layer;
            if target_layer >= self.dims.layers {
                break;
            }
            for x in 0..stamp.width() {
                for y in 0..stamp.height() {
                    let Some(tile) = stamp.get(x, y, layer) else {
                        continue;
                    };
                    let target = origin.offset(x as i32, y as i32);
                    if self.dims.contains(target) {
                        self.place(target_layer, target, tile)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Tile at a position, `None` when out of bounds
    pub fn get_tile(&self, layer: usize, pos: LocalPos) -> Option<Tile> {
        self.index(layer, pos)
            .map(|index| self.palette[self.codes[index] as usize].tile)
    }

    pub fn is_solid(&self, pos: LocalPos) -> bool {
        self.column(pos)
            .and_then(|column| self.solid.get(column))
            .unwrap_or(false)
    }

    /// True when none of the in-bounds positions is solid
    pub fn position_valid(&self, occupied: &[LocalPos]) -> bool {
        occupied.iter().all(|&pos| !self.is_solid(pos))
    }

    /// Every tile in storage order (layer, then column, then row)
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        self.codes
            .iter()
            .map(move |&code| self.palette[code as usize].tile)
    }

    /// Pending placements, oldest first
    pub fn drain_updates(&mut self) -> Vec<TileUpdate> {
        self.updates.drain(..).collect()
    }

    pub fn pending_updates(&self) -> usize {
        self.updates.len()
    }

    /// Atlas slot of a source this cell holds a ticket for
    pub fn atlas_id(&self, source_ref: i32) -> EngineResult<u32> {
        if !self.tickets.contains_key(&source_ref) {
            return Err(EngineError::AtlasSlotNotFound { source_ref });
        }
        self.lookup.atlas_id(source_ref)
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    /// Return every atlas lease held by this cell. All tickets are released
    /// even if one fails; the first failure is reported.
    pub fn release_tickets(&mut self) -> EngineResult<()> {
        let mut first_error = None;
        for (_, slot) in self.tickets.drain() {
            if let Err(e) = self.lookup.release_slot(slot) {
                log::warn!("[cell::release_tickets] failed to release source {}: {}", slot.source_ref, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Forget the placements made while building the cell from storage or a
    /// generator
    pub fn settle(&mut self) {
        self.updates.clear();
        self.dirty = false;
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("dims", &self.dims)
            .field("palette_len", &self.palette.len())
            .field("tickets", &self.tickets.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tilesets;
    use crate::world::TileSetRegistry;

    fn registry() -> Arc<TileSetRegistry> {
        Arc::new(TileSetRegistry::new(&default_tilesets()).expect("default tile sets are valid"))
    }

    fn small_cell(registry: &Arc<TileSetRegistry>) -> Cell {
        Cell::new(CellDims::new(4, 3, 2), registry.clone())
    }

    #[test]
    fn test_place_and_get() {
        let registry = registry();
        let mut cell = small_cell(&registry);
        let grass = Tile::new(1, 0, 0);

        cell.place(1, LocalPos::new(3, 2), grass).expect("in bounds");
        assert_eq!(cell.get_tile(1, LocalPos::new(3, 2)), Some(grass));
        assert_eq!(cell.get_tile(0, LocalPos::new(3, 2)), Some(EMPTY_TILE));
        assert_eq!(cell.get_tile(2, LocalPos::new(0, 0)), None);
        assert!(cell.is_dirty());
        assert_eq!(cell.drain_updates(), vec![TileUpdate { layer: 1, pos: LocalPos::new(3, 2), tile: grass }]);
        assert_eq!(cell.pending_updates(), 0);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let registry = registry();
        let mut cell = small_cell(&registry);
        assert_eq!(
            cell.place(0, LocalPos::new(4, 0), Tile::new(1, 0, 0)),
            Err(EngineError::OutOfBounds { layer: 0, x: 4, y: 0 })
        );
        assert!(cell.place(2, LocalPos::new(0, 0), Tile::new(1, 0, 0)).is_err());
        assert!(!cell.is_dirty());
    }

    #[test]
    fn test_solidity_is_or_across_layers() {
        let registry = registry();
        let mut cell = small_cell(&registry);
        let wall = Tile::new(2, 0, 0);
        let pos = LocalPos::new(1, 1);

        cell.place(0, pos, Tile::new(1, 0, 0)).expect("floor");
        assert!(!cell.is_solid(pos));
        cell.place(1, pos, wall).expect("wall");
        assert!(cell.is_solid(pos));
        assert!(!cell.position_valid(&[LocalPos::new(0, 0), pos]));
        assert!(cell.position_valid(&[LocalPos::new(0, 0), LocalPos::new(-5, 9)]));

        cell.place(1, pos, EMPTY_TILE).expect("clear");
        assert!(!cell.is_solid(pos));
    }

    #[test]
    fn test_tickets_follow_sources() {
        let registry = registry();
        let mut cell = small_cell(&registry);
        cell.place(0, LocalPos::new(0, 0), Tile::new(1, 0, 0)).expect("forest");
        cell.place(0, LocalPos::new(1, 0), Tile::new(1, 2, 1)).expect("forest again");
        cell.place(0, LocalPos::new(2, 0), Tile::new(2, 0, 0)).expect("buildings");

        assert_eq!(cell.ticket_count(), 2);
        assert_eq!(registry.lease_count(1), 1);
        assert!(cell.atlas_id(2).is_ok());
        assert_eq!(cell.atlas_id(7), Err(EngineError::AtlasSlotNotFound { source_ref: 7 }));

        cell.release_tickets().expect("release");
        assert_eq!(registry.live_slots(), 0);
        assert_eq!(cell.ticket_count(), 0);
    }

    #[test]
    fn test_unknown_source_and_atlas_range() {
        let registry = registry();
        let mut cell = small_cell(&registry);
        assert_eq!(
            cell.place(0, LocalPos::new(0, 0), Tile::new(42, 0, 0)),
            Err(EngineError::UnknownTileSet { source_ref: 42 })
        );
        assert_eq!(
            cell.place(0, LocalPos::new(0, 0), Tile::new(1, 300, 0)),
            Err(EngineError::AtlasOutOfRange { atlas_x: 300, atlas_y: 0 })
        );
        assert_eq!(cell.get_tile(0, LocalPos::new(0, 0)), Some(EMPTY_TILE));
    }

    #[test]
    fn test_place_all_clips_stamp() {
        let registry = registry();
        let mut cell = small_cell(&registry);
        let mut stamp = TileStamp::new(2, 2, 2);
        stamp.set(0, 0, 0, Tile::new(2, 1, 0));
        stamp.set(1, 1, 0, Tile::new(2, 2, 0));
        stamp.set(1, 1, 1, Tile::new(2, 2, 1));

        cell.place_all(1, LocalPos::new(3, 1), &stamp).expect("stamp");

        assert_eq!(cell.get_tile(1, LocalPos::new(3, 1)), Some(Tile::new(2, 1, 0)));
        assert_eq!(cell.get_tile(1, LocalPos::new(3, 2)), Some(EMPTY_TILE));
        // The stamp's second layer lands past the last cell layer
        assert_eq!(cell.pending_updates(), 1);
    }
}
