//! Tile-set registry
//!
//! Stands in for the atlas-merging subsystem: it knows which tile-set sources
//! exist, which of their tiles are solid, and leases atlas slots to cells.
//! Slots live in an arena addressed by integer handle with an explicit
//! refcount table; a slot returns to the free list when its last lease is
//! released.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::TileSetDef;
use crate::error::{EngineError, EngineResult};
use crate::world::Tile;

/// Lookups a cell needs from the tile-set collaborator
pub trait TileDataLookup: Send + Sync {
    /// Whether the tile blocks movement
    fn is_solid(&self, tile: &Tile) -> bool;

    /// Take a lease on the atlas slot of a source, assigning one if needed
    fn acquire_slot(&self, source_ref: i32) -> EngineResult<AtlasSlot>;

    /// Return a lease previously handed out by `acquire_slot`
    fn release_slot(&self, slot: AtlasSlot) -> EngineResult<()>;

    /// Atlas slot currently assigned to a source
    fn atlas_id(&self, source_ref: i32) -> EngineResult<u32>;
}

/// Handle for a leased atlas slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasSlot {
    pub source_ref: i32,
    pub atlas_id: u32,
}

#[derive(Debug)]
struct TileSetEntry {
    name: String,
    solid: FxHashSet<(i32, i32)>,
}

#[derive(Debug, Clone, Copy)]
struct SlotLease {
    source_ref: i32,
    refcount: u32,
}

#[derive(Debug, Default)]
struct SlotArena {
    slots: Vec<Option<SlotLease>>,
    free: Vec<u32>,
    by_source: FxHashMap<i32, u32>,
}

/// Registry of tile-set sources with refcounted atlas slots
#[derive(Debug)]
pub struct TileSetRegistry {
    tilesets: FxHashMap<i32, TileSetEntry>,
    names: FxHashMap<String, i32>,
    arena: Mutex<SlotArena>,
}

impl TileSetRegistry {
    pub fn new(defs: &[TileSetDef]) -> EngineResult<Self> {
        let mut tilesets = FxHashMap::default();
        let mut names = FxHashMap::default();

        for def in defs {
            if def.source_ref < 0 {
                return Err(EngineError::Config {
                    message: format!("tile set {} has negative source ref {}", def.name, def.source_ref),
                });
            }
            if tilesets.contains_key(&def.source_ref) || names.contains_key(&def.name) {
                return Err(EngineError::Config {
                    message: format!("tile set {} ({}) registered twice", def.name, def.source_ref),
                });
            }
            names.insert(def.name.clone(), def.source_ref);
            tilesets.insert(
                def.source_ref,
                TileSetEntry {
                    name: def.name.clone(),
                    solid: def.solid.iter().map(|&[x, y]| (i32::from(x), i32::from(y))).collect(),
                },
            );
        }

        Ok(Self {
            tilesets,
            names,
            arena: Mutex::new(SlotArena::default()),
        })
    }

    /// Source ref registered under a tile-set name
    pub fn tile_set_code(&self, name: &str) -> Option<i32> {
        self.names.get(name).copied()
    }

    pub fn tile_set_name(&self, source_ref: i32) -> Option<&str> {
        self.tilesets.get(&source_ref).map(|entry| entry.name.as_str())
    }

    /// Outstanding leases on a source's slot (0 when unassigned)
    pub fn lease_count(&self, source_ref: i32) -> u32 {
        let arena = self.arena.lock();
        arena
            .by_source
            .get(&source_ref)
            .and_then(|&id| arena.slots[id as usize])
            .map_or(0, |lease| lease.refcount)
    }

    /// Number of slots currently assigned
    pub fn live_slots(&self) -> usize {
        self.arena.lock().by_source.len()
    }
}

impl TileDataLookup for TileSetRegistry {
    fn is_solid(&self, tile: &Tile) -> bool {
        self.tilesets
            .get(&tile.source_ref)
            .map_or(false, |entry| entry.solid.contains(&(tile.atlas_x, tile.atlas_y)))
    }

    fn acquire_slot(&self, source_ref: i32) -> EngineResult<AtlasSlot> {
        if !self.tilesets.contains_key(&source_ref) {
            return Err(EngineError::UnknownTileSet { source_ref });
        }

        let mut arena = self.arena.lock();
        if let Some(&atlas_id) = arena.by_source.get(&source_ref) {
            if let Some(lease) = arena.slots[atlas_id as usize].as_mut() {
                lease.refcount += 1;
                return Ok(AtlasSlot { source_ref, atlas_id });
            }
        }

        let lease = SlotLease {
            source_ref,
            refcount: 1,
        };
        let atlas_id = match arena.free.pop() {
            Some(id) => {
                arena.slots[id as usize] = Some(lease);
                id
            }
            None => {
                arena.slots.push(Some(lease));
                (arena.slots.len() - 1) as u32
            }
        };
        arena.by_source.insert(source_ref, atlas_id);
        log::debug!("[tileset::acquire_slot] source {} merged at atlas slot {}", source_ref, atlas_id);

        Ok(AtlasSlot { source_ref, atlas_id })
    }

    fn release_slot(&self, slot: AtlasSlot) -> EngineResult<()> {
        let mut arena = self.arena.lock();
        let missing = EngineError::AtlasSlotNotFound {
            source_ref: slot.source_ref,
        };

        if arena.by_source.get(&slot.source_ref) != Some(&slot.atlas_id) {
            return Err(missing);
        }
        let lease = match arena.slots[slot.atlas_id as usize].as_mut() {
            Some(lease) if lease.source_ref == slot.source_ref => lease,
            _ => return Err(missing),
        };

        lease.refcount -= 1;
        if lease.refcount == 0 {
            arena.slots[slot.atlas_id as usize] = None;
            arena.by_source.remove(&slot.source_ref);
            arena.free.push(slot.atlas_id);
            log::debug!(
                "[tileset::release_slot] source {} removed from atlas slot {}",
                slot.source_ref,
                slot.atlas_id
            );
        }
        Ok(())
    }

    fn atlas_id(&self, source_ref: i32) -> EngineResult<u32> {
        self.arena
            .lock()
            .by_source
            .get(&source_ref)
            .copied()
            .ok_or(EngineError::AtlasSlotNotFound { source_ref })
    }
}
