use serde::{Deserialize, Serialize};

/// Fixed grid dimensions shared by every cell of a world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellDims {
    pub width: usize,
    pub height: usize,
    pub layers: usize,
}

impl CellDims {
    pub const fn new(width: usize, height: usize, layers: usize) -> Self {
        Self { width, height, layers }
    }

    /// Number of tile slots across all layers
    pub const fn volume(&self) -> usize {
        self.width * self.height * self.layers
    }

    /// Number of columns in a single layer
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn contains(&self, pos: LocalPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as usize) < self.width && (pos.y as usize) < self.height
    }
}

impl Default for CellDims {
    fn default() -> Self {
        Self::new(64, 64, 3)
    }
}

/// Position of a cell in the world (cell coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
}

impl CellPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Create a new cell position offset by the given amounts
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Largest per-axis distance to another cell
    pub fn chebyshev_distance(&self, other: CellPos) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// Every cell within `radius` of this one, row by row
    pub fn window(&self, radius: i32) -> impl Iterator<Item = CellPos> {
        let center = *self;
        (-radius..=radius)
            .flat_map(move |dx| (-radius..=radius).map(move |dy| center.offset(dx, dy)))
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.x.to_le_bytes());
        out[4..].copy_from_slice(&self.y.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 8 {
            return None;
        }
        let x = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let y = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Some(Self::new(x, y))
    }
}

/// Position of a tile inside a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPos {
    pub x: i32,
    pub y: i32,
}

impl LocalPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Position of a tile in the world (tile coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldPos {
    pub x: i32,
    pub y: i32,
}

impl WorldPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Get the cell this tile belongs to
    pub fn to_cell_pos(&self, dims: CellDims) -> CellPos {
        CellPos::new(
            self.x.div_euclid(dims.width as i32),
            self.y.div_euclid(dims.height as i32),
        )
    }

    /// Get the cell this tile belongs to and its position inside that cell
    pub fn to_cell_coords(&self, dims: CellDims) -> (CellPos, LocalPos) {
        let local = LocalPos::new(
            self.x.rem_euclid(dims.width as i32),
            self.y.rem_euclid(dims.height as i32),
        );
        (self.to_cell_pos(dims), local)
    }
}
