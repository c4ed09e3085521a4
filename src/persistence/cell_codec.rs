//! Palette-based binary format for cells
//!
//! ```text
//! header: i32 source_count
//!         per source: i32 source_ref, i32 tile_count, tile_count x (u8 atlas_x, u8 atlas_y)
//! body:   one code per slot in layer -> column -> row order, packed MSB-first
//!         at ceil(log2(unique_tiles + 1)) bits per code, last byte zero-padded
//! ```
//!
//! Code 0 is the empty tile. Codes 1.. follow the header order: sources in
//! order of first appearance, tiles in order of first appearance within their
//! source. Appearance is scanned layer -> row -> column, which differs from
//! the body order. The format is not versioned; the decoder must be given the same
//! cell dimensions the encoder used. Solidity is not stored.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::EngineResult;
use crate::persistence::bit_codec::{pack_codes, representative_bits, unpack_codes};
use crate::persistence::CodecError;
use crate::world::{Cell, CellDims, LocalPos, Tile, TileDataLookup, EMPTY_TILE};

/// Distinct tiles of one source, in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
    pub source_ref: i32,
    pub atlas: Vec<(u8, u8)>,
}

/// Encodes and decodes cells of a fixed size
#[derive(Debug, Clone, Copy)]
pub struct CellCodec {
    dims: CellDims,
}

impl CellCodec {
    pub fn new(dims: CellDims) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> CellDims {
        self.dims
    }

    /// Distinct non-empty tiles present in the cell, grouped by source
    pub fn palette(&self, cell: &Cell) -> Result<Vec<SourceGroup>, CodecError> {
        let mut groups: Vec<SourceGroup> = Vec::new();
        let mut group_index: FxHashMap<i32, usize> = FxHashMap::default();
        let mut seen: FxHashSet<Tile> = FxHashSet::default();

        let dims = cell.dims();
        let row_major = (0..dims.layers).flat_map(|layer| {
            (0..dims.height as i32).flat_map(move |y| {
                (0..dims.width as i32).filter_map(move |x| cell.get_tile(layer, LocalPos::new(x, y)))
            })
        });

        for tile in row_major {
            if tile.is_empty() || !seen.insert(tile) {
                continue;
            }
            let atlas = match (u8::try_from(tile.atlas_x), u8::try_from(tile.atlas_y)) {
                (Ok(x), Ok(y)) => (x, y),
                _ => {
                    return Err(CodecError::AtlasOutOfRange {
                        atlas_x: tile.atlas_x,
                        atlas_y: tile.atlas_y,
                    })
                }
            };
            let index = *group_index.entry(tile.source_ref).or_insert_with(|| {
                groups.push(SourceGroup {
                    source_ref: tile.source_ref,
                    atlas: Vec::new(),
                });
                groups.len() - 1
            });
            groups[index].atlas.push(atlas);
        }

        Ok(groups)
    }

    pub fn encode(&self, cell: &Cell) -> Result<Vec<u8>, CodecError> {
        if cell.dims() != self.dims {
            return Err(CodecError::MalformedHeader(format!(
                "cell is {:?}, codec expects {:?}",
                cell.dims(),
                self.dims
            )));
        }

        let groups = self.palette(cell)?;

        let mut codes: FxHashMap<Tile, u32> = FxHashMap::default();
        codes.insert(EMPTY_TILE, 0);
        let header_len = 4 + groups.iter().map(|g| 8 + 2 * g.atlas.len()).sum::<usize>();
        let mut output = Vec::with_capacity(header_len);

        output.extend_from_slice(&(groups.len() as i32).to_le_bytes());
        for group in &groups {
            output.extend_from_slice(&group.source_ref.to_le_bytes());
            output.extend_from_slice(&(group.atlas.len() as i32).to_le_bytes());
            for &(x, y) in &group.atlas {
                output.push(x);
                output.push(y);
                let code = codes.len() as u32;
                codes.insert(Tile::new(group.source_ref, i32::from(x), i32::from(y)), code);
            }
        }

        let bits = representative_bits(codes.len());
        let stream: Vec<u32> = cell.tiles().map(|tile| codes[&tile]).collect();
        output.extend(pack_codes(&stream, bits)?);

        log::trace!(
            "[cell_codec::encode] {} unique tiles at {} bits, {} bytes",
            codes.len() - 1,
            bits,
            output.len()
        );
        Ok(output)
    }

    /// Rebuild a cell. Trailing bytes past the body are ignored.
    pub fn decode(&self, bytes: &[u8], lookup: Arc<dyn TileDataLookup>) -> EngineResult<Cell> {
        let (palette, header_len) = self.decode_header(bytes)?;

        let volume = self.dims.volume();
        let bits = representative_bits(palette.len());
        let body_len = (bits as usize * volume).div_ceil(8);
        let body = &bytes[header_len..];
        if body.len() < body_len {
            return Err(CodecError::Truncated {
                section: "body",
                needed: body_len,
                found: body.len(),
            }
            .into());
        }
        let codes = unpack_codes(&body[..body_len], bits, volume)?;

        let (width, height) = (self.dims.width, self.dims.height);
        let mut cell = Cell::new(self.dims, lookup);
        for (i, &code) in codes.iter().enumerate() {
            let tile = *palette.get(code as usize).ok_or(CodecError::InvalidCode {
                code,
                palette_size: palette.len(),
            })?;
            if tile.is_empty() {
                continue;
            }
            let layer = i / (width * height);
            let x = (i / height) % width;
            let y = i % height;
            cell.place(layer, LocalPos::new(x as i32, y as i32), tile)?;
        }
        cell.settle();
        Ok(cell)
    }

    /// Palette (empty tile first) and the header length in bytes
    fn decode_header(&self, bytes: &[u8]) -> Result<(Vec<Tile>, usize), CodecError> {
        let mut reader = HeaderReader { bytes, pos: 0 };

        let source_count = reader.read_i32()?;
        if source_count < 0 {
            return Err(CodecError::MalformedHeader(format!("negative source count {}", source_count)));
        }

        let mut palette = vec![EMPTY_TILE];
        for _ in 0..source_count {
            let source_ref = reader.read_i32()?;
            let tile_count = reader.read_i32()?;
            if tile_count < 0 {
                return Err(CodecError::MalformedHeader(format!(
                    "source {} has negative tile count {}",
                    source_ref, tile_count
                )));
            }
            for _ in 0..tile_count {
                let x = reader.read_u8()?;
                let y = reader.read_u8()?;
                palette.push(Tile::new(source_ref, i32::from(x), i32::from(y)));
            }
        }

        Ok((palette, reader.pos))
    }
}

struct HeaderReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl HeaderReader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated {
                section: "header",
                needed: end,
                found: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tilesets;
    use crate::world::{TileSetRegistry, TileStamp};

    fn registry() -> Arc<TileSetRegistry> {
        Arc::new(TileSetRegistry::new(&default_tilesets()).expect("valid"))
    }

    fn assert_same_tiles(a: &Cell, b: &Cell) {
        let dims = a.dims();
        for layer in 0..dims.layers {
            for x in 0..dims.width as i32 {
                for y in 0..dims.height as i32 {
                    let pos = LocalPos::new(x, y);
                    assert_eq!(a.get_tile(layer, pos), b.get_tile(layer, pos), "layer {} at {:?}", layer, pos);
                }
            }
        }
    }

    #[test]
    fn test_round_trip_preserves_every_slot() {
        let registry = registry();
        let dims = CellDims::new(7, 5, 3);
        let codec = CellCodec::new(dims);
        let mut cell = Cell::new(dims, registry.clone());

        for x in 0..7 {
            for y in 0..5 {
                let atlas = (x * 5 + y) % 6;
                cell.place(0, LocalPos::new(x, y), Tile::new(1, atlas, 255 - atlas)).expect("ground");
            }
        }
        cell.place(1, LocalPos::new(6, 4), Tile::new(2, 0, 0)).expect("wall");
        cell.place(2, LocalPos::new(0, 0), Tile::new(2, 255, 255)).expect("corner");

        let bytes = codec.encode(&cell).expect("encode");
        let decoded = codec.decode(&bytes, registry.clone()).expect("decode");

        assert_same_tiles(&cell, &decoded);
        assert!(decoded.is_solid(LocalPos::new(6, 4)));
        assert!(!decoded.is_dirty());
        assert_eq!(decoded.pending_updates(), 0);
    }

    #[test]
    fn test_empty_cell_round_trip() {
        let registry = registry();
        let dims = CellDims::new(4, 4, 2);
        let codec = CellCodec::new(dims);
        let cell = Cell::new(dims, registry.clone());

        let bytes = codec.encode(&cell).expect("encode");
        // count + one bit per slot
        assert_eq!(bytes.len(), 4 + 4);
        assert_same_tiles(&cell, &codec.decode(&bytes, registry).expect("decode"));
    }

    #[test]
    fn test_palette_is_minimal() {
        let registry = registry();
        let dims = CellDims::new(4, 4, 1);
        let codec = CellCodec::new(dims);
        let mut cell = Cell::new(dims, registry);

        // The overwritten tile still has a code inside the cell but must not be encoded
        cell.place(0, LocalPos::new(0, 0), Tile::new(1, 9, 9)).expect("place");
        let mut stamp = TileStamp::new(4, 4, 1);
        for x in 0..4 {
            for y in 0..4 {
                stamp.set(x, y, 0, Tile::new(1 + (x % 2) as i32, 3, 0));
            }
        }
        cell.place_all(0, LocalPos::new(0, 0), &stamp).expect("stamp");
        cell.place(0, LocalPos::new(2, 2), Tile::new(1, 4, 0)).expect("place");

        let groups = codec.palette(&cell).expect("palette");
        assert_eq!(
            groups,
            vec![
                SourceGroup { source_ref: 1, atlas: vec![(3, 0), (4, 0)] },
                SourceGroup { source_ref: 2, atlas: vec![(3, 0)] },
            ]
        );

        let bytes = codec.encode(&cell).expect("encode");
        // 3 distinct tiles + empty -> 2 bits per slot
        let header_len = 4 + (8 + 4) + (8 + 2);
        assert_eq!(bytes.len(), header_len + (2 * 16) / 8);
    }

    #[test]
    fn test_palette_discovers_tiles_row_by_row() {
        let registry = registry();
        let dims = CellDims::new(3, 3, 1);
        let codec = CellCodec::new(dims);
        let mut cell = Cell::new(dims, registry);
        // (0, 1) comes first in the body, (2, 0) comes first in the header
        cell.place(0, LocalPos::new(0, 1), Tile::new(1, 5, 0)).expect("place");
        cell.place(0, LocalPos::new(2, 0), Tile::new(1, 6, 0)).expect("place");

        let groups = codec.palette(&cell).expect("palette");
        assert_eq!(groups, vec![SourceGroup { source_ref: 1, atlas: vec![(6, 0), (5, 0)] }]);

        let bytes = codec.encode(&cell).expect("encode");
        assert_eq!(&bytes[12..16], &[6, 0, 5, 0]);
        // 2 bits per slot; column-major body: (0,0)=0 (0,1)=2 (0,2)=0 (1,*)=0 (2,0)=1
        assert_eq!(bytes[16], 0b0010_0000);
        assert_eq!(bytes[17], 0b0000_0100);
    }

    #[test]
    fn test_header_layout() {
        let registry = registry();
        let dims = CellDims::new(2, 2, 1);
        let codec = CellCodec::new(dims);
        let mut cell = Cell::new(dims, registry);
        cell.place(0, LocalPos::new(0, 1), Tile::new(2, 7, 8)).expect("place");

        let bytes = codec.encode(&cell).expect("encode");
        assert_eq!(&bytes[..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
        assert_eq!(&bytes[12..14], &[7, 8]);
        // codes 0,1,0,0 at one bit each, column-major within the layer
        assert_eq!(bytes[14], 0b0100_0000);
        assert_eq!(bytes.len(), 15);
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let registry = registry();
        let dims = CellDims::new(8, 8, 3);
        let codec = CellCodec::new(dims);
        let mut cell = Cell::new(dims, registry.clone());
        cell.place(0, LocalPos::new(3, 3), Tile::new(1, 1, 1)).expect("place");

        let bytes = codec.encode(&cell).expect("encode");
        assert!(codec.decode(&bytes[..bytes.len() - 1], registry.clone()).is_err());
        assert!(codec.decode(&bytes[..6], registry.clone()).is_err());
        assert!(codec.decode(&[], registry).is_err());
    }

    #[test]
    fn test_invalid_code_is_rejected() {
        let registry = registry();
        let dims = CellDims::new(2, 2, 1);
        let codec = CellCodec::new(dims);

        // Two tiles plus empty gives 2-bit codes, so an all-ones body holds code 3
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 1, 0]);
        bytes.push(0b1111_1111);

        let err = codec.decode(&bytes, registry).expect_err("code 3 has no tile");
        assert!(err.to_string().contains("palette code 3"));
    }

    #[test]
    fn test_dims_mismatch_is_rejected() {
        let registry = registry();
        let cell = Cell::new(CellDims::new(2, 2, 1), registry);
        assert!(matches!(
            CellCodec::new(CellDims::new(4, 4, 1)).encode(&cell),
            Err(CodecError::MalformedHeader(_))
        ));
    }
}
