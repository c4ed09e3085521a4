//! Storage backends for encoded cells
//!
//! Backends deal only in encoded bytes; turning them into cells is the
//! space's job.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::persistence::error::{atomic_write, corrupted_data, load_error};
use crate::persistence::{CompressionLevel, CompressionType, Compressor, PersistenceResult};
use crate::world::CellPos;

/// Magic bytes at the start of every stored cell file
pub const CELL_FILE_MAGIC: [u8; 4] = *b"TCEL";

/// magic + compression tag + crc32
const FILE_HEADER_LEN: usize = 4 + 1 + 4;

/// Persisted bytes per cell coordinate
pub trait CellStorage: Send + Sync {
    /// Stored bytes, or `None` if the cell was never stored
    fn read(&self, coords: CellPos) -> PersistenceResult<Option<Vec<u8>>>;

    fn write(&self, coords: CellPos, bytes: &[u8]) -> PersistenceResult<()>;
}

/// One file per cell, `<x>_<y>.cell`, under a per-space directory
#[derive(Debug)]
pub struct FileCellStore {
    dir: PathBuf,
    compressor: Compressor,
}

impl FileCellStore {
    /// Open (creating if needed) the directory `<save_dir>/<space_name>`
    pub fn open(save_dir: &Path, space_name: &str, compression: CompressionType) -> PersistenceResult<Self> {
        let dir = save_dir.join(space_name);
        fs::create_dir_all(&dir)?;
        log::info!("[cell_store::open] storing {} cells in {}", space_name, dir.display());
        Ok(Self {
            dir,
            compressor: Compressor::new(compression, CompressionLevel::Default),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cell_path(&self, coords: CellPos) -> PathBuf {
        self.dir.join(format!("{}_{}.cell", coords.x, coords.y))
    }

    fn unwrap_file(&self, path: &Path, raw: &[u8]) -> PersistenceResult<Vec<u8>> {
        if raw.len() < FILE_HEADER_LEN {
            return Err(corrupted_data(format!("{} is too short to hold a cell header", path.display())));
        }
        if raw[..4] != CELL_FILE_MAGIC {
            return Err(corrupted_data(format!("{} has an invalid magic number", path.display())));
        }
        let compression = CompressionType::from_tag(raw[4])
            .ok_or_else(|| corrupted_data(format!("{} has unknown compression tag {}", path.display(), raw[4])))?;
        let stored_crc = u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]);
        let body = &raw[FILE_HEADER_LEN..];
        if crc32fast::hash(body) != stored_crc {
            return Err(corrupted_data(format!("{} failed checksum validation", path.display())));
        }

        Compressor::new(compression, CompressionLevel::Default).decompress(body)
    }
}

impl CellStorage for FileCellStore {
    fn read(&self, coords: CellPos) -> PersistenceResult<Option<Vec<u8>>> {
        let path = self.cell_path(coords);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(load_error(&path, e)),
        };
        self.unwrap_file(&path, &raw).map(Some)
    }

    fn write(&self, coords: CellPos, bytes: &[u8]) -> PersistenceResult<()> {
        let body = self.compressor.compress(bytes)?;
        let mut file = Vec::with_capacity(FILE_HEADER_LEN + body.len());
        file.extend_from_slice(&CELL_FILE_MAGIC);
        file.push(self.compressor.compression_type().tag());
        file.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        file.extend_from_slice(&body);

        let path = self.cell_path(coords);
        atomic_write(&path, &file)?;
        log::debug!("[cell_store::write] wrote {} ({} bytes)", path.display(), file.len());
        Ok(())
    }
}

/// In-memory backend that counts its traffic
#[derive(Debug, Default)]
pub struct MemoryCellStore {
    cells: DashMap<CellPos, Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryCellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, coords: CellPos) -> bool {
        self.cells.contains_key(&coords)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl CellStorage for MemoryCellStore {
    fn read(&self, coords: CellPos) -> PersistenceResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.cells.get(&coords).map(|entry| entry.value().clone()))
    }

    fn write(&self, coords: CellPos, bytes: &[u8]) -> PersistenceResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.cells.insert(coords, bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceError;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        for compression in [CompressionType::None, CompressionType::Gzip, CompressionType::Zlib] {
            let store = FileCellStore::open(dir.path(), "Overworld", compression).expect("open");
            let coords = CellPos::new(-3, 12);
            let bytes: Vec<u8> = (0..500u32).map(|i| (i % 13) as u8).collect();

            assert_eq!(store.read(coords).expect("read"), None);
            store.write(coords, &bytes).expect("write");
            assert!(store.cell_path(coords).ends_with("Overworld/-3_12.cell"));
            assert_eq!(store.read(coords).expect("read"), Some(bytes));
            fs::remove_file(store.cell_path(coords)).expect("cleanup");
        }
    }

    #[test]
    fn test_file_store_detects_corruption() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileCellStore::open(dir.path(), "Overworld", CompressionType::Gzip).expect("open");
        let coords = CellPos::new(1, 1);
        store.write(coords, &[1, 2, 3, 4, 5, 6, 7, 8]).expect("write");

        let path = store.cell_path(coords);
        let mut raw = fs::read(&path).expect("read raw");
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&path, &raw).expect("corrupt body");
        assert!(matches!(store.read(coords), Err(PersistenceError::CorruptedData(_))));

        raw[0] = b'X';
        fs::write(&path, &raw).expect("corrupt magic");
        assert!(matches!(store.read(coords), Err(PersistenceError::CorruptedData(_))));

        fs::write(&path, b"TC").expect("truncate");
        assert!(matches!(store.read(coords), Err(PersistenceError::CorruptedData(_))));
    }

    #[test]
    fn test_file_store_reads_other_compression() {
        let dir = TempDir::new().expect("temp dir");
        let coords = CellPos::new(0, 0);
        FileCellStore::open(dir.path(), "Overworld", CompressionType::Zlib)
            .expect("open")
            .write(coords, b"cell bytes")
            .expect("write");

        let reader = FileCellStore::open(dir.path(), "Overworld", CompressionType::Gzip).expect("open");
        assert_eq!(reader.read(coords).expect("read"), Some(b"cell bytes".to_vec()));
    }

    #[test]
    fn test_memory_store_counts() {
        let store = MemoryCellStore::new();
        assert_eq!(store.read(CellPos::new(0, 0)).expect("read"), None);
        store.write(CellPos::new(0, 0), &[9]).expect("write");
        assert_eq!(store.read(CellPos::new(0, 0)).expect("read"), Some(vec![9]));
        assert_eq!((store.read_count(), store.write_count(), store.len()), (2, 1, 1));
    }
}
