//! Persistence-specific error handling

use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::persistence::CodecError;

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors that can occur during persistence operations
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Compression error: {0}")]
    Compression(String),
}

/// Create a save error
pub fn save_error(path: impl AsRef<Path>, error: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("Save failed for {}: {}", path.as_ref().display(), error),
    ))
}

/// Create a load error
pub fn load_error(path: impl AsRef<Path>, error: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("Load failed for {}: {}", path.as_ref().display(), error),
    ))
}

/// Create a corrupted data error
pub fn corrupted_data(reason: impl Into<String>) -> PersistenceError {
    PersistenceError::CorruptedData(reason.into())
}

/// Write `data` to `path` through a sibling temp file and a rename, so a
/// reader never observes a half-written file.
pub fn atomic_write(path: &Path, data: &[u8]) -> PersistenceResult<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| save_error(path, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| save_error(&tmp_path, e))?;
        file.write_all(data).map_err(|e| save_error(&tmp_path, e))?;
        file.sync_all().map_err(|e| save_error(&tmp_path, e))?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(save_error(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_and_cleans_up() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("0_0.cell");

        atomic_write(&path, b"first").expect("write");
        atomic_write(&path, b"second").expect("overwrite");

        assert_eq!(fs::read(&path).expect("read"), b"second");
        assert!(!dir.path().join("0_0.cell.tmp").exists());
    }

    #[test]
    fn test_atomic_write_missing_dir_fails() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("missing").join("0_0.cell");
        assert!(matches!(atomic_write(&path, b"x"), Err(PersistenceError::Io(_))));
    }
}
