use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression as FlateCompression;
use serde::Deserialize;

use crate::persistence::{PersistenceError, PersistenceResult};

/// Compression applied to stored cell bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// No compression
    None,
    /// Gzip compression
    Gzip,
    /// Zlib compression (smaller framing than gzip)
    Zlib,
}

impl CompressionType {
    /// Tag stored in the file header
    pub fn tag(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Gzip => 1,
            CompressionType::Zlib => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Gzip),
            2 => Some(CompressionType::Zlib),
            _ => None,
        }
    }
}

/// Compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    Fast,
    Default,
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> FlateCompression {
        match self {
            CompressionLevel::Fast => FlateCompression::fast(),
            CompressionLevel::Default => FlateCompression::default(),
            CompressionLevel::Best => FlateCompression::best(),
        }
    }
}

/// Handles compression and decompression of data
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    compression_type: CompressionType,
    compression_level: CompressionLevel,
}

impl Compressor {
    pub fn new(compression_type: CompressionType, compression_level: CompressionLevel) -> Self {
        Self {
            compression_type,
            compression_level,
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    pub fn compress(&self, data: &[u8]) -> PersistenceResult<Vec<u8>> {
        match self.compression_type {
            CompressionType::None => Ok(data.to_vec()),
            CompressionType::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), self.compression_level.to_flate2());
                encoder
                    .write_all(data)
                    .map_err(|e| PersistenceError::Compression(format!("Gzip compression failed: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| PersistenceError::Compression(format!("Gzip finalization failed: {}", e)))
            }
            CompressionType::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), self.compression_level.to_flate2());
                encoder
                    .write_all(data)
                    .map_err(|e| PersistenceError::Compression(format!("Zlib compression failed: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| PersistenceError::Compression(format!("Zlib finalization failed: {}", e)))
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> PersistenceResult<Vec<u8>> {
        let mut decompressed = Vec::new();
        match self.compression_type {
            CompressionType::None => return Ok(data.to_vec()),
            CompressionType::Gzip => GzDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(|e| PersistenceError::Compression(format!("Gzip decompression failed: {}", e)))?,
            CompressionType::Zlib => ZlibDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(|e| PersistenceError::Compression(format!("Zlib decompression failed: {}", e)))?,
        };
        Ok(decompressed)
    }
}
