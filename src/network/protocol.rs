//! Framing shared by every cell-protocol message
//!
//! A frame is an `i32` magic number followed by length-prefixed segments
//! `(i32 len, bytes)`, all little-endian. The magic number tells request
//! frames from control frames.

use crate::network::error::{protocol_error, NetworkResult};

/// Magic number of cell request/response frames
pub const CELL_REQUEST_MAGIC: i32 = 5;

/// Magic number of control frames (dispose, disconnect)
pub const CONTROL_MAGIC: i32 = 6;

/// Channel cell traffic travels on unless configured otherwise
pub const DEFAULT_CELLS_CHANNEL: u8 = 1;

/// Largest segment accepted from the wire
pub const MAX_SEGMENT_LEN: usize = 16 * 1024 * 1024;

/// Builds a frame segment by segment
#[derive(Debug)]
pub struct FrameWriter {
    bytes: Vec<u8>,
}

impl FrameWriter {
    pub fn new(magic: i32) -> Self {
        Self {
            bytes: magic.to_le_bytes().to_vec(),
        }
    }

    pub fn segment(mut self, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(&(data.len() as i32).to_le_bytes());
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Magic number of a frame, if it is long enough to carry one
pub fn frame_magic(bytes: &[u8]) -> Option<i32> {
    let head: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(i32::from_le_bytes(head))
}

/// Split a frame into its segments after checking the magic number
pub fn split_frame(bytes: &[u8], magic: i32) -> NetworkResult<Vec<&[u8]>> {
    match frame_magic(bytes) {
        Some(found) if found == magic => {}
        Some(found) => return Err(protocol_error(format!("magic number {} (expected {})", found, magic))),
        None => return Err(protocol_error("frame shorter than its magic number")),
    }

    let mut segments = Vec::new();
    let mut rest = &bytes[4..];
    while !rest.is_empty() {
        let len = frame_magic(rest).ok_or_else(|| protocol_error("truncated segment length"))?;
        let len = usize::try_from(len).map_err(|_| protocol_error(format!("negative segment length {}", len)))?;
        if len > MAX_SEGMENT_LEN {
            return Err(protocol_error(format!("segment of {} bytes exceeds the limit", len)));
        }
        let body = &rest[4..];
        if body.len() < len {
            return Err(protocol_error(format!(
                "segment claims {} bytes, {} remain",
                len,
                body.len()
            )));
        }
        segments.push(&body[..len]);
        rest = &body[len..];
    }
    Ok(segments)
}
