//! Cell requests and control messages as they travel on the wire
//!
//! ```text
//! request:  magic=5 [space token] [x:i32 y:i32]              -> Open
//!           magic=5 [space token] [x:i32 y:i32] [cell bytes] -> Fulfilled
//!           magic=5 [space token] [x:i32 y:i32] []           -> Error
//! control:  magic=6 [kind=1] [space token] [x:i32 y:i32]     -> Dispose
//!           magic=6 [kind=2]                                 -> Disconnect
//! ```

use std::hash::{Hash, Hasher};

use crate::host::CellKey;
use crate::network::error::{protocol_error, NetworkResult};
use crate::network::protocol::{frame_magic, split_frame, FrameWriter, CELL_REQUEST_MAGIC, CONTROL_MAGIC};
use crate::world::{CellPos, SpaceToken};

const DISPOSE_KIND: u8 = 1;
const DISCONNECT_KIND: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Open,
    Fulfilled,
    Error,
}

/// A request for a cell, or the response to one.
///
/// Requests are identified by their key alone: an open request and its
/// response compare equal.
#[derive(Debug, Clone)]
pub struct CellRequest {
    key: CellKey,
    status: RequestStatus,
    payload: Option<Vec<u8>>,
}

impl CellRequest {
    pub fn open(key: CellKey) -> Self {
        Self {
            key,
            status: RequestStatus::Open,
            payload: None,
        }
    }

    pub fn fulfilled(key: CellKey, payload: Vec<u8>) -> Self {
        Self {
            key,
            status: RequestStatus::Fulfilled,
            payload: Some(payload),
        }
    }

    pub fn failed(key: CellKey) -> Self {
        Self {
            key,
            status: RequestStatus::Error,
            payload: None,
        }
    }

    pub fn key(&self) -> &CellKey {
        &self.key
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let frame = key_segments(FrameWriter::new(CELL_REQUEST_MAGIC), &self.key);
        let frame = match (self.status, &self.payload) {
            (RequestStatus::Open, _) => frame,
            (RequestStatus::Fulfilled, Some(payload)) => frame.segment(payload),
            (RequestStatus::Fulfilled, None) | (RequestStatus::Error, _) => frame.segment(&[]),
        };
        frame.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> NetworkResult<Self> {
        let segments = split_frame(bytes, CELL_REQUEST_MAGIC)?;
        match segments.as_slice() {
            [token, coords] => Ok(Self::open(parse_key(token, coords)?)),
            [token, coords, payload] if payload.is_empty() => Ok(Self::failed(parse_key(token, coords)?)),
            [token, coords, payload] => Ok(Self::fulfilled(parse_key(token, coords)?, payload.to_vec())),
            other => Err(protocol_error(format!("request frame with {} segments", other.len()))),
        }
    }
}

impl PartialEq for CellRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CellRequest {}

impl Hash for CellRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

/// Session-level notifications from a consumer to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// The consumer no longer uses this cell
    Dispose { key: CellKey },
    /// The consumer is going away
    Disconnect,
}

impl ControlFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ControlFrame::Dispose { key } => {
                key_segments(FrameWriter::new(CONTROL_MAGIC).segment(&[DISPOSE_KIND]), key).finish()
            }
            ControlFrame::Disconnect => FrameWriter::new(CONTROL_MAGIC).segment(&[DISCONNECT_KIND]).finish(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> NetworkResult<Self> {
        let segments = split_frame(bytes, CONTROL_MAGIC)?;
        match segments.as_slice() {
            [kind, token, coords] if *kind == [DISPOSE_KIND] => Ok(ControlFrame::Dispose {
                key: parse_key(token, coords)?,
            }),
            [kind] if *kind == [DISCONNECT_KIND] => Ok(ControlFrame::Disconnect),
            _ => Err(protocol_error("unrecognised control frame")),
        }
    }
}

/// Any frame of the cell protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request(CellRequest),
    Control(ControlFrame),
}

impl Frame {
    pub fn parse(bytes: &[u8]) -> NetworkResult<Self> {
        match frame_magic(bytes) {
            Some(CELL_REQUEST_MAGIC) => CellRequest::from_bytes(bytes).map(Frame::Request),
            Some(CONTROL_MAGIC) => ControlFrame::from_bytes(bytes).map(Frame::Control),
            Some(other) => Err(protocol_error(format!("unknown magic number {}", other))),
            None => Err(protocol_error("frame shorter than its magic number")),
        }
    }
}

fn key_segments(frame: FrameWriter, key: &CellKey) -> FrameWriter {
    frame.segment(&key.space.to_bytes()).segment(&key.coords.to_bytes())
}

fn parse_key(token: &[u8], coords: &[u8]) -> NetworkResult<CellKey> {
    let space = SpaceToken::from_bytes(token).ok_or_else(|| protocol_error("unreadable space token"))?;
    let coords = CellPos::from_bytes(coords)
        .ok_or_else(|| protocol_error(format!("cell coordinate segment of {} bytes", coords.len())))?;
    Ok(CellKey::new(space, coords))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key() -> CellKey {
        CellKey::new(SpaceToken::world("Overworld"), CellPos::new(-2, 7))
    }

    #[test]
    fn test_open_request_layout() {
        let bytes = CellRequest::open(key()).to_bytes();
        let mut expected = 5i32.to_le_bytes().to_vec();
        expected.extend_from_slice(&10i32.to_le_bytes());
        expected.push(1);
        expected.extend_from_slice(b"Overworld");
        expected.extend_from_slice(&8i32.to_le_bytes());
        expected.extend_from_slice(&(-2i32).to_le_bytes());
        expected.extend_from_slice(&7i32.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_status_follows_segment_count() {
        let open = CellRequest::from_bytes(&CellRequest::open(key()).to_bytes()).expect("open");
        assert_eq!(open.status(), RequestStatus::Open);
        assert_eq!(open.payload(), None);

        let full = CellRequest::from_bytes(&CellRequest::fulfilled(key(), vec![1, 2, 3]).to_bytes()).expect("full");
        assert_eq!(full.status(), RequestStatus::Fulfilled);
        assert_eq!(full.payload(), Some(&[1u8, 2, 3][..]));

        let failed = CellRequest::from_bytes(&CellRequest::failed(key()).to_bytes()).expect("failed");
        assert_eq!(failed.status(), RequestStatus::Error);
        assert_eq!(failed.key(), &key());
    }

    #[test]
    fn test_equality_ignores_status_and_payload() {
        let open = CellRequest::open(key());
        let full = CellRequest::fulfilled(key(), vec![9; 16]);
        assert_eq!(open, full);

        let mut set = HashSet::new();
        set.insert(open);
        assert!(set.contains(&full));
        assert!(!set.contains(&CellRequest::open(CellKey::new(SpaceToken::world("Overworld"), CellPos::new(0, 0)))));
    }

    #[test]
    fn test_corrupted_magic_is_rejected() {
        let mut bytes = CellRequest::open(key()).to_bytes();
        bytes[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(CellRequest::from_bytes(&bytes).is_err());
        assert!(Frame::parse(&bytes).is_err());
    }

    #[test]
    fn test_control_frames() {
        let dispose = ControlFrame::Dispose { key: key() };
        assert_eq!(Frame::parse(&dispose.to_bytes()).expect("dispose"), Frame::Control(dispose));
        assert_eq!(
            Frame::parse(&ControlFrame::Disconnect.to_bytes()).expect("disconnect"),
            Frame::Control(ControlFrame::Disconnect)
        );
        assert!(ControlFrame::from_bytes(&CellRequest::open(key()).to_bytes()).is_err());
        assert!(ControlFrame::from_bytes(&FrameWriter::new(CONTROL_MAGIC).segment(&[9]).finish()).is_err());
    }

    #[test]
    fn test_malformed_segments() {
        let too_many = FrameWriter::new(CELL_REQUEST_MAGIC)
            .segment(&[1])
            .segment(&[0; 8])
            .segment(&[1])
            .segment(&[1])
            .finish();
        assert!(CellRequest::from_bytes(&too_many).is_err());

        let short_coords = FrameWriter::new(CELL_REQUEST_MAGIC).segment(&[1, b'a']).segment(&[0; 4]).finish();
        assert!(CellRequest::from_bytes(&short_coords).is_err());
    }
}
