//! Cell protocol over a byte-oriented transport
//!
//! `RequestCorrelator` is the consumer side, `CellResponder` the host side.
//! `LocalTransport` connects the two in-process.

pub mod correlator;
pub mod error;
pub mod protocol;
pub mod request;
pub mod responder;
pub mod transport;

pub use correlator::RequestCorrelator;
pub use error::{protocol_error, transport_error, NetworkResult};
pub use protocol::{CELL_REQUEST_MAGIC, CONTROL_MAGIC, DEFAULT_CELLS_CHANNEL};
pub use request::{CellRequest, ControlFrame, Frame, RequestStatus};
pub use responder::CellResponder;
pub use transport::{ListenerId, ListenerRegistry, LocalTransport, PacketListener, PeerId, Transport};
