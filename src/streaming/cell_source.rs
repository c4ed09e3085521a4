//! Where a window gets its cells from: the local host or a remote one

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{EngineError, EngineResult};
use crate::host::{CellHost, CellKey, ConsumerId};
use crate::network::{protocol_error, RequestCorrelator, RequestStatus};
use crate::persistence::CellCodec;
use crate::world::{CellPos, SharedCell, SpaceToken, TileDataLookup};

pub trait CellSource: Send + Sync {
    fn get_cell(&self, coords: CellPos) -> BoxFuture<'static, EngineResult<SharedCell>>;

    /// The window has dropped this cell
    fn release(&self, coords: CellPos, cell: &SharedCell);
}

/// Cells straight from an in-process host. Connects as a consumer for as
/// long as it lives.
pub struct LocalCellSource {
    host: Arc<CellHost>,
    space: SpaceToken,
    consumer: ConsumerId,
}

impl LocalCellSource {
    pub fn new(host: Arc<CellHost>, space: SpaceToken) -> Self {
        let consumer = host.allocate_consumer_id();
        host.connect(consumer);
        Self { host, space, consumer }
    }

    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }
}

impl CellSource for LocalCellSource {
    fn get_cell(&self, coords: CellPos) -> BoxFuture<'static, EngineResult<SharedCell>> {
        let host = self.host.clone();
        let key = CellKey::new(self.space.clone(), coords);
        async move { host.get_cell(key).await }.boxed()
    }

    fn release(&self, coords: CellPos, cell: &SharedCell) {
        let key = CellKey::new(self.space.clone(), coords);
        let result = match self.host.get_resident(&key) {
            Some(resident) if Arc::ptr_eq(&resident, cell) => self.host.signal_dispose(self.consumer, &key),
            // Evicted (and maybe reloaded) while the window held it
            _ => self.host.flush_cell(&key, cell).map(|_| ()),
        };
        if let Err(e) = result {
            log::warn!("[cell_source::release] failed to store {}: {}", key, e);
        }
    }
}

impl Drop for LocalCellSource {
    fn drop(&mut self) {
        self.host.disconnect(self.consumer);
    }
}

/// Cells requested from a remote host through a correlator. Remote cells
/// are read-only copies; local edits are not sent back.
pub struct RemoteCellSource {
    correlator: Arc<RequestCorrelator>,
    space: SpaceToken,
    codec: CellCodec,
    lookup: Arc<dyn TileDataLookup>,
    timeout: Option<Duration>,
}

impl RemoteCellSource {
    pub fn new(
        correlator: Arc<RequestCorrelator>,
        space: SpaceToken,
        codec: CellCodec,
        lookup: Arc<dyn TileDataLookup>,
    ) -> Self {
        Self {
            correlator,
            space,
            codec,
            lookup,
            timeout: None,
        }
    }

    /// Give up on a request after `timeout` instead of waiting indefinitely
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

async fn fetch_remote(
    correlator: Arc<RequestCorrelator>,
    key: CellKey,
    codec: CellCodec,
    lookup: Arc<dyn TileDataLookup>,
    timeout: Option<Duration>,
) -> EngineResult<SharedCell> {
    let coords = key.coords;
    let response = match timeout {
        Some(timeout) => correlator.request_cell_timeout(key, timeout).await?,
        None => correlator.request_cell(key).await?,
    };
    match response.status() {
        RequestStatus::Fulfilled => {
            let payload = response.payload().unwrap_or_default();
            Ok(codec.decode(payload, lookup)?.into_shared())
        }
        RequestStatus::Error => Err(EngineError::RequestFailed { coords }),
        RequestStatus::Open => Err(protocol_error("response still marked open")),
    }
}

impl CellSource for RemoteCellSource {
    fn get_cell(&self, coords: CellPos) -> BoxFuture<'static, EngineResult<SharedCell>> {
        let key = CellKey::new(self.space.clone(), coords);
        fetch_remote(self.correlator.clone(), key, self.codec, self.lookup.clone(), self.timeout).boxed()
    }

    fn release(&self, coords: CellPos, cell: &SharedCell) {
        let key = CellKey::new(self.space.clone(), coords);
        if let Err(e) = cell.write().release_tickets() {
            log::warn!("[cell_source::release] {}: {}", key, e);
        }
        if let Err(e) = self.correlator.send_dispose(&key) {
            log::warn!("[cell_source::release] dispose for {} not sent: {}", key, e);
        }
    }
}
