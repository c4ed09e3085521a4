//! Consumer side of the cell protocol
//!
//! Responses are matched to waiters by cell key rather than by a transaction
//! id. At most one request per key is on the wire at a time; later callers
//! for the same key join the pending waiter.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{EngineError, EngineResult};
use crate::host::CellKey;
use crate::network::request::{CellRequest, ControlFrame, RequestStatus};
use crate::network::transport::{PacketListener, PeerId, Transport};

type ResponseFuture = Shared<BoxFuture<'static, EngineResult<CellRequest>>>;

struct PendingRequest {
    id: u64,
    sender: oneshot::Sender<EngineResult<CellRequest>>,
    waiter: ResponseFuture,
}

pub struct RequestCorrelator {
    transport: Arc<dyn Transport>,
    peer: PeerId,
    channel: u8,
    pending: DashMap<CellKey, PendingRequest>,
    next_id: AtomicU64,
    sent: AtomicUsize,
}

impl RequestCorrelator {
    pub fn new(transport: Arc<dyn Transport>, peer: PeerId, channel: u8) -> Arc<Self> {
        Arc::new(Self {
            transport,
            peer,
            channel,
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
            sent: AtomicUsize::new(0),
        })
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Ask the host for a cell and wait for the matching response.
    ///
    /// There is no built-in timeout: a lost response leaves the caller waiting
    /// until `disconnect` is called. See `request_cell_timeout`.
    pub async fn request_cell(&self, key: CellKey) -> EngineResult<CellRequest> {
        let (waiter, outgoing) = match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().waiter.clone(), None),
            Entry::Vacant(entry) => {
                let (sender, receiver) = oneshot::channel();
                let coords = key.coords;
                let waiter = async move {
                    receiver
                        .await
                        .unwrap_or(Err(EngineError::Disconnected { coords }))
                }
                .boxed()
                .shared();
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                entry.insert(PendingRequest {
                    id,
                    sender,
                    waiter: waiter.clone(),
                });
                (waiter, Some(id))
            }
        };

        // Sent outside the map lock; a fast response must be able to find the entry
        if let Some(id) = outgoing {
            let frame = CellRequest::open(key.clone()).to_bytes();
            if let Err(e) = self.transport.send(self.channel, self.peer, frame) {
                log::error!("[correlator::request_cell] failed to send request for {}: {}", key, e);
                if let Some((_, pending)) = self.pending.remove_if(&key, |_, pending| pending.id == id) {
                    let _ = pending.sender.send(Err(e.clone()));
                }
                return Err(e);
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            log::debug!("[correlator::request_cell] requested {}", key);
        }

        waiter.await
    }

    /// `request_cell` bounded by `timeout`. Timing out leaves the request
    /// pending, so a later call joins it instead of sending again.
    pub async fn request_cell_timeout(&self, key: CellKey, timeout: Duration) -> EngineResult<CellRequest> {
        let coords = key.coords;
        tokio::time::timeout(timeout, self.request_cell(key))
            .await
            .map_err(|_| EngineError::TimedOut { coords })?
    }

    /// Handle an inbound frame. Returns whether it completed a waiter;
    /// malformed or unsolicited frames are logged and dropped.
    pub fn receive(&self, bytes: &[u8]) -> bool {
        let response = match CellRequest::from_bytes(bytes) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("[correlator::receive] dropped frame of {} bytes: {}", bytes.len(), e);
                return false;
            }
        };
        if response.status() == RequestStatus::Open {
            log::warn!("[correlator::receive] dropped open request for {} sent to a consumer", response.key());
            return false;
        }

        match self.pending.remove(response.key()) {
            Some((key, pending)) => {
                log::debug!("[correlator::receive] {} answered with {:?}", key, response.status());
                let _ = pending.sender.send(Ok(response));
                true
            }
            None => {
                log::debug!("[correlator::receive] no waiter for {}", response.key());
                false
            }
        }
    }

    /// Tell the host this consumer no longer uses a cell
    pub fn send_dispose(&self, key: &CellKey) -> EngineResult<()> {
        let frame = ControlFrame::Dispose { key: key.clone() }.to_bytes();
        self.transport.send(self.channel, self.peer, frame)
    }

    /// Notify the host and fail every pending waiter with `Disconnected`
    pub fn disconnect(&self) {
        if let Err(e) = self.transport.send(self.channel, self.peer, ControlFrame::Disconnect.to_bytes()) {
            log::warn!("[correlator::disconnect] could not notify {}: {}", self.peer, e);
        }
        self.fail_pending();
        log::info!("[correlator::disconnect] disconnected from {}", self.peer);
    }

    fn fail_pending(&self) {
        let keys: Vec<CellKey> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((key, pending)) = self.pending.remove(&key) {
                let _ = pending.sender.send(Err(EngineError::Disconnected { coords: key.coords }));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Requests actually put on the wire
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl PacketListener for RequestCorrelator {
    fn on_packet(&self, channel: u8, peer: PeerId, bytes: &[u8]) {
        if channel == self.channel && peer == self.peer {
            self.receive(bytes);
        }
    }

    fn on_peer_disconnected(&self, peer: PeerId) {
        if peer == self.peer {
            log::info!("[correlator::on_peer_disconnected] {} went away", peer);
            self.fail_pending();
        }
    }
}
