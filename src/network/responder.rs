//! Host side of the cell protocol
//!
//! Each peer that sends a frame is connected to the host as a consumer.
//! Requests are answered from the host asynchronously; the response goes
//! back to the peer that asked.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;

use crate::error::EngineResult;
use crate::host::{CellHost, CellKey, ConsumerId};
use crate::network::request::{CellRequest, ControlFrame, Frame, RequestStatus};
use crate::network::transport::{PacketListener, PeerId, Transport};

pub struct CellResponder {
    host: Arc<CellHost>,
    transport: Arc<dyn Transport>,
    channel: u8,
    runtime: Handle,
    peers: Mutex<FxHashMap<PeerId, ConsumerId>>,
}

impl CellResponder {
    /// `runtime` runs the cell fetches; packets usually arrive on a transport
    /// thread outside any runtime.
    pub fn new(host: Arc<CellHost>, transport: Arc<dyn Transport>, channel: u8, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            host,
            transport,
            channel,
            runtime,
            peers: Mutex::new(FxHashMap::default()),
        })
    }

    fn consumer_for(&self, peer: PeerId) -> ConsumerId {
        let mut peers = self.peers.lock();
        if let Some(&consumer) = peers.get(&peer) {
            return consumer;
        }
        let consumer = self.host.allocate_consumer_id();
        peers.insert(peer, consumer);
        drop(peers);

        self.host.connect(consumer);
        log::info!("[responder::connect] {} is {}", peer, consumer);
        consumer
    }

    fn disconnect_peer(&self, peer: PeerId) {
        let consumer = self.peers.lock().remove(&peer);
        if let Some(consumer) = consumer {
            if let Err(e) = self.host.flush_all() {
                log::warn!("[responder::disconnect] flush after {} left failed: {}", peer, e);
            }
            self.host.disconnect(consumer);
        }
    }

    pub fn connected_peers(&self) -> usize {
        self.peers.lock().len()
    }

    fn handle_request(&self, peer: PeerId, request: CellRequest) {
        if request.status() != RequestStatus::Open {
            log::warn!("[responder::handle_request] {} sent a {:?} frame; dropped", peer, request.status());
            return;
        }
        self.consumer_for(peer);

        let host = self.host.clone();
        let transport = self.transport.clone();
        let channel = self.channel;
        let key = request.key().clone();
        self.runtime.spawn(async move {
            let response = match serve(&host, &key).await {
                Ok(payload) => CellRequest::fulfilled(key, payload),
                Err(e) => {
                    log::error!("[responder::serve] could not serve {} to {}: {}", key, peer, e);
                    CellRequest::failed(key)
                }
            };
            if let Err(e) = transport.send(channel, peer, response.to_bytes()) {
                log::warn!("[responder::serve] response to {} lost: {}", peer, e);
            }
        });
    }

    fn handle_control(&self, peer: PeerId, control: ControlFrame) {
        match control {
            ControlFrame::Dispose { key } => {
                let consumer = self.consumer_for(peer);
                if let Err(e) = self.host.signal_dispose(consumer, &key) {
                    log::warn!("[responder::dispose] flushing {} for {} failed: {}", key, peer, e);
                }
            }
            ControlFrame::Disconnect => {
                log::info!("[responder::disconnect] {} disconnected", peer);
                self.disconnect_peer(peer);
            }
        }
    }
}

async fn serve(host: &Arc<CellHost>, key: &CellKey) -> EngineResult<Vec<u8>> {
    let cell = host.get_cell(key.clone()).await?;
    let codec = host.space(&key.space)?.codec();
    let bytes = codec.encode(&cell.read())?;
    Ok(bytes)
}

impl PacketListener for CellResponder {
    fn on_packet(&self, channel: u8, peer: PeerId, bytes: &[u8]) {
        if channel != self.channel {
            return;
        }
        match Frame::parse(bytes) {
            Ok(Frame::Request(request)) => self.handle_request(peer, request),
            Ok(Frame::Control(control)) => self.handle_control(peer, control),
            Err(e) => log::warn!("[responder::on_packet] dropped frame from {}: {}", peer, e),
        }
    }

    fn on_peer_disconnected(&self, peer: PeerId) {
        self.disconnect_peer(peer);
    }
}
