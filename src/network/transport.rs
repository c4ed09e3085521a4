//! Transport seam and an in-process implementation
//!
//! The correlator and responder only need `Transport::send` plus a way to be
//! told about inbound packets. Listeners are registered per channel and stay
//! registered until they are explicitly unsubscribed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::network::error::{transport_error, NetworkResult};

/// A remote endpoint as seen by the local side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Outbound half of a byte-oriented transport
pub trait Transport: Send + Sync {
    fn send(&self, channel: u8, peer: PeerId, bytes: Vec<u8>) -> NetworkResult<()>;
}

/// Receives inbound packets for the channels it subscribed to
pub trait PacketListener: Send + Sync {
    fn on_packet(&self, channel: u8, peer: PeerId, bytes: &[u8]);

    fn on_peer_disconnected(&self, _peer: PeerId) {}
}

/// Handle returned by `ListenerRegistry::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Channel-keyed packet listeners with explicit unsubscribe
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<FxHashMap<u8, Vec<(ListenerId, Arc<dyn PacketListener>)>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: u8, listener: Arc<dyn PacketListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().entry(channel).or_default().push((id, listener));
        log::debug!("[transport::subscribe] listener {:?} on channel {}", id, channel);
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
        }
        listeners.retain(|_, entries| !entries.is_empty());
        removed
    }

    pub fn listener_count(&self, channel: u8) -> usize {
        self.listeners.read().get(&channel).map_or(0, Vec::len)
    }

    /// Deliver a packet to every listener on its channel, returning how many
    /// listeners saw it
    pub fn dispatch(&self, channel: u8, peer: PeerId, bytes: &[u8]) -> usize {
        let targets = self.snapshot(Some(channel));
        for listener in &targets {
            listener.on_packet(channel, peer, bytes);
        }
        targets.len()
    }

    pub fn dispatch_disconnect(&self, peer: PeerId) {
        for listener in self.snapshot(None) {
            listener.on_peer_disconnected(peer);
        }
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    // Listeners run outside the lock so they may subscribe or send freely
    fn snapshot(&self, channel: Option<u8>) -> Vec<Arc<dyn PacketListener>> {
        let listeners = self.listeners.read();
        match channel {
            Some(channel) => listeners
                .get(&channel)
                .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default(),
            None => listeners.values().flatten().map(|(_, l)| l.clone()).collect(),
        }
    }
}

enum Delivery {
    Packet { channel: u8, from: PeerId, bytes: Vec<u8> },
    PeerDisconnected(PeerId),
    Shutdown,
}

/// One end of an in-process connection.
///
/// Each endpoint runs a dispatch thread that drains its inbound queue into its
/// listener registry, so listeners never run on the sender's thread.
pub struct LocalTransport {
    local_id: PeerId,
    remote_id: PeerId,
    outbound: Sender<Delivery>,
    inbound: Sender<Delivery>,
    registry: Arc<ListenerRegistry>,
    drop_outbound: AtomicBool,
    closed: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl LocalTransport {
    /// Two connected endpoints; the first is peer 1 and the second peer 2 as
    /// seen from the other side
    pub fn pair() -> (Arc<LocalTransport>, Arc<LocalTransport>) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        let a = Self::endpoint(PeerId(1), PeerId(2), b_tx.clone(), a_tx.clone(), a_rx);
        let b = Self::endpoint(PeerId(2), PeerId(1), a_tx, b_tx, b_rx);
        (a, b)
    }

    fn endpoint(
        local_id: PeerId,
        remote_id: PeerId,
        outbound: Sender<Delivery>,
        inbound: Sender<Delivery>,
        receiver: Receiver<Delivery>,
    ) -> Arc<Self> {
        let registry = Arc::new(ListenerRegistry::new());
        let thread_registry = registry.clone();
        let dispatcher = std::thread::Builder::new()
            .name(format!("local-transport-{}", local_id.0))
            .spawn(move || Self::dispatch_loop(receiver, thread_registry))
            .map_err(|e| log::error!("[transport::pair] failed to start dispatcher: {}", e))
            .ok();

        Arc::new(Self {
            local_id,
            remote_id,
            outbound,
            inbound,
            registry,
            drop_outbound: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(dispatcher),
        })
    }

    fn dispatch_loop(receiver: Receiver<Delivery>, registry: Arc<ListenerRegistry>) {
        while let Ok(delivery) = receiver.recv() {
            match delivery {
                Delivery::Packet { channel, from, bytes } => {
                    if registry.dispatch(channel, from, &bytes) == 0 {
                        log::debug!("[transport::dispatch] no listener on channel {}", channel);
                    }
                }
                Delivery::PeerDisconnected(peer) => registry.dispatch_disconnect(peer),
                Delivery::Shutdown => break,
            }
        }
        // Drop listeners so their references back to this endpoint go too
        registry.clear();
    }

    /// This endpoint's id as seen by its remote
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// The only peer this endpoint can reach
    pub fn remote_id(&self) -> PeerId {
        self.remote_id
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Silently discard outbound packets, as a lossy link would
    pub fn set_drop_outbound(&self, drop: bool) {
        self.drop_outbound.store(drop, Ordering::SeqCst);
    }

    /// Stop dispatching, tell the remote side and wait for the dispatcher
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.send(Delivery::PeerDisconnected(self.local_id));
        let _ = self.inbound.send(Delivery::Shutdown);

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            // close() may be called from a listener running on the dispatcher itself
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                log::warn!("[transport::close] dispatcher for {} panicked", self.local_id);
            }
        }
        log::info!("[transport::close] {} closed", self.local_id);
    }
}

impl Transport for LocalTransport {
    fn send(&self, channel: u8, peer: PeerId, bytes: Vec<u8>) -> NetworkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(transport_error(format!("{} is closed", self.local_id)));
        }
        if peer != self.remote_id {
            return Err(transport_error(format!("{} is not connected to {}", self.local_id, peer)));
        }
        if self.drop_outbound.load(Ordering::SeqCst) {
            log::debug!("[transport::send] dropped {} bytes to {}", bytes.len(), peer);
            return Ok(());
        }

        self.outbound
            .send(Delivery::Packet {
                channel,
                from: self.local_id,
                bytes,
            })
            .map_err(|_| transport_error(format!("{} has shut down", peer)))
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        packets: Sender<(u8, PeerId, Vec<u8>)>,
        disconnects: Sender<PeerId>,
    }

    impl PacketListener for Recorder {
        fn on_packet(&self, channel: u8, peer: PeerId, bytes: &[u8]) {
            let _ = self.packets.send((channel, peer, bytes.to_vec()));
        }

        fn on_peer_disconnected(&self, peer: PeerId) {
            let _ = self.disconnects.send(peer);
        }
    }

    fn recorder() -> (Arc<Recorder>, Receiver<(u8, PeerId, Vec<u8>)>, Receiver<PeerId>) {
        let (packets, packets_rx) = unbounded();
        let (disconnects, disconnects_rx) = unbounded();
        (Arc::new(Recorder { packets, disconnects }), packets_rx, disconnects_rx)
    }

    #[test]
    fn test_pair_delivers_by_channel() {
        let (a, b) = LocalTransport::pair();
        let (listener, packets, _) = recorder();
        b.listeners().subscribe(1, listener);

        a.send(3, b.local_id(), vec![0]).expect("send on unheard channel");
        a.send(1, b.local_id(), vec![7, 7]).expect("send");

        let got = packets.recv_timeout(Duration::from_secs(2)).expect("delivered");
        assert_eq!(got, (1, PeerId(1), vec![7, 7]));
        assert!(packets.try_recv().is_err());
    }

    #[test]
    fn test_unknown_peer_and_closed_endpoint() {
        let (a, b) = LocalTransport::pair();
        assert!(a.send(1, PeerId(9), vec![]).is_err());

        let (listener, _, disconnects) = recorder();
        b.listeners().subscribe(1, listener);
        a.close();
        assert!(a.send(1, b.local_id(), vec![]).is_err());
        assert_eq!(disconnects.recv_timeout(Duration::from_secs(2)).expect("notified"), PeerId(1));
    }

    #[test]
    fn test_unsubscribe() {
        let registry = ListenerRegistry::new();
        let (listener, packets, _) = recorder();
        let id = registry.subscribe(1, listener);
        assert_eq!(registry.dispatch(1, PeerId(1), &[1]), 1);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.dispatch(1, PeerId(1), &[2]), 0);
        assert_eq!(registry.listener_count(1), 0);
        assert_eq!(packets.try_iter().count(), 1);
    }

    #[test]
    fn test_dropped_outbound() {
        let (a, b) = LocalTransport::pair();
        let (listener, packets, _) = recorder();
        b.listeners().subscribe(1, listener);
        a.set_drop_outbound(true);
        a.send(1, b.local_id(), vec![1]).expect("lossy send still succeeds");
        assert!(packets.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
