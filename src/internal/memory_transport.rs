use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::errors::TransportError;
use crate::interfaces::PeerTransport;
use crate::link::LinkEvent;
use crate::types::PeerId;

/// Links reachable in-process, keyed by (node, peer): the link on `node`
/// that talks to `peer`.
#[derive(Default)]
pub struct MemoryNetwork {
    endpoints: Mutex<HashMap<(PeerId, PeerId), UnboundedSender<LinkEvent>>>,
    connected: Mutex<HashSet<(PeerId, PeerId)>>,
}

fn pair(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a.serialize() <= b.serialize() {
        (a, b)
    } else {
        (b, a)
    }
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, local: PeerId) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            local,
            network: self.clone(),
        })
    }

    pub fn register(&self, node: PeerId, peer: PeerId, sender: UnboundedSender<LinkEvent>) {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((node, peer), sender);
    }

    fn notify(&self, node: PeerId, peer: PeerId, event: LinkEvent) {
        let endpoints = self.endpoints.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = endpoints.get(&(node, peer)) {
            let _ = sender.send(event);
        }
    }

    pub fn is_connected(&self, a: PeerId, b: PeerId) -> bool {
        self.connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&pair(a, b))
    }

    /// Connects both ends; each link starts reestablishing.
    pub fn connect(&self, a: PeerId, b: PeerId) {
        self.connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pair(a, b));
        self.notify(a, b, LinkEvent::PeerConnected);
        self.notify(b, a, LinkEvent::PeerConnected);
    }

    pub fn disconnect(&self, a: PeerId, b: PeerId) {
        let was_connected = self
            .connected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&pair(a, b));
        if was_connected {
            self.notify(a, b, LinkEvent::PeerDisconnected);
            self.notify(b, a, LinkEvent::PeerDisconnected);
        }
    }
}

/// One node's view of the `MemoryNetwork`.
pub struct MemoryTransport {
    local: PeerId,
    network: Arc<MemoryNetwork>,
}

impl PeerTransport for MemoryTransport {
    fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.network.is_connected(self.local, *peer) {
            return Err(TransportError::NotConnected(*peer));
        }
        trace!(to = %peer, len = bytes.len(), "memory transport send");
        self.network.notify(*peer, self.local, LinkEvent::PeerBytes(bytes));
        Ok(())
    }

    fn disconnect(&self, peer: &PeerId) {
        self.network.disconnect(self.local, *peer);
    }
}
