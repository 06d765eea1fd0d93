//! Collaborators the node core talks to but does not implement.

use crate::errors::TransportError;
use crate::types::{ChannelId, IncomingHtlc, PaymentPreimage, PeerId};

/// On-chain broadcast. Confirmations come back as block events to the links.
pub use lightning::chain::chaininterface::BroadcasterInterface as ChainBackend;

/// Authenticated, ordered delivery of message bytes to a peer.
pub trait PeerTransport: Send + Sync {
    fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), TransportError>;

    fn disconnect(&self, peer: &PeerId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Forward {
        outgoing_channel: ChannelId,
        amount_msat: u64,
        cltv_expiry: u32,
    },
    /// We are the final hop.
    Settle(PaymentPreimage),
    Fail(Vec<u8>),
}

/// Decides what happens to an HTLC offered to us once it is locked in.
pub trait RouteProvider: Send + Sync {
    fn route(&self, htlc: &IncomingHtlc) -> RouteDecision;
}
