//! Channel links: one actor per channel binding its state machine to the
//! peer connection and to the switch.

pub mod actor;

pub use actor::{failure_reason, ChannelLink};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::channel::ChannelForceClosed;
use crate::errors::SwitchError;
use crate::switch::ForwardPacket;
use crate::types::{ChannelId, HtlcId, HtlcResolution, HtlcSource};

/// Instructions from the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Offer an HTLC to the peer on behalf of `source`.
    AddHtlc { source: HtlcSource, packet: ForwardPacket },
    /// Settle or fail the HTLC the peer offered us as `htlc_id`.
    Resolve {
        htlc_id: HtlcId,
        resolution: HtlcResolution,
        source: HtlcSource,
    },
    /// The resolution of our outgoing `htlc_id` reached its origin.
    ResolutionAcked { htlc_id: HtlcId },
}

/// Everything a link reacts to, drained in order by its task.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    PeerConnected,
    PeerDisconnected,
    PeerBytes(Vec<u8>),
    Command(LinkCommand),
    BlockConnected(u32),
    Tick,
    Stop,
}

/// Reported by links to whoever watches the chain.
#[derive(Debug, Clone)]
pub enum LinkNotification {
    ForceClosed(ChannelForceClosed),
    /// The peer proved we lost state; we wait for it to close.
    DataLoss { channel_id: ChannelId },
    Stopped { channel_id: ChannelId },
}

#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub channel_id: ChannelId,
    sender: UnboundedSender<LinkEvent>,
}

impl LinkHandle {
    pub fn new(channel_id: ChannelId) -> (Self, UnboundedReceiver<LinkEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (LinkHandle { channel_id, sender }, receiver)
    }

    pub fn send(&self, event: LinkEvent) -> Result<(), SwitchError> {
        self.sender
            .send(event)
            .map_err(|_| SwitchError::LinkUnavailable(self.channel_id))
    }

    pub fn sender(&self) -> UnboundedSender<LinkEvent> {
        self.sender.clone()
    }
}

/// Registers `link` with its switch and runs it on the current runtime.
pub fn spawn_link(link: ChannelLink) -> (LinkHandle, JoinHandle<()>) {
    let (handle, events) = LinkHandle::new(link.channel_id());
    link.switch().links().register(handle.clone());
    let task = tokio::spawn(link.run(events));
    (handle, task)
}
