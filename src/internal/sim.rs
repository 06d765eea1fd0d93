use std::sync::Arc;

use bitcoin::Network;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::channel::Channel;
use crate::config::LinkConfig;
use crate::errors::StoreError;
use crate::interfaces::ChainBackend;
use crate::internal::helper::{RecordingBroadcaster, StaticRouter};
use crate::internal::memory_transport::MemoryNetwork;
use crate::keys::new_keys_manager;
use crate::link::{spawn_link, ChannelLink, LinkHandle, LinkNotification};
use crate::store::{ChannelStateStore, CircuitStore};
use crate::switch::{CircuitMap, LinkRegistry, PaymentResult, Switch};
use crate::types::{KeysManager, PeerId};

/// One in-process node: a switch, its stores and the links it runs over a
/// shared `MemoryNetwork`.
pub struct SimNode {
    pub keys: KeysManager,
    pub switch: Arc<Switch>,
    pub router: Arc<StaticRouter>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub channel_store: Arc<dyn ChannelStateStore>,
    pub circuit_store: Arc<dyn CircuitStore>,
    pub payments: UnboundedReceiver<PaymentResult>,
    pub notifications: UnboundedReceiver<LinkNotification>,
    notify_tx: UnboundedSender<LinkNotification>,
    network: Arc<MemoryNetwork>,
    chain: Option<Arc<dyn ChainBackend + Send + Sync>>,
}

impl SimNode {
    pub fn new(
        seed: [u8; 32],
        network: Arc<MemoryNetwork>,
        channel_store: Arc<dyn ChannelStateStore>,
        circuit_store: Arc<dyn CircuitStore>,
    ) -> Result<Self, StoreError> {
        let (payment_tx, payments) = mpsc::unbounded_channel();
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let circuits = CircuitMap::restore(circuit_store.clone())?;
        let switch = Arc::new(Switch::new(circuits, LinkRegistry::new(), payment_tx));

        Ok(SimNode {
            keys: new_keys_manager(seed, Network::Regtest),
            switch,
            router: StaticRouter::new(),
            broadcaster: RecordingBroadcaster::new(),
            channel_store,
            circuit_store,
            payments,
            notifications,
            notify_tx,
            network,
            chain: None,
        })
    }

    /// Broadcasts through `chain` instead of only recording.
    pub fn with_chain(mut self, chain: Arc<dyn ChainBackend + Send + Sync>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn node_id(&self) -> PeerId {
        self.keys.node_id()
    }

    /// Spawns a link for `channel` and makes it reachable by its peer.
    pub fn start_link(&self, channel: Channel, config: &LinkConfig) -> (LinkHandle, JoinHandle<()>) {
        let peer = channel.counterparty();
        let chain = self
            .chain
            .clone()
            .unwrap_or_else(|| self.broadcaster.clone() as Arc<dyn ChainBackend + Send + Sync>);
        let link = ChannelLink::new(
            channel,
            self.network.transport(self.node_id()),
            self.switch.clone(),
            self.router.clone(),
            chain,
            self.notify_tx.clone(),
            config.clone(),
        );
        let (handle, task) = spawn_link(link);
        self.network.register(self.node_id(), peer, handle.sender());
        (handle, task)
    }
}
