use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::errors::{Error, StoreError};
use crate::internal::bitcoind_client::BitcoindClient;
use crate::internal::helper::{open_channel_pair, simulated_outpoint, StaticRoute};
use crate::internal::memory_transport::MemoryNetwork;
use crate::internal::sim::SimNode;
use crate::link::LinkEvent;
use crate::store::{ChannelStateStore, CircuitStore, FileStore, MemoryStore};
use crate::switch::ForwardPacket;
use crate::types::{ChannelId, HtlcResolution, PaymentId, PaymentPreimage};

const CAPACITY_SAT: u64 = 1_000_000;
const FINAL_CLTV_EXPIRY: u32 = 500;
const FORWARDING_FEE_MSAT: u64 = 1_000;

fn stores(
    config: &NodeConfig,
    name: &str,
) -> Result<(Arc<dyn ChannelStateStore>, Arc<dyn CircuitStore>), StoreError> {
    match &config.store_dir {
        Some(dir) => {
            let store = Arc::new(FileStore::open(&dir.join(name))?);
            let channel_store: Arc<dyn ChannelStateStore> = store.clone();
            let circuit_store: Arc<dyn CircuitStore> = store;
            Ok((channel_store, circuit_store))
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let channel_store: Arc<dyn ChannelStateStore> = store.clone();
            let circuit_store: Arc<dyn CircuitStore> = store;
            Ok((channel_store, circuit_store))
        }
    }
}

fn node(config: &NodeConfig, name: &str, seed: u8, network: &Arc<MemoryNetwork>) -> Result<SimNode, Error> {
    let (channel_store, circuit_store) = stores(config, name)?;
    let mut node = SimNode::new([seed; 32], network.clone(), channel_store, circuit_store)?;
    if let Some(bitcoind) = &config.bitcoind {
        match BitcoindClient::new(bitcoind) {
            Ok(client) => node = node.with_chain(Arc::new(client)),
            Err(err) => warn!(error = %err, "bitcoind unavailable, broadcasts are only recorded"),
        }
    }
    Ok(node)
}

fn print_balance(label: &str, store: &Arc<dyn ChannelStateStore>, channel_id: &ChannelId) -> Result<(), Error> {
    if let Some(state) = store.load(channel_id)? {
        println!(
            "  {:<14} local {:>13} msat   remote {:>13} msat   height {}",
            label, state.local_commit.to_local_msat, state.local_commit.to_remote_msat, state.local_commit.height
        );
    }
    Ok(())
}

/// Alice pays Carol through Bob over in-memory links and prints the
/// resulting balances.
pub async fn run(config: NodeConfig, amount_sat: u64) -> Result<(), Error> {
    let network = MemoryNetwork::new();
    let mut alice = node(&config, "alice", 0x01, &network)?;
    let bob = node(&config, "bob", 0x02, &network)?;
    let mut carol = node(&config, "carol", 0x03, &network)?;

    let (ab_alice, ab_bob) = open_channel_pair(
        &alice.keys,
        &bob.keys,
        0,
        simulated_outpoint("alice-bob"),
        CAPACITY_SAT,
        0,
        &config.channel,
        alice.channel_store.clone(),
        bob.channel_store.clone(),
    )?;
    let (bc_bob, bc_carol) = open_channel_pair(
        &bob.keys,
        &carol.keys,
        1,
        simulated_outpoint("bob-carol"),
        CAPACITY_SAT,
        0,
        &config.channel,
        bob.channel_store.clone(),
        carol.channel_store.clone(),
    )?;
    let ab = ab_alice.channel_id();
    let bc = bc_bob.channel_id();

    let preimage = PaymentPreimage(rand::random::<[u8; 32]>());
    let payment_hash = carol.router.add_invoice(preimage);
    bob.router.add_route(
        payment_hash,
        StaticRoute {
            outgoing_channel: bc,
            fee_msat: FORWARDING_FEE_MSAT,
            cltv_delta: config.link.cltv_expiry_delta,
        },
    );

    let handles = vec![
        alice.start_link(ab_alice, &config.link),
        bob.start_link(ab_bob, &config.link),
        bob.start_link(bc_bob, &config.link),
        carol.start_link(bc_carol, &config.link),
    ];
    network.connect(alice.node_id(), bob.node_id());
    network.connect(bob.node_id(), carol.node_id());

    println!("Paying {} sat from Alice to Carol through Bob", amount_sat);
    println!("  payment hash   {}", hex::encode(payment_hash.0));

    let payment_id = PaymentId(rand::random::<[u8; 32]>());
    let packet = ForwardPacket {
        amount_msat: amount_sat * 1000 + FORWARDING_FEE_MSAT,
        payment_hash,
        cltv_expiry: FINAL_CLTV_EXPIRY + config.link.cltv_expiry_delta,
        onion_routing_packet: Vec::new(),
    };
    alice.switch.local_add_htlc(payment_id, ab, packet)?;

    match tokio::time::timeout(Duration::from_secs(10), alice.payments.recv()).await {
        Ok(Some(result)) => match result.resolution {
            HtlcResolution::Settle(preimage) => {
                println!("Payment settled, preimage {}", hex::encode(preimage.0))
            }
            HtlcResolution::Fail(reason) => println!("Payment failed: {}", hex::encode(reason)),
        },
        _ => println!("Payment did not resolve in time"),
    }

    // Let the final revocations land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("Balances:");
    print_balance("alice (a-b)", &alice.channel_store, &ab)?;
    print_balance("bob   (a-b)", &bob.channel_store, &ab)?;
    print_balance("bob   (b-c)", &bob.channel_store, &bc)?;
    print_balance("carol (b-c)", &carol.channel_store, &bc)?;

    for (handle, task) in handles {
        let _ = handle.send(LinkEvent::Stop);
        let _ = task.await;
    }
    while let Ok(notification) = carol.notifications.try_recv() {
        info!(notification = ?notification, "link notification");
    }
    Ok(())
}

/// Where the simulation keeps channel state.
pub fn describe_store(config: &NodeConfig) -> String {
    match &config.store_dir {
        Some(dir) => format!("file store under {}", dir.display()),
        None => "in-memory store".to_string(),
    }
}
