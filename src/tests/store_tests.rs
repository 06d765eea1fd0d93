use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serial_test::serial;

use crate::channel::Channel;
use crate::config::{NodeConfig, PartyLimits};
use crate::errors::ConfigError;
use crate::internal::helper::{open_channel_pair, simulated_outpoint};
use crate::store::{ChannelStateStore, CircuitStore, FileStore};
use crate::switch::{Circuit, CircuitMap, ForwardPacket};
use crate::tests::helpers::*;
use crate::*;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pl-htlc-switch-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn circuit(htlc_id: HtlcId) -> Circuit {
    Circuit {
        incoming: HtlcSource::Forwarded(CircuitKey {
            channel_id: ChannelId([1u8; 32]),
            htlc_id,
        }),
        outgoing_channel: ChannelId([2u8; 32]),
        packet: ForwardPacket {
            amount_msat: 1_000_000,
            payment_hash: preimage(1).payment_hash(),
            cltv_expiry: 600,
            onion_routing_packet: vec![1, 2, 3],
        },
        outgoing: None,
    }
}

#[test]
#[serial]
fn test_file_store_channel_round_trip() {
    let dir = scratch_dir("channels");
    let alice_store = Arc::new(FileStore::open(&dir.join("alice")).unwrap());
    let bob_store = Arc::new(FileStore::open(&dir.join("bob")).unwrap());

    let (mut alice, mut bob) = open_channel_pair(
        &alice_keys(),
        &bob_keys(),
        0,
        simulated_outpoint("file-store"),
        CAPACITY_SAT,
        0,
        &Default::default(),
        alice_store.clone(),
        bob_store.clone(),
    )
    .unwrap();

    let add = alice
        .propose_add_htlc(5_000_000, preimage(2).payment_hash(), 500, vec![0u8; 32], None)
        .unwrap();
    bob.receive_update_add(&add).unwrap();
    commitment_dance(&mut alice, &mut bob);

    let reloaded = Channel::load(&alice.channel_id(), alice_keys().derive_channel_keys(0), alice_store.clone())
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.state(), alice.state());
    assert_eq!(alice_store.list_channels().unwrap(), vec![alice.channel_id()]);
    assert!(alice_store.load(&ChannelId([0xffu8; 32])).unwrap().is_none());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_file_store_circuits() {
    let dir = scratch_dir("circuits");
    let store = Arc::new(FileStore::open(&dir).unwrap());

    store.persist_circuit(&circuit(0)).unwrap();
    store.persist_circuit(&circuit(1)).unwrap();

    let mut keyed = circuit(1);
    keyed.outgoing = Some(CircuitKey {
        channel_id: ChannelId([2u8; 32]),
        htlc_id: 9,
    });
    store.persist_circuit(&keyed).unwrap();
    store.delete_circuit(&circuit(0).incoming).unwrap();
    // Deleting twice is fine.
    store.delete_circuit(&circuit(0).incoming).unwrap();

    assert_eq!(store.load_circuits().unwrap(), vec![keyed.clone()]);

    let restored = CircuitMap::restore(store.clone()).unwrap();
    assert_eq!(restored.len(), 1);
    assert!(restored.half_open().is_empty());
    assert_eq!(
        restored.lookup_outgoing(&keyed.outgoing.unwrap()),
        Some(keyed.incoming)
    );

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_config_partial_file_uses_defaults() {
    let dir = scratch_dir("config");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("node.json");
    fs::write(
        &path,
        r#"{ "channel": { "format": "Legacy", "limits": { "max_accepted_htlcs": 12 } }, "link": { "batch_size": 3 } }"#,
    )
    .unwrap();

    let config = NodeConfig::from_file(&path).unwrap();

    assert_eq!(config.channel.format, CommitmentFormat::Legacy);
    assert_eq!(config.channel.limits.max_accepted_htlcs, 12);
    assert_eq!(config.channel.limits.dust_limit_sat, PartyLimits::default().dust_limit_sat);
    assert_eq!(config.channel.feerate_per_kw, 253);
    assert_eq!(config.link.batch_size, 3);
    assert_eq!(config.link.revocation_timeout_ms, 60_000);
    assert_eq!(config.network, Network::Regtest);
    assert!(config.store_dir.is_none());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
#[serial]
fn test_config_errors() {
    let missing = scratch_dir("missing").join("node.json");
    assert!(matches!(NodeConfig::from_file(&missing), Err(ConfigError::Io { .. })));

    let dir = scratch_dir("bad-config");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("node.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(NodeConfig::from_file(&path), Err(ConfigError::Parse(_))));

    fs::write(&path, r#"{ "link": { "batch_size": 0 } }"#).unwrap();
    assert!(matches!(NodeConfig::from_file(&path), Err(ConfigError::Invalid(_))));

    let mut config = NodeConfig::default();
    assert!(config.validate().is_ok());
    config.channel.feerate_per_kw = 100;
    assert!(config.validate().is_err());
    config.channel.feerate_per_kw = 253;
    config.channel.limits.max_accepted_htlcs = 484;
    assert!(config.validate().is_err());

    fs::remove_dir_all(&dir).unwrap();
}
