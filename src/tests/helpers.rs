//! Shared fixtures for the channel, switch and link tests.

use std::sync::Arc;

use crate::channel::{Channel, LockedIn};
use crate::config::ChannelConfig;
use crate::internal::helper::{open_channel_pair, simulated_outpoint};
use crate::store::MemoryStore;
use crate::*;

pub const CAPACITY_SAT: u64 = 1_000_000;

pub fn alice_keys() -> KeysManager {
    crate::keys::new_keys_manager([1u8; 32], Network::Regtest)
}

pub fn bob_keys() -> KeysManager {
    crate::keys::new_keys_manager([2u8; 32], Network::Regtest)
}

pub struct ChannelPair {
    pub alice: Channel,
    pub bob: Channel,
    pub alice_store: Arc<MemoryStore>,
    pub bob_store: Arc<MemoryStore>,
}

/// Alice funds a channel to Bob; both sides are Normal at height 0.
pub fn channel_pair() -> ChannelPair {
    channel_pair_with(&ChannelConfig::default())
}

pub fn channel_pair_with(config: &ChannelConfig) -> ChannelPair {
    let alice_store = Arc::new(MemoryStore::new());
    let bob_store = Arc::new(MemoryStore::new());
    let (alice, bob) = open_channel_pair(
        &alice_keys(),
        &bob_keys(),
        0,
        simulated_outpoint("alice-bob"),
        CAPACITY_SAT,
        0,
        config,
        alice_store.clone(),
        bob_store.clone(),
    )
    .expect("channel pair should open");
    ChannelPair {
        alice,
        bob,
        alice_store,
        bob_store,
    }
}

/// `initiator` signs, `responder` revokes and signs back, `initiator`
/// revokes. Returns what each side saw locked in, initiator first.
pub fn commitment_dance(initiator: &mut Channel, responder: &mut Channel) -> (LockedIn, LockedIn) {
    let signed = initiator.sign_next_commitment().expect("initiator signs");
    let revocation = responder
        .receive_commitment_sig(&signed.message)
        .expect("responder accepts signature");
    let initiator_locked = initiator
        .receive_revoke_and_ack(&revocation)
        .expect("initiator accepts revocation");

    let signed_back = responder.sign_next_commitment().expect("responder signs back");
    let revocation_back = initiator
        .receive_commitment_sig(&signed_back.message)
        .expect("initiator accepts signature");
    let responder_locked = responder
        .receive_revoke_and_ack(&revocation_back)
        .expect("responder accepts revocation");

    (initiator_locked, responder_locked)
}

pub fn preimage(byte: u8) -> PaymentPreimage {
    PaymentPreimage([byte; 32])
}

/// Alice offers `amount_msat` to Bob and the add is locked in on both sides.
pub fn add_locked_in(pair: &mut ChannelPair, amount_msat: u64, preimage: PaymentPreimage) -> HtlcId {
    let add = pair
        .alice
        .propose_add_htlc(
            amount_msat,
            preimage.payment_hash(),
            500,
            vec![0u8; 32],
            Some(HtlcSource::Local(PaymentId([7u8; 32]))),
        )
        .expect("alice proposes add");
    pair.bob.receive_update_add(&add).expect("bob accepts add");

    let (_, bob_locked) = commitment_dance(&mut pair.alice, &mut pair.bob);
    assert_eq!(bob_locked.adds.len(), 1, "bob should see the add locked in");
    add.htlc_id
}
