use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::errors::{StoreError, SwitchError};
use crate::link::{LinkCommand, LinkEvent, LinkHandle};
use crate::store::{CircuitStore, MemoryStore};
use crate::switch::{CircuitMap, ForwardOutcome, ForwardPacket, LinkRegistry, PaymentResult, Switch};
use crate::*;

const INCOMING: ChannelId = ChannelId([1u8; 32]);
const OUTGOING: ChannelId = ChannelId([2u8; 32]);

struct Harness {
    switch: Arc<Switch>,
    store: Arc<MemoryStore>,
    incoming_events: UnboundedReceiver<LinkEvent>,
    outgoing_events: UnboundedReceiver<LinkEvent>,
    payment_results: UnboundedReceiver<PaymentResult>,
}

fn harness_with(store: Arc<MemoryStore>, circuits: CircuitMap) -> Harness {
    let links = LinkRegistry::new();
    let (incoming, incoming_events) = LinkHandle::new(INCOMING);
    let (outgoing, outgoing_events) = LinkHandle::new(OUTGOING);
    links.register(incoming);
    links.register(outgoing);

    let (results_tx, payment_results) = mpsc::unbounded_channel();
    Harness {
        switch: Arc::new(Switch::new(circuits, links, results_tx)),
        store,
        incoming_events,
        outgoing_events,
        payment_results,
    }
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let circuits = CircuitMap::new(store.clone());
    harness_with(store, circuits)
}

fn incoming_key(htlc_id: HtlcId) -> CircuitKey {
    CircuitKey {
        channel_id: INCOMING,
        htlc_id,
    }
}

fn outgoing_key(htlc_id: HtlcId) -> CircuitKey {
    CircuitKey {
        channel_id: OUTGOING,
        htlc_id,
    }
}

fn packet(amount_msat: u64) -> ForwardPacket {
    ForwardPacket {
        amount_msat,
        payment_hash: PaymentPreimage([3u8; 32]).payment_hash(),
        cltv_expiry: 600,
        onion_routing_packet: vec![0u8; 32],
    }
}

fn drain(events: &mut UnboundedReceiver<LinkEvent>) -> Vec<LinkCommand> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LinkEvent::Command(command) = event {
            out.push(command);
        }
    }
    out
}

#[test]
fn test_duplicate_forward_sends_once() {
    let mut h = harness();

    let first = h.switch.forward_htlc(incoming_key(0), OUTGOING, packet(1_000_000)).unwrap();
    let second = h.switch.forward_htlc(incoming_key(0), OUTGOING, packet(1_000_000)).unwrap();

    assert_eq!(first, ForwardOutcome::Forwarded);
    assert_eq!(second, ForwardOutcome::Duplicate);
    assert_eq!(
        drain(&mut h.outgoing_events),
        vec![LinkCommand::AddHtlc {
            source: HtlcSource::Forwarded(incoming_key(0)),
            packet: packet(1_000_000),
        }]
    );
    assert_eq!(h.switch.circuits().len(), 1);
    assert_eq!(h.store.load_circuits().unwrap().len(), 1);
}

#[test]
fn test_concurrent_duplicate_forwards_open_one_circuit() {
    let mut h = harness();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let switch = h.switch.clone();
            thread::spawn(move || {
                switch
                    .forward_htlc(incoming_key(7), OUTGOING, packet(2_000_000))
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<ForwardOutcome> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert_eq!(
        outcomes.iter().filter(|o| **o == ForwardOutcome::Forwarded).count(),
        1
    );
    assert_eq!(drain(&mut h.outgoing_events).len(), 1);
    assert_eq!(h.switch.circuits().len(), 1);
}

#[test]
fn test_forward_to_unknown_link_fails() {
    let h = harness();
    let unknown = ChannelId([9u8; 32]);

    assert_eq!(
        h.switch.forward_htlc(incoming_key(0), unknown, packet(1_000)).unwrap_err(),
        SwitchError::UnknownLink(unknown)
    );
    assert!(h.switch.circuits().is_empty());
}

#[test]
fn test_failed_circuit_write_sends_nothing() {
    let mut h = harness();
    h.store.set_fail_writes(true);

    assert_eq!(
        h.switch.forward_htlc(incoming_key(0), OUTGOING, packet(1_000)).unwrap_err(),
        SwitchError::Persistence(StoreError::WriteFailed("store unavailable".to_string()))
    );
    assert!(drain(&mut h.outgoing_events).is_empty());
    assert!(h.switch.circuits().is_empty());
}

#[test]
fn test_keystone_is_idempotent() {
    let h = harness();
    let source = HtlcSource::Forwarded(incoming_key(0));
    h.switch.forward_htlc(incoming_key(0), OUTGOING, packet(1_000)).unwrap();

    h.switch.open_circuit(source, outgoing_key(4)).unwrap();
    h.switch.open_circuit(source, outgoing_key(4)).unwrap();
    assert_eq!(
        h.switch.open_circuit(source, outgoing_key(5)).unwrap_err(),
        SwitchError::KeystoneMismatch { htlc_source: source }
    );
    assert_eq!(h.switch.circuits().lookup_outgoing(&outgoing_key(4)), Some(source));

    // An outgoing HTLC belongs to one circuit only.
    let other = HtlcSource::Forwarded(incoming_key(1));
    h.switch.forward_htlc(incoming_key(1), OUTGOING, packet(2_000)).unwrap();
    assert_eq!(
        h.switch.open_circuit(other, outgoing_key(4)).unwrap_err(),
        SwitchError::KeystoneMismatch { htlc_source: other }
    );
    assert_eq!(h.switch.circuits().lookup_outgoing(&outgoing_key(4)), Some(source));
    assert!(h.switch.circuits().get(&other).unwrap().outgoing.is_none());

    let unknown = HtlcSource::Forwarded(incoming_key(3));
    assert_eq!(
        h.switch.open_circuit(unknown, outgoing_key(6)).unwrap_err(),
        SwitchError::CircuitNotFound(unknown)
    );
}

#[test]
fn test_resolution_travels_back_to_incoming_link() {
    let mut h = harness();
    let source = HtlcSource::Forwarded(incoming_key(2));
    let preimage = PaymentPreimage([3u8; 32]);

    h.switch.forward_htlc(incoming_key(2), OUTGOING, packet(1_000)).unwrap();
    h.switch.open_circuit(source, outgoing_key(0)).unwrap();
    drain(&mut h.outgoing_events);

    h.switch
        .resolve_outgoing(outgoing_key(0), HtlcResolution::Settle(preimage))
        .unwrap();
    assert_eq!(
        drain(&mut h.incoming_events),
        vec![LinkCommand::Resolve {
            htlc_id: 2,
            resolution: HtlcResolution::Settle(preimage),
            source,
        }]
    );
    assert!(h.switch.circuits().get(&source).is_some(), "circuit stays until the incoming side commits");

    h.switch.complete_resolution(source).unwrap();
    assert!(h.switch.circuits().is_empty());
    assert!(h.store.load_circuits().unwrap().is_empty());
    assert_eq!(
        drain(&mut h.outgoing_events),
        vec![LinkCommand::ResolutionAcked { htlc_id: 0 }]
    );

    // A second completion is a no-op.
    h.switch.complete_resolution(source).unwrap();
}

#[test]
fn test_resolution_without_circuit_is_dropped() {
    let mut h = harness();

    assert_eq!(
        h.switch
            .resolve_outgoing(outgoing_key(8), HtlcResolution::Fail(vec![]))
            .unwrap_err(),
        SwitchError::CircuitNotFound(HtlcSource::Forwarded(outgoing_key(8)))
    );
    let source = HtlcSource::Forwarded(incoming_key(8));
    assert_eq!(
        h.switch
            .settle_or_fail(source, HtlcResolution::Fail(vec![]))
            .unwrap_err(),
        SwitchError::CircuitNotFound(source)
    );
    assert!(drain(&mut h.incoming_events).is_empty());
}

#[test]
fn test_local_payment_reports_result() {
    let mut h = harness();
    let payment_id = PaymentId([5u8; 32]);
    let source = HtlcSource::Local(payment_id);

    h.switch.local_add_htlc(payment_id, OUTGOING, packet(50_000)).unwrap();
    h.switch.open_circuit(source, outgoing_key(1)).unwrap();
    drain(&mut h.outgoing_events);

    h.switch
        .resolve_outgoing(outgoing_key(1), HtlcResolution::Fail(vec![0x40, 0x0f]))
        .unwrap();

    assert_eq!(
        h.payment_results.try_recv().unwrap(),
        PaymentResult {
            payment_id,
            resolution: HtlcResolution::Fail(vec![0x40, 0x0f]),
        }
    );
    assert!(h.switch.circuits().is_empty());
    assert_eq!(
        drain(&mut h.outgoing_events),
        vec![LinkCommand::ResolutionAcked { htlc_id: 1 }]
    );
}

#[test]
fn test_local_payment_result_follows_circuit_delete() {
    let mut h = harness();
    let payment_id = PaymentId([6u8; 32]);
    let source = HtlcSource::Local(payment_id);
    let preimage = PaymentPreimage([3u8; 32]);

    h.switch.local_add_htlc(payment_id, OUTGOING, packet(50_000)).unwrap();
    h.switch.open_circuit(source, outgoing_key(2)).unwrap();
    drain(&mut h.outgoing_events);

    h.store.set_fail_writes(true);
    assert_eq!(
        h.switch
            .resolve_outgoing(outgoing_key(2), HtlcResolution::Settle(preimage))
            .unwrap_err(),
        SwitchError::Persistence(StoreError::WriteFailed("store unavailable".to_string()))
    );
    assert!(h.payment_results.try_recv().is_err());
    assert!(drain(&mut h.outgoing_events).is_empty());
    assert_eq!(h.switch.circuits().len(), 1);

    // The link redelivers the resolution once the store recovers.
    h.store.set_fail_writes(false);
    h.switch
        .resolve_outgoing(outgoing_key(2), HtlcResolution::Settle(preimage))
        .unwrap();
    assert_eq!(
        h.payment_results.try_recv().unwrap(),
        PaymentResult {
            payment_id,
            resolution: HtlcResolution::Settle(preimage),
        }
    );
    assert!(h.payment_results.try_recv().is_err());
    assert_eq!(
        drain(&mut h.outgoing_events),
        vec![LinkCommand::ResolutionAcked { htlc_id: 2 }]
    );
    assert!(h.switch.circuits().is_empty());
}

#[test]
fn test_restore_replays_half_open_circuits() {
    let store = Arc::new(MemoryStore::new());
    {
        let h = harness_with(store.clone(), CircuitMap::new(store.clone()));
        h.switch.forward_htlc(incoming_key(0), OUTGOING, packet(1_000)).unwrap();
        h.switch.forward_htlc(incoming_key(1), OUTGOING, packet(2_000)).unwrap();
        h.switch
            .open_circuit(HtlcSource::Forwarded(incoming_key(0)), outgoing_key(0))
            .unwrap();
    }

    let circuits = CircuitMap::restore(store.clone()).unwrap();
    let mut h = harness_with(store, circuits);

    assert_eq!(h.switch.circuits().len(), 2);
    assert_eq!(
        h.switch.circuits().lookup_outgoing(&outgoing_key(0)),
        Some(HtlcSource::Forwarded(incoming_key(0)))
    );
    // Forwards replayed by the incoming links after the restart are duplicates.
    assert_eq!(
        h.switch.forward_htlc(incoming_key(0), OUTGOING, packet(1_000)).unwrap(),
        ForwardOutcome::Duplicate
    );
    assert_eq!(
        h.switch.forward_htlc(incoming_key(1), OUTGOING, packet(2_000)).unwrap(),
        ForwardOutcome::Duplicate
    );
    assert!(drain(&mut h.outgoing_events).is_empty());
    assert_eq!(h.switch.circuits().len(), 2);

    assert_eq!(h.switch.resync(), 1);
    assert_eq!(
        drain(&mut h.outgoing_events),
        vec![LinkCommand::AddHtlc {
            source: HtlcSource::Forwarded(incoming_key(1)),
            packet: packet(2_000),
        }]
    );
}
