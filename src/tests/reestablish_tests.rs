use crate::channel::{plan_reestablish, ReestablishPlan, SyncPosition};
use crate::errors::{ChannelError, ProtocolViolation};
use crate::tests::helpers::*;
use crate::wire::{ChannelReestablish, Message, TlvStream};
use crate::*;

const HTLC_MSAT: u64 = 5_000_000;

fn our_secret(height: u64) -> [u8; 32] {
    [height as u8; 32]
}

fn reestablish(next_commitment: u64, next_revocation: u64, secret: [u8; 32]) -> ChannelReestablish {
    ChannelReestablish {
        channel_id: ChannelId([0u8; 32]),
        next_commitment_number: next_commitment,
        next_revocation_number: next_revocation,
        your_last_per_commitment_secret: secret,
        my_current_per_commitment_point: alice_keys().node_id(),
        extensions: TlvStream::new(),
    }
}

fn position(local_height: u64, remote_height: u64, remote_pending: bool) -> SyncPosition {
    SyncPosition {
        local_height,
        remote_height,
        remote_pending,
        pending_send_seq: remote_pending.then_some(10),
        last_revocation_seq: Some(9),
    }
}

#[test]
fn test_plan_in_sync_resends_nothing() {
    let plan = plan_reestablish(&position(4, 4, false), &reestablish(5, 4, our_secret(3)), our_secret);
    assert_eq!(
        plan,
        ReestablishPlan::Resume {
            resend_revocation: false,
            resend_commitment: false,
            revocation_first: true,
        }
    );
}

#[test]
fn test_plan_orders_resends_by_original_sequence() {
    let mut pos = position(4, 3, true);
    pos.last_revocation_seq = Some(11);
    pos.pending_send_seq = Some(10);

    let plan = plan_reestablish(&pos, &reestablish(4, 3, our_secret(2)), our_secret);
    assert_eq!(
        plan,
        ReestablishPlan::Resume {
            resend_revocation: true,
            resend_commitment: true,
            revocation_first: false,
        }
    );

    pos.last_revocation_seq = Some(9);
    let plan = plan_reestablish(&pos, &reestablish(4, 3, our_secret(2)), our_secret);
    assert!(matches!(plan, ReestablishPlan::Resume { revocation_first: true, .. }));
}

#[test]
fn test_plan_detects_local_data_loss() {
    // Peer proves it received a revocation for height 6 we never made.
    let plan = plan_reestablish(&position(4, 4, false), &reestablish(5, 7, our_secret(6)), our_secret);
    assert_eq!(plan, ReestablishPlan::LocalDataLoss);
}

#[test]
fn test_plan_rejects_unproven_newer_state() {
    // A commitment number beyond anything we signed proves nothing by itself.
    let plan = plan_reestablish(&position(4, 4, false), &reestablish(7, 4, our_secret(3)), our_secret);
    assert!(matches!(plan, ReestablishPlan::Invalid { .. }));

    let plan = plan_reestablish(&position(4, 4, false), &reestablish(9, 4, [0xab; 32]), our_secret);
    assert!(matches!(plan, ReestablishPlan::Invalid { .. }));
}

#[test]
fn test_plan_rejects_bad_secret() {
    let plan = plan_reestablish(&position(4, 4, false), &reestablish(5, 7, [0xee; 32]), our_secret);
    assert!(matches!(plan, ReestablishPlan::Invalid { .. }));

    let plan = plan_reestablish(&position(4, 4, false), &reestablish(5, 4, [0xee; 32]), our_secret);
    assert!(matches!(plan, ReestablishPlan::Invalid { .. }));
}

#[test]
fn test_plan_peer_behind() {
    let plan = plan_reestablish(&position(4, 4, false), &reestablish(5, 2, our_secret(1)), our_secret);
    assert!(matches!(plan, ReestablishPlan::PeerBehind { .. }));

    let plan = plan_reestablish(&position(4, 4, false), &reestablish(3, 4, our_secret(3)), our_secret);
    assert!(matches!(plan, ReestablishPlan::PeerBehind { .. }));
}

#[test]
fn test_lost_commitment_is_retransmitted() {
    let mut pair = channel_pair();
    let add = pair
        .alice
        .propose_add_htlc(HTLC_MSAT, preimage(1).payment_hash(), 500, vec![0u8; 32], None)
        .unwrap();
    pair.bob.receive_update_add(&add).unwrap();
    let signed = pair.alice.sign_next_commitment().unwrap();

    // The connection drops before Bob sees the signature.
    assert_eq!(pair.bob.drop_uncommitted_remote_updates(), 1);

    let alice_msg = pair.alice.reestablish_message();
    let bob_msg = pair.bob.reestablish_message();
    assert_eq!(bob_msg.next_commitment_number, 1);
    assert_eq!(bob_msg.next_revocation_number, 0);

    let from_alice = pair.alice.handle_reestablish(&bob_msg).unwrap();
    assert_eq!(
        from_alice,
        vec![
            Message::UpdateAddHtlc(add.clone()),
            Message::CommitmentSigned(signed.message.clone()),
        ]
    );
    assert!(pair.bob.handle_reestablish(&alice_msg).unwrap().is_empty());

    pair.bob.receive_update_add(&add).unwrap();
    let revocation = pair.bob.receive_commitment_sig(&signed.message).unwrap();
    pair.alice.receive_revoke_and_ack(&revocation).unwrap();
    let signed_back = pair.bob.sign_next_commitment().unwrap();
    let revocation_back = pair.alice.receive_commitment_sig(&signed_back.message).unwrap();
    let bob_locked = pair.bob.receive_revoke_and_ack(&revocation_back).unwrap();

    assert_eq!(bob_locked.adds.len(), 1);
    assert!(pair.alice.is_conserved());
    assert!(pair.bob.is_conserved());
}

#[test]
fn test_lost_revocation_is_retransmitted() {
    let mut pair = channel_pair();
    let add = pair
        .alice
        .propose_add_htlc(HTLC_MSAT, preimage(2).payment_hash(), 500, vec![0u8; 32], None)
        .unwrap();
    pair.bob.receive_update_add(&add).unwrap();
    let signed = pair.alice.sign_next_commitment().unwrap();
    let revocation = pair.bob.receive_commitment_sig(&signed.message).unwrap();

    let alice_msg = pair.alice.reestablish_message();
    let bob_msg = pair.bob.reestablish_message();

    assert!(pair.alice.handle_reestablish(&bob_msg).unwrap().is_empty());
    let from_bob = pair.bob.handle_reestablish(&alice_msg).unwrap();
    assert_eq!(from_bob, vec![Message::RevokeAndAck(revocation.clone())]);

    pair.alice.receive_revoke_and_ack(&revocation).unwrap();
    assert!(!pair.alice.awaiting_revocation());
}

#[test]
fn test_unsigned_updates_follow_retransmission() {
    let mut pair = channel_pair();
    let add = pair
        .alice
        .propose_add_htlc(HTLC_MSAT, preimage(3).payment_hash(), 500, vec![0u8; 32], None)
        .unwrap();

    let bob_msg = pair.bob.reestablish_message();
    let from_alice = pair.alice.handle_reestablish(&bob_msg).unwrap();
    assert_eq!(from_alice, vec![Message::UpdateAddHtlc(add)]);
}

#[test]
fn test_proof_of_newer_state_marks_data_loss() {
    let mut pair = channel_pair();
    add_locked_in(&mut pair, HTLC_MSAT, preimage(4));
    let height = pair.alice.local_height();

    let keys = alice_keys().derive_channel_keys(0);
    let mut msg = pair.bob.reestablish_message();
    msg.next_revocation_number = height + 2;
    msg.your_last_per_commitment_secret = keys.build_commitment_secret(INITIAL_COMMITMENT_NUMBER - (height + 1));

    assert_eq!(pair.alice.handle_reestablish(&msg).unwrap_err(), ChannelError::LocalDataLoss);
    assert_eq!(pair.alice.status(), ChannelStatus::ForceClosing);
}

#[test]
fn test_forged_reestablish_is_rejected() {
    let mut pair = channel_pair();
    add_locked_in(&mut pair, HTLC_MSAT, preimage(5));

    let mut msg = pair.bob.reestablish_message();
    msg.next_revocation_number = pair.alice.local_height() + 2;
    msg.your_last_per_commitment_secret = [0xab; 32];

    assert!(matches!(
        pair.alice.handle_reestablish(&msg),
        Err(ChannelError::ProtocolViolation(ProtocolViolation::Reestablish(_)))
    ));
    assert_eq!(pair.alice.status(), ChannelStatus::Normal);

    let mut inflated = pair.bob.reestablish_message();
    inflated.next_commitment_number += 5;
    inflated.your_last_per_commitment_secret = [0xab; 32];
    assert!(matches!(
        pair.alice.handle_reestablish(&inflated),
        Err(ChannelError::ProtocolViolation(ProtocolViolation::Reestablish(_)))
    ));
    assert_eq!(pair.alice.status(), ChannelStatus::Normal);

    let mut wrong_channel = pair.bob.reestablish_message();
    wrong_channel.channel_id = ChannelId([9u8; 32]);
    assert!(pair.alice.handle_reestablish(&wrong_channel).is_err());
}
