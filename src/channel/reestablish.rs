//! Deciding what to resend after a reconnection.
//!
//! The decision depends only on our persisted heights and the peer's
//! channel_reestablish, so it is a pure function that can be tested case by
//! case without a live channel.

use crate::wire::ChannelReestablish;

/// Our side of the synchronisation, taken from persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPosition {
    /// Height of our current commitment.
    pub local_height: u64,
    /// Height of the counterparty's oldest unrevoked commitment.
    pub remote_height: u64,
    /// We signed `remote_height + 1` and wait for its predecessor's revocation.
    pub remote_pending: bool,
    pub pending_send_seq: Option<u64>,
    pub last_revocation_seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReestablishPlan {
    Resume {
        resend_revocation: bool,
        resend_commitment: bool,
        /// Both are resent, and the revocation originally went out first.
        revocation_first: bool,
    },
    /// The peer lost state it had acknowledged. Our own state is safe to
    /// broadcast.
    PeerBehind { reason: String },
    /// The peer knows a secret we never revealed, so our state is stale and
    /// must never be broadcast.
    LocalDataLoss,
    Invalid { reason: String },
}

/// `our_secret(h)` is our per-commitment secret for commitment height `h`.
pub fn plan_reestablish(
    pos: &SyncPosition,
    msg: &ChannelReestablish,
    our_secret: impl Fn(u64) -> [u8; 32],
) -> ReestablishPlan {
    let next_commitment = msg.next_commitment_number;
    let next_revocation = msg.next_revocation_number;
    let remote_tip = pos.remote_height + pos.remote_pending as u64;

    if next_revocation > pos.local_height {
        if msg.your_last_per_commitment_secret == our_secret(next_revocation - 1) {
            return ReestablishPlan::LocalDataLoss;
        }
        return ReestablishPlan::Invalid {
            reason: format!(
                "peer expects revocation {} but our height is {}",
                next_revocation, pos.local_height
            ),
        };
    }

    if next_revocation > 0 && msg.your_last_per_commitment_secret != our_secret(next_revocation - 1) {
        return ReestablishPlan::Invalid {
            reason: format!("wrong last per-commitment secret for height {}", next_revocation - 1),
        };
    }

    // Only a revealed secret proves we are behind; a bare commitment number does not.
    if next_commitment > remote_tip + 1 {
        return ReestablishPlan::Invalid {
            reason: format!(
                "peer expects commitment {} but we signed up to {}",
                next_commitment, remote_tip
            ),
        };
    }

    let resend_revocation = if next_revocation == pos.local_height {
        false
    } else if next_revocation + 1 == pos.local_height {
        true
    } else {
        return ReestablishPlan::PeerBehind {
            reason: format!(
                "peer expects revocation {}, we already revoked up to {}",
                next_revocation,
                pos.local_height - 1
            ),
        };
    };

    let resend_commitment = if next_commitment == remote_tip + 1 {
        false
    } else if next_commitment == remote_tip && pos.remote_pending {
        true
    } else {
        return ReestablishPlan::PeerBehind {
            reason: format!(
                "peer expects commitment {}, we signed up to {}",
                next_commitment, remote_tip
            ),
        };
    };

    let revocation_first = match (pos.last_revocation_seq, pos.pending_send_seq) {
        (Some(revocation), Some(commitment)) => revocation < commitment,
        _ => true,
    };

    ReestablishPlan::Resume {
        resend_revocation,
        resend_commitment,
        revocation_first,
    }
}
