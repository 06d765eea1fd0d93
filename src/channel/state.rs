use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};

use crate::channel::update_log::{Update, UpdateLog};
use crate::config::PartyLimits;
use crate::errors::{ChannelError, PolicyViolation};
use crate::keys::CounterpartyCommitmentSecrets;
use crate::transactions::CommitmentHtlc;
use crate::types::{
    ChannelId, ChannelPublicKeys, ChannelStatus, CommitmentFormat, Htlc, HtlcDirection, HtlcState,
    PeerId,
};

// ============================================================================
// CHANNEL SETUP
// ============================================================================

/// What the funding flow hands over once a channel's funding transaction
/// exists. Basepoints and the first per-commitment point come from the
/// open_channel / accept_channel exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSetup {
    pub funding_outpoint: OutPoint,
    pub capacity_sat: u64,
    pub is_funder: bool,
    /// Amount the funder gives the fundee at open.
    pub push_msat: u64,
    /// Index the channel's keys are derived at.
    pub key_index: u32,
    pub counterparty_node_id: PeerId,
    pub counterparty_keys: ChannelPublicKeys,
    /// Counterparty per-commitment point for commitment height 0.
    pub counterparty_first_point: PublicKey,
    pub local_limits: PartyLimits,
    pub remote_limits: PartyLimits,
    pub feerate_per_kw: u32,
    pub format: CommitmentFormat,
    pub max_dust_htlc_exposure_msat: u64,
}

impl ChannelSetup {
    pub fn validate(&self) -> Result<(), ChannelError> {
        let capacity_msat = self
            .capacity_sat
            .checked_mul(1000)
            .ok_or_else(|| ChannelError::InvalidSetup(format!("capacity {} sat overflows", self.capacity_sat)))?;
        if self.push_msat > capacity_msat {
            return Err(ChannelError::InvalidSetup(format!(
                "push {} msat exceeds capacity {} msat",
                self.push_msat, capacity_msat
            )));
        }
        Ok(())
    }
}

// ============================================================================
// COMMITMENTS
// ============================================================================

/// A commitment at one height, with the log cuts it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentSnapshot {
    pub height: u64,
    /// Exclusive cut into our update log.
    pub our_log_index: u64,
    /// Exclusive cut into the counterparty's update log.
    pub their_log_index: u64,
    pub to_local_msat: u64,
    pub to_remote_msat: u64,
    pub feerate_per_kw: u32,
    pub htlcs: Vec<Htlc>,
    /// On our commitments the counterparty's signature, on theirs our own.
    pub signature: Option<Signature>,
    pub htlc_signatures: Vec<Signature>,
}

/// A remote commitment we signed whose predecessor is not yet revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommitment {
    pub snapshot: CommitmentSnapshot,
    /// Position of the commitment_signed in our outbound sequence.
    pub send_seq: u64,
}

/// Balances and fee rate after every compacted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseBalances {
    pub local_msat: u64,
    pub remote_msat: u64,
    pub feerate_per_kw: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownState {
    pub local_script: Option<Vec<u8>>,
    pub remote_script: Option<Vec<u8>>,
}

// ============================================================================
// CHANNEL STATE
// ============================================================================

/// Everything about a channel that must survive a restart. Secret keys are
/// not part of it; they are re-derived from `key_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub funding_outpoint: OutPoint,
    pub capacity_sat: u64,
    pub is_funder: bool,
    pub key_index: u32,
    pub counterparty_node_id: PeerId,
    pub local_keys: ChannelPublicKeys,
    pub remote_keys: ChannelPublicKeys,
    pub local_limits: PartyLimits,
    pub remote_limits: PartyLimits,
    pub max_dust_htlc_exposure_msat: u64,
    pub format: CommitmentFormat,
    pub status: ChannelStatus,

    pub base: BaseBalances,
    pub local_log: UpdateLog,
    pub remote_log: UpdateLog,

    pub local_commit: CommitmentSnapshot,
    /// Oldest unrevoked remote commitment.
    pub remote_commit: CommitmentSnapshot,
    pub pending_remote_commit: Option<PendingCommitment>,

    /// Counterparty point for `remote_commit.height`.
    pub remote_current_point: PublicKey,
    /// Counterparty point for the height after it, once known.
    pub remote_next_point: Option<PublicKey>,
    pub remote_secrets: CounterpartyCommitmentSecrets,

    pub send_seq: u64,
    /// Sequence number of the last revoke_and_ack we sent.
    pub last_revocation_seq: Option<u64>,
    pub shutdown: ShutdownState,
}

/// Balances and HTLCs of a commitment from our point of view, before any
/// fee or dust trimming is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentView {
    pub to_local_msat: u64,
    pub to_remote_msat: u64,
    pub feerate_per_kw: u32,
    pub htlcs: Vec<Htlc>,
}

impl CommitmentView {
    pub fn into_snapshot(self, height: u64, our_log_index: u64, their_log_index: u64) -> CommitmentSnapshot {
        CommitmentSnapshot {
            height,
            our_log_index,
            their_log_index,
            to_local_msat: self.to_local_msat,
            to_remote_msat: self.to_remote_msat,
            feerate_per_kw: self.feerate_per_kw,
            htlcs: self.htlcs,
            signature: None,
            htlc_signatures: Vec::new(),
        }
    }

    pub fn htlc_total_msat(&self) -> u64 {
        self.htlcs.iter().map(|h| h.amount_msat).sum()
    }

    pub fn offered_by(&self, direction: HtlcDirection) -> impl Iterator<Item = &Htlc> {
        self.htlcs.iter().filter(move |h| h.direction == direction)
    }
}

impl ChannelState {
    /// Initial state for a freshly funded channel at commitment height 0.
    pub fn from_setup(setup: &ChannelSetup, local_keys: ChannelPublicKeys) -> Self {
        let capacity_msat = setup.capacity_sat * 1000;
        let funder_msat = capacity_msat.saturating_sub(setup.push_msat);
        let (local_msat, remote_msat) = if setup.is_funder {
            (funder_msat, setup.push_msat)
        } else {
            (setup.push_msat, funder_msat)
        };
        let base = BaseBalances {
            local_msat,
            remote_msat,
            feerate_per_kw: setup.feerate_per_kw,
        };
        let initial = CommitmentSnapshot {
            height: 0,
            our_log_index: 0,
            their_log_index: 0,
            to_local_msat: local_msat,
            to_remote_msat: remote_msat,
            feerate_per_kw: setup.feerate_per_kw,
            htlcs: Vec::new(),
            signature: None,
            htlc_signatures: Vec::new(),
        };

        ChannelState {
            channel_id: ChannelId::from_funding_outpoint(&setup.funding_outpoint),
            funding_outpoint: setup.funding_outpoint,
            capacity_sat: setup.capacity_sat,
            is_funder: setup.is_funder,
            key_index: setup.key_index,
            counterparty_node_id: setup.counterparty_node_id,
            local_keys,
            remote_keys: setup.counterparty_keys,
            local_limits: setup.local_limits,
            remote_limits: setup.remote_limits,
            max_dust_htlc_exposure_msat: setup.max_dust_htlc_exposure_msat,
            format: setup.format,
            status: ChannelStatus::Uninitialized,
            base,
            local_log: UpdateLog::new(),
            remote_log: UpdateLog::new(),
            local_commit: initial.clone(),
            remote_commit: initial,
            pending_remote_commit: None,
            remote_current_point: setup.counterparty_first_point,
            remote_next_point: None,
            remote_secrets: CounterpartyCommitmentSecrets::new(),
            send_seq: 0,
            last_revocation_seq: None,
            shutdown: ShutdownState::default(),
        }
    }

    /// The newest remote commitment we signed, pending or not.
    pub fn remote_tip(&self) -> &CommitmentSnapshot {
        self.pending_remote_commit
            .as_ref()
            .map(|p| &p.snapshot)
            .unwrap_or(&self.remote_commit)
    }

    pub fn next_send_seq(&mut self) -> u64 {
        self.send_seq += 1;
        self.send_seq
    }

    // ========================================================================
    // VIEW EVALUATION
    // ========================================================================

    /// Applies every update below the two cuts to the base balances.
    pub fn evaluate_view(&self, our_cut: u64, their_cut: u64) -> Result<CommitmentView, PolicyViolation> {
        let mut local_msat = self.base.local_msat as i128;
        let mut remote_msat = self.base.remote_msat as i128;
        let mut feerate_per_kw = self.base.feerate_per_kw;
        let mut htlcs: Vec<Htlc> = Vec::new();

        let mut fee_index = None;
        for (entries, direction) in [
            (self.local_log.below(our_cut).collect::<Vec<_>>(), HtlcDirection::Offered),
            (self.remote_log.below(their_cut).collect::<Vec<_>>(), HtlcDirection::Received),
        ] {
            for entry in entries {
                match &entry.update {
                    Update::Add {
                        htlc_id,
                        amount_msat,
                        payment_hash,
                        cltv_expiry,
                        ..
                    } => {
                        match direction {
                            HtlcDirection::Offered => local_msat -= *amount_msat as i128,
                            HtlcDirection::Received => remote_msat -= *amount_msat as i128,
                        }
                        htlcs.push(Htlc {
                            htlc_id: *htlc_id,
                            amount_msat: *amount_msat,
                            payment_hash: *payment_hash,
                            cltv_expiry: *cltv_expiry,
                            direction,
                            state: HtlcState::Added,
                            source: entry.source,
                        });
                    }
                    Update::Fee { feerate_per_kw: rate } => {
                        if fee_index.map_or(true, |i| entry.log_index > i) {
                            fee_index = Some(entry.log_index);
                            feerate_per_kw = *rate;
                        }
                    }
                    Update::Settle { .. } | Update::Fail { .. } => {}
                }
            }
        }

        // Removals reference HTLCs offered in the other log.
        for (entries, removed_direction) in [
            (self.local_log.below(our_cut).collect::<Vec<_>>(), HtlcDirection::Received),
            (self.remote_log.below(their_cut).collect::<Vec<_>>(), HtlcDirection::Offered),
        ] {
            for entry in entries {
                let (htlc_id, settled) = match &entry.update {
                    Update::Settle { htlc_id, .. } => (*htlc_id, true),
                    Update::Fail { htlc_id, .. } => (*htlc_id, false),
                    _ => continue,
                };
                let Some(pos) = htlcs
                    .iter()
                    .position(|h| h.htlc_id == htlc_id && h.direction == removed_direction)
                else {
                    return Err(PolicyViolation::UnknownHtlc(htlc_id));
                };
                let htlc = htlcs.remove(pos);
                let amount = htlc.amount_msat as i128;
                match (removed_direction, settled) {
                    (HtlcDirection::Offered, true) | (HtlcDirection::Received, false) => remote_msat += amount,
                    (HtlcDirection::Offered, false) | (HtlcDirection::Received, true) => local_msat += amount,
                }
            }
        }

        if local_msat < 0 || remote_msat < 0 {
            let shortfall = local_msat.min(remote_msat).unsigned_abs() as u64;
            return Err(PolicyViolation::InsufficientBalance {
                available_msat: 0,
                required_msat: shortfall,
            });
        }

        htlcs.sort_by_key(|h| (h.direction == HtlcDirection::Received, h.htlc_id));

        Ok(CommitmentView {
            to_local_msat: local_msat as u64,
            to_remote_msat: remote_msat as u64,
            feerate_per_kw,
            htlcs,
        })
    }

    /// View over every update we know of, signed or not.
    pub fn latest_view(&self) -> Result<CommitmentView, PolicyViolation> {
        self.evaluate_view(self.local_log.next_index(), self.remote_log.next_index())
    }

    /// capacity = local + remote + pending HTLCs, in msat.
    pub fn is_conserved(&self, snapshot: &CommitmentSnapshot) -> bool {
        let htlcs: u64 = snapshot.htlcs.iter().map(|h| h.amount_msat).sum();
        self.capacity_sat * 1000 == snapshot.to_local_msat + snapshot.to_remote_msat + htlcs
    }

    // ========================================================================
    // LOCK-IN AND COMPACTION
    // ========================================================================

    /// Marks entries covered by both current commitments as locked in and
    /// returns the log indices of counterparty entries that just became so.
    pub fn refresh_lock_in(&mut self) -> Vec<u64> {
        let our_cut = self.local_commit.our_log_index.min(self.remote_commit.our_log_index);
        let their_cut = self.local_commit.their_log_index.min(self.remote_commit.their_log_index);

        let ours: Vec<u64> = self
            .local_log
            .below(our_cut)
            .filter(|e| !e.locked_in)
            .map(|e| e.log_index)
            .collect();
        for index in ours {
            if let Some(entry) = self.local_log.get_mut(index) {
                entry.locked_in = true;
            }
        }

        let theirs: Vec<u64> = self
            .remote_log
            .below(their_cut)
            .filter(|e| !e.locked_in)
            .map(|e| e.log_index)
            .collect();
        for index in &theirs {
            if let Some(entry) = self.remote_log.get_mut(*index) {
                entry.locked_in = true;
            }
        }
        theirs
    }

    /// Folds fully resolved HTLCs and superseded fee updates into the base
    /// balances. An HTLC leaves the logs only once it and its removal are
    /// locked in and a counterparty removal of ours has been handed off.
    pub fn compact(&mut self) -> usize {
        let mut removed = 0;

        for ours_resolve in [true, false] {
            let (resolving_log, adding_log) = if ours_resolve {
                (&self.local_log, &self.remote_log)
            } else {
                (&self.remote_log, &self.local_log)
            };

            let mut pairs = Vec::new();
            for entry in resolving_log.iter() {
                let Some(htlc_id) = entry.update.resolves() else { continue };
                if !entry.locked_in || (!ours_resolve && !entry.handed_off) {
                    continue;
                }
                let Some(add) = adding_log.find_add(htlc_id) else { continue };
                if !add.locked_in {
                    continue;
                }
                let Update::Add { amount_msat, .. } = add.update else { continue };
                let settled = matches!(entry.update, Update::Settle { .. });
                pairs.push((entry.log_index, add.log_index, amount_msat, settled));
            }

            for (resolve_index, add_index, amount_msat, settled) in pairs {
                // Offerer of the HTLC is the owner of `adding_log`; a fail
                // leaves both balances where they were before the add.
                if settled {
                    if ours_resolve {
                        self.base.remote_msat -= amount_msat;
                        self.base.local_msat += amount_msat;
                    } else {
                        self.base.local_msat -= amount_msat;
                        self.base.remote_msat += amount_msat;
                    }
                }
                if ours_resolve {
                    self.local_log.remove(resolve_index);
                    self.remote_log.remove(add_index);
                } else {
                    self.remote_log.remove(resolve_index);
                    self.local_log.remove(add_index);
                }
                removed += 2;
            }
        }

        for log_is_ours in [true, false] {
            let log = if log_is_ours { &self.local_log } else { &self.remote_log };
            let fees: Vec<(u64, u32)> = log
                .iter()
                .filter(|e| e.locked_in)
                .filter_map(|e| match e.update {
                    Update::Fee { feerate_per_kw } => Some((e.log_index, feerate_per_kw)),
                    _ => None,
                })
                .collect();
            for (index, feerate_per_kw) in fees {
                self.base.feerate_per_kw = feerate_per_kw;
                if log_is_ours {
                    self.local_log.remove(index);
                } else {
                    self.remote_log.remove(index);
                }
                removed += 1;
            }
        }

        removed
    }
}

/// HTLCs of a view as they appear on the commitment broadcast by us
/// (`local == true`) or by the counterparty.
pub fn commitment_htlcs(htlcs: &[Htlc], local: bool) -> Vec<CommitmentHtlc> {
    htlcs
        .iter()
        .map(|h| CommitmentHtlc {
            htlc_id: h.htlc_id,
            offered: (h.direction == HtlcDirection::Offered) == local,
            amount_msat: h.amount_msat,
            payment_hash: h.payment_hash.0,
            cltv_expiry: h.cltv_expiry,
        })
        .collect()
}
