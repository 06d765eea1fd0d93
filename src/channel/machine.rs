use std::sync::Arc;

use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::Transaction;
use tracing::{debug, info, warn};

use crate::channel::policy::{validate_add, validate_fee};
use crate::channel::reestablish::{plan_reestablish, ReestablishPlan, SyncPosition};
use crate::channel::state::{
    commitment_htlcs, ChannelSetup, ChannelState, CommitmentSnapshot, PendingCommitment,
};
use crate::channel::update_log::Update;
use crate::errors::{ChannelError, PolicyViolation, ProtocolViolation};
use crate::keys::{sign_transaction_input, verify_signature};
use crate::scripts::{create_funding_script, create_to_remote_script, local_sig_first};
use crate::store::ChannelStateStore;
use crate::transactions::{
    create_commitment_transaction, finalize_holder_commitment, sign_htlc_transactions,
    verify_htlc_signatures, BuiltCommitment, CommitmentParams, HtlcOutputInfo,
};
use crate::types::{
    ChannelId, ChannelKeyManager, ChannelStatus, CommitmentKeys, Htlc, HtlcDirection, HtlcId,
    HtlcResolution, HtlcSource, HtlcState, IncomingHtlc, PaymentHash, PaymentPreimage, PeerId,
};
use crate::wire::{
    ChannelReestablish, CommitmentSigned, Message, RevokeAndAck, Shutdown, TlvStream,
    UpdateAddHtlc, UpdateFailHtlc, UpdateFee, UpdateFulfillHtlc,
};
use crate::INITIAL_COMMITMENT_NUMBER;

/// Lowest fee rate a commitment may use.
pub const MIN_FEERATE_PER_KW: u32 = 253;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Our outgoing HTLC was settled or failed by the counterparty, irrevocably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHtlc {
    pub htlc_id: HtlcId,
    pub source: Option<HtlcSource>,
    pub resolution: HtlcResolution,
}

/// Counterparty updates that became irrevocably committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedIn {
    pub adds: Vec<IncomingHtlc>,
    pub resolutions: Vec<ResolvedHtlc>,
}

impl LockedIn {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.resolutions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SignedCommitment {
    pub message: CommitmentSigned,
    /// Adds we offered that this commitment signs for the first time.
    pub newly_signed: Vec<(HtlcId, HtlcSource)>,
}

/// Our latest commitment, fully witnessed, plus what a resolver needs to
/// claim its HTLC outputs.
#[derive(Debug, Clone)]
pub struct ChannelForceClosed {
    pub channel_id: ChannelId,
    pub commitment_tx: Transaction,
    pub htlc_outputs: Vec<HtlcOutputInfo>,
    /// Counterparty signatures for the second-stage transactions, in
    /// `htlc_outputs` order.
    pub htlc_signatures: Vec<Signature>,
}

// ============================================================================
// CHANNEL
// ============================================================================

/// One channel's commitment state machine. Every operation that changes
/// what we have told, or will tell, the peer is committed to the store
/// before its message is returned; if the store refuses, the in-memory
/// state is left as it was.
pub struct Channel {
    state: ChannelState,
    keys: ChannelKeyManager,
    store: Arc<dyn ChannelStateStore>,
}

impl Channel {
    pub fn new(
        setup: &ChannelSetup,
        keys: ChannelKeyManager,
        store: Arc<dyn ChannelStateStore>,
    ) -> Result<Self, ChannelError> {
        setup.validate()?;
        let state = ChannelState::from_setup(setup, keys.to_public_keys());
        store.atomic_commit(&state)?;
        info!(
            channel_id = %state.channel_id,
            capacity_sat = setup.capacity_sat,
            funder = setup.is_funder,
            "channel created"
        );
        Ok(Channel { state, keys, store })
    }

    pub fn restore(state: ChannelState, keys: ChannelKeyManager, store: Arc<dyn ChannelStateStore>) -> Self {
        debug!(
            channel_id = %state.channel_id,
            local_height = state.local_commit.height,
            remote_height = state.remote_commit.height,
            "channel restored"
        );
        Channel { state, keys, store }
    }

    pub fn load(
        channel_id: &ChannelId,
        keys: ChannelKeyManager,
        store: Arc<dyn ChannelStateStore>,
    ) -> Result<Option<Self>, ChannelError> {
        Ok(store
            .load(channel_id)?
            .map(|state| Channel::restore(state, keys, store.clone())))
    }

    /// Runs `f` on a copy of the state and swaps it in only once the store
    /// accepted it.
    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut ChannelState, &ChannelKeyManager) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        let mut next = self.state.clone();
        let out = f(&mut next, &self.keys)?;
        if let Err(err) = self.store.atomic_commit(&next) {
            warn!(channel_id = %self.state.channel_id, error = %err, "state commit failed, rolled back");
            return Err(err.into());
        }
        self.state = next;
        Ok(out)
    }

    /// Like `transact` without a store write, for peer updates that the peer
    /// retransmits anyway if we lose them.
    fn apply<T>(&mut self, f: impl FnOnce(&mut ChannelState) -> Result<T, ChannelError>) -> Result<T, ChannelError> {
        let mut next = self.state.clone();
        let out = f(&mut next)?;
        self.state = next;
        Ok(out)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn channel_id(&self) -> ChannelId {
        self.state.channel_id
    }

    pub fn counterparty(&self) -> PeerId {
        self.state.counterparty_node_id
    }

    pub fn status(&self) -> ChannelStatus {
        self.state.status
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn local_height(&self) -> u64 {
        self.state.local_commit.height
    }

    pub fn remote_height(&self) -> u64 {
        self.state.remote_commit.height
    }

    /// Our balance on our current commitment.
    pub fn local_balance_msat(&self) -> u64 {
        self.state.local_commit.to_local_msat
    }

    pub fn remote_balance_msat(&self) -> u64 {
        self.state.local_commit.to_remote_msat
    }

    pub fn awaiting_revocation(&self) -> bool {
        self.state.pending_remote_commit.is_some()
    }

    /// Every HTLC still tracked in either log, with its resolution progress.
    pub fn pending_htlcs(&self) -> Vec<Htlc> {
        let mut out = Vec::new();
        for (adds, resolutions, direction) in [
            (&self.state.local_log, &self.state.remote_log, HtlcDirection::Offered),
            (&self.state.remote_log, &self.state.local_log, HtlcDirection::Received),
        ] {
            for entry in adds.iter() {
                let Update::Add {
                    htlc_id,
                    amount_msat,
                    payment_hash,
                    cltv_expiry,
                    ..
                } = &entry.update
                else {
                    continue;
                };
                let state = match resolutions.find_resolution(*htlc_id) {
                    None => HtlcState::Added,
                    Some(r) => match (&r.update, r.locked_in) {
                        (Update::Settle { .. }, false) => HtlcState::SettlePending,
                        (Update::Settle { .. }, true) => HtlcState::Settled,
                        (_, false) => HtlcState::FailPending,
                        (_, true) => HtlcState::Failed,
                    },
                };
                out.push(Htlc {
                    htlc_id: *htlc_id,
                    amount_msat: *amount_msat,
                    payment_hash: *payment_hash,
                    cltv_expiry: *cltv_expiry,
                    direction,
                    state,
                    source: entry.source,
                });
            }
        }
        out
    }

    /// Conservation holds on both current commitments.
    pub fn is_conserved(&self) -> bool {
        self.state.is_conserved(&self.state.local_commit)
            && self.state.is_conserved(&self.state.remote_commit)
            && self
                .state
                .pending_remote_commit
                .as_ref()
                .map_or(true, |p| self.state.is_conserved(&p.snapshot))
    }

    /// There are updates the counterparty's commitment does not cover yet.
    pub fn needs_commitment(&self) -> bool {
        let tip = self.state.remote_tip();
        self.state.local_log.next_index() > tip.our_log_index
            || self.state.local_commit.their_log_index > tip.their_log_index
    }

    pub fn can_sign(&self) -> bool {
        !self.awaiting_revocation() && self.needs_commitment()
    }

    /// Local updates not yet covered by any commitment we signed.
    pub fn unsigned_local_update_count(&self) -> usize {
        let cut = self.state.remote_tip().our_log_index;
        self.state.local_log.between(cut, self.state.local_log.next_index()).count()
    }

    // ========================================================================
    // COMMITMENT CONSTRUCTION
    // ========================================================================

    fn our_point(&self, height: u64) -> PublicKey {
        self.keys.derive_per_commitment_point(INITIAL_COMMITMENT_NUMBER - height)
    }

    fn funding_script(state: &ChannelState) -> bitcoin::ScriptBuf {
        create_funding_script(&state.local_keys.funding_pubkey, &state.remote_keys.funding_pubkey)
    }

    fn build_local(state: &ChannelState, keys: &ChannelKeyManager, snapshot: &CommitmentSnapshot) -> (BuiltCommitment, CommitmentKeys) {
        let point = keys.derive_per_commitment_point(INITIAL_COMMITMENT_NUMBER - snapshot.height);
        let commitment_keys =
            CommitmentKeys::for_broadcaster(&point, &state.local_keys, &state.remote_keys, &keys.secp_ctx);
        let htlcs = commitment_htlcs(&snapshot.htlcs, true);
        let built = create_commitment_transaction(&CommitmentParams {
            funding_outpoint: state.funding_outpoint,
            commitment_height: snapshot.height,
            keys: &commitment_keys,
            broadcaster: &state.local_keys,
            countersignatory: &state.remote_keys,
            broadcaster_is_funder: state.is_funder,
            to_broadcaster_msat: snapshot.to_local_msat,
            to_countersignatory_msat: snapshot.to_remote_msat,
            to_self_delay: state.local_limits.to_self_delay,
            dust_limit_satoshis: state.local_limits.dust_limit_sat,
            feerate_per_kw: snapshot.feerate_per_kw,
            format: state.format,
            htlcs: &htlcs,
        });
        (built, commitment_keys)
    }

    fn build_remote(
        state: &ChannelState,
        keys: &ChannelKeyManager,
        snapshot: &CommitmentSnapshot,
        point: &PublicKey,
    ) -> (BuiltCommitment, CommitmentKeys) {
        let commitment_keys =
            CommitmentKeys::for_broadcaster(point, &state.remote_keys, &state.local_keys, &keys.secp_ctx);
        let htlcs = commitment_htlcs(&snapshot.htlcs, false);
        let built = create_commitment_transaction(&CommitmentParams {
            funding_outpoint: state.funding_outpoint,
            commitment_height: snapshot.height,
            keys: &commitment_keys,
            broadcaster: &state.remote_keys,
            countersignatory: &state.local_keys,
            broadcaster_is_funder: !state.is_funder,
            to_broadcaster_msat: snapshot.to_remote_msat,
            to_countersignatory_msat: snapshot.to_local_msat,
            to_self_delay: state.remote_limits.to_self_delay,
            dust_limit_satoshis: state.remote_limits.dust_limit_sat,
            feerate_per_kw: snapshot.feerate_per_kw,
            format: state.format,
            htlcs: &htlcs,
        });
        (built, commitment_keys)
    }

    /// Signs the counterparty's commitment described by `snapshot`.
    fn sign_remote(
        state: &ChannelState,
        keys: &ChannelKeyManager,
        snapshot: &CommitmentSnapshot,
        point: &PublicKey,
    ) -> (Signature, Vec<Signature>) {
        let (built, commitment_keys) = Self::build_remote(state, keys, snapshot, point);
        let signature = sign_transaction_input(
            &built.tx,
            0,
            &Self::funding_script(state),
            state.capacity_sat,
            EcdsaSighashType::All,
            &keys.funding_key,
            &keys.secp_ctx,
        );
        let htlc_signatures = sign_htlc_transactions(
            &built,
            &commitment_keys,
            &keys.htlc_key_for(point),
            state.remote_limits.to_self_delay,
            snapshot.feerate_per_kw,
            state.format.capability(),
            &keys.secp_ctx,
        );
        (signature, htlc_signatures)
    }

    /// Checks the counterparty's signatures on our commitment `snapshot`.
    fn verify_local(
        state: &ChannelState,
        keys: &ChannelKeyManager,
        snapshot: &CommitmentSnapshot,
        signature: &Signature,
        htlc_signatures: &[Signature],
    ) -> Result<(), ChannelError> {
        let (built, commitment_keys) = Self::build_local(state, keys, snapshot);

        if !verify_signature(
            &built.tx,
            0,
            &Self::funding_script(state),
            state.capacity_sat,
            EcdsaSighashType::All,
            signature,
            &state.remote_keys.funding_pubkey,
            &keys.secp_ctx,
        ) {
            return Err(ChannelError::InvalidSignature {
                height: snapshot.height,
                what: "commitment",
            });
        }

        if htlc_signatures.len() != built.htlc_outputs.len() {
            return Err(ProtocolViolation::HtlcSignatureCount {
                expected: built.htlc_outputs.len(),
                got: htlc_signatures.len(),
            }
            .into());
        }

        if verify_htlc_signatures(
            &built,
            &commitment_keys,
            htlc_signatures,
            &commitment_keys.remote_htlc_key,
            state.local_limits.to_self_delay,
            snapshot.feerate_per_kw,
            state.format.capability(),
            &keys.secp_ctx,
        )
        .is_some()
        {
            return Err(ChannelError::InvalidSignature {
                height: snapshot.height,
                what: "htlc",
            });
        }
        Ok(())
    }

    // ========================================================================
    // FUNDING
    // ========================================================================

    /// Our signature on the counterparty's commitment 0, for funding_signed.
    pub fn initial_commitment_signature(&self) -> Result<Signature, ChannelError> {
        if self.state.status != ChannelStatus::Uninitialized {
            return Err(ChannelError::NotOperational(self.state.status));
        }
        let point = self.state.remote_current_point;
        let (signature, _) = Self::sign_remote(&self.state, &self.keys, &self.state.remote_commit, &point);
        Ok(signature)
    }

    pub fn accept_initial_signature(&mut self, signature: &Signature) -> Result<(), ChannelError> {
        if self.state.status != ChannelStatus::Uninitialized {
            return Err(ChannelError::NotOperational(self.state.status));
        }
        self.transact(|state, keys| {
            Self::verify_local(state, keys, &state.local_commit, signature, &[])?;
            state.local_commit.signature = Some(*signature);
            Ok(())
        })
    }

    /// Our per-commitment point for height 1, sent in channel_ready.
    pub fn channel_ready_point(&self) -> PublicKey {
        self.our_point(1)
    }

    /// The funding transaction confirmed and the counterparty told us its
    /// point for height 1.
    pub fn funding_confirmed(&mut self, counterparty_next_point: PublicKey) -> Result<(), ChannelError> {
        if self.state.status != ChannelStatus::Uninitialized || self.state.local_commit.signature.is_none() {
            return Err(ChannelError::NotOperational(self.state.status));
        }
        self.transact(|state, _| {
            state.remote_next_point = Some(counterparty_next_point);
            state.status = ChannelStatus::Normal;
            Ok(())
        })?;
        info!(channel_id = %self.state.channel_id, "channel is operational");
        Ok(())
    }

    // ========================================================================
    // LOCAL PROPOSALS
    // ========================================================================

    fn ensure_status(&self, allowed: &[ChannelStatus]) -> Result<(), ChannelError> {
        if allowed.contains(&self.state.status) {
            Ok(())
        } else {
            Err(PolicyViolation::ChannelNotNormal(self.state.status).into())
        }
    }

    pub fn propose_add_htlc(
        &mut self,
        amount_msat: u64,
        payment_hash: PaymentHash,
        cltv_expiry: u32,
        onion_routing_packet: Vec<u8>,
        source: Option<HtlcSource>,
    ) -> Result<UpdateAddHtlc, ChannelError> {
        self.ensure_status(&[ChannelStatus::Normal])?;

        let msg = self.transact(|state, _| {
            let htlc_id = state.local_log.next_htlc_id();
            state.local_log.append(
                Update::Add {
                    htlc_id,
                    amount_msat,
                    payment_hash,
                    cltv_expiry,
                    onion_routing_packet: onion_routing_packet.clone(),
                    blinding_point: None,
                },
                source,
            );
            let view = state.latest_view()?;
            validate_add(state, &view, HtlcDirection::Offered, amount_msat)?;

            Ok(UpdateAddHtlc {
                channel_id: state.channel_id,
                htlc_id,
                amount_msat,
                payment_hash,
                cltv_expiry,
                onion_routing_packet,
                blinding_point: None,
                extensions: TlvStream::new(),
            })
        })?;

        debug!(channel_id = %self.state.channel_id, htlc_id = msg.htlc_id, amount_msat, "proposed add");
        Ok(msg)
    }

    /// Checks that the counterparty's HTLC `htlc_id` may be resolved by us.
    fn check_resolvable(state: &ChannelState, htlc_id: HtlcId) -> Result<PaymentHash, PolicyViolation> {
        let add = state
            .remote_log
            .find_add(htlc_id)
            .ok_or(PolicyViolation::UnknownHtlc(htlc_id))?;
        if !add.locked_in {
            return Err(PolicyViolation::HtlcNotLockedIn(htlc_id));
        }
        if state.local_log.find_resolution(htlc_id).is_some() {
            return Err(PolicyViolation::HtlcAlreadyResolving(htlc_id));
        }
        match &add.update {
            Update::Add { payment_hash, .. } => Ok(*payment_hash),
            _ => Err(PolicyViolation::UnknownHtlc(htlc_id)),
        }
    }

    pub fn propose_settle_htlc(
        &mut self,
        htlc_id: HtlcId,
        preimage: PaymentPreimage,
    ) -> Result<UpdateFulfillHtlc, ChannelError> {
        self.ensure_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;

        let msg = self.transact(|state, _| {
            let payment_hash = Self::check_resolvable(state, htlc_id)?;
            if preimage.payment_hash() != payment_hash {
                return Err(PolicyViolation::InvalidPreimage(htlc_id).into());
            }
            state.local_log.append(Update::Settle { htlc_id, preimage }, None);
            Ok(UpdateFulfillHtlc {
                channel_id: state.channel_id,
                htlc_id,
                payment_preimage: preimage,
                extensions: TlvStream::new(),
            })
        })?;

        debug!(channel_id = %self.state.channel_id, htlc_id, "proposed settle");
        Ok(msg)
    }

    pub fn propose_fail_htlc(&mut self, htlc_id: HtlcId, reason: Vec<u8>) -> Result<UpdateFailHtlc, ChannelError> {
        self.ensure_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;

        let msg = self.transact(|state, _| {
            Self::check_resolvable(state, htlc_id)?;
            state.local_log.append(
                Update::Fail {
                    htlc_id,
                    reason: reason.clone(),
                },
                None,
            );
            Ok(UpdateFailHtlc {
                channel_id: state.channel_id,
                htlc_id,
                reason,
                extensions: TlvStream::new(),
            })
        })?;

        debug!(channel_id = %self.state.channel_id, htlc_id, "proposed fail");
        Ok(msg)
    }

    pub fn propose_update_fee(&mut self, feerate_per_kw: u32) -> Result<UpdateFee, ChannelError> {
        self.ensure_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;
        if !self.state.is_funder {
            return Err(PolicyViolation::NotFunder.into());
        }

        self.transact(|state, _| {
            state.local_log.append(Update::Fee { feerate_per_kw }, None);
            let view = state.latest_view()?;
            validate_fee(state, &view)?;
            Ok(UpdateFee {
                channel_id: state.channel_id,
                feerate_per_kw,
                extensions: TlvStream::new(),
            })
        })
    }

    // ========================================================================
    // PEER PROPOSALS
    // ========================================================================

    fn ensure_peer_status(&self, allowed: &[ChannelStatus]) -> Result<(), ChannelError> {
        if allowed.contains(&self.state.status) {
            Ok(())
        } else {
            Err(ProtocolViolation::Constraint(PolicyViolation::ChannelNotNormal(self.state.status)).into())
        }
    }

    /// While only we have sent shutdown the peer may still have adds in
    /// flight; once it sent its own shutdown, an add is a violation.
    pub fn receive_update_add(&mut self, msg: &UpdateAddHtlc) -> Result<(), ChannelError> {
        self.ensure_peer_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;
        if self.state.shutdown.remote_script.is_some() {
            return Err(ProtocolViolation::UnexpectedMessage("update_add_htlc after shutdown").into());
        }

        self.apply(|state| {
            let expected = state.remote_log.next_htlc_id();
            if msg.htlc_id != expected {
                return Err(ProtocolViolation::UnexpectedHtlcId {
                    expected,
                    got: msg.htlc_id,
                }
                .into());
            }
            state.remote_log.append(
                Update::Add {
                    htlc_id: msg.htlc_id,
                    amount_msat: msg.amount_msat,
                    payment_hash: msg.payment_hash,
                    cltv_expiry: msg.cltv_expiry,
                    onion_routing_packet: msg.onion_routing_packet.clone(),
                    blinding_point: msg.blinding_point,
                },
                None,
            );
            let view = state.latest_view().map_err(ProtocolViolation::Constraint)?;
            validate_add(state, &view, HtlcDirection::Received, msg.amount_msat)
                .map_err(ProtocolViolation::Constraint)?;
            Ok(())
        })?;

        debug!(channel_id = %self.state.channel_id, htlc_id = msg.htlc_id, amount_msat = msg.amount_msat, "received add");
        Ok(())
    }

    /// Checks that our HTLC `htlc_id` may be resolved by the counterparty.
    fn check_peer_resolvable(state: &ChannelState, htlc_id: HtlcId) -> Result<PaymentHash, ProtocolViolation> {
        let add = state
            .local_log
            .find_add(htlc_id)
            .filter(|e| e.locked_in)
            .ok_or(ProtocolViolation::UnknownHtlc(htlc_id))?;
        if state.remote_log.find_resolution(htlc_id).is_some() {
            return Err(ProtocolViolation::UnknownHtlc(htlc_id));
        }
        match &add.update {
            Update::Add { payment_hash, .. } => Ok(*payment_hash),
            _ => Err(ProtocolViolation::UnknownHtlc(htlc_id)),
        }
    }

    pub fn receive_update_fulfill(&mut self, msg: &UpdateFulfillHtlc) -> Result<(), ChannelError> {
        self.ensure_peer_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;

        self.apply(|state| {
            let payment_hash = Self::check_peer_resolvable(state, msg.htlc_id)?;
            if msg.payment_preimage.payment_hash() != payment_hash {
                return Err(ProtocolViolation::InvalidPreimage(msg.htlc_id).into());
            }
            state.remote_log.append(
                Update::Settle {
                    htlc_id: msg.htlc_id,
                    preimage: msg.payment_preimage,
                },
                None,
            );
            Ok(())
        })?;

        debug!(channel_id = %self.state.channel_id, htlc_id = msg.htlc_id, "received settle");
        Ok(())
    }

    pub fn receive_update_fail(&mut self, msg: &UpdateFailHtlc) -> Result<(), ChannelError> {
        self.ensure_peer_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;

        self.apply(|state| {
            Self::check_peer_resolvable(state, msg.htlc_id)?;
            state.remote_log.append(
                Update::Fail {
                    htlc_id: msg.htlc_id,
                    reason: msg.reason.clone(),
                },
                None,
            );
            Ok(())
        })?;

        debug!(channel_id = %self.state.channel_id, htlc_id = msg.htlc_id, "received fail");
        Ok(())
    }

    pub fn receive_update_fee(&mut self, msg: &UpdateFee) -> Result<(), ChannelError> {
        self.ensure_peer_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;
        if self.state.is_funder {
            return Err(ProtocolViolation::UnexpectedMessage("update_fee").into());
        }

        self.apply(|state| {
            if msg.feerate_per_kw < MIN_FEERATE_PER_KW {
                return Err(ProtocolViolation::UnaffordableCommitment.into());
            }
            state.remote_log.append(
                Update::Fee {
                    feerate_per_kw: msg.feerate_per_kw,
                },
                None,
            );
            let view = state.latest_view().map_err(ProtocolViolation::Constraint)?;
            validate_fee(state, &view).map_err(ProtocolViolation::Constraint)?;
            Ok(())
        })
    }

    // ========================================================================
    // COMMITMENT DANCE
    // ========================================================================

    /// Signs the counterparty's next commitment over all our updates and the
    /// counterparty updates we have acknowledged.
    pub fn sign_next_commitment(&mut self) -> Result<SignedCommitment, ChannelError> {
        match self.state.status {
            ChannelStatus::Normal | ChannelStatus::ShuttingDown => {}
            status => return Err(ChannelError::NotOperational(status)),
        }
        if self.awaiting_revocation() {
            return Err(ChannelError::RevocationWindowExhausted);
        }
        if !self.needs_commitment() {
            return Err(ChannelError::NothingToCommit);
        }
        let point = self
            .state
            .remote_next_point
            .ok_or(ChannelError::NotOperational(self.state.status))?;

        let signed = self.transact(|state, keys| {
            let our_cut = state.local_log.next_index();
            let their_cut = state.local_commit.their_log_index;
            let height = state.remote_commit.height + 1;

            let view = state.evaluate_view(our_cut, their_cut)?;
            let mut snapshot = view.into_snapshot(height, our_cut, their_cut);
            let (signature, htlc_signatures) = Self::sign_remote(state, keys, &snapshot, &point);
            snapshot.signature = Some(signature);
            snapshot.htlc_signatures = htlc_signatures.clone();

            let newly_signed: Vec<(HtlcId, HtlcSource)> = state
                .local_log
                .between(state.remote_commit.our_log_index, our_cut)
                .filter_map(|e| match (&e.update, e.source) {
                    (Update::Add { htlc_id, .. }, Some(source)) => Some((*htlc_id, source)),
                    _ => None,
                })
                .collect();

            let send_seq = state.next_send_seq();
            state.pending_remote_commit = Some(PendingCommitment { snapshot, send_seq });

            Ok(SignedCommitment {
                message: CommitmentSigned {
                    channel_id: state.channel_id,
                    signature,
                    htlc_signatures,
                    extensions: TlvStream::new(),
                },
                newly_signed,
            })
        })?;

        debug!(
            channel_id = %self.state.channel_id,
            height = self.state.remote_commit.height + 1,
            htlc_signatures = signed.message.htlc_signatures.len(),
            "signed remote commitment"
        );
        Ok(signed)
    }

    /// Validates the counterparty's signature on our next commitment, moves
    /// to it and revokes the one before.
    pub fn receive_commitment_sig(&mut self, msg: &CommitmentSigned) -> Result<RevokeAndAck, ChannelError> {
        match self.state.status {
            ChannelStatus::Normal | ChannelStatus::ShuttingDown => {}
            _ => return Err(ProtocolViolation::UnexpectedMessage("commitment_signed").into()),
        }

        let revocation = self.transact(|state, keys| {
            let our_cut = state.remote_commit.our_log_index;
            let their_cut = state.remote_log.next_index();
            if our_cut == state.local_commit.our_log_index && their_cut == state.local_commit.their_log_index {
                return Err(ProtocolViolation::EmptyCommitment.into());
            }

            let height = state.local_commit.height + 1;
            let view = state
                .evaluate_view(our_cut, their_cut)
                .map_err(ProtocolViolation::Constraint)?;
            let mut snapshot = view.into_snapshot(height, our_cut, their_cut);
            Self::verify_local(state, keys, &snapshot, &msg.signature, &msg.htlc_signatures)?;
            snapshot.signature = Some(msg.signature);
            snapshot.htlc_signatures = msg.htlc_signatures.clone();

            let revoked_height = state.local_commit.height;
            state.local_commit = snapshot;
            let seq = state.next_send_seq();
            state.last_revocation_seq = Some(seq);
            state.refresh_lock_in();
            state.compact();

            Ok(Self::revocation_for(state, keys, revoked_height))
        })?;

        debug!(
            channel_id = %self.state.channel_id,
            height = self.state.local_commit.height,
            "accepted local commitment, revoking previous"
        );
        Ok(revocation)
    }

    fn revocation_for(state: &ChannelState, keys: &ChannelKeyManager, revoked_height: u64) -> RevokeAndAck {
        RevokeAndAck {
            channel_id: state.channel_id,
            per_commitment_secret: keys.build_commitment_secret(INITIAL_COMMITMENT_NUMBER - revoked_height),
            next_per_commitment_point: keys
                .derive_per_commitment_point(INITIAL_COMMITMENT_NUMBER - (revoked_height + 2)),
            extensions: TlvStream::new(),
        }
    }

    /// Processes the counterparty's revocation of its previous commitment.
    /// Returns its updates that are now irrevocably committed.
    pub fn receive_revoke_and_ack(&mut self, msg: &RevokeAndAck) -> Result<LockedIn, ChannelError> {
        if self.state.status == ChannelStatus::Uninitialized || self.state.status == ChannelStatus::Closed {
            return Err(ProtocolViolation::UnexpectedMessage("revoke_and_ack").into());
        }

        let locked_in = self.transact(|state, keys| {
            let pending = state
                .pending_remote_commit
                .take()
                .ok_or(ProtocolViolation::UnexpectedRevocation)?;

            let revoked_height = state.remote_commit.height;
            let secret = SecretKey::from_slice(&msg.per_commitment_secret)
                .map_err(|_| ProtocolViolation::InvalidRevocationSecret { height: revoked_height })?;
            if PublicKey::from_secret_key(&keys.secp_ctx, &secret) != state.remote_current_point {
                return Err(ProtocolViolation::InvalidRevocationSecret { height: revoked_height }.into());
            }
            state
                .remote_secrets
                .provide_secret(INITIAL_COMMITMENT_NUMBER - revoked_height, msg.per_commitment_secret)?;

            state.remote_commit = pending.snapshot;
            state.remote_current_point = state
                .remote_next_point
                .ok_or(ProtocolViolation::UnexpectedRevocation)?;
            state.remote_next_point = Some(msg.next_per_commitment_point);

            let newly = state.refresh_lock_in();
            let locked_in = Self::collect_locked_in(state, &newly);
            state.compact();
            Ok(locked_in)
        })?;

        debug!(
            channel_id = %self.state.channel_id,
            revoked_height = self.state.remote_commit.height - 1,
            adds = locked_in.adds.len(),
            resolutions = locked_in.resolutions.len(),
            "counterparty revoked"
        );
        Ok(locked_in)
    }

    fn collect_locked_in(state: &ChannelState, remote_indices: &[u64]) -> LockedIn {
        let mut out = LockedIn::default();
        for entry in state.remote_log.iter().filter(|e| remote_indices.contains(&e.log_index)) {
            match &entry.update {
                Update::Add {
                    htlc_id,
                    amount_msat,
                    payment_hash,
                    cltv_expiry,
                    onion_routing_packet,
                    ..
                } => out.adds.push(IncomingHtlc {
                    channel_id: state.channel_id,
                    htlc_id: *htlc_id,
                    amount_msat: *amount_msat,
                    payment_hash: *payment_hash,
                    cltv_expiry: *cltv_expiry,
                    onion_routing_packet: onion_routing_packet.clone(),
                }),
                Update::Settle { htlc_id, preimage } => out.resolutions.push(ResolvedHtlc {
                    htlc_id: *htlc_id,
                    source: state.local_log.find_add(*htlc_id).and_then(|a| a.source),
                    resolution: HtlcResolution::Settle(*preimage),
                }),
                Update::Fail { htlc_id, reason } => out.resolutions.push(ResolvedHtlc {
                    htlc_id: *htlc_id,
                    source: state.local_log.find_add(*htlc_id).and_then(|a| a.source),
                    resolution: HtlcResolution::Fail(reason.clone()),
                }),
                Update::Fee { .. } => {}
            }
        }
        out
    }

    // ========================================================================
    // HAND-OFF
    // ========================================================================

    /// The switch or route provider took over the incoming HTLC `htlc_id`.
    pub fn mark_incoming_handed_off(&mut self, htlc_id: HtlcId) -> Result<(), ChannelError> {
        self.transact(|state, _| {
            let entry = state
                .remote_log
                .find_add_mut(htlc_id)
                .ok_or(PolicyViolation::UnknownHtlc(htlc_id))?;
            entry.handed_off = true;
            Ok(())
        })
    }

    /// The switch recorded the resolution of our HTLC `htlc_id` upstream.
    pub fn mark_resolution_handed_off(&mut self, htlc_id: HtlcId) -> Result<(), ChannelError> {
        self.transact(|state, _| {
            let entry = state
                .remote_log
                .find_resolution_mut(htlc_id)
                .ok_or(PolicyViolation::UnknownHtlc(htlc_id))?;
            entry.handed_off = true;
            state.compact();
            Ok(())
        })
    }

    /// Locked-in incoming HTLCs that nobody has taken over yet.
    pub fn unhanded_incoming(&self) -> Vec<IncomingHtlc> {
        let indices: Vec<u64> = self
            .state
            .remote_log
            .iter()
            .filter(|e| e.locked_in && !e.handed_off)
            .filter(|e| match e.update {
                Update::Add { htlc_id, .. } => self.state.local_log.find_resolution(htlc_id).is_none(),
                _ => false,
            })
            .map(|e| e.log_index)
            .collect();
        Self::collect_locked_in(&self.state, &indices).adds
    }

    /// Locked-in resolutions of our HTLCs not yet acknowledged by the switch.
    pub fn unhanded_resolutions(&self) -> Vec<ResolvedHtlc> {
        let indices: Vec<u64> = self
            .state
            .remote_log
            .iter()
            .filter(|e| e.locked_in && !e.handed_off && e.update.resolves().is_some())
            .map(|e| e.log_index)
            .collect();
        Self::collect_locked_in(&self.state, &indices).resolutions
    }

    /// Every outgoing HTLC still in our log together with its origin, for
    /// re-reporting keystones to the switch after a restart.
    pub fn outgoing_keystones(&self) -> Vec<(HtlcId, HtlcSource)> {
        self.state
            .local_log
            .iter()
            .filter_map(|e| match (&e.update, e.source) {
                (Update::Add { htlc_id, .. }, Some(source)) => Some((*htlc_id, source)),
                _ => None,
            })
            .collect()
    }

    /// Our HTLC that was offered on behalf of `source`, if any.
    pub fn find_outgoing(&self, source: &HtlcSource) -> Option<HtlcId> {
        self.outgoing_keystones()
            .into_iter()
            .find(|(_, s)| s == source)
            .map(|(id, _)| id)
    }

    /// Writes the current state again, used to probe a store that failed.
    pub fn persist(&self) -> Result<(), ChannelError> {
        self.store.atomic_commit(&self.state)?;
        Ok(())
    }

    // ========================================================================
    // RECONNECTION
    // ========================================================================

    /// Forgets counterparty updates not covered by a commitment_signed we
    /// received; the peer resends them after reconnecting.
    pub fn drop_uncommitted_remote_updates(&mut self) -> usize {
        let cut = self.state.local_commit.their_log_index;
        let dropped = self.state.remote_log.truncate_from(cut);
        if dropped > 0 {
            debug!(channel_id = %self.state.channel_id, dropped, "dropped uncommitted remote updates");
        }
        dropped
    }

    pub fn reestablish_message(&self) -> ChannelReestablish {
        let remote_height = self.state.remote_commit.height;
        let your_last_per_commitment_secret = if remote_height == 0 {
            [0u8; 32]
        } else {
            self.state
                .remote_secrets
                .get_secret(INITIAL_COMMITMENT_NUMBER - (remote_height - 1))
                .unwrap_or([0u8; 32])
        };

        ChannelReestablish {
            channel_id: self.state.channel_id,
            next_commitment_number: self.state.local_commit.height + 1,
            next_revocation_number: remote_height,
            your_last_per_commitment_secret,
            my_current_per_commitment_point: self.our_point(self.state.local_commit.height),
            extensions: TlvStream::new(),
        }
    }

    fn sync_position(&self) -> SyncPosition {
        SyncPosition {
            local_height: self.state.local_commit.height,
            remote_height: self.state.remote_commit.height,
            remote_pending: self.state.pending_remote_commit.is_some(),
            pending_send_seq: self.state.pending_remote_commit.as_ref().map(|p| p.send_seq),
            last_revocation_seq: self.state.last_revocation_seq,
        }
    }

    /// Messages to resend after the counterparty's channel_reestablish, in
    /// the order they originally went out, followed by our unsigned updates.
    pub fn handle_reestablish(&mut self, msg: &ChannelReestablish) -> Result<Vec<Message>, ChannelError> {
        if msg.channel_id != self.state.channel_id {
            return Err(ProtocolViolation::Reestablish("channel id mismatch".to_string()).into());
        }

        let plan = plan_reestablish(&self.sync_position(), msg, |height| {
            self.keys.build_commitment_secret(INITIAL_COMMITMENT_NUMBER - height)
        });
        debug!(channel_id = %self.state.channel_id, plan = ?plan, "reestablish plan");

        match plan {
            ReestablishPlan::Resume {
                resend_revocation,
                resend_commitment,
                revocation_first,
            } => {
                let mut out = Vec::new();
                let revocation = resend_revocation.then(|| {
                    Message::RevokeAndAck(Self::revocation_for(
                        &self.state,
                        &self.keys,
                        self.state.local_commit.height - 1,
                    ))
                });
                let commitment = if resend_commitment {
                    self.commitment_retransmission()
                } else {
                    Vec::new()
                };

                if revocation_first {
                    out.extend(revocation);
                    out.extend(commitment);
                } else {
                    out.extend(commitment);
                    out.extend(revocation);
                }

                let cut = self.state.remote_tip().our_log_index;
                out.extend(
                    self.state
                        .local_log
                        .between(cut, self.state.local_log.next_index())
                        .map(|e| e.update.to_message(self.state.channel_id)),
                );
                if let Some(script) = &self.state.shutdown.local_script {
                    out.push(Message::Shutdown(Shutdown {
                        channel_id: self.state.channel_id,
                        scriptpubkey: script.clone(),
                        extensions: TlvStream::new(),
                    }));
                }
                Ok(out)
            }
            ReestablishPlan::PeerBehind { reason } | ReestablishPlan::Invalid { reason } => {
                Err(ProtocolViolation::Reestablish(reason).into())
            }
            ReestablishPlan::LocalDataLoss => {
                self.mark_data_loss()?;
                Err(ChannelError::LocalDataLoss)
            }
        }
    }

    /// The updates covered by our pending commitment, then the signature.
    fn commitment_retransmission(&self) -> Vec<Message> {
        let Some(pending) = &self.state.pending_remote_commit else {
            return Vec::new();
        };
        let mut out: Vec<Message> = self
            .state
            .local_log
            .between(self.state.remote_commit.our_log_index, pending.snapshot.our_log_index)
            .map(|e| e.update.to_message(self.state.channel_id))
            .collect();
        if let Some(signature) = pending.snapshot.signature {
            out.push(Message::CommitmentSigned(CommitmentSigned {
                channel_id: self.state.channel_id,
                signature,
                htlc_signatures: pending.snapshot.htlc_signatures.clone(),
                extensions: TlvStream::new(),
            }));
        }
        out
    }

    // ========================================================================
    // EXPIRY
    // ========================================================================

    /// HTLCs on our commitment that can only be made safe on-chain: offered
    /// ones past expiry with no resolution from the peer, and received ones we
    /// know the preimage of that are not irrevocably removed within `margin`
    /// blocks of expiry.
    pub fn htlcs_needing_chain_action(&self, height: u32, margin: u32) -> Vec<HtlcId> {
        self.state
            .local_commit
            .htlcs
            .iter()
            .filter(|h| match h.direction {
                HtlcDirection::Offered => {
                    height >= h.cltv_expiry && self.state.remote_log.find_resolution(h.htlc_id).is_none()
                }
                HtlcDirection::Received => {
                    height.saturating_add(margin) >= h.cltv_expiry
                        && self
                            .state
                            .local_log
                            .find_resolution(h.htlc_id)
                            .map_or(false, |r| matches!(r.update, Update::Settle { .. }) && !r.locked_in)
                }
            })
            .map(|h| h.htlc_id)
            .collect()
    }

    // ========================================================================
    // CLOSING
    // ========================================================================

    /// Moves to ForceClosing and returns our latest commitment, signed by
    /// both parties.
    pub fn force_close(&mut self) -> Result<ChannelForceClosed, ChannelError> {
        let Some(remote_signature) = self.state.local_commit.signature else {
            return Err(ChannelError::NotOperational(self.state.status));
        };
        if self.state.status == ChannelStatus::Closed {
            return Err(ChannelError::NotOperational(self.state.status));
        }

        let (built, _) = Self::build_local(&self.state, &self.keys, &self.state.local_commit);
        let commitment_tx = finalize_holder_commitment(
            &self.keys.funding_key,
            built.tx,
            &Self::funding_script(&self.state),
            self.state.capacity_sat,
            &remote_signature,
            local_sig_first(&self.state.local_keys.funding_pubkey, &self.state.remote_keys.funding_pubkey),
            &self.keys.secp_ctx,
        );

        // Best effort: the commitment itself is already durable.
        self.state.status = ChannelStatus::ForceClosing;
        if let Err(err) = self.store.atomic_commit(&self.state) {
            warn!(channel_id = %self.state.channel_id, error = %err, "could not record force close");
        }

        warn!(
            channel_id = %self.state.channel_id,
            height = self.state.local_commit.height,
            txid = %commitment_tx.compute_txid(),
            "force closing"
        );
        Ok(ChannelForceClosed {
            channel_id: self.state.channel_id,
            commitment_tx,
            htlc_outputs: built.htlc_outputs,
            htlc_signatures: self.state.local_commit.htlc_signatures.clone(),
        })
    }

    /// ForceClosing without a broadcast: our latest state may be revoked.
    pub fn mark_data_loss(&mut self) -> Result<(), ChannelError> {
        self.transact(|state, _| {
            state.status = ChannelStatus::ForceClosing;
            Ok(())
        })?;
        warn!(channel_id = %self.state.channel_id, "local data loss detected, waiting for counterparty to close");
        Ok(())
    }

    /// Starts a cooperative close: no more adds from either side.
    pub fn propose_shutdown(&mut self) -> Result<Shutdown, ChannelError> {
        self.ensure_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;
        self.transact(|state, _| {
            let script = create_to_remote_script(&state.local_keys.payment_basepoint).to_bytes();
            state.shutdown.local_script = Some(script.clone());
            state.status = ChannelStatus::ShuttingDown;
            Ok(Shutdown {
                channel_id: state.channel_id,
                scriptpubkey: script,
                extensions: TlvStream::new(),
            })
        })
    }

    /// Records the counterparty's shutdown and returns ours if we have not
    /// sent it yet.
    pub fn receive_shutdown(&mut self, msg: &Shutdown) -> Result<Option<Shutdown>, ChannelError> {
        self.ensure_peer_status(&[ChannelStatus::Normal, ChannelStatus::ShuttingDown])?;
        let already_sent = self.state.shutdown.local_script.is_some();
        self.transact(|state, _| {
            state.shutdown.remote_script = Some(msg.scriptpubkey.clone());
            state.status = ChannelStatus::ShuttingDown;
            Ok(())
        })?;
        info!(channel_id = %self.state.channel_id, "counterparty initiated shutdown");
        if already_sent {
            return Ok(None);
        }
        self.propose_shutdown().map(Some)
    }

    /// No HTLCs remain in either log.
    pub fn is_drained(&self) -> bool {
        self.pending_htlcs().is_empty()
    }

    /// The chain collaborator saw the channel's funding output spent and
    /// settled.
    pub fn mark_closed(&mut self) -> Result<(), ChannelError> {
        self.transact(|state, _| {
            state.status = ChannelStatus::Closed;
            Ok(())
        })?;
        info!(channel_id = %self.state.channel_id, "channel closed");
        Ok(())
    }
}
