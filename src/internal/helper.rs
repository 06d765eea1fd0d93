use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Transaction, Txid};
use lightning::chain::chaininterface::BroadcasterInterface;
use tracing::info;

use crate::channel::{Channel, ChannelSetup};
use crate::config::ChannelConfig;
use crate::errors::ChannelError;
use crate::interfaces::{RouteDecision, RouteProvider};
use crate::link::actor::INCORRECT_OR_UNKNOWN_PAYMENT_DETAILS;
use crate::link::failure_reason;
use crate::store::ChannelStateStore;
use crate::types::{ChannelId, IncomingHtlc, KeysManager, PaymentHash, PaymentPreimage};
use crate::INITIAL_COMMITMENT_NUMBER;

/// A deterministic stand-in funding outpoint for simulated channels.
pub fn simulated_outpoint(label: &str) -> OutPoint {
    let digest = Sha256::hash(label.as_bytes());
    OutPoint {
        txid: Txid::from_byte_array(digest.to_byte_array()),
        vout: 0,
    }
}

/// Creates both ends of a channel funded by `funder` and runs the height-0
/// signature exchange and channel_ready, leaving both sides Normal.
pub fn open_channel_pair(
    funder: &KeysManager,
    fundee: &KeysManager,
    key_index: u32,
    funding_outpoint: OutPoint,
    capacity_sat: u64,
    push_msat: u64,
    config: &ChannelConfig,
    funder_store: Arc<dyn ChannelStateStore>,
    fundee_store: Arc<dyn ChannelStateStore>,
) -> Result<(Channel, Channel), ChannelError> {
    let funder_keys = funder.derive_channel_keys(key_index);
    let fundee_keys = fundee.derive_channel_keys(key_index);
    let funder_first_point = funder_keys.derive_per_commitment_point(INITIAL_COMMITMENT_NUMBER);
    let fundee_first_point = fundee_keys.derive_per_commitment_point(INITIAL_COMMITMENT_NUMBER);

    let funder_setup = ChannelSetup {
        funding_outpoint,
        capacity_sat,
        is_funder: true,
        push_msat,
        key_index,
        counterparty_node_id: fundee.node_id(),
        counterparty_keys: fundee_keys.to_public_keys(),
        counterparty_first_point: fundee_first_point,
        local_limits: config.limits,
        remote_limits: config.limits,
        feerate_per_kw: config.feerate_per_kw,
        format: config.format,
        max_dust_htlc_exposure_msat: config.max_dust_htlc_exposure_msat,
    };
    let fundee_setup = ChannelSetup {
        is_funder: false,
        counterparty_node_id: funder.node_id(),
        counterparty_keys: funder_keys.to_public_keys(),
        counterparty_first_point: funder_first_point,
        ..funder_setup.clone()
    };

    let mut a = Channel::new(&funder_setup, funder_keys, funder_store)?;
    let mut b = Channel::new(&fundee_setup, fundee_keys, fundee_store)?;

    // funding_created, then funding_signed
    let sig_for_fundee = a.initial_commitment_signature()?;
    b.accept_initial_signature(&sig_for_fundee)?;
    let sig_for_funder = b.initial_commitment_signature()?;
    a.accept_initial_signature(&sig_for_funder)?;

    let a_ready = a.channel_ready_point();
    let b_ready = b.channel_ready_point();
    a.funding_confirmed(b_ready)?;
    b.funding_confirmed(a_ready)?;

    info!(channel_id = %a.channel_id(), capacity_sat, "channel pair opened");
    Ok((a, b))
}

/// Route provider backed by fixed tables: invoices this node settles and
/// payment hashes it forwards.
#[derive(Default)]
pub struct StaticRouter {
    invoices: Mutex<HashMap<PaymentHash, PaymentPreimage>>,
    routes: Mutex<HashMap<PaymentHash, StaticRoute>>,
}

#[derive(Debug, Clone, Copy)]
pub struct StaticRoute {
    pub outgoing_channel: ChannelId,
    pub fee_msat: u64,
    pub cltv_delta: u32,
}

impl StaticRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_invoice(&self, preimage: PaymentPreimage) -> PaymentHash {
        let hash = preimage.payment_hash();
        self.invoices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(hash, preimage);
        hash
    }

    pub fn add_route(&self, payment_hash: PaymentHash, route: StaticRoute) {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(payment_hash, route);
    }
}

impl RouteProvider for StaticRouter {
    fn route(&self, htlc: &IncomingHtlc) -> RouteDecision {
        if let Some(preimage) = self
            .invoices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&htlc.payment_hash)
        {
            return RouteDecision::Settle(*preimage);
        }

        match self
            .routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&htlc.payment_hash)
        {
            Some(route) => RouteDecision::Forward {
                outgoing_channel: route.outgoing_channel,
                amount_msat: htlc.amount_msat.saturating_sub(route.fee_msat),
                cltv_expiry: htlc.cltv_expiry.saturating_sub(route.cltv_delta),
            },
            None => RouteDecision::Fail(failure_reason(INCORRECT_OR_UNKNOWN_PAYMENT_DETAILS)),
        }
    }
}

/// Chain backend that keeps what it was asked to broadcast.
#[derive(Default)]
pub struct RecordingBroadcaster {
    transactions: Mutex<Vec<Transaction>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl BroadcasterInterface for RecordingBroadcaster {
    fn broadcast_transactions(&self, txs: &[&Transaction]) {
        let mut recorded = self.transactions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for tx in txs {
            info!(txid = %tx.compute_txid(), "broadcast requested");
            recorded.push((*tx).clone());
        }
    }
}
