use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::locktime::absolute::LockTime;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};

use crate::keys::{sign_transaction_input, witness_signature};
use crate::scripts::{
    create_anchor_script, create_anchor_to_remote_script, create_offered_htlc_script,
    create_received_htlc_script, create_to_local_script, create_to_remote_script,
};
use crate::transactions::fees::{calculate_commitment_tx_fee, is_htlc_dust, FormatCapability};
use crate::types::{ChannelPublicKeys, CommitmentFormat, CommitmentKeys, OutputWithMetadata};

// ============================================================================
// COMMITMENT NUMBER OBSCURING
// ============================================================================

/// Lower 48 bits of SHA256(funder_payment_basepoint || fundee_payment_basepoint).
pub fn get_commitment_transaction_number_obscure_factor(
    initiator_payment_basepoint: &PublicKey,
    receiver_payment_basepoint: &PublicKey,
) -> u64 {
    let mut sha = Sha256::engine();

    sha.input(&initiator_payment_basepoint.serialize());
    sha.input(&receiver_payment_basepoint.serialize());

    let res = Sha256::from_engine(sha).to_byte_array();

    ((res[26] as u64) << 5 * 8)
        | ((res[27] as u64) << 4 * 8)
        | ((res[28] as u64) << 3 * 8)
        | ((res[29] as u64) << 2 * 8)
        | ((res[30] as u64) << 1 * 8)
        | ((res[31] as u64) << 0 * 8)
}

/// The commitment height is split across locktime (lower 24 bits) and
/// sequence (upper 24 bits) so the chain does not learn channel activity.
pub fn set_obscured_commitment_number(
    tx: &mut Transaction,
    commitment_height: u64,
    initiator_payment_basepoint: &PublicKey,
    receiver_payment_basepoint: &PublicKey,
) {
    let obscured = get_commitment_transaction_number_obscure_factor(
        initiator_payment_basepoint,
        receiver_payment_basepoint,
    ) ^ commitment_height;

    let locktime_value = ((0x20 as u32) << 8 * 3) | ((obscured & 0xffffffu64) as u32);
    tx.lock_time = LockTime::from_consensus(locktime_value);

    tx.input[0].sequence = Sequence(((0x80 as u32) << 8 * 3) | ((obscured >> 3 * 8) as u32));
}

/// Inverse of `set_obscured_commitment_number`.
pub fn extract_commitment_height(
    tx: &Transaction,
    initiator_payment_basepoint: &PublicKey,
    receiver_payment_basepoint: &PublicKey,
) -> u64 {
    let lower = (tx.lock_time.to_consensus_u32() & 0xffffff) as u64;
    let upper = (tx.input[0].sequence.0 & 0xffffff) as u64;
    ((upper << 24) | lower)
        ^ get_commitment_transaction_number_obscure_factor(
            initiator_payment_basepoint,
            receiver_payment_basepoint,
        )
}

// ============================================================================
// OUTPUTS
// ============================================================================

/// One HTLC as it appears in a commitment. `offered` is from the
/// broadcaster's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentHtlc {
    pub htlc_id: u64,
    pub offered: bool,
    pub amount_msat: u64,
    pub payment_hash: [u8; 32],
    pub cltv_expiry: u32,
}

/// Location and spending script of an untrimmed HTLC output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcOutputInfo {
    pub htlc_id: u64,
    pub offered: bool,
    pub amount_sat: u64,
    pub payment_hash: [u8; 32],
    pub cltv_expiry: u32,
    pub output_index: u32,
    pub witness_script: ScriptBuf,
}

/// Everything needed to lay out one side's commitment transaction.
/// Balances are from the broadcaster's point of view and exclude HTLCs.
pub struct CommitmentParams<'a> {
    pub funding_outpoint: OutPoint,
    pub commitment_height: u64,
    pub keys: &'a CommitmentKeys,
    pub broadcaster: &'a ChannelPublicKeys,
    pub countersignatory: &'a ChannelPublicKeys,
    pub broadcaster_is_funder: bool,
    pub to_broadcaster_msat: u64,
    pub to_countersignatory_msat: u64,
    pub to_self_delay: u16,
    pub dust_limit_satoshis: u64,
    pub feerate_per_kw: u32,
    pub format: CommitmentFormat,
    pub htlcs: &'a [CommitmentHtlc],
}

#[derive(Debug, Clone)]
pub struct BuiltCommitment {
    pub tx: Transaction,
    /// Untrimmed HTLC outputs in transaction output order.
    pub htlc_outputs: Vec<HtlcOutputInfo>,
    pub fee_sat: u64,
}

/// Sort outputs according to BOLT 3 (BIP69-style):
/// First by value, then by script pubkey, then by CLTV expiry
pub fn sort_outputs(outputs: &mut Vec<OutputWithMetadata>) {
    outputs.sort_by(|a, b| {
        a.value
            .cmp(&b.value)
            .then(a.script.cmp(&b.script))
            .then(a.cltv_expiry.cmp(&b.cltv_expiry))
    });
}

/// Witness script guarding one HTLC output on the broadcaster's commitment.
pub fn htlc_witness_script(
    keys: &CommitmentKeys,
    htlc: &CommitmentHtlc,
    format: &dyn FormatCapability,
) -> ScriptBuf {
    if htlc.offered {
        create_offered_htlc_script(
            &keys.revocation_key,
            &keys.local_htlc_key,
            &keys.remote_htlc_key,
            &htlc.payment_hash,
            format.csv_encumbered(),
        )
    } else {
        create_received_htlc_script(
            &keys.revocation_key,
            &keys.local_htlc_key,
            &keys.remote_htlc_key,
            &htlc.payment_hash,
            htlc.cltv_expiry,
            format.csv_encumbered(),
        )
    }
}

/// Number of HTLCs in `htlcs` that survive dust trimming.
pub fn count_untrimmed_htlcs(
    htlcs: &[CommitmentHtlc],
    dust_limit_satoshis: u64,
    feerate_per_kw: u32,
    format: &dyn FormatCapability,
) -> usize {
    htlcs
        .iter()
        .filter(|h| !is_htlc_dust(format, h.amount_msat / 1000, dust_limit_satoshis, feerate_per_kw, h.offered))
        .count()
}

// ============================================================================
// COMMITMENT TRANSACTION
// ============================================================================

/// Lays out a commitment transaction. The commitment fee and the anchor
/// outputs are paid by the funder; outputs below the broadcaster's dust limit
/// are trimmed and their value goes to fees.
pub fn create_commitment_transaction(params: &CommitmentParams) -> BuiltCommitment {
    let format = params.format.capability();
    let keys = params.keys;

    let mut output_metadata = Vec::new();
    let mut untrimmed = Vec::new();

    for (index, htlc) in params.htlcs.iter().enumerate() {
        let amount_sat = htlc.amount_msat / 1000;
        if is_htlc_dust(
            format,
            amount_sat,
            params.dust_limit_satoshis,
            params.feerate_per_kw,
            htlc.offered,
        ) {
            continue;
        }
        let script = htlc_witness_script(keys, htlc, format);
        output_metadata.push(OutputWithMetadata {
            value: amount_sat,
            script: script.to_p2wsh(),
            cltv_expiry: if htlc.offered { None } else { Some(htlc.cltv_expiry) },
            htlc_index: Some(index),
        });
        untrimmed.push((index, script));
    }

    let fee_sat = calculate_commitment_tx_fee(format, params.feerate_per_kw, untrimmed.len());
    let anchors_sat = format.anchor_output_sat() * 2;

    let mut to_broadcaster_sat = params.to_broadcaster_msat / 1000;
    let mut to_countersignatory_sat = params.to_countersignatory_msat / 1000;
    if params.broadcaster_is_funder {
        to_broadcaster_sat = to_broadcaster_sat.saturating_sub(fee_sat + anchors_sat);
    } else {
        to_countersignatory_sat = to_countersignatory_sat.saturating_sub(fee_sat + anchors_sat);
    }

    let has_to_local = to_broadcaster_sat >= params.dust_limit_satoshis;
    let has_to_remote = to_countersignatory_sat >= params.dust_limit_satoshis;

    if has_to_local {
        let to_local_script = create_to_local_script(
            &keys.revocation_key,
            &keys.local_delayed_payment_key,
            params.to_self_delay,
        );
        output_metadata.push(OutputWithMetadata {
            value: to_broadcaster_sat,
            script: to_local_script.to_p2wsh(),
            cltv_expiry: None,
            htlc_index: None,
        });
    }

    if has_to_remote {
        let remote_payment_basepoint = &params.countersignatory.payment_basepoint;
        let script = if format.csv_encumbered() {
            create_anchor_to_remote_script(remote_payment_basepoint).to_p2wsh()
        } else {
            create_to_remote_script(remote_payment_basepoint)
        };
        output_metadata.push(OutputWithMetadata {
            value: to_countersignatory_sat,
            script,
            cltv_expiry: None,
            htlc_index: None,
        });
    }

    if format.anchor_output_sat() > 0 {
        if has_to_local || !untrimmed.is_empty() {
            output_metadata.push(OutputWithMetadata {
                value: format.anchor_output_sat(),
                script: create_anchor_script(&params.broadcaster.funding_pubkey).to_p2wsh(),
                cltv_expiry: None,
                htlc_index: None,
            });
        }
        if has_to_remote || !untrimmed.is_empty() {
            output_metadata.push(OutputWithMetadata {
                value: format.anchor_output_sat(),
                script: create_anchor_script(&params.countersignatory.funding_pubkey).to_p2wsh(),
                cltv_expiry: None,
                htlc_index: None,
            });
        }
    }

    sort_outputs(&mut output_metadata);

    let mut htlc_outputs = Vec::with_capacity(untrimmed.len());
    for (output_index, meta) in output_metadata.iter().enumerate() {
        let Some(index) = meta.htlc_index else { continue };
        let htlc = &params.htlcs[index];
        let witness_script = untrimmed
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, s)| s.clone())
            .unwrap_or_default();
        htlc_outputs.push(HtlcOutputInfo {
            htlc_id: htlc.htlc_id,
            offered: htlc.offered,
            amount_sat: meta.value,
            payment_hash: htlc.payment_hash,
            cltv_expiry: htlc.cltv_expiry,
            output_index: output_index as u32,
            witness_script,
        });
    }

    let outputs: Vec<TxOut> = output_metadata
        .iter()
        .map(|meta| TxOut {
            value: Amount::from_sat(meta.value),
            script_pubkey: meta.script.clone(),
        })
        .collect();

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: params.funding_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs,
    };

    let (initiator, receiver) = if params.broadcaster_is_funder {
        (params.broadcaster, params.countersignatory)
    } else {
        (params.countersignatory, params.broadcaster)
    };
    set_obscured_commitment_number(
        &mut tx,
        params.commitment_height,
        &initiator.payment_basepoint,
        &receiver.payment_basepoint,
    );

    BuiltCommitment {
        tx,
        htlc_outputs,
        fee_sat,
    }
}

/// Signs our own commitment and attaches the 2-of-2 witness, making it
/// ready for broadcast.
pub fn finalize_holder_commitment(
    funding_key: &SecretKey,
    tx: Transaction,
    funding_script: &ScriptBuf,
    funding_amount_sat: u64,
    remote_funding_signature: &Signature,
    local_sig_first: bool,
    secp_ctx: &Secp256k1<All>,
) -> Transaction {
    let local_funding_signature = sign_transaction_input(
        &tx,
        0,
        funding_script,
        funding_amount_sat,
        EcdsaSighashType::All,
        funding_key,
        secp_ctx,
    );
    let local = witness_signature(&local_funding_signature, EcdsaSighashType::All);
    let remote = witness_signature(remote_funding_signature, EcdsaSighashType::All);

    let witness = if local_sig_first {
        Witness::from_slice(&[&[][..], &local[..], &remote[..], funding_script.as_bytes()])
    } else {
        Witness::from_slice(&[&[][..], &remote[..], &local[..], funding_script.as_bytes()])
    };

    let mut signed_tx = tx;
    signed_tx.input[0].witness = witness;
    signed_tx
}
