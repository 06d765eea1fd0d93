use bitcoin::locktime::absolute::LockTime;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::keys::{sign_transaction_input, verify_signature};
use crate::scripts::create_to_local_script;
use crate::transactions::commitment::{BuiltCommitment, HtlcOutputInfo};
use crate::transactions::fees::{
    calculate_htlc_success_tx_fee, calculate_htlc_timeout_tx_fee, FormatCapability,
};
use crate::types::CommitmentKeys;

// ============================================================================
// SECOND-STAGE HTLC TRANSACTIONS
// ============================================================================

fn htlc_input_sequence(format: &dyn FormatCapability) -> Sequence {
    if format.csv_encumbered() {
        Sequence(1)
    } else {
        Sequence::ZERO
    }
}

/// Spends an HTLC the broadcaster offered back to the broadcaster's
/// delayed to_local script once `cltv_expiry` has passed.
pub fn create_htlc_timeout_transaction(
    htlc_outpoint: OutPoint,
    htlc_amount: u64,
    cltv_expiry: u32,
    local_keys: &CommitmentKeys,
    to_self_delay: u16,
    feerate_per_kw: u32,
    format: &dyn FormatCapability,
) -> Transaction {
    let fee = calculate_htlc_timeout_tx_fee(format, feerate_per_kw);
    let output_amount = htlc_amount.saturating_sub(fee);

    let to_local_script = create_to_local_script(
        &local_keys.revocation_key,
        &local_keys.local_delayed_payment_key,
        to_self_delay,
    );

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(cltv_expiry),
        input: vec![TxIn {
            previous_output: htlc_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: htlc_input_sequence(format),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(output_amount),
            script_pubkey: to_local_script.to_p2wsh(),
        }],
    }
}

/// Claims an HTLC the broadcaster received; the preimage goes in the witness.
pub fn create_htlc_success_transaction(
    htlc_outpoint: OutPoint,
    htlc_amount: u64,
    local_keys: &CommitmentKeys,
    to_self_delay: u16,
    feerate_per_kw: u32,
    format: &dyn FormatCapability,
) -> Transaction {
    let fee = calculate_htlc_success_tx_fee(format, feerate_per_kw);
    let output_amount = htlc_amount.saturating_sub(fee);

    let to_local_script = create_to_local_script(
        &local_keys.revocation_key,
        &local_keys.local_delayed_payment_key,
        to_self_delay,
    );

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: htlc_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: htlc_input_sequence(format),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(output_amount),
            script_pubkey: to_local_script.to_p2wsh(),
        }],
    }
}

/// Second-stage transaction for one HTLC output of `commitment`.
pub fn create_second_stage_transaction(
    commitment: &BuiltCommitment,
    htlc: &HtlcOutputInfo,
    keys: &CommitmentKeys,
    to_self_delay: u16,
    feerate_per_kw: u32,
    format: &dyn FormatCapability,
) -> Transaction {
    let outpoint = OutPoint {
        txid: commitment.tx.compute_txid(),
        vout: htlc.output_index,
    };
    if htlc.offered {
        create_htlc_timeout_transaction(
            outpoint,
            htlc.amount_sat,
            htlc.cltv_expiry,
            keys,
            to_self_delay,
            feerate_per_kw,
            format,
        )
    } else {
        create_htlc_success_transaction(outpoint, htlc.amount_sat, keys, to_self_delay, feerate_per_kw, format)
    }
}

/// Countersignatory signatures over every second-stage transaction of
/// `commitment`, in commitment output order.
pub fn sign_htlc_transactions(
    commitment: &BuiltCommitment,
    keys: &CommitmentKeys,
    htlc_secret_key: &SecretKey,
    to_self_delay: u16,
    feerate_per_kw: u32,
    format: &dyn FormatCapability,
    secp_ctx: &Secp256k1<All>,
) -> Vec<Signature> {
    commitment
        .htlc_outputs
        .iter()
        .map(|htlc| {
            let tx = create_second_stage_transaction(commitment, htlc, keys, to_self_delay, feerate_per_kw, format);
            sign_transaction_input(
                &tx,
                0,
                &htlc.witness_script,
                htlc.amount_sat,
                format.htlc_sighash_type(),
                htlc_secret_key,
                secp_ctx,
            )
        })
        .collect()
}

/// Index of the first HTLC signature that does not verify, if any.
pub fn verify_htlc_signatures(
    commitment: &BuiltCommitment,
    keys: &CommitmentKeys,
    signatures: &[Signature],
    countersignatory_htlc_key: &PublicKey,
    to_self_delay: u16,
    feerate_per_kw: u32,
    format: &dyn FormatCapability,
    secp_ctx: &Secp256k1<All>,
) -> Option<usize> {
    commitment
        .htlc_outputs
        .iter()
        .zip(signatures)
        .position(|(htlc, signature)| {
            let tx = create_second_stage_transaction(commitment, htlc, keys, to_self_delay, feerate_per_kw, format);
            !verify_signature(
                &tx,
                0,
                &htlc.witness_script,
                htlc.amount_sat,
                format.htlc_sighash_type(),
                signature,
                countersignatory_htlc_key,
                secp_ctx,
            )
        })
}
