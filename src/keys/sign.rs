use bitcoin::hashes::Hash;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Transaction};

// ============================================================================
// TRANSACTION SIGNING & VERIFICATION
// ============================================================================
//
// Signatures travel on the wire in compact form without a sighash byte; the
// witness form (DER plus sighash flag) is only produced when a transaction is
// finalized for broadcast.

fn p2wsh_message(
    tx: &Transaction,
    input_index: usize,
    script: &ScriptBuf,
    amount_sat: u64,
    sighash_type: EcdsaSighashType,
) -> Message {
    let mut sighash_cache = SighashCache::new(tx);
    let sighash = sighash_cache
        .p2wsh_signature_hash(input_index, script, Amount::from_sat(amount_sat), sighash_type)
        .expect("commitment and htlc transactions always have the signed input");
    Message::from_digest(sighash.to_byte_array())
}

pub fn sign_transaction_input(
    tx: &Transaction,
    input_index: usize,
    script: &ScriptBuf,
    amount_sat: u64,
    sighash_type: EcdsaSighashType,
    secret_key: &SecretKey,
    secp_ctx: &Secp256k1<All>,
) -> Signature {
    let msg = p2wsh_message(tx, input_index, script, amount_sat, sighash_type);
    secp_ctx.sign_ecdsa(&msg, secret_key)
}

pub fn verify_signature(
    tx: &Transaction,
    input_index: usize,
    script: &ScriptBuf,
    amount_sat: u64,
    sighash_type: EcdsaSighashType,
    signature: &Signature,
    pubkey: &PublicKey,
    secp_ctx: &Secp256k1<All>,
) -> bool {
    let msg = p2wsh_message(tx, input_index, script, amount_sat, sighash_type);
    secp_ctx.verify_ecdsa(&msg, signature, pubkey).is_ok()
}

/// DER signature with the sighash flag appended, as it appears in a witness.
pub fn witness_signature(signature: &Signature, sighash_type: EcdsaSighashType) -> Vec<u8> {
    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(sighash_type as u8);
    sig_bytes
}
