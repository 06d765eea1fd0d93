use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::hashes::hash160::Hash as Hash160;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, ScriptBuf};
use bitcoin::secp256k1::PublicKey;

/// P2WPKH to the countersignatory's payment basepoint (static remote key).
pub fn create_to_remote_script(remote_pubkey: &PublicKey) -> ScriptBuf {
    let pubkey_hash = Hash160::hash(&remote_pubkey.serialize());

    Builder::new()
        .push_int(0)
        .push_slice(pubkey_hash.as_byte_array())
        .into_script()
}

/// Anchor-style to_remote witness script: the output is only spendable
/// one block after confirmation so it cannot be used to pin the commitment.
pub fn create_anchor_to_remote_script(remote_pubkey: &PublicKey) -> ScriptBuf {
    Builder::new()
        .push_slice(remote_pubkey.serialize())
        .push_opcode(opcodes::OP_CHECKSIGVERIFY)
        .push_int(1)
        .push_opcode(opcodes::OP_CSV)
        .into_script()
}

// OP_IF
//     <revocationpubkey>
// OP_ELSE
//     <to_self_delay> OP_CHECKSEQUENCEVERIFY OP_DROP
//     <local_delayedpubkey>
// OP_ENDIF
// OP_CHECKSIG
pub fn create_to_local_script(
    revocation_pubkey: &PublicKey,
    local_delayedpubkey: &PublicKey,
    to_self_delay: u16,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(opcodes::OP_IF)
        .push_slice(revocation_pubkey.serialize())
        .push_opcode(opcodes::OP_ELSE)
        .push_int(to_self_delay as i64)
        .push_opcode(opcodes::OP_CSV)
        .push_opcode(opcodes::OP_DROP)
        .push_slice(local_delayedpubkey.serialize())
        .push_opcode(opcodes::OP_ENDIF)
        .push_opcode(opcodes::OP_CHECKSIG)
        .into_script()
}

// <funding_pubkey> OP_CHECKSIG OP_IFDUP
// OP_NOTIF
//     OP_16 OP_CHECKSEQUENCEVERIFY
// OP_ENDIF
pub fn create_anchor_script(funding_pubkey: &PublicKey) -> ScriptBuf {
    Builder::new()
        .push_slice(funding_pubkey.serialize())
        .push_opcode(opcodes::OP_CHECKSIG)
        .push_opcode(opcodes::OP_IFDUP)
        .push_opcode(opcodes::OP_NOTIF)
        .push_int(16)
        .push_opcode(opcodes::OP_CSV)
        .push_opcode(opcodes::OP_ENDIF)
        .into_script()
}
