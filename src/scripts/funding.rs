use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::script::{Builder, ScriptBuf};
use bitcoin::secp256k1::PublicKey;
use bitcoin::PublicKey as BitcoinPublicKey;

/// 2-of-2 multisig over both funding keys, lexicographically ordered.
pub fn create_funding_script(pubkey1: &PublicKey, pubkey2: &PublicKey) -> ScriptBuf {
    let (pubkey_lesser, pubkey_larger) = if pubkey1.serialize() < pubkey2.serialize() {
        (pubkey1, pubkey2)
    } else {
        (pubkey2, pubkey1)
    };
    Builder::new()
        .push_int(2)
        .push_key(&BitcoinPublicKey::new(*pubkey_lesser))
        .push_key(&BitcoinPublicKey::new(*pubkey_larger))
        .push_int(2)
        .push_opcode(opcodes::OP_CHECKMULTISIG)
        .into_script()
}

/// Whether `local` signs first in the funding witness.
pub fn local_sig_first(local: &PublicKey, remote: &PublicKey) -> bool {
    local.serialize() < remote.serialize()
}
