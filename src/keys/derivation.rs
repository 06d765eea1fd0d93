use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;

use crate::types::{ChannelKeyManager, KeyFamily, KeysManager};

// ============================================================================
// BIP32 KEY DERIVATION & KEYS MANAGER
// ============================================================================

pub fn new_keys_manager(seed: [u8; 32], network: Network) -> KeysManager {
    let secp_ctx = Secp256k1::new();
    let master_key =
        Xpriv::new_master(network, &seed).expect("a 32-byte seed is always a valid master seed");

    KeysManager {
        secp_ctx,
        master_key,
        network,
    }
}

impl KeysManager {
    /// Path: m/1017'/0'/<key_family>'/0/<index>
    pub fn derive_key(&self, key_family: KeyFamily, index: u32) -> SecretKey {
        let path = [
            ChildNumber::Hardened { index: 1017 },
            ChildNumber::Hardened { index: 0 },
            ChildNumber::Hardened {
                index: key_family as u32,
            },
            ChildNumber::Normal { index: 0 },
            ChildNumber::Normal { index },
        ];

        self.master_key
            .derive_priv(&self.secp_ctx, &path)
            .expect("derivation below 2^31 with a valid master key cannot fail")
            .private_key
    }

    pub fn get_node_secret(&self) -> SecretKey {
        self.derive_key(KeyFamily::NodeKey, 0)
    }

    pub fn node_id(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secp_ctx, &self.get_node_secret())
    }

    /// All base keys for the channel with key index `channel_index`.
    pub fn derive_channel_keys(&self, channel_index: u32) -> ChannelKeyManager {
        let funding_key = self.derive_key(KeyFamily::MultiSig, channel_index);
        let revocation_basepoint_secret = self.derive_key(KeyFamily::RevocationBase, channel_index);
        let payment_basepoint_secret = self.derive_key(KeyFamily::PaymentBase, channel_index);
        let delayed_payment_basepoint_secret = self.derive_key(KeyFamily::DelayBase, channel_index);
        let htlc_basepoint_secret = self.derive_key(KeyFamily::HtlcBase, channel_index);
        let commitment_seed = self
            .derive_key(KeyFamily::CommitmentSeed, channel_index)
            .secret_bytes();

        ChannelKeyManager {
            funding_key,
            revocation_basepoint_secret,
            payment_basepoint_secret,
            delayed_payment_basepoint_secret,
            htlc_basepoint_secret,
            commitment_seed,
            secp_ctx: self.secp_ctx.clone(),
        }
    }
}
