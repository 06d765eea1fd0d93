use bitcoin::bip32::Xpriv;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Network, OutPoint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// KEY FAMILY ENUM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyFamily {
    MultiSig = 0,
    RevocationBase = 1,
    HtlcBase = 2,
    PaymentBase = 3,
    DelayBase = 4,
    CommitmentSeed = 5,
    NodeKey = 6,
}

// ============================================================================
// KEY MANAGEMENT STRUCTURES
// ============================================================================

pub struct KeysManager {
    pub secp_ctx: Secp256k1<All>,
    pub master_key: Xpriv,
    pub network: Network,
}

/// Secret base keys for one channel. Never persisted: re-derived from the
/// node seed and the channel's key index whenever a channel is restored.
#[derive(Clone)]
pub struct ChannelKeyManager {
    pub funding_key: SecretKey,
    pub revocation_basepoint_secret: SecretKey,
    pub payment_basepoint_secret: SecretKey,
    pub delayed_payment_basepoint_secret: SecretKey,
    pub htlc_basepoint_secret: SecretKey,
    pub commitment_seed: [u8; 32],
    pub secp_ctx: Secp256k1<All>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPublicKeys {
    pub funding_pubkey: PublicKey,
    pub revocation_basepoint: PublicKey,
    pub payment_basepoint: PublicKey,
    pub delayed_payment_basepoint: PublicKey,
    pub htlc_basepoint: PublicKey,
}

/// The set of public keys used in the creation of one commitment transaction,
/// derived from the broadcaster's per-commitment point.
#[derive(Clone, Debug)]
pub struct CommitmentKeys {
    pub per_commitment_point: PublicKey,
    /// Lets the broadcaster's counterparty punish a revoked broadcast.
    pub revocation_key: PublicKey,
    pub local_htlc_key: PublicKey,
    pub remote_htlc_key: PublicKey,
    pub local_delayed_payment_key: PublicKey,
}

// ============================================================================
// OUTPUT SORTING STRUCTURES
// ============================================================================

#[derive(Debug, Clone)]
pub struct OutputWithMetadata {
    pub value: u64,
    pub script: ScriptBuf,
    pub cltv_expiry: Option<u32>,
    /// Position of the HTLC in the commitment's HTLC list, if this output is one.
    pub htlc_index: Option<usize>,
}

// ============================================================================
// IDENTIFIERS
// ============================================================================

pub type PeerId = PublicKey;
pub type HtlcId = u64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
    /// BOLT 2 channel id: funding txid with the output index XORed into the
    /// last two bytes.
    pub fn from_funding_outpoint(outpoint: &OutPoint) -> Self {
        use bitcoin::hashes::Hash;
        let mut id = outpoint.txid.to_byte_array();
        id[30] ^= ((outpoint.vout >> 8) & 0xff) as u8;
        id[31] ^= (outpoint.vout & 0xff) as u8;
        ChannelId(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", hex::encode(&self.0[..8]))
    }
}

/// Identifies an HTLC while it is in flight on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CircuitKey {
    pub channel_id: ChannelId,
    pub htlc_id: HtlcId,
}

impl fmt::Display for CircuitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(&self.channel_id.0[..8]), self.htlc_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(pub [u8; 32]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentHash(pub [u8; 32]);

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPreimage(pub [u8; 32]);

impl PaymentPreimage {
    pub fn payment_hash(&self) -> PaymentHash {
        let digest = Sha256::digest(self.0);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        PaymentHash(hash)
    }
}

impl fmt::Debug for PaymentPreimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaymentPreimage(..)")
    }
}

/// Where an outgoing HTLC came from: another channel, or this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HtlcSource {
    Forwarded(CircuitKey),
    Local(PaymentId),
}

impl fmt::Display for HtlcSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HtlcSource::Forwarded(key) => write!(f, "fwd:{}", key),
            HtlcSource::Local(id) => write!(f, "local:{}", hex::encode(&id.0[..8])),
        }
    }
}

// ============================================================================
// HTLC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcDirection {
    Offered,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcState {
    Added,
    SettlePending,
    FailPending,
    Settled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Htlc {
    pub htlc_id: HtlcId,
    pub amount_msat: u64,
    pub payment_hash: PaymentHash,
    pub cltv_expiry: u32,
    pub direction: HtlcDirection,
    pub state: HtlcState,
    /// Set for HTLCs we offered on behalf of the switch.
    pub source: Option<HtlcSource>,
}

// ============================================================================
// CHANNEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Uninitialized,
    Normal,
    ShuttingDown,
    ForceClosing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentFormat {
    Legacy,
    Anchors,
}

impl Default for CommitmentFormat {
    fn default() -> Self {
        CommitmentFormat::Anchors
    }
}

// ============================================================================
// RESOLUTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcResolution {
    Settle(PaymentPreimage),
    /// Opaque failure reason, relayed back towards the origin.
    Fail(Vec<u8>),
}

/// A locked-in HTLC offered to us, waiting for a forwarding decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: HtlcId,
    pub amount_msat: u64,
    pub payment_hash: PaymentHash,
    pub cltv_expiry: u32,
    pub onion_routing_packet: Vec<u8>,
}

impl IncomingHtlc {
    pub fn circuit_key(&self) -> CircuitKey {
        CircuitKey {
            channel_id: self.channel_id,
            htlc_id: self.htlc_id,
        }
    }
}
