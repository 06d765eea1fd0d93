//! Error types for the channel core.
//!
//! Each layer has its own enum; `Error` aggregates them for the binary. The
//! classification that matters operationally is `is_fatal`: only protocol
//! violations, bad signatures and persistence failures that never recover
//! take a channel down, and only that one channel.

use thiserror::Error;

use crate::types::{ChannelId, ChannelStatus, HtlcId, HtlcSource, PeerId};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// WIRE
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("decoding error: {0}")]
    DecodingError(#[from] DecodeError),

    #[error("encoding error: {0}")]
    EncodingError(#[from] EncodeError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("record length {declared} exceeds remaining {remaining} bytes")]
    LengthMismatch { declared: u64, remaining: usize },

    #[error("unknown required extension type {0}")]
    UnknownEvenType(u64),

    #[error("unknown required message type {0}")]
    UnknownEvenMessage(u16),

    #[error("non-minimal varint encoding")]
    NonMinimalVarint,

    #[error("extension type {current} follows {previous}")]
    ExtensionOrder { previous: u64, current: u64 },

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("invalid value for extension type {0}")]
    InvalidExtension(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("field {field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{count} htlc signatures exceed the limit of {max}")]
    TooManySignatures { count: usize, max: usize },
}

// ============================================================================
// CHANNEL
// ============================================================================

/// Reasons a locally proposed update is refused before it reaches the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("channel is {0:?}")]
    ChannelNotNormal(ChannelStatus),

    #[error("amount {amount_msat} msat below minimum {minimum_msat} msat")]
    BelowHtlcMinimum { amount_msat: u64, minimum_msat: u64 },

    #[error("insufficient balance: {available_msat} msat available, {required_msat} msat required")]
    InsufficientBalance { available_msat: u64, required_msat: u64 },

    #[error("balance {balance_msat} msat would fall below reserve {reserve_msat} msat")]
    ReserveBreached { balance_msat: u64, reserve_msat: u64 },

    #[error("pending htlc count would exceed {max}")]
    TooManyHtlcs { max: u16 },

    #[error("in-flight value {value_msat} msat exceeds {max_msat} msat")]
    InFlightValueExceeded { value_msat: u64, max_msat: u64 },

    #[error("dust exposure {exposure_msat} msat exceeds {max_msat} msat")]
    DustExposureExceeded { exposure_msat: u64, max_msat: u64 },

    #[error("unknown htlc {0}")]
    UnknownHtlc(HtlcId),

    #[error("htlc {0} is not locked in")]
    HtlcNotLockedIn(HtlcId),

    #[error("htlc {0} already has a pending resolution")]
    HtlcAlreadyResolving(HtlcId),

    #[error("preimage does not match payment hash of htlc {0}")]
    InvalidPreimage(HtlcId),

    #[error("only the funder may update the fee")]
    NotFunder,

    #[error("expiry {expiry} is too close to height {height}")]
    ExpiryTooSoon { expiry: u32, height: u32 },
}

/// Peer behaviour that breaks the protocol. Always fatal for the channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("expected htlc id {expected}, peer used {got}")]
    UnexpectedHtlcId { expected: HtlcId, got: HtlcId },

    #[error("peer update breaks channel constraints: {0}")]
    Constraint(PolicyViolation),

    #[error("peer referenced unknown or uncommitted htlc {0}")]
    UnknownHtlc(HtlcId),

    #[error("peer preimage does not match htlc {0}")]
    InvalidPreimage(HtlcId),

    #[error("commitment_signed commits no new updates")]
    EmptyCommitment,

    #[error("expected {expected} htlc signatures, got {got}")]
    HtlcSignatureCount { expected: usize, got: usize },

    #[error("revocation secret for height {height} does not match its point")]
    InvalidRevocationSecret { height: u64 },

    #[error("revocation secret inconsistent with previously revealed secrets")]
    InconsistentSecret,

    #[error("revoke_and_ack received with no outstanding commitment")]
    UnexpectedRevocation,

    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    #[error("reestablish failed: {0}")]
    Reestablish(String),

    #[error("peer sent error: {0}")]
    RemoteError(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    #[error("commitment would be unaffordable for the funder")]
    UnaffordableCommitment,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("local policy reject: {0}")]
    LocalPolicyReject(#[from] PolicyViolation),

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("invalid {what} signature for commitment height {height}")]
    InvalidSignature { height: u64, what: &'static str },

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    #[error("a signed commitment is still awaiting revocation")]
    RevocationWindowExhausted,

    #[error("no updates to commit")]
    NothingToCommit,

    #[error("channel is {0:?}")]
    NotOperational(ChannelStatus),

    #[error("peer proved our channel state is out of date")]
    LocalDataLoss,

    #[error("invalid channel setup: {0}")]
    InvalidSetup(String),
}

impl ChannelError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::ProtocolViolation(_)
                | ChannelError::InvalidSignature { .. }
                | ChannelError::LocalDataLoss
        )
    }
}

// ============================================================================
// STORE / SWITCH / LINK / CONFIG
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    #[error("no circuit for {0}")]
    CircuitNotFound(HtlcSource),

    #[error("no link registered for channel {0}")]
    UnknownLink(ChannelId),

    #[error("link for channel {0} stopped accepting commands")]
    LinkUnavailable(ChannelId),

    #[error("circuit for {htlc_source} already bound to a different outgoing htlc")]
    KeystoneMismatch { htlc_source: HtlcSource },

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("transient link failure: {0}")]
    TransientLinkFailure(#[from] TransportError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error("persistence did not recover after {attempts} attempts")]
    StoreUnrecoverable { attempts: u32 },

    #[error("could not encode outgoing message: {0}")]
    Encoding(#[from] WireError),
}

impl LinkError {
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Channel(err) => err.is_fatal(),
            LinkError::StoreUnrecoverable { .. } => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
