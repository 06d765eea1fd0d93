use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use crate::errors::{DecodeError, EncodeError, WireError};
use crate::types::{ChannelId, PaymentHash, PaymentPreimage};
use crate::wire::codec::{Reader, Writer};
use crate::wire::tlv::TlvStream;

pub const MSG_ERROR: u16 = 17;
pub const MSG_SHUTDOWN: u16 = 38;
pub const MSG_UPDATE_ADD_HTLC: u16 = 128;
pub const MSG_UPDATE_FULFILL_HTLC: u16 = 130;
pub const MSG_UPDATE_FAIL_HTLC: u16 = 131;
pub const MSG_COMMITMENT_SIGNED: u16 = 132;
pub const MSG_REVOKE_AND_ACK: u16 = 133;
pub const MSG_UPDATE_FEE: u16 = 134;
pub const MSG_CHANNEL_REESTABLISH: u16 = 136;

/// update_add_htlc extension carrying a route-blinding point.
pub const TLV_BLINDING_POINT: u64 = 0;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub channel_id: ChannelId,
    pub data: Vec<u8>,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {
    pub channel_id: ChannelId,
    pub scriptpubkey: Vec<u8>,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAddHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub amount_msat: u64,
    pub payment_hash: PaymentHash,
    pub cltv_expiry: u32,
    /// Opaque forwarding instructions for the next hop.
    pub onion_routing_packet: Vec<u8>,
    pub blinding_point: Option<PublicKey>,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFulfillHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub payment_preimage: PaymentPreimage,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFailHtlc {
    pub channel_id: ChannelId,
    pub htlc_id: u64,
    pub reason: Vec<u8>,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentSigned {
    pub channel_id: ChannelId,
    pub signature: Signature,
    /// One per untrimmed HTLC output, in commitment output order.
    pub htlc_signatures: Vec<Signature>,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeAndAck {
    pub channel_id: ChannelId,
    pub per_commitment_secret: [u8; 32],
    pub next_per_commitment_point: PublicKey,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFee {
    pub channel_id: ChannelId,
    pub feerate_per_kw: u32,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReestablish {
    pub channel_id: ChannelId,
    /// Height of the next commitment the sender expects to receive.
    pub next_commitment_number: u64,
    /// Height of the next revocation the sender expects to receive.
    pub next_revocation_number: u64,
    pub your_last_per_commitment_secret: [u8; 32],
    pub my_current_per_commitment_point: PublicKey,
    pub extensions: TlvStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Error(ErrorMessage),
    Shutdown(Shutdown),
    UpdateAddHtlc(UpdateAddHtlc),
    UpdateFulfillHtlc(UpdateFulfillHtlc),
    UpdateFailHtlc(UpdateFailHtlc),
    CommitmentSigned(CommitmentSigned),
    RevokeAndAck(RevokeAndAck),
    UpdateFee(UpdateFee),
    ChannelReestablish(ChannelReestablish),
    /// Odd message type we do not understand; kept verbatim.
    Unknown { msg_type: u16, payload: Vec<u8> },
}

// ============================================================================
// ENCODING
// ============================================================================

impl Message {
    pub fn msg_type(&self) -> u16 {
        match self {
            Message::Error(_) => MSG_ERROR,
            Message::Shutdown(_) => MSG_SHUTDOWN,
            Message::UpdateAddHtlc(_) => MSG_UPDATE_ADD_HTLC,
            Message::UpdateFulfillHtlc(_) => MSG_UPDATE_FULFILL_HTLC,
            Message::UpdateFailHtlc(_) => MSG_UPDATE_FAIL_HTLC,
            Message::CommitmentSigned(_) => MSG_COMMITMENT_SIGNED,
            Message::RevokeAndAck(_) => MSG_REVOKE_AND_ACK,
            Message::UpdateFee(_) => MSG_UPDATE_FEE,
            Message::ChannelReestablish(_) => MSG_CHANNEL_REESTABLISH,
            Message::Unknown { msg_type, .. } => *msg_type,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Error(_) => "error",
            Message::Shutdown(_) => "shutdown",
            Message::UpdateAddHtlc(_) => "update_add_htlc",
            Message::UpdateFulfillHtlc(_) => "update_fulfill_htlc",
            Message::UpdateFailHtlc(_) => "update_fail_htlc",
            Message::CommitmentSigned(_) => "commitment_signed",
            Message::RevokeAndAck(_) => "revoke_and_ack",
            Message::UpdateFee(_) => "update_fee",
            Message::ChannelReestablish(_) => "channel_reestablish",
            Message::Unknown { .. } => "unknown",
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Message::Error(m) => Some(m.channel_id),
            Message::Shutdown(m) => Some(m.channel_id),
            Message::UpdateAddHtlc(m) => Some(m.channel_id),
            Message::UpdateFulfillHtlc(m) => Some(m.channel_id),
            Message::UpdateFailHtlc(m) => Some(m.channel_id),
            Message::CommitmentSigned(m) => Some(m.channel_id),
            Message::RevokeAndAck(m) => Some(m.channel_id),
            Message::UpdateFee(m) => Some(m.channel_id),
            Message::ChannelReestablish(m) => Some(m.channel_id),
            Message::Unknown { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::new();
        w.write_u16(self.msg_type());

        match self {
            Message::Error(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_u16_prefixed("data", &m.data)?;
                m.extensions.encode(&mut w);
            }
            Message::Shutdown(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_u16_prefixed("scriptpubkey", &m.scriptpubkey)?;
                m.extensions.encode(&mut w);
            }
            Message::UpdateAddHtlc(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_u64(m.htlc_id);
                w.write_u64(m.amount_msat);
                w.write_bytes(&m.payment_hash.0);
                w.write_u32(m.cltv_expiry);
                w.write_u16_prefixed("onion_routing_packet", &m.onion_routing_packet)?;
                let mut extensions = m.extensions.clone();
                if let Some(point) = &m.blinding_point {
                    extensions.insert(TLV_BLINDING_POINT, point.serialize().to_vec());
                }
                extensions.encode(&mut w);
            }
            Message::UpdateFulfillHtlc(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_u64(m.htlc_id);
                w.write_bytes(&m.payment_preimage.0);
                m.extensions.encode(&mut w);
            }
            Message::UpdateFailHtlc(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_u64(m.htlc_id);
                w.write_u16_prefixed("reason", &m.reason)?;
                m.extensions.encode(&mut w);
            }
            Message::CommitmentSigned(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_signature(&m.signature);
                let count = u16::try_from(m.htlc_signatures.len()).map_err(|_| {
                    EncodeError::TooManySignatures {
                        count: m.htlc_signatures.len(),
                        max: u16::MAX as usize,
                    }
                })?;
                w.write_u16(count);
                for sig in &m.htlc_signatures {
                    w.write_signature(sig);
                }
                m.extensions.encode(&mut w);
            }
            Message::RevokeAndAck(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_bytes(&m.per_commitment_secret);
                w.write_pubkey(&m.next_per_commitment_point);
                m.extensions.encode(&mut w);
            }
            Message::UpdateFee(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_u32(m.feerate_per_kw);
                m.extensions.encode(&mut w);
            }
            Message::ChannelReestablish(m) => {
                w.write_bytes(&m.channel_id.0);
                w.write_u64(m.next_commitment_number);
                w.write_u64(m.next_revocation_number);
                w.write_bytes(&m.your_last_per_commitment_secret);
                w.write_pubkey(&m.my_current_per_commitment_point);
                m.extensions.encode(&mut w);
            }
            Message::Unknown { payload, .. } => {
                w.write_bytes(payload);
            }
        }

        Ok(w.into_inner())
    }

    // ========================================================================
    // DECODING
    // ========================================================================

    pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
        let mut r = Reader::new(bytes);
        let msg_type = r.read_u16()?;

        let msg = match msg_type {
            MSG_ERROR => Message::Error(ErrorMessage {
                channel_id: ChannelId(r.read_array()?),
                data: r.read_u16_prefixed()?,
                extensions: TlvStream::decode(&mut r, |_| false)?,
            }),
            MSG_SHUTDOWN => Message::Shutdown(Shutdown {
                channel_id: ChannelId(r.read_array()?),
                scriptpubkey: r.read_u16_prefixed()?,
                extensions: TlvStream::decode(&mut r, |_| false)?,
            }),
            MSG_UPDATE_ADD_HTLC => {
                let channel_id = ChannelId(r.read_array()?);
                let htlc_id = r.read_u64()?;
                let amount_msat = r.read_u64()?;
                let payment_hash = PaymentHash(r.read_array()?);
                let cltv_expiry = r.read_u32()?;
                let onion_routing_packet = r.read_u16_prefixed()?;
                let mut extensions = TlvStream::decode(&mut r, |t| t == TLV_BLINDING_POINT)?;
                let blinding_point = match extensions.remove(TLV_BLINDING_POINT) {
                    Some(raw) => Some(
                        PublicKey::from_slice(&raw)
                            .map_err(|_| DecodeError::InvalidExtension(TLV_BLINDING_POINT))?,
                    ),
                    None => None,
                };
                Message::UpdateAddHtlc(UpdateAddHtlc {
                    channel_id,
                    htlc_id,
                    amount_msat,
                    payment_hash,
                    cltv_expiry,
                    onion_routing_packet,
                    blinding_point,
                    extensions,
                })
            }
            MSG_UPDATE_FULFILL_HTLC => Message::UpdateFulfillHtlc(UpdateFulfillHtlc {
                channel_id: ChannelId(r.read_array()?),
                htlc_id: r.read_u64()?,
                payment_preimage: PaymentPreimage(r.read_array()?),
                extensions: TlvStream::decode(&mut r, |_| false)?,
            }),
            MSG_UPDATE_FAIL_HTLC => Message::UpdateFailHtlc(UpdateFailHtlc {
                channel_id: ChannelId(r.read_array()?),
                htlc_id: r.read_u64()?,
                reason: r.read_u16_prefixed()?,
                extensions: TlvStream::decode(&mut r, |_| false)?,
            }),
            MSG_COMMITMENT_SIGNED => {
                let channel_id = ChannelId(r.read_array()?);
                let signature = r.read_signature()?;
                let count = r.read_u16()? as usize;
                let mut htlc_signatures = Vec::with_capacity(count.min(r.remaining() / 64));
                for _ in 0..count {
                    htlc_signatures.push(r.read_signature()?);
                }
                Message::CommitmentSigned(CommitmentSigned {
                    channel_id,
                    signature,
                    htlc_signatures,
                    extensions: TlvStream::decode(&mut r, |_| false)?,
                })
            }
            MSG_REVOKE_AND_ACK => Message::RevokeAndAck(RevokeAndAck {
                channel_id: ChannelId(r.read_array()?),
                per_commitment_secret: r.read_array()?,
                next_per_commitment_point: r.read_pubkey()?,
                extensions: TlvStream::decode(&mut r, |_| false)?,
            }),
            MSG_UPDATE_FEE => Message::UpdateFee(UpdateFee {
                channel_id: ChannelId(r.read_array()?),
                feerate_per_kw: r.read_u32()?,
                extensions: TlvStream::decode(&mut r, |_| false)?,
            }),
            MSG_CHANNEL_REESTABLISH => Message::ChannelReestablish(ChannelReestablish {
                channel_id: ChannelId(r.read_array()?),
                next_commitment_number: r.read_u64()?,
                next_revocation_number: r.read_u64()?,
                your_last_per_commitment_secret: r.read_array()?,
                my_current_per_commitment_point: r.read_pubkey()?,
                extensions: TlvStream::decode(&mut r, |_| false)?,
            }),
            other if other % 2 == 1 => Message::Unknown {
                msg_type: other,
                payload: r.read_rest().to_vec(),
            },
            other => return Err(DecodeError::UnknownEvenMessage(other).into()),
        };

        Ok(msg)
    }
}
