//! Per-direction log of proposed updates.
//!
//! Entries keep their log index for their whole life. A commitment covers a
//! log up to a cut (an exclusive log index), so which updates a commitment
//! contains is fully described by one pair of cuts.

use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{ChannelId, HtlcId, HtlcSource, PaymentHash, PaymentPreimage};
use crate::wire::{Message, TlvStream, UpdateAddHtlc, UpdateFailHtlc, UpdateFee, UpdateFulfillHtlc};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update {
    Add {
        htlc_id: HtlcId,
        amount_msat: u64,
        payment_hash: PaymentHash,
        cltv_expiry: u32,
        onion_routing_packet: Vec<u8>,
        blinding_point: Option<PublicKey>,
    },
    /// Removes an HTLC from the *other* log, paying it to its receiver.
    Settle { htlc_id: HtlcId, preimage: PaymentPreimage },
    /// Removes an HTLC from the *other* log, returning it to its offerer.
    Fail { htlc_id: HtlcId, reason: Vec<u8> },
    Fee { feerate_per_kw: u32 },
}

impl Update {
    /// HTLC id this update resolves, for settles and fails.
    pub fn resolves(&self) -> Option<HtlcId> {
        match self {
            Update::Settle { htlc_id, .. } | Update::Fail { htlc_id, .. } => Some(*htlc_id),
            _ => None,
        }
    }

    pub fn to_message(&self, channel_id: ChannelId) -> Message {
        match self {
            Update::Add {
                htlc_id,
                amount_msat,
                payment_hash,
                cltv_expiry,
                onion_routing_packet,
                blinding_point,
            } => Message::UpdateAddHtlc(UpdateAddHtlc {
                channel_id,
                htlc_id: *htlc_id,
                amount_msat: *amount_msat,
                payment_hash: *payment_hash,
                cltv_expiry: *cltv_expiry,
                onion_routing_packet: onion_routing_packet.clone(),
                blinding_point: *blinding_point,
                extensions: TlvStream::new(),
            }),
            Update::Settle { htlc_id, preimage } => Message::UpdateFulfillHtlc(UpdateFulfillHtlc {
                channel_id,
                htlc_id: *htlc_id,
                payment_preimage: *preimage,
                extensions: TlvStream::new(),
            }),
            Update::Fail { htlc_id, reason } => Message::UpdateFailHtlc(UpdateFailHtlc {
                channel_id,
                htlc_id: *htlc_id,
                reason: reason.clone(),
                extensions: TlvStream::new(),
            }),
            Update::Fee { feerate_per_kw } => Message::UpdateFee(UpdateFee {
                channel_id,
                feerate_per_kw: *feerate_per_kw,
                extensions: TlvStream::new(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_index: u64,
    pub update: Update,
    /// Included in both current commitments.
    pub locked_in: bool,
    /// The switch (or route provider) has taken responsibility for the
    /// consequence of this entry.
    pub handed_off: bool,
    /// Origin of an HTLC we offered.
    pub source: Option<HtlcSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLog {
    entries: BTreeMap<u64, LogEntry>,
    next_index: u64,
    next_htlc_id: HtlcId,
}

impl UpdateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn next_htlc_id(&self) -> HtlcId {
        self.next_htlc_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an update; adds are assigned the next HTLC id, which the
    /// caller must already have placed in `update`.
    pub fn append(&mut self, update: Update, source: Option<HtlcSource>) -> u64 {
        if let Update::Add { htlc_id, .. } = &update {
            debug_assert_eq!(*htlc_id, self.next_htlc_id);
            self.next_htlc_id += 1;
        }
        let log_index = self.next_index;
        self.entries.insert(
            log_index,
            LogEntry {
                log_index,
                update,
                locked_in: false,
                handed_off: false,
                source,
            },
        );
        self.next_index += 1;
        log_index
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    /// Entries covered by a commitment whose cut for this log is `cut`.
    pub fn below(&self, cut: u64) -> impl Iterator<Item = &LogEntry> {
        self.entries.range(..cut).map(|(_, e)| e)
    }

    /// Entries in `[from, to)`.
    pub fn between(&self, from: u64, to: u64) -> impl Iterator<Item = &LogEntry> {
        self.entries.range(from..to.max(from)).map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, log_index: u64) -> Option<&mut LogEntry> {
        self.entries.get_mut(&log_index)
    }

    pub fn find_add(&self, htlc_id: HtlcId) -> Option<&LogEntry> {
        self.entries
            .values()
            .find(|e| matches!(e.update, Update::Add { htlc_id: id, .. } if id == htlc_id))
    }

    pub fn find_add_mut(&mut self, htlc_id: HtlcId) -> Option<&mut LogEntry> {
        self.entries
            .values_mut()
            .find(|e| matches!(e.update, Update::Add { htlc_id: id, .. } if id == htlc_id))
    }

    /// The settle or fail in this log that removes `htlc_id` from the other log.
    pub fn find_resolution(&self, htlc_id: HtlcId) -> Option<&LogEntry> {
        self.entries.values().find(|e| e.update.resolves() == Some(htlc_id))
    }

    pub fn find_resolution_mut(&mut self, htlc_id: HtlcId) -> Option<&mut LogEntry> {
        self.entries
            .values_mut()
            .find(|e| e.update.resolves() == Some(htlc_id))
    }

    pub fn remove(&mut self, log_index: u64) -> Option<LogEntry> {
        self.entries.remove(&log_index)
    }

    /// Forgets every entry at or after `from`, rewinding the index and HTLC
    /// id counters so the same updates can be received again.
    pub fn truncate_from(&mut self, from: u64) -> usize {
        let dropped = self.entries.split_off(&from);
        let dropped_adds = dropped
            .values()
            .filter(|e| matches!(e.update, Update::Add { .. }))
            .count() as u64;
        self.next_htlc_id -= dropped_adds;
        self.next_index = from.min(self.next_index);
        dropped.len()
    }
}
