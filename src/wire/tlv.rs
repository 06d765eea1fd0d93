//! Trailing extension stream: (BigSize type, BigSize length, value) records
//! in strictly increasing type order. Unknown even types are required to be
//! understood, so decoding fails on them; unknown odd types are carried
//! through untouched.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::wire::codec::{Reader, Writer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlvRecord {
    pub tlv_type: u64,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlvStream {
    records: Vec<TlvRecord>,
}

impl TlvStream {
    pub fn new() -> Self {
        TlvStream { records: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TlvRecord> {
        self.records.iter()
    }

    pub fn get(&self, tlv_type: u64) -> Option<&[u8]> {
        self.records
            .binary_search_by_key(&tlv_type, |r| r.tlv_type)
            .ok()
            .map(|i| self.records[i].value.as_slice())
    }

    /// Inserts or replaces, keeping the stream sorted.
    pub fn insert(&mut self, tlv_type: u64, value: Vec<u8>) {
        match self.records.binary_search_by_key(&tlv_type, |r| r.tlv_type) {
            Ok(i) => self.records[i].value = value,
            Err(i) => self.records.insert(i, TlvRecord { tlv_type, value }),
        }
    }

    pub fn remove(&mut self, tlv_type: u64) -> Option<Vec<u8>> {
        self.records
            .binary_search_by_key(&tlv_type, |r| r.tlv_type)
            .ok()
            .map(|i| self.records.remove(i).value)
    }

    /// Reads records until the input is exhausted. `is_known` names the
    /// types the enclosing message understands.
    pub fn decode(reader: &mut Reader, is_known: impl Fn(u64) -> bool) -> Result<Self, DecodeError> {
        let mut records: Vec<TlvRecord> = Vec::new();

        while !reader.is_empty() {
            let tlv_type = reader.read_bigsize()?;
            if let Some(previous) = records.last() {
                if tlv_type <= previous.tlv_type {
                    return Err(DecodeError::ExtensionOrder {
                        previous: previous.tlv_type,
                        current: tlv_type,
                    });
                }
            }

            let declared = reader.read_bigsize()?;
            if declared > reader.remaining() as u64 {
                return Err(DecodeError::LengthMismatch {
                    declared,
                    remaining: reader.remaining(),
                });
            }
            let value = reader.read_bytes(declared as usize)?.to_vec();

            if !is_known(tlv_type) && tlv_type % 2 == 0 {
                return Err(DecodeError::UnknownEvenType(tlv_type));
            }
            records.push(TlvRecord { tlv_type, value });
        }

        Ok(TlvStream { records })
    }

    pub fn encode(&self, writer: &mut Writer) {
        for record in &self.records {
            writer.write_bigsize(record.tlv_type);
            writer.write_bigsize(record.value.len() as u64);
            writer.write_bytes(&record.value);
        }
    }
}
