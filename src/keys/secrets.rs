//! Per-commitment secrets: generation from a seed and compact storage of the
//! counterparty's revealed secrets (at most 49 entries for 2^48 states).

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolViolation;

/// Derive the secret for `index` from `base`, flipping only the lowest `bits` bits.
fn derive_secret(base: &[u8; 32], bits: u8, index: u64) -> [u8; 32] {
    let mut p = *base;
    for i in 0..bits {
        let bit_position = (bits - 1 - i) as usize;
        if index & (1 << bit_position) == (1 << bit_position) {
            p[bit_position / 8] ^= 1 << (bit_position & 7);
            p = Sha256::hash(&p).to_byte_array();
        }
    }
    p
}

pub fn build_commitment_secret(seed: &[u8; 32], commitment_number: u64) -> [u8; 32] {
    derive_secret(seed, 48, commitment_number)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredSecret {
    secret: [u8; 32],
    index: u64,
}

/// Indexes count down from 2^48 - 1, so every secret stored in slot `b` can
/// derive all later-revealed secrets sharing its upper `48 - b` bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyCommitmentSecrets {
    known: Vec<Option<StoredSecret>>,
}

impl CounterpartyCommitmentSecrets {
    pub fn new() -> Self {
        CounterpartyCommitmentSecrets {
            known: vec![None; 49],
        }
    }

    fn slot_for(index: u64) -> u8 {
        for b in 0..48 {
            if (index >> b) & 1 == 1 {
                return b;
            }
        }
        48
    }

    /// Lowest index inserted so far, i.e. the most recent revocation.
    pub fn min_seen_index(&self) -> Option<u64> {
        self.known.iter().flatten().map(|s| s.index).min()
    }

    pub fn provide_secret(&mut self, index: u64, secret: [u8; 32]) -> Result<(), ProtocolViolation> {
        if self.known.len() != 49 {
            self.known = vec![None; 49];
        }
        let slot = Self::slot_for(index);
        for b in 0..slot {
            if let Some(stored) = self.known[b as usize] {
                if derive_secret(&secret, slot, stored.index) != stored.secret {
                    return Err(ProtocolViolation::InconsistentSecret);
                }
            }
        }
        self.known[slot as usize] = Some(StoredSecret { secret, index });
        Ok(())
    }

    pub fn get_secret(&self, index: u64) -> Option<[u8; 32]> {
        for (b, stored) in self.known.iter().enumerate() {
            let Some(stored) = stored else { continue };
            let mask = !((1u64 << b) - 1);
            if index & mask == stored.index {
                return Some(derive_secret(&stored.secret, b as u8, index));
            }
        }
        None
    }
}
