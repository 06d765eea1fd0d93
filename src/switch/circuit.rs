use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{StoreError, SwitchError};
use crate::store::CircuitStore;
use crate::types::{ChannelId, CircuitKey, HtlcSource, PaymentHash};

/// What the outgoing link needs to offer the HTLC onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardPacket {
    pub amount_msat: u64,
    pub payment_hash: PaymentHash,
    pub cltv_expiry: u32,
    pub onion_routing_packet: Vec<u8>,
}

/// A payment in flight through this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    pub incoming: HtlcSource,
    pub outgoing_channel: ChannelId,
    pub packet: ForwardPacket,
    /// The outgoing HTLC, once the outgoing link committed the add. Without
    /// it the circuit is half-open.
    pub outgoing: Option<CircuitKey>,
}

impl Circuit {
    pub fn is_half_open(&self) -> bool {
        self.outgoing.is_none()
    }
}

const DEFAULT_SHARDS: usize = 16;

/// Open circuits keyed by incoming source, sharded so that forwards on
/// different keys never contend. Each mutation is persisted while the shard
/// lock is held, so a concurrent duplicate sees either nothing or the stored
/// circuit.
pub struct CircuitMap {
    shards: Vec<Mutex<HashMap<HtlcSource, Circuit>>>,
    keystones: RwLock<HashMap<CircuitKey, HtlcSource>>,
    store: Arc<dyn CircuitStore>,
}

impl CircuitMap {
    pub fn new(store: Arc<dyn CircuitStore>) -> Self {
        Self::with_shards(store, DEFAULT_SHARDS)
    }

    pub fn with_shards(store: Arc<dyn CircuitStore>, shards: usize) -> Self {
        CircuitMap {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            keystones: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// Rebuilds the map from the circuit store.
    pub fn restore(store: Arc<dyn CircuitStore>) -> Result<Self, StoreError> {
        let circuits = store.load_circuits()?;
        let map = Self::new(store);
        for circuit in circuits {
            if let Some(outgoing) = circuit.outgoing {
                map.keystones_mut().insert(outgoing, circuit.incoming);
            }
            map.shard(&circuit.incoming).insert(circuit.incoming, circuit);
        }
        debug!(circuits = map.len(), "circuit map restored");
        Ok(map)
    }

    fn shard(&self, source: &HtlcSource) -> std::sync::MutexGuard<'_, HashMap<HtlcSource, Circuit>> {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        self.shards[idx].lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn keystones_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CircuitKey, HtlcSource>> {
        self.keystones.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts `circuit` unless one already exists for its incoming source.
    /// Returns whether it was created.
    pub fn check_and_insert(&self, circuit: Circuit) -> Result<bool, StoreError> {
        let mut shard = self.shard(&circuit.incoming);
        if shard.contains_key(&circuit.incoming) {
            return Ok(false);
        }
        self.store.persist_circuit(&circuit)?;
        shard.insert(circuit.incoming, circuit);
        Ok(true)
    }

    pub fn get(&self, source: &HtlcSource) -> Option<Circuit> {
        self.shard(source).get(source).cloned()
    }

    /// Records the outgoing HTLC of a circuit. Repeating the same keystone is
    /// a no-op; an outgoing HTLC belongs to at most one circuit.
    pub fn set_keystone(&self, source: &HtlcSource, outgoing: CircuitKey) -> Result<(), SwitchError> {
        let mut shard = self.shard(source);
        let circuit = shard.get(source).ok_or(SwitchError::CircuitNotFound(*source))?;
        match circuit.outgoing {
            Some(existing) if existing == outgoing => return Ok(()),
            Some(_) => return Err(SwitchError::KeystoneMismatch { htlc_source: *source }),
            None => {}
        }
        let taken = self
            .keystones
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&outgoing)
            .map_or(false, |owner| owner != source);
        if taken {
            return Err(SwitchError::KeystoneMismatch { htlc_source: *source });
        }

        let mut updated = circuit.clone();
        updated.outgoing = Some(outgoing);
        self.store.persist_circuit(&updated)?;
        shard.insert(*source, updated);
        self.keystones_mut().insert(outgoing, *source);
        Ok(())
    }

    pub fn lookup_outgoing(&self, outgoing: &CircuitKey) -> Option<HtlcSource> {
        self.keystones
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(outgoing)
            .copied()
    }

    /// Deletes a circuit, durably first.
    pub fn remove(&self, source: &HtlcSource) -> Result<Option<Circuit>, StoreError> {
        let mut shard = self.shard(source);
        if !shard.contains_key(source) {
            return Ok(None);
        }
        self.store.delete_circuit(source)?;
        let removed = shard.remove(source);
        if let Some(outgoing) = removed.as_ref().and_then(|c| c.outgoing) {
            self.keystones_mut().remove(&outgoing);
        }
        Ok(removed)
    }

    pub fn half_open(&self) -> Vec<Circuit> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .values()
                    .filter(|c| c.is_half_open())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
