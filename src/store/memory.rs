use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use super::{decode, encode, ChannelStateStore, CircuitStore};
use crate::channel::ChannelState;
use crate::errors::StoreError;
use crate::switch::Circuit;
use crate::types::{ChannelId, HtlcSource};

/// Keeps serialized snapshots in memory. Values go through serde_json so a
/// load never aliases live state, exactly like a restart would not.
#[derive(Default)]
pub struct MemoryStore {
    channels: Mutex<HashMap<ChannelId, Vec<u8>>>,
    circuits: Mutex<HashMap<HtlcSource, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write fails and leaves the stored data untouched.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("store unavailable".to_string()));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::ReadFailed("store lock poisoned".to_string())
}

impl ChannelStateStore for MemoryStore {
    fn atomic_commit(&self, state: &ChannelState) -> Result<(), StoreError> {
        self.check_writable()?;
        let bytes = encode(state)?;
        self.channels.lock().map_err(poisoned)?.insert(state.channel_id, bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, channel_id: &ChannelId) -> Result<Option<ChannelState>, StoreError> {
        let channels = self.channels.lock().map_err(poisoned)?;
        channels.get(channel_id).map(|bytes| decode(bytes)).transpose()
    }

    fn list_channels(&self) -> Result<Vec<ChannelId>, StoreError> {
        Ok(self.channels.lock().map_err(poisoned)?.keys().copied().collect())
    }
}

impl CircuitStore for MemoryStore {
    fn persist_circuit(&self, circuit: &Circuit) -> Result<(), StoreError> {
        self.check_writable()?;
        let bytes = encode(circuit)?;
        self.circuits.lock().map_err(poisoned)?.insert(circuit.incoming, bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_circuit(&self, incoming: &HtlcSource) -> Result<(), StoreError> {
        self.check_writable()?;
        self.circuits.lock().map_err(poisoned)?.remove(incoming);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_circuits(&self) -> Result<Vec<Circuit>, StoreError> {
        let circuits = self.circuits.lock().map_err(poisoned)?;
        circuits.values().map(|bytes| decode(bytes)).collect()
    }
}
