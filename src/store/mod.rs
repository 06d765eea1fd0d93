//! Durable storage for channel state and forwarding circuits.
//!
//! Both traits are all-or-nothing: after a failed call the previously stored
//! value is still the one that `load` returns. A channel's state must be
//! committed before any message depending on it leaves the node, otherwise a
//! crash could make us revoke a commitment we no longer remember, or resend a
//! revoked one as current.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::channel::ChannelState;
use crate::errors::StoreError;
use crate::switch::Circuit;
use crate::types::{ChannelId, HtlcSource};

pub trait ChannelStateStore: Send + Sync {
    /// Replaces the stored state of `state.channel_id` in one step. The new
    /// commitment and the revocation it discloses are written together.
    fn atomic_commit(&self, state: &ChannelState) -> Result<(), StoreError>;

    fn load(&self, channel_id: &ChannelId) -> Result<Option<ChannelState>, StoreError>;

    fn list_channels(&self) -> Result<Vec<ChannelId>, StoreError>;
}

pub trait CircuitStore: Send + Sync {
    fn persist_circuit(&self, circuit: &Circuit) -> Result<(), StoreError>;

    fn delete_circuit(&self, incoming: &HtlcSource) -> Result<(), StoreError>;

    fn load_circuits(&self) -> Result<Vec<Circuit>, StoreError>;
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::WriteFailed(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
}
