use std::fs;
use std::path::{Path, PathBuf};

use super::{decode, encode, ChannelStateStore, CircuitStore};
use crate::channel::ChannelState;
use crate::errors::StoreError;
use crate::switch::Circuit;
use crate::types::{ChannelId, HtlcSource};

/// One JSON file per channel and per circuit. Writes go to a temporary
/// file that is renamed over the old one, so a crash leaves either the old
/// or the new version on disk.
pub struct FileStore {
    channels_dir: PathBuf,
    circuits_dir: PathBuf,
}

impl FileStore {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let channels_dir = root.join("channels");
        let circuits_dir = root.join("circuits");
        for dir in [&channels_dir, &circuits_dir] {
            fs::create_dir_all(dir).map_err(|e| StoreError::WriteFailed(format!("{}: {}", dir.display(), e)))?;
        }
        Ok(FileStore {
            channels_dir,
            circuits_dir,
        })
    }

    fn channel_path(&self, channel_id: &ChannelId) -> PathBuf {
        self.channels_dir.join(format!("{}.json", channel_id))
    }

    fn circuit_path(&self, incoming: &HtlcSource) -> PathBuf {
        let name = match incoming {
            HtlcSource::Forwarded(key) => format!("fwd-{}-{}", key.channel_id, key.htlc_id),
            HtlcSource::Local(id) => format!("local-{}", hex::encode(id.0)),
        };
        self.circuits_dir.join(format!("{}.json", name))
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| StoreError::WriteFailed(format!("{}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::WriteFailed(format!("{}: {}", path.display(), e)))
}

fn read_dir_json<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::ReadFailed(format!("{}: {}", dir.display(), e)))?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StoreError::ReadFailed(e.to_string()))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path).map_err(|e| StoreError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        out.push(decode(&bytes)?);
    }
    Ok(out)
}

impl ChannelStateStore for FileStore {
    fn atomic_commit(&self, state: &ChannelState) -> Result<(), StoreError> {
        write_atomically(&self.channel_path(&state.channel_id), &encode(state)?)
    }

    fn load(&self, channel_id: &ChannelId) -> Result<Option<ChannelState>, StoreError> {
        let path = self.channel_path(channel_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| StoreError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        decode(&bytes).map(Some)
    }

    fn list_channels(&self) -> Result<Vec<ChannelId>, StoreError> {
        let states: Vec<ChannelState> = read_dir_json(&self.channels_dir)?;
        Ok(states.into_iter().map(|s| s.channel_id).collect())
    }
}

impl CircuitStore for FileStore {
    fn persist_circuit(&self, circuit: &Circuit) -> Result<(), StoreError> {
        write_atomically(&self.circuit_path(&circuit.incoming), &encode(circuit)?)
    }

    fn delete_circuit(&self, incoming: &HtlcSource) -> Result<(), StoreError> {
        let path = self.circuit_path(incoming);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::WriteFailed(format!("{}: {}", path.display(), e))),
        }
    }

    fn load_circuits(&self) -> Result<Vec<Circuit>, StoreError> {
        read_dir_json(&self.circuits_dir)
    }
}
