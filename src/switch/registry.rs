use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::SwitchError;
use crate::link::{LinkEvent, LinkHandle};
use crate::types::ChannelId;

/// Running links by channel id.
#[derive(Default)]
pub struct LinkRegistry {
    links: RwLock<HashMap<ChannelId, LinkHandle>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: LinkHandle) {
        self.links
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(handle.channel_id, handle);
    }

    pub fn unregister(&self, channel_id: &ChannelId) -> Option<LinkHandle> {
        self.links
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(channel_id)
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<LinkHandle> {
        self.links
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel_id)
            .cloned()
    }

    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.get(channel_id).is_some()
    }

    pub fn send(&self, channel_id: &ChannelId, event: LinkEvent) -> Result<(), SwitchError> {
        let handle = self.get(channel_id).ok_or(SwitchError::UnknownLink(*channel_id))?;
        handle.send(event)
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.links
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .copied()
            .collect()
    }
}
