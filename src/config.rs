//! Node configuration, loaded from a JSON file. Every field has a default so
//! a partial file (or none at all) is valid.

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::types::CommitmentFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: Network,
    pub channel: ChannelConfig,
    pub link: LinkConfig,
    /// Directory for the JSON file store. In-memory store when unset.
    pub store_dir: Option<PathBuf>,
    pub bitcoind: Option<BitcoindConfig>,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            network: Network::Regtest,
            channel: ChannelConfig::default(),
            link: LinkConfig::default(),
            store_dir: None,
            bitcoind: None,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: NodeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.batch_size == 0 {
            return Err(ConfigError::Invalid("link.batch_size must be at least 1".into()));
        }
        if self.channel.limits.max_accepted_htlcs == 0 || self.channel.limits.max_accepted_htlcs > 483 {
            return Err(ConfigError::Invalid(
                "channel.limits.max_accepted_htlcs must be within 1..=483".into(),
            ));
        }
        if self.channel.feerate_per_kw < 253 {
            return Err(ConfigError::Invalid("channel.feerate_per_kw must be at least 253".into()));
        }
        Ok(())
    }
}

/// Limits one party imposes on, or keeps for, its side of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyLimits {
    pub dust_limit_sat: u64,
    /// Balance this party must keep on its own side.
    pub channel_reserve_sat: u64,
    /// CSV delay on this party's own to_local output.
    pub to_self_delay: u16,
    /// HTLCs this party accepts from its counterparty.
    pub max_accepted_htlcs: u16,
    pub max_htlc_value_in_flight_msat: u64,
    pub htlc_minimum_msat: u64,
}

impl Default for PartyLimits {
    fn default() -> Self {
        PartyLimits {
            dust_limit_sat: 546,
            channel_reserve_sat: 10_000,
            to_self_delay: 144,
            max_accepted_htlcs: 30,
            max_htlc_value_in_flight_msat: 500_000_000,
            htlc_minimum_msat: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub limits: PartyLimits,
    pub feerate_per_kw: u32,
    pub format: CommitmentFormat,
    pub max_dust_htlc_exposure_msat: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            limits: PartyLimits::default(),
            feerate_per_kw: 253,
            format: CommitmentFormat::Anchors,
            max_dust_htlc_exposure_msat: 5_000_000,
        }
    }
}

/// Link tunables. Batching only trades latency for fewer signing rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Sign as soon as this many local updates are waiting.
    pub batch_size: usize,
    /// Otherwise sign this long after the first unsigned update.
    pub batch_interval_ms: u64,
    /// Force-close when a revocation is outstanding longer than this.
    pub revocation_timeout_ms: u64,
    pub tick_interval_ms: u64,
    /// Blocks before expiry at which a preimage-known HTLC goes on-chain.
    pub expiry_safety_margin: u32,
    pub cltv_expiry_delta: u32,
    pub max_persist_retries: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            batch_size: 10,
            batch_interval_ms: 50,
            revocation_timeout_ms: 60_000,
            tick_interval_ms: 25,
            expiry_safety_margin: 18,
            cltv_expiry_delta: 40,
            max_persist_retries: 20,
        }
    }
}

impl LinkConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn revocation_timeout(&self) -> Duration {
        Duration::from_millis(self.revocation_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoindConfig {
    pub host: String,
    pub port: u16,
    pub rpc_user: String,
    pub rpc_password: String,
}
