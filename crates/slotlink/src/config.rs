//! Configuration for both surfaces.
//!
//! Every section has defaults, so an empty JSON object is a valid config
//! file. Values can also be set in code with the `with_*` builders.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Origin both surfaces use when nothing else is configured.
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Identity strings for one end of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Stamped on every outbound frame.
    pub local_origin: String,
    /// The only origin inbound frames are accepted from.
    pub peer_origin: String,
}

impl ChannelConfig {
    pub fn new(local_origin: impl Into<String>, peer_origin: impl Into<String>) -> Self {
        Self {
            local_origin: local_origin.into(),
            peer_origin: peer_origin.into(),
        }
    }

    /// The same pair seen from the other end.
    pub fn reversed(&self) -> Self {
        Self {
            local_origin: self.peer_origin.clone(),
            peer_origin: self.local_origin.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Origins {
    pub catalog: String,
    pub player: String,
}

impl Default for Origins {
    fn default() -> Self {
        Self {
            catalog: DEFAULT_ORIGIN.to_string(),
            player: DEFAULT_ORIGIN.to_string(),
        }
    }
}

/// What the catalog does when asked for a new item before the player has
/// reported on the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReselectPolicy {
    /// Hand off again from the last known balance.
    #[default]
    Allow,
    /// Refuse with `HandoffOutstanding` until a delta comes back.
    AwaitDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub opening_balance: Amount,
    pub reselect: ReselectPolicy,
    pub source_latency_ms: u64,
    /// Probability in `[0, 1]` that the mock source fails a fetch.
    pub source_failure_rate: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            opening_balance: Amount::from_units(100),
            reselect: ReselectPolicy::Allow,
            source_latency_ms: 500,
            source_failure_rate: 0.05,
        }
    }
}

impl CatalogConfig {
    pub fn source_latency(&self) -> Duration {
        Duration::from_millis(self.source_latency_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Pause between placing a wager and crediting its outcome.
    pub settle_delay_ms: u64,
    /// Seeds the outcome generator; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1_000,
            seed: None,
        }
    }
}

impl PlayerConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    pub origins: Origins,
    pub catalog: CatalogConfig,
    pub player: PlayerConfig,
}

impl SlotConfig {
    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn catalog_channel(&self) -> ChannelConfig {
        ChannelConfig::new(&self.origins.catalog, &self.origins.player)
    }

    pub fn player_channel(&self) -> ChannelConfig {
        self.catalog_channel().reversed()
    }

    pub fn with_opening_balance(mut self, balance: Amount) -> Self {
        self.catalog.opening_balance = balance;
        self
    }

    pub fn with_reselect(mut self, policy: ReselectPolicy) -> Self {
        self.catalog.reselect = policy;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.player.settle_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.player.seed = Some(seed);
        self
    }
}
