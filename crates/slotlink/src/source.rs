//! Catalog items and where they come from.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amount::Amount;
use crate::config::CatalogConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub wager_options: Vec<Amount>,
}

impl Item {
    pub fn new(id: i64, name: impl Into<String>, wager_options: Vec<Amount>) -> Self {
        Self {
            id,
            name: name.into(),
            wager_options,
        }
    }

    pub fn min_wager(&self) -> Option<Amount> {
        self.wager_options.iter().copied().min()
    }

    /// An item is playable only with at least one option, all positive.
    pub fn is_well_formed(&self) -> bool {
        !self.wager_options.is_empty() && self.wager_options.iter().all(|a| a.is_positive())
    }
}

/// Asynchronous supplier of catalog items. May fail; callers do not retry.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_items(&self) -> anyhow::Result<Vec<Item>>;
}

/// Simulated backend with latency and occasional failures.
pub struct MockCatalog {
    items: Vec<Item>,
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<fastrand::Rng>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::from_config(&CatalogConfig::default())
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            items: default_items(),
            latency: config.source_latency(),
            failure_rate: config.source_failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
            ..self
        }
    }
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogSource for MockCatalog {
    async fn fetch_items(&self) -> anyhow::Result<Vec<Item>> {
        let latency_ms = u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX);
        debug!(latency_ms, "fetching catalog");
        tokio::time::sleep(self.latency).await;

        // A poisoned lock only means another fetch panicked mid-roll.
        let roll = match self.rng.lock() {
            Ok(mut rng) => rng.f64(),
            Err(poisoned) => poisoned.into_inner().f64(),
        };
        if roll < self.failure_rate {
            anyhow::bail!("error loading catalog items");
        }
        Ok(self.items.clone())
    }
}

/// The three machines the demo backend has always served.
pub fn default_items() -> Vec<Item> {
    let units = |values: &[i64]| -> Vec<Amount> {
        values.iter().map(|v| Amount::from_units(*v)).collect()
    };
    vec![
        Item::new(1, "Slot Machine A", units(&[1, 5, 10, 20])),
        Item::new(2, "Slot Machine B", units(&[2, 5, 25, 50])),
        Item::new(3, "Slot Machine C", units(&[5, 10, 25, 100])),
    ]
}
