use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cadence of the periodic triggers driven by `run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(with = "super::serde_helpers")]
    pub grouping_interval: Duration,
    #[serde(with = "super::serde_helpers")]
    pub delivery_interval: Duration,
    #[serde(with = "super::serde_helpers")]
    pub suspend_cooldown: Duration,
    #[serde(with = "super::serde_helpers")]
    pub retention_interval: Duration,
    /// `0` drains every claimable batch on each delivery tick.
    pub max_batches_per_run: usize,
    /// `0` keeps outcome rows forever.
    pub retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grouping_interval: Duration::from_secs(60),
            delivery_interval: Duration::from_secs(60),
            suspend_cooldown: Duration::from_secs(3600),
            retention_interval: Duration::from_secs(24 * 60 * 60),
            max_batches_per_run: 0,
            retention_days: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}
