//! Runtime configuration.
//!
//! Every section falls back to its defaults, so an empty JSON object is a
//! valid configuration.

use serde::Deserialize;

use crate::batch::BatchConfig;
use crate::channel::{HubConfig, SubscriberConfig};
use crate::engine::runtime::IngestConfig;
use crate::error::ValidationError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FenceConfig {
    /// Number of tracker shards.
    pub tracker_shards: usize,
    /// Ingest worker pool.
    pub ingest: IngestConfig,
    /// Event hub queues.
    pub hub: HubConfig,
    /// Subscriber reconnect behaviour.
    pub subscriber: SubscriberConfig,
    /// Manual check parallelism.
    pub batch: BatchConfig,
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self {
            tracker_shards: 16,
            ingest: IngestConfig::default(),
            hub: HubConfig::default(),
            subscriber: SubscriberConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl FenceConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for malformed JSON or zero-sized pools and queues.
    pub fn from_json_str(input: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects sizes that would leave a component without capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let checks = [
            ("tracker_shards", self.tracker_shards),
            ("ingest.workers", self.ingest.workers),
            ("ingest.queue_capacity", self.ingest.queue_capacity),
            ("hub.publish_queue_capacity", self.hub.publish_queue_capacity),
            ("hub.control_queue_capacity", self.hub.control_queue_capacity),
            ("hub.connection_buffer", self.hub.connection_buffer),
            ("subscriber.buffer", self.subscriber.buffer),
            ("batch.parallelism", self.batch.parallelism),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("{name} must be greater than zero"),
                });
            }
        }
        Ok(())
    }
}
