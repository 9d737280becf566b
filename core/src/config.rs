//! Mesh configuration
//!
//! Every timing and sizing knob of the routing core lives here:
//! - default hop budget for self-originated messages
//! - presence write throttle and peer liveness timeout
//! - dedup bucket width, cap and retention
//! - housekeeping cadence and channel sizes

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::DEFAULT_TTL;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: must be > 0")]
    MustBePositive { field: &'static str },

    #[error("Peer timeout ({timeout_ms} ms) must exceed the presence throttle ({throttle_ms} ms)")]
    TimeoutBelowThrottle { timeout_ms: u64, throttle_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Hop budget given to messages this device authors
    pub default_ttl: u8,
    /// Minimum gap between durable writes for the same peer's presence
    pub presence_throttle_ms: u64,
    /// Width of the time bucket baked into observed message ids
    pub dedup_bucket_ms: u64,
    /// Hard cap on remembered message ids
    pub dedup_capacity: usize,
    /// Buckets an id is remembered for before it may be forgotten
    pub dedup_retention_buckets: u64,
    /// Cadence of the housekeeping tick
    pub housekeeping_interval_ms: u64,
    /// Silence after which a peer is marked disconnected
    pub peer_timeout_ms: u64,
    /// Capacity of the radio observation queue
    pub observation_buffer: usize,
    /// Capacity of the service command queue
    pub command_buffer: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            presence_throttle_ms: 5_000,
            dedup_bucket_ms: 60_000,
            dedup_capacity: 10_000,
            dedup_retention_buckets: 10,
            housekeeping_interval_ms: 2_000,
            peer_timeout_ms: 30_000,
            observation_buffer: 256,
            command_buffer: 64,
        }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("presence_throttle_ms", self.presence_throttle_ms),
            ("dedup_bucket_ms", self.dedup_bucket_ms),
            ("dedup_capacity", self.dedup_capacity as u64),
            ("dedup_retention_buckets", self.dedup_retention_buckets),
            ("housekeeping_interval_ms", self.housekeeping_interval_ms),
            ("peer_timeout_ms", self.peer_timeout_ms),
            ("observation_buffer", self.observation_buffer as u64),
            ("command_buffer", self.command_buffer as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::MustBePositive { field });
            }
        }

        if self.peer_timeout_ms <= self.presence_throttle_ms {
            return Err(ConfigError::TimeoutBelowThrottle {
                timeout_ms: self.peer_timeout_ms,
                throttle_ms: self.presence_throttle_ms,
            });
        }

        Ok(())
    }
}
