use serde::{Deserialize, Serialize};

use crate::channel::PointToPointChannel;
use crate::error::ConfigError;

/// Configuration for the message bus registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Create a point-to-point channel when a subscription names a channel
    /// that was never registered, instead of failing activation.
    pub auto_create_channels: bool,
    /// Buffer size of auto-created channels.
    pub default_channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            auto_create_channels: false,
            default_channel_capacity: PointToPointChannel::<()>::DEFAULT_CAPACITY,
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_channel_capacity == 0 {
            return Err(ConfigError::invalid(
                "default_channel_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for the in-memory message store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of individually stored messages; `None` is unbounded.
    /// Group membership does not count against it.
    pub capacity: Option<usize>,
    /// Expire groups by time since last modification instead of creation.
    pub timeout_on_idle: bool,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.capacity {
            Some(0) => Err(ConfigError::invalid(
                "capacity",
                "must be at least 1 (omit it for an unbounded store)",
            )),
            Some(capacity) if capacity > tokio::sync::Semaphore::MAX_PERMITS => {
                Err(ConfigError::invalid(
                    "capacity",
                    format!("must not exceed {}", tokio::sync::Semaphore::MAX_PERMITS),
                ))
            }
            _ => Ok(()),
        }
    }
}
