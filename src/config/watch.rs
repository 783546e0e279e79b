use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Buffer sizing for watch subscriptions.
///
/// # Configuration Example
///
/// ```toml
/// [watch]
/// subscription_buffer_size = 64
/// response_buffer_size = 32
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each subscription's delivery channel
    ///
    /// Events beyond this many unread ones close the subscription with
    /// `Lagged`. The initial snapshot sent at registration is added on top
    /// of this capacity, so a large listing never overflows on its own.
    ///
    /// **Default**: 64
    #[serde(default = "default_subscription_buffer_size")]
    pub subscription_buffer_size: usize,

    /// Capacity of the channel feeding one client stream
    ///
    /// **Default**: 32
    #[serde(default = "default_response_buffer_size")]
    pub response_buffer_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            subscription_buffer_size: default_subscription_buffer_size(),
            response_buffer_size: default_response_buffer_size(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscription_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.subscription_buffer_size must be greater than 0".into(),
            )));
        }

        if self.subscription_buffer_size > 100_000 {
            warn!(
                "watch.subscription_buffer_size ({}) is very large; every subscription preallocates this many slots",
                self.subscription_buffer_size
            );
        }

        if self.response_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.response_buffer_size must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

const fn default_subscription_buffer_size() -> usize {
    64
}

const fn default_response_buffer_size() -> usize {
    32
}
