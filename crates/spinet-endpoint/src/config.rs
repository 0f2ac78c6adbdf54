use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spinet_frame::{FrameConfig, DEFAULT_ENVELOPE_LEN};

use crate::error::{EndpointError, Result};
use crate::netif::MacAddr;

/// Default bound on the dispatcher's wait for the receive slot.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 50;

/// Default settle time between the end of an exchange and the next one.
pub const DEFAULT_SETTLE_US: u64 = 1_000;

/// Endpoint configuration. Every field has a default, so `{}` is a valid
/// configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// Prefix for worker thread names and log fields.
    pub name: String,
    /// Fixed size of every exchange. Both endpoints must agree.
    pub envelope_len: usize,
    /// Dispatcher bound when taking the receive slot, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Settle time after each exchange, in microseconds.
    pub settle_us: u64,
    /// Local hardware address reported to the network stack.
    pub mac_addr: MacAddr,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "spinet".to_string(),
            envelope_len: DEFAULT_ENVELOPE_LEN,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            settle_us: DEFAULT_SETTLE_US,
            mac_addr: MacAddr::default(),
        }
    }
}

impl EndpointConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), "loaded endpoint config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(EndpointError::Config("name must not be empty".to_string()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(EndpointError::Config(
                "lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.frame_config()?;
        Ok(())
    }

    pub fn frame_config(&self) -> Result<FrameConfig> {
        FrameConfig::new(self.envelope_len)
            .map_err(|err| EndpointError::Config(format!("envelope_len: {err}")))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_micros(self.settle_us)
    }
}
