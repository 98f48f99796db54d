//! Configuration for remote array clients.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteArrayError, Result};

/// Configuration shared by every client created from one registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Size of the leading byte window fetched to parse an NH5 header.
    pub header_window_bytes: u64,

    /// How long a transient fetch failure is replayed before it is retried.
    pub failure_ttl_secs: u64,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,

    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Number of values (bins x channels) fetched per binned-array chunk.
    pub binned_chunk_budget: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            header_window_bytes: 100_000,
            failure_ttl_secs: 30,
            request_timeout_secs: 60,
            connect_timeout_secs: 30,
            binned_chunk_budget: 1_000_000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REMOTE_ARRAY_HEADER_WINDOW") {
            if let Ok(size) = val.parse() {
                config.header_window_bytes = size;
            }
        }

        if let Ok(val) = std::env::var("REMOTE_ARRAY_FAILURE_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                config.failure_ttl_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("REMOTE_ARRAY_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.request_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("REMOTE_ARRAY_CONNECT_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.connect_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("REMOTE_ARRAY_BINNED_CHUNK_BUDGET") {
            if let Ok(budget) = val.parse() {
                config.binned_chunk_budget = budget;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.header_window_bytes == 0 {
            return Err(RemoteArrayError::Config(
                "header_window_bytes must be > 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(RemoteArrayError::Config(
                "timeouts must be > 0".to_string(),
            ));
        }

        if self.binned_chunk_budget == 0 {
            return Err(RemoteArrayError::Config(
                "binned_chunk_budget must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Transient failure replay window.
    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// HTTP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.header_window_bytes, 100_000);
        assert_eq!(config.binned_chunk_budget, 1_000_000);
        assert_eq!(config.failure_ttl(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig::default();
        config.header_window_bytes = 0;
        assert!(config.validate().is_err());

        config = ClientConfig::default();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        config = ClientConfig::default();
        config.binned_chunk_budget = 0;
        assert!(config.validate().is_err());

        // A zero TTL is allowed: failures are then never replayed.
        config = ClientConfig::default();
        config.failure_ttl_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config = ClientConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
