//! Configuration for event fan-out and transports built on this crate.
//!
//! Values come from defaults, an optional TOML file, and `COURIER_*`
//! environment overrides, applied in that order.

use crate::errors::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment variables recognised by [`CourierConfig::merge_with_env`]
pub const ENV_PREFIX: &str = "COURIER_";

/// Largest accepted `transport.peer_queue_capacity`
pub const MAX_PEER_QUEUE_CAPACITY: usize = 1 << 20;

/// Largest accepted `fanout.failure_log_capacity`
pub const MAX_FAILURE_LOG_CAPACITY: usize = 1 << 20;

/// Event fan-out settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Delivery failures retained for the transport to drain; 0 disables the log
    pub failure_log_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            failure_log_capacity: 256,
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Events buffered per peer before deliveries fail with a full queue
    pub peer_queue_capacity: usize,
    /// Log every dispatched call at debug level
    pub log_calls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            peer_queue_capacity: 1024,
            log_calls: true,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Event fan-out
    pub fanout: FanoutConfig,
    /// Transport
    pub transport: TransportConfig,
}

impl CourierConfig {
    /// Parse from TOML; missing fields keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RpcError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `COURIER_*` environment overrides
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs using the environment naming scheme
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "FANOUT_FAILURE_LOG_CAPACITY" => {
                    self.fanout.failure_log_capacity = parse_var(&name, &value)?;
                }
                "TRANSPORT_PEER_QUEUE_CAPACITY" => {
                    self.transport.peer_queue_capacity = parse_var(&name, &value)?;
                }
                "TRANSPORT_LOG_CALLS" => {
                    self.transport.log_calls = parse_var(&name, &value)?;
                }
                _ => {}
            }
        }
        self.validate()
    }

    /// Reject settings no transport can run with
    pub fn validate(&self) -> Result<()> {
        if self.transport.peer_queue_capacity == 0 {
            return Err(RpcError::config(
                "transport.peer_queue_capacity must be greater than zero",
            ));
        }
        if self.transport.peer_queue_capacity > MAX_PEER_QUEUE_CAPACITY {
            return Err(RpcError::config(format!(
                "transport.peer_queue_capacity must be at most {MAX_PEER_QUEUE_CAPACITY}"
            )));
        }
        if self.fanout.failure_log_capacity > MAX_FAILURE_LOG_CAPACITY {
            return Err(RpcError::config(format!(
                "fanout.failure_log_capacity must be at most {MAX_FAILURE_LOG_CAPACITY}"
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RpcError::config(format!("Invalid value for {name}: {e}")))
}
