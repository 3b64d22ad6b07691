//! Typed, explicitly constructed server configuration.
//!
//! No external CLI/config-file crate is introduced; binaries fill this in
//! from `std::env::args()` positional arguments, `[port] [max_conns]`-style.

use std::fmt;
use std::time::Duration;

/// Bind address, sizing knobs, and pool watermarks shared by every front end.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Acceptor threads (multi-threaded front end only; single-threaded and
    /// blocking front ends always run exactly one).
    pub acceptors: usize,
    /// Store byte budget, shared across every key+value currently resident.
    pub store_max_bytes: usize,
    /// Fixed read-buffer capacity per connection.
    pub read_buf_size: usize,
    pub pool_low_watermark: usize,
    pub pool_high_watermark: usize,
    pub pool_max_queue_size: usize,
    pub pool_idle_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ZeroAcceptors,
    ZeroStoreBudget,
    ZeroReadBuffer,
    LowExceedsHighWatermark,
    ZeroQueueCapacity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroAcceptors => write!(f, "acceptors must be >= 1"),
            ConfigError::ZeroStoreBudget => write!(f, "store_max_bytes must be >= 1"),
            ConfigError::ZeroReadBuffer => write!(f, "read_buf_size must be >= 1"),
            ConfigError::LowExceedsHighWatermark => {
                write!(f, "pool_low_watermark must be <= pool_high_watermark")
            }
            ConfigError::ZeroQueueCapacity => write!(f, "pool_max_queue_size must be >= 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0".to_string(),
            port: 11311,
            acceptors: 1,
            store_max_bytes: 64 * 1024 * 1024,
            read_buf_size: 4096,
            pool_low_watermark: 2,
            pool_high_watermark: 8,
            pool_max_queue_size: 1024,
            pool_idle_time: Duration::from_millis(500),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acceptors == 0 {
            return Err(ConfigError::ZeroAcceptors);
        }
        if self.store_max_bytes == 0 {
            return Err(ConfigError::ZeroStoreBudget);
        }
        if self.read_buf_size == 0 {
            return Err(ConfigError::ZeroReadBuffer);
        }
        if self.pool_low_watermark > self.pool_high_watermark {
            return Err(ConfigError::LowExceedsHighWatermark);
        }
        if self.pool_max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }

    /// `[port] [store_max_bytes]` positional arguments.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = ServerConfig::default();
        if let Some(port) = args.get(1).and_then(|s| s.parse().ok()) {
            config.port = port;
        }
        if let Some(max_bytes) = args.get(2).and_then(|s| s.parse().ok()) {
            config.store_max_bytes = max_bytes;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_low_above_high_watermark() {
        let mut c = ServerConfig::default();
        c.pool_low_watermark = 9;
        c.pool_high_watermark = 4;
        assert_eq!(c.validate().unwrap_err(), ConfigError::LowExceedsHighWatermark);
    }

    #[test]
    fn rejects_zero_store_budget() {
        let mut c = ServerConfig::default();
        c.store_max_bytes = 0;
        assert_eq!(c.validate().unwrap_err(), ConfigError::ZeroStoreBudget);
    }

    #[test]
    fn from_args_parses_positional_port_and_budget() {
        let args: Vec<String> =
            vec!["memkv".to_string(), "9999".to_string(), "2048".to_string()];
        let config = ServerConfig::from_args(&args);
        assert_eq!(config.port, 9999);
        assert_eq!(config.store_max_bytes, 2048);
    }

    #[test]
    fn from_args_falls_back_to_defaults_when_missing() {
        let args: Vec<String> = vec!["memkv".to_string()];
        let config = ServerConfig::from_args(&args);
        assert_eq!(config.port, ServerConfig::default().port);
    }
}
