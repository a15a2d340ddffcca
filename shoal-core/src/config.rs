//! Centralized configuration for Shoal.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::time::Duration;

/// Central configuration for all Shoal components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ShoalConfig {
    pub swarm: SwarmConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

/// Lease allocation and source scheduling configuration.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Largest range handed to a single request
    pub max_lease_size: u64,
    /// Block granularity used to align leases and verify content
    pub block_size: u64,
    /// How long a source waits before retrying after an empty lease
    pub lease_retry_interval: Duration,
    /// Reconnect attempts allowed per source before it is dropped
    pub max_reconnects: u32,
    /// Capacity of the coordinator and source event broadcast channels
    pub event_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_lease_size: 262_144, // 256 KiB
            block_size: 16_384,      // 16 KiB
            lease_retry_interval: Duration::from_millis(250),
            max_reconnects: 8,
            event_capacity: 256,
        }
    }
}

/// Source connection configuration.
///
/// Controls connect and read timeouts, request identification and
/// bandwidth measurement.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Time allowed to establish a connection
    pub connect_timeout: Duration,
    /// Time allowed between response reads
    pub read_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Sliding window used for bandwidth measurement
    pub bandwidth_window: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            user_agent: "shoal/0.1.0".to_string(),
            bandwidth_window: Duration::from_secs(5),
        }
    }
}

/// Destination storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Whether missing parent directories are created on first write
    pub create_dirs: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { create_dirs: true }
    }
}

impl ShoalConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Swarm configuration overrides
        if let Some(size) = env_parse::<u64>("SHOAL_MAX_LEASE_SIZE") {
            if size > 0 {
                config.swarm.max_lease_size = size;
            }
        }

        if let Some(size) = env_parse::<u64>("SHOAL_BLOCK_SIZE") {
            if size > 0 {
                config.swarm.block_size = size;
            }
        }

        if let Some(count) = env_parse::<u32>("SHOAL_MAX_RECONNECTS") {
            config.swarm.max_reconnects = count;
        }

        // Network configuration overrides
        if let Some(seconds) = env_parse::<u64>("SHOAL_CONNECT_TIMEOUT") {
            config.network.connect_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("SHOAL_READ_TIMEOUT") {
            config.network.read_timeout = Duration::from_secs(seconds);
        }

        if let Ok(agent) = std::env::var("SHOAL_USER_AGENT") {
            if !agent.is_empty() {
                config.network.user_agent = agent;
            }
        }

        config
    }

    /// Creates a configuration with short timeouts and small leases for tests.
    pub fn for_testing() -> Self {
        Self {
            swarm: SwarmConfig {
                max_lease_size: 4096,
                block_size: 1024,
                lease_retry_interval: Duration::from_millis(10),
                max_reconnects: 4,
                event_capacity: 1024,
            },
            network: NetworkConfig {
                connect_timeout: Duration::from_millis(500),
                read_timeout: Duration::from_secs(1),
                ..NetworkConfig::default()
            },
            storage: StorageConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ShoalConfig::default();

        assert_eq!(config.swarm.max_lease_size, 262_144);
        assert_eq!(config.swarm.block_size, 16_384);
        assert_eq!(config.swarm.max_reconnects, 8);
        assert_eq!(config.network.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.network.read_timeout, Duration::from_secs(5));
        assert!(config.storage.create_dirs);
    }

    #[test]
    fn test_testing_preset() {
        let config = ShoalConfig::for_testing();
        assert!(config.swarm.max_lease_size < ShoalConfig::default().swarm.max_lease_size);
        assert!(config.swarm.lease_retry_interval < Duration::from_millis(100));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("SHOAL_MAX_LEASE_SIZE", "65536");
            std::env::set_var("SHOAL_BLOCK_SIZE", "0");
            std::env::set_var("SHOAL_CONNECT_TIMEOUT", "7");
            std::env::set_var("SHOAL_MAX_RECONNECTS", "3");
            std::env::set_var("SHOAL_USER_AGENT", "shoal-test");
        }

        let config = ShoalConfig::from_env();

        assert_eq!(config.swarm.max_lease_size, 65536);
        assert_eq!(config.swarm.block_size, 16_384);
        assert_eq!(config.network.connect_timeout, Duration::from_secs(7));
        assert_eq!(config.swarm.max_reconnects, 3);
        assert_eq!(config.network.user_agent, "shoal-test");

        // Cleanup
        unsafe {
            std::env::remove_var("SHOAL_MAX_LEASE_SIZE");
            std::env::remove_var("SHOAL_BLOCK_SIZE");
            std::env::remove_var("SHOAL_CONNECT_TIMEOUT");
            std::env::remove_var("SHOAL_MAX_RECONNECTS");
            std::env::remove_var("SHOAL_USER_AGENT");
        }
    }
}
