//! Configuration management for Warden.

use std::net::SocketAddr;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::conf::{parse_cidrs, Limit};
use crate::store::RedisStoreConfig;

/// Main configuration for the Warden service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Redis store configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Configuration synchronizer settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Seed values used until the store is first synced
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Ingress class tagged on every metric
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            sync: SyncConfig::default(),
            defaults: DefaultsConfig::default(),
            ingress_class: default_ingress_class(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    "0.0.0.0:3000".parse().unwrap()
}

fn default_ingress_class() -> String {
    "default".to_string()
}

/// Redis store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// host:port of the Redis server
    #[serde(default = "default_redis_address")]
    pub address: String,

    /// Connection establishment bound in milliseconds
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Read command bound in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Write command bound in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: default_redis_address(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// The store-level view of these settings.
    pub fn store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            address: self.address.clone(),
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

fn default_redis_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_dial_timeout_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    300
}

fn default_write_timeout_ms() -> u64 {
    300
}

/// Configuration synchronizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Snapshot refresh interval in seconds
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_sync_interval_secs() -> u64 {
    30
}

/// Seed configuration used until the store is first synced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Requests allowed per window
    #[serde(default = "default_limit_count")]
    pub limit_count: u64,

    /// Window size in seconds
    #[serde(default = "default_limit_duration_secs")]
    pub limit_duration_secs: u64,

    /// Whether the global limit is enforced
    #[serde(default = "default_limit_enabled")]
    pub limit_enabled: bool,

    /// Report only, do not block
    #[serde(default)]
    pub report_only: bool,

    /// Seed whitelist CIDRs
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Seed blacklist CIDRs
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            limit_count: default_limit_count(),
            limit_duration_secs: default_limit_duration_secs(),
            limit_enabled: default_limit_enabled(),
            report_only: false,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

impl DefaultsConfig {
    /// The seed global limit.
    pub fn limit(&self) -> Limit {
        Limit {
            count: self.limit_count,
            duration: Duration::from_secs(self.limit_duration_secs),
            enabled: self.limit_enabled,
        }
    }

    /// Parsed seed whitelist; malformed entries are skipped.
    pub fn parsed_whitelist(&self) -> Vec<IpNet> {
        parse_cidrs(&self.whitelist)
    }

    /// Parsed seed blacklist; malformed entries are skipped.
    pub fn parsed_blacklist(&self) -> Vec<IpNet> {
        parse_cidrs(&self.blacklist)
    }
}

fn default_limit_count() -> u64 {
    10
}

fn default_limit_duration_secs() -> u64 {
    1
}

fn default_limit_enabled() -> bool {
    true
}

impl WardenConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WardenConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::WardenError::Config(e.to_string()))?;
        Ok(config)
    }
}
